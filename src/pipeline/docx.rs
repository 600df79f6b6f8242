//! Word output: the rendered Markdown report laid out as a `.docx` document.
//!
//! The DOCX artifact is built from the text the checked template produced,
//! so both formats carry exactly the same fields in the same order. Only
//! the subset of Markdown the templates use is understood: `#`/`##`/`###`
//! headings, `- ` bullets and `**bold**` spans. Anything else is a plain
//! paragraph.

use crate::error::DdrError;
use docx_rs::{Docx, Paragraph, Run};
use std::io::Cursor;
use tracing::debug;

/// Font sizes in half-points, by heading level.
const HEADING_SIZES: [usize; 3] = [36, 28, 24];

/// A run of text, bold or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub bold: bool,
}

/// One paragraph of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Level 1–3.
    Heading(usize, String),
    Bullet(Vec<Span>),
    Paragraph(Vec<Span>),
}

/// Split rendered Markdown into document blocks. Blank lines separate
/// paragraphs and produce nothing themselves.
pub fn blocks(markdown: &str) -> Vec<Block> {
    markdown
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            if let Some((level, title)) = heading(line) {
                Block::Heading(level, title.to_string())
            } else if let Some(item) = line.strip_prefix("- ") {
                Block::Bullet(spans(item))
            } else {
                Block::Paragraph(spans(line))
            }
        })
        .collect()
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if !(1..=HEADING_SIZES.len()).contains(&hashes) {
        return None;
    }
    line[hashes..].strip_prefix(' ').map(|title| (hashes, title.trim()))
}

/// `**bold**` spans. An unmatched `**` is kept as literal text.
fn spans(line: &str) -> Vec<Span> {
    let parts: Vec<&str> = line.split("**").collect();
    if parts.len() % 2 == 0 {
        return vec![Span {
            text: line.to_string(),
            bold: false,
        }];
    }
    parts
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.is_empty())
        .map(|(i, text)| Span {
            text: text.to_string(),
            bold: i % 2 == 1,
        })
        .collect()
}

fn paragraph(block: &Block) -> Paragraph {
    let run = |span: &Span| {
        let r = Run::new().add_text(span.text.as_str());
        if span.bold {
            r.bold()
        } else {
            r
        }
    };
    match block {
        Block::Heading(level, title) => Paragraph::new().add_run(
            Run::new()
                .add_text(title.as_str())
                .bold()
                .size(HEADING_SIZES[level.saturating_sub(1).min(HEADING_SIZES.len() - 1)]),
        ),
        Block::Bullet(spans) => spans
            .iter()
            .fold(Paragraph::new().add_run(Run::new().add_text("• ")), |p, s| p.add_run(run(s))),
        Block::Paragraph(spans) => spans.iter().fold(Paragraph::new(), |p, s| p.add_run(run(s))),
    }
}

/// Pack the rendered report into DOCX bytes.
pub fn to_docx(markdown: &str) -> Result<Vec<u8>, DdrError> {
    let blocks = blocks(markdown);
    let doc = blocks.iter().fold(Docx::new(), |doc, b| doc.add_paragraph(paragraph(b)));

    let mut buf = Cursor::new(Vec::new());
    doc.build()
        .pack(&mut buf)
        .map_err(|e| DdrError::render(format!("DOCX packaging failed: {e}")))?;
    debug!("Packed {} paragraphs into {} DOCX bytes", blocks.len(), buf.get_ref().len());
    Ok(buf.into_inner())
}
