//! Pipeline stages for DDR generation.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and backends can be swapped without touching the
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──┐
//!            (+ocr)   ├──▶ merge ──▶ llm ──▶ validate ──▶ render
//! input ──▶ extract ──┘   (clean)   (one    (schema,     (Markdown
//!            (+ocr)                  call)   conflicts)   template)
//! ```
//!
//! 1. [`input`]    — read a path or download a URL; check the `%PDF` header
//! 2. [`extract`]  — per-page native text via pdfium, falling back to
//!    [`ocr`] for pages whose text layer is too thin
//! 3. [`merge`]    — normalise, strip running headers, tag sections,
//!    inspection before thermal
//! 4. [`llm`]      — the single model call; the only network stage
//! 5. [`validate`] — typed record, sentinels, conflict resolution
//! 6. [`render`]   — deterministic Markdown artifact, optionally packed
//!    as a Word document by [`docx`]

pub mod docx;
pub mod extract;
pub mod input;
pub mod llm;
pub mod merge;
pub mod ocr;
pub mod render;
pub mod validate;
