//! Structured generation: one model call turning the merged corpus into a
//! candidate record.
//!
//! The model sits behind [`ModelClient`] so the pipeline only ever sees
//! "prompt in, text out". [`ProviderClient`] adapts any
//! `edgequake_llm::LLMProvider`; tests plug in scripted clients.
//!
//! There is exactly one call per run and no retry here. A response that is
//! not a JSON object is a [`DdrError::Format`]; whether to try again is the
//! caller's decision (see [`DdrError::is_retryable`]).

use crate::config::DdrConfig;
use crate::error::DdrError;
use crate::output::MergedText;
use crate::prompts::build_prompt;
use crate::schema::SchemaSpec;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything a model client needs for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub prompt: String,
    /// JSON skeleton of the expected answer; already embedded in `prompt`.
    pub schema: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The external language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Return the model's raw text answer.
    async fn complete(&self, request: &ModelRequest) -> Result<String, DdrError>;
}

/// [`ModelClient`] over an `edgequake_llm` provider, bounded by a timeout.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    label: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            label: label.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    async fn complete(&self, request: &ModelRequest) -> Result<String, DdrError> {
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user(request.prompt.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| DdrError::ApiTimeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| classify_provider_error(&self.label, &e.to_string()))?;

        debug!(
            "Model call: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Map a provider failure message onto the error kinds callers act on.
pub fn classify_provider_error(provider: &str, message: &str) -> DdrError {
    let lower = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["429", "rate limit", "rate-limit", "quota", "too many requests"]) {
        DdrError::RateLimitExceeded {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if any(&["401", "403", "unauthorized", "forbidden", "invalid api key", "authentication"]) {
        DdrError::AuthError {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else {
        DdrError::LlmApiError {
            message: message.to_string(),
        }
    }
}

/// Resolve the model client, from most-specific to least-specific:
///
/// 1. `config.model_client`
/// 2. `config.provider`, wrapped in a [`ProviderClient`]
/// 3. `config.provider_name` + `config.model` through `ProviderFactory`
///
/// Environment auto-detection is the binary's job; the library never guesses.
pub fn resolve_client(config: &DdrConfig) -> Result<Arc<dyn ModelClient>, DdrError> {
    let timeout = Duration::from_secs(config.api_timeout_secs);

    if let Some(ref client) = config.model_client {
        return Ok(Arc::clone(client));
    }

    if let Some(ref provider) = config.provider {
        let label = config.provider_name.clone().unwrap_or_else(|| "custom".to_string());
        return Ok(Arc::new(ProviderClient::new(Arc::clone(provider), label, timeout)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().ok_or_else(|| DdrError::ProviderNotConfigured {
            provider: name.clone(),
            hint: "A model name is required when selecting a provider by name.".to_string(),
        })?;
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            DdrError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            }
        })?;
        return Ok(Arc::new(ProviderClient::new(provider, name.clone(), timeout)));
    }

    Err(DdrError::ProviderNotConfigured {
        provider: "none".to_string(),
        hint: "Set DdrConfig::model_client, DdrConfig::provider, or provider_name + model.".to_string(),
    })
}

/// The untrusted model answer, parsed but not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub fields: Map<String, Value>,
    /// Size of the prompt that produced it.
    pub prompt_chars: usize,
}

/// Build the prompt, make the single model call and parse the answer.
pub async fn generate(
    merged: &MergedText,
    schema: &SchemaSpec,
    client: &dyn ModelClient,
    config: &DdrConfig,
) -> Result<CandidateRecord, DdrError> {
    let prompt = build_prompt(merged, schema);
    let request = ModelRequest {
        system: prompt.system,
        prompt: prompt.user,
        schema: prompt.schema,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let prompt_chars = request.system.len() + request.prompt.len();
    info!("Requesting DDR from model ({} prompt chars)", prompt_chars);

    let raw = client.complete(&request).await?;
    debug!("Model answered with {} chars", raw.len());

    Ok(CandidateRecord {
        fields: parse_candidate(&raw)?,
        prompt_chars,
    })
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Parse a model answer into a JSON object.
///
/// A fenced or bare JSON answer must be an object. Otherwise the first
/// `{…}` value in the text is taken and any prose around it ignored, unless a
/// `[` opens before it. Anything else is a [`DdrError::Format`].
pub fn parse_candidate(raw: &str) -> Result<Map<String, Value>, DdrError> {
    let trimmed = raw.trim();
    let unfenced = RE_FENCED
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(_) => return Err(format_error("top-level JSON value is not an object", raw)),
        Err(_) => {}
    }

    // ── Fallback: one object embedded in prose ──────────────────────────
    let start = match unfenced.find('{') {
        Some(start) if !unfenced[..start].contains('[') => start,
        Some(_) => return Err(format_error("top-level JSON value is not an object", raw)),
        None => return Err(format_error("no JSON object found in the response", raw)),
    };

    let mut values = serde_json::Deserializer::from_str(&unfenced[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(map))) => Ok(map),
        Some(Ok(_)) => Err(format_error("top-level JSON value is not an object", raw)),
        Some(Err(e)) => Err(format_error(&format!("invalid JSON: {e}"), raw)),
        None => Err(format_error("no JSON object found in the response", raw)),
    }
}

fn format_error(detail: &str, raw: &str) -> DdrError {
    DdrError::Format {
        detail: detail.to_string(),
        excerpt: raw.trim().chars().take(160).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn parses_plain_object() {
        let m = parse_candidate(r#"{"Property_Issue_Summary": "Damp hall"}"#).unwrap();
        assert_eq!(m["Property_Issue_Summary"], "Damp hall");
    }

    #[test]
    fn parses_fenced_object() {
        let m = parse_candidate("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(m["a"], 1);
    }

    #[test]
    fn parses_object_inside_prose() {
        let m = parse_candidate("Here is the report:\n{\"a\": {\"b\": 2}}\nHope this helps.").unwrap();
        assert_eq!(m["a"]["b"], 2);
    }

    #[test]
    fn free_text_is_format_error() {
        let err = parse_candidate("I cannot produce a report from these documents.").unwrap_err();
        match err {
            DdrError::Format { excerpt, .. } => assert!(excerpt.starts_with("I cannot")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn array_is_format_error() {
        assert!(matches!(parse_candidate("[{\"a\": 1}]"), Err(DdrError::Format { .. })));
        let err = parse_candidate("[{\"Property_Issue_Summary\": \"first\"}]").unwrap_err();
        match err {
            DdrError::Format { detail, .. } => assert!(detail.contains("not an object"), "{detail}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fenced_array_and_scalar_are_format_errors() {
        assert!(matches!(parse_candidate("```json\n[{\"a\": 1}]\n```"), Err(DdrError::Format { .. })));
        assert!(matches!(parse_candidate("\"just a string\""), Err(DdrError::Format { .. })));
        assert!(matches!(parse_candidate("Result: [{\"a\": 1}, 2"), Err(DdrError::Format { .. })));
    }

    #[test]
    fn trailing_prose_with_braces_is_ignored() {
        let m = parse_candidate(
            "{\"Property_Issue_Summary\": \"x\"}\nNote: unknown fields are {Not Available}.",
        )
        .unwrap();
        assert_eq!(m["Property_Issue_Summary"], "x");
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn truncated_json_is_format_error() {
        assert!(matches!(parse_candidate("{\"a\": {\"b\": 1}"), Err(DdrError::Format { .. })));
    }

    #[test]
    fn classify_errors() {
        assert!(matches!(
            classify_provider_error("openai", "HTTP 429 Too Many Requests"),
            DdrError::RateLimitExceeded { .. }
        ));
        assert!(matches!(
            classify_provider_error("openai", "401 Unauthorized: invalid api key"),
            DdrError::AuthError { .. }
        ));
        assert!(matches!(
            classify_provider_error("openai", "connection reset"),
            DdrError::LlmApiError { .. }
        ));
    }

    #[test]
    fn resolve_without_provider_fails() {
        let err = resolve_client(&DdrConfig::default()).err().unwrap();
        assert!(matches!(err, DdrError::ProviderNotConfigured { .. }));
    }

    struct Echo(Mutex<Option<ModelRequest>>);

    #[async_trait]
    impl ModelClient for Echo {
        async fn complete(&self, request: &ModelRequest) -> Result<String, DdrError> {
            *self.0.lock().unwrap() = Some(request.clone());
            Ok("{\"Property_Issue_Summary\": \"ok\"}".to_string())
        }
    }

    #[tokio::test]
    async fn generate_sends_schema_and_settings() {
        let client = Echo(Mutex::new(None));
        let config = DdrConfig::builder().temperature(0.2).max_tokens(2000).build().unwrap();
        let merged = MergedText {
            raw: "[Inspection Report]\nHall damp.".into(),
            inspection_present: true,
            ..MergedText::default()
        };
        let candidate = generate(&merged, &SchemaSpec::ddr(), &client, &config).await.unwrap();
        assert_eq!(candidate.fields["Property_Issue_Summary"], "ok");

        let sent = client.0.lock().unwrap().clone().unwrap();
        assert_eq!(sent.temperature, 0.2);
        assert_eq!(sent.max_tokens, 2000);
        assert!(sent.prompt.contains("Hall damp."));
        assert!(sent.schema.contains("Area_Wise_Observations"));
        assert_eq!(candidate.prompt_chars, sent.system.len() + sent.prompt.len());
    }
}
