//! Streaming chat-completion client.
//!
//! [`LlmClient::generate`] sends one `POST` with
//! `{messages, model, temperature, stream: true}` and a bearer token, then
//! reads the response as server-sent event lines:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Lon"}}]}
//! data: {"choices":[{"delta":{"content":"don"}}]}
//! data: [DONE]
//! ```
//!
//! Blank lines and lines without the `data: ` prefix are skipped. Each
//! payload is decoded by the configured [`Provider`] and its content
//! fragment is written to the sink as soon as it arrives. `[DONE]` ends the
//! stream; a connection that closes before `[DONE]` is a failure.
//!
//! There is no retry or resumption. Bytes already written to the sink when
//! an error occurs are left for the caller to keep or discard.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use dynarag_core::error::{RagError, RagResult, ResultExt};
use dynarag_core::prompt::Message;

use crate::config::LlmConfig;

const DEP: &str = "llm";
const DATA_PREFIX: &str = "data: ";
const DONE: &str = "[DONE]";
const ERROR_SNIPPET_CHARS: usize = 200;

/// Supported chat-completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Groq,
    OpenAi,
}

impl Provider {
    pub fn parse(name: &str) -> RagResult<Self> {
        match name {
            "groq" => Ok(Provider::Groq),
            "openai" => Ok(Provider::OpenAi),
            other => Err(RagError::validation(format!(
                "unknown llm provider '{}'",
                other
            ))),
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::OpenAi => "gpt-4o-mini",
        }
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_TOKEN",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Decode one event payload into its content fragment, if it has one.
    pub fn decode_chunk(self, payload: &str) -> RagResult<Option<String>> {
        match self {
            // Both speak the OpenAI streaming schema.
            Provider::Groq | Provider::OpenAi => {
                let chunk: ChatChunk = serde_json::from_str(payload).map_err(|e| {
                    RagError::Decode(format!("invalid stream chunk ({}): {}", e, snippet(payload)))
                })?;
                Ok(chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content))
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [Message],
    model: &'a str,
    temperature: f32,
    stream: bool,
}

fn snippet(text: &str) -> String {
    let mut out: String = text.chars().take(ERROR_SNIPPET_CHARS).collect();
    if text.chars().count() > ERROR_SNIPPET_CHARS {
        out.push('…');
    }
    out
}

/// What a single event line means to the stream loop.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Skip,
    Done,
    Payload(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Line::Skip;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) if rest.trim() == DONE => Line::Done,
        Some(rest) => Line::Payload(rest),
        None => Line::Skip,
    }
}

/// Chat-completion client bound to one provider, model and token.
pub struct LlmClient {
    http: reqwest::Client,
    provider: Provider,
    endpoint: String,
    model: String,
    temperature: f32,
    token: String,
}

impl LlmClient {
    /// Build a client from `[llm]` with an explicit bearer token.
    pub fn new(config: &LlmConfig, token: impl Into<String>) -> RagResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(RagError::validation("llm api token must not be empty"));
        }
        let provider = Provider::parse(&config.provider)?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .dependency(DEP)?;

        Ok(Self {
            http,
            provider,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| provider.default_endpoint().to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
            temperature: config.temperature,
            token,
        })
    }

    /// Build a client reading the token from `api_key_env` (or the
    /// provider's default variable).
    pub fn from_env(config: &LlmConfig) -> RagResult<Self> {
        let provider = Provider::parse(&config.provider)?;
        let var = config
            .api_key_env
            .clone()
            .unwrap_or_else(|| provider.default_api_key_env().to_string());
        let token = std::env::var(&var).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(RagError::validation(format!(
                "{} is not set; it must hold the llm api token",
                var
            )));
        }
        Self::new(config, token)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stream the completion for `messages` into `sink`.
    pub async fn generate<W>(&self, messages: &[Message], sink: &mut W) -> RagResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if messages.is_empty() {
            return Err(RagError::validation("messages must not be empty"));
        }

        let body = ChatRequest {
            messages,
            model: &self.model,
            temperature: self.temperature,
            stream: true,
        };
        let mut response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .dependency(DEP)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(%status, endpoint = %self.endpoint, "llm request failed");
            return Err(RagError::dependency(
                DEP,
                format!("HTTP {}: {}", status, snippet(&text)),
            ));
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut fragments = 0usize;
        while let Some(bytes) = response.chunk().await.dependency(DEP)? {
            buffer.extend_from_slice(&bytes);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                if self.handle_line(&raw[..raw.len() - 1], sink, &mut fragments).await? {
                    debug!(fragments, model = %self.model, "llm stream complete");
                    return Ok(());
                }
            }
        }

        // A final line may arrive without a trailing newline.
        if !buffer.is_empty() && self.handle_line(&buffer, sink, &mut fragments).await? {
            debug!(fragments, model = %self.model, "llm stream complete");
            return Ok(());
        }

        Err(RagError::dependency(
            DEP,
            "stream closed before the [DONE] terminator",
        ))
    }

    /// Process one raw line. Returns `true` on the terminator.
    async fn handle_line<W>(&self, raw: &[u8], sink: &mut W, fragments: &mut usize) -> RagResult<bool>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let line = std::str::from_utf8(raw)
            .map_err(|e| RagError::Decode(format!("stream line is not UTF-8: {}", e)))?;
        match classify(line) {
            Line::Skip => Ok(false),
            Line::Done => Ok(true),
            Line::Payload(payload) => {
                if let Some(content) = self.provider.decode_chunk(payload)? {
                    sink.write_all(content.as_bytes()).await.dependency("sink")?;
                    sink.flush().await.dependency("sink")?;
                    *fragments += 1;
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_lines() {
        assert_eq!(classify(""), Line::Skip);
        assert_eq!(classify("\r"), Line::Skip);
        assert_eq!(classify(": keep-alive"), Line::Skip);
        assert_eq!(classify("event: ping"), Line::Skip);
        assert_eq!(classify("data: [DONE]"), Line::Done);
        assert_eq!(classify("data: [DONE]\r"), Line::Done);
        assert_eq!(classify("data: {\"a\":1}"), Line::Payload("{\"a\":1}"));
    }

    #[test]
    fn test_decode_chunk_content() {
        let got = Provider::Groq
            .decode_chunk(r#"{"choices":[{"delta":{"content":"Lon"}}]}"#)
            .unwrap();
        assert_eq!(got.as_deref(), Some("Lon"));
    }

    #[test]
    fn test_decode_chunk_without_content() {
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(Provider::OpenAi.decode_chunk(role_only).unwrap(), None);
        assert_eq!(Provider::OpenAi.decode_chunk(r#"{"choices":[]}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_chunk_invalid_json() {
        let err = Provider::Groq.decode_chunk("{not json").unwrap_err();
        assert!(matches!(err, RagError::Decode(_)));
    }

    #[test]
    fn test_provider_defaults() {
        assert_eq!(Provider::parse("groq").unwrap(), Provider::Groq);
        assert_eq!(Provider::Groq.default_api_key_env(), "GROQ_API_TOKEN");
        assert_eq!(Provider::OpenAi.default_model(), "gpt-4o-mini");
        assert!(Provider::parse("anthropic").is_err());
    }

    #[test]
    fn test_new_rejects_empty_token() {
        let err = LlmClient::new(&LlmConfig::default(), "  ").err().unwrap();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[test]
    fn test_new_applies_provider_defaults() {
        let client = LlmClient::new(&LlmConfig::default(), "t").unwrap();
        assert_eq!(client.provider(), Provider::Groq);
        assert_eq!(client.model(), "llama-3.3-70b-versatile");
    }

    #[tokio::test]
    async fn test_generate_empty_messages_writes_nothing() {
        let client = LlmClient::new(&LlmConfig::default(), "t").unwrap();
        let mut sink: Vec<u8> = Vec::new();
        let err = client.generate(&[], &mut sink).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        assert!(sink.is_empty());
    }
}
