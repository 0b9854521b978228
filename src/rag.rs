//! Retrieval-augmented answers.
//!
//! ```text
//! query ──▶ top_k ──▶ prompt documents ──▶ [system, user] ──▶ LlmClient::generate ──▶ sink
//! ```
//!
//! The embedding lookup always completes before the prompt is built, and
//! the prompt before generation starts.

use serde_json::Value;
use tokio::io::AsyncWrite;
use tracing::debug;

use dynarag_core::error::RagResult;
use dynarag_core::models::ChunkMatch;
use dynarag_core::prompt::{Message, PromptDocument, PromptOptions, RagPromptBuilder};

use crate::embedding_store::EmbeddingStore;
use crate::llm::LlmClient;

/// Name used when a custom template replaces the built-in one.
pub const CUSTOM_TEMPLATE_NAME: &str = "custom";

/// Number retrieved chunks from 1, labelled by their file path.
pub fn prompt_documents(matches: &[ChunkMatch]) -> Vec<PromptDocument> {
    matches
        .iter()
        .enumerate()
        .map(|(i, m)| PromptDocument {
            index: i + 1,
            source: m.file_path.clone(),
            content: m.chunk_text.clone(),
        })
        .collect()
}

/// Build the two-message conversation for `query` over `matches`.
pub fn build_messages(
    matches: &[ChunkMatch],
    query: &str,
    options: &PromptOptions,
    custom_template: Option<&str>,
) -> RagResult<Vec<Message>> {
    let mut builder = RagPromptBuilder::new(prompt_documents(matches), query, options.clone())?;
    if let Some(template) = custom_template {
        builder = builder.with_template(CUSTOM_TEMPLATE_NAME, template)?;
    }
    builder.messages()
}

/// One answer request.
pub struct AnswerRequest<'a> {
    pub owner: &'a str,
    pub query: &'a str,
    pub k: i64,
    pub metadata_filter: Option<&'a Value>,
    pub options: &'a PromptOptions,
    pub custom_template: Option<&'a str>,
}

/// Retrieve context for the query and stream the model's answer to `sink`.
///
/// Returns the chunks the answer was conditioned on.
pub async fn answer<W>(
    store: &EmbeddingStore,
    llm: &LlmClient,
    request: &AnswerRequest<'_>,
    sink: &mut W,
) -> RagResult<Vec<ChunkMatch>>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let matches = store
        .top_k(request.owner, request.query, request.k, request.metadata_filter)
        .await?;
    let messages = build_messages(
        &matches,
        request.query,
        request.options,
        request.custom_template,
    )?;
    debug!(
        owner = request.owner,
        sources = matches.len(),
        model = llm.model(),
        "generating answer"
    );
    llm.generate(&messages, sink).await?;
    Ok(matches)
}
