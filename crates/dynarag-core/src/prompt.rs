//! System-prompt assembly for retrieval-augmented answers.
//!
//! A [`RagPromptBuilder`] takes the retrieved documents and the user query
//! and renders a single system message through a named template held by a
//! [`TemplateManager`]. The resulting conversation is always exactly two
//! messages: the rendered system prompt first, the raw query second.
//!
//! # Template syntax
//!
//! Templates are plain text with `{{name}}` placeholders. Recognized names:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `documents` | Ordered `[index] source` blocks, each followed by the content |
//! | `query` | The user query |
//! | `response_style` | Free-form style hint, e.g. `concise and factual` |
//! | `max_tokens` | Token budget hint |
//! | `temperature` | Sampling temperature hint |
//!
//! Templates are parsed when registered; an unknown placeholder or an
//! unterminated `{{` is rejected then, never at render time. The hints are
//! only text: nothing here enforces a token budget.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

/// Name under which the built-in template is registered.
pub const DEFAULT_TEMPLATE_NAME: &str = "default_rag";

const DEFAULT_TEMPLATE: &str = include_str!("../templates/rag_system_prompt.txt");

/// Chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message, serialized as `{"role": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A retrieved document as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptDocument {
    pub index: usize,
    pub source: String,
    pub content: String,
}

/// Style hints passed through to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptOptions {
    pub response_style: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            response_style: "concise and factual".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Documents,
    Query,
    ResponseStyle,
    MaxTokens,
    Temperature,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "documents" => Some(Slot::Documents),
            "query" => Some(Slot::Query),
            "response_style" => Some(Slot::ResponseStyle),
            "max_tokens" => Some(Slot::MaxTokens),
            "temperature" => Some(Slot::Temperature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

#[derive(Debug, Clone)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(name: &str, source: &str) -> RagResult<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                RagError::validation(format!("template '{}': unterminated '{{{{'", name))
            })?;
            let key = after[..close].trim();
            let slot = Slot::from_name(key).ok_or_else(|| {
                RagError::validation(format!("template '{}': unknown placeholder '{}'", name, key))
            })?;
            segments.push(Segment::Slot(slot));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    fn render(&self, ctx: &PromptContext<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Slot::Documents) => out.push_str(&render_documents(ctx.documents)),
                Segment::Slot(Slot::Query) => out.push_str(ctx.query),
                Segment::Slot(Slot::ResponseStyle) => out.push_str(&ctx.options.response_style),
                Segment::Slot(Slot::MaxTokens) => {
                    let _ = write!(out, "{}", ctx.options.max_tokens);
                }
                Segment::Slot(Slot::Temperature) => {
                    let _ = write!(out, "{}", ctx.options.temperature);
                }
            }
        }
        out
    }
}

fn render_documents(documents: &[PromptDocument]) -> String {
    if documents.is_empty() {
        return "(no documents were retrieved)".to_string();
    }
    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(out, "[{}] {}\n{}", doc.index, doc.source, doc.content.trim());
    }
    out
}

/// Values available to a template at render time.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub documents: &'a [PromptDocument],
    pub query: &'a str,
    pub options: &'a PromptOptions,
}

/// Named, pre-parsed templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateManager {
    templates: HashMap<String, Template>,
}

impl TemplateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager with the built-in template registered as
    /// [`DEFAULT_TEMPLATE_NAME`].
    pub fn with_default() -> RagResult<Self> {
        let mut manager = Self::new();
        manager.register(DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE)?;
        Ok(manager)
    }

    /// Parse and register a template, replacing any previous one of the
    /// same name.
    pub fn register(&mut self, name: &str, content: &str) -> RagResult<()> {
        let template = Template::parse(name, content)?;
        self.templates.insert(name.to_string(), template);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn render(&self, name: &str, ctx: &PromptContext<'_>) -> RagResult<String> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| RagError::validation(format!("template '{}' not registered", name)))?;
        Ok(template.render(ctx))
    }
}

/// Builds the `[system, user]` message pair for one query.
///
/// ```rust
/// use dynarag_core::prompt::{PromptDocument, PromptOptions, RagPromptBuilder, Role};
///
/// let docs = vec![PromptDocument {
///     index: 1,
///     source: "geo.md".into(),
///     content: "London is the capital of England".into(),
/// }];
/// let builder = RagPromptBuilder::new(docs, "What is the capital of England?", PromptOptions::default())
///     .unwrap();
/// let messages = builder.messages().unwrap();
/// assert_eq!(messages[0].role, Role::System);
/// assert!(messages[0].content.contains("[1] geo.md"));
/// assert_eq!(messages[1].content, "What is the capital of England?");
/// ```
#[derive(Debug, Clone)]
pub struct RagPromptBuilder {
    templates: TemplateManager,
    template_name: String,
    documents: Vec<PromptDocument>,
    query: String,
    options: PromptOptions,
}

impl RagPromptBuilder {
    pub fn new(
        documents: Vec<PromptDocument>,
        query: impl Into<String>,
        options: PromptOptions,
    ) -> RagResult<Self> {
        Ok(Self {
            templates: TemplateManager::with_default()?,
            template_name: DEFAULT_TEMPLATE_NAME.to_string(),
            documents,
            query: query.into(),
            options,
        })
    }

    /// Register `content` under `name` and render with it from now on.
    pub fn with_template(mut self, name: &str, content: &str) -> RagResult<Self> {
        self.templates.register(name, content)?;
        self.template_name = name.to_string();
        Ok(self)
    }

    pub fn build_system_prompt(&self) -> RagResult<Message> {
        let ctx = PromptContext {
            documents: &self.documents,
            query: &self.query,
            options: &self.options,
        };
        let content = self.templates.render(&self.template_name, &ctx)?;
        Ok(Message::system(content))
    }

    /// The full conversation: system prompt, then the raw query.
    pub fn messages(&self) -> RagResult<Vec<Message>> {
        Ok(vec![self.build_system_prompt()?, Message::user(self.query.clone())])
    }
}
