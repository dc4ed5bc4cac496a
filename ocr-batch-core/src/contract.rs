//! # contract: shared data model and the provider trait seam
//!
//! Everything that crosses a module boundary in a batch run lives here:
//! the discovered [`FileTask`], the provider-agnostic [`InferenceRequest`] and
//! [`InferenceResponse`], the [`ProviderError`] taxonomy, and the
//! [`InferenceProvider`] trait implemented by the HTTP adapter and by test mocks.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`, so consumers get `MockInferenceProvider`
//!   (exported behind the `test-export-mocks` feature, on by default).

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

/// One discovered input file, queued for processing exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileTask {
    pub path: PathBuf,
    /// File name without its extension; artifact names derive from it.
    pub base_name: String,
    /// Lowercased extension without the leading dot.
    pub extension: String,
}

impl FileTask {
    /// The file name as it appears on disk, used in titles and logs.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", self.base_name, self.extension))
    }
}

/// API key passed through to the provider. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A piece of message content. Attachments carry raw bytes; each wire format
/// encodes them itself.
#[derive(Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Document {
        /// Lowercased extension: pdf, doc, docx.
        format: String,
        name: String,
        bytes: Vec<u8>,
    },
    Image {
        /// Normalised image format: png or jpeg.
        format: String,
        bytes: Vec<u8>,
    },
}

impl ContentPart {
    pub fn is_attachment(&self) -> bool {
        !matches!(self, ContentPart::Text(_))
    }
}

impl fmt::Debug for ContentPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentPart::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ContentPart::Document {
                format,
                name,
                bytes,
            } => f
                .debug_struct("Document")
                .field("format", format)
                .field("name", name)
                .field("bytes", &bytes.len())
                .finish(),
            ContentPart::Image { format, bytes } => f
                .debug_struct("Image")
                .field("format", format)
                .field("bytes", &bytes.len())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    /// All text parts joined with newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Provider-agnostic request. Built once per task or chat invocation and
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model_id: String,
    pub credentials: Credentials,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
}

impl InferenceRequest {
    /// Requests carrying a document or image are OCR requests and get page data back.
    pub fn has_attachment(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.content.iter().any(ContentPart::is_attachment))
    }

    /// Lifts system-role messages out of the turn list.
    ///
    /// Returns the merged system prompt (the explicit prompt first, then each
    /// system message, separated by a blank line) and the remaining turns.
    pub fn split_system(&self) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<String> = Vec::new();
        if let Some(prompt) = self.system_prompt.as_deref() {
            if !prompt.trim().is_empty() {
                system_parts.push(prompt.to_string());
            }
        }
        let mut turns = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            if message.role == Role::System {
                let text = message.joined_text();
                if !text.trim().is_empty() {
                    system_parts.push(text);
                }
            } else {
                turns.push(message);
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }
}

/// One page of OCR output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Page {
    pub page_number: u32,
    pub content: String,
    /// Character count of `content`.
    pub length: usize,
}

impl Page {
    pub fn new(page_number: u32, content: impl Into<String>) -> Self {
        let content = content.into();
        let length = content.chars().count();
        Self {
            page_number,
            content,
            length,
        }
    }
}

/// The single response shape both wire formats normalise into.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InferenceResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model_used: String,
    pub pages: Option<Vec<Page>>,
}

impl InferenceResponse {
    /// Pages in ascending page order, whatever order they were stored in.
    pub fn ordered_pages(&self) -> Option<Vec<&Page>> {
        self.pages.as_ref().map(|pages| {
            let mut ordered: Vec<&Page> = pages.iter().collect();
            ordered.sort_by_key(|p| p.page_number);
            ordered
        })
    }
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Timeouts, dropped connections, throttling and server-side failures.
    #[error("transient provider failure{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },

    /// Rejected requests, authentication failures and anything else a retry cannot fix.
    #[error("provider rejected request{}: {message}", status_suffix(.status))]
    Permanent { status: Option<u16>, message: String },

    #[error("unsupported {kind} format '{format}' for the {path} path")]
    Unsupported {
        kind: &'static str,
        format: String,
        path: &'static str,
    },

    #[error("could not decode provider response: {message}")]
    Decode { message: String },

    #[error("could not read input file: {0}")]
    Input(#[from] std::io::Error),

    #[error("could not convert {format} image: {message}")]
    Conversion { format: String, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Transient { .. } => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => ProviderError::Transient {
                status: Some(status),
                message,
            },
            _ => ProviderError::Permanent {
                status: Some(status),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ProviderError::from_status(status.as_u16(), e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            ProviderError::Transient {
                status: None,
                message: e.to_string(),
            }
        } else if e.is_decode() {
            ProviderError::Decode {
                message: e.to_string(),
            }
        } else {
            ProviderError::Permanent {
                status: None,
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Decode {
            message: e.to_string(),
        }
    }
}

/// Trait for issuing one inference call and normalising its response.
/// Implemented by the HTTP adapter and by mocks in testing.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Send the request and return the normalised response.
    async fn invoke(&self, request: &InferenceRequest)
        -> Result<InferenceResponse, ProviderError>;
}
