//! Request and response bodies for the two provider wire formats, and the
//! one normalisation step per format that turns a response body into an
//! [`InferenceResponse`].
//!
//! - Multi-turn ("converse"): `system` is a list of text blocks, every message
//!   carries a content-block list, sampling knobs sit under `inferenceConfig`,
//!   usage is reported as `usage.inputTokens` / `usage.outputTokens`.
//! - Single-shot ("invoke"): versioned body with a flat `system` string and
//!   `max_tokens`, no top-p, usage reported as `usage.input_tokens` /
//!   `usage.output_tokens`, answer text in the first content block.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::contract::{ContentPart, InferenceResponse, Message, ProviderError};
use crate::pages::split_pages;

/// Version tag required in every single-shot body.
pub const SINGLE_SHOT_VERSION: &str = "bedrock-2023-05-31";

const CONVERSE_DOCUMENT_FORMATS: &[&str] = &["pdf", "doc", "docx"];
const CONVERSE_IMAGE_FORMATS: &[&str] = &["png", "jpeg"];
const INVOKE_DOCUMENT_FORMATS: &[&str] = &["pdf"];
const INVOKE_IMAGE_FORMATS: &[&str] = &["png", "jpeg"];

/// Sampling knobs shared by both formats.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Multi-turn
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<ConverseSystemBlock>,
    pub messages: Vec<ConverseMessage>,
    pub inference_config: ConverseInferenceConfig,
}

#[derive(Debug, Serialize)]
pub struct ConverseSystemBlock {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ConverseMessage {
    pub role: &'static str,
    pub content: Vec<ConverseBlock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConverseBlock {
    Text(String),
    Document(ConverseDocument),
    Image(ConverseImage),
}

#[derive(Debug, Serialize)]
pub struct ConverseDocument {
    pub format: String,
    pub name: String,
    pub source: ConverseSource,
}

#[derive(Debug, Serialize)]
pub struct ConverseImage {
    pub format: String,
    pub source: ConverseSource,
}

#[derive(Debug, Serialize)]
pub struct ConverseSource {
    pub bytes: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseInferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    usage: ConverseUsage,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    message: ConverseOutputMessage,
}

#[derive(Debug, Deserialize)]
struct ConverseOutputMessage {
    #[serde(default)]
    content: Vec<ConverseOutputBlock>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutputBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Document names on the multi-turn path may only hold alphanumerics,
/// single spaces, hyphens, parentheses and square brackets.
fn converse_document_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.chars() {
        let keep = c.is_ascii_alphanumeric() || matches!(c, '-' | '(' | ')' | '[' | ']');
        let next = if keep { c } else { ' ' };
        if next == ' ' && (cleaned.is_empty() || cleaned.ends_with(' ')) {
            continue;
        }
        cleaned.push(next);
    }
    let cleaned = cleaned.trim_end().to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

fn converse_block(part: &ContentPart) -> Result<ConverseBlock, ProviderError> {
    match part {
        ContentPart::Text(text) => Ok(ConverseBlock::Text(text.clone())),
        ContentPart::Document {
            format,
            name,
            bytes,
        } => {
            if !CONVERSE_DOCUMENT_FORMATS.contains(&format.as_str()) {
                return Err(ProviderError::Unsupported {
                    kind: "document",
                    format: format.clone(),
                    path: "multi-turn",
                });
            }
            Ok(ConverseBlock::Document(ConverseDocument {
                format: format.clone(),
                name: converse_document_name(name),
                source: ConverseSource {
                    bytes: encode(bytes),
                },
            }))
        }
        ContentPart::Image { format, bytes } => {
            if !CONVERSE_IMAGE_FORMATS.contains(&format.as_str()) {
                return Err(ProviderError::Unsupported {
                    kind: "image",
                    format: format.clone(),
                    path: "multi-turn",
                });
            }
            Ok(ConverseBlock::Image(ConverseImage {
                format: format.clone(),
                source: ConverseSource {
                    bytes: encode(bytes),
                },
            }))
        }
    }
}

/// Builds a multi-turn body. `turns` must already be free of system messages.
pub fn converse_body(
    system: Option<&str>,
    turns: &[&Message],
    settings: &GenerationSettings,
) -> Result<ConverseRequest, ProviderError> {
    let mut messages = Vec::with_capacity(turns.len());
    for message in turns {
        let content = message
            .content
            .iter()
            .map(converse_block)
            .collect::<Result<Vec<_>, _>>()?;
        messages.push(ConverseMessage {
            role: message.role.as_str(),
            content,
        });
    }
    Ok(ConverseRequest {
        system: system
            .map(|text| {
                vec![ConverseSystemBlock {
                    text: text.to_string(),
                }]
            })
            .unwrap_or_default(),
        messages,
        inference_config: ConverseInferenceConfig {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
        },
    })
}

/// Normalises a multi-turn response body: text blocks are concatenated,
/// usage comes from the nested camelCase counters.
pub fn normalize_converse(
    body: &[u8],
    model_id: &str,
    with_pages: bool,
) -> Result<InferenceResponse, ProviderError> {
    let parsed: ConverseResponse = serde_json::from_slice(body)?;
    let texts: Vec<String> = parsed
        .output
        .message
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect();
    if texts.is_empty() {
        return Err(ProviderError::Decode {
            message: "multi-turn response carried no text block".to_string(),
        });
    }
    let content = texts.join("");
    Ok(InferenceResponse {
        pages: if with_pages { split_pages(&content) } else { None },
        content,
        input_tokens: parsed.usage.input_tokens,
        output_tokens: parsed.usage.output_tokens,
        model_used: model_id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Single-shot
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct InvokeRequest {
    pub anthropic_version: &'static str,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<InvokeMessage>,
}

#[derive(Debug, Serialize)]
pub struct InvokeMessage {
    pub role: &'static str,
    pub content: InvokeContent,
}

/// Plain string for text-only turns, block list when attachments are present.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InvokeContent {
    Text(String),
    Blocks(Vec<InvokeBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvokeBlock {
    Text { text: String },
    Image { source: InvokeSource },
    Document { source: InvokeSource },
}

#[derive(Debug, Serialize)]
pub struct InvokeSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: String,
    pub data: String,
}

impl InvokeSource {
    fn base64(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            kind: "base64",
            media_type: media_type.into(),
            data: encode(bytes),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<InvokeResponseBlock>,
    usage: InvokeUsage,
}

#[derive(Debug, Deserialize)]
struct InvokeResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvokeUsage {
    input_tokens: u64,
    output_tokens: u64,
}

fn invoke_block(part: &ContentPart) -> Result<InvokeBlock, ProviderError> {
    match part {
        ContentPart::Text(text) => Ok(InvokeBlock::Text { text: text.clone() }),
        ContentPart::Document { format, bytes, .. } => {
            if !INVOKE_DOCUMENT_FORMATS.contains(&format.as_str()) {
                return Err(ProviderError::Unsupported {
                    kind: "document",
                    format: format.clone(),
                    path: "single-shot",
                });
            }
            Ok(InvokeBlock::Document {
                source: InvokeSource::base64("application/pdf", bytes),
            })
        }
        ContentPart::Image { format, bytes } => {
            if !INVOKE_IMAGE_FORMATS.contains(&format.as_str()) {
                return Err(ProviderError::Unsupported {
                    kind: "image",
                    format: format.clone(),
                    path: "single-shot",
                });
            }
            Ok(InvokeBlock::Image {
                source: InvokeSource::base64(format!("image/{format}"), bytes),
            })
        }
    }
}

/// Builds a single-shot body. `turns` must already be free of system messages.
pub fn invoke_body(
    system: Option<&str>,
    turns: &[&Message],
    settings: &GenerationSettings,
) -> Result<InvokeRequest, ProviderError> {
    let mut messages = Vec::with_capacity(turns.len());
    for message in turns {
        let content = if message.content.iter().any(ContentPart::is_attachment) {
            InvokeContent::Blocks(
                message
                    .content
                    .iter()
                    .map(invoke_block)
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            InvokeContent::Text(message.joined_text())
        };
        messages.push(InvokeMessage {
            role: message.role.as_str(),
            content,
        });
    }
    Ok(InvokeRequest {
        anthropic_version: SINGLE_SHOT_VERSION,
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
        system: system.map(str::to_string),
        messages,
    })
}

/// Normalises a single-shot response body: the first content block holds the
/// answer, usage comes from the snake_case counters.
pub fn normalize_invoke(
    body: &[u8],
    model_id: &str,
    with_pages: bool,
) -> Result<InferenceResponse, ProviderError> {
    let parsed: InvokeResponse = serde_json::from_slice(body)?;
    let content = parsed
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .ok_or_else(|| ProviderError::Decode {
            message: "single-shot response carried no text in its first content block"
                .to_string(),
        })?;
    Ok(InferenceResponse {
        pages: if with_pages { split_pages(&content) } else { None },
        content,
        input_tokens: parsed.usage.input_tokens,
        output_tokens: parsed.usage.output_tokens,
        model_used: parsed.model.unwrap_or_else(|| model_id.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "Message")]
    message: Option<String>,
    #[serde(default)]
    error: Option<NestedError>,
}

#[derive(Debug, Deserialize)]
struct NestedError {
    message: String,
}

/// Best-effort human message from an error body; falls back to the raw text.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorBody {
            error: Some(nested),
            ..
        }) => nested.message,
        _ => body.trim().to_string(),
    }
}
