//! Prompt text and request construction for OCR and chat calls.

use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

use crate::contract::{
    ContentPart, Credentials, FileTask, InferenceRequest, Message, ProviderError, Role,
};

pub const OCR_SYSTEM_PROMPT: &str = "You are an OCR engine. \
Transcribe every piece of text in the attached document exactly as it appears, preserving \
reading order, headings, lists and tables (render tables as Markdown). Do not summarise, \
translate or add commentary. Wrap the text of each page in <page number=\"N\">...</page>, \
numbering pages from 1. A single image counts as page 1.";

pub const OCR_INSTRUCTION: &str = "Extract all text from this file, one <page> section per page.";

/// Image formats neither wire format carries; they are re-encoded as PNG.
const TRANSCODED_IMAGE_FORMATS: &[&str] = &["tiff", "bmp"];

fn transcode_to_png(format: &str, bytes: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let conversion_err = |e: image::ImageError| ProviderError::Conversion {
        format: format.to_string(),
        message: e.to_string(),
    };
    let img = image::load_from_memory(bytes).map_err(conversion_err)?;

    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(conversion_err)?;
    debug!(
        format,
        width = img.width(),
        height = img.height(),
        "Transcoded image to png"
    );
    Ok(buffer)
}

/// Maps a task's extension onto the attachment part the provider expects.
pub fn attachment_for(task: &FileTask, bytes: Vec<u8>) -> Result<ContentPart, ProviderError> {
    let part = match task.extension.as_str() {
        "pdf" | "doc" | "docx" => ContentPart::Document {
            format: task.extension.clone(),
            name: task.base_name.clone(),
            bytes,
        },
        "jpg" | "jpeg" => ContentPart::Image {
            format: "jpeg".to_string(),
            bytes,
        },
        other if TRANSCODED_IMAGE_FORMATS.contains(&other) => ContentPart::Image {
            format: "png".to_string(),
            bytes: transcode_to_png(other, &bytes)?,
        },
        other => ContentPart::Image {
            format: other.to_string(),
            bytes,
        },
    };
    Ok(part)
}

/// Reads the task's file and builds its OCR request.
///
/// Called once per attempt, so the bytes are only held while the attempt runs.
pub async fn ocr_request(
    task: &FileTask,
    model_id: &str,
    credentials: &Credentials,
) -> Result<InferenceRequest, ProviderError> {
    let bytes = tokio::fs::read(&task.path).await?;
    let owned = task.clone();
    let attachment = tokio::task::spawn_blocking(move || attachment_for(&owned, bytes))
        .await
        .map_err(|e| ProviderError::Conversion {
            format: task.extension.clone(),
            message: e.to_string(),
        })??;

    Ok(InferenceRequest {
        model_id: model_id.to_string(),
        credentials: credentials.clone(),
        system_prompt: Some(OCR_SYSTEM_PROMPT.to_string()),
        messages: vec![Message {
            role: Role::User,
            content: vec![attachment, ContentPart::Text(OCR_INSTRUCTION.to_string())],
        }],
    })
}

/// A single-turn chat request with an optional system prompt.
pub fn chat_request(
    model_id: &str,
    credentials: &Credentials,
    system_prompt: Option<&str>,
    message: &str,
) -> InferenceRequest {
    InferenceRequest {
        model_id: model_id.to_string(),
        credentials: credentials.clone(),
        system_prompt: system_prompt.map(str::to_string),
        messages: vec![Message::text(Role::User, message)],
    }
}
