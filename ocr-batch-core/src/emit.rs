//! Writes the two artifacts for each successful file: a JSON record and a
//! Markdown report.
//!
//! Both writes are always attempted. A failed write is reported in the
//! [`EmitReport`] and never touches the other artifact.

use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::OutputConfig;
use crate::contract::{FileTask, InferenceResponse, Page};

pub const STRUCTURED_SUFFIX: &str = "_ocr.json";
pub const FORMATTED_SUFFIX: &str = "_ocr.md";

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise structured artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-artifact write results for one file.
#[derive(Debug)]
pub struct EmitReport {
    pub structured: Result<PathBuf, EmitError>,
    pub formatted: Result<PathBuf, EmitError>,
}

impl EmitReport {
    pub fn is_complete(&self) -> bool {
        self.structured.is_ok() && self.formatted.is_ok()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredArtifact {
    pub file_name: String,
    pub pages: Vec<StructuredPage>,
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Milliseconds.
    pub completion_time: u64,
    pub model_used: String,
    pub summary: ArtifactSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPage {
    pub page: u32,
    pub content: String,
    pub content_length: usize,
}

#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    pub ocr: PageCounts,
}

/// Pages with and without extracted text.
#[derive(Debug, Serialize)]
pub struct PageCounts {
    pub successful: usize,
    pub failed: usize,
}

/// Pages in ascending order; a response without pages is one page holding the full content.
fn pages_or_whole(response: &InferenceResponse) -> Vec<Page> {
    match response.ordered_pages() {
        Some(pages) if !pages.is_empty() => pages.into_iter().cloned().collect(),
        _ => vec![Page::new(1, response.content.clone())],
    }
}

pub fn structured_artifact(
    task: &FileTask,
    response: &InferenceResponse,
    elapsed_ms: u64,
) -> StructuredArtifact {
    let pages = pages_or_whole(response);
    let successful = pages.iter().filter(|p| !p.content.trim().is_empty()).count();
    StructuredArtifact {
        file_name: task.file_name(),
        summary: ArtifactSummary {
            ocr: PageCounts {
                successful,
                failed: pages.len() - successful,
            },
        },
        pages: pages
            .into_iter()
            .map(|p| StructuredPage {
                page: p.page_number,
                content_length: p.length,
                content: p.content,
            })
            .collect(),
        content: response.content.clone(),
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        completion_time: elapsed_ms,
        model_used: response.model_used.clone(),
    }
}

pub fn render_markdown(task: &FileTask, response: &InferenceResponse, elapsed_ms: u64) -> String {
    let ordered = response.ordered_pages().filter(|pages| !pages.is_empty());
    let page_count = ordered.as_ref().map(Vec::len).unwrap_or(1);

    let mut md = String::new();
    let _ = writeln!(md, "# OCR Results for {}\n", task.file_name());
    let _ = writeln!(md, "**Processing Time:** {:.2} seconds", elapsed_ms as f64 / 1000.0);
    let _ = writeln!(md, "**Pages:** {page_count}");
    let _ = writeln!(md, "**Input Tokens:** {}", response.input_tokens);
    let _ = writeln!(md, "**Output Tokens:** {}", response.output_tokens);
    let _ = writeln!(md, "**Model:** {}\n", response.model_used);
    let _ = writeln!(md, "## Extracted Content\n");

    match ordered {
        Some(pages) => {
            for page in pages {
                let _ = writeln!(md, "### Page {}\n", page.page_number);
                let _ = writeln!(md, "{}\n", page.content.trim_end());
                let _ = writeln!(md, "---\n");
            }
        }
        None => {
            let _ = writeln!(md, "{}\n", response.content.trim_end());
            let _ = writeln!(md, "---\n");
        }
    }
    md
}

/// Writes through a temp file in the destination directory, then renames over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EmitError> {
    let write_err = |source| EmitError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct OutputEmitter {
    json_dir: PathBuf,
    markdown_dir: PathBuf,
}

impl OutputEmitter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            json_dir: config.json_dir.clone(),
            markdown_dir: config.markdown_dir.clone(),
        }
    }

    /// Creates both output directories. Called once before any task is dispatched.
    pub fn prepare(&self) -> Result<(), EmitError> {
        for dir in [&self.json_dir, &self.markdown_dir] {
            std::fs::create_dir_all(dir).map_err(|source| EmitError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn structured_path(&self, task: &FileTask) -> PathBuf {
        self.json_dir.join(format!("{}{}", task.base_name, STRUCTURED_SUFFIX))
    }

    pub fn formatted_path(&self, task: &FileTask) -> PathBuf {
        self.markdown_dir.join(format!("{}{}", task.base_name, FORMATTED_SUFFIX))
    }

    pub fn emit(
        &self,
        task: &FileTask,
        response: &InferenceResponse,
        elapsed_ms: u64,
    ) -> EmitReport {
        let file = task.file_name();
        let structured_path = self.structured_path(task);
        let structured = serde_json::to_vec_pretty(&structured_artifact(task, response, elapsed_ms))
            .map_err(EmitError::from)
            .and_then(|bytes| write_atomic(&structured_path, &bytes))
            .map(|_| structured_path);
        match &structured {
            Ok(path) => info!(file = %file, path = %path.display(), "Wrote structured artifact"),
            Err(e) => error!(file = %file, error = %e, "Failed to write structured artifact"),
        }

        let formatted_path = self.formatted_path(task);
        let markdown = render_markdown(task, response, elapsed_ms);
        let formatted = write_atomic(&formatted_path, markdown.as_bytes()).map(|_| formatted_path);
        match &formatted {
            Ok(path) => info!(file = %file, path = %path.display(), "Wrote formatted artifact"),
            Err(e) => error!(file = %file, error = %e, "Failed to write formatted artifact"),
        }

        EmitReport {
            structured,
            formatted,
        }
    }
}
