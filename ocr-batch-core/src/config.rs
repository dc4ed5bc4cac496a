use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REGION: &str = "us-east-1";

/// Everything a batch run needs apart from secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    /// Abort before dispatching anything when discovery finds no files.
    #[serde(default)]
    pub require_tasks: bool,
    #[serde(default)]
    pub output: OutputConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub dispatch: DispatchPolicy,
}

impl RunConfig {
    pub fn trace_loaded(&self) {
        info!(
            input_dir = %self.input_dir.display(),
            json_dir = %self.output.json_dir.display(),
            markdown_dir = %self.output.markdown_dir.display(),
            model_id = %self.provider.model_id,
            max_concurrent = self.dispatch.max_concurrent,
            max_retries = self.dispatch.max_retries,
            "Loaded RunConfig"
        );
        debug!(?self, "RunConfig loaded (full debug)");
    }
}

/// Where the two artifacts of each file land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub json_dir: PathBuf,
    pub markdown_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_dir: PathBuf::from("ocr-output/json"),
            markdown_dir: PathBuf::from("ocr-output/markdown"),
        }
    }
}

/// Which wire format the adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Structured system blocks, content-block messages, camelCase usage.
    MultiTurn,
    /// Flat system string, versioned body, snake_case usage.
    SingleShot,
}

impl ProviderKind {
    /// Model ids of the multi-turn family contain this marker.
    pub const MULTI_TURN_MARKER: &'static str = "nova";

    pub fn detect(model_id: &str) -> Self {
        if model_id
            .to_ascii_lowercase()
            .contains(Self::MULTI_TURN_MARKER)
        {
            ProviderKind::MultiTurn
        } else {
            ProviderKind::SingleShot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::MultiTurn => "multi_turn",
            ProviderKind::SingleShot => "single_shot",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model_id: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Explicit wire format; detected from `model_id` when absent.
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    /// Overrides the regional endpoint, e.g. for a proxy.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Only sent on the multi-turn path.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            region: None,
            kind: None,
            endpoint: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn resolved_kind(&self) -> ProviderKind {
        self.kind.unwrap_or_else(|| ProviderKind::detect(&self.model_id))
    }

    pub fn resolved_region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn base_url(&self) -> String {
        match self.endpoint.as_deref() {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!(
                "https://bedrock-runtime.{}.amazonaws.com",
                self.resolved_region()
            ),
        }
    }
}

/// Retry and concurrency limits for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPolicy {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Total attempt budget, first attempt included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_top_p() -> f32 {
    DEFAULT_TOP_P
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}
