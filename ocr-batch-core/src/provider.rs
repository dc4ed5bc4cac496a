//! HTTP provider adapter.
//!
//! [`BedrockAdapter`] picks its wire format once, at construction, and hides
//! it behind [`InferenceProvider`]: callers only ever see an
//! [`InferenceResponse`].

use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{ProviderConfig, ProviderKind};
use crate::contract::{InferenceProvider, InferenceRequest, InferenceResponse, ProviderError};
use crate::wire::{self, GenerationSettings};

pub struct BedrockAdapter {
    client: Client,
    kind: ProviderKind,
    base_url: Url,
    settings: GenerationSettings,
}

impl BedrockAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Permanent {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Self::with_client(client, config)
    }

    /// Uses a caller-supplied client, e.g. one with custom TLS or proxy settings.
    pub fn with_client(client: Client, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let base_url = Url::parse(&config.base_url()).map_err(|e| ProviderError::Permanent {
            status: None,
            message: format!("invalid provider endpoint '{}': {e}", config.base_url()),
        })?;
        let kind = config.resolved_kind();
        info!(
            model_id = %config.model_id,
            kind = kind.as_str(),
            endpoint = %base_url,
            "Initialised provider adapter"
        );
        Ok(Self {
            client,
            kind,
            base_url,
            settings: GenerationSettings {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                top_p: config.top_p,
            },
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// `{base}/model/{model_id}/converse` or `{base}/model/{model_id}/invoke`.
    pub fn endpoint(&self, model_id: &str) -> Result<Url, ProviderError> {
        let action = match self.kind {
            ProviderKind::MultiTurn => "converse",
            ProviderKind::SingleShot => "invoke",
        };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Permanent {
                status: None,
                message: format!("provider endpoint '{}' cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(["model", model_id, action]);
        Ok(url)
    }

    /// Serialises the request in this adapter's wire format.
    pub fn build_body(
        &self,
        request: &InferenceRequest,
    ) -> Result<serde_json::Value, ProviderError> {
        let (system, turns) = request.split_system();
        let system = system.as_deref();
        let body = match self.kind {
            ProviderKind::MultiTurn => {
                serde_json::to_value(wire::converse_body(system, &turns, &self.settings)?)?
            }
            ProviderKind::SingleShot => {
                serde_json::to_value(wire::invoke_body(system, &turns, &self.settings)?)?
            }
        };
        Ok(body)
    }

    /// Normalises a success body in this adapter's wire format.
    pub fn decode(
        &self,
        body: &[u8],
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ProviderError> {
        let model_id = &request.model_id;
        let with_pages = request.has_attachment();
        match self.kind {
            ProviderKind::MultiTurn => wire::normalize_converse(body, model_id, with_pages),
            ProviderKind::SingleShot => wire::normalize_invoke(body, model_id, with_pages),
        }
    }
}

#[async_trait]
impl InferenceProvider for BedrockAdapter {
    async fn invoke(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ProviderError> {
        let body = self.build_body(request)?;
        let url = self.endpoint(&request.model_id)?;
        debug!(url = %url, kind = self.kind.as_str(), "Sending provider request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&request.credentials.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = ProviderError::from_status(status.as_u16(), wire::error_message(&text));
            error!(status = status.as_u16(), error = %err, "Provider returned an error status");
            return Err(err);
        }

        let bytes = response.bytes().await?;
        let normalised = self.decode(&bytes, request)?;
        debug!(
            input_tokens = normalised.input_tokens,
            output_tokens = normalised.output_tokens,
            pages = normalised.pages.as_ref().map(Vec::len).unwrap_or(0),
            "Provider response normalised"
        );
        Ok(normalised)
    }
}
