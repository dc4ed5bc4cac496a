/// `load_config` module: loads the static YAML run configuration and injects
/// secrets from the environment.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file straight into the core [`RunConfig`]
///   (serde defaults fill every optional knob)
/// - Fill the provider region from `AWS_REGION` when the file leaves it out
/// - Read the API key from `AWS_BEARER_TOKEN_BEDROCK`; it never lives in the file
///
/// # Errors
/// All errors are `anyhow::Error` with the offending path or variable named,
/// surfaced at the CLI boundary as a non-zero exit before any file is touched.
use anyhow::Result;
use ocr_batch_core::config::RunConfig;
use ocr_batch_core::contract::Credentials;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const API_KEY_VAR: &str = "AWS_BEARER_TOKEN_BEDROCK";
pub const REGION_VAR: &str = "AWS_REGION";

/// Run configuration plus the secrets injected from the environment.
#[derive(Debug)]
pub struct CliConfig {
    pub run: RunConfig,
    pub credentials: Credentials,
}

/// Loads a static YAML config file (no secrets). The region falls back to `AWS_REGION`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: RunConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.provider.model_id.trim().is_empty() {
        error!(config_path = ?path_ref, "provider.model_id is empty");
        anyhow::bail!("provider.model_id must not be empty");
    }

    if config.provider.region.is_none() {
        if let Ok(region) = std::env::var(REGION_VAR) {
            if !region.trim().is_empty() {
                info!(region = %region, "Provider region taken from {REGION_VAR}");
                config.provider.region = Some(region);
            }
        }
    }

    Ok(config)
}

/// Reads the provider API key from the environment.
pub fn load_credentials() -> Result<Credentials> {
    match std::env::var(API_KEY_VAR) {
        Ok(key) if !key.trim().is_empty() => {
            info!("{API_KEY_VAR} found in env");
            Ok(Credentials::new(key))
        }
        Ok(_) => {
            error!("{API_KEY_VAR} is set but empty");
            Err(anyhow::anyhow!("{API_KEY_VAR} environment variable is empty"))
        }
        Err(e) => {
            error!(error = ?e, "{API_KEY_VAR} environment variable not set");
            Err(anyhow::anyhow!(
                "{API_KEY_VAR} environment variable not set: {e}"
            ))
        }
    }
}

/// Loads the YAML file and the environment secrets together.
pub fn load_cli_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let run = load_config(path)?;
    let credentials = load_credentials()?;
    info!(
        model_id = %run.provider.model_id,
        region = run.provider.resolved_region(),
        "Config loaded and merged successfully"
    );
    Ok(CliConfig { run, credentials })
}
