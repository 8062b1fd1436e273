//! # Configuration Module
//!
//! Defines structures and logic for loading and managing configuration
//! for the example runner. Configuration can be loaded from a JSON file,
//! environment variables, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "traced_llm_config.json";
pub const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";
pub const DEFAULT_AWS_REGION: &str = "us-west-2";

/// Model name plus the flat sampling options sent with one request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelParameters {
    /// Name of the model to be used (e.g., "gpt-3.5-turbo", "claude-3-opus-20240229").
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl ModelParameters {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// Credentials and endpoint for one provider.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Bedrock is addressed per region; the base URL is derived from it unless overridden.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BedrockSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl BedrockSettings {
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_AWS_REGION)
    }

    pub fn endpoint(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", self.region()))
    }
}

/// Settings for the Langfuse collector.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LangfuseSettings {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    /// Number of buffered events that triggers a send.
    #[serde(default = "default_flush_at")]
    pub flush_at: usize,
    /// Maximum time an event waits in the buffer.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_flush_at() -> usize {
    15
}
fn default_flush_interval_ms() -> u64 {
    500
}
fn default_enabled() -> bool {
    true
}

impl Default for LangfuseSettings {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: None,
            host: None,
            flush_at: default_flush_at(),
            flush_interval_ms: default_flush_interval_ms(),
            enabled: default_enabled(),
        }
    }
}

impl LangfuseSettings {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_LANGFUSE_HOST)
    }

    /// Both keys present and tracing not switched off.
    pub fn is_complete(&self) -> bool {
        self.enabled && self.public_key.is_some() && self.secret_key.is_some()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub langfuse: LangfuseSettings,
    #[serde(default)]
    pub openai: ProviderSettings,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub bedrock: BedrockSettings,
}

impl Config {
    /// Loads the runner configuration.
    ///
    /// Priority for loading values:
    /// 1. Command-line arguments (highest).
    /// 2. Values from the JSON configuration file.
    /// 3. Environment variables (`.env` is loaded by `main` before this runs).
    /// 4. Default values coded in the application (lowest).
    pub fn load(
        config_file_path: &str,
        cli_langfuse_host: Option<String>,
        cli_aws_region: Option<String>,
    ) -> Result<Self> {
        let path = Path::new(config_file_path);
        let mut config: Config = if path.exists() {
            let config_str = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file at: {}", config_file_path))?;
            serde_json::from_str(&config_str)
                .with_context(|| format!("Failed to parse config file: {}", config_file_path))?
        } else {
            debug!(
                "Config file not found at: {}. Using environment variables and defaults.",
                config_file_path
            );
            Config::default()
        };

        fill_from_env(&mut config.langfuse.public_key, "LANGFUSE_PUBLIC_KEY");
        fill_from_env(&mut config.langfuse.secret_key, "LANGFUSE_SECRET_KEY");
        fill_from_env(&mut config.langfuse.host, "LANGFUSE_HOST");
        fill_from_env(&mut config.openai.api_key, "OPENAI_API_KEY");
        fill_from_env(&mut config.openai.base_url, "OPENAI_BASE_URL");
        fill_from_env(&mut config.anthropic.api_key, "ANTHROPIC_API_KEY");
        fill_from_env(&mut config.bedrock.api_key, "AWS_BEARER_TOKEN_BEDROCK");
        fill_from_env(&mut config.bedrock.region, "AWS_REGION");

        if let Some(host) = cli_langfuse_host {
            config.langfuse.host = Some(host);
        }
        if let Some(region) = cli_aws_region {
            config.bedrock.region = Some(region);
        }

        if config.langfuse.enabled && !config.langfuse.is_complete() {
            warn!("LANGFUSE_PUBLIC_KEY / LANGFUSE_SECRET_KEY not set; traces will not be sent.");
        }

        Ok(config)
    }

    /// The resolved configuration as JSON, with every secret masked.
    pub fn masked(&self) -> serde_json::Value {
        let mut shown = self.clone();
        for secret in [
            &mut shown.langfuse.public_key,
            &mut shown.langfuse.secret_key,
            &mut shown.openai.api_key,
            &mut shown.anthropic.api_key,
            &mut shown.bedrock.api_key,
        ] {
            if let Some(value) = secret.as_mut() {
                *value = mask_secret(value);
            }
        }
        shown.langfuse.host = Some(self.langfuse.host().to_string());
        shown.bedrock.region = Some(self.bedrock.region().to_string());
        serde_json::to_value(shown).unwrap_or_default()
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.is_none() {
        *slot = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
    }
}

/// Keeps a short prefix so keys stay recognizable in printed output.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    if secret.chars().count() <= 6 {
        "***".to_string()
    } else {
        format!("{}***", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // Tests in this module read and write process-wide env vars.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_VARS: [&str; 8] = [
        "LANGFUSE_PUBLIC_KEY",
        "LANGFUSE_SECRET_KEY",
        "LANGFUSE_HOST",
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "ANTHROPIC_API_KEY",
        "AWS_BEARER_TOKEN_BEDROCK",
        "AWS_REGION",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_load_config_defaults_no_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let config = Config::load("non_existent_config.json", None, None).unwrap();
        assert_eq!(config.langfuse.host(), DEFAULT_LANGFUSE_HOST);
        assert_eq!(config.langfuse.flush_at, 15);
        assert!(!config.langfuse.is_complete());
        assert_eq!(config.bedrock.region(), "us-west-2");
        assert_eq!(
            config.bedrock.endpoint(),
            "https://bedrock-runtime.us-west-2.amazonaws.com"
        );
    }

    #[test]
    fn test_load_from_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"
            {
                "langfuse": {
                    "public_key": "pk-lf-file",
                    "secret_key": "sk-lf-file",
                    "host": "http://localhost:3000",
                    "flush_at": 3
                },
                "openai": { "api_key": "sk-openai-from-file" },
                "bedrock": { "region": "eu-central-1" }
            }
            "#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap(), None, None).unwrap();
        assert!(config.langfuse.is_complete());
        assert_eq!(config.langfuse.host(), "http://localhost:3000");
        assert_eq!(config.langfuse.flush_at, 3);
        assert_eq!(config.langfuse.flush_interval_ms, 500);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-openai-from-file"));
        assert_eq!(config.bedrock.region(), "eu-central-1");
    }

    #[test]
    fn test_file_takes_precedence_over_env_and_cli_over_both() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "langfuse": { "host": "http://file-host" }, "openai": { "api_key": "sk-file" } }"#,
        )
        .unwrap();
        env::set_var("OPENAI_API_KEY", "sk-env");
        env::set_var("ANTHROPIC_API_KEY", "sk-ant-env");
        env::set_var("AWS_REGION", "ap-south-1");

        let config = Config::load(
            path.to_str().unwrap(),
            Some("http://cli-host".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-file"));
        assert_eq!(config.anthropic.api_key.as_deref(), Some("sk-ant-env"));
        assert_eq!(config.langfuse.host(), "http://cli-host");
        assert_eq!(config.bedrock.region(), "ap-south-1");

        let config = Config::load(path.to_str().unwrap(), None, Some("us-east-1".to_string()))
            .unwrap();
        assert_eq!(config.bedrock.region(), "us-east-1");
        clear_env();
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Config::load(path.to_str().unwrap(), None, None).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut config = Config::default();
        config.langfuse.secret_key = Some("sk-lf-1234567890".to_string());
        config.openai.api_key = Some("abc".to_string());
        let shown = config.masked();
        assert_eq!(shown["langfuse"]["secret_key"], "sk-lf-***");
        assert_eq!(shown["openai"]["api_key"], "***");
        assert_eq!(shown["langfuse"]["host"], DEFAULT_LANGFUSE_HOST);
    }

    #[test]
    fn test_model_parameters_builder() {
        let params = ModelParameters::new("gpt-4").max_tokens(10).temperature(0.1);
        assert_eq!(params.model, "gpt-4");
        assert_eq!(params.max_tokens, Some(10));
        assert_eq!(params.temperature, Some(0.1));
        assert_eq!(params.top_p, None);
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("top_p").is_none());
    }
}
