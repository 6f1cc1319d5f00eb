//! `hardloop.toml` configuration with environment overrides.
//!
//! ```toml
//! [generator]
//! base_url = "https://dashscope.aliyuncs.com/compatible-mode/v1"
//! model = "qwen-plus"
//! api_key_env = "DASHSCOPE_API_KEY"
//!
//! [sandbox]
//! image = "foundry-box"
//! workspace_dir = "workspace"
//! artifact_name = "Target.sol"
//!
//! [pipeline]
//! preset = "adversarial"
//! max_rounds = 4
//! ```
//!
//! Every section and field is optional. `HARDLOOP_LLM_BASE_URL`,
//! `HARDLOOP_LLM_MODEL`, `HARDLOOP_LLM_API_KEY` and `HARDLOOP_DOCKER_IMAGE`
//! override the file.

use std::path::{Path, PathBuf};

use hardloop_core::PipelineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolsError};

pub const ENV_BASE_URL: &str = "HARDLOOP_LLM_BASE_URL";
pub const ENV_MODEL: &str = "HARDLOOP_LLM_MODEL";
pub const ENV_API_KEY: &str = "HARDLOOP_LLM_API_KEY";
pub const ENV_DOCKER_IMAGE: &str = "HARDLOOP_DOCKER_IMAGE";

/// OpenAI-compatible chat completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Explicit key; takes precedence over `api_key_env`. Never written out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            model: "qwen-plus".to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            api_key: None,
            temperature: 0.1,
            timeout_secs: 120,
        }
    }
}

impl GeneratorConfig {
    /// Explicit key first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ToolsError::MissingApiKey(self.api_key_env.clone()))
    }

    /// Set authentication key
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }
}

/// Where and how verifier subprocesses run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wrap commands in `docker run`; otherwise run them on the host.
    pub use_docker: bool,
    pub image: String,
    /// Host directory materialized before every verifier call.
    pub workspace_dir: PathBuf,
    /// Mount point of the workspace inside the container.
    pub mount_point: String,
    /// Per-command timeout; 0 disables it.
    pub timeout_secs: u64,
    pub solc_version: String,
    /// File name the artifact is written as; fuzz harnesses instantiate the
    /// contract named after its stem.
    pub artifact_name: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            use_docker: true,
            image: "foundry-box".to_string(),
            workspace_dir: PathBuf::from("workspace"),
            mount_point: "/app".to_string(),
            timeout_secs: 300,
            solc_version: "0.8.20".to_string(),
            artifact_name: "Target.sol".to_string(),
        }
    }
}

/// Which pipeline to run and its run-level caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub preset: String,
    pub max_rounds: Option<u32>,
    pub max_steps: Option<u32>,
    pub retry_ceiling: Option<u32>,
    pub max_diagnostic_chars: Option<usize>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            preset: "adversarial".to_string(),
            max_rounds: None,
            max_steps: None,
            retry_ceiling: None,
            max_diagnostic_chars: None,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardloopConfig {
    pub generator: GeneratorConfig,
    pub sandbox: SandboxConfig,
    pub pipeline: PipelineSection,
}

impl HardloopConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key/value source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.generator.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.generator.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.generator.api_key = Some(key);
        }
        if let Some(image) = lookup(ENV_DOCKER_IMAGE) {
            self.sandbox.image = image;
        }
    }

    /// Resolve the preset and apply the configured caps, then validate.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let section = &self.pipeline;
        let mut config = PipelineConfig::preset(&section.preset)
            .ok_or_else(|| ToolsError::UnknownPreset(section.preset.clone()))?;

        if let Some(max_rounds) = section.max_rounds {
            config = config.with_max_rounds(max_rounds);
        }
        if let Some(max_steps) = section.max_steps {
            config = config.with_max_steps(max_steps);
        }
        if let Some(ceiling) = section.retry_ceiling {
            config = config.with_default_retry_ceiling(ceiling);
        }
        if let Some(chars) = section.max_diagnostic_chars {
            if chars == 0 {
                return Err(ToolsError::InvalidConfig(
                    "max_diagnostic_chars must be positive".to_string(),
                ));
            }
            config.max_diagnostic_chars = chars;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = HardloopConfig::from_toml_str("").expect("parse");
        assert_eq!(config, HardloopConfig::default());
        assert_eq!(config.generator.model, "qwen-plus");
        assert_eq!(config.sandbox.image, "foundry-box");
        assert_eq!(config.pipeline.preset, "adversarial");
    }

    #[test]
    fn test_partial_sections() {
        let config = HardloopConfig::from_toml_str(
            r#"
            [generator]
            model = "qwen-max"
            temperature = 0.0

            [sandbox]
            use_docker = false
            timeout_secs = 30

            [pipeline]
            preset = "scan_and_fuzz"
            max_rounds = 2
            "#,
        )
        .expect("parse");

        assert_eq!(config.generator.model, "qwen-max");
        assert_eq!(config.generator.api_key_env, "DASHSCOPE_API_KEY");
        assert!(!config.sandbox.use_docker);
        assert_eq!(config.sandbox.mount_point, "/app");

        let pipeline = config.pipeline_config().expect("pipeline");
        assert_eq!(pipeline.max_rounds, 2);
        assert_eq!(pipeline.entry.as_str(), "static");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HardloopConfig::default();
        config.apply_overrides(|key| match key {
            ENV_MODEL => Some("local-model".to_string()),
            ENV_API_KEY => Some("sk-test".to_string()),
            ENV_DOCKER_IMAGE => Some("ghcr.io/foundry-rs/foundry".to_string()),
            _ => None,
        });

        assert_eq!(config.generator.model, "local-model");
        assert_eq!(config.generator.resolve_api_key().expect("key"), "sk-test");
        assert_eq!(config.sandbox.image, "ghcr.io/foundry-rs/foundry");
        assert_eq!(
            config.generator.base_url,
            GeneratorConfig::default().base_url
        );
    }

    #[test]
    fn test_missing_api_key() {
        let generator = GeneratorConfig {
            api_key_env: "HARDLOOP_TEST_UNSET_KEY_VARIABLE".to_string(),
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            generator.resolve_api_key(),
            Err(ToolsError::MissingApiKey(var)) if var == "HARDLOOP_TEST_UNSET_KEY_VARIABLE"
        ));
        assert!(generator.with_api_key("sk-1").resolve_api_key().is_ok());
    }

    #[test]
    fn test_unknown_preset() {
        let mut config = HardloopConfig::default();
        config.pipeline.preset = "does-not-exist".to_string();
        assert!(matches!(
            config.pipeline_config(),
            Err(ToolsError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = HardloopConfig {
            generator: GeneratorConfig::default().with_api_key("sk-secret"),
            ..HardloopConfig::default()
        };
        let text = toml::to_string(&config).expect("serialize");
        assert!(!text.contains("sk-secret"));
    }
}
