//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/kbo.sqlite"
//!
//! [embedding]
//! provider = "openai"          # disabled | openai | ollama
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [retrieval]
//! top_k = 5
//! override_threshold = 0.85    # required
//!
//! [retrieval.chatbot_thresholds]
//! "6f1c0a3e-0000-4000-8000-000000000001" = 0.92
//!
//! [server]
//! bind = "127.0.0.1:7400"
//! request_timeout_secs = 30
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use retrieval_core::{ChatbotId, RetrievalParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request limit on the HTTP client. Unset means no limit; the
    /// caller's deadline governs.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    0
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    pub override_threshold: f64,
    /// Per-chatbot thresholds keyed by chatbot UUID.
    #[serde(default)]
    pub chatbot_thresholds: HashMap<ChatbotId, f64>,
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7400".to_string()
}

impl Config {
    /// Vector dimensionality used by every store and query.
    ///
    /// With embeddings disabled nothing can be embedded, but stores still
    /// need a width for imported chunks and raw query vectors, so `dims`
    /// is honoured when present.
    pub fn dims(&self) -> Result<usize> {
        self.embedding
            .dims
            .context("embedding.dims must be set to store or query vectors")
    }

    pub fn retrieval_params(&self) -> Result<RetrievalParams> {
        let mut params = RetrievalParams::new(
            self.retrieval.top_k,
            self.retrieval.override_threshold,
            self.dims()?,
        );
        params.chatbot_thresholds = self.retrieval.chatbot_thresholds.clone();
        Ok(params)
    }
}

fn check_threshold(key: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{} must be in [0.0, 1.0], got {}", key, value);
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    check_threshold("retrieval.override_threshold", config.retrieval.override_threshold)?;
    for (chatbot, t) in &config.retrieval.chatbot_thresholds {
        check_threshold(&format!("retrieval.chatbot_thresholds.{}", chatbot), *t)?;
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/kbo.sqlite"

[retrieval]
override_threshold = 0.85
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.server.bind, "127.0.0.1:7400");
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.embedding.max_retries, 0);
        assert_eq!(cfg.embedding.timeout_secs, None);
    }

    #[test]
    fn test_embedding_timeout_is_opt_in() {
        let cfg = parse_config(&format!("{}\n[embedding]\ntimeout_secs = 12\n", MINIMAL)).unwrap();
        assert_eq!(cfg.embedding.timeout_secs, Some(12));
    }

    #[test]
    fn test_threshold_is_required() {
        let err = parse_config("[db]\npath = \"x\"\n[retrieval]\ntop_k = 3\n").unwrap_err();
        assert!(format!("{:#}", err).contains("override_threshold"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let toml = MINIMAL.replace("0.85", "1.5");
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("retrieval.override_threshold"));
    }

    #[test]
    fn test_chatbot_thresholds_parsed_and_validated() {
        let id = ChatbotId::new();
        let ok = format!(
            "{}\n[embedding]\ndims = 2\n\n[retrieval.chatbot_thresholds]\n\"{}\" = 0.9\n",
            MINIMAL, id
        );
        let params = parse_config(&ok).unwrap().retrieval_params().unwrap();
        assert_eq!(params.threshold_for(id), 0.9);
        assert_eq!(params.threshold_for(ChatbotId::new()), 0.85);

        let bad = format!("{}\n[retrieval.chatbot_thresholds]\n\"{}\" = -0.1\n", MINIMAL, id);
        assert!(parse_config(&bad).is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let toml = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = format!(
            "{}\n[embedding]\nprovider = \"local\"\nmodel = \"m\"\ndims = 4\n",
            MINIMAL
        );
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
