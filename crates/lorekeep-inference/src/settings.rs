//! Provider configuration resolved from the environment.
//!
//! Embedding is mandatory: the index pipeline and the vector leg of retrieval
//! cannot run without it. Rerank, OCR, and vision are optional capabilities;
//! callers that need a missing one get `Error::CapabilityDisabled` from the
//! accessors here, and the retrieval engine degrades gracefully instead.

use lorekeep_core::{Error, Result};

/// Settings for the embedding endpoint (OpenAI-compatible).
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimension: usize,
}

/// Settings for the rerank endpoint.
#[derive(Debug, Clone)]
pub struct RerankSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

/// Resolved AI provider settings for one deployment.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub embed: EmbedSettings,
    pub rerank: Option<RerankSettings>,
    pub ocr_base_url: Option<String>,
    pub vision_base_url: Option<String>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl AiSettings {
    /// Resolve settings from environment variables.
    ///
    /// Required: `EMBED_BASE_URL`, `EMBED_MODEL`, `EMBED_DIMENSION`.
    /// Optional: `EMBED_API_KEY`, `RERANK_BASE_URL` + `RERANK_MODEL` +
    /// `RERANK_API_KEY`, `OCR_BASE_URL`, `VISION_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let base_url = env_opt("EMBED_BASE_URL")
            .ok_or_else(|| Error::Config("EMBED_BASE_URL is required".to_string()))?;
        let model = env_opt("EMBED_MODEL")
            .ok_or_else(|| Error::Config("EMBED_MODEL is required".to_string()))?;
        let dimension = env_opt("EMBED_DIMENSION")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                Error::Config("EMBED_DIMENSION must be a positive integer".to_string())
            })?;

        let rerank = match (env_opt("RERANK_BASE_URL"), env_opt("RERANK_MODEL")) {
            (Some(base_url), Some(model)) => Some(RerankSettings {
                base_url,
                model,
                api_key: env_opt("RERANK_API_KEY"),
            }),
            _ => None,
        };

        Ok(Self {
            embed: EmbedSettings {
                base_url,
                model,
                api_key: env_opt("EMBED_API_KEY"),
                dimension,
            },
            rerank,
            ocr_base_url: env_opt("OCR_BASE_URL"),
            vision_base_url: env_opt("VISION_BASE_URL"),
        })
    }

    /// Rerank settings, or `CapabilityDisabled` when unconfigured.
    pub fn require_rerank(&self) -> Result<&RerankSettings> {
        self.rerank
            .as_ref()
            .ok_or_else(|| Error::CapabilityDisabled("rerank".to_string()))
    }

    /// OCR endpoint, or `CapabilityDisabled` when unconfigured.
    pub fn require_ocr(&self) -> Result<&str> {
        self.ocr_base_url
            .as_deref()
            .ok_or_else(|| Error::CapabilityDisabled("ocr".to_string()))
    }

    /// Vision endpoint, or `CapabilityDisabled` when unconfigured.
    pub fn require_vision(&self) -> Result<&str> {
        self.vision_base_url
            .as_deref()
            .ok_or_else(|| Error::CapabilityDisabled("vision".to_string()))
    }
}
