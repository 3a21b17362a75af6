//! Flat, environment-based configuration.
//!
//! Deliberately not a TOML-with-template-inheritance loader (that layer is
//! out of scope); this mirrors the teacher's flat `Config::from_env` shape,
//! trimmed to the settings `llmist`'s agent loop and HTTP provider actually
//! consume.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration for the bundled [`crate::provider::HttpChatProvider`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub default_model: String,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

impl ProviderConfig {
    /// Reads `LLMIST_BASE_URL`, `LLMIST_MODEL`, and `LLMIST_API_KEY` from the
    /// environment (after loading a `.env` file if present), matching the
    /// teacher's `Config::from_env` convention of env-first configuration.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("LLMIST_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let default_model =
            std::env::var("LLMIST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let api_key = std::env::var("LLMIST_API_KEY").ok().map(SecretString::from);

        Ok(Self {
            base_url,
            default_model,
            api_key,
            request_timeout: default_request_timeout(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::InvalidInput("base_url must not be empty".into()));
        }
        if self.default_model.is_empty() {
            return Err(Error::InvalidInput(
                "default_model must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Marker strings the parser and the prompt assembler must agree on
/// bit-for-bit. Defaults chosen so none is a prefix of another and none is
/// likely to occur in normal prose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerConfig {
    pub start_prefix: String,
    pub end_prefix: String,
    pub arg_prefix: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            start_prefix: "!!!GADGET_START:".to_string(),
            end_prefix: "!!!GADGET_END".to_string(),
            arg_prefix: "!!!ARG:".to_string(),
        }
    }
}

impl MarkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_prefix.is_empty() || self.end_prefix.is_empty() || self.arg_prefix.is_empty()
        {
            return Err(Error::InvalidInput(
                "marker prefixes must not be empty".into(),
            ));
        }
        let prefixes = [&self.start_prefix, &self.end_prefix, &self.arg_prefix];
        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j && b.starts_with(a.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "marker prefix {:?} is a prefix of {:?}",
                        a, b
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Top-level runtime settings for an agent loop run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_iterations: u32,
    pub max_subagent_depth: usize,
    pub default_gadget_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_subagent_depth: 8,
            default_gadget_timeout: Some(Duration::from_secs(60)),
        }
    }
}
