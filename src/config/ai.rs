// src/config/ai.rs
use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

fn default_enabled() -> bool {
    true
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    4
}

/// Semantic classifier settings (`[ai]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY at startup
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound on classifier calls per minute across all workers.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    /// Response cache directory; caching is off when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            requests_per_minute: None,
            cache_dir: None,
        }
    }
}

impl AiConfig {
    pub(crate) fn normalize(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        if self.requests_per_minute == Some(0) {
            self.requests_per_minute = None;
        }
    }

    /// Environment variable holding the credential for the configured provider.
    pub fn credential_var(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }

    /// Resolve `api_key = "ENV"` into the real secret. Called once at startup.
    /// Providers that need no credential (mock) resolve to an empty key.
    pub fn resolve_api_key(&mut self) -> Result<(), ConfigError> {
        match self.provider.as_str() {
            "openai" => {}
            "mock" => return Ok(()),
            other => return Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            let var = self.credential_var().unwrap_or("OPENAI_API_KEY");
            self.api_key = env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredential(var.to_string()))?;
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(
                self.credential_var().unwrap_or("api_key").to_string(),
            ));
        }
        Ok(())
    }
}
