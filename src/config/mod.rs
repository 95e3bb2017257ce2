//! Run configuration (`config/policyguard.toml`).
//!
//! Lookup order:
//! 1) explicit path (CLI `--config`)
//! 2) $POLICYGUARD_CONFIG_PATH
//! 3) config/policyguard.toml
//! 4) built-in defaults

pub mod ai;

pub use ai::AiConfig;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_CONFIG_PATH: &str = "POLICYGUARD_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/policyguard.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0} not found in environment (or .env file)")]
    MissingCredential(String),

    #[error("unsupported classifier provider: {0}")]
    UnsupportedProvider(String),

    #[error("POLICYGUARD_CONFIG_PATH points to non-existent path {0}")]
    MissingConfigFile(PathBuf),
}

/// What a classifier failure does to the `flagged` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Not flagged; the record passes unreviewed.
    #[default]
    Open,
    /// Flagged, so the record lands on the review sheet.
    Closed,
}

impl FailureMode {
    pub fn flags_on_failure(&self) -> bool {
        matches!(self, FailureMode::Closed)
    }
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailureMode::Open),
            "closed" => Ok(FailureMode::Closed),
            other => Err(format!("unknown failure mode: {other} (expected open|closed)")),
        }
    }
}

fn default_text_column() -> String {
    "text".to_string()
}
fn default_concurrency() -> usize {
    1
}
fn default_progress_every() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Input column that holds the text to moderate.
    #[serde(default = "default_text_column")]
    pub text_column: String,
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Records in flight at once; 1 = strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Log progress every N records (0 disables).
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            text_column: default_text_column(),
            failure_mode: FailureMode::default(),
            concurrency: default_concurrency(),
            progress_every: default_progress_every(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ProjectInfo {
    /// `(name, version)` for the startup log; falls back to the crate's own.
    pub fn label(&self) -> (&str, &str) {
        (
            self.name.as_deref().unwrap_or("PolicyGuard"),
            self.version.as_deref().unwrap_or(env!("CARGO_PKG_VERSION")),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub project: ProjectInfo,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = toml::from_str(s).map_err(|source| ConfigError::Toml {
            path: origin.to_path_buf(),
            source,
        })?;
        cfg.normalize();
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&data, path)
    }

    /// Resolve the config file per the lookup order above. No file is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(p) = explicit {
            return Self::load_from_file(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(ConfigError::MissingConfigFile(pb));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        Ok(Self::default())
    }

    fn normalize(&mut self) {
        if self.run.concurrency == 0 {
            self.run.concurrency = 1;
        }
        self.run.text_column = self.run.text_column.trim().to_string();
        if self.run.text_column.is_empty() {
            self.run.text_column = default_text_column();
        }
        self.ai.normalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn project_label_reads_section_or_falls_back() {
        let cfg = AppConfig::from_toml_str(
            "[project]\nname = \"Guard\"\nversion = \"2.1\"\n",
            Path::new("inline"),
        )
        .unwrap();
        assert_eq!(cfg.project.label(), ("Guard", "2.1"));

        let cfg = AppConfig::from_toml_str("", Path::new("inline")).unwrap();
        assert_eq!(
            cfg.project.label(),
            ("PolicyGuard", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = AppConfig::from_toml_str("", Path::new("inline")).unwrap();
        assert_eq!(cfg.run.text_column, "text");
        assert_eq!(cfg.run.failure_mode, FailureMode::Open);
        assert_eq!(cfg.run.concurrency, 1);
        assert!(cfg.ai.enabled);
        assert_eq!(cfg.ai.model, "gpt-3.5-turbo");
        assert_eq!(cfg.ai.api_key, "ENV");
    }

    #[test]
    fn values_are_parsed_and_sanitized() {
        let s = r#"
[run]
text_column = " comment "
failure_mode = "closed"
concurrency = 0

[ai]
provider = "OpenAI"
base_url = "http://localhost:8080/v1/"
requests_per_minute = 0
"#;
        let cfg = AppConfig::from_toml_str(s, Path::new("inline")).unwrap();
        assert_eq!(cfg.run.text_column, "comment");
        assert_eq!(cfg.run.failure_mode, FailureMode::Closed);
        assert_eq!(cfg.run.concurrency, 1);
        assert_eq!(cfg.ai.provider, "openai");
        assert_eq!(cfg.ai.base_url, "http://localhost:8080/v1");
        assert_eq!(cfg.ai.requests_per_minute, None);
    }

    #[test]
    fn bad_failure_mode_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[run]\nfailure_mode = \"ajar\"", Path::new("x"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn failure_mode_from_str() {
        assert_eq!("CLOSED".parse::<FailureMode>().unwrap(), FailureMode::Closed);
        assert!("half".parse::<FailureMode>().is_err());
    }

    #[serial_test::serial]
    #[test]
    fn load_uses_env_then_default_then_builtin() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // nothing on disk -> defaults
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.run.concurrency, 1);

        // default location
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join(DEFAULT_CONFIG_PATH),
            "[run]\nconcurrency = 3\n",
        )
        .unwrap();
        assert_eq!(AppConfig::load(None).unwrap().run.concurrency, 3);

        // env wins
        let p_env = tmp.path().join("other.toml");
        fs::write(&p_env, "[run]\nconcurrency = 7\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
        assert_eq!(AppConfig::load(None).unwrap().run.concurrency, 7);

        // env pointing nowhere is an error
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(matches!(
            AppConfig::load(None),
            Err(ConfigError::MissingConfigFile(_))
        ));
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
