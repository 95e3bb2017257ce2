// src/bootstrap.rs
//! Startup wiring: config + policy + classifier stack, with every precondition checked
//! once before any record is read.

use crate::analyze::ai_adapter::{
    classify, CachingClassifier, DisabledClassifier, DynClassifier, MockClassifier,
    OpenAiClassifier, RateLimitedClassifier,
};
use crate::analyze::Moderator;
use crate::config::{AiConfig, AppConfig};
use crate::policy::{self, Policy};
use anyhow::{bail, Context};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// `AI_TEST_MODE=mock` swaps the real provider for a fixed "ok" answer.
pub const ENV_AI_TEST_MODE: &str = "AI_TEST_MODE";

pub struct Runtime {
    pub cfg: AppConfig,
    pub policy: Arc<Policy>,
    pub classifier: DynClassifier,
}

impl Runtime {
    /// Load the policy (schema from `schema_path` or the default lookup) and build the
    /// classifier. Must run inside a Tokio runtime when a rate limit is configured.
    pub fn build(
        mut cfg: AppConfig,
        policy_path: &Path,
        schema_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let policy = match schema_path {
            Some(schema) => policy::load_with_schema(policy_path, schema),
            None => policy::load(policy_path),
        }
        .with_context(|| format!("loading policy {}", policy_path.display()))?;

        if cfg.ai.enabled && policy.llm_prompt().trim().is_empty() {
            bail!(
                "policy '{}' has an empty llm_prompt but semantic classification is enabled",
                policy.name()
            );
        }

        let classifier = build_classifier(&mut cfg.ai)?;
        // Safe diagnostics: only provider + enabled + key length
        let (project, project_version) = cfg.project.label();
        info!(
            project,
            project_version,
            policy = policy.name(),
            version = policy.version(),
            rules = policy.rules().len(),
            provider = classifier.provider_name(),
            enabled = cfg.ai.enabled,
            key_len = cfg.ai.api_key.len(),
            "runtime ready"
        );

        Ok(Self {
            cfg,
            policy: Arc::new(policy),
            classifier,
        })
    }

    pub fn moderator(&self) -> Moderator {
        Moderator::new(self.policy.clone(), self.classifier.clone())
            .with_failure_mode(self.cfg.run.failure_mode)
    }

    /// One classifier round-trip with a harmless sample; logs the outcome, never fails.
    pub async fn quick_probe(&self) {
        if !self.cfg.ai.enabled {
            warn!("classifier probe skipped: semantic classification is disabled");
            return;
        }
        let sample = "The weather today is lovely.";
        let out = classify(self.classifier.as_ref(), sample, self.policy.llm_prompt()).await;
        info!(provider = self.classifier.provider_name(), outcome = ?out, "classifier probe");
    }
}

/// Factory: build the classifier stack from config and environment.
///
/// * `enabled = false` → disabled client (every fallback is `client_not_initialized`),
///   even under `AI_TEST_MODE`.
/// * `AI_TEST_MODE=mock` → mock client (no credential needed).
/// * otherwise the configured provider, with the credential resolved here; a missing
///   credential is fatal. Optional cache and rate-limit layers wrap it.
pub fn build_classifier(cfg: &mut AiConfig) -> anyhow::Result<DynClassifier> {
    if !cfg.enabled {
        return Ok(Arc::new(DisabledClassifier));
    }
    if std::env::var(ENV_AI_TEST_MODE)
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockClassifier::new("ok")));
    }

    cfg.resolve_api_key()
        .context("semantic classification needs a credential")?;

    let mut client: DynClassifier = match cfg.provider.as_str() {
        "mock" => Arc::new(MockClassifier::new("ok")),
        _ => Arc::new(OpenAiClassifier::new(cfg).context("building HTTP client")?),
    };
    // cache outermost: hits never wait for a rate-limit slot
    if let Some(rpm) = cfg.requests_per_minute {
        client = Arc::new(RateLimitedClassifier::new(client, rpm));
    }
    if let Some(dir) = &cfg.cache_dir {
        client = Arc::new(CachingClassifier::new(client, dir.clone(), cfg.model.clone()));
    }
    Ok(client)
}
