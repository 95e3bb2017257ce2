//! Semantic classifier adapter: provider abstraction + decision protocol + file cache
//! + rate limit.
//!
//! The protocol is fixed: the policy prompt goes in as the system message, the text as
//! the user message, the answer is capped at `MAX_OUTPUT_TOKENS` and sampled at
//! temperature 0. Whatever comes back is trimmed and lower-cased; if it contains
//! `flag` the text is flagged. Every failure is turned into a tagged outcome here, so
//! nothing above this module ever sees a classifier error.

use std::fs;
use std::io::{self, Write};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::AiConfig;
use crate::telemetry as metrics_names;

/// Output budget for the categorical answer.
pub const MAX_OUTPUT_TOKENS: u32 = 10;
/// Deterministic sampling.
pub const TEMPERATURE: f32 = 0.0;
/// Token whose presence in the normalized answer means "flagged".
pub const FLAG_TOKEN: &str = "flag";

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// One call to the external capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest<'a> {
    /// Governing instruction (the policy's `llm_prompt`).
    pub system: &'a str,
    /// Subject text.
    pub text: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl<'a> ClassificationRequest<'a> {
    pub fn new(system: &'a str, text: &'a str) -> Self {
        Self {
            system,
            text,
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("client not initialized: {0}")]
    NotInitialized(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClassifierError::Malformed(e.to_string())
        } else {
            ClassifierError::Transport(e.to_string())
        }
    }
}

/// The external text-classification capability. Implementations return the raw answer.
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn complete(&self, req: &ClassificationRequest<'_>) -> Result<String, ClassifierError>;

    /// Provider name for logs and metrics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynClassifier = Arc<dyn SemanticClassifier>;

/// Why the classifier could not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ApiError,
    NotInitialized,
}

/// Tagged result of one classification; never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierOutcome {
    Flagged { response: String },
    Clean { response: String },
    Failed { kind: FailureKind, message: String },
}

/// Run the decision protocol against `client`. Errors and panics are contained here.
pub async fn classify(
    client: &dyn SemanticClassifier,
    text: &str,
    prompt: &str,
) -> ClassifierOutcome {
    let req = ClassificationRequest::new(prompt, text);
    let provider = client.provider_name();
    counter!(metrics_names::CLASSIFIER_CALLS_TOTAL, "provider" => provider).increment(1);

    let result = AssertUnwindSafe(client.complete(&req)).catch_unwind().await;
    match result {
        Ok(Ok(raw)) => {
            let response = normalize_response(&raw);
            if is_flag_response(&response) {
                ClassifierOutcome::Flagged { response }
            } else {
                ClassifierOutcome::Clean { response }
            }
        }
        Ok(Err(ClassifierError::NotInitialized(message))) => ClassifierOutcome::Failed {
            kind: FailureKind::NotInitialized,
            message,
        },
        Ok(Err(e)) => {
            tracing::warn!(provider, error = %e, "classifier call failed");
            counter!(metrics_names::CLASSIFIER_ERRORS_TOTAL, "provider" => provider).increment(1);
            ClassifierOutcome::Failed {
                kind: FailureKind::ApiError,
                message: e.to_string(),
            }
        }
        Err(_) => {
            tracing::error!(provider, "classifier panicked");
            counter!(metrics_names::CLASSIFIER_ERRORS_TOTAL, "provider" => provider).increment(1);
            ClassifierOutcome::Failed {
                kind: FailureKind::ApiError,
                message: "classifier panicked".to_string(),
            }
        }
    }
}

/// Trim + lower-case.
pub fn normalize_response(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_flag_response(normalized: &str) -> bool {
    normalized.contains(FLAG_TOKEN)
}

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// OpenAI-compatible Chat Completions provider.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiClassifier {
    /// `cfg.api_key` must already be resolved (see `AiConfig::resolve_api_key`).
    pub fn new(cfg: &AiConfig) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("policyguard/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ClassifierError::NotInitialized(e.to_string()))?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            endpoint: format!("{}/chat/completions", cfg.base_url),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl SemanticClassifier for OpenAiClassifier {
    async fn complete(&self, req: &ClassificationRequest<'_>) -> Result<String, ClassifierError> {
        if self.api_key.is_empty() {
            return Err(ClassifierError::NotInitialized(
                "no API key configured".to_string(),
            ));
        }

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: req.system,
                },
                Msg {
                    role: "user",
                    content: req.text,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Malformed("no choices in response".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Always fails with `NotInitialized`; used for rules-only runs.
pub struct DisabledClassifier;

#[async_trait]
impl SemanticClassifier for DisabledClassifier {
    async fn complete(&self, _req: &ClassificationRequest<'_>) -> Result<String, ClassifierError> {
        Err(ClassifierError::NotInitialized(
            "semantic classification is disabled".to_string(),
        ))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed-answer provider for dry runs (`AI_TEST_MODE=mock`) and tests.
#[derive(Clone)]
pub struct MockClassifier {
    pub fixed: String,
}

impl MockClassifier {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

#[async_trait]
impl SemanticClassifier for MockClassifier {
    async fn complete(&self, _req: &ClassificationRequest<'_>) -> Result<String, ClassifierError> {
        Ok(self.fixed.clone())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache keyed by the full request)
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAnswer {
    response: String,
}

/// Requests are deterministic (temperature 0), so a successful answer can be reused.
/// Failures are never cached.
pub struct CachingClassifier {
    inner: DynClassifier,
    cache_dir: PathBuf,
    /// Mixed into the key so a model switch invalidates old answers.
    namespace: String,
}

impl CachingClassifier {
    pub fn new(inner: DynClassifier, cache_dir: PathBuf, namespace: impl Into<String>) -> Self {
        let _ = fs::create_dir_all(&cache_dir); // best-effort
        Self {
            inner,
            cache_dir,
            namespace: namespace.into(),
        }
    }

    fn key(&self, req: &ClassificationRequest<'_>) -> String {
        let mut h = Sha256::new();
        for part in [self.inner.provider_name(), self.namespace.as_str(), req.system, req.text] {
            h.update((part.len() as u64).to_le_bytes());
            h.update(part.as_bytes());
        }
        h.update(req.max_tokens.to_le_bytes());
        h.update(req.temperature.to_le_bytes());
        format!("{:x}", h.finalize())
    }
}

#[async_trait]
impl SemanticClassifier for CachingClassifier {
    async fn complete(&self, req: &ClassificationRequest<'_>) -> Result<String, ClassifierError> {
        let key = self.key(req);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            counter!(metrics_names::CLASSIFIER_CACHE_HITS_TOTAL).increment(1);
            return Ok(hit.response);
        }

        let response = self.inner.complete(req).await?;
        if let Err(e) = write_cache_file(
            &self.cache_dir,
            &key,
            &CachedAnswer {
                response: response.clone(),
            },
        ) {
            tracing::debug!(error = %e, "classifier cache write failed");
        }
        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CachedAnswer> {
    let buf = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&buf).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &CachedAnswer) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).map_err(io::Error::other)?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Rate limiting
// ------------------------------------------------------------

/// Spaces calls evenly so that at most `per_minute` reach the inner provider per minute,
/// no matter how many records are in flight.
pub struct RateLimitedClassifier {
    inner: DynClassifier,
    ticker: Mutex<Interval>,
}

impl RateLimitedClassifier {
    /// Must be called inside a Tokio runtime. `per_minute` of 0 is treated as 1.
    pub fn new(inner: DynClassifier, per_minute: u32) -> Self {
        let period = Duration::from_secs_f64(60.0 / f64::from(per_minute.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            inner,
            ticker: Mutex::new(ticker),
        }
    }
}

#[async_trait]
impl SemanticClassifier for RateLimitedClassifier {
    async fn complete(&self, req: &ClassificationRequest<'_>) -> Result<String, ClassifierError> {
        self.ticker.lock().await.tick().await;
        self.inner.complete(req).await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        calls: AtomicUsize,
        answer: Result<String, String>,
    }

    #[async_trait]
    impl SemanticClassifier for Recording {
        async fn complete(
            &self,
            req: &ClassificationRequest<'_>,
        ) -> Result<String, ClassifierError> {
            assert_eq!(req.max_tokens, MAX_OUTPUT_TOKENS);
            assert_eq!(req.temperature, 0.0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(ClassifierError::Transport)
        }
        fn provider_name(&self) -> &'static str {
            "recording"
        }
    }

    fn recording(answer: Result<&str, &str>) -> Arc<Recording> {
        Arc::new(Recording {
            calls: AtomicUsize::new(0),
            answer: answer.map(str::to_string).map_err(str::to_string),
        })
    }

    #[tokio::test]
    async fn flag_token_is_detected_after_normalization() {
        let c = recording(Ok("  FLAGGED\n"));
        let out = classify(c.as_ref(), "text", "prompt").await;
        assert_eq!(
            out,
            ClassifierOutcome::Flagged {
                response: "flagged".into()
            }
        );

        let c = recording(Ok("OK"));
        let out = classify(c.as_ref(), "text", "prompt").await;
        assert_eq!(out, ClassifierOutcome::Clean { response: "ok".into() });
    }

    #[tokio::test]
    async fn transport_error_becomes_api_error() {
        let c = recording(Err("timed out"));
        match classify(c.as_ref(), "text", "prompt").await {
            ClassifierOutcome::Failed { kind, message } => {
                assert_eq!(kind, FailureKind::ApiError);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_client_is_not_initialized() {
        match classify(&DisabledClassifier, "text", "prompt").await {
            ClassifierOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::NotInitialized),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_is_not_initialized() {
        let cfg = AiConfig {
            api_key: String::new(),
            ..Default::default()
        };
        let client = OpenAiClassifier::new(&cfg).unwrap();
        match classify(&client, "text", "prompt").await {
            ClassifierOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::NotInitialized),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_client_is_contained() {
        struct Boom;
        #[async_trait]
        impl SemanticClassifier for Boom {
            async fn complete(
                &self,
                _req: &ClassificationRequest<'_>,
            ) -> Result<String, ClassifierError> {
                panic!("boom")
            }
            fn provider_name(&self) -> &'static str {
                "boom"
            }
        }
        match classify(&Boom, "text", "prompt").await {
            ClassifierOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::ApiError),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cache_reuses_successful_answers_only() {
        let dir = tempfile::tempdir().unwrap();
        let inner = recording(Ok("ok"));
        let cached = CachingClassifier::new(inner.clone(), dir.path().to_path_buf(), "m1");

        let req = ClassificationRequest::new("prompt", "hello");
        assert_eq!(cached.complete(&req).await.unwrap(), "ok");
        assert_eq!(cached.complete(&req).await.unwrap(), "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // different text -> miss
        let other = ClassificationRequest::new("prompt", "world");
        cached.complete(&other).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let failing = recording(Err("down"));
        let cached = CachingClassifier::new(failing.clone(), dir.path().join("f"), "m1");
        assert!(cached.complete(&req).await.is_err());
        assert!(cached.complete(&req).await.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spaces_calls() {
        let inner = recording(Ok("ok"));
        let limited = RateLimitedClassifier::new(inner.clone(), 60);
        let req = ClassificationRequest::new("p", "t");

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            limited.complete(&req).await.unwrap();
        }
        // first tick is immediate, then one per second
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
