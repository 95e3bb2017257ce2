// src/analyze/mod.rs
//! Moderation pipeline entry: empty check → policy rules → semantic classifier.
//!
//! Order:
//! 1) Empty / whitespace-only text is answered immediately (`empty_text`).
//! 2) Policy rules in declared order; a hit returns `keyword_match` and the
//!    classifier is never called.
//! 3) Otherwise the classifier decides, with the policy's `llm_prompt` as instruction.
//!
//! `moderate` never fails: classifier problems come back as `api_error` /
//! `client_not_initialized` decisions, flagged or not according to `FailureMode`.

pub mod ai_adapter;
pub mod rules;

use std::sync::Arc;

use metrics::counter;

use crate::analyze::ai_adapter::{
    classify, ClassifierOutcome, DynClassifier, FailureKind, SemanticClassifier,
};
use crate::config::FailureMode;
use crate::decision::{ModerationDecision, Reason};
use crate::policy::Policy;
use crate::telemetry;

// Re-export convenient types.
pub use crate::analyze::rules::{first_match, RuleKind, RuleMatch, RuleMatcher};

/// Stateless orchestrator bound to one policy and one classifier stack.
/// Cheap to clone; all clones share the same read-only policy.
#[derive(Clone)]
pub struct Moderator {
    policy: Arc<Policy>,
    classifier: DynClassifier,
    failure_mode: FailureMode,
}

impl Moderator {
    pub fn new(policy: Arc<Policy>, classifier: DynClassifier) -> Self {
        telemetry::ensure_metrics_described();
        Self {
            policy,
            classifier,
            failure_mode: FailureMode::default(),
        }
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn provider_name(&self) -> &'static str {
        self.classifier.provider_name()
    }

    pub async fn moderate(&self, text: &str) -> ModerationDecision {
        moderate_text(text, &self.policy, self.classifier.as_ref(), self.failure_mode).await
    }
}

/// Moderate one text against `policy`. Total: always returns a decision.
pub async fn moderate_text(
    text: &str,
    policy: &Policy,
    classifier: &dyn SemanticClassifier,
    failure_mode: FailureMode,
) -> ModerationDecision {
    let decision = decide(text, policy, classifier, failure_mode).await;
    counter!(telemetry::DECISIONS_TOTAL, "reason" => decision.reason.as_str()).increment(1);
    decision
}

async fn decide(
    text: &str,
    policy: &Policy,
    classifier: &dyn SemanticClassifier,
    failure_mode: FailureMode,
) -> ModerationDecision {
    if text.trim().is_empty() {
        return ModerationDecision::empty_text();
    }

    if let Some(hit) = first_match(text, policy.matchers()) {
        tracing::debug!(rule = hit.rule_index, term = %hit.term, "rule matched");
        return ModerationDecision::new(true, Reason::KeywordMatch, hit.describe());
    }

    match classify(classifier, text, policy.llm_prompt()).await {
        ClassifierOutcome::Flagged { response } => ModerationDecision::llm_flagged(&response),
        ClassifierOutcome::Clean { response } => ModerationDecision::llm_ok(&response),
        ClassifierOutcome::Failed { kind, message } => {
            fallback_decision(kind, &message, classifier.provider_name(), failure_mode)
        }
    }
}

fn fallback_decision(
    kind: FailureKind,
    message: &str,
    provider: &str,
    failure_mode: FailureMode,
) -> ModerationDecision {
    let flagged = failure_mode.flags_on_failure();
    match kind {
        FailureKind::NotInitialized => ModerationDecision::new(
            flagged,
            Reason::ClientNotInitialized,
            format!(
                "Classifier client ({provider}) not initialized: {message}. Skipping LLM check."
            ),
        ),
        FailureKind::ApiError => ModerationDecision::new(
            flagged,
            Reason::ApiError,
            format!("An error occurred with the {provider} API: {message}"),
        ),
    }
}
