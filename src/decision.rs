//! decision.rs: the uniform per-text moderation outcome.
//!
//! Every text that goes through the pipeline yields exactly one `ModerationDecision`.
//! `reason` is the machine-readable category; `details` is free text for humans and
//! is never parsed downstream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// A deterministic policy rule fired.
    KeywordMatch,
    /// The semantic classifier answered with a flag token.
    LlmFlagged,
    /// The semantic classifier answered, without a flag token.
    LlmOk,
    /// The classifier call failed (transport, auth, status, malformed body).
    ApiError,
    /// No classifier client was available for this run.
    ClientNotInitialized,
    /// Input was empty or whitespace only; nothing was evaluated.
    EmptyText,
}

impl Reason {
    pub const ALL: [Reason; 6] = [
        Reason::KeywordMatch,
        Reason::LlmFlagged,
        Reason::LlmOk,
        Reason::ApiError,
        Reason::ClientNotInitialized,
        Reason::EmptyText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::KeywordMatch => "keyword_match",
            Reason::LlmFlagged => "llm_flagged",
            Reason::LlmOk => "llm_ok",
            Reason::ApiError => "api_error",
            Reason::ClientNotInitialized => "client_not_initialized",
            Reason::EmptyText => "empty_text",
        }
    }

    /// True for the reasons that mean "the classifier could not give an answer".
    pub fn is_fallback(&self) -> bool {
        matches!(self, Reason::ApiError | Reason::ClientNotInitialized)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reason::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| format!("unknown moderation reason: {s}"))
    }
}

/// Result of moderating one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationDecision {
    pub flagged: bool,
    pub reason: Reason,
    #[serde(default)]
    pub details: String,
}

impl ModerationDecision {
    pub fn new(flagged: bool, reason: Reason, details: impl Into<String>) -> Self {
        Self {
            flagged,
            reason,
            details: details.into(),
        }
    }

    pub fn empty_text() -> Self {
        Self::new(false, Reason::EmptyText, "Input text is empty.")
    }

    pub fn keyword_match(keyword: &str) -> Self {
        Self::new(
            true,
            Reason::KeywordMatch,
            format!("Matched keyword: '{keyword}'"),
        )
    }

    pub fn llm_flagged(response: &str) -> Self {
        Self::new(true, Reason::LlmFlagged, format!("LLM response: '{response}'"))
    }

    pub fn llm_ok(response: &str) -> Self {
        Self::new(false, Reason::LlmOk, format!("LLM response: '{response}'"))
    }
}
