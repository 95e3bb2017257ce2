//! Policy document model and validated loader.
//!
//! A policy is read once per run, checked against the JSON schema, compiled into
//! rule matchers and never mutated afterwards. Loading is all-or-nothing: any
//! violation rejects the whole document.

pub mod schema;

use crate::analyze::rules::{build_matcher, DynRuleMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy file not found at {0}")]
    NotFound(PathBuf),

    #[error("schema file not found at {0}")]
    SchemaNotFound(PathBuf),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("policy schema is not a valid JSON Schema: {0}")]
    InvalidSchema(String),

    #[error("policy validation failed: {0}")]
    Validation(String),

    #[error("rule #{index} is invalid: {message}")]
    InvalidRule { index: usize, message: String },
}

/// One declared rule, in document form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    /// Case-insensitive substring match on any of the listed terms.
    Keyword { value: Vec<String> },
    /// Case-insensitive regex search on any of the listed patterns.
    Regex { value: Vec<String> },
}

impl Rule {
    pub fn values(&self) -> &[String] {
        match self {
            Rule::Keyword { value } | Rule::Regex { value } => value,
        }
    }
}

/// Serializable shape of a policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// System instruction for the semantic classifier.
    pub llm_prompt: String,
    pub rules: Vec<Rule>,
}

/// Validated, compiled policy. Immutable; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Policy {
    doc: PolicyDocument,
    matchers: Vec<DynRuleMatcher>,
}

impl Policy {
    /// Compile a document that is already structurally valid.
    /// Still rejects empty rule values and bad regex patterns on its own.
    pub fn from_document(doc: PolicyDocument) -> Result<Self, PolicyError> {
        let mut matchers = Vec::with_capacity(doc.rules.len());
        for (index, rule) in doc.rules.iter().enumerate() {
            if rule.values().is_empty() {
                return Err(PolicyError::InvalidRule {
                    index,
                    message: "value must list at least one term".into(),
                });
            }
            let m = build_matcher(rule).map_err(|e| PolicyError::InvalidRule {
                index,
                message: e.to_string(),
            })?;
            matchers.push(m);
        }
        Ok(Self { doc, matchers })
    }

    /// Validate a parsed JSON value against `schema`, then compile it.
    pub fn from_value(value: Value, schema: &Value) -> Result<Self, PolicyError> {
        schema::validate(schema, &value)?;
        let doc: PolicyDocument = serde_json::from_value(value)
            .map_err(|e| PolicyError::Validation(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn version(&self) -> &str {
        &self.doc.version
    }

    pub fn llm_prompt(&self) -> &str {
        &self.doc.llm_prompt
    }

    pub fn rules(&self) -> &[Rule] {
        &self.doc.rules
    }

    /// Compiled matchers, index-aligned with `rules()`.
    pub fn matchers(&self) -> &[DynRuleMatcher] {
        &self.matchers
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.doc
    }

    /// Pretty JSON of the document; rule and term order are preserved.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.doc)
    }
}

/// Load a policy, resolving the schema from the environment or the default location.
pub fn load(path: impl AsRef<Path>) -> Result<Policy, PolicyError> {
    load_with_schema(path, schema::default_schema_path())
}

/// Load `policy_path` and validate it against the schema at `schema_path`.
pub fn load_with_schema(
    policy_path: impl AsRef<Path>,
    schema_path: impl AsRef<Path>,
) -> Result<Policy, PolicyError> {
    let policy_path = policy_path.as_ref();
    let schema = schema::read_schema(schema_path.as_ref())?;

    if !policy_path.exists() {
        return Err(PolicyError::NotFound(policy_path.to_path_buf()));
    }
    let data = fs::read_to_string(policy_path).map_err(|source| PolicyError::Io {
        path: policy_path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&data).map_err(|source| PolicyError::InvalidJson {
        path: policy_path.to_path_buf(),
        source,
    })?;

    let policy = Policy::from_value(value, &schema)?;
    tracing::debug!(
        name = policy.name(),
        version = policy.version(),
        rules = policy.rules().len(),
        "policy loaded"
    );
    Ok(policy)
}
