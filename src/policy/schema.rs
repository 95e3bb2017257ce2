//! JSON Schema resolution and structural validation for policy documents.

use super::PolicyError;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SCHEMA_PATH: &str = "POLICYGUARD_SCHEMA_PATH";
pub const DEFAULT_SCHEMA_PATH: &str = "policies/policy_schema.json";

/// Maximum number of schema violations reported in one error message.
const MAX_REPORTED_ERRORS: usize = 5;

/// Schema location: `$POLICYGUARD_SCHEMA_PATH`, else `policies/policy_schema.json`.
pub fn default_schema_path() -> PathBuf {
    std::env::var(ENV_SCHEMA_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCHEMA_PATH))
}

/// Read and parse a schema document. A missing file is its own error kind.
pub fn read_schema(path: &Path) -> Result<Value, PolicyError> {
    if !path.exists() {
        return Err(PolicyError::SchemaNotFound(path.to_path_buf()));
    }
    let data = fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| PolicyError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Validate `instance` against `schema`. All violations are collected, then rejected together.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), PolicyError> {
    let compiled = jsonschema::validator_for(schema)
        .map_err(|e| PolicyError::InvalidSchema(e.to_string()))?;

    let msgs: Vec<String> = compiled
        .iter_errors(instance)
        .take(MAX_REPORTED_ERRORS)
        .map(|err| {
            let at = err.instance_path.to_string();
            if at.is_empty() {
                format!("{err} at /")
            } else {
                format!("{err} at {at}")
            }
        })
        .collect();

    if msgs.is_empty() {
        Ok(())
    } else {
        Err(PolicyError::Validation(msgs.join("; ")))
    }
}
