// src/lib.rs
// Public library surface for the CLI and integration tests.

pub mod analyze;
pub mod batch;
pub mod bootstrap;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod policy;
pub mod table;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use analyze::{moderate_text, Moderator};
pub use batch::{BatchCfg, BatchOutcome, BatchRunner, BatchSummary};
pub use config::{AppConfig, FailureMode};
pub use decision::{ModerationDecision, Reason};
pub use policy::{Policy, PolicyError};
