//! OpenQuery Core
//!
//! Domain model shared by the policy engine and its callers.
//! Never rename rule identifiers - they are part of the public API.

pub mod config;
pub mod explain;
pub mod rule;
pub mod validation;

pub use config::{
    ConfigError, PolicyConfig, PolicyConfigPatch, PolicyMode, PolicyProfile, SafeModeConfig,
    SafeModeConfigPatch, SqlDialect,
};
pub use explain::{ExplainData, ExplainEvaluation, ExplainSummary};
pub use rule::{Classification, ClassificationResult, RuleId, StatementKind, Violation};
pub use validation::{ClassifiedValidation, ValidationReport, ValidationResult, Verdict};
