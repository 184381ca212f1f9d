//! OpenQuery engine - policy evaluation
//!
//! This crate ties the SQL front end to the policy rules:
//! - Rule validation over the policy AST
//! - Row-limit enforcement
//! - EXPLAIN gating
//! - The [`PolicyEngine`] orchestrator and its configuration snapshots

pub mod engine;
pub mod explain;
pub mod rules;

pub use engine::PolicyEngine;
pub use explain::ExplainEvaluator;
pub use rules::{RuleValidation, RuleValidator};
