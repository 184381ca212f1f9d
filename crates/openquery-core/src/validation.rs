//! Validation results
//!
//! [`ValidationResult`] is what callers act on; [`ValidationReport`] is its
//! stable flat JSON form (camelCase fields) for the desktop bridge and CLI.

use serde::{Deserialize, Serialize};
use crate::rule::{ClassificationResult, Violation};

/// Reason reported for statements that pass every check
pub const ALLOWED_REASON: &str = "Query passed all policy checks";

/// Outcome of static validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Statement may proceed; `sql` is the text to run (possibly rewritten)
    Allowed { sql: String },

    /// One or more rules failed, in rule order
    Violated { violations: Vec<Violation> },

    /// Statement could not be analysed at all
    Rejected {
        reason: String,
        details: String,
        suggested_fix: String,
    },
}

/// Result of `validate_and_rewrite`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub verdict: Verdict,

    /// Non-fatal annotations, in the order they were produced
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn allowed(sql: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            verdict: Verdict::Allowed { sql: sql.into() },
            warnings,
        }
    }

    pub fn violated(violations: Vec<Violation>, warnings: Vec<String>) -> Self {
        Self {
            verdict: Verdict::Violated { violations },
            warnings,
        }
    }

    pub fn rejected(
        reason: impl Into<String>,
        details: impl Into<String>,
        suggested_fix: impl Into<String>,
    ) -> Self {
        Self {
            verdict: Verdict::Rejected {
                reason: reason.into(),
                details: details.into(),
                suggested_fix: suggested_fix.into(),
            },
            warnings: Vec::new(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.verdict, Verdict::Allowed { .. })
    }

    /// SQL to hand to the database; only present when allowed
    pub fn rewritten_sql(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Allowed { sql } => Some(sql),
            _ => None,
        }
    }

    /// Top-level reason: the first violation when blocked
    pub fn reason(&self) -> &str {
        match &self.verdict {
            Verdict::Allowed { .. } => ALLOWED_REASON,
            Verdict::Violated { violations } => violations
                .first()
                .map(|v| v.reason.as_str())
                .unwrap_or("Policy violation"),
            Verdict::Rejected { reason, .. } => reason,
        }
    }

    /// Full diagnostics, one `[RULE_ID] reason` line per violation
    pub fn details(&self) -> Option<String> {
        match &self.verdict {
            Verdict::Allowed { .. } => None,
            Verdict::Violated { violations } => Some(
                violations
                    .iter()
                    .map(Violation::detail_line)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Verdict::Rejected { details, .. } => Some(details.clone()),
        }
    }

    pub fn suggested_fix(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Allowed { .. } => None,
            Verdict::Violated { violations } => violations
                .iter()
                .find_map(|v| v.suggested_fix.as_deref()),
            Verdict::Rejected { suggested_fix, .. } => Some(suggested_fix),
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match &self.verdict {
            Verdict::Violated { violations } => violations,
            _ => &[],
        }
    }

    /// Flat, serializable form
    pub fn to_report(&self) -> ValidationReport {
        ValidationReport {
            allowed: self.is_allowed(),
            rewritten_sql: self.rewritten_sql().map(str::to_string),
            warnings: self.warnings.clone(),
            reason: self.reason().to_string(),
            details: self.details(),
            suggested_fix: self.suggested_fix().map(str::to_string),
            violations: self.violations().to_vec(),
        }
    }
}

/// Flat JSON shape of a [`ValidationResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub allowed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_sql: Option<String>,

    pub warnings: Vec<String>,

    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

/// Classification and validation of the same input, computed independently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedValidation {
    pub validation: ValidationResult,
    pub classification: ClassificationResult,
}
