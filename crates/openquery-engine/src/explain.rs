//! EXPLAIN gating
//!
//! Scores plan metrics reported by the database against the configured
//! thresholds. Runs after static validation and before execution, on the
//! estimate for the rewritten statement.

use openquery_core::{ExplainData, ExplainEvaluation, ExplainSummary, SafeModeConfig};
use tracing::{debug, info};

/// Warning appended when the plan contains a sequential scan
pub const SEQ_SCAN_WARNING: &str =
    "Sequential scan detected: the query reads a full table and may be slow";

/// Evaluates plan metrics against thresholds
pub struct ExplainEvaluator;

impl ExplainEvaluator {
    /// Evaluate plan metrics.
    ///
    /// Thresholds use strict `>`: a value equal to its threshold is allowed.
    pub fn evaluate(data: &ExplainData, safe_mode: &SafeModeConfig) -> ExplainEvaluation {
        let mut blockers = Vec::new();
        let mut warnings = data.warnings.clone();

        if data.estimated_rows > safe_mode.max_estimated_rows {
            blockers.push(format!(
                "Estimated rows ({}) exceeds threshold ({})",
                data.estimated_rows, safe_mode.max_estimated_rows
            ));
        }

        if !data.estimated_cost.is_finite() {
            blockers.push(format!(
                "Estimated cost ({}) is not a finite number",
                data.estimated_cost
            ));
        } else if data.estimated_cost > safe_mode.max_estimated_cost {
            blockers.push(format!(
                "Estimated cost ({:.2}) exceeds threshold ({:.2})",
                data.estimated_cost, safe_mode.max_estimated_cost
            ));
        }

        if data.has_seq_scan {
            warnings.push(SEQ_SCAN_WARNING.to_string());
        }

        if blockers.is_empty() {
            debug!(
                rows = data.estimated_rows,
                cost = data.estimated_cost,
                "plan within thresholds"
            );
        } else {
            info!(blockers = blockers.len(), "plan blocked by thresholds");
        }

        ExplainEvaluation {
            allowed: blockers.is_empty(),
            warnings,
            blockers,
            summary: ExplainSummary {
                estimated_rows: data.estimated_rows,
                estimated_cost: data.estimated_cost,
                has_seq_scan: data.has_seq_scan,
            },
        }
    }
}
