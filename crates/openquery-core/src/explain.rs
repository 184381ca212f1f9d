//! EXPLAIN metrics and their evaluation result

use serde::{Deserialize, Serialize};

/// Plan metrics supplied by a database adapter for the rewritten statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainData {
    pub estimated_rows: u64,

    pub estimated_cost: f64,

    /// Plan contains a sequential (full table) scan
    #[serde(default)]
    pub has_seq_scan: bool,

    /// Adapter-supplied notes, passed through as warnings
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ExplainData {
    pub fn new(estimated_rows: u64, estimated_cost: f64) -> Self {
        Self {
            estimated_rows,
            estimated_cost,
            has_seq_scan: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_seq_scan(mut self, has_seq_scan: bool) -> Self {
        self.has_seq_scan = has_seq_scan;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Echo of the evaluated metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainSummary {
    pub estimated_rows: u64,
    pub estimated_cost: f64,
    pub has_seq_scan: bool,
}

/// Plan-based gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainEvaluation {
    /// True when `blockers` is empty
    pub allowed: bool,
    pub warnings: Vec<String>,
    pub blockers: Vec<String>,
    pub summary: ExplainSummary,
}

impl ExplainEvaluation {
    pub fn has_blockers(&self) -> bool {
        !self.blockers.is_empty()
    }
}
