//! Rule identifiers, violations and statement labels
//!
//! IMPORTANT: Rule identifiers are stable.
//! They appear in `details` lines and JSON output consumed by callers.
//! Add new identifiers with new names only.

use serde::{Deserialize, Serialize};

/// Policy rule registry, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleId {
    /// More than one statement in a single input
    MultiStatement,

    /// Statement kind not permitted by the active mode
    StatementKind,

    /// A blocked table is referenced
    BlockedTable,

    /// Wildcard projection (`*` or `tbl.*`)
    SelectStar,

    /// Plan check required before execution (warning only)
    RequireExplain,
}

impl RuleId {
    /// Stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiStatement => "MULTI_STATEMENT",
            Self::StatementKind => "STATEMENT_KIND",
            Self::BlockedTable => "BLOCKED_TABLE",
            Self::SelectStar => "SELECT_STAR",
            Self::RequireExplain => "REQUIRE_EXPLAIN",
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named, reasoned rule failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Rule that failed
    pub rule: RuleId,

    /// Human-readable reason
    pub reason: String,

    /// How the user could fix the statement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl Violation {
    pub fn new(rule: RuleId, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
            suggested_fix: None,
        }
    }

    /// Attach a suggested fix
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    /// `[RULE_ID] reason` line used in validation details
    pub fn detail_line(&self) -> String {
        format!("[{}] {}", self.rule, self.reason)
    }
}

/// Structural kind of a single SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl StatementKind {
    /// Whether the statement only reads data
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Select)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Ddl => "ddl",
            Self::Other => "other",
        }
    }

    /// Intent label for this kind
    pub fn classification(&self) -> Classification {
        match self {
            Self::Select => Classification::Read,
            Self::Insert | Self::Update | Self::Delete => Classification::Write,
            Self::Ddl => Classification::Ddl,
            Self::Other => Classification::Other,
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Intent of a statement, independent of any policy
///
/// Variants are ordered by how much damage the statement can do, so the
/// classification of multi-statement input is the maximum of its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Read,
    Other,
    Write,
    Ddl,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Other => "other",
            Self::Write => "write",
            Self::Ddl => "ddl",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: Classification,
}
