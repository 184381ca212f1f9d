//! Rule validation
//!
//! Walks the policy AST against the active configuration. Rules run in a fixed
//! order and every failing rule is collected, so callers can show complete
//! diagnostics while the first violation stays the headline reason.

use openquery_core::{
    PolicyConfig, PolicyMode, RuleId, SafeModeConfig, StatementKind, Violation,
};
use openquery_sql::PolicyAst;
use std::collections::BTreeSet;
use tracing::debug;

/// Warning attached when a plan check is mandatory
pub const REQUIRE_EXPLAIN_WARNING: &str =
    "EXPLAIN check required: run a plan estimate before executing this query";

/// Output of [`RuleValidator::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleValidation {
    /// Failed rules, in rule order
    pub violations: Vec<Violation>,

    /// Non-fatal annotations
    pub warnings: Vec<String>,
}

impl RuleValidation {
    pub fn is_allowed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Check whether a specific rule failed
    pub fn has_violation(&self, rule: RuleId) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }
}

/// Evaluates the policy rule set
pub struct RuleValidator;

impl RuleValidator {
    /// Validate a parsed statement against the configuration
    pub fn validate(
        ast: &PolicyAst,
        statement_kind: StatementKind,
        statement_count: usize,
        safe_mode: &SafeModeConfig,
        policy: &PolicyConfig,
    ) -> RuleValidation {
        let mut result = RuleValidation::default();

        check_statement_count(statement_count, policy, &mut result);
        check_statement_kind(statement_kind, policy, &mut result);
        check_blocked_tables(ast, safe_mode, &mut result);
        check_select_star(ast, safe_mode, &mut result);

        if safe_mode.require_explain {
            result.warnings.push(REQUIRE_EXPLAIN_WARNING.to_string());
        }

        if !result.is_allowed() {
            debug!(
                violations = result.violations.len(),
                first = %result.violations[0].rule,
                "policy rules failed"
            );
        }

        result
    }
}

fn check_statement_count(count: usize, policy: &PolicyConfig, result: &mut RuleValidation) {
    if count > 1 && !policy.allow_multiple_statements {
        result.violations.push(
            Violation::new(
                RuleId::MultiStatement,
                format!("Multiple statements are not allowed (found {})", count),
            )
            .with_fix("Submit a single SQL statement"),
        );
    }
}

fn check_statement_kind(kind: StatementKind, policy: &PolicyConfig, result: &mut RuleValidation) {
    if policy.mode == PolicyMode::Safe && !kind.is_read() {
        result.violations.push(
            Violation::new(
                RuleId::StatementKind,
                format!(
                    "Only SELECT statements are allowed in safe mode (found {})",
                    kind.as_str().to_uppercase()
                ),
            )
            .with_fix("Rewrite the request as a read-only SELECT query"),
        );
    }
}

fn check_blocked_tables(ast: &PolicyAst, safe_mode: &SafeModeConfig, result: &mut RuleValidation) {
    if safe_mode.blocked_tables.is_empty() {
        return;
    }

    // One violation per blocked entry, even if referenced under several names
    let mut reported = BTreeSet::new();
    for table in ast.tables() {
        let Some(blocked) = safe_mode.is_table_blocked(&table.name, &table.base_name) else {
            continue;
        };
        if !reported.insert(blocked.to_lowercase()) {
            continue;
        }
        result.violations.push(
            Violation::new(
                RuleId::BlockedTable,
                format!("Table '{}' is blocked by policy", table.name),
            )
            .with_fix(format!("Remove references to '{}'", table.name)),
        );
    }
}

fn check_select_star(ast: &PolicyAst, safe_mode: &SafeModeConfig, result: &mut RuleValidation) {
    if !safe_mode.disallow_select_star {
        return;
    }

    let wildcards: Vec<String> = ast.wildcards().map(ToString::to_string).collect();
    if wildcards.is_empty() {
        return;
    }

    result.violations.push(
        Violation::new(
            RuleId::SelectStar,
            format!(
                "SELECT * is not allowed; found wildcard projection {}",
                wildcards.join(", ")
            ),
        )
        .with_fix("List the needed columns explicitly instead of *"),
    );
}
