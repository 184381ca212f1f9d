//! Policy engine
//!
//! Orchestrates parse, rule validation and limit rewriting for one session.
//! Configuration lives in an immutable snapshot behind an `Arc`; updates build
//! a new snapshot and swap it in, so every call works on one consistent view.

use std::sync::{Arc, PoisonError, RwLock};

use openquery_core::{
    ClassifiedValidation, ConfigError, ExplainData, ExplainEvaluation, PolicyConfig,
    PolicyConfigPatch, PolicyProfile, SafeModeConfig, SafeModeConfigPatch, ValidationResult,
};
use openquery_sql::{Classifier, LimitRewrite, LimitRewriter, SqlParser};
use tracing::{debug, info, warn};

use crate::explain::ExplainEvaluator;
use crate::rules::RuleValidator;

/// Details reported when SQL cannot be parsed
pub const PARSE_FAILURE_DETAILS: &str = "SQL could not be parsed";

/// Suggested fix for unparseable SQL
pub const PARSE_FAILURE_FIX: &str = "Check the SQL syntax and try again";

#[derive(Debug, Clone, PartialEq)]
struct EngineSnapshot {
    policy: PolicyConfig,

    /// Effective config: mode preset with `overrides` applied
    safe_mode: SafeModeConfig,

    /// Accumulated safe-mode overrides, reapplied on mode switches
    overrides: SafeModeConfigPatch,
}

impl EngineSnapshot {
    fn build(policy: PolicyConfig, overrides: SafeModeConfigPatch) -> Result<Self, ConfigError> {
        let safe_mode = SafeModeConfig::preset(policy.mode).merged(&overrides);
        safe_mode.validate()?;

        Ok(Self {
            policy,
            safe_mode,
            overrides,
        })
    }
}

/// Session-scoped policy engine
///
/// `Send + Sync`; share it behind an `Arc` across threads.
#[derive(Debug)]
pub struct PolicyEngine {
    snapshot: RwLock<Arc<EngineSnapshot>>,
}

impl PolicyEngine {
    /// Create an engine from a policy config and overrides on its mode preset
    pub fn new(policy: PolicyConfig, overrides: SafeModeConfigPatch) -> Result<Self, ConfigError> {
        let snapshot = EngineSnapshot::build(policy, overrides)?;

        info!(mode = %snapshot.policy.mode, "policy engine created");

        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Create an engine from a loaded profile
    pub fn from_profile(profile: &PolicyProfile) -> Result<Self, ConfigError> {
        Self::new(profile.policy.clone(), profile.safe_mode.clone())
    }

    /// Validate SQL against the current policy and bound its result size.
    ///
    /// Never fails: parse errors, rule violations and rewrite failures are all
    /// reported as a blocked [`ValidationResult`].
    pub fn validate_and_rewrite(&self, sql: &str) -> ValidationResult {
        let snapshot = self.current();

        let parsed = match SqlParser::from_dialect(snapshot.policy.dialect).parse(sql) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "rejected unparseable SQL");
                return ValidationResult::rejected(
                    e.to_string(),
                    PARSE_FAILURE_DETAILS,
                    PARSE_FAILURE_FIX,
                );
            }
        };

        let rules = RuleValidator::validate(
            &parsed.ast,
            parsed.statement_kind,
            parsed.statement_count,
            &snapshot.safe_mode,
            &snapshot.policy,
        );

        let mut warnings = rules.warnings;
        if !rules.violations.is_empty() {
            info!(
                rule = %rules.violations[0].rule,
                violations = rules.violations.len(),
                "statement blocked by policy"
            );
            return ValidationResult::violated(rules.violations, warnings);
        }

        let safe_mode = &snapshot.safe_mode;
        if !safe_mode.enforce_limit || !parsed.is_select() {
            return ValidationResult::allowed(parsed.normalized_sql, warnings);
        }

        let rewriter = LimitRewriter::new(snapshot.policy.dialect);
        let (default_limit, max_limit) = (safe_mode.default_limit, safe_mode.max_limit);
        let rewrites = if parsed.statement_count > 1 {
            rewriter.ensure_limits(&parsed.normalized_sql, default_limit, max_limit)
        } else {
            rewriter
                .ensure_limit(&parsed.normalized_sql, default_limit, max_limit)
                .map(|rewrite| vec![rewrite])
        };

        let rewrites = match rewrites {
            Ok(rewrites) => rewrites,
            Err(e) => {
                warn!(error = %e, "limit rewrite failed, blocking statement");
                return ValidationResult::rejected(
                    "Row limit could not be applied to the query",
                    e.to_string(),
                    "Add an explicit LIMIT clause and try again",
                );
            }
        };

        let stacked = rewrites.len() > 1;
        for (index, rewrite) in rewrites.iter().enumerate() {
            for warning in limit_warnings(rewrite, default_limit, max_limit) {
                if stacked {
                    warnings.push(format!("Statement {}: {}", index + 1, warning));
                } else {
                    warnings.push(warning);
                }
            }
        }

        let sql = rewrites
            .into_iter()
            .map(|rewrite| rewrite.rewritten_sql)
            .collect::<Vec<_>>()
            .join("; ");
        ValidationResult::allowed(sql, warnings)
    }

    /// Validate and classify the same SQL. The two are computed independently:
    /// a blocked statement still gets a classification.
    pub fn classify_and_validate(&self, sql: &str) -> ClassifiedValidation {
        ClassifiedValidation {
            validation: self.validate_and_rewrite(sql),
            classification: Classifier::classify(sql),
        }
    }

    /// Score EXPLAIN metrics for the rewritten statement
    pub fn evaluate_explain(&self, data: &ExplainData) -> ExplainEvaluation {
        ExplainEvaluator::evaluate(data, &self.current().safe_mode)
    }

    /// Copy of the current policy config
    pub fn config(&self) -> PolicyConfig {
        self.current().policy.clone()
    }

    /// Copy of the current effective safe-mode config
    pub fn safe_mode_config(&self) -> SafeModeConfig {
        self.current().safe_mode.clone()
    }

    /// Merge a policy update. Switching mode rebuilds the safe-mode config from
    /// the new preset with the accumulated overrides reapplied.
    ///
    /// On error the current configuration is left untouched.
    pub fn set_config(&self, patch: &PolicyConfigPatch) -> Result<(), ConfigError> {
        self.update(|current| {
            EngineSnapshot::build(current.policy.merged(patch), current.overrides.clone())
        })
    }

    /// Merge a safe-mode update on top of the accumulated overrides.
    ///
    /// On error the current configuration is left untouched.
    pub fn set_safe_mode_config(&self, patch: &SafeModeConfigPatch) -> Result<(), ConfigError> {
        self.update(|current| {
            EngineSnapshot::build(current.policy.clone(), current.overrides.combine(patch))
        })
    }

    fn current(&self) -> Arc<EngineSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    fn update<F>(&self, build: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&EngineSnapshot) -> Result<EngineSnapshot, ConfigError>,
    {
        // Held for write across the rebuild so concurrent updates do not drop each other
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let next = build(&**guard)?;

        if next.policy.mode != guard.policy.mode {
            info!(from = %guard.policy.mode, to = %next.policy.mode, "policy mode switched");
        } else {
            debug!("policy configuration updated");
        }

        *guard = Arc::new(next);
        Ok(())
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        let snapshot = EngineSnapshot {
            policy: PolicyConfig::default(),
            safe_mode: SafeModeConfig::default(),
            overrides: SafeModeConfigPatch::default(),
        };

        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }
}

/// Warnings describing what the limit rewrite changed
fn limit_warnings(rewrite: &LimitRewrite, default_limit: u64, max_limit: u64) -> Vec<String> {
    let mut warnings = Vec::new();
    if rewrite.limit_applied {
        warnings.push(format!("LIMIT {} injected to bound result size", default_limit));
    }
    if rewrite.clamped {
        let original = match (rewrite.original_limit, &rewrite.original_expression) {
            (Some(n), _) => n.to_string(),
            (None, Some(expr)) => format!("non-literal value {}", expr),
            (None, None) => "a non-literal value".to_string(),
        };
        warnings.push(format!(
            "LIMIT clamped from {} to {} (maximum allowed)",
            original, max_limit
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use openquery_core::{Classification, PolicyMode, RuleId, SqlDialect, Verdict};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    use crate::explain::SEQ_SCAN_WARNING;
    use crate::rules::REQUIRE_EXPLAIN_WARNING;

    fn standard_engine() -> PolicyEngine {
        PolicyEngine::new(
            PolicyConfig::for_mode(PolicyMode::Standard),
            SafeModeConfigPatch {
                default_limit: Some(100),
                max_limit: Some(1000),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn blocked(tables: &[&str]) -> SafeModeConfigPatch {
        SafeModeConfigPatch {
            blocked_tables: Some(tables.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>()),
            ..Default::default()
        }
    }

    #[test]
    fn injects_default_limit() {
        let engine = standard_engine();
        let result = engine.validate_and_rewrite("SELECT id FROM orders");

        assert!(result.is_allowed());
        assert_eq!(result.rewritten_sql(), Some("SELECT id FROM orders LIMIT 100"));
        assert_eq!(
            result.warnings,
            vec!["LIMIT 100 injected to bound result size".to_string()]
        );
    }

    #[test]
    fn clamps_large_limit() {
        let engine = standard_engine();
        let result = engine.validate_and_rewrite("SELECT id FROM orders LIMIT 50000");

        assert_eq!(result.rewritten_sql(), Some("SELECT id FROM orders LIMIT 1000"));
        assert_eq!(
            result.warnings,
            vec!["LIMIT clamped from 50000 to 1000 (maximum allowed)".to_string()]
        );
    }

    #[test]
    fn small_limit_left_alone() {
        let engine = standard_engine();
        let result = engine.validate_and_rewrite("select id from orders limit 10");

        assert!(result.is_allowed());
        assert_eq!(result.rewritten_sql(), Some("SELECT id FROM orders LIMIT 10"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn revalidating_rewritten_sql_is_idempotent() {
        let engine = PolicyEngine::default();

        let first = engine.validate_and_rewrite("SELECT id, total FROM orders");
        let rewritten = first.rewritten_sql().unwrap().to_string();
        let second = engine.validate_and_rewrite(&rewritten);

        assert!(second.is_allowed());
        assert_eq!(second.rewritten_sql(), Some(rewritten.as_str()));
        assert!(!second.warnings.iter().any(|w| w.contains("injected")));
        assert_eq!(second.warnings, vec![REQUIRE_EXPLAIN_WARNING.to_string()]);
    }

    #[test]
    fn parse_failure_is_blocked() {
        let engine = PolicyEngine::default();
        let result = engine.validate_and_rewrite("SELEC * FORM t");

        assert!(!result.is_allowed());
        assert!(result.rewritten_sql().is_none());
        assert!(result.reason().starts_with("SQL syntax error"));
        assert_eq!(result.details().as_deref(), Some(PARSE_FAILURE_DETAILS));
        assert_eq!(result.suggested_fix(), Some(PARSE_FAILURE_FIX));
    }

    #[test]
    fn empty_input_is_blocked() {
        let result = PolicyEngine::default().validate_and_rewrite("  -- nothing here\n");

        assert!(!result.is_allowed());
        assert_eq!(result.reason(), "No SQL statement found");
    }

    #[test]
    fn select_star_blocked_in_safe_mode() {
        let result = PolicyEngine::default().validate_and_rewrite("SELECT * FROM users");

        assert!(!result.is_allowed());
        assert_eq!(result.violations()[0].rule, RuleId::SelectStar);
        assert!(result.details().unwrap().starts_with("[SELECT_STAR]"));
        assert!(result.suggested_fix().is_some());
    }

    #[test]
    fn blocked_table_any_case() {
        let engine = standard_engine();
        engine.set_safe_mode_config(&blocked(&["payroll"])).unwrap();

        for sql in ["SELECT id FROM payroll", "SELECT id FROM PayRoll", "SELECT id FROM hr.PAYROLL"] {
            let result = engine.validate_and_rewrite(sql);
            assert!(!result.is_allowed(), "{} should be blocked", sql);
            assert_eq!(result.violations()[0].rule, RuleId::BlockedTable);
        }
    }

    #[test]
    fn writes_blocked_in_safe_mode_allowed_in_standard() {
        let safe = PolicyEngine::default();
        let result = safe.validate_and_rewrite("DELETE FROM orders WHERE id = 1");
        assert_eq!(result.violations()[0].rule, RuleId::StatementKind);

        let standard = standard_engine();
        let result = standard.validate_and_rewrite("DELETE FROM orders WHERE id = 1");
        assert!(result.is_allowed());
        assert_eq!(result.rewritten_sql(), Some("DELETE FROM orders WHERE id = 1"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn limit_not_enforced_when_disabled() {
        let engine = standard_engine();
        engine
            .set_safe_mode_config(&SafeModeConfigPatch {
                enforce_limit: Some(false),
                ..Default::default()
            })
            .unwrap();

        let result = engine.validate_and_rewrite("SELECT id FROM orders");
        assert_eq!(result.rewritten_sql(), Some("SELECT id FROM orders"));
    }

    #[test]
    fn allowed_multi_statement_limits_each_select() {
        let engine = standard_engine();
        engine
            .set_config(&PolicyConfigPatch {
                allow_multiple_statements: Some(true),
                ..Default::default()
            })
            .unwrap();

        let result = engine.validate_and_rewrite("SELECT id FROM orders; SELECT id FROM refunds");
        assert!(result.is_allowed());
        assert_eq!(
            result.rewritten_sql(),
            Some("SELECT id FROM orders LIMIT 100; SELECT id FROM refunds LIMIT 100")
        );
        assert_eq!(
            result.warnings,
            vec![
                "Statement 1: LIMIT 100 injected to bound result size".to_string(),
                "Statement 2: LIMIT 100 injected to bound result size".to_string(),
            ]
        );
    }

    #[test]
    fn allowed_multi_statement_clamps_only_oversized_select() {
        let engine = standard_engine();
        engine
            .set_config(&PolicyConfigPatch {
                allow_multiple_statements: Some(true),
                ..Default::default()
            })
            .unwrap();

        let sql = "SELECT id FROM orders LIMIT 10; SELECT id FROM refunds LIMIT 9999";
        let result = engine.validate_and_rewrite(sql);
        assert_eq!(
            result.rewritten_sql(),
            Some("SELECT id FROM orders LIMIT 10; SELECT id FROM refunds LIMIT 1000")
        );
        assert_eq!(
            result.warnings,
            vec!["Statement 2: LIMIT clamped from 9999 to 1000 (maximum allowed)".to_string()]
        );
    }

    #[test]
    fn clamp_warning_names_placeholder() {
        let engine = standard_engine();
        engine
            .set_config(&PolicyConfigPatch {
                dialect: Some(SqlDialect::Postgres),
                ..Default::default()
            })
            .unwrap();

        let result = engine.validate_and_rewrite("SELECT id FROM orders LIMIT $1");
        assert_eq!(result.rewritten_sql(), Some("SELECT id FROM orders LIMIT 1000"));
        assert_eq!(
            result.warnings,
            vec!["LIMIT clamped from non-literal value $1 to 1000 (maximum allowed)".to_string()]
        );
    }

    #[test]
    fn exponent_limit_reported_as_number() {
        let engine = standard_engine();
        let result = engine.validate_and_rewrite("SELECT id FROM orders LIMIT 1e9");

        assert_eq!(
            result.warnings,
            vec!["LIMIT clamped from 1000000000 to 1000 (maximum allowed)".to_string()]
        );
    }

    #[test]
    fn classification_independent_of_verdict() {
        let engine = PolicyEngine::default();
        let classified = engine.classify_and_validate("DROP TABLE orders");

        assert!(!classified.validation.is_allowed());
        assert_eq!(classified.classification.classification, Classification::Ddl);
    }

    #[test]
    fn explain_uses_current_thresholds() {
        let engine = PolicyEngine::default();
        let limit = engine.safe_mode_config().max_estimated_rows;

        assert!(engine.evaluate_explain(&ExplainData::new(limit, 1.0)).allowed);
        assert!(!engine.evaluate_explain(&ExplainData::new(limit + 1, 1.0)).allowed);

        let seq = engine.evaluate_explain(&ExplainData::new(10, 1.0).with_seq_scan(true));
        assert!(seq.allowed);
        assert_eq!(seq.warnings, vec![SEQ_SCAN_WARNING.to_string()]);
    }

    #[test]
    fn mode_switch_keeps_overrides() {
        let engine = PolicyEngine::default();
        engine
            .set_safe_mode_config(&SafeModeConfigPatch {
                default_limit: Some(50),
                max_limit: Some(500),
                ..Default::default()
            })
            .unwrap();
        engine.set_safe_mode_config(&blocked(&["secrets"])).unwrap();

        engine
            .set_config(&PolicyConfigPatch {
                mode: Some(PolicyMode::Standard),
                ..Default::default()
            })
            .unwrap();

        let config = engine.safe_mode_config();
        let standard = SafeModeConfig::standard();
        assert_eq!(engine.config().mode, PolicyMode::Standard);
        assert_eq!(config.default_limit, 50);
        assert_eq!(config.max_limit, 500);
        assert!(config.blocked_tables.contains("secrets"));
        assert_eq!(config.disallow_select_star, standard.disallow_select_star);
        assert_eq!(config.max_estimated_rows, standard.max_estimated_rows);
    }

    #[test]
    fn invalid_update_leaves_config_untouched() {
        let engine = PolicyEngine::default();
        let before = engine.safe_mode_config();

        let result = engine.set_safe_mode_config(&SafeModeConfigPatch {
            default_limit: Some(5000),
            ..Default::default()
        });

        assert!(result.is_err());
        assert_eq!(engine.safe_mode_config(), before);
    }

    #[test]
    fn config_reads_are_copies() {
        let engine = PolicyEngine::default();

        let mut copy = engine.safe_mode_config();
        copy.max_limit = 1;
        copy.blocked_tables.insert("orders".to_string());

        assert_eq!(engine.safe_mode_config(), SafeModeConfig::safe());
        assert!(engine.validate_and_rewrite("SELECT id FROM orders").is_allowed());
    }

    #[test]
    fn snapshot_taken_before_update_is_stable() {
        let engine = PolicyEngine::default();
        let before = engine.current();

        engine
            .set_config(&PolicyConfigPatch {
                mode: Some(PolicyMode::Standard),
                dialect: Some(SqlDialect::Postgres),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(before.policy.mode, PolicyMode::Safe);
        assert_eq!(before.safe_mode, SafeModeConfig::safe());
        assert_eq!(engine.config().dialect, SqlDialect::Postgres);
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PolicyEngine>();

        let engine = Arc::new(standard_engine());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let result = engine.validate_and_rewrite(&format!("SELECT id FROM t{}", i));
                    matches!(result.verdict, Verdict::Allowed { .. })
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
