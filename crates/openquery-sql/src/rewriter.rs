//! Row-limit rewriting
//!
//! Bounds the result size of a read statement by injecting or clamping the
//! outermost LIMIT (or FETCH FIRST) clause. Nested subqueries and the arms of
//! set operations are left alone; only the final result set is bounded.

use openquery_core::SqlDialect;
use sqlparser::ast::{Expr, Query, SetExpr, Statement, Value};
use tracing::debug;

use crate::ast::{fetch_value, limit_value, LimitValue};
use crate::parser::SqlParser;

/// Result of [`LimitRewriter::ensure_limit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitRewrite {
    pub rewritten_sql: String,

    /// A LIMIT was injected because none was present
    pub limit_applied: bool,

    /// An existing limit was reduced to the maximum
    pub clamped: bool,

    /// Literal limit before clamping; `None` when the limit was an expression
    pub original_limit: Option<u64>,

    /// Text of a non-literal limit that was replaced (`$1`, `10 * 10`)
    pub original_expression: Option<String>,
}

impl LimitRewrite {
    fn unchanged(sql: &str) -> Self {
        Self {
            rewritten_sql: sql.to_string(),
            limit_applied: false,
            clamped: false,
            original_limit: None,
            original_expression: None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        !self.limit_applied && !self.clamped
    }
}

/// Rewriter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("Normalized SQL could not be re-parsed: {0}")]
    Reparse(String),

    #[error("Row limits apply to a single SELECT statement, found {0}")]
    NotASelect(String),
}

/// Injects or clamps the outermost row limit of a SELECT
pub struct LimitRewriter {
    dialect: SqlDialect,
}

impl LimitRewriter {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Bound `normalized_sql` to at most `max_limit` rows, adding
    /// `LIMIT default_limit` when no limiting clause is present
    pub fn ensure_limit(
        &self,
        normalized_sql: &str,
        default_limit: u64,
        max_limit: u64,
    ) -> Result<LimitRewrite, RewriteError> {
        let mut statements = self.reparse(normalized_sql)?;

        if statements.len() != 1 {
            return Err(RewriteError::NotASelect(format!("{} statements", statements.len())));
        }

        let rewrite = bound_statement(&mut statements[0], default_limit, max_limit)?;
        if rewrite.is_unchanged() {
            return Ok(LimitRewrite::unchanged(normalized_sql));
        }
        Ok(rewrite)
    }

    /// Bound every statement of stacked SELECT input independently.
    ///
    /// Returns one rewrite per statement, in order; each `rewritten_sql` holds
    /// that statement alone. Fails if any statement is not a SELECT.
    pub fn ensure_limits(
        &self,
        normalized_sql: &str,
        default_limit: u64,
        max_limit: u64,
    ) -> Result<Vec<LimitRewrite>, RewriteError> {
        self.reparse(normalized_sql)?
            .iter_mut()
            .map(|statement| bound_statement(statement, default_limit, max_limit))
            .collect()
    }

    fn reparse(&self, sql: &str) -> Result<Vec<Statement>, RewriteError> {
        SqlParser::from_dialect(self.dialect)
            .parse_statements(sql)
            .map_err(|e| RewriteError::Reparse(e.to_string()))
    }
}

/// Inject or clamp the limit of one statement, re-serializing it
fn bound_statement(
    statement: &mut Statement,
    default_limit: u64,
    max_limit: u64,
) -> Result<LimitRewrite, RewriteError> {
    let query = match statement {
        Statement::Query(query) if is_plain_select(query) => query,
        other => {
            let keyword = other.to_string();
            let keyword = keyword.split_whitespace().next().unwrap_or_default().to_string();
            return Err(RewriteError::NotASelect(keyword));
        }
    };

    let original = if let Some(limit) = query.limit.as_mut() {
        match limit_value(limit) {
            LimitValue::Count(n) if n <= max_limit => None,
            original => {
                *limit = number(max_limit);
                Some(original)
            }
        }
    } else if let Some(fetch) = query.fetch.as_mut() {
        match fetch_value(fetch) {
            LimitValue::Count(n) if n <= max_limit => None,
            original => {
                fetch.quantity = Some(number(max_limit));
                fetch.percent = false;
                Some(original)
            }
        }
    } else {
        query.limit = Some(number(default_limit));

        let rewritten_sql = statement.to_string();
        debug!(limit = default_limit, "injected row limit");
        return Ok(LimitRewrite {
            rewritten_sql,
            limit_applied: true,
            clamped: false,
            original_limit: None,
            original_expression: None,
        });
    };

    let rewritten_sql = statement.to_string();
    let Some(original) = original else {
        return Ok(LimitRewrite::unchanged(&rewritten_sql));
    };

    let (original_limit, original_expression) = match original {
        LimitValue::Count(n) => (Some(n), None),
        LimitValue::Expression(expr) => (None, Some(expr)),
    };
    debug!(
        original_limit = ?original_limit,
        original_expression = ?original_expression,
        max = max_limit,
        "clamped row limit"
    );

    Ok(LimitRewrite {
        rewritten_sql,
        limit_applied: false,
        clamped: true,
        original_limit,
        original_expression,
    })
}

fn is_plain_select(query: &Query) -> bool {
    !matches!(query.body.as_ref(), SetExpr::Insert(_) | SetExpr::Update(_))
}

fn number(n: u64) -> Expr {
    Expr::Value(Value::Number(n.to_string(), false))
}
