//! SQL parsing using datafusion-sqlparser-rs
//!
//! Parses SQL into the policy AST plus statement metadata. Parsing either
//! fully succeeds or yields a [`ParseError`]; no partial AST is returned.

use openquery_core::{SqlDialect, StatementKind};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserError};
use tracing::debug;

use crate::ast::PolicyAst;

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Create a SQL parser for PostgreSQL
    pub fn postgres() -> Self {
        Self {
            dialect: Box::new(PostgreSqlDialect {}),
        }
    }

    /// Create a SQL parser for MySQL
    pub fn mysql() -> Self {
        Self {
            dialect: Box::new(MySqlDialect {}),
        }
    }

    /// Create a SQL parser for SQLite
    pub fn sqlite() -> Self {
        Self {
            dialect: Box::new(SQLiteDialect {}),
        }
    }

    /// Create a parser from a dialect config
    pub fn from_dialect(dialect: SqlDialect) -> Self {
        match dialect {
            SqlDialect::Generic => Self::new(),
            SqlDialect::Postgres => Self::postgres(),
            SqlDialect::MySql => Self::mysql(),
            SqlDialect::Sqlite => Self::sqlite(),
        }
    }

    /// Parse SQL into the policy AST
    pub fn parse(&self, sql: &str) -> Result<ParsedStatement, ParseError> {
        let statements = self.parse_statements(sql)?;

        if statements.is_empty() {
            return Err(ParseError::Empty);
        }

        let ast = PolicyAst::from_statements(&statements);
        let normalized_sql = statements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        debug!(
            statements = statements.len(),
            kind = %ast.statement_kind(),
            "parsed SQL"
        );

        Ok(ParsedStatement {
            statement_kind: ast.statement_kind(),
            statement_count: statements.len(),
            ast,
            normalized_sql,
        })
    }

    /// Parse SQL into raw sqlparser statements
    pub(crate) fn parse_statements(&self, sql: &str) -> Result<Vec<Statement>, ParseError> {
        Parser::parse_sql(&*self.dialect, sql).map_err(ParseError::from)
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Successfully parsed SQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    /// Structural form inspected by the rules
    pub ast: PolicyAst,

    /// Aggregate kind: the first non-SELECT statement's kind, else SELECT
    pub statement_kind: StatementKind,

    /// Number of top-level statements
    pub statement_count: usize,

    /// Canonical re-serialization; all later stages work on this text
    pub normalized_sql: String,
}

impl ParsedStatement {
    /// Check if this is a read-only SELECT
    pub fn is_select(&self) -> bool {
        self.statement_kind.is_read()
    }
}

/// SQL parsing error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("SQL syntax error: {0}")]
    Syntax(String),

    #[error("SQL is nested too deeply to analyse")]
    TooDeep,

    #[error("No SQL statement found")]
    Empty,
}

impl From<ParserError> for ParseError {
    fn from(error: ParserError) -> Self {
        match error {
            ParserError::ParserError(message) | ParserError::TokenizerError(message) => {
                Self::Syntax(message)
            }
            ParserError::RecursionLimitExceeded => Self::TooDeep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::new();
        let parsed = parser.parse("select id, name from users where active = true").unwrap();

        assert_eq!(parsed.statement_count, 1);
        assert!(parsed.is_select());
        assert_eq!(
            parsed.normalized_sql,
            "SELECT id, name FROM users WHERE active = true"
        );
    }

    #[test]
    fn parse_counts_stacked_statements() {
        let parser = SqlParser::new();
        let parsed = parser.parse("SELECT 1; DELETE FROM users").unwrap();

        assert_eq!(parsed.statement_count, 2);
        assert_eq!(parsed.statement_kind, StatementKind::Delete);
        assert_eq!(parsed.normalized_sql, "SELECT 1; DELETE FROM users");
    }

    #[test]
    fn parse_invalid_sql() {
        let parser = SqlParser::new();
        let error = parser.parse("SELEC * FORM t").unwrap_err();

        assert!(matches!(error, ParseError::Syntax(_)));
        assert!(error.to_string().starts_with("SQL syntax error"));
    }

    #[test]
    fn parse_empty_input() {
        let parser = SqlParser::new();

        assert_eq!(parser.parse("").unwrap_err(), ParseError::Empty);
        assert_eq!(parser.parse("   ").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn different_dialects() {
        let sql = "SELECT id FROM users";

        for dialect in [
            SqlDialect::Generic,
            SqlDialect::Postgres,
            SqlDialect::MySql,
            SqlDialect::Sqlite,
        ] {
            let parsed = SqlParser::from_dialect(dialect).parse(sql).unwrap();
            assert!(parsed.is_select());
        }
    }

    #[test]
    fn whitespace_and_case_variants_normalize_identically() {
        let parser = SqlParser::new();
        let a = parser.parse("SELECT id FROM orders").unwrap();
        let b = parser.parse("  select   id\n  from orders  ").unwrap();

        assert_eq!(a.normalized_sql, b.normalized_sql);
    }
}
