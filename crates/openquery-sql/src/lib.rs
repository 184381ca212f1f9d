//! SQL parsing and analysis for the policy engine
//!
//! This crate handles:
//! - Parsing SQL using datafusion-sqlparser-rs into a small policy AST
//! - Classifying statement intent (read / write / ddl / other)
//! - Injecting or clamping the outermost row limit of a SELECT

pub mod ast;
pub mod classifier;
pub mod parser;
pub mod rewriter;

pub use ast::{LimitClause, LimitValue, PolicyAst, StatementNode, TableRef, WildcardProjection};
pub use classifier::Classifier;
pub use parser::{ParseError, ParsedStatement, SqlParser};
pub use rewriter::{LimitRewrite, LimitRewriter, RewriteError};
