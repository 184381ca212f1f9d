//! Statement intent classification
//!
//! Labels SQL as read / write / ddl / other without consulting any policy.
//! Parsed input is classified structurally; text the parser rejects falls back
//! to its leading keyword so callers still get a label for diagnostics.

use openquery_core::{Classification, ClassificationResult};
use regex::Regex;

use crate::parser::SqlParser;

/// Config-independent SQL classifier
pub struct Classifier;

impl Classifier {
    /// Classify SQL text. Multi-statement input gets the most dangerous label.
    pub fn classify(sql: &str) -> ClassificationResult {
        let classification = match SqlParser::new().parse(sql) {
            Ok(parsed) => parsed
                .ast
                .statements
                .iter()
                .map(|statement| statement.kind.classification())
                .max()
                .unwrap_or(Classification::Other),
            Err(_) => Self::classify_keyword(sql),
        };

        ClassificationResult { classification }
    }

    /// Classify by the first keyword, skipping leading comments and parentheses
    fn classify_keyword(sql: &str) -> Classification {
        let Ok(re) = Regex::new(r"^(?:\s|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/|\()*([A-Za-z]+)") else {
            return Classification::Other;
        };

        let Some(keyword) = re.captures(sql).and_then(|caps| caps.get(1)) else {
            return Classification::Other;
        };

        match keyword.as_str().to_ascii_uppercase().as_str() {
            "SELECT" | "VALUES" | "TABLE" => Classification::Read,
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "UPSERT" | "REPLACE" | "COPY" => {
                Classification::Write
            }
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "GRANT" | "REVOKE"
            | "COMMENT" => Classification::Ddl,
            _ => Classification::Other,
        }
    }
}
