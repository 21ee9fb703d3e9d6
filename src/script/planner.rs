//! Statement planning: classification and ordering of lifecycle scripts.
//!
//! A lifecycle script is an ordered sequence of SQL statements. The planner
//! classifies each statement by its leading keyword pattern, rejects anything
//! it cannot classify (rather than letting an unrecognized mutation slip
//! through as a read-only query), and validates that the mutating statements
//! appear in mark, export, delete order.

use serde::{Deserialize, Serialize};

use super::{
    error::{ParseError, preview},
    lexer::split_statements,
};

/// The role a statement plays in the export-and-purge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementRole {
    /// Claims unexported rows by flipping their marker (`ALTER ... UPDATE`).
    Mark,
    /// Writes the claimed rows to the object sink (`INSERT INTO FUNCTION`).
    Export,
    /// Removes the claimed rows from the hot store (`ALTER ... DELETE`).
    Delete,
    /// Read-only informational query, executed as-is in every mode.
    Query,
}

impl StatementRole {
    /// Mutating roles participate in the lifecycle ordering and are
    /// substituted with count probes in dry-run mode.
    pub fn is_mutating(self) -> bool {
        !matches!(self, StatementRole::Query)
    }

    fn rank(self) -> Option<u8> {
        match self {
            StatementRole::Mark => Some(0),
            StatementRole::Export => Some(1),
            StatementRole::Delete => Some(2),
            StatementRole::Query => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            StatementRole::Mark => "mark",
            StatementRole::Export => "export",
            StatementRole::Delete => "delete",
            StatementRole::Query => "query",
        }
    }
}

impl std::fmt::Display for StatementRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One classified statement in a plan.
#[derive(Debug, Clone)]
pub struct PlannedStatement {
    pub role: StatementRole,
    pub sql: String,
}

/// Immutable ordered statement plan for a single run.
///
/// The plan is read-only after parsing; execution never mutates it.
#[derive(Debug, Clone)]
pub struct StatementPlan {
    statements: Vec<PlannedStatement>,
}

impl StatementPlan {
    /// Parse and classify a script into a plan.
    pub fn parse(script: &str) -> Result<Self, ParseError> {
        let mut statements = Vec::new();
        let mut last_mutation: Option<StatementRole> = None;

        for sql in split_statements(script)? {
            let role = classify(&sql)?;

            if let Some(rank) = role.rank() {
                if let Some(prev) = last_mutation
                    && prev.rank().is_some_and(|p| rank < p)
                {
                    return Err(ParseError::OutOfOrder {
                        found: role.to_string(),
                        after: prev.to_string(),
                    });
                }
                last_mutation = Some(role);
            }

            statements.push(PlannedStatement { role, sql });
        }

        Ok(Self { statements })
    }

    /// Number of parsed statements, for caller sanity checks against
    /// silent truncation.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Assert the plan holds exactly `expected` statements.
    pub fn expect_len(&self, expected: usize) -> Result<(), ParseError> {
        if self.statements.len() != expected {
            return Err(ParseError::StatementCountMismatch {
                expected,
                actual: self.statements.len(),
            });
        }
        Ok(())
    }

    pub fn statements(&self) -> &[PlannedStatement] {
        &self.statements
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedStatement> {
        self.statements.iter()
    }
}

/// Leading keywords that are read-only and safe in every mode.
const QUERY_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXISTS", "EXPLAIN"];

/// Classify a statement by its leading keyword pattern.
///
/// Unrecognized leading keywords are rejected outright. Treating an unknown
/// statement as an informational query would execute it unconditionally,
/// which is exactly the mistake this engine exists to prevent.
pub(crate) fn classify(sql: &str) -> Result<StatementRole, ParseError> {
    let words = leading_words(sql, 4);
    let first = words.first().map(String::as_str).unwrap_or("");

    if QUERY_KEYWORDS.contains(&first) {
        return Ok(StatementRole::Query);
    }

    let role = match first {
        "UPDATE" => Some(StatementRole::Mark),
        "DELETE" => Some(StatementRole::Delete),
        "ALTER" => {
            // ALTER TABLE <t> UPDATE ... / ALTER TABLE <t> DELETE ...
            match words.get(3).map(String::as_str) {
                Some("UPDATE") => Some(StatementRole::Mark),
                Some("DELETE") => Some(StatementRole::Delete),
                _ => None,
            }
        }
        "INSERT" => {
            // Only the external-sink form (INSERT INTO FUNCTION ...) is an
            // export; a plain INSERT INTO <table> has no place in this
            // lifecycle and is rejected below.
            if words.get(1).map(String::as_str) == Some("INTO")
                && words.get(2).map(String::as_str) == Some("FUNCTION")
            {
                Some(StatementRole::Export)
            } else {
                None
            }
        }
        _ => None,
    };

    role.ok_or_else(|| ParseError::UnsupportedStatement {
        keyword: if first.is_empty() {
            "<empty>".to_string()
        } else {
            first.to_string()
        },
        preview: preview(sql),
    })
}

/// Uppercased leading word tokens of a statement.
fn leading_words(sql: &str, n: usize) -> Vec<String> {
    sql.split_whitespace()
        .take(n)
        .map(|w| w.to_ascii_uppercase())
        .collect()
}
