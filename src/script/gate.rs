//! Dry-run gate: turns a statement plan into an execution plan.
//!
//! In dry-run mode every mutating statement is replaced by a read-only
//! `SELECT count()` over the same row-selection predicate, so the store sees
//! no mutation at all. The substitution is derived from the statement's
//! selection predicate, not from its literal text, and the gate fails closed:
//! a mutating statement whose target table or predicate cannot be extracted
//! with confidence is refused rather than guessed at.

use super::{
    error::{ClassificationError, preview},
    planner::{StatementPlan, StatementRole},
};

/// How a step is sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Mutating statement, executed with synchronous completion.
    Mutation,
    /// Read-only count query standing in for a mutation (dry-run).
    CountProbe,
    /// Informational query from the script, read-only in every mode.
    Query,
}

/// One executable step of a run.
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub role: StatementRole,
    pub kind: StepKind,
    pub sql: String,
}

/// The executable form of a statement plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub dry_run: bool,
    steps: Vec<ExecutionStep>,
}

impl ExecutionPlan {
    /// Build an execution plan from a parsed statement plan.
    ///
    /// With `dry_run` false the statements pass through unchanged.
    pub fn build(plan: &StatementPlan, dry_run: bool) -> Result<Self, ClassificationError> {
        let mut steps = Vec::with_capacity(plan.len());

        for stmt in plan.iter() {
            let step = match (stmt.role.is_mutating(), dry_run) {
                (false, _) => ExecutionStep {
                    role: stmt.role,
                    kind: StepKind::Query,
                    sql: stmt.sql.clone(),
                },
                (true, false) => ExecutionStep {
                    role: stmt.role,
                    kind: StepKind::Mutation,
                    sql: stmt.sql.clone(),
                },
                (true, true) => {
                    let selection = extract_selection(&stmt.sql, stmt.role)?;
                    ExecutionStep {
                        role: stmt.role,
                        kind: StepKind::CountProbe,
                        sql: selection.count_query(),
                    }
                }
            };
            steps.push(step);
        }

        Ok(Self { dry_run, steps })
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    /// Steps carrying the given role.
    pub fn steps_for(&self, role: StatementRole) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(move |s| s.role == role)
    }
}

/// Target table and row-selection predicate of a mutating statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub table: String,
    pub predicate: String,
}

impl Selection {
    /// Read-only count query over the same rows the mutation would touch.
    pub fn count_query(&self) -> String {
        format!("SELECT count() FROM {} WHERE {}", self.table, self.predicate)
    }
}

/// Extract the target table and `WHERE` predicate from a mutating statement.
///
/// The scan is lexical: it walks the statement outside quoted literals and
/// only honors keywords at parenthesis depth zero, so a `FROM` inside an
/// `s3(...)` URL or a quoted literal never confuses it.
pub(crate) fn extract_selection(
    sql: &str,
    role: StatementRole,
) -> Result<Selection, ClassificationError> {
    let tokens = top_level_tokens(sql);
    let upper: Vec<&str> = tokens.iter().map(|t| t.upper.as_str()).collect();

    let table = match role {
        // ALTER TABLE <t> UPDATE ... | UPDATE <t> SET ...
        StatementRole::Mark => match upper.as_slice() {
            ["ALTER", "TABLE", ..] => tokens.get(2),
            ["UPDATE", ..] => tokens.get(1),
            _ => None,
        },
        // ALTER TABLE <t> DELETE ... | DELETE FROM <t> ...
        StatementRole::Delete => match upper.as_slice() {
            ["ALTER", "TABLE", ..] => tokens.get(2),
            ["DELETE", "FROM", ..] => tokens.get(2),
            _ => None,
        },
        // INSERT INTO FUNCTION ... SELECT ... FROM <t> ...
        StatementRole::Export => upper
            .iter()
            .position(|w| *w == "FROM")
            .and_then(|i| tokens.get(i + 1)),
        StatementRole::Query => None,
    };

    let table = table
        .filter(|t| is_table_name(&t.text))
        .ok_or_else(|| ClassificationError::MissingTarget {
            preview: preview(sql),
        })?;

    let where_idx =
        upper
            .iter()
            .position(|w| *w == "WHERE")
            .ok_or_else(|| ClassificationError::MissingPredicate {
                preview: preview(sql),
            })?;

    // The predicate runs from just past WHERE to the next top-level SETTINGS
    // clause, if any, or the end of the statement.
    let start = tokens[where_idx].end;
    let end = upper
        .iter()
        .skip(where_idx + 1)
        .position(|w| *w == "SETTINGS")
        .map(|off| tokens[where_idx + 1 + off].start)
        .unwrap_or(sql.len());

    let predicate = sql[start..end].trim();
    if predicate.is_empty() {
        return Err(ClassificationError::EmptyPredicate {
            preview: preview(sql),
        });
    }

    Ok(Selection {
        table: table.text.clone(),
        predicate: predicate.to_string(),
    })
}

struct Token {
    text: String,
    upper: String,
    start: usize,
    end: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Keywords that can never be a table name; seeing one where a table is
/// expected (e.g. after `FROM (subquery)`) means extraction failed.
const RESERVED: &[&str] = &["SELECT", "FROM", "WHERE", "SETTINGS", "UPDATE", "DELETE", "AS"];

fn is_table_name(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(is_word_char)
        && !text.chars().all(|c| c.is_numeric())
        && !RESERVED.contains(&text.to_ascii_uppercase().as_str())
}

/// Word tokens at parenthesis depth zero, outside quoted literals.
fn top_level_tokens(sql: &str) -> Vec<Token> {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
        Backtick,
    }

    let mut tokens = Vec::new();
    let mut mode = Mode::Plain;
    let mut depth: u32 = 0;
    let mut current: Option<usize> = None;

    let push = |tokens: &mut Vec<Token>, start: usize, end: usize| {
        let text = &sql[start..end];
        tokens.push(Token {
            text: text.to_string(),
            upper: text.to_ascii_uppercase(),
            start,
            end,
        });
    };

    let mut iter = sql.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        match mode {
            Mode::Plain => {
                if depth == 0 && is_word_char(c) {
                    if current.is_none() {
                        current = Some(i);
                    }
                    continue;
                }
                if let Some(start) = current.take() {
                    push(&mut tokens, start, i);
                }
                match c {
                    '\'' => mode = Mode::Single,
                    '"' => mode = Mode::Double,
                    '`' => mode = Mode::Backtick,
                    '(' => depth += 1,
                    ')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
            Mode::Single => match c {
                '\\' => {
                    iter.next();
                }
                '\'' => {
                    if iter.peek().map(|(_, n)| *n) == Some('\'') {
                        iter.next();
                    } else {
                        mode = Mode::Plain;
                    }
                }
                _ => {}
            },
            Mode::Double => match c {
                '\\' => {
                    iter.next();
                }
                '"' => mode = Mode::Plain,
                _ => {}
            },
            Mode::Backtick => {
                if c == '`' {
                    mode = Mode::Plain;
                }
            }
        }
    }
    if let Some(start) = current.take() {
        push(&mut tokens, start, sql.len());
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::planner::StatementPlan;

    const MARK: &str =
        "ALTER TABLE db.t UPDATE exported = 1 WHERE exported = 0 SETTINGS mutations_sync = 2";
    const EXPORT: &str = "INSERT INTO FUNCTION s3('https://e/b/k.parquet', 'ak', 'sk', 'Parquet') SELECT * FROM db.t WHERE exported = 1";
    const DELETE: &str =
        "ALTER TABLE db.t DELETE WHERE exported = 1 SETTINGS mutations_sync = 2";

    fn full_script() -> String {
        format!("SELECT count() FROM db.t;\n{MARK};\n{EXPORT};\n{DELETE};\n")
    }

    #[test]
    fn extracts_selection_from_alter_update() {
        let sel = extract_selection(MARK, StatementRole::Mark).unwrap();
        assert_eq!(sel.table, "db.t");
        assert_eq!(sel.predicate, "exported = 0");
        assert_eq!(
            sel.count_query(),
            "SELECT count() FROM db.t WHERE exported = 0"
        );
    }

    #[test]
    fn extracts_selection_from_insert_into_function() {
        let sel = extract_selection(EXPORT, StatementRole::Export).unwrap();
        assert_eq!(sel.table, "db.t");
        assert_eq!(sel.predicate, "exported = 1");
    }

    #[test]
    fn from_inside_function_url_is_ignored() {
        // The s3() URL contains "FROM"-looking text inside quotes and parens.
        let sql = "INSERT INTO FUNCTION s3('https://host/FROM/fake', 'k', 's', 'Parquet') SELECT * FROM db.real WHERE exported = 1";
        let sel = extract_selection(sql, StatementRole::Export).unwrap();
        assert_eq!(sel.table, "db.real");
    }

    #[test]
    fn extracts_selection_from_alter_delete() {
        let sel = extract_selection(DELETE, StatementRole::Delete).unwrap();
        assert_eq!(sel.table, "db.t");
        assert_eq!(sel.predicate, "exported = 1");
    }

    #[test]
    fn multiline_statement_predicate_is_preserved() {
        let sql = "ALTER TABLE db.t\n    UPDATE exported = 1\n    WHERE exported = 0\n      AND ts < now()";
        let sel = extract_selection(sql, StatementRole::Mark).unwrap();
        assert_eq!(sel.predicate, "exported = 0\n      AND ts < now()");
    }

    #[test]
    fn missing_where_fails_closed() {
        let err = extract_selection("ALTER TABLE db.t DELETE", StatementRole::Delete).unwrap_err();
        assert!(matches!(err, ClassificationError::MissingPredicate { .. }));
    }

    #[test]
    fn missing_table_fails_closed() {
        let err = extract_selection(
            "INSERT INTO FUNCTION s3('u', 'k', 's', 'Parquet') SELECT 1 WHERE 1",
            StatementRole::Export,
        )
        .unwrap_err();
        assert!(matches!(err, ClassificationError::MissingTarget { .. }));
    }

    #[test]
    fn dry_run_plan_substitutes_every_mutation() {
        let plan = StatementPlan::parse(&full_script()).unwrap();
        let exec = ExecutionPlan::build(&plan, true).unwrap();

        assert!(exec.dry_run);
        assert_eq!(exec.steps().len(), 4);
        assert_eq!(exec.steps()[0].kind, StepKind::Query);
        for step in &exec.steps()[1..] {
            assert_eq!(step.kind, StepKind::CountProbe);
            assert!(step.sql.starts_with("SELECT count() FROM db.t WHERE "));
        }
    }

    #[test]
    fn live_plan_passes_statements_through_unchanged() {
        let plan = StatementPlan::parse(&full_script()).unwrap();
        let exec = ExecutionPlan::build(&plan, false).unwrap();

        assert!(!exec.dry_run);
        assert_eq!(exec.steps()[1].kind, StepKind::Mutation);
        assert_eq!(exec.steps()[1].sql, MARK);
        assert_eq!(exec.steps()[2].sql, EXPORT);
        assert_eq!(exec.steps()[3].sql, DELETE);
    }

    #[test]
    fn steps_for_filters_by_role() {
        let plan = StatementPlan::parse(&full_script()).unwrap();
        let exec = ExecutionPlan::build(&plan, false).unwrap();
        assert_eq!(exec.steps_for(StatementRole::Export).count(), 1);
        assert_eq!(exec.steps_for(StatementRole::Query).count(), 1);
    }

    #[test]
    fn dry_run_build_fails_closed_on_unextractable_mutation() {
        let plan = StatementPlan::parse("ALTER TABLE db.t DELETE;").unwrap();
        let err = ExecutionPlan::build(&plan, true).unwrap_err();
        assert!(matches!(err, ClassificationError::MissingPredicate { .. }));
    }
}
