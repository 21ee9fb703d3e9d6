use thiserror::Error;

/// Errors produced while turning raw script text into a statement plan.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("script contains no statements after comment stripping")]
    EmptyScript,

    #[error("unterminated statement (missing ';'): {preview}")]
    UnterminatedStatement { preview: String },

    #[error("unsupported statement kind '{keyword}': {preview}")]
    UnsupportedStatement { keyword: String, preview: String },

    #[error("{found} statement appears after {after}; expected mark, export, delete order")]
    OutOfOrder { found: String, after: String },

    #[error("unknown template variable '{{{{ {name} }}}}'")]
    UnknownTemplateVar { name: String },

    #[error("template variable '{{{{ {name} }}}}' has no configured value")]
    MissingTemplateValue { name: String },

    #[error("script contains {actual} statements, expected {expected}")]
    StatementCountMismatch { expected: usize, actual: usize },
}

/// Errors produced when an execution plan cannot be built safely.
///
/// These are always fatal: rather than guess at a statement's selection
/// predicate and risk an unintended mutation, the gate refuses to run it.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("cannot identify target table in statement: {preview}")]
    MissingTarget { preview: String },

    #[error("statement has no WHERE clause to derive a count probe from: {preview}")]
    MissingPredicate { preview: String },

    #[error("statement has an empty selection predicate: {preview}")]
    EmptyPredicate { preview: String },
}

/// Clip a statement to a short single-line preview for error messages.
pub(crate) fn preview(sql: &str) -> String {
    const MAX: usize = 80;
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > MAX {
        let clipped: String = flat.chars().take(MAX).collect();
        format!("{clipped}...")
    } else {
        flat
    }
}
