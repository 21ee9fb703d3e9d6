//! Lexical pass over lifecycle scripts.
//!
//! Splits a raw script into `;`-terminated statements, stripping `--` line
//! comments on the way. Comment detection and statement splitting are both
//! scoped to text outside quoted literals, so a `--` or `;` inside a string
//! literal never truncates or splits a statement.

use super::error::{ParseError, preview};

/// Lexer state while walking the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Plain statement text.
    Plain,
    /// Inside a `--` comment, until end of line.
    LineComment,
    /// Inside a `'...'` string literal.
    SingleQuoted,
    /// Inside a `"..."` quoted identifier.
    DoubleQuoted,
    /// Inside a `` `...` `` quoted identifier.
    Backticked,
}

/// Split script text into trimmed statement bodies.
///
/// Every statement must be terminated by `;`. Trailing non-whitespace text
/// without a terminator is an error rather than an implicit final statement:
/// a silently accepted fragment usually means the script was truncated.
pub fn split_statements(script: &str) -> Result<Vec<String>, ParseError> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut mode = Mode::Plain;

    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    mode = Mode::LineComment;
                }
                ';' => {
                    let body = current.trim();
                    if !body.is_empty() {
                        statements.push(body.to_string());
                    }
                    current.clear();
                }
                '\'' => {
                    mode = Mode::SingleQuoted;
                    current.push(c);
                }
                '"' => {
                    mode = Mode::DoubleQuoted;
                    current.push(c);
                }
                '`' => {
                    mode = Mode::Backticked;
                    current.push(c);
                }
                _ => current.push(c),
            },
            Mode::LineComment => {
                if c == '\n' {
                    // The newline survives as statement whitespace.
                    current.push('\n');
                    mode = Mode::Plain;
                }
            }
            Mode::SingleQuoted => {
                current.push(c);
                match c {
                    '\\' => {
                        // Backslash escape: consume the next character verbatim.
                        if let Some(escaped) = chars.next() {
                            current.push(escaped);
                        }
                    }
                    '\'' => {
                        // Doubled quote stays inside the literal.
                        if chars.peek() == Some(&'\'') {
                            current.push(chars.next().unwrap_or('\''));
                        } else {
                            mode = Mode::Plain;
                        }
                    }
                    _ => {}
                }
            }
            Mode::DoubleQuoted => {
                current.push(c);
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            current.push(escaped);
                        }
                    }
                    '"' => {
                        if chars.peek() == Some(&'"') {
                            current.push(chars.next().unwrap_or('"'));
                        } else {
                            mode = Mode::Plain;
                        }
                    }
                    _ => {}
                }
            }
            Mode::Backticked => {
                current.push(c);
                if c == '`' {
                    mode = Mode::Plain;
                }
            }
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        return Err(ParseError::UnterminatedStatement {
            preview: preview(trailing),
        });
    }

    if statements.is_empty() {
        return Err(ParseError::EmptyScript);
    }

    Ok(statements)
}
