//! Template variable substitution for lifecycle scripts.
//!
//! Scripts carry `{{ name }}` placeholders for sink addressing and
//! credentials. Substitution happens exactly once, on the raw text, before
//! statement splitting; the placeholder syntax shares no characters with
//! comment or statement-boundary syntax, so an unexpanded placeholder can
//! never be mistaken for either.

use std::collections::HashMap;

use regex::Regex;

use super::error::ParseError;

/// Values substituted into a script before parsing.
///
/// The endpoint is stored without a protocol prefix: ClickHouse's `s3()`
/// table function takes a full URL, so scripts write
/// `'https://{{ s3_endpoint }}/...'` and supply the scheme themselves.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub s3_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    /// Engine-generated artifact key for this run.
    pub s3_key: Option<String>,
}

impl TemplateVars {
    /// Strip an `http://` or `https://` prefix from an endpoint URL.
    pub fn strip_protocol(endpoint: &str) -> String {
        endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }

    fn values(&self) -> HashMap<&'static str, Option<&str>> {
        HashMap::from([
            ("s3_endpoint", self.s3_endpoint.as_deref()),
            ("s3_bucket", self.s3_bucket.as_deref()),
            ("s3_access_key", self.s3_access_key.as_deref()),
            ("s3_secret_key", self.s3_secret_key.as_deref()),
            ("s3_key", self.s3_key.as_deref()),
        ])
    }

    /// Substitute every placeholder in `script`.
    ///
    /// Unknown placeholder names and known names without a configured value
    /// are both errors: a placeholder surviving into the parser would end up
    /// inside statement text sent to the store.
    pub fn apply(&self, script: &str) -> Result<String, ParseError> {
        // Unwrap: the pattern is a compile-time constant.
        let placeholder = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
        let values = self.values();

        let mut out = String::with_capacity(script.len());
        let mut last_end = 0;
        for cap in placeholder.captures_iter(script) {
            let whole = cap.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let name = &cap[1];

            let value = match values.get(name) {
                None => {
                    return Err(ParseError::UnknownTemplateVar {
                        name: name.to_string(),
                    });
                }
                Some(None) => {
                    return Err(ParseError::MissingTemplateValue {
                        name: name.to_string(),
                    });
                }
                Some(Some(v)) => v,
            };

            out.push_str(&script[last_end..whole.0]);
            out.push_str(value);
            last_end = whole.1;
        }
        out.push_str(&script[last_end..]);

        Ok(out)
    }
}
