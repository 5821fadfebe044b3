//! Datastore query strings
//!
//! Queries are `field=value` terms joined by commas. Numeric-looking values
//! must be quoted so the datastore compares them as strings.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn numeric_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\d+\.?\d*$").ok())
        .as_ref()
}

/// Wraps a numeric string in double quotes; other strings pass through
///
/// # Examples
///
/// ```
/// use deid_export::adapters::datastore::quote_numeric_string;
///
/// assert_eq!(quote_numeric_string("001"), "\"001\"");
/// assert_eq!(quote_numeric_string("12.5"), "\"12.5\"");
/// assert_eq!(quote_numeric_string("sub-01"), "sub-01");
/// ```
pub fn quote_numeric_string(value: &str) -> String {
    match numeric_pattern() {
        Some(re) if re.is_match(value) => format!("\"{value}\""),
        _ => value.to_string(),
    }
}

/// One `field=value` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub field: String,
    /// Unquoted value used for matching
    pub value: String,
    quoted: bool,
}

impl QueryTerm {
    fn render(&self) -> String {
        if self.quoted {
            format!("{}=\"{}\"", self.field, self.value)
        } else {
            format!("{}={}", self.field, quote_numeric_string(&self.value))
        }
    }
}

/// Conjunction of equality terms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    terms: Vec<QueryTerm>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field=value`, quoting numeric-looking values
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push(QueryTerm {
            field: field.into(),
            value: value.into(),
            quoted: false,
        });
        self
    }

    /// Adds `field="value"`
    pub fn eq_quoted(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push(QueryTerm {
            field: field.into(),
            value: value.into(),
            quoted: true,
        });
        self
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.terms.iter().map(QueryTerm::render).collect();
        f.write_str(&rendered.join(","))
    }
}
