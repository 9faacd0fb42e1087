//! Compilation diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single compilation error, pointing at a line and column of a source.
///
/// The plain-text rendering is
///
/// ```text
/// lib/util.js:3:9: missing ; before statement
/// var x = = 1;
///         ^
/// ```
///
/// where the last two lines are left out if the line source is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    message: String,
    source_name: String,
    line: u32,
    line_source: String,
    offset: u32,
}

impl SyntaxError {
    pub fn new(
        message: impl Into<String>,
        source_name: impl Into<String>,
        line: u32,
        line_source: impl Into<String>,
        offset: u32,
    ) -> Self {
        Self {
            message: message.into(),
            source_name: source_name.into(),
            line,
            line_source: line_source.into(),
            offset,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// 1-based line number.
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn line_source(&self) -> &str {
        &self.line_source
    }

    /// 1-based column.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    fn caret(&self) -> String {
        let mut caret = " ".repeat(self.offset.saturating_sub(1) as usize);
        caret.push('^');
        caret
    }

    /// Render as an HTML fragment with all text escaped.
    pub fn to_html(&self) -> String {
        let mut html = format!(
            "<div class=\"syntax-error\"><b>{}:{}:{}</b>: {}",
            escape_html(&self.source_name),
            self.line,
            self.offset,
            escape_html(&self.message)
        );
        if !self.line_source.is_empty() {
            html.push_str("<pre>");
            html.push_str(&escape_html(&self.line_source));
            html.push('\n');
            html.push_str(&self.caret());
            html.push_str("</pre>");
        }
        html.push_str("</div>");
        html
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.source_name, self.line, self.offset, self.message
        )?;
        if !self.line_source.is_empty() {
            write!(f, "\n{}\n{}", self.line_source, self.caret())?;
        }
        Ok(())
    }
}

/// Render a list of errors as plain text, separated by blank lines.
pub fn format_errors(errors: &[SyntaxError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
