use crate::analysis::ParameterValidationResult;
use crate::ir::{MethodId, SourceSpan};
use crate::level::LintLevel;
use itertools::Itertools;
use serde::Serialize;

/// Static description of a reported rule.
#[derive(Debug)]
pub struct RuleDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub help: &'static str,
}

pub static VALIDATE_ARGUMENTS: RuleDescriptor = RuleDescriptor {
    name: "validate_arguments",
    description: "A by-reference parameter is dereferenced on a path where it was never checked against null.",
    help: "check the parameter for null and throw before its first use, or mark it as validated-not-null",
};

/// A single hazardous parameter usage, ready for rendering.
#[derive(Debug, Clone)]
#[must_use]
pub struct Diagnostic {
    pub rule: &'static RuleDescriptor,
    pub level: LintLevel,
    pub file: Option<String>,
    pub method: MethodId,
    pub parameter: String,
    pub span: Span,
    pub message: String,
    pub help: Option<String>,
}

/// Span in the analyzed source (1-based row/column positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Span {
    /// Converts an operation span. Front ends that only supply offsets get
    /// row 0; the end column is derived from the span length.
    #[must_use]
    pub fn from_source(span: SourceSpan) -> Self {
        let row = span.line as usize;
        let column = span.column as usize;
        let len = span.end.saturating_sub(span.start) as usize;
        Self {
            start: Position { row, column },
            end: Position { row, column: column + len },
        }
    }
}

/// Diagnostics for every hazardous usage in `result`, in source order.
/// Nothing is produced at [`LintLevel::Allow`].
pub fn diagnostics_for(result: &ParameterValidationResult, level: LintLevel, file: Option<&str>) -> Vec<Diagnostic> {
    if !level.is_reported() {
        return Vec::new();
    }
    result
        .hazardous_parameter_usages()
        .iter()
        .sorted_by_key(|(p, span)| (span.start, span.end, p.ordinal))
        .map(|(parameter, span)| Diagnostic {
            rule: &VALIDATE_ARGUMENTS,
            level,
            file: file.map(str::to_string),
            method: result.method().clone(),
            parameter: parameter.name.clone(),
            span: Span::from_source(*span),
            message: format!(
                "parameter `{}` of `{}` may be null when it is dereferenced here",
                parameter.name,
                result.method()
            ),
            help: Some(VALIDATE_ARGUMENTS.help.to_string()),
        })
        .collect()
}

pub fn render_pretty(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    for d in diagnostics {
        let file = d.file.as_deref().unwrap_or("<stdin>");
        out.push_str(&format!(
            "{}:{}:{}: {}: {}: {}\n",
            file,
            d.span.start.row,
            d.span.start.column,
            d.level.as_str(),
            d.rule.name,
            d.message
        ));
        if let Some(help) = &d.help {
            out.push_str(&format!("  help: {help}\n"));
        }
    }
    out
}

#[derive(Debug, Serialize)]
struct JsonDiagnostic<'a> {
    file: &'a str,
    method: &'a str,
    parameter: &'a str,
    row: usize,
    column: usize,
    level: &'a str,
    lint: &'a str,
    message: &'a str,
}

pub fn render_json(diagnostics: &[Diagnostic]) -> serde_json::Result<String> {
    let out: Vec<JsonDiagnostic<'_>> = diagnostics
        .iter()
        .map(|d| JsonDiagnostic {
            file: d.file.as_deref().unwrap_or("<stdin>"),
            method: d.method.as_str(),
            parameter: &d.parameter,
            row: d.span.start.row,
            column: d.span.start.column,
            level: d.level.as_str(),
            lint: d.rule.name,
            message: &d.message,
        })
        .collect();
    serde_json::to_string_pretty(&out)
}

/// GitHub Actions workflow commands. Warnings are promoted to errors when
/// `deny_warnings` is set.
pub fn render_github(diagnostics: &[Diagnostic], deny_warnings: bool) -> String {
    let mut out = String::new();
    for d in diagnostics {
        let kind = if d.level == LintLevel::Error || deny_warnings {
            "error"
        } else {
            "warning"
        };
        out.push_str(&format!(
            "::{} file={},line={},col={},title={}::{}\n",
            kind,
            github_escape(d.file.as_deref().unwrap_or("<stdin>")),
            d.span.start.row,
            d.span.start.column,
            d.rule.name,
            github_escape(&d.message)
        ));
    }
    out
}

fn github_escape(s: &str) -> String {
    s.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
