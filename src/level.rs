use serde::{Deserialize, Serialize};

/// Severity attached to reported hazardous parameter usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LintLevel {
    /// Findings are computed but not reported.
    Allow,
    #[default]
    Warn,
    Error,
}

impl LintLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LintLevel::Allow => "allow",
            LintLevel::Warn => "warning",
            LintLevel::Error => "error",
        }
    }

    pub fn is_reported(&self) -> bool {
        !matches!(self, LintLevel::Allow)
    }
}
