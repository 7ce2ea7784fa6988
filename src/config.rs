use crate::level::LintLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// How calls are followed into callee bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InterproceduralAnalysisKind {
    /// Calls are never followed.
    None,
    /// Each callee is analyzed once without caller information; the result
    /// is shared between call sites.
    ContextInsensitive,
    /// Each callee is analyzed with its parameters seeded from the caller's
    /// argument values.
    #[default]
    ContextSensitive,
}

impl InterproceduralAnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterproceduralAnalysisKind::None => "none",
            InterproceduralAnalysisKind::ContextInsensitive => "context-insensitive",
            InterproceduralAnalysisKind::ContextSensitive => "context-sensitive",
        }
    }
}

/// Options that determine an analysis result. Part of every cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub interprocedural_analysis_kind: InterproceduralAnalysisKind,
    pub max_interprocedural_call_chain: u32,
    pub perform_copy_analysis: bool,
    pub pessimistic_analysis: bool,
    /// Guard methods, matched by simple name or `Type.Method`.
    pub null_check_validation_methods: BTreeSet<String>,
    /// Promote parameters that are non-null on every return but null or
    /// unknown on an unhandled throw to validated at method exit.
    pub exit_validation_promotion: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            interprocedural_analysis_kind: InterproceduralAnalysisKind::default(),
            max_interprocedural_call_chain: 1,
            perform_copy_analysis: false,
            pessimistic_analysis: true,
            null_check_validation_methods: BTreeSet::new(),
            exit_validation_promotion: true,
        }
    }
}

impl AnalyzerConfig {
    #[must_use]
    pub fn with_interprocedural_kind(mut self, kind: InterproceduralAnalysisKind) -> Self {
        self.interprocedural_analysis_kind = kind;
        self
    }

    #[must_use]
    pub fn with_max_call_chain(mut self, max: u32) -> Self {
        self.max_interprocedural_call_chain = max;
        self
    }

    #[must_use]
    pub fn with_copy_analysis(mut self, enabled: bool) -> Self {
        self.perform_copy_analysis = enabled;
        self
    }

    #[must_use]
    pub fn with_pessimistic_analysis(mut self, enabled: bool) -> Self {
        self.pessimistic_analysis = enabled;
        self
    }

    #[must_use]
    pub fn with_exit_validation_promotion(mut self, enabled: bool) -> Self {
        self.exit_validation_promotion = enabled;
        self
    }

    #[must_use]
    pub fn with_validation_methods(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.null_check_validation_methods
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_validation_method(&self, simple_name: &str, qualified_name: &str) -> bool {
        self.null_check_validation_methods.contains(simple_name)
            || self.null_check_validation_methods.contains(qualified_name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub level: LintLevel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamValidationConfig {
    #[serde(default)]
    pub analysis: AnalyzerConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

pub const DEFAULT_CONFIG_FILE_NAME: &str = "param-validation.toml";

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut cur = Some(start_dir);
    while let Some(dir) = cur {
        let candidate = dir.join(DEFAULT_CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        cur = dir.parent();
    }
    None
}

pub fn load_config_file(path: &Path) -> Result<ParamValidationConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let cfg: ParamValidationConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(cfg)
}

pub fn load_config(
    explicit_path: Option<&Path>,
    start_dir: &Path,
) -> Result<Option<(PathBuf, ParamValidationConfig)>> {
    if let Some(p) = explicit_path {
        let cfg = load_config_file(p)?;
        return Ok(Some((p.to_path_buf(), cfg)));
    }

    let Some(p) = find_config_file(start_dir) else {
        return Ok(None);
    };
    let cfg = load_config_file(&p)?;
    Ok(Some((p, cfg)))
}
