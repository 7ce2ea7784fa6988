use crate::config::InterproceduralAnalysisKind;
use crate::level::LintLevel;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// param-validation CLI options.
#[derive(Debug, Parser)]
#[command(
    name = "param-validation",
    version,
    about = "Report by-reference parameters dereferenced before they are checked for null",
    args_conflicts_with_subcommands = true,
    subcommand_precedence_over_arg = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub analyze: AnalyzeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze program files.
    Analyze(AnalyzeArgs),

    /// Explain the reported rule.
    Explain,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct AnalyzeArgs {
    /// Program JSON files. Reads stdin when absent.
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Config file; otherwise `param-validation.toml` is searched upward.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only analyze this method id.
    #[arg(long)]
    pub method: Option<String>,

    #[arg(long, value_enum)]
    pub interprocedural: Option<InterproceduralAnalysisKind>,

    /// Maximum number of nested calls followed from an entry point.
    #[arg(long)]
    pub max_call_chain: Option<u32>,

    /// Extra null-check validation methods (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub validation_methods: Vec<String>,

    /// Track locals copied from parameters.
    #[arg(long)]
    pub copy_analysis: bool,

    /// Only report definitely unvalidated parameters.
    #[arg(long)]
    pub optimistic: bool,

    /// Level for reported findings.
    #[arg(long, value_enum)]
    pub level: Option<LintLevel>,

    /// Exit with code 1 if any diagnostics are emitted.
    #[arg(long)]
    pub deny_warnings: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
    Github,
}
