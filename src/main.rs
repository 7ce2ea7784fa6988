use anyhow::Context;
use clap::Parser;
use param_validation::AnalysisEngine;
use param_validation::cancel::CancellationToken;
use param_validation::cli::{AnalyzeArgs, Args, Command, OutputFormat};
use param_validation::config::{self, AnalyzerConfig};
use param_validation::diagnostics::{self, Diagnostic, VALIDATE_ARGUMENTS};
use param_validation::ir::{MethodId, Program};
use param_validation::level::LintLevel;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    param_validation::telemetry::init_tracing();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Some(Command::Explain) => {
            explain_rule();
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Analyze(analyze)) => analyze_command(analyze),
        None => analyze_command(args.analyze),
    }
}

fn explain_rule() {
    let d = &VALIDATE_ARGUMENTS;
    println!("name: {}", d.name);
    println!("description: {}", d.description);
    println!("help: {}", d.help);
}

fn analyze_command(args: AnalyzeArgs) -> anyhow::Result<ExitCode> {
    let start_dir = infer_start_dir(&args)?;
    let loaded_cfg = config::load_config(args.config.as_deref(), &start_dir)?;

    let (mut analyzer, mut level) = match loaded_cfg {
        Some((_path, cfg)) => (cfg.analysis, cfg.report.level),
        None => (AnalyzerConfig::default(), LintLevel::default()),
    };
    // CLI flags take precedence over config
    if let Some(kind) = args.interprocedural {
        analyzer = analyzer.with_interprocedural_kind(kind);
    }
    if let Some(max) = args.max_call_chain {
        analyzer = analyzer.with_max_call_chain(max);
    }
    if args.copy_analysis {
        analyzer = analyzer.with_copy_analysis(true);
    }
    if args.optimistic {
        analyzer = analyzer.with_pessimistic_analysis(false);
    }
    analyzer = analyzer.with_validation_methods(args.validation_methods.iter().cloned());
    if let Some(l) = args.level {
        level = l;
    }

    let mut inputs: Vec<(String, Program)> = Vec::new();
    if args.paths.is_empty() {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        let program = Program::from_json(&source).context("failed to load program from stdin")?;
        inputs.push(("<stdin>".to_string(), program));
    } else {
        for path in &args.paths {
            let program = Program::from_path(path)
                .with_context(|| format!("failed to load program {}", path.display()))?;
            inputs.push((path.display().to_string(), program));
        }
    }

    let cancel = CancellationToken::new();
    let mut all: Vec<Diagnostic> = Vec::new();
    for (file, program) in inputs {
        let engine = AnalysisEngine::new(program, analyzer.clone());
        let results = match &args.method {
            Some(method) => vec![engine.analyze_with_cancellation(&MethodId::new(method.as_str()), &cancel)?],
            None => engine.analyze_program(&cancel)?,
        };
        for result in &results {
            all.extend(diagnostics::diagnostics_for(result, level, Some(file.as_str())));
        }
    }

    all.sort_by(|a, b| {
        (a.file.as_deref(), a.span, a.method.as_str(), a.parameter.as_str())
            .cmp(&(b.file.as_deref(), b.span, b.method.as_str(), b.parameter.as_str()))
    });

    match args.format {
        OutputFormat::Pretty => {
            print!("{}", diagnostics::render_pretty(&all));
            println!("{} diagnostics", all.len());
        }
        OutputFormat::Json => println!("{}", diagnostics::render_json(&all)?),
        OutputFormat::Github => print!("{}", diagnostics::render_github(&all, args.deny_warnings)),
    }

    let has_error = all.iter().any(|d| d.level == LintLevel::Error);
    if has_error || (args.deny_warnings && !all.is_empty()) {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn infer_start_dir(args: &AnalyzeArgs) -> anyhow::Result<PathBuf> {
    let base = match args.paths.first() {
        Some(p) => p.clone(),
        None => std::env::current_dir()?,
    };

    let base = if base.is_file() {
        base.parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        base
    };

    Ok(base)
}
