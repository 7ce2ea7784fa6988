//! Interprocedural parameter-validation dataflow analysis.
//!
//! The crate consumes method bodies lowered to control flow graphs of
//! operations, together with a points-to result per body, and reports
//! by-reference parameters that may be dereferenced before they are checked
//! against null. Calls are followed into callee bodies up to a configurable
//! call-chain depth; every analyzed context is memoized in a shared
//! [`cache::ResultCache`].

pub mod analysis;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod interprocedural;
pub mod ir;
pub mod level;
pub mod points_to;
pub mod solver;
pub mod telemetry;
pub mod visitor;

use rayon::prelude::*;
use std::sync::Arc;
use tracing::info;

use crate::analysis::{AnalysisStats, ParameterValidationResult, analyze_context};
use crate::cache::ResultCache;
use crate::cancel::CancellationToken;
use crate::config::AnalyzerConfig;
use crate::error::{FlowAnalysisError, FlowResult};
use crate::interprocedural::{AnalysisContext, ContextKey};
use crate::ir::{MethodId, Program};

/// Entry point: owns the program, the configuration and the result cache
/// shared by every analysis it runs.
pub struct AnalysisEngine {
    program: Arc<Program>,
    config: Arc<AnalyzerConfig>,
    cache: ResultCache<ContextKey, ParameterValidationResult>,
    stats: AnalysisStats,
}

impl AnalysisEngine {
    pub fn new(program: Program, config: AnalyzerConfig) -> Self {
        Self::with_program(Arc::new(program), config)
    }

    /// Engine over a program shared with other engines. Results are never
    /// shared between engines.
    pub fn with_program(program: Arc<Program>, config: AnalyzerConfig) -> Self {
        Self {
            program,
            config: Arc::new(config),
            cache: ResultCache::new(),
            stats: AnalysisStats::default(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache<ContextKey, ParameterValidationResult> {
        &self.cache
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    /// Analyzes `method` as a top-level entry point.
    pub fn analyze(&self, method: &MethodId) -> FlowResult<Arc<ParameterValidationResult>> {
        self.analyze_with_cancellation(method, &CancellationToken::new())
    }

    pub fn analyze_with_cancellation(
        &self,
        method: &MethodId,
        cancel: &CancellationToken,
    ) -> FlowResult<Arc<ParameterValidationResult>> {
        let body = self
            .program
            .method(method)
            .ok_or_else(|| FlowAnalysisError::UnknownMethod(method.clone()))?;
        let context = Arc::new(AnalysisContext::top_level(Arc::clone(body), Arc::clone(&self.config)));
        self.cache
            .get_or_compute(&context.key(), || analyze_context(self, &context, cancel))
    }

    /// Analyzes every method of the program in parallel. Results are ordered
    /// by method id.
    pub fn analyze_program(&self, cancel: &CancellationToken) -> FlowResult<Vec<Arc<ParameterValidationResult>>> {
        let mut methods: Vec<&MethodId> = self.program.method_ids().collect();
        methods.sort();

        let results = methods
            .par_iter()
            .map(|method| self.analyze_with_cancellation(method, cancel))
            .collect::<FlowResult<Vec<_>>>()?;

        info!(
            methods = results.len(),
            cached = self.cache.len(),
            forks = self.stats.forks(),
            "program analysis complete"
        );
        Ok(results)
    }
}
