//! Analysis context identity and bounded callee forking.
//!
//! A call is followed only when the configured kind allows it, the callee has
//! a body, the call chain stays within `max_interprocedural_call_chain`, and
//! the callee is not already on the active chain. Otherwise the call is
//! treated conservatively: its arguments keep their current values and no
//! hazardous usage is propagated.

use crate::AnalysisEngine;
use crate::analysis::{ParameterValidationResult, analyze_context};
use crate::cancel::CancellationToken;
use crate::config::{AnalyzerConfig, InterproceduralAnalysisKind};
use crate::domain::ParameterValidationAbstractValue;
use crate::error::FlowResult;
use crate::ir::{MethodBody, MethodId, MethodRef};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Everything that determines one analysis result. Immutable once built;
/// entering a callee forks a new context.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    body: Arc<MethodBody>,
    config: Arc<AnalyzerConfig>,
    /// Methods on the active call chain, outermost first, excluding this one.
    call_chain: Vec<MethodId>,
    /// Entry values of parameters seeded from caller arguments, by ordinal.
    seeds: BTreeMap<u32, ParameterValidationAbstractValue>,
}

impl AnalysisContext {
    pub fn top_level(body: Arc<MethodBody>, config: Arc<AnalyzerConfig>) -> Self {
        Self {
            body,
            config,
            call_chain: Vec::new(),
            seeds: BTreeMap::new(),
        }
    }

    /// Context for analyzing `callee` from a call inside this context.
    pub fn fork(
        &self,
        callee: Arc<MethodBody>,
        seeds: BTreeMap<u32, ParameterValidationAbstractValue>,
    ) -> Self {
        let mut call_chain = self.call_chain.clone();
        call_chain.push(self.body.method.id.clone());
        Self {
            body: callee,
            config: Arc::clone(&self.config),
            call_chain,
            seeds,
        }
    }

    pub fn body(&self) -> &Arc<MethodBody> {
        &self.body
    }

    pub fn method(&self) -> &MethodId {
        &self.body.method.id
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn depth(&self) -> usize {
        self.call_chain.len()
    }

    pub fn seed(&self, ordinal: u32) -> Option<ParameterValidationAbstractValue> {
        self.seeds.get(&ordinal).copied()
    }

    /// Whether `method` is this context's method or one of its callers.
    pub fn is_on_call_chain(&self, method: &MethodId) -> bool {
        self.method() == method || self.call_chain.contains(method)
    }

    /// Cache identity. Context-sensitive results depend on the caller chain
    /// and the seeded argument values; context-insensitive results are shared
    /// by every caller at the same depth.
    pub fn key(&self) -> ContextKey {
        let sensitive = self.config.interprocedural_analysis_kind == InterproceduralAnalysisKind::ContextSensitive;
        ContextKey {
            body: BodyIdentity(Arc::clone(&self.body)),
            config: Arc::clone(&self.config),
            depth: self.depth(),
            call_chain: if sensitive { self.call_chain.clone() } else { Vec::new() },
            seeds: if sensitive {
                self.seeds.iter().map(|(k, v)| (*k, *v)).collect()
            } else {
                Vec::new()
            },
        }
    }
}

/// Identity of a method body by allocation, so that two distinct CFG objects
/// never share a cache entry.
#[derive(Debug, Clone)]
pub struct BodyIdentity(Arc<MethodBody>);

impl PartialEq for BodyIdentity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for BodyIdentity {}

impl Hash for BodyIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    body: BodyIdentity,
    config: Arc<AnalyzerConfig>,
    depth: usize,
    call_chain: Vec<MethodId>,
    seeds: Vec<(u32, ParameterValidationAbstractValue)>,
}

/// Why a call was not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoBody,
    ChainLimit,
    Recursive,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "interprocedural analysis disabled",
            SkipReason::NoBody => "callee body unavailable",
            SkipReason::ChainLimit => "call chain limit reached",
            SkipReason::Recursive => "callee already on call chain",
        }
    }
}

pub enum CalleeAnalysis {
    Analyzed(Arc<ParameterValidationResult>),
    Skipped(SkipReason),
}

/// Analyzes `target` as called from `caller`, or reports why it was skipped.
/// `arguments` holds the caller's abstract value per callee parameter ordinal.
pub(crate) fn analyze_callee(
    engine: &AnalysisEngine,
    caller: &Arc<AnalysisContext>,
    target: &MethodRef,
    arguments: BTreeMap<u32, ParameterValidationAbstractValue>,
    cancel: &CancellationToken,
) -> FlowResult<CalleeAnalysis> {
    cancel.check()?;

    let config = caller.config();
    let skip = |reason: SkipReason| -> FlowResult<CalleeAnalysis> {
        engine.stats().record_skipped_fork();
        debug!(caller = %caller.method(), callee = %target.id, reason = reason.as_str(), "not following call");
        Ok(CalleeAnalysis::Skipped(reason))
    };

    let kind = config.interprocedural_analysis_kind;
    if kind == InterproceduralAnalysisKind::None {
        return skip(SkipReason::Disabled);
    }
    let Some(callee) = engine.program().method(&target.id) else {
        return skip(SkipReason::NoBody);
    };
    if caller.is_on_call_chain(&target.id) {
        return skip(SkipReason::Recursive);
    }
    if caller.depth() + 1 > config.max_interprocedural_call_chain as usize {
        return skip(SkipReason::ChainLimit);
    }

    let seeds = match kind {
        InterproceduralAnalysisKind::ContextSensitive => arguments,
        _ => BTreeMap::new(),
    };
    let context = Arc::new(caller.fork(Arc::clone(callee), seeds));
    engine.stats().record_fork();
    debug!(caller = %caller.method(), callee = %target.id, depth = context.depth(), "following call");

    let key = context.key();
    let result = engine
        .cache()
        .get_or_compute_nested(&key, || analyze_context(engine, &context, cancel))?;
    Ok(CalleeAnalysis::Analyzed(result))
}
