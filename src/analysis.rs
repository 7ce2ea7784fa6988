//! Parameter-validation analysis of one method body in one context.
//!
//! Every by-reference parameter starts `NotValidated` (or `Validated` when it
//! carries the validated-not-null attribute or was seeded so by a caller).
//! The forward solver runs the transfer functions in [`crate::visitor`] to a
//! fixed point, then a replay pass over the stable states records the first
//! hazardous dereference of each parameter.

use crate::AnalysisEngine;
use crate::cancel::CancellationToken;
use crate::domain::{ParameterValidationAbstractValue, ParameterValidationAnalysisData};
use crate::error::FlowResult;
use crate::instrument_block;
use crate::interprocedural::AnalysisContext;
use crate::ir::{BlockId, MethodId, ParameterSymbol, SourceSpan};
use crate::points_to::AbstractLocation;
use crate::solver::{BlockAnalysisResult, ForwardSolver};
use crate::visitor::ParameterValidationVisitor;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Fixed-point states and findings for one analyzed context.
#[derive(Debug, Clone)]
pub struct ParameterValidationResult {
    method: MethodId,
    exit: Option<BlockId>,
    parameters: BTreeMap<u32, (ParameterSymbol, AbstractLocation)>,
    blocks: BTreeMap<BlockId, BlockAnalysisResult<ParameterValidationAnalysisData>>,
    unhandled_throw_state: Option<ParameterValidationAnalysisData>,
    hazardous_parameter_usages: BTreeMap<ParameterSymbol, SourceSpan>,
    iterations: usize,
}

impl ParameterValidationResult {
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// First hazardous dereference of each parameter, by source position.
    pub fn hazardous_parameter_usages(&self) -> &BTreeMap<ParameterSymbol, SourceSpan> {
        &self.hazardous_parameter_usages
    }

    pub fn hazardous_usage(&self, parameter_name: &str) -> Option<SourceSpan> {
        self.hazardous_parameter_usages
            .iter()
            .find(|(p, _)| p.name == parameter_name)
            .map(|(_, span)| *span)
    }

    pub fn has_hazardous_usage(&self, ordinal: u32) -> bool {
        self.hazardous_parameter_usages
            .keys()
            .any(|p| p.ordinal == ordinal)
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockAnalysisResult<ParameterValidationAnalysisData>> {
        self.blocks.get(&id)
    }

    /// State leaving the exit block, after exit-time promotion. `None` if the
    /// exit is unreachable.
    pub fn exit_state(&self) -> Option<&ParameterValidationAnalysisData> {
        self.blocks.get(&self.exit?).map(|b| &b.output)
    }

    /// Validation state joined over every throw that leaves the method.
    /// Reported for inspection only; exit-time promotion is decided from the
    /// points-to null facts, which are available before solving starts.
    pub fn unhandled_throw_state(&self) -> Option<&ParameterValidationAnalysisData> {
        self.unhandled_throw_state.as_ref()
    }

    pub fn parameter_location(&self, ordinal: u32) -> Option<&AbstractLocation> {
        self.parameters.get(&ordinal).map(|(_, l)| l)
    }

    pub fn value_at_block_entry(&self, block: BlockId, ordinal: u32) -> ParameterValidationAbstractValue {
        self.value_in(self.blocks.get(&block).map(|b| &b.input), ordinal)
    }

    pub fn value_at_block_exit(&self, block: BlockId, ordinal: u32) -> ParameterValidationAbstractValue {
        self.value_in(self.blocks.get(&block).map(|b| &b.output), ordinal)
    }

    pub fn value_at_exit(&self, ordinal: u32) -> ParameterValidationAbstractValue {
        self.value_in(self.exit_state(), ordinal)
    }

    pub fn is_validated_at_exit(&self, ordinal: u32) -> bool {
        self.value_at_exit(ordinal) == ParameterValidationAbstractValue::Validated
    }

    /// Block transfers the solver needed to reach the fixed point.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn value_in(&self, state: Option<&ParameterValidationAnalysisData>, ordinal: u32) -> ParameterValidationAbstractValue {
        match (state, self.parameter_location(ordinal)) {
            (Some(state), Some(location)) => state.get(location),
            _ => ParameterValidationAbstractValue::NotApplicable,
        }
    }
}

/// Engine-wide counters, shared by every context of an engine.
#[derive(Debug, Default)]
pub struct AnalysisStats {
    operations_visited: AtomicU64,
    contexts_analyzed: AtomicU64,
    forks: AtomicU64,
    skipped_forks: AtomicU64,
}

impl AnalysisStats {
    pub fn operations_visited(&self) -> u64 {
        self.operations_visited.load(Ordering::Relaxed)
    }

    pub fn contexts_analyzed(&self) -> u64 {
        self.contexts_analyzed.load(Ordering::Relaxed)
    }

    pub fn forks(&self) -> u64 {
        self.forks.load(Ordering::Relaxed)
    }

    pub fn skipped_forks(&self) -> u64 {
        self.skipped_forks.load(Ordering::Relaxed)
    }

    pub(crate) fn record_operation(&self) {
        self.operations_visited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fork(&self) {
        self.forks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_fork(&self) {
        self.skipped_forks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Initial state: every by-reference parameter is tracked.
fn entry_state(context: &AnalysisContext) -> BTreeMap<u32, (ParameterSymbol, AbstractLocation, ParameterValidationAbstractValue)> {
    context
        .body()
        .method
        .parameters
        .iter()
        .filter(|p| p.is_reference_type)
        .map(|p| {
            let value = if p.validated_not_null {
                ParameterValidationAbstractValue::Validated
            } else {
                match context.seed(p.ordinal) {
                    Some(seed) if seed != ParameterValidationAbstractValue::NotApplicable => seed,
                    _ => ParameterValidationAbstractValue::NotValidated,
                }
            };
            let location = AbstractLocation::parameter(context.method(), p);
            (p.ordinal, (p.clone(), location, value))
        })
        .collect()
}

pub(crate) fn analyze_context(
    engine: &AnalysisEngine,
    context: &Arc<AnalysisContext>,
    cancel: &CancellationToken,
) -> FlowResult<ParameterValidationResult> {
    cancel.check()?;
    let body = context.body();
    let points_to = body.points_to()?;

    instrument_block!("analyze", context.method(), {
        let solver = ForwardSolver::new(body.id(), &body.cfg, cancel)?;

        let tracked = entry_state(context);
        let mut initial = ParameterValidationAnalysisData::new();
        let mut parameters = BTreeMap::new();
        for (ordinal, (symbol, location, value)) in tracked {
            initial.set(location.clone(), value);
            parameters.insert(ordinal, (symbol, location));
        }

        let mut visitor = ParameterValidationVisitor::new(
            engine,
            context,
            points_to,
            parameters.values().map(|(s, l)| (l.clone(), s.clone())).collect(),
            body.cfg.exit(),
            cancel,
        );
        let dataflow = solver.solve(&mut visitor, initial)?;

        visitor.begin_reporting();
        solver.replay(&mut visitor, &dataflow)?;
        let hazards = visitor.into_hazards();

        engine.stats().contexts_analyzed.fetch_add(1, Ordering::Relaxed);
        debug!(
            depth = context.depth(),
            iterations = dataflow.iterations,
            hazards = hazards.len(),
            "analysis complete"
        );

        Ok(ParameterValidationResult {
            method: context.method().clone(),
            exit: body.cfg.exit(),
            parameters,
            blocks: dataflow.blocks,
            unhandled_throw_state: dataflow.unhandled_throw,
            hazardous_parameter_usages: hazards.into_inner(),
            iterations: dataflow.iterations,
        })
    })
}
