//! Transfer functions of the parameter-validation analysis.

use crate::AnalysisEngine;
use crate::cancel::CancellationToken;
use crate::domain::{HazardousUsageMap, ParameterValidationAbstractValue, ParameterValidationAnalysisData};
use crate::error::FlowResult;
use crate::interprocedural::{AnalysisContext, CalleeAnalysis, analyze_callee};
use crate::ir::{
    BasicBlock, BinaryOperator, BlockId, BlockKind, ConditionKind, MethodRef, Operation, OperationKind, ParameterSymbol,
    SourceSpan, UnaryOperator,
};
use crate::points_to::{AbstractLocation, NullState, PointsToResult};
use crate::solver::{FlowBranch, TransferFunctions};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ParameterValidationAbstractValue::{NotApplicable, Validated};

type State = ParameterValidationAnalysisData;

pub(crate) struct ParameterValidationVisitor<'a> {
    engine: &'a AnalysisEngine,
    context: &'a Arc<AnalysisContext>,
    points_to: &'a PointsToResult,
    cancel: &'a CancellationToken,
    /// Tracked location of each by-reference parameter.
    parameters: BTreeMap<AbstractLocation, ParameterSymbol>,
    exit: Option<BlockId>,
    /// Only populated during the replay pass.
    hazards: Option<HazardousUsageMap>,
}

impl<'a> ParameterValidationVisitor<'a> {
    pub(crate) fn new(
        engine: &'a AnalysisEngine,
        context: &'a Arc<AnalysisContext>,
        points_to: &'a PointsToResult,
        parameters: BTreeMap<AbstractLocation, ParameterSymbol>,
        exit: Option<BlockId>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            engine,
            context,
            points_to,
            cancel,
            parameters,
            exit,
            hazards: None,
        }
    }

    pub(crate) fn begin_reporting(&mut self) {
        self.hazards = Some(HazardousUsageMap::default());
    }

    pub(crate) fn into_hazards(self) -> HazardousUsageMap {
        self.hazards.unwrap_or_default()
    }

    /// Tracked locations `operation` may denote at the point `state`
    /// describes. With copy analysis, a local denotes whatever parameter it
    /// currently holds a copy of.
    fn locations(&self, operation: &Operation, state: &State) -> BTreeSet<AbstractLocation> {
        let mut locations = self.points_to.locations(operation.id);
        if self.context.config().perform_copy_analysis
            && let OperationKind::LocalReference { name } = &operation.kind
            && let Some(copied) = state.copy_of(name)
        {
            locations.extend(copied.iter().cloned());
        }
        locations.retain(|l| self.parameters.contains_key(l));
        if locations.is_empty()
            && let OperationKind::Conversion { operand, .. } = &operation.kind
        {
            return self.locations(operand, state);
        }
        locations
    }

    fn value_of(&self, operation: &Operation, state: &State) -> ParameterValidationAbstractValue {
        self.locations(operation, state)
            .iter()
            .map(|l| state.get(l))
            .filter(|v| *v != NotApplicable)
            .reduce(ParameterValidationAbstractValue::join)
            .unwrap_or_default()
    }

    fn mark_validated(&self, operation: &Operation, state: &mut State) {
        for location in self.locations(operation, state) {
            state.update(&location, Validated);
        }
    }

    /// Records a hazardous usage for every tracked location `receiver` may
    /// denote whose current value is hazardous.
    fn report_dereference(&mut self, receiver: &Operation, span: SourceSpan, state: &State) {
        if self.hazards.is_none() {
            return;
        }
        let locations = self.locations(receiver, state);
        let pessimistic = self.context.config().pessimistic_analysis;
        let Some(hazards) = self.hazards.as_mut() else {
            return;
        };
        for location in locations {
            if state.get(&location).is_hazardous(pessimistic)
                && let Some(parameter) = self.parameters.get(&location)
            {
                hazards.record(parameter, span);
            }
        }
    }

    fn visit(&mut self, operation: &Operation, state: &mut State) -> FlowResult<ParameterValidationAbstractValue> {
        use OperationKind as K;
        let value = match &operation.kind {
            K::ParameterReference { .. } | K::LocalReference { .. } | K::InstanceReference => {
                self.value_of(operation, state)
            }
            K::NullLiteral | K::Literal { .. } => NotApplicable,
            K::FieldReference { instance, .. } => {
                if let Some(instance) = instance {
                    self.visit(instance, state)?;
                    self.report_dereference(instance, operation.span, state);
                }
                NotApplicable
            }
            K::ElementAccess { instance, indices } => {
                self.visit(instance, state)?;
                for index in indices {
                    self.visit(index, state)?;
                }
                self.report_dereference(instance, operation.span, state);
                NotApplicable
            }
            K::Invocation {
                target,
                instance,
                arguments,
            } => {
                if let Some(instance) = instance {
                    self.visit(instance, state)?;
                    self.report_dereference(instance, operation.span, state);
                }
                self.visit_call(Some(target), arguments, operation.span, state)?;
                NotApplicable
            }
            K::ObjectCreation {
                constructor,
                arguments,
                ..
            } => {
                self.visit_call(constructor.as_ref(), arguments, operation.span, state)?;
                NotApplicable
            }
            K::Assignment { target, value } => {
                let assigned = self.visit(value, state)?;
                match &target.kind {
                    // The local stops being a copy of whatever it held before.
                    K::LocalReference { name } => {
                        if self.context.config().perform_copy_analysis {
                            let copied = self.locations(value, state);
                            state.assign_local(name, copied);
                        }
                    }
                    K::ParameterReference { .. } => {
                        if self.is_validation_producing(value, assigned) {
                            self.mark_validated(target, state);
                        }
                    }
                    // Writing through a field or element still dereferences its instance.
                    _ => {
                        self.visit(target, state)?;
                        if self.is_validation_producing(value, assigned) {
                            self.mark_validated(target, state);
                        }
                    }
                }
                assigned
            }
            K::Binary { left, right, .. } => {
                self.visit(left, state)?;
                self.visit(right, state)?;
                NotApplicable
            }
            K::Unary { operand, .. } | K::IsType { operand, .. } => {
                self.visit(operand, state)?;
                NotApplicable
            }
            K::Conversion { operand, .. } => self.visit(operand, state)?,
            K::Coalesce { value, fallback } => {
                let lhs = self.visit(value, state)?;
                self.visit(fallback, state)?;
                if fallback.is_throw() {
                    // `value ?? throw ...` only continues when value is non-null.
                    self.mark_validated(value, state);
                    if lhs == NotApplicable { lhs } else { Validated }
                } else {
                    lhs
                }
            }
            K::Throw { exception } => {
                if let Some(exception) = exception {
                    self.visit(exception, state)?;
                }
                NotApplicable
            }
            K::Unknown { children } => {
                for child in children {
                    self.visit(child, state)?;
                }
                NotApplicable
            }
        };
        Ok(value)
    }

    /// Whether assigning `value` to a parameter makes it non-null.
    fn is_validation_producing(&self, value: &Operation, assigned: ParameterValidationAbstractValue) -> bool {
        match &value.kind {
            OperationKind::ObjectCreation { .. } | OperationKind::Literal { .. } => true,
            OperationKind::NullLiteral => false,
            OperationKind::Coalesce { fallback, .. } if fallback.is_throw() => true,
            OperationKind::Conversion { operand, .. } if operand.is_null_literal() => false,
            _ => assigned == Validated || self.points_to.value(value.id).null_state == NullState::NotNull,
        }
    }

    /// Evaluates a branch condition and narrows the edge state when the
    /// outcome implies a tracked reference is non-null.
    fn visit_condition(&mut self, condition: &Operation, kind: ConditionKind, state: &mut State) -> FlowResult<()> {
        self.visit(condition, state)?;
        self.narrow(condition, kind, state);
        Ok(())
    }

    /// Marks the references that `condition` having outcome `kind` proves
    /// non-null.
    fn narrow(&self, condition: &Operation, kind: ConditionKind, state: &mut State) {
        match &condition.kind {
            OperationKind::Unary {
                operator: UnaryOperator::Not,
                operand,
            } => self.narrow(operand, kind.negate(), state),
            OperationKind::Binary { operator, left, right }
                if matches!(operator, BinaryOperator::Equals | BinaryOperator::NotEquals) =>
            {
                let non_null_outcome = match operator {
                    BinaryOperator::NotEquals => ConditionKind::WhenTrue,
                    _ => ConditionKind::WhenFalse,
                };
                if kind == non_null_outcome {
                    self.narrow_null_comparison(left, right, state);
                }
            }
            OperationKind::Invocation {
                target,
                instance,
                arguments,
            } if is_equality_method(target) => {
                // `object.Equals(a, b)`, `ReferenceEquals(a, b)` and `a.Equals(b)`.
                let operands: Vec<&Operation> = instance.iter().map(|i| &**i).chain(arguments.iter()).collect();
                if kind == ConditionKind::WhenFalse
                    && let &[left, right] = operands.as_slice()
                {
                    self.narrow_null_comparison(left, right, state);
                }
            }
            OperationKind::IsType { operand, .. } => {
                if kind == ConditionKind::WhenTrue {
                    self.mark_validated(operand, state);
                }
            }
            _ => {}
        }
    }

    /// `left` and `right` are known to differ; one side being `null` makes
    /// the other non-null.
    fn narrow_null_comparison(&self, left: &Operation, right: &Operation, state: &mut State) {
        if right.is_null_literal() {
            self.mark_validated(left, state);
        } else if left.is_null_literal() {
            self.mark_validated(right, state);
        }
    }

    fn visit_call(
        &mut self,
        target: Option<&MethodRef>,
        arguments: &[Operation],
        span: SourceSpan,
        state: &mut State,
    ) -> FlowResult<()> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.visit(argument, state)?);
        }
        let Some(target) = target else {
            return Ok(());
        };

        let engine = self.engine;
        let seeds = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != NotApplicable)
            .map(|(ordinal, v)| (ordinal as u32, *v))
            .collect();

        let mut validated: Vec<&Operation> = Vec::new();
        if let CalleeAnalysis::Analyzed(callee) = analyze_callee(engine, self.context, target, seeds, self.cancel)? {
            for (ordinal, argument) in arguments.iter().enumerate() {
                let ordinal = ordinal as u32;
                if callee.has_hazardous_usage(ordinal) {
                    self.report_dereference(argument, span, state);
                }
                if callee.is_validated_at_exit(ordinal) {
                    validated.push(argument);
                }
            }
        }

        if let Some(callee) = engine.program().method(&target.id) {
            for (ordinal, argument) in arguments.iter().enumerate() {
                if callee
                    .method
                    .parameter(ordinal as u32)
                    .is_some_and(|p| p.validated_not_null)
                {
                    validated.push(argument);
                }
            }
        }

        if is_contract_check(target)
            && let Some(predicate) = arguments.first()
        {
            self.narrow(predicate, ConditionKind::WhenTrue, state);
        } else if self
            .context
            .config()
            .is_validation_method(&target.name, &target.qualified_name())
        {
            // Guards either take the reference itself or a predicate over it.
            for argument in arguments {
                if is_predicate(argument) {
                    self.narrow(argument, ConditionKind::WhenTrue, state);
                } else {
                    validated.push(argument);
                }
            }
        }

        for argument in validated {
            self.mark_validated(argument, state);
        }
        Ok(())
    }

    /// Parameters that are non-null on every return but possibly null on an
    /// unhandled throw were checked by the method itself. Both facts come
    /// from the points-to input; the solver's own throw state is not final
    /// while the exit block is being transferred.
    fn promote_at_exit(&self, state: &mut State) {
        let Some(exit) = self.exit else {
            return;
        };
        if !self.context.config().exit_validation_promotion {
            return;
        }
        for location in self.parameters.keys() {
            let on_return = self.points_to.null_state_at_block_entry(exit, location);
            let on_throw = self.points_to.null_state_at_unhandled_throws(location);
            if on_return == Some(NullState::NotNull) && on_throw.is_some_and(|s| s != NullState::NotNull) {
                state.update(location, Validated);
            }
        }
    }
}

/// `Contract.Requires`, `Contract.Assume` and `Contract.Assert`: the first
/// argument holds once the call returns.
fn is_contract_check(target: &MethodRef) -> bool {
    let on_contract = target
        .containing_type
        .as_deref()
        .is_some_and(|ty| ty == "Contract" || ty.ends_with(".Contract"));
    on_contract && matches!(target.name.as_str(), "Requires" | "Assume" | "Assert")
}

fn is_equality_method(target: &MethodRef) -> bool {
    target.name.ends_with("Equals")
}

/// Conditions `narrow` understands.
fn is_predicate(operation: &Operation) -> bool {
    match &operation.kind {
        OperationKind::Binary { operator, .. } => {
            matches!(operator, BinaryOperator::Equals | BinaryOperator::NotEquals)
        }
        OperationKind::Unary {
            operator: UnaryOperator::Not,
            ..
        }
        | OperationKind::IsType { .. } => true,
        OperationKind::Invocation { target, .. } => is_equality_method(target),
        _ => false,
    }
}

impl TransferFunctions for ParameterValidationVisitor<'_> {
    type State = ParameterValidationAnalysisData;

    fn start_block(&mut self, block: &BasicBlock, state: &mut State) -> FlowResult<()> {
        if block.kind == BlockKind::Exit {
            self.promote_at_exit(state);
        }
        Ok(())
    }

    fn operation(&mut self, _block: &BasicBlock, operation: &Operation, state: &mut State) -> FlowResult<()> {
        self.engine.stats().record_operation();
        self.visit(operation, state)?;
        Ok(())
    }

    fn flow_branch(&mut self, _block: &BasicBlock, branch: &FlowBranch<'_>, state: &mut State) -> FlowResult<()> {
        if let Some(condition) = branch.condition {
            self.visit_condition(condition, branch.condition_kind, state)?;
        }
        if let Some(value) = branch.value {
            self.visit(value, state)?;
        }
        Ok(())
    }
}
