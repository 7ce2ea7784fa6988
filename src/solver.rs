//! Generic forward dataflow solver.
//!
//! The solver owns the worklist and the per-block entry/exit states; an
//! analysis plugs in through [`TransferFunctions`], which is called once per
//! operation (in source order) and once per outgoing flow edge. Edge states
//! are joined into the successor's entry state; a successor is re-enqueued
//! whenever its entry state grows. States only move up a finite lattice, so
//! iteration stops once every entry state is stable.

use crate::cancel::CancellationToken;
use crate::error::FlowResult;
use crate::ir::{BasicBlock, BlockId, BranchSemantics, Cfg, ConditionKind, MethodId, Operation};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use tracing::{debug, trace};

/// Dataflow state at a program point.
pub trait AnalysisState: Clone + PartialEq + Debug {
    /// Joins `other` into `self`; returns whether `self` changed.
    fn join(&mut self, other: &Self) -> bool;
}

/// One outgoing flow edge as seen by the transfer functions.
#[derive(Debug, Clone, Copy)]
pub struct FlowBranch<'a> {
    /// Condition guarding the edge and the outcome it was taken on.
    pub condition: Option<&'a Operation>,
    pub condition_kind: ConditionKind,
    pub semantics: BranchSemantics,
    /// Returned or thrown value.
    pub value: Option<&'a Operation>,
}

pub trait TransferFunctions {
    type State: AnalysisState;

    fn start_block(&mut self, _block: &BasicBlock, _state: &mut Self::State) -> FlowResult<()> {
        Ok(())
    }

    fn operation(&mut self, block: &BasicBlock, operation: &Operation, state: &mut Self::State) -> FlowResult<()>;

    fn flow_branch(&mut self, block: &BasicBlock, branch: &FlowBranch<'_>, state: &mut Self::State) -> FlowResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockAnalysisResult<S> {
    pub input: S,
    pub output: S,
}

#[derive(Debug, Clone)]
pub struct DataflowResult<S> {
    /// Fixed-point states of every reachable block.
    pub blocks: BTreeMap<BlockId, BlockAnalysisResult<S>>,
    /// Join of the states at throws that leave the method. Only known once
    /// the fixed point is reached, so transfer functions cannot consult it.
    pub unhandled_throw: Option<S>,
    /// Number of block transfers performed.
    pub iterations: usize,
}

impl<S> DataflowResult<S> {
    pub fn input(&self, block: BlockId) -> Option<&S> {
        self.blocks.get(&block).map(|b| &b.input)
    }
}

pub struct ForwardSolver<'a> {
    cfg: &'a Cfg,
    order: Vec<BlockId>,
    rank: Vec<usize>,
    cancel: &'a CancellationToken,
}

impl<'a> ForwardSolver<'a> {
    pub fn new(method: &MethodId, cfg: &'a Cfg, cancel: &'a CancellationToken) -> FlowResult<Self> {
        cfg.validate(method)?;
        let order = cfg.reverse_postorder();
        let mut rank = vec![usize::MAX; cfg.len()];
        for (position, block) in order.iter().enumerate() {
            rank[block.0] = position;
        }
        Ok(Self {
            cfg,
            order,
            rank,
            cancel,
        })
    }

    /// Iterates to a fixed point starting from `entry_state` at the entry block.
    pub fn solve<T: TransferFunctions>(
        &self,
        transfer: &mut T,
        entry_state: T::State,
    ) -> FlowResult<DataflowResult<T::State>> {
        let n = self.cfg.len();
        let mut inputs: Vec<Option<T::State>> = vec![None; n];
        let mut outputs: Vec<Option<T::State>> = vec![None; n];
        let mut unhandled_throw: Option<T::State> = None;
        let mut worklist: BTreeSet<(usize, BlockId)> = BTreeSet::new();
        let mut iterations = 0usize;

        let entry = self.cfg.entry();
        inputs[entry.0] = Some(entry_state);
        worklist.insert((self.rank[entry.0], entry));

        while let Some((_, block_id)) = worklist.pop_first() {
            self.cancel.check()?;
            iterations += 1;

            let block = self.cfg.block(block_id);
            let Some(input) = inputs[block_id.0].clone() else {
                continue;
            };
            trace!(block = %block_id, "transfer block");

            let edges = self.transfer_block(transfer, block, input)?;
            outputs[block_id.0] = Some(edges.output);

            for (successor, state) in edges.successors {
                let changed = match &mut inputs[successor.0] {
                    Some(existing) => existing.join(&state),
                    slot @ None => {
                        *slot = Some(state);
                        true
                    }
                };
                if changed {
                    worklist.insert((self.rank[successor.0], successor));
                }
            }
            if let Some(state) = edges.unhandled_throw {
                join_into(&mut unhandled_throw, state);
            }
        }

        debug!(blocks = n, iterations, "dataflow reached fixed point");

        let blocks = self
            .order
            .iter()
            .filter_map(|id| {
                let input = inputs[id.0].take()?;
                let output = outputs[id.0].take()?;
                Some((*id, BlockAnalysisResult { input, output }))
            })
            .collect();

        Ok(DataflowResult {
            blocks,
            unhandled_throw,
            iterations,
        })
    }

    /// Re-runs the transfer functions once over every reachable block from its
    /// fixed-point entry state, without propagating anything. Analyses use
    /// this to report findings against stable states.
    pub fn replay<T: TransferFunctions>(
        &self,
        transfer: &mut T,
        result: &DataflowResult<T::State>,
    ) -> FlowResult<()> {
        for block_id in &self.order {
            self.cancel.check()?;
            let Some(input) = result.input(*block_id) else {
                continue;
            };
            self.transfer_block(transfer, self.cfg.block(*block_id), input.clone())?;
        }
        Ok(())
    }

    fn transfer_block<T: TransferFunctions>(
        &self,
        transfer: &mut T,
        block: &BasicBlock,
        mut state: T::State,
    ) -> FlowResult<BlockEdges<T::State>> {
        transfer.start_block(block, &mut state)?;

        // Any operation may throw into a handler with the state preceding it.
        let mut exceptional: Option<T::State> = None;
        for operation in &block.operations {
            if !block.exception_handlers.is_empty() {
                join_into(&mut exceptional, state.clone());
            }
            transfer.operation(block, operation, &mut state)?;
        }
        if !block.exception_handlers.is_empty() {
            join_into(&mut exceptional, state.clone());
        }

        let mut successors = Vec::new();
        let mut unhandled_throw = None;

        if let Some(conditional) = &block.conditional {
            let mut edge = state.clone();
            let branch = FlowBranch {
                condition: Some(&conditional.condition),
                condition_kind: conditional.kind,
                semantics: BranchSemantics::Regular,
                value: None,
            };
            transfer.flow_branch(block, &branch, &mut edge)?;
            successors.push((conditional.destination, edge));
        }

        if let Some(fall_through) = &block.fall_through {
            let mut edge = state.clone();
            let (condition, condition_kind) = match &block.conditional {
                Some(c) => (Some(&c.condition), c.kind.negate()),
                None => (None, ConditionKind::None),
            };
            let branch = FlowBranch {
                condition,
                condition_kind,
                semantics: fall_through.semantics,
                value: fall_through.value.as_ref(),
            };
            transfer.flow_branch(block, &branch, &mut edge)?;

            match fall_through.destination {
                Some(destination) => successors.push((destination, edge)),
                None if fall_through.semantics.is_throw() => {
                    if block.exception_handlers.is_empty() {
                        unhandled_throw = Some(edge);
                    } else {
                        join_into(&mut exceptional, edge);
                    }
                }
                None => {}
            }
        }

        if let Some(exceptional) = exceptional {
            for handler in &block.exception_handlers {
                successors.push((*handler, exceptional.clone()));
            }
        }

        Ok(BlockEdges {
            output: state,
            successors,
            unhandled_throw,
        })
    }
}

struct BlockEdges<S> {
    output: S,
    successors: Vec<(BlockId, S)>,
    unhandled_throw: Option<S>,
}

fn join_into<S: AnalysisState>(target: &mut Option<S>, state: S) {
    match target {
        Some(existing) => {
            existing.join(&state);
        }
        None => *target = Some(state),
    }
}
