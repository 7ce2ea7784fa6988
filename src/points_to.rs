//! Abstract locations and the points-to result consumed by the analysis.
//!
//! The alias analysis itself lives upstream; this module only models its
//! output. [`PointsToResult::parameter_aliases`] is a small approximation
//! for callers that have no real alias analysis: parameter references denote
//! the parameter's incoming object and allocations denote their creation
//! site. Local copies of parameters are tracked by the dataflow state, since
//! whether a local still holds a parameter depends on the program point.

use crate::ir::{BlockId, Cfg, MethodId, MethodSymbol, Operation, OperationId, OperationKind, ParameterSymbol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// What a storage location was created from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CreationSite {
    /// The object a parameter holds on method entry.
    Parameter,
    /// `this` / `Me` of the owning type.
    ThisOrMe,
    /// A heap allocation at the given operation.
    Allocation(OperationId),
    /// Approximation standing for any location.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolId {
    Parameter { method: MethodId, ordinal: u32 },
    Type(String),
}

/// A storage cell abstract values attach to. Equality and hashing are
/// structural over (creation site, owning symbol).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbstractLocation {
    site: CreationSite,
    symbol: Option<SymbolId>,
}

impl AbstractLocation {
    pub fn parameter(method: &MethodId, parameter: &ParameterSymbol) -> Self {
        Self {
            site: CreationSite::Parameter,
            symbol: Some(SymbolId::Parameter {
                method: method.clone(),
                ordinal: parameter.ordinal,
            }),
        }
    }

    pub fn this_or_me(containing_type: impl Into<String>) -> Self {
        Self {
            site: CreationSite::ThisOrMe,
            symbol: Some(SymbolId::Type(containing_type.into())),
        }
    }

    pub fn allocation(site: OperationId) -> Self {
        Self {
            site: CreationSite::Allocation(site),
            symbol: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            site: CreationSite::Unknown,
            symbol: None,
        }
    }

    pub fn site(&self) -> &CreationSite {
        &self.site
    }

    pub fn symbol(&self) -> Option<&SymbolId> {
        self.symbol.as_ref()
    }

    pub fn is_any(&self) -> bool {
        self.site == CreationSite::Unknown
    }

    /// Parameter ordinal when this is the incoming object of a parameter.
    pub fn parameter_ordinal(&self) -> Option<u32> {
        match (&self.site, &self.symbol) {
            (CreationSite::Parameter, Some(SymbolId::Parameter { ordinal, .. })) => Some(*ordinal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullState {
    Null,
    NotNull,
    #[default]
    MaybeNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointsToKind {
    Known,
    #[default]
    Unknown,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PointsToValue {
    pub kind: PointsToKind,
    pub locations: BTreeSet<AbstractLocation>,
    pub null_state: NullState,
}

impl PointsToValue {
    pub fn known(locations: impl IntoIterator<Item = AbstractLocation>, null_state: NullState) -> Self {
        Self {
            kind: PointsToKind::Known,
            locations: locations.into_iter().collect(),
            null_state,
        }
    }

    pub fn null() -> Self {
        Self {
            kind: PointsToKind::Known,
            locations: BTreeSet::new(),
            null_state: NullState::Null,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn invalid() -> Self {
        Self {
            kind: PointsToKind::Invalid,
            ..Self::default()
        }
    }

    fn union(&self, other: &Self) -> Self {
        match (self.kind, other.kind) {
            (PointsToKind::Known, PointsToKind::Known) => Self {
                kind: PointsToKind::Known,
                locations: self.locations.union(&other.locations).cloned().collect(),
                null_state: if self.null_state == other.null_state {
                    self.null_state
                } else {
                    NullState::MaybeNull
                },
            },
            (PointsToKind::Invalid, _) => other.clone(),
            (_, PointsToKind::Invalid) => self.clone(),
            _ => Self::unknown(),
        }
    }
}

/// Output of the upstream points-to (and null-state) analysis for one method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsToResult {
    values: HashMap<OperationId, PointsToValue>,
    null_at_block_entry: HashMap<(BlockId, AbstractLocation), NullState>,
    null_at_unhandled_throws: HashMap<AbstractLocation, NullState>,
}

impl PointsToResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, operation: OperationId) -> PointsToValue {
        self.values.get(&operation).cloned().unwrap_or_default()
    }

    /// Locations the operation may denote. Only `Known` results contribute.
    pub fn locations(&self, operation: OperationId) -> BTreeSet<AbstractLocation> {
        match self.values.get(&operation) {
            Some(v) if v.kind == PointsToKind::Known => v.locations.clone(),
            _ => BTreeSet::new(),
        }
    }

    pub fn null_state_at_block_entry(&self, block: BlockId, location: &AbstractLocation) -> Option<NullState> {
        self.null_at_block_entry
            .get(&(block, location.clone()))
            .copied()
    }

    /// Null state of `location` merged over every unhandled throw in the graph.
    pub fn null_state_at_unhandled_throws(&self, location: &AbstractLocation) -> Option<NullState> {
        self.null_at_unhandled_throws.get(location).copied()
    }

    pub fn set_value(&mut self, operation: OperationId, value: PointsToValue) {
        self.values.insert(operation, value);
    }

    pub fn set_null_state_at_block_entry(&mut self, block: BlockId, location: AbstractLocation, state: NullState) {
        self.null_at_block_entry.insert((block, location), state);
    }

    pub fn set_null_state_at_unhandled_throws(&mut self, location: AbstractLocation, state: NullState) {
        self.null_at_unhandled_throws.insert(location, state);
    }

    #[must_use]
    pub fn with_value(mut self, operation: OperationId, value: PointsToValue) -> Self {
        self.set_value(operation, value);
        self
    }

    #[must_use]
    pub fn with_null_state_at_block_entry(mut self, block: BlockId, location: AbstractLocation, state: NullState) -> Self {
        self.set_null_state_at_block_entry(block, location, state);
        self
    }

    #[must_use]
    pub fn with_null_state_at_unhandled_throws(mut self, location: AbstractLocation, state: NullState) -> Self {
        self.set_null_state_at_unhandled_throws(location, state);
        self
    }

    /// Flow-insensitive approximation used when no alias analysis is wired in.
    pub fn parameter_aliases(method: &MethodSymbol, cfg: &Cfg) -> Self {
        // Post-order so operands are resolved before the operations using them.
        fn visit(op: &Operation, method: &MethodSymbol, result: &mut PointsToResult) {
            for child in op.children() {
                visit(child, method, result);
            }
            let value = match &op.kind {
                OperationKind::ParameterReference { ordinal } => match method.parameter(*ordinal) {
                    Some(p) if p.is_reference_type => PointsToValue::known(
                        [AbstractLocation::parameter(&method.id, p)],
                        NullState::MaybeNull,
                    ),
                    Some(_) => PointsToValue::invalid(),
                    None => PointsToValue::unknown(),
                },
                OperationKind::InstanceReference => match &method.containing_type {
                    Some(ty) if !method.is_static => PointsToValue::known(
                        [AbstractLocation::this_or_me(ty.clone())],
                        NullState::NotNull,
                    ),
                    _ => PointsToValue::unknown(),
                },
                OperationKind::ObjectCreation { .. } => {
                    PointsToValue::known([AbstractLocation::allocation(op.id)], NullState::NotNull)
                }
                OperationKind::NullLiteral => PointsToValue::null(),
                OperationKind::Conversion { operand, .. } => result.value(operand.id),
                OperationKind::Coalesce { value, fallback } => {
                    let lhs = result.value(value.id);
                    if fallback.is_throw() {
                        PointsToValue { null_state: NullState::NotNull, ..lhs }
                    } else {
                        lhs.union(&result.value(fallback.id))
                    }
                }
                OperationKind::Assignment { value, .. } => result.value(value.id),
                _ => PointsToValue::unknown(),
            };
            result.set_value(op.id, value);
        }

        let mut result = PointsToResult::new();
        for root in cfg.operations() {
            visit(root, method, &mut result);
        }
        result
    }
}
