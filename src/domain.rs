//! Abstract value domain and per-program-point state of the analysis.

use crate::ir::{ParameterSymbol, SourceSpan};
use crate::points_to::AbstractLocation;
use crate::solver::AnalysisState;
use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;

/// Validation state of a tracked location.
///
/// Forms a lattice: `NotApplicable` is bottom, `Validated` and
/// `NotValidated` are incomparable, `MayBeValidated` is top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterValidationAbstractValue {
    /// Location is not tracked by the analysis.
    #[default]
    NotApplicable,
    NotValidated,
    Validated,
    /// Validated on some incoming path but not on another.
    MayBeValidated,
}

impl ParameterValidationAbstractValue {
    /// Least upper bound of two values.
    ///
    /// Tracked values are never joined with `NotApplicable`; callers filter
    /// untracked locations out before merging.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        use ParameterValidationAbstractValue::*;
        match (self, other) {
            (a, b) if a == b => a,
            (NotApplicable, v) | (v, NotApplicable) => {
                debug_assert!(false, "joined tracked value {v:?} with NotApplicable");
                v
            }
            _ => MayBeValidated,
        }
    }

    /// Whether dereferencing a location in this state is a hazardous usage.
    /// Optimistic analysis only reports definitely unvalidated locations.
    pub fn is_hazardous(self, pessimistic: bool) -> bool {
        match self {
            ParameterValidationAbstractValue::NotValidated => true,
            ParameterValidationAbstractValue::MayBeValidated => pessimistic,
            _ => false,
        }
    }
}

/// Mapping from tracked locations to their validation state at one program
/// point. Absent locations are implicitly `NotApplicable`.
///
/// Also records which locals hold a copy of a tracked parameter at this
/// point. A local is a copy after a join only if it is one on every
/// incoming path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterValidationAnalysisData {
    values: BTreeMap<AbstractLocation, ParameterValidationAbstractValue>,
    copies: BTreeMap<String, BTreeSet<AbstractLocation>>,
}

impl ParameterValidationAnalysisData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: &AbstractLocation) -> ParameterValidationAbstractValue {
        self.values.get(location).copied().unwrap_or_default()
    }

    pub fn is_tracked(&self, location: &AbstractLocation) -> bool {
        self.values.contains_key(location)
    }

    /// Sets a location's value; `NotApplicable` removes it.
    pub fn set(&mut self, location: AbstractLocation, value: ParameterValidationAbstractValue) {
        if value == ParameterValidationAbstractValue::NotApplicable {
            self.kill(&location);
        } else {
            self.values.insert(location, value);
        }
    }

    /// Overwrites the value of an already tracked location; untracked
    /// locations are left alone. Returns whether the location was tracked.
    pub fn update(&mut self, location: &AbstractLocation, value: ParameterValidationAbstractValue) -> bool {
        match self.values.get_mut(location) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn kill(&mut self, location: &AbstractLocation) -> Option<ParameterValidationAbstractValue> {
        self.values.remove(location)
    }

    /// Parameter locations `local` currently holds a copy of.
    pub fn copy_of(&self, local: &str) -> Option<&BTreeSet<AbstractLocation>> {
        self.copies.get(local)
    }

    /// Records that `local` was just assigned; it is a copy of `locations`
    /// from now on, or of nothing when the set is empty.
    pub fn assign_local(&mut self, local: &str, locations: BTreeSet<AbstractLocation>) {
        if locations.is_empty() {
            self.copies.remove(local);
        } else {
            self.copies.insert(local.to_string(), locations);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AbstractLocation, ParameterValidationAbstractValue)> {
        self.values.iter().map(|(l, v)| (l, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AnalysisState for ParameterValidationAnalysisData {
    fn join(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (location, value) in &other.values {
            match self.values.entry(location.clone()) {
                Entry::Occupied(mut slot) => {
                    let joined = slot.get().join(*value);
                    if joined != *slot.get() {
                        slot.insert(joined);
                        changed = true;
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(*value);
                    changed = true;
                }
            }
        }
        let before = self.copies.len();
        self.copies
            .retain(|local, locations| other.copies.get(local) == Some(&*locations));
        changed | (self.copies.len() != before)
    }
}

/// First hazardous usage of each tracked parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HazardousUsageMap {
    usages: BTreeMap<ParameterSymbol, SourceSpan>,
}

impl HazardousUsageMap {
    /// Records a usage, keeping the earliest source position per parameter.
    pub fn record(&mut self, parameter: &ParameterSymbol, span: SourceSpan) {
        match self.usages.get_mut(parameter) {
            Some(existing) if (span.start, span.end) < (existing.start, existing.end) => *existing = span,
            Some(_) => {}
            None => {
                self.usages.insert(parameter.clone(), span);
            }
        }
    }

    pub fn into_inner(self) -> BTreeMap<ParameterSymbol, SourceSpan> {
        self.usages
    }

    pub fn len(&self) -> usize {
        self.usages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ParameterValidationAbstractValue::*;
    use super::*;
    use crate::ir::MethodId;

    fn location(ordinal: u32) -> AbstractLocation {
        AbstractLocation::parameter(&MethodId::new("C.M"), &ParameterSymbol::new(ordinal, "p"))
    }

    #[test]
    fn join_of_validated_and_not_validated_is_may_be_validated() {
        assert_eq!(Validated.join(NotValidated), MayBeValidated);
        assert_eq!(NotValidated.join(Validated), MayBeValidated);
        assert_eq!(MayBeValidated.join(Validated), MayBeValidated);
        assert_eq!(MayBeValidated.join(NotValidated), MayBeValidated);
    }

    #[test]
    fn join_is_idempotent() {
        for v in [NotApplicable, NotValidated, Validated, MayBeValidated] {
            assert_eq!(v.join(v), v);
        }

        let mut data = ParameterValidationAnalysisData::new();
        data.set(location(0), Validated);
        data.set(location(1), MayBeValidated);
        let snapshot = data.clone();
        assert!(!data.join(&snapshot));
        assert_eq!(data, snapshot);
    }

    #[test]
    fn join_never_loses_validation_information() {
        let mut a = ParameterValidationAnalysisData::new();
        a.set(location(0), Validated);
        let mut b = ParameterValidationAnalysisData::new();
        b.set(location(0), NotValidated);

        assert!(a.join(&b));
        assert_eq!(a.get(&location(0)), MayBeValidated);
    }

    #[test]
    fn join_into_bottom_copies_other_state() {
        let mut bottom = ParameterValidationAnalysisData::new();
        let mut other = ParameterValidationAnalysisData::new();
        other.set(location(0), NotValidated);

        assert!(bottom.join(&other));
        assert_eq!(bottom, other);
    }

    #[test]
    fn setting_not_applicable_kills_the_location() {
        let mut data = ParameterValidationAnalysisData::new();
        data.set(location(0), NotValidated);
        data.set(location(0), NotApplicable);
        assert!(!data.is_tracked(&location(0)));
        assert!(!data.update(&location(0), Validated));
    }

    #[test]
    fn kill_returns_the_previous_value() {
        let mut data = ParameterValidationAnalysisData::new();
        data.set(location(0), Validated);
        assert_eq!(data.kill(&location(0)), Some(Validated));
        assert_eq!(data.kill(&location(0)), None);
        assert_eq!(data.get(&location(0)), NotApplicable);
    }

    #[test]
    fn local_copy_survives_a_join_only_when_present_on_both_paths() {
        let mut a = ParameterValidationAnalysisData::new();
        a.set(location(0), NotValidated);
        a.assign_local("y", BTreeSet::from([location(0)]));
        a.assign_local("z", BTreeSet::from([location(0)]));
        let mut b = a.clone();
        b.assign_local("z", BTreeSet::new());

        assert!(a.join(&b));
        assert_eq!(a.copy_of("y"), Some(&BTreeSet::from([location(0)])));
        assert_eq!(a.copy_of("z"), None);
        assert!(!a.join(&b));
    }

    #[test]
    fn hazardous_map_keeps_earliest_usage() {
        let param = ParameterSymbol::new(0, "x");
        let mut map = HazardousUsageMap::default();
        map.record(&param, SourceSpan::new(40, 50));
        map.record(&param, SourceSpan::new(10, 20));
        map.record(&param, SourceSpan::new(30, 35));

        let usages = map.into_inner();
        assert_eq!(usages.len(), 1);
        assert_eq!(usages[&param], SourceSpan::new(10, 20));
    }
}
