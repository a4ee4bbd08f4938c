use std::collections::BTreeMap;

use crate::reconcile::cost_items::CostItemDictionaryMap;
use crate::reconcile::units::CanonicalUnitMap;
use crate::record::EntityKind;

/// Per-run canonicalization state. One instance per import run; owned by the
/// caller and handed to each pass by reference.
#[derive(Debug, Default)]
pub struct RunContext {
    pub units: CanonicalUnitMap,
    pub cost_items: CostItemDictionaryMap,
    unresolved_units: BTreeMap<EntityKind, usize>,
}

impl RunContext {
    pub fn new(units: CanonicalUnitMap, cost_items: CostItemDictionaryMap) -> Self {
        Self {
            units,
            cost_items,
            unresolved_units: BTreeMap::new(),
        }
    }

    pub fn note_unresolved_unit(&mut self, kind: EntityKind) {
        *self.unresolved_units.entry(kind).or_insert(0) += 1;
    }

    pub fn unresolved_units(&self, kind: EntityKind) -> usize {
        self.unresolved_units.get(&kind).copied().unwrap_or(0)
    }
}
