use serde::Serialize;
use std::collections::BTreeSet;

/// Class ids a toolkit is expected to contain.
///
/// Quantities are not tracked; reconciliation is presence-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedInventory {
    toolkit_id: i64,
    classes: BTreeSet<u32>,
}

impl ExpectedInventory {
    pub fn new(toolkit_id: i64, classes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            toolkit_id,
            classes: classes.into_iter().collect(),
        }
    }

    pub fn toolkit_id(&self) -> i64 {
        self.toolkit_id
    }

    pub fn classes(&self) -> &BTreeSet<u32> {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Expected classes confirmed by the detector
    pub found: BTreeSet<u32>,
    pub manual_review: bool,
}

impl Reconciliation {
    pub fn missing<'a>(&'a self, expected: &'a ExpectedInventory) -> impl Iterator<Item = u32> + 'a {
        expected
            .classes()
            .iter()
            .copied()
            .filter(|class| !self.found.contains(class))
    }
}

/// Intersect detected classes with the expected inventory.
///
/// Review is required whenever any expected class is missing; an empty
/// inventory is vacuously complete.
pub fn reconcile(detected: &BTreeSet<u32>, expected: &ExpectedInventory) -> Reconciliation {
    let found: BTreeSet<u32> = expected
        .classes()
        .iter()
        .copied()
        .filter(|class| detected.contains(class))
        .collect();
    let manual_review = found.len() < expected.len();

    Reconciliation { found, manual_review }
}
