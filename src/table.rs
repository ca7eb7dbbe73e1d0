//! Category-set tables for multi-label segmentation grids
//!
//! A segmentation grid cell holds a compact category id; the table resolves it
//! to the set of segment ids present in that cell's footprint. Category ids
//! are level-local: every downsampling step builds a fresh table, and ids are
//! never comparable across levels. Segment ids are the stable identifiers.

use crate::error::{Result, SegvolError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Value-comparable set of segment ids
pub type SegmentSet = BTreeSet<u64>;

/// Deduplicated mapping from category id to segment-id set.
///
/// Canonical: no two ids map to the same set. Ids grow monotonically and are
/// deterministic given the `resolve` call sequence; the table never shrinks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorySetTable {
    categories: BTreeMap<u32, SegmentSet>,
    ids: HashMap<SegmentSet, u32>,
    next_id: u32,
}

impl CategorySetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Native-resolution table: each raw grid value is its own category id,
    /// mapping to the singleton set of its segment id. A raw value of 0
    /// conventionally maps to segment 0, "no segment".
    pub fn identity(value_to_segment: &BTreeMap<u32, u64>) -> Self {
        let mut table = Self::new();
        for (&value, &segment) in value_to_segment {
            let set = SegmentSet::from([segment]);
            table.ids.insert(set.clone(), value);
            table.categories.insert(value, set);
        }
        table.next_id = value_to_segment.keys().max().map_or(0, |m| m + 1);
        table
    }

    /// Id for `set`, allocating the next unused id on first sight.
    ///
    /// Calling twice with a value-equal set returns the same id both times.
    pub fn resolve(&mut self, set: &SegmentSet) -> u32 {
        if let Some(&id) = self.ids.get(set) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(set.clone(), id);
        self.categories.insert(id, set.clone());
        id
    }

    /// Segment set behind one category id
    pub fn get(&self, id: u32) -> Option<&SegmentSet> {
        self.categories.get(&id)
    }

    /// Pure lookup of raw grid values to their segment sets.
    ///
    /// A value without an entry is an integrity error in whoever produced the
    /// grid; it aborts the caller and is never retried.
    pub fn categories_for(&self, values: &[u32]) -> Result<Vec<&SegmentSet>> {
        values
            .iter()
            .map(|&v| {
                self.categories
                    .get(&v)
                    .ok_or_else(|| SegvolError::LookupMissing(format!("category id {} has no table entry", v)))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Iterate (category id, segment set) in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SegmentSet)> {
        self.categories.iter().map(|(&id, set)| (id, set))
    }

    /// Persisted JSON form: `{"<category_id>": [segment_id, ...]}`
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let doc: PersistedTable = self.into();
        Ok(serde_json::to_vec(&doc)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc: PersistedTable = serde_json::from_slice(bytes)?;
        Ok(doc.into())
    }
}

/// On-disk form of a table; map keys serialize as JSON strings
#[derive(Debug, Serialize, Deserialize)]
struct PersistedTable(BTreeMap<u32, Vec<u64>>);

impl From<&CategorySetTable> for PersistedTable {
    fn from(table: &CategorySetTable) -> Self {
        PersistedTable(
            table
                .categories
                .iter()
                .map(|(&id, set)| (id, set.iter().copied().collect()))
                .collect(),
        )
    }
}

impl From<PersistedTable> for CategorySetTable {
    fn from(doc: PersistedTable) -> Self {
        let mut table = CategorySetTable::new();
        for (id, segments) in doc.0 {
            let set: SegmentSet = segments.into_iter().collect();
            table.ids.insert(set.clone(), id);
            table.categories.insert(id, set);
            table.next_id = table.next_id.max(id + 1);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_idempotent() {
        let mut table = CategorySetTable::new();
        let a = SegmentSet::from([1, 2, 3]);
        let b = SegmentSet::from([3, 2, 1]);
        let id_a = table.resolve(&a);
        let id_b = table.resolve(&b);
        assert_eq!(id_a, id_b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_allocates_monotonically() {
        let mut table = CategorySetTable::new();
        let first = table.resolve(&SegmentSet::from([1]));
        let second = table.resolve(&SegmentSet::from([2]));
        let third = table.resolve(&SegmentSet::from([1, 2]));
        assert!(first < second && second < third);
        assert_eq!(table.len(), 3);
        // Re-resolving never shrinks or reorders.
        table.resolve(&SegmentSet::from([2]));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_identity_table() {
        let map: BTreeMap<u32, u64> = [(0u32, 0u64), (1, 10), (2, 20)].into();
        let table = CategorySetTable::identity(&map);
        assert_eq!(table.get(1), Some(&SegmentSet::from([10])));
        assert_eq!(table.get(0), Some(&SegmentSet::from([0])));
        // The next allocated id must not collide with a raw value.
        let mut table = table;
        let id = table.resolve(&SegmentSet::from([10, 20]));
        assert_eq!(id, 3);
    }

    #[test]
    fn test_categories_for_missing_is_error() {
        let table = CategorySetTable::identity(&[(0u32, 0u64)].into());
        assert!(table.categories_for(&[0]).is_ok());
        assert!(matches!(
            table.categories_for(&[0, 7]),
            Err(SegvolError::LookupMissing(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut table = CategorySetTable::new();
        table.resolve(&SegmentSet::from([5]));
        table.resolve(&SegmentSet::from([5, 9]));
        let bytes = table.to_bytes().unwrap();
        // Keys are strings in the persisted document.
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc.get("0").is_some());
        let back = CategorySetTable::from_bytes(&bytes).unwrap();
        assert_eq!(back, table);
        // A restored table keeps allocating past its highest id.
        let mut back = back;
        assert_eq!(back.resolve(&SegmentSet::from([1, 2, 3])), 2);
    }
}
