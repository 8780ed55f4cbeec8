//src/store.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::Result;
use crate::types::{TaxId, TaxNode};

/// Read contract of the reference database.
///
/// Implementations do no caching of their own; `TaxonomyCache` and `SequenceCache`
/// memoize on top of them.
pub trait TaxonomyStore {
    /// Name, parent, rank and weight of `tax_id`, or `None` if unknown.
    fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>>;

    /// All taxa associated with a subject sequence (empty if none).
    fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>>;
}

impl<T: TaxonomyStore + ?Sized> TaxonomyStore for &T {
    fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>> {
        (**self).lookup_node(tax_id)
    }

    fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>> {
        (**self).lookup_taxa_for_sequence(sequence_id)
    }
}

impl<T: TaxonomyStore + ?Sized> TaxonomyStore for Arc<T> {
    fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>> {
        (**self).lookup_node(tax_id)
    }

    fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>> {
        (**self).lookup_taxa_for_sequence(sequence_id)
    }
}

impl<T: TaxonomyStore + ?Sized> TaxonomyStore for Box<T> {
    fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>> {
        (**self).lookup_node(tax_id)
    }

    fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>> {
        (**self).lookup_taxa_for_sequence(sequence_id)
    }
}

/// Taxonomy held entirely in memory, filled from flat files (see `taxdb`) or by hand in tests.
/// Counts store round-trips so callers can check what the caches saved them.
#[derive(Debug, Default)]
pub struct MemoryTaxonomyStore {
    nodes: AHashMap<TaxId, TaxNode>,
    sequences: AHashMap<String, Vec<TaxId>>,
    node_lookups: AtomicUsize,
    sequence_lookups: AtomicUsize,
}

impl MemoryTaxonomyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, tax_id: TaxId, parent_id: TaxId, name: &str, weight: f64) {
        let rank = self.nodes.get(&parent_id).map(|p| p.rank + 1).unwrap_or(1);
        self.nodes.insert(
            tax_id,
            TaxNode {
                name: name.to_string(),
                parent_id,
                rank,
                weight,
            },
        );
    }

    /// Associate `sequence_id` with one more taxon.
    pub fn insert_sequence(&mut self, sequence_id: &str, tax_id: TaxId) {
        self.sequences
            .entry(sequence_id.to_string())
            .or_default()
            .push(tax_id);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn node_lookups(&self) -> usize {
        self.node_lookups.load(Ordering::Relaxed)
    }

    pub fn sequence_lookups(&self) -> usize {
        self.sequence_lookups.load(Ordering::Relaxed)
    }
}

impl TaxonomyStore for MemoryTaxonomyStore {
    fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>> {
        self.node_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.nodes.get(&tax_id).cloned())
    }

    fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>> {
        self.sequence_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.sequences.get(sequence_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_lookups() {
        let mut store = MemoryTaxonomyStore::new();
        store.insert_node(1, 0, "root", 1.0);
        store.insert_node(5, 1, "child5", 0.8);
        store.insert_sequence("s1", 5);
        store.insert_sequence("s1", 1);

        let node = store.lookup_node(5).unwrap().unwrap();
        assert_eq!(node.name, "child5");
        assert_eq!(node.parent_id, 1);
        assert_eq!(node.rank, 2);
        assert!(store.lookup_node(99).unwrap().is_none());

        assert_eq!(store.lookup_taxa_for_sequence("s1").unwrap(), vec![5, 1]);
        assert!(store.lookup_taxa_for_sequence("missing").unwrap().is_empty());

        assert_eq!(store.node_lookups(), 2);
        assert_eq!(store.sequence_lookups(), 2);
    }

    #[test]
    fn test_store_through_arc() {
        let mut store = MemoryTaxonomyStore::new();
        store.insert_node(7, 0, "top", 1.0);
        let shared = Arc::new(store);
        let by_ref: &dyn TaxonomyStore = &shared;
        assert_eq!(by_ref.lookup_node(7).unwrap().unwrap().name, "top");
        assert_eq!(shared.node_lookups(), 1);
    }
}
