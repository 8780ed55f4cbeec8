//src/cache.rs

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use crate::error::{LpiError, Result};
use crate::store::TaxonomyStore;
use crate::types::{TaxId, LINEAGE_DELIMITER};

/// Taxon ids from a node (index 0) up to its root (last index).
pub type Lineage = Arc<[TaxId]>;

/// Lineage and weight lookups the scorer needs.
pub trait LineageLookup {
    /// Leaf-to-root lineage of `tax_id`; empty if it cannot be resolved.
    fn lineage(&self, tax_id: TaxId) -> Lineage;

    /// Reliability weight of `tax_id`, at most 1.0.
    fn weight(&self, tax_id: TaxId) -> f64;
}

/// Subject sequence to taxa lookups the scorer needs.
pub trait SequenceLookup {
    fn taxon_ids(&self, sequence_id: &str) -> Arc<[TaxId]>;
}

/// Grow-only memo table that can be shared between threads.
///
/// Values are computed outside the lock; when two callers race on the same key
/// the first insert is kept and both see it.
#[derive(Debug)]
pub struct MemoMap<K, V> {
    map: RwLock<AHashMap<K, V>>,
}

impl<K, V> Default for MemoMap<K, V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(AHashMap::default()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> MemoMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().get(key).cloned()
    }

    /// Stores `value` unless `key` already has one. Returns whether it was stored.
    pub fn try_insert(&self, key: K, value: V) -> bool {
        let mut map = self.map.write();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        true
    }

    /// Memoized value for `key`, computing it with `compute` on a miss.
    /// Errors are returned as-is and nothing is stored for them.
    pub fn get_or_try_insert_with<Q, E, F>(&self, key: &Q, compute: F) -> std::result::Result<V, E>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let value = compute()?;
        let mut map = self.map.write();
        Ok(map.entry(key.to_owned()).or_insert(value).clone())
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

/// Memoizes lineages, names and clamped weights of taxonomy nodes.
///
/// Names and weights are recorded for every node a lineage walk passes through,
/// so `weight` only knows nodes that some earlier `lineage` call has visited.
pub struct TaxonomyCache<S> {
    store: S,
    lineages: MemoMap<TaxId, Lineage>,
    names: MemoMap<TaxId, String>,
    weights: MemoMap<TaxId, f64>,
}

impl<S: TaxonomyStore> TaxonomyCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            lineages: MemoMap::new(),
            names: MemoMap::new(),
            weights: MemoMap::new(),
        }
    }

    /// Lineage of `tax_id`, surfacing store failures and corrupt parent chains.
    /// Failed walks are not memoized.
    pub fn try_lineage(&self, tax_id: TaxId) -> Result<Lineage> {
        if tax_id <= 0 {
            return Ok(empty_lineage());
        }
        self.lineages
            .get_or_try_insert_with(&tax_id, || self.walk_to_root(tax_id))
    }

    fn walk_to_root(&self, tax_id: TaxId) -> Result<Lineage> {
        let mut term_list = Vec::new();
        let mut visited = AHashSet::new();
        let mut curr_taxid = tax_id;

        while curr_taxid > 0 {
            if !visited.insert(curr_taxid) {
                return Err(LpiError::CorruptTaxonomy {
                    start: tax_id,
                    repeated: curr_taxid,
                });
            }
            term_list.push(curr_taxid);

            // An unknown node ends the walk
            curr_taxid = match self.store.lookup_node(curr_taxid)? {
                Some(node) => {
                    let parent_id = node.parent_id;
                    self.weights.try_insert(curr_taxid, node.weight.min(1.0));
                    self.names.try_insert(curr_taxid, node.name);
                    parent_id
                }
                None => 0,
            };
        }
        Ok(term_list.into())
    }

    /// Display name recorded for `tax_id` by an earlier lineage walk.
    pub fn name(&self, tax_id: TaxId) -> Option<String> {
        self.names.get(&tax_id)
    }

    /// Root-to-leaf names of the lineage of `tax_id` joined by `;`.
    /// Empty for unknown, invalid or unclassified ids.
    pub fn render_lineage(&self, tax_id: TaxId) -> String {
        let term_list = self.lineage(tax_id);
        let mut rendered = String::new();
        for (i, id) in term_list.iter().rev().enumerate() {
            if i > 0 {
                rendered.push(LINEAGE_DELIMITER);
            }
            match self.names.get(id) {
                Some(name) => rendered.push_str(&name),
                None => rendered.push_str(&id.to_string()),
            }
        }
        rendered
    }

    /// Number of memoized lineages and of nodes with a recorded name.
    pub fn cached_counts(&self) -> (usize, usize) {
        (self.lineages.len(), self.names.len())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: TaxonomyStore> LineageLookup for TaxonomyCache<S> {
    fn lineage(&self, tax_id: TaxId) -> Lineage {
        match self.try_lineage(tax_id) {
            Ok(lineage) => lineage,
            Err(e) => {
                log::warn!("lineage of taxon {tax_id} unavailable: {e}");
                empty_lineage()
            }
        }
    }

    fn weight(&self, tax_id: TaxId) -> f64 {
        self.weights.get(&tax_id).unwrap_or(1.0)
    }
}

/// Memoizes the taxa associated with each subject sequence id.
pub struct SequenceCache<S> {
    store: S,
    taxa: MemoMap<String, Arc<[TaxId]>>,
}

impl<S: TaxonomyStore> SequenceCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            taxa: MemoMap::new(),
        }
    }

    /// Taxa of `sequence_id`, surfacing store failures (which are not memoized).
    pub fn try_taxon_ids(&self, sequence_id: &str) -> Result<Arc<[TaxId]>> {
        if sequence_id.is_empty() {
            return Ok(Arc::new([]));
        }
        self.taxa.get_or_try_insert_with(sequence_id, || {
            self.store
                .lookup_taxa_for_sequence(sequence_id)
                .map(Arc::from)
        })
    }

    pub fn cached_count(&self) -> usize {
        self.taxa.len()
    }
}

impl<S: TaxonomyStore> SequenceLookup for SequenceCache<S> {
    fn taxon_ids(&self, sequence_id: &str) -> Arc<[TaxId]> {
        match self.try_taxon_ids(sequence_id) {
            Ok(taxa) => taxa,
            Err(e) => {
                log::warn!("taxa of sequence {sequence_id} unavailable: {e}");
                Arc::new([])
            }
        }
    }
}

fn empty_lineage() -> Lineage {
    Arc::new([])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaxonomyStore;
    use crate::types::{TaxNode, UNCLASSIFIED};
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn small_tree() -> MemoryTaxonomyStore {
        let mut store = MemoryTaxonomyStore::new();
        store.insert_node(1, 0, "C", 1.0);
        store.insert_node(2, 1, "B", 3.0);
        store.insert_node(3, 2, "A", 0.25);
        store.insert_sequence("s1", 3);
        store.insert_sequence("s1", 2);
        store
    }

    /// Store that can be switched into failing every lookup.
    struct FlakyStore {
        inner: MemoryTaxonomyStore,
        failing: AtomicBool,
    }

    impl TaxonomyStore for FlakyStore {
        fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(LpiError::InvalidInput("store offline".into()));
            }
            self.inner.lookup_node(tax_id)
        }

        fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(LpiError::InvalidInput("store offline".into()));
            }
            self.inner.lookup_taxa_for_sequence(sequence_id)
        }
    }

    #[test]
    fn test_lineage_is_memoized() {
        let store = small_tree();
        let cache = TaxonomyCache::new(&store);

        let first = cache.lineage(3);
        assert_eq!(&first[..], &[3, 2, 1]);
        let lookups = store.node_lookups();
        assert_eq!(lookups, 3);

        let second = cache.lineage(3);
        assert_eq!(first, second);
        assert_eq!(store.node_lookups(), lookups);
    }

    #[test]
    fn test_invalid_taxon_ids() {
        let store = small_tree();
        let cache = TaxonomyCache::new(&store);
        assert!(cache.lineage(0).is_empty());
        assert!(cache.lineage(-4).is_empty());
        assert_eq!(cache.render_lineage(UNCLASSIFIED), "");
        assert_eq!(store.node_lookups(), 0);
    }

    #[test]
    fn test_weights_are_clamped_and_default_to_one() {
        let store = small_tree();
        let cache = TaxonomyCache::new(&store);

        // Not visited yet
        assert_eq!(cache.weight(3), 1.0);

        cache.lineage(3);
        assert_eq!(cache.weight(3), 0.25);
        assert_eq!(cache.weight(2), 1.0);
        assert_eq!(cache.weight(1), 1.0);
        assert_eq!(cache.weight(999), 1.0);
        for id in [1, 2, 3, 999] {
            assert!(cache.weight(id) <= 1.0);
        }
    }

    #[test]
    fn test_render_lineage_root_first() {
        let store = small_tree();
        let cache = TaxonomyCache::new(&store);
        assert_eq!(cache.render_lineage(3), "C;B;A");
        assert_eq!(cache.render_lineage(1), "C");
        assert_eq!(cache.name(2).as_deref(), Some("B"));
    }

    #[test]
    fn test_unknown_node_ends_walk() {
        let mut store = small_tree();
        // Parent 50 is not in the store
        store.insert_node(10, 50, "orphan", 1.0);
        let cache = TaxonomyCache::new(&store);

        assert_eq!(&cache.lineage(10)[..], &[10, 50]);
        assert_eq!(cache.render_lineage(10), "50;orphan");
        assert_eq!(&cache.lineage(77)[..], &[77]);
    }

    #[test]
    fn test_cycle_is_reported_not_followed() {
        let mut store = MemoryTaxonomyStore::new();
        store.insert_node(1, 2, "one", 1.0);
        store.insert_node(2, 1, "two", 1.0);
        store.insert_node(3, 3, "self", 1.0);
        let cache = TaxonomyCache::new(&store);

        let err = cache.try_lineage(1).unwrap_err();
        assert!(matches!(err, LpiError::CorruptTaxonomy { start: 1, repeated: 1 }));
        assert!(cache.lineage(3).is_empty());
        assert_eq!(cache.cached_counts().0, 0);
    }

    #[test]
    fn test_store_failure_is_not_memoized() {
        let store = FlakyStore {
            inner: small_tree(),
            failing: AtomicBool::new(true),
        };
        let taxonomy = TaxonomyCache::new(&store);
        let sequences = SequenceCache::new(&store);

        assert!(taxonomy.lineage(3).is_empty());
        assert!(sequences.taxon_ids("s1").is_empty());
        assert_eq!(sequences.cached_count(), 0);

        store.failing.store(false, Ordering::Relaxed);
        assert_eq!(&taxonomy.lineage(3)[..], &[3, 2, 1]);
        assert_eq!(&sequences.taxon_ids("s1")[..], &[3, 2]);
    }

    #[test]
    fn test_sequence_cache() {
        let store = small_tree();
        let cache = SequenceCache::new(&store);

        assert!(cache.taxon_ids("").is_empty());
        assert_eq!(store.sequence_lookups(), 0);

        let first = cache.taxon_ids("s1");
        let second = cache.taxon_ids("s1");
        assert_eq!(&first[..], &[3, 2]);
        assert_eq!(first, second);
        assert_eq!(store.sequence_lookups(), 1);

        // Empty answers are memoized too
        assert!(cache.taxon_ids("nothing").is_empty());
        assert!(cache.taxon_ids("nothing").is_empty());
        assert_eq!(store.sequence_lookups(), 2);
        assert_eq!(cache.cached_count(), 2);
    }

    #[test]
    fn test_concurrent_lookups_agree() {
        let store = small_tree();
        let cache = TaxonomyCache::new(&store);

        let lineages: Vec<Lineage> = (0..64).into_par_iter().map(|_| cache.lineage(3)).collect();
        assert!(lineages.iter().all(|l| &l[..] == &[3, 2, 1]));
        assert_eq!(cache.cached_counts(), (1, 3));
    }

    #[test]
    fn test_memo_map_keeps_first_insert() {
        let memo: MemoMap<String, u32> = MemoMap::new();
        assert!(memo.try_insert("a".to_string(), 1));
        assert!(!memo.try_insert("a".to_string(), 2));
        assert_eq!(memo.get("a"), Some(1));

        let v: std::result::Result<u32, ()> = memo.get_or_try_insert_with("b", || Ok(7));
        assert_eq!(v, Ok(7));
        let v: std::result::Result<u32, ()> = memo.get_or_try_insert_with("b", || Ok(8));
        assert_eq!(v, Ok(7));
        let e: std::result::Result<u32, &str> = memo.get_or_try_insert_with("c", || Err("no"));
        assert_eq!(e, Err("no"));
        assert_eq!(memo.len(), 2);
    }
}
