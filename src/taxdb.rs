//src/taxdb.rs

use std::io::BufRead;
use std::path::Path;

use crate::error::Result;
use crate::hits::open_input;
use crate::store::MemoryTaxonomyStore;
use crate::types::TaxId;

/// Parses a taxDB file in the format:
/// ```text
/// <taxid>\t<parentid>\t<taxname>\t<weight>
/// ```
/// into a `MemoryTaxonomyStore`. The weight column is optional (defaults to 1.0).
/// Lines with fewer than three fields or a non-positive taxid are skipped.
pub fn parse_taxdb<P: AsRef<Path>>(filepath: P) -> Result<MemoryTaxonomyStore> {
    let mut store = MemoryTaxonomyStore::new();
    read_taxdb_into(open_input(filepath.as_ref())?, &mut store)?;
    Ok(store)
}

/// Adds the nodes of a taxDB reader to `store`; returns how many were read.
pub fn read_taxdb_into<R: BufRead>(reader: R, store: &mut MemoryTaxonomyStore) -> Result<usize> {
    let mut count = 0;
    for line_result in reader.lines() {
        let line = line_result?;
        // e.g. "2\t1\tEukaryota\t1.0"
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 3 {
            continue;
        }

        let taxid: TaxId = parts[0].trim().parse().unwrap_or(0);
        let parentid: TaxId = parts[1].trim().parse().unwrap_or(0);
        let taxname = parts[2].trim();
        let weight: f64 = parts
            .get(3)
            .and_then(|w| w.trim().parse().ok())
            .unwrap_or(1.0);

        if taxid > 0 {
            store.insert_node(taxid, parentid, taxname, weight);
            count += 1;
        }
    }
    Ok(count)
}

/// Parses a sequence map file: `<seq_id>\t<taxid>` per line. A sequence may appear
/// on several lines to map to several taxa.
pub fn parse_seqmap<P: AsRef<Path>>(filepath: P, store: &mut MemoryTaxonomyStore) -> Result<usize> {
    read_seqmap_into(open_input(filepath.as_ref())?, store)
}

pub fn read_seqmap_into<R: BufRead>(reader: R, store: &mut MemoryTaxonomyStore) -> Result<usize> {
    let mut count = 0;
    for line_result in reader.lines() {
        let line = line_result?;
        let Some((seq_id, taxid)) = line.split_once('\t') else {
            continue;
        };
        let seq_id = seq_id.trim();
        let taxid: TaxId = taxid.trim().parse().unwrap_or(0);
        if seq_id.is_empty() || taxid <= 0 {
            continue;
        }
        store.insert_sequence(seq_id, taxid);
        count += 1;
    }
    Ok(count)
}

/// Loads a taxDB file plus its sequence map.
pub fn load_flat_store<P: AsRef<Path>, Q: AsRef<Path>>(
    taxdb_path: P,
    seqmap_path: Q,
) -> Result<MemoryTaxonomyStore> {
    let mut store = parse_taxdb(&taxdb_path)?;
    let mapped = parse_seqmap(&seqmap_path, &mut store)?;
    log::info!(
        "loaded {} taxa from {} and {} sequence mappings from {}",
        store.node_count(),
        taxdb_path.as_ref().display(),
        mapped,
        seqmap_path.as_ref().display()
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaxonomyStore;
    use std::io::Cursor;

    #[test]
    fn test_read_taxdb() {
        let data = "1\t0\troot\t1.0\n5\t1\tchild5\t2.5\nbad line\n0\t0\tzero\n6\t1\tchild6\n";
        let mut store = MemoryTaxonomyStore::new();
        let n = read_taxdb_into(Cursor::new(data), &mut store).unwrap();
        assert_eq!(n, 3);

        let child = store.lookup_node(5).unwrap().unwrap();
        assert_eq!(child.parent_id, 1);
        // Stored raw; clamping is the lineage cache's job
        assert_eq!(child.weight, 2.5);
        assert_eq!(store.lookup_node(6).unwrap().unwrap().weight, 1.0);
        assert!(store.lookup_node(0).unwrap().is_none());
    }

    #[test]
    fn test_read_seqmap() {
        let data = "s1\t5\ns1\t6\ns2\tx\n\t5\ns3\t6\n";
        let mut store = MemoryTaxonomyStore::new();
        let n = read_seqmap_into(Cursor::new(data), &mut store).unwrap();
        assert_eq!(n, 3);
        assert_eq!(store.lookup_taxa_for_sequence("s1").unwrap(), vec![5, 6]);
        assert!(store.lookup_taxa_for_sequence("s2").unwrap().is_empty());
    }

    #[test]
    fn test_load_flat_store_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let taxdb = dir.path().join("taxDB");
        let seqmap = dir.path().join("seqmap.tsv");
        std::fs::write(&taxdb, "1\t0\troot\t1\n5\t1\tchild5\t1\n").unwrap();
        std::fs::write(&seqmap, "s1\t5\n").unwrap();

        let store = load_flat_store(&taxdb, &seqmap).unwrap();
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.sequence_count(), 1);
    }
}
