//src/sqlite_store.rs

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::{LpiError, Result};
use crate::store::TaxonomyStore;
use crate::types::{SubjectIdKind, TaxId, TaxNode};

const NODE_SQL: &str =
    "SELECT name, rank, parent_tax_id, weight FROM tax_node WHERE tax_id = ?1";

const TAXA_BY_SEQ_ID_SQL: &str = "SELECT c.tax_node_id FROM peptide a, pep_org b, organism c \
     WHERE a.pep_id = b.pep_id AND b.org_id = c.org_id AND a.seq_id = ?1";

const TAXA_BY_SEGUID_SQL: &str = "SELECT c.tax_node_id FROM peptide a, pep_org b, organism c \
     WHERE a.pep_id = b.pep_id AND b.org_id = c.org_id AND a.seguid = ?1";

/// `TaxonomyStore` over an LPI SQLite database (as written by `LpiDatabaseBuilder`).
///
/// The connection sits behind a mutex so the store can be shared between rayon workers.
#[derive(Debug)]
pub struct SqliteTaxonomyStore {
    conn: Mutex<Connection>,
    subject_ids: SubjectIdKind,
}

impl SqliteTaxonomyStore {
    /// Opens an existing database read-only.
    pub fn open<P: AsRef<Path>>(path: P, subject_ids: SubjectIdKind) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LpiError::DatabaseNotFound(path.to_path_buf()));
        }
        log::info!("opening database: {}", path.display());
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self::from_connection(conn, subject_ids))
    }

    pub fn from_connection(conn: Connection, subject_ids: SubjectIdKind) -> Self {
        Self {
            conn: Mutex::new(conn),
            subject_ids,
        }
    }

    pub fn subject_ids(&self) -> SubjectIdKind {
        self.subject_ids
    }

    fn taxa_sql(&self) -> &'static str {
        match self.subject_ids {
            SubjectIdKind::SeqId => TAXA_BY_SEQ_ID_SQL,
            SubjectIdKind::Seguid => TAXA_BY_SEGUID_SQL,
        }
    }
}

impl TaxonomyStore for SqliteTaxonomyStore {
    fn lookup_node(&self, tax_id: TaxId) -> Result<Option<TaxNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(NODE_SQL)?;
        let node = stmt
            .query_row(params![tax_id], |row| {
                Ok(TaxNode {
                    name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    rank: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    parent_id: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    // NULL weight reads as 0, same as a numeric column read of NULL
                    weight: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                })
            })
            .optional()?;
        Ok(node)
    }

    fn lookup_taxa_for_sequence(&self, sequence_id: &str) -> Result<Vec<TaxId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(self.taxa_sql())?;
        let rows = stmt.query_map(params![sequence_id], |row| {
            Ok(row.get::<_, Option<i64>>(0)?.unwrap_or(0))
        })?;

        let mut taxa = Vec::new();
        for tax_id in rows {
            taxa.push(tax_id?);
        }
        Ok(taxa)
    }
}
