//src/update_database.rs

use std::io::BufRead;
use std::path::Path;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use sha1::{Digest, Sha1};

use crate::error::Result;
use crate::hits::open_input;
use crate::types::TaxId;

/// Default database file name used by both binaries.
pub const DEFAULT_DB_FILE: &str = "LPI_data.db";

/// SEGUID checksum of a sequence: base64 of the SHA-1 of the upper-cased residues,
/// without `=` padding.
pub fn seguid(seq: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(seq.to_uppercase().as_bytes());
    STANDARD_NO_PAD.encode(hasher.finalize())
}

/// Row counts inserted during one builder session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertCounts {
    pub total_seqs: usize,
    pub peptide: usize,
    pub organism: usize,
    pub tax_node: usize,
    pub pep_org: usize,
    pub sequence: usize,
}

/// Creates or extends an LPI database from taxonomy-annotated FASTA.
///
/// All inserts happen inside one transaction that is written by `commit`.
pub struct LpiDatabaseBuilder {
    conn: Connection,
    counts: InsertCounts,
}

impl LpiDatabaseBuilder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("connecting to database: {}", path.display());
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        let created = create_db_tables(&conn)?;
        if created > 0 {
            log::info!("created {created} DB tables");
        }
        conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(Self {
            conn,
            counts: InsertCounts::default(),
        })
    }

    pub fn counts(&self) -> InsertCounts {
        self.counts
    }

    /// Inserts the nodes of a `;`-separated taxonomy string that are not present yet
    /// and returns the ids from the top rank down to the last name.
    /// Nodes are matched by name and rank (position in the string).
    pub fn store_tax_str(&mut self, tax_str: &str) -> Result<Vec<TaxId>> {
        let mut parent_id: TaxId = 0;
        let mut tax_node_list = Vec::new();

        for (i, name) in tax_str.split(';').enumerate() {
            let rank = (i + 1) as i64;
            let existing: Option<TaxId> = self
                .conn
                .prepare_cached("SELECT tax_id FROM tax_node WHERE name = ?1 AND rank = ?2")?
                .query_row(params![name, rank], |row| row.get(0))
                .optional()?;

            let tax_id = match existing {
                Some(id) => id,
                None => {
                    self.conn
                        .prepare_cached(
                            "INSERT INTO tax_node (parent_tax_id, rank, name, weight) VALUES (?1, ?2, ?3, 1.0)",
                        )?
                        .execute(params![parent_id, rank, name])?;
                    self.counts.tax_node += 1;
                    self.conn.last_insert_rowid()
                }
            };

            tax_node_list.push(tax_id);
            parent_id = tax_id;
        }
        Ok(tax_node_list)
    }

    /// Stores one annotated sequence. Records with any empty field are skipped.
    pub fn store_seq(
        &mut self,
        seq_id: &str,
        ext_tax_id: &str,
        tax_str: &str,
        seq: &str,
        store_sequence: bool,
    ) -> Result<()> {
        if seq_id.is_empty() || ext_tax_id.is_empty() || tax_str.is_empty() || seq.is_empty() {
            return Ok(());
        }
        let org_name = tax_str.rsplit(';').next().unwrap_or(tax_str);

        let tax_list = self.store_tax_str(tax_str)?;
        let tax_list_str = tax_list
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(";");
        let tax_id = tax_list.last().copied().unwrap_or(0);

        // organism
        let org_id: Option<i64> = self
            .conn
            .prepare_cached("SELECT org_id FROM organism WHERE name = ?1 AND ext_id = ?2")?
            .query_row(params![org_name, ext_tax_id], |row| row.get(0))
            .optional()?;
        let org_id = match org_id {
            Some(id) => id,
            None => {
                self.conn
                    .prepare_cached(
                        "INSERT INTO organism (name, ext_id, tax_node_id, tax_str) VALUES (?1, ?2, ?3, ?4)",
                    )?
                    .execute(params![org_name, ext_tax_id, tax_id, tax_list_str])?;
                self.counts.organism += 1;
                self.conn.last_insert_rowid()
            }
        };

        // peptide
        let checksum = seguid(seq);
        let pep_id: Option<i64> = self
            .conn
            .prepare_cached("SELECT pep_id FROM peptide WHERE seguid = ?1 AND seq_id = ?2")?
            .query_row(params![checksum, seq_id], |row| row.get(0))
            .optional()?;
        let pep_id = match pep_id {
            Some(id) => id,
            None => {
                self.conn
                    .prepare_cached("INSERT INTO peptide (seguid, seq_id) VALUES (?1, ?2)")?
                    .execute(params![checksum, seq_id])?;
                self.counts.peptide += 1;
                self.conn.last_insert_rowid()
            }
        };

        // pep_org
        let linked = self
            .conn
            .prepare_cached("SELECT pep_id FROM pep_org WHERE pep_id = ?1 AND org_id = ?2")?
            .exists(params![pep_id, org_id])?;
        if !linked {
            self.conn
                .prepare_cached("INSERT INTO pep_org (pep_id, org_id) VALUES (?1, ?2)")?
                .execute(params![pep_id, org_id])?;
            self.counts.pep_org += 1;
        }

        if store_sequence {
            let stored = self
                .conn
                .prepare_cached("SELECT seq_id FROM sequence WHERE seq_id = ?1")?
                .exists(params![seq_id])?;
            if !stored {
                self.conn
                    .prepare_cached("INSERT INTO sequence (seq_id, seq) VALUES (?1, ?2)")?
                    .execute(params![seq_id, seq])?;
                self.counts.sequence += 1;
            }
        }
        Ok(())
    }

    /// Reads FASTA whose headers look like `>seq_id ext_tax_id tax;string;...`
    /// and stores every record. Returns the number of records seen.
    pub fn ingest_fasta<R: BufRead>(&mut self, reader: R, store_sequences: bool) -> Result<usize> {
        let mut header: Option<(String, String, String)> = None;
        let mut seq = String::new();
        let mut seen = 0usize;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end();
            if line.starts_with('>') {
                seen += 1;
                if let Some((id, tax_id, tax_str)) = header.take() {
                    self.store_seq(&id, &tax_id, &tax_str, &seq, store_sequences)?;
                }
                header = parse_fasta_header(line);
                if header.is_none() {
                    log::warn!("skipping FASTA record with malformed header: {line}");
                }
                seq.clear();
            } else {
                seq.extend(line.chars().filter(|c| !c.is_whitespace()));
            }
        }
        if let Some((id, tax_id, tax_str)) = header.take() {
            self.store_seq(&id, &tax_id, &tax_str, &seq, store_sequences)?;
        }

        self.counts.total_seqs += seen;
        Ok(seen)
    }

    /// Like `ingest_fasta`, from a plain, gzipped or bzipped file.
    pub fn ingest_fasta_file<P: AsRef<Path>>(&mut self, path: P, store_sequences: bool) -> Result<usize> {
        let reader = open_input(path.as_ref())?;
        self.ingest_fasta(reader, store_sequences)
    }

    /// Writes the transaction and returns what was inserted.
    pub fn commit(self) -> Result<InsertCounts> {
        self.conn.execute_batch("COMMIT")?;
        Ok(self.counts)
    }
}

/// Splits `>seq_id ext_tax_id tax;string` into its three fields.
fn parse_fasta_header(line: &str) -> Option<(String, String, String)> {
    let rest = line.strip_prefix('>')?;
    let (id, rest) = rest.split_once(char::is_whitespace)?;
    if id.is_empty() {
        return None;
    }
    let (tax_id, tax_str) = rest.trim_start().split_once(char::is_whitespace)?;
    let tax_str = tax_str.trim_start();
    if tax_str.is_empty() {
        return None;
    }
    Some((id.to_string(), tax_id.to_string(), tax_str.to_string()))
}

fn table_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    Ok(conn
        .prepare("SELECT name FROM sqlite_master WHERE type = ?1 AND name = ?2")?
        .exists(params![kind, name])?)
}

fn check_create(conn: &Connection, kind: &str, name: &str, create_sql: &str) -> Result<bool> {
    if table_exists(conn, kind, name)? {
        return Ok(false);
    }
    conn.execute_batch(create_sql)?;
    Ok(true)
}

/// Creates whichever tables and indices are missing; returns how many tables were created.
fn create_db_tables(conn: &Connection) -> Result<usize> {
    let mut created = 0;
    created += check_create(
        conn,
        "table",
        "peptide",
        "CREATE TABLE peptide(pep_id INTEGER PRIMARY KEY, seguid text, seq_id text)",
    )? as usize;
    if check_create(
        conn,
        "table",
        "tax_node",
        "CREATE TABLE tax_node(tax_id INTEGER PRIMARY KEY, parent_tax_id int, rank int, name text, weight real)",
    )? {
        conn.execute("INSERT INTO tax_node VALUES(0, NULL, 0, 'root', 1)", [])?;
        created += 1;
    }
    created += check_create(
        conn,
        "table",
        "organism",
        "CREATE TABLE organism(org_id INTEGER PRIMARY KEY, name text, ext_id text, tax_node_id int, tax_str text)",
    )? as usize;
    created += check_create(
        conn,
        "table",
        "pep_org",
        "CREATE TABLE pep_org(pep_id INTEGER NOT NULL, org_id INTEGER NOT NULL, PRIMARY KEY (pep_id, org_id))",
    )? as usize;
    created += check_create(
        conn,
        "table",
        "sequence",
        "CREATE TABLE sequence(seq_id text, seq text)",
    )? as usize;
    check_create(conn, "index", "seq_id_index", "CREATE INDEX seq_id_index ON peptide(seq_id)")?;
    check_create(conn, "index", "seguid_index", "CREATE INDEX seguid_index ON peptide(seguid)")?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_seguid_known_value() {
        assert_eq!(
            seguid("XCHGASCHTHASGCJHGJHJASCTASYCJASHHJASJHSAGDJHADATSF"),
            "HlN4r5GDkBSYh4TcCDqGzb7ZOZ8"
        );
        // Case-insensitive
        assert_eq!(seguid("mkvlat"), seguid("MKVLAT"));
    }

    #[test]
    fn test_parse_fasta_header() {
        assert_eq!(
            parse_fasta_header(">P1 9606 Eukaryota;Chordata;Homo sapiens"),
            Some((
                "P1".to_string(),
                "9606".to_string(),
                "Eukaryota;Chordata;Homo sapiens".to_string()
            ))
        );
        assert_eq!(parse_fasta_header(">P1 9606"), None);
        assert_eq!(parse_fasta_header("> P1 9606 A;B"), None);
    }

    #[test]
    fn test_store_tax_str_reuses_nodes() {
        let conn = Connection::open_in_memory().unwrap();
        let mut builder = LpiDatabaseBuilder::from_connection(conn).unwrap();

        let first = builder.store_tax_str("Bacteria;Proteobacteria;E. coli").unwrap();
        let second = builder.store_tax_str("Bacteria;Proteobacteria;Salmonella").unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[..2], second[..2]);
        assert_ne!(first[2], second[2]);
        assert_eq!(builder.counts().tax_node, 4);
    }

    #[test]
    fn test_ingest_fasta() {
        let fasta = "\
>P1 9606 Eukaryota;Chordata;Homo sapiens
MKV LAT
QQ
>P2 10090 Eukaryota;Chordata;Mus musculus
MKVLATQQ
>broken
MMMM
>P1 9606 Eukaryota;Chordata;Homo sapiens
MKVLATQQ
";
        let conn = Connection::open_in_memory().unwrap();
        let mut builder = LpiDatabaseBuilder::from_connection(conn).unwrap();
        let seen = builder.ingest_fasta(Cursor::new(fasta), true).unwrap();
        assert_eq!(seen, 4);

        let counts = builder.counts();
        assert_eq!(counts.total_seqs, 4);
        assert_eq!(counts.peptide, 2);
        assert_eq!(counts.organism, 2);
        assert_eq!(counts.tax_node, 4);
        assert_eq!(counts.pep_org, 2);
        assert_eq!(counts.sequence, 2);
    }

    #[test]
    fn test_reopen_keeps_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LPI_data.db");

        let mut builder = LpiDatabaseBuilder::open(&path).unwrap();
        builder.store_seq("P1", "1", "A;B", "MK", false).unwrap();
        builder.commit().unwrap();

        let mut builder = LpiDatabaseBuilder::open(&path).unwrap();
        builder.store_seq("P1", "1", "A;B", "MK", false).unwrap();
        let counts = builder.commit().unwrap();
        assert_eq!(counts, InsertCounts::default());
    }
}
