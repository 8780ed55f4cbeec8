// src/lib.rs
pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod sqlite_store;
pub mod taxdb;
pub mod cache;
pub mod classify_query;
pub mod hits;
pub mod update_database;

use std::fmt::Write as FmtWrite;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::cache::{SequenceCache, TaxonomyCache};
use crate::classify_query::best_lpi;
use crate::config::ClassifyConfig;
use crate::error::{LpiError, Result};
use crate::hits::{open_input, HitGroupReader};
use crate::sqlite_store::SqliteTaxonomyStore;
use crate::store::TaxonomyStore;
use crate::types::{LpiOutputLine, QueryGroup};

/// Counters of one classification run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunStats {
    /// Query groups with at least one hit.
    pub queries: usize,
    pub classified: usize,
    pub elapsed: Duration,
}

/// The per-run classification state: both lookup caches over one store plus the
/// score-weight threshold. Caches grow for the lifetime of the classifier.
pub struct Classifier<S> {
    taxonomy: TaxonomyCache<Arc<S>>,
    sequences: SequenceCache<Arc<S>>,
    min_score_weight: f64,
}

impl<S: TaxonomyStore> Classifier<S> {
    pub fn new(store: S, min_score_weight: f64) -> Self {
        let store = Arc::new(store);
        Self {
            taxonomy: TaxonomyCache::new(Arc::clone(&store)),
            sequences: SequenceCache::new(store),
            min_score_weight,
        }
    }

    pub fn taxonomy(&self) -> &TaxonomyCache<Arc<S>> {
        &self.taxonomy
    }

    pub fn sequences(&self) -> &SequenceCache<Arc<S>> {
        &self.sequences
    }

    /// Scores one query group and renders the winning lineage.
    pub fn classify_group(&self, group: &QueryGroup) -> LpiOutputLine {
        let lpi = best_lpi(group, &self.sequences, &self.taxonomy, self.min_score_weight);
        LpiOutputLine {
            query_id: group.query_id.clone(),
            score: lpi.score,
            tax_id: lpi.tax_id,
            lineage: self.taxonomy.render_lineage(lpi.tax_id),
        }
    }

    /// Classifies every group read from `reader` in input order, handing each
    /// output line to `sink`.
    pub fn classify_all<R, F>(&self, reader: R, mut sink: F) -> Result<RunStats>
    where
        R: BufRead,
        F: FnMut(LpiOutputLine) -> Result<()>,
    {
        let start = Instant::now();
        let mut stats = RunStats::default();
        for group in HitGroupReader::new(reader) {
            let line = self.classify_group(&group?);
            record(&mut stats, &line);
            sink(line)?;
        }
        stats.elapsed = start.elapsed();
        Ok(stats)
    }
}

impl<S: TaxonomyStore + Send + Sync> Classifier<S> {
    /// Classifies a batch of groups on the current rayon pool; output keeps input order.
    pub fn classify_batch(&self, groups: &[QueryGroup]) -> Vec<LpiOutputLine> {
        groups.par_iter().map(|g| self.classify_group(g)).collect()
    }

    /// Like `classify_all`, classifying `batch_size` groups at a time on `pool`.
    pub fn classify_all_parallel<R, F>(
        &self,
        reader: R,
        pool: &rayon::ThreadPool,
        batch_size: usize,
        mut sink: F,
    ) -> Result<RunStats>
    where
        R: BufRead,
        F: FnMut(LpiOutputLine) -> Result<()>,
    {
        let start = Instant::now();
        let mut stats = RunStats::default();
        let mut groups = HitGroupReader::new(reader);
        let mut batch = Vec::with_capacity(batch_size);

        loop {
            batch.clear();
            for group in groups.by_ref().take(batch_size) {
                batch.push(group?);
            }
            if batch.is_empty() {
                break;
            }

            let lines = pool.install(|| self.classify_batch(&batch));
            for line in lines {
                record(&mut stats, &line);
                sink(line)?;
            }
        }
        stats.elapsed = start.elapsed();
        Ok(stats)
    }
}

fn record(stats: &mut RunStats, line: &LpiOutputLine) {
    stats.queries += 1;
    if line.tax_id > 0 {
        stats.classified += 1;
    }
}

/// Runs a classification over `reader` with the given store, sequentially or on a
/// rayon pool depending on `config.threads`.
pub fn classify_reader<S, R, F>(
    store: S,
    reader: R,
    config: &ClassifyConfig,
    sink: F,
) -> Result<RunStats>
where
    S: TaxonomyStore + Send + Sync,
    R: BufRead,
    F: FnMut(LpiOutputLine) -> Result<()>,
{
    config.validate()?;
    let classifier = Classifier::new(store, config.min_score_weight);

    let stats = if config.threads > 1 {
        log::warn!(
            "classifying on {} threads: taxon weights below 1 may apply in a different order than a sequential run",
            config.threads
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| LpiError::InvalidInput(format!("cannot start thread pool: {e}")))?;
        classifier.classify_all_parallel(reader, &pool, config.batch_size, sink)?
    } else {
        classifier.classify_all(reader, sink)?
    };

    let (lineages, nodes) = classifier.taxonomy().cached_counts();
    log::info!(
        "classified {} of {} queries; cached {} lineages, {} taxa, {} sequences",
        stats.classified,
        stats.queries,
        lineages,
        nodes,
        classifier.sequences().cached_count()
    );
    log::info!("time (ms): {}", stats.elapsed.as_millis());
    Ok(stats)
}

/// Classification output of a whole hit file kept in memory.
pub struct ClassificationResults {
    /// One line per query group, in input order
    pub lpi_output_lines: Vec<LpiOutputLine>,
    pub stats: RunStats,
}

impl ClassificationResults {
    /// Generate the tab-separated output text on demand
    pub fn get_lpi_output(&self) -> String {
        let mut output = String::new();
        for line in &self.lpi_output_lines {
            writeln!(output, "{line}").unwrap();
        }
        output
    }
}

/// Classifies a BLAST tabular hit file (`-` for stdin, `.gz` accepted) against the
/// SQLite database named in `config`.
pub fn classify_hits<P: AsRef<Path>>(hits_path: P, config: &ClassifyConfig) -> Result<ClassificationResults> {
    let store = SqliteTaxonomyStore::open(&config.db_path, config.subject_ids)?;

    log::info!("reading file: {}", hits_path.as_ref().display());
    let reader = open_input(hits_path.as_ref())?;

    let mut lpi_output_lines = Vec::new();
    let stats = classify_reader(store, reader, config, |line| {
        lpi_output_lines.push(line);
        Ok(())
    })?;

    Ok(ClassificationResults {
        lpi_output_lines,
        stats,
    })
}
