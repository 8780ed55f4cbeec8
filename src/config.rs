//src/config.rs

use std::path::PathBuf;

use crate::error::{LpiError, Result};
use crate::types::SubjectIdKind;
use crate::update_database::DEFAULT_DB_FILE;

/// Hits whose score weight falls below this are ignored unless configured otherwise.
pub const DEFAULT_MIN_SCORE_WEIGHT: f64 = 0.1;

/// Query groups classified together per parallel batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Settings of one classification run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyConfig {
    /// SQLite database written by `lpi-update-database`.
    pub db_path: PathBuf,
    pub min_score_weight: f64,
    /// Whether BLAST subject ids are sequence ids or SEGUID checksums.
    pub subject_ids: SubjectIdKind,
    /// 1 = sequential; more classifies batches of query groups on a rayon pool.
    pub threads: usize,
    pub batch_size: usize,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            min_score_weight: DEFAULT_MIN_SCORE_WEIGHT,
            subject_ids: SubjectIdKind::SeqId,
            threads: 1,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ClassifyConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_score_weight.is_finite() || self.min_score_weight < 0.0 {
            return Err(LpiError::InvalidInput(format!(
                "minimum score weight must be a non-negative number, got {}",
                self.min_score_weight
            )));
        }
        if self.threads == 0 {
            return Err(LpiError::InvalidInput("thread count must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(LpiError::InvalidInput("batch size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassifyConfig::default();
        assert_eq!(config.db_path, PathBuf::from("LPI_data.db"));
        assert_eq!(config.min_score_weight, 0.1);
        assert_eq!(config.subject_ids, SubjectIdKind::SeqId);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_weight = ClassifyConfig {
            min_score_weight: f64::NAN,
            ..Default::default()
        };
        assert!(bad_weight.validate().is_err());

        let no_threads = ClassifyConfig {
            threads: 0,
            ..Default::default()
        };
        assert!(no_threads.validate().is_err());
    }
}
