//src/types.rs

use std::fmt;

/// Taxon identifier as stored in the `tax_node` table. Non-positive ids never name a node.
pub type TaxId = i64;

/// Taxon id reported when a query could not be classified.
pub const UNCLASSIFIED: TaxId = -1;

/// Delimiter between names in a rendered lineage.
pub const LINEAGE_DELIMITER: char = ';';

/// One row of the taxonomy as returned by a `TaxonomyStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxNode {
    pub name: String,
    pub parent_id: TaxId,
    pub rank: i64,
    /// Raw reliability weight; clamped to 1.0 by the lineage cache.
    pub weight: f64,
}

/// Which column of the `peptide` table BLAST subject ids are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubjectIdKind {
    #[default]
    SeqId,
    Seguid,
}

/// A single homology search hit: subject id and bit score.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub subject_id: String,
    pub bit_score: f64,
}

impl Hit {
    pub fn new(subject_id: impl Into<String>, bit_score: f64) -> Self {
        Self {
            subject_id: subject_id.into(),
            bit_score,
        }
    }
}

/// All consecutive hits of one query in the input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryGroup {
    pub query_id: String,
    pub hits: Vec<Hit>,
}

impl QueryGroup {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            hits: Vec::new(),
        }
    }

    pub fn add_hit(&mut self, subject_id: impl Into<String>, bit_score: f64) {
        self.hits.push(Hit::new(subject_id, bit_score));
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Best Lineage Probability Index found for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LpiResult {
    pub score: f64,
    pub tax_id: TaxId,
}

impl LpiResult {
    pub fn unclassified() -> Self {
        Self {
            score: 0.0,
            tax_id: UNCLASSIFIED,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.tax_id > 0
    }
}

impl Default for LpiResult {
    fn default() -> Self {
        Self::unclassified()
    }
}

/// A structured representation of one output line:
/// `query_id \t score \t lineage`
#[derive(Debug, Clone, PartialEq)]
pub struct LpiOutputLine {
    pub query_id: String,
    pub score: f64,
    pub tax_id: TaxId,
    /// Root-to-leaf names joined by `;`, empty when unclassified.
    pub lineage: String,
}

impl fmt::Display for LpiOutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.query_id, format_score(self.score), self.lineage)
    }
}

/// Format a score with six significant digits in its shortest form,
/// e.g. `1`, `0.5`, `0.333333`, `2.5e-05`.
pub fn format_score(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }

    let exp = value.abs().log10().floor() as i32;
    if (-4..6).contains(&exp) {
        let decimals = (5 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    } else {
        let formatted = format!("{:.5e}", value);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) => {
                let exponent: i32 = exponent.parse().unwrap_or(0);
                format!(
                    "{}e{}{:02}",
                    trim_fraction(mantissa),
                    if exponent < 0 { '-' } else { '+' },
                    exponent.abs()
                )
            }
            None => formatted,
        }
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_score_shortest_form() {
        assert_eq!(format_score(1.0), "1");
        assert_eq!(format_score(0.0), "0");
        assert_eq!(format_score(0.5), "0.5");
        assert_eq!(format_score(1.0 / 3.0), "0.333333");
        assert_eq!(format_score(0.123456789), "0.123457");
        assert_eq!(format_score(0.99999999), "1");
        assert_eq!(format_score(0.000025), "2.5e-05");
    }

    #[test]
    fn test_output_line_display() {
        let line = LpiOutputLine {
            query_id: "q1".to_string(),
            score: 0.75,
            tax_id: 5,
            lineage: "root;child5".to_string(),
        };
        assert_eq!(line.to_string(), "q1\t0.75\troot;child5");

        let unclassified = LpiOutputLine {
            query_id: "q2".to_string(),
            score: 0.0,
            tax_id: UNCLASSIFIED,
            lineage: String::new(),
        };
        assert_eq!(unclassified.to_string(), "q2\t0\t");
    }

    #[test]
    fn test_unclassified_result() {
        let r = LpiResult::default();
        assert_eq!(r.tax_id, UNCLASSIFIED);
        assert_eq!(r.score, 0.0);
        assert!(!r.is_classified());
    }
}
