//src/classify_query.rs

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::cache::{LineageLookup, SequenceLookup};
use crate::types::{LpiResult, QueryGroup, TaxId, UNCLASSIFIED};

/// Steepness of the score-weight logistic curve.
const SCORE_WEIGHT_STEEPNESS: f64 = 15.0;
/// Distance below the best hit (as a fraction) where the curve crosses 0.5.
const SCORE_WEIGHT_MIDPOINT: f64 = 0.3;

/// Confidence weight of a hit scoring `x` times the best bit score of its query.
///
/// Logistic in `1 - x`: close to 1 for the best hit, 0.5 at `x = 0.7`, falling
/// towards 0 for weaker hits.
#[inline]
pub fn score_weight(x: f64) -> f64 {
    1.0 - 1.0 / (1.0 + (-SCORE_WEIGHT_STEEPNESS * ((1.0 - x) - SCORE_WEIGHT_MIDPOINT)).exp())
}

/// Accumulated vote mass per taxon, in the order taxa were first voted for.
pub type TaxonVotes = IndexMap<TaxId, f64, ahash::RandomState>;

/// Weights every hit against the best hit of the group and sums
/// `score_weight * taxon weight` per taxon of the hit's subject.
/// Hits whose score weight is below `min_score_weight` do not vote.
pub fn accumulate_votes<Q, T>(
    group: &QueryGroup,
    sequences: &Q,
    taxonomy: &T,
    min_score_weight: f64,
) -> TaxonVotes
where
    Q: SequenceLookup + ?Sized,
    T: LineageLookup + ?Sized,
{
    let mut votes = TaxonVotes::default();
    let max_bit_score = group
        .hits
        .iter()
        .map(|h| h.bit_score)
        .fold(0.0_f64, f64::max);
    if max_bit_score <= 0.0 {
        return votes;
    }

    for hit in &group.hits {
        let sw = score_weight(hit.bit_score / max_bit_score);
        if sw < min_score_weight {
            continue;
        }
        for &tax_id in sequences.taxon_ids(&hit.subject_id).iter() {
            *votes.entry(tax_id).or_insert(0.0) += sw * taxonomy.weight(tax_id);
        }
    }
    votes
}

/// Depth-weighted consensus over the lineages of all voted taxa.
///
/// Every taxon's vote is spread over its lineage from the root down. A candidate's
/// LPI averages, level by level, the share of that level's mass held by its own
/// ancestor there, with level `d` (root = 0) weighted `1 / (d + 1)`.
/// The highest LPI wins; on equal LPI the earlier voted taxon is kept.
pub fn resolve_lpi<T>(votes: &TaxonVotes, taxonomy: &T) -> LpiResult
where
    T: LineageLookup + ?Sized,
{
    let mut best = LpiResult::unclassified();

    match votes.len() {
        0 => return best,
        1 => {
            if let Some((&tax_id, _)) = votes.first() {
                best.score = 1.0;
                best.tax_id = tax_id;
            }
            return best;
        }
        _ => {}
    }

    let lineages: Vec<_> = votes
        .keys()
        .map(|&tax_id| taxonomy.lineage(tax_id))
        .collect();

    // Vote mass per depth and per ancestor node
    let mut level_count: Vec<f64> = Vec::new();
    let mut term_count: AHashMap<TaxId, f64> = AHashMap::new();
    for (term_list, &vote) in lineages.iter().zip(votes.values()) {
        for (lev, &node) in term_list.iter().rev().enumerate() {
            if level_count.len() <= lev {
                level_count.resize(lev + 1, 0.0);
            }
            level_count[lev] += vote;
            *term_count.entry(node).or_insert(0.0) += vote;
        }
    }

    for (term_list, &tax_id) in lineages.iter().zip(votes.keys()) {
        let mut prob_sum = 0.0;
        let mut denom_sum = 0.0;
        for (lev, node) in term_list.iter().rev().enumerate() {
            let level_weight = 1.0 / (lev + 1) as f64;
            let level_mass = level_count[lev];
            if level_mass > 0.0 {
                prob_sum += term_count.get(node).copied().unwrap_or(0.0) / level_mass * level_weight;
            }
            denom_sum += level_weight;
        }
        if denom_sum == 0.0 {
            continue;
        }

        let lpi = prob_sum / denom_sum;
        if lpi > best.score {
            best.score = lpi;
            best.tax_id = tax_id;
        }
    }

    if best.tax_id == UNCLASSIFIED {
        best.score = 0.0;
    }
    best
}

/// Best Lineage Probability Index for one query's hits.
///
/// 1. Weight each hit relative to the group's best bit score (`score_weight`),
///    dropping hits below `min_score_weight`.
/// 2. Vote for every taxon of each remaining hit's subject.
/// 3. One voted taxon wins outright with score 1; none gives the unclassified result;
///    several are resolved by `resolve_lpi`.
pub fn best_lpi<Q, T>(
    group: &QueryGroup,
    sequences: &Q,
    taxonomy: &T,
    min_score_weight: f64,
) -> LpiResult
where
    Q: SequenceLookup + ?Sized,
    T: LineageLookup + ?Sized,
{
    let votes = accumulate_votes(group, sequences, taxonomy, min_score_weight);
    log::debug!(
        "query {}: {} hits, {} voted taxa",
        group.query_id,
        group.hits.len(),
        votes.len()
    );
    resolve_lpi(&votes, taxonomy)
}
