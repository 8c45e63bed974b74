//! Keyword-overlap scoring for degraded retrieval.
//!
//! When the embedding service is down, `query_records` falls back to this
//! scorer over the structured corpus so retrieval degrades instead of
//! failing outright. The score is the fraction of distinct query terms that
//! appear in the candidate text (case-insensitive); ties are broken by
//! recency at the call site, same as the semantic path.

use std::collections::HashSet;

/// Split text into lowercase alphanumeric terms.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Score a candidate text against a query by term overlap.
///
/// Returns the fraction of distinct query terms present in the candidate,
/// in `[0.0, 1.0]`. An empty query scores 0 against everything.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn keyword_score(query: &str, candidate: &str) -> f32 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let candidate_terms = terms(candidate);
    let hits = query_terms
        .iter()
        .filter(|t| candidate_terms.contains(*t))
        .count();
    hits as f32 / query_terms.len() as f32
}
