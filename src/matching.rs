use strsim::normalized_levenshtein;

/// Minimum similarity for a candidate to count as a match.
pub const SIMILARITY_CUTOFF: f64 = 0.90;

/// Upper bound on how many matches are offered to the user.
pub const MAX_MATCHES: usize = 3;

/// Fuzzy-match a user-typed name against a list of candidate names.
///
/// Both sides are lower-cased before scoring with normalized Levenshtein
/// similarity. Candidates at or above [`SIMILARITY_CUTOFF`] are returned in
/// descending similarity order, capped at [`MAX_MATCHES`] distinct names.
/// An empty result is a valid "no match", not an error.
pub fn find_matches<'a, I>(query: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = query.to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(String, f64)> = Vec::new();
    for candidate in candidates {
        let normalized = candidate.to_lowercase();
        if scored.iter().any(|(name, _)| *name == normalized) {
            continue;
        }
        let similarity = normalized_levenshtein(&query, &normalized);
        if similarity >= SIMILARITY_CUTOFF {
            scored.push((normalized, similarity));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_MATCHES);
    scored.into_iter().map(|(name, _)| name).collect()
}
