use strsim::levenshtein;

/// Strip spaces, `@`, and underscores, lowercase the rest. Command names and
/// utterances normalize to the same shape before distance comparison.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '@' | '_'))
        .collect()
}

/// Levenshtein distance scaled by the longer input; 0.0 means identical.
pub fn normalized_levenshtein_distance(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f64 / max_len as f64
}

/// Best candidate whose normalized distance is within `max_distance`,
/// together with that distance.
pub fn find_best_match<'a, I>(input: &str, candidates: I, max_distance: f64) -> Option<(String, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let normalized_input = normalize_text(input);
    let mut best: Option<(String, f64)> = None;
    for candidate in candidates {
        let distance = normalized_levenshtein_distance(&normalized_input, &normalize_text(candidate));
        match &best {
            Some((_, best_distance)) if distance >= *best_distance => {}
            _ => best = Some((candidate.to_string(), distance)),
        }
    }
    best.filter(|(_, d)| *d <= max_distance)
}

/// Up to `n` candidates ranked by normalized distance, all within
/// `max_distance`. Used for "did you mean" suggestion lists.
pub fn find_close_matches<'a, I>(
    input: &str,
    candidates: I,
    n: usize,
    max_distance: f64,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let normalized_input = normalize_text(input);
    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .map(|c| {
            (
                c.to_string(),
                normalized_levenshtein_distance(&normalized_input, &normalize_text(c)),
            )
        })
        .filter(|(_, d)| *d <= max_distance)
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.into_iter().take(n).map(|(c, _)| c).collect()
}
