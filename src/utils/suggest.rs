//! "Did you mean?" lookups for misspelled variable and macro names.

/// The candidate closest to `target` by edit distance, if any is close
/// enough to be a plausible typo. Exact matches are never suggested.
pub fn nearest<'a>(target: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let limit = (target.chars().count() / 3).max(2);
    candidates
        .into_iter()
        .filter(|c| *c != target)
        .filter_map(|c| {
            let dist = strsim::levenshtein(target, c);
            if dist <= limit {
                Some((c, dist))
            } else {
                None
            }
        })
        .min_by_key(|(_, d)| *d)
        .map(|(s, _)| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_picks_closest() {
        let names = ["gold", "health", "golden"];
        assert_eq!(nearest("glod", names), Some("gold".to_string()));
        assert_eq!(nearest("helth", names), Some("health".to_string()));
    }

    #[test]
    fn test_nearest_rejects_distant_names() {
        assert_eq!(nearest("inventory", ["gold", "health"]), None);
        assert_eq!(nearest("gold", ["gold"]), None);
    }
}
