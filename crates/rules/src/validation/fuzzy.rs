//! "Did you mean" support for validation messages.

/// The candidate closest to `input` by case-insensitive edit distance, if it
/// is within half the length of the longer of the two strings.
pub(crate) fn fuzzy_match<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let needle = input.to_lowercase();
    let (best, distance) = candidates
        .iter()
        .map(|&c| (c, edit_distance(&needle, &c.to_lowercase())))
        .min_by_key(|&(_, d)| d)?;
    (distance <= input.len().max(best.len()) / 2).then_some(best)
}

/// Levenshtein distance over chars, one row of state.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diag
            } else {
                1 + diag.min(above).min(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

/// Lowercase ASCII alphanumeric segments joined by single hyphens.
pub(crate) fn is_kebab_case(s: &str) -> bool {
    !s.is_empty()
        && s.split('-')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE_NAMES: &[&str] = &[
        "geotag_enabled",
        "location_precise",
        "failed_login",
        "mfa_enabled",
        "strong_cipher",
    ];

    #[test]
    fn edit_distance_counts_insertions_and_substitutions() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("gte", "gte"), 0);
        assert_eq!(edit_distance("not_in", "notin"), 1);
    }

    #[test]
    fn suggests_close_names_only() {
        assert_eq!(fuzzy_match("geotag_enable", RULE_NAMES), Some("geotag_enabled"));
        assert_eq!(fuzzy_match("Failed_Login", RULE_NAMES), Some("failed_login"));
        assert_eq!(fuzzy_match("equal", &["equals", "not_equals", "matches"]), Some("equals"));
        assert_eq!(fuzzy_match("zzzzzzzzzzzzz", RULE_NAMES), None);
        assert_eq!(fuzzy_match("anything", &[]), None);
    }

    #[test]
    fn kebab_case_names() {
        assert!(is_kebab_case("opsec-social"));
        assert!(is_kebab_case("policy2"));
        assert!(!is_kebab_case("Opsec"));
        assert!(!is_kebab_case("-lead"));
        assert!(!is_kebab_case("double--hyphen"));
        assert!(!is_kebab_case("trail-"));
        assert!(!is_kebab_case(""));
    }
}
