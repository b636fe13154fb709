//! In-process trigram similarity.
//!
//! Pure computation: no suspension points. Strings are lowercased, split on
//! non-alphanumeric boundaries, and each token is padded (two leading
//! blanks, one trailing) before being windowed into character trigrams.
//! Similarity is shared-trigram count over the union.

use std::collections::HashSet;

fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", token).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Similarity in [0, 1]; 0 when either side has no trigrams.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

/// Score a record against a query: max of title and excerpt similarity.
pub fn score(query: &str, title: &str, excerpt: &str) -> f64 {
    similarity(query, title).max(similarity(query, excerpt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert!((similarity("family rules", "family rules") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(similarity("abcdef", "xyzuvw"), 0.0);
    }

    #[test]
    fn partial_overlap_is_between() {
        let s = similarity("严氏家训", "严氏家训有哪些");
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn score_takes_max_of_title_and_excerpt() {
        let q = "严氏家训";
        let s = score(q, "严氏家训", "完全无关的内容");
        assert!((s - 1.0).abs() < 1e-9);
    }
}
