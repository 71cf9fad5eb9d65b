//! Region Estimator (component D).
//!
//! Reduces a list of geocoded tweets to a single consensus location by
//! hierarchical voting (city -> region -> country), plus a top-3-word
//! summary of the felt cities.

use std::collections::HashMap;

use crate::model::{Consensus, GeocodeResult};

/// Minimum vote count required for a level's top key to become the
/// consensus.
const MATCH_COUNT: usize = 3;

/// Tally insertion-ordered keys and return the most-voted one, breaking ties
/// by earliest insertion (stable sort keeps this deterministic).
fn top_key(results: &[GeocodeResult], key_fn: impl Fn(&GeocodeResult) -> Option<String>) -> Option<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for result in results {
        if let Some(key) = key_fn(result) {
            if !counts.contains_key(&key) {
                order.push(key.clone());
            }
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    order
        .into_iter()
        .map(|key| {
            let count = counts[&key];
            (key, count)
        })
        .max_by_key(|(_, count)| *count)
}

/// Elect a consensus location from a set of geocoded, triggering tweets.
/// Returns `None` ("undetermined") if no level reaches [`MATCH_COUNT`].
pub fn estimate_region(results: &[GeocodeResult]) -> Option<Consensus> {
    let total = results.len();
    if total == 0 {
        return None;
    }

    let l3 = top_key(results, |r| {
        if r.l3.is_empty() {
            None
        } else if !r.l1.is_empty() {
            Some(format!("{}, {}, {}", r.l3, r.l1, r.l0))
        } else {
            Some(format!("{}, {}", r.l3, r.l0))
        }
    });
    if let Some((key, count)) = l3 {
        if count >= MATCH_COUNT {
            return Some(Consensus { key, count, total });
        }
    }

    let l1 = top_key(results, |r| {
        if r.l1.is_empty() {
            None
        } else {
            Some(format!("{}, {}", r.l1, r.l0))
        }
    });
    if let Some((key, count)) = l1 {
        if count >= MATCH_COUNT {
            return Some(Consensus { key, count, total });
        }
    }

    let l0 = top_key(results, |r| {
        if r.l0.is_empty() {
            None
        } else {
            Some(r.l0.clone())
        }
    });
    if let Some((key, count)) = l0 {
        if count >= MATCH_COUNT {
            return Some(Consensus { key, count, total });
        }
    }

    None
}

/// Extract the top 3 most common words across every geocoded tweet's `l3`
/// (city) field. Returns fewer than 3 entries if fewer than 3 distinct
/// words were present, rather than indexing out of bounds (SPEC_FULL.md
/// §4.D Open Question resolution).
pub fn top_three_words(results: &[GeocodeResult]) -> Vec<(String, usize)> {
    let joined = results
        .iter()
        .map(|r| r.l3.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let cleaned: String = joined
        .chars()
        .map(|c| if matches!(c, '-' | '.' | ',' | '\n') { ' ' } else { c })
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for word in cleaned.split_whitespace() {
        if !counts.contains_key(word) {
            order.push(word);
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = order.into_iter().map(|w| (w, counts[w])).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(3)
        .map(|(word, count)| (word.to_owned(), count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoded(l3: &str, l1: &str, l0: &str) -> GeocodeResult {
        GeocodeResult {
            l3: l3.to_owned(),
            l1: l1.to_owned(),
            l0: l0.to_owned(),
            quality: 17,
            geos: GeocodeResult::build_geos(l3, l1, l0),
            ..GeocodeResult::empty(format!("{}, {}, {}", l3, l1, l0))
        }
    }

    #[test]
    fn s4_l3_consensus() {
        let results = vec![
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
            geocoded("San Francisco", "California", "United States"),
            geocoded("Sacramento", "California", "United States"),
        ];
        let consensus = estimate_region(&results).expect("consensus should be found");
        assert_eq!(consensus.key, "Napa, California, United States");
        assert_eq!(consensus.count, 3);
        assert_eq!(consensus.total, 5);
        assert_eq!(consensus.ratio_str(), "(3/5)");
    }

    #[test]
    fn s5_l1_fallback_consensus() {
        let mut results = Vec::new();
        for city in ["Napa", "Oakland", "Fresno"] {
            results.push(geocoded(city, "California", "United States"));
            results.push(geocoded(city, "California", "United States"));
        }
        let consensus = estimate_region(&results).expect("consensus should be found");
        assert_eq!(consensus.key, "California, United States");
        assert_eq!(consensus.count, 6);
        assert_eq!(consensus.total, 6);
    }

    #[test]
    fn invariant_cardinality_below_three_is_undetermined() {
        let results = vec![
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
        ];
        assert!(estimate_region(&results).is_none());
    }

    #[test]
    fn invariant_count_between_three_and_total() {
        let results = vec![
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
        ];
        let consensus = estimate_region(&results).unwrap();
        assert!(consensus.count >= 3);
        assert!(consensus.count <= consensus.total);
    }

    #[test]
    fn top_words_degrades_gracefully_with_few_words() {
        let results = vec![geocoded("Napa", "California", "United States")];
        let words = top_three_words(&results);
        assert!(words.len() <= 3);
        assert_eq!(words[0].0, "napa");
    }

    #[test]
    fn top_words_ranks_by_frequency() {
        let results = vec![
            geocoded("Napa", "California", "United States"),
            geocoded("Napa", "California", "United States"),
            geocoded("Oakland", "California", "United States"),
        ];
        let words = top_three_words(&results);
        assert_eq!(words[0], ("napa".to_owned(), 2));
    }
}
