//! Location-string text normalization (component C).
//!
//! Must be exact and idempotent: `normalize(normalize(s)) == normalize(s)`.

use deunicode::deunicode;

/// Characters replaced with a single space during cleaning.
const REPLACE_WITH_SPACE: &[char] = &['&', '?', '"', '\'', '(', ')', '-', '#', '/', '\\', '.', '\n'];

/// Transliterate diacritics to ASCII, strip remaining non-ASCII bytes,
/// replace punctuation with spaces, and collapse whitespace.
///
/// Returns an empty string if nothing usable remains; callers should skip
/// the network call in that case (§4.C step 5).
pub fn clean_location_string(location_string: &str) -> String {
    let transliterated = deunicode(location_string);
    let ascii_only: String = transliterated.chars().filter(|c| c.is_ascii()).collect();
    let punctuation_replaced: String = ascii_only
        .chars()
        .map(|c| if REPLACE_WITH_SPACE.contains(&c) { ' ' } else { c })
        .collect();
    collapse_whitespace(&punctuation_replaced)
}

/// Collapse runs of whitespace to single spaces and trim the ends.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a string for whole-word matching: like [`clean_location_string`],
/// but commas are also replaced with spaces and the result is padded with a
/// leading and trailing space so that substring matches at the edges still
/// count as whole-word.
pub fn clean_for_matching(location_string: &str) -> String {
    let cleaned = clean_location_string(location_string).replace(',', " ");
    let collapsed = collapse_whitespace(&cleaned);
    format!(" {} ", collapsed.to_lowercase())
}

/// Whole-word, case-insensitive containment test against a string already
/// prepared with [`clean_for_matching`].
pub fn contains_whole_word(haystack_cleaned: &str, needle: &str) -> bool {
    if needle.trim().is_empty() {
        return false;
    }
    let padded_needle = format!(" {} ", needle.trim().to_lowercase());
    haystack_cleaned.contains(&padded_needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_punctuation() {
        assert_eq!(clean_location_string("Bogotá, D.C."), "Bogota D C");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_location_string("New    York   City"), "New York City");
    }

    #[test]
    fn replaces_ampersand_and_quotes() {
        assert_eq!(clean_location_string("Bosnia & Herzegovina"), "Bosnia Herzegovina");
        assert_eq!(clean_location_string("St. Paul's"), "St Paul s");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(clean_location_string(""), "");
        assert_eq!(clean_location_string("   "), "");
    }

    #[test]
    fn is_idempotent() {
        let inputs = ["Napa, CA", "Bogotá, D.C.", "  México City!! ", ""];
        for input in inputs {
            let once = clean_location_string(input);
            let twice = clean_location_string(&once);
            assert_eq!(once, twice, "normalize should be idempotent for {:?}", input);
        }
    }

    #[test]
    fn whole_word_matching() {
        let haystack = clean_for_matching("Napa, CA");
        assert!(contains_whole_word(&haystack, "napa"));
        assert!(contains_whole_word(&haystack, "CA"));
        assert!(!contains_whole_word(&haystack, "apa"));
        assert!(!contains_whole_word(&haystack, "canada"));
    }
}
