//! Cloze rendering for partial recall.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Placeholder shown in place of a blanked term.
pub const BLANK: &str = "_____";

/// A summary with its vocabulary terms blanked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClozeText {
    /// The summary with every blanked occurrence replaced by [`BLANK`].
    pub text: String,
    /// Terms that occur in the summary, in vocabulary order.
    pub blanked_terms: Vec<String>,
}

/// Builds a case-insensitive matcher for `term` as a whole word.
///
/// Word boundaries are only required on sides of the term that start or
/// end with a word character, so terms like `C++` still match.
fn term_matcher(term: &str) -> Option<Regex> {
    let escaped = regex::escape(term);
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let leading = if term.chars().next().is_some_and(is_word) {
        r"\b"
    } else {
        ""
    };
    let trailing = if term.chars().last().is_some_and(is_word) {
        r"\b"
    } else {
        ""
    };
    RegexBuilder::new(&format!("{leading}{escaped}{trailing}"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Blanks every whole-word occurrence of each term in `summary`.
///
/// Longer terms are blanked first so that a term containing another
/// (`cell wall` and `cell`) is removed as a unit.
///
/// # Example
///
/// ```
/// use synapse_engine::cloze::render_cloze;
///
/// let cloze = render_cloze(
///     "Chlorophyll absorbs light. CHLOROPHYLL is green.",
///     &["chlorophyll".to_string(), "stroma".to_string()],
/// );
/// assert_eq!(cloze.text, "_____ absorbs light. _____ is green.");
/// assert_eq!(cloze.blanked_terms, vec!["chlorophyll"]);
/// ```
#[must_use]
pub fn render_cloze(summary: &str, terms: &[String]) -> ClozeText {
    let mut ordered: Vec<(usize, &String)> = terms
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .collect();
    ordered.sort_by(|a, b| b.1.chars().count().cmp(&a.1.chars().count()));

    let mut text = summary.to_string();
    let mut matched = Vec::new();

    for (position, term) in ordered {
        let Some(matcher) = term_matcher(term.trim()) else {
            continue;
        };
        if matcher.is_match(&text) {
            text = matcher.replace_all(&text, BLANK).into_owned();
            matched.push((position, term.trim().to_string()));
        }
    }

    matched.sort_by_key(|(position, _)| *position);
    ClozeText {
        text,
        blanked_terms: matched.into_iter().map(|(_, term)| term).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_blanks_whole_words_only() {
        let cloze = render_cloze("An ion is not a lion.", &terms(&["ion"]));
        assert_eq!(cloze.text, "An _____ is not a lion.");
    }

    #[test]
    fn test_case_insensitive_and_repeated() {
        let cloze = render_cloze("Mitosis, then mitosis again.", &terms(&["MITOSIS"]));
        assert_eq!(cloze.text, "_____, then _____ again.");
        assert_eq!(cloze.blanked_terms, vec!["MITOSIS"]);
    }

    #[test]
    fn test_longer_terms_win_and_order_is_kept() {
        let cloze = render_cloze(
            "The cell wall surrounds the cell.",
            &terms(&["cell", "cell wall"]),
        );
        assert_eq!(cloze.text, "The _____ surrounds the _____.");
        assert_eq!(cloze.blanked_terms, vec!["cell", "cell wall"]);
    }

    #[test]
    fn test_terms_absent_from_summary_are_not_listed() {
        let cloze = render_cloze("Nothing to see.", &terms(&["photon", ""]));
        assert_eq!(cloze.text, "Nothing to see.");
        assert!(cloze.blanked_terms.is_empty());
    }

    #[test]
    fn test_terms_with_symbols_and_regex_characters() {
        let cloze = render_cloze("We wrote C++ (a.k.a. cpp).", &terms(&["C++", "a.k.a."]));
        assert_eq!(cloze.text, "We wrote _____ (_____ cpp).");
    }
}
