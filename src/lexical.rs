//! Query tokenisation and term matching.
//!
//! Tokens are runs of ASCII alphanumerics plus `+` and `&`, so "T+W" and
//! "Temple&Webster" survive as single tokens.

use crate::universe::Universe;

/// Split a free-text query into tokens, discarding separators.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '&'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Universe tickers present among the upper-cased tokens, in universe order.
pub fn guess_tickers(tokens: &[String], universe: &Universe) -> Vec<String> {
    let upper: Vec<String> = tokens.iter().map(|t| t.to_uppercase()).collect();
    universe
        .entries()
        .iter()
        .filter(|e| upper.contains(&e.ticker))
        .map(|e| e.ticker.clone())
        .collect()
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Count occurrences of `term` in `haystack` that are not flanked by an
/// ASCII alphanumeric on either side. Both sides are compared lowercased.
pub fn count_term(haystack: &str, term: &str) -> usize {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return 0;
    }
    let hay = haystack.to_lowercase();
    hay.match_indices(&term)
        .filter(|(start, m)| {
            let before = hay[..*start].chars().next_back();
            let after = hay[start + m.len()..].chars().next();
            !is_word_char(before) && !is_word_char(after)
        })
        .count()
}

/// Whether `term` occurs in `haystack` on alphanumeric boundaries.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    count_term(haystack, term) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_keeps_plus_and_ampersand() {
        assert_eq!(
            tokenize("What's T+W's view, re: Temple&Webster?"),
            vec!["What", "s", "T+W", "s", "view", "re", "Temple&Webster"]
        );
    }

    #[test]
    fn tokenize_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ,.;  ").is_empty());
    }

    #[test]
    fn guess_tickers_upper_cases_and_dedupes() {
        let u = Universe::builtin();
        let tokens = tokenize("jbh vs JBH vs wow and the market");
        assert_eq!(guess_tickers(&tokens, &u), vec!["JBH", "WOW"]);
    }

    #[test]
    fn count_term_respects_boundaries() {
        assert_eq!(count_term("Coles, coles and Colesworth", "coles"), 2);
        assert_eq!(count_term("JB Hi-Fi and JB Hi-Fi's stores", "JB Hi-Fi"), 2);
        assert_eq!(count_term("colour", "col"), 0);
        assert_eq!(count_term("anything", ""), 0);
    }
}
