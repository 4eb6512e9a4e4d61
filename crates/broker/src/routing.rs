//! Topic pattern matching.
//!
//! Routing keys and patterns are dot-separated words. In a pattern `*`
//! matches exactly one word and `#` matches zero or more words.

use crate::error::{BrokerError, Result};

/// Returns true if `routing_key` matches the topic binding `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Checks that `pattern` is a well-formed topic binding pattern.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let well_formed = !pattern.is_empty()
        && pattern.split('.').all(|word| {
            !word.is_empty()
                && (word == "*" || word == "#" || !word.contains(['*', '#']))
        });

    if well_formed {
        Ok(())
    } else {
        Err(BrokerError::InvalidPattern(pattern.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("order.created", "order.created"));
        assert!(!topic_matches("order.created", "order.validated"));
        assert!(!topic_matches("order.created", "order.created.v2"));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("order.*", "order.created"));
        assert!(topic_matches("*.rejected", "order.rejected"));
        assert!(!topic_matches("order.*", "order"));
        assert!(!topic_matches("order.*", "order.created.v2"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("#", "order.created"));
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.created"));
        assert!(topic_matches("order.#", "order.created.v2"));
        assert!(topic_matches("#.rejected", "order.rejected"));
        assert!(!topic_matches("order.#", "payment.created"));
    }

    #[test]
    fn test_mixed_wildcards() {
        assert!(topic_matches("*.#.confirmed", "order.confirmed"));
        assert!(topic_matches("*.#.confirmed", "order.eu.confirmed"));
        assert!(!topic_matches("*.#.confirmed", "confirmed"));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("order.created").is_ok());
        assert!(validate_pattern("order.*").is_ok());
        assert!(validate_pattern("#").is_ok());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("order..created").is_err());
        assert!(validate_pattern("order.cre*").is_err());
        assert!(validate_pattern("order.#x").is_err());
    }
}
