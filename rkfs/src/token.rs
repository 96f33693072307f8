//! Handle token generation.
//!
//! Tokens are random v4 UUIDs (122 random bits), so a collision with a live
//! handle is negligible. The retry loop still exists so uniqueness never
//! depends on luck, and it cannot starve in practice.

use common::HandleToken;

/// Generate a token for which `taken` returns false.
///
/// The token is not reserved; the caller must insert it in the same critical
/// section that ran `taken`.
pub fn new_token<F>(mut taken: F) -> HandleToken
where
    F: FnMut(&HandleToken) -> bool,
{
    loop {
        let candidate = HandleToken::random();
        if !taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn retries_until_free() {
        let mut calls = 0;
        let token = new_token(|_| {
            calls += 1;
            calls < 3
        });
        assert_eq!(calls, 3);
        assert!(!token.to_string().is_empty());
    }

    #[test]
    fn tokens_are_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let t = new_token(|t| seen.contains(t));
            assert!(seen.insert(t));
        }
    }
}
