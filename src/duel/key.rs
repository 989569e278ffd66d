//! Canonical duel identity.

use std::cmp::Ordering;
use std::fmt;

/// Identifies a duel regardless of which side refers to it.
///
/// The two usernames are stored in case-insensitive lexicographic order,
/// with an exact-string tie-break for case-variant names, so both sessions
/// of a duel derive the same key independently:
/// `MatchKey::new("Bob", "alice") == MatchKey::new("alice", "Bob")`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchKey {
    player1: String,
    player2: String,
}

impl MatchKey {
    /// Build the canonical key for a pair of usernames.
    pub fn new(a: &str, b: &str) -> Self {
        let order = a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b));
        let (player1, player2) = match order {
            Ordering::Greater => (b, a),
            _ => (a, b),
        };
        Self {
            player1: player1.to_owned(),
            player2: player2.to_owned(),
        }
    }

    /// First player in canonical order.
    pub fn player1(&self) -> &str {
        &self.player1
    }

    /// Second player in canonical order.
    pub fn player2(&self) -> &str {
        &self.player2
    }

    /// Slot index (0 or 1) of a participant, `None` for anyone else.
    pub fn slot_of(&self, username: &str) -> Option<usize> {
        if username == self.player1 {
            Some(0)
        } else if username == self.player2 {
            Some(1)
        } else {
            None
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.player1, self.player2)
    }
}

// =============================================================================
// TESTS
// =============================================================================
