//! Duel Logic Module
//!
//! Everything that decides a duel, independent of the wire protocol.
//!
//! ## Module Structure
//!
//! - `key`: Canonical match identity for a pair of players
//! - `quiz`: Deterministic question generation from the shared seed
//! - `score`: Round scoring rules
//! - `arbiter`: Race-safe round aggregation and result delivery

pub mod arbiter;
pub mod key;
pub mod quiz;
pub mod score;

// Re-export key types
pub use arbiter::{ArbiterError, MatchArbiter, RoundOutcome, RoundResult};
pub use key::MatchKey;
pub use quiz::{generate, Question, OPTION_COUNT};
pub use score::{score_round, RoundAnswer};
