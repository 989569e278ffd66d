//! Core deterministic primitives.
//!
//! Everything here is pure and cross-platform deterministic: the seeded
//! PRNG and the seed derivation that keep both duelists' quizzes in sync.

pub mod rng;

// Re-export core types
pub use rng::{derive_match_seed, DeterministicRng};
