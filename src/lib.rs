//! # QuizTone Duel Server
//!
//! Authoritative arbitration server for QuizTone sound-quiz duels. Two
//! players race to answer the same deterministically generated question;
//! the server alone decides round points and running totals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    QUIZTONE DUEL SERVER                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Xorshift128+ PRNG and seed derivation     │
//! │                                                              │
//! │  duel/           - Match logic (deterministic)               │
//! │  ├── key.rs      - Canonical match pair identity             │
//! │  ├── quiz.rs     - Seeded question generation                │
//! │  ├── score.rs    - Round point rules                         │
//! │  └── arbiter.rs  - Race-safe round settlement                │
//! │                                                              │
//! │  store/          - Accounts and match records                │
//! │  └── memory.rs   - In-memory store with JSON persistence     │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - TCP accept loop and shared state          │
//! │  ├── session.rs  - Per-connection command dispatch           │
//! │  ├── registry.rs - Presence set and event mailboxes          │
//! │  ├── protocol.rs - Line grammar, replies and events          │
//! │  └── client.rs   - Test and tooling client                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Arbitration Guarantee
//!
//! The `core/` and `duel/` modules are **100% deterministic**:
//! - Both players' questions come from the shared match seed
//! - Round settlement happens exactly once, whatever the submission
//!   interleaving
//! - All randomness from seeded Xorshift128+
//!
//! Given the MATCH_START seed, both clients regenerate **identical
//! questions** for every round, and the server's verdict is final.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod duel;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crate::core::rng::{derive_match_seed, DeterministicRng};
pub use duel::arbiter::{MatchArbiter, RoundOutcome, RoundResult};
pub use duel::key::MatchKey;
pub use network::server::{DuelServer, ServerConfig};
pub use store::{MemoryStore, UserStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Answer options per question
pub const OPTION_COUNT: usize = duel::quiz::OPTION_COUNT;
