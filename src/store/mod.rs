//! User accounts, match history, and leaderboard access.
//!
//! The engine treats storage as a collaborator behind the [`UserStore`]
//! trait; [`MemoryStore`] is the reference implementation the server ships
//! with. Durability guarantees are out of scope, the seam is not.

pub mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage failures surfaced to the command layer.
///
/// The first two variants carry the exact texts clients see; the rest are
/// infrastructure faults reported as a generic database error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Registration with a username that is already taken.
    #[error("Username already exists")]
    DuplicateUser,

    /// Registration with an empty username or password.
    #[error("Username and password must not be empty")]
    EmptyCredentials,

    /// The backing file could not be read or written.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid store JSON.
    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One finished match as the history view shows it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// First player in canonical match-key order.
    pub player1: String,
    /// Second player in canonical match-key order.
    pub player2: String,
    /// Final score of `player1`.
    pub score1: u32,
    /// Final score of `player2`.
    pub score2: u32,
    /// Username of the winner, or `"draw"`.
    pub winner: String,
    /// When the match finished.
    pub played_at: DateTime<Utc>,
}

/// One leaderboard row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Account name.
    pub username: String,
    /// Matches won.
    pub wins: u32,
    /// Wins over matches played, in `[0, 1]`; `0` for players with no
    /// recorded matches.
    pub win_rate: f64,
}

/// Access to user accounts and recorded match results.
///
/// Implementations are shared across connection tasks, so every method
/// takes `&self` and must be callable concurrently.
pub trait UserStore: Send + Sync {
    /// Whether an account with this exact username exists.
    fn exists(&self, username: &str) -> Result<bool, StorageError>;

    /// Create an account. Empty usernames or passwords and duplicate
    /// usernames are rejected.
    fn register(&self, username: &str, password: &str) -> Result<(), StorageError>;

    /// Verify a username/password pair.
    fn check_login(&self, username: &str, password: &str) -> Result<bool, StorageError>;

    /// Most recent matches the user took part in, newest first, at most
    /// `limit` rows.
    fn last_matches(&self, username: &str, limit: usize)
        -> Result<Vec<MatchRecord>, StorageError>;

    /// All known players ranked by win rate, then wins, then username.
    fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, StorageError>;
}
