//! In-memory store with optional JSON file backing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{LeaderboardEntry, MatchRecord, StorageError, UserStore};

#[derive(Default, Serialize, Deserialize)]
struct StoreData {
    /// Username to salted password digest (hex).
    users: HashMap<String, String>,
    /// Finished matches in completion order.
    matches: Vec<MatchRecord>,
}

/// Reference [`UserStore`] backed by process memory.
///
/// Optionally bound to a JSON file: [`MemoryStore::load`] reads it at
/// startup and registrations are written back best-effort. A save failure
/// is logged, not surfaced; durability is explicitly out of scope.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty store with no file backing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bound to a JSON file, starting empty if the file does not
    /// exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data: StoreData = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(err) => return Err(err.into()),
        };
        info!(
            path = %path.display(),
            users = data.users.len(),
            matches = data.matches.len(),
            "store loaded"
        );
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    /// Record a finished match. Used by fixtures and operator tooling;
    /// the duel engine itself never closes matches.
    pub fn add_match_record(&self, record: MatchRecord) {
        let mut data = self.write();
        data.matches.push(record);
        self.save(&data);
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, data: &StoreData) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(data)
            .map_err(StorageError::from)
            .and_then(|json| std::fs::write(path, json).map_err(StorageError::from));
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "store save failed");
        }
    }

    /// Salted credential digest. Salting with the username keeps identical
    /// passwords from producing identical digests.
    fn digest(username: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"quiztone-cred:");
        hasher.update(username.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl UserStore for MemoryStore {
    fn exists(&self, username: &str) -> Result<bool, StorageError> {
        Ok(self.read().users.contains_key(username))
    }

    fn register(&self, username: &str, password: &str) -> Result<(), StorageError> {
        if username.is_empty() || password.is_empty() {
            return Err(StorageError::EmptyCredentials);
        }

        let mut data = self.write();
        if data.users.contains_key(username) {
            return Err(StorageError::DuplicateUser);
        }
        data.users
            .insert(username.to_owned(), Self::digest(username, password));
        self.save(&data);
        Ok(())
    }

    fn check_login(&self, username: &str, password: &str) -> Result<bool, StorageError> {
        let expected = Self::digest(username, password);
        Ok(self
            .read()
            .users
            .get(username)
            .is_some_and(|stored| *stored == expected))
    }

    fn last_matches(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        let data = self.read();
        let mut rows: Vec<MatchRecord> = data
            .matches
            .iter()
            .filter(|m| m.player1 == username || m.player2 == username)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, StorageError> {
        let data = self.read();

        // (wins, played) per player; registered users always get a row.
        let mut stats: HashMap<&str, (u32, u32)> = data
            .users
            .keys()
            .map(|name| (name.as_str(), (0, 0)))
            .collect();
        for m in &data.matches {
            for player in [m.player1.as_str(), m.player2.as_str()] {
                let entry = stats.entry(player).or_insert((0, 0));
                entry.1 += 1;
                if m.winner == player {
                    entry.0 += 1;
                }
            }
        }

        let mut rows: Vec<LeaderboardEntry> = stats
            .into_iter()
            .map(|(username, (wins, played))| LeaderboardEntry {
                username: username.to_owned(),
                wins,
                win_rate: if played == 0 {
                    0.0
                } else {
                    f64::from(wins) / f64::from(played)
                },
            })
            .collect();
        rows.sort_by(|a, b| {
            b.win_rate
                .total_cmp(&a.win_rate)
                .then_with(|| b.wins.cmp(&a.wins))
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(rows)
    }
}

// =============================================================================
// TESTS
// =============================================================================
