//! Presence and mailbox registries.
//!
//! Shared by every connection task. Presence is the set of authenticated
//! usernames; mailboxes emulate server push over a pull-only protocol by
//! buffering events until the owner polls them.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};

/// Set of currently-authenticated usernames.
#[derive(Default)]
pub struct PresenceRegistry {
    online: DashSet<String>,
}

impl PresenceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user online. Returns `false` when the name is already
    /// present, which rejects a second concurrent login for the account.
    pub fn insert(&self, username: &str) -> bool {
        self.online.insert(username.to_owned())
    }

    /// Mark a user offline. Returns whether the name was present.
    pub fn remove(&self, username: &str) -> bool {
        self.online.remove(username).is_some()
    }

    /// Whether the user is currently online.
    pub fn contains(&self, username: &str) -> bool {
        self.online.contains(username)
    }

    /// Sorted snapshot of everyone online.
    pub fn snapshot(&self) -> Vec<String> {
        let mut users: Vec<String> = self.online.iter().map(|u| u.key().clone()).collect();
        users.sort();
        users
    }

    /// Number of users online.
    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// Whether nobody is online.
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

/// One user's FIFO of pending event lines.
struct Mailbox {
    queue: Mutex<VecDeque<String>>,
    /// `None` while the owner is online; otherwise when they went offline
    /// (or when a sender created the box for a not-logged-in recipient).
    offline_since: Mutex<Option<Instant>>,
}

impl Mailbox {
    fn new(offline: bool) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            offline_since: Mutex::new(offline.then(Instant::now)),
        }
    }

    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        match *self
            .offline_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            None => false,
            Some(at) => now.saturating_duration_since(at) >= ttl,
        }
    }
}

/// Per-user event queues, created lazily and evicted when their owner
/// stays offline past the configured TTL.
///
/// Any session may enqueue to any user; only the owner's session dequeues.
/// Events survive logout and re-login within the TTL.
#[derive(Default)]
pub struct MailboxRegistry {
    boxes: DashMap<String, Mailbox>,
}

impl MailboxRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event line to a user's queue, creating the box if needed.
    pub fn enqueue(&self, username: &str, event: String) {
        let mailbox = self
            .boxes
            .entry(username.to_owned())
            .or_insert_with(|| Mailbox::new(true));
        mailbox
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    /// Remove and return the oldest event; `None` for an empty or missing
    /// box.
    pub fn dequeue(&self, username: &str) -> Option<String> {
        let mailbox = self.boxes.get(username)?;
        let mut queue = mailbox
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    /// Ensure the user's box exists and clear its offline stamp. Called on
    /// login.
    pub fn mark_online(&self, username: &str) {
        let mailbox = self
            .boxes
            .entry(username.to_owned())
            .or_insert_with(|| Mailbox::new(false));
        *mailbox
            .offline_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Stamp the user's box offline. Called on logout and disconnect; a
    /// missing box is a no-op.
    pub fn mark_offline(&self, username: &str) {
        if let Some(mailbox) = self.boxes.get(username) {
            *mailbox
                .offline_since
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        }
    }

    /// Drop boxes whose owner has been offline for at least `ttl`.
    /// Returns how many were evicted.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.boxes.len();
        self.boxes.retain(|_, mailbox| !mailbox.expired(now, ttl));
        // Enqueues can create boxes mid-retain, pushing len past `before`.
        before.saturating_sub(self.boxes.len())
    }

    /// Number of live boxes.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Whether no boxes exist.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Number of undelivered events for a user.
    pub fn pending(&self, username: &str) -> usize {
        self.boxes
            .get(username)
            .map(|mailbox| {
                mailbox
                    .queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
