//! Match arbitration.
//!
//! Aggregates the two players' answers per round, scores them, and delivers
//! each round result exactly once even when both submissions race.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::key::MatchKey;
use super::score::{score_round, RoundAnswer};

/// Arbitration failures surfaced to the command layer.
///
/// Display texts are the exact strings sent to clients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArbiterError {
    /// No match has been registered for this pair of players.
    #[error("No active match with that player")]
    UnknownMatch,

    /// The submitting user is not one of the match's two players.
    #[error("Not a participant in this match")]
    NotAParticipant,
}

/// Outcome of one answer submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Answer recorded; the opponent has not answered yet.
    Waiting,

    /// Both answers are in and this submission won the delivery race.
    /// The caller must deliver the result to both players; nobody else
    /// will see it.
    Completed(RoundResult),

    /// The round was already scored; the submission was ignored.
    AlreadySettled,
}

/// Scored result of a completed round.
///
/// All per-player arrays are in canonical key order: index 0 is
/// `MatchKey::player1`, index 1 is `MatchKey::player2`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundResult {
    /// Round number as submitted by the clients.
    pub round: u32,
    /// Both players' answers.
    pub answers: [RoundAnswer; 2],
    /// Points awarded for this round.
    pub points: [u32; 2],
    /// Cumulative match totals after this round.
    pub totals: [u32; 2],
}

/// Answer slots and delivery flag for one round.
///
/// Retained for the lifetime of the match: the `delivered` flag is the
/// single authority on whether a round has settled, so late resubmissions
/// always find it instead of racing a separate settled marker.
struct RoundState {
    slots: Mutex<[Option<RoundAnswer>; 2]>,
    delivered: AtomicBool,
}

impl RoundState {
    fn new() -> Self {
        Self {
            slots: Mutex::new([None, None]),
            delivered: AtomicBool::new(false),
        }
    }
}

/// Shared state of one registered match.
struct MatchState {
    seed: u64,
    totals: [AtomicU32; 2],
    rounds: DashMap<u32, Arc<RoundState>>,
    last_activity: Mutex<Instant>,
}

impl MatchState {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            totals: [AtomicU32::new(0), AtomicU32::new(0)],
            rounds: DashMap::new(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last)
    }
}

/// Race-safe aggregation point for round answers across all live matches.
///
/// Sessions register a match when an invite is accepted and submit answers
/// as they arrive; the arbiter guarantees that for every round exactly one
/// submission comes back [`RoundOutcome::Completed`].
pub struct MatchArbiter {
    matches: DashMap<MatchKey, Arc<MatchState>>,
}

impl Default for MatchArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchArbiter {
    /// Create an arbiter with no registered matches.
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    /// Register (or replace) the match for a pair of players.
    ///
    /// Called when an invite is accepted. A rematch between the same pair
    /// replaces the previous state entirely: fresh seed, zeroed totals.
    pub fn register_match(&self, key: MatchKey, seed: u64) {
        debug!(%key, seed, "match registered");
        self.matches.insert(key, Arc::new(MatchState::new(seed)));
    }

    /// Shared quiz seed of a registered match.
    pub fn match_seed(&self, key: &MatchKey) -> Option<u64> {
        self.matches.get(key).map(|state| state.seed)
    }

    /// Record one player's answer for one round.
    ///
    /// Correctness is judged here (`answer_index == correct_index`).
    /// Resubmission before the round settles overwrites the previous
    /// answer; after settlement it is ignored. When both slots are filled,
    /// concurrent callers race on the round's delivery flag and exactly
    /// one receives the scored result.
    pub fn submit_answer(
        &self,
        key: &MatchKey,
        round: u32,
        username: &str,
        answer_index: u8,
        elapsed_ms: u64,
        correct_index: u8,
    ) -> Result<RoundOutcome, ArbiterError> {
        let state = Arc::clone(
            self.matches
                .get(key)
                .ok_or(ArbiterError::UnknownMatch)?
                .value(),
        );
        let slot = key
            .slot_of(username)
            .ok_or(ArbiterError::NotAParticipant)?;
        state.touch();

        let round_state = Arc::clone(
            state
                .rounds
                .entry(round)
                .or_insert_with(|| Arc::new(RoundState::new()))
                .value(),
        );

        if round_state.delivered.load(Ordering::Acquire) {
            return Ok(RoundOutcome::AlreadySettled);
        }

        let answer = RoundAnswer {
            correct: answer_index == correct_index,
            elapsed_ms,
        };

        let both = {
            let mut slots = round_state
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slots[slot] = Some(answer);
            match (slots[0], slots[1]) {
                (Some(a), Some(b)) => Some((a, b)),
                _ => None,
            }
        };

        let Some((answer1, answer2)) = both else {
            return Ok(RoundOutcome::Waiting);
        };

        // Both answers are in; only the winner of this flag delivers.
        if round_state
            .delivered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(RoundOutcome::AlreadySettled);
        }

        let (points1, points2) = score_round(&answer1, &answer2);
        let total1 = state.totals[0].fetch_add(points1, Ordering::AcqRel) + points1;
        let total2 = state.totals[1].fetch_add(points2, Ordering::AcqRel) + points2;

        debug!(%key, round, points1, points2, "round settled");

        Ok(RoundOutcome::Completed(RoundResult {
            round,
            answers: [answer1, answer2],
            points: [points1, points2],
            totals: [total1, total2],
        }))
    }

    /// Number of registered matches.
    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    /// Drop matches with no activity for at least `ttl`. Returns how many
    /// were evicted.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.matches.len();
        self.matches.retain(|_, state| state.idle_for(now) < ttl);
        // Registrations can land mid-retain, pushing len past `before`.
        before.saturating_sub(self.matches.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn arbiter_with_match(seed: u64) -> (MatchArbiter, MatchKey) {
        let arbiter = MatchArbiter::new();
        let key = MatchKey::new("alice", "bob");
        arbiter.register_match(key.clone(), seed);
        (arbiter, key)
    }

    #[test]
    fn test_seed_lookup() {
        let (arbiter, key) = arbiter_with_match(99);
        assert_eq!(arbiter.match_seed(&key), Some(99));
        assert_eq!(arbiter.match_seed(&MatchKey::new("alice", "carol")), None);
    }

    #[test]
    fn test_unknown_match_rejected() {
        let arbiter = MatchArbiter::new();
        let key = MatchKey::new("alice", "bob");
        let result = arbiter.submit_answer(&key, 1, "alice", 0, 100, 0);
        assert_eq!(result, Err(ArbiterError::UnknownMatch));
    }

    #[test]
    fn test_outsider_rejected() {
        let (arbiter, key) = arbiter_with_match(1);
        let result = arbiter.submit_answer(&key, 1, "mallory", 0, 100, 0);
        assert_eq!(result, Err(ArbiterError::NotAParticipant));
    }

    #[test]
    fn test_first_answer_waits() {
        let (arbiter, key) = arbiter_with_match(1);
        let outcome = arbiter.submit_answer(&key, 1, "alice", 0, 100, 0).unwrap();
        assert_eq!(outcome, RoundOutcome::Waiting);
    }

    #[test]
    fn test_second_answer_completes() {
        let (arbiter, key) = arbiter_with_match(1);
        // alice correct in 100ms, bob correct in 250ms
        arbiter.submit_answer(&key, 1, "alice", 2, 100, 2).unwrap();
        let outcome = arbiter.submit_answer(&key, 1, "bob", 2, 250, 2).unwrap();

        let RoundOutcome::Completed(result) = outcome else {
            panic!("expected completed round, got {outcome:?}");
        };
        assert_eq!(result.round, 1);
        assert_eq!(result.points, [2, 1]);
        assert_eq!(result.totals, [2, 1]);
        assert!(result.answers[0].correct);
        assert_eq!(result.answers[0].elapsed_ms, 100);
        assert_eq!(result.answers[1].elapsed_ms, 250);
    }

    #[test]
    fn test_both_wrong_zero_points() {
        let (arbiter, key) = arbiter_with_match(1);
        arbiter.submit_answer(&key, 1, "alice", 0, 100, 3).unwrap();
        let outcome = arbiter.submit_answer(&key, 1, "bob", 1, 200, 3).unwrap();

        let RoundOutcome::Completed(result) = outcome else {
            panic!("expected completed round");
        };
        assert_eq!(result.points, [0, 0]);
        assert_eq!(result.totals, [0, 0]);
    }

    #[test]
    fn test_totals_accumulate_across_rounds() {
        let (arbiter, key) = arbiter_with_match(1);

        // Round 1: only alice correct.
        arbiter.submit_answer(&key, 1, "alice", 0, 100, 0).unwrap();
        arbiter.submit_answer(&key, 1, "bob", 1, 100, 0).unwrap();

        // Round 2: both correct, bob faster.
        arbiter.submit_answer(&key, 2, "alice", 3, 400, 3).unwrap();
        let outcome = arbiter.submit_answer(&key, 2, "bob", 3, 150, 3).unwrap();

        let RoundOutcome::Completed(result) = outcome else {
            panic!("expected completed round");
        };
        assert_eq!(result.points, [1, 2]);
        assert_eq!(result.totals, [3, 2]);
    }

    #[test]
    fn test_resubmission_overwrites_before_settlement() {
        let (arbiter, key) = arbiter_with_match(1);
        // alice answers wrong, then corrects it before bob answers.
        arbiter.submit_answer(&key, 1, "alice", 1, 100, 0).unwrap();
        arbiter.submit_answer(&key, 1, "alice", 0, 180, 0).unwrap();
        let outcome = arbiter.submit_answer(&key, 1, "bob", 2, 200, 0).unwrap();

        let RoundOutcome::Completed(result) = outcome else {
            panic!("expected completed round");
        };
        assert!(result.answers[0].correct);
        assert_eq!(result.answers[0].elapsed_ms, 180);
        assert_eq!(result.points, [2, 0]);
    }

    #[test]
    fn test_settled_round_ignores_late_submissions() {
        let (arbiter, key) = arbiter_with_match(1);
        arbiter.submit_answer(&key, 1, "alice", 0, 100, 0).unwrap();
        arbiter.submit_answer(&key, 1, "bob", 0, 200, 0).unwrap();

        let outcome = arbiter.submit_answer(&key, 1, "alice", 0, 50, 0).unwrap();
        assert_eq!(outcome, RoundOutcome::AlreadySettled);

        // Totals must not move.
        let outcome = arbiter.submit_answer(&key, 2, "alice", 0, 10, 0).unwrap();
        assert_eq!(outcome, RoundOutcome::Waiting);
        let RoundOutcome::Completed(result) =
            arbiter.submit_answer(&key, 2, "bob", 1, 10, 0).unwrap()
        else {
            panic!("expected completed round");
        };
        assert_eq!(result.totals, [4, 1]);
    }

    #[test]
    fn test_rematch_resets_state() {
        let (arbiter, key) = arbiter_with_match(1);
        arbiter.submit_answer(&key, 1, "alice", 0, 100, 0).unwrap();
        arbiter.submit_answer(&key, 1, "bob", 1, 100, 0).unwrap();

        arbiter.register_match(key.clone(), 2);
        assert_eq!(arbiter.match_seed(&key), Some(2));

        // Round numbering and totals start over.
        arbiter.submit_answer(&key, 1, "alice", 0, 100, 0).unwrap();
        let RoundOutcome::Completed(result) =
            arbiter.submit_answer(&key, 1, "bob", 0, 300, 0).unwrap()
        else {
            panic!("expected completed round");
        };
        assert_eq!(result.totals, [2, 1]);
    }

    #[test]
    fn test_evict_idle() {
        let (arbiter, _key) = arbiter_with_match(1);
        assert_eq!(arbiter.active_matches(), 1);

        assert_eq!(arbiter.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(arbiter.active_matches(), 1);

        assert_eq!(arbiter.evict_idle(Duration::ZERO), 1);
        assert_eq!(arbiter.active_matches(), 0);
    }

    #[test]
    fn test_evict_races_with_registration() {
        let arbiter = Arc::new(MatchArbiter::new());

        let writer = {
            let arbiter = Arc::clone(&arbiter);
            thread::spawn(move || {
                for i in 0..2000u64 {
                    let key = MatchKey::new(&format!("p{i}"), &format!("q{i}"));
                    arbiter.register_match(key, i);
                }
            })
        };

        // Everything is instantly idle, so each sweep runs against a map
        // that keeps growing underneath it.
        while !writer.is_finished() {
            arbiter.evict_idle(Duration::ZERO);
        }
        writer.join().unwrap();

        arbiter.evict_idle(Duration::ZERO);
        assert_eq!(arbiter.active_matches(), 0);
    }

    #[test]
    fn test_concurrent_submissions_deliver_exactly_once() {
        let arbiter = Arc::new(MatchArbiter::new());
        let key = MatchKey::new("alice", "bob");
        arbiter.register_match(key.clone(), 7);

        for round in 1..=200 {
            let barrier = Arc::new(Barrier::new(2));
            let mut handles = Vec::new();

            for player in ["alice", "bob"] {
                let arbiter = Arc::clone(&arbiter);
                let key = key.clone();
                let barrier = Arc::clone(&barrier);
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    arbiter
                        .submit_answer(&key, round, player, 0, 100, 0)
                        .unwrap()
                }));
            }

            let outcomes: Vec<_> = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect();
            let completed = outcomes
                .iter()
                .filter(|o| matches!(o, RoundOutcome::Completed(_)))
                .count();
            assert_eq!(completed, 1, "round {round}: outcomes {outcomes:?}");
        }
    }
}
