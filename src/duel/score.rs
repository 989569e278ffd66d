//! Round scoring rules.

/// Points for winning a round outright (only correct answer, or fastest).
pub const POINTS_WIN: u32 = 2;
/// Consolation points for a correct but slower answer.
pub const POINTS_SLOW: u32 = 1;

/// One player's answer to one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundAnswer {
    /// Whether the chosen option was the correct one.
    pub correct: bool,
    /// Client-measured time from question start to answer, in milliseconds.
    pub elapsed_ms: u64,
}

/// Split a round's points between the two players.
///
/// - both wrong: 0 / 0
/// - exactly one correct: 2 / 0
/// - both correct: faster 2, slower 1; equal times 1 / 1
pub fn score_round(p1: &RoundAnswer, p2: &RoundAnswer) -> (u32, u32) {
    match (p1.correct, p2.correct) {
        (false, false) => (0, 0),
        (true, false) => (POINTS_WIN, 0),
        (false, true) => (0, POINTS_WIN),
        (true, true) => {
            if p1.elapsed_ms < p2.elapsed_ms {
                (POINTS_WIN, POINTS_SLOW)
            } else if p2.elapsed_ms < p1.elapsed_ms {
                (POINTS_SLOW, POINTS_WIN)
            } else {
                (POINTS_SLOW, POINTS_SLOW)
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
