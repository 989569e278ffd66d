//! Protocol Messages
//!
//! Wire format for client-server communication: newline-delimited UTF-8
//! lines with `;`-separated fields. Every client line is one command and
//! produces exactly one reply line; asynchronous events reach a client
//! only through its mailbox, one per POLL.

use std::fmt;

use thiserror::Error;

use crate::duel::arbiter::RoundResult;
use crate::duel::key::MatchKey;
use crate::store::{LeaderboardEntry, MatchRecord};

/// Maximum accepted line length in bytes. Longer lines get an error reply
/// instead of a disconnect.
pub const MAX_LINE_LEN: usize = 1024;

/// Tag of the advisory greeting line sent on connect.
pub const GREETING_PREFIX: &str = "HELLO;";

/// The greeting line sent to every new connection. Carries no semantic
/// content; clients are free to ignore it.
pub fn greeting() -> String {
    format!("HELLO;quiztone;{}", crate::VERSION)
}

// =============================================================================
// PARSE ERRORS
// =============================================================================

/// Malformed input. Display texts are the exact strings sent after
/// `ERROR;`; none of these terminate the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line did not start with a known command name.
    #[error("Unknown command")]
    UnknownCommand,

    /// A required field was absent.
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// A numeric field did not parse.
    #[error("Malformed {0}")]
    MalformedNumber(&'static str),

    /// RESPOND with something other than ACCEPT or REJECT.
    #[error("Decision must be ACCEPT or REJECT")]
    InvalidDecision,
}

// =============================================================================
// CLIENT -> SERVER COMMANDS
// =============================================================================

/// An invite decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Start the match.
    Accept,
    /// Decline the invite.
    Reject,
}

impl Decision {
    fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s.to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(Self::Accept),
            "REJECT" => Ok(Self::Reject),
            _ => Err(ProtocolError::InvalidDecision),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "ACCEPT"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// One parsed client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create an account.
    Register {
        /// Requested account name.
        username: String,
        /// Requested password.
        password: String,
    },

    /// Authenticate this session.
    Login {
        /// Account name.
        username: String,
        /// Password.
        password: String,
    },

    /// List everyone currently online.
    Who,

    /// Invite another player to a duel.
    Invite {
        /// The invited player.
        to: String,
    },

    /// Answer a pending invite.
    Respond {
        /// The player whose invite is being answered.
        opponent: String,
        /// Accept or reject.
        decision: Decision,
    },

    /// Submit an answer for one round of a running match.
    Answer {
        /// The opponent in the match.
        opponent: String,
        /// Round number as counted by the clients.
        round: u32,
        /// Chosen option index.
        answer_index: u8,
        /// Time from question start to answer, in milliseconds.
        elapsed_ms: u64,
    },

    /// Pull one event from the own mailbox.
    Poll,

    /// Queue the caller's recent match history into their mailbox.
    GetHistory {
        /// Must be the caller's own username.
        username: String,
    },

    /// Queue the leaderboard into the caller's mailbox.
    GetLeaderboard,

    /// Leave the authenticated state and close the session.
    Logout,

    /// Liveness check.
    Ping,

    /// Close the session without logging in first.
    Exit,
}

impl Command {
    /// Parse one line.
    ///
    /// Trailing whitespace is trimmed, the command name is case-insensitive
    /// and the line is split on the first two `;` only, so a REGISTER or
    /// LOGIN password may itself contain `;`. ANSWER splits its remainder
    /// further. Extra fields on niladic commands are ignored.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end();
        let mut parts = line.splitn(3, ';');
        let name = parts.next().unwrap_or_default();
        let arg1 = parts.next();
        let rest = parts.next();

        match name.to_ascii_uppercase().as_str() {
            "REGISTER" => Ok(Self::Register {
                username: required(arg1, "username")?.to_owned(),
                password: required(rest, "password")?.to_owned(),
            }),
            "LOGIN" => Ok(Self::Login {
                username: required(arg1, "username")?.to_owned(),
                password: required(rest, "password")?.to_owned(),
            }),
            "WHO" => Ok(Self::Who),
            "INVITE" => Ok(Self::Invite {
                to: required(arg1, "recipient")?.to_owned(),
            }),
            "RESPOND" => Ok(Self::Respond {
                opponent: required(arg1, "opponent")?.to_owned(),
                decision: Decision::parse(required(rest, "decision")?)?,
            }),
            "ANSWER" => {
                let opponent = required(arg1, "opponent")?.to_owned();
                let mut fields = required(rest, "round number")?.split(';');
                let round = number(fields.next(), "round number")?;
                let answer_index = number(fields.next(), "answer index")?;
                let elapsed_ms = number(fields.next(), "elapsed time")?;
                Ok(Self::Answer {
                    opponent,
                    round,
                    answer_index,
                    elapsed_ms,
                })
            }
            "POLL" => Ok(Self::Poll),
            "GET_HISTORY" => Ok(Self::GetHistory {
                username: required(arg1, "username")?.to_owned(),
            }),
            "GET_LEADERBOARD" => Ok(Self::GetLeaderboard),
            "LOGOUT" => Ok(Self::Logout),
            "PING" => Ok(Self::Ping),
            "EXIT" => Ok(Self::Exit),
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

fn required<'a>(field: Option<&'a str>, name: &'static str) -> Result<&'a str, ProtocolError> {
    field.ok_or(ProtocolError::MissingField(name))
}

fn number<T: std::str::FromStr>(
    field: Option<&str>,
    name: &'static str,
) -> Result<T, ProtocolError> {
    field
        .ok_or(ProtocolError::MissingField(name))?
        .parse()
        .map_err(|_| ProtocolError::MalformedNumber(name))
}

// =============================================================================
// SERVER -> CLIENT REPLIES
// =============================================================================

/// The single synchronous reply to one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Account created.
    RegisterOk,
    /// Session authenticated.
    LoginOk,
    /// Presence snapshot.
    Online(Vec<String>),
    /// Invite delivered to the recipient's mailbox.
    InviteSent,
    /// Decision delivered to the opponent's mailbox.
    RespondOk,
    /// Answer recorded (says nothing about the round's outcome).
    AnswerOk,
    /// One dequeued mailbox event, verbatim.
    Event(String),
    /// The mailbox was empty.
    NoEvent,
    /// History rows queued into the caller's mailbox.
    HistoryRequestOk,
    /// Leaderboard rows queued into the caller's mailbox.
    LeaderboardRequestOk,
    /// Session left the authenticated state and will close.
    LogoutOk,
    /// Liveness answer.
    Pong,
    /// Session will close.
    Bye,
    /// The command failed; the text is everything after `ERROR;`.
    Error(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegisterOk => write!(f, "REGISTER_OK"),
            Self::LoginOk => write!(f, "LOGIN_OK"),
            Self::Online(users) => write!(f, "ONLINE;{}", users.join(",")),
            Self::InviteSent => write!(f, "INVITE_SENT"),
            Self::RespondOk => write!(f, "RESPOND_OK"),
            Self::AnswerOk => write!(f, "ANSWER_OK"),
            Self::Event(line) => write!(f, "{line}"),
            Self::NoEvent => write!(f, "NO_EVENT"),
            Self::HistoryRequestOk => write!(f, "HISTORY_REQUEST_OK"),
            Self::LeaderboardRequestOk => write!(f, "LEADERBOARD_REQUEST_OK"),
            Self::LogoutOk => write!(f, "LOGOUT_OK"),
            Self::Pong => write!(f, "PONG"),
            Self::Bye => write!(f, "BYE"),
            Self::Error(msg) => write!(f, "ERROR;{msg}"),
        }
    }
}

// =============================================================================
// MAILBOX EVENTS
// =============================================================================

/// An asynchronous event queued into a user's mailbox.
///
/// Events are stored as their wire form (the mailbox holds opaque strings);
/// this enum exists so every format lives in one place.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Somebody wants a duel.
    InviteFrom {
        /// The inviting player.
        from: String,
    },

    /// The invited player decided.
    InviteResult {
        /// The player who was invited.
        responder: String,
        /// Their decision.
        decision: Decision,
    },

    /// An accepted invite turned into a match. Both players receive the
    /// identical line.
    MatchStart {
        /// Canonical pair.
        key: MatchKey,
        /// Shared quiz seed.
        seed: u64,
        /// Epoch milliseconds at which round 1 begins on both clients.
        start_at_ms: i64,
    },

    /// A round settled. Both players receive the identical line; player 1
    /// and player 2 are in canonical key order.
    AnswerResult(RoundResult),

    /// One recorded match of the requested history.
    History(MatchRecord),

    /// End of the history listing.
    HistoryEnd,

    /// One leaderboard row.
    Leaderboard(LeaderboardEntry),

    /// End of the leaderboard listing.
    LeaderboardEnd,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InviteFrom { from } => write!(f, "INVITE_FROM;{from}"),
            Self::InviteResult {
                responder,
                decision,
            } => write!(f, "INVITE_RESULT;{responder};{decision}"),
            Self::MatchStart {
                key,
                seed,
                start_at_ms,
            } => write!(
                f,
                "MATCH_START;{};{};{seed};{start_at_ms}",
                key.player1(),
                key.player2()
            ),
            Self::AnswerResult(result) => write!(
                f,
                "ANSWER_RESULT;{};{};{};{};{};{};{};{};{}",
                result.round,
                result.answers[0].correct,
                result.answers[0].elapsed_ms,
                result.points[0],
                result.answers[1].correct,
                result.answers[1].elapsed_ms,
                result.points[1],
                result.totals[0],
                result.totals[1],
            ),
            Self::History(m) => write!(
                f,
                "HISTORY;{};{};{};{};{}",
                m.player1, m.player2, m.score1, m.score2, m.winner
            ),
            Self::HistoryEnd => write!(f, "HISTORY_END"),
            Self::Leaderboard(e) => write!(
                f,
                "LEADERBOARD;{};{};{:.2}",
                e.username, e.wins, e.win_rate
            ),
            Self::LeaderboardEnd => write!(f, "LEADERBOARD_END"),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duel::score::RoundAnswer;
    use chrono::Utc;

    #[test]
    fn test_parse_register_and_login() {
        assert_eq!(
            Command::parse("REGISTER;alice;pw"),
            Ok(Command::Register {
                username: "alice".into(),
                password: "pw".into()
            })
        );
        assert_eq!(
            Command::parse("LOGIN;alice;pw"),
            Ok(Command::Login {
                username: "alice".into(),
                password: "pw".into()
            })
        );
    }

    #[test]
    fn test_parse_command_names_case_insensitive() {
        assert_eq!(Command::parse("who"), Ok(Command::Who));
        assert_eq!(Command::parse("Poll"), Ok(Command::Poll));
        assert_eq!(
            Command::parse("respond;bob;accept"),
            Ok(Command::Respond {
                opponent: "bob".into(),
                decision: Decision::Accept
            })
        );
    }

    #[test]
    fn test_parse_trims_trailing_whitespace() {
        assert_eq!(Command::parse("PING \t"), Ok(Command::Ping));
        assert_eq!(
            Command::parse("INVITE;bob\r"),
            Ok(Command::Invite { to: "bob".into() })
        );
    }

    #[test]
    fn test_password_may_contain_separator() {
        // Only the first two `;` split the line.
        assert_eq!(
            Command::parse("REGISTER;alice;p;w;d"),
            Ok(Command::Register {
                username: "alice".into(),
                password: "p;w;d".into()
            })
        );
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(
            Command::parse("ANSWER;bob;3;1;450"),
            Ok(Command::Answer {
                opponent: "bob".into(),
                round: 3,
                answer_index: 1,
                elapsed_ms: 450
            })
        );
    }

    #[test]
    fn test_parse_missing_fields() {
        assert_eq!(
            Command::parse("INVITE"),
            Err(ProtocolError::MissingField("recipient"))
        );
        assert_eq!(
            Command::parse("REGISTER;alice"),
            Err(ProtocolError::MissingField("password"))
        );
        assert_eq!(
            Command::parse("RESPOND;bob"),
            Err(ProtocolError::MissingField("decision"))
        );
        assert_eq!(
            Command::parse("ANSWER;bob;1"),
            Err(ProtocolError::MissingField("answer index"))
        );
        assert_eq!(
            ProtocolError::MissingField("recipient").to_string(),
            "Missing recipient"
        );
    }

    #[test]
    fn test_parse_malformed_numbers() {
        assert_eq!(
            Command::parse("ANSWER;bob;abc;1;450"),
            Err(ProtocolError::MalformedNumber("round number"))
        );
        assert_eq!(
            Command::parse("ANSWER;bob;1;x;450"),
            Err(ProtocolError::MalformedNumber("answer index"))
        );
        assert_eq!(
            Command::parse("ANSWER;bob;1;2;4.5"),
            Err(ProtocolError::MalformedNumber("elapsed time"))
        );
        assert_eq!(
            ProtocolError::MalformedNumber("round number").to_string(),
            "Malformed round number"
        );
    }

    #[test]
    fn test_parse_invalid_decision() {
        assert_eq!(
            Command::parse("RESPOND;bob;MAYBE"),
            Err(ProtocolError::InvalidDecision)
        );
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        assert_eq!(Command::parse("FROBNICATE"), Err(ProtocolError::UnknownCommand));
        assert_eq!(Command::parse(""), Err(ProtocolError::UnknownCommand));
        assert_eq!(Command::parse("   "), Err(ProtocolError::UnknownCommand));
    }

    #[test]
    fn test_reply_formats() {
        assert_eq!(Reply::RegisterOk.to_string(), "REGISTER_OK");
        assert_eq!(Reply::LoginOk.to_string(), "LOGIN_OK");
        assert_eq!(
            Reply::Online(vec!["alice".into(), "bob".into()]).to_string(),
            "ONLINE;alice,bob"
        );
        assert_eq!(Reply::Online(vec![]).to_string(), "ONLINE;");
        assert_eq!(Reply::NoEvent.to_string(), "NO_EVENT");
        assert_eq!(Reply::Pong.to_string(), "PONG");
        assert_eq!(Reply::Bye.to_string(), "BYE");
        assert_eq!(
            Reply::Error("User not online".into()).to_string(),
            "ERROR;User not online"
        );
    }

    #[test]
    fn test_event_invite_formats() {
        assert_eq!(
            Event::InviteFrom {
                from: "alice".into()
            }
            .to_string(),
            "INVITE_FROM;alice"
        );
        assert_eq!(
            Event::InviteResult {
                responder: "bob".into(),
                decision: Decision::Reject
            }
            .to_string(),
            "INVITE_RESULT;bob;REJECT"
        );
    }

    #[test]
    fn test_event_match_start_uses_canonical_order() {
        let event = Event::MatchStart {
            key: MatchKey::new("bob", "alice"),
            seed: 12345,
            start_at_ms: 1700000000000,
        };
        assert_eq!(event.to_string(), "MATCH_START;alice;bob;12345;1700000000000");
    }

    #[test]
    fn test_event_answer_result_format() {
        let event = Event::AnswerResult(RoundResult {
            round: 2,
            answers: [
                RoundAnswer {
                    correct: true,
                    elapsed_ms: 350,
                },
                RoundAnswer {
                    correct: false,
                    elapsed_ms: 900,
                },
            ],
            points: [2, 0],
            totals: [5, 3],
        });
        assert_eq!(
            event.to_string(),
            "ANSWER_RESULT;2;true;350;2;false;900;0;5;3"
        );
    }

    #[test]
    fn test_event_history_formats() {
        let event = Event::History(MatchRecord {
            player1: "alice".into(),
            player2: "bob".into(),
            score1: 7,
            score2: 4,
            winner: "alice".into(),
            played_at: Utc::now(),
        });
        assert_eq!(event.to_string(), "HISTORY;alice;bob;7;4;alice");
        assert_eq!(Event::HistoryEnd.to_string(), "HISTORY_END");
    }

    #[test]
    fn test_event_leaderboard_formats() {
        let event = Event::Leaderboard(LeaderboardEntry {
            username: "alice".into(),
            wins: 3,
            win_rate: 1.0 / 3.0,
        });
        assert_eq!(event.to_string(), "LEADERBOARD;alice;3;0.33");
        assert_eq!(
            Event::Leaderboard(LeaderboardEntry {
                username: "bob".into(),
                wins: 2,
                win_rate: 0.5,
            })
            .to_string(),
            "LEADERBOARD;bob;2;0.50"
        );
        assert_eq!(Event::LeaderboardEnd.to_string(), "LEADERBOARD_END");
    }

    #[test]
    fn test_greeting_is_tagged() {
        assert!(greeting().starts_with(GREETING_PREFIX));
    }
}
