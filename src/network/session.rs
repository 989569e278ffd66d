//! Connection Session
//!
//! One session per accepted TCP connection: a line-oriented state machine
//! that authenticates the user and dispatches commands against the shared
//! registries, the arbiter and the store. Replies are strictly one line
//! per command, in command order; everything asynchronous goes through
//! the recipient's mailbox.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::rng::derive_match_seed;
use crate::duel::arbiter::{ArbiterError, RoundOutcome};
use crate::duel::key::MatchKey;
use crate::duel::quiz;
use crate::network::protocol::{
    greeting, Command, Decision, Event, ProtocolError, Reply, MAX_LINE_LEN,
};
use crate::network::server::ServerState;
use crate::store::StorageError;

/// Why a handled command failed. The Display text of each variant is
/// exactly what the client sees after `ERROR;`.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    /// Command requires a logged-in session.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The line did not parse.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Domain rule violated; the text is the rule's client message.
    #[error("{0}")]
    Rejected(String),

    /// Storage infrastructure fault (not a domain rejection).
    #[error("Database error: {0}")]
    Storage(StorageError),

    /// Invariant breakage that should never surface in normal operation.
    #[error("Server error: {0}")]
    Internal(String),
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateUser | StorageError::EmptyCredentials => {
                Self::Rejected(err.to_string())
            }
            other => Self::Storage(other),
        }
    }
}

impl From<ArbiterError> for CommandError {
    fn from(err: ArbiterError) -> Self {
        match err {
            ArbiterError::UnknownMatch => Self::Rejected(err.to_string()),
            // The key is always built from the submitting user, so this
            // cannot happen through the protocol.
            ArbiterError::NotAParticipant => Self::Internal(err.to_string()),
        }
    }
}

/// Protocol state of one connection.
pub(crate) struct Session {
    id: Uuid,
    peer: SocketAddr,
    /// Set by LOGIN, cleared by LOGOUT.
    user: Option<String>,
    /// Set when the current reply is the session's last line.
    closing: bool,
}

impl Session {
    pub(crate) fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            user: None,
            closing: false,
        }
    }

    /// Drive a connection until the peer leaves, a timeout fires, or the
    /// server shuts down. Consumes the socket; presence and mailbox
    /// cleanup always runs on the way out.
    pub(crate) async fn run(
        stream: TcpStream,
        peer: SocketAddr,
        state: Arc<ServerState>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut session = Session::new(peer);
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
        debug!(session = %session.id, %peer, "session open");

        if framed.send(greeting()).await.is_err() {
            debug!(session = %session.id, "peer left before greeting");
            return;
        }

        let mut resume_after_error = false;
        loop {
            let next = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(session = %session.id, "server shutdown");
                    break;
                }
                next = timeout(state.config.idle_timeout, framed.next()) => next,
            };

            let line = match next {
                // No complete line within the idle window.
                Err(_) => {
                    info!(session = %session.id, user = ?session.user, "idle timeout");
                    break;
                }
                Ok(None) => {
                    // After a decode error the framed stream yields a single
                    // `None` before resuming (tokio-rs/tokio#3976); only an
                    // unflagged `None` means the peer actually left.
                    if resume_after_error {
                        resume_after_error = false;
                        continue;
                    }
                    debug!(session = %session.id, "peer closed");
                    break;
                }
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    // The codec discards up to the next newline, so the
                    // session survives once the follow-up `None` is consumed.
                    resume_after_error = true;
                    warn!(session = %session.id, "oversized line");
                    let reply = Reply::Error("Line too long".into());
                    if framed.send(reply.to_string()).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Some(Err(LinesCodecError::Io(err)))) => {
                    debug!(session = %session.id, %err, "read failed");
                    break;
                }
                Ok(Some(Ok(line))) => line,
            };

            let reply = session.dispatch(&line, &state);
            if framed.send(reply.to_string()).await.is_err() {
                break;
            }
            if session.closing {
                break;
            }
        }

        session.cleanup(&state);
    }

    /// Turn one received line into one reply line.
    pub(crate) fn dispatch(&mut self, line: &str, state: &ServerState) -> Reply {
        let result = Command::parse(line)
            .map_err(CommandError::from)
            .and_then(|command| self.handle(command, state));

        match result {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    CommandError::Storage(source) => {
                        error!(session = %self.id, %source, "storage failure")
                    }
                    CommandError::Internal(detail) => {
                        error!(session = %self.id, %detail, "internal failure")
                    }
                    _ => debug!(session = %self.id, %err, "command rejected"),
                }
                Reply::Error(err.to_string())
            }
        }
    }

    fn handle(&mut self, command: Command, state: &ServerState) -> Result<Reply, CommandError> {
        match command {
            Command::Register { username, password } => self.register(username, password, state),
            Command::Login { username, password } => self.login(username, password, state),
            Command::Who => Ok(Reply::Online(state.presence.snapshot())),
            Command::Invite { to } => self.invite(to, state),
            Command::Respond { opponent, decision } => self.respond(opponent, decision, state),
            Command::Answer {
                opponent,
                round,
                answer_index,
                elapsed_ms,
            } => self.answer(opponent, round, answer_index, elapsed_ms, state),
            Command::Poll => self.poll(state),
            Command::GetHistory { username } => self.history(username, state),
            Command::GetLeaderboard => self.leaderboard(state),
            Command::Logout => self.logout(state),
            Command::Ping => {
                self.require_user()?;
                Ok(Reply::Pong)
            }
            Command::Exit => {
                self.closing = true;
                Ok(Reply::Bye)
            }
        }
    }

    fn require_user(&self) -> Result<&str, CommandError> {
        self.user.as_deref().ok_or(CommandError::Unauthenticated)
    }

    fn register(
        &mut self,
        username: String,
        password: String,
        state: &ServerState,
    ) -> Result<Reply, CommandError> {
        state.store.register(&username, &password)?;
        info!(session = %self.id, user = %username, "registered");
        Ok(Reply::RegisterOk)
    }

    fn login(
        &mut self,
        username: String,
        password: String,
        state: &ServerState,
    ) -> Result<Reply, CommandError> {
        if self.user.is_some() {
            return Err(CommandError::Rejected("Already logged in".into()));
        }
        if !state.store.check_login(&username, &password)? {
            return Err(CommandError::Rejected("Invalid username or password".into()));
        }
        // Presence doubles as the duplicate-login guard: a name that took
        // the presence slot keeps the single mailbox reader.
        if !state.presence.insert(&username) {
            return Err(CommandError::Rejected(
                "User already logged in elsewhere".into(),
            ));
        }
        state.mailboxes.mark_online(&username);
        info!(session = %self.id, user = %username, peer = %self.peer, "login");
        self.user = Some(username);
        Ok(Reply::LoginOk)
    }

    fn invite(&mut self, to: String, state: &ServerState) -> Result<Reply, CommandError> {
        let user = self.require_user()?;
        if to == user {
            return Err(CommandError::Rejected("Cannot invite yourself".into()));
        }
        if !state.presence.contains(&to) {
            return Err(CommandError::Rejected("User not online".into()));
        }
        state.mailboxes.enqueue(
            &to,
            Event::InviteFrom {
                from: user.to_owned(),
            }
            .to_string(),
        );
        debug!(session = %self.id, from = %user, to = %to, "invite queued");
        Ok(Reply::InviteSent)
    }

    fn respond(
        &mut self,
        opponent: String,
        decision: Decision,
        state: &ServerState,
    ) -> Result<Reply, CommandError> {
        let user = self.require_user()?.to_owned();
        if opponent == user {
            return Err(CommandError::Rejected("Cannot respond to yourself".into()));
        }

        state.mailboxes.enqueue(
            &opponent,
            Event::InviteResult {
                responder: user.clone(),
                decision,
            }
            .to_string(),
        );

        if decision == Decision::Accept {
            let key = MatchKey::new(&user, &opponent);
            let seed = derive_match_seed(key.player1(), key.player2(), clock_nanos());
            let start_at_ms =
                Utc::now().timestamp_millis() + state.config.match_start_lead.as_millis() as i64;
            state.arbiter.register_match(key.clone(), seed);

            // Both players get the identical line, the inviter after the
            // INVITE_RESULT already queued above.
            let line = Event::MatchStart {
                key: key.clone(),
                seed,
                start_at_ms,
            }
            .to_string();
            state.mailboxes.enqueue(&opponent, line.clone());
            state.mailboxes.enqueue(&user, line);
            info!(session = %self.id, %key, seed, start_at_ms, "match starting");
        }

        Ok(Reply::RespondOk)
    }

    fn answer(
        &mut self,
        opponent: String,
        round: u32,
        answer_index: u8,
        elapsed_ms: u64,
        state: &ServerState,
    ) -> Result<Reply, CommandError> {
        let user = self.require_user()?;
        let key = MatchKey::new(user, &opponent);
        let seed = state
            .arbiter
            .match_seed(&key)
            .ok_or(ArbiterError::UnknownMatch)?;

        // Regenerate the round's question to judge the submitted index.
        let question = quiz::generate(seed, round);
        let outcome = state.arbiter.submit_answer(
            &key,
            round,
            user,
            answer_index,
            elapsed_ms,
            question.correct_index,
        )?;

        if let RoundOutcome::Completed(result) = outcome {
            let line = Event::AnswerResult(result).to_string();
            state.mailboxes.enqueue(key.player1(), line.clone());
            state.mailboxes.enqueue(key.player2(), line);
            debug!(session = %self.id, %key, round, "round settled");
        }

        Ok(Reply::AnswerOk)
    }

    fn poll(&mut self, state: &ServerState) -> Result<Reply, CommandError> {
        let user = self.require_user()?;
        Ok(state
            .mailboxes
            .dequeue(user)
            .map(Reply::Event)
            .unwrap_or(Reply::NoEvent))
    }

    fn history(&mut self, username: String, state: &ServerState) -> Result<Reply, CommandError> {
        let user = self.require_user()?;
        if username != user {
            return Err(CommandError::Rejected(
                "You can only request your own history".into(),
            ));
        }
        let rows = state.store.last_matches(user, state.config.history_limit)?;
        for row in rows {
            state.mailboxes.enqueue(user, Event::History(row).to_string());
        }
        state.mailboxes.enqueue(user, Event::HistoryEnd.to_string());
        Ok(Reply::HistoryRequestOk)
    }

    fn leaderboard(&mut self, state: &ServerState) -> Result<Reply, CommandError> {
        let user = self.require_user()?;
        let rows = state.store.leaderboard()?;
        for row in rows {
            state
                .mailboxes
                .enqueue(user, Event::Leaderboard(row).to_string());
        }
        state.mailboxes.enqueue(user, Event::LeaderboardEnd.to_string());
        Ok(Reply::LeaderboardRequestOk)
    }

    fn logout(&mut self, state: &ServerState) -> Result<Reply, CommandError> {
        let Some(user) = self.user.take() else {
            return Err(CommandError::Unauthenticated);
        };
        state.presence.remove(&user);
        state.mailboxes.mark_offline(&user);
        info!(session = %self.id, user = %user, "logout");
        self.closing = true;
        Ok(Reply::LogoutOk)
    }

    /// Presence and mailbox bookkeeping for a session ending for any
    /// reason. A no-op after LOGOUT, which already cleared `user`.
    fn cleanup(&mut self, state: &ServerState) {
        if let Some(user) = self.user.take() {
            state.presence.remove(&user);
            state.mailboxes.mark_offline(&user);
            info!(session = %self.id, user = %user, "session closed");
        } else {
            debug!(session = %self.id, "session closed");
        }
    }
}

fn clock_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

// =============================================================================
// TESTS
// =============================================================================
