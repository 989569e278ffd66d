//! Duel Server
//!
//! Async TCP server for the duel protocol. Owns the shared state every
//! session dispatches against, accepts connections and spawns one session
//! task per client, and runs the background sweeper that evicts expired
//! mailboxes and idle matches.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::duel::arbiter::MatchArbiter;
use crate::network::registry::{MailboxRegistry, PresenceRegistry};
use crate::network::session::Session;
use crate::store::UserStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long a silent connection may stay open.
    pub idle_timeout: Duration,
    /// Lead time clients get between MATCH_START delivery and the
    /// synchronized start instant.
    pub match_start_lead: Duration,
    /// Rows returned by GET_HISTORY.
    pub history_limit: usize,
    /// How long an offline user's undelivered events are kept.
    pub mailbox_ttl: Duration,
    /// How long a match may sit without an answer before eviction.
    pub match_ttl: Duration,
    /// Sweeper wakeup period.
    pub sweep_interval: Duration,
    /// Store file; `None` keeps accounts in memory only.
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5150".parse().unwrap(),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            match_start_lead: Duration::from_millis(5000),
            history_limit: 10,
            mailbox_ttl: Duration::from_secs(900),
            match_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            store_path: None,
        }
    }
}

impl ServerConfig {
    /// Build a config from `QUIZTONE_*` environment variables, keeping
    /// the default for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parsed("QUIZTONE_BIND_ADDR", defaults.bind_addr),
            max_connections: env_parsed("QUIZTONE_MAX_CONNECTIONS", defaults.max_connections),
            idle_timeout: env_secs("QUIZTONE_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            match_start_lead: env_millis("QUIZTONE_MATCH_START_LEAD_MS", defaults.match_start_lead),
            history_limit: env_parsed("QUIZTONE_HISTORY_LIMIT", defaults.history_limit),
            mailbox_ttl: env_secs("QUIZTONE_MAILBOX_TTL_SECS", defaults.mailbox_ttl),
            match_ttl: env_secs("QUIZTONE_MATCH_TTL_SECS", defaults.match_ttl),
            sweep_interval: env_secs("QUIZTONE_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            store_path: std::env::var("QUIZTONE_STORE_PATH").ok().map(PathBuf::from),
        }
    }
}

fn env_parsed<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Duel server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Everything a session needs to handle commands. One instance per
/// server, shared behind an `Arc`.
pub struct ServerState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Who is online right now.
    pub presence: PresenceRegistry,
    /// Per-user event queues.
    pub mailboxes: MailboxRegistry,
    /// Active matches and round arbitration.
    pub arbiter: MatchArbiter,
    /// User accounts and finished-match records.
    pub store: Arc<dyn UserStore>,
}

impl ServerState {
    /// Bundle fresh registries around a store.
    pub fn new(config: ServerConfig, store: Arc<dyn UserStore>) -> Self {
        Self {
            config,
            presence: PresenceRegistry::new(),
            mailboxes: MailboxRegistry::new(),
            arbiter: MatchArbiter::new(),
            store,
        }
    }
}

/// The duel server.
pub struct DuelServer {
    /// Shared session state.
    state: Arc<ServerState>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
    /// Open session count.
    active: Arc<AtomicUsize>,
}

impl DuelServer {
    /// Create a new duel server.
    pub fn new(config: ServerConfig, store: Arc<dyn UserStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: Arc::new(ServerState::new(config, store)),
            shutdown_tx,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        info!("Duel server listening on {}", self.state.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener. Split from [`DuelServer::run`]
    /// so tests can bind port 0 and read the real address first.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let sweeper_state = self.state.clone();
        let sweeper_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            Self::run_sweeper_loop(sweeper_state, sweeper_shutdown).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            if self.active.load(Ordering::Acquire) >= self.state.config.max_connections {
                                warn!(%peer, "connection limit reached, rejecting");
                                continue;
                            }

                            self.active.fetch_add(1, Ordering::AcqRel);
                            let state = self.state.clone();
                            let session_shutdown = self.shutdown_tx.subscribe();
                            let active = self.active.clone();
                            tokio::spawn(async move {
                                Session::run(stream, peer, state, session_shutdown).await;
                                active.fetch_sub(1, Ordering::AcqRel);
                            });
                        }
                        Err(err) => {
                            error!(%err, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Periodically drop mailboxes whose user stayed offline past the
    /// TTL and matches nobody has answered in a long time.
    async fn run_sweeper_loop(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(state.config.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            let mailboxes = state.mailboxes.evict_expired(state.config.mailbox_ttl);
            let matches = state.arbiter.evict_idle(state.config.match_ttl);
            if mailboxes > 0 || matches > 0 {
                debug!(mailboxes, matches, "swept expired state");
            }
        }
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Sender other tasks can use to trigger shutdown.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Open session count.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Shared state, for tooling and tests.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }
}
