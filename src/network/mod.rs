//! Network Layer
//!
//! TCP line-protocol server for duel arbitration. This layer is
//! **non-deterministic** - all quiz and scoring logic runs through `duel/`.

pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use client::{ClientError, DuelClient};
pub use protocol::{Command, Decision, Event, ProtocolError, Reply};
pub use registry::{MailboxRegistry, PresenceRegistry};
pub use server::{DuelServer, ServerConfig, ServerError, ServerState};
