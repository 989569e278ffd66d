//! Line Protocol Client
//!
//! Small client for the duel protocol, used by the integration tests and
//! command-line tooling. One request produces exactly one reply line;
//! queued events only ever arrive through POLL.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::network::protocol::{GREETING_PREFIX, MAX_LINE_LEN};

/// Best-effort window for the advisory greeting during connect.
const GREETING_TIMEOUT: Duration = Duration::from_millis(300);

/// How long to wait for any single reply line.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket failure.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing failure (oversized or non-UTF-8 line).
    #[error("codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// No reply line within [`REPLY_TIMEOUT`].
    #[error("timed out waiting for the server")]
    TimedOut,

    /// The first line was not the expected greeting.
    #[error("unexpected greeting: {0}")]
    BadGreeting(String),
}

/// One framed duel connection with request/reply helpers.
#[derive(Debug)]
pub struct DuelClient {
    framed: Framed<TcpStream, LinesCodec>,
    greeted: bool,
}

impl DuelClient {
    /// Connect and consume the server greeting if it arrives promptly.
    ///
    /// The greeting is advisory, so a socket that stays quiet through the
    /// window is treated as "no greeting", not as an error. A greeting
    /// that shows up later is dropped by [`request`](Self::request) before
    /// reply pairing.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

        let mut greeted = false;
        match timeout(GREETING_TIMEOUT, framed.next()).await {
            Ok(Some(line)) => {
                let line = line?;
                if !line.starts_with(GREETING_PREFIX) {
                    return Err(ClientError::BadGreeting(line));
                }
                greeted = true;
            }
            Ok(None) => return Err(ClientError::Closed),
            Err(_) => {}
        }

        Ok(Self { framed, greeted })
    }

    /// Send one command line and read the single reply line.
    pub async fn request(&mut self, line: &str) -> Result<String, ClientError> {
        self.framed.send(line).await?;
        loop {
            match timeout(REPLY_TIMEOUT, self.framed.next()).await {
                Ok(Some(reply)) => {
                    let reply = reply?;
                    if !self.greeted && reply.starts_with(GREETING_PREFIX) {
                        // Late greeting, never pairs with a request.
                        self.greeted = true;
                        continue;
                    }
                    return Ok(reply);
                }
                Ok(None) => return Err(ClientError::Closed),
                Err(_) => return Err(ClientError::TimedOut),
            }
        }
    }

    /// Poll until an event arrives, giving up after `attempts` polls
    /// that all came back NO_EVENT.
    pub async fn poll_event(&mut self, attempts: usize) -> Result<Option<String>, ClientError> {
        for _ in 0..attempts {
            let reply = self.request("POLL").await?;
            if reply != "NO_EVENT" {
                return Ok(Some(reply));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(None)
    }
}

// =============================================================================
// TESTS
// =============================================================================
