//! Session state: the single connection and the two working directories.
//!
//! One `Connection` exists per process at most. The REPL controller sits
//! behind a mutex because the channel is half-duplex: overlapping raw-REPL
//! exchanges would interleave on the wire, so every remote round-trip takes
//! the lock for its full duration.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::link::Link;
use crate::repl::{Output, RawRepl, ReplState};
use crate::transport::Pacer;

/// A live board connection. Created by [`Connection::connect`], torn down
/// by [`Connection::disconnect`] or any connection-fatal failure.
pub struct Connection<L: Link> {
    repl: Mutex<RawRepl<L>>,
    config: Config,
}

impl<L: Link> Connection<L> {
    /// Bring the board into raw mode and keep it there for the session.
    pub async fn connect(link: L, config: Config) -> Result<Self> {
        let mut repl = RawRepl::new(link, &config);
        repl.enter().await?;
        info!(port = %config.port, "connected");
        Ok(Self {
            repl: Mutex::new(repl),
            config,
        })
    }

    /// As [`Connection::connect`] but with an injected pacer (tests).
    pub async fn connect_with_pacer(
        link: L,
        config: Config,
        pacer: Arc<dyn Pacer>,
    ) -> Result<Self> {
        let mut repl = RawRepl::with_pacer(link, &config, pacer);
        repl.enter().await?;
        Ok(Self {
            repl: Mutex::new(repl),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one code fragment on the board. Serialized: at most one exchange
    /// is in flight at any time.
    pub async fn exec(&self, op: &str, path: &str, code: &[u8]) -> Result<Output> {
        let mut repl = self.repl.lock().await;
        if repl.state() == ReplState::Disconnected {
            return Err(Error::ConnectionLost(format!(
                "{} is no longer connected",
                self.config.port
            )));
        }
        repl.execute(op, path, code).await
    }

    /// Interrupt whatever the board is doing and return it to the friendly
    /// REPL. Surfaced to callers as `Cancelled` by the operation layer.
    pub async fn interrupt(&self) -> Result<()> {
        let mut repl = self.repl.lock().await;
        repl.interrupt().await
    }

    /// Leave raw mode and release the port.
    pub async fn disconnect(&self) -> Result<()> {
        let mut repl = self.repl.lock().await;
        if repl.state() == ReplState::Ready {
            repl.exit().await?;
        }
        repl.close();
        info!(port = %self.config.port, "disconnected");
        Ok(())
    }

    /// True when a connection-fatal failure has already torn this down.
    pub async fn is_lost(&self) -> bool {
        self.repl.lock().await.state() == ReplState::Disconnected
    }
}
