//! Serial link boundary.
//!
//! The REPL controller and transport only ever need this narrow interface:
//! write bytes, poll for pending bytes, reset the board, close. Everything
//! timing-related (deadlines, read-until loops) lives above the link.

use async_trait::async_trait;

use crate::error::Result;

pub mod mock;
pub mod serial;

pub use serial::SerialLink;

/// Byte-stream access to one connected board.
#[async_trait]
pub trait Link: Send {
    /// Write the whole buffer.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is pending, up to `max` bytes. Returns an empty vec
    /// when nothing is buffered; never blocks past one poll interval.
    async fn read_some(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Trigger a board reset (DTR pulse on serial hardware). Session entry
    /// uses the interpreter's own soft reset instead; this is the
    /// last-resort escape hatch for a board whose interpreter is wedged,
    /// exposed for callers embedding the library.
    async fn reset(&mut self) -> Result<()>;

    /// Release the underlying handle. Further calls fail.
    fn close(&mut self);
}
