//! Scripted in-memory link for tests.
//!
//! A `MockLink` plays the device side of the conversation: each exchange
//! pairs a write suffix to wait for with the bytes the "device" sends back.
//! Exchanges fire in order, once each. Unmatched writes are simply recorded,
//! which mirrors a real board swallowing control bytes silently.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::link::Link;

#[derive(Debug)]
struct Exchange {
    expect_suffix: Vec<u8>,
    reply: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MockLink {
    script: VecDeque<Exchange>,
    rx: VecDeque<u8>,
    written: Vec<u8>,
    closed: bool,
    /// When false, writes are accepted but nothing ever replies.
    responsive: bool,
    /// Remaining writes before the link starts failing, if set.
    writes_before_failure: Option<usize>,
    resets: usize,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            responsive: true,
            ..Self::default()
        }
    }

    /// A device that never answers (boot-timeout scenarios).
    pub fn unresponsive() -> Self {
        Self {
            responsive: false,
            ..Self::default()
        }
    }

    /// Queue one exchange: when the written stream ends with
    /// `expect_suffix`, `reply` becomes readable.
    pub fn expect(&mut self, expect_suffix: &[u8], reply: &[u8]) -> &mut Self {
        self.script.push_back(Exchange {
            expect_suffix: expect_suffix.to_vec(),
            reply: reply.to_vec(),
        });
        self
    }

    /// Queue the standard raw-REPL entry handshake for `banner`.
    pub fn expect_enter(&mut self, banner: &[u8]) -> &mut Self {
        self.expect(b"\r\x01", b"raw REPL; CTRL-B to exit\r\n>");
        let mut boot = banner.to_vec();
        boot.extend_from_slice(b"raw REPL; CTRL-B to exit\r\n>");
        self.expect(b"\x04", &boot);
        self
    }

    /// Queue one raw execution: `OK`, then stdout and stderr blocks, each
    /// terminated by the 0x04 sentinel.
    pub fn expect_exec(&mut self, stdout: &[u8], stderr: &[u8]) -> &mut Self {
        let mut reply = b"OK".to_vec();
        reply.extend_from_slice(stdout);
        reply.push(0x04);
        reply.extend_from_slice(stderr);
        reply.push(0x04);
        // the raw REPL prints its prompt again after the exchange
        reply.push(b'>');
        self.expect(b"\x04", &reply)
    }

    /// Let `n` more writes succeed, then fail every later one as a lost
    /// connection (cable-pull scenarios).
    pub fn fail_after_writes(&mut self, n: usize) -> &mut Self {
        self.writes_before_failure = Some(n);
        self
    }

    /// Everything written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionLost("mock link closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Link for MockLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.check_closed()?;
        if let Some(left) = &mut self.writes_before_failure {
            if *left == 0 {
                self.closed = true;
                return Err(Error::ConnectionLost("mock link write failed".into()));
            }
            *left -= 1;
        }
        self.written.extend_from_slice(data);
        if !self.responsive {
            return Ok(());
        }
        while self
            .script
            .front()
            .is_some_and(|front| self.written.ends_with(&front.expect_suffix))
        {
            if let Some(exchange) = self.script.pop_front() {
                self.rx.extend(exchange.reply);
            }
        }
        Ok(())
    }

    async fn read_some(&mut self, max: usize) -> Result<Vec<u8>> {
        self.check_closed()?;
        let n = max.min(self.rx.len());
        Ok(self.rx.drain(..n).collect())
    }

    async fn reset(&mut self) -> Result<()> {
        self.check_closed()?;
        self.resets += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
