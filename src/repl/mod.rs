//! Raw-REPL controller.
//!
//! State machine that drives the device interpreter between the friendly
//! REPL and raw mode. Entry performs a soft reset and watches for the
//! locale-specific boot banner; execution ships code through the chunked
//! transport and parses the 0x04-sentinel-delimited output blocks.
//!
//! Control bytes: Ctrl-A enters raw mode, Ctrl-B leaves it, Ctrl-C
//! interrupts running code, Ctrl-D soft-resets (or, inside raw mode,
//! terminates a command).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::link::Link;
use crate::locale;
use crate::transport::{ChunkedSender, Pacer, ACK_TIMEOUT};

const CTRL_A: u8 = 0x01;
const CTRL_B: u8 = 0x02;
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;

/// Raw mode announces itself with this line, followed by its `>` prompt.
const RAW_REPL_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n";

/// Output blocks in raw mode are terminated by Ctrl-D.
const EOF_SENTINEL: u8 = CTRL_D;

/// Grace period for the device to acknowledge an interrupt.
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

/// Idle wait between polls while accumulating a read.
const READ_POLL: Duration = Duration::from_millis(2);

/// Connection lifecycle states. Only the controller mutates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Disconnected,
    Normal,
    Entering,
    Ready,
    Executing,
    Exiting,
}

impl ReplState {
    pub fn name(self) -> &'static str {
        match self {
            ReplState::Disconnected => "Disconnected",
            ReplState::Normal => "Normal",
            ReplState::Entering => "Entering",
            ReplState::Ready => "Ready",
            ReplState::Executing => "Executing",
            ReplState::Exiting => "Exiting",
        }
    }
}

/// Captured output of one raw execution.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    /// Error channel; non-empty means the device raised (see `execute`).
    pub stderr: Vec<u8>,
}

enum ReadOutcome {
    Matched(Vec<u8>),
    TimedOut(Vec<u8>),
}

pub struct RawRepl<L: Link> {
    link: L,
    state: ReplState,
    banner: Vec<u8>,
    raw_repl_timeout: Duration,
    exec_timeout: Duration,
    sender: ChunkedSender,
}

impl<L: Link> RawRepl<L> {
    pub fn new(link: L, config: &Config) -> Self {
        Self::with_pacer(link, config, Arc::new(crate::transport::TokioPacer))
    }

    pub fn with_pacer(link: L, config: &Config, pacer: Arc<dyn Pacer>) -> Self {
        Self {
            link,
            state: ReplState::Normal,
            banner: locale::banner_for(&config.locale).to_vec(),
            raw_repl_timeout: config.raw_repl_timeout,
            exec_timeout: config.exec_timeout,
            sender: ChunkedSender::with_pacer(config.chunk_size, config.chunk_wait, pacer),
        }
    }

    pub fn state(&self) -> ReplState {
        self.state
    }

    /// Put the device into raw mode: interrupt, enter raw REPL, soft reset,
    /// wait for the boot banner, wait for the raw prompt again.
    ///
    /// Distinguishes a silent device (`BootTimeout`) from one that booted
    /// with an unrecognized banner (`BannerMismatch`, fix with `--locale`).
    pub async fn enter(&mut self) -> Result<()> {
        if self.state != ReplState::Normal {
            return Err(Error::BadState {
                expected: "Normal",
                found: self.state.name(),
            });
        }
        self.state = ReplState::Entering;
        debug!("entering raw REPL");

        // Kill whatever is running, then discard the noise it produced.
        if let Err(e) = self.handshake().await {
            let e = self.fail(e);
            // a failed entry leaves the interpreter state unknown
            if self.state == ReplState::Entering {
                self.state = ReplState::Normal;
            }
            return Err(e);
        }
        self.state = ReplState::Ready;
        debug!("raw REPL ready");
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        self.link.write_all(&[b'\r', CTRL_C, CTRL_C]).await?;
        self.drain().await?;

        self.link.write_all(&[b'\r', CTRL_A]).await?;
        let mut ack = RAW_REPL_BANNER.to_vec();
        ack.push(b'>');
        match self.read_until(&ack, self.raw_repl_timeout, false).await? {
            ReadOutcome::Matched(_) => {}
            ReadOutcome::TimedOut(_) => return Err(Error::BootTimeout(self.raw_repl_timeout)),
        }

        // Soft reset; the boot transcript ends with the locale banner.
        self.link.write_all(&[CTRL_D]).await?;
        match self
            .read_until(&self.banner.clone(), self.raw_repl_timeout, false)
            .await?
        {
            ReadOutcome::Matched(transcript) => {
                trace!(len = transcript.len(), "boot transcript");
            }
            ReadOutcome::TimedOut(transcript) if transcript.is_empty() => {
                return Err(Error::BootTimeout(self.raw_repl_timeout));
            }
            ReadOutcome::TimedOut(transcript) => {
                return Err(Error::BannerMismatch {
                    transcript: String::from_utf8_lossy(&transcript).into_owned(),
                });
            }
        }

        // boot.py output may appear before raw mode announces itself again
        match self
            .read_until(RAW_REPL_BANNER, self.raw_repl_timeout, false)
            .await?
        {
            ReadOutcome::Matched(_) => Ok(()),
            ReadOutcome::TimedOut(_) => Err(Error::BootTimeout(self.raw_repl_timeout)),
        }
    }

    /// Return to the friendly REPL. A no-op when already there.
    pub async fn exit(&mut self) -> Result<()> {
        match self.state {
            ReplState::Normal => return Ok(()),
            ReplState::Ready => {}
            _ => {
                return Err(Error::BadState {
                    expected: "Ready",
                    found: self.state.name(),
                });
            }
        }
        self.state = ReplState::Exiting;
        let result = self.link.write_all(&[b'\r', CTRL_B]).await;
        match result {
            Ok(()) => {
                self.state = ReplState::Normal;
                debug!("left raw REPL");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Execute `code` in raw mode and collect both output blocks.
    ///
    /// `op` names the logical operation for error reporting. A non-empty
    /// error channel becomes `DeviceError` with the traceback verbatim; the
    /// soft-reboot banner appearing instead of output means the device
    /// reset mid-command and is reported as `ConnectionLost`, never as a
    /// silent empty success.
    pub async fn execute(&mut self, op: &str, path: &str, code: &[u8]) -> Result<Output> {
        if self.state != ReplState::Ready {
            return Err(Error::BadState {
                expected: "Ready",
                found: self.state.name(),
            });
        }
        self.state = ReplState::Executing;
        trace!(op, path, len = code.len(), "executing fragment");

        let result = self.execute_inner(op, code).await;
        match result {
            Ok(output) => {
                self.state = ReplState::Ready;
                if output.stderr.is_empty() {
                    Ok(output)
                } else {
                    Err(Error::Device {
                        op: op.to_string(),
                        path: path.to_string(),
                        message: String::from_utf8_lossy(&output.stderr).into_owned(),
                    })
                }
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn execute_inner(&mut self, op: &str, code: &[u8]) -> Result<Output> {
        // raw mode re-prompts with '>' after the previous exchange
        match self.read_until(b">", self.raw_repl_timeout, false).await? {
            ReadOutcome::Matched(_) => {}
            ReadOutcome::TimedOut(_) => {
                return Err(Error::ExecutionTimeout { op: op.to_string() });
            }
        }

        self.sender.send(&mut self.link, code).await?;
        self.link.write_all(&[CTRL_D]).await?;
        self.sender
            .await_ack(&mut self.link, b"OK", ACK_TIMEOUT)
            .await?;

        let stdout = self.read_output_block(op).await?;
        let stderr = self.read_output_block(op).await?;
        Ok(Output { stdout, stderr })
    }

    async fn read_output_block(&mut self, op: &str) -> Result<Vec<u8>> {
        match self
            .read_until(&[EOF_SENTINEL], self.exec_timeout, true)
            .await?
        {
            ReadOutcome::Matched(mut data) => {
                data.pop(); // strip the sentinel
                Ok(data)
            }
            ReadOutcome::TimedOut(_) => Err(Error::ExecutionTimeout { op: op.to_string() }),
        }
    }

    /// User interrupt: Ctrl-C, then a clean return to the friendly REPL.
    /// An unacknowledged interrupt forces the session to `ConnectionLost`.
    pub async fn interrupt(&mut self) -> Result<()> {
        debug!("interrupting device");
        if let Err(e) = self.link.write_all(&[CTRL_C]).await {
            return Err(self.fail(e));
        }
        match self.read_until(b">", INTERRUPT_GRACE, false).await {
            Ok(ReadOutcome::Matched(_)) => {
                // the device may still be in raw mode if this write is lost
                if let Err(e) = self.link.write_all(&[b'\r', CTRL_B]).await {
                    return Err(self.fail(e));
                }
                self.state = ReplState::Normal;
                Ok(())
            }
            Ok(ReadOutcome::TimedOut(_)) => {
                warn!("interrupt not acknowledged, dropping connection");
                Err(self.fail(Error::ConnectionLost(
                    "interrupt not acknowledged".into(),
                )))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Tear down the link. The controller is unusable afterwards.
    pub fn close(&mut self) {
        self.link.close();
        self.state = ReplState::Disconnected;
    }

    /// Mark the session dead on connection-level failures.
    fn fail(&mut self, e: Error) -> Error {
        if e.is_connection_fatal() {
            self.link.close();
            self.state = ReplState::Disconnected;
        } else if self.state == ReplState::Executing {
            self.state = ReplState::Ready;
        }
        e
    }

    async fn drain(&mut self) -> Result<()> {
        loop {
            let pending = self.link.read_some(256).await?;
            if pending.is_empty() {
                return Ok(());
            }
            trace!(len = pending.len(), "drained");
        }
    }

    /// Accumulate input until it ends with `pattern` or `timeout` elapses.
    /// With `watch_reboot`, a soft-reboot banner in the stream aborts with
    /// `ConnectionLost` (the device reset underneath us).
    async fn read_until(
        &mut self,
        pattern: &[u8],
        timeout: Duration,
        watch_reboot: bool,
    ) -> Result<ReadOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut data: Vec<u8> = Vec::new();
        loop {
            if data.ends_with(pattern) {
                return Ok(ReadOutcome::Matched(data));
            }
            if watch_reboot && contains(&data, &self.banner) {
                return Err(Error::ConnectionLost(
                    "device soft-rebooted mid-command".into(),
                ));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(ReadOutcome::TimedOut(data));
            }
            // one byte at a time so the match stops exactly at the pattern
            // and anything after it stays buffered in the link
            let pending = self.link.read_some(1).await?;
            if pending.is_empty() {
                tokio::time::sleep(READ_POLL).await;
            } else {
                data.extend_from_slice(&pending);
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLink;
    use crate::transport::NoopPacer;

    fn fast_config() -> Config {
        let mut config = Config::new("/dev/null");
        config.locale = "en".to_string();
        config.raw_repl_timeout = Duration::from_millis(200);
        config.exec_timeout = Duration::from_millis(200);
        config.chunk_wait = Duration::ZERO;
        config
    }

    fn repl_with(link: MockLink) -> RawRepl<MockLink> {
        RawRepl::with_pacer(link, &fast_config(), Arc::new(NoopPacer))
    }

    #[tokio::test]
    async fn enter_then_exit_returns_to_normal() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        let mut repl = repl_with(link);

        assert_eq!(repl.state(), ReplState::Normal);
        repl.enter().await.unwrap();
        assert_eq!(repl.state(), ReplState::Ready);
        repl.exit().await.unwrap();
        assert_eq!(repl.state(), ReplState::Normal);
    }

    #[tokio::test]
    async fn exit_from_normal_is_noop() {
        let link = MockLink::new();
        let mut repl = repl_with(link);
        repl.exit().await.unwrap();
        assert_eq!(repl.state(), ReplState::Normal);
    }

    #[tokio::test]
    async fn double_enter_fails_deterministically() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        let err = repl.enter().await.unwrap_err();
        assert!(matches!(
            err,
            Error::BadState {
                expected: "Normal",
                found: "Ready"
            }
        ));
        // state not corrupted: session still usable
        assert_eq!(repl.state(), ReplState::Ready);
    }

    #[tokio::test]
    async fn silent_device_is_boot_timeout() {
        let link = MockLink::unresponsive();
        let mut repl = repl_with(link);

        let start = std::time::Instant::now();
        let err = repl.enter().await.unwrap_err();
        assert!(matches!(err, Error::BootTimeout(_)));
        // bounded by the configured timeout, not hanging
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn wrong_banner_is_banner_mismatch() {
        let mut link = MockLink::new();
        link.expect(b"\r\x01", b"raw REPL; CTRL-B to exit\r\n>");
        // device boots in German while we expect English
        link.expect(b"\x04", b"weicher reboot\r\nraw REPL; CTRL-B to exit\r\n>");
        let mut repl = repl_with(link);

        let err = repl.enter().await.unwrap_err();
        match err {
            Error::BannerMismatch { transcript } => {
                assert!(transcript.contains("weicher reboot"));
            }
            other => panic!("expected BannerMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_splits_output_channels() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        link.expect_exec(b"[1, 2]\r\n", b"");
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        let out = repl.execute("list", "/", b"print([1, 2])").await.unwrap();
        assert_eq!(out.stdout, b"[1, 2]\r\n");
        assert!(out.stderr.is_empty());
        assert_eq!(repl.state(), ReplState::Ready);
    }

    #[tokio::test]
    async fn traceback_becomes_device_error() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        link.expect_exec(
            b"",
            b"Traceback (most recent call last):\r\nOSError: [Errno 2] No such file/directory\r\n",
        );
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        let err = repl
            .execute("stat", "/missing.txt", b"import os\nos.stat('/missing.txt')")
            .await
            .unwrap_err();
        match err {
            Error::Device { op, path, message } => {
                assert_eq!(op, "stat");
                assert_eq!(path, "/missing.txt");
                assert!(message.contains("Errno 2"));
            }
            other => panic!("expected Device, got {other:?}"),
        }
        // per-operation failure: connection still usable
        assert_eq!(repl.state(), ReplState::Ready);
    }

    #[tokio::test]
    async fn reboot_mid_command_is_connection_lost() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        // instead of output blocks the device prints the boot banner
        let mut reply = b"OK".to_vec();
        reply.extend_from_slice(b"soft reboot\r\n");
        link.expect(b"\x04", &reply);
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        let err = repl.execute("exec", "-", b"print('x')").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(repl.state(), ReplState::Disconnected);
    }

    #[tokio::test]
    async fn execute_requires_ready() {
        let link = MockLink::new();
        let mut repl = repl_with(link);
        let err = repl.execute("ls", "/", b"x").await.unwrap_err();
        assert!(matches!(err, Error::BadState { .. }));
    }

    #[tokio::test]
    async fn interrupt_returns_to_normal() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        link.expect(b"\x03", b"KeyboardInterrupt\r\n>");
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        // prompt byte from the enter handshake is still pending; drain it
        repl.drain().await.unwrap();
        repl.interrupt().await.unwrap();
        assert_eq!(repl.state(), ReplState::Normal);
    }

    #[tokio::test]
    async fn failed_exit_write_after_interrupt_drops_connection() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        link.expect(b"\x03", b"KeyboardInterrupt\r\n>");
        // entry takes three writes, the interrupt a fourth; the Ctrl-B
        // that would restore the friendly REPL is the one that fails
        link.fail_after_writes(4);
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        repl.drain().await.unwrap();
        let err = repl.interrupt().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        // never claimed Normal with the device possibly still in raw mode
        assert_eq!(repl.state(), ReplState::Disconnected);
    }

    #[tokio::test]
    async fn unacknowledged_interrupt_drops_connection() {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        let mut repl = repl_with(link);

        repl.enter().await.unwrap();
        repl.drain().await.unwrap();
        let err = repl.interrupt().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(repl.state(), ReplState::Disconnected);
    }
}
