//! Serial implementation of [`Link`] on top of tokio-serial.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::link::Link;

/// How long one idle poll waits before reporting "nothing pending".
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long DTR is held low to reset the board.
const RESET_PULSE: Duration = Duration::from_millis(100);

pub struct SerialLink {
    port_name: String,
    stream: Option<SerialStream>,
}

impl SerialLink {
    /// Open `port` at `baud`.
    pub fn open(port: &str, baud: u32) -> Result<Self> {
        let stream = tokio_serial::new(port, baud)
            .timeout(POLL_INTERVAL)
            .open_native_async()
            .map_err(|e| Error::Serial(format!("failed to open {port}: {e}")))?;
        debug!(port, baud, "serial port open");
        Ok(Self {
            port_name: port.to_string(),
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost(format!("serial port {} closed", self.port_name)))
    }

    /// Treat any serial I/O failure as a disconnect: the port is gone or the
    /// board rebooted out from under us.
    fn lost(&mut self, context: &str, err: std::io::Error) -> Error {
        self.close();
        Error::ConnectionLost(format!("{} on {}: {}", context, self.port_name, err))
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        trace!(len = data.len(), "serial write");
        match stream.write_all(data).await {
            Ok(()) => match stream.flush().await {
                Ok(()) => Ok(()),
                Err(e) => Err(self.lost("flush failed", e)),
            },
            Err(e) => Err(self.lost("write failed", e)),
        }
    }

    async fn read_some(&mut self, max: usize) -> Result<Vec<u8>> {
        let stream = self.stream()?;
        let mut buf = vec![0u8; max.max(1)];
        match timeout(POLL_INTERVAL, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                // EOF on a serial stream means the device side went away.
                Err(self.lost(
                    "read returned EOF",
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "device disconnected"),
                ))
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                trace!(len = n, "serial read");
                Ok(buf)
            }
            Ok(Err(e)) => Err(self.lost("read failed", e)),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        debug!(port = %self.port_name, "pulsing DTR to reset board");
        let stream = self.stream()?;
        stream
            .write_data_terminal_ready(false)
            .map_err(|e| Error::Serial(format!("DTR low failed: {e}")))?;
        tokio::time::sleep(RESET_PULSE).await;
        stream
            .write_data_terminal_ready(true)
            .map_err(|e| Error::Serial(format!("DTR high failed: {e}")))?;
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
    }
}
