//! Provides an asynchronous client for an Antra BMS stack using Tokio and the
//! `tokio-serial` crate for serial communication.
//!
//! One request is in flight at a time: the client writes a command, waits the
//! inter-command delay and then reads frames until one passes every check or
//! the timeout expires. Frames that fail a check (other controllers polling
//! the bus, corrupted bytes, refused requests) are logged and skipped.
//!
//! # Example
//!
//! ```no_run
//! use antrabms_lib::tokio_serial_async::{AntraBMS, Error};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Error> {
//!     let mut bms = AntraBMS::new("/dev/ttyUSB0", 9600)?;
//!     bms.set_timeout(Duration::from_secs(3))?;
//!
//!     println!("Protocol version: {}", bms.get_protocol_version().await?);
//!
//!     let snapshot = bms.get_analog_data().await?;
//!     println!("Voltage: {:.2}V", snapshot.group.voltage);
//!     for (number, battery) in &snapshot.batteries {
//!         println!("Battery {number}: {}% {:?}", battery.soc, battery.cell_voltages);
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::protocol::*;
use crate::snapshot::{assemble, Snapshot};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Errors specific to the asynchronous Tokio serial port client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error originating from the protocol layer.
    #[error("Antra error: {0}")]
    AntraError(#[from] crate::Error),
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from the `tokio-serial` crate.
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
    /// No acceptable reply arrived within the configured timeout.
    #[error("Tokio timeout elapsed: {0}")]
    TokioElapsed(#[from] tokio::time::error::Elapsed),
}

/// A specialized `Result` type for operations within the `tokio_serial_async` module.
pub type Result<T> = std::result::Result<T, Error>;

/// Asynchronous client for one group of an Antra BMS stack.
///
/// Generic over the byte stream so it can run on anything that reads and
/// writes, a serial port by default.
#[derive(Debug)]
pub struct AntraBMS<T = SerialStream> {
    stream: T,
    rx_buffer: Vec<u8>,
    group: u8,
    io_timeout: Duration,
    delay: Duration, // Delay between write and read
}

impl AntraBMS<SerialStream> {
    /// Opens `port` with 8N1 and no flow control.
    ///
    /// `baud_rate` must be one of [`BAUD_RATES`].
    pub fn new(port: &str, baud_rate: u32) -> Result<Self> {
        if !BAUD_RATES.contains(&baud_rate) {
            log::error!("Unsupported baud rate {baud_rate}, expected one of {BAUD_RATES:?}");
            return Err(crate::Error::RangeError.into());
        }
        let serial = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        log::debug!("Opened {port} at {baud_rate} baud");
        Ok(Self::from_stream(serial))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AntraBMS<T> {
    pub fn from_stream(stream: T) -> Self {
        Self {
            stream,
            rx_buffer: Vec::with_capacity(4096),
            group: 0,
            io_timeout: DEFAULT_TIMEOUT,
            delay: DEFAULT_DELAY,
        }
    }

    /// Sets how long a single request waits for an acceptable reply.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
        Ok(())
    }

    /// Sets the pause between writing a command and reading its reply.
    ///
    /// Values below [`MINIMUM_DELAY`] are raised to it.
    pub fn set_delay(&mut self, delay: Duration) {
        if delay < MINIMUM_DELAY {
            log::warn!("delay {delay:?} lower minimum {MINIMUM_DELAY:?}, use minimum");
            self.delay = MINIMUM_DELAY;
        } else {
            self.delay = delay;
        }
        log::trace!("set delay to {:?}", self.delay);
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_group(&mut self, group: u8) -> Result<()> {
        if group > MAX_GROUP {
            return Err(crate::Error::RangeError.into());
        }
        log::trace!("set group to {group}");
        self.group = group;
        Ok(())
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    /// Drops everything already received, buffered or still pending on the stream.
    async fn discard_pending(&mut self) -> Result<()> {
        if !self.rx_buffer.is_empty() {
            log::trace!("drop {} buffered bytes", self.rx_buffer.len());
            self.rx_buffer.clear();
        }
        let mut buf = [0u8; 64];
        loop {
            match tokio::time::timeout(Duration::ZERO, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => log::trace!("{n} pending bytes consumed"),
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Reads up to and including the next EOI.
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(end) = self.rx_buffer.iter().position(|&b| b == EOI) {
                let frame: Vec<u8> = self.rx_buffer.drain(..=end).collect();
                log::trace!("receive frame: {:?}", String::from_utf8_lossy(&frame));
                return Ok(frame);
            }
            let mut chunk = [0u8; 256];
            let received = self.stream.read(&mut chunk).await?;
            if received == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            self.rx_buffer.extend_from_slice(&chunk[..received]);
        }
    }

    /// Reads frames until one passes [`screen_response`] for `command`.
    async fn next_response(&mut self, command: Command) -> Result<Response> {
        let min_len = command.min_response_len();
        loop {
            let frame = self.read_frame().await?;
            match screen_response(&frame, min_len) {
                Ok(response) => return Ok(response),
                Err(err @ crate::Error::ShortFrame { .. }) => {
                    log::debug!(
                        "Ignoring bus polling frame ({err}): {:?}",
                        String::from_utf8_lossy(&frame)
                    );
                }
                Err(err) => {
                    log::warn!(
                        "Discarding frame ({err}): {:?}",
                        String::from_utf8_lossy(&frame)
                    );
                }
            }
        }
    }

    /// Sends `command` to `position` (or the whole group for `None`) and returns the first valid reply.
    pub async fn send_query(&mut self, command: Command, position: Option<u8>) -> Result<Response> {
        let address = Address::new(self.group, position)?;
        let request = build_command(command, address);
        self.discard_pending().await?;

        log::debug!(
            "TX Frame: {} to ADR={:02X}: {}",
            command,
            address.value(),
            String::from_utf8_lossy(&request).trim_end()
        );
        tokio::time::timeout(self.io_timeout, self.stream.write_all(&request)).await??;

        tokio::time::sleep(self.delay).await;

        match tokio::time::timeout(self.io_timeout, self.next_response(command)).await {
            Ok(result) => result,
            Err(elapsed) => {
                log::warn!(
                    "No valid reply to {command} within {:?}, {} bytes unparsed",
                    self.io_timeout,
                    self.rx_buffer.len()
                );
                Err(elapsed.into())
            }
        }
    }

    /// Polls the group for header and battery data.
    pub async fn get_analog_data(&mut self) -> Result<Snapshot> {
        log::trace!("get analog data");
        let response = self.send_query(Command::AnalogData, None).await?;
        Ok(assemble(&response)?)
    }

    /// Returns the VER field of the system's reply to the version query.
    pub async fn get_protocol_version(&mut self) -> Result<String> {
        log::trace!("get protocol version");
        let response = self.send_query(Command::ProtocolVersion, None).await?;
        Ok(response.version)
    }
}
