//! Common data structures for the `tokio-modbus` based client code.
//!
//! It defines the [`Error`] enum encapsulating all wire-level failures, the
//! serial-line parameters of the eMH1 bus interface and the bounded
//! [`RetryPolicy`] applied to every wire transaction.

use crate::protocol as proto;
use std::time::Duration;

/// Represents all possible errors that can occur during Modbus communication.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),
}

impl Error {
    /// Whether this error is a transient wire fault worth retrying.
    ///
    /// Timeouts and corrupt frames (surfaced by `tokio-modbus` as
    /// `InvalidData` transport errors after CRC/length checks) are transient.
    /// Modbus exceptions from the slave and register decode failures are
    /// logically invalid requests or payloads; retrying them cannot succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TokioError(tokio_modbus::Error::Transport(io)) => matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::InvalidData
            ),
            _ => false,
        }
    }
}

/// The result type for tokio operations.
pub(crate) type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// The parity used for serial communication (the eMH1 talks 8E1).
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::Even;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
pub fn serial_port_builder(
    device: &str,
    baud_rate: &proto::BaudRate,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u32::from(*baud_rate))
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
}

/// Bounded retry policy for wire transactions.
///
/// An operation is attempted up to `max_attempts` times with `backoff`
/// between attempts; only errors the `retryable` predicate accepts are
/// retried, everything else surfaces immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
    pub retryable: fn(&Error) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
            retryable: Error::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Runs `op` under this policy and returns its result or the last error.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        debug_assert!(self.max_attempts > 0);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if (self.retryable)(&error) && attempt < self.max_attempts => {
                    log::debug!(
                        "transient wire fault (attempt {attempt}/{}), retrying: {error}",
                        self.max_attempts
                    );
                    attempt += 1;
                    std::thread::sleep(self.backoff);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
