//! Stateful charger session: the single authority for all register access.
//!
//! A [`Session`] owns the Modbus transport, serializes every wire
//! transaction through one internal mutex (the RS485 bus is half-duplex,
//! overlapping frames corrupt each other), applies value validation and the
//! bounded retry policy, and keeps the last confirmed [`DeviceStatus`]
//! snapshot.
//!
//! The session is generic over [`Transport`] so the policy layer can be
//! exercised without hardware; [`Session::open`] builds the serial-backed
//! variant used in production.
//!
//! # Example
//!
//! ```no_run
//! use emh1_lib::session::{ChargerConfig, Session};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::open(ChargerConfig::new("/dev/ttyUSB0"))?;
//!     session.set_current(16)?;
//!     let status = session.read_status()?;
//!     println!("{status}");
//!     Ok(())
//! }
//! ```

use crate::{protocol as proto, tokio_common, tokio_sync::Emh1};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Connection parameters for one eMH1 charger, immutable after construction.
#[derive(Debug, Clone)]
pub struct ChargerConfig {
    /// Serial port device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// RS485 slave address of the charger.
    pub address: proto::Address,
    pub baud_rate: proto::BaudRate,
    /// Optional display name for logs and UIs.
    pub name: Option<String>,
    /// Per-transaction I/O timeout; no wire operation blocks longer.
    pub timeout: Duration,
}

impl ChargerConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Creates a configuration with the factory defaults of the eMH1
    /// (slave address 1, 38400 baud).
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            address: proto::Address::default(),
            baud_rate: proto::BaudRate::default(),
            name: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// Errors surfaced by [`Session`] operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The caller supplied a value outside the register's domain; the wire
    /// was never touched.
    #[error("invalid value: {0}")]
    InvalidValue(#[source] proto::Error),

    /// The serial port could not be opened.
    #[error("cannot open serial port {port}: {source}")]
    Connection {
        port: String,
        source: std::io::Error,
    },

    /// The session is not in the `Ready` state; the wire was never touched.
    #[error("session is {0}, not ready")]
    NotReady(SessionState),

    /// Retries exhausted or the slave rejected the request.
    #[error("charger communication failed: {0}")]
    Communication(#[source] tokio_common::Error),

    /// The device returned a payload outside the known encoding; not retried.
    #[error("register decode failed: {0}")]
    Decode(#[source] proto::Error),
}

/// Last successfully confirmed view of the charger.
///
/// Created empty at startup; every field stays `None` until the first
/// successful poll or command acknowledgment. A failed operation never
/// overwrites the confirmed values, it only records `last_error`, so
/// `last_updated` doubles as a staleness signal.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub current_limit: Option<proto::CurrentLimit>,
    /// Charging permission at the hardware level. Independent from
    /// `current_limit`: 0 A with the outlet enabled is a distinct condition
    /// from the outlet being disabled.
    pub enabled: Option<bool>,
    pub state: Option<proto::ChargerState>,
    pub phase_currents: Option<proto::PhaseCurrents>,
    /// Monotonic timestamp of the last successful confirmation.
    pub last_updated: Option<Instant>,
    pub last_error: Option<String>,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.state {
            Some(state) => write!(f, "state: {state}")?,
            None => write!(f, "state: unknown")?,
        }
        if let Some(limit) = &self.current_limit {
            write!(f, ", limit: {limit}")?;
        }
        if let Some(enabled) = self.enabled {
            write!(f, ", charging {}", if enabled { "enabled" } else { "disabled" })?;
        }
        if let Some(phases) = &self.phase_currents {
            write!(f, ", draw: {phases}")?;
        }
        if let Some(error) = &self.last_error {
            write!(f, ", last error: {error}")?;
        }
        Ok(())
    }
}

/// Wire transactions the session performs, one Modbus transaction per call.
///
/// Implemented for the serial-backed [`SerialTransport`] in production and
/// by scripted mocks in tests.
pub trait Transport {
    fn read_status(&mut self) -> tokio_common::Result<proto::EvStatus>;
    fn write_current_limit(&mut self, limit: proto::CurrentLimit) -> tokio_common::Result<()>;
    fn write_charging_switch(&mut self, switch: proto::ChargingSwitch)
        -> tokio_common::Result<()>;

    /// Re-establishes the underlying connection after a fault.
    fn reconnect(&mut self) -> tokio_common::Result<()> {
        Ok(())
    }
}

/// [`Transport`] over a synchronous `tokio-modbus` RTU context.
///
/// The serial handle lives inside the context and is released whenever the
/// transport is dropped, on every exit path.
pub struct SerialTransport {
    ctx: tokio_modbus::client::sync::Context,
    config: ChargerConfig,
}

impl SerialTransport {
    pub fn connect(config: ChargerConfig) -> Result<Self, Error> {
        let ctx = Self::open_context(&config).map_err(|source| Error::Connection {
            port: config.port.clone(),
            source,
        })?;
        Ok(Self { ctx, config })
    }

    fn open_context(
        config: &ChargerConfig,
    ) -> std::io::Result<tokio_modbus::client::sync::Context> {
        let mut ctx = tokio_modbus::client::sync::rtu::connect_slave(
            &tokio_common::serial_port_builder(&config.port, &config.baud_rate),
            tokio_modbus::Slave(*config.address),
        )?;
        ctx.set_timeout(config.timeout);
        Ok(ctx)
    }
}

impl Transport for SerialTransport {
    fn read_status(&mut self) -> tokio_common::Result<proto::EvStatus> {
        Emh1::read_status(&mut self.ctx)
    }

    fn write_current_limit(&mut self, limit: proto::CurrentLimit) -> tokio_common::Result<()> {
        Emh1::set_current_limit(&mut self.ctx, limit)
    }

    fn write_charging_switch(
        &mut self,
        switch: proto::ChargingSwitch,
    ) -> tokio_common::Result<()> {
        Emh1::set_charging_switch(&mut self.ctx, switch)
    }

    fn reconnect(&mut self) -> tokio_common::Result<()> {
        let ctx = Self::open_context(&self.config)
            .map_err(|io| tokio_modbus::Error::Transport(io))?;
        self.ctx = ctx;
        Ok(())
    }
}

struct Inner<T> {
    transport: T,
    state: SessionState,
    status: DeviceStatus,
    /// Last confirmed non-zero limit, restored implicitly when re-enabling.
    last_nonzero_limit: Option<proto::CurrentLimit>,
}

impl<T> Inner<T> {
    fn ensure_ready(&self) -> Result<(), Error> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(Error::NotReady(self.state))
        }
    }

    /// Maps a wire failure, records it in the snapshot and drives the state
    /// machine: unrecoverable I/O faults transition `Ready` to `Faulted`.
    fn fail(&mut self, error: tokio_common::Error) -> Error {
        let error = match error {
            tokio_common::Error::ProtocolError(e) => Error::Decode(e),
            other => {
                if matches!(&other, tokio_common::Error::TokioError(_)) {
                    self.state = SessionState::Faulted;
                    log::warn!("session faulted: {other}");
                }
                Error::Communication(other)
            }
        };
        self.status.last_error = Some(error.to_string());
        error
    }

    fn confirm_limit(&mut self, limit: proto::CurrentLimit) {
        self.status.current_limit = Some(limit);
        if !limit.is_stopped() {
            self.last_nonzero_limit = Some(limit);
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.status.last_updated = Some(Instant::now());
        self.status.last_error = None;
    }
}

/// Thread-safe charger session.
///
/// Methods take `&self` and may be called concurrently from multiple
/// callers (switch change, slider change, periodic poll); the internal
/// mutex guarantees that at most one wire transaction is in flight at any
/// instant and that commands are applied in lock-acquisition order. An
/// in-flight transaction is never aborted, it finishes or times out.
pub struct Session<T> {
    inner: Mutex<Inner<T>>,
    retry: tokio_common::RetryPolicy,
}

impl Session<SerialTransport> {
    /// Opens the serial port and creates a `Ready` session.
    ///
    /// Fails with [`Error::Connection`] if the port cannot be opened; in
    /// that case no handle is left behind.
    pub fn open(config: ChargerConfig) -> Result<Self, Error> {
        log::info!(
            "opening eMH1 session on {} (address {}, {} baud)",
            config.port,
            config.address,
            config.baud_rate
        );
        Ok(Self::new(SerialTransport::connect(config)?))
    }

    /// Reads the device serial number.
    ///
    /// An identity read: serialized with the other transactions but not part
    /// of the status snapshot. Returns `Ok(None)` when the device has no
    /// serial number programmed.
    pub fn serial_number(&self) -> Result<Option<proto::SerialNumber>, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_ready()?;
        match self
            .retry
            .run(|| Emh1::read_serial_number(&mut inner.transport.ctx))
        {
            Ok(serial) => Ok(serial),
            Err(error) => Err(inner.fail(error)),
        }
    }

    /// Reads the firmware version and hardware revision.
    pub fn firmware_info(&self) -> Result<proto::FirmwareInfo, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_ready()?;
        match self
            .retry
            .run(|| Emh1::read_firmware_info(&mut inner.transport.ctx))
        {
            Ok(info) => Ok(info),
            Err(error) => Err(inner.fail(error)),
        }
    }
}

impl<T: Transport> Session<T> {
    /// Creates a `Ready` session over an already-connected transport.
    pub fn new(transport: T) -> Self {
        Self::with_retry_policy(transport, tokio_common::RetryPolicy::default())
    }

    pub fn with_retry_policy(transport: T, retry: tokio_common::RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                transport,
                state: SessionState::Ready,
                status: DeviceStatus::default(),
                last_nonzero_limit: None,
            }),
            retry,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// A copy of the last confirmed status snapshot.
    pub fn status(&self) -> DeviceStatus {
        self.inner.lock().unwrap().status.clone()
    }

    /// Sets the charging-current limit.
    ///
    /// `amps` must be 0 (stop charging) or within 5..=16; anything else
    /// fails with [`Error::InvalidValue`] before any wire transaction. On
    /// success the snapshot is updated and, for a non-zero limit, the value
    /// is remembered for restore-on-enable.
    pub fn set_current(&self, amps: u8) -> Result<(), Error> {
        let limit = proto::CurrentLimit::try_from(amps).map_err(Error::InvalidValue)?;
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_ready()?;
        log::debug!("writing charging current limit {limit}");
        match self.retry.run(|| inner.transport.write_current_limit(limit)) {
            Ok(()) => {
                inner.confirm_limit(limit);
                Ok(())
            }
            Err(error) => Err(inner.fail(error)),
        }
    }

    /// Enables or disables charging at the hardware level.
    ///
    /// Disabling never rewrites the current-limit register, so re-enabling
    /// resumes at the previous rate. When enabling without any known
    /// non-zero limit (fresh session, or a communication error swallowed the
    /// confirmation) the 16 A safety default is written first, so the
    /// charger never resumes at an undefined rate.
    pub fn set_enabled(&self, on: bool) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_ready()?;
        if on && inner.last_nonzero_limit.is_none() {
            let fallback = proto::CurrentLimit::FALLBACK;
            log::info!("no prior charging limit known, writing safety default {fallback}");
            match self.retry.run(|| inner.transport.write_current_limit(fallback)) {
                Ok(()) => inner.confirm_limit(fallback),
                Err(error) => return Err(inner.fail(error)),
            }
        }
        let switch = proto::ChargingSwitch::from(on);
        log::debug!("writing charging switch: {switch}");
        match self.retry.run(|| inner.transport.write_charging_switch(switch)) {
            Ok(()) => {
                inner.status.enabled = Some(on);
                inner.touch();
                Ok(())
            }
            Err(error) => Err(inner.fail(error)),
        }
    }

    /// Polls the status block and updates the snapshot.
    ///
    /// A failed read leaves the last good snapshot untouched (only
    /// `last_error` is recorded), so callers can keep displaying the last
    /// known values with an unchanged timestamp.
    pub fn read_status(&self) -> Result<DeviceStatus, Error> {
        let mut inner = self.inner.lock().unwrap();
        self.read_status_locked(&mut inner)
    }

    /// Like [`Session::read_status`], but returns `None` without blocking
    /// when another caller currently holds the bus. Used by the reconciler
    /// to skip a poll cycle instead of contending with a command.
    pub fn try_read_status(&self) -> Option<Result<DeviceStatus, Error>> {
        let mut inner = self.inner.try_lock().ok()?;
        Some(self.read_status_locked(&mut inner))
    }

    fn read_status_locked(&self, inner: &mut Inner<T>) -> Result<DeviceStatus, Error> {
        inner.ensure_ready()?;
        match self.retry.run(|| inner.transport.read_status()) {
            Ok(ev) => {
                inner.status.state = Some(ev.state);
                inner.status.enabled = Some(ev.state.is_enabled());
                inner.status.phase_currents = Some(ev.phase_currents);
                inner.confirm_limit(ev.current_limit);
                Ok(inner.status.clone())
            }
            Err(error) => Err(inner.fail(error)),
        }
    }

    /// Attempts to bring a `Faulted` or `Disconnected` session back to
    /// `Ready` by re-establishing the transport. A no-op when already
    /// `Ready`.
    pub fn reconnect(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Ready {
            return Ok(());
        }
        inner.state = SessionState::Connecting;
        log::info!("reconnecting charger session");
        match inner.transport.reconnect() {
            Ok(()) => {
                inner.state = SessionState::Ready;
                Ok(())
            }
            Err(error) => {
                inner.state = SessionState::Faulted;
                Err(inner.fail(error))
            }
        }
    }

    /// Consumes the session and releases the transport (and with it the
    /// serial handle). Dropping the session has the same effect.
    pub fn close(self) {}
}
