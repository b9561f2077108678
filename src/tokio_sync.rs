//! Synchronous `tokio-modbus` operations for the ABL eMH1 EV charger.
//!
//! This module provides a low-level, stateless API (`Emh1` struct) that maps
//! one method to one Modbus RTU transaction. It handles the conversion
//! between the Rust types defined in [`crate::protocol`] and raw holding
//! register values; framing and CRC validation are delegated to
//! `tokio-modbus`, which surfaces corrupt responses as transport errors.
//!
//! Most users want the stateful [`crate::session::Session`] on top of this,
//! which adds mutual exclusion, retries and the state snapshot.
//!
//! # Example
//!
//! ```no_run
//! use emh1_lib::{protocol as proto, tokio_sync::Emh1};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = emh1_lib::tokio_common::serial_port_builder(
//!         "/dev/ttyUSB0",
//!         &proto::BaudRate::default(),
//!     );
//!     let slave = tokio_modbus::Slave(*proto::Address::default());
//!     let mut ctx = tokio_modbus::client::sync::rtu::connect_slave(&builder, slave)?;
//!     ctx.set_timeout(Duration::from_secs(1));
//!
//!     let status = Emh1::read_status(&mut ctx)?;
//!     println!("Charger state: {}", status.state);
//!     Ok(())
//! }
//! ```

use crate::{protocol as proto, tokio_common::Result};
use tokio_modbus::prelude::{SyncReader, SyncWriter};

/// Stateless synchronous client functions for the eMH1 charger.
///
/// All methods block the current thread until the device answers or the
/// context's timeout elapses, and perform exactly one wire transaction.
#[derive(Debug)]
pub struct Emh1;

impl Emh1 {
    /// Helper function to map tokio result to our result.
    fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
        match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err.into()), // Modbus exception
            Err(err) => Err(err.into()),     // IO error
        }
    }

    /// Helper function to read holding registers and decode them into a specific type.
    fn read_and_decode<T, F>(
        ctx: &mut tokio_modbus::client::sync::Context,
        address: u16,
        quantity: u16,
        decoder: F,
    ) -> Result<T>
    where
        F: FnOnce(&[u16]) -> std::result::Result<T, proto::Error>,
    {
        Ok(decoder(&Self::map_tokio_result(
            ctx.read_holding_registers(address, quantity),
        )?)?)
    }

    /// Reads the live status block: current limit, state code and per-phase
    /// current draw.
    ///
    /// # Errors
    ///
    /// * `tokio_modbus::Error` for Modbus communication errors (IO error,
    ///   timeout, Modbus exception).
    /// * `proto::Error` if the returned registers fall outside the known
    ///   encoding.
    pub fn read_status(ctx: &mut tokio_modbus::client::sync::Context) -> Result<proto::EvStatus> {
        Self::read_and_decode(
            ctx,
            proto::EvStatus::ADDRESS,
            proto::EvStatus::QUANTITY,
            proto::EvStatus::decode_from_holding_registers,
        )
    }

    /// Writes the charging-current limit register.
    ///
    /// The limit is validated at construction of [`proto::CurrentLimit`];
    /// this method only performs the wire transaction. The charger expects
    /// function 0x10 (write multiple registers) even for this single word.
    pub fn set_current_limit(
        ctx: &mut tokio_modbus::client::sync::Context,
        limit: proto::CurrentLimit,
    ) -> Result<()> {
        Self::map_tokio_result(ctx.write_multiple_registers(
            proto::CurrentLimit::ADDRESS,
            &[limit.encode_for_write_register()],
        ))
    }

    /// Writes the charging enable/disable command word.
    ///
    /// Disabling stops charging at the hardware level without touching the
    /// duty-cycle register, so a later enable resumes at the previous rate.
    pub fn set_charging_switch(
        ctx: &mut tokio_modbus::client::sync::Context,
        switch: proto::ChargingSwitch,
    ) -> Result<()> {
        Self::map_tokio_result(ctx.write_multiple_registers(
            proto::ChargingSwitch::ADDRESS,
            &[switch.encode_for_write_register()],
        ))
    }

    /// Reads the device serial number.
    ///
    /// Returns `Ok(None)` when the device has no serial number programmed.
    pub fn read_serial_number(
        ctx: &mut tokio_modbus::client::sync::Context,
    ) -> Result<Option<proto::SerialNumber>> {
        Self::read_and_decode(
            ctx,
            proto::SerialNumber::ADDRESS,
            proto::SerialNumber::QUANTITY,
            proto::SerialNumber::decode_from_holding_registers,
        )
    }

    /// Reads the firmware version and hardware revision.
    pub fn read_firmware_info(
        ctx: &mut tokio_modbus::client::sync::Context,
    ) -> Result<proto::FirmwareInfo> {
        Self::read_and_decode(
            ctx,
            proto::FirmwareInfo::ADDRESS,
            proto::FirmwareInfo::QUANTITY,
            proto::FirmwareInfo::decode_from_holding_registers,
        )
    }
}
