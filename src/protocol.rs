//! Register map and value encodings for the ABL eMH1 EV charger.
//!
//! This module is pure and stateless: it only knows which holding registers
//! hold the charging-current limit, the charging enable word and the live
//! status block, and how raw register values map to domain values. All I/O
//! lives in [`crate::tokio_sync`] and above, so supporting a different
//! firmware variant means swapping this module alone.

use std::fmt;

/// Errors for value validation and register decoding.
///
/// Encoding errors (`*OutOfRange`, `BaudRateNotSupported`) are raised before
/// anything touches the wire; decode errors mean the device returned a
/// payload outside the known encoding and are never worth retrying.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested charging current is not 0 and not within 5..=16 A.
    #[error("charging current {0} A is out of range (valid: 0 or 5..=16 A)")]
    CurrentOutOfRange(u8),

    /// The RS485 device address is outside 1..=247.
    #[error("RS485 address {0} is out of range (valid: 1..=247)")]
    AddressOutOfRange(u8),

    /// The baud rate is not one the eMH1 bus interface supports.
    #[error("baud rate {0} is not supported (valid: 9600, 19200, 38400, 57600)")]
    BaudRateNotSupported(u32),

    /// The duty-cycle register does not encode a valid charging current.
    #[error("duty cycle register value {0:#06X} does not encode a valid charging current")]
    CurrentDecode(u16),

    /// The device answered with an unexpected number of registers.
    #[error("unexpected register count: got {got}, expected {expected}")]
    RegisterCount { got: usize, expected: usize },
}

fn expect_quantity(registers: &[u16], quantity: u16) -> Result<(), Error> {
    if registers.len() == quantity as usize {
        Ok(())
    } else {
        Err(Error::RegisterCount {
            got: registers.len(),
            expected: quantity as usize,
        })
    }
}

/// Modbus RTU device address of the charger (RS485 slave ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address(u8);

impl Address {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;
}

impl Default for Address {
    /// Factory default slave address of the eMH1.
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(value))
        }
    }
}

impl std::ops::Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial baud rates accepted by the eMH1 bus interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
}

impl Default for BaudRate {
    /// The eMH1 ships configured for 38400 baud.
    fn default() -> Self {
        Self::B38400
    }
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> Self {
        match baud_rate {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            9600 => Ok(Self::B9600),
            19200 => Ok(Self::B19200),
            38400 => Ok(Self::B38400),
            57600 => Ok(Self::B57600),
            _ => Err(Error::BaudRateNotSupported(value)),
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// Charging-current limit in whole amperes.
///
/// The valid domain is `{0} ∪ [5, 16]`: 0 A means "charging stopped" (a
/// distinct condition from the outlet being disabled), 5..=16 A are charging
/// set-points. The charger stores the limit as a PWM duty cycle of roughly
/// 16.6 ‰·10 per ampere; the distinguished word `0x03E8` stops charging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CurrentLimit(u8);

impl CurrentLimit {
    /// Holding register holding the duty cycle (written with function 0x10).
    pub const ADDRESS: u16 = 0x0014;
    pub const QUANTITY: u16 = 1;

    pub const MIN: u8 = 5;
    pub const MAX: u8 = 16;

    /// Charging stopped (0 A).
    pub const STOPPED: CurrentLimit = CurrentLimit(0);
    /// Safety default written when no prior limit is known (16 A).
    pub const FALLBACK: CurrentLimit = CurrentLimit(Self::MAX);

    /// Duty-cycle word that stops charging.
    const STOP_DUTY_CYCLE: u16 = 0x03E8;
    /// Duty-cycle units per ampere, scaled by 10 (16.6 per ampere).
    const DUTY_CYCLE_PER_AMP_X10: u32 = 166;

    /// The limit in amperes.
    pub fn amps(&self) -> u8 {
        self.0
    }

    pub fn is_stopped(&self) -> bool {
        self.0 == 0
    }

    /// Encodes the limit as the raw duty-cycle register word.
    pub fn encode_for_write_register(&self) -> u16 {
        if self.0 == 0 {
            Self::STOP_DUTY_CYCLE
        } else {
            (self.0 as u32 * Self::DUTY_CYCLE_PER_AMP_X10 / 10) as u16
        }
    }

    /// Decodes a raw duty-cycle register word.
    ///
    /// `0x03E8` and `0x0000` (PWM never programmed) decode to 0 A. Any other
    /// word must land in 5..=16 A after rounding, otherwise it is outside the
    /// known encoding.
    pub fn decode(raw: u16) -> Result<Self, Error> {
        if raw == Self::STOP_DUTY_CYCLE || raw == 0 {
            return Ok(Self::STOPPED);
        }
        let amps = ((raw as u32 * 10 + Self::DUTY_CYCLE_PER_AMP_X10 / 2)
            / Self::DUTY_CYCLE_PER_AMP_X10) as u8;
        if (Self::MIN..=Self::MAX).contains(&amps) {
            Ok(Self(amps))
        } else {
            Err(Error::CurrentDecode(raw))
        }
    }

    pub fn decode_from_holding_registers(registers: &[u16]) -> Result<Self, Error> {
        expect_quantity(registers, Self::QUANTITY)?;
        Self::decode(registers[0])
    }
}

impl TryFrom<u8> for CurrentLimit {
    type Error = Error;

    fn try_from(amps: u8) -> Result<Self, Self::Error> {
        if amps == 0 || (Self::MIN..=Self::MAX).contains(&amps) {
            Ok(Self(amps))
        } else {
            Err(Error::CurrentOutOfRange(amps))
        }
    }
}

impl fmt::Display for CurrentLimit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} A", self.0)
    }
}

/// Charging permission switch (the "outlet enabled" register).
///
/// Writing the enable word lets the charger resume at its configured duty
/// cycle; the disable word shuts the outlet down at the hardware level
/// without touching the duty-cycle register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingSwitch {
    Enabled,
    Disabled,
}

impl ChargingSwitch {
    /// Holding register taking the enable/disable command words.
    pub const ADDRESS: u16 = 0x0005;
    pub const QUANTITY: u16 = 1;

    const ENABLE_WORD: u16 = 0xA1A1;
    const DISABLE_WORD: u16 = 0xE0E0;

    pub fn encode_for_write_register(&self) -> u16 {
        match self {
            Self::Enabled => Self::ENABLE_WORD,
            Self::Disabled => Self::DISABLE_WORD,
        }
    }
}

impl From<bool> for ChargingSwitch {
    fn from(on: bool) -> Self {
        if on { Self::Enabled } else { Self::Disabled }
    }
}

impl fmt::Display for ChargingSwitch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Raw eMH1 state code as reported in the status block.
///
/// Unknown codes are carried verbatim so firmware variants with additional
/// states do not fail decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerState(u8);

impl ChargerState {
    pub const OUTLET_DISABLED: ChargerState = ChargerState(0xE0);

    pub fn code(&self) -> u8 {
        self.0
    }

    /// Whether the outlet is allowed to charge at the hardware level.
    ///
    /// Only `0xE0` means hardware-disabled; every other state (waiting,
    /// charging, even error states) leaves the charging permission on.
    pub fn is_enabled(&self) -> bool {
        *self != Self::OUTLET_DISABLED
    }

    /// Whether current is actually flowing to the EV.
    pub fn is_charging(&self) -> bool {
        matches!(self.0, 0xC2 | 0xC3 | 0xC4)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.0, 0xF1..=0xFB)
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            0xA1 => "Waiting for EV",
            0xB1 => "EV is asking for charging",
            0xB2 => "EV has the permission to charge",
            0xC2 => "EV is charging",
            0xC3 => "EV is charging, reduced current (error F16, F17)",
            0xC4 => "EV is charging, reduced current (imbalance F15)",
            0xE0 => "Outlet disabled",
            0xE1 => "Production test",
            0xE2 => "EVCC setup mode",
            0xE3 => "Bus idle",
            0xF1 => "Unintended closed contact (welding)",
            0xF2 => "Internal error",
            0xF3 => "DC residual current detected",
            0xF4 => "Upstream communication timeout",
            0xF5 => "Lock of socket failed",
            0xF6 => "CS out of range",
            0xF7 => "State D requested by EV",
            0xF8 => "CP out of range",
            0xF9 => "Overcurrent detected",
            0xFA => "Temperature outside limits",
            0xFB => "Unintended opened contact",
            _ => "Unknown state",
        }
    }
}

impl From<u8> for ChargerState {
    fn from(code: u8) -> Self {
        Self(code)
    }
}

impl fmt::Display for ChargerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04X} ({})", self.0, self.description())
    }
}

/// Instantaneous current draw per phase in whole amperes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseCurrents {
    pub l1: u8,
    pub l2: u8,
    pub l3: u8,
}

impl PhaseCurrents {
    /// Readings above this are sensor garbage (open current transformer).
    const MAX_PLAUSIBLE: u8 = 80;

    fn sanitize(raw: u8) -> u8 {
        if raw > Self::MAX_PLAUSIBLE { 0 } else { raw }
    }

    pub fn total(&self) -> u16 {
        self.l1 as u16 + self.l2 as u16 + self.l3 as u16
    }
}

impl fmt::Display for PhaseCurrents {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} A / {} A / {} A", self.l1, self.l2, self.l3)
    }
}

/// Decoded live status block of the charger.
///
/// Register layout (3 holding registers starting at `0x0033`):
/// * reg 0: current-limit duty cycle, same encoding as [`CurrentLimit`]
/// * reg 1: state code (high byte), phase 1 current in A (low byte)
/// * reg 2: phase 2 current (high byte), phase 3 current (low byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvStatus {
    pub current_limit: CurrentLimit,
    pub state: ChargerState,
    pub phase_currents: PhaseCurrents,
}

impl EvStatus {
    pub const ADDRESS: u16 = 0x0033;
    pub const QUANTITY: u16 = 3;

    pub fn decode_from_holding_registers(registers: &[u16]) -> Result<Self, Error> {
        expect_quantity(registers, Self::QUANTITY)?;
        Ok(Self {
            current_limit: CurrentLimit::decode(registers[0])?,
            state: ChargerState::from((registers[1] >> 8) as u8),
            phase_currents: PhaseCurrents {
                l1: PhaseCurrents::sanitize((registers[1] & 0xFF) as u8),
                l2: PhaseCurrents::sanitize((registers[2] >> 8) as u8),
                l3: PhaseCurrents::sanitize((registers[2] & 0xFF) as u8),
            },
        })
    }
}

/// Device serial number, stored as ASCII in 8 holding registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialNumber(String);

impl SerialNumber {
    pub const ADDRESS: u16 = 0x0050;
    pub const QUANTITY: u16 = 8;

    /// Decodes the serial number registers.
    ///
    /// Returns `Ok(None)` when the serial number was never programmed (all
    /// registers `0xFFFF`) or contains no printable characters.
    pub fn decode_from_holding_registers(registers: &[u16]) -> Result<Option<Self>, Error> {
        expect_quantity(registers, Self::QUANTITY)?;
        if registers.iter().all(|r| *r == 0xFFFF) {
            return Ok(None);
        }
        let serial: String = registers
            .iter()
            .flat_map(|r| r.to_be_bytes())
            .filter(|b| b.is_ascii_graphic())
            .map(char::from)
            .collect();
        if serial.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self(serial)))
        }
    }
}

impl std::ops::Deref for SerialNumber {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Firmware and hardware revision information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// Firmware version, e.g. `V1.41`.
    pub version: String,
    /// PCBA revision the firmware reports.
    pub hardware_version: &'static str,
}

impl FirmwareInfo {
    pub const ADDRESS: u16 = 0x0001;
    pub const QUANTITY: u16 = 2;

    pub fn decode_from_holding_registers(registers: &[u16]) -> Result<Self, Error> {
        expect_quantity(registers, Self::QUANTITY)?;
        let major = (registers[0] >> 8) as u8;
        let minor = (registers[0] & 0xFF) as u8;
        let hardware_version = match (registers[1] >> 6) & 0x3 {
            0 => "PCBA 141215",
            1 => "PCBA 160307",
            2 => "PCBA 170725",
            _ => "Not used",
        };
        Ok(Self {
            version: format!("V{}.{:X}{:X}", major, minor >> 4, minor & 0xF),
            hardware_version,
        })
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.hardware_version)
    }
}
