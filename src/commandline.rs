use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use emh1_lib::protocol as proto;
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1") // Common default for Windows, though may vary.
    } else {
        String::from("/dev/ttyUSB0") // Common default for USB-to-RS485 adapters on Linux.
    }
}

fn parse_address(s: &str) -> Result<proto::Address, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    proto::Address::try_from(address_val).map_err(|e| e.to_string())
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

fn parse_current(s: &str) -> Result<u8, String> {
    let amps = s
        .parse::<u8>()
        .map_err(|e| format!("Invalid current value format: {e}"))?;
    // Validated again by the session; rejecting here gives a usage error
    // instead of a runtime error.
    proto::CurrentLimit::try_from(amps).map_err(|e| e.to_string())?;
    Ok(amps)
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Connect to an ABL eMH1 charger via Modbus RTU (Serial).
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_device_name())]
        device: String,

        /// Baud rate for serial communication.
        /// Must match the charger's configured baud rate.
        /// Supported values: 9600, 19200, 38400, 57600.
        #[arg(long, default_value_t = proto::BaudRate::default(), value_parser = parse_baud_rate)]
        baud_rate: proto::BaudRate,

        /// The Modbus RTU device address of the charger.
        /// Must be unique on the RS485 bus, ranging from 1 to 247.
        #[arg(short, long, default_value_t = proto::Address::default(), value_parser = parse_address)]
        address: proto::Address,

        /// Commands for the connected charger.
        #[command(subcommand)]
        command: CliCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: continuously poll the charger status at a
    /// specified interval and print every confirmed snapshot to stdout.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for polling the status block (e.g., "10s", "1m").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "30sec")]
        poll_interval: Duration,

        /// Optional YAML configuration file. When given, its charger and
        /// poll-interval settings override the command-line connection
        /// arguments.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Read and display the charger status: state code, charging-current
    /// limit and per-phase current draw.
    Status,

    /// Set the charging-current limit in amperes.
    SetCurrent {
        /// The new limit: 0 stops charging, 5 to 16 sets the charging rate.
        #[arg(value_parser = parse_current)]
        amps: u8,
    },

    /// Allow charging (hardware level). If no charging limit was set before,
    /// the 16 A safety default is written first.
    Enable,

    /// Stop charging at the hardware level. The configured charging limit is
    /// left untouched, a later enable resumes at the previous rate.
    Disable,

    /// Read and display the charger serial number.
    SerialNumber,

    /// Read and display the firmware version and hardware revision.
    Firmware,
}

const fn about_text() -> &'static str {
    "ABL eMH1 CLI - Control ABL eMH1 EV chargers via Modbus RTU."
}

#[derive(Parser, Debug)]
#[command(name="emh1ctl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is off.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection and the charger command.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Modbus I/O timeout for read/write operations.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Minimum delay between multiple Modbus commands sent to the charger.
    /// Important for USB-to-RS485 converters that need time to switch
    /// between transmitting (TX) and receiving (RX) modes.
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,
}
