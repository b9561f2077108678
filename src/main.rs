//! ABL eMH1 CLI
//!
//! A command-line interface (CLI) application for controlling ABL eMH1
//! EV charging stations via Modbus RTU (serial).
//!
//! This tool allows users to:
//! - Read the charger status: state code, charging-current limit and
//!   per-phase current draw.
//! - Set the charging-current limit (0 to stop charging, 5 to 16 A).
//! - Enable or disable charging at the hardware level.
//! - Read the device serial number and firmware revision.
//! - Run in a continuous daemon mode that polls the status and prints every
//!   confirmed snapshot to the console.
//!
//! The CLI leverages the `emh1_lib` crate for protocol definitions and the
//! stateful charger session.

use anyhow::{Context, Result};
use clap::Parser;
use emh1_lib::{
    protocol as proto,
    reconciler::{PollOutcome, Reconciler, StatusObserver},
    session::{ChargerConfig, DeviceStatus, SerialTransport, Session, SessionState},
};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::sync::Arc;
use std::{panic, time::Duration};

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0)); // Provide defaults

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic", // Optional target for filtering
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Calculates the minimum recommended inter-frame delay for Modbus RTU based
/// on the baud rate. This is typically 3.5 character times.
fn minimum_rtu_delay(baud_rate: &proto::BaudRate) -> Duration {
    // 1 start bit + 8 data bits + 1 parity bit + 1 stop bit = 11 bits per
    // character (the eMH1 talks 8E1).
    let bits_per_char = 11.0;
    let rate = u32::from(*baud_rate) as f64;

    let char_time_secs = bits_per_char / rate;
    let inter_frame_delay_secs = 3.5 * char_time_secs;
    let delay_micros = (inter_frame_delay_secs * 1_000_000.0) as u64;

    // The Modbus spec fixes the minimum silence at 1.75ms for baud rates
    // above 19200.
    const MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750; // 1.75 ms
    Duration::from_micros(delay_micros.max(MIN_INTER_FRAME_DELAY_MICROS))
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: &proto::BaudRate) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

/// Prints every confirmed status snapshot as one line on stdout.
struct ConsoleObserver;

impl StatusObserver for ConsoleObserver {
    fn on_status_changed(&self, status: &DeviceStatus) {
        println!("{status}");
    }
}

/// Runs the poll loop until the process is terminated.
///
/// A faulted session is reconnected on the next cycle instead of aborting
/// the daemon; the charger may simply be powered down over night.
fn run_daemon(
    session: Session<SerialTransport>,
    poll_interval: Duration,
    delay: Duration,
) -> Result<()> {
    let session = Arc::new(session);
    let mut reconciler = Reconciler::new(Arc::clone(&session));
    reconciler.register(Box::new(ConsoleObserver));

    info!("Starting daemon mode: interval={poll_interval:?}");
    loop {
        match reconciler.poll() {
            PollOutcome::Updated(_) | PollOutcome::Skipped => (),
            PollOutcome::Failed(error) => {
                warn!("Status poll failed: {error}");
                if session.state() == SessionState::Faulted {
                    if let Err(error) = session.reconnect() {
                        warn!("Reconnect failed, retrying next cycle: {error}");
                    }
                }
            }
        }
        std::thread::sleep(delay.max(poll_interval));
    }
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // Initialize logging as early as possible.
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "eMH1 CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let commandline::CliConnection::Rtu {
        device,
        baud_rate,
        address,
        command,
    } = &args.connection;

    let mut config = ChargerConfig::new(device.clone());
    config.address = *address;
    config.baud_rate = *baud_rate;
    config.timeout = args.timeout;
    let mut poll_interval_from_file = None;

    // A daemon config file overrides the command-line connection arguments.
    if let commandline::CliCommands::Daemon {
        config: Some(path),
        ..
    } = command
    {
        let file = emh1_lib::config::Config::load(path)
            .with_context(|| format!("Cannot load config file {path:?}"))?;
        config = file
            .charger_config()
            .with_context(|| format!("Invalid charger settings in {path:?}"))?;
        poll_interval_from_file = Some(file.poll_interval);
    }

    let delay = check_rtu_delay(args.delay, &config.baud_rate);
    let session = Session::open(config).with_context(|| "Cannot connect to charger")?;

    match command {
        commandline::CliCommands::Daemon { poll_interval, .. } => {
            run_daemon(
                session,
                poll_interval_from_file.unwrap_or(*poll_interval),
                delay,
            )?;
        }
        commandline::CliCommands::Status => {
            info!("Executing: Read Status");
            let status = session
                .read_status()
                .with_context(|| "Cannot read charger status")?;
            println!("{status}");
        }
        commandline::CliCommands::SetCurrent { amps } => {
            info!("Executing: Set Current Limit to {amps} A");
            session
                .set_current(*amps)
                .with_context(|| format!("Failed to set current limit to {amps} A"))?;
            println!("Charging current limit set to {amps} A successfully.");
        }
        commandline::CliCommands::Enable => {
            info!("Executing: Enable Charging");
            session
                .set_enabled(true)
                .with_context(|| "Failed to enable charging")?;
            println!("Charging enabled successfully.");
        }
        commandline::CliCommands::Disable => {
            info!("Executing: Disable Charging");
            session
                .set_enabled(false)
                .with_context(|| "Failed to disable charging")?;
            println!("Charging disabled successfully.");
        }
        commandline::CliCommands::SerialNumber => {
            info!("Executing: Read Serial Number");
            match session
                .serial_number()
                .with_context(|| "Cannot read serial number")?
            {
                Some(serial) => println!("Serial number: {serial}"),
                None => println!("Serial number: not programmed"),
            }
        }
        commandline::CliCommands::Firmware => {
            info!("Executing: Read Firmware Info");
            let info = session
                .firmware_info()
                .with_context(|| "Cannot read firmware info")?;
            println!("Firmware: {info}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_rtu_delay_calculation() {
        // 3.5 character times at 11 bits per character = 38.5 / baud.
        assert_eq!(minimum_rtu_delay(&proto::BaudRate::B9600).as_micros(), 4010);
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B19200).as_micros(),
            2005
        );
        // Above 19200 baud the 1.75ms spec minimum applies.
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B38400).as_micros(),
            1750
        );
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B57600).as_micros(),
            1750
        );
    }

    #[test]
    fn test_check_rtu_delay() {
        let br_9600 = proto::BaudRate::B9600;
        let min_delay_9600 = minimum_rtu_delay(&br_9600); // Approx 4010 us

        assert_eq!(
            check_rtu_delay(Duration::from_millis(3), &br_9600),
            min_delay_9600
        ); // 3ms < min_delay_9600
        assert_eq!(
            check_rtu_delay(Duration::from_millis(5), &br_9600),
            Duration::from_millis(5)
        ); // 5ms > min_delay_9600
        assert_eq!(check_rtu_delay(min_delay_9600, &br_9600), min_delay_9600);
    }
}
