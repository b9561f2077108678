//! A library for controlling ABL eMH1 EV charging stations via Modbus RTU.
//!
//! This crate provides two main ways to interact with the charger:
//!
//! 1.  **High-Level, Stateful Session**: A thread-safe [`session::Session`]
//!     that serializes all register access, validates values, applies a
//!     bounded retry policy and keeps the last confirmed status snapshot.
//!     This is the recommended approach for most users. The
//!     [`reconciler::Reconciler`] on top of it maps the two external
//!     controls (charging switch, current limit) to the session and drives
//!     periodic polling.
//!
//! 2.  **Low-Level, Stateless Functions**: A set of stateless functions
//!     that directly map to the charger's Modbus registers. This API offers
//!     maximum flexibility but requires manual management of the Modbus
//!     context. See the [`tokio_sync`] module.
//!
//! ## Features
//!
//! - **Protocol Implementation**: Register map and value encodings of the
//!   eMH1 bus interface (`protocol`).
//! - **Strongly-Typed API**: Utilizes Rust's type system for protocol
//!   correctness (e.g., `CurrentLimit`, `ChargerState`, `Address`); invalid
//!   values are rejected before anything touches the wire.
//! - **Stateful, Thread-Safe Session**: At most one wire transaction in
//!   flight at any instant, transient faults retried with a bounded policy.
//! - **Daemon Configuration**: Optional YAML configuration (`serde`
//!   feature).
//!
//! ## Quick Start
//!
//! ```no_run
//! use emh1_lib::session::{ChargerConfig, Session};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::open(ChargerConfig::new("/dev/ttyUSB0"))?;
//!
//!     session.set_current(16)?;
//!     session.set_enabled(true)?;
//!
//!     let status = session.read_status()?;
//!     println!("Charger status: {status}");
//!
//!     Ok(())
//! }
//! ```
//!
//! For more details, see the documentation of the [`session`] module.

pub mod protocol;

pub mod tokio_common;

pub mod tokio_sync;

pub mod session;

pub mod reconciler;

#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
#[cfg(feature = "serde")]
pub mod config;
