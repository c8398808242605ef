//! # Devlink - Reliable Device Communication for Serial-Attached Boards
//!
//! Devlink turns the unreliable, byte-oriented serial connection of an
//! ESP32/MicroPython class device into a reliable, typed, correlated
//! request/response channel: line framing with partial-read recovery,
//! response correlation with per-call deadlines, liveness probing with
//! automatic reconnection, outbound rate limiting, batch execution, and a
//! checksummed chunked OTA file transfer.
//!
//! ## Features
//!
//! - **Correlated commands**: `send_command` suspends the caller until the
//!   matching typed response arrives or the deadline elapses.
//! - **Resilient framing**: arbitrary read-chunk boundaries, malformed JSON,
//!   and legacy `NAME:VALUE` lines never crash the read loop.
//! - **Liveness & recovery**: periodic heartbeat, bounded linear-backoff
//!   reconnection, and a terminal error state once attempts are exhausted.
//! - **OTA transfer**: strictly sequential checksummed chunks with progress
//!   reporting and best-effort abort.
//! - **Observability**: typed broadcast channels for raw frames, variable
//!   updates, responses, samples, and state changes, plus a bounded log ring
//!   exportable as text, JSON, or CSV.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use devlink::link::{DeviceLink, LinkOptions};
//! use devlink::transport::SerialTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut options = LinkOptions::default();
//!     options.transport.port = "/dev/ttyUSB0".to_string();
//!
//!     let link = DeviceLink::new(options, Arc::new(SerialTransport));
//!     if link.connect().await? {
//!         let pong = link.send_command("ping", None).await?;
//!         println!("device answered: {:?}", pong);
//!     }
//!     link.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`link`] - The protocol service: state machine, correlator, heartbeat,
//!   streaming poller, batch executor, OTA manager
//! - [`transport`] - Transport adapter trait and the serial implementation
//! - [`config`] - TOML configuration with validation
//! - [`recorder`] - Bounded structured log ring with export
//! - [`logutil`] - Log sanitation helpers

pub mod config;
pub mod link;
pub mod logutil;
pub mod recorder;
pub mod transport;

pub use link::batch::{BatchCommand, BatchOutcome};
pub use link::classify::{VarUpdate, VarValue};
pub use link::error::LinkError;
pub use link::ota::{OtaOutcome, ProgressCallback};
pub use link::registry::LinkRegistry;
pub use link::response::Response;
pub use link::{AdcSample, ConnectionState, DeviceLink, LinkOptions, LinkStatus};
pub use recorder::{LogEntry, LogFormat, LogLevel};
