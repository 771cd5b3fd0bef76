//! # TensileLink
//!
//! Host-side companion library for TensileOS tensile-testing rigs: a serial
//! device link with live telemetry, session buffering, a date-partitioned
//! test archive, and batch quality-control statistics.
//!
//! ## Features
//!
//! - **Device link**: background reader thread, line classification, lenient
//!   JSON telemetry decoding, and an explicit pause/run mode shadow for a
//!   device that only understands edge-triggered toggle commands
//! - **Callback fan-out**: narrow data/error/raw-line contracts; faults are
//!   reported, never thrown across the boundary
//! - **Test archive**: `Tests/<date>/<name>.csv` files with a `#`-comment
//!   metadata header; read, update, and list operations
//! - **Batch statistics**: mean, sample stdev, 3-sigma band, min/max/median,
//!   and per-test deviation across archived tests
//!
//! ## Quick Start
//!
//! ```no_run
//! use tensilelink::{DeviceLink, LinkConfig};
//!
//! fn main() -> Result<(), tensilelink::LinkError> {
//!     let mut link = DeviceLink::builder(LinkConfig::default())
//!         .on_data(|timestamp, current, peak| {
//!             println!("{timestamp:7.3} s  {current:6.3} kN  peak {peak:6.3} kN");
//!         })
//!         .on_error(|message| eprintln!("link error: {message}"))
//!         .build();
//!
//!     // Connect runs the initialization handshake and leaves the rig
//!     // paused in JSON mode; expect it to block for a few seconds.
//!     link.connect("/dev/ttyUSB0")?;
//!     link.send_start_new_test();
//!     // ... samples arrive on the data callback ...
//!     link.send_pause();
//!     link.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`link`] - the core `DeviceLink`: connection lifecycle, handshake,
//!   reader thread, command dispatch
//! - [`protocol`] - command bytes, line classification, telemetry decoding
//! - [`transport`] - byte-stream seam over `serialport`, plus enumeration
//! - [`session`] - in-memory buffer for the active test
//! - [`archive`] - on-disk test store with metadata headers
//! - [`stats`] - batch statistics for QC reporting
//! - [`config`] - link tuning knobs and persisted operator settings

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod archive;
pub mod config;
pub mod link;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod transport;

// Re-export the main public types for convenience
pub use archive::{ArchiveError, TestArchive, TestMetadata, TestRecord};
pub use config::{LinkConfig, Settings};
pub use link::{DeviceLink, DeviceLinkBuilder, DeviceMode, LinkError};
pub use protocol::TelemetrySample;
pub use session::{SessionBuffer, SessionError};
pub use stats::{BatchStatistics, StatisticsSummary};
