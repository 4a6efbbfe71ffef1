//! # dcc-station
//!
//! Firmware core of a DCC model-railway command station: it turns
//! high-level commands ("locomotive 3, speed 14, forward") into the
//! bipolar baseband waveform that energises the track, while supervising
//! district power and decoder configuration.
//!
//! ## Features
//!
//! - **Packet pipeline**: composer → transmission-buffer ring →
//!   bit-stream encoder → cycle-accurate waveform generator, with
//!   persistent speed holds, transient commands, and contiguous
//!   service-mode sequences.
//! - **District supervision**: per-output overload/spike/phase state
//!   machines with load averaging, inrush grace, and automatic phase
//!   inversion recovery.
//! - **CV programming**: a logical configuration-variable database and a
//!   planner that coalesces batches of edits into minimal service-mode
//!   transactions.
//! - **Cooperative scheduling**: a signal-armed run queue with no
//!   preemption; interrupts communicate with tasks only through counted
//!   signals.
//!
//! ## Architecture
//!
//! The crate is structured to run on the desktop without hardware: every
//! hardware touch-point is a trait in [`traits`], with mock
//! implementations in [`hal`] used by the tests.
//!
//! - `signal` / `scheduler` - notification primitive and run queue
//! - `clock` / `adc` - time-of-day events and analogue sampling
//! - `districts` - the power state machines
//! - `packets` / `bitstream` / `buffers` / `waveform` - the DCC pipeline
//! - `cvdb` - configuration-variable database and update planner
//! - `constants` / `errors` - persistent tunables and the fault log
//! - `console` / `hci` - the command and display surfaces
//! - `station` - top-level wiring and the public DCC API
//!
//! ## Example
//!
//! ```rust
//! use dcc_station::config::StationConfig;
//! use dcc_station::hal::{MockAdc, MockBridge, MockPanel, MockStorage};
//! use dcc_station::{Direction, Station};
//!
//! let mut station = Station::new(
//!     StationConfig::default(),
//!     MockBridge::new(),
//!     MockAdc::new(),
//!     MockStorage::new(),
//!     MockPanel::new(),
//! )
//! .unwrap();
//!
//! // Power the main track and set a locomotive moving.
//! station.power(0, true).unwrap();
//! station.set_speed(3, 14, Direction::Forward).unwrap();
//!
//! // Drive the waveform interrupt: each call returns the next compare
//! // delay in timer ticks.
//! let ticks = station.isr_timer_tick();
//! assert!(ticks == 58 || ticks == 100);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

/// One-shot multiplexed analogue conversions with completion signals.
pub mod adc;
/// Exponentially-weighted load averaging.
pub mod average;
/// Bit-level encoding of packets into half-cycle durations.
pub mod bitstream;
/// The transmission buffer pool and active ring.
pub mod buffers;
/// Monotonic time-of-day and signal-based event delivery.
pub mod clock;
/// Structural station configuration.
pub mod config;
/// The line-oriented console command surface.
pub mod console;
/// Persistent tuning constants with checksum protection.
pub mod constants;
/// The configuration-variable database and update planner.
pub mod cvdb;
/// Per-district power supervision.
pub mod districts;
/// Error codes, the error cache, and terminal fault handling.
pub mod errors;
/// Mock hardware for desktop testing.
pub mod hal;
/// The 20x4 status display model.
pub mod hci;
/// DCC packet composition.
pub mod packets;
/// The cooperative run queue.
pub mod scheduler;
/// The counted notification primitive.
pub mod signal;
/// Top-level wiring and the public DCC API.
pub mod station;
/// Hardware abstraction traits.
pub mod traits;
/// The hard-real-time waveform generator.
pub mod waveform;

// Re-exports for convenience
pub use buffers::{BufferRing, Priority, Submission, TRANSMISSION_BUFFERS};
pub use config::{DistrictSlot, StationConfig};
pub use constants::Constants;
pub use cvdb::{ChangeSet, CvChange, CvElement, CvValue};
pub use districts::{DistrictStatus, Districts, PowerState, Zone, PHASE_RETRY_LIMIT};
pub use errors::{ErrorCode, ErrorLog};
pub use packets::{Action, Direction};
pub use scheduler::Scheduler;
pub use signal::{SignalId, Signals};
pub use station::{CvReadResult, Station, StationState};
pub use traits::{AdcConverter, BridgeDriver, CacheBearing, NvStorage, PanelDisplay};
pub use waveform::WaveformDriver;
