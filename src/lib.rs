//! Smart Detect - On-device detection engine for intention tracking
//!
//! The engine watches device signals and turns them into debounced,
//! human-readable suggestions about what the user is doing: motion state
//! changes, arriving at or leaving saved places, returning to the app after
//! a long absence, stretches without a recorded intention, ambient noise
//! changes and recurring time-of-day habits.
//!
//! ## Modules
//!
//! - **Engine**: [`DetectionEngine`] owns the six detectors and the event sink
//! - **Detectors**: motion, noise, location, screen, inactivity and patterns
//! - **Replay**: NDJSON records that drive an engine from a recorded day
//!
//! Time is always supplied by the caller; nothing in the crate reads the
//! wall clock or spawns threads.

pub mod buffer;
pub mod bus;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod geo;
pub mod history;
pub mod input;
pub mod modules;
pub mod platform;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use bus::{EventRecorder, EventSink};
pub use config::DetectionConfig;
pub use engine::DetectionEngine;
pub use error::{AcquisitionError, DetectError};
pub use history::{HistoryEntry, HistoryLog};
pub use input::{parse_ndjson, ReplayAction, ReplayRecord};
pub use platform::{SensorBackend, SensorBackends};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{DetectionEvent, EventKind, ModuleKind, Place, Position, StatusSnapshot};

/// Crate version reported by the CLI and FFI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for diagnostic reports
pub const PRODUCER_NAME: &str = "smart-detect";
