//! # Telemetry Module
//!
//! Downlink side of the ground station.
//!
//! This module handles:
//! - The fixed 25-field telemetry schema
//! - Decoding text lines into records
//! - Received/lost accounting from the remote packet counter
//! - Synthetic records for dummy mode

pub mod schema;
pub mod decoder;
pub mod sequence;
pub mod simulation;

pub use decoder::{DecodeResult, FrameDecoder};
pub use schema::{Field, TelemetryRecord, FIELD_COUNT};
pub use sequence::{SequenceStats, SequenceTracker};
pub use simulation::SimulationGenerator;
