//! # Uplink Module
//!
//! Everything that travels from the ground to the flight computer:
//! - Command encoding with the simulation guard (`command`)
//! - Operator console parsing (`operator`)
//! - Pressure profiles for simulation playback (`profile`)

pub mod command;
pub mod operator;
pub mod profile;

pub use command::{encode_raw, CommandEncoder, CommandIntent, ModeFlags, SimMode, TimeSource};
pub use operator::OperatorCommand;
pub use profile::PressureProfile;
