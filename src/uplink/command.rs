//! # Uplink Command Encoder
//!
//! Builds `CMD,<team_id>,<OP>[,<args>]\r\n` strings from typed intents.
//!
//! Only one guard exists: simulated pressure (`SIMP`) is refused unless the
//! cached [`ModeFlags`] say simulation was both enabled and activated. The
//! flags record what the operator last asked for, not what the flight
//! computer confirmed; everything else is encoded unconditionally and the
//! remote side rejects what it cannot honor.

use chrono::NaiveTime;
use std::fmt;

use crate::error::{GroundError, Result};

/// Command frame prefix
pub const COMMAND_PREFIX: &str = "CMD";

/// Command frame terminator
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// Last-issued mode intent, cached on the ground
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    /// Dummy generator feeding the pipeline instead of the link
    pub dummy_enabled: bool,
    /// `SIM,ENABLE` sent and not disabled since
    pub sim_enabled: bool,
    /// `SIM,ACTIVATE` sent and not disabled since
    pub sim_activated: bool,
}

impl ModeFlags {
    /// Whether `SIMP` may be sent
    pub fn simulation_armed(&self) -> bool {
        self.sim_enabled && self.sim_activated
    }
}

/// Source for the `ST` (set time) command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    /// Let the flight computer take time from its GPS
    Gps,
    /// Explicit UTC time of day
    Explicit(NaiveTime),
}

/// Argument of the `SIM` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Enable,
    Activate,
    Disable,
}

impl SimMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SimMode::Enable => "ENABLE",
            SimMode::Activate => "ACTIVATE",
            SimMode::Disable => "DISABLE",
        }
    }
}

/// Operator intent to be sent to the flight computer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandIntent {
    /// `CX,ON|OFF` telemetry transmit toggle
    Transmit(bool),
    /// `ST,GPS|hh:mm:ss`
    SetTime(TimeSource),
    /// `CAL`
    Calibrate,
    /// `SIM,ENABLE|ACTIVATE|DISABLE`
    Simulation(SimMode),
    /// `SIMP,<pascal>` (guarded)
    SimulatedPressure(i64),
    /// `MEC,<device>,ON|OFF`
    Mechanism { device: String, on: bool },
}

impl CommandIntent {
    /// Operation mnemonic
    pub fn op(&self) -> &'static str {
        match self {
            CommandIntent::Transmit(_) => "CX",
            CommandIntent::SetTime(_) => "ST",
            CommandIntent::Calibrate => "CAL",
            CommandIntent::Simulation(_) => "SIM",
            CommandIntent::SimulatedPressure(_) => "SIMP",
            CommandIntent::Mechanism { .. } => "MEC",
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            CommandIntent::Transmit(on) => vec![on_off(*on).to_string()],
            CommandIntent::SetTime(TimeSource::Gps) => vec!["GPS".to_string()],
            CommandIntent::SetTime(TimeSource::Explicit(time)) => {
                vec![time.format("%H:%M:%S").to_string()]
            }
            CommandIntent::Calibrate => Vec::new(),
            CommandIntent::Simulation(mode) => vec![mode.as_str().to_string()],
            CommandIntent::SimulatedPressure(pascal) => vec![pascal.to_string()],
            CommandIntent::Mechanism { device, on } => {
                vec![device.clone(), on_off(*on).to_string()]
            }
        }
    }
}

impl fmt::Display for CommandIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self.args();
        if args.is_empty() {
            write!(f, "{}", self.op())
        } else {
            write!(f, "{},{}", self.op(), args.join(","))
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Stateful encoder owning the cached [`ModeFlags`]
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    team_id: String,
    flags: ModeFlags,
}

impl CommandEncoder {
    pub fn new(team_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            flags: ModeFlags::default(),
        }
    }

    /// Encode an intent
    ///
    /// `SIM` intents update the cached flags optimistically. `ACTIVATE` is
    /// still encoded while simulation is disabled, but leaves the flags
    /// unarmed.
    ///
    /// # Errors
    ///
    /// Returns `GroundError::GuardRejected` for `SIMP` while simulation is
    /// not both enabled and activated. Nothing is built in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use ddl_ground::uplink::command::{CommandEncoder, CommandIntent, SimMode};
    ///
    /// let mut encoder = CommandEncoder::new("1043");
    /// assert!(encoder.build(&CommandIntent::SimulatedPressure(1013)).is_err());
    ///
    /// encoder.build(&CommandIntent::Simulation(SimMode::Enable)).unwrap();
    /// encoder.build(&CommandIntent::Simulation(SimMode::Activate)).unwrap();
    /// assert_eq!(
    ///     encoder.build(&CommandIntent::SimulatedPressure(1013)).unwrap(),
    ///     "CMD,1043,SIMP,1013\r\n"
    /// );
    /// ```
    pub fn build(&mut self, intent: &CommandIntent) -> Result<String> {
        match intent {
            CommandIntent::SimulatedPressure(_) if !self.flags.simulation_armed() => {
                return Err(GroundError::GuardRejected(
                    "SIMP requires SIM ENABLE and SIM ACTIVATE first".to_string(),
                ));
            }
            CommandIntent::Simulation(SimMode::Enable) => self.flags.sim_enabled = true,
            CommandIntent::Simulation(SimMode::Activate) => {
                // Activation only counts once simulation is enabled
                self.flags.sim_activated = self.flags.sim_enabled;
            }
            CommandIntent::Simulation(SimMode::Disable) => {
                self.flags.sim_enabled = false;
                self.flags.sim_activated = false;
            }
            _ => {}
        }

        Ok(format!(
            "{},{},{}{}",
            COMMAND_PREFIX, self.team_id, intent, COMMAND_TERMINATOR
        ))
    }

    /// Snapshot of the cached flags
    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    pub fn set_dummy_enabled(&mut self, enabled: bool) {
        self.flags.dummy_enabled = enabled;
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// Change the team id after a configuration reload; flags are kept
    pub fn set_team_id(&mut self, team_id: impl Into<String>) {
        self.team_id = team_id.into();
    }
}

/// Frame operator text for verbatim pass-through, adding CRLF unless the
/// text already ends a line
pub fn encode_raw(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}{}", text, COMMAND_TERMINATOR)
    }
}
