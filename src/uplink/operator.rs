//! # Operator Commands
//!
//! Parses console input into operator commands. Matching is
//! case-insensitive and uses the configured prefix (`/` by default).
//! Text that matches no command is raw pass-through to the link.

use chrono::NaiveTime;

use super::command::{CommandIntent, SimMode, TimeSource};
use crate::config::INTERVAL_RANGE_S;

/// Parsed operator input
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Help,
    /// Reset counters and raw archive, mark the structured log
    Clear,
    /// Reload configuration
    Reload,
    /// Open the logs folder
    OpenArchiveFolder,
    /// Print link state, counters and flags
    Status,
    /// List serial ports
    Ports,
    /// Open the live link; port and baud label fall back to configuration
    Connect {
        port: Option<String>,
        baud: Option<String>,
    },
    Disconnect,
    DummyOn,
    DummyOff,
    /// New dummy cadence in seconds
    DummyTime(f64),
    /// Structured recording on/off
    Record(bool),
    /// Start pressure-profile playback
    SimPlay,
    /// Stop pressure-profile playback
    SimStop,
    Uplink(CommandIntent),
    /// Unrecognized text sent verbatim
    Raw(String),
}

/// Help lines listing every command with `prefix`
pub fn help_lines(prefix: &str) -> Vec<String> {
    [
        "help",
        "clear",
        "reload",
        "saves",
        "status",
        "ports",
        "connect [port] [baud]",
        "disconnect",
        "dummy.on | dummy.off",
        "dummy.time <sec>",
        "record.on | record.off",
        "cal",
        "cx.on | cx.off",
        "st.gps | st <hh:mm:ss>",
        "sim.enable | sim.activate | sim.disable",
        "sim.play | sim.stop",
        "simp <pressure_pa>",
        "mec.<device>.on | mec.<device>.off",
    ]
    .iter()
    .map(|cmd| format!(" - {}{}", prefix, cmd))
    .collect()
}

/// Parse one line of operator input
///
/// Returns `None` for blank input, `Some(Err(usage))` when a recognized
/// command has malformed arguments.
///
/// # Examples
///
/// ```
/// use ddl_ground::uplink::operator::{parse, OperatorCommand};
///
/// assert_eq!(parse("/DUMMY.ON", "/"), Some(Ok(OperatorCommand::DummyOn)));
/// assert_eq!(parse("PING", "/"), Some(Ok(OperatorCommand::Raw("PING".into()))));
/// assert!(parse("/simp abc", "/").unwrap().is_err());
/// ```
pub fn parse(input: &str, prefix: &str) -> Option<Result<OperatorCommand, String>> {
    let text = input.trim();
    if text.is_empty() {
        return None;
    }

    let Some(original) = strip_prefix_ignore_case(text, prefix) else {
        return Some(Ok(OperatorCommand::Raw(text.to_string())));
    };
    let lowered = original.to_lowercase();
    let body = lowered.as_str();

    let simple = match body {
        "help" => Some(OperatorCommand::Help),
        "clear" => Some(OperatorCommand::Clear),
        "reload" => Some(OperatorCommand::Reload),
        "saves" => Some(OperatorCommand::OpenArchiveFolder),
        "status" => Some(OperatorCommand::Status),
        "ports" => Some(OperatorCommand::Ports),
        "connect" => Some(OperatorCommand::Connect { port: None, baud: None }),
        "disconnect" => Some(OperatorCommand::Disconnect),
        "dummy.on" => Some(OperatorCommand::DummyOn),
        "dummy.off" => Some(OperatorCommand::DummyOff),
        "record.on" => Some(OperatorCommand::Record(true)),
        "record.off" => Some(OperatorCommand::Record(false)),
        "sim.play" => Some(OperatorCommand::SimPlay),
        "sim.stop" => Some(OperatorCommand::SimStop),
        "cal" => Some(OperatorCommand::Uplink(CommandIntent::Calibrate)),
        "cx.on" => Some(OperatorCommand::Uplink(CommandIntent::Transmit(true))),
        "cx.off" => Some(OperatorCommand::Uplink(CommandIntent::Transmit(false))),
        "st.gps" => Some(OperatorCommand::Uplink(CommandIntent::SetTime(TimeSource::Gps))),
        "sim.enable" => Some(OperatorCommand::Uplink(CommandIntent::Simulation(SimMode::Enable))),
        "sim.activate" => Some(OperatorCommand::Uplink(CommandIntent::Simulation(SimMode::Activate))),
        "sim.disable" => Some(OperatorCommand::Uplink(CommandIntent::Simulation(SimMode::Disable))),
        _ => None,
    };
    if let Some(command) = simple {
        return Some(Ok(command));
    }

    // Argument commands given without their argument
    match body {
        "dummy.time" => return Some(Err(format!("(!) Usage: {}dummy.time <sec>", prefix))),
        "st" => return Some(Err(format!("(!) Usage: {}st hh:mm:ss", prefix))),
        "simp" => return Some(Err(format!("(!) Usage: {}simp <pressure_pa>", prefix))),
        _ => {}
    }

    if let Some(args) = word_arg(original, "connect") {
        let mut parts = args.split_whitespace().map(str::to_string);
        let port = parts.next();
        let baud = parts.next();
        if parts.next().is_some() {
            return Some(Err(format!("(!) Usage: {}connect [port] [baud]", prefix)));
        }
        return Some(Ok(OperatorCommand::Connect { port, baud }));
    }

    if let Some(arg) = word_arg(body, "dummy.time") {
        return Some(
            arg.parse::<f64>()
                .ok()
                .filter(|sec| INTERVAL_RANGE_S.contains(sec))
                .map(OperatorCommand::DummyTime)
                .ok_or_else(|| {
                    format!(
                        "(!) Usage: {}dummy.time <sec> ({}..={})",
                        prefix,
                        INTERVAL_RANGE_S.start(),
                        INTERVAL_RANGE_S.end()
                    )
                }),
        );
    }

    if let Some(arg) = word_arg(original, "st") {
        return Some(
            NaiveTime::parse_from_str(arg, "%H:%M:%S")
                .map(|t| OperatorCommand::Uplink(CommandIntent::SetTime(TimeSource::Explicit(t))))
                .map_err(|_| format!("(!) Usage: {}st hh:mm:ss", prefix)),
        );
    }

    if let Some(arg) = word_arg(body, "simp") {
        return Some(
            arg.parse::<i64>()
                .map(|pa| OperatorCommand::Uplink(CommandIntent::SimulatedPressure(pa)))
                .map_err(|_| format!("(!) Usage: {}simp <pressure_pa>", prefix)),
        );
    }

    if let Some(tail) = body.strip_prefix("mec.") {
        return Some(parse_mechanism(tail).ok_or_else(|| {
            format!("(!) Usage: {}mec.<device>.on|off", prefix)
        }));
    }

    Some(Ok(OperatorCommand::Raw(text.to_string())))
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

/// `"<name> <arg>"` → `Some(arg)` (case-insensitive name)
fn word_arg<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let (head, arg) = body.split_once(char::is_whitespace)?;
    head.eq_ignore_ascii_case(name).then(|| arg.trim())
}

fn parse_mechanism(tail: &str) -> Option<OperatorCommand> {
    let (device, action) = tail.split_once('.')?;
    if device.is_empty() || device.contains(',') || device.contains(char::is_whitespace) {
        return None;
    }
    let on = match action {
        "on" => true,
        "off" => false,
        _ => return None,
    };
    Some(OperatorCommand::Uplink(CommandIntent::Mechanism {
        device: device.to_uppercase(),
        on,
    }))
}
