//! Link state machine values.

use std::fmt;

/// Connection state of the live link
///
/// ```text
/// Disconnected → Connecting → Connected ⇄ Unplugged
///        ↑____________________________________|  (disconnect)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transport failed while open; reconnect attempts in progress
    Unplugged,
}

impl LinkState {
    /// Whether a live session (and its ingestion task) exists
    pub fn is_live(self) -> bool {
        !matches!(self, LinkState::Disconnected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::Connecting => "CONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::Unplugged => "UNPLUGGED",
        };
        f.write_str(label)
    }
}
