//! Trait abstraction for opening the link, so the controller can be tested
//! without hardware.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Inbound half of an open link
pub type PortReader = Box<dyn AsyncRead + Send + Unpin>;

/// Outbound half of an open link
pub type PortWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open byte-stream link split into read and write halves
pub struct Transport {
    pub reader: PortReader,
    pub writer: PortWriter,
    /// Human-readable description for logs and the raw archive banner
    pub description: String,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Opens a named port at a baud rate
pub trait PortOpener: Send + Sync {
    /// # Errors
    ///
    /// Returns `GroundError::Transport` when the port is missing, busy, or
    /// not permitted.
    fn open(&self, port: &str, baud: u32) -> Result<Transport>;

    /// Port names this opener can currently reach
    fn list(&self) -> Vec<String> {
        Vec::new()
    }
}
