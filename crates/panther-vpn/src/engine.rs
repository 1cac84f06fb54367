//! Tunnel Engine Adapter
//!
//! Boundary to the external packet-level tunnel implementation. The core
//! hands a structured configuration across this seam and observes status;
//! handshake and packet transport happen on the other side.

use crate::config::TunnelConfiguration;
use thiserror::Error;

/// Engine binding this build of the client targets
pub const DEFAULT_PROVIDER_IDENTITY: &str = "app.panthervpn.client.packetTunnel";

/// Live tunnel status as reported by the engine.
///
/// Transitions are owned by the engine; this system only observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    /// No usable profile behind this session
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    /// Engine is re-establishing after an interruption
    Reasserting,
    Disconnecting,
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TunnelStatus::Invalid => "invalid",
            TunnelStatus::Disconnected => "disconnected",
            TunnelStatus::Connecting => "connecting",
            TunnelStatus::Connected => "connected",
            TunnelStatus::Reasserting => "reasserting",
            TunnelStatus::Disconnecting => "disconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Engine errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine start failed: {0}")]
    Start(String),

    #[error("Engine stop failed: {0}")]
    Stop(String),
}

/// Driver for the external tunnel engine.
///
/// `start` and `stop` kick the engine and return; progress is observed via
/// `status`, which the engine advances on its own schedule.
pub trait TunnelEngine: Send + Sync {
    /// Identity of the engine binding, recorded into installed profiles
    fn provider_identity(&self) -> &str;

    /// Hand a configuration to the engine and begin connecting
    fn start(&self, config: &TunnelConfiguration) -> Result<(), EngineError>;

    /// Begin tearing the tunnel down
    fn stop(&self) -> Result<(), EngineError>;

    /// Sample the engine's current status
    fn status(&self) -> TunnelStatus;
}
