//! Transport Manager: peer connection lifecycle, ICE configuration, the two
//! media receivers, and the primary/auxiliary data channels. Split across
//! `peer` (connection + channel lifecycle), `ice` (TURN configuration
//! fetch), and `receivers` (media tracks + jitter buffer loop).

pub mod ice;
pub mod peer;
pub mod receivers;

use std::fmt;

pub use ice::{fetch_turn_config, to_rtc_ice_servers, IceServerEntry};
pub use peer::{DataChannelPayload, TransportEvent, TransportManager, TransportManagerConfig};
pub use receivers::MediaReceivers;

#[derive(Debug)]
pub enum TransportError {
    SetupFailed(String),
    ConnectFailed(String),
    NotConnected,
    SdpError(String),
    IceError(String),
    IceConfigFailed(String),
    AuxChannelNotOpen,
    SendFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::SetupFailed(msg) => write!(f, "transport setup failed: {}", msg),
            TransportError::ConnectFailed(msg) => write!(f, "transport connect failed: {}", msg),
            TransportError::NotConnected => write!(f, "peer connection not established"),
            TransportError::SdpError(msg) => write!(f, "sdp negotiation error: {}", msg),
            TransportError::IceError(msg) => write!(f, "ice error: {}", msg),
            TransportError::IceConfigFailed(msg) => write!(f, "turn configuration fetch failed: {}", msg),
            TransportError::AuxChannelNotOpen => write!(f, "auxiliary data channel is not open"),
            TransportError::SendFailed(msg) => write!(f, "data channel send failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}
