use thiserror::Error;
use voxrelay_sfu::SfuError;

use super::protocol::CloseCode;

/// Anything that ends a voice connection
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Already authenticated")]
    AlreadyAuthenticated,

    #[error("Identify not received in time")]
    SessionTimeout,

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Voice session lookup failed: {0}")]
    Store(#[from] voxrelay_core::Error),

    #[error(transparent)]
    Sfu(#[from] SfuError),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl GatewayError {
    /// Close code to send the client, `None` when the socket is already gone
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        Some(match self {
            Self::UnknownOpcode(_) => CloseCode::UnknownOpcode,
            Self::Decode(_) => CloseCode::DecodeError,
            Self::NotAuthenticated | Self::Sfu(SfuError::PeerNotJoined { .. }) => {
                CloseCode::NotAuthenticated
            }
            Self::AuthenticationFailed => CloseCode::AuthenticationFailed,
            Self::AlreadyAuthenticated | Self::Sfu(SfuError::AlreadyJoined { .. }) => {
                CloseCode::AlreadyAuthenticated
            }
            Self::SessionTimeout => CloseCode::SessionTimeout,
            Self::UnknownProtocol(_) => CloseCode::UnknownProtocol,
            Self::Store(_) | Self::Sfu(_) => CloseCode::ServerCrashed,
            Self::ConnectionClosed => return None,
        })
    }
}
