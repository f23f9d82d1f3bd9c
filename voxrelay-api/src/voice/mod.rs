//! Discord-compatible voice gateway

pub mod error;
pub mod protocol;
pub mod session;

pub use error::GatewayError;
pub use protocol::{CloseCode, Envelope, OpCode};
pub use session::{GatewayContext, Outbound, Phase, VoiceConnection};
