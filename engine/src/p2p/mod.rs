mod handshake;
mod message;
pub mod session;
pub mod state;

pub use session::PeerSession;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer handshake provided an unexpected protocol name")]
    IncorrectProtocol,

    #[error("peer handshake provided the wrong info-hash")]
    IncorrectInfoHash,

    #[error("connection closed before a handshake was received")]
    NoHandshake,

    #[error("peer sent an unrecognised message id: {0}")]
    InvalidMessageId(u8),

    #[error("peer sent a malformed message payload")]
    InvalidMessage,

    #[error("peer connect or read timed out")]
    Timeout,
}
