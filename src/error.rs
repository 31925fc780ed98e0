use crate::session::HandshakeState;
use std::fmt;
use thiserror::Error;

/// Какой из транспортов отвалился
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Control,
    DataChannel,
    PeerConnection,
    EventQueue,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Control => f.write_str("signaling channel"),
            Transport::DataChannel => f.write_str("data channel"),
            Transport::PeerConnection => f.write_str("peer connection"),
            Transport::EventQueue => f.write_str("session event queue"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("signaling transport error: {0}")]
    Signaling(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("unexpected `{message}` while handshake is {state}")]
    ProtocolViolation {
        message: &'static str,
        state: HandshakeState,
    },

    #[error("{0} closed unexpectedly")]
    TransportClosed(Transport),
}

impl Error {
    /// Фатальные ошибки обрывают прогон, остальные только логируются
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Json(_) | Error::ProtocolViolation { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
