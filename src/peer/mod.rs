pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod types;

use crate::error::Result;
use async_trait::async_trait;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub use connection::WebRtcConnector;
pub use types::{IceCandidate, PeerLink, ServerConfig};

/// Peer connection с точки зрения рукопожатия
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_offer(&self) -> Result<RTCSessionDescription>;
    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Диагностика выбранной ICE-пары
    async fn log_selected_pair(&self, _moment: &str) {}
}

/// Ненадёжный канал: только отправка, входящие приходят событиями
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;
}

/// Создаёт peer-сессию вместе с data channel
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, ice_servers: &[ServerConfig]) -> Result<PeerLink>;
}
