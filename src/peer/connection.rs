use crate::config::DATA_CHANNEL_LABEL;
use crate::error::Result;
use crate::logger::dump_selected_pair;
use crate::peer::data_channel::{attach_dc, WebRtcDataChannel};
use crate::peer::ice::ice_servers;
use crate::peer::types::{IceCandidate, PeerLink, ServerConfig};
use crate::peer::{PeerConnector, PeerSession};
use crate::session::{EventSender, SessionEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    data_channel::data_channel_init::RTCDataChannelInit,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// создаём Peer и вешаем обработчики, которые переводят колбэки в события сессии
pub async fn new_peer(
    servers: &[ServerConfig],
    events: EventSender,
) -> Result<Arc<RTCPeerConnection>> {
    let api = APIBuilder::new().build();
    let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);

    // Локальные кандидаты уходят в очередь событий, отправкой займётся сессия
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let _ = events.send(SessionEvent::LocalCandidate(IceCandidate::from(init)));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                // cand == None означает конец сбора
                None => debug!("ICE candidate gathering completed (null candidate received)"),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_events = events;
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);

        match st {
            RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                let _ = state_events.send(SessionEvent::PeerFailed);
            }
            RTCPeerConnectionState::Disconnected => {
                warn!("Peer connection disconnected, waiting for ICE to recover");
            }
            _ => {}
        }
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Настройки канала: без порядка и без ретрансмитов, свежий сэмпл важнее полного
fn unreliable_channel_init() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(false),
        max_retransmits: Some(0),
        ..Default::default()
    }
}

pub struct WebRtcConnector {
    events: EventSender,
}

impl WebRtcConnector {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, servers: &[ServerConfig]) -> Result<PeerLink> {
        let pc = new_peer(servers, self.events.clone()).await?;

        let dc = pc
            .create_data_channel(DATA_CHANNEL_LABEL, Some(unreliable_channel_init()))
            .await?;
        attach_dc(&dc, self.events.clone());

        Ok(PeerLink {
            session: Arc::new(WebRtcPeer { pc }),
            channel: Arc::new(WebRtcDataChannel::new(dc)),
        })
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        // Трансиверов нет, поэтому offer без аудио и видео
        Ok(self.pc.create_offer(None).await?)
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_local_description(desc).await?)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_remote_description(desc).await?)
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        Ok(self.pc.add_ice_candidate(candidate.into()).await?)
    }

    async fn log_selected_pair(&self, moment: &str) {
        dump_selected_pair(&self.pc, moment).await;
    }
}
