//! Подставные коллабораторы для тестов рукопожатия и пробы

use crate::error::{Error, Result, Transport};
use crate::peer::types::{IceCandidate, PeerLink, ServerConfig};
use crate::peer::{DataChannel, PeerConnector, PeerSession};
use crate::session::{EventSender, SessionEvent, SignalingSession};
use crate::signaling::{ControlChannel, Inbound, SignalMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub const ANSWER_SDP: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\n";

pub fn answer_frame() -> String {
    format!(
        r#"{{"type":"answer","payload":{{"type":"answer","sdp":{}}}}}"#,
        Value::String(ANSWER_SDP.into())
    )
}

pub fn host_candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn candidate_frame(n: u8) -> String {
    SignalMessage::Candidate(host_candidate(n)).encode().unwrap()
}

fn offer() -> RTCSessionDescription {
    serde_json::from_value(serde_json::json!({
        "type": "offer",
        "sdp": "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n",
    }))
    .unwrap()
}

/// Сигнальный канал, который может изображать сервер
#[derive(Default)]
pub struct MockControl {
    sent: Mutex<Vec<String>>,
    server: Option<EventSender>,
    open_channel: bool,
}

impl MockControl {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|text| {
                let value: Value = serde_json::from_str(text).unwrap();
                value["type"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }
}

#[async_trait]
impl ControlChannel for MockControl {
    async fn send_text(&self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text.clone());

        if let Some(events) = &self.server {
            match SignalMessage::decode(&text)? {
                Inbound::Signal(SignalMessage::Offer(_)) => {
                    let _ = events.send(SessionEvent::ControlMessage(answer_frame()));
                    if self.open_channel {
                        let _ = events.send(SessionEvent::ChannelOpened);
                    }
                }
                Inbound::Signal(SignalMessage::Ping(_)) => {
                    let _ = events.send(SessionEvent::ControlMessage(text));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Peer-сессия, записывающая вызовы
#[derive(Default)]
pub struct MockPeer {
    calls: Mutex<Vec<&'static str>>,
    remote: Mutex<Vec<IceCandidate>>,
    reject: AtomicBool,
    gather: Option<EventSender>,
}

impl MockPeer {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote.lock().unwrap().clone()
    }

    pub fn reject_candidates(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerSession for MockPeer {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        self.record("create_offer");
        Ok(offer())
    }

    async fn set_local_description(&self, _desc: RTCSessionDescription) -> Result<()> {
        self.record("set_local_description");
        // Сбор кандидатов стартует после local description
        if let Some(events) = &self.gather {
            let _ = events.send(SessionEvent::LocalCandidate(host_candidate(1)));
            let _ = events.send(SessionEvent::LocalCandidate(host_candidate(2)));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        assert_eq!(desc.sdp, ANSWER_SDP);
        self.record("set_remote_description");
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed(Transport::PeerConnection));
        }
        self.remote.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn log_selected_pair(&self, _moment: &str) {
        self.record("log_selected_pair");
    }
}

/// Data channel; при `echo` возвращает каждый ключ, кроме кратных `lose_every`
#[derive(Default)]
pub struct MockChannel {
    sent: Mutex<Vec<String>>,
    echo: Option<EventSender>,
    lose_every: Option<u64>,
}

impl MockChannel {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text.clone());

        if let Some(events) = &self.echo {
            let lost = match (self.lose_every, text.parse::<u64>()) {
                (Some(n), Ok(seq)) => seq % n == 0,
                _ => false,
            };
            if !lost {
                let _ = events.send(SessionEvent::ChannelMessage(text));
            }
        }
        Ok(())
    }
}

struct MockConnector {
    peer: Arc<MockPeer>,
    channel: Arc<MockChannel>,
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self, _ice_servers: &[ServerConfig]) -> Result<PeerLink> {
        self.peer.record("connect");
        Ok(PeerLink {
            session: self.peer.clone(),
            channel: self.channel.clone(),
        })
    }
}

pub struct Harness {
    pub control: Arc<MockControl>,
    pub peer: Arc<MockPeer>,
    pub channel: Arc<MockChannel>,
}

impl Harness {
    /// Без сервера: никто ничего не отвечает
    pub fn new() -> Self {
        Self {
            control: Arc::new(MockControl::default()),
            peer: Arc::new(MockPeer::default()),
            channel: Arc::new(MockChannel::default()),
        }
    }

    /// Сервер отвечает на offer, собирает кандидаты и эхом возвращает пинги
    pub fn with_server(events: EventSender, lose_every: Option<u64>) -> Self {
        Self {
            control: Arc::new(MockControl {
                sent: Mutex::default(),
                server: Some(events.clone()),
                open_channel: true,
            }),
            peer: Arc::new(MockPeer {
                gather: Some(events.clone()),
                ..Default::default()
            }),
            channel: Arc::new(MockChannel {
                sent: Mutex::default(),
                echo: Some(events),
                lose_every,
            }),
        }
    }

    pub fn session(&self) -> SignalingSession {
        let connector = Arc::new(MockConnector {
            peer: self.peer.clone(),
            channel: self.channel.clone(),
        });
        SignalingSession::new(
            self.control.clone(),
            connector,
            vec![ServerConfig::stun("test", "stun:127.0.0.1:3478")],
        )
    }
}
