use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::peer::ice::{analyze_candidates, CandidateTally};
use crate::peer::types::{IceCandidate, PeerLink, ServerConfig};
use crate::peer::{DataChannel, PeerConnector, PeerSession};
use crate::signaling::{ControlChannel, Inbound, SignalMessage};
use crate::utils::random_id;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Всё, что коллабораторы сообщают сессии. Обрабатывается по одному в порядке поступления.
#[derive(Debug)]
pub enum SessionEvent {
    ControlOpened,
    ControlMessage(String),
    ControlClosed,
    LocalCandidate(IceCandidate),
    ChannelOpened,
    ChannelMessage(String),
    ChannelClosed,
    PeerFailed,
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    Idle,
    ControlOpen,
    OfferSent,
    AnswerApplied,
    ChannelOpen,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Idle => "idle",
            HandshakeState::ControlOpen => "control-open",
            HandshakeState::OfferSent => "offer-sent",
            HandshakeState::AnswerApplied => "answer-applied",
            HandshakeState::ChannelOpen => "channel-open",
        };
        f.write_str(name)
    }
}

/// Что получилось из входящего кадра сигнального канала
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// Эхо пинга, разбирается пробой
    PingReply(String),
    Ignored,
}

/// Одна сессия рукопожатия на прогон
pub struct SignalingSession {
    id: String,
    state: HandshakeState,
    control: Arc<dyn ControlChannel>,
    connector: Arc<dyn PeerConnector>,
    ice_servers: Vec<ServerConfig>,
    peer: Option<Arc<dyn PeerSession>>,
    /// Канал создан вместе с peer, но до `ChannelOpen` наружу не отдаётся
    pending_channel: Option<Arc<dyn DataChannel>>,
    channel: Option<Arc<dyn DataChannel>>,
    local_description_set: bool,
    remote_description_set: bool,
    /// Локальные кандидаты, пришедшие раньше local description
    pending_local_candidates: Vec<IceCandidate>,
    local_tally: CandidateTally,
    remote_tally: CandidateTally,
}

impl SignalingSession {
    pub fn new(
        control: Arc<dyn ControlChannel>,
        connector: Arc<dyn PeerConnector>,
        ice_servers: Vec<ServerConfig>,
    ) -> Self {
        Self {
            id: random_id(),
            state: HandshakeState::Idle,
            control,
            connector,
            ice_servers,
            peer: None,
            pending_channel: None,
            channel: None,
            local_description_set: false,
            remote_description_set: false,
            pending_local_candidates: Vec::new(),
            local_tally: CandidateTally::default(),
            remote_tally: CandidateTally::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn control(&self) -> Arc<dyn ControlChannel> {
        self.control.clone()
    }

    /// Открытый data channel; `None` до `ChannelOpen`
    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.clone()
    }

    fn violation(&self, message: &'static str) -> Error {
        Error::ProtocolViolation {
            message,
            state: self.state,
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        info!(session = %self.id, "Handshake {} -> {}", self.state, next);
        self.state = next;
    }

    /// Сигнальный канал открыт: создаём peer и канал, затем отправляем offer
    pub async fn on_control_open(&mut self) -> Result<()> {
        if self.state != HandshakeState::Idle {
            return Err(self.violation("control-open"));
        }

        let PeerLink { session, channel } = self.connector.connect(&self.ice_servers).await?;
        self.peer = Some(session.clone());
        self.pending_channel = Some(channel);
        self.transition(HandshakeState::ControlOpen);

        let offer = session.create_offer().await?;
        session.set_local_description(offer.clone()).await?;
        self.local_description_set = true;

        self.control.send_signal(&SignalMessage::Offer(offer)).await?;
        self.transition(HandshakeState::OfferSent);

        for candidate in std::mem::take(&mut self.pending_local_candidates) {
            self.send_local_candidate(candidate).await?;
        }
        Ok(())
    }

    pub async fn on_local_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if !self.local_description_set {
            debug!(session = %self.id, "Local description not set yet, holding candidate");
            self.pending_local_candidates.push(candidate);
            return Ok(());
        }
        self.send_local_candidate(candidate).await
    }

    async fn send_local_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        dump_candidate("LOCAL", &candidate);
        self.local_tally.record(&candidate);
        self.control
            .send_signal(&SignalMessage::Candidate(candidate))
            .await
    }

    /// Разбор кадра сигнального канала. Ошибка протокола не меняет состояние.
    pub async fn on_control_message(&mut self, text: &str) -> Result<Dispatch> {
        match SignalMessage::decode(text)? {
            Inbound::Signal(SignalMessage::Answer(desc)) => {
                self.apply_answer(desc).await?;
                Ok(Dispatch::Handled)
            }
            Inbound::Signal(SignalMessage::Candidate(candidate)) => {
                self.apply_remote_candidate(candidate).await?;
                Ok(Dispatch::Handled)
            }
            Inbound::Signal(SignalMessage::Ping(key)) => Ok(Dispatch::PingReply(key)),
            // Offer шлёт только эта сторона
            Inbound::Signal(SignalMessage::Offer(_)) => Err(self.violation("offer")),
            Inbound::Unrecognized(kind) => {
                warn!(session = %self.id, "Unrecognized WebSocket message type `{kind}`");
                Ok(Dispatch::Ignored)
            }
        }
    }

    async fn apply_answer(&mut self, desc: RTCSessionDescription) -> Result<()> {
        if self.state != HandshakeState::OfferSent {
            return Err(self.violation("answer"));
        }
        let peer = self.peer.clone().ok_or_else(|| self.violation("answer"))?;

        peer.set_remote_description(desc).await?;
        self.remote_description_set = true;
        self.transition(HandshakeState::AnswerApplied);
        Ok(())
    }

    /// Кандидат применяется сразу, без буфера и без дедупликации
    async fn apply_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let Some(peer) = self.peer.clone() else {
            return Err(self.violation("candidate"));
        };

        dump_candidate("REMOTE", &candidate);
        self.remote_tally.record(&candidate);
        if let Err(e) = peer.add_remote_candidate(candidate).await {
            warn!(session = %self.id, "Failed to add ICE candidate: {e}");
        }
        Ok(())
    }

    /// Канал открыт. Допустимо только после применённого answer.
    pub async fn on_channel_open(&mut self) -> Result<Arc<dyn DataChannel>> {
        if self.state != HandshakeState::AnswerApplied
            || !self.local_description_set
            || !self.remote_description_set
        {
            return Err(self.violation("channel-open"));
        }
        let channel = self
            .pending_channel
            .take()
            .ok_or_else(|| self.violation("channel-open"))?;

        self.channel = Some(channel.clone());
        self.transition(HandshakeState::ChannelOpen);

        analyze_candidates("local", &self.local_tally);
        debug!(
            session = %self.id,
            "Remote candidates applied: {}",
            self.remote_tally.total()
        );
        if let Some(peer) = &self.peer {
            peer.log_selected_pair("CHANNEL-OPEN").await;
        }
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{answer_frame, candidate_frame, host_candidate, Harness};

    #[tokio::test]
    async fn control_open_sends_offer_after_local_description() {
        let h = Harness::new();
        let mut session = h.session();

        session.on_control_open().await.unwrap();

        assert_eq!(session.state(), HandshakeState::OfferSent);
        assert_eq!(
            h.peer.calls(),
            vec!["connect", "create_offer", "set_local_description"]
        );
        let sent = h.control.sent_types();
        assert_eq!(sent, vec!["offer"]);
        assert!(session.channel().is_none());
    }

    #[tokio::test]
    async fn early_local_candidate_waits_for_offer() {
        let h = Harness::new();
        let mut session = h.session();

        session.on_local_candidate(host_candidate(1)).await.unwrap();
        assert!(h.control.sent_types().is_empty());

        session.on_control_open().await.unwrap();
        session.on_local_candidate(host_candidate(2)).await.unwrap();

        assert_eq!(h.control.sent_types(), vec!["offer", "candidate", "candidate"]);
    }

    #[tokio::test]
    async fn answer_then_channel_open_reaches_channel_open() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        let dispatch = session.on_control_message(&answer_frame()).await.unwrap();
        assert_eq!(dispatch, Dispatch::Handled);
        assert_eq!(session.state(), HandshakeState::AnswerApplied);

        session.on_channel_open().await.unwrap();
        assert_eq!(session.state(), HandshakeState::ChannelOpen);
        assert!(session.channel().is_some());
        assert_eq!(
            h.peer.calls(),
            vec![
                "connect",
                "create_offer",
                "set_local_description",
                "set_remote_description",
                "log_selected_pair"
            ]
        );
    }

    #[tokio::test]
    async fn answer_before_offer_is_a_violation() {
        let h = Harness::new();
        let mut session = h.session();

        let err = session.on_control_message(&answer_frame()).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { message: "answer", .. }));
        assert!(!err.is_fatal());
        assert_eq!(session.state(), HandshakeState::Idle);
    }

    #[tokio::test]
    async fn duplicate_answer_is_rejected_without_state_change() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();
        session.on_control_message(&answer_frame()).await.unwrap();

        let err = session.on_control_message(&answer_frame()).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert_eq!(session.state(), HandshakeState::AnswerApplied);
        let remote_sets = h
            .peer
            .calls()
            .iter()
            .filter(|c| **c == "set_remote_description")
            .count();
        assert_eq!(remote_sets, 1);
    }

    #[tokio::test]
    async fn channel_open_before_answer_is_rejected() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        assert!(session.on_channel_open().await.is_err());
        assert_eq!(session.state(), HandshakeState::OfferSent);
        assert!(session.channel().is_none());
    }

    #[tokio::test]
    async fn duplicate_remote_candidate_is_applied_twice() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        let frame = candidate_frame(3);
        session.on_control_message(&frame).await.unwrap();
        session.on_control_message(&frame).await.unwrap();

        assert_eq!(h.peer.remote_candidates().len(), 2);
        assert_eq!(h.peer.remote_candidates()[0], h.peer.remote_candidates()[1]);
    }

    #[tokio::test]
    async fn candidate_before_peer_exists_is_a_violation() {
        let h = Harness::new();
        let mut session = h.session();

        let err = session.on_control_message(&candidate_frame(1)).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { message: "candidate", .. }));
    }

    #[tokio::test]
    async fn rejected_candidate_is_not_fatal() {
        let h = Harness::new();
        h.peer.reject_candidates();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        let dispatch = session.on_control_message(&candidate_frame(1)).await.unwrap();
        assert_eq!(dispatch, Dispatch::Handled);
    }

    #[tokio::test]
    async fn unrecognized_type_leaves_state_alone() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        let dispatch = session.on_control_message(r#"{"type":"foo"}"#).await.unwrap();
        assert_eq!(dispatch, Dispatch::Ignored);
        assert_eq!(session.state(), HandshakeState::OfferSent);
    }

    #[tokio::test]
    async fn ping_is_handed_back_as_reply() {
        let h = Harness::new();
        let mut session = h.session();

        let dispatch = session
            .on_control_message(r#"{"type":"ping","payload":"7"}"#)
            .await
            .unwrap();
        assert_eq!(dispatch, Dispatch::PingReply("7".into()));
    }

    #[tokio::test]
    async fn inbound_offer_is_a_violation() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        let frame = r#"{"type":"offer","payload":{"type":"offer","sdp":"v=0\r\n"}}"#;
        let err = session.on_control_message(frame).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { message: "offer", .. }));
    }

    #[tokio::test]
    async fn second_control_open_is_rejected() {
        let h = Harness::new();
        let mut session = h.session();
        session.on_control_open().await.unwrap();

        assert!(session.on_control_open().await.is_err());
        assert_eq!(h.peer.calls().iter().filter(|c| **c == "connect").count(), 1);
    }
}
