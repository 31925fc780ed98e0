//! Сигнальный канал: JSON-конверты поверх WebSocket

use crate::error::{Error, Result, Transport};
use crate::peer::types::IceCandidate;
use crate::session::{EventSender, SessionEvent};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};
use url::Url;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `{ "type": ..., "payload": ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    Candidate(IceCandidate),
    /// Ключ пинга в деградированном режиме
    Ping(String),
}

/// Результат разбора входящего кадра
#[derive(Debug, Clone)]
pub enum Inbound {
    Signal(SignalMessage),
    Unrecognized(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

const KNOWN_TYPES: [&str; 4] = ["offer", "answer", "candidate", "ping"];

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::Ping(_) => "ping",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Неизвестный `type` не ошибка, а `Inbound::Unrecognized`
    pub fn decode(text: &str) -> Result<Inbound> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if KNOWN_TYPES.contains(&envelope.kind.as_str()) {
            Ok(Inbound::Signal(serde_json::from_str(text)?))
        } else {
            Ok(Inbound::Unrecognized(envelope.kind))
        }
    }
}

/// Надёжный канал рукопожатия; входящие кадры приходят событиями сессии
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;

    async fn send_signal(&self, message: &SignalMessage) -> Result<()> {
        debug!("Sending `{}` over signaling channel", message.kind());
        self.send_text(message.encode()?).await
    }
}

pub struct WsControlChannel {
    tx: mpsc::UnboundedSender<Message>,
}

impl WsControlChannel {
    /// Подключаемся; `ControlOpened` уходит в очередь до первого входящего кадра
    pub async fn connect(endpoint: &Url, events: EventSender) -> Result<Self> {
        info!("Connecting to signaling server: {endpoint}");

        let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = events.send(SessionEvent::ControlOpened);
        tokio::spawn(sender_task(write, rx, events.clone()));
        tokio::spawn(receiver_task(read, events));

        Ok(Self { tx })
    }
}

#[async_trait]
impl ControlChannel for WsControlChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::TransportClosed(Transport::Control))
    }
}

async fn sender_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    events: EventSender,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write.send(msg).await {
            error!("Failed to send WebSocket message: {e}");
            let _ = events.send(SessionEvent::ControlClosed);
            break;
        }
    }

    debug!("Sender task terminated");
}

async fn receiver_task(mut read: SplitStream<WsStream>, events: EventSender) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let _ = events.send(SessionEvent::ControlMessage(text));
            }
            Ok(Message::Close(frame)) => {
                info!("WebSocket connection closed: {frame:?}");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {e}");
                break;
            }
        }
    }

    let _ = events.send(SessionEvent::ControlClosed);
    debug!("Receiver task terminated");
}
