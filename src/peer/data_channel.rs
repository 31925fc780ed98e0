use crate::error::Result;
use crate::peer::DataChannel;
use crate::session::{EventSender, SessionEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// общий обработчик data-channel
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: EventSender) {
    info!("attach_dc called for channel `{}`", dc.label());

    dc.on_open(Box::new({
        let events = events.clone();
        move || {
            info!("Data channel opened!");
            let _ = events.send(SessionEvent::ChannelOpened);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg: DataChannelMessage| {
            debug!("Received message, length: {}", msg.data.len());
            let _ = events.send(SessionEvent::ChannelMessage(payload_text(&msg.data)));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!("Data channel closed");
        let _ = events.send(SessionEvent::ChannelClosed);
        Box::pin(async {})
    }));
}

/// Ключ пинга приходит голым текстом без конверта
fn payload_text(data: &Bytes) -> String {
    String::from_utf8_lossy(data).into_owned()
}

pub struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

impl WebRtcDataChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        self.dc.send_text(text).await?;
        Ok(())
    }
}
