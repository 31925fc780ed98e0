pub mod config;
mod driver;
pub mod error;
pub mod logger;
pub mod peer;
pub mod probe;
pub mod session;
pub mod signaling;
mod utils;

#[cfg(test)]
mod test_support;

pub use config::{Config, ProbeConfig, ProbeTransport, DEFAULT_ENDPOINT};
pub use error::{Error, Result, Transport};
pub use logger::init as init_logging;
pub use probe::{LatencySummary, ProbeReport};
pub use session::HandshakeState;

use peer::WebRtcConnector;
use probe::LatencyProbe;
use session::SignalingSession;
use signaling::WsControlChannel;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Рукопожатие через WebSocket, затем замер задержки по выбранному каналу
pub async fn run(config: Config) -> Result<ProbeReport> {
    config.validate()?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let control = WsControlChannel::connect(&config.endpoint, events_tx.clone()).await?;
    let connector = WebRtcConnector::new(events_tx);

    let session = SignalingSession::new(
        Arc::new(control),
        Arc::new(connector),
        config.ice_servers.clone(),
    );
    let probe = LatencyProbe::new(config.probe.clone());

    driver::drive(session, probe, events_rx).await
}
