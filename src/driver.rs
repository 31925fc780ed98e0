//! Единый цикл событий: рукопожатие, таймер пингов и ожидание опоздавших ответов

use crate::config::ProbeTransport;
use crate::error::{Error, Result, Transport};
use crate::peer::DataChannel;
use crate::probe::{LatencyProbe, ProbeReport};
use crate::session::{Dispatch, EventReceiver, SessionEvent, SignalingSession};
use crate::signaling::{ControlChannel, SignalMessage};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

/// Куда уходят пинги
enum ProbeSink {
    Control(Arc<dyn ControlChannel>),
    Channel(Arc<dyn DataChannel>),
}

impl ProbeSink {
    fn transport(&self) -> ProbeTransport {
        match self {
            ProbeSink::Control(_) => ProbeTransport::Control,
            ProbeSink::Channel(_) => ProbeTransport::DataChannel,
        }
    }

    async fn send(&self, key: String) -> Result<()> {
        match self {
            ProbeSink::Control(control) => control.send_signal(&SignalMessage::Ping(key)).await,
            // По data channel ключ уходит без конверта
            ProbeSink::Channel(channel) => channel.send_text(key).await,
        }
    }
}

/// После задержки цикла следующий пинг уходит через полный период, без очереди пропущенных
fn probe_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn cooled_down(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

/// Крутит сессию и пробу до отчёта или до фатальной ошибки
pub async fn drive(
    mut session: SignalingSession,
    mut probe: LatencyProbe,
    mut events: EventReceiver,
) -> Result<ProbeReport> {
    let period = probe.config().period();
    let cool_down = probe.config().cool_down;

    let mut sink: Option<ProbeSink> = None;
    let mut ticker: Option<Interval> = None;
    let mut deadline: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else {
                    return Err(Error::TransportClosed(Transport::EventQueue));
                };

                match handle_event(&mut session, &mut probe, sink.as_ref(), event).await {
                    Ok(Some(ready)) if sink.is_none() => {
                        let now = Instant::now();
                        probe.start(now);
                        ticker = Some(probe_ticker(now + period, period));
                        sink = Some(ready);
                    }
                    Ok(_) => {}
                    Err(e) if !e.is_fatal() => {
                        warn!(session = %session.id(), "Ignoring control message: {e}");
                    }
                    // Пинги уже отправлены: отчёт важнее оборванного транспорта
                    Err(e) if deadline.is_some() => {
                        warn!(session = %session.id(), "Transport lost during cool-down: {e}");
                        return Ok(probe.report());
                    }
                    Err(e) => {
                        error!(session = %session.id(), "Run aborted: {e}");
                        return Err(e);
                    }
                }
            }

            _ = next_tick(&mut ticker) => {
                let now = Instant::now();
                if let (Some(sink), Some(key)) = (sink.as_ref(), probe.next_probe(now)) {
                    sink.send(key).await?;
                }

                if probe.is_complete() {
                    ticker = None;
                    probe.finish(Instant::now());
                    info!(
                        "All {} pings sent, waiting {:?} for late replies",
                        probe.emitted(),
                        cool_down
                    );
                    deadline = Some(Box::pin(sleep(cool_down)));
                }
            }

            _ = cooled_down(&mut deadline) => {
                return Ok(probe.report());
            }
        }
    }
}

/// Возвращает транспорт для пингов, когда выбранный канал готов
async fn handle_event(
    session: &mut SignalingSession,
    probe: &mut LatencyProbe,
    sink: Option<&ProbeSink>,
    event: SessionEvent,
) -> Result<Option<ProbeSink>> {
    let transport = probe.config().transport;

    match event {
        SessionEvent::ControlOpened => {
            session.on_control_open().await?;
            if transport == ProbeTransport::Control {
                return Ok(Some(ProbeSink::Control(session.control())));
            }
        }
        SessionEvent::ControlMessage(text) => {
            if let Dispatch::PingReply(key) = session.on_control_message(&text).await? {
                record_reply(probe, sink, ProbeTransport::Control, &key);
            }
        }
        SessionEvent::LocalCandidate(candidate) => session.on_local_candidate(candidate).await?,
        SessionEvent::ChannelOpened => {
            let channel = session.on_channel_open().await?;
            if transport == ProbeTransport::DataChannel {
                return Ok(Some(ProbeSink::Channel(channel)));
            }
        }
        SessionEvent::ChannelMessage(key) => {
            record_reply(probe, sink, ProbeTransport::DataChannel, &key);
        }
        SessionEvent::ControlClosed => return Err(Error::TransportClosed(Transport::Control)),
        SessionEvent::ChannelClosed => return Err(Error::TransportClosed(Transport::DataChannel)),
        SessionEvent::PeerFailed => return Err(Error::TransportClosed(Transport::PeerConnection)),
    }
    Ok(None)
}

/// Ответ засчитывается только по тому же транспорту, по которому ушёл пинг
fn record_reply(
    probe: &mut LatencyProbe,
    sink: Option<&ProbeSink>,
    via: ProbeTransport,
    key: &str,
) {
    if sink.map(ProbeSink::transport) != Some(via) {
        debug!("Ignoring `{key}` received over {via}");
        return;
    }
    if let Some(latency) = probe.record_reply(key, Instant::now()) {
        debug!("ping {key}: {:?}", latency);
    }
}
