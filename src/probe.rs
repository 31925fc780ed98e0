use crate::config::{ProbeConfig, ProbeTransport};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Время отправки и измеренная задержка по ключу пинга.
/// Записи только добавляются; за ограниченный прогон это допустимо.
#[derive(Debug, Default)]
pub struct ProbeRecord {
    sent_at: HashMap<String, Instant>,
    latency: HashMap<String, Duration>,
}

impl ProbeRecord {
    pub fn sent_at(&self, key: &str) -> Option<Instant> {
        self.sent_at.get(key).copied()
    }

    pub fn latency(&self, key: &str) -> Option<Duration> {
        self.latency.get(key).copied()
    }
}

pub struct LatencyProbe {
    config: ProbeConfig,
    record: ProbeRecord,
    next_seq: u64,
    started_at: Option<Instant>,
    total_elapsed: Option<Duration>,
}

impl LatencyProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            record: ProbeRecord::default(),
            next_seq: 0,
            started_at: None,
            total_elapsed: None,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn record(&self) -> &ProbeRecord {
        &self.record
    }

    pub fn emitted(&self) -> u64 {
        self.next_seq
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.next_seq >= self.config.total_samples()
    }

    pub fn start(&mut self, now: Instant) {
        info!(
            "Starting latency probe over {}: {} pings at {}/s",
            self.config.transport,
            self.config.total_samples(),
            self.config.rate
        );
        self.started_at = Some(now);
    }

    /// Следующий ключ; время отправки фиксируется до передачи
    pub fn next_probe(&mut self, now: Instant) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        let key = self.next_seq.to_string();
        self.next_seq += 1;
        self.record.sent_at.insert(key.clone(), now);
        Some(key)
    }

    /// Ответ на ранее отправленный ключ. Повтор и чужие ключи игнорируются.
    pub fn record_reply(&mut self, key: &str, now: Instant) -> Option<Duration> {
        let Some(sent_at) = self.record.sent_at(key) else {
            debug!("Reply for unknown probe key `{key}`");
            return None;
        };
        if self.record.latency.contains_key(key) {
            debug!("Duplicate reply for probe key `{key}`");
            return None;
        }

        let elapsed = now.saturating_duration_since(sent_at);
        self.record.latency.insert(key.to_string(), elapsed);
        Some(elapsed)
    }

    /// Таймер остановлен: фиксируем общее время прогона
    pub fn finish(&mut self, now: Instant) -> Duration {
        let total = self
            .started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        info!("total time: {:.3}ms", as_millis(total));
        self.total_elapsed = Some(total);
        total
    }

    pub fn report(&self) -> ProbeReport {
        let samples = (0..self.next_seq)
            .map(|seq| self.record.latency(&seq.to_string()))
            .collect();
        ProbeReport {
            transport: self.config.transport,
            samples,
            total_elapsed: self.total_elapsed.unwrap_or_default(),
        }
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Итог прогона: задержка каждого пинга в порядке отправки, `None` = потерян
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub transport: ProbeTransport,
    pub samples: Vec<Option<Duration>>,
    pub total_elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
}

impl ProbeReport {
    pub fn received(&self) -> usize {
        self.samples.iter().filter(|s| s.is_some()).count()
    }

    pub fn lost(&self) -> usize {
        self.samples.len() - self.received()
    }

    pub fn loss_percent(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.lost() as f64 * 100.0 / self.samples.len() as f64
    }

    pub fn summary(&self) -> Option<LatencySummary> {
        let received: Vec<Duration> = self.samples.iter().flatten().copied().collect();
        let min = received.iter().min().copied()?;
        let max = received.iter().max().copied()?;
        let total: Duration = received.iter().sum();
        Some(LatencySummary {
            min,
            mean: total / received.len() as u32,
            max,
        })
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (seq, sample) in self.samples.iter().enumerate() {
            match sample {
                Some(latency) => writeln!(f, "{seq}: {:.3}", as_millis(*latency))?,
                None => writeln!(f, "{seq}: undefined")?,
            }
        }
        write!(
            f,
            "latency over {}: {} sent, {} received, {:.1}% lost, total {:.3}ms",
            self.transport,
            self.samples.len(),
            self.received(),
            self.loss_percent(),
            as_millis(self.total_elapsed)
        )?;
        if let Some(s) = self.summary() {
            write!(
                f,
                "\nmin/avg/max = {:.3}/{:.3}/{:.3} ms",
                as_millis(s.min),
                as_millis(s.mean),
                as_millis(s.max)
            )?;
        }
        Ok(())
    }
}
