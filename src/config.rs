// Конфигурация приложения
use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

// Фильтр логирования по умолчанию, если RUST_LOG не задан

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "dcping=debug,dcping_lib=debug,warn"; // В режиме отладки подробный лог

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "dcping=info,dcping_lib=info,error"; // В продакшене только главное

/// Адрес сигнального сервера по умолчанию
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080";

/// STUN-сервер для обнаружения внешнего адреса
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Метка data channel, её же ждёт сервер
pub const DATA_CHANNEL_LABEL: &str = "dc";

pub const PINGS_PER_SECOND: u32 = 20;
pub const SECONDS_TO_PING: u32 = 20;

/// Сколько ждать опоздавшие ответы после последнего пинга
pub const COOL_DOWN: Duration = Duration::from_secs(10);

/// Переменная окружения для выбора транспорта пингов
pub const PROBE_TRANSPORT_ENV: &str = "DCPING_PROBE_TRANSPORT";

/// По какому каналу гоняем пинги
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeTransport {
    /// Ненадёжный неупорядоченный data channel
    #[default]
    DataChannel,
    /// Деградированный режим: сам сигнальный WebSocket
    Control,
}

impl fmt::Display for ProbeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeTransport::DataChannel => f.write_str("datachannel"),
            ProbeTransport::Control => f.write_str("control"),
        }
    }
}

impl FromStr for ProbeTransport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "datachannel" | "dc" => Ok(ProbeTransport::DataChannel),
            "control" | "websocket" | "ws" => Ok(ProbeTransport::Control),
            other => Err(Error::Config(format!("unknown probe transport `{other}`"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Пингов в секунду
    pub rate: u32,
    /// Длительность прогона в секундах
    pub duration_secs: u32,
    pub cool_down: Duration,
    pub transport: ProbeTransport,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            rate: PINGS_PER_SECOND,
            duration_secs: SECONDS_TO_PING,
            cool_down: COOL_DOWN,
            transport: ProbeTransport::default(),
        }
    }
}

impl ProbeConfig {
    /// Сколько всего пингов будет отправлено
    pub fn total_samples(&self) -> u64 {
        u64::from(self.rate) * u64::from(self.duration_secs)
    }

    /// Период таймера между пингами
    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.rate.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(Error::Config("probe rate must be positive".into()));
        }
        if self.duration_secs == 0 {
            return Err(Error::Config("probe duration must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub ice_servers: Vec<ServerConfig>,
    pub probe: ProbeConfig,
}

impl Config {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            ice_servers: vec![ServerConfig::stun("default-stun", DEFAULT_STUN_SERVER)],
            probe: ProbeConfig::default(),
        }
    }

    /// Переопределения из окружения (только транспорт пингов)
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(PROBE_TRANSPORT_ENV) {
            self.probe.transport = value.parse()?;
        }
        Ok(self)
    }

    /// Проверка перед запуском: схема адреса, ICE серверы, параметры пингов
    pub fn validate(&self) -> Result<()> {
        match self.endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::Config(format!(
                    "signaling endpoint must be ws:// or wss://, got `{other}://`"
                )))
            }
        }

        if self.ice_servers.is_empty() {
            return Err(Error::Config("at least one ICE server is required".into()));
        }

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!("ICE server `{}` has an empty url", server.id)));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::Config(format!(
                    "TURN server `{}` requires username and credential",
                    server.id
                )));
            }
        }

        self.probe.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        let endpoint = Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid url");
        Self::new(endpoint)
    }
}
