use std::env;
use std::time::Duration;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/session";

/// Connection settings for [`super::RelayClient`]. A client never connects
/// on construction; callers decide when presence begins.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub reconnection: bool,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    /// Handshake timeout
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnection: true,
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::new(env::var("RELAY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()));

        Self {
            reconnection_attempts: env_parse("RELAY_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.reconnection_attempts),
            reconnection_delay: env_parse("RELAY_RECONNECT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnection_delay),
            reconnection_delay_max: env_parse("RELAY_RECONNECT_DELAY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnection_delay_max),
            timeout: env_parse("RELAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            ..defaults
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based): doubles from
    /// `reconnection_delay`, capped at `reconnection_delay_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.reconnection_delay
            .saturating_mul(factor)
            .min(self.reconnection_delay_max)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparsable client setting");
            None
        }
    }
}
