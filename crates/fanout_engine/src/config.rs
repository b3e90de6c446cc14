//! Engine configuration and surfaced constants.

use std::str::FromStr;
use std::time::Duration;

use fanout_net::jetstream::NATS_URL_ENV;
use fanout_net::routing::EXCHANGE_NAME;
use tracing::warn;

/// How long a receive waits for a message by default.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Target end-to-end latency from publish to receive. A design target, not
/// an enforced bound.
pub const MAX_LATENCY: Duration = Duration::from_millis(200);

/// A subscription idle for this many receive timeouts is considered stale.
pub const STALE_TIMEOUT_MULTIPLIER: u32 = 4;

/// Queues are kept by the substrate across restarts.
pub const SUPPORTS_PERMANENT_SUBSCRIPTIONS: bool = true;

/// The environment variable the deployment environment is read from.
pub const ENVIRONMENT_ENV: &str = "FANOUT_ENV";

/// Deployment environment. Anything but production keeps an in-memory
/// index of created subscriptions for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// No introspection index.
    Production,
    /// Introspection index enabled.
    #[default]
    Development,
    /// Introspection index enabled; test reset allowed.
    Test,
}

impl Environment {
    /// Whether this is a production deployment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Configuration for a [`PubSubEngine`](crate::PubSubEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delivery substrate URL. `None` leaves the engine disabled.
    pub url: Option<String>,
    /// Name of the direct exchange.
    pub exchange: String,
    /// How long [`receive`](crate::PubSubEngine::receive) waits.
    pub receive_timeout: Duration,
    /// Deployment environment.
    pub environment: Environment,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Defaults: no substrate, `nitrogen` exchange, five minute receive
    /// timeout, development environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: None,
            exchange: EXCHANGE_NAME.to_string(),
            receive_timeout: RECEIVE_TIMEOUT,
            environment: Environment::default(),
        }
    }

    /// Read `NATS_URL` and `FANOUT_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(NATS_URL_ENV).ok().as_deref(),
            std::env::var(ENVIRONMENT_ENV).ok().as_deref(),
        )
    }

    /// Build from raw `NATS_URL` and `FANOUT_ENV` values. A blank URL leaves
    /// the engine disabled; an unknown environment is ignored with a warning.
    #[must_use]
    pub fn from_values(url: Option<&str>, environment: Option<&str>) -> Self {
        let mut config = Self::new();
        config.url = url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        if let Some(raw) = environment {
            match raw.parse() {
                Ok(environment) => config.environment = environment,
                Err(err) => warn!(%err, "ignoring {ENVIRONMENT_ENV}"),
            }
        }
        config
    }

    /// Set the substrate URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Override the exchange name.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Override the receive timeout.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the deployment environment.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Idle time after which a subscription is considered stale.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.receive_timeout * STALE_TIMEOUT_MULTIPLIER
    }
}
