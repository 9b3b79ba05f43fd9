#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

use crate::Result;
use crate::error::Error;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(25);
const DEFAULT_HEARTBEAT_TIMEOUT_TICKS: u32 = 2;
const DEFAULT_ACK_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Parameters sent while dialing.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct DialParams {
    /// Namespace to join on connect. Empty means the default namespace and sends no
    /// namespace-open frame; anything else, `/` included, is joined explicitly.
    #[builder(default, into)]
    pub nsp: String,
}

impl DialParams {
    /// Shorthand for joining `nsp` on connect.
    #[must_use]
    pub fn with_nsp<S: Into<String>>(nsp: S) -> Self {
        Self { nsp: nsp.into() }
    }
}

/// Session behavior for a [`Client`](super::Client).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between pings
    pub heartbeat_interval: Duration,
    /// The session is considered dead after this many intervals without a pong
    pub heartbeat_timeout_ticks: u32,
    /// Default wait for [`Client::emit_with_ack`](super::Client::emit_with_ack)
    pub ack_timeout: Duration,
    /// Reconnection strategy used by `redial`
    pub reconnect: ReconnectConfig,
    /// Redial automatically when a session dies with an error
    pub auto_reconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_timeout_ticks: DEFAULT_HEARTBEAT_TIMEOUT_TICKS,
            ack_timeout: DEFAULT_ACK_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
            auto_reconnect: false,
        }
    }
}

impl Config {
    /// Silence after which the pinger declares the connection dead.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.heartbeat_timeout_ticks)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::validation("heartbeat_interval must be non-zero"));
        }
        if self.heartbeat_timeout_ticks == 0 {
            return Err(Error::validation("heartbeat_timeout_ticks must be at least 1"));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(Error::validation("reconnect.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for reconnection behavior.
///
/// Reconnection is bounded: after `max_attempts` consecutive failures `redial`
/// gives up and returns the last error wrapped in
/// [`ReconnectExhausted`](crate::error::ReconnectExhausted).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of connection attempts per `redial` call
    pub max_attempts: u32,
    /// Initial backoff duration after the first failed attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // Attempts are bounded by max_attempts instead
            .build()
    }
}
