//! Caller-driven reconnection with exponential backoff.
//!
//! The session never reconnects on its own. A caller that wants to survive
//! server restarts runs [`reconnect_loop`] after observing `ConnectionLost`;
//! [`ReconnectState`] computes exponentially increasing delays with jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::SessionError;
use crate::packets::Connected;
use crate::session::{ConnectionInfo, Session};

/// Configuration for reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between reconnection attempts. Default: 30 s.
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts before giving up. Default: 20.
    pub max_attempts: u32,
    /// Jitter factor (0.0–1.0). Applied as ±jitter to the delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

/// Tracks reconnection attempt count and computes the next backoff delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    /// Create a new state from the given config.
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    /// Returns `None` once max attempts have been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        let jittered = if self.config.jitter > 0.0 {
            let mut rng = rand::rng();
            let factor =
                rng.random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.config.backoff_multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    /// Reset after a successful reconnection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Errors produced by [`reconnect_loop`].
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// All configured attempts were used without success.
    #[error("maximum reconnection attempts exhausted")]
    MaxAttemptsExhausted,
    /// The server or the address rejected the attempt; retrying cannot help.
    #[error("reconnection rejected: {0}")]
    Rejected(SessionError),
}

/// Whether a failed connect is worth retrying.
fn is_retryable(error: &SessionError) -> bool {
    !matches!(
        error,
        SessionError::ConnectionRefused(_)
            | SessionError::InvalidAddress(_)
            | SessionError::Encode(_)
    )
}

/// Connect `session` to `address`, retrying with backoff.
///
/// Every attempt, including the first, waits for the next backoff delay.
/// Refusals and invalid addresses end the loop immediately.
pub async fn reconnect_loop(
    session: &mut Session,
    address: &str,
    info: &ConnectionInfo,
    config: ReconnectConfig,
) -> Result<Connected, ReconnectError> {
    let mut state = ReconnectState::new(config);

    loop {
        let Some(delay) = state.next_delay() else {
            return Err(ReconnectError::MaxAttemptsExhausted);
        };
        tracing::info!(attempt = state.attempts(), ?delay, "reconnecting");
        tokio::time::sleep(delay).await;

        match session.connect(address, info).await {
            Ok(connected) => {
                tracing::info!(attempts = state.attempts(), "reconnected");
                return Ok(connected);
            }
            Err(error) if is_retryable(&error) => {
                tracing::warn!(attempt = state.attempts(), %error, "reconnection attempt failed");
            }
            Err(error) => return Err(ReconnectError::Rejected(error)),
        }
    }
}
