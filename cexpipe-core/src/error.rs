//! Top-level error type.
//!
//! Each subsystem has its own error enum; they all convert into `CexError`,
//! which is what the `Market` facade and the candle pipeline return.

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::executor::TransportError;

#[derive(Debug, Error)]
pub enum CexError {
    #[error("invalid pair '{0}': expected ASSET:CURRENCY")]
    InvalidPair(String),

    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every attempt failed or timed out.
    #[error("retries exhausted after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The venue answered with a non-retryable status.
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The call succeeded but carried nothing usable.
    #[error("no data returned for {0}")]
    NoData(String),

    #[error("hard stop: circuit breaker open ({remaining_secs}s of cooldown left)")]
    CircuitOpen { remaining_secs: u64 },

    #[error("candle pipeline gave up after {restarts} restart(s): {last_error}")]
    PipelineAborted { restarts: u32, last_error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CexError {
    /// Errors that cannot improve on a retry of the same request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CexError::InvalidPair(_)
                | CexError::UnknownExchange(_)
                | CexError::Adapter(AdapterError::Unsupported { .. })
                | CexError::Adapter(AdapterError::MissingCredentials(_))
                | CexError::Adapter(AdapterError::NoSandbox(_))
                | CexError::Config(_)
                | CexError::CircuitOpen { .. }
        )
    }
}
