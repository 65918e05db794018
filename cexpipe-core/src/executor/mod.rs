//! Durable request executor.
//!
//! One logical call runs up to `attempts` strictly sequential attempts. Each
//! attempt gets a fresh nonce (and so a fresh Channel slot), is finalized and
//! signed by the adapter, and runs isolated under a hard deadline. A worker
//! that finishes in time publishes its result to the Channel; a worker that
//! fails or times out is retried after `i² × backoff_unit`.
//!
//! After the loop the last attempt's slot is read exactly once and deleted.
//! The result is an explicit `CallOutcome`, so "nothing came back" and "every
//! attempt failed" stay distinguishable.

pub mod circuit_breaker;
pub mod isolation;
pub mod transport;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use isolation::{Isolation, WorkerCommand};
pub use transport::{Delivery, HttpTransport, Transport, TransportError};

use log::{debug, error, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::Adapter;
use crate::channel::{Channel, ChannelKey};
use crate::config::{CexConfig, Credentials, ExecutorConfig};
use crate::domain::{Nonce, RequestDescriptor};
use crate::error::CexError;
use isolation::AttemptResult;

/// Timing knobs for one executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub timeout: Duration,
    pub attempts: u32,
    pub backoff_unit: Duration,
    pub pace: Duration,
}

impl From<&ExecutorConfig> for ExecutorSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            attempts: config.attempts.max(1),
            backoff_unit: config.backoff_unit(),
            pace: config.pace(),
        }
    }
}

impl ExecutorSettings {
    /// Sleep after failed attempt `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(attempt.saturating_mul(attempt))
    }
}

/// Result of one logical call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// An attempt completed with a non-empty JSON payload.
    Data(Value),
    /// An attempt completed but the payload was null or empty.
    Empty,
    /// The venue refused the request; not retried.
    Rejected { status: u16, body: String },
    /// No attempt completed.
    Exhausted { attempts: u32, last_error: String },
}

impl CallOutcome {
    /// `Some(payload)` for data, `None` for an empty success, an error otherwise.
    pub fn into_payload(self) -> Result<Option<Value>, CexError> {
        match self {
            CallOutcome::Data(v) => Ok(Some(v)),
            CallOutcome::Empty => Ok(None),
            CallOutcome::Rejected { status, body } => Err(CexError::Rejected { status, body }),
            CallOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(CexError::Exhausted {
                attempts,
                last_error,
            }),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, CallOutcome::Exhausted { .. })
    }
}

/// Terminal state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub nonce: Nonce,
    pub state: AttemptState,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Outcome plus a per-attempt trace.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReport {
    pub outcome: CallOutcome,
    pub attempts: Vec<AttemptRecord>,
}

pub struct Executor {
    settings: ExecutorSettings,
    isolation: Isolation,
    channel: Channel,
    transport: Arc<dyn Transport>,
    credentials: Option<Credentials>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl Executor {
    pub fn new(
        settings: ExecutorSettings,
        isolation: Isolation,
        channel: Channel,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            isolation,
            channel,
            transport,
            credentials: None,
            breaker: None,
        }
    }

    /// Executor wired from configuration. The Channel directory is created
    /// up front.
    pub fn from_config(config: &CexConfig, transport: Arc<dyn Transport>) -> Result<Self, CexError> {
        let channel = Channel::from_config(&config.channel);
        channel.prepare()?;
        let mut executor = Self::new(
            ExecutorSettings::from(&config.executor),
            Isolation::from_config(&config.executor)?,
            channel,
            transport,
        );
        executor.breaker = CircuitBreaker::from_config(&config.breaker).map(Arc::new);
        Ok(executor)
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Run one logical call and return only its outcome.
    pub fn call(&self, adapter: &dyn Adapter, template: &RequestDescriptor) -> Result<CallOutcome, CexError> {
        self.execute(adapter, template).map(|report| report.outcome)
    }

    /// Run one logical call.
    ///
    /// Errors are reserved for problems no retry can fix: an open breaker,
    /// an adapter that cannot finalize the request, or a Channel that gave up.
    pub fn execute(&self, adapter: &dyn Adapter, template: &RequestDescriptor) -> Result<CallReport, CexError> {
        if let Some(breaker) = &self.breaker {
            if !breaker.is_allowed() {
                return Err(CexError::CircuitOpen {
                    remaining_secs: breaker.remaining_cooldown().as_secs(),
                });
            }
        }

        let label = format!(
            "{} {} {}",
            template.exchange,
            template.pair,
            template.operation.name()
        );
        let total = self.settings.attempts.max(1);
        let mut records = Vec::with_capacity(total as usize);
        let mut last_key = None;
        let mut last_error = String::from("no attempt made");
        let mut completed = false;

        for attempt in 1..=total {
            let nonce = Nonce::next();
            let mut descriptor = template.clone();
            descriptor.nonce = Some(nonce);
            descriptor.timeout = self.settings.timeout;
            let key = ChannelKey::new(descriptor.exchange, &descriptor.pair, nonce);
            let wire = adapter.finalize(&descriptor, self.credentials.as_ref())?;

            if !self.settings.pace.is_zero() {
                std::thread::sleep(self.settings.pace);
            }
            debug!("{label}: attempt {attempt}/{total} running (nonce {nonce})");

            let started = Instant::now();
            let result = match &self.isolation {
                Isolation::Thread => isolation::run_in_thread(
                    Arc::clone(&self.transport),
                    &self.channel,
                    &key,
                    wire,
                    self.settings.timeout,
                ),
                Isolation::Process(command) => isolation::run_in_process(
                    command,
                    &self.channel,
                    &key,
                    &wire,
                    self.settings.timeout,
                ),
            };
            let (state, error) = match result {
                AttemptResult::Completed => (AttemptState::Completed, None),
                AttemptResult::Failed(e) => (AttemptState::Failed, Some(e)),
                AttemptResult::TimedOut => (
                    AttemptState::TimedOut,
                    Some(format!("timed out after {:?}", self.settings.timeout)),
                ),
            };
            records.push(AttemptRecord {
                attempt,
                nonce,
                state,
                error: error.clone(),
                elapsed: started.elapsed(),
            });
            last_key = Some(key.clone());

            if state == AttemptState::Completed {
                debug!("{label}: attempt {attempt}/{total} completed");
                completed = true;
                break;
            }
            last_error = error.unwrap_or_default();
            warn!("{label}: attempt {attempt}/{total} {state:?}: {last_error}");

            if attempt < total {
                // The worker is dead or abandoned; its slot can go now.
                self.discard(&key);
                std::thread::sleep(self.settings.backoff(attempt));
            }
        }

        let Some(key) = last_key else {
            return Ok(CallReport {
                outcome: CallOutcome::Exhausted {
                    attempts: 0,
                    last_error,
                },
                attempts: records,
            });
        };

        let payload = if completed {
            self.channel.read(&key).map(Some)
        } else {
            self.channel.try_read(&key)
        };
        self.discard(&key);

        let outcome = match payload? {
            Some(raw) => match serde_json::from_value::<Delivery>(raw) {
                Ok(Delivery::Ok(value)) if is_empty_payload(&value) => CallOutcome::Empty,
                Ok(Delivery::Ok(value)) => CallOutcome::Data(value),
                Ok(Delivery::Rejected { status, body }) => CallOutcome::Rejected { status, body },
                Err(e) => CallOutcome::Exhausted {
                    attempts: records.len() as u32,
                    last_error: format!("unreadable delivery: {e}"),
                },
            },
            None => CallOutcome::Exhausted {
                attempts: records.len() as u32,
                last_error,
            },
        };

        if let CallOutcome::Exhausted { attempts, last_error } = &outcome {
            error!("{label}: exhausted after {attempts} attempt(s): {last_error}");
        }
        self.record(&outcome);

        Ok(CallReport {
            outcome,
            attempts: records,
        })
    }

    fn discard(&self, key: &ChannelKey) {
        if let Err(e) = self.channel.delete(key) {
            warn!("cannot delete channel slot {}: {e}", key.file_name());
        }
    }

    fn record(&self, outcome: &CallOutcome) {
        let Some(breaker) = &self.breaker else {
            return;
        };
        match outcome {
            CallOutcome::Data(_) | CallOutcome::Empty => breaker.record_success(),
            CallOutcome::Rejected { status: 403, .. } => breaker.trip(),
            CallOutcome::Rejected { .. } => {}
            CallOutcome::Exhausted { .. } => breaker.record_failure(),
        }
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_is_quadratic() {
        let settings = ExecutorSettings {
            timeout: Duration::from_secs(1),
            attempts: 3,
            backoff_unit: Duration::from_millis(10),
            pace: Duration::ZERO,
        };
        assert_eq!(settings.backoff(1), Duration::from_millis(10));
        assert_eq!(settings.backoff(2), Duration::from_millis(40));
        assert_eq!(settings.backoff(3), Duration::from_millis(90));
    }

    #[test]
    fn empty_payload_detection() {
        assert!(is_empty_payload(&json!(null)));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!([0])));
        assert!(!is_empty_payload(&json!(0)));
    }

    #[test]
    fn outcome_maps_to_errors() {
        assert_eq!(CallOutcome::Data(json!(1)).into_payload().unwrap(), Some(json!(1)));
        assert_eq!(CallOutcome::Empty.into_payload().unwrap(), None);
        assert!(matches!(
            CallOutcome::Exhausted { attempts: 3, last_error: "x".into() }.into_payload(),
            Err(CexError::Exhausted { attempts: 3, .. })
        ));
        assert!(matches!(
            CallOutcome::Rejected { status: 400, body: String::new() }.into_payload(),
            Err(CexError::Rejected { status: 400, .. })
        ));
    }

    #[test]
    fn settings_from_config() {
        let settings = ExecutorSettings::from(&ExecutorConfig::default());
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.attempts, 10);
    }
}
