//! File-backed one-shot mailbox between a worker and its caller.
//!
//! Layout: `{dir}/{exchange}_{pair}_{nonce}.ipc`, one file per attempt.
//!
//! Content is `TAG + json + TAG`. Writes go to a sibling `.tmp` file that is
//! renamed into place, so a reader sees either nothing or the whole frame; the
//! tags still guard against foreign or truncated files. A file without both
//! tags reads as "not ready yet", never as corruption.
//!
//! Every I/O failure is retried with a delay of `base × n²`. Every
//! `heal_after` consecutive failures the directory is recreated, which covers
//! a channel directory removed out from under a running process.

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::ChannelConfig;
use crate::domain::{Exchange, Nonce, Pair};

/// Sentinel bracketing every payload.
pub const TAG: &str = "<<< JSON IPC >>>";

/// Failures after which a still-failing slot is reported as unexplained.
const LOUD_AFTER: u32 = 10;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot encode channel payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("channel {op} on {path} gave up after {attempts} attempt(s): {last_error}")]
    GaveUp {
        op: &'static str,
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },

    #[error("channel I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Identifies one attempt's slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub exchange: Exchange,
    /// Filesystem-safe pair token, e.g. `BTC-USD`.
    pub pair: String,
    pub nonce: Nonce,
}

impl ChannelKey {
    pub fn new(exchange: Exchange, pair: &Pair, nonce: Nonce) -> Self {
        Self {
            exchange,
            pair: pair.token(),
            nonce,
        }
    }

    /// Key from an already tokenized pair, as passed to a worker process.
    pub fn from_token(exchange: Exchange, pair_token: &str, nonce: Nonce) -> Self {
        Self {
            exchange,
            pair: pair_token.to_string(),
            nonce,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.ipc", self.exchange, self.pair, self.nonce)
    }
}

/// Retry discipline shared by read and write.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub heal_after: u32,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for RetryPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            heal_after: config.heal_after.max(1),
            max_attempts: config.max_attempts,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_mul(attempt))
    }
}

/// The mailbox directory plus its retry policy.
#[derive(Debug, Clone)]
pub struct Channel {
    dir: PathBuf,
    policy: RetryPolicy,
}

impl Channel {
    pub fn new(dir: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(&config.dir, RetryPolicy::from(config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create the directory up front so the first write does not pay for a heal.
    pub fn prepare(&self) -> Result<(), ChannelError> {
        fs::create_dir_all(&self.dir).map_err(|source| ChannelError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn path(&self, key: &ChannelKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn tmp_path(&self, key: &ChannelKey) -> PathBuf {
        self.dir.join(format!(".{}.tmp", key.file_name()))
    }

    /// Frame `payload` and publish it under `key`.
    ///
    /// Only an encoding error, or a bounded policy running out, is returned.
    pub fn write<T: Serialize + ?Sized>(&self, key: &ChannelKey, payload: &T) -> Result<(), ChannelError> {
        let framed = frame(&serde_json::to_string(payload)?);
        let path = self.path(key);
        let tmp = self.tmp_path(key);
        self.with_retry("write", &path, || {
            fs::write(&tmp, framed.as_bytes()).map_err(|e| e.to_string())?;
            fs::rename(&tmp, &path).map_err(|e| e.to_string())
        })
    }

    /// Wait for a complete frame under `key` and return its payload.
    ///
    /// The writer must already have been started; otherwise this blocks until
    /// the policy runs out (forever when unbounded).
    pub fn read(&self, key: &ChannelKey) -> Result<Value, ChannelError> {
        let path = self.path(key);
        self.with_retry("read", &path, || {
            let text = fs::read_to_string(&path).map_err(|e| e.to_string())?;
            unframe(&text).ok_or_else(|| "frame incomplete".to_string())
        })
    }

    /// One look at the slot: `None` if missing or not yet complete.
    pub fn try_read(&self, key: &ChannelKey) -> Result<Option<Value>, ChannelError> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(unframe(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ChannelError::Io { path, source }),
        }
    }

    /// Remove the slot. Absent slots are not an error.
    pub fn delete(&self, key: &ChannelKey) -> Result<(), ChannelError> {
        for path in [self.path(key), self.tmp_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(ChannelError::Io { path, source }),
            }
        }
        Ok(())
    }

    fn with_retry<T>(
        &self,
        op: &'static str,
        path: &Path,
        mut step: impl FnMut() -> Result<T, String>,
    ) -> Result<T, ChannelError> {
        let mut failures = 0u32;
        loop {
            let last_error = match step() {
                Ok(value) => {
                    if failures >= self.policy.heal_after {
                        info!("channel {op} on {} recovered after {failures} failure(s)", path.display());
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            failures += 1;

            if failures == 1 {
                debug!("channel {op} on {} not ready: {last_error}", path.display());
            }
            if failures % self.policy.heal_after == 0 {
                match fs::create_dir_all(&self.dir) {
                    Ok(()) => info!("channel directory {} recreated", self.dir.display()),
                    Err(e) => warn!("channel directory {} cannot be created: {e}", self.dir.display()),
                }
            }
            if failures == LOUD_AFTER {
                warn!(
                    "channel {op} on {} still failing after {failures} attempts: {last_error}",
                    path.display()
                );
            }
            if let Some(max) = self.policy.max_attempts {
                if failures >= max {
                    return Err(ChannelError::GaveUp {
                        op,
                        path: path.to_path_buf(),
                        attempts: failures,
                        last_error,
                    });
                }
            }
            std::thread::sleep(self.policy.delay(failures));
        }
    }
}

fn frame(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + 2 * TAG.len());
    out.push_str(TAG);
    out.push_str(json);
    out.push_str(TAG);
    out
}

/// Payload between the leading and trailing tag, if both are present and it
/// parses. The payload itself may contain `TAG`.
fn unframe(text: &str) -> Option<Value> {
    let body = text.strip_prefix(TAG)?.strip_suffix(TAG)?;
    serde_json::from_str(body).ok()
}
