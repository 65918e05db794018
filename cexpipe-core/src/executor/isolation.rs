//! Attempt isolation.
//!
//! An attempt runs either on a dedicated thread or in a child process. In
//! both cases the worker performs the network call and publishes the result
//! to the Channel; the caller only learns whether that happened before the
//! deadline.
//!
//! A timed-out thread cannot be stopped, so it is abandoned: a shared handoff
//! flag guarantees it never publishes after the caller gave up on it. A write
//! already under way when the caller gives up is removed once it returns. A
//! timed-out process is killed and reaped.

use log::debug;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::transport::Transport;
use crate::channel::{Channel, ChannelKey};
use crate::config::{ConfigError, ExecutorConfig, IsolationMode};
use crate::domain::WireRequest;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Program and leading arguments for process isolation. The executor
/// appends `--channel-dir D --exchange E --pair P --nonce N` and writes the
/// wire request as JSON to the child's stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Isolation {
    Thread,
    Process(WorkerCommand),
}

impl Isolation {
    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ConfigError> {
        match config.isolation {
            IsolationMode::Thread => Ok(Isolation::Thread),
            IsolationMode::Process => {
                let program = config.worker_program.clone().ok_or_else(|| {
                    ConfigError::Invalid("process isolation requires a worker program".into())
                })?;
                Ok(Isolation::Process(WorkerCommand {
                    program,
                    args: config.worker_args.clone(),
                }))
            }
        }
    }
}

/// How one attempt ended, from the caller's side.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptResult {
    /// The worker published a delivery.
    Completed,
    /// The worker ended without publishing.
    Failed(String),
    /// The deadline passed first.
    TimedOut,
}

#[derive(Debug, Default)]
struct Handoff {
    delivered: bool,
    abandoned: bool,
}

fn lock(handoff: &Mutex<Handoff>) -> MutexGuard<'_, Handoff> {
    handoff.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn run_in_thread(
    transport: Arc<dyn Transport>,
    channel: &Channel,
    key: &ChannelKey,
    wire: WireRequest,
    timeout: Duration,
) -> AttemptResult {
    let handoff = Arc::new(Mutex::new(Handoff::default()));
    let (tx, rx) = mpsc::sync_channel::<Result<(), String>>(1);

    let worker_handoff = Arc::clone(&handoff);
    let worker_channel = channel.clone();
    let worker_key = key.clone();
    let spawned = thread::Builder::new()
        .name(format!("cexpipe-attempt-{}", key.nonce))
        .spawn(move || {
            let report = match transport.send(&wire) {
                Ok(delivery) => {
                    if lock(&worker_handoff).abandoned {
                        return;
                    }
                    // The lock is never held across the write; the caller
                    // must be able to give up while it is still retrying.
                    let written = worker_channel.write(&worker_key, &delivery);
                    let mut slot = lock(&worker_handoff);
                    if slot.abandoned {
                        drop(slot);
                        if written.is_ok() {
                            if let Err(e) = worker_channel.delete(&worker_key) {
                                debug!("cannot remove abandoned slot {}: {e}", worker_key.file_name());
                            }
                        }
                        return;
                    }
                    match written {
                        Ok(()) => {
                            slot.delivered = true;
                            Ok(())
                        }
                        Err(e) => Err(e.to_string()),
                    }
                }
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send(report);
        });
    if let Err(e) = spawned {
        return AttemptResult::Failed(format!("cannot spawn worker thread: {e}"));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => AttemptResult::Completed,
        Ok(Err(e)) => AttemptResult::Failed(e),
        Err(RecvTimeoutError::Timeout) => {
            let mut slot = lock(&handoff);
            if slot.delivered {
                AttemptResult::Completed
            } else {
                slot.abandoned = true;
                AttemptResult::TimedOut
            }
        }
        Err(RecvTimeoutError::Disconnected) => {
            if lock(&handoff).delivered {
                AttemptResult::Completed
            } else {
                AttemptResult::Failed("worker thread ended without reporting".into())
            }
        }
    }
}

pub(crate) fn run_in_process(
    command: &WorkerCommand,
    channel: &Channel,
    key: &ChannelKey,
    wire: &WireRequest,
    timeout: Duration,
) -> AttemptResult {
    let input = match serde_json::to_vec(wire) {
        Ok(bytes) => bytes,
        Err(e) => return AttemptResult::Failed(format!("cannot encode wire request: {e}")),
    };

    let mut child = match Command::new(&command.program)
        .args(&command.args)
        .arg("--channel-dir")
        .arg(channel.dir())
        .arg("--exchange")
        .arg(key.exchange.as_str())
        .arg("--pair")
        .arg(&key.pair)
        .arg("--nonce")
        .arg(key.nonce.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return AttemptResult::Failed(format!(
                "cannot spawn worker {}: {e}",
                command.program.display()
            ))
        }
    };

    // Fed from a helper thread so a worker that never reads cannot stall the deadline.
    if let Some(mut stdin) = child.stdin.take() {
        thread::spawn(move || {
            if let Err(e) = stdin.write_all(&input) {
                debug!("worker stdin closed early: {e}");
            }
        });
    }

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return AttemptResult::Completed,
            Ok(Some(status)) => return AttemptResult::Failed(format!("worker exited with {status}")),
            Ok(None) => {}
            Err(e) => {
                reap(&mut child);
                return AttemptResult::Failed(format!("cannot poll worker: {e}"));
            }
        }
        let now = Instant::now();
        if now >= deadline {
            reap(&mut child);
            return AttemptResult::TimedOut;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill and wait for `child`, leaving a trace when either step fails.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("cannot kill worker {}: {e}", child.id());
    }
    if let Err(e) = child.wait() {
        debug!("cannot reap worker {}: {e}", child.id());
    }
}
