//! Concurrent command fan-out across targets with bounded parallelism.
//!
//! Tasks go into an explicit queue consumed by a fixed set of workers; the
//! dispatch call is the single completion barrier and returns only once
//! every task has been attempted. Per target, candidate endpoints are tried
//! in order until one succeeds; each individual attempt is wrapped in the
//! run's timeout. A timeout counts exactly like a non-zero exit: logged,
//! never raised, and no target's failure affects any other target.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clusterdump_types::Target;
use clusterdump_util::Transport;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default worker-pool width.
pub const DEFAULT_POOL_WIDTH: usize = 10;

/// What to do against one target.
#[derive(Debug, Clone)]
pub enum TaskCommand {
    /// Run a shell command on the target.
    Shell(String),
    /// Recursively copy a local directory's contents to the target.
    Push { local: PathBuf, remote: String },
    /// Copy a file from the target back to the operator's machine.
    Pull { remote: String, local: PathBuf },
    /// Run a local command and write its stdout to a file on the target.
    Pipe {
        local_command: String,
        remote_dir: String,
        remote_file: String,
    },
}

/// One queued unit of work: a target and the command to run against it.
#[derive(Debug, Clone)]
pub struct FanOutTask {
    pub target: Target,
    pub command: TaskCommand,
}

impl FanOutTask {
    pub fn shell(target: Target, command: impl Into<String>) -> Self {
        Self {
            target,
            command: TaskCommand::Shell(command.into()),
        }
    }

    pub fn push(target: Target, local: PathBuf, remote: impl Into<String>) -> Self {
        Self {
            target,
            command: TaskCommand::Push {
                local,
                remote: remote.into(),
            },
        }
    }

    pub fn pull(target: Target, remote: impl Into<String>, local: PathBuf) -> Self {
        Self {
            target,
            command: TaskCommand::Pull {
                remote: remote.into(),
                local,
            },
        }
    }

    pub fn pipe(target: Target, local_command: String, remote_dir: String, remote_file: String) -> Self {
        Self {
            target,
            command: TaskCommand::Pipe {
                local_command,
                remote_dir,
                remote_file,
            },
        }
    }
}

/// Outcome of one task after endpoint retries.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub target: String,
    pub succeeded: bool,
}

/// Per-target outcomes of one dispatch batch.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl FanOutReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.succeeded)
    }

    pub fn succeeded(&self, target: &str) -> bool {
        self.outcomes.iter().any(|o| o.target == target && o.succeeded)
    }

    pub fn failed_targets(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter(|o| !o.succeeded).map(|o| o.target.as_str())
    }
}

/// Bounded fan-out pool over a shared transport.
pub struct FanOut {
    transport: Arc<dyn Transport>,
    attempt_timeout: Duration,
    width: usize,
}

impl FanOut {
    pub fn new(transport: Arc<dyn Transport>, attempt_timeout: Duration, width: usize) -> Self {
        Self {
            transport,
            attempt_timeout,
            width: width.max(1),
        }
    }

    /// Dispatch all tasks and wait for every attempt to finish.
    pub async fn dispatch(&self, tasks: Vec<FanOutTask>) -> FanOutReport {
        if tasks.is_empty() {
            return FanOutReport::default();
        }

        let workers = self.width.min(tasks.len());
        let queue: Arc<Mutex<VecDeque<FanOutTask>>> = Arc::new(Mutex::new(tasks.into()));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let transport = Arc::clone(&self.transport);
            let outcome_tx = outcome_tx.clone();
            let attempt_timeout = self.attempt_timeout;
            handles.push(tokio::spawn(async move {
                loop {
                    let task = queue.lock().expect("fan-out queue lock poisoned").pop_front();
                    let Some(task) = task else { break };
                    let succeeded = attempt_target(transport.as_ref(), &task, attempt_timeout).await;
                    let _ = outcome_tx.send(TargetOutcome {
                        target: task.target.id,
                        succeeded,
                    });
                }
            }));
        }
        drop(outcome_tx);

        // Completion barrier: nothing returns until every worker drained out.
        for handle in handles {
            let _ = handle.await;
        }

        let mut outcomes = Vec::new();
        while let Ok(outcome) = outcome_rx.try_recv() {
            outcomes.push(outcome);
        }
        FanOutReport { outcomes }
    }
}

async fn attempt_target(transport: &dyn Transport, task: &FanOutTask, attempt_timeout: Duration) -> bool {
    if task.target.endpoints.is_empty() {
        warn!(target = %task.target.id, "target has no reachable endpoints");
        return false;
    }
    for endpoint in &task.target.endpoints {
        let attempt = async {
            match &task.command {
                TaskCommand::Shell(command) => transport.run(endpoint, command).await,
                TaskCommand::Push { local, remote } => transport.push(endpoint, local, remote).await,
                TaskCommand::Pull { remote, local } => transport.pull(endpoint, remote, local).await,
                TaskCommand::Pipe {
                    local_command,
                    remote_dir,
                    remote_file,
                } => transport.pipe(endpoint, local_command, remote_dir, remote_file).await,
            }
        };
        match tokio::time::timeout(attempt_timeout, attempt).await {
            Ok(Ok(())) => return true,
            Ok(Err(error)) => {
                debug!(target = %task.target.id, %endpoint, %error, "attempt failed, trying next endpoint");
            }
            Err(_) => {
                debug!(target = %task.target.id, %endpoint, "attempt timed out, trying next endpoint");
            }
        }
    }
    warn!(target = %task.target.id, "every endpoint failed, skipping target");
    false
}
