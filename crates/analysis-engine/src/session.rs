//! The serialized engine session.
//!
//! A single worker task owns the engine process. Callers hold a cheap
//! [`EngineSession`] handle and submit requests over a bounded channel, which
//! gives global FIFO ordering across all callers. The worker runs requests to
//! completion one at a time, so output lines are always attributed to the
//! request that produced them.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalysisRequest, AnalysisResult};
use crate::error::EngineError;
use crate::launcher::EngineLauncher;
use crate::uci::{UciOptions, UciProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Ready for the next request (the process may not be started yet)
    Idle,
    /// A request is in flight
    Analyzing,
    /// The process failed; the next request restarts it
    Faulted,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed part of the per-request deadline
    pub base_timeout: Duration,
    /// Added to the deadline for every ply of requested depth
    pub per_depth_timeout: Duration,
    /// Bound on draining a timed-out search, and on waiting for the engine
    /// to exit after `quit`, before the process is killed
    pub drain_timeout: Duration,
    /// Bound on the UCI handshake after launch
    pub handshake_timeout: Duration,
    /// Requests waiting behind the in-flight one; beyond this callers get `Busy`
    pub queue_capacity: usize,
    pub threads: u32,
    pub hash_mb: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(5),
            per_depth_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
            queue_capacity: 32,
            threads: 1,
            hash_mb: 256,
        }
    }
}

impl SessionConfig {
    /// Deadline for a search of the given depth
    pub fn timeout_for(&self, depth: u32) -> Duration {
        self.base_timeout + self.per_depth_timeout * depth
    }
}

enum Command {
    Analyze {
        request: AnalysisRequest,
        reply: oneshot::Sender<Result<AnalysisResult, EngineError>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the process-wide engine session. Clone freely.
#[derive(Clone)]
pub struct EngineSession {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<EngineState>,
}

impl EngineSession {
    /// Start the worker task. The engine itself is launched lazily on the
    /// first request. Must be called from within a tokio runtime.
    pub fn start(launcher: Arc<dyn EngineLauncher>, config: SessionConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);

        let worker = Worker {
            launcher,
            config,
            process: None,
            state: state_tx,
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            state: state_rx,
        }
    }

    /// Analyze a position. Queues behind any in-flight request.
    pub async fn analyze(
        &self,
        position: &str,
        depth: u32,
    ) -> Result<AnalysisResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        let request = AnalysisRequest::new(position, depth);

        self.tx
            .try_send(Command::Analyze { request, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EngineError::Busy,
                mpsc::error::TrySendError::Closed(_) => {
                    EngineError::Unavailable("Engine session has shut down".into())
                }
            })?;

        rx.await
            .map_err(|_| EngineError::Unavailable("Engine session dropped the request".into()))?
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Stop the worker after queued requests drain and quit the engine.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct Worker {
    launcher: Arc<dyn EngineLauncher>,
    config: SessionConfig,
    process: Option<UciProcess>,
    state: watch::Sender<EngineState>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Analyze { request, reply } => {
                    if reply.is_closed() {
                        debug!(position = %request.position, "Caller went away, skipping analysis");
                        continue;
                    }
                    let result = self.handle(request).await;
                    let _ = reply.send(result);
                }
                Command::Shutdown { done } => {
                    self.stop().await;
                    let _ = done.send(());
                    return;
                }
            }
        }
        self.stop().await;
    }

    async fn stop(&mut self) {
        if let Some(process) = self.process.take() {
            info!("Shutting down engine");
            process.quit(self.config.drain_timeout).await;
        }
        self.state.send_replace(EngineState::Idle);
    }

    async fn handle(&mut self, request: AnalysisRequest) -> Result<AnalysisResult, EngineError> {
        self.ensure_process().await?;
        let Some(process) = self.process.as_mut() else {
            return Err(EngineError::Unavailable("Engine not running".into()));
        };

        self.state.send_replace(EngineState::Analyzing);
        let deadline = self.config.timeout_for(request.depth);
        debug!(position = %request.position, depth = request.depth, "Analysis started");

        let outcome = tokio::time::timeout(deadline, process.analyze(&request)).await;
        match outcome {
            Ok(Ok(text)) => {
                self.state.send_replace(EngineState::Idle);
                let result = AnalysisResult::new(text);
                info!(
                    depth = request.depth,
                    best_move = result.best_move().unwrap_or("-"),
                    "Analysis complete"
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Engine failed during analysis");
                self.fault();
                Err(e)
            }
            Err(_) => {
                warn!(?deadline, position = %request.position, "Analysis timed out");
                self.recover_after_timeout().await;
                Err(EngineError::Timeout(deadline))
            }
        }
    }

    /// Launch the engine if there is none (first use, or after a fault).
    /// At most one launch per request.
    async fn ensure_process(&mut self) -> Result<(), EngineError> {
        if let Some(process) = self.process.as_mut() {
            if !process.has_exited() {
                return Ok(());
            }
            self.fault();
        }

        let restarting = *self.state.borrow() == EngineState::Faulted;
        if restarting {
            info!("Restarting engine after fault");
        }

        let options = UciOptions {
            threads: self.config.threads,
            hash_mb: self.config.hash_mb,
        };
        let launcher = self.launcher.clone();
        let started = async move {
            let io = launcher.launch().await?;
            UciProcess::start(io, options).await
        };

        match tokio::time::timeout(self.config.handshake_timeout, started).await {
            Ok(Ok(process)) => {
                self.process = Some(process);
                self.state.send_replace(EngineState::Idle);
                info!("Engine ready");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Engine failed to start");
                self.state.send_replace(EngineState::Faulted);
                Err(e)
            }
            Err(_) => {
                error!("Engine handshake timed out");
                self.state.send_replace(EngineState::Faulted);
                Err(EngineError::Unavailable("Engine handshake timed out".into()))
            }
        }
    }

    /// Stop the runaway search and discard its output so the next request
    /// starts on a clean stream. Kill the process if that fails.
    async fn recover_after_timeout(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            process.send("stop").await?;
            process.read_until_sentinel().await
        })
        .await;

        match drained {
            Ok(Ok(_)) => {
                debug!("Drained timed-out search");
                self.state.send_replace(EngineState::Idle);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Engine failed while draining");
                self.fault();
            }
            Err(_) => {
                warn!("Engine did not stop in time, killing it");
                self.fault();
            }
        }
    }

    fn fault(&mut self) {
        if let Some(process) = self.process.take() {
            process.kill();
        }
        self.state.send_replace(EngineState::Faulted);
    }
}
