//! UCI protocol over the engine's stdin/stdout (async I/O)

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::analysis::{AnalysisRequest, SENTINEL};
use crate::error::EngineError;
use crate::launcher::EngineIo;

/// Engine options applied after the handshake
#[derive(Debug, Clone, Copy)]
pub(crate) struct UciOptions {
    pub threads: u32,
    pub hash_mb: u32,
}

/// A started engine. Only the session worker holds one.
pub(crate) struct UciProcess {
    child: Option<Child>,
    input: Box<dyn AsyncWrite + Send + Unpin>,
    output: Box<dyn AsyncBufRead + Send + Unpin>,
}

impl UciProcess {
    /// Take ownership of the streams and run the UCI handshake
    pub async fn start(io: EngineIo, options: UciOptions) -> Result<Self, EngineError> {
        let mut engine = Self {
            child: io.child,
            input: io.input,
            output: io.output,
        };

        engine.send("uci").await?;
        engine.wait_for("uciok").await?;

        engine
            .send(&format!("setoption name Threads value {}", options.threads))
            .await?;
        engine
            .send(&format!("setoption name Hash value {}", options.hash_mb))
            .await?;
        engine.send("isready").await?;
        engine.wait_for("readyok").await?;

        Ok(engine)
    }

    /// Send one command line
    pub async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "SF <");
        self.input
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Unavailable(format!("Failed to write to engine: {e}")))?;
        self.input
            .flush()
            .await
            .map_err(|e| EngineError::Unavailable(format!("Failed to flush engine stdin: {e}")))?;
        Ok(())
    }

    /// Read one line; a closed stream is an error
    async fn read_line(&mut self) -> Result<String, EngineError> {
        let mut line = String::new();
        let n = self
            .output
            .read_line(&mut line)
            .await
            .map_err(|e| EngineError::Unavailable(format!("Failed to read from engine: {e}")))?;
        if n == 0 {
            return Err(EngineError::Unavailable("Engine closed its output".into()));
        }
        let trimmed = line.trim_end().to_string();
        debug!(line = %trimmed, "SF >");
        Ok(trimmed)
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str) -> Result<(), EngineError> {
        loop {
            if self.read_line().await?.trim() == expected {
                return Ok(());
            }
        }
    }

    /// Run one search and collect every output line through the sentinel
    pub async fn analyze(&mut self, request: &AnalysisRequest) -> Result<String, EngineError> {
        self.send(&format!("position fen {}", request.position))
            .await?;
        self.send(&format!("go depth {}", request.depth)).await?;
        self.read_until_sentinel().await
    }

    /// Accumulate lines until one contains the sentinel token
    pub async fn read_until_sentinel(&mut self) -> Result<String, EngineError> {
        let mut output = String::new();
        loop {
            let line = self.read_line().await?;
            output.push_str(&line);
            output.push('\n');
            if line.contains(SENTINEL) {
                return Ok(output);
            }
        }
    }

    /// Whether the child process has already exited
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => {
                warn!(%status, "Engine process exited");
                true
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to poll engine process");
                true
            }
            _ => false,
        }
    }

    /// Send quit and wait up to `grace` for the engine to exit, killing it
    /// if it does not.
    pub async fn quit(mut self, grace: Duration) {
        let _ = self.send("quit").await;
        match self.child.as_mut() {
            Some(child) => {
                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    warn!("Engine ignored quit, killing it");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            None => {
                // No child to wait on: wait for the engine to close its output
                let _ = tokio::time::timeout(grace, async {
                    while self.read_line().await.is_ok() {}
                })
                .await;
            }
        }
    }

    /// Terminate without the quit handshake
    pub fn kill(mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

impl Drop for UciProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}
