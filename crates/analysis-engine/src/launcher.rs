//! How the session obtains an engine process

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::info;

use crate::error::EngineError;

/// The engine's streams, plus the child process when there is one
pub struct EngineIo {
    pub child: Option<Child>,
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncBufRead + Send + Unpin>,
}

/// Starts a fresh engine. Called on first use and after every fault.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<EngineIo, EngineError>;
}

/// Spawns a native Stockfish (or any UCI) binary
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    path: String,
}

impl StockfishLauncher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EngineLauncher for StockfishLauncher {
    async fn launch(&self) -> Result<EngineIo, EngineError> {
        let mut process = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("Failed to spawn {}: {e}", self.path))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("Engine stdin not captured".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("Engine stdout not captured".into()))?;

        info!(path = %self.path, pid = process.id(), "Engine process spawned");

        Ok(EngineIo {
            child: Some(process),
            input: Box::new(stdin),
            output: Box::new(BufReader::new(stdout)),
        })
    }
}
