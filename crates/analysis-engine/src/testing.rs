//! In-process fake UCI engine.
//!
//! Speaks enough UCI for the session (handshake, `position`, `go depth`,
//! `stop`, `quit`) and tags every `info` line with the position it was
//! produced for, so tests can prove no output crosses requests.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::EngineError;
use crate::launcher::{EngineIo, EngineLauncher};

/// What the fake engine saw and did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Launch,
    /// A command line as the session wrote it, before the engine reads it
    Sent(String),
    Position(String),
    Go(String),
    Stop,
    BestMove(String),
    Quit,
}

#[derive(Debug, Clone)]
struct Behavior {
    line_delay: Duration,
    best_move: String,
    stall_on: Option<String>,
    crash_on: Option<String>,
}

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<FakeEvent>>,
    launches: AtomicUsize,
    failing_launches: AtomicUsize,
}

impl Shared {
    fn record(&self, event: FakeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Launcher for the fake engine. Clones share the event log.
#[derive(Clone)]
pub struct FakeEngine {
    behavior: Behavior,
    shared: Arc<Shared>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            behavior: Behavior {
                line_delay: Duration::ZERO,
                best_move: "e2e4".into(),
                stall_on: None,
                crash_on: None,
            },
            shared: Arc::new(Shared::default()),
        }
    }

    /// Pause before every info line
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.behavior.line_delay = delay;
        self
    }

    pub fn with_best_move(mut self, mv: impl Into<String>) -> Self {
        self.behavior.best_move = mv.into();
        self
    }

    /// Never finish a search of this position until `stop` arrives
    pub fn stall_on(mut self, position: impl Into<String>) -> Self {
        self.behavior.stall_on = Some(position.into());
        self
    }

    /// Close both streams when asked to search this position
    pub fn crash_on(mut self, position: impl Into<String>) -> Self {
        self.behavior.crash_on = Some(position.into());
        self
    }

    /// Make the next `n` launches fail
    pub fn fail_launches(self, n: usize) -> Self {
        self.shared.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.shared
            .events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Whether a `position` or `go` was written while an earlier search
    /// had not yet produced its `bestmove`. `stop` is allowed in between.
    pub fn interleaved_searches(&self) -> bool {
        let mut in_flight = false;
        for event in self.events() {
            match event {
                FakeEvent::Launch => in_flight = false,
                FakeEvent::Sent(cmd) if cmd.starts_with("go ") => {
                    if in_flight {
                        return true;
                    }
                    in_flight = true;
                }
                FakeEvent::Sent(cmd) if cmd.starts_with("position ") && in_flight => {
                    return true;
                }
                FakeEvent::BestMove(_) => in_flight = false,
                _ => {}
            }
        }
        false
    }

    /// Number of searches the engine was asked to run
    pub fn searches(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, FakeEvent::Go(_)))
            .count()
    }
}

#[async_trait]
impl EngineLauncher for FakeEngine {
    async fn launch(&self) -> Result<EngineIo, EngineError> {
        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        let failing = self.shared.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared
                .failing_launches
                .store(failing - 1, Ordering::SeqCst);
            return Err(EngineError::Unavailable("fake launch failure".into()));
        }
        self.shared.record(FakeEvent::Launch);

        let (session_side, engine_side) = tokio::io::duplex(64 * 1024);
        let (session_read, session_write) = tokio::io::split(session_side);
        let (engine_read, engine_write) = tokio::io::split(engine_side);

        tokio::spawn(run_engine(
            self.behavior.clone(),
            self.shared.clone(),
            BufReader::new(engine_read),
            engine_write,
        ));

        Ok(EngineIo {
            child: None,
            input: Box::new(RecordingWriter {
                inner: session_write,
                shared: self.shared.clone(),
                partial: Vec::new(),
            }),
            output: Box::new(BufReader::new(session_read)),
        })
    }
}

/// Session-side input that logs every complete command line at write time
struct RecordingWriter<W> {
    inner: W,
    shared: Arc<Shared>,
    partial: Vec<u8>,
}

impl<W> RecordingWriter<W> {
    fn record(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let cmd = String::from_utf8_lossy(&line).trim().to_string();
            self.shared.record(FakeEvent::Sent(cmd));
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for RecordingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.record(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

async fn emit<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{line}\n").as_bytes()).await?;
    writer.flush().await
}

async fn run_engine<R, W>(behavior: Behavior, shared: Arc<Shared>, reader: R, mut writer: W)
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut position = String::new();
    let mut stalled = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let cmd = line.trim();
        let written = if cmd == "uci" {
            emit(&mut writer, "id name FakeFish\nuciok").await
        } else if cmd == "isready" {
            emit(&mut writer, "readyok").await
        } else if let Some(fen) = cmd.strip_prefix("position fen ") {
            position = fen.to_string();
            shared.record(FakeEvent::Position(position.clone()));
            Ok(())
        } else if let Some(depth) = cmd.strip_prefix("go depth ") {
            shared.record(FakeEvent::Go(position.clone()));
            if behavior.crash_on.as_deref() == Some(position.as_str()) {
                return;
            }
            let depth: u32 = depth.parse().unwrap_or(1);
            let mut result = Ok(());
            for d in 1..=depth {
                if !behavior.line_delay.is_zero() {
                    tokio::time::sleep(behavior.line_delay).await;
                }
                let info = format!(
                    "info depth {d} score cp {} pv {} e7e5 tag={position}",
                    d * 10,
                    behavior.best_move
                );
                result = emit(&mut writer, &info).await;
                if result.is_err() {
                    break;
                }
            }
            if behavior.stall_on.as_deref() == Some(position.as_str()) {
                stalled = true;
                result
            } else {
                shared.record(FakeEvent::BestMove(position.clone()));
                emit(&mut writer, &format!("bestmove {} ponder e7e5", behavior.best_move)).await
            }
        } else if cmd == "stop" {
            shared.record(FakeEvent::Stop);
            if stalled {
                stalled = false;
                shared.record(FakeEvent::BestMove(position.clone()));
                emit(&mut writer, &format!("bestmove {}", behavior.best_move)).await
            } else {
                Ok(())
            }
        } else if cmd == "quit" {
            shared.record(FakeEvent::Quit);
            return;
        } else {
            Ok(())
        };

        if written.is_err() {
            return;
        }
    }
}
