//! Provider chunks in, uniform event frames out.
//!
//! Whatever happens upstream, the frame sequence ends with exactly one
//! [`EventFrame::Done`]. Unparseable chunks are skipped; an error chunk or a
//! broken stream ends the sequence early. Frames already sent are never
//! retracted.

use chess_core::EventFrame;
use futures::{Stream, StreamExt};
use tokio_util::sync::DropGuard;
use tracing::{error, info, warn};

use crate::clients::{ChunkStream, Decoded, ProviderError, ProviderKind};

pub struct Transcoder {
    chunks: ChunkStream,
    kind: ProviderKind,
    /// Frame pulled ahead by [`Transcoder::prime`]
    pending: Option<EventFrame>,
    finished: bool,
    deltas: usize,
    skipped: usize,
    /// Cancels the provider request when the transcoder is dropped
    _cancel: Option<DropGuard>,
}

impl Transcoder {
    pub fn new(chunks: ChunkStream, kind: ProviderKind) -> Self {
        Self {
            chunks,
            kind,
            pending: None,
            finished: false,
            deltas: 0,
            skipped: 0,
            _cancel: None,
        }
    }

    pub fn with_cancel_guard(mut self, guard: DropGuard) -> Self {
        self._cancel = Some(guard);
        self
    }

    /// Pull until the first frame so that a provider error arriving before
    /// any output can still be reported as an error response.
    pub async fn prime(&mut self) -> Result<(), ProviderError> {
        if self.pending.is_some() || self.finished || self.deltas > 0 {
            return Ok(());
        }
        let frame = self.advance().await?;
        self.pending = Some(frame);
        Ok(())
    }

    /// Next frame, or `None` once the termination frame has been produced.
    pub async fn next_frame(&mut self) -> Option<EventFrame> {
        if self.finished {
            return None;
        }

        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => match self.advance().await {
                Ok(frame) => frame,
                Err(e) => {
                    error!(
                        provider = self.kind.name(),
                        error = %e,
                        deltas = self.deltas,
                        "Provider stream aborted"
                    );
                    EventFrame::Done
                }
            },
        };

        if frame.is_done() {
            self.finished = true;
            info!(
                provider = self.kind.name(),
                deltas = self.deltas,
                skipped = self.skipped,
                "Stream finished"
            );
        }
        Some(frame)
    }

    /// Frames as a stream; ends right after the termination frame.
    pub fn into_stream(self) -> impl Stream<Item = EventFrame> + Send {
        futures::stream::unfold(self, |mut transcoder| async move {
            let frame = transcoder.next_frame().await?;
            Some((frame, transcoder))
        })
    }

    async fn advance(&mut self) -> Result<EventFrame, ProviderError> {
        loop {
            let chunk = match self.chunks.next().await {
                None => return Ok(EventFrame::Done),
                Some(chunk) => chunk?,
            };

            match self.kind.decode(&chunk) {
                Decoded::Delta(text) if text.is_empty() => continue,
                Decoded::Delta(text) => {
                    self.deltas += 1;
                    return Ok(EventFrame::Delta(text));
                }
                Decoded::Done => return Ok(EventFrame::Done),
                Decoded::Error(message) => return Err(ProviderError::Stream(message)),
                Decoded::Ignore => continue,
                Decoded::Malformed(reason) => {
                    self.skipped += 1;
                    warn!(provider = self.kind.name(), %reason, "Skipping malformed chunk");
                }
            }
        }
    }
}
