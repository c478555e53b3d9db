//! # Audio Ingest Channel
//!
//! The WebSocket handler receives audio buffers pushed by the network; the
//! speech-to-text capability wants to pull an asynchronous byte sequence.
//! This channel bridges the two.
//!
//! ## Contract:
//! - Byte order is preserved; buffers are never dropped or duplicated (the
//!   channel buffers internally when the consumer is slower than the push
//!   side).
//! - Closing the push side makes the pull side observe a clean end-of-stream,
//!   not an error. Closing happens by dropping the `IngestChannel` — which is
//!   exactly what the session does on `stop-listening` and on disconnect, so
//!   there is no separate close path to forget.

use actix_web::web::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Push side, held by the session while Listening. Dropping it signals
/// end-of-stream to the pull side.
pub struct IngestChannel {
    tx: mpsc::UnboundedSender<Bytes>,
}

/// Pull side, handed to the speech-to-text capability.
pub struct AudioStream {
    inner: UnboundedReceiverStream<Bytes>,
}

/// Create a connected push/pull pair for one listening interval.
pub fn ingest_channel() -> (IngestChannel, AudioStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        IngestChannel { tx },
        AudioStream {
            inner: UnboundedReceiverStream::new(rx),
        },
    )
}

impl IngestChannel {
    /// Append one audio buffer. Returns false if the pull side is gone
    /// (transcription already finished or failed); the buffer is discarded in
    /// that case, which is the correct behavior for a dead stream.
    pub fn push(&self, data: Bytes) -> bool {
        self.tx.send(data).is_ok()
    }
}

impl Stream for AudioStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
