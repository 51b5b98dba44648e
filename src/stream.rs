//! The operation stream: a bounded, ordered, push-only conduit for
//! [`Operation`]s (spec §4.1).
//!
//! The write side and the read side are deliberately different Rust types
//! ([`StreamHandle`] and [`OperationStream`]) sharing state through an
//! `Arc<Mutex<_>>` plus an mpsc channel. Spec §4.1 says "the write side is
//! not exposed to consumers... a consumer attempting to write observes a
//! `not-supported` failure" — splitting the type is a stronger version of
//! that guarantee (a compile error instead of a runtime one), in the same
//! spirit as the teacher's `RequestHandlerExtra`/`CancellationManager` split
//! between the side that creates cancellation tokens and the side that only
//! observes them.

use crate::error::{Error, Result};
use crate::model::{DocKey, Operation};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum StreamEvent {
    Operation(Operation),
    Error(Error),
}

/// Mutable state shared between a stream's write and read halves.
#[derive(Debug)]
struct StreamState {
    version_start: u32,
    version_end: u32,
    version_next: u32,
}

impl StreamState {
    fn is_closed(&self) -> bool {
        self.version_next >= self.version_end
    }
}

/// The write side of an operation stream, held by the
/// [`crate::backend::ContentBackend`]'s stream registry.
pub struct StreamHandle {
    doc_key: DocKey,
    state: Arc<Mutex<StreamState>>,
    sender: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// The document this stream is scoped to.
    pub fn doc_key(&self) -> &DocKey {
        &self.doc_key
    }

    /// The next version this stream expects to receive.
    pub async fn version_next(&self) -> u32 {
        self.state.lock().await.version_next
    }

    /// The exclusive upper bound of this stream's range.
    pub async fn version_end(&self) -> u32 {
        self.state.lock().await.version_end
    }

    /// Whether the stream still has versions left to deliver and hasn't
    /// been cancelled by its consumer.
    pub async fn needs_update(&self) -> bool {
        !self.cancel.is_cancelled() && !self.state.lock().await.is_closed()
    }

    /// Push an operation (spec §4.1).
    ///
    /// - `op.version < version_next`: discarded, idempotent replay
    ///   protection, returns `Ok(())`.
    /// - `op.version > version_next`: fatal out-of-sequence error,
    ///   delivered to the consumer as a stream error and returned here so
    ///   the caller (the work loop) can react.
    /// - otherwise: delivered, `version_next` advances, and the stream
    ///   closes once it reaches `version_end`.
    pub async fn push_operation(&self, op: Operation) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if state.is_closed() {
            return Ok(());
        }
        if op.version < state.version_next {
            tracing::debug!(doc = %self.doc_key, version = op.version, next = state.version_next, "discarding replayed operation");
            return Ok(());
        }
        if op.version > state.version_next {
            let err = Error::assertion(format!(
                "out-of-sequence push for {}: expected version {}, got {}",
                self.doc_key, state.version_next, op.version
            ));
            let _ = self.sender.send(StreamEvent::Error(err.clone()));
            self.cancel.cancel();
            return Err(err);
        }

        state.version_next += 1;
        let closing = state.is_closed();
        drop(state);

        if self.sender.send(StreamEvent::Operation(op)).is_err() {
            // Consumer already dropped its receiver; treat like a close.
            self.cancel.cancel();
            return Ok(());
        }
        if closing {
            self.close();
        }
        Ok(())
    }

    /// Deliver a collaborator failure (store/pub-sub error, not a version
    /// mismatch) to the consumer and close the stream (spec §4.3.6 step 7:
    /// "surface it as the first stream's error").
    pub fn fail(&self, err: Error) {
        let _ = self.sender.send(StreamEvent::Error(err));
        self.cancel.cancel();
    }

    /// Close the stream from the write side. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the consumer has closed the stream (or it closed itself on
    /// reaching `version_end`).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this stream closes, from either side. Lets the
    /// backend notice a consumer-initiated close/drop promptly instead of
    /// only discovering it the next time something tries to push.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// The read side of an operation stream, held by the subscriber.
#[derive(Debug)]
pub struct OperationStream {
    doc_key: DocKey,
    state: Arc<Mutex<StreamState>>,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    done: bool,
}

impl OperationStream {
    /// Construct a stream for `[version_start, version_end)` on `(type,
    /// id)`. If `version_start == version_end` the stream is born closed
    /// and immediately yields end-of-stream.
    pub fn new(
        doc_type: impl Into<String>,
        id: impl Into<String>,
        version_start: u32,
        version_end: u32,
    ) -> (StreamHandle, OperationStream) {
        let doc_key = DocKey::new(doc_type, id);
        let state = Arc::new(Mutex::new(StreamState {
            version_start,
            version_end,
            version_next: version_start,
        }));
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        if version_start >= version_end {
            cancel.cancel();
        }
        let handle = StreamHandle {
            doc_key: doc_key.clone(),
            state: state.clone(),
            sender,
            cancel: cancel.clone(),
        };
        let stream = OperationStream {
            doc_key,
            state,
            receiver,
            cancel,
            done: version_start >= version_end,
        };
        (handle, stream)
    }

    /// The document this stream is scoped to.
    pub fn doc_key(&self) -> &DocKey {
        &self.doc_key
    }

    /// The next version this stream expects to receive.
    pub async fn version_next(&self) -> u32 {
        self.state.lock().await.version_next
    }

    /// The inclusive lower bound this stream was opened with.
    pub async fn version_start(&self) -> u32 {
        self.state.lock().await.version_start
    }

    /// The exclusive upper bound this stream was opened with.
    pub async fn version_end(&self) -> u32 {
        self.state.lock().await.version_end
    }

    /// Close the stream from the read side. Idempotent; surfaces a close
    /// signal to the write side (the backend stops pushing and unregisters
    /// it).
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Attempting to write from the consumer side is a compile error, not a
    /// value one can even construct — `OperationStream` has no push method.
    /// This associated function documents that design choice for readers
    /// coming from an API where it's a runtime check.
    pub fn write_not_supported() -> Error {
        Error::internal("operation streams are read-only for consumers")
    }
}

impl Stream for OperationStream {
    type Item = Result<Operation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.cancel.is_cancelled() {
            // Drain anything already queued before reporting end-of-stream,
            // so a close racing with a final push doesn't drop the item.
            match self.receiver.try_recv() {
                Ok(StreamEvent::Operation(op)) => return Poll::Ready(Some(Ok(op))),
                Ok(StreamEvent::Error(err)) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(err)));
                },
                Err(_) => {
                    self.done = true;
                    return Poll::Ready(None);
                },
            }
        }
        match Pin::new(&mut self.receiver).poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Operation(op))) => Poll::Ready(Some(Ok(op))),
            Poll::Ready(Some(StreamEvent::Error(err))) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            },
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OperationStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn op(version: u32) -> Operation {
        Operation {
            key: format!("k{version}"),
            r#type: "note".into(),
            id: "d1".into(),
            version,
            schema: "s".into(),
            data: Some(serde_json::json!({"v": version})),
            meta: None,
        }
    }

    #[tokio::test]
    async fn equal_bounds_close_immediately() {
        let (_handle, mut stream) = OperationStream::new("note", "d1", 3, 3);
        assert_eq!(stream.next().await.transpose().unwrap(), None);
    }

    #[tokio::test]
    async fn delivers_in_order_then_closes() {
        let (handle, mut stream) = OperationStream::new("note", "d1", 1, 4);
        handle.push_operation(op(1)).await.unwrap();
        handle.push_operation(op(2)).await.unwrap();
        handle.push_operation(op(3)).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().version, 1);
        assert_eq!(stream.next().await.unwrap().unwrap().version, 2);
        assert_eq!(stream.next().await.unwrap().unwrap().version, 3);
        assert!(stream.next().await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn replayed_version_is_discarded() {
        let (handle, mut stream) = OperationStream::new("note", "d1", 1, 3);
        handle.push_operation(op(1)).await.unwrap();
        // Replay: should be silently discarded, not delivered twice.
        handle.push_operation(op(1)).await.unwrap();
        handle.push_operation(op(2)).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().version, 1);
        assert_eq!(stream.next().await.unwrap().unwrap().version, 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn out_of_sequence_push_is_fatal() {
        let (handle, mut stream) = OperationStream::new("note", "d1", 1, 5);
        let err = handle.push_operation(op(3)).await.unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
        // The consumer observes the same failure on the stream.
        let observed = stream.next().await.unwrap();
        assert!(observed.is_err());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn consumer_close_is_observed_by_handle() {
        let (handle, stream) = OperationStream::new("note", "d1", 1, 10);
        stream.close();
        assert!(handle.is_closed());
        assert!(!handle.needs_update().await);
    }

    #[tokio::test]
    async fn dropping_stream_closes_handle() {
        let (handle, stream) = OperationStream::new("note", "d1", 1, 10);
        drop(stream);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn fail_delivers_error_and_closes() {
        let (handle, mut stream) = OperationStream::new("note", "d1", 1, 10);
        handle.fail(Error::internal("store unavailable"));
        assert!(stream.next().await.unwrap().is_err());
        assert!(handle.is_closed());
    }
}
