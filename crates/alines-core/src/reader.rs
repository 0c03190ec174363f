//! Push-to-pull byte queue.
//!
//! The transport delivers inbound bytes in whatever chunks the network
//! produces, while the protocol reads fixed-size fields whose lengths are
//! known from earlier fields. [`ByteQueue`] bridges the two: the transport
//! side calls [`ByteQueue::push`] (never blocks), the protocol side awaits
//! [`ByteQueue::get`] for exactly `n` bytes.
//!
//! At most one read may be outstanding per queue. The pending read is stored
//! as a single-slot continuation that `push`, `finish` and `close` complete.
//!
//! Two ways to end a queue:
//! - [`ByteQueue::close`] aborts: every read fails from then on, buffered or not.
//! - [`ByteQueue::finish`] marks end-of-stream: reads that buffered bytes can
//!   still satisfy succeed, anything longer fails.
//!
//! ## Example
//!
//! ```rust
//! use alines_core::reader::ByteQueue;
//!
//! # async fn example() -> Result<(), alines_core::reader::QueueError> {
//! let queue = ByteQueue::new();
//! queue.push(&[0x00, 0x02]);
//! queue.push(b"hi");
//!
//! let len = queue.get(2).await?;
//! assert_eq!(len, vec![0x00, 0x02]);
//! assert_eq!(queue.get(2).await?, b"hi".to_vec());
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// Byte queue errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed before or while reading
    #[error("stream source closed")]
    Closed,

    /// A second read was issued while one is still pending
    #[error("a read is already pending on this queue")]
    ConcurrentRead,
}

type ReadResult = Result<Vec<u8>, QueueError>;

/// The suspended reader: how many bytes it wants and where to deliver them.
struct PendingRead {
    len: usize,
    tx: oneshot::Sender<ReadResult>,
}

#[derive(Default)]
struct QueueState {
    buf: VecDeque<u8>,
    closed: bool,
    eof: bool,
    pending: Option<PendingRead>,
}

impl QueueState {
    fn take(&mut self, n: usize) -> Vec<u8> {
        self.buf.drain(..n).collect()
    }

    /// Complete the pending read if enough bytes are buffered.
    fn wake(&mut self) {
        let ready = matches!(&self.pending, Some(p) if p.len <= self.buf.len());
        if !ready {
            return;
        }

        if let Some(pending) = self.pending.take() {
            let bytes = self.take(pending.len);
            if let Err(Ok(bytes)) = pending.tx.send(Ok(bytes)) {
                // Reader was dropped; keep the bytes for the next one
                for b in bytes.into_iter().rev() {
                    self.buf.push_front(b);
                }
            }
        }
    }
}

/// Unbounded inbound byte buffer with size-exact, suspending reads
#[derive(Default)]
pub struct ByteQueue {
    state: Mutex<QueueState>,
}

impl ByteQueue {
    /// Create an empty, open queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append inbound bytes.
    ///
    /// Never blocks. If a read is pending and can now be satisfied, it is
    /// completed before this returns. Bytes pushed after [`close`] or
    /// [`finish`] are discarded.
    ///
    /// [`close`]: ByteQueue::close
    /// [`finish`]: ByteQueue::finish
    pub fn push(&self, data: &[u8]) {
        let mut state = self.lock();
        if state.closed || state.eof {
            return;
        }
        state.buf.extend(data);
        state.wake();
    }

    /// Read exactly `n` bytes, suspending until they are available.
    ///
    /// Surplus bytes stay queued for the next read.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Closed`] if the queue is closed before or while waiting.
    /// - [`QueueError::ConcurrentRead`] if another read is still pending.
    pub async fn get(&self, n: usize) -> ReadResult {
        let rx = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if let Some(pending) = &state.pending {
                if !pending.tx.is_closed() {
                    return Err(QueueError::ConcurrentRead);
                }
                // Previous reader was cancelled
                state.pending = None;
            }
            if n <= state.buf.len() {
                return Ok(state.take(n));
            }
            if state.eof {
                return Err(QueueError::Closed);
            }

            let (tx, rx) = oneshot::channel();
            state.pending = Some(PendingRead { len: n, tx });
            rx
        };

        rx.await.unwrap_or(Err(QueueError::Closed))
    }

    /// Permanently close the queue, failing any pending read.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(pending) = state.pending.take() {
            let _ = pending.tx.send(Err(QueueError::Closed));
        }
    }

    /// Mark end-of-stream.
    ///
    /// Buffered bytes stay readable; a pending read that they cannot satisfy
    /// fails, as does any later read that needs more than what is left.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.eof = true;
        if let Some(pending) = state.pending.take() {
            let _ = pending.tx.send(Err(QueueError::Closed));
        }
    }

    /// Whether the queue was closed or finished
    pub fn is_closed(&self) -> bool {
        let state = self.lock();
        state.closed || state.eof
    }

    /// Number of buffered bytes not yet read
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    /// Whether no bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a read is currently suspended on this queue
    pub fn is_waiting(&self) -> bool {
        self.lock()
            .pending
            .as_ref()
            .is_some_and(|p| !p.tx.is_closed())
    }
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ByteQueue")
            .field("buffered", &state.buf.len())
            .field("closed", &state.closed)
            .field("eof", &state.eof)
            .field("waiting", &state.pending.is_some())
            .finish()
    }
}
