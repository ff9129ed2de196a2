//! C1 — ByteStreamQueue: a bounded, single-producer/single-consumer chunk
//! queue with an end-of-stream marker, used to feed request bodies from the
//! socket reader to handler code (spec.md §4.1).
//!
//! Grounded on `original_source/roll/io.py`'s body handling (`_chunk`,
//! `__aiter__`, `pause_reading`/`resume_reading` — the transport-level
//! backpressure pair this queue's capacity bound replicates) and on the
//! teacher's use of `tokio::sync::mpsc` channels to hand data between the
//! I/O task and consumer task (see
//! `ext/http/http_next.rs::op_set_response_body_stream`).

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    chunks: VecDeque<Bytes>,
    queued_bytes: usize,
    ended: bool,
}

/// FIFO byte-chunk queue with a one-shot end marker and a byte-count
/// capacity: once `queued_bytes` reaches `capacity`, [`ByteStreamQueue::put`]
/// blocks until [`ByteStreamQueue::get`] drains enough to make room again,
/// mirroring `original_source/roll/io.py::HttpRequest.feed_data`'s
/// `pause_reading()`/`resume_reading()` pair. A single chunk larger than
/// `capacity` is still accepted in full — the bound limits how much data can
/// pile up *unconsumed*, not the size of any one read.
///
/// `put` is a contract violation after `end()` has been called (spec.md
/// §4.1): callers that need to reuse a queue across keep-alive requests must
/// call [`ByteStreamQueue::clear`] first.
pub struct ByteStreamQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    data_ready: Notify,
    space_freed: Notify,
}

impl ByteStreamQueue {
    /// An effectively unbounded queue — for call sites (tests, the
    /// in-process testing harness) where the body is handed over already
    /// materialized in memory and backpressure has nothing to regulate.
    pub fn new() -> Self {
        Self::bounded(usize::MAX)
    }

    /// A queue that applies backpressure once more than `capacity` bytes
    /// are buffered and undrained. Used by the connection driver, sized
    /// from [`crate::config::ServerConfig::io_buffer_size`].
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            data_ready: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    /// Append a non-empty chunk, waiting for the consumer to drain earlier
    /// chunks first if the queue is at capacity, then wake any waiting
    /// consumer.
    ///
    /// # Panics
    /// Panics if called after [`ByteStreamQueue::end`] — a contract
    /// violation per spec.md §4.1.
    pub async fn put(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        loop {
            {
                let mut inner = self.inner.lock().await;
                assert!(!inner.ended, "ByteStreamQueue::put called after end()");
                if inner.queued_bytes == 0 || inner.queued_bytes < self.capacity {
                    inner.queued_bytes += chunk.len();
                    inner.chunks.push_back(chunk);
                    drop(inner);
                    self.data_ready.notify_one();
                    return;
                }
            }
            self.space_freed.notified().await;
        }
    }

    /// Await the next chunk. Once `end()` has been signaled and no chunks
    /// remain, returns the empty buffer as an end-of-stream sentinel.
    pub async fn get(&self) -> Bytes {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(chunk) = inner.chunks.pop_front() {
                    inner.queued_bytes -= chunk.len();
                    drop(inner);
                    self.space_freed.notify_one();
                    return chunk;
                }
                if inner.ended {
                    return Bytes::new();
                }
            }
            self.data_ready.notified().await;
        }
    }

    /// Mark the stream complete and wake any waiting consumer.
    pub async fn end(&self) {
        let mut inner = self.inner.lock().await;
        inner.ended = true;
        drop(inner);
        self.data_ready.notify_one();
    }

    /// Reset to the initial empty, non-finished state, for keep-alive reuse.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.chunks.clear();
        inner.queued_bytes = 0;
        inner.ended = false;
        drop(inner);
        self.space_freed.notify_one();
    }

    pub async fn is_ended(&self) -> bool {
        self.inner.lock().await.ended
    }
}

impl Default for ByteStreamQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle used by both the connection's reader task (producer) and
/// handler code (consumer).
pub type SharedByteStreamQueue = Arc<ByteStreamQueue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_then_eof() {
        let q = ByteStreamQueue::new();
        q.put(Bytes::from_static(b"C1")).await;
        q.put(Bytes::from_static(b"C2")).await;
        q.end().await;
        assert_eq!(q.get().await, Bytes::from_static(b"C1"));
        assert_eq!(q.get().await, Bytes::from_static(b"C2"));
        assert_eq!(q.get().await, Bytes::new());
        // Further reads after EOF keep yielding the empty sentinel.
        assert_eq!(q.get().await, Bytes::new());
    }

    #[tokio::test]
    async fn consumer_waits_for_producer() {
        let q = Arc::new(ByteStreamQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.get().await });
        tokio::task::yield_now().await;
        q.put(Bytes::from_static(b"late")).await;
        let got = handle.await.unwrap();
        assert_eq!(got, Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn clear_resets_state() {
        let q = ByteStreamQueue::new();
        q.put(Bytes::from_static(b"x")).await;
        q.end().await;
        q.clear().await;
        assert!(!q.is_ended().await);
        q.put(Bytes::from_static(b"y")).await;
        q.end().await;
        assert_eq!(q.get().await, Bytes::from_static(b"y"));
    }

    #[tokio::test]
    #[should_panic(expected = "put called after end")]
    async fn put_after_end_panics() {
        let q = ByteStreamQueue::new();
        q.end().await;
        q.put(Bytes::from_static(b"x")).await;
    }

    #[tokio::test]
    async fn put_blocks_once_capacity_is_reached() {
        let q = Arc::new(ByteStreamQueue::bounded(4));
        q.put(Bytes::from_static(b"abcd")).await;

        let q2 = q.clone();
        let producer = tokio::spawn(async move { q2.put(Bytes::from_static(b"e")).await });
        tokio::task::yield_now().await;
        assert!(!producer.is_finished(), "put should block while the queue is full");

        assert_eq!(q.get().await, Bytes::from_static(b"abcd"));
        producer.await.unwrap();
        assert_eq!(q.get().await, Bytes::from_static(b"e"));
    }

    #[tokio::test]
    async fn a_single_oversized_chunk_is_still_accepted() {
        let q = ByteStreamQueue::bounded(2);
        q.put(Bytes::from_static(b"much too long")).await;
        assert_eq!(q.get().await, Bytes::from_static(b"much too long"));
    }
}
