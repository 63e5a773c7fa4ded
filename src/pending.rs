//! Correlation multiplexer: pending-response table and tag allocator.
//!
//! Every outbound request registers a continuation under a fresh tag; the
//! matching inbound frame resolves exactly that continuation. Tags come
//! from a monotonic counter wrapping modulo a fixed ceiling, and the
//! allocator refuses to reissue a tag that is still pending - reuse would
//! silently hand one request another request's response.
//!
//! The table is owned by one session. No global state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::codec::MsgPackCodec;
use crate::error::{JoedbError, Result};
use crate::protocol::Frame;
use crate::response::Response;

/// Receiver end of one registered continuation.
pub type ResponseReceiver = oneshot::Receiver<Result<Response>>;

/// One in-flight request awaiting its response frame.
struct PendingEntry {
    sent_at: Instant,
    continuation: oneshot::Sender<Result<Response>>,
}

struct Inner {
    entries: HashMap<u64, PendingEntry>,
    next_tag: u64,
    closed: bool,
}

/// Bounded map of in-flight requests keyed by correlation tag.
pub struct PendingTable {
    inner: Mutex<Inner>,
    ceiling: u64,
}

impl PendingTable {
    /// Create a table whose tags wrap modulo `ceiling`.
    pub fn new(ceiling: u64) -> Self {
        assert!(ceiling > 0);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_tag: 0,
                closed: false,
            }),
            ceiling,
        }
    }

    /// Allocate a fresh tag and register a continuation under it.
    ///
    /// Scans forward from the counter, skipping tags still pending.
    /// Returns [`JoedbError::TagSpaceExhausted`] when every tag is in
    /// flight, and [`JoedbError::ConnectionClosed`] after [`fail_all`].
    ///
    /// [`fail_all`]: PendingTable::fail_all
    pub fn try_register(&self) -> Result<(u64, ResponseReceiver)> {
        let mut inner = self.inner.lock().expect("pending table poisoned");

        if inner.closed {
            return Err(JoedbError::ConnectionClosed);
        }

        for _ in 0..self.ceiling {
            let tag = inner.next_tag;
            inner.next_tag = (inner.next_tag + 1) % self.ceiling;

            if !inner.entries.contains_key(&tag) {
                let (tx, rx) = oneshot::channel();
                inner.entries.insert(
                    tag,
                    PendingEntry {
                        sent_at: Instant::now(),
                        continuation: tx,
                    },
                );
                return Ok((tag, rx));
            }
        }

        Err(JoedbError::TagSpaceExhausted)
    }

    /// Like [`try_register`], but waits up to `timeout` for a tag to free
    /// when the whole space is in flight. Exhaustion is the backpressure
    /// signal: the next `run` blocks here instead of colliding.
    ///
    /// [`try_register`]: PendingTable::try_register
    pub async fn register_waiting(&self, timeout: Duration) -> Result<(u64, ResponseReceiver)> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            match self.try_register() {
                Err(JoedbError::TagSpaceExhausted) if start.elapsed() <= timeout => {
                    tokio::time::sleep(check_interval).await;
                }
                other => return other,
            }
        }
    }

    /// Resolve the entry registered under this frame's tag.
    ///
    /// Decodes the payload, stamps the elapsed request time, and fires the
    /// continuation exactly once. A tag with no registered entry is a
    /// protocol-level anomaly (dropped or duplicated frame); it is logged
    /// and dropped without disturbing other in-flight requests.
    pub fn resolve(&self, frame: Frame) {
        let entry = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            inner.entries.remove(&frame.tag())
        };

        let entry = match entry {
            Some(e) => e,
            None => {
                tracing::warn!(
                    tag = frame.tag(),
                    "no pending request for tag, dropping frame"
                );
                return;
            }
        };

        let elapsed_ms = entry.sent_at.elapsed().as_secs_f64() * 1000.0;
        let outcome =
            MsgPackCodec::decode_value(frame.payload()).map(|value| Response::new(value, elapsed_ms));

        // The receiver may have been dropped by an abandoned caller.
        let _ = entry.continuation.send(outcome);
    }

    /// Drop a registration whose request was never sent.
    pub fn discard(&self, tag: u64) {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        inner.entries.remove(&tag);
    }

    /// Fail every pending entry with [`JoedbError::ConnectionClosed`] and
    /// refuse further registrations. Called when the transport dies so no
    /// future is left hanging forever.
    pub fn fail_all(&self) {
        let entries = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };

        for (_, entry) in entries {
            let _ = entry.continuation.send(Err(JoedbError::ConnectionClosed));
        }
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("pending table poisoned")
            .entries
            .len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
