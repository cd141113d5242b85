//! Durable outbound delivery queue
//!
//! Events are appended to the tail, persisted after every mutation, and sent
//! to the collector strictly one at a time from the head. The queue is a two
//! state machine:
//!
//! - `Idle`: no send outstanding
//! - `Draining`: exactly one send outstanding
//!
//! Every transition happens synchronously under the queue lock inside
//! [`DeliveryQueue::enqueue`], [`DeliveryQueue::flush`] or the drain task, so
//! a caller that enqueues `p1` then `p2` always sees `p1` attempted first.
//! The network send itself runs on a spawned tokio task bounded by
//! [`SEND_TIMEOUT`]. A failed, rejected or timed out send leaves the head
//! queued and returns to `Idle`; nothing retries until the next trigger.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tally_core::util::now_millis;
use tally_core::PayloadEncoder;
use tokio::sync::{watch, Notify};

use crate::config::QueueOptions;
use crate::context::{QueueHandle, SharedContext};
use crate::error::{TrackerError, TrackerResult};
use crate::storage::DurableStorage;
use crate::transport::Transport;

/// Upper bound on a single send
pub const SEND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Queue length that triggers a drain
pub const BUFFER_SIZE: usize = 1;

/// Prefix of the durable storage key
pub const STORAGE_KEY_PREFIX: &str = "tallyOutQueue";

/// Drain state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// No send outstanding
    Idle,
    /// One send outstanding
    Draining,
}

/// One queued entry
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    /// Pre-encoding payload record
    Payload(PayloadEncoder),
    /// Already-encoded body, sent verbatim
    Encoded(String),
    /// Structurally invalid data found in storage; discarded on reaching the head
    Malformed(Value),
}

impl QueueEntry {
    /// Classify one element of the persisted array
    pub fn from_persisted(value: Value) -> Self {
        match value {
            Value::String(body) => QueueEntry::Encoded(body),
            Value::Object(map) if !map.is_empty() => {
                let value = Value::Object(map);
                match PayloadEncoder::from_persisted(value.clone()) {
                    Ok(payload) => QueueEntry::Payload(payload),
                    Err(_) => QueueEntry::Malformed(value),
                }
            }
            other => QueueEntry::Malformed(other),
        }
    }

    /// The entry as stored in the persisted array
    pub fn to_persisted(&self) -> TrackerResult<Value> {
        match self {
            QueueEntry::Payload(payload) => Ok(payload.to_persisted()?),
            QueueEntry::Encoded(body) => Ok(Value::String(body.clone())),
            QueueEntry::Malformed(value) => Ok(value.clone()),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, QueueEntry::Malformed(_))
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries currently queued
    pub pending_count: usize,

    /// Current drain state
    pub state: QueueState,

    /// Total entries enqueued by this instance
    pub total_enqueued: u64,

    /// Total entries acknowledged by the collector
    pub total_delivered: u64,

    /// Sends that failed, were rejected or timed out
    pub total_failed_sends: u64,

    /// Malformed entries dropped from the head
    pub total_discarded: u64,

    /// Last successful delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
}

struct QueueInner {
    entries: VecDeque<QueueEntry>,
    state: QueueState,
    collector_url: Option<String>,
}

/// A send prepared under the lock, performed outside it
struct PendingSend {
    url: String,
    body: String,
}

struct QueueShared {
    options: QueueOptions,
    storage_key: String,
    storage: Arc<dyn DurableStorage>,
    transport: Arc<dyn Transport>,

    inner: Mutex<QueueInner>,
    state_tx: watch::Sender<QueueState>,
    progress: Arc<Notify>,

    total_enqueued: AtomicU64,
    total_delivered: AtomicU64,
    total_failed_sends: AtomicU64,
    total_discarded: AtomicU64,
    last_delivery_at: Mutex<Option<DateTime<Utc>>>,
}

impl QueueHandle for QueueShared {
    fn pending(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn flush_buffer(self: Arc<Self>) {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, key = %self.storage_key, "Flush failed");
        }
    }
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        self.progress.notify_waiters();
    }
}

/// Durable, strictly ordered, single-flight delivery queue
///
/// Cheap to clone; clones drive the same queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("storage_key", &self.shared.storage_key)
            .field("storage", &self.shared.storage.name())
            .field("transport", &self.shared.transport.name())
            .field("pending", &self.pending_count())
            .field("state", &self.state())
            .finish()
    }
}

/// Storage key for one tracker instance
pub fn storage_key(instance_id: &str, namespace: &str) -> String {
    format!("{}_{}_{}", STORAGE_KEY_PREFIX, instance_id, namespace)
}

fn is_success(status: u16) -> bool {
    (200..400).contains(&status)
}

impl DeliveryQueue {
    /// Create a queue, hydrating it from durable storage
    ///
    /// Hydration never fails: a missing, unreadable, corrupt or non-array
    /// stored value yields an empty queue.
    pub fn new(
        options: QueueOptions,
        context: &SharedContext,
        storage: Arc<dyn DurableStorage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let storage_key = storage_key(&options.instance_id, &options.namespace);
        let entries = if options.use_durable_storage {
            hydrate(storage.as_ref(), &storage_key)
        } else {
            VecDeque::new()
        };

        tracing::debug!(
            key = %storage_key,
            storage = storage.name(),
            transport = transport.name(),
            restored = entries.len(),
            "Delivery queue created"
        );

        let (state_tx, _) = watch::channel(QueueState::Idle);
        let shared = Arc::new(QueueShared {
            options,
            storage_key,
            storage,
            transport,
            inner: Mutex::new(QueueInner {
                entries,
                state: QueueState::Idle,
                collector_url: None,
            }),
            state_tx,
            progress: context.progress(),
            total_enqueued: AtomicU64::new(0),
            total_delivered: AtomicU64::new(0),
            total_failed_sends: AtomicU64::new(0),
            total_discarded: AtomicU64::new(0),
            last_delivery_at: Mutex::new(None),
        });

        let handle: Arc<dyn QueueHandle> = shared.clone();
        context.register_queue(Arc::downgrade(&handle));

        Self { shared }
    }

    /// Append a payload and start draining if idle
    ///
    /// `endpoint_base` (scheme and host) replaces the remembered collector
    /// URL when given. The entry is queued and persisted even when this
    /// returns [`TrackerError::CollectorNotConfigured`].
    pub fn enqueue(&self, payload: PayloadEncoder, endpoint_base: Option<&str>) -> TrackerResult<()> {
        self.shared.enqueue(payload, endpoint_base)
    }

    /// Start draining if idle; no-op while a send is outstanding
    pub fn flush(&self) -> TrackerResult<()> {
        self.shared.flush()
    }

    /// Wait until the queue is `Idle`
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == QueueState::Idle).await;
    }

    /// Current drain state
    pub fn state(&self) -> QueueState {
        self.shared.inner.lock().state
    }

    /// Number of queued entries
    pub fn pending_count(&self) -> usize {
        self.shared.pending()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Snapshot of the queued entries, head first
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.shared.inner.lock().entries.iter().cloned().collect()
    }

    /// Effective collector URL, once one has been supplied
    pub fn collector_url(&self) -> Option<String> {
        self.shared.inner.lock().collector_url.clone()
    }

    /// Durable storage key of this queue
    pub fn storage_key(&self) -> &str {
        &self.shared.storage_key
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let (pending_count, state) = {
            let inner = self.shared.inner.lock();
            (inner.entries.len(), inner.state)
        };

        QueueStats {
            pending_count,
            state,
            total_enqueued: self.shared.total_enqueued.load(Ordering::SeqCst),
            total_delivered: self.shared.total_delivered.load(Ordering::SeqCst),
            total_failed_sends: self.shared.total_failed_sends.load(Ordering::SeqCst),
            total_discarded: self.shared.total_discarded.load(Ordering::SeqCst),
            last_delivery_at: *self.shared.last_delivery_at.lock(),
        }
    }
}

fn hydrate(storage: &dyn DurableStorage, key: &str) -> VecDeque<QueueEntry> {
    let text = match storage.read(key) {
        Ok(Some(text)) => text,
        Ok(None) => return VecDeque::new(),
        Err(e) => {
            tracing::warn!(error = %e, key, "Could not read stored queue; starting empty");
            return VecDeque::new();
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => items.into_iter().map(QueueEntry::from_persisted).collect(),
        Ok(_) => {
            tracing::warn!(key, "Stored queue is not an array; starting empty");
            VecDeque::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, key, "Stored queue is not valid JSON; starting empty");
            VecDeque::new()
        }
    }
}

/// Merge fresh per-send delivery metadata into a payload
fn attach_batch_info(payload: &mut PayloadEncoder) {
    payload.merge_metadata_value(json!({
        "batchInfo": {
            "batchId": uuid::Uuid::new_v4().to_string(),
            "totalEvents": 1,
            "source": "client",
            "serverTime": now_millis().to_string(),
        }
    }));
}

impl QueueShared {
    fn enqueue(self: &Arc<Self>, payload: PayloadEncoder, endpoint_base: Option<&str>) -> TrackerResult<()> {
        let mut inner = self.inner.lock();
        if let Some(base) = endpoint_base {
            inner.collector_url = Some(format!("{}{}", base, self.options.collector_path()));
        }
        inner.entries.push_back(QueueEntry::Payload(payload));
        self.total_enqueued.fetch_add(1, Ordering::SeqCst);

        let saved = self.persist(&inner);
        if inner.state == QueueState::Idle && (!saved || inner.entries.len() >= BUFFER_SIZE) {
            self.start_drain(&mut inner)?;
        }
        Ok(())
    }

    fn flush(self: &Arc<Self>) -> TrackerResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == QueueState::Draining {
            return Ok(());
        }
        self.start_drain(&mut inner)
    }

    fn set_state(&self, inner: &mut QueueInner, state: QueueState) {
        if inner.state != state {
            tracing::debug!(key = %self.storage_key, ?state, "Queue state changed");
        }
        inner.state = state;
        self.state_tx.send_replace(state);
        self.progress.notify_waiters();
    }

    /// Write the whole queue to storage; `false` when it was not saved
    fn persist(&self, inner: &QueueInner) -> bool {
        if !self.options.use_durable_storage {
            return false;
        }

        let items = match inner
            .entries
            .iter()
            .map(QueueEntry::to_persisted)
            .collect::<TrackerResult<Vec<Value>>>()
        {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.storage_key, "Could not serialize queue");
                return false;
            }
        };

        let text = match serde_json::to_string(&items) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.storage_key, "Could not serialize queue");
                return false;
            }
        };

        match self.storage.write(&self.storage_key, &text) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %self.storage_key,
                    storage = self.storage.name(),
                    "Could not persist queue; continuing in memory"
                );
                false
            }
        }
    }

    /// Discard malformed head entries and prepare the next send
    ///
    /// Returns `None` (and goes `Idle`) once the queue is empty. Otherwise the
    /// queue is `Draining` when this returns.
    fn prepare_next(&self, inner: &mut QueueInner) -> TrackerResult<Option<PendingSend>> {
        let mut discarded = 0u64;
        let prepared = loop {
            match inner.entries.front() {
                None => break None,
                Some(QueueEntry::Malformed(value)) => {
                    tracing::warn!(
                        key = %self.storage_key,
                        entry = %value,
                        "Discarding malformed queue entry"
                    );
                    inner.entries.pop_front();
                    discarded += 1;
                    continue;
                }
                Some(_) => {}
            }

            let Some(url) = inner.collector_url.clone() else {
                self.finish_discard(inner, discarded);
                self.set_state(inner, QueueState::Idle);
                return Err(TrackerError::CollectorNotConfigured);
            };

            let body = match inner.entries.front_mut() {
                Some(QueueEntry::Payload(payload)) => {
                    attach_batch_info(payload);
                    payload.encode()
                }
                Some(QueueEntry::Encoded(body)) => Ok(body.clone()),
                _ => continue,
            };

            match body {
                Ok(body) => break Some(PendingSend { url, body }),
                Err(e) => {
                    tracing::warn!(error = %e, key = %self.storage_key, "Discarding unencodable queue entry");
                    inner.entries.pop_front();
                    discarded += 1;
                }
            }
        };

        self.finish_discard(inner, discarded);
        match prepared {
            Some(send) => {
                self.set_state(inner, QueueState::Draining);
                Ok(Some(send))
            }
            None => {
                self.set_state(inner, QueueState::Idle);
                Ok(None)
            }
        }
    }

    fn finish_discard(&self, inner: &QueueInner, discarded: u64) {
        if discarded > 0 {
            self.total_discarded.fetch_add(discarded, Ordering::SeqCst);
            self.persist(inner);
        }
    }

    fn start_drain(self: &Arc<Self>, inner: &mut QueueInner) -> TrackerResult<()> {
        let Some(send) = self.prepare_next(inner)? else {
            return Ok(());
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Arc::clone(self).drain(send));
            }
            Err(_) => {
                tracing::warn!(key = %self.storage_key, "No tokio runtime; delivery deferred to next flush");
                self.set_state(inner, QueueState::Idle);
            }
        }
        Ok(())
    }

    /// Send the head, then keep going until empty or blocked
    async fn drain(self: Arc<Self>, mut send: PendingSend) {
        loop {
            tracing::debug!(key = %self.storage_key, url = %send.url, "Sending queue head");

            let result = match tokio::time::timeout(SEND_TIMEOUT, self.transport.post(&send.url, send.body)).await {
                Ok(result) => result,
                Err(_) => Err(TrackerError::Timeout(SEND_TIMEOUT.as_millis() as u64)),
            };

            let next = {
                let mut inner = self.inner.lock();
                match result {
                    Ok(status) if is_success(status) => {
                        inner.entries.pop_front();
                        self.total_delivered.fetch_add(1, Ordering::SeqCst);
                        *self.last_delivery_at.lock() = Some(Utc::now());
                        self.persist(&inner);
                        tracing::debug!(key = %self.storage_key, status, "Event delivered");
                    }
                    Ok(status) => {
                        tracing::warn!(key = %self.storage_key, status, "Collector rejected event; keeping it queued");
                        self.total_failed_sends.fetch_add(1, Ordering::SeqCst);
                        self.set_state(&mut inner, QueueState::Idle);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            key = %self.storage_key,
                            error = %e,
                            recoverable = e.is_recoverable(),
                            "Send failed; keeping event queued"
                        );
                        self.total_failed_sends.fetch_add(1, Ordering::SeqCst);
                        self.set_state(&mut inner, QueueState::Idle);
                        return;
                    }
                }

                match self.prepare_next(&mut inner) {
                    Ok(Some(next)) => next,
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!(key = %self.storage_key, error = %e, "Drain stopped");
                        return;
                    }
                }
            };

            send = next;
        }
    }
}
