//! Process-wide coordination between trackers
//!
//! Every [`DeliveryQueue`](crate::queue::DeliveryQueue) registers itself with a
//! [`SharedContext`] at construction. The context can then report how many
//! events are still waiting, ask every queue to flush, and hold process exit
//! back until queues drain or the unload deadline passes.
//!
//! Queues are held weakly; a dropped queue leaves both the pending count and
//! the flush list. Queues signal progress through a shared [`Notify`], so the
//! unload guard sleeps until something changes instead of polling.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A queue as seen by the context
pub(crate) trait QueueHandle: Send + Sync {
    fn pending(&self) -> usize;

    /// Start a drain unless one is running
    fn flush_buffer(self: Arc<Self>);
}

/// Callback that asks one queue to flush
pub type FlushCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ContextInner {
    queues: Mutex<Vec<Weak<dyn QueueHandle>>>,
    flushers: Mutex<Vec<FlushCallback>>,
    unload_deadline: Mutex<Option<Instant>>,
    progress: Arc<Notify>,
}

/// Shared registry of queues and flush callbacks
///
/// Cheap to clone; clones share the same registries.
#[derive(Clone, Default)]
pub struct SharedContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("queues", &self.registered_queues())
            .field("flushers", &self.registered_flushers())
            .finish()
    }
}

impl SharedContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_queue(&self, queue: Weak<dyn QueueHandle>) {
        let mut queues = self.inner.queues.lock();
        queues.retain(|q| q.strong_count() > 0);
        queues.push(queue);
    }

    /// Handle queues use to wake the unload guard after a state change
    pub(crate) fn progress(&self) -> Arc<Notify> {
        self.inner.progress.clone()
    }

    fn live_queues(&self) -> Vec<Arc<dyn QueueHandle>> {
        self.inner.queues.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Add a callback invoked by [`flush_buffers`](Self::flush_buffers)
    ///
    /// Queues are flushed without registering one.
    pub fn register_flusher(&self, flusher: FlushCallback) {
        self.inner.flushers.lock().push(flusher);
    }

    /// Number of live queues
    pub fn registered_queues(&self) -> usize {
        self.inner
            .queues
            .lock()
            .iter()
            .filter(|q| q.strong_count() > 0)
            .count()
    }

    /// Number of things [`flush_buffers`](Self::flush_buffers) reaches: live
    /// queues plus registered callbacks
    pub fn registered_flushers(&self) -> usize {
        self.registered_queues() + self.inner.flushers.lock().len()
    }

    /// Events waiting across every live queue
    pub fn pending_events(&self) -> usize {
        self.live_queues().iter().map(|q| q.pending()).sum()
    }

    /// Flush every live queue, then invoke every registered callback
    pub fn flush_buffers(&self) {
        let queues = self.live_queues();
        let flushers = self.inner.flushers.lock().clone();
        tracing::debug!(queues = queues.len(), callbacks = flushers.len(), "Flushing all buffers");
        for queue in queues {
            queue.flush_buffer();
        }
        for flusher in flushers {
            flusher();
        }
    }

    /// Push the unload deadline to at least `delay` from now
    pub fn extend_unload_deadline(&self, delay: Duration) {
        let candidate = Instant::now() + delay;
        let mut deadline = self.inner.unload_deadline.lock();
        match *deadline {
            Some(current) if current >= candidate => {}
            _ => *deadline = Some(candidate),
        }
    }

    /// Current unload deadline, if any event has set one
    pub fn unload_deadline(&self) -> Option<Instant> {
        *self.inner.unload_deadline.lock()
    }

    /// Wait until every queue is empty or the unload deadline passes
    ///
    /// Returns the number of events still pending.
    pub async fn unload_guard(&self) -> usize {
        loop {
            // Registered before the check so a change in between is not lost
            let progress = self.inner.progress.notified();
            tokio::pin!(progress);
            progress.as_mut().enable();

            let pending = self.pending_events();
            if pending == 0 {
                return 0;
            }

            let now = Instant::now();
            let deadline = match self.unload_deadline() {
                Some(deadline) if deadline > now => deadline,
                _ => {
                    tracing::debug!(pending, "Unload deadline reached");
                    return pending;
                }
            };

            let _ = tokio::time::timeout_at(deadline, progress).await;
        }
    }
}
