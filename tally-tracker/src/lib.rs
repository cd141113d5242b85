//! Tally Tracker - delivery side of the Tally telemetry emitter
//!
//! The tracker turns events built by `tally-core` into HTTP sends:
//! - Persists every outbound event before sending it
//! - Sends strictly one event at a time, oldest first
//! - Bounds every send by a fixed timeout and keeps failed events queued
//! - Coordinates all trackers of a process through a [`SharedContext`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TALLY TRACKER                        │
//! │                                                           │
//! │  ┌─────────────┐        ┌──────────────────────────┐      │
//! │  │ TrackerCore │──────▶ │      DeliveryQueue       │      │
//! │  │ (metadata,  │ enqueue│  Idle ⇄ Draining         │      │
//! │  │  payloads)  │        └──────────────────────────┘      │
//! │  └─────────────┘           │                 │            │
//! │                    persist │                 │ send       │
//! │                    ┌───────▼──────┐   ┌──────▼───────┐    │
//! │                    │   Durable    │   │  Transport   │    │
//! │                    │   Storage    │   │ (HTTP POST)  │    │
//! │                    └──────────────┘   └──────────────┘    │
//! │                                                           │
//! │  SharedContext: queue registry, flushers, unload guard    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_tracker::{SharedContext, Tracker, TrackerConfig};
//! use tally_tracker::storage::InMemoryStorage;
//!
//! let context = SharedContext::new();
//! let mut tracker = Tracker::with_http(
//!     TrackerConfig::default().with_app_id("shop"),
//!     &context,
//!     Arc::new(InMemoryStorage::new()),
//! )?;
//! tracker.set_collector_url("collector.example.com");
//!
//! tracker.track("pageView", json!({"pageUrl": "/home"}), &[], None)?;
//!
//! // Before exit
//! context.unload_guard().await;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod queue;
pub mod storage;
pub mod transport;

pub use config::{QueueOptions, TrackerConfig};
pub use context::SharedContext;
pub use error::{StorageError, StorageResult, TrackerError, TrackerResult};
pub use queue::{DeliveryQueue, QueueEntry, QueueState, QueueStats};
pub use storage::{DisabledStorage, DurableStorage, FileStorage, InMemoryStorage};
pub use transport::{HttpTransport, NullTransport, Transport};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tally_core::{MetadataNode, MetadataStore, TrackerCore};

/// A configured tracker instance
pub struct Tracker {
    /// Configuration
    config: TrackerConfig,

    /// Static metadata and payload construction
    core: TrackerCore,

    /// Outbound queue
    queue: DeliveryQueue,

    /// Process-wide coordination
    context: SharedContext,

    /// Collector scheme and host, once set
    collector_url: Option<String>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("namespace", &self.config.namespace)
            .field("collector_url", &self.collector_url)
            .field("queue", &self.queue)
            .finish()
    }
}

impl Tracker {
    /// Create a tracker with a custom transport
    pub fn new(
        config: TrackerConfig,
        context: &SharedContext,
        storage: Arc<dyn DurableStorage>,
        transport: Arc<dyn Transport>,
    ) -> TrackerResult<Self> {
        config.validate()?;

        let queue = DeliveryQueue::new(config.queue_options(), context, storage, transport);

        let mut core = TrackerCore::new(config.encode_base64);
        core.set_tracker_version(&config.tracker_version);
        core.set_environment(&config.environment);
        core.set_tracker_namespace(&config.namespace);
        core.set_platform(&config.platform);
        if let Some(app_id) = &config.app_id {
            core.set_app_id(app_id);
        }
        if let Some(source) = &config.source {
            core.set_source(source);
        }

        tracing::debug!(
            namespace = %config.namespace,
            pending = queue.pending_count(),
            "Tracker created"
        );

        Ok(Self {
            config,
            core,
            queue,
            context: context.clone(),
            collector_url: None,
        })
    }

    /// Create a tracker sending over HTTP
    pub fn with_http(
        config: TrackerConfig,
        context: &SharedContext,
        storage: Arc<dyn DurableStorage>,
    ) -> TrackerResult<Self> {
        let transport = HttpTransport::new()?;
        Self::new(config, context, storage, Arc::new(transport))
    }

    /// Set the collector host, adding the scheme
    pub fn set_collector_url(&mut self, raw: &str) {
        let url = as_collector_url(raw, &self.config);
        tracing::debug!(url = %url, "Collector set");
        self.collector_url = Some(url);
    }

    /// Collector scheme and host
    pub fn collector_url(&self) -> Option<&str> {
        self.collector_url.as_deref()
    }

    /// Track one event
    ///
    /// Returns `Ok(false)` when do-not-track suppressed the event. Delivery
    /// failures are absorbed by the queue; only a missing collector surfaces.
    pub fn track(
        &self,
        event_type: &str,
        ctx: Value,
        metadata: &[Value],
        tstamp: Option<i64>,
    ) -> TrackerResult<bool> {
        if self.config.tracking_disabled() {
            tracing::debug!(event_type, "Do-not-track set; event dropped");
            return Ok(false);
        }

        let payload = self.core.track(event_type, ctx, metadata, tstamp);
        self.queue.enqueue(payload, self.collector_url.as_deref())?;
        self.context
            .extend_unload_deadline(Duration::from_millis(self.config.page_unload_timer_ms));
        Ok(true)
    }

    /// Start draining if idle
    pub fn flush(&self) -> TrackerResult<()> {
        self.queue.flush()
    }

    /// Get queue statistics
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// The underlying queue
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Get configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Static metadata and named setters
    pub fn core_mut(&mut self) -> &mut TrackerCore {
        &mut self.core
    }

    /// Place `value` at `path + [key]` in every future event
    pub fn add_static_metadata(&mut self, key: &str, value: impl Into<Value>, path: &[&str]) {
        self.core.add_static_metadata(key, value, path);
    }

    /// Merge a tree into every future event at `path`
    pub fn add_static_metadata_object(&mut self, object: Value, path: &[&str]) {
        self.core.add_static_metadata_object(object, path);
    }

    /// Replace all static metadata
    pub fn reset_static_metadata(&mut self, tree: MetadataNode) {
        self.core.reset_static_metadata(tree);
    }

    pub fn static_metadata(&self) -> &MetadataStore {
        self.core.static_metadata()
    }
}

fn strip_scheme(raw: &str) -> &str {
    raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw)
}

/// Add the scheme to a collector host
fn as_collector_url(raw: &str, config: &TrackerConfig) -> String {
    if config.force_secure_tracker {
        return format!("https://{}", strip_scheme(raw));
    }
    if config.force_unsecure_tracker {
        return format!("http://{}", strip_scheme(raw));
    }
    if raw.contains("://") {
        return raw.to_string();
    }
    format!("https://{}", raw)
}
