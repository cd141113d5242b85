//! Tracker core: static metadata plus event construction
//!
//! The core owns the long-lived static metadata store and turns an event
//! type, a context dict and per-call metadata into a [`PayloadEncoder`]
//! stamped with an event id and client timestamp. It performs no I/O; the
//! caller hands the result to a delivery queue.

use std::fmt;

use serde_json::{Map, Value};

use crate::metadata::{MetadataNode, MetadataStore};
use crate::payload::PayloadEncoder;
use crate::util::{now_millis, place_in_path};

/// Hook applied to every payload after metadata has been merged
pub type PayloadCallback = Box<dyn Fn(&mut PayloadEncoder) + Send + Sync>;

/// Builds payloads and holds metadata shared by every event
pub struct TrackerCore {
    base64: bool,
    static_metadata: MetadataStore,
    callback: Option<PayloadCallback>,
}

impl fmt::Debug for TrackerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerCore")
            .field("base64", &self.base64)
            .field("static_metadata", &self.static_metadata)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Default for TrackerCore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TrackerCore {
    /// Create a core; `base64` is the default encoding for built payloads
    pub fn new(base64: bool) -> Self {
        Self {
            base64,
            static_metadata: MetadataStore::new(),
            callback: None,
        }
    }

    /// Install a hook applied to every payload built by `track`
    pub fn with_callback(mut self, callback: PayloadCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Switch base64 encoding for payloads built from now on
    pub fn set_base64_encoding(&mut self, enabled: bool) {
        self.base64 = enabled;
    }

    /// Merge a whole metadata object under `path`
    pub fn add_static_metadata_object(&mut self, object: Value, path: &[&str]) {
        self.static_metadata.merge_value(place_in_path(object, path));
    }

    /// Set `value` at `path + [key]` in the static metadata
    pub fn add_static_metadata(&mut self, key: &str, value: impl Into<Value>, path: &[&str]) {
        let mut full_path = path.to_vec();
        full_path.push(key);
        self.static_metadata
            .merge_value(place_in_path(value.into(), &full_path));
    }

    /// Replace the static metadata with `tree`
    pub fn reset_static_metadata(&mut self, tree: MetadataNode) {
        self.static_metadata.reset(tree);
    }

    /// Current static metadata
    pub fn static_metadata(&self) -> &MetadataStore {
        &self.static_metadata
    }

    pub fn set_tracker_version(&mut self, version: &str) {
        self.add_static_metadata("tallyApiVersion", version, &["header", "versions"]);
    }

    pub fn set_tracker_namespace(&mut self, namespace: &str) {
        self.add_static_metadata("trackerNamespace", namespace, &["deviceInfo"]);
    }

    /// Event source (app or website)
    pub fn set_source(&mut self, source: &str) {
        self.add_static_metadata("source", source, &["header"]);
    }

    /// Deployment environment (dev, production, ...)
    pub fn set_environment(&mut self, environment: &str) {
        self.add_static_metadata("env", environment, &["header"]);
    }

    pub fn set_app_id(&mut self, app_id: &str) {
        self.add_static_metadata("appId", app_id, &["header"]);
    }

    pub fn set_ip_address(&mut self, ip: &str) {
        self.add_static_metadata("ip", ip, &["header"]);
    }

    pub fn set_platform(&mut self, platform: &str) {
        self.add_static_metadata("platform", platform, &["deviceInfo"]);
    }

    pub fn set_user_id(&mut self, user_id: &str) {
        self.add_static_metadata("guid", user_id, &["userInfo"]);
    }

    pub fn set_screen_resolution(&mut self, width: u32, height: u32) {
        self.add_static_metadata(
            "screenResolution",
            format!("{}x{}", width, height),
            &["deviceInfo"],
        );
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.add_static_metadata(
            "viewportDimensions",
            format!("{}x{}", width, height),
            &["deviceInfo"],
        );
    }

    pub fn set_color_depth(&mut self, depth: u32) {
        self.add_static_metadata("colorDepth", depth, &["deviceInfo"]);
    }

    pub fn set_timezone(&mut self, timezone: &str) {
        self.add_static_metadata("timezone", timezone, &["deviceInfo"]);
    }

    pub fn set_lang(&mut self, lang: &str) {
        self.add_static_metadata("locale", lang, &["userInfo"]);
    }

    /// Build the payload for one event.
    ///
    /// Null members of `ctx` are dropped. Static metadata is merged first,
    /// then each per-call tree in order, so later trees win on conflicts.
    /// `tstamp` defaults to now (epoch milliseconds).
    pub fn track(
        &self,
        event_type: &str,
        ctx: Value,
        metadata: &[Value],
        tstamp: Option<i64>,
    ) -> PayloadEncoder {
        let mut pb = PayloadEncoder::new(self.base64);

        pb.add("type", event_type);
        pb.add("ctx", Value::Object(remove_empty_properties(ctx)));
        pb.add("eventId", uuid::Uuid::new_v4().to_string());
        pb.add("clientTstamp", tstamp.unwrap_or_else(now_millis));

        pb.merge_metadata_collection(&self.static_metadata);
        for tree in metadata {
            pb.merge_metadata_value(tree.clone());
        }

        if let Some(callback) = &self.callback {
            callback(&mut pb);
        }

        pb
    }
}

/// Shallow copy of an object without its null members
fn remove_empty_properties(ctx: Value) -> Map<String, Value> {
    match ctx {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Map::new(),
    }
}
