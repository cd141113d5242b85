//! Configuration for Tally Tracker

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// Main tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracker instance namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Stable identifier of the embedding instance (part of the storage key)
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Whether payloads are base64-encoded on the wire
    #[serde(default = "default_true")]
    pub encode_base64: bool,

    /// Whether the outbound queue is persisted
    #[serde(default = "default_true")]
    pub use_durable_storage: bool,

    /// Collector API version, part of the collector path
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Deployment environment, part of the collector path
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Honour the host's do-not-track signal
    #[serde(default)]
    pub respect_do_not_track: bool,

    /// Do-not-track signal reported by the host
    #[serde(default)]
    pub do_not_track: bool,

    /// Always use https for the collector
    #[serde(default)]
    pub force_secure_tracker: bool,

    /// Always use http for the collector
    #[serde(default)]
    pub force_unsecure_tracker: bool,

    /// How long the unload guard waits after each event, in milliseconds
    #[serde(default = "default_page_unload_timer")]
    pub page_unload_timer_ms: u64,

    /// Application identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// Platform reported in device info
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Event source (app or website)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Tracker version reported in the header
    #[serde(default = "default_tracker_version")]
    pub tracker_version: String,
}

fn default_true() -> bool { true }
fn default_namespace() -> String { "default".to_string() }
fn default_instance_id() -> String { "tally".to_string() }
fn default_api_version() -> String { "v1".to_string() }
fn default_environment() -> String { "production".to_string() }
fn default_page_unload_timer() -> u64 { 500 }
fn default_platform() -> String { "web".to_string() }
fn default_tracker_version() -> String { format!("rs-{}", env!("CARGO_PKG_VERSION")) }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            instance_id: default_instance_id(),
            encode_base64: true,
            use_durable_storage: true,
            api_version: default_api_version(),
            environment: default_environment(),
            respect_do_not_track: false,
            do_not_track: false,
            force_secure_tracker: false,
            force_unsecure_tracker: false,
            page_unload_timer_ms: 500,
            app_id: None,
            platform: default_platform(),
            source: None,
            tracker_version: default_tracker_version(),
        }
    }
}

impl TrackerConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> TrackerResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| TrackerError::Config(format!("invalid tracker config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Reject contradictory settings
    pub fn validate(&self) -> TrackerResult<()> {
        if self.force_secure_tracker && self.force_unsecure_tracker {
            return Err(TrackerError::Config(
                "force_secure_tracker and force_unsecure_tracker are mutually exclusive".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(TrackerError::Config("namespace must not be empty".to_string()));
        }
        Ok(())
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set the deployment environment
    pub fn with_environment(mut self, environment: &str) -> Self {
        self.environment = environment.to_string();
        self
    }

    /// Enable or disable base64 payloads
    pub fn with_base64(mut self, enabled: bool) -> Self {
        self.encode_base64 = enabled;
        self
    }

    /// Enable or disable queue persistence
    pub fn with_durable_storage(mut self, enabled: bool) -> Self {
        self.use_durable_storage = enabled;
        self
    }

    /// Set the application id
    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = Some(app_id.to_string());
        self
    }

    /// Whether events should be dropped before reaching the queue
    pub fn tracking_disabled(&self) -> bool {
        self.respect_do_not_track && self.do_not_track
    }

    /// Options for this tracker's delivery queue
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            instance_id: self.instance_id.clone(),
            namespace: self.namespace.clone(),
            use_durable_storage: self.use_durable_storage,
            api_version: self.api_version.clone(),
            environment: self.environment.clone(),
        }
    }
}

/// Construction options for a delivery queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Stable identifier of the embedding instance
    pub instance_id: String,

    /// Tracker namespace
    pub namespace: String,

    /// Persist the queue after every mutation
    pub use_durable_storage: bool,

    /// Collector API version
    pub api_version: String,

    /// Deployment environment
    pub environment: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        TrackerConfig::default().queue_options()
    }
}

impl QueueOptions {
    /// Path appended to the endpoint base: `/log/{api_version}/{environment}`
    pub fn collector_path(&self) -> String {
        format!("/log/{}/{}", self.api_version, self.environment)
    }
}
