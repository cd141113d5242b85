//! # Tally Core
//!
//! Pure data side of the Tally telemetry emitter:
//!
//! - **Metadata**: hierarchical metadata trees with deep merge and reset
//! - **Payload**: per-event records encoded into canonical snake_case JSON,
//!   optionally base64-wrapped
//! - **Tracker core**: static metadata shared by every event and the
//!   `track` entry point that stamps event ids and timestamps
//!
//! Nothing in this crate performs I/O. Delivery lives in `tally-tracker`.
//!
//! ## Example
//!
//! ```rust
//! use tally_core::TrackerCore;
//! use serde_json::json;
//!
//! let mut core = TrackerCore::new(false);
//! core.set_app_id("shop-web");
//!
//! let payload = core.track("pageView", json!({"pageUrl": "/home"}), &[], Some(1_700_000_000_000));
//! let built = payload.build();
//!
//! assert_eq!(built["header"]["app_id"], "shop-web");
//! assert_eq!(built["events"][0]["type"], "page_view");
//! assert_eq!(built["events"][0]["ctx"]["page_url"], "/home");
//! assert_eq!(built["events"][0]["client_tstamp"], 1_700_000_000_000i64);
//! ```

pub mod error;
pub mod metadata;
pub mod payload;
pub mod tracker;
pub mod util;

pub use error::{CoreError, CoreResult};
pub use metadata::{MetadataNode, MetadataStore, MetadataValue};
pub use payload::PayloadEncoder;
pub use tracker::{PayloadCallback, TrackerCore};
pub use util::to_snake_case;
