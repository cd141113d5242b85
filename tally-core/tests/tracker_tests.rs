//! TrackerCore tests

use serde_json::{json, Value};
use tally_core::{MetadataNode, PayloadEncoder, TrackerCore};

/// Assert the injected identity fields are present, then strip them
fn check_required_fields(mut payload: PayloadEncoder) -> PayloadEncoder {
    let built = payload.build();
    let event = &built["events"][0];

    let event_id = event["event_id"].as_str().expect("event_id should be a string");
    assert!(uuid::Uuid::parse_str(event_id).is_ok());
    assert!(event["client_tstamp"].as_i64().unwrap() > 0);

    payload.remove("eventId");
    payload.remove("clientTstamp");
    payload
}

fn compare(payload: PayloadEncoder, expected: Value) {
    assert_eq!(check_required_fields(payload).build(), expected);
}

fn compare_encoded(payload: PayloadEncoder, expected: &str) {
    assert_eq!(check_required_fields(payload).encode().unwrap(), expected);
}

#[test]
fn test_track_generic_event() {
    let core = TrackerCore::new(false);
    let payload = core.track("signupSuccess", json!({"signupSource": "fb"}), &[], None);

    compare(
        payload,
        json!({"events": [{"type": "signup_success", "ctx": {"signup_source": "fb"}}]}),
    );
}

#[test]
fn test_track_as_raw_json() {
    let core = TrackerCore::new(false);
    let payload = core.track("signupSuccess", json!({"signupSource": "fb"}), &[], None);

    compare_encoded(
        payload,
        r#"{"events":[{"type":"signup_success","ctx":{"signup_source":"fb"}}]}"#,
    );
}

#[test]
fn test_track_as_base64() {
    let core = TrackerCore::new(true);
    let payload = core.track("signupSuccess", json!({"signupSource": "fb"}), &[], None);

    compare_encoded(
        payload,
        "eyJldmVudHMiOlt7InR5cGUiOiJzaWdudXBfc3VjY2VzcyIsImN0eCI6eyJzaWdudXBfc291cmNlIjoiZmIifX1dfQ==",
    );
}

#[test]
fn test_toggle_base64() {
    let mut core = TrackerCore::new(false);
    let payload = core.track("signupSuccess", json!({"signupSource": "fb"}), &[], None);
    assert!(!payload.is_base64());

    core.set_base64_encoding(true);
    let payload = core.track("signupSuccess", json!({"signupSource": "fb"}), &[], None);
    assert!(payload.is_base64());
}

#[test]
fn test_page_view_encoding() {
    let core = TrackerCore::new(false);
    let payload = core.track("pageView", json!({"url": "a"}), &[], None);

    compare_encoded(payload, r#"{"events":[{"type":"page_view","ctx":{"url":"a"}}]}"#);
}

#[test]
fn test_ctx_nulls_are_dropped() {
    let core = TrackerCore::new(false);
    let payload = core.track(
        "pageView",
        json!({"url": "http://www.example.com", "page": null, "referrer": "http://www.google.com"}),
        &[],
        None,
    );

    compare(
        payload,
        json!({"events": [{
            "type": "page_view",
            "ctx": {"url": "http://www.example.com", "referrer": "http://www.google.com"}
        }]}),
    );
}

#[test]
fn test_explicit_timestamp() {
    let core = TrackerCore::new(false);
    let payload = core.track("pagePing", json!({}), &[], Some(1_477_401_868_000));

    assert_eq!(payload.build()["events"][0]["client_tstamp"], json!(1_477_401_868_000i64));
}

#[test]
fn test_event_ids_are_unique() {
    let core = TrackerCore::new(false);
    let a = core.track("x", json!({}), &[], None);
    let b = core.track("x", json!({}), &[], None);

    assert_ne!(a.get("eventId"), b.get("eventId"));
}

#[test]
fn test_static_metadata_setters() {
    let mut core = TrackerCore::new(false);
    core.set_tracker_version("rs-0.1.0");
    core.set_environment("staging");
    core.set_app_id("shop");
    core.set_platform("web");
    core.set_user_id("user-1");
    core.set_screen_resolution(1920, 1080);
    core.set_lang("en-US");

    let payload = core.track("pageView", json!({}), &[], None);
    let built = payload.build();

    assert_eq!(built["header"]["versions"]["tally_api_version"], json!("rs-0.1.0"));
    assert_eq!(built["header"]["env"], json!("staging"));
    assert_eq!(built["header"]["app_id"], json!("shop"));
    assert_eq!(built["device_info"]["platform"], json!("web"));
    assert_eq!(built["device_info"]["screen_resolution"], json!("1920x1080"));
    assert_eq!(built["user_info"]["guid"], json!("user-1"));
    assert_eq!(built["user_info"]["locale"], json!("en-US"));
}

#[test]
fn test_per_call_metadata_wins_over_static() {
    let mut core = TrackerCore::new(false);
    core.add_static_metadata("platform", "web", &["deviceInfo"]);
    core.add_static_metadata("charset", "utf-8", &["deviceInfo"]);

    let payload = core.track(
        "pageView",
        json!({}),
        &[
            json!({"deviceInfo": {"platform": "mobile"}}),
            json!({"webPage": {"id": "abc"}}),
        ],
        None,
    );
    let built = payload.build();

    assert_eq!(built["device_info"], json!({"charset": "utf-8", "platform": "mobile"}));
    assert_eq!(built["web_page"]["id"], json!("abc"));

    // the static store itself is untouched
    assert_eq!(
        core.static_metadata().collect().to_value(),
        json!({"deviceInfo": {"charset": "utf-8", "platform": "web"}})
    );
}

#[test]
fn test_static_metadata_object_and_reset() {
    let mut core = TrackerCore::new(false);
    core.add_static_metadata_object(json!({"cookies": true, "java": false}), &["deviceInfo", "browserFeatures"]);
    assert_eq!(
        core.static_metadata().collect().to_value(),
        json!({"deviceInfo": {"browserFeatures": {"cookies": true, "java": false}}})
    );

    core.reset_static_metadata(MetadataNode::try_from(json!({"header": {"source": "app"}})).unwrap());
    assert_eq!(
        core.static_metadata().collect().to_value(),
        json!({"header": {"source": "app"}})
    );
}

#[test]
fn test_callback_applied_to_every_payload() {
    let core = TrackerCore::new(false).with_callback(Box::new(|pb: &mut PayloadEncoder| {
        pb.add("sampled", true);
    }));

    let payload = core.track("pageView", json!({}), &[], None);
    assert_eq!(payload.get("sampled"), Some(&json!(true)));
}
