//! Durable storage backend tests

mod common;

use std::sync::Arc;

use common::{payload, MockTransport, Reply};
use tally_tracker::{DeliveryQueue, DurableStorage, FileStorage, QueueOptions, SharedContext, StorageError};
use tempfile::TempDir;

#[test]
fn test_file_storage_roundtrip() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();

    assert_eq!(storage.read("tallyOutQueue_tally_default").unwrap(), None);

    storage.write("tallyOutQueue_tally_default", "[1,2]").unwrap();
    storage.write("tallyOutQueue_tally_default", "[3]").unwrap();
    assert_eq!(
        storage.read("tallyOutQueue_tally_default").unwrap().as_deref(),
        Some("[3]")
    );

    storage.remove("tallyOutQueue_tally_default").unwrap();
    assert_eq!(storage.read("tallyOutQueue_tally_default").unwrap(), None);
    // removing twice is fine
    storage.remove("tallyOutQueue_tally_default").unwrap();
}

#[test]
fn test_file_storage_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();

    storage.write("a", "[]").unwrap();
    storage.write("b", "[]").unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.json", "b.json"]);
}

#[test]
fn test_file_storage_creates_directory() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("state").join("tally");

    let storage = FileStorage::new(&nested).unwrap();
    assert!(nested.is_dir());
    assert_eq!(storage.directory(), nested.as_path());
}

#[test]
fn test_file_storage_read_error_is_reported() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();

    // a directory where the key file should be
    std::fs::create_dir(dir.path().join("blocked.json")).unwrap();
    assert!(matches!(storage.read("blocked"), Err(StorageError::Io(_))));
}

#[tokio::test]
async fn test_queue_survives_restart_on_disk() {
    let dir = TempDir::new().unwrap();
    let options = QueueOptions::default();

    {
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        let transport = MockTransport::scripted(vec![Reply::Status(500)]);
        let queue = DeliveryQueue::new(options.clone(), &SharedContext::new(), storage, transport);
        queue.enqueue(payload("offline"), Some("http://collector.test")).unwrap();
        queue.wait_idle().await;
        assert_eq!(queue.pending_count(), 1);
    }

    let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
    let transport = MockTransport::new();
    let queue = DeliveryQueue::new(options, &SharedContext::new(), storage.clone(), transport.clone());
    assert_eq!(queue.pending_count(), 1);

    queue.enqueue(payload("online"), Some("http://collector.test")).unwrap();
    queue.wait_idle().await;

    assert_eq!(transport.sent_count(), 2);
    assert_eq!(
        storage.read(queue.storage_key()).unwrap().as_deref(),
        Some("[]")
    );
}
