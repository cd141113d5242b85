//! Shared test helpers

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tally_core::PayloadEncoder;
use tally_tracker::{TrackerError, TrackerResult, Transport};
use tokio::sync::Semaphore;

/// What the mock does with one send
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    NetworkError,
    Hang,
}

/// Transport that records every send and replies from a script
///
/// Replies are consumed in order; once the script is empty every send gets
/// `200`. When gated, each send waits for one [`MockTransport::release`].
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<Reply>>,
    gate: Option<Semaphore>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    /// Let one gated send complete
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, body)| body.clone()).collect()
    }

    /// Sent bodies parsed as JSON (for queues with base64 off)
    pub fn json_bodies(&self) -> Vec<Value> {
        self.bodies()
            .iter()
            .map(|b| serde_json::from_str(b).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn post(&self, url: &str, body: String) -> TrackerResult<u16> {
        self.sent.lock().push((url.to_string(), body));

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| TrackerError::Transport(e.to_string()))?
                .forget();
        }

        let reply = self.script.lock().pop_front().unwrap_or(Reply::Status(200));
        match reply {
            Reply::Status(status) => Ok(status),
            Reply::NetworkError => Err(TrackerError::Transport("connection refused".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// A plain-JSON payload with a recognisable type
pub fn payload(event_type: &str) -> PayloadEncoder {
    let mut pb = PayloadEncoder::new(false);
    pb.add("type", event_type);
    pb.add("ctx", json!({"url": "a"}));
    pb
}

/// Yield to spawned tasks until `cond` holds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
