//! Shared test fixtures and helpers for integration tests.

#![allow(dead_code)]

pub use std::path::PathBuf;
pub use std::sync::atomic::{AtomicUsize, Ordering};
pub use std::sync::{Arc, Mutex};
pub use std::time::Duration;

pub use futures::future::BoxFuture;
pub use serde_json::json;
pub use tempfile::TempDir;
pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;

pub use aetheric_bus::bus::{
    handler_fn, BusError, EnvelopeHandler, InMemoryTransport, IpcConfig, IpcRole, IpcTransport,
    Transport,
};
pub use aetheric_bus::envelope::{Envelope, EnvelopeKind, META_CLIENT_ID};

/// Counts deliveries.
#[derive(Clone, Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn handler(&self) -> Arc<dyn EnvelopeHandler> {
        Arc::new(self.clone())
    }
}

impl EnvelopeHandler for CountingHandler {
    fn handle(
        &self,
        _envelope: Arc<Envelope>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'static, aetheric_bus::bus::Result<()>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Keeps every delivered envelope.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<Arc<Envelope>>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<Arc<Envelope>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.seen().iter().map(|e| e.id()).collect()
    }

    pub fn handler(&self) -> Arc<dyn EnvelopeHandler> {
        Arc::new(self.clone())
    }
}

impl EnvelopeHandler for RecordingHandler {
    fn handle(
        &self,
        envelope: Arc<Envelope>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'static, aetheric_bus::bus::Result<()>> {
        self.seen.lock().unwrap().push(envelope);
        Box::pin(async { Ok(()) })
    }
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

pub fn event(topic: &str) -> Arc<Envelope> {
    Arc::new(Envelope::event(topic, json!({ "topic": topic })))
}

pub fn request(service: &str, verb: &str) -> Arc<Envelope> {
    Arc::new(Envelope::request(service, verb, json!({})))
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Default wait for cross-connection delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Give in-flight frames a chance to arrive before asserting absence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Fresh temp dir and a socket path inside it.
pub fn temp_socket() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bus.sock");
    (dir, path)
}

pub async fn start_server(path: &PathBuf) -> Arc<IpcTransport> {
    let server = Arc::new(IpcTransport::server(path.clone()).unwrap());
    server.start(&token()).await.unwrap();
    server
}

pub async fn start_client(path: &PathBuf) -> Arc<IpcTransport> {
    let client = Arc::new(IpcTransport::client(path.clone()).unwrap());
    client.start(&token()).await.unwrap();
    client
}
