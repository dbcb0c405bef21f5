//! Shared test handlers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, EnvelopeHandler, Result};
use crate::envelope::Envelope;

pub type SharedLog = Arc<Mutex<Vec<String>>>;

/// Records every delivered envelope and appends its name to a log.
///
/// Several handlers can share one log to assert invocation order.
#[derive(Clone)]
pub struct RecordingHandler {
    name: String,
    log: SharedLog,
    seen: Arc<Mutex<Vec<Arc<Envelope>>>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self::with_log(name, &Self::shared_log())
    }

    pub fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn with_log(name: &str, log: &SharedLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handler(&self) -> Arc<dyn EnvelopeHandler> {
        Arc::new(self.clone())
    }

    pub fn seen(&self) -> Vec<Arc<Envelope>> {
        self.seen.lock().unwrap().clone()
    }
}

impl EnvelopeHandler for RecordingHandler {
    fn handle(
        &self,
        envelope: Arc<Envelope>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        self.log.lock().unwrap().push(self.name.clone());
        self.seen.lock().unwrap().push(envelope);
        Box::pin(async { Ok(()) })
    }
}

/// Counts invocations.
#[derive(Clone, Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }

    pub fn handler(&self) -> Arc<dyn EnvelopeHandler> {
        Arc::new(self.clone())
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl EnvelopeHandler for CountingHandler {
    fn handle(
        &self,
        _envelope: Arc<Envelope>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Always fails with `BusError::Handler(message)`.
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    pub fn handler(message: &str) -> Arc<dyn EnvelopeHandler> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

impl EnvelopeHandler for FailingHandler {
    fn handle(
        &self,
        _envelope: Arc<Envelope>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        let message = self.message.clone();
        Box::pin(async move { Err(BusError::Handler(message)) })
    }
}
