//! Application host.
//!
//! A [`HostBuilder`] collects handlers for one named service, binds them to a
//! transport through a [`MessageBroker`], and yields a [`Host`] that owns the
//! lifecycle.
//!
//! ```ignore
//! let host = Host::builder("orders")
//!     .use_transport(Arc::new(InMemoryTransport::new()))
//!     .add_command_handler(|cmd: PlaceOrder, ctx| async move {
//!         ctx.publish_event(&OrderPlaced { id: cmd.id }).await
//!     })
//!     .build()
//!     .await?;
//! host.run(&shutdown).await?;
//! ```

mod context;

pub use context::MessageContext;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::MessageBroker;
use crate::bus::{BusError, EnvelopeHandler, Transport};
use crate::envelope::{Envelope, Message};
use crate::routing::TopicPattern;

/// Errors raised while building or running a host, or by typed handlers.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("No transport configured; call use_transport first")]
    NoTransport,

    #[error("Invalid pattern: '{0}'")]
    InvalidPattern(String),

    #[error("Payload mismatch: expected {expected}, {reason}")]
    PayloadMismatch {
        expected: &'static str,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<HostError> for BusError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Bus(inner) => inner,
            other => BusError::Handler(other.to_string()),
        }
    }
}

type TypedFn<T> =
    Arc<dyn Fn(T, MessageContext) -> BoxFuture<'static, Result<(), HostError>> + Send + Sync>;

/// Decodes the payload into `T` before calling the user function.
struct TypedHandler<T> {
    service: Arc<str>,
    broker: MessageBroker,
    f: TypedFn<T>,
    _payload: PhantomData<fn() -> T>,
}

fn decode_payload<T: Message>(envelope: &Envelope) -> Result<T, HostError> {
    if let Some(found) = envelope.payload_type() {
        if found != T::NAME {
            return Err(HostError::PayloadMismatch {
                expected: T::NAME,
                reason: format!("envelope carries {found}"),
            });
        }
    }
    envelope
        .payload_as::<T>()
        .map_err(|e| HostError::PayloadMismatch {
            expected: T::NAME,
            reason: e.to_string(),
        })
}

impl<T: Message> EnvelopeHandler for TypedHandler<T> {
    fn handle(
        &self,
        envelope: Arc<Envelope>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, crate::bus::Result<()>> {
        let decoded = decode_payload::<T>(&envelope);
        let ctx = MessageContext::new(envelope, Arc::clone(&self.service), self.broker.clone(), cancel);
        let f = Arc::clone(&self.f);
        Box::pin(async move {
            let payload = decoded?;
            f(payload, ctx).await.map_err(BusError::from)
        })
    }
}

type HandlerFactory = Box<dyn FnOnce(&MessageBroker, &Arc<str>) -> Arc<dyn EnvelopeHandler> + Send>;

struct Registration {
    pattern: String,
    make: HandlerFactory,
}

/// Collects handlers for one service.
pub struct HostBuilder {
    service: String,
    transport: Option<Arc<dyn Transport>>,
    registrations: Vec<Registration>,
}

impl HostBuilder {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            transport: None,
            registrations: Vec::new(),
        }
    }

    /// Transport used for routing and publishing.
    pub fn use_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Raw envelope handler on `pattern`.
    pub fn add_envelope_handler(
        mut self,
        pattern: impl Into<String>,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Self {
        self.registrations.push(Registration {
            pattern: pattern.into(),
            make: Box::new(move |_: &MessageBroker, _: &Arc<str>| handler),
        });
        self
    }

    /// Typed handler on an explicit `pattern`.
    pub fn add_handler<T, F, Fut>(mut self, pattern: impl Into<String>, f: F) -> Self
    where
        T: Message,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        let f: TypedFn<T> = Arc::new(
            move |payload: T, ctx: MessageContext| -> BoxFuture<'static, Result<(), HostError>> {
                Box::pin(f(payload, ctx))
            },
        );
        self.registrations.push(Registration {
            pattern: pattern.into(),
            make: Box::new(move |broker: &MessageBroker, service: &Arc<str>| -> Arc<dyn EnvelopeHandler> {
                Arc::new(TypedHandler {
                    service: Arc::clone(service),
                    broker: broker.clone(),
                    f,
                    _payload: PhantomData,
                })
            }),
        });
        self
    }

    /// Handler for requests addressed to `{service}.{T::NAME}`.
    pub fn add_command_handler<T, F, Fut>(self, f: F) -> Self
    where
        T: Message,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        let pattern = format!("{}.{}", self.service, T::NAME);
        self.add_handler(pattern, f)
    }

    /// Handler for events published on `{service}.{T::NAME}`.
    pub fn add_event_handler<T, F, Fut>(self, f: F) -> Self
    where
        T: Message,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        let pattern = format!("{}.{}", self.service, T::NAME);
        self.add_handler(pattern, f)
    }

    /// Subscribe every handler and return the host.
    ///
    /// Handlers are subscribed in registration order, before the transport
    /// is started.
    pub async fn build(self) -> Result<Host, HostError> {
        let transport = self.transport.ok_or(HostError::NoTransport)?;
        if let Some(bad) = self
            .registrations
            .iter()
            .find(|r| TopicPattern::new(&r.pattern).is_empty())
        {
            return Err(HostError::InvalidPattern(bad.pattern.clone()));
        }

        let broker = MessageBroker::new(transport);
        let service: Arc<str> = Arc::from(self.service.as_str());
        let mut routes = Vec::with_capacity(self.registrations.len());

        for registration in self.registrations {
            let handler = (registration.make)(&broker, &service);
            broker.route(&registration.pattern, handler).await?;
            debug!(service = %service, pattern = %registration.pattern, "Route registered");
            routes.push(registration.pattern);
        }

        info!(service = %service, routes = routes.len(), "Host built");
        Ok(Host {
            service,
            broker,
            routes,
        })
    }
}

/// A built service: handlers bound, transport ready to start.
pub struct Host {
    service: Arc<str>,
    broker: MessageBroker,
    routes: Vec<String>,
}

impl Host {
    pub fn builder(service: impl Into<String>) -> HostBuilder {
        HostBuilder::new(service)
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    /// Patterns registered by the builder, in order.
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), HostError> {
        self.broker.start(cancel).await?;
        info!(service = %self.service, "Host started");
        Ok(())
    }

    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), HostError> {
        self.broker.stop(cancel).await?;
        info!(service = %self.service, "Host stopped");
        Ok(())
    }

    /// Start, wait for `shutdown`, then stop.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<(), HostError> {
        self.start(shutdown).await?;
        shutdown.cancelled().await;
        // Shutdown work must not see the already-cancelled token
        self.stop(&CancellationToken::new()).await
    }
}
