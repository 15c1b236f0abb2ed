//! Registry of transport adapters, broadcastable actions and inbound handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use gsm_telemetry::{TelemetryLabels, record_counter, record_histogram};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::envelope::CorrelatedMessage;
use crate::error::CorrelationError;
use crate::transport::{SendOptions, SharedTransport, TransportKind};

const SENT_COUNTER: &str = "gsm_dispatch_sent_total";
const SEND_LATENCY: &str = "gsm_dispatch_send_seconds";
const BROADCAST_COUNTER: &str = "gsm_dispatch_broadcast_total";
const HANDLED_COUNTER: &str = "gsm_dispatch_handled_total";

/// Answers inbound requests for one action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, request: CorrelatedMessage) -> anyhow::Result<Map<String, Value>>;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(CorrelatedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Map<String, Value>>> + Send + 'static,
{
    async fn handle(&self, request: CorrelatedMessage) -> anyhow::Result<Map<String, Value>> {
        (self)(request).await
    }
}

/// Observes inbound broadcasts for one action.
#[async_trait]
pub trait BroadcastSubscriber: Send + Sync {
    async fn on_broadcast(&self, message: CorrelatedMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> BroadcastSubscriber for F
where
    F: Fn(CorrelatedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_broadcast(&self, message: CorrelatedMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

pub type SharedActionHandler = Arc<dyn ActionHandler>;
pub type SharedBroadcastSubscriber = Arc<dyn BroadcastSubscriber>;

#[derive(Default)]
pub struct TransportService {
    adapters: DashMap<TransportKind, SharedTransport>,
    broadcastable: DashSet<String>,
    handlers: DashMap<String, SharedActionHandler>,
    subscribers: DashMap<String, SharedBroadcastSubscriber>,
}

impl TransportService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under `kind`, replacing any earlier registration.
    pub fn register_transport(&self, kind: TransportKind, adapter: SharedTransport) {
        if self.adapters.insert(kind, adapter).is_some() {
            debug!(transport = %kind, "replaced registered transport adapter");
        }
    }

    pub fn registered_transports(&self) -> Vec<TransportKind> {
        let mut kinds: Vec<TransportKind> = self.adapters.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    pub fn set_actions_to_broadcast<I, S>(&self, actions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for action in actions {
            self.broadcastable.insert(action.into());
        }
    }

    pub fn is_broadcastable(&self, action: &str) -> bool {
        self.broadcastable.contains(action)
    }

    pub fn subscribe_to_broadcastable_action<S>(&self, action: impl Into<String>, subscriber: S)
    where
        S: BroadcastSubscriber + 'static,
    {
        let action = action.into();
        if self
            .subscribers
            .insert(action.clone(), Arc::new(subscriber))
            .is_some()
        {
            debug!(action = %action, "replaced broadcast subscription");
        }
    }

    pub fn set_action_handler<H>(&self, action: impl Into<String>, handler: H)
    where
        H: ActionHandler + 'static,
    {
        let action = action.into();
        if self
            .handlers
            .insert(action.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(action = %action, "replaced action handler");
        }
    }

    fn adapter_for(&self, transport: &str) -> Result<SharedTransport, CorrelationError> {
        let kind: TransportKind = transport.parse()?;
        self.adapters
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CorrelationError::UnknownTransport(transport.to_string()))
    }

    fn adapters_in_order(&self) -> Vec<(TransportKind, SharedTransport)> {
        let mut adapters: Vec<_> = self
            .adapters
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        adapters.sort_by_key(|(kind, _)| *kind);
        adapters
    }

    /// Sends `message` over the transport it names and returns the reply.
    ///
    /// An error reply from the remote side comes back as
    /// [`CorrelationError::Remote`] carrying the remote code and message.
    #[instrument(
        name = "dispatch.send",
        skip(self, message, options),
        fields(
            action = %message.action,
            correlation_id = %message.correlation_id,
            transport = %message.transport
        )
    )]
    pub async fn send(
        &self,
        message: CorrelatedMessage,
        options: &SendOptions,
        timeout: Option<Duration>,
    ) -> Result<CorrelatedMessage, CorrelationError> {
        let adapter = self.adapter_for(&message.transport)?;
        let labels = TelemetryLabels::new("dispatcher")
            .with_action(message.action.clone())
            .with_transport(message.transport.clone());

        let started = Instant::now();
        let outcome = adapter.send(message, options, timeout).await;
        record_histogram(SEND_LATENCY, started.elapsed().as_secs_f64(), &labels);

        let reply = match outcome {
            Ok(reply) => reply,
            Err(err) => {
                let labels = labels.clone().with_extra("outcome", "transport_error");
                record_counter(SENT_COUNTER, 1, &labels);
                warn!(error = %err, "transport send failed");
                return Err(into_correlation_error(err));
            }
        };

        if let Some(error) = reply.error() {
            record_counter(SENT_COUNTER, 1, &labels.with_extra("outcome", "remote_error"));
            debug!(code = error.code, "remote returned an error reply");
            return Err(CorrelationError::from(error));
        }
        record_counter(SENT_COUNTER, 1, &labels.with_extra("outcome", "ok"));
        Ok(reply)
    }

    /// Publishes `message` to every subscriber of its action. Only actions
    /// named through [`Self::set_actions_to_broadcast`] may be broadcast.
    #[instrument(
        name = "dispatch.broadcast",
        skip(self, message),
        fields(
            action = %message.action,
            correlation_id = %message.correlation_id,
            transport = %message.transport
        )
    )]
    pub async fn broadcast(&self, message: CorrelatedMessage) -> Result<(), CorrelationError> {
        if !self.is_broadcastable(&message.action) {
            return Err(CorrelationError::ActionNotBroadcastable(message.action));
        }
        let adapter = self.adapter_for(&message.transport)?;
        let labels = TelemetryLabels::new("dispatcher")
            .with_action(message.action.clone())
            .with_transport(message.transport.clone());

        match adapter.broadcast(message).await {
            Ok(()) => {
                record_counter(BROADCAST_COUNTER, 1, &labels.with_extra("outcome", "ok"));
                Ok(())
            }
            Err(err) => {
                let labels = labels.with_extra("outcome", "transport_error");
                record_counter(BROADCAST_COUNTER, 1, &labels);
                warn!(error = %err, "transport broadcast failed");
                Err(into_correlation_error(err))
            }
        }
    }

    /// Initializes adapters one after another, stopping at the first failure.
    pub async fn init(&self) -> Result<(), CorrelationError> {
        for (kind, adapter) in self.adapters_in_order() {
            if let Err(err) = adapter.init().await {
                warn!(transport = %kind, error = %err, "transport init failed");
                return Err(into_correlation_error(err));
            }
            info!(transport = %kind, "transport initialized");
        }
        Ok(())
    }

    /// Shuts every adapter down even when some fail; the first failure is
    /// returned once all have been attempted.
    pub async fn shutdown(&self) -> Result<(), CorrelationError> {
        let mut first_error = None;
        for (kind, adapter) in self.adapters_in_order() {
            match adapter.shutdown().await {
                Ok(()) => info!(transport = %kind, "transport shut down"),
                Err(err) => {
                    warn!(transport = %kind, error = %err, "transport shutdown failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(into_correlation_error(err)),
            None => Ok(()),
        }
    }

    /// Runs the handler registered for an inbound request and builds the
    /// reply. Failures, including a missing handler, become error replies.
    #[instrument(
        name = "dispatch.handle_request",
        skip(self, request),
        fields(action = %request.action, correlation_id = %request.correlation_id)
    )]
    pub async fn handle_request(&self, request: CorrelatedMessage) -> CorrelatedMessage {
        let handler = self
            .handlers
            .get(&request.action)
            .map(|entry| Arc::clone(entry.value()));
        let labels = TelemetryLabels::new("dispatcher").with_action(request.action.clone());

        let Some(handler) = handler else {
            record_counter(HANDLED_COUNTER, 1, &labels.with_extra("outcome", "not_found"));
            warn!("no handler registered for inbound request");
            let err = anyhow::Error::new(CorrelationError::HandlerNotFound(request.action.clone()));
            return CorrelatedMessage::error_reply_to(&request, &err);
        };

        match handler.handle(request.clone()).await {
            Ok(data) => {
                record_counter(HANDLED_COUNTER, 1, &labels.with_extra("outcome", "ok"));
                CorrelatedMessage::reply_to(&request, data)
            }
            Err(err) => {
                record_counter(HANDLED_COUNTER, 1, &labels.with_extra("outcome", "error"));
                warn!(error = %err, "action handler failed");
                CorrelatedMessage::error_reply_to(&request, &err)
            }
        }
    }

    /// Hands an inbound broadcast to the subscriber of its action, if any.
    pub async fn deliver_broadcast(&self, message: CorrelatedMessage) {
        let subscriber = self
            .subscribers
            .get(&message.action)
            .map(|entry| Arc::clone(entry.value()));
        let Some(subscriber) = subscriber else {
            return;
        };
        let action = message.action.clone();
        let correlation_id = message.correlation_id.clone();
        if let Err(err) = subscriber.on_broadcast(message).await {
            warn!(
                action = %action,
                correlation_id = %correlation_id,
                error = %err,
                "broadcast subscriber failed"
            );
        }
    }
}

fn into_correlation_error(err: anyhow::Error) -> CorrelationError {
    match err.downcast::<CorrelationError>() {
        Ok(correlation) => correlation,
        Err(other) => CorrelationError::Transport(other),
    }
}
