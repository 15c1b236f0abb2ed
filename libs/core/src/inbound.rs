use std::sync::Arc;

use gsm_telemetry::with_correlation_fields;
use tracing::field::Empty;
use tracing::{Instrument, info_span, warn};

use crate::broadcast::BroadcastWaiter;
use crate::dispatcher::TransportService;
use crate::envelope::CorrelatedMessage;
use crate::error::CorrelationError;

/// Entry point for bytes arriving on an adapter's receive loop.
#[derive(Clone)]
pub struct InboundRouter {
    pub service: Arc<TransportService>,
    pub waiter: BroadcastWaiter,
}

impl InboundRouter {
    pub fn new(service: Arc<TransportService>, waiter: BroadcastWaiter) -> Self {
        Self { service, waiter }
    }

    /// Parses an inbound request and returns the reply to send back.
    pub async fn on_request(&self, bytes: &[u8]) -> Result<CorrelatedMessage, CorrelationError> {
        let request = parse("request", bytes)?;
        let span = info_span!("inbound.request", action = Empty, correlation_id = Empty);
        with_correlation_fields(&span, &request.action, &request.correlation_id);
        Ok(self.service.handle_request(request).instrument(span).await)
    }

    /// Parses an inbound broadcast, notifies the action's subscriber and
    /// resolves any wait on its `(action, correlation_id)`.
    pub async fn on_broadcast(&self, bytes: &[u8]) -> Result<(), CorrelationError> {
        let message = parse("broadcast", bytes)?;
        let span = info_span!("inbound.broadcast", action = Empty, correlation_id = Empty);
        with_correlation_fields(&span, &message.action, &message.correlation_id);
        async {
            self.service.deliver_broadcast(message.clone()).await;
            self.waiter.resolve(message).await;
        }
        .instrument(span)
        .await;
        Ok(())
    }
}

fn parse(kind: &'static str, bytes: &[u8]) -> Result<CorrelatedMessage, CorrelationError> {
    CorrelatedMessage::parse(bytes).inspect_err(|err| {
        warn!(kind, error = %err, "dropping malformed inbound message");
    })
}
