use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use gsm_bus::{NatsTransport, NatsTransportConfig};
use gsm_core::{
    BroadcastConfig, BroadcastWaiter, CircuitBreaker, CircuitSettings, CorrelatedMessage,
    InboundRouter, TransportKind, TransportSelection, TransportService,
};
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tracing::{info, warn};

const PING: &str = "demo.ping";
const COMPLETED: &str = "demo.completed";

#[tokio::main]
async fn main() -> Result<()> {
    gsm_telemetry::install("nats-demo")?;

    let service = Arc::new(TransportService::new());
    let waiter = BroadcastWaiter::new();
    let router = InboundRouter::new(service.clone(), waiter.clone());

    let nats = NatsTransport::connect(NatsTransportConfig::from_env())
        .await?
        .with_router(router);
    service.register_transport(TransportKind::Nats, Arc::new(nats));
    service.set_actions_to_broadcast([COMPLETED]);

    let responder = service.clone();
    service.set_action_handler(PING, move |req: CorrelatedMessage| {
        let responder = responder.clone();
        async move {
            let done = CorrelatedMessage::data(
                req.correlation_id.clone(),
                COMPLETED,
                req.transport.clone(),
                object(json!({"status": "done"})),
            );
            tokio::spawn(async move {
                if let Err(err) = responder.broadcast(done).await {
                    warn!(error = %err, "completion broadcast failed");
                }
            });
            Ok::<_, anyhow::Error>(object(json!({"pong": true})))
        }
    });
    service.subscribe_to_broadcastable_action(COMPLETED, |msg: CorrelatedMessage| async move {
        info!(correlation_id = %msg.correlation_id, "observed completion broadcast");
        Ok::<_, anyhow::Error>(())
    });

    service.init().await?;

    let outcome = run_round_trip(service.clone(), waiter.clone()).await;
    waiter.clear();
    service.shutdown().await?;
    outcome
}

async fn run_round_trip(service: Arc<TransportService>, waiter: BroadcastWaiter) -> Result<()> {
    let selection = TransportSelection::new(TransportKind::Nats);
    let correlation_id = uuid::Uuid::new_v4().to_string();

    let timeout = BroadcastConfig::from_env().default_timeout;
    let completion = register_completion(&waiter, &correlation_id, timeout);

    let options = selection.options().clone();
    let breaker = CircuitBreaker::new(
        "nats-demo",
        CircuitSettings::from_env(),
        move |msg: CorrelatedMessage| {
            let service = service.clone();
            let options = options.clone();
            async move { service.send(msg, &options, None).await }
        },
    );

    let reply = breaker
        .execute(selection.message(correlation_id.clone(), PING, Map::new()))
        .await?;
    info!(correlation_id = %reply.correlation_id, data = ?reply.data_map(), "received reply");

    match completion.await {
        Ok(msg) => match msg.error() {
            Some(err) => warn!(code = err.code, message = %err.message, "completion failed"),
            None => info!(data = ?msg.data_map(), "completion received"),
        },
        Err(_) => warn!("completion wait was superseded"),
    }
    Ok(())
}

/// Registers the completion wait before returning, so a broadcast that
/// arrives ahead of the request's reply is still caught.
fn register_completion(
    waiter: &BroadcastWaiter,
    correlation_id: &str,
    timeout: Duration,
) -> oneshot::Receiver<CorrelatedMessage> {
    let (tx, rx) = oneshot::channel();
    waiter.wait_for_broadcast(COMPLETED, correlation_id, timeout, move |msg| async move {
        tx.send(msg)
            .map_err(|_| anyhow::anyhow!("completion receiver dropped"))
    });
    rx
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
