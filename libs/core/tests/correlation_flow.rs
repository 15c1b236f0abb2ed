use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use gsm_core::{
    BroadcastWaiter, CircuitBreaker, CircuitError, CircuitOpen, CircuitSettings, CircuitState,
    CorrelatedMessage, CorrelationError, ErrorData, InboundRouter, SendOptions, StatusError,
    TransportAdapter, TransportKind, TransportSelection, TransportService,
};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

/// Loops requests and broadcasts straight into a peer router.
struct Loopback {
    peer: Mutex<Option<InboundRouter>>,
    failures_left: AtomicUsize,
}

impl Loopback {
    fn new() -> Self {
        Self {
            peer: Mutex::new(None),
            failures_left: AtomicUsize::new(0),
        }
    }

    async fn connect(&self, router: InboundRouter) {
        *self.peer.lock().await = Some(router);
    }

    async fn peer(&self) -> anyhow::Result<InboundRouter> {
        self.peer
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("loopback peer not connected"))
    }
}

#[async_trait]
impl TransportAdapter for Loopback {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    async fn send(
        &self,
        message: CorrelatedMessage,
        _options: &SendOptions,
        _timeout: Option<Duration>,
    ) -> anyhow::Result<CorrelatedMessage> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("connection reset by peer");
        }
        let reply = self.peer().await?.on_request(&message.to_bytes()).await?;
        Ok(CorrelatedMessage::parse(&reply.to_bytes())?)
    }

    async fn broadcast(&self, message: CorrelatedMessage) -> anyhow::Result<()> {
        self.peer().await?.on_broadcast(&message.to_bytes()).await?;
        Ok(())
    }
}

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

async fn wired() -> (Arc<TransportService>, BroadcastWaiter, Arc<Loopback>) {
    let service = Arc::new(TransportService::new());
    let waiter = BroadcastWaiter::new();
    let loopback = Arc::new(Loopback::new());
    loopback
        .connect(InboundRouter::new(service.clone(), waiter.clone()))
        .await;
    service.register_transport(TransportKind::Memory, loopback.clone());
    service.set_actions_to_broadcast(["orders.completed"]);
    (service, waiter, loopback)
}

#[tokio::test]
async fn request_reply_round_trip_through_inbound_router() {
    let (service, _waiter, _loopback) = wired().await;
    service.set_action_handler("orders.create", |req: CorrelatedMessage| async move {
        let qty = req.data_map().and_then(|d| d["qty"].as_u64()).unwrap_or(0);
        if qty == 0 {
            return Err(anyhow::Error::new(StatusError::bad_request("qty must be positive")));
        }
        Ok(obj(json!({"accepted": qty})))
    });

    let selection = TransportSelection::new(TransportKind::Memory);
    let reply = service
        .send(
            selection.message("c-100", "orders.create", obj(json!({"qty": 3}))),
            selection.options(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(reply.correlation_id, "c-100");
    assert_eq!(reply.data_map().unwrap()["accepted"], json!(3));

    let err = service
        .send(
            selection.message("c-101", "orders.create", obj(json!({"qty": 0}))),
            selection.options(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CorrelationError::Remote { code: 400, ref message } if message == "qty must be positive"
    ));

    let err = service
        .send(selection.message("c-102", "orders.unknown", Map::new()), selection.options(), None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 404);
}

#[tokio::test(start_paused = true)]
async fn broadcast_reply_resolves_waiting_requester() {
    let (service, waiter, _loopback) = wired().await;
    let seen = Arc::new(AtomicUsize::new(0));
    let s = seen.clone();
    service.subscribe_to_broadcastable_action("orders.completed", move |_m: CorrelatedMessage| {
        let s = s.clone();
        async move {
            s.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    });

    let (tx, rx) = tokio::sync::oneshot::channel();
    waiter.wait_for_broadcast(
        "orders.completed",
        "c-200",
        Duration::from_secs(5),
        move |msg| async move {
            tx.send(msg)
                .map_err(|_| anyhow::anyhow!("receiver dropped"))
        },
    );

    let total = obj(json!({"total": 42}));
    let done = CorrelatedMessage::data("c-200", "orders.completed", "memory", total);
    service.broadcast(done).await.unwrap();

    let resolved = rx.await.unwrap();
    assert!(!resolved.is_error());
    assert_eq!(resolved.data_map().unwrap()["total"], json!(42));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(waiter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_wait_times_out_with_408() {
    let (_service, waiter, _loopback) = wired().await;
    let reply = waiter
        .recv_broadcast("orders.completed", "c-300", Duration::from_secs(2))
        .await
        .expect("timeout reply");
    assert_eq!(
        reply.error(),
        Some(&ErrorData::new(
            408,
            "Timeout waiting for broadcast 'orders.completed' (c-300)"
        ))
    );
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn breaker_guards_dispatcher_send() {
    let (service, _waiter, loopback) = wired().await;
    service.set_action_handler("ping", |_r: CorrelatedMessage| async {
        Ok::<_, anyhow::Error>(obj(json!({"pong": true})))
    });
    loopback.failures_left.store(2, Ordering::SeqCst);

    let settings = CircuitSettings {
        timeout: Duration::from_secs(1),
        error_threshold_percentage: 50.0,
        retry_timeout: Duration::from_secs(10),
    };
    let svc = service.clone();
    let breaker = CircuitBreaker::new("memory-send", settings, move |msg: CorrelatedMessage| {
        let svc = svc.clone();
        async move { svc.send(msg, &SendOptions::new(), None).await }
    });
    let ping = || CorrelatedMessage::data("c-400", "ping", "memory", Map::new());

    let first = breaker.execute(ping()).await;
    assert!(matches!(first, Err(CircuitError::Inner(CorrelationError::Transport(_)))));
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.execute(ping()).await.unwrap_err();
    assert!(matches!(rejected, CircuitError::Open(CircuitOpen)));
    assert_eq!(rejected.status(), Some(503));
    let classified = ErrorData::classify(&anyhow::Error::new(rejected));
    assert_eq!(classified.code, 503);

    tokio::time::advance(Duration::from_secs(11)).await;
    let trial = breaker.execute(ping()).await;
    assert!(matches!(trial, Err(CircuitError::Inner(_))));
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(11)).await;
    let reply = breaker.execute(ping()).await.unwrap();
    assert_eq!(reply.data_map().unwrap()["pong"], json!(true));
    assert_eq!(breaker.state(), CircuitState::Closed);

    logs_assert(|lines: &[&str]| {
        let opened = lines
            .iter()
            .filter(|line| line.contains("circuit breaker opened"))
            .count();
        if opened == 2 {
            Ok(())
        } else {
            Err(format!("expected two open transitions, saw {opened}"))
        }
    });
}
