use std::{sync::Arc, time::Duration};

use gsm_bus::InMemoryTransport;
use gsm_core::{
    BroadcastWaiter, CorrelatedMessage, CorrelationError, InboundRouter, SendOptions,
    TransportKind, TransportSelection, TransportService,
};
use serde_json::{Map, Value, json};

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

struct Node {
    service: Arc<TransportService>,
    waiter: BroadcastWaiter,
    transport: InMemoryTransport,
}

impl Node {
    fn new() -> Self {
        let service = Arc::new(TransportService::new());
        let transport = InMemoryTransport::new();
        service.register_transport(TransportKind::Memory, Arc::new(transport.clone()));
        Self {
            service,
            waiter: BroadcastWaiter::new(),
            transport,
        }
    }

    fn router(&self) -> InboundRouter {
        InboundRouter::new(self.service.clone(), self.waiter.clone())
    }
}

async fn pair() -> (Node, Node) {
    let client = Node::new();
    let server = Node::new();
    client.transport.connect(server.router()).await;
    server.transport.connect(client.router()).await;
    (client, server)
}

#[tokio::test]
async fn request_reaches_peer_handler() {
    let (client, server) = pair().await;
    server
        .service
        .set_action_handler("inventory.check", |req: CorrelatedMessage| async move {
            let sku = req
                .data_map()
                .and_then(|d| d.get("sku").cloned())
                .unwrap_or(Value::Null);
            Ok::<_, anyhow::Error>(obj(json!({"sku": sku, "in_stock": 4})))
        });

    let selection = TransportSelection::new(TransportKind::Memory);
    let request = selection.message("c-1", "inventory.check", obj(json!({"sku": "A-1"})));
    let reply = client
        .service
        .send(request.clone(), selection.options(), None)
        .await
        .unwrap();

    assert_eq!(reply.correlation_id, "c-1");
    assert_eq!(reply.data_map().unwrap()["in_stock"], json!(4));
    assert_eq!(client.transport.take_requests().await, vec![request]);
}

#[tokio::test(start_paused = true)]
async fn handler_broadcast_resolves_requester_waiter() {
    let (client, server) = pair().await;
    server.service.set_actions_to_broadcast(["orders.completed"]);
    let svc = server.service.clone();
    server
        .service
        .set_action_handler("orders.create", move |req: CorrelatedMessage| {
            let svc = svc.clone();
            async move {
                let done = CorrelatedMessage::data(
                    req.correlation_id.clone(),
                    "orders.completed",
                    "memory",
                    obj(json!({"order_id": "o-9"})),
                );
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = svc.broadcast(done).await;
                });
                Ok::<_, anyhow::Error>(obj(json!({"accepted": true})))
            }
        });

    let waiter = client.waiter.clone();
    let completion = tokio::spawn(async move {
        waiter
            .recv_broadcast("orders.completed", "c-2", Duration::from_secs(5))
            .await
    });
    tokio::task::yield_now().await;

    let ack = client
        .service
        .send(
            CorrelatedMessage::data("c-2", "orders.create", "memory", Map::new()),
            &SendOptions::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(ack.data_map().unwrap()["accepted"], json!(true));

    let completed = completion.await.unwrap().expect("broadcast delivered");
    assert!(!completed.is_error());
    assert_eq!(completed.data_map().unwrap()["order_id"], json!("o-9"));
    assert_eq!(server.transport.take_broadcasts().await.len(), 1);
}

#[tokio::test]
async fn disconnected_transport_fails_send() {
    let node = Node::new();
    let err = node
        .service
        .send(
            CorrelatedMessage::data("c-3", "anything", "memory", Map::new()),
            &SendOptions::new(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CorrelationError::Transport(_)));
    assert_eq!(err.status(), 502);
}

#[tokio::test(start_paused = true)]
async fn slow_peer_hits_send_timeout() {
    let (client, server) = pair().await;
    server
        .service
        .set_action_handler("slow", |_req: CorrelatedMessage| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, anyhow::Error>(Map::new())
        });

    let err = client
        .service
        .send(
            CorrelatedMessage::data("c-4", "slow", "memory", Map::new()),
            &SendOptions::new(),
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    let CorrelationError::Transport(source) = err else {
        panic!("expected transport error");
    };
    assert!(source.to_string().contains("no reply on slow"));
}
