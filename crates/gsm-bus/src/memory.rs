use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gsm_core::{CorrelatedMessage, InboundRouter, SendOptions, TransportAdapter, TransportKind};
use tokio::sync::Mutex;

use crate::BusError;

/// Loopback transport delivering into a peer router in the same process.
///
/// Every message goes through its wire encoding on the way, so peers see
/// exactly what a network transport would hand them.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    peer: Arc<Mutex<Option<InboundRouter>>>,
    requests: Arc<Mutex<Vec<CorrelatedMessage>>>,
    broadcasts: Arc<Mutex<Vec<CorrelatedMessage>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, peer: InboundRouter) {
        *self.peer.lock().await = Some(peer);
    }

    pub async fn take_requests(&self) -> Vec<CorrelatedMessage> {
        let mut guard = self.requests.lock().await;
        std::mem::take(&mut *guard)
    }

    pub async fn take_broadcasts(&self) -> Vec<CorrelatedMessage> {
        let mut guard = self.broadcasts.lock().await;
        std::mem::take(&mut *guard)
    }

    async fn peer(&self) -> Option<InboundRouter> {
        self.peer.lock().await.clone()
    }
}

#[async_trait]
impl TransportAdapter for InMemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    async fn send(
        &self,
        message: CorrelatedMessage,
        _options: &SendOptions,
        timeout: Option<Duration>,
    ) -> anyhow::Result<CorrelatedMessage> {
        self.requests.lock().await.push(message.clone());
        let peer = self.peer().await.ok_or(BusError::NotConnected)?;

        let bytes = message.to_bytes();
        let reply = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, peer.on_request(&bytes))
                .await
                .map_err(|_| BusError::Timeout {
                    subject: message.action.clone(),
                    timeout,
                })??,
            None => peer.on_request(&bytes).await?,
        };
        Ok(CorrelatedMessage::parse(&reply.to_bytes())?)
    }

    async fn broadcast(&self, message: CorrelatedMessage) -> anyhow::Result<()> {
        self.broadcasts.lock().await.push(message.clone());
        if let Some(peer) = self.peer().await {
            peer.on_broadcast(&message.to_bytes()).await?;
        }
        Ok(())
    }
}
