use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::CorrelatedMessage;
use crate::error::CorrelationError;

/// Transport-specific knobs passed through to the adapter untouched.
pub type SendOptions = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Nats,
    Http,
    Kafka,
    Memory,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Nats,
        TransportKind::Http,
        TransportKind::Kafka,
        TransportKind::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Nats => "nats",
            TransportKind::Http => "http",
            TransportKind::Kafka => "kafka",
            TransportKind::Memory => "memory",
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CorrelationError::UnknownTransport(s.to_string()))
    }
}

/// One concrete transport (NATS, HTTP, an in-process loopback, ...).
///
/// Adapters that only support one direction leave the other at its default,
/// which fails with [`CorrelationError::Unsupported`].
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Delivers `message` and waits for the correlated reply.
    async fn send(
        &self,
        message: CorrelatedMessage,
        options: &SendOptions,
        timeout: Option<Duration>,
    ) -> anyhow::Result<CorrelatedMessage> {
        let _ = (message, options, timeout);
        Err(CorrelationError::Unsupported {
            transport: self.kind().to_string(),
            operation: "send",
        }
        .into())
    }

    /// Fire-and-forget delivery to every subscriber of `message.action`.
    async fn broadcast(&self, message: CorrelatedMessage) -> anyhow::Result<()> {
        let _ = message;
        Err(CorrelationError::Unsupported {
            transport: self.kind().to_string(),
            operation: "broadcast",
        }
        .into())
    }

    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type SharedTransport = Arc<dyn TransportAdapter>;

/// Explicit choice of transport and options for a sequence of calls.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSelection {
    pub transport: TransportKind,
    pub options: SendOptions,
}

impl TransportSelection {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            options: SendOptions::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn options(&self) -> &SendOptions {
        &self.options
    }

    /// Data envelope addressed over this selection's transport.
    pub fn message(
        &self,
        correlation_id: impl Into<String>,
        action: impl Into<String>,
        data: Map<String, Value>,
    ) -> CorrelatedMessage {
        CorrelatedMessage::data(correlation_id, action, self.transport.as_str(), data)
    }
}

impl From<TransportKind> for TransportSelection {
    fn from(transport: TransportKind) -> Self {
        Self::new(transport)
    }
}
