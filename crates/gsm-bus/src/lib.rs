//! Concrete transports for the Greentic messaging correlation layer.
//!
//! [`NatsTransport`] speaks request/reply and publish over NATS subjects
//! derived from the message action. [`InMemoryTransport`] loops messages
//! straight into a peer [`gsm_core::InboundRouter`] for tests and demos.

use std::time::Duration;

mod memory;
mod nats;
pub mod subjects;

pub use memory::InMemoryTransport;
pub use nats::{NatsTransport, NatsTransportConfig};

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("NATS request on {subject} failed: {source}")]
    Request {
        subject: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no reply on {subject} within {timeout:?}")]
    Timeout { subject: String, timeout: Duration },
    #[error("NATS publish on {subject} failed: {source}")]
    Publish {
        subject: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("NATS subscribe on {subject} failed: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid subject token {0:?}")]
    InvalidToken(String),
    #[error("transport has no connected peer")]
    NotConnected,
}
