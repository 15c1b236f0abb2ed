//! Greentic messaging correlation core.
//!
//! Transport-agnostic request/response plumbing: the correlated message
//! envelope, a generic circuit breaker, a waiter for correlated broadcast
//! replies and the dispatcher that routes calls to registered transport
//! adapters.
pub mod broadcast;
pub mod circuit;
pub mod config;
pub mod dispatcher;
pub mod dto;
pub mod envelope;
pub mod error;
pub mod inbound;
pub mod transport;

pub use broadcast::{BroadcastKey, BroadcastWaiter};
pub use circuit::{CircuitBreaker, CircuitState};
pub use config::{BroadcastConfig, CircuitSettings};
pub use dispatcher::{
    ActionHandler, BroadcastSubscriber, SharedActionHandler, SharedBroadcastSubscriber,
    TransportService,
};
pub use dto::{CorrelatedRequest, CorrelatedResponse};
pub use envelope::{CorrelatedMessage, ErrorData, Payload};
pub use error::{
    CallTimeout, CircuitError, CircuitOpen, CorrelationError, FieldError, StatusError,
    ValidationErrors,
};
pub use inbound::InboundRouter;
pub use transport::{
    SendOptions, SharedTransport, TransportAdapter, TransportKind, TransportSelection,
};
