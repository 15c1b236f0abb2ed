//! Correlated message envelope exchanged over every transport.
//!
//! A [`CorrelatedMessage`] carries either application data or a normalized
//! [`ErrorData`] record. On the wire the two are told apart by an explicit
//! `is_error` flag rather than by the shape of `data`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{
    BAD_REQUEST, CallTimeout, CircuitOpen, CorrelationError, GATEWAY_TIMEOUT,
    INTERNAL_SERVER_ERROR, SERVICE_UNAVAILABLE, StatusError, ValidationErrors,
};

const DEFAULT_ERROR_MESSAGE: &str = "Internal Server Error";

/// Normalized `{code, message}` error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorData {
    pub code: u16,
    pub message: String,
}

impl ErrorData {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Classifies an arbitrary failure into a wire-level error record.
    ///
    /// Validation failures map to 400 with every field message joined by
    /// `", "`. Errors that carry their own status keep it verbatim, and
    /// breaker rejections become 503 (open) or 504 (timed out). Anything
    /// else becomes a 500 with the error's text, or `"Internal Server Error"`
    /// when that text is empty. The whole context chain is searched, so a
    /// status error wrapped in `anyhow` context is still recognised.
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(validation) = cause.downcast_ref::<ValidationErrors>() {
                return Self::new(BAD_REQUEST, validation.to_string());
            }
        }
        for cause in err.chain() {
            if let Some(status) = cause.downcast_ref::<StatusError>() {
                return Self::new(status.code, status.message.clone());
            }
            if let Some(correlation) = cause.downcast_ref::<CorrelationError>() {
                return Self::new(correlation.status(), correlation.to_string());
            }
            if let Some(open) = cause.downcast_ref::<CircuitOpen>() {
                return Self::new(SERVICE_UNAVAILABLE, open.to_string());
            }
            if let Some(timeout) = cause.downcast_ref::<CallTimeout>() {
                return Self::new(GATEWAY_TIMEOUT, timeout.to_string());
            }
        }
        let message = err.to_string();
        if message.trim().is_empty() {
            Self::new(INTERNAL_SERVER_ERROR, DEFAULT_ERROR_MESSAGE)
        } else {
            Self::new(INTERNAL_SERVER_ERROR, message)
        }
    }
}

impl From<&ErrorData> for CorrelationError {
    fn from(data: &ErrorData) -> Self {
        CorrelationError::Remote {
            code: data.code,
            message: data.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Data(Map<String, Value>),
    Error(ErrorData),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Data(Map::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct CorrelatedMessage {
    pub id: String,
    pub correlation_id: String,
    pub action: String,
    pub transport: String,
    pub payload: Payload,
}

impl CorrelatedMessage {
    /// Builds a message with a fresh id. `error`, when present, wins over `data`.
    pub fn create(
        correlation_id: impl Into<String>,
        action: impl Into<String>,
        transport: impl Into<String>,
        data: Option<Map<String, Value>>,
        error: Option<&anyhow::Error>,
    ) -> Self {
        let payload = match error {
            Some(err) => Payload::Error(ErrorData::classify(err)),
            None => Payload::Data(data.unwrap_or_default()),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.into(),
            action: action.into(),
            transport: transport.into(),
            payload,
        }
    }

    pub fn data(
        correlation_id: impl Into<String>,
        action: impl Into<String>,
        transport: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self::create(correlation_id, action, transport, Some(data), None)
    }

    pub fn failure(
        correlation_id: impl Into<String>,
        action: impl Into<String>,
        transport: impl Into<String>,
        error: ErrorData,
    ) -> Self {
        let mut msg = Self::create(correlation_id, action, transport, None, None);
        msg.payload = Payload::Error(error);
        msg
    }

    /// Reply carrying `data`, correlated with `request`.
    pub fn reply_to(request: &CorrelatedMessage, data: Map<String, Value>) -> Self {
        Self::data(
            request.correlation_id.clone(),
            request.action.clone(),
            request.transport.clone(),
            data,
        )
    }

    /// Error reply correlated with `request`.
    pub fn error_reply_to(request: &CorrelatedMessage, error: &anyhow::Error) -> Self {
        Self::create(
            request.correlation_id.clone(),
            request.action.clone(),
            request.transport.clone(),
            None,
            Some(error),
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn error(&self) -> Option<&ErrorData> {
        match &self.payload {
            Payload::Error(err) => Some(err),
            Payload::Data(_) => None,
        }
    }

    pub fn data_map(&self) -> Option<&Map<String, Value>> {
        match &self.payload {
            Payload::Data(data) => Some(data),
            Payload::Error(_) => None,
        }
    }

    /// Decodes the data object into `T`. Error payloads yield `None`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.data_map()
            .map(|data| serde_json::from_value(Value::Object(data.clone())))
    }

    /// Parses and validates wire bytes. Malformed input is rejected whole.
    pub fn parse(bytes: &[u8]) -> Result<Self, CorrelationError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| CorrelationError::InvalidFormat(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, CorrelationError> {
        if !value.is_object() {
            return Err(CorrelationError::InvalidStructure(
                "expected a JSON object".into(),
            ));
        }
        let wire = WireMessage::deserialize(value)
            .map_err(|err| CorrelationError::InvalidStructure(err.to_string()))?;
        Self::try_from(wire)
    }

    pub fn to_value(&self) -> Value {
        let wire = WireMessage::from(self.clone());
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    id: String,
    correlation_id: String,
    action: String,
    transport: String,
    #[serde(default)]
    is_error: bool,
    data: Map<String, Value>,
}

impl TryFrom<WireMessage> for CorrelatedMessage {
    type Error = CorrelationError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        for (field, value) in [
            ("id", &wire.id),
            ("correlation_id", &wire.correlation_id),
            ("action", &wire.action),
            ("transport", &wire.transport),
        ] {
            if value.is_empty() {
                return Err(CorrelationError::InvalidStructure(format!(
                    "{field} must not be empty"
                )));
            }
        }

        let payload = if wire.is_error {
            let error: ErrorData = serde_json::from_value(Value::Object(wire.data))
                .map_err(|err| {
                    CorrelationError::InvalidStructure(format!("error payload: {err}"))
                })?;
            Payload::Error(error)
        } else {
            Payload::Data(wire.data)
        };

        Ok(Self {
            id: wire.id,
            correlation_id: wire.correlation_id,
            action: wire.action,
            transport: wire.transport,
            payload,
        })
    }
}

impl From<CorrelatedMessage> for WireMessage {
    fn from(msg: CorrelatedMessage) -> Self {
        let (is_error, data) = match msg.payload {
            Payload::Data(data) => (false, data),
            Payload::Error(err) => {
                let mut data = Map::new();
                data.insert("code".into(), Value::from(err.code));
                data.insert("message".into(), Value::String(err.message));
                (true, data)
            }
        };
        Self {
            id: msg.id,
            correlation_id: msg.correlation_id,
            action: msg.action,
            transport: msg.transport,
            is_error,
            data,
        }
    }
}
