use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::{CorrelatedMessage, Payload};
use crate::error::ValidationErrors;

const OK: u16 = 200;

/// Application-facing request body before it is wrapped in an envelope.
///
/// `data` is optional on the wire only so that its absence surfaces through
/// [`CorrelatedRequest::validate`] next to the other field errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedRequest {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl CorrelatedRequest {
    pub fn new(correlation_id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            request_id: None,
            data: Some(data),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.correlation_id.is_empty() {
            errors.push("correlation_id", "correlation_id cannot be empty");
        }
        if let Some(request_id) = &self.request_id {
            if request_id.trim().is_empty() {
                errors.push("request_id", "request_id cannot be empty");
            }
        }
        if self.data.is_none() {
            errors.push("data", "data is required");
        }
        errors.into_result()
    }

    pub fn into_message(
        self,
        action: impl Into<String>,
        transport: impl Into<String>,
    ) -> CorrelatedMessage {
        let data = self.data.unwrap_or_default();
        CorrelatedMessage::data(self.correlation_id, action, transport, data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedResponse {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CorrelatedResponse {
    /// Builds the response to `request` from its correlated reply, echoing
    /// the caller's `request_id`.
    pub fn for_request(request: &CorrelatedRequest, reply: &CorrelatedMessage) -> Self {
        Self {
            request_id: request.request_id.clone(),
            ..Self::from(reply)
        }
    }
}

/// Envelope ids are never request ids, so `request_id` is left unset.
impl From<&CorrelatedMessage> for CorrelatedResponse {
    fn from(msg: &CorrelatedMessage) -> Self {
        let (data, status, error) = match &msg.payload {
            Payload::Data(data) => (data.clone(), OK, None),
            Payload::Error(err) => (Map::new(), err.code, Some(err.message.clone())),
        };
        Self {
            correlation_id: msg.correlation_id.clone(),
            request_id: None,
            data,
            status,
            error,
        }
    }
}
