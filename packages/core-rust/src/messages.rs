//! Request bodies accepted over HTTP and the envelope sent downstream.
//!
//! The downstream peer speaks JSON objects. Outbound messages always carry
//! `action`, `operation_id`, `timestamp` and the bridge-assigned
//! `correlation_id`; replies are opaque objects relayed to the caller as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::Priority;

/// Action name for investigation requests.
pub const ACTION_INVESTIGATE: &str = "investigate";

/// Action name for the transport health probe.
pub const ACTION_PING: &str = "ping";

/// Body of `POST intel` and of each element of `POST intel/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntelRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Body of `POST operations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOperationRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Message sent to the downstream analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_data: Option<Value>,
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Unix milliseconds at which the gateway built the message.
    pub timestamp: u64,
    /// Set by the bridge immediately before the message is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
}

impl DownstreamRequest {
    /// Builds an `investigate` message for a validated intel request.
    #[must_use]
    pub fn investigate(
        request: IntelRequest,
        operation_id: String,
        priority: Priority,
        timestamp: u64,
    ) -> Self {
        Self {
            action: ACTION_INVESTIGATE.to_string(),
            target: Some(request.target),
            scan_data: request.scan_data,
            operation_id,
            priority: Some(priority),
            timestamp,
            correlation_id: None,
            batch_index: None,
        }
    }

    /// Builds a `ping` message used for transport health checks.
    #[must_use]
    pub fn ping(operation_id: String, timestamp: u64) -> Self {
        Self {
            action: ACTION_PING.to_string(),
            target: None,
            scan_data: None,
            operation_id,
            priority: None,
            timestamp,
            correlation_id: None,
            batch_index: None,
        }
    }

    /// Tags the message with its position inside a batch.
    #[must_use]
    pub fn with_batch_index(mut self, index: usize) -> Self {
        self.batch_index = Some(index);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn intel_request_fields_are_optional() {
        let req: IntelRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.target.is_empty());
        assert!(req.scan_data.is_none());

        let req: IntelRequest =
            serde_json::from_value(json!({"target": "acme.com", "priority": "high"})).unwrap();
        assert_eq!(req.target, "acme.com");
        assert_eq!(req.priority.as_deref(), Some("high"));
    }

    #[test]
    fn investigate_message_shape() {
        let req = IntelRequest {
            target: "acme.com".into(),
            scan_data: Some(json!({"ports": [80]})),
            ..IntelRequest::default()
        };
        let msg = DownstreamRequest::investigate(req, "op_1_aaaaaa".into(), Priority::High, 77)
            .with_batch_index(2);
        let wire = serde_json::to_value(&msg).unwrap();

        assert_eq!(wire["action"], "investigate");
        assert_eq!(wire["target"], "acme.com");
        assert_eq!(wire["operation_id"], "op_1_aaaaaa");
        assert_eq!(wire["priority"], "high");
        assert_eq!(wire["timestamp"], 77);
        assert_eq!(wire["batch_index"], 2);
        assert_eq!(wire["scan_data"]["ports"][0], 80);
        assert!(wire.get("correlation_id").is_none());
    }

    #[test]
    fn ping_message_omits_target() {
        let wire = serde_json::to_value(DownstreamRequest::ping("hc".into(), 1)).unwrap();
        assert_eq!(wire["action"], "ping");
        assert!(wire.get("target").is_none());
        assert!(wire.get("priority").is_none());
    }
}
