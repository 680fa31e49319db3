//! Bus event schemas consumed by the fabric.
//!
//! The only event the core parses is `session.closed`, published by the
//! telemetry ingest when a roast session ends. Everything else on the bus is
//! opaque to the fabric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// The `type` discriminator of a session-closed event.
pub const SESSION_CLOSED_TYPE: &str = "session.closed";

/// The schema version this build understands.
pub const SESSION_CLOSED_VERSION: u32 = 1;

/// Default report kind when the event omits one.
pub const DEFAULT_REPORT_KIND: &str = "POST_ROAST_V1";

fn default_report_kind() -> String {
    DEFAULT_REPORT_KIND.to_owned()
}

/// A roast session has closed and is ready for post-roast analysis.
///
/// Published on `ops/{orgId}/{siteId}/{machineId}/session/closed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosed {
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: u32,
    pub emitted_at: DateTime<Utc>,
    pub org_id: String,
    pub site_id: String,
    pub machine_id: String,
    pub session_id: String,
    #[serde(default = "default_report_kind")]
    pub report_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_points: Option<u64>,
}

impl SessionClosed {
    /// Schema-level validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type != SESSION_CLOSED_TYPE {
            return Err(EventError::Validation {
                reason: format!("unexpected event type '{}'", self.event_type),
            });
        }
        if self.version != SESSION_CLOSED_VERSION {
            return Err(EventError::Validation {
                reason: format!("unsupported version {}", self.version),
            });
        }
        for (field, value) in [
            ("orgId", &self.org_id),
            ("siteId", &self.site_id),
            ("machineId", &self.machine_id),
            ("sessionId", &self.session_id),
        ] {
            if value.is_empty() {
                return Err(EventError::Validation {
                    reason: format!("{field} must not be empty"),
                });
            }
        }
        Ok(())
    }
}

/// Decode a raw bus payload into a validated [`SessionClosed`].
///
/// Distinguishes parse failures (not UTF-8 JSON) from validation failures
/// (JSON that does not satisfy the schema) so the dispatcher can count them
/// separately.
pub fn decode_session_closed(payload: &[u8]) -> Result<SessionClosed, EventError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| EventError::Parse {
            reason: e.to_string(),
        })?;

    let event: SessionClosed =
        serde_json::from_value(value).map_err(|e| EventError::Validation {
            reason: e.to_string(),
        })?;

    event.validate()?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "type": "session.closed",
            "version": 1,
            "emittedAt": "2026-03-01T12:00:00Z",
            "orgId": "org-1",
            "siteId": "site-1",
            "machineId": "machine-1",
            "sessionId": "sess-1",
        })
    }

    #[test]
    fn decodes_minimal_event_with_default_report_kind() {
        let payload = serde_json::to_vec(&sample_json()).unwrap();
        let event = decode_session_closed(&payload).unwrap();
        assert_eq!(event.session_id, "sess-1");
        assert_eq!(event.report_kind, DEFAULT_REPORT_KIND);
    }

    #[test]
    fn non_json_payload_is_a_parse_error() {
        let err = decode_session_closed(b"not json").unwrap_err();
        assert!(matches!(err, EventError::Parse { .. }));
    }

    #[test]
    fn wrong_type_is_a_validation_error() {
        let mut json = sample_json();
        json["type"] = "session.opened".into();
        let err = decode_session_closed(&serde_json::to_vec(&json).unwrap()).unwrap_err();
        assert!(matches!(err, EventError::Validation { .. }));
    }

    #[test]
    fn missing_session_id_is_a_validation_error() {
        let mut json = sample_json();
        json.as_object_mut().unwrap().remove("sessionId");
        let err = decode_session_closed(&serde_json::to_vec(&json).unwrap()).unwrap_err();
        assert!(matches!(err, EventError::Validation { .. }));
    }

    #[test]
    fn empty_machine_id_is_a_validation_error() {
        let mut json = sample_json();
        json["machineId"] = "".into();
        let err = decode_session_closed(&serde_json::to_vec(&json).unwrap()).unwrap_err();
        assert!(matches!(err, EventError::Validation { .. }));
    }
}
