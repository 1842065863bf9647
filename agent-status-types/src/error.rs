//! Error kinds for the status reporting pipeline.

use thiserror::Error;

/// The closed set of failure modes the pipeline can report.
///
/// `buffer-drop` is deliberately absent: it is counted, not raised, via an
/// atomic counter on the affected intake channel.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("bad config: {0}")]
    BadConfig(String),

    #[error("bad service name: {0}")]
    BadServiceName(String),

    #[error("bad backend name: {0}")]
    BadBackendName(String),

    #[error("bad trigger mode: {0}")]
    BadTriggerMode(String),

    #[error("trigger mode mismatch: declared {declared}, parsed {parsed}")]
    TriggerModeMismatch { declared: String, parsed: String },

    #[error("transport failure: {0}")]
    TransportFailure(#[source] reqwest::Error),

    #[error("status update failed, server replied with HTTP {code} {reason}")]
    RemoteReject { code: u16, reason: String },

    #[error("bad backend: {0}")]
    BadBackend(String),

    #[error("serialization failure: {0}")]
    SerializationFailure(#[source] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for StatusError {
    fn from(err: serde_json::Error) -> Self {
        StatusError::SerializationFailure(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_reject_message_matches_wire_contract() {
        let err = StatusError::RemoteReject {
            code: 401,
            reason: "Unauthorized".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "status update failed, server replied with HTTP 401 Unauthorized"
        );
    }

    #[test]
    fn trigger_mode_mismatch_names_both_values() {
        let err = StatusError::TriggerModeMismatch {
            declared: "periodic".to_string(),
            parsed: "manual".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "trigger mode mismatch: declared periodic, parsed manual"
        );
    }
}
