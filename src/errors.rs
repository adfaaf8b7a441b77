use thiserror::Error;

/// Why an inbound event was rejected before it could touch any state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl EventError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
