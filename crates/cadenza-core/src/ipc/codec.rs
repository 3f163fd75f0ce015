//! Error codec: marshals failures into a transferable envelope.
//!
//! Type identity cannot cross the process boundary, so a failure travels
//! as a tagged envelope carrying its name, message, stack and any custom
//! data fields. The receiving side reconstructs a [`RemoteError`] from
//! the envelope; `error instanceof SomeClass`-style checks do not survive
//! the trip, only the carried fields do.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire representation of a failure.
///
/// Any response value with `isError: true` is interpreted as a failure by
/// the transport's receive paths, never as data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "isError")]
    pub is_error: bool,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Value>,
    /// Any other enumerable fields of the original error, carried
    /// through unchanged.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A failure reconstructed from an [`ErrorEnvelope`].
///
/// Carries the responder-side stack when one was provided, since that is
/// the useful one for diagnostics. The envelope's `isError` marker does
/// not appear here; it exists only on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub cause: Option<Value>,
    pub fields: Map<String, Value>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
            fields: Map::new(),
        }
    }

    /// Attach a custom data field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Marshal a true error value into its wire envelope.
pub fn marshal(error: &RemoteError) -> ErrorEnvelope {
    ErrorEnvelope {
        is_error: true,
        name: error.name.clone(),
        message: error.message.clone(),
        stack: error.stack.clone(),
        cause: error.cause.clone(),
        fields: error.fields.clone(),
    }
}

/// Marshal a thrown value that is not an error object.
///
/// Normalized to an `UnknownError` envelope whose message is the value's
/// string rendering.
pub fn marshal_value(value: &Value) -> ErrorEnvelope {
    let message = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ErrorEnvelope {
        is_error: true,
        name: "UnknownError".to_string(),
        message,
        stack: None,
        cause: None,
        fields: Map::new(),
    }
}

/// Reconstruct an error value from its envelope.
pub fn unmarshal(envelope: ErrorEnvelope) -> RemoteError {
    RemoteError {
        name: envelope.name,
        message: envelope.message,
        stack: envelope.stack,
        cause: envelope.cause,
        fields: envelope.fields,
    }
}

/// Structural check for the `isError` marker.
pub fn is_envelope(value: &Value) -> bool {
    value
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parse a response body into a reconstructed error, if it is one.
pub fn envelope_from_value(value: &Value) -> Option<RemoteError> {
    if !is_envelope(value) {
        return None;
    }
    serde_json::from_value::<ErrorEnvelope>(value.clone())
        .ok()
        .map(unmarshal)
}
