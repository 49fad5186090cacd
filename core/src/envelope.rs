use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation::CorrelationId;

/// Namespace used when neither the engine config nor the transport names one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Error codes carried by error-response envelopes.
pub mod codes {
    /// Handler returned an error without choosing its own code
    pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
    /// Request payload could not be decoded into the handler's arguments
    pub const INVALID_ARGUMENTS: &str = "INVALID_ARGUMENTS";
    /// Handler task panicked before producing a value
    pub const HANDLER_PANICKED: &str = "HANDLER_PANICKED";
}

/// Failure description carried back to the caller on an error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The unit exchanged over a transport, correlating a logical call to its reply.
///
/// A request carries the positional arguments of the call as a JSON array in
/// `payload`; the matching response carries the handler's return value (or
/// `null` for operations without a meaningful result) and echoes `operation`,
/// `namespace` and `correlation_id` unchanged.
///
/// # Wire shape
///
/// ```json
/// {
///   "operation": "add",
///   "namespace": "default",
///   "correlationId": "6f1c0e3a9b2d4c7e8f0a1b2c3d4e5f60",
///   "payload": [2, 3],
///   "isResponse": false
/// }
/// ```
///
/// Error responses add an `error` object (`{"code": .., "message": ..}`) and
/// carry a `null` payload. The field is omitted everywhere else.
///
/// # Examples
///
/// ```
/// use parley_core::Envelope;
/// use serde_json::json;
///
/// let req = Envelope::request("add", "default", vec![json!(2), json!(3)]);
/// assert!(!req.is_response);
///
/// let resp = Envelope::response_to(&req, json!(5));
/// assert!(resp.is_response);
/// assert_eq!(resp.correlation_id, req.correlation_id);
/// assert_eq!(resp.payload, json!(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Logical message kind; selects the handler and, on the way back, the caller
    pub operation: String,
    /// Engine instance this envelope belongs to
    pub namespace: String,
    /// Per-request token echoed by the response
    pub correlation_id: CorrelationId,
    /// Call arguments (request) or return value (response)
    #[serde(default)]
    pub payload: Value,
    /// `false` for requests, `true` for responses
    pub is_response: bool,
    /// Set only on responses whose handler failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Envelope {
    /// Builds a request envelope with a freshly minted correlation id.
    pub fn request(
        operation: impl Into<String>,
        namespace: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            operation: operation.into(),
            namespace: namespace.into(),
            correlation_id: CorrelationId::generate(),
            payload: Value::Array(args),
            is_response: false,
            error: None,
        }
    }

    /// Builds the successful response for `request`.
    pub fn response_to(request: &Envelope, payload: Value) -> Self {
        Self {
            operation: request.operation.clone(),
            namespace: request.namespace.clone(),
            correlation_id: request.correlation_id.clone(),
            payload,
            is_response: true,
            error: None,
        }
    }

    /// Builds the error response for `request`.
    pub fn error_response_to(request: &Envelope, error: RemoteError) -> Self {
        Self {
            error: Some(error),
            ..Self::response_to(request, Value::Null)
        }
    }

    /// Positional arguments of a request.
    ///
    /// A non-array payload is treated as a single argument and `null` as none,
    /// so envelopes produced by lenient senders still dispatch.
    pub fn args(&self) -> Vec<Value> {
        match &self.payload {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Decodes a raw transport value. Returns `None` for anything that is not an envelope.
    pub fn from_value(raw: &Value) -> Option<Self> {
        Envelope::deserialize(raw).ok()
    }

    /// Encodes the envelope into the raw form handed to a transport.
    pub fn to_value(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether this response answers the request identified by `operation` and `correlation_id`.
    pub fn answers(&self, operation: &str, correlation_id: &CorrelationId) -> bool {
        self.is_response && self.operation == operation && &self.correlation_id == correlation_id
    }
}

/// Converts call arguments into the positional list carried by a request.
///
/// Tuples and sequences expand into positional arguments, `()` means no
/// arguments and any other value becomes the single argument. Wrap a
/// sequence in a one-element tuple (`(vec,)`) to pass it as one argument.
pub fn encode_args<A: Serialize>(args: A) -> crate::Result<Vec<Value>> {
    Ok(match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_args_expands_tuples() {
        assert_eq!(encode_args((2, 3)).unwrap(), vec![json!(2), json!(3)]);
        assert_eq!(encode_args(()).unwrap(), Vec::<Value>::new());
        assert_eq!(encode_args("a").unwrap(), vec![json!("a")]);
        assert_eq!(
            encode_args((vec![1, 2],)).unwrap(),
            vec![json!([1, 2])]
        );
    }

    #[test]
    fn args_accepts_lenient_payloads() {
        let mut env = Envelope::request("op", "ns", vec![]);
        env.payload = json!("solo");
        assert_eq!(env.args(), vec![json!("solo")]);
        env.payload = Value::Null;
        assert!(env.args().is_empty());
    }

    #[test]
    fn error_field_is_omitted_on_success() {
        let req = Envelope::request("op", "ns", vec![]);
        let raw = Envelope::response_to(&req, json!(1)).to_value().unwrap();
        assert!(raw.get("error").is_none());
        assert_eq!(raw["isResponse"], json!(true));
        assert_eq!(raw["correlationId"], json!(req.correlation_id.as_str()));
    }
}
