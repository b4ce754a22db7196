//! Error types for the SpaceTraders client pipeline.
//!
//! # Design
//! Every failure the pipeline can produce is a `ClientError`. Validation
//! variants (`MissingParameter`, `MissingField`, `InvalidFieldValue`,
//! `MissingAuthToken`) are raised before the rate limiter is consulted, so
//! they never cost an admission. Remote failures land in `Api` carrying the
//! server's code, message and auxiliary data verbatim; the core never retries
//! on its own, callers read `ApiError::retry_after` and decide.
//!
//! `StructuredError` is the one serialisable shape every failure can be
//! rendered as, regardless of where it originated.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;

/// A failure reported by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    /// HTTP status of the response that carried the error.
    pub status: u16,
    /// Numeric error code from the `error.code` member, if present.
    pub code: Option<i64>,
    pub message: String,
    /// The `error.data` member, kept verbatim.
    pub data: Option<Value>,
}

impl ApiError {
    /// How long the server asked the caller to wait, if it said so.
    ///
    /// Reads `data.retryAfter` (seconds, sent with 429 responses) and falls
    /// back to `data.cooldown.remainingSeconds` (ship cooldown errors).
    pub fn retry_after(&self) -> Option<Duration> {
        let data = self.data.as_ref()?;
        let seconds = data
            .get("retryAfter")
            .and_then(Value::as_f64)
            .or_else(|| {
                data.get("cooldown")
                    .and_then(|c| c.get("remainingSeconds"))
                    .and_then(Value::as_f64)
            })?;
        // Negative, non-finite and out-of-range values are ignored.
        Duration::try_from_secs_f64(seconds).ok()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "HTTP {} (code {code}): {}", self.status, self.message),
            None => write!(f, "HTTP {}: {}", self.status, self.message),
        }
    }
}

/// Errors returned by the request pipeline.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The URL template still contains `:name` tokens after substitution.
    #[error("missing parameters: {}", names.join(", "))]
    MissingParameter { names: Vec<String> },

    /// A required body field was not supplied.
    #[error("missing payload body parameter: {field}")]
    MissingField { field: String },

    /// A body field is outside its enumerated set of legal values.
    #[error("invalid value {value} for {field} (expected one of: {})", allowed.join(", "))]
    InvalidFieldValue {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    /// The endpoint needs a credential and none was available.
    #[error("missing auth token")]
    MissingAuthToken,

    #[error("unknown endpoint: {key}")]
    UnknownEndpoint { key: String },

    #[error("invalid endpoint descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// The network call failed or the body was not JSON.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error: {0}")]
    Api(ApiError),

    /// An admission was recorded against a full bucket. Unreachable while the
    /// limiter checks fullness before recording.
    #[error("rate-limit bucket {bucket} is exhausted")]
    BucketExhausted { bucket: usize },

    /// The caller withdrew from the admission queue before being admitted.
    #[error("admission cancelled")]
    Cancelled,
}

/// Discriminant of `ClientError`, for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
pub enum ErrorKind {
    MissingParameter,
    MissingField,
    InvalidFieldValue,
    MissingAuthToken,
    UnknownEndpoint,
    InvalidDescriptor,
    Config,
    TransportError,
    ApiError,
    BucketExhausted,
    Cancelled,
}

impl ErrorKind {
    /// Validation kinds are raised before any rate-limit admission is spent.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            Self::MissingParameter
                | Self::MissingField
                | Self::InvalidFieldValue
                | Self::MissingAuthToken
                | Self::UnknownEndpoint
        )
    }
}

/// Serialisable view of any `ClientError`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ClientError {
    /// The failure class, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter { .. } => ErrorKind::MissingParameter,
            Self::MissingField { .. } => ErrorKind::MissingField,
            Self::InvalidFieldValue { .. } => ErrorKind::InvalidFieldValue,
            Self::MissingAuthToken => ErrorKind::MissingAuthToken,
            Self::UnknownEndpoint { .. } => ErrorKind::UnknownEndpoint,
            Self::InvalidDescriptor { .. } => ErrorKind::InvalidDescriptor,
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::Api(_) => ErrorKind::ApiError,
            Self::BucketExhausted { .. } => ErrorKind::BucketExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Remote error code, only present on `Api` failures.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api(api) => api.code,
            _ => None,
        }
    }

    /// Auxiliary data: the remote `error.data` for `Api`, or the offending
    /// names and values for validation failures.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Api(api) => api.data.clone(),
            Self::MissingParameter { names } => Some(serde_json::json!({ "parameters": names })),
            Self::MissingField { field } => Some(serde_json::json!({ "field": field })),
            Self::InvalidFieldValue {
                field,
                value,
                allowed,
            } => Some(serde_json::json!({ "field": field, "value": value, "allowed": allowed })),
            Self::BucketExhausted { bucket } => Some(serde_json::json!({ "bucket": bucket })),
            _ => None,
        }
    }

    /// Wait hint from the remote API, if the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api(api) => api.retry_after(),
            _ => None,
        }
    }

    /// The single serialisable failure shape.
    pub fn to_structured(&self) -> StructuredError {
        let message = match self {
            Self::Api(api) => api.message.clone(),
            other => other.to_string(),
        };
        StructuredError {
            kind: self.kind(),
            message,
            code: self.code(),
            data: self.data(),
        }
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl From<figment::Error> for ClientError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api(data: Option<Value>) -> ApiError {
        ApiError {
            status: 409,
            code: Some(4000),
            message: "Ship action is still on cooldown".to_string(),
            data,
        }
    }

    #[test]
    fn missing_parameter_names_every_token() {
        let err = ClientError::MissingParameter {
            names: vec![":system".to_string(), ":waypoint".to_string()],
        };
        assert_eq!(err.to_string(), "missing parameters: :system, :waypoint");
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(err.kind().is_validation());
    }

    #[test]
    fn invalid_field_value_display_lists_allowed() {
        let err = ClientError::InvalidFieldValue {
            field: "flightMode".to_string(),
            value: "\"WARP\"".to_string(),
            allowed: vec!["CRUISE".to_string(), "BURN".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"WARP\" for flightMode (expected one of: CRUISE, BURN)"
        );
    }

    #[test]
    fn retry_after_reads_cooldown() {
        let err = api(Some(json!({"cooldown": {"shipSymbol": "S-1", "remainingSeconds": 42}})));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn retry_after_prefers_retry_after_member() {
        let err = api(Some(json!({"retryAfter": 0.5, "cooldown": {"remainingSeconds": 9}})));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn retry_after_absent_without_data() {
        assert_eq!(api(None).retry_after(), None);
        assert_eq!(api(Some(json!({"other": 1}))).retry_after(), None);
    }

    #[test]
    fn retry_after_ignores_unrepresentable_waits() {
        assert_eq!(api(Some(json!({"retryAfter": 1e300}))).retry_after(), None);
        assert_eq!(api(Some(json!({"retryAfter": -1.0}))).retry_after(), None);
        let cooldown = json!({"cooldown": {"remainingSeconds": 1e20}});
        assert_eq!(api(Some(cooldown)).retry_after(), None);
    }

    #[test]
    fn structured_api_error_keeps_remote_fields() {
        let err = ClientError::Api(api(Some(json!({"cooldown": {"remainingSeconds": 3}}))));
        let structured = err.to_structured();
        assert_eq!(structured.kind, ErrorKind::ApiError);
        assert_eq!(structured.code, Some(4000));
        assert_eq!(structured.message, "Ship action is still on cooldown");
        assert_eq!(structured.data.unwrap()["cooldown"]["remainingSeconds"], 3);
        assert!(!ErrorKind::ApiError.is_validation());
    }

    #[test]
    fn structured_error_serializes_without_empty_members() {
        let value = serde_json::to_value(ClientError::MissingAuthToken.to_structured()).unwrap();
        assert_eq!(value, json!({"kind": "MissingAuthToken", "message": "missing auth token"}));
    }
}
