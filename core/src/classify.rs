//! Response classification: payload or structured error.
//!
//! A response succeeds only with a 2xx status and no `error` member in the
//! body. Everything else becomes `ClientError::Api` with the remote code,
//! message and data kept verbatim. A body that is not JSON is a transport
//! failure, not an API one.

use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ClientError};
use crate::http::HttpResponse;

/// A successful response, split into its `data` and `meta` members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub data: Value,
    /// Pagination totals (`total`, `page`, `limit`) on list endpoints.
    pub meta: Option<Value>,
}

/// Splits a response into its payload or a `ClientError::Api`.
pub fn classify(response: HttpResponse) -> Result<Payload, ClientError> {
    let body: Value = if response.body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&response.body).map_err(|e| {
            ClientError::Transport(format!(
                "HTTP {} response body is not JSON: {e}",
                response.status
            ))
        })?
    };

    let error = body.get("error").filter(|e| !e.is_null());
    if response.is_success() && error.is_none() {
        return Ok(into_payload(body));
    }

    Err(ClientError::Api(match error {
        Some(error) => ApiError {
            status: response.status,
            code: error.get("code").and_then(Value::as_i64),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| default_message(response.status)),
            data: error.get("data").cloned(),
        },
        None => ApiError {
            status: response.status,
            code: None,
            message: default_message(response.status),
            data: (!body.is_null()).then_some(body),
        },
    }))
}

fn into_payload(body: Value) -> Payload {
    match body {
        Value::Object(mut map) if map.contains_key("data") => Payload {
            data: map.remove("data").unwrap_or(Value::Null),
            meta: map.remove("meta"),
        },
        other => Payload {
            data: other,
            meta: None,
        },
    }
}

fn default_message(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn data_member_is_unwrapped() {
        let payload = classify(response(200, r#"{"data": {"symbol": "AGENT"}}"#)).unwrap();
        assert_eq!(payload.data, json!({"symbol": "AGENT"}));
        assert_eq!(payload.meta, None);
    }

    #[test]
    fn meta_is_kept_for_lists() {
        let payload = classify(response(
            200,
            r#"{"data": [1, 2], "meta": {"total": 40, "page": 1, "limit": 2}}"#,
        ))
        .unwrap();
        assert_eq!(payload.data, json!([1, 2]));
        assert_eq!(payload.meta.unwrap()["total"], 40);
    }

    #[test]
    fn error_marker_on_200_is_an_api_error() {
        let err = classify(response(
            200,
            r#"{"error": {"code": 4214, "message": "Ship is in transit"}}"#,
        ))
        .unwrap_err();
        match err {
            ClientError::Api(api) => {
                assert_eq!(api.status, 200);
                assert_eq!(api.code, Some(4214));
                assert_eq!(api.message, "Ship is in transit");
                assert_eq!(api.data, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cooldown_data_is_kept_verbatim() {
        let body = json!({"error": {
            "code": 4000,
            "message": "Ship action is still on cooldown",
            "data": {"cooldown": {"shipSymbol": "S-1", "remainingSeconds": 57}}
        }});
        let err = classify(response(409, &body.to_string())).unwrap_err();
        assert_eq!(err.code(), Some(4000));
        assert_eq!(err.data().unwrap(), body["error"]["data"]);
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(57)));
    }

    #[test]
    fn non_2xx_without_error_member() {
        let err = classify(response(503, r#"{"status": "maintenance"}"#)).unwrap_err();
        match err {
            ClientError::Api(api) => {
                assert_eq!(api.code, None);
                assert_eq!(api.message, "HTTP 503 Service Unavailable");
                assert_eq!(api.data, Some(json!({"status": "maintenance"})));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_json_body_is_transport_error() {
        let err = classify(response(502, "<html>Bad Gateway</html>")).unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        let err = classify(response(200, "not json")).unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn empty_success_body_is_null_payload() {
        let payload = classify(response(204, "")).unwrap();
        assert_eq!(payload.data, Value::Null);
    }

    #[test]
    fn body_without_data_member_is_returned_whole() {
        let payload = classify(response(200, r#"{"status": "ok", "version": "v2"}"#)).unwrap();
        assert_eq!(payload.data["version"], "v2");
    }

    #[test]
    fn null_error_member_is_not_an_error() {
        assert!(classify(response(200, r#"{"data": 1, "error": null}"#)).is_ok());
    }
}
