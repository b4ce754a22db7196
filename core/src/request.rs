//! Turns a descriptor plus call options into a ready-to-send `HttpRequest`.
//!
//! # Design
//! Building is synchronous and touches neither the network nor the rate
//! limiter. Every validation failure therefore surfaces before an admission
//! is spent, and building the same request twice yields the same outcome.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use url::Url;

use crate::endpoint::{is_account_scoped, template_tokens, EndpointDescriptor};
use crate::error::ClientError;
use crate::http::{HttpMethod, HttpRequest};

/// Per-call inputs to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Substituted into the `:name` tokens of the URL template.
    pub params: BTreeMap<String, String>,
    pub body: Map<String, Value>,
    /// Overrides the descriptor's method.
    pub method: Option<HttpMethod>,
    /// Demand a credential even if the descriptor does not.
    pub require_auth: bool,
    /// Credential for this call only, used instead of the client's source.
    pub token: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl CallOptions {
    /// Options with no parameters, body or overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitutes `value` for `:name` in the URL template.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets one body member.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(name.into(), value.into());
        self
    }

    /// Replaces the body with the members of a JSON object. Non-object
    /// values leave the body empty.
    pub fn body(mut self, body: Value) -> Self {
        self.body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    /// Overrides the descriptor's HTTP method.
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Forces the auth check even where the endpoint does not demand it.
    pub fn require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    /// Uses `token` for this call instead of the client's token source.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Appends `page=` to the query.
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Appends `limit=` to the query.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Builds the request for `descriptor`.
///
/// `credential` is only consulted when the endpoint needs authorization and
/// no per-call token was supplied.
pub fn build_request(
    base_url: &Url,
    descriptor: &EndpointDescriptor,
    options: &CallOptions,
    credential: impl FnOnce() -> Option<String>,
) -> Result<HttpRequest, ClientError> {
    let path = resolve_path(descriptor.url_template(), &options.params)?;
    let payload = assemble_body(descriptor, &options.body)?;

    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    let needs_auth =
        options.require_auth || descriptor.requires_auth() || is_account_scoped(&path);
    let token = match &options.token {
        Some(token) => Some(token.clone()),
        None if needs_auth => credential(),
        None => None,
    };
    match token {
        Some(token) => headers.push(("Authorization".to_string(), format!("Bearer {token}"))),
        None if needs_auth => return Err(ClientError::MissingAuthToken),
        None => {}
    }

    let mut url = format!("{}/{}", base_url.as_str().trim_end_matches('/'), path);
    let query: Vec<String> = [("limit", options.limit), ("page", options.page)]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("{key}={v}")))
        .collect();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }

    let body = (!payload.is_empty()).then(|| Value::Object(payload).to_string());

    Ok(HttpRequest {
        method: options.method.unwrap_or(descriptor.method()),
        url,
        headers,
        body,
    })
}

/// Substitutes every `:name` token. Tokens without a parameter are collected
/// and reported together.
pub fn resolve_path(template: &str, params: &BTreeMap<String, String>) -> Result<String, ClientError> {
    let mut resolved = String::with_capacity(template.len());
    let mut missing = Vec::new();
    let mut last = 0;

    for (start, end) in template_tokens(template) {
        resolved.push_str(&template[last..start]);
        let token = &template[start..end];
        match params.get(&token[1..]) {
            Some(value) => resolved.push_str(value),
            None => {
                missing.push(token.to_string());
                resolved.push_str(token);
            }
        }
        last = end;
    }
    resolved.push_str(&template[last..]);

    if missing.is_empty() {
        Ok(resolved.trim_start_matches('/').to_string())
    } else {
        Err(ClientError::MissingParameter { names: missing })
    }
}

/// Validates the caller's body against the declared fields.
///
/// Declared fields come first, in declaration order; undeclared members
/// follow verbatim.
pub fn assemble_body(
    descriptor: &EndpointDescriptor,
    body: &Map<String, Value>,
) -> Result<Map<String, Value>, ClientError> {
    let mut payload = Map::new();

    for field in descriptor.body() {
        let Some(value) = body.get(&field.name) else {
            if field.optional {
                continue;
            }
            return Err(ClientError::MissingField {
                field: field.name.clone(),
            });
        };
        if let Some(allowed) = &field.allowed {
            if !value.as_str().is_some_and(|v| allowed.iter().any(|a| a == v)) {
                return Err(ClientError::InvalidFieldValue {
                    field: field.name.clone(),
                    value: value.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
        payload.insert(field.name.clone(), value.clone());
    }

    for (name, value) in body {
        if !payload.contains_key(name) {
            payload.insert(name.clone(), value.clone());
        }
    }
    Ok(payload)
}
