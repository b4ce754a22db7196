//! Declarative endpoint descriptors.
//!
//! # Format
//! A descriptor is data. In JSON it is either a bare URL template string,
//! which means a `GET` with no body, or an object:
//!
//! ```json
//! {
//!   "method": "PATCH",
//!   "url": "my/ships/:ship/nav",
//!   "body": { "flightMode": ["CRUISE", "BURN", "DRIFT", "STEALTH"] },
//!   "requiresAuth": true
//! }
//! ```
//!
//! `body` is either an ordered list of field names or a map from field name
//! to its legal values. A leading `?` marks a field optional. `type` and
//! `token` are accepted as older spellings of `method` and `requiresAuth`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::http::HttpMethod;

/// One body field declared by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyField {
    pub name: String,
    pub optional: bool,
    /// Enumerated legal values. `None` accepts anything.
    pub allowed: Option<Vec<String>>,
}

impl BodyField {
    /// A field the caller must supply.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            allowed: None,
        }
    }

    /// A field sent only when supplied.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::required(name)
        }
    }

    /// Restricts the field to `values`.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Parses the `?name` convention.
    fn from_spec(spec: &str, allowed: Option<Vec<String>>) -> Result<Self, String> {
        let (name, optional) = match spec.strip_prefix('?') {
            Some(rest) => (rest, true),
            None => (spec, false),
        };
        if name.is_empty() {
            return Err(format!("empty body field name in {spec:?}"));
        }
        Ok(Self {
            name: name.to_string(),
            optional,
            allowed,
        })
    }
}

/// Immutable description of one endpoint: method, URL shape, body contract
/// and whether a credential is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawEndpoint")]
pub struct EndpointDescriptor {
    method: HttpMethod,
    url_template: String,
    body: Vec<BodyField>,
    requires_auth: bool,
    requires: Vec<String>,
}

impl EndpointDescriptor {
    /// A descriptor with no body, auth flag or prerequisites.
    pub fn new(method: HttpMethod, url_template: impl Into<String>) -> Self {
        Self {
            method,
            url_template: url_template.into(),
            body: Vec::new(),
            requires_auth: false,
            requires: Vec::new(),
        }
    }

    /// A bodiless `GET`, the meaning of a bare template string.
    pub fn get(url_template: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url_template)
    }

    /// Declares the body fields, in order.
    pub fn with_body(mut self, fields: impl IntoIterator<Item = BodyField>) -> Self {
        self.body = fields.into_iter().collect();
        self
    }

    /// Demands a credential on every call.
    pub fn with_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Attaches informational prerequisites.
    pub fn with_requirements<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    /// HTTP method used unless a call overrides it.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The template with its `:name` placeholders.
    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Declared body fields, in declaration order.
    pub fn body(&self) -> &[BodyField] {
        &self.body
    }

    /// Whether the descriptor itself demands a credential. Account-scoped
    /// paths (`my/...`) demand one as well; see [`is_account_scoped`].
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Informational prerequisites such as `1xWARP_DRIVE`. Never enforced.
    pub fn requirements(&self) -> &[String] {
        &self.requires
    }

    /// Every `:name` token in the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        template_tokens(&self.url_template)
            .map(|(start, end)| &self.url_template[start..end])
            .collect()
    }
}

/// True when a path targets the authenticated agent's own resources.
pub fn is_account_scoped(path: &str) -> bool {
    path.trim_start_matches('/').split('/').next() == Some("my") || path.contains("/my/")
}

/// Byte ranges of every `:name` token (`:` followed by ASCII letters).
pub(crate) fn template_tokens(template: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let bytes = template.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            if bytes[pos] == b':' {
                let start = pos;
                let mut end = pos + 1;
                while end < bytes.len() && bytes[end].is_ascii_alphabetic() {
                    end += 1;
                }
                pos = end;
                if end > start + 1 {
                    return Some((start, end));
                }
            } else {
                pos += 1;
            }
        }
        None
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEndpoint {
    Template(String),
    Full(RawFull),
}

#[derive(Deserialize)]
struct RawFull {
    #[serde(default, alias = "type")]
    method: HttpMethod,
    url: String,
    #[serde(default)]
    body: Option<RawBody>,
    #[serde(default, rename = "requiresAuth", alias = "token")]
    requires_auth: bool,
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBody {
    Fields(Vec<String>),
    Constrained(Map<String, Value>),
}

impl TryFrom<RawEndpoint> for EndpointDescriptor {
    type Error = String;

    fn try_from(raw: RawEndpoint) -> Result<Self, Self::Error> {
        let full = match raw {
            RawEndpoint::Template(url) => return Ok(Self::get(url)),
            RawEndpoint::Full(full) => full,
        };

        let body = match full.body {
            None => Vec::new(),
            Some(RawBody::Fields(names)) => names
                .iter()
                .map(|spec| BodyField::from_spec(spec, None))
                .collect::<Result<_, _>>()?,
            Some(RawBody::Constrained(map)) => map
                .iter()
                .map(|(spec, values)| BodyField::from_spec(spec, allowed_values(spec, values)?))
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            method: full.method,
            url_template: full.url,
            body,
            requires_auth: full.requires_auth,
            requires: full.requires,
        })
    }
}

fn allowed_values(field: &str, values: &Value) -> Result<Option<Vec<String>>, String> {
    match values {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("legal values of {field:?} must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(format!("legal values of {field:?} must be a list, got {other}")),
    }
}
