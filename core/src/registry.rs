//! Symbolic-key lookup of endpoint descriptors.
//!
//! The registry is built once, at start-up, and only read afterwards. Share
//! it behind an `Arc`; nothing in it is ever mutated.

use std::collections::BTreeMap;
use std::fmt;

use crate::endpoint::EndpointDescriptor;
use crate::error::ClientError;

const BUILTIN_ENDPOINTS: &str = include_str!("../endpoints.json");

/// Immutable table of named endpoint descriptors.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, EndpointDescriptor>,
}

impl EndpointRegistry {
    /// The SpaceTraders v2 endpoint table bundled with this crate.
    pub fn builtin() -> Result<Self, ClientError> {
        Self::from_json(BUILTIN_ENDPOINTS)
    }

    /// Parses a JSON object mapping names to descriptors.
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let endpoints = serde_json::from_str(json).map_err(|e| ClientError::InvalidDescriptor {
            reason: e.to_string(),
        })?;
        Ok(Self { endpoints })
    }

    /// Builds a registry from `(key, descriptor)` pairs. A repeated key keeps
    /// the last descriptor.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, EndpointDescriptor)>,
        K: Into<String>,
    {
        Self {
            endpoints: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// The descriptor registered under `key`, or `UnknownEndpoint`.
    pub fn get(&self, key: &str) -> Result<&EndpointDescriptor, ClientError> {
        self.endpoints
            .get(key)
            .ok_or_else(|| ClientError::UnknownEndpoint {
                key: key.to_string(),
            })
    }

    /// Looks up a key, or passes an inline descriptor through untouched.
    pub fn resolve<'a>(&'a self, target: Target<'a>) -> Result<&'a EndpointDescriptor, ClientError> {
        match target {
            Target::Key(key) => self.get(key),
            Target::Descriptor(descriptor) => Ok(descriptor),
        }
    }

    /// Every registered key, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True when no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// What a call addresses: a registry key or a descriptor held by the caller.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// A key looked up in the registry.
    Key(&'a str),
    /// A descriptor used as-is, bypassing the registry.
    Descriptor(&'a EndpointDescriptor),
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(key: &'a str) -> Self {
        Target::Key(key)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(key: &'a String) -> Self {
        Target::Key(key)
    }
}

impl<'a> From<&'a EndpointDescriptor> for Target<'a> {
    fn from(descriptor: &'a EndpointDescriptor) -> Self {
        Target::Descriptor(descriptor)
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Key(key) => f.write_str(key),
            Target::Descriptor(d) => write!(f, "{} {}", d.method(), d.url_template()),
        }
    }
}
