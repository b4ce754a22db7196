//! The primary entry point: one `call` per endpoint invocation.
//!
//! # Design
//! `call` runs the pipeline stages in a fixed order:
//! 1. resolve the descriptor and build the request (synchronous; any
//!    validation failure returns here, before the limiter is touched)
//! 2. wait for a rate-limit admission
//! 3. send through the transport
//! 4. classify the response
//!
//! Nothing is retried. Dropping the returned future while it waits for
//! admission withdraws it from the limiter queue.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, field, instrument, Span};
use url::Url;

use crate::auth::{NoToken, TokenSource};
use crate::classify::{classify, Payload};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::limiter::RateLimiter;
use crate::registry::{EndpointRegistry, Target};
use crate::request::{build_request, CallOptions};
use crate::transport::{ReqwestTransport, Transport};

/// Builder for [`SpaceTradersClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    registry: Option<Arc<EndpointRegistry>>,
    limiter: Option<RateLimiter>,
    transport: Option<Arc<dyn Transport>>,
    tokens: Arc<dyn TokenSource>,
}

impl ClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            registry: None,
            limiter: None,
            transport: None,
            tokens: Arc::new(NoToken),
        }
    }

    /// Defaults to the bundled SpaceTraders table.
    pub fn registry(mut self, registry: Arc<EndpointRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Shares an existing limiter instead of creating one from the config's
    /// buckets. Clients that talk to the same account should share one.
    pub fn limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Defaults to a `ReqwestTransport` with the configured timeout.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to `NoToken`.
    pub fn token_source(mut self, tokens: impl TokenSource + 'static) -> Self {
        self.tokens = Arc::new(tokens);
        self
    }

    /// Validates the configuration and fills in every default.
    pub fn build(self) -> Result<SpaceTradersClient, ClientError> {
        self.config.validate()?;
        let base_url = self.config.base_url()?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(EndpointRegistry::builtin()?),
        };
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => RateLimiter::new(&self.config.buckets)?,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.timeout())?),
        };

        Ok(SpaceTradersClient {
            base_url,
            registry,
            limiter,
            transport,
            tokens: self.tokens,
        })
    }
}

/// Rate-limited, descriptor-driven client for the SpaceTraders API.
///
/// Cheap to clone; clones share the registry, limiter and transport.
#[derive(Clone)]
pub struct SpaceTradersClient {
    base_url: Url,
    registry: Arc<EndpointRegistry>,
    limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
}

impl SpaceTradersClient {
    /// Starts from `config`; everything else has a default.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// A client with default configuration and the given credential source.
    pub fn new(tokens: impl TokenSource + 'static) -> Result<Self, ClientError> {
        Self::builder(ClientConfig::default())
            .token_source(tokens)
            .build()
    }

    /// Base URL every endpoint template is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The endpoint table this client resolves keys in.
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// The limiter every call on this client is admitted through.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Calls an endpoint and resolves to the `data` member of the response.
    pub async fn call<'a>(
        &self,
        target: impl Into<Target<'a>>,
        options: CallOptions,
    ) -> Result<Value, ClientError> {
        Ok(self.call_page(target, options).await?.data)
    }

    /// Like [`call`](Self::call), deserialising `data` into `T`.
    pub async fn call_as<'a, T: DeserializeOwned>(
        &self,
        target: impl Into<Target<'a>>,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        let data = self.call(target, options).await?;
        serde_json::from_value(data)
            .map_err(|e| ClientError::Transport(format!("unexpected response shape: {e}")))
    }

    /// Calls an endpoint and keeps the pagination `meta` alongside `data`.
    pub async fn call_page<'a>(
        &self,
        target: impl Into<Target<'a>>,
        options: CallOptions,
    ) -> Result<Payload, ClientError> {
        self.execute(target.into(), options).await
    }

    #[instrument(
        name = "api_call",
        skip(self, options),
        fields(
            endpoint = %target,
            http.method = field::Empty,
            http.url = field::Empty,
            http.status_code = field::Empty,
        )
    )]
    async fn execute(&self, target: Target<'_>, options: CallOptions) -> Result<Payload, ClientError> {
        let descriptor = self.registry.resolve(target)?;
        let request = build_request(&self.base_url, descriptor, &options, || self.tokens.token())?;

        let span = Span::current();
        span.record("http.method", request.method.to_string().as_str());
        span.record("http.url", request.url.as_str());
        if !descriptor.requirements().is_empty() {
            debug!(requires = ?descriptor.requirements(), "endpoint has unchecked prerequisites");
        }

        let grant = self.limiter.admit().await?;
        debug!(sequence = grant.sequence, "admitted");

        let response = self.transport.send(request).await?;
        span.record("http.status_code", response.status);

        let result = classify(response);
        if let Err(err) = &result {
            debug!(kind = %err.kind(), code = ?err.code(), %err, "call failed");
        }
        result
    }
}

impl std::fmt::Debug for SpaceTradersClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceTradersClient")
            .field("base_url", &self.base_url.as_str())
            .field("endpoints", &self.registry.len())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
