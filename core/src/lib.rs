//! Rate-limited, descriptor-driven client core for the SpaceTraders API.
//!
//! # Overview
//! Endpoints are described as data (`EndpointDescriptor`) and looked up by
//! symbolic key in an `EndpointRegistry`. A single entry point,
//! `SpaceTradersClient::call`, builds and validates the request, waits for a
//! `RateLimiter` admission, sends it through a `Transport`, and classifies
//! the response into a payload or a structured `ClientError`.
//!
//! # Design
//! - Request building and response classification are synchronous and
//!   free of I/O; only admission and the network call suspend.
//! - Validation failures are raised before admission and never cost a
//!   rate-limit slot.
//! - The limiter layers several windows (a burst window and a sustained
//!   window by default) and grants admissions strictly in FIFO order.
//! - Nothing is retried inside the core. Remote errors carry the server's
//!   code and data so callers can schedule their own retries.

pub mod auth;
pub mod bucket;
pub mod classify;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod limiter;
pub mod registry;
pub mod request;
pub mod transport;

pub use auth::{EnvToken, NoToken, StaticToken, TokenSource};
pub use bucket::{Bucket, BucketConfig};
pub use classify::{classify, Payload};
pub use client::{ClientBuilder, SpaceTradersClient};
pub use config::ClientConfig;
pub use endpoint::{BodyField, EndpointDescriptor};
pub use error::{ApiError, ClientError, ErrorKind, StructuredError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use limiter::{Admission, AdmissionHandle, BucketSnapshot, Grant, LimiterSnapshot, RateLimiter};
pub use registry::{EndpointRegistry, Target};
pub use request::{build_request, CallOptions};
pub use transport::{ReqwestTransport, Transport};
