//! Endpoint resolution and lease caching.
//!
//! A resolver turns an application id into a transport address plus a
//! time-to-live. The lifecycle driver caches the result as a
//! [`SessionDescriptor`] and only asks again once the lease has run out.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Resolution failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ResolveError(pub String);

/// A resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Transport address, e.g. `wss://push.example.com/ws`.
    pub address: String,
    /// How long the address may be reused.
    pub ttl: Duration,
}

/// Looks up the endpoint for an application.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, app_id: &str, secure: bool) -> Result<Endpoint, ResolveError>;
}

/// A resolved address with its lease expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    address: String,
    lease_expiry: Instant,
}

impl SessionDescriptor {
    #[must_use]
    pub fn new(endpoint: Endpoint, now: Instant) -> Self {
        Self {
            address: endpoint.address,
            lease_expiry: now + endpoint.ttl,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn lease_expiry(&self) -> Instant {
        self.lease_expiry
    }

    /// Whether the address may still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.lease_expiry
    }
}

/// Always resolves to the same endpoint.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    endpoint: Endpoint,
}

impl StaticResolver {
    #[must_use]
    pub fn new(address: impl Into<String>, ttl: Duration) -> Self {
        Self {
            endpoint: Endpoint {
                address: address.into(),
                ttl,
            },
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _app_id: &str, _secure: bool) -> Result<Endpoint, ResolveError> {
        Ok(self.endpoint.clone())
    }
}
