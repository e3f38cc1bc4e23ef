//! Caller extraction for REST handlers

use crate::core::error::ApiError;
use crate::core::identity::{Caller, IdentityProvider, client_address};
use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::request::Parts;
use std::net::SocketAddr;
use std::sync::Arc;

/// Resolves the [`Caller`] of a request: identity from the provider, client
/// address from the socket and `X-Forwarded-For`
#[derive(Clone)]
pub struct CallerResolver {
    identity: Arc<dyn IdentityProvider>,
    num_proxies: Option<usize>,
}

impl CallerResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>, num_proxies: Option<usize>) -> Self {
        Self {
            identity,
            num_proxies,
        }
    }

    pub async fn resolve(&self, parts: &Parts) -> Result<Caller, ApiError> {
        let identity = self.identity.current_identity(&parts.headers).await?;
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = client_address(&parts.headers, peer, self.num_proxies);
        Ok(Caller::new(identity, client))
    }
}

impl<S> FromRequestParts<S> for Caller
where
    Arc<CallerResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<CallerResolver>::from_ref(state);
        resolver.resolve(parts).await
    }
}
