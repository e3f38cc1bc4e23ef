//! Identity context for the policy pipeline
//!
//! Resolves who is calling:
//! - An authenticated user (token authentication)
//! - An anonymous caller, identified for throttling by its network origin

use crate::core::error::ApiError;
use crate::core::service::ReadService;
use crate::entities::User;
use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Identity resolved for the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Authenticated user
    User { id: Uuid, username: String },

    /// No authentication (public access)
    Anonymous,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::User { .. })
    }

    /// Get user_id if available
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::User { id, .. } => Some(*id),
            Identity::Anonymous => None,
        }
    }
}

/// Key used to partition throttle counters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerKey {
    User(Uuid),
    Client(String),
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerKey::User(id) => write!(f, "user:{}", id),
            CallerKey::Client(addr) => write!(f, "client:{}", addr),
        }
    }
}

/// The caller of a request: its identity plus its network origin
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Identity,
    pub client: String,
}

impl Caller {
    pub fn new(identity: Identity, client: impl Into<String>) -> Self {
        Self {
            identity,
            client: client.into(),
        }
    }

    pub fn anonymous(client: impl Into<String>) -> Self {
        Self::new(Identity::Anonymous, client)
    }

    /// Per-user key when authenticated, per-client key otherwise
    pub fn key(&self) -> CallerKey {
        match self.identity.user_id() {
            Some(id) => CallerKey::User(id),
            None => CallerKey::Client(self.client.clone()),
        }
    }
}

/// Resolve the client address of a request.
///
/// `Some(0)` trusts only the socket peer. `Some(n)` picks the n-th
/// `X-Forwarded-For` entry counted from the right. With `num_proxies = None`
/// the first entry wins when the header is present, so a client can pick its
/// own address; only use it behind a proxy that overwrites the header.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    num_proxies: Option<usize>,
) -> String {
    let remote = peer.map(|addr| addr.ip().to_string());
    let forwarded: Vec<String> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let chosen = match num_proxies {
        Some(0) => remote,
        Some(n) if !forwarded.is_empty() => {
            let index = forwarded.len() - n.min(forwarded.len());
            Some(forwarded[index].clone())
        }
        None if !forwarded.is_empty() => Some(forwarded[0].clone()),
        _ => remote,
    };

    chosen.unwrap_or_else(|| "unknown".to_string())
}

/// Trait for identity providers
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the identity of the current request from its headers
    async fn current_identity(&self, headers: &HeaderMap) -> Result<Identity, ApiError>;
}

/// Provider that treats every request as anonymous (for development)
pub struct AnonymousProvider;

#[async_trait]
impl IdentityProvider for AnonymousProvider {
    async fn current_identity(&self, _headers: &HeaderMap) -> Result<Identity, ApiError> {
        Ok(Identity::Anonymous)
    }
}

/// Token authentication: `Authorization: Token <key>` (or `Bearer <key>`)
///
/// A request without an `Authorization` header is anonymous. A header with an
/// unknown key is rejected rather than downgraded to anonymous.
#[derive(Clone)]
pub struct TokenIdentityProvider {
    tokens: Arc<RwLock<HashMap<String, Uuid>>>,
    users: Arc<dyn ReadService<User>>,
}

impl TokenIdentityProvider {
    pub fn new(users: Arc<dyn ReadService<User>>) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            users,
        }
    }

    /// Issue a new token for a user
    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let key = Uuid::new_v4().simple().to_string();
        self.insert(key.clone(), user_id)?;
        Ok(key)
    }

    /// Register a known token for a user
    pub fn insert(&self, key: impl Into<String>, user_id: Uuid) -> anyhow::Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|e| anyhow::anyhow!("Failed to acquire write lock: {}", e))?;
        tokens.insert(key.into(), user_id);
        Ok(())
    }

    fn lookup(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|e| anyhow::anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(tokens.get(key).copied())
    }
}

fn invalid_token() -> ApiError {
    ApiError::AuthenticationRequired {
        message: "Invalid token.".to_string(),
    }
}

#[async_trait]
impl IdentityProvider for TokenIdentityProvider {
    async fn current_identity(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let Some(raw) = headers.get(header::AUTHORIZATION) else {
            return Ok(Identity::Anonymous);
        };

        let raw = raw.to_str().map_err(|_| invalid_token())?;
        let mut parts = raw.split_whitespace();
        let (Some(scheme), Some(key), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid_token());
        };
        if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
            return Err(invalid_token());
        }

        let user_id = self.lookup(key)?.ok_or_else(invalid_token)?;
        let user = self.users.find(&user_id).await?.ok_or_else(invalid_token)?;

        Ok(Identity::User {
            id: user.id,
            username: user.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCatalog;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_identity_accessors() {
        let id = Uuid::new_v4();
        let user = Identity::User {
            id,
            username: "alice".into(),
        };
        assert!(user.is_authenticated());
        assert_eq!(user.user_id(), Some(id));
        assert!(!Identity::Anonymous.is_authenticated());
        assert_eq!(Identity::Anonymous.user_id(), None);
    }

    #[test]
    fn test_caller_key_partitions_by_identity() {
        let id = Uuid::new_v4();
        let user = Caller::new(
            Identity::User {
                id,
                username: "alice".into(),
            },
            "10.0.0.1",
        );
        assert_eq!(user.key(), CallerKey::User(id));
        assert_eq!(
            Caller::anonymous("10.0.0.1").key(),
            CallerKey::Client("10.0.0.1".into())
        );
    }

    #[test]
    fn test_client_address_resolution() {
        let peer: SocketAddr = "192.168.1.5:4000".parse().unwrap();
        let xff = headers(&[("x-forwarded-for", "1.1.1.1, 2.2.2.2, 3.3.3.3")]);

        assert_eq!(client_address(&xff, Some(peer), None), "1.1.1.1");
        assert_eq!(client_address(&xff, Some(peer), Some(0)), "192.168.1.5");
        assert_eq!(client_address(&xff, Some(peer), Some(1)), "3.3.3.3");
        assert_eq!(client_address(&xff, Some(peer), Some(10)), "1.1.1.1");
        assert_eq!(
            client_address(&HeaderMap::new(), Some(peer), None),
            "192.168.1.5"
        );
        assert_eq!(client_address(&HeaderMap::new(), None, None), "unknown");
    }

    #[tokio::test]
    async fn test_anonymous_provider() {
        let identity = AnonymousProvider
            .current_identity(&HeaderMap::new())
            .await
            .expect("anonymous provider never fails");
        assert_eq!(identity, Identity::Anonymous);
    }

    #[tokio::test]
    async fn test_token_provider_resolves_user() {
        let catalog = InMemoryCatalog::new();
        let alice = catalog.add_user("alice").unwrap();
        let provider = TokenIdentityProvider::new(Arc::new(catalog));
        provider.insert("secret", alice.id).unwrap();

        let identity = provider
            .current_identity(&headers(&[("authorization", "Token secret")]))
            .await
            .expect("known token should authenticate");
        assert_eq!(
            identity,
            Identity::User {
                id: alice.id,
                username: "alice".into()
            }
        );

        let bearer = provider
            .current_identity(&headers(&[("authorization", "Bearer secret")]))
            .await
            .expect("bearer scheme is accepted");
        assert!(bearer.is_authenticated());
    }

    #[tokio::test]
    async fn test_token_provider_missing_header_is_anonymous() {
        let provider = TokenIdentityProvider::new(Arc::new(InMemoryCatalog::new()));
        let identity = provider.current_identity(&HeaderMap::new()).await.unwrap();
        assert_eq!(identity, Identity::Anonymous);
    }

    #[tokio::test]
    async fn test_token_provider_rejects_unknown_or_malformed() {
        let provider = TokenIdentityProvider::new(Arc::new(InMemoryCatalog::new()));

        for value in ["Token nope", "Token", "Basic abc", "Token a b"] {
            let mut map = HeaderMap::new();
            map.insert("authorization", HeaderValue::from_str(value).unwrap());
            let err = provider.current_identity(&map).await.unwrap_err();
            assert!(
                matches!(err, ApiError::AuthenticationRequired { .. }),
                "{value} should be rejected"
            );
        }
    }
}
