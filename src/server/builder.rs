//! ServerBuilder for fluent API to build the catalog server

use super::exposure::RestExposure;
use super::host::{CatalogServices, ServerHost};
use crate::config::PolicyConfig;
use crate::core::identity::{AnonymousProvider, IdentityProvider};
use crate::core::service::{CatService, ReadService};
use crate::core::throttle::{Clock, RateStore, SystemClock};
use crate::entities::{Achievement, User};
use crate::storage::InMemoryCatalog;
use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for the catalog server
///
/// # Example
///
/// ```ignore
/// let catalog = InMemoryCatalog::new();
/// let tokens = TokenIdentityProvider::new(Arc::new(catalog.clone()));
///
/// let app = ServerBuilder::new()
///     .with_config(PolicyConfig::from_yaml_file("config/policy.yaml")?)
///     .with_catalog(catalog)
///     .with_identity_provider(Arc::new(tokens))
///     .build()?;
/// ```
pub struct ServerBuilder {
    config: Option<PolicyConfig>,
    cats: Option<Arc<dyn CatService>>,
    users: Option<Arc<dyn ReadService<User>>>,
    achievements: Option<Arc<dyn ReadService<Achievement>>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    clock: Option<Arc<dyn Clock>>,
    rate_store: Option<RateStore>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            cats: None,
            users: None,
            achievements: None,
            identity: None,
            clock: None,
            rate_store: None,
            custom_routes: Vec::new(),
        }
    }

    /// Set the policy configuration (defaults to [`PolicyConfig::default_config`])
    pub fn with_config(mut self, config: PolicyConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Back every resource with one in-memory catalog
    pub fn with_catalog(self, catalog: InMemoryCatalog) -> Self {
        let catalog = Arc::new(catalog);
        self.with_cat_service(catalog.clone())
            .with_user_service(catalog.clone())
            .with_achievement_service(catalog)
    }

    pub fn with_cat_service(mut self, service: Arc<dyn CatService>) -> Self {
        self.cats = Some(service);
        self
    }

    pub fn with_user_service(mut self, service: Arc<dyn ReadService<User>>) -> Self {
        self.users = Some(service);
        self
    }

    pub fn with_achievement_service(
        mut self,
        service: Arc<dyn ReadService<Achievement>>,
    ) -> Self {
        self.achievements = Some(service);
        self
    }

    /// Set how callers are authenticated (defaults to everyone anonymous)
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Set the clock throttles read the current instant from
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share throttle histories with another server or with the caller
    pub fn with_rate_store(mut self, store: RateStore) -> Self {
        self.rate_store = Some(store);
        self
    }

    /// Add custom routes to the server
    ///
    /// Use this for endpoints outside the catalog, such as token issuance.
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the transport-agnostic host
    pub fn build_host(mut self) -> Result<ServerHost> {
        let services = self.take_services()?;
        let config = self.config.take().unwrap_or_else(PolicyConfig::default_config);

        let identity = self.identity.take().unwrap_or_else(|| {
            tracing::warn!("no identity provider configured, every request is anonymous");
            Arc::new(AnonymousProvider)
        });
        let clock = self.clock.take().unwrap_or_else(|| Arc::new(SystemClock));
        let rate_store = self.rate_store.take().unwrap_or_default();

        ServerHost::from_builder_components(config, services, identity, clock, rate_store)
    }

    /// Build the final REST router
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        RestExposure::build_router(host, custom_routes)
    }

    fn take_services(&mut self) -> Result<CatalogServices> {
        let cats = self.cats.take().ok_or_else(|| {
            anyhow::anyhow!("CatService is required. Call .with_catalog() or .with_cat_service()")
        })?;
        let users = self.users.take().ok_or_else(|| {
            anyhow::anyhow!("User service is required. Call .with_catalog() or .with_user_service()")
        })?;
        let achievements = self.achievements.take().ok_or_else(|| {
            anyhow::anyhow!(
                "Achievement service is required. Call .with_catalog() or .with_achievement_service()"
            )
        })?;

        Ok(CatalogServices {
            cats,
            users,
            achievements,
        })
    }

    /// Serve the application with graceful shutdown
    ///
    /// Peer addresses are attached to every request so that anonymous
    /// callers can be told apart by client address.
    ///
    /// # Example
    ///
    /// ```ignore
    /// ServerBuilder::new()
    ///     .with_catalog(catalog)
    ///     .serve("127.0.0.1:8000").await?;
    /// ```
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
