//! REST API exposure
//!
//! Consumes a `ServerHost` and produces an Axum `Router` with:
//! - `GET /` listing the exposed resources
//! - `GET /health` and `GET /healthz`
//! - the routes of every registered resource
//! - custom routes

pub mod caller;
pub mod handlers;
pub mod resources;

pub use caller::CallerResolver;
pub use handlers::{CatState, ReadState};
pub use resources::{CatResource, ReadOnlyResource};

use super::super::host::ServerHost;
use anyhow::Result;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    pub fn build_router(host: Arc<ServerHost>, custom_routes: Vec<Router>) -> Result<Router> {
        let root = Json(host.resource_registry.describe());

        let mut app = Router::new()
            .route("/", get(move || async move { root }))
            .merge(Self::health_routes())
            .merge(host.resource_registry.build_routes());

        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        Ok(app
            .layer(Self::cors_layer())
            .layer(TraceLayer::new_for_http()))
    }

    fn cors_layer() -> CorsLayer {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    /// Health check endpoint handler
    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "kittygram"
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PolicyConfig;
    use crate::core::throttle::ManualClock;
    use crate::server::ServerBuilder;
    use crate::storage::InMemoryCatalog;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap());
        ServerBuilder::new()
            .with_config(PolicyConfig::default_config())
            .with_catalog(InMemoryCatalog::new())
            .with_clock(Arc::new(clock))
            .build()
            .unwrap()
    }

    async fn get_from(app: &Router, peer: &str) -> StatusCode {
        get_forwarded(app, peer, None).await
    }

    async fn get_forwarded(app: &Router, peer: &str, forwarded: Option<&str>) -> StatusCode {
        let peer: SocketAddr = peer.parse().unwrap();
        let mut request = Request::get("/cats");
        if let Some(forwarded) = forwarded {
            request = request.header("x-forwarded-for", forwarded);
        }
        app.clone()
            .layer(MockConnectInfo(peer))
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_anonymous_callers_are_keyed_by_peer_address() {
        let app = app();

        assert_eq!(get_from(&app, "10.0.0.1:5000").await, StatusCode::OK);
        assert_eq!(get_from(&app, "10.0.0.1:5001").await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(get_from(&app, "10.0.0.2:5000").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_addresses_from_one_peer_share_a_budget() {
        let app = app();

        assert_eq!(
            get_forwarded(&app, "10.0.0.1:5000", Some("1.1.1.1")).await,
            StatusCode::OK
        );
        for spoofed in ["2.2.2.2", "3.3.3.3, 4.4.4.4"] {
            assert_eq!(
                get_forwarded(&app, "10.0.0.1:5000", Some(spoofed)).await,
                StatusCode::TOO_MANY_REQUESTS
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let response = app()
            .oneshot(Request::get("/dogs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
