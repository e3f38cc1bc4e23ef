//! # Kittygram
//!
//! A REST catalog of cats, their owners and their achievements, guarded by a
//! per-resource policy pipeline.
//!
//! ## Features
//!
//! - **Permission Resolver**: composable rules (`allow_any`, `authenticated`,
//!   `read_only`, `owner_or_read_only`) with per-action overrides and
//!   object-level checks
//! - **Throttle Composer**: time-of-day gates and sliding-window rate limiters
//!   checked together, counting a request only when every throttle admits it
//! - **Query Shaper**: exact-match filters, prefix/exact/contains search,
//!   whitelisted ordering and page-number pagination
//! - **Configuration-Based**: every resource policy is declared in YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kittygram::prelude::*;
//!
//! let catalog = InMemoryCatalog::new();
//! let alice = catalog.add_user("alice")?;
//!
//! let tokens = TokenIdentityProvider::new(Arc::new(catalog.clone()));
//! let token = tokens.issue(alice.id)?;
//!
//! ServerBuilder::new()
//!     .with_config(PolicyConfig::from_yaml_file("config/policy.yaml")?)
//!     .with_catalog(catalog)
//!     .with_identity_provider(Arc::new(tokens))
//!     .serve("127.0.0.1:8000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod entities;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        Action, AnonymousProvider, ApiError, ApiResult, Caller, CatService, Clock, Identity,
        IdentityProvider, ManualClock, Owned, PermissionResolver, PermissionRule, PolicyPipeline,
        QueryShaper, RateStore, ReadService, SystemClock, ThrottleComposer, TokenIdentityProvider,
    };

    // === Entities ===
    pub use crate::entities::{Achievement, Cat, CatPayload, CatUpdate, Resource, User};

    // === Storage ===
    pub use crate::storage::InMemoryCatalog;

    // === Config ===
    pub use crate::config::{PolicyConfig, ResourcePolicy, ThrottleSettings, ThrottleSpec};

    // === Server ===
    pub use crate::server::{ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use uuid::Uuid;

    // === Axum ===
    pub use axum::{
        Router,
        routing::{delete, get, patch, post, put},
    };
}
