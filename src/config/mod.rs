//! Policy configuration loading and validation
//!
//! Everything the pipeline decides on is declared here: permission rules,
//! throttle sets and rates, working hours, and the filter/search/ordering
//! tables of each resource.

use crate::core::permission::{Action, PermissionResolver, PermissionRule};
use crate::core::query::{PaginationConfig, QueryConfig};
use crate::core::throttle::{
    Audience, Rate, RateParseError, RateStore, ScopedRateLimiter, Throttle, ThrottleComposer,
    TimeWindowGate,
};
use crate::core::field::FieldKind;
use anyhow::Result;
use chrono::FixedOffset;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Rate scope used by the `anon` throttle
pub const ANON_SCOPE: &str = "anon";

/// Rate scope used by the `user` throttle
pub const USER_SCOPE: &str = "user";

/// Errors found while validating a [`PolicyConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid rate for scope '{scope}': {source}")]
    InvalidRate {
        scope: String,
        #[source]
        source: RateParseError,
    },

    #[error("no rate configured for scope '{0}'")]
    MissingRate(String),

    #[error("unknown throttle '{0}' (expected working_hours, anon, user or scoped:<scope>)")]
    UnknownThrottle(String),

    #[error("{field} must be an hour between 0 and 23, got {value}")]
    InvalidHour { field: &'static str, value: u32 },

    #[error("utc_offset_hours must be between -23 and 23, got {0}")]
    InvalidOffset(i32),

    #[error("unknown resource '{0}'")]
    UnknownResource(String),
}

/// A throttle reference in a resource's throttle set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ThrottleSpec {
    /// The working-hours gate
    WorkingHours,

    /// A rate limiter for everyone, keyed by caller
    Scoped(String),

    /// The `anon` rate, anonymous callers only
    Anon,

    /// The `user` rate, every caller
    User,
}

impl TryFrom<String> for ThrottleSpec {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.trim() {
            "working_hours" => Ok(ThrottleSpec::WorkingHours),
            "anon" => Ok(ThrottleSpec::Anon),
            "user" => Ok(ThrottleSpec::User),
            other => match other.strip_prefix("scoped:") {
                Some(scope) if !scope.trim().is_empty() => {
                    Ok(ThrottleSpec::Scoped(scope.trim().to_string()))
                }
                _ => Err(ConfigError::UnknownThrottle(raw)),
            },
        }
    }
}

impl fmt::Display for ThrottleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleSpec::WorkingHours => write!(f, "working_hours"),
            ThrottleSpec::Scoped(scope) => write!(f, "scoped:{}", scope),
            ThrottleSpec::Anon => write!(f, "anon"),
            ThrottleSpec::User => write!(f, "user"),
        }
    }
}

impl From<ThrottleSpec> for String {
    fn from(spec: ThrottleSpec) -> Self {
        spec.to_string()
    }
}

/// Hours during which the working-hours gate is open
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkingHours {
    pub open_from: u32,
    pub open_until: u32,
    pub utc_offset_hours: i32,
}

impl Default for WorkingHours {
    /// Closed from 03:00 to 05:59
    fn default() -> Self {
        Self {
            open_from: 6,
            open_until: 3,
            utc_offset_hours: 0,
        }
    }
}

impl WorkingHours {
    pub fn gate(&self) -> Result<TimeWindowGate, ConfigError> {
        let offset = self
            .utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidOffset(self.utc_offset_hours))?;
        Ok(TimeWindowGate::new(self.open_from, self.open_until, offset))
    }
}

/// Rates, working hours and client identification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Scope name to `"<requests>/<period>"`
    pub rates: IndexMap<String, String>,

    pub working_hours: WorkingHours,

    /// Number of trusted proxies in front of the service (`X-Forwarded-For`).
    /// Defaults to `0`: only the socket peer identifies a client.
    pub num_proxies: Option<usize>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        let mut rates = IndexMap::new();
        rates.insert("low_request".to_string(), "1/minute".to_string());
        rates.insert(USER_SCOPE.to_string(), "10000/day".to_string());
        rates.insert(ANON_SCOPE.to_string(), "1000/day".to_string());

        Self {
            rates,
            working_hours: WorkingHours::default(),
            num_proxies: Some(0),
        }
    }
}

impl ThrottleSettings {
    pub fn rate(&self, scope: &str) -> Result<Rate, ConfigError> {
        let raw = self
            .rates
            .get(scope)
            .ok_or_else(|| ConfigError::MissingRate(scope.to_string()))?;
        raw.parse().map_err(|source| ConfigError::InvalidRate {
            scope: scope.to_string(),
            source,
        })
    }
}

/// Policy of one exposed resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Default rule set, conjoined
    pub permissions: Vec<PermissionRule>,

    /// Actions whose rule set is replaced by the read-only rule
    pub read_only_actions: Vec<Action>,

    /// Ordered throttle set
    pub throttles: Vec<ThrottleSpec>,

    pub query: QueryConfig,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            permissions: vec![PermissionRule::AllowAny],
            read_only_actions: Vec::new(),
            throttles: Vec::new(),
            query: QueryConfig::default(),
        }
    }
}

impl ResourcePolicy {
    pub fn resolver(&self) -> PermissionResolver {
        self.read_only_actions.iter().fold(
            PermissionResolver::new(self.permissions.clone()),
            |resolver, action| resolver.with_read_only_override(*action),
        )
    }
}

/// Complete policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub throttle: ThrottleSettings,
    pub pagination: PaginationConfig,
    pub resources: IndexMap<String, ResourcePolicy>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PolicyConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string and validate it
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The cats/users/achievements catalog policy
    pub fn default_config() -> Self {
        let mut cat_filters = IndexMap::new();
        cat_filters.insert("color".to_string(), FieldKind::Text);
        cat_filters.insert("birth_year".to_string(), FieldKind::Integer);

        let cats = ResourcePolicy {
            permissions: vec![PermissionRule::OwnerOrReadOnly],
            read_only_actions: vec![Action::Retrieve],
            throttles: vec![
                ThrottleSpec::WorkingHours,
                ThrottleSpec::Scoped("low_request".to_string()),
            ],
            query: QueryConfig {
                filter_fields: cat_filters,
                search_fields: vec!["^name".to_string()],
                ordering_fields: vec!["name".to_string(), "birth_year".to_string()],
                default_ordering: vec!["birth_year".to_string()],
            },
        };

        let users = ResourcePolicy {
            permissions: vec![PermissionRule::ReadOnly],
            throttles: vec![ThrottleSpec::Anon, ThrottleSpec::User],
            query: QueryConfig {
                ordering_fields: vec!["username".to_string()],
                default_ordering: vec!["username".to_string()],
                ..QueryConfig::default()
            },
            ..ResourcePolicy::default()
        };

        let achievements = ResourcePolicy {
            permissions: vec![PermissionRule::ReadOnly],
            throttles: vec![ThrottleSpec::Anon, ThrottleSpec::User],
            query: QueryConfig {
                ordering_fields: vec!["name".to_string()],
                default_ordering: vec!["name".to_string()],
                ..QueryConfig::default()
            },
            ..ResourcePolicy::default()
        };

        let mut resources = IndexMap::new();
        resources.insert("cats".to_string(), cats);
        resources.insert("users".to_string(), users);
        resources.insert("achievements".to_string(), achievements);

        Self {
            throttle: ThrottleSettings::default(),
            pagination: PaginationConfig::default(),
            resources,
        }
    }

    pub fn resource(&self, name: &str) -> Result<&ResourcePolicy, ConfigError> {
        self.resources
            .get(name)
            .ok_or_else(|| ConfigError::UnknownResource(name.to_string()))
    }

    /// Check hours, offsets and every rate a throttle set refers to
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hours = &self.throttle.working_hours;
        if hours.open_from > 23 {
            return Err(ConfigError::InvalidHour {
                field: "open_from",
                value: hours.open_from,
            });
        }
        if hours.open_until > 23 {
            return Err(ConfigError::InvalidHour {
                field: "open_until",
                value: hours.open_until,
            });
        }
        hours.gate()?;

        for scope in self.throttle.rates.keys() {
            self.throttle.rate(scope)?;
        }

        for policy in self.resources.values() {
            for spec in &policy.throttles {
                match spec {
                    ThrottleSpec::WorkingHours => {}
                    ThrottleSpec::Scoped(scope) => {
                        self.throttle.rate(scope)?;
                    }
                    ThrottleSpec::Anon => {
                        self.throttle.rate(ANON_SCOPE)?;
                    }
                    ThrottleSpec::User => {
                        self.throttle.rate(USER_SCOPE)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Build the throttle composer of a resource over a shared rate store
    pub fn throttle_composer(
        &self,
        policy: &ResourcePolicy,
        store: &RateStore,
    ) -> Result<ThrottleComposer, ConfigError> {
        let mut throttles: Vec<Arc<dyn Throttle>> = Vec::with_capacity(policy.throttles.len());

        for spec in &policy.throttles {
            let throttle: Arc<dyn Throttle> = match spec {
                ThrottleSpec::WorkingHours => Arc::new(self.throttle.working_hours.gate()?),
                ThrottleSpec::Scoped(scope) => Arc::new(ScopedRateLimiter::new(
                    scope.clone(),
                    self.throttle.rate(scope)?,
                    store.clone(),
                )),
                ThrottleSpec::Anon => Arc::new(
                    ScopedRateLimiter::new(ANON_SCOPE, self.throttle.rate(ANON_SCOPE)?, store.clone())
                        .with_audience(Audience::AnonymousOnly),
                ),
                ThrottleSpec::User => Arc::new(ScopedRateLimiter::new(
                    USER_SCOPE,
                    self.throttle.rate(USER_SCOPE)?,
                    store.clone(),
                )),
            };
            throttles.push(throttle);
        }

        Ok(ThrottleComposer::new(throttles))
    }
}
