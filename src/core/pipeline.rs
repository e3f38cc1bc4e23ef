//! Per-request policy pipeline
//!
//! For every request against a resource the pipeline runs, in order:
//!
//! 1. the collection-level permission check for the requested action
//! 2. the resource's throttle set
//! 3. (after the handler fetched the target) the object-level permission check
//!
//! Permission and throttle decisions are made before any persistence call, so
//! a rejected request has no side effects. A request denied by permissions
//! never reaches the throttles and does not consume rate budget.

use crate::config::{ConfigError, PolicyConfig};
use crate::core::error::{ApiError, ApiResult};
use crate::core::identity::Caller;
use crate::core::permission::{Action, Denial, Owned, PermissionResolver, RuleSet};
use crate::core::query::{QueryShaper, QuerySpec};
use crate::core::throttle::{Clock, RateStore, ThrottleComposer};
use std::collections::HashMap;
use std::sync::Arc;

/// A request that passed the collection-level checks
#[derive(Debug, Clone)]
pub struct Admission {
    pub action: Action,
    pub caller: Caller,
    pub rule_set: RuleSet,
}

/// Permission resolver, throttle composer and query shaper of one resource
#[derive(Clone)]
pub struct PolicyPipeline {
    resource: String,
    permissions: PermissionResolver,
    throttles: ThrottleComposer,
    shaper: QueryShaper,
    clock: Arc<dyn Clock>,
}

impl PolicyPipeline {
    pub fn new(
        resource: impl Into<String>,
        permissions: PermissionResolver,
        throttles: ThrottleComposer,
        shaper: QueryShaper,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resource: resource.into(),
            permissions,
            throttles,
            shaper,
            clock,
        }
    }

    /// Build the pipeline of a configured resource
    pub fn from_config(
        resource: &str,
        config: &PolicyConfig,
        store: &RateStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let policy = config.resource(resource)?;
        Ok(Self::new(
            resource,
            policy.resolver(),
            config.throttle_composer(policy, store)?,
            QueryShaper::new(policy.query.clone(), config.pagination.clone()),
            clock,
        ))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn shaper(&self) -> &QueryShaper {
        &self.shaper
    }

    pub fn permissions(&self) -> &PermissionResolver {
        &self.permissions
    }

    /// Collection-level permission check, then throttling
    pub fn admit(&self, action: Action, caller: &Caller) -> ApiResult<Admission> {
        let rule_set = self.permissions.resolve(action);

        if let Err(denial) = PermissionResolver::evaluate(&rule_set, action, &caller.identity, None)
        {
            return Err(self.denied(denial, action, caller));
        }

        if let Err(rejection) = self.throttles.check(caller, self.clock.now()) {
            tracing::info!(
                resource = %self.resource,
                %action,
                caller = %caller.key(),
                scope = %rejection.scope,
                reason = %rejection.kind,
                "request throttled"
            );
            return Err(ApiError::Throttled {
                scope: rejection.scope,
                reason: rejection.kind,
                retry_after: rejection.retry_after,
            });
        }

        tracing::debug!(resource = %self.resource, %action, caller = %caller.key(), "request admitted");

        Ok(Admission {
            action,
            caller: caller.clone(),
            rule_set,
        })
    }

    /// Object-level permission check against the fetched target
    pub fn authorize_object(&self, admission: &Admission, target: &dyn Owned) -> ApiResult<()> {
        PermissionResolver::evaluate(
            &admission.rule_set,
            admission.action,
            &admission.caller.identity,
            Some(target),
        )
        .map_err(|denial| self.denied(denial, admission.action, &admission.caller))
    }

    /// Interpret the query string of a list request
    pub fn shape(&self, params: &HashMap<String, String>) -> ApiResult<QuerySpec> {
        self.shaper.parse(params)
    }

    fn denied(&self, denial: Denial, action: Action, caller: &Caller) -> ApiError {
        let (rule, error) = match denial {
            Denial::NotAuthenticated(rule) => (
                rule,
                ApiError::AuthenticationRequired {
                    message: format!("{} on {} needs an authenticated user", action, self.resource),
                },
            ),
            Denial::PermissionDenied(rule) => (
                rule,
                ApiError::AuthorizationDenied {
                    message: format!("{:?} denies {} on {}", rule, action, self.resource),
                },
            ),
        };

        tracing::info!(
            resource = %self.resource,
            %action,
            caller = %caller.key(),
            rule = ?rule,
            "request denied"
        );

        error
    }
}
