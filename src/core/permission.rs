//! Per-action authorization
//!
//! A resource declares a default rule set plus the actions whose rule set is
//! replaced wholesale by a read-only rule. Rules are evaluated as a
//! conjunction, first at collection level (before anything is fetched) and
//! then at object level once the target resource is known.

use crate::core::identity::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The CRUD action requested by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    PartialUpdate,
    Destroy,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::List,
        Action::Retrieve,
        Action::Create,
        Action::Update,
        Action::PartialUpdate,
        Action::Destroy,
    ];

    /// Read-type actions
    pub fn is_safe(&self) -> bool {
        matches!(self, Action::List | Action::Retrieve)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Retrieve => "retrieve",
            Action::Create => "create",
            Action::Update => "update",
            Action::PartialUpdate => "partial_update",
            Action::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources with an owner
pub trait Owned {
    fn owner(&self) -> Option<Uuid>;
}

/// A named predicate over (identity, action, resource)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionRule {
    /// Public access
    AllowAny,

    /// Any authenticated user
    Authenticated,

    /// Read-type actions only, for any identity
    ReadOnly,

    /// Reads for anyone, writes for the resource owner
    OwnerOrReadOnly,
}

impl PermissionRule {
    /// Collection-level check, made before the target resource is fetched
    pub fn has_permission(&self, action: Action, identity: &Identity) -> bool {
        match self {
            PermissionRule::AllowAny => true,
            PermissionRule::Authenticated => identity.is_authenticated(),
            PermissionRule::ReadOnly => action.is_safe(),
            PermissionRule::OwnerOrReadOnly => action.is_safe() || identity.is_authenticated(),
        }
    }

    /// Object-level check against the resource owner
    pub fn has_object_permission(
        &self,
        action: Action,
        identity: &Identity,
        owner: Option<Uuid>,
    ) -> bool {
        match self {
            PermissionRule::AllowAny => true,
            PermissionRule::Authenticated => identity.is_authenticated(),
            PermissionRule::ReadOnly => action.is_safe(),
            PermissionRule::OwnerOrReadOnly => {
                action.is_safe()
                    || match (identity.user_id(), owner) {
                        (Some(caller), Some(owner)) => caller == owner,
                        _ => false,
                    }
            }
        }
    }
}

/// The rule set applying to one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSet {
    /// The resource's default rules, conjoined
    Default(Vec<PermissionRule>),

    /// The default rules replaced by a single read-only rule
    ReadOnlyOverride,
}

impl RuleSet {
    pub fn rules(&self) -> &[PermissionRule] {
        match self {
            RuleSet::Default(rules) => rules,
            RuleSet::ReadOnlyOverride => &[PermissionRule::ReadOnly],
        }
    }
}

/// Why a rule set denied an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Denied and the caller is anonymous
    NotAuthenticated(PermissionRule),

    /// Denied and the caller is authenticated
    PermissionDenied(PermissionRule),
}

/// Decides, per action, which rule set applies and evaluates it
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    default_rules: Vec<PermissionRule>,
    read_only_actions: Vec<Action>,
}

impl PermissionResolver {
    pub fn new(default_rules: Vec<PermissionRule>) -> Self {
        Self {
            default_rules,
            read_only_actions: Vec::new(),
        }
    }

    /// Replace the rule set of `action` with the read-only rule
    pub fn with_read_only_override(mut self, action: Action) -> Self {
        if !self.read_only_actions.contains(&action) {
            self.read_only_actions.push(action);
        }
        self
    }

    pub fn resolve(&self, action: Action) -> RuleSet {
        if self.read_only_actions.contains(&action) {
            RuleSet::ReadOnlyOverride
        } else {
            RuleSet::Default(self.default_rules.clone())
        }
    }

    /// Evaluate a rule set.
    ///
    /// Without a resource only the collection-level checks run; with one,
    /// the object-level checks run as well. Every rule must allow.
    pub fn evaluate(
        rule_set: &RuleSet,
        action: Action,
        identity: &Identity,
        resource: Option<&dyn Owned>,
    ) -> Result<(), Denial> {
        for rule in rule_set.rules() {
            let allowed = rule.has_permission(action, identity)
                && resource.is_none_or(|r| rule.has_object_permission(action, identity, r.owner()));

            if !allowed {
                return Err(if identity.is_authenticated() {
                    Denial::PermissionDenied(*rule)
                } else {
                    Denial::NotAuthenticated(*rule)
                });
            }
        }
        Ok(())
    }

    /// Resolve and evaluate in one step
    pub fn check(
        &self,
        action: Action,
        identity: &Identity,
        resource: Option<&dyn Owned>,
    ) -> Result<(), Denial> {
        Self::evaluate(&self.resolve(action), action, identity, resource)
    }
}
