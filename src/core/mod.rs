//! Core module: identity, permissions, throttling, query shaping and the
//! pipeline composing them

pub mod error;
pub mod field;
pub mod identity;
pub mod permission;
pub mod pipeline;
pub mod query;
pub mod service;
pub mod throttle;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use field::{FieldKind, FieldPath, FieldSource, FieldValue};
pub use identity::{
    AnonymousProvider, Caller, CallerKey, Identity, IdentityProvider, TokenIdentityProvider,
    client_address,
};
pub use permission::{Action, Denial, Owned, PermissionResolver, PermissionRule, RuleSet};
pub use pipeline::{Admission, PolicyPipeline};
pub use query::{
    OrderKey, Page, PageRequest, PaginatedResponse, PaginationConfig, PaginationMeta, Predicate,
    QueryConfig, QueryShaper, QuerySpec, SearchField, SearchMode,
};
pub use service::{CatService, ReadService};
pub use throttle::{
    Audience, Clock, ManualClock, Rate, RateStore, RejectionKind, Reservation, ScopedRateLimiter,
    SystemClock, Throttle, ThrottleComposer, ThrottleRejection, ThrottleVerdict, TimeWindowGate,
};
