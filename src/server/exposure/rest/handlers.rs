//! REST handlers
//!
//! Every handler runs the resource's policy pipeline before touching the
//! persistence services:
//!
//! `admit` (permissions + throttles) → `find` → `authorize_object` → body
//! parsing and validation → mutation.

use super::caller::CallerResolver;
use crate::core::error::{ApiError, ApiResult};
use crate::core::field::FieldSource;
use crate::core::identity::Caller;
use crate::core::permission::{Action, Owned};
use crate::core::pipeline::{Admission, PolicyPipeline};
use crate::core::query::PaginatedResponse;
use crate::core::service::{CatService, ReadService};
use crate::entities::{Cat, CatPayload, CatUpdate, Resource};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// State of a read-only resource
pub struct ReadState<T> {
    pub service: Arc<dyn ReadService<T>>,
    pub pipeline: Arc<PolicyPipeline>,
    pub callers: Arc<CallerResolver>,
}

impl<T> Clone for ReadState<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            pipeline: self.pipeline.clone(),
            callers: self.callers.clone(),
        }
    }
}

impl<T> FromRef<ReadState<T>> for Arc<CallerResolver> {
    fn from_ref(state: &ReadState<T>) -> Self {
        state.callers.clone()
    }
}

/// State of the cat collection
#[derive(Clone, FromRef)]
pub struct CatState {
    pub cats: Arc<dyn CatService>,
    pub pipeline: Arc<PolicyPipeline>,
    pub callers: Arc<CallerResolver>,
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidId {
        value: raw.to_string(),
    })
}

fn parse_body<B: DeserializeOwned + Validate>(body: &Bytes) -> ApiResult<B> {
    let parsed: B = serde_json::from_slice(body)?;
    parsed.validate()?;
    Ok(parsed)
}

async fn shaped_list<T, S>(
    service: &S,
    pipeline: &PolicyPipeline,
    caller: &Caller,
    params: &HashMap<String, String>,
) -> ApiResult<PaginatedResponse<T>>
where
    T: FieldSource + Send,
    S: ReadService<T> + ?Sized,
{
    pipeline.admit(Action::List, caller)?;
    let spec = pipeline.shape(params)?;
    let shaper = pipeline.shaper();

    let rows = service.list(&shaper.predicate(&spec)).await?;
    Ok(shaper.finish(rows, &spec)?.into_response())
}

/// Fetch the target of an item request and run the object-level check
async fn authorized_target<T, S>(
    service: &S,
    pipeline: &PolicyPipeline,
    admission: &Admission,
    id: &Uuid,
) -> ApiResult<T>
where
    T: Resource + Owned,
    S: ReadService<T> + ?Sized,
{
    let target = service
        .find(id)
        .await?
        .ok_or_else(|| ApiError::not_found(T::resource_name_singular(), id))?;
    pipeline.authorize_object(admission, &target)?;
    Ok(target)
}

// =============================================================================
// Read-only resources
// =============================================================================

pub async fn list_resource<T>(
    State(state): State<ReadState<T>>,
    caller: Caller,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<PaginatedResponse<T>>>
where
    T: Resource + FieldSource + Serialize,
{
    let page = shaped_list(state.service.as_ref(), &state.pipeline, &caller, &params).await?;
    Ok(Json(page))
}

pub async fn retrieve_resource<T>(
    State(state): State<ReadState<T>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<T>>
where
    T: Resource + Owned + Serialize,
{
    let id = parse_id(&id)?;
    let admission = state.pipeline.admit(Action::Retrieve, &caller)?;
    let target = authorized_target(state.service.as_ref(), &state.pipeline, &admission, &id).await?;
    Ok(Json(target))
}

// =============================================================================
// Cats
// =============================================================================

pub async fn list_cats(
    State(state): State<CatState>,
    caller: Caller,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<PaginatedResponse<Cat>>> {
    let page = shaped_list(state.cats.as_ref(), &state.pipeline, &caller, &params).await?;
    Ok(Json(page))
}

pub async fn create_cat(
    State(state): State<CatState>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Cat>)> {
    let admission = state.pipeline.admit(Action::Create, &caller)?;
    let owner = admission
        .caller
        .identity
        .user_id()
        .ok_or_else(|| ApiError::AuthenticationRequired {
            message: "cats are created on behalf of a user".to_string(),
        })?;

    let payload: CatPayload = parse_body(&body)?;
    let cat = state.cats.create(payload, owner).await?;

    tracing::info!(cat_id = %cat.id, owner = %owner, "cat created");
    Ok((StatusCode::CREATED, Json(cat)))
}

pub async fn retrieve_cat(
    State(state): State<CatState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Cat>> {
    let id = parse_id(&id)?;
    let admission = state.pipeline.admit(Action::Retrieve, &caller)?;
    let cat = authorized_target(state.cats.as_ref(), &state.pipeline, &admission, &id).await?;
    Ok(Json(cat))
}

async fn apply_update(
    state: &CatState,
    action: Action,
    caller: &Caller,
    id: &str,
    body: &Bytes,
) -> ApiResult<Json<Cat>> {
    let id = parse_id(id)?;
    let admission = state.pipeline.admit(action, caller)?;
    authorized_target::<Cat, _>(state.cats.as_ref(), &state.pipeline, &admission, &id).await?;

    let update: CatUpdate = if action == Action::PartialUpdate {
        parse_body::<CatUpdate>(body)?
    } else {
        parse_body::<CatPayload>(body)?.into()
    };

    let cat = state
        .cats
        .update(&id, update)
        .await?
        .ok_or_else(|| ApiError::not_found(Cat::resource_name_singular(), id))?;
    Ok(Json(cat))
}

pub async fn update_cat(
    State(state): State<CatState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Cat>> {
    apply_update(&state, Action::Update, &caller, &id, &body).await
}

pub async fn partial_update_cat(
    State(state): State<CatState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Cat>> {
    apply_update(&state, Action::PartialUpdate, &caller, &id, &body).await
}

pub async fn destroy_cat(
    State(state): State<CatState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let admission = state.pipeline.admit(Action::Destroy, &caller)?;
    authorized_target::<Cat, _>(state.cats.as_ref(), &state.pipeline, &admission, &id).await?;

    if !state.cats.delete(&id).await? {
        return Err(ApiError::not_found(Cat::resource_name_singular(), id));
    }

    tracing::info!(cat_id = %id, "cat deleted");
    Ok(StatusCode::NO_CONTENT)
}
