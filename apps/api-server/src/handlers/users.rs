use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use domain::access::{ensure, user_permissions};
use domain::{CoreError, Role, UrlFilter, UrlOrder, User, UserId};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::urls::{list_urls, UrlOut};
use super::{ListOut, PageQuery};
use crate::actor::Actor;
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct RolesReq {
    roles: Vec<String>,
}

#[derive(Serialize)]
pub struct UserOut {
    id: i64,
    email: String,
    roles: Vec<Role>,
    is_admin: bool,
    is_blocked: bool,
    created_at: String,
}

/// The caller's account with the records they authored.
#[derive(Serialize)]
pub struct MeOut {
    #[serde(flatten)]
    user: UserOut,
    urls: ListOut<UrlOut>,
}

fn user_to_out(user: User) -> UserOut {
    UserOut {
        id: user.id.map(|id| id.0).unwrap_or_default(),
        is_admin: user.is_admin(),
        email: user.email.as_str().to_string(),
        roles: user.roles.into_iter().collect(),
        is_blocked: user.is_blocked,
        created_at: http_common::system_time_to_rfc3339(user.created_at),
    }
}

/// `GET /api/me` — includes unpublished records the caller authored.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Query(q): Query<PageQuery>,
) -> Result<Json<MeOut>, ApiError> {
    let user = actor.require()?.clone();
    let id = user.id.ok_or(CoreError::NotFound)?;
    let urls = list_urls(
        &state,
        &headers,
        UrlFilter::Author(id),
        UrlOrder::RecentlyUpdated,
        q.page,
        q.per_page,
    )?;
    Ok(Json(MeOut {
        user: user_to_out(user),
        urls,
    }))
}

pub async fn list_users(
    State(state): State<AppState>,
    actor: Actor,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListOut<UserOut>>, ApiError> {
    actor.require()?;
    ensure(actor.is_admin())?;
    let page = state.page(q.page, q.per_page);
    let result = state.users.list(page)?;
    Ok(Json(ListOut::from_result(result, page, user_to_out)))
}

pub async fn block_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<UserOut>, ApiError> {
    let admin = actor.require()?;
    let mut target = state.users.get(UserId(id))?;
    ensure(user_permissions(Some(admin), &target).block)?;
    state.users.block(&mut target)?;
    info!(id, by = %admin.email.as_str(), "user blocked");
    Ok(Json(user_to_out(target)))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<UserOut>, ApiError> {
    let admin = actor.require()?;
    let mut target = state.users.get(UserId(id))?;
    ensure(user_permissions(Some(admin), &target).block)?;
    state.users.unblock(&mut target)?;
    info!(id, by = %admin.email.as_str(), "user unblocked");
    Ok(Json(user_to_out(target)))
}

/// `PUT /api/users/:id/roles` — replace the role set, e.g. `{"roles": ["admin"]}`.
pub async fn set_roles(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<RolesReq>,
) -> Result<Json<UserOut>, ApiError> {
    let admin = actor.require()?;
    let mut target = state.users.get(UserId(id))?;
    ensure(user_permissions(Some(admin), &target).edit)?;
    let roles = body
        .roles
        .iter()
        .map(|r| Role::parse(r).ok_or_else(|| ApiError::BadRequest(format!("unknown role '{r}'"))))
        .collect::<Result<BTreeSet<_>, _>>()?;
    state.users.set_roles(&mut target, roles)?;
    info!(id, by = %admin.email.as_str(), "roles updated");
    Ok(Json(user_to_out(target)))
}
