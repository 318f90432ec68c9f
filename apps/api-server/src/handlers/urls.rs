use std::time::SystemTime;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use domain::access::{ensure, url_permissions};
use domain::tags::parse_titles;
use domain::{
    BlockPolicy, Email, ListOptions, NewUrl, UrlChanges, UrlFilter, UrlId, UrlOrder, UrlRecord,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{host, ListOut, PageQuery};
use crate::actor::Actor;
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateUrlReq {
    original_url: String,
    #[serde(default)]
    short_code: Option<String>,
    /// Comma-separated tag titles.
    #[serde(default)]
    tags: Option<String>,
    #[serde(default = "default_published")]
    is_published: bool,
    #[serde(default)]
    author_email: Option<String>,
}

fn default_published() -> bool {
    true
}

#[derive(Deserialize)]
pub struct UpdateUrlReq {
    #[serde(default)]
    original_url: Option<String>,
    #[serde(default)]
    short_code: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    is_published: Option<bool>,
}

#[derive(Deserialize)]
pub struct BlockReq {
    #[serde(default)]
    permanent: bool,
    #[serde(default)]
    blocked_until: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    per_page: Option<usize>,
}

#[derive(Serialize)]
pub struct UrlOut {
    id: i64,
    short_code: String,
    short_url: String,
    original_url: String,
    created_at: String,
    updated_at: String,
    click_count: u64,
    is_published: bool,
    /// Effective state at response time.
    is_blocked: bool,
    is_permanently_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked_until: Option<String>,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_id: Option<i64>,
}

pub fn url_to_out(
    record: UrlRecord,
    headers: &HeaderMap,
    shortlink_domain: Option<&str>,
    now: SystemTime,
) -> UrlOut {
    let permanent = record.is_permanently_blocked();
    UrlOut {
        id: record.id.map(|id| id.0).unwrap_or_default(),
        short_url: http_common::build_short_url(
            shortlink_domain,
            host(headers),
            record.short_code.as_str(),
        ),
        short_code: record.short_code.to_string(),
        is_blocked: record.is_effectively_blocked(now),
        is_permanently_blocked: permanent,
        blocked_until: record
            .blocked_until
            .filter(|_| !permanent)
            .map(http_common::system_time_to_rfc3339),
        original_url: record.original_url,
        created_at: http_common::system_time_to_rfc3339(record.created_at),
        updated_at: http_common::system_time_to_rfc3339(record.updated_at),
        click_count: record.click_count,
        is_published: record.is_published,
        tags: record.tags.into_iter().collect(),
        author_id: record.author.map(|a| a.0),
    }
}

fn out(state: &AppState, headers: &HeaderMap, record: UrlRecord) -> UrlOut {
    url_to_out(
        record,
        headers,
        state.shortlink_domain.as_deref(),
        state.urls.now(),
    )
}

pub(crate) fn list_urls(
    state: &AppState,
    headers: &HeaderMap,
    filter: UrlFilter,
    order: UrlOrder,
    page: Option<usize>,
    per_page: Option<usize>,
) -> Result<ListOut<UrlOut>, ApiError> {
    let page = state.page(page, per_page);
    let result = state.urls.list(&ListOptions {
        filter,
        order,
        page,
    })?;
    Ok(ListOut::from_result(result, page, |r| out(state, headers, r)))
}

/// `GET /api/urls` — published records, recently updated first. Expired
/// blocks are lifted before listing.
pub async fn list_published(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListOut<UrlOut>>, ApiError> {
    let lifted = state.urls.sweep_expired_blocks()?;
    if lifted > 0 {
        info!(lifted, "expired blocks lifted");
    }
    let list = list_urls(
        &state,
        &headers,
        UrlFilter::Published,
        UrlOrder::RecentlyUpdated,
        q.page,
        q.per_page,
    )?;
    Ok(Json(list))
}

pub async fn list_latest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListOut<UrlOut>>, ApiError> {
    let list = list_urls(
        &state,
        &headers,
        UrlFilter::Published,
        UrlOrder::Newest,
        q.page,
        q.per_page,
    )?;
    Ok(Json(list))
}

pub async fn list_popular(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListOut<UrlOut>>, ApiError> {
    let list = list_urls(
        &state,
        &headers,
        UrlFilter::Published,
        UrlOrder::MostClicked,
        q.page,
        q.per_page,
    )?;
    Ok(Json(list))
}

pub async fn list_unpublished(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListOut<UrlOut>>, ApiError> {
    actor.require()?;
    ensure(actor.is_admin())?;
    let list = list_urls(
        &state,
        &headers,
        UrlFilter::Unpublished,
        UrlOrder::RecentlyUpdated,
        q.page,
        q.per_page,
    )?;
    Ok(Json(list))
}

pub async fn search_urls(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ListOut<UrlOut>>, ApiError> {
    let text = q.q.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("q is required".into()));
    }
    let list = list_urls(
        &state,
        &headers,
        UrlFilter::Search(text.to_string()),
        UrlOrder::RecentlyUpdated,
        q.page,
        q.per_page,
    )?;
    Ok(Json(list))
}

pub async fn get_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<UrlOut>, ApiError> {
    let record = state.urls.get(UrlId(id))?;
    ensure(url_permissions(actor.user(), &record).view)?;
    Ok(Json(out(&state, &headers, record)))
}

/// `POST /api/urls` — signed-in callers become the author; anonymous
/// callers must give `author_email` and are subject to the daily limit.
pub async fn create_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Json(body): Json<CreateUrlReq>,
) -> Result<impl IntoResponse, ApiError> {
    let author_email = match (actor.user(), body.author_email.as_deref()) {
        (None, Some(raw)) => Some(Email::new(raw.to_lowercase())?),
        _ => None,
    };
    let input = NewUrl {
        original_url: body.original_url,
        short_code: body.short_code,
        tags: body.tags.as_deref().map(parse_titles).unwrap_or_default(),
        is_published: body.is_published,
        author_email,
    };
    let record = state.urls.create(input, actor.user())?;
    info!(
        code = %record.short_code,
        anonymous = actor.user().is_none(),
        "create ok"
    );
    Ok((StatusCode::CREATED, Json(out(&state, &headers, record))))
}

pub async fn update_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUrlReq>,
) -> Result<Json<UrlOut>, ApiError> {
    let user = actor.require()?;
    let mut record = state.urls.get(UrlId(id))?;
    ensure(url_permissions(Some(user), &record).edit)?;
    let changes = UrlChanges {
        original_url: body.original_url,
        short_code: body.short_code,
        tags: body.tags.as_deref().map(parse_titles),
        is_published: body.is_published,
    };
    state.urls.edit(&mut record, changes)?;
    info!(id, code = %record.short_code, "update ok");
    Ok(Json(out(&state, &headers, record)))
}

pub async fn delete_url(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = actor.require()?;
    let record = state.urls.get(UrlId(id))?;
    ensure(url_permissions(Some(user), &record).delete)?;
    state.urls.delete(&record)?;
    info!(id, code = %record.short_code, "delete ok");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/urls/:id/block` — `{"permanent": true}` or
/// `{"blocked_until": "<rfc3339>"}`.
pub async fn block_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<BlockReq>,
) -> Result<Json<UrlOut>, ApiError> {
    let user = actor.require()?;
    let mut record = state.urls.get(UrlId(id))?;
    ensure(url_permissions(Some(user), &record).block)?;
    let until = body
        .blocked_until
        .as_deref()
        .map(http_common::rfc3339_to_system_time)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("blocked_until: {e}")))?;
    state
        .urls
        .block(&mut record, BlockPolicy::from_request(body.permanent, until)?)?;
    info!(id, permanent = body.permanent, by = %user.email.as_str(), "block ok");
    Ok(Json(out(&state, &headers, record)))
}

pub async fn unblock_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<UrlOut>, ApiError> {
    let user = actor.require()?;
    let mut record = state.urls.get(UrlId(id))?;
    ensure(url_permissions(Some(user), &record).block)?;
    state.urls.unblock(&mut record)?;
    info!(id, by = %user.email.as_str(), "unblock ok");
    Ok(Json(out(&state, &headers, record)))
}
