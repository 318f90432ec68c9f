use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use domain::access::{ensure, tag_permissions};
use domain::{Tag, TagId, UrlFilter, UrlOrder};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::urls::{list_urls, UrlOut};
use super::{ListOut, PageQuery};
use crate::actor::Actor;
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct TagReq {
    title: String,
}

#[derive(Serialize)]
pub struct TagOut {
    id: i64,
    title: String,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
pub struct TagDetailOut {
    #[serde(flatten)]
    tag: TagOut,
    urls: ListOut<UrlOut>,
}

fn tag_to_out(tag: Tag) -> TagOut {
    TagOut {
        id: tag.id.map(|id| id.0).unwrap_or_default(),
        title: tag.title,
        created_at: http_common::system_time_to_rfc3339(tag.created_at),
        updated_at: http_common::system_time_to_rfc3339(tag.updated_at),
    }
}

pub async fn list_tags(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListOut<TagOut>>, ApiError> {
    let page = state.page(q.page, q.per_page);
    let result = state.tags.list(page)?;
    Ok(Json(ListOut::from_result(result, page, tag_to_out)))
}

/// `GET /api/tags/:id` — the tag with its published URLs.
pub async fn get_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(q): Query<PageQuery>,
) -> Result<Json<TagDetailOut>, ApiError> {
    let tag = state.tags.get(TagId(id))?;
    let urls = list_urls(
        &state,
        &headers,
        UrlFilter::Tagged(tag.title.clone()),
        UrlOrder::RecentlyUpdated,
        q.page,
        q.per_page,
    )?;
    Ok(Json(TagDetailOut {
        tag: tag_to_out(tag),
        urls,
    }))
}

pub async fn create_tag(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<TagReq>,
) -> Result<impl IntoResponse, ApiError> {
    let user = actor.require()?;
    ensure(tag_permissions(Some(user)).create)?;
    let tag = state.tags.create(&body.title)?;
    info!(title = %tag.title, "tag created");
    Ok((StatusCode::CREATED, Json(tag_to_out(tag))))
}

pub async fn rename_tag(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<TagReq>,
) -> Result<Json<TagOut>, ApiError> {
    let user = actor.require()?;
    ensure(tag_permissions(Some(user)).edit)?;
    let mut tag = state.tags.get(TagId(id))?;
    state.tags.rename(&mut tag, &body.title)?;
    info!(id, title = %tag.title, "tag renamed");
    Ok(Json(tag_to_out(tag)))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = actor.require()?;
    ensure(tag_permissions(Some(user)).delete)?;
    let tag = state.tags.get(TagId(id))?;
    state.tags.delete(&tag)?;
    info!(id, title = %tag.title, "tag deleted");
    Ok(StatusCode::NO_CONTENT)
}
