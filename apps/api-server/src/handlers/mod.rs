pub mod redirect;
pub mod tags;
pub mod urls;
pub mod users;

use axum::http::{header, HeaderMap};
use domain::{ListResult, Page};
use serde::{Deserialize, Serialize};

/// `?page=&per_page=` on every listing.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

#[derive(Serialize)]
pub struct ListOut<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub has_more: bool,
}

impl<T> ListOut<T> {
    pub fn from_result<U>(result: ListResult<U>, page: Page, f: impl FnMut(U) -> T) -> Self {
        Self {
            items: result.items.into_iter().map(f).collect(),
            total: result.total,
            page: page.number,
            per_page: page.per_page,
            has_more: result.has_more,
        }
    }
}

pub fn host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
