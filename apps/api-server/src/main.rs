//! api-server — HTTP API for the URL Shortener workspace.
//!
//! Serves short-code redirects and the JSON API for URLs, tags and users:
//! - Identity: the X-Debug-User header names the caller; absent means anonymous.
//! - Storage: SQLite (default, `sqlite` feature) or in-memory.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string) for a frontend.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! ADMIN_EMAILS=admin@example.com cargo run -p api-server
//!
//! # throwaway data
//! STORAGE_PROVIDER=memory cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod actor;
mod config;
mod error;
mod handlers;
mod repo;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{
    routing::{get, post, put},
    Router,
};
use domain::lifecycle::UrlLifecycleManager;
use domain::shortcode::RandomHexGenerator;
use domain::tags::TagService;
use domain::users::UserService;
use domain::{Clock, Email, Page};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use handlers::{redirect, tags, urls, users};
use repo::AnyRepo;

type UrlManager = UrlLifecycleManager<AnyRepo, RandomHexGenerator, StdClock>;

#[derive(Clone)]
pub struct AppState {
    urls: Arc<UrlManager>,
    tags: Arc<TagService<AnyRepo, StdClock>>,
    users: Arc<UserService<AnyRepo, StdClock>>,
    admin_emails: Arc<Vec<Email>>,
    shortlink_domain: Option<String>,
    page_size: usize,
}

impl AppState {
    fn new(repo: AnyRepo, cfg: &config::Config) -> Self {
        let urls = UrlLifecycleManager::new(repo.clone(), RandomHexGenerator::new(), StdClock)
            .with_daily_limit(cfg.daily_email_limit);
        Self {
            urls: Arc::new(urls),
            tags: Arc::new(TagService::new(repo.clone(), StdClock)),
            users: Arc::new(UserService::new(repo, StdClock)),
            admin_emails: Arc::new(cfg.admin_emails.clone()),
            shortlink_domain: cfg.shortlink_domain.clone(),
            page_size: cfg.page_size,
        }
    }

    /// Page requested by a listing query, defaulting to the configured size.
    fn page(&self, page: Option<usize>, per_page: Option<usize>) -> Page {
        let (number, per_page) = http_common::normalize_page(page, per_page, self.page_size);
        Page::new(number, per_page)
    }
}

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> std::time::SystemTime {
        std::time::SystemTime::now()
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let repo = match build_repo(&cfg) {
        Ok(r) => r,
        Err(e) => {
            error!(err = %e, "failed to open storage");
            std::process::exit(1);
        }
    };
    info!(backend = repo.backend(), "storage ready");
    let state = AppState::new(repo, &cfg);

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = router(state)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin.clone()]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(actor::DEBUG_USER_HEADER),
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "bind failed");
            std::process::exit(1);
        }
    };
    info!(%addr, "api-server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
        std::process::exit(1);
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/r/:code", get(redirect::follow))
        .route("/api/urls", get(urls::list_published).post(urls::create_url))
        .route("/api/urls/latest", get(urls::list_latest))
        .route("/api/urls/popular", get(urls::list_popular))
        .route("/api/urls/unpublished", get(urls::list_unpublished))
        .route("/api/urls/search", get(urls::search_urls))
        .route(
            "/api/urls/:id",
            get(urls::get_url)
                .patch(urls::update_url)
                .delete(urls::delete_url),
        )
        .route("/api/urls/:id/block", post(urls::block_url))
        .route("/api/urls/:id/unblock", post(urls::unblock_url))
        .route("/api/tags", get(tags::list_tags).post(tags::create_tag))
        .route(
            "/api/tags/:id",
            get(tags::get_tag)
                .patch(tags::rename_tag)
                .delete(tags::delete_tag),
        )
        .route("/api/users", get(users::list_users))
        .route("/api/users/:id/block", post(users::block_user))
        .route("/api/users/:id/unblock", post(users::unblock_user))
        .route("/api/users/:id/roles", put(users::set_roles))
        .route("/api/me", get(users::me))
        .with_state(state)
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a repository instance based on config and feature flags.
fn build_repo(cfg: &config::Config) -> Result<AnyRepo, domain::CoreError> {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => AnyRepo::sqlite(&cfg.db_path),
        #[cfg(not(feature = "sqlite"))]
        config::StorageProvider::Sqlite => {
            warn!("built without the sqlite feature; falling back to memory storage");
            Ok(AnyRepo::memory())
        }
        config::StorageProvider::Memory => {
            warn!("STORAGE_PROVIDER=memory: data is lost on restart");
            Ok(AnyRepo::memory())
        }
    }
}
