#![warn(clippy::nursery, clippy::pedantic)]

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::{FormRejection, JsonRejection, PathRejection};
use axum::extract::{Extension, Form, Path, TypedHeader};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::EnvFilter;
use ttlpaste_common::{
    paste_url, CreatePaste, CreatedPaste, ErrorBody, Health, InvalidInput, PasteView, TestNow,
    API_ENDPOINT, VIEW_ENDPOINT,
};

use crate::clock::Clock;
use crate::config::Config;
use crate::html::PasteForm;
use crate::short_code::ShortCode;
use crate::store::{Connection, PasteStore, RocksStore, StoreError};

mod clock;
mod config;
mod consume;
mod html;
mod paste;
mod short_code;
mod store;

const SHORT_CODE_SIZE: usize = 10;

#[derive(Clone)]
struct AppState {
    store: Arc<RocksStore>,
    clock: Clock,
    base_url: Option<Arc<str>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    let conn = Arc::new(Connection::new(&config.db_path));
    info!(path = ?conn.path(), "Using paste database");

    let state = AppState {
        store: Arc::new(RocksStore::new(conn)),
        clock: Clock::new(config.test_mode),
        base_url: config.base_url.as_deref().map(Arc::from),
    };

    let stop_signal = Arc::new(AtomicBool::new(false));
    if state.clock.is_test_mode() {
        warn!("Test mode enabled: requests may override the clock, cleanup is disabled");
    } else {
        task::spawn(cleanup(
            Arc::clone(&stop_signal),
            Arc::clone(&state.store),
            config.cleanup_interval,
        ));
    }

    let signals = Signals::new(&[SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    info!("Listening on {}", config.bind_addr);
    axum::Server::bind(&config.bind_addr)
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown(signals))
        .await?;

    signals_handle.close();
    stop_signal.store(true, Ordering::Release);
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home).post(submit::<SHORT_CODE_SIZE>))
        .route(
            &format!("{}/pastes", API_ENDPOINT),
            post(upload::<SHORT_CODE_SIZE>),
        )
        .route(
            &format!("{}/pastes/:code", API_ENDPOINT),
            get(paste::<SHORT_CODE_SIZE>),
        )
        .route(&format!("{}/healthz", API_ENDPOINT), get(health))
        .route(
            &format!("{}/:code", VIEW_ENDPOINT),
            get(view::<SHORT_CODE_SIZE>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

async fn shutdown(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        info!("Received signal {}, shutting down", signal);
    }
}

const CREATE_FAILED: &str = "Failed to create paste";
const FETCH_FAILED: &str = "Failed to fetch paste";

#[derive(Debug)]
enum ApiError {
    Invalid(InvalidInput),
    NotFound,
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Invalid(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::NotFound => (StatusCode::NOT_FOUND, "Paste not found".to_string()),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()),
        };
        (status, Json(ErrorBody::new(message))).into_response()
    }
}

#[instrument(skip_all)]
async fn upload<const N: usize>(
    Extension(state): Extension<AppState>,
    test_now: Option<TypedHeader<TestNow>>,
    headers: HeaderMap,
    body: Result<Json<CreatePaste>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedPaste>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Invalid(InvalidInput::Malformed(e.to_string())))?;
    let created = create_paste::<N>(&state, request, requested_now(test_now), &headers).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn home() -> Html<String> {
    Html(html::home(&PasteForm::default(), None))
}

/// Form submission from the home page; same rules as the JSON upload.
#[instrument(skip_all)]
async fn submit<const N: usize>(
    Extension(state): Extension<AppState>,
    test_now: Option<TypedHeader<TestNow>>,
    headers: HeaderMap,
    form: Result<Form<PasteForm>, FormRejection>,
) -> (StatusCode, Html<String>) {
    let form = match form {
        Ok(Form(form)) => form,
        Err(e) => {
            let error = InvalidInput::Malformed(e.to_string()).to_string();
            return (
                StatusCode::BAD_REQUEST,
                Html(html::home(&PasteForm::default(), Some(&error))),
            );
        }
    };

    let created = match form.to_request() {
        Ok(request) => create_paste::<N>(&state, request, requested_now(test_now), &headers).await,
        Err(e) => Err(ApiError::Invalid(e)),
    };

    match created {
        Ok(created) => (StatusCode::CREATED, Html(html::created(&created))),
        Err(ApiError::Invalid(e)) => (
            StatusCode::BAD_REQUEST,
            Html(html::home(&form, Some(&e.to_string()))),
        ),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Html(html::error())),
    }
}

async fn create_paste<const N: usize>(
    state: &AppState,
    request: CreatePaste,
    requested: Option<DateTime<Utc>>,
    headers: &HeaderMap,
) -> Result<CreatedPaste, ApiError> {
    let paste = request.validate().map_err(ApiError::Invalid)?;

    let now = state.clock.now(requested);
    let expires_at = paste.expires_at(now).map_err(ApiError::Invalid)?;

    let store = Arc::clone(&state.store);
    let inserted = task::spawn_blocking(move || {
        insert_with_fresh_code::<N, _>(&*store, paste.content, expires_at, paste.max_views)
    })
    .await
    .map_err(|e| {
        error!("Failed to join handle: {}", e);
        ApiError::Internal(CREATE_FAILED)
    })?
    .map_err(|e| {
        error!("Failed to insert paste into db: {}", e);
        ApiError::Internal(CREATE_FAILED)
    })?;

    let id = if let Some(id) = inserted {
        id
    } else {
        error!("Failed to generate a valid shortcode");
        return Err(ApiError::Internal(CREATE_FAILED));
    };

    let url = paste_url(&base_url(state.base_url.as_deref(), headers), &id);
    info!(%id, "Created paste");
    Ok(CreatedPaste { id, url })
}

/// Inserts under a freshly drawn short code, drawing again on collision.
/// Returns `None` if every attempt collided.
fn insert_with_fresh_code<const N: usize, S: PasteStore + ?Sized>(
    store: &S,
    content: String,
    expires_at: Option<DateTime<Utc>>,
    max_views: Option<u32>,
) -> Result<Option<String>, StoreError> {
    // Statistics show that even one collision is very unlikely to happen
    const ATTEMPTS: usize = 8;

    let mut rng = StdRng::from_entropy();
    for _ in 0..ATTEMPTS {
        let code: ShortCode<N> = rng.sample(short_code::Generator);
        match store.create(&code.to_string(), content.clone(), expires_at, max_views) {
            Ok(paste) => return Ok(Some(paste.id)),
            Err(StoreError::DuplicateKey(id)) => warn!("Short code {} already taken", id),
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

#[instrument(skip_all)]
async fn paste<const N: usize>(
    Extension(state): Extension<AppState>,
    code: Result<Path<ShortCode<N>>, PathRejection>,
    test_now: Option<TypedHeader<TestNow>>,
) -> Result<Json<PasteView>, ApiError> {
    let now = state.clock.now(requested_now(test_now));
    match read_paste(&state, code, now).await {
        Ok(Some(view)) => Ok(Json(view)),
        Ok(None) => Err(ApiError::NotFound),
        Err(e) => {
            error!("Failed to fetch paste: {:#}", e);
            Err(ApiError::Internal(FETCH_FAILED))
        }
    }
}

/// HTML rendering of a paste. This is a consuming read, same as the API.
#[instrument(skip_all)]
async fn view<const N: usize>(
    Extension(state): Extension<AppState>,
    code: Result<Path<ShortCode<N>>, PathRejection>,
    test_now: Option<TypedHeader<TestNow>>,
) -> (StatusCode, Html<String>) {
    let now = state.clock.now(requested_now(test_now));
    match read_paste(&state, code, now).await {
        Ok(Some(view)) => (StatusCode::OK, Html(html::paste(&view, now))),
        Ok(None) => (StatusCode::NOT_FOUND, Html(html::not_found())),
        Err(e) => {
            error!("Failed to fetch paste: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(html::error()))
        }
    }
}

async fn read_paste<const N: usize>(
    state: &AppState,
    code: Result<Path<ShortCode<N>>, PathRejection>,
    now: DateTime<Utc>,
) -> Result<Option<PasteView>> {
    // A code that can't exist reads exactly like one that doesn't.
    let id = match code {
        Ok(Path(code)) => code.to_string(),
        Err(_) => return Ok(None),
    };

    let store = Arc::clone(&state.store);
    let view = task::spawn_blocking(move || consume::fetch(&*store, &id, now)).await??;
    Ok(view)
}

#[instrument(skip_all)]
async fn health(Extension(state): Extension<AppState>) -> (StatusCode, Json<Health>) {
    let store = Arc::clone(&state.store);
    let healthy = match task::spawn_blocking(move || store.health_check()).await {
        Ok(healthy) => healthy,
        Err(e) => {
            error!("Failed to join handle: {}", e);
            false
        }
    };

    if healthy {
        (StatusCode::OK, Json(Health { ok: true, error: None }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Health {
                ok: false,
                error: Some("Database connection failed".to_string()),
            }),
        )
    }
}

fn requested_now(test_now: Option<TypedHeader<TestNow>>) -> Option<DateTime<Utc>> {
    test_now.map(|TypedHeader(TestNow(instant))| instant)
}

/// Origin for paste links: the configured base, else whatever the request
/// says it was addressed to, else nothing (relative links).
fn base_url(configured: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(base) = configured {
        return base.to_string();
    }

    match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("https");
            format!("{}://{}", proto, host)
        }
        None => String::new(),
    }
}

/// Periodic clean-up task that deletes pastes nobody can read anymore.
async fn cleanup(stop_signal: Arc<AtomicBool>, store: Arc<RocksStore>, interval: Duration) {
    while !stop_signal.load(Ordering::Acquire) {
        tokio::time::sleep(interval).await;

        let store = Arc::clone(&store);
        let join_handle = task::spawn_blocking(move || store.purge_unreadable(Utc::now())).await;
        match join_handle {
            Ok(Ok(0)) => (),
            Ok(Ok(removed)) => info!("Removed {} unreadable pastes", removed),
            Ok(Err(e)) => warn!("Failed to cleanup db: {}", e),
            Err(e) => error!("Failed to join handle?! {}", e),
        }
    }
}
