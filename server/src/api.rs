// fadebin Ephemeral Paste Server
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fadebin_common::{
    CreatedPaste, Envelope, Health, PasteSummary, PasteView, Url, API_ENDPOINT, PASTES_ENDPOINT,
    VIEW_ENDPOINT,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, instrument, warn};

use crate::clock::Clock;
use crate::html;
use crate::paste::{NewPaste, Paste, ValidationError};
use crate::short_code::PasteId;
use crate::store::{self, PasteStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PasteStore>,
    pub clock: Arc<dyn Clock>,
    pub public_url: Url,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route(PASTES_ENDPOINT, post(create).get(list))
        .route(&format!("{PASTES_ENDPOINT}/:id"), get(fetch))
        .route(&format!("{PASTES_ENDPOINT}/html/:id"), get(fetch_html))
        .route(&format!("{VIEW_ENDPOINT}/:id"), get(fetch_html))
        .route(&format!("{API_ENDPOINT}/healthz"), get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Lets browsers on `origins` call the API. With no origins configured any
/// origin is allowed.
pub fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%origin, %e, "Ignoring unusable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Everything a handler can fail with. Missing, expired and exhausted pastes
/// all collapse into `NotFound` so callers cannot probe for existence.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Paste not found")]
    NotFound,
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(Envelope::<()>::error(self.to_string()))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        debug!(%e, "Rejected paste");
        Self::BadRequest(e.to_string())
    }
}

impl From<store::Error> for ApiError {
    fn from(e: store::Error) -> Self {
        match e {
            store::Error::Validation(e) => e.into(),
            store::Error::Unavailable(reason) => {
                debug!(%reason, "Paste unavailable");
                Self::NotFound
            }
            e => {
                error!("Paste store failure: {}", e);
                Self::Internal
            }
        }
    }
}

/// Runs a store operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!("Failed to join handle: {}", e);
            Err(ApiError::Internal)
        }
    }
}

/// Creation body as it arrives on the wire. The limits stay untyped until
/// validated so a bad value is a 400 with a useful message, not a decoder
/// rejection.
#[derive(Deserialize, Debug, Default)]
struct CreateRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    ttl_seconds: Option<Value>,
    #[serde(default)]
    max_views: Option<Value>,
}

impl CreateRequest {
    fn into_new_paste(self) -> Result<NewPaste, ValidationError> {
        Ok(NewPaste {
            title: self.title,
            content: self.content.ok_or(ValidationError::BlankContent)?,
            ttl_seconds: limit(self.ttl_seconds).ok_or(ValidationError::Ttl)?,
            max_views: limit(self.max_views).ok_or(ValidationError::MaxViews)?,
        })
    }
}

/// Reads an optional limit. Absent and `null` mean zero. Integers, including
/// integral floats like `3.0`, pass through with their sign for the store to
/// judge; strings, booleans and fractions are rejected.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
fn limit(value: Option<Value>) -> Option<i64> {
    match value {
        None | Some(Value::Null) => Some(0),
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(f))
                .map(|f| f as i64)
        }),
        Some(_) => None,
    }
}

fn share_url(base: &Url, id: &PasteId) -> String {
    format!("{}{VIEW_ENDPOINT}/{id}", base.as_str().trim_end_matches('/'))
}

#[instrument(skip_all)]
async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<CreatedPaste>>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let new = request.into_new_paste()?;

    let now = state.clock.now();
    let store = Arc::clone(&state.store);
    let paste = blocking(move || store.create(new, now)).await?;

    let created = CreatedPaste {
        id: paste.id.to_string(),
        url: share_url(&state.public_url, &paste.id),
    };
    Ok((StatusCode::CREATED, Json(Envelope::success(created))))
}

#[instrument(skip(state))]
async fn list(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<PasteSummary>>>, ApiError> {
    let now = state.clock.now();
    let summaries = blocking(move || state.store.list(now)).await?;
    Ok(Json(Envelope::success(summaries)))
}

#[instrument(skip(state))]
async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PasteView>, ApiError> {
    let paste = consume(state, &id).await?;
    Ok(Json(paste.into()))
}

#[instrument(skip(state))]
async fn fetch_html(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match consume(state, &id).await {
        Ok(paste) => Html(html::render(&paste)).into_response(),
        Err(ApiError::NotFound) => (StatusCode::NOT_FOUND, "Paste not found").into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Server error").into_response(),
    }
}

#[instrument(skip(state))]
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    match blocking(move || state.store.ping()).await {
        Ok(()) => (StatusCode::OK, Json(Health { ok: true })),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(Health { ok: false })),
    }
}

async fn consume(state: AppState, id: &str) -> Result<Paste, ApiError> {
    // A malformed id was never handed out, so it is simply not found.
    let id: PasteId = id.parse().map_err(|e| {
        debug!(%e, "Malformed paste id");
        ApiError::NotFound
    })?;

    let now = state.clock.now();
    blocking(move || state.store.fetch_and_consume(&id, now)).await
}
