//! REST API.
//!
//! | Route | Method | Access |
//! |---|---|---|
//! | `/cards/` | GET, POST | read open, create staff |
//! | `/cards/:id/` | GET, PATCH, DELETE | read open, writes staff |
//! | `/cards/:id/mark_as_sold/` (and `_available`, `_reserved`) | PATCH | staff |
//! | `/cards/get_all_card_names/` | GET | open, rate limited |
//! | `/cards/search_card_names/?q=` | GET | open |
//! | `/media/*path` | GET | open |
//!
//! Mutating handlers check the caller's role before reading the request
//! body, so an anonymous write is refused with 403 before any validation.
//! Uploads are validated and stored on the blocking pool, as are all other
//! writes.

use crate::auth::Authorizer;
use crate::autocomplete::CardNameIndex;
use crate::model::{Card, CardFilter, CardId, SaleStatus};
use crate::rate_limit::{FixedWindowLimiter, caller_identity};
use crate::service::{CardForm, CardService, ServiceError, Upload};
use crate::validation::ValidationError;
use crate::media::MediaError;
use crate::naming::file_extension;
use axum::{
    Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, patch},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, instrument};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CardService>,
    pub names: Arc<CardNameIndex>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub auth: Arc<Authorizer>,
    /// Overrides the request-derived origin in image URLs.
    pub public_base_url: Option<String>,
}

/// Build the router. `body_limit` caps request bodies in bytes.
pub fn create_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/cards/", get(list_cards).post(create_card))
        .route("/cards/get_all_card_names/", get(get_all_card_names))
        .route("/cards/search_card_names/", get(search_card_names))
        .route(
            "/cards/:id/",
            get(get_card).patch(update_card).delete(delete_card),
        )
        .route("/cards/:id/mark_as_sold/", patch(mark_as_sold))
        .route("/cards/:id/mark_as_available/", patch(mark_as_available))
        .route("/cards/:id/mark_as_reserved/", patch(mark_as_reserved))
        .route("/media/*path", get(serve_media))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ============================================================================
// Responses
// ============================================================================

/// Card as returned by the API: codes, display labels and absolute image URLs.
#[derive(Debug, Serialize)]
pub struct CardView {
    pub id: CardId,
    pub name: String,
    pub serial_number: Option<String>,
    pub image: String,
    pub image_url: Option<String>,
    pub image_optimized: Option<String>,
    /// Derivative URL, or the raw image URL until the derivative exists.
    pub image_optimized_url: Option<String>,
    pub condition: &'static str,
    pub condition_display: &'static str,
    pub rarity: &'static str,
    pub rarity_display: &'static str,
    pub price: i64,
    pub sale_status: &'static str,
    pub sale_status_display: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardView {
    pub fn new(card: &Card, origin: &str) -> Self {
        let url = |stored: &str| {
            (!stored.is_empty()).then(|| format!("{origin}/media/{stored}"))
        };
        let image_url = url(&card.image);
        let image_optimized_url = card
            .image_optimized
            .as_deref()
            .and_then(url)
            .or_else(|| image_url.clone());
        Self {
            id: card.id,
            name: card.name.clone(),
            serial_number: card.serial_number.clone(),
            image: card.image.clone(),
            image_url,
            image_optimized: card.image_optimized.clone(),
            image_optimized_url,
            condition: card.condition.code(),
            condition_display: card.condition.label(),
            rarity: card.rarity.code(),
            rarity_display: card.rarity.label(),
            price: card.price,
            sale_status: card.sale_status.code(),
            sale_status_display: card.sale_status.label(),
            created_at: card.created_at,
            updated_at: card.updated_at,
        }
    }
}

impl AppState {
    /// Scheme and host image URLs are built on, without a trailing slash.
    ///
    /// Empty when neither a configured base URL nor a `Host` header is
    /// available, which leaves the URLs root-relative.
    fn origin(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let proto = header_str("x-forwarded-proto").unwrap_or("http");
        match header_str("x-forwarded-host").or_else(|| header_str(header::HOST.as_str())) {
            Some(host) => format!("{proto}://{host}"),
            None => String::new(),
        }
    }

    fn view(&self, card: &Card, headers: &HeaderMap) -> CardView {
        CardView::new(card, &self.origin(headers))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            ServiceError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": e.to_string(), "field": e.field()})),
            )
                .into_response(),
            ServiceError::Unauthorized(e) => {
                (StatusCode::FORBIDDEN, Json(json!({"error": e.to_string()}))).into_response()
            }
            ServiceError::RateLimited(e) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": e.to_string()})),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(e.retry_after_secs()));
                response
            }
            ServiceError::NotFound(_) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": self.to_string()}))).into_response()
            }
            ServiceError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
            }
            ServiceError::Store(_) | ServiceError::Media(_) | ServiceError::Internal(_) => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

// ============================================================================
// Cards
// ============================================================================

#[instrument(skip_all)]
async fn list_cards(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<CardFilter>,
) -> Json<Vec<CardView>> {
    let origin = state.origin(&headers);
    Json(
        state
            .service
            .list(&filter)
            .iter()
            .map(|c| CardView::new(c, &origin))
            .collect(),
    )
}

#[instrument(skip(state, headers))]
async fn get_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CardId>,
) -> Result<Json<CardView>, ServiceError> {
    let card = state.service.get(id)?;
    Ok(Json(state.view(&card, &headers)))
}

#[instrument(skip_all)]
async fn create_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<CardView>), ServiceError> {
    state.auth.require_staff(&headers)?;
    let form = read_form(multipart, state.service.max_upload_bytes()).await?;
    let service = Arc::clone(&state.service);
    let card = blocking(move || service.create(form)).await?;
    Ok((StatusCode::CREATED, Json(state.view(&card, &headers))))
}

#[instrument(skip(state, headers, multipart))]
async fn update_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CardId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CardView>, ServiceError> {
    state.auth.require_staff(&headers)?;
    let form = read_form(multipart, state.service.max_upload_bytes()).await?;
    let service = Arc::clone(&state.service);
    let card = blocking(move || service.update(id, form)).await?;
    Ok(Json(state.view(&card, &headers)))
}

#[instrument(skip(state, headers))]
async fn delete_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CardId>,
) -> Result<StatusCode, ServiceError> {
    state.auth.require_staff(&headers)?;
    let service = Arc::clone(&state.service);
    blocking(move || service.delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_status(
    state: AppState,
    headers: HeaderMap,
    id: CardId,
    status: SaleStatus,
) -> Result<Json<CardView>, ServiceError> {
    state.auth.require_staff(&headers)?;
    let service = Arc::clone(&state.service);
    let card = blocking(move || service.set_status(id, status)).await?;
    Ok(Json(state.view(&card, &headers)))
}

#[instrument(skip(state, headers))]
async fn mark_as_sold(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CardId>,
) -> Result<Json<CardView>, ServiceError> {
    set_status(state, headers, id, SaleStatus::Sold).await
}

#[instrument(skip(state, headers))]
async fn mark_as_available(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CardId>,
) -> Result<Json<CardView>, ServiceError> {
    set_status(state, headers, id, SaleStatus::Available).await
}

#[instrument(skip(state, headers))]
async fn mark_as_reserved(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CardId>,
) -> Result<Json<CardView>, ServiceError> {
    set_status(state, headers, id, SaleStatus::Reserved).await
}

/// Collect multipart fields into a form. Unknown fields are ignored.
///
/// The image part is read chunk by chunk and refused as soon as it passes
/// `max_image_bytes`. A body cut off by the router's length limit is
/// reported the same way.
async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
    max_image_bytes: u64,
) -> Result<CardForm, ServiceError> {
    let mut multipart = multipart.map_err(|e| ServiceError::BadRequest(e.body_text()))?;
    let too_large = |size: u64| {
        ServiceError::Validation(ValidationError::TooLarge {
            size,
            limit: max_image_bytes,
        })
    };
    let read_error = |e: MultipartError, size: u64| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large(size)
        } else {
            ServiceError::BadRequest(e.body_text())
        }
    };

    let mut form = CardForm::default();
    while let Some(mut field) = multipart.next_field().await.map_err(|e| read_error(e, 0))? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| read_error(e, bytes.len() as u64))?
            {
                bytes.extend_from_slice(&chunk);
                if bytes.len() as u64 > max_image_bytes {
                    return Err(too_large(bytes.len() as u64));
                }
            }
            form.image = Some(Upload { filename, bytes });
            continue;
        }
        let value = field.text().await.map_err(|e| read_error(e, 0))?;
        match name.as_str() {
            "name" => form.name = Some(value),
            "serial_number" => form.serial_number = Some(value),
            "condition" => form.condition = Some(value),
            "rarity" => form.rarity = Some(value),
            "price" => form.price = Some(value),
            "sale_status" => form.sale_status = Some(value),
            _ => {}
        }
    }
    Ok(form)
}

async fn blocking<T, F>(work: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
}

// ============================================================================
// Card names
// ============================================================================

#[derive(Debug, Serialize)]
struct CardNames {
    card_names: Vec<String>,
    count: usize,
}

#[instrument(skip_all)]
async fn get_all_card_names(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<CardNames>, ServiceError> {
    let caller = caller_identity(&headers, peer.map(|ConnectInfo(addr)| addr));
    state.limiter.check(&caller)?;
    let card_names = state.names.all_names();
    Ok(Json(CardNames {
        count: card_names.len(),
        card_names,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[instrument(skip(state))]
async fn search_card_names(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<serde_json::Value> {
    if query.q.trim().is_empty() {
        return Json(json!({"results": []}));
    }
    let results: Vec<_> = state
        .names
        .search(&query.q)
        .into_iter()
        .map(|name| json!({"name": name}))
        .collect();
    Json(json!({"count": results.len(), "results": results}))
}

// ============================================================================
// Media
// ============================================================================

fn content_type(stored_name: &str) -> &'static str {
    match file_extension(stored_name).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[instrument(skip(state))]
async fn serve_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ServiceError> {
    let not_found = || (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response();
    let file = match state.service.media().path(&path) {
        Ok(file) => file,
        Err(MediaError::InvalidName(_)) => return Ok(not_found()),
        Err(e) => return Err(e.into()),
    };
    match tokio::fs::read(&file).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(not_found()),
        Err(e) => Err(MediaError::Io(e).into()),
    }
}
