//! HTTP API server implementation

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::client::{HttpEndpoint, TranslationClient, TranslationEndpoint};
use crate::core::config::TranslatorConfig;
use crate::core::models::{NavigationEvent, NavigationSource};
use crate::engine::scheduler::SchedulerStatus;
use crate::processors::html::{append_fragment, replace_content, serialize};
use crate::server::session::{Activation, PageSession, SessionStore};

/// Application state
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Arc<TranslatorConfig>, endpoint: Arc<dyn TranslationEndpoint>) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(config, endpoint)),
        }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    sessions: usize,
}

/// Batch translation request
#[derive(Deserialize)]
pub struct TranslateRequest {
    pub text_list: Vec<String>,
}

/// Batch translation response
#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub translations: Vec<TranslationItem>,
}

#[derive(Debug, Serialize)]
pub struct TranslationItem {
    pub text: String,
}

#[derive(Deserialize)]
pub struct CreatePageRequest {
    pub html: String,
    pub url: String,
    /// Activate immediately after loading
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Serialize)]
pub struct PageView {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub status: SchedulerStatus,
    pub html: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub dispatched: bool,
    pub busy: bool,
}

#[derive(Deserialize)]
pub struct ContentRequest {
    pub html: String,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub added: usize,
}

#[derive(Deserialize)]
pub struct NavigateRequest {
    pub url: String,
    /// New body markup installed by the page's own router
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default = "default_source")]
    pub source: NavigationSource,
}

fn default_source() -> NavigationSource {
    NavigationSource::PushState
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    let r#type = if status.is_client_error() {
        "invalid_request_error"
    } else {
        "api_error"
    };
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message: message.into(),
                code: Some(code.to_string()),
                r#type: Some(r#type.to_string()),
            },
        }),
    )
}

fn find_page(state: &AppState, id: &str) -> Result<Arc<PageSession>, (StatusCode, Json<ErrorResponse>)> {
    state
        .sessions
        .get(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "page_not_found", format!("No page with id {}", id)))
}

fn page_view(page: &PageSession) -> PageView {
    let scheduler = page.scheduler();
    PageView {
        id: page.id.clone(),
        url: scheduler.document().location(),
        created_at: page.created_at,
        status: scheduler.status(),
        html: serialize(scheduler.document()),
    }
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.len(),
    })
}

/// Translate a list of texts; failures keep the original text
async fn translate(
    State(state): State<AppState>,
    Json(payload): Json<TranslateRequest>,
) -> ApiResult<TranslateResponse> {
    if payload.text_list.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "text_list cannot be empty",
        ));
    }

    // Own client so concurrent requests do not supersede each other
    let client = TranslationClient::new(state.sessions.endpoint().clone());
    let mut translations = Vec::with_capacity(payload.text_list.len());
    for text in payload.text_list {
        let translated = match client.translate(&text).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!("Translation failed for '{}': {}", text, e);
                text
            }
        };
        translations.push(TranslationItem { text: translated });
    }

    Ok(Json(TranslateResponse { translations }))
}

async fn create_page(
    State(state): State<AppState>,
    Json(payload): Json<CreatePageRequest>,
) -> Result<(StatusCode, Json<PageView>), (StatusCode, Json<ErrorResponse>)> {
    let page = state
        .sessions
        .create(&payload.html, &payload.url)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "session_error", e.to_string()))?;

    if payload.activate {
        page.activate().await;
    }
    Ok((StatusCode::CREATED, Json(page_view(&page))))
}

async fn get_page(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<PageView> {
    let page = find_page(&state, &id)?;
    Ok(Json(page_view(&page)))
}

async fn activate_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ActivateResponse>), (StatusCode, Json<ErrorResponse>)> {
    let page = find_page(&state, &id)?;
    match page.activate().await {
        Activation::Dispatched => Ok((
            StatusCode::ACCEPTED,
            Json(ActivateResponse {
                dispatched: true,
                busy: false,
            }),
        )),
        Activation::Busy => Ok((
            StatusCode::OK,
            Json(ActivateResponse {
                dispatched: false,
                busy: true,
            }),
        )),
        Activation::Closed => Err(api_error(
            StatusCode::GONE,
            "page_closed",
            format!("Page {} is shutting down", id),
        )),
    }
}

/// Dynamic content inserted by the page's own scripts
async fn append_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ContentRequest>,
) -> ApiResult<ContentResponse> {
    let page = find_page(&state, &id)?;
    let document = page.scheduler().document();
    let body = document
        .body()
        .ok_or_else(|| api_error(StatusCode::CONFLICT, "no_body", "Document has no body"))?;

    let added = append_fragment(document, body, &payload.html)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "dom_error", e.to_string()))?;
    Ok(Json(ContentResponse { added: added.len() }))
}

/// In-place navigation: optional new body, then the navigation event
async fn navigate_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<NavigateRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let page = find_page(&state, &id)?;
    let scheduler = page.scheduler();

    if let Some(html) = payload.html.as_deref() {
        let document = scheduler.document();
        if let Some(body) = document.body() {
            replace_content(document, body, html)
                .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "dom_error", e.to_string()))?;
        }
    }

    scheduler.notify_navigation(NavigationEvent::new(payload.source, payload.url));
    Ok(StatusCode::ACCEPTED)
}

async fn close_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    if state.sessions.close(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "page_not_found",
            format!("No page with id {}", id),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/translate", post(translate))
        .route("/v1/pages", post(create_page))
        .route("/v1/pages/:id", get(get_page).delete(close_page))
        .route("/v1/pages/:id/activate", post(activate_page))
        .route("/v1/pages/:id/content", post(append_content))
        .route("/v1/pages/:id/navigate", post(navigate_page))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(host: String, port: u16, config: TranslatorConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let endpoint = Arc::new(HttpEndpoint::new(config.clone())?);
    let app = router(AppState::new(config, endpoint));

    // Bind address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
