use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use utoipa::IntoParams;

use crate::error::{SessionError, StoreError};
use crate::fix::{SessionManager, SubscriptionInfo};
use crate::hub::Hub;
use crate::pipeline::PipelineStats;
use crate::tickstore::{TickStore, Timeframe};

use super::responses::*;

/// Everything the REST handlers read from
pub struct AppState {
    pub store: Arc<TickStore>,
    pub hub: Arc<Hub>,
    pub session: Arc<SessionManager>,
    pub pipeline: Arc<PipelineStats>,
    pub started_at: DateTime<Utc>,
}

/// Shared application state
pub type ApiState = Arc<AppState>;

const MAX_LIMIT: usize = 10_000;

#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitQuery {
    /// Maximum number of items (default 100)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Single day, `YYYY-MM-DD`
    pub date: Option<String>,
    /// Range start (inclusive), `YYYY-MM-DD`; used with `to`
    pub from: Option<String>,
    /// Range end (inclusive), `YYYY-MM-DD`
    pub to: Option<String>,
    /// Keep only the most recent `limit` ticks
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OhlcQuery {
    /// One of 1m, 5m, 15m, 30m, 1h, 4h, 1d (default 1m)
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

fn default_timeframe() -> String {
    "1m".to_string()
}

/// Errors surfaced by the REST handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) if e.is_validation_error() => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Session(SessionError::NotSubscribed(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(_) => StatusCode::BAD_GATEWAY,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("{} must be YYYY-MM-DD, got '{}'", field, value)))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let session_state = state.session.state();
    let status = if session_state.is_active() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        session_state,
        subscribers: state.hub.subscriber_count(),
        timestamp: Utc::now(),
    })
}

/// Recent ticks from memory
#[utoipa::path(
    get,
    path = "/api/v1/ticks/{symbol}",
    tag = "Ticks",
    params(
        ("symbol" = String, Path, description = "Symbol, e.g. EURUSD"),
        LimitQuery
    ),
    responses(
        (status = 200, description = "Most recent ticks, oldest first", body = TickListResponse)
    )
)]
pub async fn get_recent_ticks(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Json<TickListResponse> {
    let ticks = state.store.get_recent(&symbol, query.limit.min(MAX_LIMIT));
    Json(TickListResponse {
        count: ticks.len(),
        symbol,
        ticks,
    })
}

/// Stored ticks for one day or an inclusive date range
#[utoipa::path(
    get,
    path = "/api/v1/ticks/{symbol}/history",
    tag = "Ticks",
    params(
        ("symbol" = String, Path, description = "Symbol, e.g. EURUSD"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "Stored ticks in arrival order", body = TickListResponse),
        (status = 400, description = "Missing or malformed date", body = ErrorResponse)
    )
)]
pub async fn get_tick_history(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<TickListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT);
    let store = Arc::clone(&state.store);
    let key = symbol.clone();

    let ticks = match (&query.date, &query.from, &query.to) {
        (Some(date), _, _) => {
            let date = parse_date("date", date)?;
            let mut ticks = tokio::task::spawn_blocking(move || store.history(&key, date)).await??;
            if ticks.len() > limit {
                ticks.drain(..ticks.len() - limit);
            }
            ticks
        }
        (None, Some(from), Some(to)) => {
            let from = parse_date("from", from)?;
            let to = parse_date("to", to)?;
            if from > to {
                return Err(ApiError::BadRequest("from must not be after to".to_string()));
            }
            tokio::task::spawn_blocking(move || store.history_range(&key, from, to, limit)).await??
        }
        _ => {
            return Err(ApiError::BadRequest(
                "either date or both from and to are required".to_string(),
            ))
        }
    };

    Ok(Json(TickListResponse {
        count: ticks.len(),
        symbol,
        ticks,
    }))
}

/// Days with stored ticks
#[utoipa::path(
    get,
    path = "/api/v1/ticks/{symbol}/dates",
    tag = "Ticks",
    params(("symbol" = String, Path, description = "Symbol, e.g. EURUSD")),
    responses(
        (status = 200, description = "Stored dates, ascending", body = DatesResponse)
    )
)]
pub async fn get_available_dates(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<DatesResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    let key = symbol.clone();
    let dates = tokio::task::spawn_blocking(move || store.available_dates(&key)).await??;

    Ok(Json(DatesResponse {
        symbol,
        dates: dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect(),
    }))
}

/// OHLC bars from the in-memory cache
#[utoipa::path(
    get,
    path = "/api/v1/ohlc/{symbol}",
    tag = "OHLC",
    params(
        ("symbol" = String, Path, description = "Symbol, e.g. EURUSD"),
        OhlcQuery
    ),
    responses(
        (status = 200, description = "Bars, oldest first", body = OhlcResponse),
        (status = 400, description = "Unknown timeframe", body = ErrorResponse)
    )
)]
pub async fn get_ohlc(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<OhlcQuery>,
) -> Result<Json<OhlcResponse>, ApiError> {
    let timeframe: Timeframe = query.timeframe.parse().map_err(ApiError::BadRequest)?;

    let bars = state
        .store
        .get_ohlc(&symbol, timeframe, query.limit.min(MAX_LIMIT));

    Ok(Json(OhlcResponse {
        count: bars.len(),
        symbol,
        timeframe,
        bars,
    }))
}

/// Latest price of every symbol
#[utoipa::path(
    get,
    path = "/api/v1/prices",
    tag = "Ticks",
    responses(
        (status = 200, description = "Latest tick per symbol", body = PricesResponse)
    )
)]
pub async fn get_prices(State(state): State<ApiState>) -> Json<PricesResponse> {
    let prices = state.store.latest_all();
    Json(PricesResponse {
        count: prices.len(),
        prices,
    })
}

/// Session, store, hub and pipeline statistics
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "Status",
    responses(
        (status = 200, description = "Component statistics", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session: state.session.status(),
        store: state.store.stats(),
        hub: state.hub.stats(),
        pipeline: state.pipeline.snapshot(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// Active upstream subscriptions
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Subscribed symbols", body = Vec<SubscriptionInfo>)
    )
)]
pub async fn list_subscriptions(State(state): State<ApiState>) -> Json<Vec<SubscriptionInfo>> {
    Json(state.session.status().subscriptions)
}

/// Subscribe the upstream session to a symbol
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions/{symbol}",
    tag = "Subscriptions",
    params(("symbol" = String, Path, description = "Symbol, e.g. EURUSD")),
    responses(
        (status = 200, description = "Subscribed (idempotent)", body = SubscriptionResponse),
        (status = 503, description = "Session supervisor stopped", body = ErrorResponse)
    )
)]
pub async fn subscribe_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let symbol = symbol.trim().to_string();
    if symbol.is_empty() {
        return Err(ApiError::BadRequest("symbol must not be empty".to_string()));
    }
    let md_req_id = state.session.subscribe(&symbol)?;
    Ok(Json(SubscriptionResponse { symbol, md_req_id }))
}

/// Unsubscribe the upstream session from a symbol
#[utoipa::path(
    delete,
    path = "/api/v1/subscriptions/{symbol}",
    tag = "Subscriptions",
    params(("symbol" = String, Path, description = "Symbol, e.g. EURUSD")),
    responses(
        (status = 204, description = "Unsubscribed"),
        (status = 404, description = "Symbol not subscribed", body = ErrorResponse)
    )
)]
pub async fn unsubscribe_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.session.unsubscribe(&symbol)?;
    Ok(StatusCode::NO_CONTENT)
}
