use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::fix::{SessionState, SessionStatus};
use crate::hub::HubStats;
use crate::pipeline::PipelineSnapshot;
use crate::tickstore::{OhlcBar, StoreStats, Tick, Timeframe};

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` while the upstream session is logged on, `degraded` otherwise
    pub status: String,
    pub session_state: SessionState,
    pub subscribers: usize,
    pub timestamp: DateTime<Utc>,
}

/// Ticks for one symbol, oldest first
#[derive(Debug, Serialize, ToSchema)]
pub struct TickListResponse {
    pub symbol: String,
    pub count: usize,
    pub ticks: Vec<Tick>,
}

/// Dates with stored ticks
#[derive(Debug, Serialize, ToSchema)]
pub struct DatesResponse {
    pub symbol: String,
    /// `YYYY-MM-DD`, ascending
    pub dates: Vec<String>,
}

/// OHLC bars, oldest first; the last bar may still be open
#[derive(Debug, Serialize, ToSchema)]
pub struct OhlcResponse {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub bars: Vec<OhlcBar>,
}

/// Latest tick per symbol
#[derive(Debug, Serialize, ToSchema)]
pub struct PricesResponse {
    pub count: usize,
    pub prices: Vec<Tick>,
}

/// Session, store, hub and pipeline statistics
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub session: SessionStatus,
    pub store: StoreStats,
    pub hub: HubStats,
    pub pipeline: PipelineSnapshot,
    pub uptime_secs: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    pub symbol: String,
    pub md_req_id: String,
}

/// Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
