use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::fix::{SessionState, SessionStatus, SubscriptionInfo};
use crate::hub::broadcaster::FanoutLatency;
use crate::hub::{handler, ForwardMode, HubStats, SubscriberInfo};
use crate::pipeline::PipelineSnapshot;
use crate::tickstore::{OhlcBar, StoreStats, Tick, Timeframe};

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Quote Pipeline API",
        version = "1.0.0",
        description = "FIX 4.4 quote ingestion with tick storage, OHLC aggregation and websocket distribution",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::get_recent_ticks,
        handlers::get_tick_history,
        handlers::get_available_dates,
        handlers::get_ohlc,
        handlers::get_prices,
        handlers::get_status,
        handlers::list_subscriptions,
        handlers::subscribe_symbol,
        handlers::unsubscribe_symbol,
        handler::websocket_handler,
    ),
    components(
        schemas(
            Tick,
            OhlcBar,
            Timeframe,
            StoreStats,
            SessionState,
            SessionStatus,
            SubscriptionInfo,
            ForwardMode,
            HubStats,
            FanoutLatency,
            SubscriberInfo,
            PipelineSnapshot,
            HealthResponse,
            TickListResponse,
            DatesResponse,
            OhlcResponse,
            PricesResponse,
            StatusResponse,
            SubscriptionResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Ticks", description = "Recent, stored and latest ticks"),
        (name = "OHLC", description = "Aggregated bars"),
        (name = "Status", description = "Component statistics"),
        (name = "Subscriptions", description = "Upstream market data subscriptions"),
        (name = "Stream", description = "Websocket tick stream"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        for expected in [
            "/health",
            "/api/v1/ticks/{symbol}",
            "/api/v1/ticks/{symbol}/history",
            "/api/v1/ohlc/{symbol}",
            "/api/v1/status",
            "/ws",
        ] {
            assert!(paths.iter().any(|p| *p == expected), "missing {}", expected);
        }
    }
}
