use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::hub::{websocket_handler, WsState};

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI and WebSocket support
pub fn create_router(state: ApiState) -> Router {
    let ws_state = Arc::new(WsState {
        hub: Arc::clone(&state.hub),
        store: Arc::clone(&state.store),
    });

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // WebSocket endpoint
        .route("/ws", get(websocket_handler))
        .with_state(ws_state)
        .route("/health", get(health_check))
        // Tick endpoints
        .route("/api/v1/ticks/:symbol", get(get_recent_ticks))
        .route("/api/v1/ticks/:symbol/history", get(get_tick_history))
        .route("/api/v1/ticks/:symbol/dates", get(get_available_dates))
        .route("/api/v1/prices", get(get_prices))
        // OHLC endpoints
        .route("/api/v1/ohlc/:symbol", get(get_ohlc))
        // Status and upstream subscriptions
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/subscriptions", get(list_subscriptions))
        .route(
            "/api/v1/subscriptions/:symbol",
            post(subscribe_symbol).delete(unsubscribe_symbol),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FixSessionConfig, HubConfig, StoreConfig};
    use crate::fix::SessionManager;
    use crate::hub::{Hub, StaticTokenValidator};
    use crate::pipeline::PipelineStats;
    use crate::tickstore::{Tick, TickStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn state(dir: &TempDir) -> ApiState {
        let store = TickStore::open(StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        })
        .unwrap();
        let hub = Hub::new(HubConfig::default(), Arc::new(StaticTokenValidator::default())).unwrap();
        let (tick_tx, _tick_rx) = mpsc::channel(8);
        let session = SessionManager::new(FixSessionConfig::default(), tick_tx);

        Arc::new(AppState {
            store: Arc::new(store),
            hub: Arc::new(hub),
            session: Arc::new(session),
            pipeline: Arc::new(PipelineStats::default()),
            started_at: Utc::now(),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn seed(state: &ApiState) {
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        for (i, bid) in [dec!(1.0850), dec!(1.0852), dec!(1.0849)].into_iter().enumerate() {
            let ts = base + chrono::Duration::seconds(i as i64 * 10);
            let tick = Tick::new("fix", "EURUSD", bid, bid + dec!(0.0002), "lp", ts).unwrap();
            state.store.ingest(tick);
        }
    }

    #[tokio::test]
    async fn test_health_reports_degraded_without_session() {
        let dir = TempDir::new().unwrap();
        let (status, json) = get_json(create_router(state(&dir)), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["session_state"], "disconnected");
        assert_eq!(json["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_recent_ticks_and_prices() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        seed(&state);

        let (status, json) =
            get_json(create_router(Arc::clone(&state)), "/api/v1/ticks/EURUSD?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);
        assert_eq!(json["ticks"][0]["bid"], "1.0852");
        assert_eq!(json["ticks"][1]["bid"], "1.0849");

        let (_, json) = get_json(create_router(state), "/api/v1/prices").await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["prices"][0]["symbol"], "EURUSD");
    }

    #[tokio::test]
    async fn test_ohlc_endpoint() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        seed(&state);

        let (status, json) =
            get_json(create_router(Arc::clone(&state)), "/api/v1/ohlc/EURUSD?timeframe=1m").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["timeframe"], "1m");
        assert_eq!(json["count"], 1);
        assert_eq!(json["bars"][0]["volume"], 3);

        let (status, _) = get_json(create_router(state), "/api/v1/ohlc/EURUSD?timeframe=2m").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_requires_valid_date() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let (status, _) =
            get_json(create_router(Arc::clone(&state)), "/api/v1/ticks/EURUSD/history").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(
            create_router(Arc::clone(&state)),
            "/api/v1/ticks/EURUSD/history?date=03-06-2024",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = get_json(
            create_router(state),
            "/api/v1/ticks/EURUSD/history?date=2024-06-03",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_404() {
        let dir = TempDir::new().unwrap();
        let response = create_router(state(&dir))
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/subscriptions/USDJPY")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        seed(&state);

        let (status, json) = get_json(create_router(state), "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["store"]["received"], 3);
        assert_eq!(json["session"]["state"], "disconnected");
        assert_eq!(json["hub"]["forward_mode"], "throttled");
    }
}
