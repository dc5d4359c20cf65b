use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        create_draw, get_config, get_draw, get_payer, get_version, health_check, list_draws,
        list_highest_payments, list_payments, AppState,
    },
    middleware::create_cors_layer,
};

pub fn create_app(state: AppState, static_path: &str, cors_origins: &[String]) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api",
            Router::new()
                .route("/config", get(get_config))
                .route("/version", get(get_version))
                .route("/payer", get(get_payer))
                // Earnings payments
                .route("/earnings/payments", get(list_payments))
                .route("/earnings/payments/highest", get(list_highest_payments))
                // Draws
                .route("/draws", post(create_draw).get(list_draws))
                .route("/draws/:key", get(get_draw)),
        )
        // Web UI
        .fallback_service(ServeDir::new(static_path))
        .layer(CompressionLayer::new())
        .layer(create_cors_layer(cors_origins))
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draws::DrawConstructor;
    use crate::payer::Payer;
    use crate::store::MemoryStore;
    use crate::testing::{address, MockWalletSource};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let payer = Payer::new(address(100), Arc::new(MockWalletSource::new(1_000, 0)));
        let draws = Arc::new(DrawConstructor::new(store.clone(), payer.clone(), vec![500, 100], 0));
        create_app(AppState { store, payer, draws }, "web/dist", &[])
    }

    async fn json(res: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_version_route() {
        let res = app()
            .oneshot(Request::get("/api/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["name"], "lottery");
    }

    #[tokio::test]
    async fn test_unknown_draw_is_404() {
        let res = app()
            .oneshot(Request::get("/api/draws/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(res).await["error_code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_invalid_draw_reports_param() {
        let body = serde_json::json!({
            "draw": { "winners": [{ "hash": "zz", "recipient": address(1) }] }
        });
        let res = app()
            .oneshot(
                Request::post("/api/draws")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json(res).await;
        assert_eq!(body["details"]["param"], "draw.winners");
        assert_eq!(body["details"]["reason"], "hex zz is not a valid hexadecimal string");
    }

    #[tokio::test]
    async fn test_malformed_draw_bodies_are_400() {
        let cases = [
            (r#"{"draw":{"winners":"x"}}"#, "draw.winners", "must be an array"),
            (r#"[["00aa"]]"#, "draw.winners", "must be an array"),
            (r#"{"draw":{"winners":[["00aa","xe_1"]]}}"#, "draw.winners", "value must not be an array"),
            (
                r#"{"draw":{"winners":[{"hash":"00aa"}]}}"#,
                "draw.winners",
                "recipient must be an XE address",
            ),
        ];
        for (raw, param, reason) in cases {
            let res = app()
                .oneshot(
                    Request::post("/api/draws")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(raw))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", raw);
            let body = json(res).await;
            assert_eq!(body["details"]["param"], param, "{}", raw);
            assert_eq!(body["details"]["reason"], reason, "{}", raw);
        }

        let res = app()
            .oneshot(
                Request::post("/api/draws")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res).await["details"]["param"], "draw");
    }
}
