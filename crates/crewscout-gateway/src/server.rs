use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crewscout_core::config::GatewayConfig;
use crewscout_core::crew::TaskGraph;
use crewscout_core::traits::Executor;

use crate::routes;
use crate::state::AppState;
use crate::static_files;

/// Build the HTTP router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // REST API
        .route("/api/health", get(routes::health))
        .route("/api/sessions/{id}", get(routes::session_state))
        .route("/api/sessions/{id}/analyze", post(routes::analyze))
        .route("/api/sessions/{id}/cancel", post(routes::cancel))
        .route("/api/sessions/{id}/report", get(routes::report))
        // Embedded Web UI
        .route("/", get(static_files::index))
        .route("/assets/{*path}", get(static_files::static_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        executor: Arc<dyn Executor>,
        graph: TaskGraph,
        timeout_secs: u64,
    ) -> Self {
        Self {
            state: Arc::new(AppState::new(config, executor, graph, timeout_secs)),
        }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let bind = self.state.config.bind.clone();
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&bind).await?;
        info!(%bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use crewscout_agent::competitor_crew;
    use crewscout_test_utils::StubExecutor;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(executor: StubExecutor, token: Option<&str>) -> (Router, Arc<AppState>) {
        let config = GatewayConfig {
            token: token.map(String::from),
            ..GatewayConfig::default()
        };
        let state = Arc::new(AppState::new(
            config,
            Arc::new(executor),
            competitor_crew().unwrap(),
            180,
        ));
        (router(state.clone()), state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_until_settled(app: &Router, uri: &str) -> serde_json::Value {
        for _ in 0..100 {
            let json = body_json(app.clone().oneshot(get(uri)).await.unwrap()).await;
            if json["status"] != "running" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run never settled");
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let (app, _) = app(StubExecutor::report("r"), Some("secret"));

        let resp = app.clone().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");

        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_successful_analysis_offers_download() {
        let report = "# Competitor Analysis\n\n1. Otter: https://otter.ai\n";
        let (app, _) = app(StubExecutor::report(report), None);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/sessions/s1/analyze",
                serde_json::json!({"idea": "AI note-taking app"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "running");
        assert_eq!(json["session_id"], "s1");

        let settled = wait_until_settled(&app, "/api/sessions/s1").await;
        assert_eq!(settled["status"], "succeeded");
        assert_eq!(settled["report"], report);
        assert!(settled.get("elapsed_secs").is_none());

        let resp = app.oneshot(get("/api/sessions/s1/report")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"competitor_analysis.md\""
        );
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/markdown"));
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes, report.as_bytes());
    }

    #[tokio::test]
    async fn test_failed_analysis_has_no_report() {
        let (app, _) = app(StubExecutor::failing("HTTP 401: invalid api key"), None);

        app.clone()
            .oneshot(post_json("/api/sessions/s1/analyze", serde_json::json!({"idea": "idea"})))
            .await
            .unwrap();

        let settled = wait_until_settled(&app, "/api/sessions/s1").await;
        assert_eq!(settled["status"], "failed");
        assert!(settled["message"].as_str().unwrap().contains("invalid api key"));

        let resp = app.oneshot(get("/api/sessions/s1/report")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blank_idea_rejected_without_running() {
        let stub = Arc::new(StubExecutor::report("r"));
        let state = Arc::new(AppState::new(
            GatewayConfig::default(),
            stub.clone(),
            competitor_crew().unwrap(),
            180,
        ));
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(post_json("/api/sessions/s1/analyze", serde_json::json!({"idea": "  \n"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let json = body_json(app.oneshot(get("/api/sessions/s1")).await.unwrap()).await;
        assert_eq!(json["status"], "idle");
        assert!(stub.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_running_session_conflicts_and_cancels() {
        let slow = StubExecutor::report("late").with_delay(Duration::from_secs(60));
        let (app, _) = app(slow, None);
        let submit = || post_json("/api/sessions/s1/analyze", serde_json::json!({"idea": "idea"}));

        let resp = app.clone().oneshot(submit()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let json = body_json(app.clone().oneshot(get("/api/sessions/s1")).await.unwrap()).await;
        assert_eq!(json["status"], "running");
        assert!(json["elapsed_secs"].is_u64());

        let resp = app.clone().oneshot(submit()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(post_json("/api/sessions/s1/cancel", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "Analysis cancelled");

        let resp = app
            .oneshot(post_json("/api/sessions/s1/cancel", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_token_guards_session_routes() {
        let (app, _) = app(StubExecutor::report("r"), Some("secret"));

        let resp = app.clone().oneshot(get("/api/sessions/s1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(get("/api/sessions/s1?token=secret"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::get("/api/sessions/s1")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_token_with_reserved_characters() {
        let (app, _) = app(StubExecutor::report("r"), Some("a+b/c="));

        let resp = app
            .clone()
            .oneshot(get("/api/sessions/s1?token=a%2Bb%2Fc%3D"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get("/api/sessions/s1?token=a%2Bb")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
