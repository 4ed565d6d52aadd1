//! Tests for HTTP request handlers.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::controller::StackController;
    use crate::runtime::fake::FakeRuntime;
    use crate::runtime::ExecOutput;
    use crate::server::create_router;
    use crate::server::state::AppState;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const CONFIG: &str = r#"
project: api
models:
  retry_delay_ms: 5
  check_command: null
services:
  - name: ollama
    image: ollama/ollama
  - name: open-webui
    image: ghcr.io/open-webui/open-webui:main
    depends_on: [ollama]
"#;

    struct TestApp {
        router: Router,
        runtime: Arc<FakeRuntime>,
        controller: Arc<StackController>,
        shutdown: CancellationToken,
    }

    const SLOW_BACKEND: &str = r#"
project: api
timeout:
  readiness_seconds: 30
  probe_interval_ms: 20
  probe_attempt_ms: 200
services:
  - name: ollama
    image: ollama/ollama
    readiness:
      kind: exec
      command: ollama list
  - name: open-webui
    image: ghcr.io/open-webui/open-webui:main
    depends_on: [ollama]
"#;

    fn create_test_app() -> TestApp {
        create_app(CONFIG)
    }

    fn create_app(yaml: &str) -> TestApp {
        let config = Config::load_from_str(yaml).unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let controller = Arc::new(StackController::new(&config, runtime.clone()).unwrap());
        let shutdown = CancellationToken::new();
        let state = Arc::new(AppState::new(controller.clone(), shutdown.clone()));

        TestApp {
            router: create_router(state),
            runtime,
            controller,
            shutdown,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let request = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["stack"], "uninitialized");
        assert_eq!(json["data"]["status"], "degraded");
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = create_test_app();
        app.controller.start(&CancellationToken::new()).await.unwrap();

        let request = Request::builder()
            .uri("/api/v1/status")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["state"], "running");
        assert_eq!(json["data"]["services"][0]["name"], "ollama");
        assert_eq!(json["data"]["services"][1]["state"], "ready");
        assert_eq!(
            json["data"]["launch_order"],
            serde_json::json!(["ollama", "open-webui"])
        );
    }

    #[tokio::test]
    async fn test_get_service_endpoint() {
        let app = create_test_app();

        let request = Request::builder()
            .uri("/api/v1/services/open-webui")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["container"], "api-open-webui");
        assert_eq!(json["data"]["depends_on"], serde_json::json!(["ollama"]));
    }

    #[tokio::test]
    async fn test_get_service_not_found() {
        let app = create_test_app();

        let request = Request::builder()
            .uri("/api/v1/services/nonexistent")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "E002");
    }

    #[tokio::test]
    async fn test_ensure_model_endpoint() {
        let app = create_test_app();
        app.controller.start(&CancellationToken::new()).await.unwrap();

        let response = app
            .router
            .oneshot(post_json(
                "/api/v1/models",
                r#"{"service": "ollama", "model": "codellama:13b"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["model"], "codellama:13b");
        assert_eq!(json["data"]["attempts"], 1);
        assert_eq!(
            app.runtime.execs("ollama"),
            vec![vec![
                "ollama".to_string(),
                "pull".to_string(),
                "codellama:13b".to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn test_health_counts_requests() {
        let app = create_test_app();
        app.controller.start(&CancellationToken::new()).await.unwrap();

        let response = app
            .router
            .clone()
            .oneshot(post_json(
                "/api/v1/models",
                r#"{"service": "ollama", "model": "llama2"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/services/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["data"]["status"], "healthy");
        assert_eq!(json["data"]["stats"]["requests_total"], 2);
        assert_eq!(json["data"]["stats"]["requests_failed"], 1);
        assert_eq!(json["data"]["stats"]["models_provisioned"], 1);
    }

    #[tokio::test]
    async fn test_ensure_model_unstable() {
        let app = create_test_app();
        app.controller.start(&CancellationToken::new()).await.unwrap();
        app.runtime
            .set_exec_default("ollama", ExecOutput::new(Some(1), "llama runner exited"));

        let response = app
            .router
            .oneshot(post_json(
                "/api/v1/models",
                r#"{"service": "ollama", "model": "codellama:34b"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "E007");
        assert_eq!(json["error"]["details"]["attempts"], 3);
    }

    #[tokio::test]
    async fn test_ensure_model_requires_ready_service() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(post_json(
                "/api/v1/models",
                r#"{"service": "ollama", "model": "llama2"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ensure_model_bad_body() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(post_json("/api/v1/models", r#"{"service": "ollama"}"#))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_stop_endpoint() {
        let app = create_test_app();
        app.controller.start(&CancellationToken::new()).await.unwrap();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/stop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["state"], "stopped");
        assert_eq!(app.runtime.removals(), vec!["open-webui", "ollama"]);
        assert!(app.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_cancels_start_in_progress() {
        let app = create_app(SLOW_BACKEND);
        app.runtime
            .set_exec_default("ollama", ExecOutput::new(Some(1), "connection refused"));

        let controller = app.controller.clone();
        let start =
            tokio::spawn(async move { controller.start(&CancellationToken::new()).await });

        while app.runtime.launches().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(app.controller.state(), crate::controller::StackState::Starting);

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            app.router.oneshot(post_json("/api/v1/stop", "{}")),
        )
        .await
        .expect("stop should not wait for the readiness timeout")
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["state"], "stopped");

        let err = start.await.unwrap().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Cancelled);
        assert_eq!(app.runtime.launches(), vec!["ollama"]);
        assert!(app.runtime.removals().contains(&"ollama".to_string()));
    }
}
