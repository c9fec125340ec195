use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::info;

use crate::handler::CallbackHandler;
pub use service::CallbackService;

mod handlers;
mod service;

/// Serves the callback endpoint locally until ctrl-c
pub async fn run(port: u16, handler: CallbackHandler) -> Result<()> {
    let environment = handler.config().environment.clone();
    let service = CallbackService::new(handler);

    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = service.clone();
                async move { service.handle_request(req).await }
            }))
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server = Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        });

    info!(environment = %environment, "🌐 Callback server listening on {}", addr);

    println!();
    println!("🎯 Endpoints:");
    println!("   🔑 Callback: http://localhost:{}/callback", port);
    println!("   🏥 Health:   http://localhost:{}/health", port);
    println!();

    server.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::offline_handler;
    use hyper::{Body, Method, Request, Response, StatusCode};

    async fn send(req: Request<Body>) -> Response<Body> {
        CallbackService::new(offline_handler())
            .handle_request(req)
            .await
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "test");
        assert!(body["started_at"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_provider_error_json() {
        let response = send(
            Request::builder()
                .uri("/callback?error=access_denied&error_description=User+cancelled")
                .header("accept", "application/json")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(response.headers()["content-type"], "application/json");
        let body = body_json(response).await;
        assert_eq!(body["error"], "provider_error");
        assert_eq!(body["message"], "User cancelled");
    }

    #[tokio::test]
    async fn test_form_post_reaches_exchange() {
        let response = send(
            Request::builder()
                .method(Method::POST)
                .uri("/")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("code=abc&state=xyz"))
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_oversized_form_rejected_before_reading() {
        let response = send(
            Request::builder()
                .method(Method::POST)
                .uri("/callback")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(vec![b'a'; 20 * 1024]))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_oversized_streamed_form_rejected() {
        let (mut sender, body) = Body::channel();
        tokio::spawn(async move {
            for _ in 0..4 {
                if sender.send_data(vec![b'a'; 8 * 1024].into()).await.is_err() {
                    break;
                }
            }
        });

        let response = send(
            Request::builder()
                .method(Method::POST)
                .uri("/callback")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body)
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_missing_code_is_malformed() {
        let response = send(
            Request::builder()
                .uri("/callback")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let response = send(
            Request::builder()
                .uri("/admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            Request::builder()
                .method(Method::DELETE)
                .uri("/callback")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET, POST");
    }
}
