use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;

use crate::server::service::{method_not_allowed, plain_response};
use crate::server::CallbackService;

impl CallbackService {
    pub async fn handle_health_request(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, Infallible> {
        if req.method() != Method::GET {
            return Ok(method_not_allowed("GET"));
        }

        let started_at = self
            .started_at
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_secs();

        let health_info = json!({
            "status": "healthy",
            "environment": self.handler.config().environment,
            "started_at": started_at,
        });

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(health_info.to_string()))
            .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")))
    }
}
