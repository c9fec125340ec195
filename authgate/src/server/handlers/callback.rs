use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::body::HttpBody;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use tokio::time::Instant;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::common::CallbackRequest;
use crate::handler::InvocationContext;
use crate::server::service::{into_http, method_not_allowed, plain_response};
use crate::server::CallbackService;

/// Upper bound for a form-posted callback body
const MAX_FORM_BYTES: usize = 16 * 1024;

fn header_value(req: &Request<Body>, name: impl hyper::header::AsHeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Reads a form body, giving up with `None` once it grows past `MAX_FORM_BYTES`
async fn read_form_body(mut body: Body) -> Result<Option<Vec<u8>>, hyper::Error> {
    if body.size_hint().lower() > MAX_FORM_BYTES as u64 {
        return Ok(None);
    }

    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > MAX_FORM_BYTES {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Some(buf))
}

impl CallbackService {
    #[instrument(skip(self, req))]
    pub async fn handle_callback_request(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, Infallible> {
        if req.method() != Method::GET && req.method() != Method::POST {
            return Ok(method_not_allowed("GET, POST"));
        }

        let request_id = header_value(&req, "x-request-id")
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let accept = header_value(&req, ACCEPT);
        let is_form = header_value(&req, CONTENT_TYPE)
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        let mut request = CallbackRequest::from_query(req.uri().query().unwrap_or(""));

        if is_form {
            let body = match read_form_body(req.into_body()).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    return Ok(plain_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "Payload Too Large",
                    ))
                }
                Err(e) => {
                    warn!(request_id = %request_id, "Failed to read request body: {}", e);
                    return Ok(plain_response(StatusCode::BAD_REQUEST, "Bad Request"));
                }
            };
            request.merge_form(&String::from_utf8_lossy(&body));
        }

        let deadline = Instant::now() + self.handler.config().timeouts.invocation_timeout();
        let ctx = InvocationContext::new(request_id, Some(deadline));

        let response = self.handler.handle(request.with_accept(accept), &ctx).await;
        Ok(into_http(response))
    }
}
