use crate::common::CallbackResponse;
use crate::handler::CallbackHandler;
use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;
use std::time::SystemTime;
use tracing::{error, instrument};

#[derive(Clone)]
pub struct CallbackService {
    pub handler: CallbackHandler,
    pub started_at: SystemTime,
}

impl CallbackService {
    pub fn new(handler: CallbackHandler) -> Self {
        Self {
            handler,
            started_at: SystemTime::now(),
        }
    }

    #[instrument(skip(self, req), fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        match req.uri().path() {
            "/health" => self.handle_health_request(req).await,
            "/" | "/callback" => self.handle_callback_request(req).await,
            _ => Ok(plain_response(StatusCode::NOT_FOUND, "Not Found")),
        }
    }
}

pub(crate) fn plain_response(status: StatusCode, text: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response
}

pub(crate) fn method_not_allowed(allow: &'static str) -> Response<Body> {
    let mut response = plain_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    response
        .headers_mut()
        .insert(hyper::header::ALLOW, hyper::header::HeaderValue::from_static(allow));
    response
}

/// Converts a rendered callback outcome into a hyper response
pub(crate) fn into_http(response: CallbackResponse) -> Response<Body> {
    let mut builder = Response::builder().status(response.status_code);
    for (name, value) in response.all_headers() {
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            error!("Failed to build HTTP response: {}", e);
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        })
}
