use anyhow::{anyhow, Context, Result};
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::handler::{CallbackHandler, InvocationContext};
use event::{HttpEvent, HttpEventResponse};

pub mod event;

const RUNTIME_API_VERSION: &str = "2018-06-01";

/// One unit of work handed out by the Runtime API
#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    /// Epoch milliseconds after which the platform stops the invocation
    pub deadline_ms: Option<u64>,
    pub payload: Bytes,
}

impl Invocation {
    /// Deadline translated onto the tokio clock
    pub fn deadline(&self) -> Option<Instant> {
        let deadline_ms = self.deadline_ms?;
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_millis() as u64;
        Some(Instant::now() + Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
    }
}

/// Problems that are reported to the platform instead of being rendered
#[derive(Error, Debug)]
pub enum InvocationFault {
    #[error("Invalid event: {message}")]
    InvalidEvent { message: String },

    #[error("Handler task failed: {message}")]
    Handler { message: String },
}

impl InvocationFault {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidEvent { .. } => "Runtime.InvalidEvent",
            Self::Handler { .. } => "Runtime.HandlerFault",
        }
    }
}

/// Client for the Lambda Runtime API
#[derive(Clone)]
pub struct RuntimeClient {
    http_client: Client<HttpConnector>,
    base_url: String,
}

impl RuntimeClient {
    pub fn new(api_address: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: format!("http://{}/{}/runtime", api_address, RUNTIME_API_VERSION),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_address = std::env::var("AWS_LAMBDA_RUNTIME_API")
            .context("AWS_LAMBDA_RUNTIME_API is not set; use `serve` outside Lambda")?;
        Ok(Self::new(&api_address))
    }

    /// Long-polls until the platform hands out the next invocation
    pub async fn next_invocation(&self) -> Result<Invocation> {
        let uri = format!("{}/invocation/next", self.base_url);
        let response = self
            .http_client
            .get(uri.parse()?)
            .await
            .context("Failed to fetch next invocation")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Runtime API returned {} for next invocation",
                response.status()
            ));
        }

        let request_id = response
            .headers()
            .get("lambda-runtime-aws-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invocation is missing its request id"))?;
        let deadline_ms = response
            .headers()
            .get("lambda-runtime-deadline-ms")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let payload = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read invocation payload")?;

        Ok(Invocation {
            request_id,
            deadline_ms,
            payload,
        })
    }

    pub async fn post_response(&self, request_id: &str, response: &HttpEventResponse) -> Result<()> {
        let body = serde_json::to_string(response)?;
        self.post(&format!("invocation/{}/response", request_id), body, None)
            .await
    }

    pub async fn post_error(&self, request_id: &str, fault: &InvocationFault) -> Result<()> {
        self.post(
            &format!("invocation/{}/error", request_id),
            error_body(fault.error_type(), &fault.to_string()),
            Some(fault.error_type()),
        )
        .await
    }

    /// Reports a startup failure; the platform fails the cold start
    pub async fn post_init_error(&self, error_type: &str, message: &str) -> Result<()> {
        self.post("init/error", error_body(error_type, message), Some(error_type))
            .await
    }

    async fn post(&self, path: &str, body: String, error_type: Option<&str>) -> Result<()> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/{}", self.base_url, path))
            .header("content-type", "application/json");
        if let Some(error_type) = error_type {
            builder = builder.header("Lambda-Runtime-Function-Error-Type", error_type);
        }

        let response = self
            .http_client
            .request(builder.body(Body::from(body))?)
            .await
            .with_context(|| format!("Failed to post to {}", path))?;

        if !response.status().is_success() {
            return Err(anyhow!("Runtime API returned {} for {}", response.status(), path));
        }
        Ok(())
    }
}

fn error_body(error_type: &str, message: &str) -> String {
    json!({
        "errorMessage": message,
        "errorType": error_type,
    })
    .to_string()
}

/// Processes invocations one at a time until the Runtime API goes away
pub async fn run(client: RuntimeClient, handler: CallbackHandler) -> Result<()> {
    info!(
        environment = %handler.config().environment,
        "Lambda runtime ready, waiting for invocations"
    );

    loop {
        let invocation = client.next_invocation().await?;
        if let Err(e) = process_invocation(&client, &handler, invocation).await {
            error!("Failed to report invocation result: {:#}", e);
        }
    }
}

#[instrument(skip_all, fields(request_id = %invocation.request_id))]
async fn process_invocation(
    client: &RuntimeClient,
    handler: &CallbackHandler,
    invocation: Invocation,
) -> Result<()> {
    match respond(handler, &invocation).await {
        Ok(response) => client.post_response(&invocation.request_id, &response).await,
        Err(fault) => {
            warn!(error_type = fault.error_type(), "Invocation fault: {}", fault);
            client.post_error(&invocation.request_id, &fault).await
        }
    }
}

async fn respond(
    handler: &CallbackHandler,
    invocation: &Invocation,
) -> Result<HttpEventResponse, InvocationFault> {
    let event: HttpEvent =
        serde_json::from_slice(&invocation.payload).map_err(|e| InvocationFault::InvalidEvent {
            message: e.to_string(),
        })?;
    debug!(
        method = event.method(),
        source_request_id = event.source_request_id().unwrap_or("-"),
        "Decoded HTTP event"
    );

    let request = event
        .callback_request()
        .map_err(|e| InvocationFault::InvalidEvent {
            message: format!("{:#}", e),
        })?;

    let ctx = InvocationContext::new(invocation.request_id.clone(), invocation.deadline());
    let handler = handler.clone();
    let response = tokio::spawn(async move { handler.handle(request, &ctx).await })
        .await
        .map_err(|e| InvocationFault::Handler {
            message: e.to_string(),
        })?;

    Ok(response.into())
}
