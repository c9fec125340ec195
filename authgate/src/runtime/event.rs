use crate::common::{CallbackRequest, CallbackResponse};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP event delivered by a function URL or API Gateway (payload v1 and v2)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEvent {
    /// v2 only
    pub raw_query_string: Option<String>,

    pub query_string_parameters: Option<HashMap<String, String>>,

    pub headers: Option<HashMap<String, String>>,

    pub body: Option<String>,

    #[serde(default)]
    pub is_base64_encoded: bool,

    /// v1 only
    pub http_method: Option<String>,

    pub request_context: Option<RequestContext>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub http: Option<HttpDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpDescription {
    pub method: Option<String>,
}

impl HttpEvent {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }

    pub fn method(&self) -> &str {
        self.request_context
            .as_ref()
            .and_then(|ctx| ctx.http.as_ref())
            .and_then(|http| http.method.as_deref())
            .or(self.http_method.as_deref())
            .unwrap_or("GET")
    }

    /// Request id assigned by the HTTP front door, when present
    pub fn source_request_id(&self) -> Option<&str> {
        self.request_context
            .as_ref()
            .and_then(|ctx| ctx.request_id.as_deref())
    }

    /// Build the callback request from query string, form body and Accept header
    pub fn callback_request(&self) -> Result<CallbackRequest> {
        let mut request = match (&self.raw_query_string, &self.query_string_parameters) {
            (Some(raw), _) if !raw.is_empty() => CallbackRequest::from_query(raw),
            (_, Some(params)) => {
                let mut request = CallbackRequest::default();
                request.code = params.get("code").cloned();
                request.error = params.get("error").cloned();
                request.error_description = params.get("error_description").cloned();
                request.state = params.get("state").cloned();
                request
            }
            _ => CallbackRequest::default(),
        };

        let is_form = self
            .header("content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if let Some(body) = self.body.as_ref().filter(|_| is_form) {
            let decoded = if self.is_base64_encoded {
                let bytes = STANDARD
                    .decode(body)
                    .context("event body is not valid base64")?;
                String::from_utf8(bytes).context("event body is not valid UTF-8")?
            } else {
                body.clone()
            };
            request.merge_form(&decoded);
        }

        Ok(request.with_accept(self.header("accept").map(str::to_string)))
    }
}

/// Response shape understood by function URLs and API Gateway proxy integrations
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEventResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl From<CallbackResponse> for HttpEventResponse {
    fn from(response: CallbackResponse) -> Self {
        let headers = response
            .all_headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self {
            status_code: response.status_code,
            headers,
            body: response.body,
            is_base64_encoded: false,
        }
    }
}
