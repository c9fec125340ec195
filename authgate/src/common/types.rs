use chrono::{DateTime, Utc};
use std::fmt;

/// Query parameters delivered by the identity provider's redirect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackRequest {
    /// Authorization code (opaque, single-use)
    pub code: Option<String>,

    /// Error signalled by the identity provider
    pub error: Option<String>,

    /// Human readable detail accompanying `error`
    pub error_description: Option<String>,

    /// Opaque state value echoed back by the provider
    pub state: Option<String>,

    /// Value of the Accept header, used for content negotiation
    pub accept: Option<String>,
}

impl CallbackRequest {
    /// Build a request from a raw `application/x-www-form-urlencoded` query string
    pub fn from_query(query: &str) -> Self {
        let mut request = Self::default();
        request.merge_form(query);
        request
    }

    /// Fill in parameters from a form-encoded string. Values already present win.
    pub fn merge_form(&mut self, form: &str) {
        let pairs = form_urlencoded::parse(form.trim_start_matches('?').as_bytes()).into_owned();
        for (name, value) in pairs {
            let slot = match name.as_str() {
                "code" => &mut self.code,
                "error" => &mut self.error,
                "error_description" => &mut self.error_description,
                "state" => &mut self.state,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
    }

    pub fn with_accept(mut self, accept: Option<String>) -> Self {
        self.accept = accept;
        self
    }

    pub fn response_format(&self) -> ResponseFormat {
        ResponseFormat::negotiate(self.accept.as_deref())
    }
}

/// OIDC ID token returned by the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken(pub String);

impl IdentityToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityToken(<redacted>)")
    }
}

/// Temporary AWS credentials obtained through the identity pool
#[derive(Clone, PartialEq, Eq)]
pub struct FederatedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for FederatedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// A signed, time-limited link to one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadGrant {
    pub url: String,
    pub object_key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Html,
    Json,
}

impl ResponseFormat {
    /// Pick JSON when the client ranks `application/json` above `text/html`
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return ResponseFormat::Html;
        };

        let mut json_q: Option<f32> = None;
        let mut html_q: Option<f32> = None;

        for entry in accept.split(',') {
            let mut parts = entry.split(';').map(str::trim);
            let media = parts.next().unwrap_or("").to_ascii_lowercase();
            let q = parts
                .find_map(|p| p.strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);

            match media.as_str() {
                "application/json" => json_q = Some(json_q.map_or(q, |v| v.max(q))),
                "text/html" => html_q = Some(html_q.map_or(q, |v| v.max(q))),
                _ => {}
            }
        }

        match (json_q, html_q) {
            (Some(j), Some(h)) if j > h => ResponseFormat::Json,
            (Some(j), None) if j > 0.0 => ResponseFormat::Json,
            _ => ResponseFormat::Html,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Html => "text/html; charset=utf-8",
            ResponseFormat::Json => "application/json",
        }
    }
}

/// Transport-neutral response produced by the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status_code: u16,
    pub content_type: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CallbackResponse {
    pub fn new(status_code: u16, format: ResponseFormat, body: String) -> Self {
        Self {
            status_code,
            content_type: format.content_type(),
            headers: vec![("cache-control".to_string(), "no-store".to_string())],
            body,
        }
    }

    /// All headers including content type
    pub fn all_headers(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        std::iter::once(("content-type", self.content_type))
            .chain(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}
