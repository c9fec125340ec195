use super::{HttpsClient, TokenExchanger};
use crate::common::config::OAuthConfig;
use crate::common::IdentityToken;
use crate::handler::error::{CallbackError, CallbackResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::{Body, Method, Request, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Authorization-code exchange against the user pool's token endpoint
pub struct UserPoolTokenExchanger {
    http_client: HttpsClient,
    config: OAuthConfig,
}

impl UserPoolTokenExchanger {
    pub fn new(http_client: HttpsClient, config: OAuthConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn form_body(&self, code: &str) -> String {
        let mut fields = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        fields.sort_by_key(|(name, _)| *name);
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish()
    }

    /// HTTP Basic credentials, only when the app client has a secret
    fn authorization_header(&self) -> Option<String> {
        self.config.client_secret.as_ref().map(|secret| {
            let pair = format!("{}:{}", self.config.client_id, secret);
            format!("Basic {}", STANDARD.encode(pair))
        })
    }

    fn build_request(&self, code: &str) -> CallbackResult<Request<Body>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.config.token_endpoint())
            .header("content-type", "application/x-www-form-urlencoded")
            .header("accept", "application/json");

        if let Some(authorization) = self.authorization_header() {
            builder = builder.header("authorization", authorization);
        }

        builder
            .body(Body::from(self.form_body(code)))
            .map_err(|e| CallbackError::auth_exchange(format!("invalid token request: {}", e)))
    }
}

/// Interpret the token endpoint's answer
fn parse_token_response(status: StatusCode, body: &[u8]) -> CallbackResult<IdentityToken> {
    if status.is_success() {
        let response: TokenResponse = serde_json::from_slice(body).map_err(|e| {
            CallbackError::auth_exchange(format!("unreadable token response: {}", e))
        })?;
        return response
            .id_token
            .filter(|token| !token.is_empty())
            .map(IdentityToken)
            .ok_or_else(|| {
                CallbackError::auth_exchange("token response has no id_token (is the openid scope enabled?)")
            });
    }

    let reason = match serde_json::from_slice::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error: Some(error),
            error_description,
        }) => match error_description {
            Some(description) => format!("{} ({}): {}", error, status, description),
            None => format!("{} ({})", error, status),
        },
        _ => format!("token endpoint returned {}", status),
    };
    Err(CallbackError::auth_exchange(reason))
}

#[async_trait]
impl TokenExchanger for UserPoolTokenExchanger {
    async fn exchange(&self, code: &str) -> CallbackResult<IdentityToken> {
        let request = self.build_request(code)?;

        let response = self.http_client.request(request).await.map_err(|e| {
            warn!("Token endpoint unreachable: {}", e);
            CallbackError::auth_exchange(format!("token endpoint unreachable: {}", e))
        })?;

        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| CallbackError::auth_exchange(format!("token response interrupted: {}", e)))?;

        debug!("Token endpoint answered {}", status);
        parse_token_response(status, &body)
    }
}
