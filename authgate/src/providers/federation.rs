use super::{CredentialFederator, HttpsClient};
use crate::common::config::FederationConfig;
use crate::common::{FederatedCredentials, IdentityToken};
use crate::handler::error::{CallbackError, CallbackResult};
use async_trait::async_trait;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, Utc};
use hyper::{Body, Method, Request};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const GET_ID_TARGET: &str = "AWSCognitoIdentityService.GetId";
const GET_OPEN_ID_TOKEN_TARGET: &str = "AWSCognitoIdentityService.GetOpenIdToken";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdRequest<'a> {
    identity_pool_id: &'a str,
    logins: HashMap<&'a str, &'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdResponse {
    identity_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetOpenIdTokenRequest<'a> {
    identity_id: &'a str,
    logins: HashMap<&'a str, &'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetOpenIdTokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Basic (two-step) identity pool flow: the pool vouches for the user pool
/// token with its own OpenID token, which STS trades for role credentials.
pub struct IdentityPoolFederator {
    http_client: HttpsClient,
    sts_client: StsClient,
    config: FederationConfig,
    session_duration_secs: u64,
}

impl IdentityPoolFederator {
    pub fn new(
        http_client: HttpsClient,
        sts_client: StsClient,
        config: FederationConfig,
        session_duration_secs: u64,
    ) -> Self {
        Self {
            http_client,
            sts_client,
            config,
            session_duration_secs,
        }
    }

    fn logins<'a>(&'a self, token: &'a IdentityToken) -> HashMap<&'a str, &'a str> {
        HashMap::from([(self.config.provider_name.as_str(), token.as_str())])
    }

    async fn call_identity_service<Req, Resp>(&self, target: &str, payload: &Req) -> CallbackResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload)
            .map_err(|e| CallbackError::federation(format!("cannot encode {}: {}", target, e)))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.config.identity_endpoint())
            .header("content-type", "application/x-amz-json-1.1")
            .header("x-amz-target", target)
            .body(Body::from(body))
            .map_err(|e| CallbackError::federation(format!("invalid {} request: {}", target, e)))?;

        let response = self.http_client.request(request).await.map_err(|e| {
            warn!("Identity pool unreachable: {}", e);
            CallbackError::federation(format!("identity pool unreachable: {}", e))
        })?;

        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| CallbackError::federation(format!("{} response interrupted: {}", target, e)))?;

        debug!("{} answered {}", target, status);
        parse_service_response(target, status.is_success(), &bytes)
    }

    async fn open_id_token(&self, token: &IdentityToken) -> CallbackResult<String> {
        let get_id = GetIdRequest {
            identity_pool_id: &self.config.identity_pool_id,
            logins: self.logins(token),
        };
        let identity: GetIdResponse = self.call_identity_service(GET_ID_TARGET, &get_id).await?;

        let get_token = GetOpenIdTokenRequest {
            identity_id: &identity.identity_id,
            logins: self.logins(token),
        };
        let open_id: GetOpenIdTokenResponse = self
            .call_identity_service(GET_OPEN_ID_TOKEN_TARGET, &get_token)
            .await?;

        info!("Resolved identity {}", identity.identity_id);
        Ok(open_id.token)
    }

    async fn assume_role(
        &self,
        open_id_token: String,
        session_name: &str,
    ) -> CallbackResult<FederatedCredentials> {
        let duration = i32::try_from(self.session_duration_secs).unwrap_or(i32::MAX);

        let output = self
            .sts_client
            .assume_role_with_web_identity()
            .role_arn(&self.config.role_arn)
            .role_session_name(session_name)
            .web_identity_token(open_id_token)
            .duration_seconds(duration)
            .send()
            .await
            .map_err(|e| {
                CallbackError::federation(format!(
                    "AssumeRoleWithWebIdentity failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let credentials = output
            .credentials()
            .ok_or_else(|| CallbackError::federation("STS returned no credentials"))?;

        let expiration = credentials.expiration();
        let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| CallbackError::federation("STS returned an invalid expiration"))?;

        Ok(FederatedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

/// Decode an identity-service answer or turn its error body into a federation failure
fn parse_service_response<T: DeserializeOwned>(
    target: &str,
    success: bool,
    body: &[u8],
) -> CallbackResult<T> {
    if success {
        return serde_json::from_slice(body).map_err(|e| {
            CallbackError::federation(format!("unreadable {} response: {}", target, e))
        });
    }

    let reason = match serde_json::from_slice::<ServiceErrorBody>(body) {
        Ok(err) => {
            let kind = err
                .error_type
                .as_deref()
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
                .unwrap_or_else(|| "UnknownError".to_string());
            match err.message {
                Some(message) => format!("{}: {}", kind, message),
                None => kind,
            }
        }
        Err(_) => "unrecognised error response".to_string(),
    };
    Err(CallbackError::federation(format!("{} rejected: {}", target, reason)))
}

/// STS session names allow `[\w+=,.@-]` and at most 64 characters
pub fn session_name(request_id: &str) -> String {
    let cleaned: String = request_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "+=,.@-_".contains(*c))
        .collect();
    let mut name = format!("authgate-{}", cleaned);
    name.truncate(64);
    name
}

#[async_trait]
impl CredentialFederator for IdentityPoolFederator {
    async fn federate(
        &self,
        token: &IdentityToken,
        session_name: &str,
    ) -> CallbackResult<FederatedCredentials> {
        let open_id_token = self.open_id_token(token).await?;
        self.assume_role(open_id_token, session_name).await
    }
}
