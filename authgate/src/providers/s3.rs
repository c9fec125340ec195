use super::sigv4::{self, PresignRequest, SigningCredentials};
use super::{HttpsClient, SignRequest, UrlSigner};
use crate::common::config::StoreConfig;
use crate::common::{DownloadGrant, FederatedCredentials};
use crate::handler::error::{CallbackError, CallbackResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hyper::{Body, Method, Request, StatusCode};
use tracing::{debug, warn};

/// Validity of the presigned HEAD used to probe the object
const PROBE_EXPIRY_SECONDS: u64 = 60;

/// Where the object lives, in the form SigV4 needs
#[derive(Debug, Clone, PartialEq, Eq)]
struct ObjectLocation {
    scheme: String,
    host: String,
    path: String,
}

/// Issues presigned S3 GET links with the caller's federated credentials
pub struct S3UrlSigner {
    http_client: HttpsClient,
    store: StoreConfig,
}

impl S3UrlSigner {
    pub fn new(http_client: HttpsClient, store: StoreConfig) -> Self {
        Self { http_client, store }
    }

    /// Virtual-hosted style unless the bucket name has dots or a custom endpoint is set
    fn locate(&self, object_key: &str) -> ObjectLocation {
        let key = sigv4::encode_path(object_key.trim_start_matches('/'));

        if let Some(endpoint) = &self.store.endpoint {
            let (scheme, host) = match endpoint.split_once("://") {
                Some((scheme, rest)) => (scheme.to_string(), rest.trim_end_matches('/').to_string()),
                None => ("https".to_string(), endpoint.trim_end_matches('/').to_string()),
            };
            return ObjectLocation {
                scheme,
                host,
                path: format!("/{}/{}", sigv4::uri_encode(&self.store.bucket), key),
            };
        }

        let regional_host = if self.store.region == "us-east-1" {
            "s3.amazonaws.com".to_string()
        } else {
            format!("s3.{}.amazonaws.com", self.store.region)
        };

        if self.store.bucket.contains('.') {
            ObjectLocation {
                scheme: "https".to_string(),
                host: regional_host,
                path: format!("/{}/{}", sigv4::uri_encode(&self.store.bucket), key),
            }
        } else {
            ObjectLocation {
                scheme: "https".to_string(),
                host: format!("{}.{}", self.store.bucket, regional_host),
                path: format!("/{}", key),
            }
        }
    }

    fn presign(
        &self,
        method: &Method,
        credentials: &FederatedCredentials,
        object_key: &str,
        issued_at: DateTime<Utc>,
        expires_in: u64,
    ) -> CallbackResult<String> {
        let location = self.locate(object_key);

        let mut extra_query = Vec::new();
        if *method == Method::GET {
            if let Some(filename) = &self.store.download_filename {
                extra_query.push((
                    "response-content-disposition".to_string(),
                    content_disposition(filename),
                ));
            }
        }

        let request = PresignRequest {
            method: method.as_str(),
            scheme: &location.scheme,
            host: &location.host,
            path: &location.path,
            region: &self.store.region,
            service: "s3",
            issued_at,
            expires_in,
            extra_query,
        };
        let signing_credentials = SigningCredentials {
            access_key_id: &credentials.access_key_id,
            secret_access_key: &credentials.secret_access_key,
            session_token: Some(credentials.session_token.as_str()),
        };

        sigv4::presign(&request, &signing_credentials)
            .map_err(|e| CallbackError::store_denied(format!("invalid signing key: {}", e)))
    }

    /// Confirm the object exists and is readable before handing out a link
    async fn probe(&self, url: &str, object_key: &str) -> CallbackResult<()> {
        let request = Request::builder()
            .method(Method::HEAD)
            .uri(url)
            .body(Body::empty())
            .map_err(|e| CallbackError::store_unavailable(format!("invalid probe request: {}", e)))?;

        match self.http_client.request(request).await {
            Ok(response) => {
                let status = response.status();
                debug!("Object probe returned {}", status);
                classify_head_status(status, object_key)
            }
            Err(e) => {
                warn!("Object probe failed: {}", e);
                Err(CallbackError::store_unavailable(e.to_string()))
            }
        }
    }
}

/// Map the HEAD probe status onto the signing failure taxonomy
fn classify_head_status(status: StatusCode, object_key: &str) -> CallbackResult<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(CallbackError::object_not_found(object_key))
    } else if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        Err(CallbackError::store_denied(format!("probe returned {}", status)))
    } else {
        Err(CallbackError::store_unavailable(format!(
            "probe returned {}",
            status
        )))
    }
}

fn content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{}\"", sanitized)
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    async fn sign(
        &self,
        credentials: &FederatedCredentials,
        request: &SignRequest,
    ) -> CallbackResult<DownloadGrant> {
        if self.store.verify_object {
            let probe_url = self.presign(
                &Method::HEAD,
                credentials,
                &request.object_key,
                request.issued_at,
                PROBE_EXPIRY_SECONDS,
            )?;
            self.probe(&probe_url, &request.object_key).await?;
        }

        let url = self.presign(
            &Method::GET,
            credentials,
            &request.object_key,
            request.issued_at,
            request.expiry_seconds,
        )?;

        let validity = i64::try_from(request.expiry_seconds)
            .map_err(|_| CallbackError::store_denied("expiry does not fit a timestamp"))?;

        Ok(DownloadGrant {
            url,
            object_key: request.object_key.clone(),
            expires_at: request.issued_at + Duration::seconds(validity),
        })
    }
}
