use crate::common::{DownloadGrant, FederatedCredentials, IdentityToken};
use crate::handler::error::CallbackResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::client::HttpConnector;
use hyper::Client;
use hyper_tls::HttpsConnector;

pub mod federation;
pub mod oauth;
pub mod s3;
pub mod sigv4;

pub use federation::IdentityPoolFederator;
pub use oauth::UserPoolTokenExchanger;
pub use s3::S3UrlSigner;

/// HTTP(S) client shared by every collaborator
pub type HttpsClient = Client<HttpsConnector<HttpConnector>>;

pub fn https_client() -> HttpsClient {
    Client::builder().build::<_, hyper::Body>(HttpsConnector::new())
}

/// Exchanges an authorization code for an identity token
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, code: &str) -> CallbackResult<IdentityToken>;
}

/// Trades an identity token for temporary AWS credentials
#[async_trait]
pub trait CredentialFederator: Send + Sync {
    async fn federate(
        &self,
        token: &IdentityToken,
        session_name: &str,
    ) -> CallbackResult<FederatedCredentials>;
}

/// What to sign and for how long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub object_key: String,
    pub expiry_seconds: u64,
    pub issued_at: DateTime<Utc>,
}

/// Issues a signed, time-limited URL for an object
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign(
        &self,
        credentials: &FederatedCredentials,
        request: &SignRequest,
    ) -> CallbackResult<DownloadGrant>;
}
