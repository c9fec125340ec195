use super::error::{CallbackError, CallbackResult};
use super::CallbackHandler;
use crate::common::config::test_config;
use crate::common::{DownloadGrant, FederatedCredentials, IdentityToken};
use crate::providers::{CredentialFederator, SignRequest, TokenExchanger, UrlSigner};
use async_trait::async_trait;
use std::sync::Arc;

/// Collaborator that refuses every call, for exercising the hosting surfaces
pub(crate) struct Offline;

#[async_trait]
impl TokenExchanger for Offline {
    async fn exchange(&self, _code: &str) -> CallbackResult<IdentityToken> {
        Err(CallbackError::auth_exchange("offline"))
    }
}

#[async_trait]
impl CredentialFederator for Offline {
    async fn federate(
        &self,
        _token: &IdentityToken,
        _session_name: &str,
    ) -> CallbackResult<FederatedCredentials> {
        Err(CallbackError::federation("offline"))
    }
}

#[async_trait]
impl UrlSigner for Offline {
    async fn sign(
        &self,
        _credentials: &FederatedCredentials,
        _request: &SignRequest,
    ) -> CallbackResult<DownloadGrant> {
        Err(CallbackError::store_unavailable("offline"))
    }
}

pub(crate) fn offline_handler() -> CallbackHandler {
    let offline = Arc::new(Offline);
    CallbackHandler::new(test_config(), offline.clone(), offline.clone(), offline)
}
