use crate::common::config::HandlerConfig;
use crate::common::{CallbackRequest, CallbackResponse, DownloadGrant, FederatedCredentials, IdentityToken};
use crate::providers::federation::session_name;
use crate::providers::{
    https_client, CredentialFederator, IdentityPoolFederator, S3UrlSigner, SignRequest,
    TokenExchanger, UrlSigner, UserPoolTokenExchanger,
};
use aws_config::meta::region::RegionProviderChain;
use aws_config::Region;
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use error::{CallbackError, CallbackResult, StageKind};

pub mod error;
pub mod render;

/// Per-invocation data supplied by the hosting surface
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: String,
    /// Point after which the invocation is abandoned
    pub deadline: Option<Instant>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>, deadline: Option<Instant>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Position in the code → token → credentials → link exchange
enum Stage {
    Received(CallbackRequest),
    CodeValidated(String),
    Exchanged(IdentityToken),
    Federated(FederatedCredentials),
    Granted(DownloadGrant),
}

/// Handles one identity-provider redirect end to end
#[derive(Clone)]
pub struct CallbackHandler {
    config: Arc<HandlerConfig>,
    exchanger: Arc<dyn TokenExchanger>,
    federator: Arc<dyn CredentialFederator>,
    signer: Arc<dyn UrlSigner>,
}

impl CallbackHandler {
    pub fn new(
        config: HandlerConfig,
        exchanger: Arc<dyn TokenExchanger>,
        federator: Arc<dyn CredentialFederator>,
        signer: Arc<dyn UrlSigner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            exchanger,
            federator,
            signer,
        }
    }

    /// Wire the handler to the user pool, identity pool and S3
    pub async fn from_config(config: HandlerConfig) -> Self {
        let region_provider =
            RegionProviderChain::first_try(Region::new(config.federation.region.clone()))
                .or_default_provider();
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let http_client = https_client();
        let sts_client = StsClient::new(&sdk_config);

        let exchanger = Arc::new(UserPoolTokenExchanger::new(
            http_client.clone(),
            config.oauth.clone(),
        ));
        let federator = Arc::new(IdentityPoolFederator::new(
            http_client.clone(),
            sts_client,
            config.federation.clone(),
            config.session_duration_secs(),
        ));
        let signer = Arc::new(S3UrlSigner::new(http_client, config.store.clone()));

        Self::new(config, exchanger, federator, signer)
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub async fn handle(&self, request: CallbackRequest, ctx: &InvocationContext) -> CallbackResponse {
        self.handle_at(request, ctx, Utc::now()).await
    }

    /// Same as [`handle`](Self::handle) with an explicit invocation time
    pub async fn handle_at(
        &self,
        request: CallbackRequest,
        ctx: &InvocationContext,
        issued_at: DateTime<Utc>,
    ) -> CallbackResponse {
        let started = Instant::now();
        let format = request.response_format();

        let result = self.run(request, ctx, issued_at).await;
        let response = match &result {
            Ok(grant) => render::grant(grant, format),
            Err(e) => render::failure(e, format),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let (outcome, timed_out) = classify(&result);
        match &result {
            Ok(grant) => info!(
                request_id = %ctx.request_id,
                outcome,
                status = response.status_code,
                timed_out,
                latency_ms,
                environment = %self.config.environment,
                object_key = %grant.object_key,
                "Callback handled"
            ),
            Err(e) => warn!(
                request_id = %ctx.request_id,
                outcome,
                status = response.status_code,
                timed_out,
                latency_ms,
                environment = %self.config.environment,
                error = %e,
                "Callback failed"
            ),
        }

        response
    }

    /// Drive the stages in order; every failure is terminal
    async fn run(
        &self,
        request: CallbackRequest,
        ctx: &InvocationContext,
        issued_at: DateTime<Utc>,
    ) -> CallbackResult<DownloadGrant> {
        let mut stage = Stage::Received(request);
        loop {
            stage = match stage {
                Stage::Received(request) => Stage::CodeValidated(validate(request)?),
                Stage::CodeValidated(code) => {
                    let token = self
                        .within_deadline(StageKind::Exchange, ctx, self.exchanger.exchange(&code))
                        .await?;
                    Stage::Exchanged(token)
                }
                Stage::Exchanged(token) => {
                    let session = session_name(&ctx.request_id);
                    let credentials = self
                        .within_deadline(
                            StageKind::Federation,
                            ctx,
                            self.federator.federate(&token, &session),
                        )
                        .await?;
                    Stage::Federated(credentials)
                }
                Stage::Federated(credentials) => {
                    Stage::Granted(self.sign_with_retry(&credentials, ctx, issued_at).await?)
                }
                Stage::Granted(grant) => return Ok(grant),
            };
        }
    }

    async fn sign_with_retry(
        &self,
        credentials: &FederatedCredentials,
        ctx: &InvocationContext,
        issued_at: DateTime<Utc>,
    ) -> CallbackResult<DownloadGrant> {
        let request = SignRequest {
            object_key: self.config.store.object_key.clone(),
            expiry_seconds: self.config.store.expiry_seconds,
            issued_at,
        };

        let first = self
            .within_deadline(StageKind::Signing, ctx, self.signer.sign(credentials, &request))
            .await;

        match first {
            Err(e) if e.is_retryable() => {
                let backoff = self.config.timeouts.signing_retry_backoff();
                // Not enough time left to wait; report the store failure itself
                if ctx.remaining().is_some_and(|left| left <= backoff) {
                    return Err(e);
                }

                warn!(
                    request_id = %ctx.request_id,
                    "Signing failed ({}), retrying once in {:?}", e, backoff
                );
                tokio::time::sleep(backoff).await;

                self.within_deadline(StageKind::Signing, ctx, self.signer.sign(credentials, &request))
                    .await
            }
            other => other,
        }
    }

    /// Run a downstream call bounded by the stage timeout and the invocation deadline
    async fn within_deadline<T, F>(
        &self,
        stage: StageKind,
        ctx: &InvocationContext,
        call: F,
    ) -> CallbackResult<T>
    where
        F: Future<Output = CallbackResult<T>>,
    {
        let stage_timeout = self.config.timeouts.stage_timeout();
        let budget = ctx
            .remaining()
            .map_or(stage_timeout, |left| left.min(stage_timeout));

        if budget.is_zero() {
            return Err(CallbackError::timeout(stage));
        }

        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(CallbackError::timeout(stage)),
        }
    }
}

/// Received → ProviderError | MalformedRequest | CodeValidated
fn validate(request: CallbackRequest) -> CallbackResult<String> {
    if let Some(error) = request.error {
        return Err(CallbackError::provider(error, request.error_description));
    }

    match request.code {
        Some(code) if !code.trim().is_empty() => Ok(code),
        _ => Err(CallbackError::MalformedRequest),
    }
}

/// Outcome label for the invocation log line; timeouts count against their stage
fn classify(result: &CallbackResult<DownloadGrant>) -> (&'static str, bool) {
    match result {
        Ok(_) => ("success", false),
        Err(CallbackError::MalformedRequest) => ("malformed-request", false),
        Err(CallbackError::Provider { .. }) => ("provider-error", false),
        Err(CallbackError::AuthExchange { .. }) => ("auth-error", false),
        Err(CallbackError::Federation { .. }) => ("federation-error", false),
        Err(CallbackError::Signing(_)) => ("signing-error", false),
        Err(CallbackError::Timeout { stage }) => match stage {
            StageKind::Exchange => ("auth-error", true),
            StageKind::Federation => ("federation-error", true),
            StageKind::Signing => ("signing-error", true),
        },
    }
}

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;
