use super::*;
use crate::common::config::test_config;
use crate::common::ResponseFormat;
use async_trait::async_trait;
use chrono::TimeZone;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Calls {
    exchange: AtomicUsize,
    federate: AtomicUsize,
    sign: AtomicUsize,
    sign_times: Mutex<Vec<Instant>>,
}

impl Calls {
    fn counts(&self) -> (usize, usize, usize) {
        (
            self.exchange.load(Ordering::SeqCst),
            self.federate.load(Ordering::SeqCst),
            self.sign.load(Ordering::SeqCst),
        )
    }
}

struct FakeExchanger {
    calls: Arc<Calls>,
    reject: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange(&self, code: &str) -> CallbackResult<IdentityToken> {
        self.calls.exchange.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(CallbackError::auth_exchange("invalid_grant (400)"));
        }
        Ok(IdentityToken(format!("id-token-{}", code)))
    }
}

struct FakeFederator {
    calls: Arc<Calls>,
    reject: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl CredentialFederator for FakeFederator {
    async fn federate(
        &self,
        token: &IdentityToken,
        session_name: &str,
    ) -> CallbackResult<FederatedCredentials> {
        self.calls.federate.fetch_add(1, Ordering::SeqCst);
        assert!(session_name.starts_with("authgate-"));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(CallbackError::federation("NotAuthorizedException: audience"));
        }
        // Yield so concurrent invocations interleave
        tokio::task::yield_now().await;
        Ok(FederatedCredentials {
            access_key_id: format!("AKID-{}", token.as_str()),
            secret_access_key: format!("secret-{}", token.as_str()),
            session_token: format!("session-{}", token.as_str()),
            expiration: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        })
    }
}

struct FakeSigner {
    calls: Arc<Calls>,
    failures: Mutex<VecDeque<CallbackError>>,
}

#[async_trait]
impl UrlSigner for FakeSigner {
    async fn sign(
        &self,
        credentials: &FederatedCredentials,
        request: &SignRequest,
    ) -> CallbackResult<DownloadGrant> {
        self.calls.sign.fetch_add(1, Ordering::SeqCst);
        self.calls.sign_times.lock().unwrap().push(Instant::now());
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(DownloadGrant {
            url: format!(
                "https://signed.example/{}?credential={}",
                request.object_key, credentials.access_key_id
            ),
            object_key: request.object_key.clone(),
            expires_at: request.issued_at
                + chrono::Duration::seconds(request.expiry_seconds as i64),
        })
    }
}

#[derive(Default)]
struct Setup {
    reject_code: bool,
    reject_federation: bool,
    exchange_delay: Option<Duration>,
    federation_delay: Option<Duration>,
    signing_failures: Vec<CallbackError>,
    real_signer: bool,
}

impl Setup {
    fn build(self) -> (CallbackHandler, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let mut config = test_config();
        config.timeouts.signing_retry_backoff_ms = 10;

        let signer: Arc<dyn UrlSigner> = if self.real_signer {
            let mut store = config.store.clone();
            store.verify_object = false;
            Arc::new(S3UrlSigner::new(https_client(), store))
        } else {
            Arc::new(FakeSigner {
                calls: calls.clone(),
                failures: Mutex::new(self.signing_failures.into_iter().collect()),
            })
        };

        let handler = CallbackHandler::new(
            config,
            Arc::new(FakeExchanger {
                calls: calls.clone(),
                reject: self.reject_code,
                delay: self.exchange_delay,
            }),
            Arc::new(FakeFederator {
                calls: calls.clone(),
                reject: self.reject_federation,
                delay: self.federation_delay,
            }),
            signer,
        );
        (handler, calls)
    }
}

fn json_request(query: &str) -> CallbackRequest {
    CallbackRequest::from_query(query).with_accept(Some("application/json".to_string()))
}

fn ctx(request_id: &str) -> InvocationContext {
    InvocationContext::new(request_id, None)
}

fn body_json(response: &CallbackResponse) -> serde_json::Value {
    serde_json::from_str(&response.body).unwrap()
}

#[tokio::test]
async fn test_provider_error_never_contacts_downstream() {
    let (handler, calls) = Setup::default().build();

    let started = std::time::Instant::now();
    let response = handler
        .handle(
            json_request("error=access_denied&error_description=User+cancelled"),
            &ctx("req-1"),
        )
        .await;

    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(calls.counts(), (0, 0, 0));
    assert_eq!(response.status_code, 400);
    let body = body_json(&response);
    assert_eq!(body["error"], "provider_error");
    assert_eq!(body["message"], "User cancelled");
}

#[tokio::test]
async fn test_error_takes_precedence_over_code() {
    let (handler, calls) = Setup::default().build();
    let response = handler
        .handle(json_request("code=abc&error=server_error"), &ctx("req-2"))
        .await;
    assert_eq!(response.status_code, 400);
    assert_eq!(calls.counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_missing_code_and_error_is_malformed() {
    let (handler, calls) = Setup::default().build();

    let first = handler.handle(json_request("state=xyz"), &ctx("req-3")).await;
    let second = handler.handle(json_request("state=xyz"), &ctx("req-3")).await;
    let empty_code = handler.handle(json_request("code=%20"), &ctx("req-3")).await;

    assert_eq!(first, second);
    assert_eq!(first.status_code, 400);
    assert_eq!(body_json(&first)["error"], "malformed_request");
    assert_eq!(body_json(&empty_code)["error"], "malformed_request");
    assert_eq!(calls.counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_success_expiry_matches_invocation_time() {
    let (handler, calls) = Setup {
        real_signer: true,
        ..Default::default()
    }
    .build();
    let issued_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();

    let response = handler
        .handle_at(json_request("code=good-code"), &ctx("req-4"), issued_at)
        .await;

    assert_eq!(response.status_code, 200);
    let body = body_json(&response);
    assert_eq!(body["expiresAt"], "2024-06-01T08:45:00Z");
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("https://downloads-bucket.s3.amazonaws.com/releases/app.zip?"));
    assert!(url.contains("X-Amz-Expires=900"));
    assert!(url.contains("AKID-id-token-good-code"));
    assert_eq!(calls.counts(), (1, 1, 0));
}

#[tokio::test]
async fn test_success_defaults_to_html() {
    let (handler, _calls) = Setup::default().build();
    let response = handler
        .handle(CallbackRequest::from_query("code=abc"), &ctx("req-5"))
        .await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.content_type, ResponseFormat::Html.content_type());
    assert!(response.body.contains("signed.example"));
    assert!(response.body.contains("app.zip"));
}

#[tokio::test]
async fn test_rejected_code_skips_federation() {
    let (handler, calls) = Setup {
        reject_code: true,
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=used-code"), &ctx("req-6")).await;

    assert_eq!(response.status_code, 401);
    assert_eq!(body_json(&response)["error"], "auth_exchange_failed");
    assert_eq!(calls.counts(), (1, 0, 0));
}

#[tokio::test]
async fn test_federation_rejection_skips_signing() {
    let (handler, calls) = Setup {
        reject_federation: true,
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=abc"), &ctx("req-7")).await;

    assert_eq!(response.status_code, 403);
    assert_eq!(body_json(&response)["error"], "federation_failed");
    assert_eq!(calls.counts(), (1, 1, 0));
}

#[tokio::test]
async fn test_transient_signing_failure_retried_once() {
    let (handler, calls) = Setup {
        signing_failures: vec![CallbackError::store_unavailable("connection reset")],
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=abc"), &ctx("req-8")).await;

    assert_eq!(response.status_code, 200);
    assert_eq!(calls.counts(), (1, 1, 2));
}

#[tokio::test]
async fn test_persistent_signing_failure_surfaces_after_one_retry() {
    let (handler, calls) = Setup {
        signing_failures: vec![
            CallbackError::store_unavailable("connection reset"),
            CallbackError::store_unavailable("connection reset"),
            CallbackError::store_unavailable("connection reset"),
        ],
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=abc"), &ctx("req-9")).await;

    assert_eq!(response.status_code, 502);
    assert_eq!(body_json(&response)["error"], "store_unavailable");
    assert_eq!(calls.counts(), (1, 1, 2));
}

#[tokio::test]
async fn test_missing_object_not_retried() {
    let (handler, calls) = Setup {
        signing_failures: vec![CallbackError::object_not_found("releases/app.zip")],
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=abc"), &ctx("req-10")).await;

    assert_eq!(response.status_code, 404);
    assert_eq!(body_json(&response)["error"], "object_not_found");
    assert_eq!(calls.counts(), (1, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_signing_retry_waits_for_backoff() {
    let (handler, calls) = Setup {
        signing_failures: vec![CallbackError::store_unavailable("connection reset")],
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=abc"), &ctx("req-13")).await;

    assert_eq!(response.status_code, 200);
    let times = calls.sign_times.lock().unwrap().clone();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= handler.config().timeouts.signing_retry_backoff());
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_kept_when_deadline_leaves_no_room_to_retry() {
    let (handler, calls) = Setup {
        signing_failures: vec![CallbackError::store_unavailable("connection reset")],
        ..Default::default()
    }
    .build();
    // Backoff is 10ms, so there is no time for the second attempt
    let ctx = InvocationContext::new("req-14", Some(Instant::now() + Duration::from_millis(5)));

    let response = handler.handle(json_request("code=abc"), &ctx).await;

    assert_eq!(response.status_code, 502);
    assert_eq!(body_json(&response)["error"], "store_unavailable");
    assert_eq!(calls.counts(), (1, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_slow_federation_times_out_as_federation_error() {
    let (handler, calls) = Setup {
        federation_delay: Some(Duration::from_secs(60)),
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=abc"), &ctx("req-15")).await;
    assert_eq!(response.status_code, 504);
    assert_eq!(body_json(&response)["error"], "timeout");
    assert_eq!(calls.counts(), (1, 1, 0));

    let result = handler
        .run(json_request("code=abc"), &ctx("req-16"), Utc::now())
        .await;
    assert_eq!(result, Err(CallbackError::timeout(StageKind::Federation)));
    assert_eq!(classify(&result), ("federation-error", true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_invocations_do_not_share_results() {
    let (handler, calls) = Setup::default().build();

    let first = handler.clone();
    let second = handler.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            first
                .handle(json_request("code=alice-code"), &ctx("req-alice"))
                .await
        }),
        tokio::spawn(async move {
            second
                .handle(json_request("code=bob-code"), &ctx("req-bob"))
                .await
        }),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let url_a = body_json(&a)["url"].as_str().unwrap().to_string();
    let url_b = body_json(&b)["url"].as_str().unwrap().to_string();
    assert!(url_a.ends_with("AKID-id-token-alice-code"));
    assert!(url_b.ends_with("AKID-id-token-bob-code"));
    assert!(!a.body.contains("bob"));
    assert!(!b.body.contains("alice"));
    assert_eq!(calls.counts(), (2, 2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_stage_timeout_reports_gateway_timeout() {
    let (handler, calls) = Setup {
        exchange_delay: Some(Duration::from_secs(60)),
        ..Default::default()
    }
    .build();

    let response = handler.handle(json_request("code=slow"), &ctx("req-11")).await;

    assert_eq!(response.status_code, 504);
    assert_eq!(body_json(&response)["error"], "timeout");
    assert_eq!(calls.counts(), (1, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_deadline_skips_downstream_call() {
    let (handler, calls) = Setup::default().build();
    let ctx = InvocationContext::new("req-12", Some(Instant::now()));

    let response = handler.handle(json_request("code=abc"), &ctx).await;

    assert_eq!(response.status_code, 504);
    assert_eq!(calls.counts(), (0, 0, 0));
}

#[test]
fn test_timeouts_classified_under_running_stage() {
    assert_eq!(
        classify(&Err(CallbackError::timeout(StageKind::Exchange))),
        ("auth-error", true)
    );
    assert_eq!(
        classify(&Err(CallbackError::timeout(StageKind::Federation))),
        ("federation-error", true)
    );
    assert_eq!(
        classify(&Err(CallbackError::timeout(StageKind::Signing))),
        ("signing-error", true)
    );
    assert_eq!(
        classify(&Err(CallbackError::store_denied("no"))),
        ("signing-error", false)
    );
}
