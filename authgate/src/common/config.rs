use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Shortest validity accepted for a download link
pub const MIN_EXPIRY_SECONDS: u64 = 300;
/// Longest validity accepted for a download link
pub const MAX_EXPIRY_SECONDS: u64 = 86_400;
/// Longest session STS will hand out for a web-identity role
pub const MAX_SESSION_SECONDS: u64 = 43_200;
/// Shortest session STS will hand out
pub const MIN_SESSION_SECONDS: u64 = 900;

/// Errors detected while building the handler configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {name}")]
    Missing { name: &'static str },

    #[error(
        "Expiry of {seconds}s is outside the allowed range {}-{}s",
        MIN_EXPIRY_SECONDS,
        MAX_EXPIRY_SECONDS
    )]
    ExpiryOutOfRange { seconds: u64 },

    #[error("Invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            message: message.into(),
        }
    }
}

/// Configuration for the callback handler, fixed at process start
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Object store configuration
    pub store: StoreConfig,

    /// OAuth client registered with the user pool
    pub oauth: OAuthConfig,

    /// Identity pool federation configuration
    pub federation: FederationConfig,

    /// Deadlines and retry policy
    pub timeouts: TimeoutConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Environment label attached to logs and health output
    pub environment: String,
}

/// Object store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub bucket: String,

    pub object_key: String,

    /// Validity of each issued link in seconds
    pub expiry_seconds: u64,

    /// Filename suggested to the browser via response-content-disposition
    pub download_filename: Option<String>,

    /// Custom endpoint (e.g. a local S3-compatible store); forces path-style URLs
    pub endpoint: Option<String>,

    /// Probe the object with HEAD before handing out a link
    pub verify_object: bool,

    pub region: String,
}

/// OAuth client registered with the user pool
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Host serving `/oauth2/token`
    pub user_pool_domain: String,

    pub client_id: String,

    pub client_secret: Option<String>,

    pub redirect_uri: String,
}

impl OAuthConfig {
    pub fn token_endpoint(&self) -> String {
        let domain = self.user_pool_domain.trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            format!("{}/oauth2/token", domain)
        } else {
            format!("https://{}/oauth2/token", domain)
        }
    }
}

/// Identity pool federation configuration
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Identity pool id, `region:uuid`
    pub identity_pool_id: String,

    /// Login provider key, e.g. `cognito-idp.us-east-1.amazonaws.com/us-east-1_XXXX`
    pub provider_name: String,

    /// Role assumed with the pool's OpenID token
    pub role_arn: String,

    pub region: String,
}

impl FederationConfig {
    pub fn identity_endpoint(&self) -> String {
        format!("https://cognito-identity.{}.amazonaws.com/", self.region)
    }
}

/// Deadlines and retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Upper bound for each downstream call
    pub stage_timeout_secs: u64,

    /// Invocation deadline applied by the local server
    pub invocation_timeout_secs: u64,

    /// Fixed delay before the single signing retry
    pub signing_retry_backoff_ms: u64,
}

impl TimeoutConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn signing_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.signing_retry_backoff_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 10,
            invocation_timeout_secs: 30,
            signing_retry_backoff_ms: 200,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Whether to log in JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
        }
    }
}

impl HandlerConfig {
    /// Check every invariant the handler relies on. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("BUCKET_NAME", &self.store.bucket)?;
        require("OBJECT_KEY", &self.store.object_key)?;
        require("AWS_REGION", &self.store.region)?;
        require("USER_POOL_DOMAIN", &self.oauth.user_pool_domain)?;
        require("CLIENT_ID", &self.oauth.client_id)?;
        require("REDIRECT_URI", &self.oauth.redirect_uri)?;
        require("IDENTITY_POOL_ID", &self.federation.identity_pool_id)?;
        require("IDENTITY_PROVIDER_NAME", &self.federation.provider_name)?;
        require("FEDERATED_ROLE_ARN", &self.federation.role_arn)?;

        let seconds = self.store.expiry_seconds;
        if !(MIN_EXPIRY_SECONDS..=MAX_EXPIRY_SECONDS).contains(&seconds) {
            return Err(ConfigError::ExpiryOutOfRange { seconds });
        }

        match self.federation.identity_pool_id.split_once(':') {
            Some((region, id)) if !region.is_empty() && !id.is_empty() => {}
            _ => {
                return Err(ConfigError::invalid(
                    "IDENTITY_POOL_ID",
                    "expected <region>:<id>",
                ))
            }
        }

        if !self.federation.role_arn.starts_with("arn:") {
            return Err(ConfigError::invalid(
                "FEDERATED_ROLE_ARN",
                "expected an IAM role ARN",
            ));
        }

        if !self.oauth.redirect_uri.starts_with("https://")
            && !self.oauth.redirect_uri.starts_with("http://")
        {
            return Err(ConfigError::invalid(
                "REDIRECT_URI",
                "expected an absolute http(s) URI",
            ));
        }

        if self.timeouts.stage_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "STAGE_TIMEOUT_SECONDS",
                "must be greater than zero",
            ));
        }

        if seconds > MAX_SESSION_SECONDS {
            warn!(
                "Expiry of {}s exceeds the maximum federated session of {}s; links stop working when the session ends",
                seconds, MAX_SESSION_SECONDS
            );
        }

        Ok(())
    }

    /// Session length requested from STS for the configured link validity
    pub fn session_duration_secs(&self) -> u64 {
        self.store
            .expiry_seconds
            .clamp(MIN_SESSION_SECONDS, MAX_SESSION_SECONDS)
    }
}

fn require(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing { name })
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> HandlerConfig {
    HandlerConfig {
        store: StoreConfig {
            bucket: "downloads-bucket".to_string(),
            object_key: "releases/app.zip".to_string(),
            expiry_seconds: 900,
            download_filename: None,
            endpoint: None,
            verify_object: true,
            region: "us-east-1".to_string(),
        },
        oauth: OAuthConfig {
            user_pool_domain: "auth.example.com".to_string(),
            client_id: "client-123".to_string(),
            client_secret: None,
            redirect_uri: "https://download.example.com/callback".to_string(),
        },
        federation: FederationConfig {
            identity_pool_id: "us-east-1:00000000-0000-0000-0000-000000000000".to_string(),
            provider_name: "cognito-idp.us-east-1.amazonaws.com/us-east-1_Example".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/download-role".to_string(),
            region: "us-east-1".to_string(),
        },
        timeouts: TimeoutConfig::default(),
        logging: LoggingConfig::default(),
        environment: "test".to_string(),
    }
}
