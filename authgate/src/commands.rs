use clap::{ArgAction, Parser};

use crate::common::config::{
    FederationConfig, HandlerConfig, LoggingConfig, OAuthConfig, StoreConfig, TimeoutConfig,
};

/// Settings shared by every way of hosting the handler
#[derive(Parser, Debug, Clone)]
pub struct HandlerArgs {
    /// Bucket holding the downloadable object
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket: String,

    /// Key of the downloadable object
    #[arg(long, env = "OBJECT_KEY")]
    pub object_key: String,

    /// Validity of each download link in seconds (300-86400)
    #[arg(long, env = "EXPIRY_SECONDS", default_value = "3600")]
    pub expiry_seconds: u64,

    /// Filename suggested to the browser
    #[arg(long, env = "DOWNLOAD_FILENAME")]
    pub download_filename: Option<String>,

    /// Custom S3-compatible endpoint (path-style URLs)
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Probe the object with HEAD before issuing a link
    #[arg(long, env = "VERIFY_OBJECT", default_value_t = true, action = ArgAction::Set)]
    pub verify_object: bool,

    /// AWS region of the bucket and identity pool
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// User pool domain serving /oauth2/token
    #[arg(long, env = "USER_POOL_DOMAIN")]
    pub user_pool_domain: String,

    /// OAuth app client id
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    /// OAuth app client secret, if the client has one
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered for the app client
    #[arg(long, env = "REDIRECT_URI")]
    pub redirect_uri: String,

    /// Identity pool id (<region>:<id>)
    #[arg(long, env = "IDENTITY_POOL_ID")]
    pub identity_pool_id: String,

    /// Login provider name used in the identity pool
    #[arg(long, env = "IDENTITY_PROVIDER_NAME")]
    pub identity_provider_name: String,

    /// Role assumed with the identity pool's OpenID token
    #[arg(long, env = "FEDERATED_ROLE_ARN")]
    pub role_arn: String,

    /// Timeout for each downstream call in seconds
    #[arg(long, env = "STAGE_TIMEOUT_SECONDS", default_value = "10")]
    pub stage_timeout: u64,

    /// Invocation deadline in seconds when not supplied by the platform
    #[arg(long, env = "INVOCATION_TIMEOUT_SECONDS", default_value = "30")]
    pub invocation_timeout: u64,

    /// Delay before the single signing retry in milliseconds
    #[arg(long, env = "SIGNING_RETRY_BACKOFF_MS", default_value = "200")]
    pub signing_retry_backoff_ms: u64,

    /// Environment label
    #[arg(long, env = "ENVIRONMENT", default_value = "dev")]
    pub environment: String,
}

impl HandlerArgs {
    pub fn into_config(self, logging: LoggingConfig) -> HandlerConfig {
        HandlerConfig {
            store: StoreConfig {
                bucket: self.bucket,
                object_key: self.object_key,
                expiry_seconds: self.expiry_seconds,
                download_filename: self.download_filename,
                endpoint: self.s3_endpoint,
                verify_object: self.verify_object,
                region: self.region.clone(),
            },
            oauth: OAuthConfig {
                user_pool_domain: self.user_pool_domain,
                client_id: self.client_id,
                client_secret: self.client_secret.filter(|s| !s.is_empty()),
                redirect_uri: self.redirect_uri,
            },
            federation: FederationConfig {
                identity_pool_id: self.identity_pool_id,
                provider_name: self.identity_provider_name,
                role_arn: self.role_arn,
                region: self.region,
            },
            timeouts: TimeoutConfig {
                stage_timeout_secs: self.stage_timeout,
                invocation_timeout_secs: self.invocation_timeout,
                signing_retry_backoff_ms: self.signing_retry_backoff_ms,
            },
            logging,
            environment: self.environment,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct LambdaCommand {
    #[command(flatten)]
    pub handler: HandlerArgs,
}

/// Lambda settings from the environment alone, as a custom runtime `bootstrap` gets no arguments
pub fn lambda_from_env() -> Result<LambdaCommand, clap::Error> {
    LambdaCommand::try_parse_from([env!("CARGO_PKG_NAME")])
}

/// Text of a usage error worth reporting; `None` for help and version output
pub fn startup_error_message(error: &clap::Error) -> Option<String> {
    if !error.use_stderr() {
        return None;
    }
    Some(error.render().to_string().trim().to_string())
}

#[derive(Parser, Debug, Clone)]
pub struct ServeCommand {
    /// Port to listen on for callback requests
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    #[command(flatten)]
    pub handler: HandlerArgs,
}
