use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod common;
mod handler;
mod providers;
mod runtime;
mod server;

use commands::{LambdaCommand, ServeCommand};
use common::config::LoggingConfig;
use handler::CallbackHandler;

#[derive(Parser)]
#[command(
    name = "authgate",
    about = "Authgate - trade a sign-in redirect for a time-limited download link",
    version = env!("CARGO_PKG_VERSION"),
    author = "ktruck"
)]
struct Cli {
    /// Defaults to `lambda` so the binary can be deployed as a custom runtime `bootstrap`
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run inside AWS Lambda against the Runtime API
    Lambda(LambdaCommand),
    /// Serve the callback endpoint locally
    Serve(ServeCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            report_usage_error(&e).await;
            e.exit()
        }
    };

    let logging = LoggingConfig {
        level: if cli.verbose {
            "debug".to_string()
        } else {
            cli.log_level
        },
        json_format: matches!(cli.log_format, LogFormat::Json),
    };
    init_logging(&logging);

    let command = match cli.command {
        Some(command) => command,
        None => match commands::lambda_from_env() {
            Ok(lambda_cmd) => Commands::Lambda(lambda_cmd),
            Err(e) => {
                report_usage_error(&e).await;
                e.exit()
            }
        },
    };

    match command {
        Commands::Lambda(lambda_cmd) => {
            let config = lambda_cmd.handler.into_config(logging);
            let runtime_client = runtime::RuntimeClient::from_env()?;

            if let Err(e) = config.validate() {
                error!("Invalid configuration: {}", e);
                runtime_client
                    .post_init_error("Runtime.ConfigError", &e.to_string())
                    .await?;
                return Err(e.into());
            }

            info!("Starting Authgate Lambda runtime");
            let handler = CallbackHandler::from_config(config).await;
            runtime::run(runtime_client, handler).await?;
        }
        Commands::Serve(serve_cmd) => {
            print_banner();

            let config = serve_cmd.handler.into_config(logging);
            config.validate()?;

            info!("Starting Authgate local server");
            let handler = CallbackHandler::from_config(config).await;
            server::run(serve_cmd.port, handler).await?;
        }
    }

    Ok(())
}

/// Inside Lambda, argument and env errors also fail the cold start through `init/error`
async fn report_usage_error(e: &clap::Error) {
    if let Some(message) = commands::startup_error_message(e) {
        if let Ok(runtime_client) = runtime::RuntimeClient::from_env() {
            if let Err(post_err) = runtime_client
                .post_init_error("Runtime.ConfigError", &message)
                .await
            {
                eprintln!("Failed to report init error: {:#}", post_err);
            }
        }
    }
}

/// Honours RUST_LOG when set, otherwise the configured level
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json_format {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(false))
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

fn print_banner() {
    println!();
    println!("🔑 Authgate");
    println!();
    let _ = io::stdout().flush();
}
