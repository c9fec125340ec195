use super::error::CallbackError;
use crate::common::{CallbackResponse, DownloadGrant, ResponseFormat};
use askama::Template;
use chrono::SecondsFormat;
use serde_json::json;
use tracing::error;

/// Served when a page template cannot be rendered
const RENDER_FAILED_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
    <title>Download unavailable</title></head><body><p>Something went wrong.</p></body></html>\n";

/// Success page template
#[derive(Template)]
#[template(path = "download.html")]
struct DownloadTemplate<'a> {
    url: &'a str,
    expires_at: &'a str,
}

/// Error page template
#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    message: &'a str,
    code: &'a str,
}

fn render_page<T: Template>(template: &T, status_code: u16) -> CallbackResponse {
    match template.render() {
        Ok(body) => CallbackResponse::new(status_code, ResponseFormat::Html, body),
        Err(e) => {
            error!("Failed to render template: {}", e);
            CallbackResponse::new(500, ResponseFormat::Html, RENDER_FAILED_PAGE.to_string())
        }
    }
}

pub fn grant(grant: &DownloadGrant, format: ResponseFormat) -> CallbackResponse {
    let expires_at = grant.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);

    match format {
        ResponseFormat::Json => {
            let body = json!({
                "url": grant.url,
                "expiresAt": expires_at,
            });
            CallbackResponse::new(200, format, body.to_string())
        }
        ResponseFormat::Html => render_page(
            &DownloadTemplate {
                url: &grant.url,
                expires_at: &expires_at,
            },
            200,
        ),
    }
}

pub fn failure(error: &CallbackError, format: ResponseFormat) -> CallbackResponse {
    let message = error.public_message();

    match format {
        ResponseFormat::Json => {
            let body = json!({
                "error": error.code(),
                "message": message,
            });
            CallbackResponse::new(error.status_code(), format, body.to_string())
        }
        ResponseFormat::Html => render_page(
            &ErrorTemplate {
                message: &message,
                code: error.code(),
            },
            error.status_code(),
        ),
    }
}
