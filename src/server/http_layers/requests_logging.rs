//! Per-request logging and HTTP metrics.

use crate::server::metrics::{categorize_endpoint, record_error, record_http_request};
use crate::server::state::ServerState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{error, info, warn};

/// How much of each request is written to the log. Levels are cumulative.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestsLoggingLevel::None => "none",
            RequestsLoggingLevel::Path => "path",
            RequestsLoggingLevel::Headers => "headers",
            RequestsLoggingLevel::Body => "body",
        };
        f.write_str(name)
    }
}

/// Bodies at or above this size are summarized instead of printed.
const BODY_LOG_LIMIT: usize = 1024;

fn content_length(headers: &HeaderMap) -> Result<usize, &'static str> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or("no content-length")?
        .to_str()
        .map_err(|_| "unreadable content-length")?
        .trim()
        .parse()
        .map_err(|_| "non-numeric content-length")
}

fn dump_headers(side: &str, headers: &HeaderMap) {
    for (name, value) in headers {
        info!("    [{}] {}: {:?}", side, name, value);
    }
}

/// Prints a small body and rebuilds it; anything else passes through.
async fn dump_body(side: &str, headers: &HeaderMap, body: Body) -> Result<Body, axum::Error> {
    let size = match content_length(headers) {
        Ok(size) => size,
        Err(reason) => {
            info!("    [{}] body not logged: {}", side, reason);
            return Ok(body);
        }
    };
    if size >= BODY_LOG_LIMIT {
        info!(
            "    [{}] body of {:#} not logged",
            side,
            byte_unit::Byte::from(size)
        );
        return Ok(body);
    }
    let bytes = axum::body::to_bytes(body, size).await?;
    info!("    [{}] body: {}", side, String::from_utf8_lossy(&bytes));
    Ok(Body::from(bytes))
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let level = state.config.requests_logging_level.clone();
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if level >= RequestsLoggingLevel::Path {
        info!("--> {} {}", method, request.uri());
    }
    if level >= RequestsLoggingLevel::Headers {
        dump_headers("req", request.headers());
    }

    let request = if level >= RequestsLoggingLevel::Body {
        let (parts, body) = request.into_parts();
        match dump_body("req", &parts.headers, body).await {
            Ok(body) => Request::from_parts(parts, body),
            Err(e) => {
                error!("Could not buffer request body of {} {}: {}", method, path, e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    } else {
        request
    };

    let mut response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        dump_headers("resp", response.headers());
    }
    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = response.into_parts();
        response = match dump_body("resp", &parts.headers, body).await {
            Ok(body) => Response::from_parts(parts, body),
            Err(e) => {
                error!("Could not buffer response body of {} {}: {}", method, path, e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
    }

    let status = response.status();
    let elapsed = started.elapsed();
    if level >= RequestsLoggingLevel::Path {
        info!("<-- {} {} {} in {}ms", method, path, status.as_u16(), elapsed.as_millis());
    }

    record_http_request(method.as_str(), &path, status.as_u16(), elapsed);
    if status.is_server_error() {
        warn!("{} {} answered {}", method, path, status);
        record_error("server_error", categorize_endpoint(&path));
    } else if status.is_client_error() {
        record_error("client_error", categorize_endpoint(&path));
    }

    response
}
