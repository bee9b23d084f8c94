//! HTTP retry helpers for the export API.
//!
//! Export requests go through [`send_bytes`] rather than calling
//! `reqwest::RequestBuilder::send()` directly, so every download gets
//! exponential backoff on transient failures (timeouts, connection resets,
//! HTTP 429, HTTP 5xx). Other 4xx responses are permanent and surface as
//! [`ExportError::Status`] carrying the response body.

use std::time::Duration;

use crate::ExportError;

/// Retries for connection errors, 429 and 5xx. Backoff is 2s, 4s, 8s, 16s,
/// 32s, so a request gives up after roughly a minute of waiting.
const MAX_RETRIES: u32 = 5;

/// Full re-fetches when the body stream breaks mid-download. Each one goes
/// through the connection-level loop again.
const MAX_BODY_RETRIES: u32 = 2;

/// Maximum number of characters of an error body kept in
/// [`ExportError::Status`].
const BODY_PREVIEW_LEN: usize = 500;

/// Sends the request built by `build_request` and returns the whole body.
///
/// `build_request` is called once per attempt because builders are consumed
/// by `.send()`.
///
/// # Errors
///
/// Returns [`ExportError::Status`] for non-retryable statuses or statuses
/// still failing after all retries, and [`ExportError::Http`] when the
/// connection or body read fails after all retries.
#[allow(clippy::future_not_send)]
pub async fn send_bytes<F>(build_request: F) -> Result<Vec<u8>, ExportError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt = 0;
    loop {
        let response = send_inner(&build_request, MAX_RETRIES).await?;
        let url = response.url().to_string();

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(e) if body_attempt < MAX_BODY_RETRIES => {
                body_attempt += 1;
                let delay = Duration::from_secs(1u64 << body_attempt);
                log::warn!(
                    "Body read failed (body retry {body_attempt}/{MAX_BODY_RETRIES}), \
                     re-fetching in {delay:?}...\n  \
                     url: {url}\n  \
                     error: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!(
                    "Body read failed after {MAX_BODY_RETRIES} retries, giving up.\n  \
                     url: {url}\n  \
                     error: {e}"
                );
                return Err(ExportError::Http(e));
            }
        }
    }
}

/// Connection-level retry loop. Returns the first 2xx/3xx response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, ExportError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(ExportError::Http(e));
            }
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    return Ok(response);
                }

                let retryable =
                    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < max_retries {
                    log::warn!("  HTTP {status}");
                    attempt += 1;
                    continue;
                }

                return Err(status_error(response).await);
            }
        }
    }
}

/// Builds [`ExportError::Status`] from a failed response, keeping a preview
/// of the body (the export API explains failures there).
async fn status_error(response: reqwest::Response) -> ExportError {
    let status = response.status().as_u16();
    let message = match response.text().await {
        Ok(text) => preview(&text),
        Err(e) => format!("<unreadable body: {e}>"),
    };
    ExportError::Status { status, message }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > BODY_PREVIEW_LEN {
        let head: String = trimmed.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}
