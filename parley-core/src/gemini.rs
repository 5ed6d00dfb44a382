//! Request plumbing shared by the Gemini embedding and generation clients.

use serde::Deserialize;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sent as a header so the key never shows up in logged URLs.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// `{base}/models/{model}:{method}`, e.g. `.../models/gemini-2.0-flash:generateContent`.
pub fn endpoint(base_url: &str, model: &str, method: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    format!("{}/models/{}:{}", base_url.trim_end_matches('/'), model, method)
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: u16,
    message: String,
}

/// `(code, message)` from a Gemini error body, or the raw HTTP status and text
/// when the body is not the usual envelope.
pub(crate) fn parse_api_error(status: reqwest::StatusCode, body: String) -> (u16, String) {
    serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| (e.code, e.message))
        .unwrap_or((status.as_u16(), body))
}

/// Rate limits and server faults are worth another attempt; other 4xx are not.
pub fn is_retryable_status(code: u16) -> bool {
    code == 429 || (500..600).contains(&code)
}
