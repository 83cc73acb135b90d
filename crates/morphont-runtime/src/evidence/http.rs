//! HTTP plumbing shared by the literature backends.

use serde::de::DeserializeOwned;
use std::time::Duration;

use super::ProviderFault;

pub(crate) const USER_AGENT: &str = concat!("morphont/", env!("CARGO_PKG_VERSION"));

pub(crate) fn client() -> Result<reqwest::Client, ProviderFault> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ProviderFault::Malformed(format!("HTTP client: {}", e)))
}

pub(crate) fn classify(err: reqwest::Error, timeout: Duration) -> ProviderFault {
    if err.is_timeout() {
        ProviderFault::Timeout(timeout)
    } else if err.is_decode() {
        ProviderFault::Malformed(err.to_string())
    } else {
        ProviderFault::Network(err.to_string())
    }
}

/// Send `request` and decode a JSON body, mapping failures to faults.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderFault> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

    let status = response.status();

    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderFault::RateLimited { retry_after });
    }

    if status == 401 || status == 403 {
        return Err(ProviderFault::Auth(format!("HTTP {}", status.as_u16())));
    }

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderFault::Status {
            status: status.as_u16(),
            message: shorten(&message, 200),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderFault::Malformed(e.to_string()))
}

/// Collapse whitespace and cut at a word boundary, marking the cut with
/// "...".
pub(crate) fn shorten(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(3);
    let mut out = String::new();
    for word in collapsed.split(' ') {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > budget {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str("...");
    out
}
