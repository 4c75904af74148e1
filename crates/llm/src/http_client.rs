//! HTTP Client Factory
//!
//! Builds reqwest clients with optional proxy and request timeout.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client`.
///
/// - `Some(proxy_url)` -> route every request through the proxy
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
pub fn build_http_client(proxy_url: Option<&str>, timeout_secs: u64) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs));
    match proxy_url {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| LlmError::InvalidRequest {
                message: format!("Invalid proxy URL '{}': {}", url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build().map_err(|e| LlmError::Other {
        message: format!("Failed to build HTTP client: {}", e),
    })
}
