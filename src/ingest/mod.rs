/// Upstream API clients.
///
/// Surfline rejects requests that do not look like they come from a
/// browser on its own site, so every request carries a fixed User-Agent
/// and Referer.

pub mod surfline;

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";
pub const SURFLINE_REFERER: &str = "https://www.surfline.com/";

/// Blocking client with the browser header set and a per-request timeout.
/// Cheap to clone; clones share one connection pool.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(REFERER, HeaderValue::from_static(SURFLINE_REFERER));
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
}
