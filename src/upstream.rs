//! Shared HTTP plumbing for provider clients: one reqwest client per
//! provider, a gateway User-Agent, and the address-safety gate applied
//! before every fetch.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::registry::ToolError;
use crate::ssrf;

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).user_agent(USER_AGENT).build()
}

pub async fn fetch_json(
    client: &Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<Value, ToolError> {
    ssrf::ensure_url_allowed(url).await?;

    let response = client
        .get(url)
        .query(params)
        .send()
        .await?
        .error_for_status()?;

    response
        .json::<Value>()
        .await
        .map_err(|err| ToolError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_refuses_blocked_addresses_before_any_request() {
        let client = build_client(Duration::from_secs(1)).expect("client builds");
        let err = fetch_json(&client, "http://127.0.0.1:9/", &[])
            .await
            .expect_err("expected blocked address");
        assert!(matches!(err, ToolError::UnsafeAddress(_)));
    }
}
