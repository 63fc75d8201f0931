//! reqwest-backed supplier client.

use async_trait::async_trait;
use reqwest::Url;

use crate::config::SupplierConfig;

use super::{GatewayError, SupplierGateway, SupplierResponse, SupplierStatus};

/// Error bodies are kept for diagnostics only; longer ones are cut.
const MAX_ERROR_BODY: usize = 512;

/// Calls `GET {base_url}/orders/{upstream_reference}` with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpSupplierGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSupplierGateway {
    pub fn new(config: &SupplierConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "{} cannot be used as a base URL",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// URL of the fulfillment record; the reference is percent-encoded as a
    /// single path segment.
    pub fn order_url(&self, upstream_reference: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("orders").push(upstream_reference);
        }
        url
    }
}

#[async_trait]
impl SupplierGateway for HttpSupplierGateway {
    async fn fetch_fulfillment(
        &self,
        upstream_reference: &str,
        credential_token: &str,
    ) -> Result<SupplierStatus, GatewayError> {
        let resp = self
            .client
            .get(self.order_url(upstream_reference))
            .bearer_auth(credential_token)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = match resp.text().await {
                Ok(text) => truncate_body(text),
                Err(e) => format!("<unreadable body: {e}>"),
            };
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: SupplierResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(body.into_status())
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
    body.push_str("...");
    body
}
