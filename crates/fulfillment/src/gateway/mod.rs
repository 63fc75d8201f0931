//! Supplier gateway boundary.
//!
//! The supplier speaks loosely-typed JSON. It is validated once here into a
//! closed [`SupplierStatus`] so the worker only ever matches on variants.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpSupplierGateway;

/// Failure to obtain a usable answer from the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("supplier returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed supplier response: {0}")]
    Decode(String),
    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

/// Validated supplier answer for one upstream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplierStatus {
    /// Non-empty list of delivered product strings.
    Delivered(Vec<String>),
    /// The supplier's documented "not ready yet".
    StillProcessing,
    /// Anything else, with the supplier's description when it gave one.
    Failed(String),
}

/// Supplier wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Vec<DeliveredItem>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredItem {
    pub delivered_text: String,
}

impl SupplierResponse {
    /// Classify the raw response.
    ///
    /// Only `success = true` with at least one item counts as delivery.
    pub fn into_status(self) -> SupplierStatus {
        let description = self.description.unwrap_or_default();
        if self.success {
            return match self.data {
                Some(items) if !items.is_empty() => {
                    SupplierStatus::Delivered(items.into_iter().map(|i| i.delivered_text).collect())
                }
                _ => SupplierStatus::Failed(if description.is_empty() {
                    "success without delivered items".to_string()
                } else {
                    description
                }),
            };
        }

        if description.to_lowercase().contains("processing") {
            SupplierStatus::StillProcessing
        } else if description.is_empty() {
            SupplierStatus::Failed("unsuccessful response without description".to_string())
        } else {
            SupplierStatus::Failed(description)
        }
    }
}

/// Remote supplier fulfillment API.
#[async_trait]
pub trait SupplierGateway: Send + Sync {
    /// Ask for the delivery state of `upstream_reference`, authorized by
    /// `credential_token`.
    async fn fetch_fulfillment(
        &self,
        upstream_reference: &str,
        credential_token: &str,
    ) -> Result<SupplierStatus, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> SupplierStatus {
        serde_json::from_str::<SupplierResponse>(json)
            .unwrap()
            .into_status()
    }

    #[test]
    fn delivered_items_are_extracted_in_order() {
        let status = decode(
            r#"{"success":true,"data":[{"deliveredText":"user:a"},{"deliveredText":"user:b"}]}"#,
        );
        assert_eq!(
            status,
            SupplierStatus::Delivered(vec!["user:a".to_string(), "user:b".to_string()])
        );
    }

    #[test]
    fn processing_is_matched_case_insensitively() {
        assert_eq!(
            decode(r#"{"success":false,"description":"Order in processing!"}"#),
            SupplierStatus::StillProcessing
        );
        assert_eq!(
            decode(r#"{"success":false,"description":"STILL PROCESSING"}"#),
            SupplierStatus::StillProcessing
        );
    }

    #[test]
    fn success_without_data_is_not_a_delivery() {
        assert!(matches!(
            decode(r#"{"success":true,"data":[]}"#),
            SupplierStatus::Failed(_)
        ));
        assert!(matches!(decode(r#"{"success":true}"#), SupplierStatus::Failed(_)));
    }

    #[test]
    fn other_failures_keep_the_description() {
        assert_eq!(
            decode(r#"{"success":false,"description":"Insufficient balance"}"#),
            SupplierStatus::Failed("Insufficient balance".to_string())
        );
    }

    #[test]
    fn missing_success_flag_is_malformed() {
        assert!(serde_json::from_str::<SupplierResponse>(r#"{"data":[]}"#).is_err());
    }
}
