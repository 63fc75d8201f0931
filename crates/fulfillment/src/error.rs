//! Processor-level errors.

use thiserror::Error;

use storefront_core::OrderId;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Errors surfaced by processor lifecycle and completion bookkeeping.
///
/// Supplier failures during reconciliation never appear here: the worker turns
/// them into retry outcomes. `Gateway` only covers building the client.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("order store: {0}")]
    Store(#[from] StoreError),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("failed to serialize delivery payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("supplier gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no tokio runtime available to start the scheduler")]
    NoRuntime,
}

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;
