//! Order store boundary.
//!
//! The storefront's persistence layer is opaque to the processor. All it relies
//! on is per-record atomic reads and patches of orders and products; there are
//! no cross-record transactions.

pub mod in_memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::{OptionId, OrderId, ProductId};

pub use in_memory::InMemoryOrderStore;

/// Order store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn order_not_found(id: &OrderId) -> Self {
        Self::NotFound {
            kind: "order",
            id: id.to_string(),
        }
    }

    pub fn product_not_found(id: &ProductId) -> Self {
        Self::NotFound {
            kind: "product",
            id: id.to_string(),
        }
    }
}

/// Order lifecycle as far as fulfillment is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Paid, waiting for the supplier (also the resting state after exhaustion)
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub product_id: ProductId,
    /// Purchasable option (variant) the customer picked, if any.
    pub option_id: Option<OptionId>,
    pub quantity: u32,
    pub status: OrderStatus,
    /// JSON array of delivered credentials.
    pub delivery_payload: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    pub fn pending(id: OrderId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            id,
            product_id,
            option_id: None,
            quantity,
            status: OrderStatus::Pending,
            delivery_payload: None,
            completed_at: None,
        }
    }

    pub fn with_option(mut self, option_id: OptionId) -> Self {
        self.option_id = Some(option_id);
        self
    }
}

/// Partial order update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub delivery_payload: Option<String>,
}

impl OrderPatch {
    pub fn apply_to(self, order: &mut OrderRecord) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(at) = self.completed_at {
            order.completed_at = Some(at);
        }
        if let Some(payload) = self.delivery_payload {
            order.delivery_payload = Some(payload);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOption {
    pub id: OptionId,
    pub name: String,
    pub stock: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    /// Top-level stock, used when orders do not pick an option.
    pub stock: u64,
    /// Cumulative units sold.
    pub sold: u64,
    pub options: Vec<ProductOption>,
}

impl ProductRecord {
    pub fn option(&self, id: &OptionId) -> Option<&ProductOption> {
        self.options.iter().find(|o| &o.id == id)
    }
}

/// Partial product update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub stock: Option<u64>,
    pub sold: Option<u64>,
    /// New absolute stock per option.
    pub option_stock: Vec<(OptionId, u64)>,
}

impl ProductPatch {
    /// Apply all-or-nothing: an unknown option leaves the product untouched.
    pub fn apply_to(self, product: &mut ProductRecord) -> Result<(), StoreError> {
        if let Some((missing, _)) = self
            .option_stock
            .iter()
            .find(|(id, _)| product.option(id).is_none())
        {
            return Err(StoreError::InvalidPatch(format!(
                "product {} has no option {}",
                product.id, missing
            )));
        }

        if let Some(stock) = self.stock {
            product.stock = stock;
        }
        if let Some(sold) = self.sold {
            product.sold = sold;
        }
        for (id, stock) in self.option_stock {
            if let Some(option) = product.options.iter_mut().find(|o| o.id == id) {
                option.stock = stock;
            }
        }
        Ok(())
    }
}

/// Orders and products, each read or patched atomically per record.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, id: &OrderId) -> Result<Option<OrderRecord>, StoreError>;

    async fn update_order(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<OrderRecord, StoreError>;

    async fn get_product(&self, id: &ProductId) -> Result<Option<ProductRecord>, StoreError>;

    async fn update_product(
        &self,
        id: &ProductId,
        patch: ProductPatch,
    ) -> Result<ProductRecord, StoreError>;
}
