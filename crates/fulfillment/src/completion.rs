//! Order store writes performed once the supplier has delivered.
//!
//! The store only guarantees per-record atomicity, so marking the order
//! completed and adjusting inventory are separate, best-effort steps. Within
//! one processor they never race: outcomes are applied one at a time and ticks
//! do not overlap. Another writer touching the same product between the read
//! and the write can still cause an under-decrement.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use storefront_core::OrderId;

use crate::credential::Credential;
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::store::{
    OrderPatch, OrderRecord, OrderStatus, OrderStore, ProductPatch, ProductRecord, StoreError,
};

/// What completion did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Order marked completed, inventory adjusted (best effort).
    Applied,
    /// The order was already completed; nothing was written.
    AlreadyCompleted,
    /// The order left `pending` some other way (e.g. cancelled); nothing was written.
    NotPending(OrderStatus),
}

/// Attach the delivery to the order, mark it completed and adjust inventory.
///
/// Errors before the order update leave the store untouched and are returned
/// so the caller can retry. Inventory failures after the order is completed
/// are logged, not returned: retrying would not find the order pending again.
pub async fn complete_order(
    store: &dyn OrderStore,
    order_id: &OrderId,
    credentials: &[Credential],
    now: DateTime<Utc>,
) -> FulfillmentResult<Completion> {
    let payload = serde_json::to_string(credentials)?;

    let order = store
        .get_order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.clone()))?;

    match order.status {
        OrderStatus::Pending => {}
        OrderStatus::Completed => {
            info!(order_id = %order_id, "order already completed; skipping");
            return Ok(Completion::AlreadyCompleted);
        }
        other => {
            warn!(order_id = %order_id, status = ?other, "delivery for non-pending order ignored");
            return Ok(Completion::NotPending(other));
        }
    }

    store
        .update_order(
            order_id,
            OrderPatch {
                status: Some(OrderStatus::Completed),
                completed_at: Some(now),
                delivery_payload: Some(payload),
            },
        )
        .await?;

    info!(
        order_id = %order_id,
        items = credentials.len(),
        "order completed"
    );

    if let Err(e) = adjust_inventory(store, &order).await {
        error!(
            order_id = %order_id,
            product_id = %order.product_id,
            error = %e,
            "inventory adjustment failed after completion"
        );
    }

    Ok(Completion::Applied)
}

async fn adjust_inventory(store: &dyn OrderStore, order: &OrderRecord) -> Result<(), StoreError> {
    // Re-read: the product may have changed since the order was placed.
    let product = store
        .get_product(&order.product_id)
        .await?
        .ok_or_else(|| StoreError::product_not_found(&order.product_id))?;

    let patch = inventory_patch(&product, order);
    store.update_product(&product.id, patch).await?;
    Ok(())
}

/// Stock decrement (floored at zero) plus sold-counter increment for `order`.
pub fn inventory_patch(product: &ProductRecord, order: &OrderRecord) -> ProductPatch {
    let quantity = u64::from(order.quantity);
    let mut patch = ProductPatch {
        sold: Some(product.sold.saturating_add(quantity)),
        ..ProductPatch::default()
    };

    match &order.option_id {
        Some(option_id) => match product.option(option_id) {
            Some(option) => patch
                .option_stock
                .push((option_id.clone(), option.stock.saturating_sub(quantity))),
            None => warn!(
                order_id = %order.id,
                product_id = %product.id,
                option_id = %option_id,
                "ordered option no longer exists; stock left unchanged"
            ),
        },
        None => patch.stock = Some(product.stock.saturating_sub(quantity)),
    }

    patch
}
