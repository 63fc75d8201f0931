use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use storefront_core::{OrderId, ProductId};

use super::{OrderPatch, OrderRecord, OrderStore, ProductPatch, ProductRecord, StoreError};

/// In-memory order store.
///
/// Intended for tests/dev. `set_unavailable(true)` makes every call fail with
/// a backend error, to exercise outage handling.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, OrderRecord>>,
    products: RwLock<HashMap<ProductId, ProductRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_order(&self, order: OrderRecord) {
        self.orders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order.id.clone(), order);
    }

    pub fn insert_product(&self, product: ProductRecord) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id.clone(), product);
    }

    /// Synchronous read, for assertions.
    pub fn order(&self, id: &OrderId) -> Option<OrderRecord> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Synchronous read, for assertions.
    pub fn product(&self, id: &ProductId) -> Option<ProductRecord> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_order(&self, id: &OrderId) -> Result<Option<OrderRecord>, StoreError> {
        self.check_available()?;
        Ok(self.order(id))
    }

    async fn update_order(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<OrderRecord, StoreError> {
        self.check_available()?;
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        let order = orders
            .get_mut(id)
            .ok_or_else(|| StoreError::order_not_found(id))?;
        patch.apply_to(order);
        Ok(order.clone())
    }

    async fn get_product(&self, id: &ProductId) -> Result<Option<ProductRecord>, StoreError> {
        self.check_available()?;
        Ok(self.product(id))
    }

    async fn update_product(
        &self,
        id: &ProductId,
        patch: ProductPatch,
    ) -> Result<ProductRecord, StoreError> {
        self.check_available()?;
        let mut products = self.products.write().unwrap_or_else(PoisonError::into_inner);
        let product = products
            .get_mut(id)
            .ok_or_else(|| StoreError::product_not_found(id))?;
        patch.apply_to(product)?;
        Ok(product.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{OrderStatus, ProductOption};
    use storefront_core::OptionId;

    fn product() -> ProductRecord {
        ProductRecord {
            id: ProductId::new("prod-1"),
            name: "Streaming account".to_string(),
            stock: 10,
            sold: 0,
            options: vec![ProductOption {
                id: OptionId::new("1-month"),
                name: "1 month".to_string(),
                stock: 3,
            }],
        }
    }

    #[tokio::test]
    async fn order_patch_updates_only_given_fields() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::new("ord-1");
        store.insert_order(OrderRecord::pending(id.clone(), ProductId::new("prod-1"), 2));

        let updated = store
            .update_order(
                &id,
                OrderPatch {
                    delivery_payload: Some("[]".to_string()),
                    ..OrderPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, OrderStatus::Pending);
        assert_eq!(updated.delivery_payload.as_deref(), Some("[]"));
        assert_eq!(updated.quantity, 2);
    }

    #[tokio::test]
    async fn product_patch_with_unknown_option_is_rejected_whole() {
        let store = InMemoryOrderStore::new();
        store.insert_product(product());
        let id = ProductId::new("prod-1");

        let err = store
            .update_product(
                &id,
                ProductPatch {
                    sold: Some(5),
                    option_stock: vec![(OptionId::new("lifetime"), 0)],
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidPatch(_)));
        assert_eq!(store.product(&id).unwrap().sold, 0);
    }

    #[tokio::test]
    async fn missing_records_and_outages() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::new("nope");
        assert_eq!(store.get_order(&id).await.unwrap(), None);
        assert!(matches!(
            store.update_order(&id, OrderPatch::default()).await,
            Err(StoreError::NotFound { kind: "order", .. })
        ));

        store.set_unavailable(true);
        assert!(matches!(
            store.get_product(&ProductId::new("prod-1")).await,
            Err(StoreError::Backend(_))
        ));
    }
}
