//! `storefront-fulfillment`: background reconciliation of storefront orders
//! against the supplier's asynchronous delivery API.
//!
//! ## Design
//!
//! - One job per pending order, held in memory (not persisted across restarts)
//! - Fixed-interval scheduler, no overlapping ticks, bounded batch concurrency
//! - Capped exponential backoff with jitter; exhausted orders stay `pending`
//!   for manual review
//! - Idempotent completion: delivery payload, status, inventory, sold counter
//! - Heuristic parsing of delivered credential text
//!
//! ## Components
//!
//! - `FulfillmentProcessor`: service object with `start`/`stop`/`tick`
//! - `JobRegistry`: pending jobs keyed by order
//! - `ReconciliationWorker`: one supplier call, classified into an `Outcome`
//! - `BackoffPolicy`: retry delays
//! - `credential::parse`: delivered text to `Credential`
//! - `OrderStore` / `SupplierGateway`: external collaborators

pub mod backoff;
pub mod clock;
pub mod completion;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod job;
pub mod processor;
pub mod registry;
pub mod store;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::Completion;
pub use config::{BackoffConfig, ConfigError, FulfillmentConfig, SupplierConfig};
pub use credential::Credential;
pub use error::{FulfillmentError, FulfillmentResult};
pub use gateway::{
    GatewayError, HttpSupplierGateway, SupplierGateway, SupplierResponse, SupplierStatus,
};
pub use job::{JobId, JobSnapshot, ReconciliationJob};
pub use processor::{
    FulfillmentProcessor, FulfillmentProcessorBuilder, ProcessorStats, TickReport,
};
pub use registry::JobRegistry;
pub use store::{
    InMemoryOrderStore, OrderPatch, OrderRecord, OrderStatus, OrderStore, ProductOption,
    ProductPatch, ProductRecord, StoreError,
};
pub use worker::{Outcome, ReconciliationWorker, RetryReason};
