//! `storefront-core`: shared building blocks for the storefront subsystems.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{OptionId, OrderId, ProductId};
