//! Inventory side of the order fulfillment saga.
//!
//! This crate provides:
//! - `ProductVariant`: the unit stock is tracked at
//! - `VariantStore` / `StockTransaction`: transactional lock-and-write access
//!   to stock, with in-memory and PostgreSQL implementations
//! - `ReservationEngine`: all-or-nothing stock reservation for a set of
//!   line items

pub mod error;
pub mod memory;
pub mod postgres;
pub mod reservation;
pub mod store;
pub mod variant;

pub use error::{Result, StoreError};
pub use memory::InMemoryVariantStore;
pub use postgres::PostgresVariantStore;
pub use reservation::{Outcome, ReservationEngine, ReservationLine};
pub use store::{StockTransaction, VariantStore};
pub use variant::ProductVariant;
