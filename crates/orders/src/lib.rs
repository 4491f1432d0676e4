//! Order side data model and persistence.
//!
//! This crate provides:
//! - `Order` and `OrderLineItem`: an order as placed by a user
//! - `OrderStatus`: the `pending -> confirmed | cancelled` state machine
//! - `OrderStore`: order persistence with in-memory and PostgreSQL
//!   implementations

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod state;
pub mod store;

pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{NewOrder, Order, OrderLineItem};
pub use postgres::PostgresOrderStore;
pub use state::OrderStatus;
pub use store::{OrderStore, StatusTransition};
