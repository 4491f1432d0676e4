//! Shared types used by both the order and inventory services.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{OrderId, UserId, VariantId};
