//! Message broker plumbing for the order fulfillment saga.
//!
//! This crate provides:
//! - `Topology`: idempotent declaration of the saga exchanges, queues and bindings
//! - `message`: the two saga messages and their JSON codec
//! - `Broker`: the transport trait, with an AMQP (RabbitMQ) implementation
//!   and an in-memory implementation for tests
//! - `Delivery`: a consumed message that must be settled exactly once

pub mod amqp;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod message;
pub mod topology;
pub mod transport;

pub use amqp::{AmqpBroker, AmqpConfig};
pub use delivery::{Acker, Delivery};
pub use error::{BrokerError, DecodeError, Result};
pub use memory::InMemoryBroker;
pub use message::{InventoryCheckMessage, LineItemPayload, OrderStatusMessage, OutcomeStatus};
pub use topology::{DeadLetter, INVENTORY_CHECK, ORDER_UPDATE, QueueSpec, SagaChannel, Topology};
pub use transport::{Broker, DeliveryStream};
