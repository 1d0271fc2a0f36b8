//! Asynchronous RabbitMQ publisher.
//!
//! Producers call [`Publisher::push`] from any thread; a dedicated background
//! reactor thread owns the connection, walks connect → channel-open →
//! exchange-declare to ready, and drains the bounded queue at a fixed
//! cadence. Backpressure blocks producers at queue capacity; a message whose
//! drain tick finds the channel not ready is dropped (at-most-once).

pub mod config;
pub mod connection;
pub mod drain;
pub mod error;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod state;

// Re-export the public surface to simplify imports elsewhere
pub use config::{load_config, ConnectionConfig, ExchangeConfig, RabbitConfig};
pub use error::{PublisherError, Result};
pub use message::Message;
pub use publisher::Publisher;
pub use state::{ConnectionEvent, ConnectionState};
