//! End-to-end demo: push a few order events through the async publisher.
//!
//! Run against a local broker with `cargo run --example publish_orders`.
//! Dial parameters come from AMQP_* environment variables (or a .env file).

use std::time::Duration;

use anyhow::Result;
use rbmq_publisher::{ConnectionConfig, ExchangeConfig, Publisher};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let connection = ConnectionConfig::from_env()?;
    let exchange = ExchangeConfig {
        durable: true,
        routing_key_prefix: Some("orders.".to_string()),
        ..ExchangeConfig::new("orders", "topic")
    };

    let publisher = Publisher::new(connection, exchange);

    // The first push starts the reactor thread and pays the dial latency.
    publisher.push("created", br#"{"order_id": 1}"#.to_vec(), None)?;
    publisher.push("paid", br#"{"order_id": 1}"#.to_vec(), None)?;
    publisher.push(
        "audit",
        br#"{"order_id": 1}"#.to_vec(),
        Some("compliance.".to_string()),
    )?;
    info!("Enqueued three messages");

    // One message drains per 300 ms tick; give them time to go out.
    std::thread::sleep(Duration::from_secs(2));
    publisher.close()?;
    Ok(())
}
