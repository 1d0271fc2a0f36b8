// src/error.rs

use lapin::Error as LapinError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Failed to dial broker: {0}")]
    Dial(#[source] LapinError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Failed to declare exchange: {0}")]
    Declare(String),

    #[error("Failed to publish message: {0}")]
    Publish(String),

    #[error("Message queue is closed")]
    QueueClosed,

    #[error("Reactor thread did not stop within {0:?}")]
    JoinTimeout(Duration),
}

// Custom Result type for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;
