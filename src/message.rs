use std::fmt;

/// A pending outbound message.
///
/// Created by [`Publisher::push`](crate::Publisher::push) and consumed exactly
/// once by the drain loop. If the channel is not ready when the message is
/// drained, it is dropped, not requeued.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub key: String,
    pub payload: Vec<u8>,
    pub routing_key_prefix: Option<String>,
}

impl Message {
    pub fn new(
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        routing_key_prefix: Option<String>,
    ) -> Self {
        Message {
            key: key.into(),
            payload: payload.into(),
            routing_key_prefix,
        }
    }

    /// Computes the effective routing key: the per-message prefix override if
    /// present, otherwise the configured default prefix, otherwise no prefix,
    /// concatenated with the message key.
    pub fn routing_key(&self, default_prefix: Option<&str>) -> String {
        let prefix = self
            .routing_key_prefix
            .as_deref()
            .or(default_prefix)
            .unwrap_or("");
        format!("{}{}", prefix, self.key)
    }
}

// Payload bytes are opaque and possibly large; keep them out of logs.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("routing_key_prefix", &self.routing_key_prefix)
            .finish()
    }
}
