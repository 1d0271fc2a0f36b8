use lapin::{
    options::ExchangeDeclareOptions, types::FieldTable, Channel, Connection,
    ConnectionProperties,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionConfig, ExchangeConfig};
use crate::error::{PublisherError, Result};
use crate::state::{ConnectionEvent, ConnectionState};

/// Owns the one live connection and one live channel of a publisher instance.
///
/// Every method runs on the reactor thread only; the connection and channel
/// are never touched from anywhere else, so no locking is needed here.
pub struct ConnectionManager {
    connection_config: ConnectionConfig,
    exchange_config: ExchangeConfig,
    connection: Option<Connection>,
    channel: Option<Channel>,
    state: ConnectionState,
    stopping: Arc<AtomicBool>,
}

impl ConnectionManager {
    pub fn new(
        connection_config: ConnectionConfig,
        exchange_config: ExchangeConfig,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        ConnectionManager {
            connection_config,
            exchange_config,
            connection: None,
            channel: None,
            state: ConnectionState::Disconnected,
            stopping,
        }
    }

    pub fn exchange_config(&self) -> &ExchangeConfig {
        &self.exchange_config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Dials the broker and walks the handshake through to `Ready`:
    /// connect, open a channel, declare the exchange.
    ///
    /// A dial failure is terminal for this reactor; there is no automatic
    /// retry. The caller abandons the loop and a later `start` dials afresh.
    pub async fn dial(&mut self) -> Result<()> {
        self.transition(ConnectionEvent::DialStarted);
        let uri = self.connection_config.amqp_uri();
        info!(
            host = %self.connection_config.host,
            port = self.connection_config.port,
            "Dialing broker"
        );

        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(PublisherError::Dial)?;

        // Unexpected connection loss is observed here; it is logged and not
        // auto-redialed. The publisher stalls until restarted externally.
        connection.on_error(|err| {
            error!(error = %err, "Connection error; publisher stalled until restarted");
        });

        info!("Connection open");
        self.transition(ConnectionEvent::ConnectionOpened);
        self.connection = Some(connection);
        self.open_channel().await
    }

    /// Opens a fresh channel on the current connection and declares the
    /// configured exchange on it. Used for both the initial handshake and
    /// channel reopens after unexpected channel loss.
    async fn open_channel(&mut self) -> Result<()> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| PublisherError::Channel("No active connection".to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublisherError::Channel(e.to_string()))?;
        debug!("Channel established");
        self.transition(ConnectionEvent::ChannelOpened);

        self.declare_exchange(&channel).await?;
        self.channel = Some(channel);
        self.transition(ConnectionEvent::ExchangeDeclared);
        info!(exchange = %self.exchange_config.exchange, "Channel ready");
        Ok(())
    }

    async fn declare_exchange(&self, channel: &Channel) -> Result<()> {
        let cfg = &self.exchange_config;
        channel
            .exchange_declare(
                &cfg.exchange,
                cfg.exchange_kind(),
                ExchangeDeclareOptions {
                    passive: cfg.passive,
                    durable: cfg.durable,
                    auto_delete: cfg.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublisherError::Declare(e.to_string()))?;
        debug!(exchange = %cfg.exchange, kind = %cfg.exchange_type, "Exchange declared");
        Ok(())
    }

    /// Returns a channel that is ready to publish on, or `None`.
    ///
    /// If the channel died while the connection is still open and we are not
    /// stopping, the channel is reopened here with the normal channel-open +
    /// exchange-declare handshake. This recovery is invisible to producers.
    pub async fn ready_channel(&mut self) -> Option<Channel> {
        if self.stopping.load(Ordering::SeqCst) {
            return None;
        }

        if let Some(channel) = &self.channel {
            if channel.status().connected() {
                return Some(channel.clone());
            }
        }

        let connection_alive = self
            .connection
            .as_ref()
            .map_or(false, |conn| conn.status().connected());

        if !connection_alive {
            if self.connection.is_some() {
                self.connection = None;
                self.channel = None;
                self.transition(ConnectionEvent::ConnectionLost);
                error!("Connection lost; publisher stalled until restarted");
            }
            return None;
        }

        if self.channel.take().is_some() {
            warn!("Channel closed unexpectedly, reopening");
            self.transition(ConnectionEvent::ChannelLost);
        }
        match self.open_channel().await {
            Ok(()) => self.channel.clone(),
            Err(e) => {
                error!(error = %e, "Failed to reopen channel");
                None
            }
        }
    }

    /// Graceful teardown: flags stopping first so the reopen policy is
    /// suppressed, then closes the channel and the connection in that order.
    /// Safe to call repeatedly, with or without a live channel/connection.
    pub async fn close(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.transition(ConnectionEvent::CloseRequested);

        match self.channel.take() {
            Some(channel) if channel.status().connected() => {
                if let Err(e) = channel.close(0, "Publisher closing").await {
                    warn!(error = %e, "Error closing channel");
                } else {
                    info!("Channel closed");
                }
            }
            Some(_) => info!("Channel is already closed"),
            None => info!("No channel exists to close"),
        }

        match self.connection.take() {
            Some(connection) if connection.status().connected() => {
                if let Err(e) = connection.close(0, "Publisher closing").await {
                    warn!(error = %e, "Error closing connection");
                } else {
                    info!("Connection closed");
                }
            }
            Some(_) => debug!("Connection is already closed"),
            None => debug!("No connection exists to close"),
        }

        self.transition(ConnectionEvent::CloseFinished);
    }

    fn transition(&mut self, event: ConnectionEvent) {
        let next = self.state.apply(event);
        if next != self.state {
            debug!(from = %self.state, to = %next, ?event, "State transition");
            self.state = next;
        }
    }
}
