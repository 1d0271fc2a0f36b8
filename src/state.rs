use std::fmt;

/// Lifecycle of the single connection/channel pair owned by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChannelOpening,
    ExchangeDeclaring,
    Ready,
    Closing,
    Closed,
}

/// Lifecycle events, fed to [`ConnectionState::apply`] as they are observed
/// on the reactor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    DialStarted,
    ConnectionOpened,
    ChannelOpened,
    ExchangeDeclared,
    /// The channel closed without `close()` having been requested.
    ChannelLost,
    /// The connection dropped without `close()` having been requested.
    ConnectionLost,
    CloseRequested,
    CloseFinished,
}

impl ConnectionState {
    /// Single transition function for the whole lifecycle. Events that do not
    /// apply in the current state leave it unchanged.
    pub fn apply(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (Disconnected, DialStarted) => Connecting,
            (Connecting, ConnectionOpened) => ChannelOpening,
            (ChannelOpening, ChannelOpened) => ExchangeDeclaring,
            (ExchangeDeclaring, ExchangeDeclared) => Ready,
            // Unexpected channel loss while not stopping: reopen the channel
            // on the still-open connection.
            (Ready, ChannelLost) => ChannelOpening,
            // Connection loss is not auto-redialed; the publisher stalls
            // until restarted.
            (Connecting | ChannelOpening | ExchangeDeclaring | Ready, ConnectionLost) => {
                Disconnected
            }
            (Closed, CloseRequested) => Closed,
            (_, CloseRequested) => Closing,
            (Closing, CloseFinished) => Closed,
            (state, _) => state,
        }
    }

    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    pub fn is_stopping(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::ChannelOpening => "channel-opening",
            ConnectionState::ExchangeDeclaring => "exchange-declaring",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
