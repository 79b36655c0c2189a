use std::fmt;
use tokio::io::WriteHalf;

use crate::{tls_or_tcp_stream::TlsOrTcpStream, types::Address};

// Internal state representation. Identical to `ClientState` but additionally holds internal
// implementation details such as the write half of the connection.
//
// The writer operates at the raw byte layer instead of through an `Encoder`. This allows the
// payload passed to publish to be of type `&[u8]` without requiring a clone into an owned
// buffer. Only the read half goes through a codec.
pub enum ConnectionState {
    Connected(Address, WriteHalf<TlsOrTcpStream>),
    Connecting(Address),
    Disconnected,
    Reconnecting,
    Closed,
}

#[derive(Debug)]
pub enum StateTransition {
    ToConnecting(Address),
    ToConnected(Address, WriteHalf<TlsOrTcpStream>),
    ToDisconnected,
    ToReconnecting,
    ToClosed,
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransition::ToConnecting(address) => write!(f, "Connecting({})", address),
            StateTransition::ToConnected(address, _) => write!(f, "Connected({})", address),
            StateTransition::ToDisconnected => write!(f, "Disconnected"),
            StateTransition::ToReconnecting => write!(f, "Reconnecting"),
            StateTransition::ToClosed => write!(f, "Closed"),
        }
    }
}

// Used to return data out of a state transition. Leaving a connected state hands the old writer
// back to the caller so it can be shut down.
pub enum StateTransitionResult {
    None,
    Writer(WriteHalf<TlsOrTcpStream>),
}

/// The states of a [`Client`](struct.Client.html)
///
/// ```text
///                                   +--------+
///              +------------------->| Closed |<--------------------+
///              |                    +--------+                     |
///              |                         ^                         |
///              |                         |                         |
///       +--------------+          +------------+          +---------------+
///       | Disconnected |--------->| Connecting |--------->|   Connected   |
///       +--------------+          +------------+          +---------------+
///              ^                         ^                         |
///              |                         |                         v
///              |                  +--------------+                 |
///              +----------------->| Reconnecting |<----------------+
///                                 +--------------+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum ClientState {
    /// The client is connected to an address
    Connected(Address),
    /// The client is connecting to an address
    Connecting(Address),
    /// The client is not connected and not trying to connect
    Disconnected,
    /// The client lost its connection and is trying to re-establish one
    Reconnecting,
    /// The client is permanently closed and can no longer be used
    Closed,
}

impl ClientState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Connected(address) => write!(f, "Connected({})", address),
            ClientState::Connecting(address) => write!(f, "Connecting({})", address),
            ClientState::Disconnected => write!(f, "Disconnected"),
            ClientState::Reconnecting => write!(f, "Reconnecting"),
            ClientState::Closed => write!(f, "Closed"),
        }
    }
}

impl From<&ConnectionState> for ClientState {
    fn from(s: &ConnectionState) -> Self {
        match s {
            ConnectionState::Connected(address, _) => ClientState::Connected(address.clone()),
            ConnectionState::Connecting(address) => ClientState::Connecting(address.clone()),
            ConnectionState::Disconnected => ClientState::Disconnected,
            ConnectionState::Reconnecting => ClientState::Reconnecting,
            ConnectionState::Closed => ClientState::Closed,
        }
    }
}
