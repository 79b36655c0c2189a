#[cfg(feature = "tls")]
use crate::tls_or_tcp_stream::TlsError;
use crate::types::{ProtocolError, Sid, Subject};
use std::{fmt, io};

/// All errors that can be returned from [`Client`](crate::Client) operations
#[derive(Debug)]
pub enum Error {
    /// The client was closed and can no longer be used
    ClientClosed,
    /// A timeout of zero (or less) was specified
    InvalidTimeout,
    InvalidAddress(String),
    #[cfg(feature = "rustls-tls")]
    InvalidDnsName(String),
    InvalidNetworkScheme(String),
    InvalidServerControl(String),
    InvalidSubject(String),
    InvalidTerminator(Vec<u8>),
    Io(io::Error),
    /// The payload is larger than the server advertised `max_payload`
    MaxPayload { size: usize, max_payload: u64 },
    /// Every server in the pool was tried and none could be connected to. Carries the error
    /// from the last attempt, if any.
    NoServers(Option<Box<Error>>),
    NotConnected,
    NotEnoughData,
    /// A server reported error that is fatal to the connection
    Protocol(ProtocolError),
    /// A write was attempted while reconnecting and the pending buffer is full
    ReconnectBufferExceeded { size: usize, limit: usize },
    /// A subscription's pending queue could not keep pace and a message was dropped
    SlowConsumer { sid: Sid, subject: Subject },
    StaleConnection,
    Timeout,
    #[cfg(feature = "tls")]
    Tls(TlsError),
    /// The server or client requires TLS but no TLS feature is enabled or no TLS config was set
    TlsDisabled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClientClosed => write!(f, "client closed"),
            Error::InvalidTimeout => write!(f, "timeout must be greater than zero"),
            Error::InvalidAddress(address) => write!(f, "invalid address {:?}", address),
            #[cfg(feature = "rustls-tls")]
            Error::InvalidDnsName(domain) => write!(f, "invalid dns name {:?}", domain),
            Error::InvalidNetworkScheme(scheme) => {
                write!(f, "invalid network scheme {:?}", scheme)
            }
            Error::InvalidServerControl(line) => {
                write!(f, "invalid server control line {:?}", line)
            }
            Error::InvalidSubject(subject) => write!(f, "invalid subject {:?}", subject),
            Error::InvalidTerminator(terminator) => {
                write!(f, "invalid message terminator {:?}", terminator)
            }
            Error::Io(e) => write!(f, "{}", e),
            Error::MaxPayload { size, max_payload } => write!(
                f,
                "payload of {} bytes exceeds server max payload of {} bytes",
                size, max_payload
            ),
            Error::NoServers(last_error) => {
                write!(f, "no servers available")?;
                if let Some(e) = last_error {
                    write!(f, ", last error: {}", e)?;
                }
                Ok(())
            }
            Error::NotConnected => write!(f, "not connected"),
            Error::NotEnoughData => write!(f, "not enough data"),
            Error::Protocol(e) => write!(f, "server error '{}'", e),
            Error::ReconnectBufferExceeded { size, limit } => write!(
                f,
                "write of {} bytes exceeds reconnect buffer limit of {} bytes",
                size, limit
            ),
            Error::SlowConsumer { sid, subject } => {
                write!(f, "slow consumer, sid '{}' subject '{}'", sid, subject)
            }
            Error::StaleConnection => write!(f, "{}", crate::util::STALE_CONNECTION),
            Error::Timeout => write!(f, "timeout"),
            #[cfg(feature = "tls")]
            Error::Tls(e) => write!(f, "{}", e),
            Error::TlsDisabled => write!(f, "tls is required but not available"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(feature = "tls")]
impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        Error::Tls(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
