mod address;
pub(crate) mod error;
mod parser;
pub(crate) mod refs;
mod state;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

use crate::util;

pub use self::{
    address::Address,
    error::{Error, Result},
    refs::{ClientRef, ClientRefMut},
    state::ClientState,
};
pub(crate) use self::state::{ConnectionState, StateTransition, StateTransitionResult};

/// The type of a subscription identifier
pub type Sid = u64;

/// A protocol subject
///
/// Subjects are `.` separated alphanumeric tokens. A token may be the wildcard `*` matching a
/// single token, and the final token may be the full wildcard `>` matching one or more trailing
/// tokens.
#[derive(Clone, Debug, PartialEq)]
pub struct Subject {
    pub(crate) tokens: Vec<String>,
    pub(crate) full_wildcard: bool,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(util::SUBJECT_TOKEN_DELIMITER))?;
        if self.full_wildcard {
            if !self.tokens.is_empty() {
                write!(f, "{}", util::SUBJECT_TOKEN_DELIMITER)?;
            }
            write!(f, "{}", util::SUBJECT_FULL_WILDCARD)?;
        }
        Ok(())
    }
}

/// A message delivered to a subscription
#[derive(Debug, PartialEq)]
pub struct Msg {
    pub(crate) subject: Subject,
    pub(crate) sid: Sid,
    pub(crate) reply_to: Option<Subject>,
    pub(crate) payload: Vec<u8>,
}

impl Msg {
    pub(crate) fn new(subject: Subject, sid: Sid, reply_to: Option<Subject>, payload: Vec<u8>) -> Self {
        Self {
            subject,
            sid,
            reply_to,
            payload,
        }
    }

    /// The subject the message was published to
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// The sid of the subscription the message was delivered to
    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// The optional reply subject of the message
    pub fn reply_to(&self) -> Option<&Subject> {
        self.reply_to.as_ref()
    }

    /// The message's payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the message returning its payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// The credentials used to authenticate with a server
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Authorization {
    Token {
        auth_token: String,
    },
    UsernamePassword {
        #[serde(rename = "user")]
        username: String,
        #[serde(rename = "pass")]
        password: String,
    },
}

impl Authorization {
    /// Create token authorization
    pub fn token(auth_token: String) -> Self {
        Authorization::Token { auth_token }
    }

    /// Create username and password authorization
    pub fn username_password(username: String, password: String) -> Self {
        Authorization::UsernamePassword { username, password }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Token { auth_token } => write!(f, "{}", auth_token),
            Authorization::UsernamePassword { username, password } => write!(
                f,
                "{}{}{}",
                username,
                util::USERNAME_PASSWORD_SEPARATOR,
                password
            ),
        }
    }
}

impl FromStr for Authorization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (maybe_username, rest) = util::split_after(s, ':');
        Ok(match rest {
            Some(password) => Authorization::username_password(
                String::from(maybe_username),
                String::from(password),
            ),
            None => Authorization::token(String::from(s)),
        })
    }
}

/// As soon as the server accepts a connection from the client, it sends information about itself
/// and the configuration and security requirements necessary for the client to successfully
/// authenticate and exchange messages.
///
/// The server can also send an `INFO` at any time after the handshake, so updates are applied
/// asynchronously by the read loop.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Info {
    pub(crate) server_id: String,
    pub(crate) version: String,
    #[serde(default)]
    pub(crate) go: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) max_payload: u64,
    #[serde(default)]
    pub(crate) proto: i32,
    #[serde(default)]
    pub(crate) client_id: Option<u64>,
    #[serde(default)]
    pub(crate) auth_required: bool,
    #[serde(default, alias = "ssl_required")]
    pub(crate) tls_required: bool,
    #[serde(default)]
    pub(crate) tls_verify: bool,
    #[serde(default)]
    pub(crate) connect_urls: Vec<Address>,
}

impl Info {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The unique identifier of the server
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The version of the server
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The IP address the server is listening on
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port number the server is listening on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Maximum payload size, in bytes, that the server will accept from the client
    pub fn max_payload(&self) -> u64 {
        self.max_payload
    }

    /// An integer indicating the protocol version of the server
    pub fn proto(&self) -> i32 {
        self.proto
    }

    /// The internal client identifier in the server, if the server provided one
    pub fn client_id(&self) -> Option<u64> {
        self.client_id
    }

    /// If this is set, the client should try to authenticate upon connect
    pub fn auth_required(&self) -> bool {
        self.auth_required
    }

    /// If this is set, the client must perform the TLS handshake
    pub fn tls_required(&self) -> bool {
        self.tls_required
    }

    /// If this is set, the client must provide a valid certificate during the TLS handshake
    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// An optional list of server addresses the client can connect to
    ///
    /// Newly announced addresses are merged into the client's server pool for use during
    /// failover.
    pub fn connect_urls(&self) -> &[Address] {
        &self.connect_urls
    }
}

/// The `CONNECT` message is the client version of the `INFO` message, sent to the server once the
/// initial `INFO` has been received to provide connection and security information.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Connect {
    verbose: bool,
    pedantic: bool,
    tls_required: bool,
    #[serde(flatten)]
    authorization: Option<Authorization>,
    name: Option<String>,
    #[serde(rename = "lang")]
    language: String,
    version: String,
    protocol: i32,
    echo: bool,
}

impl Connect {
    /// Construct a new default `Connect`
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `true` if the connection is verbose
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Turn on `+OK` protocol acknowledgements \[default = `false`\]
    pub fn verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Return `true` if the connection is pedantic
    pub fn is_pedantic(&self) -> bool {
        self.pedantic
    }

    /// Turn on additional strict format checking, e.g. for properly formed subjects
    /// \[default = `false`\]
    pub fn pedantic(&mut self, pedantic: bool) -> &mut Self {
        self.pedantic = pedantic;
        self
    }

    /// Return `true` if the connection requires TLS
    pub fn is_tls_required(&self) -> bool {
        self.tls_required
    }

    /// Indicate that the client requires a TLS connection \[default = `false`\]
    pub fn tls_required(&mut self, tls_required: bool) -> &mut Self {
        self.tls_required = tls_required;
        self
    }

    /// Set the authorization to use a token
    pub fn auth_token(&mut self, auth_token: String) -> &mut Self {
        self.authorization = Some(Authorization::token(auth_token));
        self
    }

    /// Set the authorization to use a username and password
    pub fn username_password(&mut self, username: String, password: String) -> &mut Self {
        self.authorization = Some(Authorization::username_password(username, password));
        self
    }

    /// Remove all authorization
    pub fn clear_authorization(&mut self) -> &mut Self {
        self.authorization = None;
        self
    }

    // An address with credentials always overrides the client wide authorization.
    pub(crate) fn inherit_authorization(&mut self, authorization: &Authorization) {
        self.authorization = Some(authorization.clone());
    }

    /// Get the optional name of the client
    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the optional client name \[default = `None`\]
    pub fn name(&mut self, name: String) -> &mut Self {
        self.name = Some(name);
        self
    }

    /// Remove the optional client name
    pub fn clear_name(&mut self) -> &mut Self {
        self.name = None;
        self
    }

    /// Return `true` if echo is enabled on the connection
    pub fn is_echo(&self) -> bool {
        self.echo
    }

    /// If set to `true`, the server will echo originating messages from this connection to its
    /// own subscriptions \[default = `false`\]
    pub fn echo(&mut self, echo: bool) -> &mut Self {
        self.echo = echo;
        self
    }
}

impl Default for Connect {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            tls_required: false,
            authorization: None,
            name: None,
            language: String::from(util::CLIENT_LANGUAGE),
            version: String::from(util::CLIENT_VERSION),
            protocol: 1,
            echo: false,
        }
    }
}

/// Configuration of the connection engine
///
/// ```
/// use plover::Options;
/// use std::time::Duration;
///
/// let mut options = Options::new();
/// options
///     .reconnect_wait(Duration::from_millis(500))
///     .max_reconnects(Some(10))
///     .no_randomize(true);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub(crate) allow_reconnect: bool,
    pub(crate) max_reconnects: Option<u64>,
    pub(crate) reconnect_wait: Duration,
    pub(crate) reconnect_buffer_size: usize,
    pub(crate) tcp_connect_timeout: Duration,
    pub(crate) ping_interval: Option<Duration>,
    pub(crate) max_pings_out: u32,
    pub(crate) no_randomize: bool,
    pub(crate) pending_msgs_limit: usize,
    pub(crate) pending_bytes_limit: usize,
}

impl Options {
    /// Construct a new default `Options`
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic reconnection \[default = `true`\]
    pub fn allow_reconnect(&mut self, allow_reconnect: bool) -> &mut Self {
        self.allow_reconnect = allow_reconnect;
        self
    }

    /// The maximum number of reconnect attempts per server before it is dropped from the pool,
    /// `None` for unlimited \[default = `60`\]
    pub fn max_reconnects(&mut self, max_reconnects: Option<u64>) -> &mut Self {
        self.max_reconnects = max_reconnects;
        self
    }

    /// The time to wait between reconnect attempts \[default = `2s`\]
    pub fn reconnect_wait(&mut self, reconnect_wait: Duration) -> &mut Self {
        self.reconnect_wait = reconnect_wait;
        self
    }

    /// The maximum number of bytes buffered while reconnecting \[default = `8MiB`\]
    pub fn reconnect_buffer_size(&mut self, reconnect_buffer_size: usize) -> &mut Self {
        self.reconnect_buffer_size = reconnect_buffer_size;
        self
    }

    /// The timeout for establishing a TCP connection and completing the protocol handshake
    /// \[default = `10s`\]
    pub fn tcp_connect_timeout(&mut self, tcp_connect_timeout: Duration) -> &mut Self {
        self.tcp_connect_timeout = tcp_connect_timeout;
        self
    }

    /// The keep alive ping interval, `None` to disable the ping timer \[default = `120s`\]
    pub fn ping_interval(&mut self, ping_interval: Option<Duration>) -> &mut Self {
        self.ping_interval = ping_interval;
        self
    }

    /// The maximum number of unanswered pings before the connection is considered stale
    /// \[default = `2`\]
    pub fn max_pings_out(&mut self, max_pings_out: u32) -> &mut Self {
        self.max_pings_out = max_pings_out;
        self
    }

    /// Do not shuffle the server pool at construction \[default = `false`\]
    pub fn no_randomize(&mut self, no_randomize: bool) -> &mut Self {
        self.no_randomize = no_randomize;
        self
    }

    /// The maximum number of messages a subscription may have pending before newly delivered
    /// messages are dropped \[default = `65536`\]
    pub fn pending_msgs_limit(&mut self, pending_msgs_limit: usize) -> &mut Self {
        self.pending_msgs_limit = pending_msgs_limit;
        self
    }

    /// The maximum number of bytes a subscription may have pending before newly delivered
    /// messages are dropped \[default = `64MiB`\]
    pub fn pending_bytes_limit(&mut self, pending_bytes_limit: usize) -> &mut Self {
        self.pending_bytes_limit = pending_bytes_limit;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            allow_reconnect: true,
            max_reconnects: Some(util::DEFAULT_MAX_RECONNECTS),
            reconnect_wait: util::DEFAULT_RECONNECT_WAIT,
            reconnect_buffer_size: util::DEFAULT_RECONNECT_BUFFER_SIZE,
            tcp_connect_timeout: util::DEFAULT_TCP_CONNECT_TIMEOUT,
            ping_interval: Some(util::DEFAULT_PING_INTERVAL),
            max_pings_out: util::DEFAULT_MAX_PINGS_OUT,
            no_randomize: false,
            pending_msgs_limit: util::DEFAULT_PENDING_MSGS_LIMIT,
            pending_bytes_limit: util::DEFAULT_PENDING_BYTES_LIMIT,
        }
    }
}

/// Counters describing the traffic a connection has handled
///
/// Inbound counters are incremented for every received message, including messages for
/// subscriptions that have since been removed and messages dropped due to a slow consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub reconnects: u64,
}

/// All possible server reported errors carried by a `-ERR` line
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolError {
    UnknownProtocolOperation,
    AttemptedToConnectToRoutePort,
    AuthorizationViolation,
    AuthorizationTimeout,
    InvalidClientProtocol,
    MaximumControlLineExceeded,
    ParserError,
    SecureConnectionTlsRequired,
    StaleConnection,
    MaximumConnectionsExceeded,
    SlowConsumer,
    MaximumPayloadViolation,
    InvalidSubject,
    PermissionsViolationForSubscription(Subject),
    PermissionsViolationForPublish(Subject),
    /// An error message without a known classification. Treated as fatal to the connection.
    Unknown(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownProtocolOperation => {
                write!(f, "{}", util::UNKNOWN_PROTOCOL_OPERATION)
            }
            ProtocolError::AttemptedToConnectToRoutePort => {
                write!(f, "{}", util::ATTEMPTED_TO_CONNECT_TO_ROUTE_PORT)
            }
            ProtocolError::AuthorizationViolation => {
                write!(f, "{}", util::AUTHORIZATION_VIOLATION)
            }
            ProtocolError::AuthorizationTimeout => write!(f, "{}", util::AUTHORIZATION_TIMEOUT),
            ProtocolError::InvalidClientProtocol => {
                write!(f, "{}", util::INVALID_CLIENT_PROTOCOL)
            }
            ProtocolError::MaximumControlLineExceeded => {
                write!(f, "{}", util::MAXIMUM_CONTROL_LINE_EXCEEDED)
            }
            ProtocolError::ParserError => write!(f, "{}", util::PARSER_ERROR),
            ProtocolError::SecureConnectionTlsRequired => {
                write!(f, "{}", util::SECURE_CONNECTION_TLS_REQUIRED)
            }
            ProtocolError::StaleConnection => write!(f, "{}", util::STALE_CONNECTION),
            ProtocolError::MaximumConnectionsExceeded => {
                write!(f, "{}", util::MAXIMUM_CONNECTIONS_EXCEEDED)
            }
            ProtocolError::SlowConsumer => write!(f, "{}", util::SLOW_CONSUMER),
            ProtocolError::MaximumPayloadViolation => {
                write!(f, "{}", util::MAXIMUM_PAYLOAD_VIOLATION)
            }
            ProtocolError::InvalidSubject => write!(f, "{}", util::INVALID_SUBJECT),
            ProtocolError::PermissionsViolationForSubscription(subject) => write!(
                f,
                "{} {}",
                util::PERMISSIONS_VIOLATION_FOR_SUBSCRIPTION,
                subject
            ),
            ProtocolError::PermissionsViolationForPublish(subject) => {
                write!(f, "{} {}", util::PERMISSIONS_VIOLATION_FOR_PUBLISH, subject)
            }
            ProtocolError::Unknown(text) => write!(f, "{}", text),
        }
    }
}

/// Representation of all possible server control lines. A control line is the first line of a
/// message.
#[derive(Debug, PartialEq)]
pub(crate) enum ServerControl {
    Info(Info),
    Msg {
        subject: Subject,
        sid: Sid,
        reply_to: Option<Subject>,
        len: u64,
    },
    Ping,
    Pong,
    Ok,
    Err(ProtocolError),
}

/// Representation of all possible server messages. This is similar to `ServerControl` except the
/// `Msg` variant carries a complete message including its payload.
#[derive(Debug, PartialEq)]
pub(crate) enum ServerMessage {
    Info(Info),
    Msg(Msg),
    Ping,
    Pong,
    Ok,
    Err(ProtocolError),
}

impl From<ServerControl> for ServerMessage {
    fn from(control: ServerControl) -> Self {
        match control {
            ServerControl::Info(info) => ServerMessage::Info(info),
            // A `ServerControl::Msg` requires further parsing to read its payload and can not be
            // directly converted to a `ServerMessage::Msg`
            ServerControl::Msg { .. } => unreachable!(),
            ServerControl::Ping => ServerMessage::Ping,
            ServerControl::Pong => ServerMessage::Pong,
            ServerControl::Ok => ServerMessage::Ok,
            ServerControl::Err(e) => ServerMessage::Err(e),
        }
    }
}

/// Representation of all client control lines written to the server
pub(crate) enum ClientControl<'a> {
    Connect(&'a Connect),
    Pub(&'a Subject, Option<&'a Subject>, usize),
    Sub(Sid, &'a Subject, Option<&'a str>),
    Unsub(Sid, Option<u64>),
    Ping,
    Pong,
}

impl ClientControl<'_> {
    pub(crate) fn to_line(&self) -> String {
        match self {
            ClientControl::Connect(connect) => format!(
                "{} {}{}",
                util::CONNECT_OP_NAME,
                serde_json::to_string(connect).expect("to serialize Connect"),
                util::MESSAGE_TERMINATOR
            ),
            ClientControl::Pub(subject, reply_to, len) => match reply_to {
                Some(reply_to) => format!(
                    "{} {} {} {}{}",
                    util::PUB_OP_NAME,
                    subject,
                    reply_to,
                    len,
                    util::MESSAGE_TERMINATOR
                ),
                None => format!(
                    "{} {} {}{}",
                    util::PUB_OP_NAME,
                    subject,
                    len,
                    util::MESSAGE_TERMINATOR
                ),
            },
            ClientControl::Sub(sid, subject, queue_group) => match queue_group {
                Some(queue_group) => format!(
                    "{} {} {} {}{}",
                    util::SUB_OP_NAME,
                    subject,
                    queue_group,
                    sid,
                    util::MESSAGE_TERMINATOR
                ),
                None => format!(
                    "{} {} {}{}",
                    util::SUB_OP_NAME,
                    subject,
                    sid,
                    util::MESSAGE_TERMINATOR
                ),
            },
            ClientControl::Unsub(sid, max_msgs) => match max_msgs {
                Some(max_msgs) => format!(
                    "{} {} {}{}",
                    util::UNSUB_OP_NAME,
                    sid,
                    max_msgs,
                    util::MESSAGE_TERMINATOR
                ),
                None => format!("{} {}{}", util::UNSUB_OP_NAME, sid, util::MESSAGE_TERMINATOR),
            },
            ClientControl::Ping => {
                format!("{}{}", util::PING_OP_NAME, util::MESSAGE_TERMINATOR)
            }
            ClientControl::Pong => {
                format!("{}{}", util::PONG_OP_NAME, util::MESSAGE_TERMINATOR)
            }
        }
    }
}
