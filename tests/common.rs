#![allow(dead_code)]

use plover::{Address, Client, ClientState};

use futures::stream::StreamExt;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::mpsc,
    time,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct MockServerConfig {
    pub max_payload: u64,
    // The number of `PONG`s the server will send in response to `PING`s per connection. A
    // handshake consumes one. `None` answers every `PING`.
    pub pong_limit: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            max_payload: 1048576,
            pong_limit: None,
        }
    }
}

enum Command {
    SendRaw(String),
    Bounce,
}

/// An in-process server good enough to exercise the client protocol
///
/// Every line received from the client, including payload lines, is forwarded to the test. The
/// test drives server behavior by injecting raw protocol output or bouncing the connection.
/// After a bounce the server accepts the next connection, which lets reconnect logic run
/// against it.
pub struct MockServer {
    port: u16,
    command_tx: mpsc::UnboundedSender<Command>,
    lines_rx: mpsc::UnboundedReceiver<String>,
}

impl MockServer {
    pub async fn new() -> Self {
        Self::with_config(MockServerConfig::default()).await
    }

    pub async fn with_config(config: MockServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("to bind the mock server");
        let port = listener.local_addr().expect("to get the local address").port();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let info_line = format!(
            "INFO {{\"server_id\":\"mock\",\"version\":\"2.6.0\",\"go\":\"go1.16.0\",\
             \"host\":\"127.0.0.1\",\"port\":{},\"max_payload\":{},\"proto\":1}}\r\n",
            port, config.max_payload
        );
        tokio::spawn(run(listener, info_line, config, command_rx, lines_tx));
        Self {
            port,
            command_tx,
            lines_rx,
        }
    }

    pub fn address(&self) -> Address {
        format!("127.0.0.1:{}", self.port)
            .parse()
            .expect("to parse the mock server address")
    }

    /// Inject raw bytes into the current connection
    pub fn send_raw(&self, raw: &str) {
        self.command_tx
            .send(Command::SendRaw(String::from(raw)))
            .expect("the mock server stopped");
    }

    /// Drop the current connection. The server will accept a new one.
    pub fn bounce(&self) {
        self.command_tx
            .send(Command::Bounce)
            .expect("the mock server stopped");
    }

    /// The next line received from the client with its terminator stripped
    pub async fn next_line(&mut self) -> String {
        time::timeout(WAIT_TIMEOUT, self.lines_rx.recv())
            .await
            .expect("timed out waiting for a client line")
            .expect("the mock server stopped")
    }

    /// Skip lines until one starts with `prefix` and return it
    pub async fn wait_for_line(&mut self, prefix: &str) -> String {
        loop {
            let line = self.next_line().await;
            if line.starts_with(prefix) {
                return line;
            }
        }
    }
}

async fn run(
    listener: TcpListener,
    info_line: String,
    config: MockServerConfig,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    lines_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(_) => return,
        };
        let (read_half, mut write_half) = stream.into_split();
        if write_half.write_all(info_line.as_bytes()).await.is_err() {
            continue;
        }
        let mut reader = BufReader::new(read_half);
        let mut pongs_sent = 0;
        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    let line = String::from(line.trim_end_matches("\r\n"));
                    if line == "PING" {
                        let answer = match config.pong_limit {
                            Some(limit) => pongs_sent < limit,
                            None => true,
                        };
                        if answer {
                            pongs_sent += 1;
                            if write_half.write_all(b"PONG\r\n").await.is_err() {
                                break;
                            }
                        }
                    }
                    let _ = lines_tx.send(line);
                }
                command = command_rx.recv() => {
                    match command {
                        Some(Command::SendRaw(raw)) => {
                            if write_half.write_all(raw.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Bounce) => {
                            let _ = write_half.shutdown().await;
                            break;
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

/// Wait until the client reports a state matching the predicate
pub async fn wait_for_state<F>(client: &Client, predicate: F)
where
    F: Fn(&ClientState) -> bool,
{
    let mut states = client.state_stream();
    let wait = async {
        while let Some(state) = states.next().await {
            if predicate(&state) {
                return;
            }
        }
        panic!("the state stream ended");
    };
    time::timeout(WAIT_TIMEOUT, wait)
        .await
        .expect("timed out waiting for a client state");
}
