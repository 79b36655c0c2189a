use log::debug;
use rand::seq::SliceRandom;
use std::time::Instant;

use crate::types::{
    error::{Error, Result},
    Address,
};

// A single entry in the pool with its connection bookkeeping
#[derive(Debug)]
struct Server {
    address: Address,
    reconnects: u64,
    last_attempt: Option<Instant>,
    did_connect: bool,
}

impl Server {
    fn new(address: Address) -> Self {
        Self {
            address,
            reconnects: 0,
            last_attempt: None,
            did_connect: false,
        }
    }
}

/// The ordered list of server addresses the client cycles through
///
/// The head of the list is always the current server. Selecting the next server rotates the
/// head to the back of the list, unless it has exhausted its reconnect attempts in which case
/// it is dropped from the pool entirely.
pub struct ServerPool {
    servers: Vec<Server>,
    max_reconnects: Option<u64>,
}

impl ServerPool {
    pub fn new(addresses: Vec<Address>, max_reconnects: Option<u64>, no_randomize: bool) -> Self {
        let mut servers = addresses.into_iter().map(Server::new).collect::<Vec<_>>();
        if !no_randomize {
            servers.shuffle(&mut rand::thread_rng());
        }
        Self {
            servers,
            max_reconnects,
        }
    }

    /// The address at the head of the pool
    pub fn current_server(&self) -> Result<Address> {
        self.servers
            .first()
            .map(|server| server.address.clone())
            .ok_or(Error::NoServers(None))
    }

    /// Rotate the head of the pool to the back and return the new head
    ///
    /// A server that has reached the maximum number of reconnect attempts is removed instead of
    /// rotated.
    pub fn select_next_server(&mut self) -> Result<Address> {
        if self.servers.is_empty() {
            return Err(Error::NoServers(None));
        }
        let server = self.servers.remove(0);
        match self.max_reconnects {
            Some(max) if server.reconnects >= max => {
                debug!(
                    "Dropping server '{}' after {} reconnect attempts",
                    server.address, server.reconnects
                );
            }
            _ => self.servers.push(server),
        }
        self.current_server()
    }

    /// Record a connect attempt against the current server
    pub fn record_attempt(&mut self) {
        if let Some(server) = self.servers.first_mut() {
            server.reconnects += 1;
            server.last_attempt = Some(Instant::now());
        }
    }

    /// Record a successful connection to the current server, resetting its attempt counter
    pub fn record_success(&mut self) {
        if let Some(server) = self.servers.first_mut() {
            server.reconnects = 0;
            server.did_connect = true;
        }
    }

    /// Add addresses discovered through server announcements
    ///
    /// Already known addresses are ignored. Servers are never removed by a merge.
    pub fn merge_discovered(&mut self, addresses: &[Address]) {
        for address in addresses {
            if self.servers.iter().any(|server| &server.address == address) {
                continue;
            }
            debug!("Adding discovered server '{}' to the pool", address);
            self.servers.push(Server::new(address.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
