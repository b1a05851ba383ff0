use minkv_types::client::ConnectedClient;
use std::cell::RefCell;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::SystemTime;

/// Tracks clients connected to the server while enforcing the configured
/// maximum. Every connection lives on the one loop thread, so plain
/// interior mutability is all the synchronization required.
#[derive(Debug)]
pub(crate) struct ClientHandler {
    clients: RefCell<HashSet<ConnectedClient>>,
    maximum_clients: usize,
}

impl ClientHandler {
    pub(crate) fn new(maximum_clients: usize) -> Self {
        Self {
            clients: RefCell::new(HashSet::with_capacity(maximum_clients)),
            maximum_clients,
        }
    }

    pub(crate) fn connect(&self, addr: SocketAddr) -> Option<ConnectedClient> {
        let mut clients = self.clients.borrow_mut();
        if clients.len() >= self.maximum_clients {
            tracing::error!(
                connected = clients.len(),
                maximum = self.maximum_clients,
                "maximum clients reached or exceeded"
            );
            return None;
        }
        let client = ConnectedClient {
            address: format!("{addr}"),
            time_connected: SystemTime::now(),
        };
        clients.insert(client.clone());
        Some(client)
    }

    pub(crate) fn disconnect(&self, client: &ConnectedClient) {
        self.clients.borrow_mut().remove(client);
    }
}
