use std::time::SystemTime;

/// Metadata for one connected client, tracked by the server for the
/// connection cap and for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectedClient {
    pub address: String,
    pub time_connected: SystemTime,
}
