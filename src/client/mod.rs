//! Async client for the session relay.
//!
//! [`handle`] returns a process-wide client built lazily from the
//! environment; [`RelayClient::new`] builds an independent one.

mod config;
mod handler;
mod session_client;

use std::sync::OnceLock;

pub use config::{ClientConfig, DEFAULT_URL};
pub use handler::{SessionEventHandler, Subscription};
pub use session_client::{ClientState, RelayClient};

static HANDLE: OnceLock<RelayClient> = OnceLock::new();

/// The shared client. Built on first call; never connects by itself.
pub fn handle() -> &'static RelayClient {
    HANDLE.get_or_init(|| RelayClient::new(ClientConfig::from_env()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_singleton() {
        let first = handle() as *const RelayClient;
        let second = handle() as *const RelayClient;
        assert_eq!(first, second);
        assert_eq!(handle().state(), ClientState::Disconnected);
    }
}
