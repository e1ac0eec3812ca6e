// lib.rs - WebSocket command line tool library

#[path = "auth.rs"]
pub mod auth;
#[path = "config.rs"]
pub mod config;
#[path = "core.rs"]
mod core;
#[path = "message.rs"]
pub mod message;
#[path = "session.rs"]
pub mod session;
#[path = "template.rs"]
pub mod template;
#[path = "transport.rs"]
pub mod transport;

// Re-export core types
pub use crate::auth::{AuthContext, ChallengeKind, ChallengeParams, DigestResponse};
pub use crate::config::{ClientConfig, ConnectConfig, ExchangeSettings, PayloadConfig};
pub use crate::core::*;
pub use crate::session::{ExchangeEvent, ExchangeObserver, ExchangeReport, ExchangeState, ResponseManager};
pub use crate::transport::{Connection, WsConnection};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
