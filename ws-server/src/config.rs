//! Configuration for the WebSocket server

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{Result, ServerError};

/// Settings for [`SyncServer`](crate::SyncServer)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on; port 0 picks a free port
    pub bind_addr: SocketAddr,

    /// Origins allowed to open a socket; `*` allows any
    pub allowed_origins: Vec<String>,

    /// Largest accepted inbound message in bytes
    pub max_frame_size: usize,

    /// Outbound frames buffered per connection before new ones are dropped
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            allowed_origins: vec!["*".to_string()],
            max_frame_size: 64 * 1024,
            outbound_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config bound to an ephemeral loopback port, for tests
    pub fn local() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ..Default::default()
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins
            .into_iter()
            .map(Into::into)
            .map(|o: String| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_outbound_capacity(mut self, outbound_capacity: usize) -> Self {
        self.outbound_capacity = outbound_capacity;
        self
    }

    /// Whether a handshake carrying `origin` may be upgraded
    ///
    /// Requests without an `Origin` header come from non-browser clients and
    /// are always allowed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        let origin = origin.trim_end_matches('/');
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }

    pub fn validate(&self) -> Result<()> {
        if self.allowed_origins.is_empty() {
            return Err(ServerError::Configuration(
                "allowed_origins must not be empty".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ServerError::Configuration(
                "max_frame_size must be positive".to_string(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(ServerError::Configuration(
                "outbound_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.port(), 3000);
        assert!(config.origin_allowed(Some("https://anywhere.example")));
        assert!(config.origin_allowed(None));
    }

    #[test]
    fn test_origin_allow_list() {
        let config = ServerConfig::default()
            .with_allowed_origins(["https://remote.example/", " http://localhost:5173 "]);

        assert!(config.origin_allowed(Some("https://remote.example")));
        assert!(config.origin_allowed(Some("HTTPS://REMOTE.EXAMPLE")));
        assert!(config.origin_allowed(Some("http://localhost:5173")));
        assert!(!config.origin_allowed(Some("https://evil.example")));
        assert!(config.origin_allowed(None));
    }

    #[test]
    fn test_validate() {
        assert!(ServerConfig::default()
            .with_allowed_origins(Vec::<String>::new())
            .validate()
            .is_err());
        assert!(ServerConfig::default().with_max_frame_size(0).validate().is_err());
        assert!(ServerConfig::default()
            .with_outbound_capacity(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_with_port() {
        let config = ServerConfig::local().with_port(4010);
        assert_eq!(config.bind_addr.port(), 4010);
        assert!(config.bind_addr.ip().is_loopback());
    }
}
