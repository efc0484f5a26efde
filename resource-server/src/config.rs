//! Configuration for the resource server

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::ServerError;

/// Configuration for [`ResourceServer`](crate::ResourceServer)
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Ports tried in order until one binds
    /// Default: (5683, 5783)
    pub port_range: (u16, u16),

    /// Address the listener binds to
    /// Default: 0.0.0.0
    pub bind_addr: IpAddr,

    /// How long a request may stay pending before the server answers
    /// "service unavailable" and abandons it
    /// Default: 10 seconds
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_range: (5683, 5783),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for tests and local tools: loopback only, short timeout
    pub fn local() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            request_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let (start, end) = self.port_range;
        if start > end {
            return Err(ServerError::Config(format!(
                "port range start ({start}) is above its end ({end})"
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ServerError::Config("request_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}
