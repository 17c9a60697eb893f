//! HTTP Server Configuration
//!
//! Listen address and CORS settings.

use std::net::{AddrParseError, SocketAddr};

use serde::{Deserialize, Serialize};

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Address to bind to (default: "0.0.0.0:8089")
    #[serde(default = "default_addr")]
    pub addr: String,

    /// CORS allowed origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_addr() -> String {
    "0.0.0.0:8089".to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            cors_origins: Vec::new(),
        }
    }
}

impl HttpServerConfig {
    /// Create a new config bound to `addr`
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Parsed socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.addr.parse()
    }
}
