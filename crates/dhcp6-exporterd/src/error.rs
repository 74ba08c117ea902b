//! Error types for the exporter.
//!
//! Nothing here is fatal to the host: route operations that fail end in a
//! log line and a dropped intent. The enum exists so that every stage of a
//! pipeline can say precisely why it gave up.

use crate::transport::ResponseError;
use nxos_types::{ParseError, RpcException};
use thiserror::Error;

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors that can occur while exporting leases to a switch.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Configuration validation error.
    #[error("invalid configuration for {field}: {message}")]
    Config {
        /// The offending field, dotted for nested maps.
        field: String,
        message: String,
    },

    /// Configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP exchange itself failed.
    #[error("transport error: {0}")]
    Transport(ResponseError),

    /// The device, or decoding of its reply, raised a JSON-RPC error.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcException),

    /// HTTP 401 without a carried RPC exception.
    #[error("unauthorized")]
    Unauthorized,

    /// A reply decoded but held no results.
    #[error("empty response")]
    EmptyResponse,

    /// An HTTP status the policy does not accept.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Malformed or short table in a command reply.
    #[error("malformed response: {0}")]
    Table(#[from] ParseError),

    /// No active IA_NA lease shares the (DUID, IAID) of a prefix lease.
    #[error("no active IA_NA lease found for {duid} iaid {iaid}")]
    MissingSibling { duid: String, iaid: u32 },

    /// Hardware address not visible in the switch neighbor table.
    #[error("hardware address {0} has no VLAN interface on the switch")]
    MissingHardwareAddress(String),

    /// HTTPS targets are not supported yet.
    #[error("TLS connections are not implemented")]
    TlsNotImplemented,

    /// Work submitted to a pool that is not running.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// The payload cannot be used with the requested operation.
    #[error("unsupported intent: {0}")]
    UnsupportedIntent(String),

    /// Construction-time invariant of a route intent was violated.
    #[error("invalid route intent: {0}")]
    InvalidIntent(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ExporterError {
    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_intent(message: impl Into<String>) -> Self {
        Self::InvalidIntent(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedIntent(message.into())
    }
}
