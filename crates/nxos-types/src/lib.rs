//! Wire-level types for talking to an NX-OS switch over NX-API (JSON-RPC).
//!
//! This crate is deliberately free of I/O. It provides:
//!
//! - [`rpc`]: encoding of `cli` command batches and decoding of single or
//!   batched JSON-RPC replies into [`RpcResponse`] values or an
//!   [`RpcException`]
//! - [`tables`]: the structured `TABLE_*`/`ROW_*` output of the `show`
//!   commands the exporter relies on, normalized so that a table is always a
//!   list of rows no matter whether the device emitted one object or an array
//! - [`MacAddress`]: hardware addresses, including the Cisco dotted
//!   `f6a5.486e.8aad` notation used in neighbor tables

mod mac;
pub mod rpc;
pub mod tables;

pub use mac::MacAddress;
pub use rpc::{RpcBatch, RpcCommand, RpcErrorKind, RpcException, RpcId, RpcResponse};
pub use tables::{
    AdjacencyRow, NeighborLookupResponse, PathRow, PrefixRow, RouteLookupResponse,
    UptimeResponse,
};

/// Common error type for parsing and shape failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("field \"{table}\" of response does not contain exactly 1 item (found {found})")]
    TableShape { table: &'static str, found: usize },

    #[error("{0} is empty")]
    MissingValue(&'static str),

    #[error("duplicate command id {0} in batch")]
    DuplicateCommandId(i64),

    #[error("failed to parse {response}: {reason}")]
    InvalidResponse {
        response: &'static str,
        reason: String,
    },
}
