//! DHCPv6 lease to NX-OS route exporter.
//!
//! Keeps a Cisco NX-OS switch's IPv6 static routes in step with the leases
//! handed out by a DHCPv6 server: every active IA_NA address is routed to
//! the client's VLAN interface, every delegated prefix is routed via the
//! client's IA_NA address, and released or expired leases are withdrawn.
//!
//! # Architecture
//!
//! ```text
//! lease events ─▶ events::translate ─▶ RouteIntent ─▶ SwitchClient ─▶ HttpTransport ─▶ NX-API
//!                                                          ▲
//! HeartbeatMonitor ── discontinuity ─▶ Reconciler ─────────┘
//! ```
//!
//! The switch client and heartbeat never block their callers: work is
//! spawned on a [`pool::WorkerPool`] and failures end in a log line.

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod intent;
pub mod lease;
pub mod metrics;
pub mod pool;
pub mod reconciler;
pub mod service;
pub mod switch_client;
pub mod transport;
pub mod types;

pub use config::{ConnectionParams, ExporterConfig};
pub use error::{ExporterError, Result};
pub use events::LeaseEvent;
pub use heartbeat::HeartbeatMonitor;
pub use intent::{RouteIntent, RoutePayload};
pub use lease::{Lease6, LeaseStore, MemoryLeaseStore};
pub use metrics::MetricsCollector;
pub use reconciler::Reconciler;
pub use service::ExporterService;
pub use switch_client::{Direction, SwitchClient};
pub use transport::{CommandChannel, HttpTransport, NxapiChannel};
pub use types::{Duid, IaType};
