//! Route apply/remove against one NX-OS switch.
//!
//! Every operation is a short pipeline of [`Stage`]s: an optional lookup
//! that resolves an interface or next hop from the switch's own route
//! table, then one command batch that changes the route. Each stage talks
//! to the switch through a [`CommandChannel`]; the public entry points
//! spawn the pipeline on the transport pool and return immediately.

use crate::commands::{
    build_clear_neighbor_cmd, build_no_route_cmd, build_route_cmd, build_show_route_cmd,
    host_prefix, is_vlan_interface, network_prefix, SHOW_IPV6_NEIGHBOR,
};
use crate::error::{ExporterError, Result};
use crate::intent::{RouteIntent, RoutePayload};
use crate::lease::{find_active_na_lease, LeaseStore};
use crate::metrics::MetricsCollector;
use crate::pool::Spawn;
use crate::transport::{CommandChannel, RpcReply};
use crate::types::IaType;
use nxos_types::rpc::{RpcBatch, RpcResponse};
use nxos_types::tables::{parse_output, NeighborLookupResponse, RouteLookupResponse};
use nxos_types::{MacAddress, ParseError};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Hardware address to VLAN interface name, as seen by the switch.
pub type HwAddrMap = BTreeMap<MacAddress, String>;

/// Whether a route is being installed or withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Remove,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Apply => "apply",
            Direction::Remove => "remove",
        })
    }
}

/// A fully resolved route change, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChange {
    pub direction: Direction,
    pub ia_type: IaType,
    /// `<addr>/<len>`
    pub destination: String,
    /// Interface name or next-hop address.
    pub via: String,
    /// Interface whose neighbor cache is flushed after removal.
    pub flush_interface: Option<String>,
}

impl RouteChange {
    /// The command batch implementing this change.
    ///
    /// A removal with a flush interface sends both commands in one batch,
    /// route first.
    pub fn batch(&self) -> RpcBatch {
        match self.direction {
            Direction::Apply => RpcBatch::single(build_route_cmd(&self.destination, &self.via)),
            Direction::Remove => {
                let mut batch = RpcBatch::single(build_no_route_cmd(&self.destination, &self.via));
                if let Some(if_name) = &self.flush_interface {
                    // ids 1 and 2 are distinct, push cannot fail
                    let _ = batch.push(2, build_clear_neighbor_cmd(if_name));
                }
                batch
            }
        }
    }
}

/// What a lookup stage asks the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Interface answering for a relay link address.
    LinkInterface {
        link_address: Ipv6Addr,
        leased_address: Ipv6Addr,
    },
    /// VLAN interface currently routing a leased address.
    LeasedInterface { leased_address: Ipv6Addr },
    /// Current next hop of a delegated prefix.
    PrefixNextHop { prefix: Ipv6Addr, prefix_len: u8 },
}

impl Lookup {
    pub fn command(&self) -> String {
        match self {
            Lookup::LinkInterface { link_address, .. } => {
                build_show_route_cmd(&host_prefix(link_address))
            }
            Lookup::LeasedInterface { leased_address } => {
                build_show_route_cmd(&host_prefix(leased_address))
            }
            Lookup::PrefixNextHop { prefix, prefix_len } => {
                build_show_route_cmd(&network_prefix(prefix, *prefix_len))
            }
        }
    }
}

/// One state of a route pipeline.
#[derive(Debug)]
pub enum Stage {
    Lookup { lookup: Lookup, direction: Direction },
    Apply(RouteChange),
    /// Finished; `None` when there was nothing to change.
    Done(Option<RouteChange>),
    Failed(ExporterError),
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done(_) | Stage::Failed(_))
    }
}

/// How a route command reply was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Success,
    /// HTTP 500: the device rejects semantically empty commands, such as
    /// removing a route that is already gone, this way.
    BenignNoop,
}

/// Judges the reply to a route command.
///
/// Transport error first, then HTTP status, then the RPC exception, then
/// the result list.
pub fn interpret_reply(reply: &RpcReply) -> Result<ReplyOutcome> {
    if !reply.error.is_success() {
        return Err(ExporterError::Transport(reply.error));
    }
    match reply.status {
        200 => {}
        401 => {
            return Err(reply
                .exception
                .clone()
                .map(ExporterError::Rpc)
                .unwrap_or(ExporterError::Unauthorized))
        }
        500 => return Ok(ReplyOutcome::BenignNoop),
        _ => {
            if let Some(ex) = &reply.exception {
                return Err(ExporterError::Rpc(ex.clone()));
            }
        }
    }
    if reply.results.is_empty() {
        return Err(reply
            .exception
            .clone()
            .map(ExporterError::Rpc)
            .unwrap_or(ExporterError::EmptyResponse));
    }
    Ok(ReplyOutcome::Success)
}

/// Extracts the single result of a lookup reply.
///
/// Lookups are stricter than route commands: anything but a clean 200 with
/// at least one result fails.
pub fn lookup_result(reply: &RpcReply) -> Result<&RpcResponse> {
    if !reply.error.is_success() {
        return Err(ExporterError::Transport(reply.error));
    }
    if let Some(ex) = &reply.exception {
        return Err(ExporterError::Rpc(ex.clone()));
    }
    match reply.status {
        200 => reply.results.first().ok_or(ExporterError::EmptyResponse),
        401 => Err(ExporterError::Unauthorized),
        status => Err(ExporterError::Status(status)),
    }
}

/// NX-OS management client for route synchronization.
#[derive(Clone)]
pub struct SwitchClient {
    channel: Arc<dyn CommandChannel>,
    spawner: Arc<dyn Spawn>,
    leases: Arc<dyn LeaseStore>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SwitchClient {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        spawner: Arc<dyn Spawn>,
        leases: Arc<dyn LeaseStore>,
    ) -> Self {
        Self {
            channel,
            spawner,
            leases,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The switch URL, used to tag log lines.
    pub fn connection_name(&self) -> &str {
        self.channel.connection_name()
    }

    pub fn lease_store(&self) -> &Arc<dyn LeaseStore> {
        &self.leases
    }

    /// Installs the route described by `intent` in the background.
    ///
    /// Returns false if the work could not be queued.
    pub fn apply_route(&self, intent: RouteIntent) -> bool {
        self.submit(intent, Direction::Apply)
    }

    /// Withdraws the route described by `intent` in the background.
    pub fn remove_route(&self, intent: RouteIntent) -> bool {
        self.submit(intent, Direction::Remove)
    }

    fn submit(&self, intent: RouteIntent, direction: Direction) -> bool {
        let client = self.clone();
        let queued = self.spawner.spawn_boxed(Box::pin(async move {
            client.run(intent, direction).await;
        }));
        if !queued {
            warn!(
                connection = %self.connection_name(),
                %direction,
                "Route operation not queued, pool stopped"
            );
        }
        queued
    }

    /// Runs the whole pipeline for one intent and returns its terminal stage.
    #[instrument(
        skip(self, intent),
        fields(
            connection = %self.channel.connection_name(),
            ia_type = %intent.classification(),
            intent = %intent,
        )
    )]
    pub async fn run(&self, intent: RouteIntent, direction: Direction) -> Stage {
        let started = Instant::now();
        let ia_type = intent.ia_type();
        let mut stage = self.plan(&intent, direction);
        while !stage.is_terminal() {
            stage = self.step(stage).await;
        }

        if let Some(m) = &self.metrics {
            m.observe_route_latency(started.elapsed().as_secs_f64());
        }
        if let Stage::Failed(e) = &stage {
            error!(%ia_type, %direction, error = %e, "Route operation abandoned");
            if let Some(m) = &self.metrics {
                m.record_route_failure();
            }
        }
        stage
    }

    /// First stage for `intent`.
    pub fn plan(&self, intent: &RouteIntent, direction: Direction) -> Stage {
        match (intent.payload(), direction) {
            (
                RoutePayload::NaApply {
                    link_address,
                    leased_address,
                },
                _,
            ) => Stage::Lookup {
                lookup: Lookup::LinkInterface {
                    link_address: *link_address,
                    leased_address: *leased_address,
                },
                direction,
            },
            (
                RoutePayload::NaFastApply {
                    interface,
                    leased_address,
                },
                _,
            ) => Stage::Apply(na_change(direction, leased_address, interface)),
            (
                RoutePayload::PdApply {
                    next_hop,
                    prefix,
                    prefix_len,
                },
                _,
            ) => Stage::Apply(pd_change(direction, prefix, *prefix_len, next_hop)),
            (RoutePayload::NaFuzzyRemove { leased_address }, Direction::Remove) => Stage::Lookup {
                lookup: Lookup::LeasedInterface {
                    leased_address: *leased_address,
                },
                direction,
            },
            (RoutePayload::PdFuzzyRemove { prefix, prefix_len }, Direction::Remove) => {
                let sibling = find_active_na_lease(
                    self.leases.as_ref(),
                    intent.duid(),
                    intent.iaid(),
                    self.metrics.as_deref(),
                );
                match sibling {
                    Some(lease) => {
                        debug!(
                            next_hop = %lease.address,
                            "Next hop taken from sibling IA_NA lease"
                        );
                        Stage::Apply(pd_change(direction, prefix, *prefix_len, &lease.address))
                    }
                    None => Stage::Lookup {
                        lookup: Lookup::PrefixNextHop {
                            prefix: *prefix,
                            prefix_len: *prefix_len,
                        },
                        direction,
                    },
                }
            }
            (payload, Direction::Apply) => Stage::Failed(ExporterError::unsupported(format!(
                "{} cannot be applied",
                payload
            ))),
        }
    }

    /// Advances a non-terminal stage by one round trip.
    pub async fn step(&self, stage: Stage) -> Stage {
        match stage {
            Stage::Lookup { lookup, direction } => self.resolve(lookup, direction).await,
            Stage::Apply(change) => self.send_change(change).await,
            terminal => terminal,
        }
    }

    async fn resolve(&self, lookup: Lookup, direction: Direction) -> Stage {
        let reply = self.channel.execute(RpcBatch::single(lookup.command())).await;
        let table = match lookup_table(&reply) {
            Ok(table) => table,
            Err(e) => return Stage::Failed(e),
        };
        debug!(?lookup, ?table, "Route lookup received");

        match lookup {
            Lookup::LinkInterface { leased_address, .. } => {
                match table.first_interface(|_| true) {
                    Ok(if_name) => Stage::Apply(na_change(direction, &leased_address, if_name)),
                    Err(e) => Stage::Failed(e.into()),
                }
            }
            Lookup::LeasedInterface { leased_address } => {
                match table.first_interface(is_vlan_interface) {
                    Ok(if_name) => Stage::Apply(na_change(direction, &leased_address, if_name)),
                    Err(e) => Stage::Failed(e.into()),
                }
            }
            Lookup::PrefixNextHop { prefix, prefix_len } => {
                if !table.has_prefixes() {
                    debug!(
                        prefix = %network_prefix(&prefix, prefix_len),
                        "Prefix not routed on switch, nothing to remove"
                    );
                    return Stage::Done(None);
                }
                match table.first_next_hop() {
                    Some(hop) => Stage::Apply(RouteChange {
                        direction,
                        ia_type: IaType::Pd,
                        destination: network_prefix(&prefix, prefix_len),
                        via: hop.to_string(),
                        flush_interface: None,
                    }),
                    None => Stage::Failed(ParseError::MissingValue("ipnexthop").into()),
                }
            }
        }
    }

    async fn send_change(&self, change: RouteChange) -> Stage {
        let reply = self.channel.execute(change.batch()).await;
        match interpret_reply(&reply) {
            Ok(ReplyOutcome::Success) => {
                info!(
                    ia_type = %change.ia_type,
                    src = %change.destination,
                    dst = %change.via,
                    direction = %change.direction,
                    "Route updated on switch"
                );
                if let Some(m) = &self.metrics {
                    m.record_route(change.direction == Direction::Apply);
                }
                Stage::Done(Some(change))
            }
            Ok(ReplyOutcome::BenignNoop) => {
                info!(
                    ia_type = %change.ia_type,
                    src = %change.destination,
                    dst = %change.via,
                    direction = %change.direction,
                    "Switch reported nothing to change, treated as no-op"
                );
                if let Some(m) = &self.metrics {
                    m.record_benign_noop();
                }
                Stage::Done(Some(change))
            }
            Err(e) => Stage::Failed(e),
        }
    }

    /// Resolves the VLAN interface of every hardware address the switch's
    /// neighbor table knows about.
    pub async fn hardware_address_map(&self) -> Result<HwAddrMap> {
        let reply = self.channel.execute(RpcBatch::single(SHOW_IPV6_NEIGHBOR)).await;
        let result = lookup_result(&reply)?;
        let neighbors: NeighborLookupResponse = parse_output(&result.result)?;

        let mut map = HwAddrMap::new();
        for adj in neighbors.adjacencies() {
            if !is_vlan_interface(&adj.intf_out) {
                continue;
            }
            let Some(raw) = adj.mac.as_deref() else {
                continue;
            };
            match MacAddress::from_cisco(raw) {
                Ok(mac) => {
                    map.insert(mac, adj.intf_out.clone());
                }
                Err(e) => debug!(error = %e, "Skipping neighbor entry"),
            }
        }
        debug!(
            connection = %self.connection_name(),
            entries = map.len(),
            "Hardware address mapping received"
        );
        Ok(map)
    }

    /// Callback form of [`hardware_address_map`](Self::hardware_address_map),
    /// run on the transport pool.
    pub fn lookup_hardware_address_to_interface_mapping<F>(&self, handler: F) -> bool
    where
        F: FnOnce(Result<HwAddrMap>) + Send + 'static,
    {
        let client = self.clone();
        self.spawner.spawn_boxed(Box::pin(async move {
            handler(client.hardware_address_map().await);
        }))
    }
}

fn lookup_table(reply: &RpcReply) -> Result<RouteLookupResponse> {
    let result = lookup_result(reply)?;
    Ok(parse_output(&result.result)?)
}

fn na_change(direction: Direction, leased: &Ipv6Addr, if_name: &str) -> RouteChange {
    RouteChange {
        direction,
        ia_type: IaType::Na,
        destination: host_prefix(leased),
        via: if_name.to_string(),
        flush_interface: match direction {
            Direction::Apply => None,
            Direction::Remove => Some(if_name.to_string()),
        },
    }
}

fn pd_change(direction: Direction, prefix: &Ipv6Addr, len: u8, next_hop: &Ipv6Addr) -> RouteChange {
    RouteChange {
        direction,
        ia_type: IaType::Pd,
        destination: network_prefix(prefix, len),
        via: next_hop.to_string(),
        flush_interface: None,
    }
}
