//! Lease lifecycle events and their translation into route intents.
//!
//! Events arrive one JSON object per line, tagged by the DHCP hook that
//! produced them:
//!
//! ```json
//! {"hook": "lease6_select", "fake-allocation": false,
//!  "query": {"transaction-id": 12, "link-address": "2001:db8::1",
//!            "ia-na": {"iaid": 1, "address": "2001:db8::5"},
//!            "ia-pd": {"iaid": 1}},
//!  "lease": {"address": "2001:db8::5", "type": "IA_NA", "iaid": 1, "subnet-id": 1}}
//! {"hook": "lease6_release", "lease": {...}}
//! ```

use crate::error::{ExporterError, Result};
use crate::intent::{RouteIntent, RoutePayload};
use crate::lease::{find_active_na_lease, Lease6, LeaseStore};
use crate::metrics::MetricsCollector;
use crate::switch_client::Direction;
use crate::types::IaType;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IaNaOption {
    pub iaid: u32,
    #[serde(default)]
    pub address: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IaPdOption {
    pub iaid: u32,
    #[serde(default)]
    pub prefix: Option<Ipv6Addr>,
    #[serde(default)]
    pub prefix_len: Option<u8>,
}

/// The client packet that triggered a lease selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Query6 {
    pub transaction_id: u32,
    /// Link address of the first relay, identifying the client's VLAN.
    pub link_address: Ipv6Addr,
    #[serde(default)]
    pub ia_na: Option<IaNaOption>,
    #[serde(default)]
    pub ia_pd: Option<IaPdOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectEvent {
    #[serde(default)]
    pub fake_allocation: bool,
    pub query: Query6,
    pub lease: Lease6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemovalEvent {
    pub lease: Lease6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "hook")]
pub enum LeaseEvent {
    #[serde(rename = "lease6_select")]
    Select(SelectEvent),
    #[serde(rename = "lease6_release")]
    Release(RemovalEvent),
    #[serde(rename = "lease6_expire")]
    Expire(RemovalEvent),
    #[serde(rename = "lease6_decline")]
    Decline(RemovalEvent),
}

impl LeaseEvent {
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn hook_name(&self) -> &'static str {
        match self {
            Self::Select(_) => "lease6_select",
            Self::Release(_) => "lease6_release",
            Self::Expire(_) => "lease6_expire",
            Self::Decline(_) => "lease6_decline",
        }
    }

    pub fn lease(&self) -> &Lease6 {
        match self {
            Self::Select(e) => &e.lease,
            Self::Release(e) | Self::Expire(e) | Self::Decline(e) => &e.lease,
        }
    }
}

/// Turns one lease event into at most one route operation.
///
/// `Ok(None)` means the event has no route consequence.
pub fn translate(
    event: &LeaseEvent,
    store: &dyn LeaseStore,
    metrics: Option<&MetricsCollector>,
) -> Result<Option<(RouteIntent, Direction)>> {
    match event {
        LeaseEvent::Select(select) => {
            translate_select(select, store, metrics).map(|i| i.map(|i| (i, Direction::Apply)))
        }
        LeaseEvent::Release(removal)
        | LeaseEvent::Expire(removal)
        | LeaseEvent::Decline(removal) => {
            translate_removal(&removal.lease).map(|i| i.map(|i| (i, Direction::Remove)))
        }
    }
}

fn translate_select(
    select: &SelectEvent,
    store: &dyn LeaseStore,
    metrics: Option<&MetricsCollector>,
) -> Result<Option<RouteIntent>> {
    // Solicit-stage selections are not allocations yet.
    if select.fake_allocation {
        return Ok(None);
    }
    let query = &select.query;
    let (Some(ia_na), Some(_)) = (&query.ia_na, &query.ia_pd) else {
        debug!(
            transaction_id = query.transaction_id,
            "Query lacks IA_NA or IA_PD option, no route exported"
        );
        return Ok(None);
    };
    let lease = &select.lease;

    let payload = match lease.lease_type {
        IaType::Na => RoutePayload::NaApply {
            link_address: query.link_address,
            leased_address: lease.address,
        },
        IaType::Pd => {
            let next_hop = find_active_na_lease(store, lease.duid.as_ref(), lease.iaid, metrics)
                .map(|sibling| sibling.address)
                .or(ia_na.address)
                .ok_or_else(|| ExporterError::MissingSibling {
                    duid: lease
                        .duid
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "-".to_string()),
                    iaid: lease.iaid,
                })?;
            RoutePayload::PdApply {
                next_hop,
                prefix: lease.address,
                prefix_len: lease.prefix_len,
            }
        }
        IaType::Ta => return Ok(None),
    };
    RouteIntent::new(Some(query.transaction_id), lease.iaid, lease.duid.clone(), payload).map(Some)
}

fn translate_removal(lease: &Lease6) -> Result<Option<RouteIntent>> {
    let payload = match lease.lease_type {
        IaType::Na => RoutePayload::NaFuzzyRemove {
            leased_address: lease.address,
        },
        IaType::Pd => RoutePayload::PdFuzzyRemove {
            prefix: lease.address,
            prefix_len: lease.prefix_len,
        },
        IaType::Ta => return Ok(None),
    };
    RouteIntent::new(None, lease.iaid, lease.duid.clone(), payload).map(Some)
}
