//! Lease storage boundary.
//!
//! The exporter only ever reads leases. The DHCP server owns the database
//! and its synchronization; [`LeaseStore`] is the narrow query surface the
//! exporter needs from it.

use crate::error::{ExporterError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{Duid, IaType};
use nxos_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::path::Path;
use tracing::warn;

/// Lifecycle state of a lease record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseState {
    #[default]
    Default,
    Declined,
    ExpiredReclaimed,
}

/// A DHCPv6 lease as seen by the exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Lease6 {
    pub address: Ipv6Addr,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,
    #[serde(rename = "type")]
    pub lease_type: IaType,
    pub iaid: u32,
    #[serde(default)]
    pub duid: Option<Duid>,
    #[serde(default)]
    pub hw_address: Option<MacAddress>,
    pub subnet_id: u32,
    #[serde(default)]
    pub state: LeaseState,
}

fn default_prefix_len() -> u8 {
    128
}

impl Lease6 {
    /// Neither reclaimed after expiry nor declined.
    pub fn is_active(&self) -> bool {
        self.state == LeaseState::Default
    }
}

/// Read-only lease queries.
#[cfg_attr(test, mockall::automock)]
pub trait LeaseStore: Send + Sync {
    /// All leases of `lease_type` for one identity association, in any state.
    fn leases_by_duid_iaid(&self, lease_type: IaType, duid: &Duid, iaid: u32) -> Vec<Lease6>;

    /// Ids of all configured subnets.
    fn subnet_ids(&self) -> Vec<u32>;

    /// All leases in a subnet, in any state.
    fn leases_for_subnet(&self, subnet_id: u32) -> Vec<Lease6>;
}

/// Finds the active IA_NA lease sharing `duid` and `iaid`.
///
/// First match wins. More than one active match is not expected; it is
/// logged and counted but not otherwise resolved.
pub fn find_active_na_lease(
    store: &dyn LeaseStore,
    duid: Option<&Duid>,
    iaid: u32,
    metrics: Option<&MetricsCollector>,
) -> Option<Lease6> {
    let duid = duid?;
    let mut active = store
        .leases_by_duid_iaid(IaType::Na, duid, iaid)
        .into_iter()
        .filter(Lease6::is_active);

    let first = active.next()?;
    let extra = active.count();
    if extra > 0 {
        warn!(
            duid = %duid,
            iaid,
            chosen = %first.address,
            extra,
            "Multiple active IA_NA leases for one identity association, using the first"
        );
        if let Some(m) = metrics {
            m.record_duplicate_na_lease();
        }
    }
    Some(first)
}

/// In-memory lease store loaded from a JSON snapshot.
///
/// The snapshot is a list of [`Lease6`] records.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    by_subnet: BTreeMap<u32, Vec<Lease6>>,
}

impl MemoryLeaseStore {
    pub fn new(leases: impl IntoIterator<Item = Lease6>) -> Self {
        let mut by_subnet: BTreeMap<u32, Vec<Lease6>> = BTreeMap::new();
        for lease in leases {
            by_subnet.entry(lease.subnet_id).or_default().push(lease);
        }
        Self { by_subnet }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let leases: Vec<Lease6> = serde_json::from_str(text)?;
        Ok(Self::new(leases))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ExporterError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.by_subnet.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn leases_by_duid_iaid(&self, lease_type: IaType, duid: &Duid, iaid: u32) -> Vec<Lease6> {
        self.by_subnet
            .values()
            .flatten()
            .filter(|l| {
                l.lease_type == lease_type && l.iaid == iaid && l.duid.as_ref() == Some(duid)
            })
            .cloned()
            .collect()
    }

    fn subnet_ids(&self) -> Vec<u32> {
        self.by_subnet.keys().copied().collect()
    }

    fn leases_for_subnet(&self, subnet_id: u32) -> Vec<Lease6> {
        self.by_subnet.get(&subnet_id).cloned().unwrap_or_default()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::na;
    use super::*;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_skips_inactive() {
        let duid: Duid = "00:01".parse().unwrap();
        let mut store = MockLeaseStore::new();
        store
            .expect_leases_by_duid_iaid()
            .with(eq(IaType::Na), eq(duid.clone()), eq(7))
            .times(1)
            .returning(|_, _, _| {
                vec![
                    na("2001:db8::1", "00:01", 7, LeaseState::ExpiredReclaimed),
                    na("2001:db8::2", "00:01", 7, LeaseState::Declined),
                    na("2001:db8::3", "00:01", 7, LeaseState::Default),
                ]
            });

        let found = find_active_na_lease(&store, Some(&duid), 7, None).unwrap();
        assert_eq!(found.address, "2001:db8::3".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_find_without_duid_skips_store() {
        let store = MockLeaseStore::new();
        assert_eq!(find_active_na_lease(&store, None, 7, None), None);
    }

    #[test]
    fn test_duplicate_active_leases_first_wins_and_is_counted() {
        let metrics = MetricsCollector::new().unwrap();
        let store = MemoryLeaseStore::new(vec![
            na("2001:db8::a", "00:01", 7, LeaseState::Default),
            na("2001:db8::b", "00:01", 7, LeaseState::Default),
        ]);
        let duid: Duid = "00:01".parse().unwrap();
        let found = find_active_na_lease(&store, Some(&duid), 7, Some(&metrics)).unwrap();
        assert_eq!(found.address, "2001:db8::a".parse::<Ipv6Addr>().unwrap());
        assert_eq!(metrics.duplicate_na_leases_total.get(), 1);
    }

    #[test]
    fn test_memory_store_from_json() {
        let store = MemoryLeaseStore::from_json(
            r#"[
                {"address": "2001:db8::5", "type": "IA_NA", "iaid": 1, "duid": "00:01:aa",
                 "hw-address": "f6:a5:48:6e:8a:ad", "subnet-id": 10},
                {"address": "2001:db8:100::", "prefix-len": 56, "type": "IA_PD", "iaid": 1,
                 "duid": "00:01:aa", "subnet-id": 10, "state": "expired-reclaimed"},
                {"address": "2001:db8:1::9", "type": "IA_NA", "iaid": 2, "subnet-id": 20}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.subnet_ids(), vec![10, 20]);

        let subnet = store.leases_for_subnet(10);
        assert_eq!(subnet[0].prefix_len, 128);
        assert_eq!(subnet[0].hw_address.unwrap().to_string(), "f6:a5:48:6e:8a:ad");
        assert_eq!(subnet[1].prefix_len, 56);
        assert!(!subnet[1].is_active());
        assert!(store.leases_for_subnet(99).is_empty());

        let duid: Duid = "00:01:aa".parse().unwrap();
        assert_eq!(store.leases_by_duid_iaid(IaType::Pd, &duid, 1).len(), 1);
        assert_eq!(store.leases_by_duid_iaid(IaType::Na, &duid, 2).len(), 0);
    }

    #[test]
    fn test_memory_store_load_missing_file() {
        let err = MemoryLeaseStore::load(Path::new("/nonexistent/leases.json")).unwrap_err();
        assert!(matches!(err, ExporterError::ConfigIo { .. }));
    }
}
