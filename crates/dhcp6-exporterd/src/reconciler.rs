//! Full resync of switch routes from lease storage.
//!
//! Runs after the heartbeat reports a discontinuity. One neighbor-table
//! query resolves the VLAN interface of every visible host up front, so
//! each IA_NA lease is re-applied without its own lookup round trip.

use crate::error::{ExporterError, Result};
use crate::heartbeat::FailureCallback;
use crate::intent::{RouteIntent, RoutePayload};
use crate::lease::{find_active_na_lease, Lease6};
use crate::metrics::MetricsCollector;
use crate::switch_client::{HwAddrMap, SwitchClient};
use crate::types::IaType;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Counts from one resync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub na_applied: usize,
    pub pd_applied: usize,
    /// IA_NA leases whose hardware address the switch does not know.
    pub skipped_no_mapping: usize,
    /// IA_PD leases without an active sibling IA_NA lease.
    pub skipped_no_sibling: usize,
    pub skipped_inactive: usize,
    /// Leases that do not form a valid route.
    pub skipped_invalid: usize,
}

impl ReconcileReport {
    pub fn skipped(&self) -> usize {
        self.skipped_no_mapping + self.skipped_no_sibling + self.skipped_invalid
    }
}

#[derive(Clone)]
pub struct Reconciler {
    client: SwitchClient,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Reconciler {
    pub fn new(client: SwitchClient) -> Self {
        Self {
            client,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Restored-connection handler: fetches the hardware address mapping,
    /// then re-applies every lease. A failed mapping request calls
    /// `on_failure`.
    pub fn on_connection_restored(&self, on_failure: FailureCallback) {
        let this = self.clone();
        let on_failure_inner = Arc::clone(&on_failure);
        let queued = self
            .client
            .lookup_hardware_address_to_interface_mapping(move |mapping| match mapping {
                Ok(map) => {
                    this.reconcile(&map);
                }
                Err(e) => {
                    error!(
                        connection = %this.client.connection_name(),
                        error = %e,
                        "Hardware address mapping failed"
                    );
                    on_failure_inner();
                }
            });
        if !queued {
            on_failure();
        }
    }

    /// Submits a route apply for every active lease in every subnet.
    pub fn reconcile(&self, map: &HwAddrMap) -> ReconcileReport {
        let (intents, report) = self.plan(map);
        for intent in intents {
            self.client.apply_route(intent);
        }
        info!(
            connection = %self.client.connection_name(),
            na = report.na_applied,
            pd = report.pd_applied,
            skipped = report.skipped(),
            "Resync submitted"
        );
        if let Some(m) = &self.metrics {
            m.record_reconcile_skipped(report.skipped());
        }
        report
    }

    /// Derives the intents of a resync without sending anything.
    pub fn plan(&self, map: &HwAddrMap) -> (Vec<RouteIntent>, ReconcileReport) {
        let store = self.client.lease_store();
        let mut report = ReconcileReport::default();
        let mut intents = Vec::new();

        for subnet_id in store.subnet_ids() {
            for lease in store.leases_for_subnet(subnet_id) {
                if !lease.is_active() {
                    report.skipped_inactive += 1;
                    continue;
                }
                let intent = match lease.lease_type {
                    IaType::Na => self.na_intent(&lease, map),
                    IaType::Pd => self.pd_intent(&lease),
                    IaType::Ta => continue,
                };
                match intent {
                    Ok(intent) => {
                        match lease.lease_type {
                            IaType::Pd => report.pd_applied += 1,
                            _ => report.na_applied += 1,
                        }
                        intents.push(intent);
                    }
                    Err(e) => {
                        match e {
                            ExporterError::MissingHardwareAddress(_) => {
                                report.skipped_no_mapping += 1
                            }
                            ExporterError::MissingSibling { .. } => report.skipped_no_sibling += 1,
                            _ => report.skipped_invalid += 1,
                        }
                        warn!(
                            address = %lease.address,
                            ia_type = %lease.lease_type,
                            error = %e,
                            "Lease skipped during resync"
                        );
                    }
                }
            }
        }
        (intents, report)
    }

    fn na_intent(&self, lease: &Lease6, map: &HwAddrMap) -> Result<RouteIntent> {
        let hw_address = lease
            .hw_address
            .ok_or_else(|| ExporterError::MissingHardwareAddress("none".to_string()))?;
        let interface = map
            .get(&hw_address)
            .ok_or_else(|| ExporterError::MissingHardwareAddress(hw_address.to_string()))?;
        build(
            lease,
            RoutePayload::NaFastApply {
                interface: interface.clone(),
                leased_address: lease.address,
            },
        )
    }

    fn pd_intent(&self, lease: &Lease6) -> Result<RouteIntent> {
        let sibling = find_active_na_lease(
            self.client.lease_store().as_ref(),
            lease.duid.as_ref(),
            lease.iaid,
            self.metrics.as_deref(),
        )
        .ok_or_else(|| ExporterError::MissingSibling {
            duid: lease
                .duid
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            iaid: lease.iaid,
        })?;
        build(
            lease,
            RoutePayload::PdApply {
                next_hop: sibling.address,
                prefix: lease.address,
                prefix_len: lease.prefix_len,
            },
        )
    }
}

fn build(lease: &Lease6, payload: RoutePayload) -> Result<RouteIntent> {
    RouteIntent::new(None, lease.iaid, lease.duid.clone(), payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::{LeaseState, MemoryLeaseStore};
    use crate::transport::fake::{reply_body, reply_ok, RecordingChannel};
    use crate::transport::{ResponseError, RpcReply};
    use nxos_types::MacAddress;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn na_lease(address: &str, iaid: u32, hw: Option<&str>, state: LeaseState) -> Lease6 {
        Lease6 {
            address: address.parse().unwrap(),
            prefix_len: 128,
            lease_type: IaType::Na,
            iaid,
            duid: Some("00:01:aa".parse().unwrap()),
            hw_address: hw.map(|h| h.parse().unwrap()),
            subnet_id: 1,
            state,
        }
    }

    fn pd_lease(prefix: &str, iaid: u32) -> Lease6 {
        Lease6 {
            prefix_len: 56,
            lease_type: IaType::Pd,
            hw_address: None,
            ..na_lease(prefix, iaid, None, LeaseState::Default)
        }
    }

    fn store() -> MemoryLeaseStore {
        MemoryLeaseStore::new(vec![
            na_lease("2001:db8::5", 1, Some("f6:a5:48:6e:8a:ad"), LeaseState::Default),
            pd_lease("2001:db8:100::", 1),
            na_lease("2001:db8::6", 2, Some("00:11:22:33:44:55"), LeaseState::Default),
            pd_lease("2001:db8:200::", 3),
            na_lease("2001:db8::7", 4, Some("f6:a5:48:6e:8a:ad"), LeaseState::Declined),
        ])
    }

    fn reconciler(channel: Arc<RecordingChannel>) -> Reconciler {
        let client = SwitchClient::new(
            channel,
            Arc::new(tokio::runtime::Handle::current()),
            Arc::new(store()),
        );
        Reconciler::new(client)
    }

    fn map() -> HwAddrMap {
        let mut map = HwAddrMap::new();
        map.insert("f6:a5:48:6e:8a:ad".parse::<MacAddress>().unwrap(), "Vlan100".to_string());
        map
    }

    #[tokio::test]
    async fn test_plan_uses_mapping_and_siblings() {
        let reconciler = reconciler(Arc::new(RecordingChannel::default()));
        let (intents, report) = reconciler.plan(&map());

        assert_eq!(
            report,
            ReconcileReport {
                na_applied: 1,
                pd_applied: 1,
                skipped_no_mapping: 1,
                skipped_no_sibling: 1,
                skipped_inactive: 1,
                skipped_invalid: 0,
            }
        );
        let payloads: Vec<_> = intents.iter().map(|i| i.payload().clone()).collect();
        assert_eq!(
            payloads,
            vec![
                RoutePayload::NaFastApply {
                    interface: "Vlan100".to_string(),
                    leased_address: "2001:db8::5".parse().unwrap(),
                },
                RoutePayload::PdApply {
                    next_hop: "2001:db8::5".parse().unwrap(),
                    prefix: "2001:db8:100::".parse().unwrap(),
                    prefix_len: 56,
                },
            ]
        );
        assert!(intents.iter().all(|i| i.transaction_id().is_none()));
    }

    #[tokio::test]
    async fn test_unmapped_hardware_address_is_reported() {
        let reconciler = reconciler(Arc::new(RecordingChannel::default()));
        let unmapped = na_lease("2001:db8::6", 2, Some("00:11:22:33:44:55"), LeaseState::Default);
        match reconciler.na_intent(&unmapped, &map()) {
            Err(ExporterError::MissingHardwareAddress(hw)) => assert_eq!(hw, "00:11:22:33:44:55"),
            other => panic!("unexpected result {other:?}"),
        }

        let no_hw = na_lease("2001:db8::8", 5, None, LeaseState::Default);
        assert!(matches!(
            reconciler.na_intent(&no_hw, &map()),
            Err(ExporterError::MissingHardwareAddress(_))
        ));

        let orphan = pd_lease("2001:db8:200::", 3);
        assert!(matches!(
            reconciler.pd_intent(&orphan),
            Err(ExporterError::MissingSibling { iaid: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_restored_connection_reapplies_routes() {
        let channel = Arc::new(RecordingChannel::new([
            reply_body(json!({
                "TABLE_vrf": {"ROW_vrf": {"TABLE_afi": {"ROW_afi": {"TABLE_adj": {"ROW_adj":
                    {"intf-out": "Vlan100", "mac": "f6a5.486e.8aad"}}}}}}
            })),
            reply_ok([Value::Null]),
            reply_ok([Value::Null]),
        ]));
        let reconciler = reconciler(Arc::clone(&channel));
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        reconciler.on_connection_restored(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..100 {
            if channel.sent().len() >= 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let mut sent = channel.sent();
        assert_eq!(sent.remove(0), vec!["show ipv6 neighbor".to_string()]);
        sent.sort();
        assert_eq!(
            sent,
            vec![
                vec!["ipv6 route 2001:db8:100::/56 2001:db8::5".to_string()],
                vec!["ipv6 route 2001:db8::5/128 Vlan100".to_string()],
            ]
        );
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mapping_failure_invokes_failure_callback() {
        let channel = Arc::new(RecordingChannel::new([RpcReply::transport_failure(
            ResponseError::Connection,
        )]));
        let reconciler = reconciler(Arc::clone(&channel));
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        reconciler.on_connection_restored(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..100 {
            if failures.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(channel.sent().len(), 1);
    }
}
