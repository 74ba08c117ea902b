//! The exporter service: one switch, its transport, heartbeat and resync.

use crate::config::{ConnectionParams, ExporterConfig};
use crate::error::{ExporterError, Result};
use crate::events::{translate, LeaseEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::lease::LeaseStore;
use crate::metrics::MetricsCollector;
use crate::reconciler::Reconciler;
use crate::switch_client::{Direction, SwitchClient};
use crate::transport::{HttpTransport, NxapiChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Owns everything needed to keep one switch in sync with the lease store.
///
/// Constructed explicitly by the entry point and torn down with [`stop`]
/// or on drop.
///
/// [`stop`]: ExporterService::stop
pub struct ExporterService {
    params: ConnectionParams,
    transport: Arc<HttpTransport>,
    client: SwitchClient,
    heartbeat: HeartbeatMonitor,
    reconciler: Reconciler,
    metrics: Option<Arc<MetricsCollector>>,
    running: AtomicBool,
}

impl ExporterService {
    pub fn new(
        config: &ExporterConfig,
        leases: Arc<dyn LeaseStore>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let params = config.connection.clone();
        let transport = Arc::new(HttpTransport::new("nxapi", params.transport_config())?);
        let channel = Arc::new(NxapiChannel::new(
            Arc::clone(&transport),
            params.url.clone(),
            params.tls.clone(),
            params.request_timeout,
        ));

        let mut client = SwitchClient::new(channel, transport.clone(), leases);
        let mut reconciler_metrics = None;
        if let Some(m) = &metrics {
            client = client.with_metrics(Arc::clone(m));
            reconciler_metrics = Some(Arc::clone(m));
        }
        let mut reconciler = Reconciler::new(client.clone());
        if let Some(m) = reconciler_metrics {
            reconciler = reconciler.with_metrics(m);
        }
        let heartbeat = HeartbeatMonitor::from_params(&params, metrics.clone())?;

        Ok(Self {
            params,
            transport,
            client,
            heartbeat,
            reconciler,
            metrics,
            running: AtomicBool::new(false),
        })
    }

    pub fn connection_name(&self) -> &str {
        self.client.connection_name()
    }

    pub fn client(&self) -> &SwitchClient {
        &self.client
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the transport pool and the heartbeat.
    ///
    /// The first successful probe counts as a restored connection and
    /// triggers a full resync.
    pub fn start(&self) -> Result<()> {
        if self.params.is_https() {
            error!(connection = %self.connection_name(), "HTTPS connections are not supported");
            return Err(ExporterError::TlsNotImplemented);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.start_components() {
            self.heartbeat.stop();
            self.transport.stop();
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            connection = %self.connection_name(),
            heartbeat_interval = ?self.params.heartbeat_interval,
            pool_size = self.params.pool_size,
            "Exporter service started"
        );
        Ok(())
    }

    fn start_components(&self) -> Result<()> {
        self.transport.start()?;

        let connection = self.connection_name().to_string();
        self.heartbeat.set_connection_failed_handler(move || {
            warn!(connection = %connection, "Switch connection lost");
        });
        let reconciler = self.reconciler.clone();
        self.heartbeat.set_connection_restored_handler(move |on_failure| {
            reconciler.on_connection_restored(on_failure)
        });

        self.heartbeat.start()
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.heartbeat.stop();
        self.transport.stop();
        info!(connection = %self.connection_name(), "Exporter service stopped");
    }

    /// Submits the route consequence of one lease event, if any.
    ///
    /// Returns true if a route operation was queued.
    pub fn handle_event(&self, event: &LeaseEvent) -> bool {
        let leases = self.client.lease_store().as_ref();
        match translate(event, leases, self.metrics.as_deref()) {
            Ok(Some((intent, Direction::Apply))) => self.client.apply_route(intent),
            Ok(Some((intent, Direction::Remove))) => self.client.remove_route(intent),
            Ok(None) => {
                debug!(
                    hook = event.hook_name(),
                    address = %event.lease().address,
                    "Event has no route consequence"
                );
                false
            }
            Err(e) => {
                warn!(
                    hook = event.hook_name(),
                    address = %event.lease().address,
                    error = %e,
                    "Dropping lease event"
                );
                false
            }
        }
    }
}

impl Drop for ExporterService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::MemoryLeaseStore;
    use crate::transport::fake::RecordingChannel;
    use serde_json::json;
    use std::time::Duration;

    fn config(host: &str) -> ExporterConfig {
        ExporterConfig::from_json(&json!({
            "connection-type": "nxos",
            "connection-params": {
                "host": host,
                "credentials": {
                    "login": "admin",
                    "password": "secret",
                    "certificate": "/etc/ssl/switch.pem",
                    "keyfile": "/etc/ssl/switch.key"
                },
                "heartbeat-interval": 60
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_https_fails_closed() {
        let service = ExporterService::new(
            &config("https://switch.example:8443"),
            Arc::new(MemoryLeaseStore::default()),
            None,
        )
        .unwrap();
        assert!(matches!(service.start(), Err(ExporterError::TlsNotImplemented)));
        assert!(!service.is_running());
    }

    #[test]
    fn test_start_stop() {
        let service = ExporterService::new(
            &config("http://127.0.0.1:9"),
            Arc::new(MemoryLeaseStore::default()),
            Some(Arc::new(MetricsCollector::new().unwrap())),
        )
        .unwrap();
        service.start().unwrap();
        assert!(service.is_running());
        service.start().unwrap();
        service.stop();
        assert!(!service.is_running());
    }

    #[test]
    fn test_failed_start_leaves_service_stopped() {
        let mut service = ExporterService::new(
            &config("http://127.0.0.1:9"),
            Arc::new(MemoryLeaseStore::default()),
            None,
        )
        .unwrap();
        // No private transport, so the heartbeat cannot start.
        service.heartbeat = HeartbeatMonitor::new(
            Arc::new(RecordingChannel::new(Vec::new())),
            Duration::from_secs(60),
        );

        assert!(matches!(service.start(), Err(ExporterError::PoolStopped)));
        assert!(!service.is_running());
        assert!(!service.transport.pool().is_running());

        // A second attempt runs the start sequence again instead of
        // reporting the service as already started.
        assert!(service.start().is_err());
        assert!(!service.is_running());
    }

    #[test]
    fn test_ignored_event_queues_nothing() {
        let service = ExporterService::new(
            &config("http://127.0.0.1:9"),
            Arc::new(MemoryLeaseStore::default()),
            None,
        )
        .unwrap();
        let event = LeaseEvent::from_json_line(
            r#"{"hook": "lease6_release", "lease": {"address": "2001:db8::5", "type": "IA_TA",
                "iaid": 1, "subnet-id": 1}}"#,
        )
        .unwrap();
        assert!(!service.handle_event(&event));
    }
}
