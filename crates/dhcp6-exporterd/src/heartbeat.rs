//! Switch heartbeat and reconnection detection.
//!
//! Every interval the monitor asks the switch for its uptime. A failed probe
//! marks the connection lost. The first good probe after a loss, or any
//! probe whose uptime went backwards (the switch rebooted), is a
//! discontinuity: the restored handler runs so routes can be re-asserted.

use crate::commands::SHOW_VERSION;
use crate::config::ConnectionParams;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::pool::Spawn;
use crate::switch_client::lookup_result;
use crate::transport::{CommandChannel, HttpTransport, NxapiChannel, RpcReply, TransportConfig};
use nxos_types::rpc::RpcBatch;
use nxos_types::tables::{parse_output, UptimeResponse};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Worker threads of the heartbeat's private transport.
const HEARTBEAT_POOL_SIZE: usize = 2;

/// Invoked when a probe fails.
pub type ConnectionFailedHandler = Arc<dyn Fn() + Send + Sync>;

/// Lets restoration work report its own failure back to the monitor.
pub type FailureCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked on a discontinuity.
pub type ConnectionRestoredHandler = Arc<dyn Fn(FailureCallback) + Send + Sync>;

/// What the monitor remembers between probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub previous_uptime_secs: u64,
    pub connection_was_lost: bool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            previous_uptime_secs: 0,
            connection_was_lost: true,
        }
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Uptime(u64),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Failed,
    Discontinuity,
    Steady,
}

impl HeartbeatState {
    /// Applies one probe outcome.
    pub fn observe(&mut self, outcome: &TickOutcome) -> Transition {
        match outcome {
            TickOutcome::Failed(_) => {
                self.connection_was_lost = true;
                Transition::Failed
            }
            TickOutcome::Uptime(uptime)
                if self.connection_was_lost || *uptime < self.previous_uptime_secs =>
            {
                self.previous_uptime_secs = 0;
                self.connection_was_lost = false;
                Transition::Discontinuity
            }
            TickOutcome::Uptime(uptime) => {
                self.previous_uptime_secs = *uptime;
                self.connection_was_lost = false;
                Transition::Steady
            }
        }
    }
}

/// Turns a `show version` reply into a probe outcome.
pub fn classify_reply(reply: &RpcReply) -> TickOutcome {
    let uptime = lookup_result(reply)
        .and_then(|r| parse_output::<UptimeResponse>(&r.result).map_err(Into::into));
    match uptime {
        Ok(u) => TickOutcome::Uptime(u.total_seconds()),
        Err(e) => TickOutcome::Failed(e.to_string()),
    }
}

struct Inner {
    channel: Arc<dyn CommandChannel>,
    interval: Duration,
    state: Mutex<HeartbeatState>,
    on_failed: RwLock<Option<ConnectionFailedHandler>>,
    on_restored: RwLock<Option<ConnectionRestoredHandler>>,
    cancel: Mutex<Option<CancellationToken>>,
    transport: Option<Arc<HttpTransport>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Inner {
    fn connection_failed(&self) {
        if let Some(m) = &self.metrics {
            m.record_heartbeat_failure();
        }
        let handler = self.on_failed.read().clone();
        if let Some(h) = handler {
            h();
        }
    }
}

/// Periodic uptime probe against one switch.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    /// A monitor probing over an existing channel.
    pub fn new(channel: Arc<dyn CommandChannel>, interval: Duration) -> Self {
        Self::build(channel, interval, None, None)
    }

    /// A monitor with its own transport to the switch.
    pub fn from_params(
        params: &ConnectionParams,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(
            "heartbeat",
            TransportConfig {
                multi_threaded: true,
                pool_size: HEARTBEAT_POOL_SIZE,
                auth: Some(params.auth.clone()),
            },
        )?);
        let channel = Arc::new(NxapiChannel::new(
            Arc::clone(&transport),
            params.url.clone(),
            params.tls.clone(),
            params.request_timeout.min(params.heartbeat_interval),
        ));
        Ok(Self::build(channel, params.heartbeat_interval, Some(transport), metrics))
    }

    fn build(
        channel: Arc<dyn CommandChannel>,
        interval: Duration,
        transport: Option<Arc<HttpTransport>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                interval,
                state: Mutex::new(HeartbeatState::default()),
                on_failed: RwLock::new(None),
                on_restored: RwLock::new(None),
                cancel: Mutex::new(None),
                transport,
                metrics,
            }),
        }
    }

    pub fn connection_name(&self) -> &str {
        self.inner.channel.connection_name()
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn state(&self) -> HeartbeatState {
        *self.inner.state.lock()
    }

    pub fn set_connection_failed_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_failed.write() = Some(Arc::new(handler));
    }

    pub fn set_connection_restored_handler<F>(&self, handler: F)
    where
        F: Fn(FailureCallback) + Send + Sync + 'static,
    {
        *self.inner.on_restored.write() = Some(Arc::new(handler));
    }

    /// Callback handed to the restored handler. Re-enters the lost state
    /// without waiting for the next probe.
    fn failure_callback(&self) -> FailureCallback {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().connection_was_lost = true;
                error!(
                    connection = %inner.channel.connection_name(),
                    "Connection restoration failed"
                );
                inner.connection_failed();
            }
        })
    }

    /// Runs one probe and its handlers.
    pub async fn tick(&self) -> Transition {
        let reply = self.inner.channel.execute(RpcBatch::single(SHOW_VERSION)).await;
        let outcome = classify_reply(&reply);
        let transition = self.inner.state.lock().observe(&outcome);
        let connection = self.connection_name();

        match (&outcome, transition) {
            (TickOutcome::Failed(reason), _) => {
                error!(connection, reason = %reason, "Heartbeat failed");
                self.inner.connection_failed();
            }
            (TickOutcome::Uptime(uptime), Transition::Discontinuity) => {
                info!(connection, uptime, "Connection to switch restored");
                if let Some(m) = &self.inner.metrics {
                    m.record_reconnection();
                }
                let handler = self.inner.on_restored.read().clone();
                if let Some(h) = handler {
                    h(self.failure_callback());
                }
            }
            (TickOutcome::Uptime(uptime), _) => {
                debug!(connection, uptime, "Heartbeat ok");
            }
        }
        transition
    }

    /// Starts the private transport, if any, and the interval timer on it.
    pub fn start(&self) -> Result<()> {
        match &self.inner.transport {
            Some(transport) => {
                transport.start()?;
                self.start_on(transport.as_ref());
                Ok(())
            }
            None => Err(crate::error::ExporterError::PoolStopped),
        }
    }

    /// Arms the interval timer on `spawner`. The first probe fires one
    /// interval from now.
    pub fn start_on(&self, spawner: &dyn Spawn) -> bool {
        *self.inner.state.lock() = HeartbeatState::default();
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.cancel.lock().replace(token.clone()) {
            previous.cancel();
        }

        let monitor = self.clone();
        let period = self.inner.interval;
        spawner.spawn_boxed(Box::pin(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if monitor.tick().await == Transition::Discontinuity {
                            ticker.reset();
                        }
                    }
                }
            }
            debug!(connection = %monitor.connection_name(), "Heartbeat timer stopped");
        }))
    }

    /// Cancels the timer and stops the private transport.
    pub fn stop(&self) {
        if let Some(token) = self.inner.cancel.lock().take() {
            token.cancel();
        }
        if let Some(transport) = &self.inner.transport {
            transport.stop();
        }
    }
}
