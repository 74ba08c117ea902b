//! End-to-end tests against an in-process NX-API mock.
//!
//! The mock speaks just enough JSON-RPC to answer route lookups, uptime
//! probes and configuration commands, and records every command it sees.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use dhcp6_exporterd::heartbeat::Transition;
use dhcp6_exporterd::switch_client::Stage;
use dhcp6_exporterd::transport::{BasicAuth, ResponseError, TransportConfig};
use dhcp6_exporterd::{
    CommandChannel, Direction, HeartbeatMonitor, HttpTransport, MemoryLeaseStore, MetricsCollector,
    NxapiChannel, RouteIntent, RoutePayload, SwitchClient,
};
use nxos_types::{RpcBatch, RpcId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use reqwest::Url;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockSwitch {
    commands: Mutex<Vec<String>>,
    authorization: Mutex<Option<String>>,
    reject_removals: bool,
}

impl MockSwitch {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

fn route_table() -> Value {
    json!({
        "TABLE_vrf": {"ROW_vrf": {
            "vrf-name-out": "default",
            "TABLE_addrf": {"ROW_addrf": {
                "addrf": "ipv6",
                "TABLE_prefix": {"ROW_prefix": {
                    "ipprefix": "2001:db8::1/128",
                    "attached": "true",
                    "TABLE_path": {"ROW_path": [{"ifname": "Vlan100", "uptime": "P1D"}]}
                }}
            }}
        }}
    })
}

fn answer(cmd: &str) -> Value {
    if cmd.starts_with("show ipv6 route") {
        json!({"body": route_table()})
    } else if cmd == "show version" {
        json!({"body": {
            "kern_uptm_days": 1,
            "kern_uptm_hrs": 2,
            "kern_uptm_mins": 3,
            "kern_uptm_secs": 4,
        }})
    } else if cmd.starts_with("show") {
        json!({"body": {"echo": cmd}})
    } else {
        Value::Null
    }
}

async fn handle_ins(
    State(switch): State<Arc<MockSwitch>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    *switch.authorization.lock() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Ok(Value::Array(requests)) = serde_json::from_str::<Value>(&body) else {
        return (StatusCode::BAD_REQUEST, String::new());
    };

    let mut responses = Vec::new();
    for request in &requests {
        let id = request["id"].clone();
        let cmd = request["params"]["cmd"].as_str().unwrap_or_default().to_string();
        switch.commands.lock().push(cmd.clone());

        if switch.reject_removals && cmd.starts_with("no ipv6 route") {
            let error = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32602,
                    "message": "Invalid params",
                    "data": {"msg": "Route not found"},
                }
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
        }
        responses.push(json!({"jsonrpc": "2.0", "id": id, "result": answer(&cmd)}));
    }

    let body = match responses.len() {
        1 => responses.remove(0),
        _ => Value::Array(responses),
    };
    (StatusCode::OK, body.to_string())
}

async fn spawn_switch(switch: Arc<MockSwitch>) -> SocketAddr {
    let app = Router::new().route("/ins", post(handle_ins)).with_state(switch);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn started_transport() -> Arc<HttpTransport> {
    let transport = Arc::new(
        HttpTransport::new(
            "test",
            TransportConfig {
                multi_threaded: true,
                pool_size: 2,
                auth: Some(BasicAuth {
                    login: "admin".to_string(),
                    password: "secret".to_string(),
                }),
            },
        )
        .unwrap(),
    );
    transport.start().unwrap();
    transport
}

fn channel_to(addr: SocketAddr, transport: &Arc<HttpTransport>) -> Arc<NxapiChannel> {
    let url = Url::parse(&format!("http://{}", addr)).unwrap();
    Arc::new(NxapiChannel::new(Arc::clone(transport), url, None, Duration::from_secs(5)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_round_trip_through_http() {
    let switch = Arc::new(MockSwitch::default());
    let addr = spawn_switch(Arc::clone(&switch)).await;
    let transport = started_transport();
    let channel = channel_to(addr, &transport);

    let batch =
        RpcBatch::from_pairs([(1, "show clock"), (2, "show hostname"), (5, "show inventory")])
            .unwrap();
    let reply = channel.execute(batch).await;

    assert_eq!(reply.error, ResponseError::Success);
    assert_eq!(reply.status, 200);
    assert!(reply.exception.is_none());
    let ids: Vec<RpcId> = reply.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![RpcId::Num(1), RpcId::Num(2), RpcId::Num(5)]);
    let echoed: Vec<&str> = reply
        .results
        .iter()
        .map(|r| r.body().and_then(|b| b["echo"].as_str()).unwrap())
        .collect();
    assert_eq!(echoed, vec!["show clock", "show hostname", "show inventory"]);
    assert_eq!(switch.commands(), vec!["show clock", "show hostname", "show inventory"]);

    let auth = switch.authorization.lock().clone().unwrap();
    assert!(auth.starts_with("Basic "));

    transport.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_na_apply_end_to_end() {
    let switch = Arc::new(MockSwitch::default());
    let addr = spawn_switch(Arc::clone(&switch)).await;
    let transport = started_transport();
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let client = SwitchClient::new(
        channel_to(addr, &transport),
        transport.clone(),
        Arc::new(MemoryLeaseStore::default()),
    )
    .with_metrics(Arc::clone(&metrics));

    let intent = RouteIntent::new(
        Some(7),
        1,
        None,
        RoutePayload::NaApply {
            link_address: "2001:db8::1".parse().unwrap(),
            leased_address: "2001:db8::5".parse().unwrap(),
        },
    )
    .unwrap();
    let stage = client.run(intent, Direction::Apply).await;

    assert!(matches!(stage, Stage::Done(Some(_))), "unexpected stage {stage:?}");
    assert_eq!(
        switch.commands(),
        vec!["show ipv6 route 2001:db8::1/128", "ipv6 route 2001:db8::5/128 Vlan100"]
    );
    assert_eq!(metrics.routes_applied_total.get(), 1);

    transport.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removing_absent_route_is_noop() {
    let switch = Arc::new(MockSwitch {
        reject_removals: true,
        ..MockSwitch::default()
    });
    let addr = spawn_switch(Arc::clone(&switch)).await;
    let transport = started_transport();
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let client = SwitchClient::new(
        channel_to(addr, &transport),
        transport.clone(),
        Arc::new(MemoryLeaseStore::default()),
    )
    .with_metrics(Arc::clone(&metrics));

    let intent = RouteIntent::new(
        None,
        1,
        None,
        RoutePayload::NaFastApply {
            interface: "Vlan100".to_string(),
            leased_address: "2001:db8::5".parse().unwrap(),
        },
    )
    .unwrap();
    let stage = client.run(intent, Direction::Remove).await;

    assert!(matches!(stage, Stage::Done(Some(_))), "unexpected stage {stage:?}");
    assert_eq!(metrics.benign_noop_total.get(), 1);
    assert_eq!(metrics.route_failures_total.get(), 0);

    transport.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeat_probe_over_http() {
    let switch = Arc::new(MockSwitch::default());
    let addr = spawn_switch(Arc::clone(&switch)).await;
    let transport = started_transport();
    let monitor = HeartbeatMonitor::new(channel_to(addr, &transport), Duration::from_secs(60));

    assert_eq!(monitor.tick().await, Transition::Discontinuity);
    assert_eq!(monitor.tick().await, Transition::Steady);
    assert_eq!(monitor.state().previous_uptime_secs, 93_784);
    assert_eq!(switch.commands(), vec!["show version", "show version"]);

    transport.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_switch_reports_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = started_transport();
    let reply = channel_to(addr, &transport).execute(RpcBatch::single("show version")).await;

    assert!(!reply.error.is_success());
    assert!(reply.results.is_empty());
    assert_eq!(reply.status, 0);

    transport.stop();
}
