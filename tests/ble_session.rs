use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use ble_link::{
    BleSession, CharacteristicKey, ConnectionState, FakeCentral, FakeCentralConfig, JsonRpcPeer,
    MemoryChannel, RadioState, RpcError, RpcErrorKind, RpcHandler, StandardGattResolver,
    WriteMode, uuid_from_short,
};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);
const BATTERY_SERVICE: u64 = 0x180F;
const BATTERY_LEVEL: u64 = 0x2A19;

struct Harness {
    session: Arc<BleSession>,
    fake: Arc<FakeCentral>,
    outbound: UnboundedReceiver<String>,
}

fn harness(config: FakeCentralConfig) -> Harness {
    let (fake, events) = FakeCentral::new(config);
    let fake = Arc::new(fake);
    let (channel, outbound) = MemoryChannel::new();
    let peer = Arc::new(JsonRpcPeer::new(Arc::new(channel)));
    let session = BleSession::new(peer, fake.clone(), events, Arc::new(StandardGattResolver));
    Harness {
        session,
        fake,
        outbound,
    }
}

fn fixture(scan: &str) -> FakeCentralConfig {
    FakeCentralConfig::builder()
        .scan_fixture(scan.parse().expect("valid scan fixture"))
        .build()
}

fn fixture_with_services(scan: &str, services: &str) -> FakeCentralConfig {
    FakeCentralConfig::builder()
        .scan_fixture(scan.parse().expect("valid scan fixture"))
        .services(services.parse().expect("valid service fixture"))
        .build()
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("params are a JSON object")
}

fn battery_level() -> CharacteristicKey {
    CharacteristicKey {
        service: uuid_from_short(0x180F),
        characteristic: uuid_from_short(0x2A19),
    }
}

fn assert_rpc_error(error: &RpcError, kind: RpcErrorKind, data: &str) {
    assert_eq!(Some(kind), error.kind());
    assert_eq!(Some(&json!(data)), error.data());
}

async fn next_message(outbound: &mut UnboundedReceiver<String>) -> Value {
    let text = timeout(WAIT, outbound.recv())
        .await
        .expect("message arrives in time")
        .expect("channel still open");
    serde_json::from_str(&text).expect("outbound messages are JSON")
}

async fn assert_quiet(outbound: &mut UnboundedReceiver<String>) {
    if let Ok(Some(text)) = timeout(QUIET, outbound.recv()).await {
        panic!("unexpected message: {text}");
    }
}

async fn wait_for_state(session: &BleSession, expected: ConnectionState) {
    timeout(WAIT, async {
        while session.connection_state() != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("session reaches the expected state");
}

/// Discovers with a battery-service filter and connects to `dev-1`.
async fn connect_battery_peripheral(harness: &mut Harness) -> anyhow::Result<()> {
    harness
        .session
        .call(
            "discover",
            params(json!({"filters": [{"services": [BATTERY_SERVICE]}]})),
        )
        .await?;
    let discovered = next_message(&mut harness.outbound).await;
    assert_eq!(json!("didDiscoverPeripheral"), discovered["method"]);

    harness
        .session
        .call("connect", params(json!({"peripheralId": "dev-1"})))
        .await?;
    assert_eq!(ConnectionState::Ready, harness.session.connection_state());
    Ok(())
}

#[tokio::test]
async fn discovery_reports_only_matching_peripherals_above_signal_floor() -> anyhow::Result<()> {
    let mut harness = harness(fixture(
        "near|Probe|-60;far|Probe|-80;other|Thing|-50;quiet|Probe|-",
    ));

    let result = harness
        .session
        .call("discover", params(json!({"filters": [{"namePrefix": "Pro"}]})))
        .await?;
    assert_eq!(None, result);

    let first = next_message(&mut harness.outbound).await;
    assert_eq!(
        json!({
            "jsonrpc": "2.0",
            "method": "didDiscoverPeripheral",
            "params": {"name": "Probe", "peripheralId": "near", "rssi": -60},
        }),
        first
    );
    let second = next_message(&mut harness.outbound).await;
    assert_eq!(json!("quiet"), second["params"]["peripheralId"]);
    assert_eq!(Value::Null, second["params"]["rssi"]);
    assert_quiet(&mut harness.outbound).await;
    assert!(harness.fake.is_scanning());
    Ok(())
}

#[tokio::test]
async fn discover_rejects_bad_filters() {
    let harness = harness(fixture("dev-1|Probe|-40"));

    let missing = harness
        .session
        .call("discover", Map::new())
        .await
        .expect_err("filters are required");
    assert_rpc_error(
        &missing,
        RpcErrorKind::InvalidParams,
        "could not parse filters in discovery request",
    );

    let empty = harness
        .session
        .call("discover", params(json!({"filters": [{}]})))
        .await
        .expect_err("empty filters are rejected");
    assert_rpc_error(
        &empty,
        RpcErrorKind::InvalidParams,
        "discovery request includes empty filter",
    );

    let optional = harness
        .session
        .call(
            "discover",
            params(json!({"filters": [{"name": "Probe"}], "optionalServices": ["no_such_service"]})),
        )
        .await
        .expect_err("unresolvable optional services are rejected");
    assert_rpc_error(
        &optional,
        RpcErrorKind::InvalidParams,
        "could not resolve UUID for optional service no_such_service",
    );
}

#[tokio::test]
async fn discover_fails_while_radio_is_unavailable() {
    let harness = harness(
        FakeCentralConfig::builder()
            .scan_fixture("dev-1|Probe|-40".parse().expect("valid scan fixture"))
            .radio_state(RadioState::Unavailable)
            .build(),
    );

    let error = harness
        .session
        .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
        .await
        .expect_err("unavailable radio fails discovery");
    assert_rpc_error(
        &error,
        RpcErrorKind::ApplicationError,
        "Bluetooth unavailable: unavailable",
    );
}

#[tokio::test]
async fn discover_waits_for_radio_to_become_ready() -> anyhow::Result<()> {
    let mut harness = harness(
        FakeCentralConfig::builder()
            .scan_fixture("dev-1|Probe|-40".parse().expect("valid scan fixture"))
            .radio_state(RadioState::Unknown)
            .build(),
    );

    let session = harness.session.clone();
    let discover = tokio::spawn(async move {
        session
            .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
            .await
    });
    tokio::time::sleep(QUIET).await;
    assert!(!discover.is_finished());
    assert!(!harness.fake.is_scanning());

    harness.fake.set_radio_state(RadioState::Available);
    let result = timeout(WAIT, discover).await??;
    assert_eq!(None, result?);
    let discovered = next_message(&mut harness.outbound).await;
    assert_eq!(json!("dev-1"), discovered["params"]["peripheralId"]);
    Ok(())
}

#[tokio::test]
async fn connect_requires_a_reported_peripheral() {
    let harness = harness(fixture("dev-1|Probe|-40"));

    let missing = harness
        .session
        .call("connect", Map::new())
        .await
        .expect_err("peripheralId is required");
    assert_rpc_error(
        &missing,
        RpcErrorKind::InvalidParams,
        "missing or invalid peripheralId",
    );

    let unknown = harness
        .session
        .call("connect", params(json!({"peripheralId": "dev-1"})))
        .await
        .expect_err("peripheral has not been reported yet");
    assert_rpc_error(
        &unknown,
        RpcErrorKind::InvalidParams,
        "invalid peripheralId: dev-1",
    );
}

#[tokio::test]
async fn second_connect_while_pending_is_invalid_request() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40"));
    harness
        .session
        .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
        .await?;
    next_message(&mut harness.outbound).await;
    harness.fake.stall_connects();

    let session = harness.session.clone();
    let first = tokio::spawn(async move {
        session
            .call("connect", params(json!({"peripheralId": "dev-1"})))
            .await
    });
    wait_for_state(&harness.session, ConnectionState::Connecting).await;

    let second = harness
        .session
        .call("connect", params(json!({"peripheralId": "dev-1"})))
        .await
        .expect_err("only one connect may be pending");
    assert_rpc_error(
        &second,
        RpcErrorKind::InvalidRequest,
        "connection already pending",
    );
    assert!(!first.is_finished());

    harness.session.close().await;
    let first = timeout(WAIT, first).await??;
    assert_rpc_error(
        &first.expect_err("teardown fails the pending connect"),
        RpcErrorKind::InternalError,
        "Session closed",
    );
    assert_eq!(ConnectionState::Closed, harness.session.connection_state());
    Ok(())
}

#[tokio::test]
async fn failed_connect_is_application_error() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40"));
    harness
        .session
        .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
        .await?;
    next_message(&mut harness.outbound).await;
    harness.fake.fail_connects("out of range");

    let error = harness
        .session
        .call("connect", params(json!({"peripheralId": "dev-1"})))
        .await
        .expect_err("connect failure surfaces");
    assert_eq!(Some(RpcErrorKind::ApplicationError), error.kind());
    assert_eq!(ConnectionState::Idle, harness.session.connection_state());
    Ok(())
}

#[tokio::test]
async fn get_services_lists_canonical_uuids() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    assert_eq!(
        Some(json!([])),
        harness.session.call("getServices", Map::new()).await?
    );

    connect_battery_peripheral(&mut harness).await?;

    assert_eq!(
        Some(json!(["0000180f-0000-1000-8000-00805f9b34fb"])),
        harness.session.call("getServices", Map::new()).await?
    );
    Ok(())
}

#[tokio::test]
async fn read_with_start_notifications_resolves_and_pushes_once() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.set_value(battery_level(), vec![0x64]);

    let result = harness
        .session
        .call(
            "read",
            params(json!({
                "serviceId": BATTERY_SERVICE,
                "characteristicId": BATTERY_LEVEL,
                "startNotifications": true,
            })),
        )
        .await?;

    assert_eq!(Some(json!({"message": "ZA==", "encoding": "base64"})), result);
    let pushed = next_message(&mut harness.outbound).await;
    assert_eq!(
        json!({
            "jsonrpc": "2.0",
            "method": "characteristicDidChange",
            "params": {"message": "ZA==", "encoding": "base64"},
        }),
        pushed
    );
    assert_quiet(&mut harness.outbound).await;
    assert!(harness.fake.is_notifying(battery_level()));
    Ok(())
}

#[tokio::test]
async fn read_without_notifications_does_not_push() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.set_value(battery_level(), b"ok".to_vec());

    let result = harness
        .session
        .call(
            "read",
            params(json!({
                "serviceId": "battery_service",
                "characteristicId": "battery_level",
                "encoding": "bogus",
            })),
        )
        .await;
    assert_rpc_error(
        &result.expect_err("unknown encodings fail at encode time"),
        RpcErrorKind::InvalidRequest,
        "failed to encode result",
    );
    assert_quiet(&mut harness.outbound).await;
    Ok(())
}

#[tokio::test]
async fn notifications_stop_after_stop_notifications() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    let endpoint = json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL});

    harness
        .session
        .call("startNotifications", params(endpoint.clone()))
        .await?;
    harness
        .fake
        .push_value(&"dev-1".into(), battery_level(), vec![1, 2, 3]);
    let pushed = next_message(&mut harness.outbound).await;
    assert_eq!(json!("AQID"), pushed["params"]["message"]);

    harness
        .session
        .call("stopNotifications", params(endpoint))
        .await?;
    assert!(!harness.fake.is_notifying(battery_level()));
    harness
        .fake
        .push_value(&"dev-1".into(), battery_level(), vec![4]);
    assert_quiet(&mut harness.outbound).await;
    Ok(())
}

#[tokio::test]
async fn write_infers_mode_from_characteristic_properties() -> anyhow::Result<()> {
    let mut harness = harness(fixture_with_services(
        "dev-1|Probe|-40|180f",
        "180f=2a19:read+write_without_response",
    ));
    connect_battery_peripheral(&mut harness).await?;
    let target = json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL});

    let mut inferred = params(target.clone());
    inferred.insert("message".to_string(), json!("hi"));
    assert_eq!(
        Some(json!(2)),
        harness.session.call("write", inferred).await?
    );

    let mut explicit = params(target);
    explicit.insert("message".to_string(), json!("AAEC"));
    explicit.insert("encoding".to_string(), json!("base64"));
    explicit.insert("withResponse".to_string(), json!(true));
    assert_eq!(
        Some(json!(3)),
        harness.session.call("write", explicit).await?
    );

    let writes = harness.fake.writes();
    assert_eq!(2, writes.len());
    assert_eq!(b"hi".to_vec(), writes[0].value);
    assert_eq!(WriteMode::WithoutResponse, writes[0].mode);
    assert_eq!(vec![0, 1, 2], writes[1].value);
    assert_eq!(WriteMode::WithResponse, writes[1].mode);
    Ok(())
}

#[tokio::test]
async fn write_rejects_bad_messages_before_touching_the_radio() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;

    let error = harness
        .session
        .call(
            "write",
            params(json!({
                "serviceId": BATTERY_SERVICE,
                "characteristicId": BATTERY_LEVEL,
                "message": "%%%",
                "encoding": "base64",
            })),
        )
        .await
        .expect_err("malformed base64 is rejected");
    assert_rpc_error(
        &error,
        RpcErrorKind::InvalidParams,
        "failed to decode Base64 message",
    );
    assert_eq!(0, harness.fake.writes().len());
    Ok(())
}

#[tokio::test]
async fn services_outside_discover_scope_are_rejected() -> anyhow::Result<()> {
    let mut harness = harness(fixture_with_services(
        "dev-1|Probe|-40|180f",
        "180f=2a19:read+notify;180a=2a29:read",
    ));
    connect_battery_peripheral(&mut harness).await?;

    let error = harness
        .session
        .call(
            "read",
            params(json!({"serviceId": "device_information", "characteristicId": "manufacturer_name_string"})),
        )
        .await
        .expect_err("service was not granted by discover");
    assert_rpc_error(
        &error,
        RpcErrorKind::InvalidParams,
        "unexpected service: device_information",
    );
    Ok(())
}

#[tokio::test]
async fn blocklist_is_checked_per_operation() -> anyhow::Result<()> {
    let mut harness = harness(fixture_with_services(
        "dev-1|Probe|-40",
        "1800=2a02:read+write",
    ));
    harness
        .session
        .call(
            "discover",
            params(json!({"filters": [{"name": "Probe"}], "optionalServices": ["generic_access"]})),
        )
        .await?;
    next_message(&mut harness.outbound).await;
    harness
        .session
        .call("connect", params(json!({"peripheralId": "dev-1"})))
        .await?;
    let target = json!({
        "serviceId": "generic_access",
        "characteristicId": "gap.peripheral_privacy_flag",
        "message": "x",
    });

    let write = harness
        .session
        .call("write", params(target.clone()))
        .await
        .expect_err("privacy flag excludes writes");
    assert_rpc_error(
        &write,
        RpcErrorKind::InvalidParams,
        "characteristic block-listed: gap.peripheral_privacy_flag",
    );

    let read = harness
        .session
        .call("read", params(target))
        .await
        .expect_err("no value has been stored");
    assert_rpc_error(
        &read,
        RpcErrorKind::InternalError,
        "failed to retrieve value",
    );
    Ok(())
}

#[tokio::test]
async fn characteristics_are_discovered_once_per_service() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.set_value(battery_level(), vec![7]);
    let target = json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL});

    harness.session.call("read", params(target.clone())).await?;
    harness.session.call("read", params(target)).await?;

    assert_eq!(1, harness.fake.characteristic_discoveries());
    Ok(())
}

#[tokio::test]
async fn gatt_requests_require_a_connection() {
    let harness = harness(fixture("dev-1|Probe|-40|180f"));

    let error = harness
        .session
        .call(
            "read",
            params(json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL})),
        )
        .await
        .expect_err("nothing is connected");
    assert_rpc_error(
        &error,
        RpcErrorKind::InvalidRequest,
        "no peripheral for read request",
    );
}

#[tokio::test]
async fn radio_loss_while_connected_notifies_and_closes() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;

    harness.fake.set_radio_state(RadioState::Unavailable);

    let notification = next_message(&mut harness.outbound).await;
    assert_eq!(
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {
                "code": -32500,
                "message": "Application Error",
                "data": "Bluetooth became unavailable",
            },
        }),
        notification
    );
    assert_eq!(None, timeout(WAIT, harness.outbound.recv()).await?);
    assert!(harness.session.closed().is_cancelled());
    assert_eq!(ConnectionState::Closed, harness.session.connection_state());
    Ok(())
}

#[tokio::test]
async fn peripheral_disconnect_notifies_and_closes() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;

    harness.fake.disconnect(&"dev-1".into());

    let notification = next_message(&mut harness.outbound).await;
    assert_eq!(json!("Peripheral disconnected"), notification["error"]["data"]);
    assert_eq!(None, timeout(WAIT, harness.outbound.recv()).await?);
    assert_matches!(harness.session.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn unknown_methods_are_not_found() {
    let harness = harness(fixture("dev-1|Probe|-40"));

    let error = harness
        .session
        .call("explode", Map::new())
        .await
        .expect_err("unknown method");
    assert_eq!(Some(RpcErrorKind::MethodNotFound), error.kind());
}

#[tokio::test]
async fn closed_session_rejects_new_discovery() {
    let harness = harness(fixture("dev-1|Probe|-40"));
    harness.session.close().await;

    let error = harness
        .session
        .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
        .await
        .expect_err("a closed session stays closed");
    assert_rpc_error(&error, RpcErrorKind::InvalidRequest, "session closed");
    assert_eq!(ConnectionState::Closed, harness.session.connection_state());
    assert!(!harness.fake.is_scanning());
}

#[tokio::test]
async fn close_releases_discovery_waiting_for_radio() -> anyhow::Result<()> {
    let harness = harness(
        FakeCentralConfig::builder()
            .scan_fixture("dev-1|Probe|-40".parse().expect("valid scan fixture"))
            .radio_state(RadioState::Unknown)
            .build(),
    );
    let session = harness.session.clone();
    let queued = tokio::spawn(async move {
        session
            .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
            .await
    });
    tokio::time::sleep(QUIET).await;

    harness.session.close().await;
    let queued = timeout(WAIT, queued).await??;
    assert_rpc_error(
        &queued.expect_err("teardown fails the queued discover"),
        RpcErrorKind::InternalError,
        "Session closed",
    );

    let late = harness
        .session
        .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
        .await
        .expect_err("nothing is queued after teardown");
    assert_rpc_error(&late, RpcErrorKind::InvalidRequest, "session closed");
    assert!(!harness.fake.is_scanning());
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_characteristic_discovery() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.set_value(battery_level(), vec![0x64]);
    harness.fake.stall_characteristic_discovery();

    let reads: Vec<_> = (0..2)
        .map(|_| {
            let session = harness.session.clone();
            tokio::spawn(async move {
                session
                    .call(
                        "read",
                        params(json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL})),
                    )
                    .await
            })
        })
        .collect();
    tokio::time::sleep(QUIET).await;
    assert_eq!(1, harness.fake.characteristic_discoveries());
    assert!(reads.iter().all(|read| !read.is_finished()));

    harness
        .fake
        .finish_characteristic_discovery(&"dev-1".into(), uuid_from_short(0x180F), None);

    for read in reads {
        let result = timeout(WAIT, read).await??;
        assert_eq!(Some(json!({"message": "ZA==", "encoding": "base64"})), result?);
    }
    assert_eq!(1, harness.fake.characteristic_discoveries());
    Ok(())
}

#[tokio::test]
async fn failed_characteristic_discovery_fails_every_waiter() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.stall_characteristic_discovery();

    let requests = [
        ("read", json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL})),
        (
            "startNotifications",
            json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL}),
        ),
    ];
    let waiters: Vec<_> = requests
        .into_iter()
        .map(|(method, request)| {
            let session = harness.session.clone();
            tokio::spawn(async move { session.call(method, params(request)).await })
        })
        .collect();
    tokio::time::sleep(QUIET).await;

    harness.fake.finish_characteristic_discovery(
        &"dev-1".into(),
        uuid_from_short(0x180F),
        Some("attribute table unreadable".to_string()),
    );

    for waiter in waiters {
        let result = timeout(WAIT, waiter).await??;
        assert_rpc_error(
            &result.expect_err("discovery failure reaches every waiter"),
            RpcErrorKind::ApplicationError,
            "attribute table unreadable",
        );
    }
    assert_eq!(1, harness.fake.characteristic_discoveries());
    Ok(())
}

#[tokio::test]
async fn failed_service_discovery_fails_connect() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    harness
        .session
        .call("discover", params(json!({"filters": [{"name": "Probe"}]})))
        .await?;
    next_message(&mut harness.outbound).await;
    harness.fake.fail_service_discovery("services unavailable");

    let error = harness
        .session
        .call("connect", params(json!({"peripheralId": "dev-1"})))
        .await
        .expect_err("service discovery failure fails connect");
    assert_rpc_error(
        &error,
        RpcErrorKind::ApplicationError,
        "services unavailable",
    );
    assert_eq!(ConnectionState::Idle, harness.session.connection_state());
    Ok(())
}

#[tokio::test]
async fn radio_ready_with_dropped_link_notifies_and_closes() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;

    harness.fake.drop_link(&"dev-1".into());
    harness.fake.set_radio_state(RadioState::Available);

    let notification = next_message(&mut harness.outbound).await;
    assert_eq!(Value::Null, notification["id"]);
    assert_eq!(json!(-32500), notification["error"]["code"]);
    assert_eq!(json!("Peripheral disconnected"), notification["error"]["data"]);
    assert_eq!(None, timeout(WAIT, harness.outbound.recv()).await?);
    assert_eq!(ConnectionState::Closed, harness.session.connection_state());
    Ok(())
}

#[tokio::test]
async fn stale_link_is_dropped_on_next_request() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.drop_link(&"dev-1".into());
    let target = json!({"serviceId": BATTERY_SERVICE, "characteristicId": BATTERY_LEVEL});

    let stale = harness
        .session
        .call("read", params(target.clone()))
        .await
        .expect_err("link is gone");
    assert_rpc_error(
        &stale,
        RpcErrorKind::InvalidRequest,
        "not connected for read request",
    );
    assert_eq!(ConnectionState::Idle, harness.session.connection_state());

    let after = harness
        .session
        .call("read", params(target))
        .await
        .expect_err("connection was forgotten");
    assert_rpc_error(
        &after,
        RpcErrorKind::InvalidRequest,
        "no peripheral for read request",
    );
    Ok(())
}

#[tokio::test]
async fn failed_notify_leaves_characteristic_unwatched() -> anyhow::Result<()> {
    let mut harness = harness(fixture("dev-1|Probe|-40|180f"));
    connect_battery_peripheral(&mut harness).await?;
    harness.fake.fail_notify("notifications denied");

    let error = harness
        .session
        .call(
            "read",
            params(json!({
                "serviceId": BATTERY_SERVICE,
                "characteristicId": BATTERY_LEVEL,
                "startNotifications": true,
            })),
        )
        .await
        .expect_err("notify failure fails the read");
    assert_eq!(Some(RpcErrorKind::ApplicationError), error.kind());

    harness
        .fake
        .push_value(&"dev-1".into(), battery_level(), vec![9]);
    assert_quiet(&mut harness.outbound).await;
    Ok(())
}
