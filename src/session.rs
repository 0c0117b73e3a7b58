use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use strum_macros::Display;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::channel::MessageChannel;
use crate::codec::{self, BufferEncoding};
use crate::error::{InteractionError, RpcError};
use crate::gatt::{
    AdvertisementData, BleCentral, CentralBackend, CentralEvent, CentralEventSink, CentralEvents,
    CharacteristicInfo, CharacteristicKey, CharacteristicProperty, GattOperation, GattResolver,
    MINIMUM_SIGNAL_STRENGTH, PeripheralId, PeripheralInfo, PeripheralState, RadioState,
    ScanFilter, StandardGattResolver, WriteMode, canonical_uuid_string, matches_any,
    open_central, parse_filters,
};
use crate::jsonrpc::{BaseHandler, JsonRpcPeer, RpcHandler, RpcSession};
use crate::registry::CallbackRegistry;

type Completion = oneshot::Sender<Result<(), RpcError>>;
type ValueOutcome = Result<Option<Vec<u8>>, RpcError>;

/// Connection lifecycle of one BLE session.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    Ready,
    Closed,
}

#[derive(Debug, Default)]
struct BleState {
    connection: ConnectionState,
    filters: Vec<ScanFilter>,
    allowed_services: HashSet<Uuid>,
    reported: HashSet<PeripheralId>,
    connected: Option<PeripheralId>,
    connection_completion: Option<Completion>,
    characteristic_discovery: CallbackRegistry<Uuid, Result<(), RpcError>>,
    value_updates: CallbackRegistry<CharacteristicKey, ValueOutcome>,
    watched: HashSet<CharacteristicKey>,
    ready_tasks: VecDeque<Completion>,
}

/// The BLE method surface of a session, layered on a [`BleCentral`].
///
/// Central events reach the session through [`CentralEventSink`]; a pump task started by
/// [`BleSession::new`] forwards them until the session is closed or dropped.
pub struct BleSession {
    peer: Arc<JsonRpcPeer>,
    central: Arc<dyn BleCentral>,
    resolver: Arc<dyn GattResolver>,
    state: Mutex<BleState>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for BleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleSession")
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl BleSession {
    /// Creates a session and starts forwarding `events` to it.
    #[must_use]
    pub fn new(
        peer: Arc<JsonRpcPeer>,
        central: Arc<dyn BleCentral>,
        events: CentralEvents,
        resolver: Arc<dyn GattResolver>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            peer,
            central,
            resolver,
            state: Mutex::default(),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(pump_events(
            Arc::downgrade(&session),
            events,
            session.shutdown.clone(),
        ));
        session
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state().connection
    }

    /// Token cancelled once the session has been torn down.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Releases BLE resources, then closes the peer and fails its pending requests.
    pub async fn close(&self) {
        self.release().await;
        self.peer.close().await;
    }

    #[instrument(skip(self, params), level = "debug")]
    async fn discover(&self, params: &Map<String, Value>) -> Result<(), RpcError> {
        let filters = parse_filters(params.get("filters"), self.resolver.as_ref())?;
        let mut allowed_services = self.optional_services(params.get("optionalServices"))?;
        for filter in &filters {
            allowed_services.extend(filter.required_services());
        }

        match self.central.radio_state().await {
            RadioState::Available => {}
            RadioState::Unavailable => return Err(radio_unavailable(RadioState::Unavailable)),
            RadioState::Unknown => {
                let receiver = {
                    let mut state = self.state();
                    ensure_open(&state)?;
                    let (ready, receiver) = oneshot::channel();
                    state.ready_tasks.push_back(ready);
                    receiver
                };
                debug!("radio state unknown; discovery queued");
                receiver.await.map_err(|_closed| session_closed())??;
            }
        }

        {
            let mut state = self.state();
            ensure_open(&state)?;
            state.connected = None;
            state.filters = filters;
            state.allowed_services = allowed_services;
            state.reported.clear();
            state.connection = ConnectionState::Scanning;
        }
        self.central
            .start_scan()
            .await
            .map_err(|error| hardware_error(&error))?;
        info!("scanning for peripherals");
        Ok(())
    }

    fn optional_services(&self, ids: Option<&Value>) -> Result<HashSet<Uuid>, RpcError> {
        let Some(Value::Array(ids)) = ids else {
            return Ok(HashSet::new());
        };
        ids.iter()
            .map(|id| {
                self.resolver.service_uuid(id).ok_or_else(|| {
                    RpcError::invalid_params(format!(
                        "could not resolve UUID for optional service {}",
                        describe(id)
                    ))
                })
            })
            .collect()
    }

    #[instrument(skip(self, params), level = "debug")]
    async fn connect(&self, params: &Map<String, Value>) -> Result<(), RpcError> {
        let Some(peripheral) = params.get("peripheralId").and_then(Value::as_str) else {
            return Err(RpcError::invalid_params("missing or invalid peripheralId"));
        };
        let peripheral = PeripheralId::from(peripheral);

        let receiver = {
            let mut state = self.state();
            ensure_open(&state)?;
            if !state.reported.contains(&peripheral) {
                return Err(RpcError::invalid_params(format!(
                    "invalid peripheralId: {peripheral}"
                )));
            }
            if state.connection_completion.is_some() {
                return Err(RpcError::invalid_request("connection already pending"));
            }
            let (completion, receiver) = oneshot::channel();
            state.connection_completion = Some(completion);
            state.connection = ConnectionState::Connecting;
            receiver
        };

        if let Err(error) = self.central.stop_scan().await {
            warn!(%error, "failed to stop scanning before connecting");
        }
        if let Err(error) = self.central.connect(&peripheral).await {
            let mut state = self.state();
            state.connection_completion = None;
            state.connection = ConnectionState::Idle;
            return Err(hardware_error(&error));
        }

        receiver.await.map_err(|_closed| session_closed())?
    }

    #[instrument(skip(self, params), level = "debug")]
    async fn write(&self, params: &Map<String, Value>) -> Result<usize, RpcError> {
        let buffer = codec::decode_buffer(params)?;
        let with_response = params.get("withResponse").and_then(Value::as_bool);
        let (peripheral, endpoint) = self
            .endpoint("write request", params, GattOperation::Write)
            .await?;

        let mode = if with_response
            .unwrap_or(!endpoint.has_property(CharacteristicProperty::WriteWithoutResponse))
        {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        };
        let length = buffer.len();
        self.central
            .write_value(&peripheral, endpoint.key(), buffer, mode)
            .await
            .map_err(|error| hardware_error(&error))?;
        debug!(length, %mode, "write submitted");
        Ok(length)
    }

    #[instrument(skip(self, params), level = "debug")]
    async fn read(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, RpcError> {
        let encoding = params
            .get("encoding")
            .and_then(Value::as_str)
            .unwrap_or("base64")
            .to_string();
        let start_notifications = params
            .get("startNotifications")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let (peripheral, endpoint) = self
            .endpoint("read request", params, GattOperation::Read)
            .await?;
        let key = endpoint.key();

        let (receiver, _is_first) = self.state().value_updates.add(key);
        if start_notifications {
            self.state().watched.insert(key);
            if let Err(error) = self.central.set_notify(&peripheral, key, true).await {
                drop(receiver);
                let mut state = self.state();
                state.watched.remove(&key);
                state.value_updates.discard_closed(&key);
                return Err(hardware_error(&error));
            }
        }
        if let Err(error) = self.central.read_value(&peripheral, key).await {
            drop(receiver);
            self.state().value_updates.discard_closed(&key);
            return Err(hardware_error(&error));
        }

        let Some(value) = receiver.await.map_err(|_closed| session_closed())?? else {
            return Err(RpcError::internal_error("failed to retrieve value"));
        };
        BufferEncoding::from_tag(Some(&encoding))
            .and_then(|encoding| codec::encode_buffer(&value, encoding))
            .ok_or_else(|| RpcError::invalid_request("failed to encode result"))
    }

    async fn set_notifications(
        &self,
        context: &str,
        params: &Map<String, Value>,
        enabled: bool,
    ) -> Result<(), RpcError> {
        let (peripheral, endpoint) = self.endpoint(context, params, GattOperation::Read).await?;
        let key = endpoint.key();
        {
            let mut state = self.state();
            if enabled {
                state.watched.insert(key);
            } else {
                state.watched.remove(&key);
            }
        }
        self.central
            .set_notify(&peripheral, key, enabled)
            .await
            .map_err(|error| hardware_error(&error))
    }

    async fn services(&self) -> Vec<String> {
        let Some(peripheral) = self.state().connected.clone() else {
            return Vec::new();
        };
        self.central
            .services(&peripheral)
            .await
            .iter()
            .map(|service| canonical_uuid_string(&service.uuid()))
            .collect()
    }

    /// Resolves and checks the characteristic a GATT request targets.
    async fn endpoint(
        &self,
        context: &str,
        params: &Map<String, Value>,
        operation: GattOperation,
    ) -> Result<(PeripheralId, CharacteristicInfo), RpcError> {
        let connected = {
            let state = self.state();
            ensure_open(&state)?;
            state.connected.clone()
        };
        let Some(peripheral) = connected else {
            return Err(RpcError::invalid_request(format!(
                "no peripheral for {context}"
            )));
        };
        if self.central.peripheral_state(&peripheral).await != PeripheralState::Connected {
            if let Err(error) = self.central.cancel_connection(&peripheral).await {
                debug!(%error, "failed to cancel stale connection");
            }
            let mut state = self.state();
            state.connected = None;
            state.connection = ConnectionState::Idle;
            return Err(RpcError::invalid_request(format!(
                "not connected for {context}"
            )));
        }

        let Some(service_name) = params.get("serviceId") else {
            return Err(RpcError::invalid_params(format!(
                "missing service UUID for {context}"
            )));
        };
        let Some(service) = self.resolver.service_uuid(service_name) else {
            return Err(RpcError::invalid_params(format!(
                "could not determine service UUID for {}",
                describe(service_name)
            )));
        };
        if !self.state().allowed_services.contains(&service) {
            return Err(RpcError::invalid_params(format!(
                "unexpected service: {}",
                describe(service_name)
            )));
        }
        if self.is_blocked(&service, operation) {
            return Err(RpcError::invalid_params(format!(
                "service block-listed: {}",
                describe(service_name)
            )));
        }

        let Some(characteristic_name) = params.get("characteristicId") else {
            return Err(RpcError::invalid_params(format!(
                "missing characteristic UUID for {context}"
            )));
        };
        let Some(characteristic) = self.resolver.characteristic_uuid(characteristic_name) else {
            return Err(RpcError::invalid_params(format!(
                "could not determine characteristic UUID for {}",
                describe(characteristic_name)
            )));
        };
        if self.is_blocked(&characteristic, operation) {
            return Err(RpcError::invalid_params(format!(
                "characteristic block-listed: {}",
                describe(characteristic_name)
            )));
        }

        let missing_service = || {
            RpcError::invalid_params(format!("could not find service {}", describe(service_name)))
        };
        let known = self
            .central
            .services(&peripheral)
            .await
            .into_iter()
            .find(|info| info.uuid() == service)
            .ok_or_else(missing_service)?;
        let known = if known.characteristics().is_some() {
            known
        } else {
            self.discover_characteristics(&peripheral, service).await?;
            self.central
                .services(&peripheral)
                .await
                .into_iter()
                .find(|info| info.uuid() == service)
                .ok_or_else(missing_service)?
        };

        let endpoint = known.characteristic(characteristic).cloned().ok_or_else(|| {
            RpcError::invalid_params(format!(
                "could not find characteristic {} on {}",
                describe(characteristic_name),
                describe(service_name)
            ))
        })?;
        Ok((peripheral, endpoint))
    }

    /// Waits for characteristic discovery on `service`, starting it for the first waiter only.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<(), RpcError> {
        let (receiver, is_first) = self.state().characteristic_discovery.add(service);
        if is_first {
            debug!(%service, "discovering characteristics");
            if let Err(error) = self
                .central
                .discover_characteristics(peripheral, service)
                .await
            {
                self.state()
                    .characteristic_discovery
                    .fire(&service, &Err(hardware_error(&error)));
            }
        }
        receiver.await.map_err(|_closed| session_closed())?
    }

    fn is_blocked(&self, uuid: &Uuid, operation: GattOperation) -> bool {
        self.resolver
            .blocklist_status(uuid)
            .is_some_and(|status| status.excludes(operation))
    }

    async fn on_radio_state(&self, radio: RadioState) {
        if radio == RadioState::Unknown {
            return;
        }
        let outcome = match radio {
            RadioState::Available => Ok(()),
            other => Err(radio_unavailable(other)),
        };

        let (ready_tasks, connected) = {
            let mut state = self.state();
            let ready_tasks: Vec<_> = state.ready_tasks.drain(..).collect();
            (ready_tasks, state.connected.clone())
        };
        for task in ready_tasks {
            let _ = task.send(outcome.clone());
        }

        let Some(peripheral) = connected else {
            return;
        };
        if radio != RadioState::Available {
            self.abandon(&peripheral, "Bluetooth became unavailable")
                .await;
            return;
        }
        let link = self.central.peripheral_state(&peripheral).await;
        if !matches!(
            link,
            PeripheralState::Connecting | PeripheralState::Connected
        ) {
            self.abandon(&peripheral, "Peripheral disconnected").await;
        }
    }

    async fn on_discovered(
        &self,
        peripheral: PeripheralInfo,
        advertisement: &AdvertisementData,
        rssi: Option<i16>,
    ) {
        if let Some(rssi) = rssi
            && rssi < MINIMUM_SIGNAL_STRENGTH
        {
            trace!(peripheral = %peripheral.id(), rssi, "advertisement below signal floor");
            return;
        }
        if self.central.peripheral_state(peripheral.id()).await != PeripheralState::Disconnected {
            return;
        }
        {
            let mut state = self.state();
            if !matches_any(&state.filters, &peripheral, advertisement) {
                return;
            }
            state.reported.insert(peripheral.id().clone());
        }

        let params = json!({
            "name": peripheral.name().unwrap_or_default(),
            "peripheralId": peripheral.id(),
            "rssi": rssi,
        });
        if let Err(error) = self
            .peer
            .send_notification("didDiscoverPeripheral", Some(params))
            .await
        {
            warn!(%error, "failed to report discovered peripheral");
        }
    }

    async fn on_connected(&self, peripheral: PeripheralId) {
        {
            let mut state = self.state();
            state.connected = Some(peripheral.clone());
            state.connection = ConnectionState::DiscoveringServices;
        }
        info!(%peripheral, "connected");
        if let Err(error) = self.central.discover_services(&peripheral).await {
            self.finish_connection(Err(hardware_error(&error)));
        }
    }

    fn on_services_discovered(&self, peripheral: &PeripheralId, error: Option<String>) {
        if self.state().connected.as_ref() != Some(peripheral) {
            return;
        }
        self.finish_connection(match error {
            Some(error) => Err(RpcError::application_error(error)),
            None => Ok(()),
        });
    }

    fn finish_connection(&self, outcome: Result<(), RpcError>) {
        let mut state = self.state();
        let Some(completion) = state.connection_completion.take() else {
            return;
        };
        if outcome.is_ok() {
            state.connection = ConnectionState::Ready;
        } else {
            state.connected = None;
            state.connection = ConnectionState::Idle;
        }
        let _ = completion.send(outcome);
    }

    fn on_connect_failed(&self, peripheral: &PeripheralId, error: &str) {
        warn!(%peripheral, error, "connection failed");
        self.finish_connection(Err(RpcError::application_error(format!(
            "failed to connect to {peripheral}: {error}"
        ))));
    }

    fn on_characteristics_discovered(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        error: Option<String>,
    ) {
        let mut state = self.state();
        if state.connected.as_ref() != Some(peripheral) {
            return;
        }
        let outcome = error.map_or(Ok(()), |error| Err(RpcError::application_error(error)));
        state.characteristic_discovery.fire(&service, &outcome);
    }

    async fn on_value_updated(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
        value: Option<Vec<u8>>,
        error: Option<String>,
    ) {
        let watched = {
            let mut state = self.state();
            if state.connected.as_ref() != Some(peripheral) {
                return;
            }
            let outcome = match error {
                Some(error) => Err(RpcError::application_error(error)),
                None => Ok(value.clone()),
            };
            state.value_updates.fire(&characteristic, &outcome);
            state.watched.contains(&characteristic)
        };

        if watched
            && let Some(value) = value
            && let Some(message) = codec::encode_buffer(&value, BufferEncoding::Base64)
            && let Err(error) = self
                .peer
                .send_notification("characteristicDidChange", Some(Value::Object(message)))
                .await
        {
            warn!(%error, %characteristic, "failed to report characteristic change");
        }
    }

    async fn on_disconnected(&self, peripheral: &PeripheralId) {
        if self.state().connected.as_ref() == Some(peripheral) {
            self.abandon(peripheral, "Peripheral disconnected").await;
        }
    }

    /// Drops the connection, tells the peer why, and tears the session down.
    async fn abandon(&self, peripheral: &PeripheralId, reason: &str) {
        warn!(%peripheral, reason, "closing session");
        if let Err(error) = self.central.cancel_connection(peripheral).await {
            debug!(%error, "failed to cancel connection");
        }
        self.state().connected = None;
        if let Err(error) = self
            .peer
            .send_error_notification(&RpcError::application_error(reason))
            .await
        {
            warn!(%error, "failed to send error notification");
        }
        self.close().await;
    }

    /// Fails every pending completion and stops the central. Runs at most once.
    async fn release(&self) {
        let (connected, completions) = {
            let mut state = self.state();
            if state.connection == ConnectionState::Closed {
                return;
            }
            state.connection = ConnectionState::Closed;

            let mut completions: Vec<_> = state.ready_tasks.drain(..).collect();
            completions.extend(state.connection_completion.take());
            let failed = state
                .characteristic_discovery
                .fail_all(&Err(session_closed()))
                + state.value_updates.fail_all(&Err(session_closed()))
                + completions.len();
            if failed > 0 {
                warn!(pending = failed, "BLE session closed with pending operations");
            }
            state.watched.clear();
            state.filters.clear();
            state.reported.clear();
            (state.connected.take(), completions)
        };

        for completion in completions {
            let _ = completion.send(Err(session_closed()));
        }
        if let Some(peripheral) = connected
            && let Err(error) = self.central.cancel_connection(&peripheral).await
        {
            debug!(%error, "failed to cancel connection during teardown");
        }
        self.central.shutdown().await;
        self.shutdown.cancel();
    }

    fn state(&self) -> MutexGuard<'_, BleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BleSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RpcHandler for BleSession {
    async fn call(
        &self,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        match method {
            "discover" => self.discover(&params).await.map(|()| None),
            "connect" => self.connect(&params).await.map(|()| None),
            "write" => self.write(&params).await.map(|length| Some(json!(length))),
            "read" => self.read(&params).await.map(|value| Some(Value::Object(value))),
            "startNotifications" => self
                .set_notifications("notification request", &params, true)
                .await
                .map(|()| None),
            "stopNotifications" => self
                .set_notifications("stopNotifications", &params, false)
                .await
                .map(|()| None),
            "getServices" => Ok(Some(json!(self.services().await))),
            _ => BaseHandler.call(method, params).await,
        }
    }

    async fn session_closed(&self) {
        self.release().await;
    }
}

#[async_trait]
impl CentralEventSink for BleSession {
    #[instrument(skip(self), level = "trace")]
    async fn handle_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::StateChanged(radio) => self.on_radio_state(radio).await,
            CentralEvent::Discovered {
                peripheral,
                advertisement,
                rssi,
            } => self.on_discovered(peripheral, &advertisement, rssi).await,
            CentralEvent::Connected(peripheral) => self.on_connected(peripheral).await,
            CentralEvent::ConnectFailed { peripheral, error } => {
                self.on_connect_failed(&peripheral, &error);
            }
            CentralEvent::Disconnected(peripheral) => self.on_disconnected(&peripheral).await,
            CentralEvent::ServicesDiscovered { peripheral, error } => {
                self.on_services_discovered(&peripheral, error);
            }
            CentralEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                error,
            } => self.on_characteristics_discovered(&peripheral, service, error),
            CentralEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
                error,
            } => {
                self.on_value_updated(&peripheral, characteristic, value, error)
                    .await;
            }
        }
    }
}

async fn pump_events<S>(sink: Weak<S>, mut events: CentralEvents, shutdown: CancellationToken)
where
    S: CentralEventSink + 'static,
{
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            debug!("central event stream ended");
            break;
        };
        let Some(sink) = sink.upgrade() else {
            break;
        };
        sink.handle_event(event).await;
    }
    debug!("central event pump stopped");
}

/// Opens a central on `backend` and binds a BLE session to `channel`.
///
/// # Errors
///
/// Returns an error if the central cannot be opened.
#[instrument(skip(channel), level = "info")]
pub async fn open_ble_session(
    channel: Arc<dyn MessageChannel>,
    backend: &CentralBackend,
) -> Result<RpcSession, InteractionError> {
    let (central, events) = open_central(backend).await?;
    let peer = Arc::new(JsonRpcPeer::new(channel));
    let ble = BleSession::new(
        peer.clone(),
        central,
        events,
        Arc::new(StandardGattResolver),
    );
    Ok(RpcSession::new(peer, ble))
}

fn ensure_open(state: &BleState) -> Result<(), RpcError> {
    if state.connection == ConnectionState::Closed {
        return Err(RpcError::invalid_request("session closed"));
    }
    Ok(())
}

fn session_closed() -> RpcError {
    RpcError::internal_error("Session closed")
}

fn radio_unavailable(radio: RadioState) -> RpcError {
    RpcError::application_error(format!("Bluetooth unavailable: {radio}"))
}

/// Reports a backend failure with its full cause chain.
fn hardware_error(error: &InteractionError) -> RpcError {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    RpcError::application_error(message)
}

/// Peer-supplied identifier as it appears in error text.
fn describe(id: &Value) -> String {
    match id {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::error::RpcErrorKind;

    #[rstest]
    #[case(json!("battery_service"), "battery_service")]
    #[case(json!(6159), "6159")]
    #[case(json!(null), "null")]
    fn describe_prints_strings_without_quotes(#[case] id: Value, #[case] expected: &str) {
        assert_eq!(expected, describe(&id));
    }

    #[test]
    fn hardware_error_includes_cause_chain() {
        let error = hardware_error(&InteractionError::Fixture(
            crate::error::FixtureError::EmptyFixture,
        ));
        assert_eq!(Some(RpcErrorKind::ApplicationError), error.kind());
        assert_matches!(error.data(), Some(Value::String(text)) if text.contains("fixture is empty"));
    }

    #[test]
    fn connection_state_displays_snake_case() {
        assert_eq!(
            "discovering_services",
            ConnectionState::DiscoveringServices.to_string()
        );
    }
}
