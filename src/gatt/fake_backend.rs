use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::central::{BleCentral, CentralEvent, CentralEvents};
use super::model::{
    AdvertisementData, CharacteristicInfo, CharacteristicKey, CharacteristicProperty,
    PeripheralId, PeripheralInfo, PeripheralState, RadioState, ServiceInfo, WriteMode,
};
use super::uuid::uuid_from_short;
use crate::error::{FixtureError, InteractionError};

/// One advertising peripheral in a scan fixture.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScanRecord {
    id: PeripheralId,
    name: Option<String>,
    rssi: Option<i16>,
    services: Vec<Uuid>,
    manufacturer_data: Option<Vec<u8>>,
}

impl ScanRecord {
    #[must_use]
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    fn advertisement(&self) -> AdvertisementData {
        AdvertisementData::new(self.services.clone(), self.manufacturer_data.clone())
    }
}

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    records: Vec<ScanRecord>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let records = parse_scan_fixture(value)?;
        Ok(Self { records })
    }
}

/// Parsed fake GATT table shared by every fixture peripheral.
#[derive(Debug, Clone)]
pub struct ServiceFixture {
    services: Vec<ServiceTemplate>,
}

impl Default for ServiceFixture {
    fn default() -> Self {
        let battery_service = uuid_from_short(0x180F);
        Self {
            services: vec![ServiceTemplate {
                uuid: battery_service,
                characteristics: vec![CharacteristicInfo::new(
                    CharacteristicKey {
                        service: battery_service,
                        characteristic: uuid_from_short(0x2A19),
                    },
                    vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
                )],
            }],
        }
    }
}

impl FromStr for ServiceFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let services = parse_service_fixture(value)?;
        Ok(Self { services })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct ServiceTemplate {
    uuid: Uuid,
    characteristics: Vec<CharacteristicInfo>,
}

/// Settings for constructing a fake central.
#[derive(Debug, Clone, Builder)]
pub struct FakeCentralConfig {
    scan_fixture: ScanFixture,
    #[builder(default)]
    services: ServiceFixture,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default = RadioState::Available)]
    radio_state: RadioState,
}

/// A write submitted to the fake central.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordedWrite {
    pub peripheral: PeripheralId,
    pub characteristic: CharacteristicKey,
    pub value: Vec<u8>,
    pub mode: WriteMode,
}

#[derive(Debug, Default)]
struct FakeState {
    radio: Option<RadioState>,
    scanning: bool,
    stall_connects: bool,
    connect_failure: Option<String>,
    service_discovery_failure: Option<String>,
    stall_characteristic_discovery: bool,
    notify_failure: Option<String>,
    links: HashMap<PeripheralId, PeripheralState>,
    services_discovered: HashSet<PeripheralId>,
    characteristics_discovered: HashSet<(PeripheralId, Uuid)>,
    characteristic_discoveries: usize,
    values: HashMap<CharacteristicKey, Vec<u8>>,
    notifying: HashSet<CharacteristicKey>,
    writes: Vec<RecordedWrite>,
    scan_task: Option<JoinHandle<()>>,
}

/// Fixture-driven central used in tests and non-hardware environments.
///
/// Besides the [`BleCentral`] operations it exposes hooks to script radio state changes,
/// value pushes, disconnects and stalled or failing connects.
#[derive(Debug)]
pub struct FakeCentral {
    records: Vec<ScanRecord>,
    services: Vec<ServiceTemplate>,
    discovery_delay: Duration,
    events: mpsc::UnboundedSender<CentralEvent>,
    state: Mutex<FakeState>,
}

impl FakeCentral {
    /// Creates a fake central and the stream of events it emits.
    #[must_use]
    pub fn new(config: FakeCentralConfig) -> (Self, CentralEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let state = FakeState {
            radio: Some(config.radio_state),
            ..FakeState::default()
        };

        (
            Self {
                records: config.scan_fixture.into(),
                services: config.services.services,
                discovery_delay: config.discovery_delay,
                events,
                state: Mutex::new(state),
            },
            receiver,
        )
    }

    /// Changes the radio availability and reports it.
    pub fn set_radio_state(&self, radio: RadioState) {
        self.state().radio = Some(radio);
        self.emit(CentralEvent::StateChanged(radio));
    }

    /// Makes later connects stay pending without completing.
    pub fn stall_connects(&self) {
        self.state().stall_connects = true;
    }

    /// Makes later connects fail with `reason`.
    pub fn fail_connects(&self, reason: impl Into<String>) {
        self.state().connect_failure = Some(reason.into());
    }

    /// Makes later service discoveries report `reason`.
    pub fn fail_service_discovery(&self, reason: impl Into<String>) {
        self.state().service_discovery_failure = Some(reason.into());
    }

    /// Makes later characteristic discoveries wait for [`Self::finish_characteristic_discovery`].
    pub fn stall_characteristic_discovery(&self) {
        self.state().stall_characteristic_discovery = true;
    }

    /// Completes a stalled characteristic discovery, failing it with `error` when given.
    pub fn finish_characteristic_discovery(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        error: Option<String>,
    ) {
        if error.is_none() {
            self.state()
                .characteristics_discovered
                .insert((peripheral.clone(), service));
        }
        self.emit(CentralEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service,
            error,
        });
    }

    /// Makes later notify changes fail with `reason`.
    pub fn fail_notify(&self, reason: impl Into<String>) {
        self.state().notify_failure = Some(reason.into());
    }

    /// Drops the link without reporting it, as when a disconnect event is missed.
    pub fn drop_link(&self, peripheral: &PeripheralId) {
        self.state()
            .links
            .insert(peripheral.clone(), PeripheralState::Disconnected);
    }

    /// Stores a value that later reads return.
    pub fn set_value(&self, characteristic: CharacteristicKey, value: Vec<u8>) {
        self.state().values.insert(characteristic, value);
    }

    /// Stores a value and pushes it as if the peripheral notified.
    pub fn push_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
        value: Vec<u8>,
    ) {
        self.set_value(characteristic, value.clone());
        self.emit(CentralEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic,
            value: Some(value),
            error: None,
        });
    }

    /// Drops the link as if the peripheral went away.
    pub fn disconnect(&self, peripheral: &PeripheralId) {
        self.state()
            .links
            .insert(peripheral.clone(), PeripheralState::Disconnected);
        self.emit(CentralEvent::Disconnected(peripheral.clone()));
    }

    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    #[must_use]
    pub fn is_notifying(&self, characteristic: CharacteristicKey) -> bool {
        self.state().notifying.contains(&characteristic)
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    /// Number of characteristic discoveries started so far.
    #[must_use]
    pub fn characteristic_discoveries(&self) -> usize {
        self.state().characteristic_discoveries
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CentralEvent) {
        if self.events.send(event).is_err() {
            debug!("fake central event dropped after session teardown");
        }
    }

    fn record(&self, peripheral: &PeripheralId) -> Result<&ScanRecord, InteractionError> {
        self.records
            .iter()
            .find(|record| record.id() == peripheral)
            .ok_or_else(|| InteractionError::UnknownPeripheral {
                peripheral: peripheral.clone(),
            })
    }

    fn ensure_connected(&self, peripheral: &PeripheralId) -> Result<(), InteractionError> {
        match self.state().links.get(peripheral) {
            Some(PeripheralState::Connected) => Ok(()),
            _ => Err(InteractionError::FakeRefused {
                reason: format!("peripheral `{peripheral}` is not connected"),
            }),
        }
    }

    fn ensure_characteristic(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
    ) -> Result<(), InteractionError> {
        self.ensure_connected(peripheral)?;
        let known = self
            .services
            .iter()
            .filter(|service| service.uuid == characteristic.service)
            .flat_map(|service| &service.characteristics)
            .any(|info| info.key() == characteristic);
        if known {
            Ok(())
        } else {
            Err(InteractionError::UnknownCharacteristic {
                peripheral: peripheral.clone(),
                characteristic: characteristic.to_string(),
            })
        }
    }

    fn discovered_events(&self) -> Vec<CentralEvent> {
        let state = self.state();
        self.records
            .iter()
            .map(|record| {
                let known_services = if state.services_discovered.contains(record.id()) {
                    self.services.iter().map(|service| service.uuid).collect()
                } else {
                    Vec::new()
                };
                CentralEvent::Discovered {
                    peripheral: PeripheralInfo::new(
                        record.id.clone(),
                        record.name.clone(),
                        known_services,
                    ),
                    advertisement: record.advertisement(),
                    rssi: record.rssi,
                }
            })
            .collect()
    }
}

#[async_trait]
impl BleCentral for FakeCentral {
    async fn radio_state(&self) -> RadioState {
        self.state().radio.unwrap_or(RadioState::Unknown)
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<(), InteractionError> {
        let events = self.discovered_events();
        let mut state = self.state();
        state.scanning = true;
        if let Some(previous) = state.scan_task.take() {
            previous.abort();
        }

        if self.discovery_delay.is_zero() {
            drop(state);
            for event in events {
                self.emit(event);
            }
        } else {
            let sender = self.events.clone();
            let delay = self.discovery_delay;
            state.scan_task = Some(tokio::spawn(async move {
                sleep(delay).await;
                for event in events {
                    let _ = sender.send(event);
                }
            }));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), InteractionError> {
        let mut state = self.state();
        state.scanning = false;
        if let Some(task) = state.scan_task.take() {
            task.abort();
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), InteractionError> {
        self.record(peripheral)?;
        let mut state = self.state();
        if state.stall_connects {
            state
                .links
                .insert(peripheral.clone(), PeripheralState::Connecting);
            return Ok(());
        }

        let event = match state.connect_failure.clone() {
            Some(error) => CentralEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                error,
            },
            None => {
                state
                    .links
                    .insert(peripheral.clone(), PeripheralState::Connected);
                CentralEvent::Connected(peripheral.clone())
            }
        };
        drop(state);
        self.emit(event);
        Ok(())
    }

    async fn cancel_connection(&self, peripheral: &PeripheralId) -> Result<(), InteractionError> {
        self.state()
            .links
            .insert(peripheral.clone(), PeripheralState::Disconnected);
        Ok(())
    }

    async fn peripheral_state(&self, peripheral: &PeripheralId) -> PeripheralState {
        self.state()
            .links
            .get(peripheral)
            .copied()
            .unwrap_or(PeripheralState::Disconnected)
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<(), InteractionError> {
        self.ensure_connected(peripheral)?;
        let error = {
            let mut state = self.state();
            let error = state.service_discovery_failure.clone();
            if error.is_none() {
                state.services_discovered.insert(peripheral.clone());
            }
            error
        };
        self.emit(CentralEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            error,
        });
        Ok(())
    }

    async fn services(&self, peripheral: &PeripheralId) -> Vec<ServiceInfo> {
        let state = self.state();
        if !state.services_discovered.contains(peripheral) {
            return Vec::new();
        }

        self.services
            .iter()
            .map(|service| {
                let characteristics = state
                    .characteristics_discovered
                    .contains(&(peripheral.clone(), service.uuid))
                    .then(|| service.characteristics.clone());
                ServiceInfo::new(service.uuid, characteristics)
            })
            .collect()
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<(), InteractionError> {
        self.ensure_connected(peripheral)?;
        let stalled = {
            let mut state = self.state();
            state.characteristic_discoveries += 1;
            state.stall_characteristic_discovery
        };
        if !stalled {
            self.finish_characteristic_discovery(peripheral, service, None);
        }
        Ok(())
    }

    async fn read_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
    ) -> Result<(), InteractionError> {
        self.ensure_characteristic(peripheral, characteristic)?;
        let value = self.state().values.get(&characteristic).cloned();
        self.emit(CentralEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic,
            value,
            error: None,
        });
        Ok(())
    }

    async fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        self.ensure_characteristic(peripheral, characteristic)?;
        let mut state = self.state();
        state.values.insert(characteristic, value.clone());
        state.writes.push(RecordedWrite {
            peripheral: peripheral.clone(),
            characteristic,
            value,
            mode,
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
        enabled: bool,
    ) -> Result<(), InteractionError> {
        self.ensure_characteristic(peripheral, characteristic)?;
        let mut state = self.state();
        if let Some(reason) = state.notify_failure.clone() {
            return Err(InteractionError::FakeRefused { reason });
        }
        if enabled {
            state.notifying.insert(characteristic);
        } else {
            state.notifying.remove(&characteristic);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(task) = self.state().scan_task.take() {
            task.abort();
        }
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<ScanRecord>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

/// Parses `id|name|rssi[|services[|manufacturer-hex]]`; `-` marks an absent name or RSSI.
fn parse_scan_record(raw_record: &str) -> Result<ScanRecord, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if !(3..=5).contains(&fields.len()) {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields[..3].iter().any(|field| field.is_empty()) {
        return Err(FixtureError::EmptyRecordField);
    }

    let name = (fields[1] != "-").then(|| fields[1].to_string());
    let rssi = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].parse::<i16>()?)
    };
    let services = match fields.get(3) {
        Some(services) if !services.is_empty() => services
            .split(',')
            .map(parse_uuid)
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };
    let manufacturer_data = match fields.get(4) {
        Some(payload) if !payload.is_empty() => Some(hex::decode(payload)?),
        _ => None,
    };

    Ok(ScanRecord {
        id: fields[0].into(),
        name,
        rssi,
        services,
        manufacturer_data,
    })
}

/// Parses `service=characteristic:prop+prop,...;...`.
fn parse_service_fixture(raw_fixture: &str) -> Result<Vec<ServiceTemplate>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(|record| {
            let (service, characteristics) = record
                .trim()
                .split_once('=')
                .ok_or(FixtureError::InvalidServiceRecord)?;
            let service = parse_uuid(service)?;
            let characteristics = characteristics
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| parse_characteristic(service, entry))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ServiceTemplate {
                uuid: service,
                characteristics,
            })
        })
        .collect()
}

fn parse_characteristic(service: Uuid, raw_entry: &str) -> Result<CharacteristicInfo, FixtureError> {
    let (characteristic, properties) = raw_entry
        .trim()
        .split_once(':')
        .ok_or(FixtureError::InvalidServiceRecord)?;
    let properties = properties
        .split('+')
        .map(|property| {
            property
                .trim()
                .parse::<CharacteristicProperty>()
                .map_err(|_error| FixtureError::UnknownProperty {
                    value: property.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CharacteristicInfo::new(
        CharacteristicKey {
            service,
            characteristic: parse_uuid(characteristic)?,
        },
        properties,
    ))
}

/// Accepts a 16/32-bit assigned number in hex or a full UUID.
fn parse_uuid(raw_value: &str) -> Result<Uuid, FixtureError> {
    let value = raw_value.trim();
    let invalid = || FixtureError::InvalidUuid {
        value: value.to_string(),
    };
    if value.len() <= 8 {
        u32::from_str_radix(value, 16)
            .map(uuid_from_short)
            .map_err(|_error| invalid())
    } else {
        Uuid::parse_str(value).map_err(|_error| invalid())
    }
}
