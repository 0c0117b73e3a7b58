use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent as AdapterEvent, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::central::{BleCentral, CentralEvent, CentralEvents};
use super::model::{
    AdvertisementData, CharacteristicInfo, CharacteristicKey, CharacteristicProperty,
    PeripheralId, PeripheralInfo, PeripheralState, RadioState, ServiceInfo, WriteMode,
};
use crate::error::InteractionError;

type PeripheralMap = Arc<Mutex<HashMap<PeripheralId, Peripheral>>>;

#[derive(Debug)]
struct PendingWrite {
    peripheral: Peripheral,
    characteristic: Characteristic,
    value: Vec<u8>,
    write_type: WriteType,
}

/// Central backed by the first `btleplug` adapter.
#[derive(Debug)]
pub struct BtleplugCentral {
    _manager: Manager,
    adapter: Adapter,
    events: mpsc::UnboundedSender<CentralEvent>,
    peripherals: PeripheralMap,
    connecting: Arc<Mutex<HashSet<PeripheralId>>>,
    characteristics_discovered: Mutex<HashSet<(PeripheralId, Uuid)>>,
    writes: mpsc::UnboundedSender<PendingWrite>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleplugCentral {
    /// Opens the first adapter and starts forwarding its events.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform manager fails or no adapter is present.
    #[instrument(level = "debug")]
    pub async fn open() -> Result<(Self, CentralEvents), InteractionError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(InteractionError::NoAdapters)?;
        let adapter_info = adapter.adapter_info().await?;
        info!(adapter = %adapter_info, "opened BLE adapter");

        let (events, receiver) = mpsc::unbounded_channel();
        let (writes, write_queue) = mpsc::unbounded_channel();
        let peripherals = PeripheralMap::default();

        let adapter_events = adapter.events().await?;
        let tasks = vec![
            tokio::spawn(forward_adapter_events(
                adapter.clone(),
                adapter_events,
                peripherals.clone(),
                events.clone(),
            )),
            tokio::spawn(drain_writes(write_queue)),
        ];

        Ok((
            Self {
                _manager: manager,
                adapter,
                events,
                peripherals,
                connecting: Arc::default(),
                characteristics_discovered: Mutex::default(),
                writes,
                tasks: Mutex::new(tasks),
            },
            receiver,
        ))
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral, InteractionError> {
        lock(&self.peripherals)
            .get(id)
            .cloned()
            .ok_or_else(|| InteractionError::UnknownPeripheral {
                peripheral: id.clone(),
            })
    }

    fn characteristic(
        &self,
        id: &PeripheralId,
        key: CharacteristicKey,
    ) -> Result<(Peripheral, Characteristic), InteractionError> {
        let peripheral = self.peripheral(id)?;
        let characteristic = find_characteristic(&peripheral, key).ok_or_else(|| {
            InteractionError::UnknownCharacteristic {
                peripheral: id.clone(),
                characteristic: key.to_string(),
            }
        })?;
        Ok((peripheral, characteristic))
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(tokio::spawn(task));
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    async fn radio_state(&self) -> RadioState {
        // An open adapter is treated as powered; btleplug reports power loss as errors.
        RadioState::Available
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<(), InteractionError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), InteractionError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn connect(&self, id: &PeripheralId) -> Result<(), InteractionError> {
        let peripheral = self.peripheral(id)?;
        lock(&self.connecting).insert(id.clone());

        let id = id.clone();
        let events = self.events.clone();
        let connecting = self.connecting.clone();
        let notification_events = self.events.clone();
        self.spawn(async move {
            let outcome = peripheral.connect().await;
            lock(&connecting).remove(&id);
            match outcome {
                Ok(()) => {
                    info!(%id, "connected to peripheral");
                    match peripheral.notifications().await {
                        Ok(stream) => {
                            tokio::spawn(forward_notifications(
                                peripheral.clone(),
                                id.clone(),
                                stream,
                                notification_events,
                            ));
                        }
                        Err(error) => warn!(%error, "failed to open notification stream"),
                    }
                    let _ = events.send(CentralEvent::Connected(id));
                }
                Err(error) => {
                    let _ = events.send(CentralEvent::ConnectFailed {
                        peripheral: id,
                        error: error.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn cancel_connection(&self, id: &PeripheralId) -> Result<(), InteractionError> {
        let peripheral = self.peripheral(id)?;
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn peripheral_state(&self, id: &PeripheralId) -> PeripheralState {
        if lock(&self.connecting).contains(id) {
            return PeripheralState::Connecting;
        }
        let Ok(peripheral) = self.peripheral(id) else {
            return PeripheralState::Disconnected;
        };
        match peripheral.is_connected().await {
            Ok(true) => PeripheralState::Connected,
            Ok(false) => PeripheralState::Disconnected,
            Err(error) => {
                debug!(%error, "failed to query connection state");
                PeripheralState::Disconnected
            }
        }
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn discover_services(&self, id: &PeripheralId) -> Result<(), InteractionError> {
        let peripheral = self.peripheral(id)?;
        let id = id.clone();
        let events = self.events.clone();
        self.spawn(async move {
            let error = peripheral
                .discover_services()
                .await
                .err()
                .map(|error| error.to_string());
            let _ = events.send(CentralEvent::ServicesDiscovered {
                peripheral: id,
                error,
            });
        });
        Ok(())
    }

    async fn services(&self, id: &PeripheralId) -> Vec<ServiceInfo> {
        let Ok(peripheral) = self.peripheral(id) else {
            return Vec::new();
        };
        let discovered = lock(&self.characteristics_discovered);

        peripheral
            .services()
            .into_iter()
            .map(|service| {
                let characteristics = discovered.contains(&(id.clone(), service.uuid)).then(|| {
                    service
                        .characteristics
                        .iter()
                        .map(|characteristic| {
                            CharacteristicInfo::new(
                                CharacteristicKey {
                                    service: service.uuid,
                                    characteristic: characteristic.uuid,
                                },
                                properties(characteristic.properties),
                            )
                        })
                        .collect()
                });
                ServiceInfo::new(service.uuid, characteristics)
            })
            .collect()
    }

    async fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service: Uuid,
    ) -> Result<(), InteractionError> {
        // btleplug resolves characteristics together with services; this only exposes them.
        lock(&self.characteristics_discovered).insert((id.clone(), service));
        let _ = self.events.send(CentralEvent::CharacteristicsDiscovered {
            peripheral: id.clone(),
            service,
            error: None,
        });
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%id, %key))]
    async fn read_value(&self, id: &PeripheralId, key: CharacteristicKey) -> Result<(), InteractionError> {
        let (peripheral, characteristic) = self.characteristic(id, key)?;
        let id = id.clone();
        let events = self.events.clone();
        self.spawn(async move {
            let (value, error) = match peripheral.read(&characteristic).await {
                Ok(value) => (Some(value), None),
                Err(error) => (None, Some(error.to_string())),
            };
            let _ = events.send(CentralEvent::ValueUpdated {
                peripheral: id,
                characteristic: key,
                value,
                error,
            });
        });
        Ok(())
    }

    #[instrument(skip(self, value), level = "trace", fields(%id, %key, %mode, len = value.len()))]
    async fn write_value(
        &self,
        id: &PeripheralId,
        key: CharacteristicKey,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        let (peripheral, characteristic) = self.characteristic(id, key)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.writes
            .send(PendingWrite {
                peripheral,
                characteristic,
                value,
                write_type,
            })
            .map_err(|_error| InteractionError::BackendClosed)
    }

    #[instrument(skip(self), level = "trace", fields(%id, %key, enabled))]
    async fn set_notify(
        &self,
        id: &PeripheralId,
        key: CharacteristicKey,
        enabled: bool,
    ) -> Result<(), InteractionError> {
        let (peripheral, characteristic) = self.characteristic(id, key)?;
        if enabled {
            peripheral.subscribe(&characteristic).await?;
        } else {
            peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn forward_adapter_events(
    adapter: Adapter,
    mut adapter_events: impl tokio_stream::Stream<Item = AdapterEvent> + Unpin,
    peripherals: PeripheralMap,
    events: mpsc::UnboundedSender<CentralEvent>,
) {
    while let Some(event) = adapter_events.next().await {
        let id = match event {
            AdapterEvent::DeviceDiscovered(id)
            | AdapterEvent::DeviceUpdated(id)
            | AdapterEvent::ManufacturerDataAdvertisement { id, .. }
            | AdapterEvent::ServicesAdvertisement { id, .. } => id,
            AdapterEvent::DeviceDisconnected(id) => {
                let _ = events.send(CentralEvent::Disconnected(id.to_string().into()));
                continue;
            }
            other => {
                trace!(?other, "ignoring adapter event");
                continue;
            }
        };

        let peripheral = match adapter.peripheral(&id).await {
            Ok(peripheral) => peripheral,
            Err(error) => {
                debug!(%error, "advertising peripheral vanished");
                continue;
            }
        };
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => continue,
            Err(error) => {
                debug!(%error, "failed to read advertisement properties");
                continue;
            }
        };

        let peripheral_id = PeripheralId::from(peripheral.id().to_string());
        let known_services = peripheral.services().iter().map(|service| service.uuid).collect();
        lock(&peripherals).insert(peripheral_id.clone(), peripheral);

        let discovered = CentralEvent::Discovered {
            peripheral: PeripheralInfo::new(
                peripheral_id,
                properties.local_name.clone(),
                known_services,
            ),
            advertisement: advertisement(&properties),
            rssi: properties.rssi,
        };
        if events.send(discovered).is_err() {
            break;
        }
    }
    debug!("adapter event stream ended");
}

async fn forward_notifications(
    peripheral: Peripheral,
    id: PeripheralId,
    mut notifications: impl tokio_stream::Stream<Item = btleplug::api::ValueNotification> + Unpin,
    events: mpsc::UnboundedSender<CentralEvent>,
) {
    while let Some(notification) = notifications.next().await {
        let Some(service) = peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == notification.uuid)
            .map(|characteristic| characteristic.service_uuid)
        else {
            trace!(uuid = %notification.uuid, "notification for unknown characteristic");
            continue;
        };

        let update = CentralEvent::ValueUpdated {
            peripheral: id.clone(),
            characteristic: CharacteristicKey {
                service,
                characteristic: notification.uuid,
            },
            value: Some(notification.value),
            error: None,
        };
        if events.send(update).is_err() {
            break;
        }
    }
}

async fn drain_writes(mut queue: mpsc::UnboundedReceiver<PendingWrite>) {
    while let Some(write) = queue.recv().await {
        if let Err(error) = write
            .peripheral
            .write(&write.characteristic, &write.value, write.write_type)
            .await
        {
            warn!(%error, uuid = %write.characteristic.uuid, "characteristic write failed");
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, key: CharacteristicKey) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|characteristic| {
        characteristic.uuid == key.characteristic && characteristic.service_uuid == key.service
    })
}

/// Rebuilds the raw manufacturer field from the entry with the lowest company id.
fn advertisement(properties: &PeripheralProperties) -> AdvertisementData {
    let manufacturer_data = properties
        .manufacturer_data
        .iter()
        .min_by_key(|(company_id, _payload)| **company_id)
        .map(|(company_id, payload)| {
            let mut raw = Vec::with_capacity(payload.len() + 2);
            raw.extend_from_slice(&company_id.to_le_bytes());
            raw.extend_from_slice(payload);
            raw
        });
    AdvertisementData::new(properties.services.clone(), manufacturer_data)
}

fn properties(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    [
        (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
        (CharPropFlags::READ, CharacteristicProperty::Read),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            CharacteristicProperty::WriteWithoutResponse,
        ),
        (CharPropFlags::WRITE, CharacteristicProperty::Write),
        (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
        (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            CharacteristicProperty::AuthenticatedSignedWrites,
        ),
        (
            CharPropFlags::EXTENDED_PROPERTIES,
            CharacteristicProperty::ExtendedProperties,
        ),
    ]
    .into_iter()
    .filter(|(flag, _property)| flags.contains(*flag))
    .map(|(_flag, property)| property)
    .collect()
}
