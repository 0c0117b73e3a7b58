use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use super::btleplug_backend::BtleplugCentral;
use super::fake_backend::{FakeCentral, FakeCentralConfig};
use super::model::{
    AdvertisementData, CharacteristicKey, PeripheralId, PeripheralInfo, PeripheralState,
    RadioState, ServiceInfo, WriteMode,
};
use crate::error::InteractionError;

/// Asynchronous completions and state changes reported by a central.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    /// The radio changed availability.
    StateChanged(RadioState),
    /// An advertisement was received while scanning.
    Discovered {
        peripheral: PeripheralInfo,
        advertisement: AdvertisementData,
        rssi: Option<i16>,
    },
    /// A connection attempt succeeded.
    Connected(PeripheralId),
    /// A connection attempt failed.
    ConnectFailed {
        peripheral: PeripheralId,
        error: String,
    },
    /// An established link dropped.
    Disconnected(PeripheralId),
    /// Service discovery finished.
    ServicesDiscovered {
        peripheral: PeripheralId,
        error: Option<String>,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        error: Option<String>,
    },
    /// A characteristic value arrived, from a read or a notification.
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: CharacteristicKey,
        value: Option<Vec<u8>>,
        error: Option<String>,
    },
}

/// Receiving end of a central's events.
pub type CentralEvents = mpsc::UnboundedReceiver<CentralEvent>;

/// Consumer of central events; implemented by the BLE protocol session.
#[async_trait]
pub trait CentralEventSink: Send + Sync {
    async fn handle_event(&self, event: CentralEvent);
}

/// The BLE capability set the protocol session is layered on.
///
/// Operations whose completion is a hardware event return once the operation is submitted;
/// the outcome arrives later as a [`CentralEvent`].
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Current radio availability.
    async fn radio_state(&self) -> RadioState;

    /// Starts scanning with no radio-level service filter.
    async fn start_scan(&self) -> Result<(), InteractionError>;

    async fn stop_scan(&self) -> Result<(), InteractionError>;

    /// Starts connecting; completes with `Connected` or `ConnectFailed`.
    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), InteractionError>;

    /// Cancels a pending or established connection.
    async fn cancel_connection(&self, peripheral: &PeripheralId) -> Result<(), InteractionError>;

    async fn peripheral_state(&self, peripheral: &PeripheralId) -> PeripheralState;

    /// Starts full service discovery; completes with `ServicesDiscovered`.
    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<(), InteractionError>;

    /// Services currently known on the peripheral.
    async fn services(&self, peripheral: &PeripheralId) -> Vec<ServiceInfo>;

    /// Starts characteristic discovery for `service`; completes with `CharacteristicsDiscovered`.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<(), InteractionError>;

    /// Starts a read; completes with `ValueUpdated`.
    async fn read_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
    ) -> Result<(), InteractionError>;

    /// Submits a write without waiting for an acknowledgement.
    async fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<(), InteractionError>;

    /// Enables or disables value pushes for a characteristic.
    async fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: CharacteristicKey,
        enabled: bool,
    ) -> Result<(), InteractionError>;

    /// Stops background work; called once when the owning session is torn down.
    async fn shutdown(&self) {}
}

/// Runtime BLE backend selection.
#[derive(Debug, Clone)]
pub enum CentralBackend {
    Real,
    Fake(FakeCentralConfig),
}

/// Opens a central for one session, returning it with its event stream.
///
/// # Errors
///
/// Returns an error if the platform BLE manager cannot be created or has no adapters.
pub async fn open_central(
    backend: &CentralBackend,
) -> Result<(Arc<dyn BleCentral>, CentralEvents), InteractionError> {
    match backend {
        CentralBackend::Real => {
            let (central, events) = BtleplugCentral::open().await?;
            Ok((Arc::new(central), events))
        }
        CentralBackend::Fake(config) => {
            info!("using fake BLE backend");
            let (central, events) = FakeCentral::new(config.clone());
            Ok((Arc::new(central), events))
        }
    }
}
