use serde_with::SerializeDisplay;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Backend-specific identifier for a peripheral, reported to the peer as `peripheralId`.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    SerializeDisplay,
)]
pub struct PeripheralId(String);

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl PeripheralId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Availability of the local radio as seen by the protocol layer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum RadioState {
    /// Powered on and usable.
    #[strum(to_string = "available")]
    Available,
    /// Powered off, unsupported or unauthorised.
    #[strum(to_string = "unavailable")]
    Unavailable,
    /// Not yet reported by the platform.
    #[strum(to_string = "unknown")]
    Unknown,
}

/// Link state of one peripheral.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum PeripheralState {
    #[strum(to_string = "disconnected")]
    Disconnected,
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "connected")]
    Connected,
}

/// How a characteristic write is submitted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum WriteMode {
    #[strum(to_string = "with_response")]
    WithResponse,
    #[strum(to_string = "without_response")]
    WithoutResponse,
}

/// One advertised characteristic capability.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

/// Identifies a characteristic within the connected peripheral.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
#[display("{service}/{characteristic}")]
pub struct CharacteristicKey {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    key: CharacteristicKey,
    properties: Vec<CharacteristicProperty>,
}

impl CharacteristicInfo {
    #[must_use]
    pub fn new(key: CharacteristicKey, properties: Vec<CharacteristicProperty>) -> Self {
        Self { key, properties }
    }

    #[must_use]
    pub fn key(&self) -> CharacteristicKey {
        self.key
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.key.characteristic
    }

    #[must_use]
    pub fn properties(&self) -> &[CharacteristicProperty] {
        &self.properties
    }

    #[must_use]
    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }
}

/// A GATT service; `characteristics` stays `None` until discovered for this service.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: Uuid,
    characteristics: Option<Vec<CharacteristicInfo>>,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(uuid: Uuid, characteristics: Option<Vec<CharacteristicInfo>>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn characteristics(&self) -> Option<&[CharacteristicInfo]> {
        self.characteristics.as_deref()
    }

    #[must_use]
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics()?
            .iter()
            .find(|characteristic| characteristic.uuid() == uuid)
    }
}

/// Peripheral state observed alongside an advertisement.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeripheralInfo {
    id: PeripheralId,
    name: Option<String>,
    services: Vec<Uuid>,
}

impl PeripheralInfo {
    #[must_use]
    pub fn new(id: PeripheralId, name: Option<String>, services: Vec<Uuid>) -> Self {
        Self { id, name, services }
    }

    #[must_use]
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    /// Current GAP name, if the peripheral reports one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Services already known for this peripheral from earlier discovery.
    #[must_use]
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }
}

/// Fields of one advertisement event used for filtering.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AdvertisementData {
    service_uuids: Vec<Uuid>,
    manufacturer_data: Option<Vec<u8>>,
}

impl AdvertisementData {
    /// `manufacturer_data` is the raw field: little-endian company id followed by payload.
    #[must_use]
    pub fn new(service_uuids: Vec<Uuid>, manufacturer_data: Option<Vec<u8>>) -> Self {
        Self {
            service_uuids,
            manufacturer_data,
        }
    }

    #[must_use]
    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    #[must_use]
    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }
}
