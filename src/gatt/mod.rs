mod blocklist;
mod btleplug_backend;
mod central;
mod fake_backend;
mod filter;
mod model;
mod uuid;

pub use self::blocklist::{BlocklistStatus, GattOperation};
pub use self::btleplug_backend::BtleplugCentral;
pub use self::central::{
    BleCentral, CentralBackend, CentralEvent, CentralEventSink, CentralEvents, open_central,
};
pub use self::fake_backend::{
    FakeCentral, FakeCentralConfig, RecordedWrite, ScanFixture, ScanRecord, ServiceFixture,
};
pub use self::filter::{
    MINIMUM_SIGNAL_STRENGTH, ManufacturerDataFilter, ScanFilter, matches_any, parse_filters,
};
pub use self::model::{
    AdvertisementData, CharacteristicInfo, CharacteristicKey, CharacteristicProperty,
    PeripheralId, PeripheralInfo, PeripheralState, RadioState, ServiceInfo, WriteMode,
};
pub use self::uuid::{GattResolver, StandardGattResolver, canonical_uuid_string, uuid_from_short};
