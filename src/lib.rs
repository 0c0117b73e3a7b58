mod app;
mod bridge;
mod channel;
mod cli;
mod codec;
mod error;
mod gatt;
mod jsonrpc;
mod registry;
mod session;
mod telemetry;

pub use app::{fake_backend, real_backend, run, run_with_io, run_with_log_level};
pub use bridge::{HostBridge, SessionKind};
pub use channel::{LineChannel, MemoryChannel, MessageChannel};
pub use cli::{Args, Command, FakeArgs, LogLevel};
pub use codec::{BufferEncoding, decode_buffer, encode_buffer};
pub use error::{
    BridgeError, ChannelError, CliConfigError, FixtureError, InteractionError, RpcError,
    RpcErrorKind,
};
pub use gatt::{
    AdvertisementData, BleCentral, BlocklistStatus, BtleplugCentral, CentralBackend, CentralEvent,
    CentralEventSink, CentralEvents, CharacteristicInfo, CharacteristicKey,
    CharacteristicProperty, FakeCentral, FakeCentralConfig, GattOperation, GattResolver,
    MINIMUM_SIGNAL_STRENGTH, ManufacturerDataFilter, PeripheralId, PeripheralInfo,
    PeripheralState, RadioState, RecordedWrite, ScanFilter, ScanFixture, ScanRecord,
    ServiceFixture, ServiceInfo, StandardGattResolver, WriteMode, canonical_uuid_string,
    matches_any, open_central, parse_filters, uuid_from_short,
};
pub use jsonrpc::{
    BaseHandler, JSONRPC_VERSION, JsonRpcPeer, PROTOCOL_VERSION, RemoteResult, RpcHandler,
    RpcSession,
};
pub use session::{BleSession, ConnectionState, open_ble_session};
