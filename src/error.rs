use serde_json::{Map, Value, json};
use strum_macros::{Display, EnumIter};
use thiserror::Error;

use crate::gatt::PeripheralId;

/// The closed set of JSON-RPC error kinds reported to the remote peer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum RpcErrorKind {
    #[strum(to_string = "parse_error")]
    ParseError,
    #[strum(to_string = "invalid_request")]
    InvalidRequest,
    #[strum(to_string = "method_not_found")]
    MethodNotFound,
    #[strum(to_string = "invalid_params")]
    InvalidParams,
    #[strum(to_string = "internal_error")]
    InternalError,
    /// Failure reported by the radio or the peripheral.
    #[strum(to_string = "application_error")]
    ApplicationError,
}

impl RpcErrorKind {
    /// Numeric code carried on the wire.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ApplicationError => -32500,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse Error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method Not Found",
            Self::InvalidParams => "Invalid Params",
            Self::InternalError => "Internal Error",
            Self::ApplicationError => "Application Error",
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        <Self as strum::IntoEnumIterator>::iter().find(|kind| kind.code() == code)
    }
}

/// A JSON-RPC error object: numeric code, message and optional diagnostic data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} ({code}){}", data_suffix(.data.as_ref()))]
pub struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

fn data_suffix(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(text)) => format!(": {text}"),
        Some(other) => format!(": {other}"),
        None => String::new(),
    }
}

impl RpcError {
    fn with_kind(kind: RpcErrorKind, data: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: kind.message().to_string(),
            data: Some(Value::String(data.into())),
        }
    }

    pub fn parse_error(data: impl Into<String>) -> Self {
        Self::with_kind(RpcErrorKind::ParseError, data)
    }

    pub fn invalid_request(data: impl Into<String>) -> Self {
        Self::with_kind(RpcErrorKind::InvalidRequest, data)
    }

    pub fn method_not_found(data: impl Into<String>) -> Self {
        Self::with_kind(RpcErrorKind::MethodNotFound, data)
    }

    pub fn invalid_params(data: impl Into<String>) -> Self {
        Self::with_kind(RpcErrorKind::InvalidParams, data)
    }

    pub fn internal_error(data: impl Into<String>) -> Self {
        Self::with_kind(RpcErrorKind::InternalError, data)
    }

    pub fn application_error(data: impl Into<String>) -> Self {
        Self::with_kind(RpcErrorKind::ApplicationError, data)
    }

    /// Rebuilds an error object received from the remote peer.
    ///
    /// Missing fields fall back to an internal error code and an empty message so that a
    /// malformed peer reply still reaches the waiting completion.
    #[must_use]
    pub fn from_json(object: &Map<String, Value>) -> Self {
        Self {
            code: object
                .get("code")
                .and_then(Value::as_i64)
                .unwrap_or(RpcErrorKind::InternalError.code()),
            message: object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            data: object.get("data").cloned(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let (Some(data), Some(object)) = (&self.data, error.as_object_mut()) {
            object.insert("data".to_string(), data.clone());
        }
        error
    }

    /// Returns the taxonomy kind, or `None` for codes outside the closed set.
    #[must_use]
    pub fn kind(&self) -> Option<RpcErrorKind> {
        RpcErrorKind::from_code(self.code)
    }

    #[must_use]
    pub fn code(&self) -> i64 {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// Errors returned by BLE backend operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the BLE backend has shut down")]
    BackendClosed,
    #[error("peripheral `{peripheral}` is not known to the adapter")]
    UnknownPeripheral { peripheral: PeripheralId },
    #[error("characteristic `{characteristic}` is not known on peripheral `{peripheral}`")]
    UnknownCharacteristic {
        peripheral: PeripheralId,
        characteristic: String,
    },
    #[error("fake backend refused the operation: {reason}")]
    FakeRefused { reason: String },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three to five pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("invalid hex payload")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid UUID `{value}` in fixture")]
    InvalidUuid { value: String },
    #[error("service fixture records must look like `service=char:props,...`")]
    InvalidServiceRecord,
    #[error("unknown characteristic property `{value}`")]
    UnknownProperty { value: String },
}

/// Errors raised by a message channel when emitting text to the remote peer.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("message channel is closed")]
    Closed,
    #[error("failed to write to the message channel")]
    Io(#[from] std::io::Error),
}

/// Errors raised while validating CLI backend configuration.
#[derive(Debug, Error)]
pub enum CliConfigError {
    #[error("--fake-scan is required when --fake is set")]
    MissingFakeScanFixture,
}

/// Errors raised while framing host bridge traffic.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge message is not valid JSON")]
    Decode(#[from] serde_json::Error),
    #[error("failed to read from or write to the host stream")]
    Io(#[from] std::io::Error),
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
