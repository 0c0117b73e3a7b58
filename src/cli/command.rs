use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::error::{CliConfigError, FixtureError};
use crate::gatt::{CentralBackend, FakeCentralConfig, ScanFixture, ServiceFixture};

/// Command-line options for the BLE link bridge.
#[derive(Debug, Parser)]
#[command(
    name = "ble-link",
    about = "Serve JSON-RPC BLE sessions to a host over stdio."
)]
pub struct Args {
    /// Minimum log level written to stderr; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Uses the fake BLE backend with fixture-driven discovery.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `id|name|rssi[|services[|manufacturer_hex]];...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake GATT table in the form `service=characteristic:read+notify,...;...`.
    #[arg(long, global = true, requires = "fake")]
    fake_services: Option<ServiceFixture>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use ble_link::{Args, Command};
    ///
    /// let args = Args::new(Command::Stdio);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            fake: false,
            fake_scan: None,
            fake_services: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            services,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_services = services;
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = Some(log_level);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            log_level: _,
            fake,
            fake_scan,
            fake_services,
            fake_discovery_delay,
            command,
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                services: fake_services,
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    services: Option<ServiceFixture>,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    /// Backend selection for sessions opened with these arguments.
    #[must_use]
    pub fn into_backend(self) -> CentralBackend {
        let Self {
            scan_fixture,
            services,
            discovery_delay,
        } = self;

        CentralBackend::Fake(
            FakeCentralConfig::builder()
                .scan_fixture(scan_fixture)
                .maybe_services(services)
                .discovery_delay(discovery_delay)
                .build(),
        )
    }
}

/// Supported CLI commands.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Subcommand)]
pub enum Command {
    /// Serve one BLE session, one JSON-RPC message per line on stdin and stdout.
    Stdio,
    /// Multiplex BLE sessions for a host, framing each line as `{socketId, ...}`.
    Bridge,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
