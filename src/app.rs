use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, instrument};

use crate::bridge::HostBridge;
use crate::channel::LineChannel;
use crate::cli::{Command, FakeArgs, LogLevel};
use crate::gatt::CentralBackend;
use crate::session::open_ble_session;
use crate::telemetry;

/// Backend driving the platform's first BLE adapter.
#[must_use]
pub fn real_backend() -> CentralBackend {
    CentralBackend::Real
}

/// Backend driven by fake fixtures.
#[must_use]
pub fn fake_backend(fake_args: FakeArgs) -> CentralBackend {
    fake_args.into_backend()
}

/// Runs the CLI command over the process's stdin and stdout.
///
/// ```no_run
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = ble_link::Args::try_parse_from([
///     "ble-link",
///     "--fake",
///     "--fake-scan",
///     "dev-1|Probe|-43",
///     "stdio",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => ble_link::fake_backend(fake_args),
///     None => ble_link::real_backend(),
/// };
/// ble_link::run(command, backend).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the BLE backend cannot be opened, or
/// stdio fails.
pub async fn run(command: Command, backend: CentralBackend) -> Result<()> {
    run_with_log_level(command, backend, None).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the BLE backend cannot be opened, or
/// stdio fails.
#[instrument(skip(backend), level = "info")]
pub async fn run_with_log_level(
    command: Command,
    backend: CentralBackend,
    log_level: Option<LogLevel>,
) -> Result<()> {
    telemetry::initialise_tracing("ble-link", log_level.map(LogLevel::as_level_filter))?;

    let served = run_with_io(
        command,
        backend,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    tokio::select! {
        result = served => result,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            info!("interrupted");
            Ok(())
        }
    }
}

/// Runs the CLI command over injected host streams.
///
/// # Errors
///
/// Returns an error if the BLE backend cannot be opened or host I/O fails.
pub async fn run_with_io<R, W>(
    command: Command,
    backend: CentralBackend,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    match command {
        Command::Stdio => serve_lines(backend, reader, writer).await,
        Command::Bridge => Ok(HostBridge::new(writer, backend).run(reader).await?),
    }
}

/// One BLE session: each input line is a JSON-RPC message, each output line a reply or push.
async fn serve_lines<R, W>(backend: CentralBackend, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let channel = Arc::new(LineChannel::new(writer));
    let closed = channel.closed();
    let session = open_ble_session(channel, &backend).await?;

    let mut lines = LinesStream::new(reader.lines());
    loop {
        let line = tokio::select! {
            () = closed.cancelled() => {
                info!("session closed by the BLE layer");
                break;
            }
            line = lines.next() => line,
        };
        let Some(line) = line else {
            debug!("input ended");
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        session.did_receive_text(&line).await;
    }

    session.close().await;
    Ok(())
}
