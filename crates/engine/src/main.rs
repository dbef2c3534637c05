//! hidlink
//!
//! Command-line front end for the hidlink engine: list HID devices, watch
//! their input reports and send output reports.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use hidlink_common::setup_logging;
use hidlink_engine::{
    DeviceSession, EngineConfig, SessionHandle, UsbHidBackend, config::load_config,
};
use hidlink_protocol::{ChannelFault, ErrorCode, HidBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

/// How long `send` waits for the report to leave the write buffer
const SEND_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "hidlink")]
#[command(author, version, about = "hidlink - buffered HID device I/O")]
#[command(long_about = "
Talk to HID devices through buffered, callback-driven sessions.

EXAMPLES:
    # List devices of the configured vendor
    hidlink list

    # List every HID interface as JSON
    hidlink list --vendor 0 --json

    # Print input reports of the first device until Ctrl+C
    hidlink monitor --suppress-duplicates

    # Send one output report (zero-padded to the report length)
    hidlink send 00 b5 01

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/hidlink/config.toml
    3. /etc/hidlink/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List {
        /// Vendor id in hex; 0 lists every vendor
        #[arg(long, value_parser = parse_hex_u16)]
        vendor: Option<u16>,

        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print input reports and channel faults until Ctrl+C
    Monitor {
        /// Vendor id in hex
        #[arg(long, value_parser = parse_hex_u16)]
        vendor: Option<u16>,

        /// Device index in enumeration order
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Drop reports identical to the previous one
        #[arg(long)]
        suppress_duplicates: bool,
    },

    /// Write one output report
    Send {
        /// Vendor id in hex
        #[arg(long, value_parser = parse_hex_u16)]
        vendor: Option<u16>,

        /// Device index in enumeration order
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Report bytes in hex
        #[arg(required = true, value_parser = parse_hex_u8)]
        bytes: Vec<u8>,
    },

    /// Write the default configuration to the default path
    SaveConfig,
}

/// Events forwarded from the session threads to the async main task
#[derive(Debug)]
enum MonitorEvent {
    Report(Vec<u8>),
    Fault(ChannelFault),
    /// The read channel failed; no more reports will arrive
    ReadClosed(ChannelFault),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::SaveConfig = args.command {
        let config = EngineConfig::default();
        let path = EngineConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        load_config(path).context("Failed to load configuration")?
    } else {
        EngineConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("hidlink v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let backend: Arc<dyn HidBackend> =
        Arc::new(UsbHidBackend::new().context("Failed to initialise libusb")?);

    match args.command {
        Command::List { vendor, json } => list_devices(backend, vendor, &config, json),
        Command::Monitor {
            vendor,
            index,
            suppress_duplicates,
        } => {
            let session = select_device(backend, vendor, index, &config)?;
            monitor(session, suppress_duplicates).await
        }
        Command::Send {
            vendor,
            index,
            bytes,
        } => {
            let session = select_device(backend, vendor, index, &config)?;
            send(session, bytes).await
        }
        Command::SaveConfig => Ok(()),
    }
}

fn list_devices(
    backend: Arc<dyn HidBackend>,
    vendor: Option<u16>,
    config: &EngineConfig,
    json: bool,
) -> Result<()> {
    let filter = match vendor {
        Some(0) => None,
        Some(vid) => Some(vid),
        None => Some(config.device.vendor_id),
    };
    let devices = backend
        .enumerate(filter)
        .map_err(|e| anyhow!("Failed to enumerate devices: {} (code {})", e, e.os_code()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {}", index, device);
        println!("      Path:        {}", device.path);
        println!(
            "      Usage:       {:04x}:{:04x}",
            device.usage_page, device.usage
        );
        println!(
            "      Report size: in {} / out {}",
            device.read_len, device.write_len
        );
    }
    Ok(())
}

fn select_device(
    backend: Arc<dyn HidBackend>,
    vendor: Option<u16>,
    index: usize,
    config: &EngineConfig,
) -> Result<DeviceSession> {
    let mut sessions = DeviceSession::enumerate(backend, vendor, config)
        .map_err(|e| anyhow!("Failed to enumerate devices: {}", e))?;
    if index >= sessions.len() {
        bail!(
            "No device at index {} ({} device(s) found)",
            index,
            sessions.len()
        );
    }
    let mut session = sessions.swap_remove(index);

    if let Err(e) = session.open() {
        if !session.is_connected() {
            bail!("Failed to open {}: {} (code {})", session.descriptor(), e, e.code());
        }
        warn!("{} (code {})", e, e.code());
    }
    Ok(session)
}

async fn monitor(mut session: DeviceSession, suppress_duplicates: bool) -> Result<()> {
    session.set_suppress_duplicates(suppress_duplicates);

    let (tx, rx) = async_channel::bounded::<MonitorEvent>(256);

    let data_tx = tx.clone();
    session
        .register_data_handler(
            move |report: &[u8], _: &SessionHandle, fault: Option<ChannelFault>| {
                let event = match fault {
                    None => MonitorEvent::Report(report.to_vec()),
                    Some(fault) => MonitorEvent::ReadClosed(fault),
                };
                // The receiver is gone once the main task is shutting down
                let _ = data_tx.send_blocking(event);
            },
        )
        .map_err(|e| anyhow!("{} (code {})", e, e.code()))?;

    session
        .register_error_handler(move |_: &SessionHandle, fault: ChannelFault| {
            let _ = tx.send_blocking(MonitorEvent::Fault(fault));
        })
        .map_err(|e| anyhow!("{} (code {})", e, e.code()))?;

    info!("Monitoring {}, press Ctrl+C to stop", session.descriptor());

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            event = rx.recv() => match event {
                Ok(MonitorEvent::Report(report)) => println!("{}", hex(&report)),
                Ok(MonitorEvent::Fault(fault)) => {
                    warn!("Channel fault: {} (code {})", fault, fault.code());
                }
                Ok(MonitorEvent::ReadClosed(fault)) => {
                    error!("Read channel closed: {} (code {})", fault, fault.code());
                    break;
                }
                Err(_) => break,
            }
        }
    }

    rx.close();
    close_session(session).await
}

async fn send(session: DeviceSession, mut report: Vec<u8>) -> Result<()> {
    let len = session.descriptor().write_len;
    if report.len() > len {
        bail!("Report is {} bytes, device accepts {}", report.len(), len);
    }
    report.resize(len, 0);

    let result = tokio::task::spawn_blocking(move || {
        let result = session
            .write(&report)
            .and_then(|()| session.flush(SEND_FLUSH_TIMEOUT));
        (session, result)
    })
    .await
    .context("Write task failed")?;

    let (session, result) = result;
    match result {
        Ok(()) => info!("Sent {} byte report", len),
        Err(ref e) => error!("Write failed: {} (code {})", e, e.code()),
    }
    close_session(session).await?;
    result.map_err(|e| anyhow!("Write failed: {}", e))
}

async fn close_session(mut session: DeviceSession) -> Result<()> {
    tokio::task::spawn_blocking(move || session.close())
        .await
        .context("Close task failed")?;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{}': {}", s, e))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{}': {}", s, e))
}
