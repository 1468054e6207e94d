mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use common::{run_interface_monitor, Error, InterfaceProvider, Result, SystemInterfaces};
use forward::{ForwardEvent, ForwardManager};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use config::RelayFile;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "camrelay", about = "Port-forwarding relay for IP cameras")]
struct Args {
    /// Camera configuration file (TOML). Defaults to
    /// `<config dir>/camrelay/cameras.toml`.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Validate the configuration, print the cameras, and exit
    #[arg(long, default_value_t = false)]
    check: bool,

    /// Do not watch network interfaces for VPN or address changes
    #[arg(long, default_value_t = false)]
    no_monitor: bool,

    /// Mirror logs to stderr (debug level unless RUST_LOG says otherwise)
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "camrelay exiting");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let path = args.config.clone().unwrap_or_else(config::default_config_path);
    let file = RelayFile::load(&path)?;

    if args.check {
        print_summary(&path, &file);
        return Ok(());
    }

    if file.enabled_cameras().next().is_none() {
        return Err(Error::Config(format!(
            "no enabled cameras in {}",
            path.display()
        )));
    }

    let _log_guard = logging::init_logging(args.verbose);
    info!(config = %path.display(), cameras = file.cameras.len(), "camrelay starting");

    let interfaces: Arc<dyn InterfaceProvider> = Arc::new(SystemInterfaces::new());
    let mut manager =
        ForwardManager::new(file.forward_config()).with_interfaces(Arc::clone(&interfaces));
    let mut events = manager.subscribe();
    let timings = manager.config();
    debug!(
        connect_timeout = ?timings.connect_timeout,
        reconnect_interval = ?timings.reconnect_interval,
        health_check_interval = ?timings.health_check_interval,
        inactivity_threshold = ?timings.inactivity_threshold,
        "relay timings"
    );

    for camera in file.enabled_cameras() {
        if let Err(e) = manager.start_forwarding(camera.clone()).await {
            warn!(camera = %camera.id, %e, "could not start forwarding");
        }
    }
    if manager.active_forwards().is_empty() {
        return Err(Error::Config("no camera could be forwarded".into()));
    }

    let (iface_tx, mut iface_rx) = mpsc::unbounded_channel();
    let monitor = if args.no_monitor {
        drop(iface_tx);
        None
    } else {
        Some(tokio::spawn(run_interface_monitor(
            Arc::clone(&interfaces),
            file.monitor_interval(),
            iface_tx,
        )))
    };

    info!(
        active = manager.active_forwards().len(),
        "relay running (press Ctrl-C to exit)"
    );
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(%e, "failed to listen for Ctrl-C");
                }
                info!("shutdown requested");
                break;
            }
            Some(event) = iface_rx.recv() => {
                manager.handle_interface_event(event).await;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    manager.stop_all_forwarding().await;
    info!("camrelay stopped");
    Ok(())
}

fn print_summary(path: &std::path::Path, file: &RelayFile) {
    println!(
        "{}: {} cameras ({} enabled)",
        path.display(),
        file.cameras.len(),
        file.enabled_cameras().count()
    );
    for camera in &file.cameras {
        let suffix = if camera.enabled { "" } else { " (disabled)" };
        println!("  {camera}{suffix}");
    }
}

/// Engine events as log lines. Transfers are too frequent for anything
/// above `trace`.
fn log_event(event: &ForwardEvent) {
    match event {
        ForwardEvent::ForwardingStarted {
            camera_id,
            external_port,
        } => info!(camera = %camera_id, port = external_port, "forwarding started"),
        ForwardEvent::ForwardingStopped { camera_id } => {
            info!(camera = %camera_id, "forwarding stopped")
        }
        ForwardEvent::ForwardingError { camera_id, message } => {
            warn!(camera = %camera_id, %message, "forwarding error")
        }
        ForwardEvent::ConnectionEstablished {
            camera_id,
            client_address,
        } => info!(camera = %camera_id, client = %client_address, "client connected"),
        ForwardEvent::ConnectionClosed {
            camera_id,
            client_address,
        } => info!(camera = %camera_id, client = %client_address, "client disconnected"),
        ForwardEvent::DataTransferred {
            camera_id,
            bytes,
            direction,
        } => trace!(camera = %camera_id, bytes, %direction, "data transferred"),
        ForwardEvent::ReconnectionAttempt { camera_id, attempt } => {
            info!(camera = %camera_id, attempt, "camera reconnect pending")
        }
        ForwardEvent::PortChanged {
            camera_id,
            old_port,
            new_port,
        } => info!(camera = %camera_id, old_port, new_port, "external port changed"),
    }
}
