//! vhc-harness
//!
//! Emulates a USB host controller with N child devices and drives the
//! plug-in/plug-out/teardown sequence against the simulated host, then
//! checks the host's object ledger for anything teardown left behind.

use anyhow::{Context, Result, bail};
use clap::Parser;
use harness::{ControlRequest, HarnessConfig, Scenario, VirtualController};
use host::{DescriptorSet, SimHost, setup_logging};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "vhc-harness")]
#[command(
    author,
    version,
    about = "Virtual host-controller harness - exercise device plug-in/plug-out teardown"
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// Number of emulated devices (overrides config)
    #[arg(short = 'n', long, value_name = "N")]
    devices: Option<u32>,

    /// Unplug trigger scenario (overrides config)
    #[arg(short, long, value_enum)]
    scenario: Option<Scenario>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HarnessConfig::default();
        let path = HarnessConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HarnessConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HarnessConfig::load_or_default()
    };

    let devices = args.devices.unwrap_or(config.harness.devices);
    let scenario = args.scenario.unwrap_or(config.harness.scenario);
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.harness.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("vhc-harness v{}", env!("CARGO_PKG_VERSION"));
    info!("Scenario: {}, devices: {}", scenario, devices);

    let host = Arc::new(SimHost::new());
    let controller = VirtualController::initialize(
        Arc::clone(&host) as Arc<dyn host::HostBus>,
        scenario,
        devices,
        &DescriptorSet::default(),
    )
    .context("Controller bring-up failed")?;

    if controller.creation_failures() > 0 {
        warn!(
            "{} device(s) failed to create",
            controller.creation_failures()
        );
    }

    match scenario {
        Scenario::Immediate => {
            // Unplug tasks were scheduled during bring-up; just wait.
            controller.wait_all_destroyed().await;
        }
        Scenario::DeferredOnFirstRequest => {
            // Stand in for the OS: deliver the first control request each
            // device would see (a string-descriptor read), plus a second
            // one to show the cleared back-reference stays quiet.
            for device in controller.devices() {
                let dispatch = device.control_queue().spawn_dispatch();

                let (request, completion) = ControlRequest::get_string_descriptor(1);
                dispatch
                    .send(request)
                    .await
                    .context("Dispatch channel closed")?;
                let status = completion.await.context("Request never completed")?;
                info!(
                    "First control request on port {} completed: {:?}",
                    device.port(),
                    status
                );

                let (request, completion) = ControlRequest::get_string_descriptor(2);
                dispatch
                    .send(request)
                    .await
                    .context("Dispatch channel closed")?;
                completion.await.context("Request never completed")?;
            }
            controller.wait_all_destroyed().await;
        }
    }

    info!(
        "Teardown complete: {} plug-in(s), {} plug-out(s), {} forced delete(s)",
        host.plug_in_calls(),
        host.plug_out_calls(),
        host.force_delete_calls()
    );

    let report = host.leak_report();
    info!("Host object ledger: {}", report);
    if !report.is_clean() {
        bail!("Leak check failed: {}", report);
    }

    Ok(())
}
