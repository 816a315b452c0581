//! Daemon lifecycle management for bitfury-miner.
//!
//! This module wires a device to its transport and host, runs its scan loop
//! as a tracked task, and handles signals and graceful shutdown.
//!
//! Only emulated chips are wired up here; a hardware transport slots into
//! [`BitfuryDevice`] the same way.

use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::DriverConfig;
use crate::device::{BitfuryDevice, MiningDriver};
use crate::error::Result;
use crate::host::QueueHost;
use crate::job_generator::JobGenerator;
use crate::tracing::prelude::*;
use crate::transport::{EmulatedTransport, EmulationConfig};

/// The main daemon.
pub struct Daemon {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = DriverConfig::from_env();
        if let Some(error) = config.options.as_ref().and_then(|o| o.error.as_ref()) {
            warn!(%error, "BITFURY_OPTIONS only partially applied");
        }
        let emulation = EmulationConfig::from_env()?;
        info!(
            chips = emulation.chips,
            scan_delay_ms = config.scan_delay.as_millis() as u64,
            "Using emulated Bitfury chips"
        );

        // Keep one job per chip in reserve so refills rarely starve
        let host = QueueHost::with_generator(JobGenerator::accept_all(), emulation.chips);
        let device: Box<dyn MiningDriver> = Box::new(BitfuryDevice::new(
            "bitfury-emu0",
            EmulatedTransport::new(emulation),
            host,
            config.clone(),
            self.shutdown.clone(),
        ));

        self.tracker.spawn({
            let shutdown = self.shutdown.clone();
            async move {
                let name = device.name().to_string();
                if let Err(e) = run_device(device, &config, shutdown.clone()).await {
                    error!(device = %name, "Device stopped: {}", e);
                    // Nothing left to mine with
                    shutdown.cancel();
                }
            }
        });

        self.tracker.close();

        info!("Started.");
        info!("For debugging, set RUST_LOG=bitfury_miner=debug or trace.");

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT.");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
            },
            _ = self.shutdown.cancelled() => {},
        }

        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one device from detection to shutdown.
///
/// Runs scan cycles until `shutdown` is cancelled or a cycle fails. The
/// device is always shut down before returning, so held work goes back to
/// its host either way.
pub async fn run_device(
    mut device: Box<dyn MiningDriver>,
    config: &DriverConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let chips = device.detect().await?;
    device.prepare().await?;
    info!(device = device.name(), chips, "Mining started");

    let mut result = Ok(());
    while !shutdown.is_cancelled() {
        let starved_before = device.starved_cycles();
        if let Err(e) = device.scan_cycle().await {
            result = Err(e.into());
            break;
        }

        // A starved cycle returns at once; back off before asking again
        if device.starved_cycles() > starved_before {
            tokio::select! {
                _ = tokio::time::sleep(config.scan_delay) => {}
                _ = shutdown.cancelled() => {}
            }
        }
    }

    let stopped = device.shutdown().await;
    let status = device.status();
    info!(
        device = device.name(),
        cycles = status.cycles,
        submitted = status.submitted,
        accepted = status.accepted,
        "Mining stopped"
    );
    result.and(stopped.map_err(Into::into))
}
