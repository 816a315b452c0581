//! Bitfury device driver.
//!
//! A [`BitfuryDevice`] drives every chip reachable through one transport. The
//! host calls [`MiningDriver::scan_cycle`] in a loop; each call runs one pass
//! of the cycle:
//!
//! 1. **Refill**: give every chip without a current job the next work item
//!    from the host queue. If the queue runs dry the cycle is abandoned with
//!    zero credit, so no partial batch ever reaches the chips.
//! 2. **Transfer**: one batched transport call pushes all payloads and pulls
//!    back nonces and job-switch flags.
//! 3. **Rotate and submit**: for each chip that switched jobs, attribute its
//!    nonces, submit them oldest generation first, retire the oldest job and
//!    shift the rest.
//! 4. **Account**: credit 2^32 hashes per submitted candidate.
//! 5. **Pace**: wait out the rest of the cycle's minimum duration, or until
//!    shutdown is requested.
//!
//! Chip oscillators are programmed once, before the first transfer.
//!
//! The device is a plain single-owner state machine. It never runs cycles
//! concurrently and never touches chips from more than one task.

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chip::{ChipSlot, SwitchOutcome};
use crate::config::DriverConfig;
use crate::host::WorkHost;
use crate::stats::{ChipStatus, CycleSummary, DeviceStats, DeviceStatus};
use crate::tracing::prelude::*;
use crate::transport::{ChipTransport, TransportError};
use crate::types::credit_for_submissions;

/// Device errors.
///
/// Both variants are fatal for the device: the host should stop calling
/// `scan_cycle` and decide whether to restart or disable it.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No chips detected")]
    NoChips,

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// The host's view of a mining device.
///
/// Hosts hold devices as `Box<dyn MiningDriver>` without knowing the chip
/// family or transport behind them.
#[async_trait]
pub trait MiningDriver: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Enumerate chips. Returns the number found.
    async fn detect(&mut self) -> Result<usize, DeviceError>;

    /// Reset statistics before the first scan cycle.
    async fn prepare(&mut self) -> Result<(), DeviceError>;

    /// Run one scan cycle. Returns the hashing credit earned.
    async fn scan_cycle(&mut self) -> Result<u64, DeviceError>;

    /// Quiesce the chips and release all work back to the host.
    async fn shutdown(&mut self) -> Result<(), DeviceError>;

    /// Cycles abandoned so far because the host had no work.
    fn starved_cycles(&self) -> u64;

    /// Current status snapshot.
    fn status(&self) -> DeviceStatus;
}

/// Scan-cycle orchestrator for a set of Bitfury chips.
pub struct BitfuryDevice<T, H> {
    name: String,
    transport: T,
    host: H,
    chips: Vec<ChipSlot>,
    config: DriverConfig,

    /// Whether oscillator settings have been pushed to the chips.
    initialized: bool,

    stats: DeviceStats,
    shutdown: CancellationToken,
}

impl<T, H> BitfuryDevice<T, H>
where
    T: ChipTransport,
    H: WorkHost,
{
    /// Create a device with no chips. Call [`MiningDriver::detect`] before
    /// the first scan cycle.
    pub fn new(
        name: impl Into<String>,
        transport: T,
        host: H,
        config: DriverConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            host,
            chips: Vec::new(),
            config,
            initialized: false,
            stats: DeviceStats::default(),
            shutdown,
        }
    }

    pub fn chips(&self) -> &[ChipSlot] {
        &self.chips
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Program every chip's oscillator. Runs once per device lifetime.
    async fn warm_up(&mut self) -> Result<(), DeviceError> {
        for chip in self.chips.iter_mut() {
            chip.set_oscillator(self.config.default_oscillator);
        }
        if let Some(options) = &self.config.options {
            let applied = options.apply(&mut self.chips);
            debug!(device = %self.name, applied, "Oscillator overrides applied");
        }

        for chip in &self.chips {
            self.transport
                .reinitialize_chip(chip.id(), chip.oscillator())
                .await?;
        }

        self.initialized = true;
        info!(
            device = %self.name,
            chips = self.chips.len(),
            "Chip oscillators programmed"
        );
        Ok(())
    }

    /// Give every chip without a current job the next queued work item.
    ///
    /// Returns false as soon as the queue comes up empty. Chips filled
    /// before that keep their new work for the next cycle.
    fn refill(&mut self) -> bool {
        for chip in self.chips.iter_mut() {
            chip.clear_job_switched();
            if chip.has_current() {
                continue;
            }

            let Some(work) = self.host.fetch_next_job() else {
                debug!(chip = %chip.id(), "Work queue empty, abandoning scan cycle");
                return false;
            };
            trace!(chip = %chip.id(), work_id = work.id, "Work assigned");
            if let Some(displaced) = chip.assign(work) {
                self.host.notify_job_completed(displaced);
            }
        }
        true
    }

    /// Rotate and drain every chip that reported a job switch.
    fn collect(&mut self, now: std::time::Instant) -> CycleSummary {
        let mut summary = CycleSummary::new(self.chips.len());

        for chip in self.chips.iter_mut() {
            if !chip.job_switched() {
                continue;
            }

            let host = &mut self.host;
            let SwitchOutcome {
                submitted,
                accepted,
                dropped,
                evicted,
            } = chip.on_switch_detected(|work, nonce| host.submit_candidate(work, nonce), now);

            if dropped > 0 {
                warn!(
                    chip = %chip.id(),
                    dropped,
                    "Dropped nonces reported for a job the chip never had"
                );
            }
            if let Some(work) = evicted {
                trace!(chip = %chip.id(), work_id = work.id, "Job retired");
                self.host.notify_job_completed(work);
            }
            trace!(chip = %chip.id(), submitted, accepted, "Job switch handled");

            summary.record(submitted, dropped);
        }

        summary
    }

    /// Hand every work item still held by any chip back to the host.
    ///
    /// Nonces reported since each chip's last switch are submitted first
    /// and credited like any other submission.
    fn release_all_work(&mut self) -> usize {
        let now = std::time::Instant::now();
        let mut summary = CycleSummary::new(self.chips.len());
        let mut released = 0;

        for chip in self.chips.iter_mut() {
            let host = &mut self.host;
            let outcome = chip.flush_results(|work, nonce| host.submit_candidate(work, nonce), now);
            if outcome.dropped > 0 {
                warn!(
                    chip = %chip.id(),
                    dropped = outcome.dropped,
                    "Dropped nonces reported for a job the chip never had"
                );
            }
            if outcome.submitted > 0 || outcome.dropped > 0 {
                summary.record(outcome.submitted, outcome.dropped);
            }

            for work in chip.take_all_work() {
                self.host.notify_job_completed(work);
                released += 1;
            }
        }

        if summary.total > 0 || summary.dropped > 0 {
            debug!(
                device = %self.name,
                submitted = summary.total,
                dropped = summary.dropped,
                "Flushed results before releasing work"
            );
            let credit = credit_for_submissions(summary.total);
            self.stats.record_credit(&summary, credit);
        }
        released
    }
}

/// Wait until `deadline`, returning early if shutdown is requested.
async fn pace(deadline: Instant, shutdown: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        _ = shutdown.cancelled() => {
            trace!("Pacing cut short by shutdown");
        }
    }
}

#[async_trait]
impl<T, H> MiningDriver for BitfuryDevice<T, H>
where
    T: ChipTransport,
    H: WorkHost,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&mut self) -> Result<usize, DeviceError> {
        let ids = self.transport.detect_chips().await?;
        if ids.is_empty() {
            warn!(device = %self.name, "No Bitfury chips detected!");
            return Err(DeviceError::NoChips);
        }
        info!(device = %self.name, chips = ids.len(), "Bitfury chips detected");

        self.release_all_work();
        let oscillator = self.config.default_oscillator;
        self.chips = ids
            .into_iter()
            .map(|id| ChipSlot::new(id, oscillator))
            .collect();
        self.initialized = false;
        Ok(self.chips.len())
    }

    async fn prepare(&mut self) -> Result<(), DeviceError> {
        self.stats = DeviceStats::default();
        debug!(device = %self.name, "Device prepared");
        Ok(())
    }

    async fn scan_cycle(&mut self) -> Result<u64, DeviceError> {
        let deadline = Instant::now() + self.config.scan_delay;

        if !self.initialized {
            self.warm_up().await?;
        }

        if !self.refill() {
            self.stats.starved_cycles += 1;
            return Ok(0);
        }

        if let Err(e) = self.transport.transfer_batch(&mut self.chips).await {
            error!(device = %self.name, error = %e, "Chip transfer failed");
            return Err(e.into());
        }

        let summary = self.collect(std::time::Instant::now());
        let credit = credit_for_submissions(summary.total);
        self.stats.record_cycle(&summary, credit);

        if summary.switched > 0 {
            debug!(
                device = %self.name,
                switched = summary.switched,
                high = summary.high,
                total = summary.total,
                average = format!("{:.2}", summary.average()),
                "Scan cycle"
            );
        }
        if self.config.status_interval > 0 && self.stats.cycles % self.config.status_interval == 0
        {
            self.stats.log_summary(&self.name);
        }

        pace(deadline, &self.shutdown).await;
        Ok(credit)
    }

    async fn shutdown(&mut self) -> Result<(), DeviceError> {
        info!(device = %self.name, "Shutting down chips");
        let result = self.transport.shutdown_chips(&self.chips).await;
        let released = self.release_all_work();
        debug!(device = %self.name, released, "Work released");
        self.stats.log_summary(&self.name);
        result.map_err(DeviceError::from)
    }

    fn starved_cycles(&self) -> u64 {
        self.stats.starved_cycles
    }

    fn status(&self) -> DeviceStatus {
        let now = std::time::Instant::now();
        let chips: Vec<ChipStatus> = self
            .chips
            .iter()
            .map(|chip| ChipStatus::from_chip(chip, now))
            .collect();

        DeviceStatus {
            hashrate: self.stats.hashrate().unwrap_or_default(),
            cycles: self.stats.cycles,
            starved_cycles: self.stats.starved_cycles,
            submitted: self.stats.submitted,
            accepted: chips.iter().map(|c| c.accepted).sum(),
            rejected: chips.iter().map(|c| c.rejected).sum(),
            anomalies: chips.iter().map(|c| c.anomalies).sum(),
            chips,
        }
    }
}
