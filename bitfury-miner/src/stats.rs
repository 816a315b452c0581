//! Throughput accounting.
//!
//! Bitfury chips never report how many hashes they did. The only signal is
//! the stream of nonce candidates, each of which stands for one expected
//! search of the 2^32 nonce space. Everything here is derived from that:
//!
//! - the per-cycle credit returned to the host (`submissions * 2^32`),
//! - a per-chip window of recent submission times, from which
//!   [`shares_to_ghashes`] gives a short-term GH/s estimate,
//! - device totals and a periodic status line.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::chip::{ChipId, ChipSlot, OscillatorSetting};
use crate::tracing::prelude::*;
use crate::types::HashRate;

/// Submission timestamps kept per chip.
pub const SHARE_WINDOW_LEN: usize = 1024;

/// GH/s produced by one share per second on a Bitfury chip.
pub const GHASH_PER_SHARE_RATE: f64 = 4.84387;

/// Window used for the per-chip rate in [`DeviceStatus`].
pub const CHIP_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Bounded record of recent submission times.
#[derive(Debug, Default)]
pub struct ShareWindow {
    stamps: VecDeque<Instant>,
}

impl ShareWindow {
    pub fn record(&mut self, at: Instant) {
        if self.stamps.len() == SHARE_WINDOW_LEN {
            self.stamps.pop_front();
        }
        self.stamps.push_back(at);
    }

    /// Submissions recorded less than `window` before `now`.
    pub fn shares_within(&self, window: Duration, now: Instant) -> usize {
        self.stamps
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < window)
            .count()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

/// Convert a share count over `seconds` to GH/s.
pub fn shares_to_ghashes(shares: usize, seconds: u64) -> f64 {
    if seconds == 0 {
        return 0.0;
    }
    shares as f64 / seconds as f64 * GHASH_PER_SHARE_RATE
}

/// Per-cycle submission figures across all chips.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleSummary {
    /// Most submissions by any single chip.
    pub high: usize,

    /// Submissions across all chips.
    pub total: usize,

    /// Chips that reported a job switch.
    pub switched: usize,

    /// Nonces dropped for lack of a generation.
    pub dropped: usize,

    /// Chips in the device.
    pub chips: usize,
}

impl CycleSummary {
    pub fn new(chips: usize) -> Self {
        Self {
            chips,
            ..Default::default()
        }
    }

    pub fn record(&mut self, submitted: usize, dropped: usize) {
        self.high = self.high.max(submitted);
        self.total += submitted;
        self.dropped += dropped;
        self.switched += 1;
    }

    /// Mean submissions per chip.
    pub fn average(&self) -> f64 {
        if self.chips == 0 {
            return 0.0;
        }
        self.total as f64 / self.chips as f64
    }
}

/// Device-wide running totals.
///
/// Hashrate is derived from accumulated credit rather than from the share
/// windows, which makes it stable over long uptimes.
#[derive(Debug)]
pub struct DeviceStats {
    pub start_time: Instant,

    /// Hashing credit accumulated across all cycles.
    ///
    /// u128 because at 2^32 hashes per candidate a u64 fills up after about
    /// four billion candidates.
    pub total_hashes: u128,

    pub cycles: u64,

    /// Cycles abandoned because the host queue ran dry.
    pub starved_cycles: u64,

    pub submitted: u64,
    pub dropped: u64,
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            total_hashes: 0,
            cycles: 0,
            starved_cycles: 0,
            submitted: 0,
            dropped: 0,
        }
    }
}

impl DeviceStats {
    pub fn record_cycle(&mut self, summary: &CycleSummary, credit: u64) {
        self.cycles += 1;
        self.record_credit(summary, credit);
    }

    /// Account submissions made outside a scan cycle, such as the final
    /// flush at shutdown.
    pub fn record_credit(&mut self, summary: &CycleSummary, credit: u64) {
        self.submitted += summary.total as u64;
        self.dropped += summary.dropped as u64;
        self.total_hashes += u128::from(credit);
    }

    /// Average hashrate since `start_time`, if anything was credited.
    pub fn hashrate(&self) -> Option<HashRate> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 && self.total_hashes > 0 {
            Some(HashRate((self.total_hashes as f64 / elapsed) as u64))
        } else {
            None
        }
    }

    pub fn log_summary(&self, name: &str) {
        let uptime_s = self.start_time.elapsed().as_secs();
        if let Some(rate) = self.hashrate() {
            info!(
                device = name,
                uptime_s,
                hashrate = %rate.to_human_readable(),
                submitted = self.submitted,
                dropped = self.dropped,
                "Mining status."
            );
        } else {
            info!(
                device = name,
                uptime_s,
                starved_cycles = self.starved_cycles,
                "Mining status."
            );
        }
    }
}

/// Snapshot of one chip for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipStatus {
    pub id: ChipId,
    pub oscillator: OscillatorSetting,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub anomalies: u64,

    /// Estimate over [`CHIP_RATE_WINDOW`].
    pub ghash: f64,
}

impl ChipStatus {
    pub fn from_chip(chip: &ChipSlot, now: Instant) -> Self {
        let stats = chip.stats();
        let recent = stats.shares.shares_within(CHIP_RATE_WINDOW, now);
        Self {
            id: chip.id(),
            oscillator: chip.oscillator(),
            submitted: stats.submitted,
            accepted: stats.accepted,
            rejected: stats.rejected,
            anomalies: stats.anomalies,
            ghash: shares_to_ghashes(recent, CHIP_RATE_WINDOW.as_secs()),
        }
    }
}

/// Snapshot of a whole device for the host's status line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    pub hashrate: HashRate,
    pub cycles: u64,
    pub starved_cycles: u64,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub anomalies: u64,
    pub chips: Vec<ChipStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_window_counts_recent_only() {
        let start = Instant::now();
        let mut window = ShareWindow::default();
        window.record(start);
        window.record(start + Duration::from_secs(30));
        window.record(start + Duration::from_secs(50));

        let now = start + Duration::from_secs(70);
        assert_eq!(window.shares_within(Duration::from_secs(60), now), 2);
        assert_eq!(window.shares_within(Duration::from_secs(30), now), 1);
        assert_eq!(window.shares_within(Duration::from_secs(100), now), 3);
    }

    #[test]
    fn test_share_window_is_bounded() {
        let now = Instant::now();
        let mut window = ShareWindow::default();
        for _ in 0..SHARE_WINDOW_LEN + 10 {
            window.record(now);
        }
        assert_eq!(window.len(), SHARE_WINDOW_LEN);
    }

    #[test]
    fn test_shares_to_ghashes() {
        assert_eq!(shares_to_ghashes(60, 60), GHASH_PER_SHARE_RATE);
        assert_eq!(shares_to_ghashes(0, 60), 0.0);
        assert_eq!(shares_to_ghashes(10, 0), 0.0);
    }

    #[test]
    fn test_cycle_summary() {
        let mut summary = CycleSummary::new(4);
        summary.record(3, 0);
        summary.record(1, 2);
        assert_eq!(summary.high, 3);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.switched, 2);
        assert_eq!(summary.average(), 1.0);
        assert_eq!(CycleSummary::new(0).average(), 0.0);
    }

    #[test]
    fn test_device_stats_accumulate_credit() {
        let mut stats = DeviceStats::default();
        let mut summary = CycleSummary::new(2);
        summary.record(2, 1);
        stats.record_cycle(&summary, 2 << 32);
        stats.record_cycle(&CycleSummary::new(2), 0);

        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.total_hashes, 2u128 << 32);

        stats.record_credit(&summary, 2 << 32);
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.submitted, 4);
    }
}
