//! Per-chip state for Bitfury hashing chips.
//!
//! A [`ChipSlot`] is everything the driver knows about one physical chip: its
//! address on the board, its oscillator setting, the job generations it is
//! still producing results for, and the result buckets and job-switch flag
//! the transport fills in during each batch transfer.
//!
//! The transport only ever touches a slot through [`ChipSlot::payload`],
//! [`ChipSlot::report_nonce`] and [`ChipSlot::mark_job_switched`]. Everything
//! else is driven by the device orchestrator.

pub mod generation;
pub mod options;

use std::fmt;
use std::time::Instant;

use self::generation::{Age, Generation, GenerationRing, GENERATIONS};
use crate::stats::ShareWindow;
use crate::work::{Payload, Work};

/// Address of a chip: the board slot it sits in and its position on that
/// board's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipId {
    pub slot: u8,
    pub chip: u8,
}

impl ChipId {
    pub fn new(slot: u8, chip: u8) -> Self {
        Self { slot, chip }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slot, self.chip)
    }
}

/// Chip oscillator configuration (the chip's six `osc6` bits).
///
/// Higher settings run the chip faster at the cost of a higher error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OscillatorSetting(u8);

impl OscillatorSetting {
    /// Largest value representable in six bits.
    pub const MAX: u8 = 63;

    /// Setting applied to every chip unless overridden.
    pub const DEFAULT: OscillatorSetting = OscillatorSetting(54);

    /// Returns `None` if `bits` does not fit in six bits.
    pub fn new(bits: u8) -> Option<Self> {
        (bits <= Self::MAX).then_some(Self(bits))
    }

    /// Clamp an arbitrary value into the valid range.
    pub fn saturating(bits: u64) -> Self {
        Self(bits.min(u64::from(Self::MAX)) as u8)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for OscillatorSetting {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for OscillatorSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a chip during one handled job switch.
#[derive(Debug, Default)]
pub struct SwitchOutcome {
    /// Candidates forwarded to the host.
    pub submitted: usize,

    /// Candidates the host accepted.
    pub accepted: usize,

    /// Nonces dropped because no generation existed at their age.
    pub dropped: usize,

    /// Work retired from previous-previous, to be handed back to the host.
    pub evicted: Option<Work>,
}

/// Running counters for one chip.
#[derive(Debug, Default)]
pub struct ChipStats {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub anomalies: u64,
    pub switches: u64,

    /// Timestamps of recent submissions.
    pub shares: ShareWindow,
}

/// State of one physical chip.
#[derive(Debug)]
pub struct ChipSlot {
    id: ChipId,
    oscillator: OscillatorSetting,
    generations: GenerationRing,

    /// Set by the transport when the chip rolled onto its next job.
    job_switched: bool,

    /// Nonces read back by the transport, bucketed by generation age.
    fresh: [Vec<u32>; GENERATIONS],

    stats: ChipStats,
}

impl ChipSlot {
    pub fn new(id: ChipId, oscillator: OscillatorSetting) -> Self {
        Self {
            id,
            oscillator,
            generations: GenerationRing::new(),
            job_switched: false,
            fresh: Default::default(),
            stats: ChipStats::default(),
        }
    }

    pub fn id(&self) -> ChipId {
        self.id
    }

    pub fn oscillator(&self) -> OscillatorSetting {
        self.oscillator
    }

    pub fn set_oscillator(&mut self, oscillator: OscillatorSetting) {
        self.oscillator = oscillator;
    }

    pub fn generations(&self) -> &GenerationRing {
        &self.generations
    }

    pub fn stats(&self) -> &ChipStats {
        &self.stats
    }

    pub fn has_current(&self) -> bool {
        self.generations.current().is_some()
    }

    /// Bind work as this chip's current generation.
    ///
    /// Returns work displaced from the current slot, which only happens if
    /// the caller assigns over a live generation.
    pub fn assign(&mut self, work: Work) -> Option<Work> {
        self.generations
            .assign(Generation::new(work))
            .map(Generation::into_work)
    }

    // -----------------------------------------------------------------------
    // Transport-facing interface
    // -----------------------------------------------------------------------

    /// Encoded job to push to the chip, if it has one.
    pub fn payload(&self) -> Option<&Payload> {
        self.generations.current().map(Generation::payload)
    }

    /// Record a nonce read back from the chip for the generation at `age`.
    pub fn report_nonce(&mut self, age: Age, nonce: u32) {
        self.fresh[age.bucket()].push(nonce);
    }

    /// Flag that the chip has moved on to its next job.
    pub fn mark_job_switched(&mut self) {
        self.job_switched = true;
    }

    pub fn job_switched(&self) -> bool {
        self.job_switched
    }

    pub fn clear_job_switched(&mut self) {
        self.job_switched = false;
    }

    /// Nonces waiting in the transport buckets.
    pub fn fresh_nonces(&self) -> usize {
        self.fresh.iter().map(Vec::len).sum()
    }

    // -----------------------------------------------------------------------
    // Rotation engine
    // -----------------------------------------------------------------------

    /// Move freshly reported nonces into the generations they belong to.
    ///
    /// Bucket `n` maps to the generation of age `n`. A nonce whose bucket has
    /// no generation is dropped. Returns the number dropped.
    pub fn partition_results(&mut self) -> usize {
        let mut dropped = 0;
        for age in Age::OLDEST_FIRST {
            let bucket = &mut self.fresh[age.bucket()];
            if bucket.is_empty() {
                continue;
            }
            match self.generations.get_mut(age) {
                Some(generation) => generation.push_results(bucket.drain(..)),
                None => {
                    dropped += bucket.len();
                    bucket.clear();
                }
            }
        }
        dropped
    }

    /// Drain every live generation, oldest first.
    ///
    /// Returns `(submitted, accepted)`.
    pub fn drain_and_submit<F>(&mut self, mut submit: F) -> (usize, usize)
    where
        F: FnMut(&Work, u32) -> bool,
    {
        let mut accepted = 0;
        let mut counted = |work: &Work, nonce: u32| {
            let ok = submit(work, nonce);
            if ok {
                accepted += 1;
            }
            ok
        };

        let mut submitted = 0;
        for age in Age::OLDEST_FIRST {
            if let Some(generation) = self.generations.get_mut(age) {
                submitted += generation.drain_and_submit(&mut counted);
            }
        }
        (submitted, accepted)
    }

    /// Handle a detected job switch.
    ///
    /// Partitions fresh results, drains all three generations oldest first,
    /// retires previous-previous, shifts the rest one position older and
    /// clears the switch flag. Afterwards the current slot is always empty.
    pub fn on_switch_detected<F>(&mut self, submit: F, now: Instant) -> SwitchOutcome
    where
        F: FnMut(&Work, u32) -> bool,
    {
        let mut outcome = self.flush_results(submit, now);
        outcome.evicted = self.generations.rotate().map(Generation::into_work);
        self.job_switched = false;
        self.stats.switches += 1;
        outcome
    }

    /// Partition and submit every result reported so far, without rotating.
    ///
    /// Used before the chip's work is released, so nonces reported since the
    /// last switch are still attributed and submitted.
    pub fn flush_results<F>(&mut self, submit: F, now: Instant) -> SwitchOutcome
    where
        F: FnMut(&Work, u32) -> bool,
    {
        let dropped = self.partition_results();
        let (submitted, accepted) = self.drain_and_submit(submit);

        self.stats.submitted += submitted as u64;
        self.stats.accepted += accepted as u64;
        self.stats.rejected += (submitted - accepted) as u64;
        self.stats.anomalies += dropped as u64;
        for _ in 0..submitted {
            self.stats.shares.record(now);
        }

        SwitchOutcome {
            submitted,
            accepted,
            dropped,
            evicted: None,
        }
    }

    /// Release every generation, oldest first.
    ///
    /// Nonces still waiting in the buckets are discarded and counted as
    /// anomalies; call [`ChipSlot::flush_results`] first to submit them.
    pub fn take_all_work(&mut self) -> Vec<Work> {
        let discarded = self.fresh_nonces();
        self.stats.anomalies += discarded as u64;
        for bucket in &mut self.fresh {
            bucket.clear();
        }
        self.job_switched = false;
        self.generations
            .take_all()
            .into_iter()
            .map(Generation::into_work)
            .collect()
    }
}
