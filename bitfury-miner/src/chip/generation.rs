//! Job generations tracked per chip.
//!
//! A Bitfury chip accepts its next job before every nonce of the one it is
//! working on has been read back. The polling cadence is slower than the
//! chip's own search rate, so nonces for up to three jobs can still be in
//! flight at once. Each of those jobs is a [`Generation`], and a chip keeps
//! them in a [`GenerationRing`] ordered by [`Age`].
//!
//! # Rotation
//!
//! When the transport reports a job switch, the ring rotates: the current
//! generation becomes previous, previous becomes previous-previous, and the
//! old previous-previous is evicted and handed back to the host. The ring
//! never copies generations; rotation only moves the index of the current
//! slot, so a generation is owned by exactly one slot at any time.
//!
//! # Submission watermark
//!
//! A generation may be drained several times during its lifetime (once per
//! switch while it is current, previous and previous-previous). The
//! `results_submitted` watermark guarantees that each collected nonce is
//! forwarded to the host at most once.

use strum::FromRepr;

use crate::work::{Payload, Work};

/// Number of generations a chip can hold at once.
pub const GENERATIONS: usize = 3;

/// Position of a generation in a chip's rotation.
///
/// The discriminant doubles as the index of the transport's result bucket
/// for that generation: bucket 0 holds nonces for the current job, bucket 1
/// for the previous job and bucket 2 for the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[repr(usize)]
pub enum Age {
    Current = 0,
    Previous = 1,
    PreviousPrevious = 2,
}

impl Age {
    /// All ages, oldest first.
    pub const OLDEST_FIRST: [Age; GENERATIONS] =
        [Age::PreviousPrevious, Age::Previous, Age::Current];

    /// Index of the result bucket carrying nonces for this age.
    pub fn bucket(self) -> usize {
        self as usize
    }
}

/// One unit of work bound to a chip, plus the nonces collected for it.
#[derive(Debug)]
pub struct Generation {
    work: Work,

    /// Chip encoding of `work`, computed once at assignment.
    payload: Payload,

    /// Raw nonce words as reported by the chip (chip byte order).
    results: Vec<u32>,

    /// Results at indices below this have been forwarded to the host.
    results_submitted: usize,
}

impl Generation {
    /// Bind work to a chip, caching its payload encoding.
    pub fn new(work: Work) -> Self {
        let payload = Payload::from_work(&work);
        Self {
            work,
            payload,
            results: Vec::new(),
            results_submitted: 0,
        }
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn results(&self) -> &[u32] {
        &self.results
    }

    pub fn results_submitted(&self) -> usize {
        self.results_submitted
    }

    /// Append raw nonces attributed to this generation.
    pub fn push_results<I>(&mut self, nonces: I)
    where
        I: IntoIterator<Item = u32>,
    {
        self.results.extend(nonces);
    }

    /// Forward every result past the watermark to `submit`, advancing the
    /// watermark as it goes.
    ///
    /// Nonces arrive from the chip big-endian and are byte-swapped before
    /// submission. Every candidate is submitted regardless of validity; the
    /// boolean `submit` returns (accepted or not) is the host's business and
    /// does not affect the watermark.
    ///
    /// Returns the number of candidates submitted by this call.
    pub fn drain_and_submit<F>(&mut self, mut submit: F) -> usize
    where
        F: FnMut(&Work, u32) -> bool,
    {
        let start = self.results_submitted;
        for &raw in &self.results[start..] {
            submit(&self.work, raw.swap_bytes());
            self.results_submitted += 1;
        }
        self.results_submitted - start
    }

    /// Release the work back to whoever is retiring this generation.
    pub fn into_work(self) -> Work {
        self.work
    }
}

/// Fixed-capacity ring of a chip's generations, indexed by age.
#[derive(Debug, Default)]
pub struct GenerationRing {
    slots: [Option<Generation>; GENERATIONS],

    /// Slot index holding the current generation.
    head: usize,
}

impl GenerationRing {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, age: Age) -> usize {
        (self.head + age as usize) % GENERATIONS
    }

    pub fn get(&self, age: Age) -> Option<&Generation> {
        self.slots[self.index(age)].as_ref()
    }

    pub fn get_mut(&mut self, age: Age) -> Option<&mut Generation> {
        let index = self.index(age);
        self.slots[index].as_mut()
    }

    pub fn current(&self) -> Option<&Generation> {
        self.get(Age::Current)
    }

    /// Install a new current generation.
    ///
    /// Returns the generation that was displaced, if any. The orchestrator
    /// only assigns into an empty current slot, so a displaced generation
    /// indicates a caller bug; it is returned rather than dropped so its
    /// work can still be released.
    pub fn assign(&mut self, generation: Generation) -> Option<Generation> {
        let index = self.index(Age::Current);
        self.slots[index].replace(generation)
    }

    /// Shift every generation one position older.
    ///
    /// The previous-previous generation is evicted and returned. Its slot
    /// becomes the new (empty) current slot.
    pub fn rotate(&mut self) -> Option<Generation> {
        let oldest = self.index(Age::PreviousPrevious);
        let evicted = self.slots[oldest].take();
        self.head = oldest;
        evicted
    }

    /// Number of generations currently held.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every generation, oldest first.
    pub fn take_all(&mut self) -> Vec<Generation> {
        let mut taken = Vec::with_capacity(GENERATIONS);
        for age in Age::OLDEST_FIRST {
            let index = self.index(age);
            if let Some(generation) = self.slots[index].take() {
                taken.push(generation);
            }
        }
        self.head = 0;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::test_work;

    fn generation(id: u64) -> Generation {
        Generation::new(test_work(id))
    }

    #[test]
    fn test_age_bucket_round_trips_through_repr() {
        for age in Age::OLDEST_FIRST {
            assert_eq!(Age::from_repr(age.bucket()), Some(age));
        }
        assert_eq!(Age::from_repr(3), None);
        assert_eq!(Age::PreviousPrevious.to_string(), "previous_previous");
    }

    #[test]
    fn test_drain_submits_byte_swapped_nonces() {
        let mut gen = generation(1);
        gen.push_results([0x1122_3344, 0xaabb_ccdd]);

        let mut seen = Vec::new();
        let submitted = gen.drain_and_submit(|work, nonce| {
            seen.push((work.id, nonce));
            true
        });

        assert_eq!(submitted, 2);
        assert_eq!(seen, vec![(1, 0x4433_2211), (1, 0xddcc_bbaa)]);
        assert_eq!(gen.results_submitted(), 2);
        assert_eq!(gen.results_submitted(), gen.results().len());
    }

    #[test]
    fn test_drain_never_resubmits_below_watermark() {
        let mut gen = generation(1);
        gen.push_results([1, 2]);
        assert_eq!(gen.drain_and_submit(|_, _| true), 2);

        // Nothing new: nothing submitted
        assert_eq!(gen.drain_and_submit(|_, _| panic!("resubmitted")), 0);

        // Late arrival: only the new result goes out
        gen.push_results([3]);
        let mut seen = Vec::new();
        assert_eq!(
            gen.drain_and_submit(|_, nonce| {
                seen.push(nonce);
                false
            }),
            1
        );
        assert_eq!(seen, vec![3u32.swap_bytes()]);
        assert_eq!(gen.results_submitted(), gen.results().len());
    }

    #[test]
    fn test_rejected_candidates_still_advance_watermark() {
        let mut gen = generation(1);
        gen.push_results([7, 8, 9]);
        assert_eq!(gen.drain_and_submit(|_, _| false), 3);
        assert_eq!(gen.results_submitted(), 3);
    }

    #[test]
    fn test_rotation_ages_generations() {
        let mut ring = GenerationRing::new();
        assert!(ring.assign(generation(1)).is_none());

        assert!(ring.rotate().is_none());
        assert!(ring.current().is_none());
        assert_eq!(ring.get(Age::Previous).map(|g| g.work().id), Some(1));

        ring.assign(generation(2));
        assert!(ring.rotate().is_none());
        assert_eq!(ring.get(Age::PreviousPrevious).map(|g| g.work().id), Some(1));
        assert_eq!(ring.get(Age::Previous).map(|g| g.work().id), Some(2));

        ring.assign(generation(3));
        let evicted = ring.rotate().expect("oldest generation evicted");
        assert_eq!(evicted.work().id, 1);
        assert_eq!(ring.get(Age::PreviousPrevious).map(|g| g.work().id), Some(2));
        assert_eq!(ring.get(Age::Previous).map(|g| g.work().id), Some(3));
        assert!(ring.current().is_none());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_rotation_without_current_keeps_newest_slot_empty() {
        let mut ring = GenerationRing::new();
        ring.assign(generation(1));
        ring.rotate();
        // Switch fires with no job assigned
        ring.rotate();
        assert!(ring.current().is_none());
        assert!(ring.get(Age::Previous).is_none());
        assert_eq!(ring.get(Age::PreviousPrevious).map(|g| g.work().id), Some(1));
    }

    #[test]
    fn test_take_all_returns_oldest_first() {
        let mut ring = GenerationRing::new();
        for id in 1..=3 {
            ring.assign(generation(id));
            if id < 3 {
                ring.rotate();
            }
        }
        let ids: Vec<u64> = ring.take_all().into_iter().map(|g| g.work().id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(ring.is_empty());
    }
}
