//! Job generator for creating work locally.
//!
//! Produces syntactically valid block headers so the device can be driven
//! without a pool, for example against the emulated transport or while
//! bringing up new boards. Generated work is never submittable upstream.

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::block::{Header as BlockHeader, Version};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::pow::{CompactTarget, Target};
use bitcoin::{BlockHash, TxMerkleNode};

use crate::tracing::prelude::*;
use crate::work::Work;

/// Generates work items with unique merkle roots.
pub struct JobGenerator {
    /// Target attached to every generated item
    share_target: Target,
    /// Network bits written into the header
    bits: CompactTarget,
    version: Version,
    next_id: u64,
}

impl JobGenerator {
    /// Create a generator whose work is accepted at `share_target`.
    ///
    /// The header bits are fixed at difficulty 1; only `share_target`
    /// decides which candidates the host accepts.
    pub fn new(share_target: Target) -> Self {
        Self {
            share_target,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            version: Version::TWO,
            next_id: 0,
        }
    }

    /// Generator whose every candidate is accepted.
    ///
    /// Useful with emulated chips, whose nonces are not real solutions.
    pub fn accept_all() -> Self {
        Self::new(Target::from_le_bytes([0xff; 32]))
    }

    /// Generate the next work item.
    pub fn next_work(&mut self) -> Work {
        let id = self.next_id;
        self.next_id += 1;

        let header = BlockHeader {
            version: self.version,
            prev_blockhash: fallback_prev_blockhash(),
            merkle_root: TxMerkleNode::from_raw_hash(sha256d::Hash::hash(&id.to_le_bytes())),
            time: unix_time(),
            bits: self.bits,
            nonce: 0,
        };

        trace!(work_id = id, ntime = header.time, "Generated work");
        Work::new(id, header, self.share_target)
    }
}

// Recognizable pattern so locally generated work stands out in logs and
// captures.
fn fallback_prev_blockhash() -> BlockHash {
    let mut prev_hash = [0u8; 32];
    prev_hash[0..7].copy_from_slice(b"BITFURY");
    BlockHash::from_byte_array(prev_hash)
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::Payload;

    #[test]
    fn test_ids_increment() {
        let mut generator = JobGenerator::new(Target::MAX);
        assert_eq!(generator.next_work().id, 0);
        assert_eq!(generator.next_work().id, 1);
    }

    #[test]
    fn test_each_work_has_distinct_payload() {
        let mut generator = JobGenerator::new(Target::MAX);
        let a = Payload::from_work(&generator.next_work());
        let b = Payload::from_work(&generator.next_work());
        assert_ne!(a.midstate, b.midstate);
    }

    #[test]
    fn test_accept_all_accepts_any_nonce() {
        let work = JobGenerator::accept_all().next_work();
        assert!(work.meets_target(0));
        assert!(work.meets_target(0xffff_ffff));
    }

    #[test]
    fn test_header_marked_as_local() {
        let work = JobGenerator::new(Target::MAX).next_work();
        assert_eq!(&work.header.prev_blockhash.to_byte_array()[..7], b"BITFURY");
        assert_eq!(work.header.bits.to_consensus(), 0x1d00ffff);
    }
}
