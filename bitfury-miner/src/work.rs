//! Work items and their chip encoding.
//!
//! [`Work`] is the host's unit of work: a block header to search plus the
//! target a candidate must meet. The host owns it until it is handed to a
//! chip, and gets it back when the chip's generation for it is retired.
//! `Work` is deliberately not `Clone`, so there is only ever one owner.
//!
//! [`Payload`] is what actually goes over the wire to a chip. Bitfury chips
//! do not take the raw header; they take the SHA-256 midstate of the first
//! 64 header bytes plus the three remaining header words that feed the
//! second compression round.

use bitcoin::block::Header as BlockHeader;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::pow::Target;

/// Size of the encoded payload in bytes.
pub const PAYLOAD_LEN: usize = 48;

/// A unit of work from the host queue.
#[derive(Debug)]
pub struct Work {
    /// Host-assigned identifier, used for logging and bookkeeping only.
    pub id: u64,

    /// Header to search; the nonce field is ignored.
    pub header: BlockHeader,

    /// Target a candidate's block hash must meet to be accepted.
    pub share_target: Target,
}

impl Work {
    pub fn new(id: u64, header: BlockHeader, share_target: Target) -> Self {
        Self {
            id,
            header,
            share_target,
        }
    }

    /// The header with `nonce` filled in.
    pub fn header_with_nonce(&self, nonce: u32) -> BlockHeader {
        BlockHeader {
            nonce,
            ..self.header
        }
    }

    /// Whether `nonce` solves this work at its share target.
    pub fn meets_target(&self, nonce: u32) -> bool {
        let hash = self.header_with_nonce(nonce).block_hash();
        self.share_target.is_met_by(hash)
    }
}

/// Chip encoding of a [`Work`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    /// SHA-256 state after the first 64 header bytes.
    pub midstate: [u8; 32],

    /// Last word of the merkle root (header bytes 64..68).
    pub m7: u32,

    pub ntime: u32,
    pub nbits: u32,

    /// Nonce the chip starts searching from.
    pub nnonce: u32,
}

impl Payload {
    pub fn from_work(work: &Work) -> Self {
        let header = bitcoin::consensus::serialize(&work.header);

        let mut engine = sha256::HashEngine::default();
        engine.input(&header[..64]);
        let midstate = engine.midstate().to_byte_array();

        let merkle_root = work.header.merkle_root.to_byte_array();
        let m7 = u32::from_le_bytes([
            merkle_root[28],
            merkle_root[29],
            merkle_root[30],
            merkle_root[31],
        ]);

        Self {
            midstate,
            m7,
            ntime: work.header.time,
            nbits: work.header.bits.to_consensus(),
            nnonce: 0,
        }
    }

    /// Wire encoding: midstate followed by `m7`, `ntime`, `nbits` and
    /// `nnonce` as little-endian words.
    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[..32].copy_from_slice(&self.midstate);
        for (i, word) in [self.m7, self.ntime, self.nbits, self.nnonce]
            .into_iter()
            .enumerate()
        {
            let at = 32 + i * 4;
            out[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

/// Work with a fixed header and a target every hash meets.
#[cfg(test)]
pub(crate) fn test_work(id: u64) -> Work {
    use bitcoin::block::Version;
    use bitcoin::pow::CompactTarget;
    use bitcoin::{BlockHash, TxMerkleNode};

    let mut merkle = [0u8; 32];
    merkle[..8].copy_from_slice(&id.to_le_bytes());
    merkle[28..].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);

    Work::new(
        id,
        BlockHeader {
            version: Version::from_consensus(0x2000_0000),
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::from_byte_array(merkle),
            time: 1_700_000_000,
            bits: CompactTarget::from_consensus(0x1703_4219),
            nonce: 0,
        },
        Target::from_le_bytes([0xff; 32]),
    )
}
