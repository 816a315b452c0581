//! Core types for bitfury-miner.
//!
//! Hashrate and hashing-credit arithmetic shared by the device, its
//! statistics and the daemon.

use std::fmt;

/// Expected hashes behind one nonce candidate: a full search of the 32-bit
/// nonce space.
pub const HASHES_PER_CANDIDATE: u64 = 1 << 32;

/// Hashing credit for `submissions` candidates.
pub fn credit_for_submissions(submissions: usize) -> u64 {
    (submissions as u64).saturating_mul(HASHES_PER_CANDIDATE)
}

/// Hashrate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HashRate(pub u64); // hashes per second

impl HashRate {
    pub fn as_megahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn as_gigahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn as_terahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000_000_000.0
    }

    /// Format as human-readable string with appropriate units
    pub fn to_human_readable(&self) -> String {
        if self.0 >= 1_000_000_000_000 {
            format!("{:.2} TH/s", self.as_terahashes())
        } else if self.0 >= 1_000_000_000 {
            format!("{:.2} GH/s", self.as_gigahashes())
        } else if self.0 >= 1_000_000 {
            format!("{:.2} MH/s", self.as_megahashes())
        } else {
            format!("{} H/s", self.0)
        }
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_is_one_nonce_space_per_submission() {
        assert_eq!(credit_for_submissions(0), 0);
        assert_eq!(credit_for_submissions(1), 4_294_967_296);
        assert_eq!(credit_for_submissions(3), 3 * 4_294_967_296);
    }

    #[test]
    fn test_credit_saturates() {
        assert_eq!(credit_for_submissions(usize::MAX), u64::MAX);
    }

    #[test]
    fn test_hashrate_conversions() {
        let rate = HashRate(500_000_000_000);
        assert_eq!(rate.as_gigahashes(), 500.0);
        assert_eq!(rate.to_human_readable(), "500.00 GH/s");

        assert_eq!(HashRate(2_500_000).to_string(), "2.50 MH/s");
        assert_eq!(HashRate(3_000_000_000_000).to_string(), "3.00 TH/s");
        assert_eq!(HashRate(12).to_string(), "12 H/s");
    }
}
