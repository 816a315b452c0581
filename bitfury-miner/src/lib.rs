//! Bitfury ASIC mining driver.
//!
//! Drives chains of Bitfury chips through a scan loop that keeps each chip
//! fed with work, attributes the nonces it reports to the right job across
//! the chip's three-deep job pipeline, and submits them to the host.

pub mod chip;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod host;
pub mod job_generator;
pub mod stats;
pub mod tracing;
pub mod transport;
pub mod types;
pub mod work;
