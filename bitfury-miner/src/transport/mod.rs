//! Chip transport layer.
//!
//! The transport owns the physical link to the chips (SPI on real Bitfury
//! boards). The device treats it as opaque: one batched transfer per scan
//! cycle pushes every chip's current payload and pulls back whatever nonces
//! the chips have produced, bucketed by generation age, together with each
//! chip's job-switch flag.
//!
//! A transport failure leaves chip state unknown, so every error here is
//! fatal for the device that saw it.

pub mod emulated;

pub use emulated::{EmulatedTransport, EmulationConfig};

use async_trait::async_trait;

use crate::chip::{ChipId, ChipSlot, OscillatorSetting};

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chip {0} is not known to the transport")]
    UnknownChip(ChipId),

    #[error("Chip {0} has no job to transfer")]
    MissingPayload(ChipId),

    #[error("Transport has been shut down")]
    Closed,
}

/// Batched access to a set of chips.
#[async_trait]
pub trait ChipTransport: Send {
    /// Enumerate the chips reachable through this transport.
    async fn detect_chips(&mut self) -> Result<Vec<ChipId>, TransportError>;

    /// Push every chip's current payload and collect results.
    ///
    /// On return, each chip's result buckets and job-switch flag reflect
    /// everything the hardware reported since the previous transfer. Every
    /// chip must have a current payload.
    async fn transfer_batch(&mut self, chips: &mut [ChipSlot]) -> Result<(), TransportError>;

    /// Reprogram a chip's oscillator.
    async fn reinitialize_chip(
        &mut self,
        id: ChipId,
        oscillator: OscillatorSetting,
    ) -> Result<(), TransportError>;

    /// Stop all hashing and leave the chips in a safe state.
    async fn shutdown_chips(&mut self, chips: &[ChipSlot]) -> Result<(), TransportError>;
}
