//! Emulated Bitfury chips.
//!
//! Stands in for real boards when developing or testing the driver. Each
//! emulated chip rolls onto its next job every `switch_interval` transfers
//! and reports a fixed number of nonces for the job it just finished, plus
//! late nonces for the job before that, the way real chips do when polling
//! lags behind their search rate.
//!
//! Nonces come from a per-chip xorshift sequence, so runs are repeatable.
//! They are not real solutions.
//!
//! # Configuration
//!
//! - `BITFURY_EMULATED_CHIPS=N` - Number of emulated chips (default: 4)

use std::collections::HashMap;

use async_trait::async_trait;

use super::{ChipTransport, TransportError};
use crate::chip::generation::Age;
use crate::chip::{ChipId, ChipSlot, OscillatorSetting};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Chips per board slot on a Bitfury chain.
pub const CHIPS_PER_SLOT: u8 = 8;

/// Emulation parameters.
#[derive(Debug, Clone)]
pub struct EmulationConfig {
    /// Number of chips to emulate.
    pub chips: usize,

    /// Transfers between job switches.
    pub switch_interval: u32,

    /// Nonces reported for the finished job at each switch.
    pub nonces_per_switch: usize,

    /// Nonces reported for the job before that.
    pub late_nonces: usize,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            chips: 4,
            switch_interval: 2,
            nonces_per_switch: 2,
            late_nonces: 1,
        }
    }
}

impl EmulationConfig {
    /// Parse configuration from environment variables.
    ///
    /// Unset variables keep their defaults. A set but unusable value is a
    /// configuration error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("BITFURY_EMULATED_CHIPS") {
            config.chips = match val.parse::<usize>() {
                Ok(n) if n > 0 && n <= usize::from(u8::MAX) * usize::from(CHIPS_PER_SLOT) => n,
                _ => {
                    return Err(Error::Config(format!(
                        "invalid BITFURY_EMULATED_CHIPS {:?}",
                        val
                    )))
                }
            };
        }
        Ok(config)
    }
}

struct EmulatedChip {
    oscillator: Option<OscillatorSetting>,
    transfers: u32,
    switches: u64,
    rng: u32,
}

impl EmulatedChip {
    fn new(index: usize) -> Self {
        Self {
            oscillator: None,
            transfers: 0,
            switches: 0,
            rng: (index as u32).wrapping_add(1).wrapping_mul(0x9e37_79b9) | 1,
        }
    }

    fn next_nonce(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }
}

/// In-memory transport driving emulated chips.
pub struct EmulatedTransport {
    config: EmulationConfig,
    ids: Vec<ChipId>,
    chips: HashMap<ChipId, EmulatedChip>,
    batches: u64,
    shut_down: bool,
}

impl EmulatedTransport {
    pub fn new(config: EmulationConfig) -> Self {
        let ids: Vec<ChipId> = (0..config.chips)
            .map(|i| {
                ChipId::new(
                    (i / usize::from(CHIPS_PER_SLOT)) as u8,
                    (i % usize::from(CHIPS_PER_SLOT)) as u8,
                )
            })
            .collect();
        let chips = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, EmulatedChip::new(i)))
            .collect();

        Self {
            config,
            ids,
            chips,
            batches: 0,
            shut_down: false,
        }
    }

    /// Oscillator setting last programmed into a chip.
    #[cfg(test)]
    pub fn oscillator(&self, id: ChipId) -> Option<OscillatorSetting> {
        self.chips.get(&id).and_then(|c| c.oscillator)
    }

    /// Batch transfers performed so far.
    #[cfg(test)]
    pub fn batches(&self) -> u64 {
        self.batches
    }

    #[cfg(test)]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

#[async_trait]
impl ChipTransport for EmulatedTransport {
    async fn detect_chips(&mut self) -> std::result::Result<Vec<ChipId>, TransportError> {
        debug!(chips = self.ids.len(), "Emulated chips detected");
        Ok(self.ids.clone())
    }

    async fn transfer_batch(
        &mut self,
        chips: &mut [ChipSlot],
    ) -> std::result::Result<(), TransportError> {
        if self.shut_down {
            return Err(TransportError::Closed);
        }

        // Validate the whole batch before touching any chip
        for chip in chips.iter() {
            if !self.chips.contains_key(&chip.id()) {
                return Err(TransportError::UnknownChip(chip.id()));
            }
            if chip.payload().is_none() {
                return Err(TransportError::MissingPayload(chip.id()));
            }
        }

        for chip in chips.iter_mut() {
            let id = chip.id();
            let emulated = self
                .chips
                .get_mut(&id)
                .ok_or(TransportError::UnknownChip(id))?;

            emulated.transfers += 1;
            if emulated.transfers % self.config.switch_interval.max(1) != 0 {
                continue;
            }

            for _ in 0..self.config.nonces_per_switch {
                chip.report_nonce(Age::Current, emulated.next_nonce());
            }
            if emulated.switches > 0 {
                for _ in 0..self.config.late_nonces {
                    chip.report_nonce(Age::Previous, emulated.next_nonce());
                }
            }
            chip.mark_job_switched();
            emulated.switches += 1;
            trace!(chip = %id, switches = emulated.switches, "Emulated job switch");
        }

        self.batches += 1;
        Ok(())
    }

    async fn reinitialize_chip(
        &mut self,
        id: ChipId,
        oscillator: OscillatorSetting,
    ) -> std::result::Result<(), TransportError> {
        let chip = self
            .chips
            .get_mut(&id)
            .ok_or(TransportError::UnknownChip(id))?;
        let previous = chip.oscillator.replace(oscillator);
        debug!(
            chip = %id,
            osc = %oscillator,
            previous = ?previous.map(OscillatorSetting::bits),
            "Emulated chip reinitialized"
        );
        Ok(())
    }

    async fn shutdown_chips(&mut self, chips: &[ChipSlot]) -> std::result::Result<(), TransportError> {
        debug!(
            chips = chips.len(),
            batches = self.batches,
            "Emulated chips shut down"
        );
        self.shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::test_work;
    use serial_test::serial;

    fn slots(transport: &EmulatedTransport) -> Vec<ChipSlot> {
        transport
            .ids
            .iter()
            .map(|id| {
                let mut slot = ChipSlot::new(*id, OscillatorSetting::DEFAULT);
                slot.assign(test_work(u64::from(id.chip)));
                slot
            })
            .collect()
    }

    #[test]
    fn test_ids_span_slots() {
        let transport = EmulatedTransport::new(EmulationConfig {
            chips: 10,
            ..Default::default()
        });
        assert_eq!(transport.ids[7], ChipId::new(0, 7));
        assert_eq!(transport.ids[8], ChipId::new(1, 0));
    }

    #[tokio::test]
    async fn test_switch_every_interval() {
        let mut transport = EmulatedTransport::new(EmulationConfig::default());
        let mut chips = slots(&transport);

        transport.transfer_batch(&mut chips).await.unwrap();
        assert!(chips.iter().all(|c| !c.job_switched()));

        transport.transfer_batch(&mut chips).await.unwrap();
        assert!(chips.iter().all(|c| c.job_switched()));
        // First switch: no previous job to report late nonces for
        assert!(chips.iter().all(|c| c.fresh_nonces() == 2));
        assert_eq!(transport.batches(), 2);
    }

    #[tokio::test]
    async fn test_late_nonces_after_first_switch() {
        let mut transport = EmulatedTransport::new(EmulationConfig {
            chips: 1,
            switch_interval: 1,
            ..Default::default()
        });
        let mut chips = slots(&transport);

        transport.transfer_batch(&mut chips).await.unwrap();
        assert_eq!(chips[0].partition_results(), 0);

        transport.transfer_batch(&mut chips).await.unwrap();
        assert_eq!(chips[0].fresh_nonces(), 3);
    }

    #[tokio::test]
    async fn test_missing_payload_rejected() {
        let mut transport = EmulatedTransport::new(EmulationConfig::default());
        let mut chips = slots(&transport);
        chips[2].take_all_work();

        let result = transport.transfer_batch(&mut chips).await;
        assert!(matches!(result, Err(TransportError::MissingPayload(id)) if id == ChipId::new(0, 2)));
        assert!(chips.iter().all(|c| c.fresh_nonces() == 0));
    }

    #[tokio::test]
    async fn test_reinitialize_and_shutdown() {
        let mut transport = EmulatedTransport::new(EmulationConfig::default());
        let osc = OscillatorSetting::new(50).unwrap();
        transport
            .reinitialize_chip(ChipId::new(0, 1), osc)
            .await
            .unwrap();
        assert_eq!(transport.oscillator(ChipId::new(0, 1)), Some(osc));
        assert!(matches!(
            transport.reinitialize_chip(ChipId::new(3, 0), osc).await,
            Err(TransportError::UnknownChip(_))
        ));

        let mut chips = slots(&transport);
        transport.shutdown_chips(&chips).await.unwrap();
        assert!(transport.is_shut_down());
        assert!(matches!(
            transport.transfer_batch(&mut chips).await,
            Err(TransportError::Closed)
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::remove_var("BITFURY_EMULATED_CHIPS");
        assert_eq!(EmulationConfig::from_env().unwrap().chips, 4);

        std::env::set_var("BITFURY_EMULATED_CHIPS", "16");
        assert_eq!(EmulationConfig::from_env().unwrap().chips, 16);

        std::env::set_var("BITFURY_EMULATED_CHIPS", "0");
        assert!(EmulationConfig::from_env().is_err());

        std::env::remove_var("BITFURY_EMULATED_CHIPS");
    }
}
