//! Oscillator override strings.
//!
//! Operators tune individual chips with a comma-separated list:
//!
//! ```text
//! ALL:54,3:60,7:50
//! ```
//!
//! An optional leading `ALL:<setting>` applies to every chip; each following
//! `<chip>:<setting>` entry overrides one chip by its index in the device's
//! chip list. Entries are applied left to right, so later entries win.
//!
//! Parsing stops at the first entry that does not parse. Everything before it
//! still applies and chips not covered keep their current setting. A bad
//! override string is never an error for the device.

use super::{ChipSlot, OscillatorSetting};
use crate::tracing::prelude::*;

/// Why parsing of an override string stopped early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("malformed entry {entry:?}")]
    Malformed { entry: String },

    #[error("oscillator setting {value} out of range in {entry:?}")]
    SettingOutOfRange { entry: String, value: u64 },
}

/// One override, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Override {
    All(OscillatorSetting),
    Chip {
        index: usize,
        setting: OscillatorSetting,
    },
}

/// The successfully parsed prefix of an override string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipOptions {
    pub overrides: Vec<Override>,

    /// Set if parsing stopped before the end of the string.
    pub error: Option<OptionsError>,
}

impl ChipOptions {
    /// Parse an override string, keeping every entry up to the first failure.
    pub fn parse(input: &str) -> Self {
        let mut options = Self::default();
        if input.trim().is_empty() {
            return options;
        }

        for (position, raw) in input.split(',').enumerate() {
            let entry = raw.trim();
            match parse_entry(entry, position == 0) {
                Ok(parsed) => options.overrides.push(parsed),
                Err(e) => {
                    options.error = Some(e);
                    break;
                }
            }
        }
        options
    }

    /// Apply the overrides to `chips`.
    ///
    /// An entry naming a chip index past the end of `chips` ends the
    /// application the same way a parse failure does. Returns the number of
    /// overrides applied.
    pub fn apply(&self, chips: &mut [ChipSlot]) -> usize {
        if let Some(ref e) = self.error {
            warn!(error = %e, "Ignoring oscillator overrides from this point on");
        }

        let mut applied = 0;
        for entry in &self.overrides {
            match *entry {
                Override::All(setting) => {
                    for chip in chips.iter_mut() {
                        chip.set_oscillator(setting);
                    }
                }
                Override::Chip { index, setting } => match chips.get_mut(index) {
                    Some(chip) => chip.set_oscillator(setting),
                    None => {
                        warn!(
                            index,
                            chips = chips.len(),
                            "Oscillator override names a missing chip, ignoring the rest"
                        );
                        break;
                    }
                },
            }
            applied += 1;
        }
        applied
    }
}

fn parse_entry(entry: &str, first: bool) -> Result<Override, OptionsError> {
    let malformed = || OptionsError::Malformed {
        entry: entry.to_string(),
    };

    let (key, value) = entry.split_once(':').ok_or_else(malformed)?;
    let value: u64 = value.trim().parse().map_err(|_| malformed())?;
    let setting = u8::try_from(value)
        .ok()
        .and_then(OscillatorSetting::new)
        .ok_or_else(|| OptionsError::SettingOutOfRange {
            entry: entry.to_string(),
            value,
        })?;

    let key = key.trim();
    if key == "ALL" {
        // ALL is only meaningful as the leading entry
        return if first {
            Ok(Override::All(setting))
        } else {
            Err(malformed())
        };
    }

    let index = key.parse().map_err(|_| malformed())?;
    Ok(Override::Chip { index, setting })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipId;

    fn chips(n: u8) -> Vec<ChipSlot> {
        (0..n)
            .map(|i| ChipSlot::new(ChipId::new(0, i), OscillatorSetting::DEFAULT))
            .collect()
    }

    fn settings(chips: &[ChipSlot]) -> Vec<u8> {
        chips.iter().map(|c| c.oscillator().bits()).collect()
    }

    fn osc(bits: u8) -> OscillatorSetting {
        OscillatorSetting::new(bits).unwrap()
    }

    #[test]
    fn test_all_then_single_chip() {
        let mut chips = chips(5);
        for chip in chips.iter_mut() {
            chip.set_oscillator(osc(40));
        }
        let options = ChipOptions::parse("ALL:54,3:60");
        assert_eq!(options.error, None);
        assert_eq!(options.apply(&mut chips), 2);
        assert_eq!(settings(&chips), vec![54, 54, 54, 60, 54]);
    }

    #[test]
    fn test_chip_entries_without_all() {
        let mut chips = chips(4);
        ChipOptions::parse("0:50, 2:52").apply(&mut chips);
        assert_eq!(settings(&chips), vec![50, 54, 52, 54]);
    }

    #[test]
    fn test_all_alone() {
        let options = ChipOptions::parse("ALL:48");
        assert_eq!(options.overrides, vec![Override::All(osc(48))]);
    }

    #[test]
    fn test_stops_at_first_malformed_entry() {
        let options = ChipOptions::parse("1:50,x:51,2:52");
        assert_eq!(
            options.overrides,
            vec![Override::Chip {
                index: 1,
                setting: osc(50)
            }]
        );
        assert!(matches!(options.error, Some(OptionsError::Malformed { .. })));

        let mut chips = chips(3);
        options.apply(&mut chips);
        assert_eq!(settings(&chips), vec![54, 50, 54]);
    }

    #[test]
    fn test_out_of_range_setting_stops_parsing() {
        let options = ChipOptions::parse("ALL:50,1:64,2:52");
        assert_eq!(options.overrides, vec![Override::All(osc(50))]);
        assert_eq!(
            options.error,
            Some(OptionsError::SettingOutOfRange {
                entry: "1:64".into(),
                value: 64
            })
        );
    }

    #[test]
    fn test_all_after_first_entry_is_malformed() {
        let options = ChipOptions::parse("1:50,ALL:40");
        assert_eq!(options.overrides.len(), 1);
        assert!(options.error.is_some());
    }

    #[test]
    fn test_missing_chip_stops_application() {
        let mut chips = chips(2);
        let applied = ChipOptions::parse("0:40,5:41,1:42").apply(&mut chips);
        assert_eq!(applied, 1);
        assert_eq!(settings(&chips), vec![40, 54]);
    }

    #[test]
    fn test_empty_string_is_no_op() {
        let options = ChipOptions::parse("  ");
        assert!(options.overrides.is_empty());
        assert!(options.error.is_none());
    }

    #[test]
    fn test_garbage_leading_entry() {
        let mut chips = chips(2);
        let options = ChipOptions::parse("fast");
        assert!(options.overrides.is_empty());
        assert_eq!(options.apply(&mut chips), 0);
        assert_eq!(settings(&chips), vec![54, 54]);
    }
}
