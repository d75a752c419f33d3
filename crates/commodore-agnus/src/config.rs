//! Chipset configuration and runtime options.

use emu_core::MasterClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Agnus chip variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgnusVariant {
    /// 8361 (NTSC) / 8367 (PAL): 512K chip RAM DMA.
    Agnus8361,
    /// 8370 (NTSC) / 8371 (PAL) Fat Agnus: 1MB chip RAM DMA.
    FatAgnus8371,
    /// 8372A ECS Agnus: 2MB chip RAM DMA.
    Agnus8372,
}

impl AgnusVariant {
    #[must_use]
    pub const fn is_ecs(self) -> bool {
        matches!(self, Self::Agnus8372)
    }

    #[must_use]
    pub const fn is_ocs(self) -> bool {
        !self.is_ecs()
    }

    /// DMA address range.
    #[must_use]
    pub const fn ptr_mask(self) -> u32 {
        match self {
            Self::Agnus8361 => 0x0007_FFFE,
            Self::FatAgnus8371 => 0x000F_FFFE,
            Self::Agnus8372 => 0x001F_FFFE,
        }
    }

    /// Writable bits of DDFSTRT and DDFSTOP.
    #[must_use]
    pub const fn ddf_mask(self) -> u16 {
        if self.is_ecs() { 0x00FE } else { 0x00FC }
    }

    /// Chip identification bits reported in VPOSR (bits 8..=14).
    #[must_use]
    pub const fn id_bits(self, region: Region) -> u16 {
        match (self, region) {
            (Self::Agnus8361 | Self::FatAgnus8371, Region::Pal) => 0x0000,
            (Self::Agnus8361 | Self::FatAgnus8371, Region::Ntsc) => 0x1000,
            (Self::Agnus8372, Region::Pal) => 0x2000,
            (Self::Agnus8372, Region::Ntsc) => 0x3000,
        }
    }

    const fn from_index(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Agnus8361),
            1 => Some(Self::FatAgnus8371),
            2 => Some(Self::Agnus8372),
            _ => None,
        }
    }

    const fn index(self) -> i64 {
        match self {
            Self::Agnus8361 => 0,
            Self::FatAgnus8371 => 1,
            Self::Agnus8372 => 2,
        }
    }
}

/// Video region (affects the number of lines per frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// PAL: 312/313 lines.
    Pal,
    /// NTSC: 262/263 lines.
    Ntsc,
}

impl Region {
    /// Master crystal. One DMA cycle lasts eight ticks.
    #[must_use]
    pub const fn master_clock(self) -> MasterClock {
        match self {
            Self::Pal => MasterClock::new(28_375_160, 8),
            Self::Ntsc => MasterClock::new(28_636_360, 8),
        }
    }
}

/// Blitter emulation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlitterAccuracy {
    /// Whole blit in one step, completion after a short fixed delay.
    Fast = 0,
    /// Whole blit in one step, then a bus-only micro-program for timing.
    Fake = 1,
    /// One micro-instruction per granted bus cycle.
    Slow = 2,
}

impl BlitterAccuracy {
    /// Maps a raw option value onto an accuracy level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBlitterAccuracy`] for anything outside `0..=2`.
    pub const fn from_level(level: i64) -> Result<Self, ConfigError> {
        match level {
            0 => Ok(Self::Fast),
            1 => Ok(Self::Fake),
            2 => Ok(Self::Slow),
            _ => Err(ConfigError::InvalidBlitterAccuracy(level)),
        }
    }
}

/// Runtime-adjustable option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    BlitterAccuracy,
    AgnusRevision,
    Region,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid blitter accuracy {0} (expected 0..=2)")]
    InvalidBlitterAccuracy(i64),
    #[error("invalid agnus revision {0}")]
    InvalidRevision(i64),
    #[error("invalid region {0}")]
    InvalidRegion(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipsetConfig {
    pub revision: AgnusVariant,
    pub region: Region,
    pub blitter_accuracy: BlitterAccuracy,
}

impl ChipsetConfig {
    /// A500: 8371 Fat Agnus, PAL.
    #[must_use]
    pub const fn a500() -> Self {
        Self {
            revision: AgnusVariant::FatAgnus8371,
            region: Region::Pal,
            blitter_accuracy: BlitterAccuracy::Slow,
        }
    }

    /// A500+: 8372 ECS Agnus, PAL.
    #[must_use]
    pub const fn a500_plus() -> Self {
        Self {
            revision: AgnusVariant::Agnus8372,
            region: Region::Pal,
            blitter_accuracy: BlitterAccuracy::Slow,
        }
    }

    #[must_use]
    pub const fn get(&self, option: ConfigOption) -> i64 {
        match option {
            ConfigOption::BlitterAccuracy => self.blitter_accuracy as i64,
            ConfigOption::AgnusRevision => self.revision.index(),
            ConfigOption::Region => match self.region {
                Region::Pal => 0,
                Region::Ntsc => 1,
            },
        }
    }

    /// Returns a copy with `option` set to `value`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `value` is out of range for `option`.
    pub fn with(self, option: ConfigOption, value: i64) -> Result<Self, ConfigError> {
        let mut next = self;
        match option {
            ConfigOption::BlitterAccuracy => {
                next.blitter_accuracy = BlitterAccuracy::from_level(value)?;
            }
            ConfigOption::AgnusRevision => {
                next.revision =
                    AgnusVariant::from_index(value).ok_or(ConfigError::InvalidRevision(value))?;
            }
            ConfigOption::Region => {
                next.region = match value {
                    0 => Region::Pal,
                    1 => Region::Ntsc,
                    _ => return Err(ConfigError::InvalidRegion(value)),
                };
            }
        }
        Ok(next)
    }
}

impl Default for ChipsetConfig {
    fn default() -> Self {
        Self::a500()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_select_revision() {
        assert!(ChipsetConfig::a500().revision.is_ocs());
        assert!(ChipsetConfig::a500_plus().revision.is_ecs());
        assert_eq!(ChipsetConfig::a500_plus().revision.ddf_mask(), 0x00FE);
        assert_eq!(ChipsetConfig::a500().revision.ddf_mask(), 0x00FC);
    }

    #[test]
    fn with_rejects_out_of_range_values() {
        let config = ChipsetConfig::a500();
        assert_eq!(
            config.with(ConfigOption::BlitterAccuracy, 3),
            Err(ConfigError::InvalidBlitterAccuracy(3))
        );
        assert_eq!(
            config.with(ConfigOption::AgnusRevision, -1),
            Err(ConfigError::InvalidRevision(-1))
        );
        let fast = config.with(ConfigOption::BlitterAccuracy, 0);
        assert_eq!(fast.map(|c| c.blitter_accuracy), Ok(BlitterAccuracy::Fast));
    }

    #[test]
    fn get_round_trips_through_with() {
        let config = ChipsetConfig::a500_plus();
        for option in [
            ConfigOption::BlitterAccuracy,
            ConfigOption::AgnusRevision,
            ConfigOption::Region,
        ] {
            let value = config.get(option);
            assert_eq!(config.with(option, value), Ok(config));
        }
    }

    #[test]
    fn pal_bus_runs_at_the_colour_clock() {
        let clock = Region::Pal.master_clock();
        assert_eq!(clock.bus_frequency_hz(), 3_546_895);
        assert_eq!(Region::Ntsc.master_clock().bus_frequency_hz(), 3_579_545);
    }
}
