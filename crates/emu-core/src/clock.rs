//! Master crystal of a machine.

use crate::Ticks;

/// Frequency of the master crystal and the divider of the chip bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterClock {
    pub frequency_hz: u64,
    /// Master ticks per bus cycle.
    pub divider: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64, divider: u64) -> Self {
        Self { frequency_hz, divider }
    }

    /// Bus cycles per second.
    #[must_use]
    pub const fn bus_frequency_hz(&self) -> u64 {
        self.frequency_hz / self.divider
    }

    /// Master ticks spent in `cycles` bus cycles.
    #[must_use]
    pub const fn ticks_for(&self, cycles: u64) -> Ticks {
        Ticks::new(cycles * self.divider)
    }
}
