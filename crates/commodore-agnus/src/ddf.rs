//! Display data fetch (DDF) window computation.
//!
//! DDFSTRT and DDFSTOP are compared against the horizontal counter. The
//! comparison result, together with the two hardwired stops at 0x18 and
//! 0xD8, decides which part of the line performs bitplane DMA. Values outside
//! the hardwired range are honored literally.

use serde::{Deserialize, Serialize};

/// Left hardwired stop.
pub const DDF_HW_START: usize = 0x18;
/// Right hardwired stop.
pub const DDF_HW_STOP: usize = 0xD8;

/// ECS fetch state carried from one line into the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DdfState {
    #[default]
    Off,
    On,
}

/// Which bounds make up the fetch window of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdfInterval {
    Empty,
    /// `[DDFSTRT, DDFSTOP]`
    StrtStop,
    /// `[DDFSTRT, 0xD8]`
    StrtD8,
    /// `[0x18, DDFSTOP]`
    HwStartStop,
    /// `[0x18, 0xD8]`
    HwStartD8,
}

// Indexed by 3 * class(strt) + class(stop).
const OCS_TABLE: [DdfInterval; 9] = [
    DdfInterval::Empty,       // small  small
    DdfInterval::HwStartStop, // small  medium
    DdfInterval::HwStartD8,   // small  large
    DdfInterval::Empty,       // medium small
    DdfInterval::StrtStop,    // medium medium
    DdfInterval::StrtD8,      // medium large
    DdfInterval::Empty,       // large  small
    DdfInterval::Empty,       // large  medium
    DdfInterval::Empty,       // large  large
];

// Indexed by 6 * class(strt) + 2 * class(stop) + (state == On).
const ECS_TABLE: [(DdfInterval, DdfState); 18] = [
    (DdfInterval::Empty, DdfState::Off),       // 0  small  small
    (DdfInterval::Empty, DdfState::Off),       // 1
    (DdfInterval::HwStartStop, DdfState::Off), // 2  small  medium
    (DdfInterval::HwStartStop, DdfState::Off), // 3
    (DdfInterval::HwStartD8, DdfState::On),    // 4  small  large
    (DdfInterval::HwStartD8, DdfState::On),    // 5
    (DdfInterval::Empty, DdfState::Off),       // 6  medium small
    (DdfInterval::Empty, DdfState::Off),       // 7
    (DdfInterval::StrtStop, DdfState::Off),    // 8  medium medium
    (DdfInterval::HwStartStop, DdfState::Off), // 9
    (DdfInterval::StrtD8, DdfState::On),       // 10 medium large
    (DdfInterval::HwStartD8, DdfState::On),    // 11
    (DdfInterval::Empty, DdfState::Off),       // 12 large  small
    (DdfInterval::Empty, DdfState::Off),       // 13
    (DdfInterval::Empty, DdfState::Off),       // 14 large  medium
    (DdfInterval::Empty, DdfState::Off),       // 15
    (DdfInterval::Empty, DdfState::Off),       // 16 large  large
    (DdfInterval::HwStartD8, DdfState::On),    // 17
];

/// Classifies a comparator position: 0 = before the left hardwired stop,
/// 1 = regular, 2 = never reached in this line.
#[must_use]
pub fn size_class(reached: Option<usize>) -> usize {
    match reached {
        None => 2,
        Some(v) if v < DDF_HW_START => 0,
        Some(_) => 1,
    }
}

#[must_use]
pub fn ocs_interval(strt: Option<usize>, stop: Option<usize>) -> DdfInterval {
    OCS_TABLE[3 * size_class(strt) + size_class(stop)]
}

#[must_use]
pub fn ecs_interval(
    strt: Option<usize>,
    stop: Option<usize>,
    state: DdfState,
) -> (DdfInterval, DdfState) {
    ECS_TABLE[6 * size_class(strt) + 2 * size_class(stop) + usize::from(state == DdfState::On)]
}

impl DdfInterval {
    /// Resolves the interval into raw `(start, stop)` comparator values.
    #[must_use]
    pub fn bounds(self, strt: Option<usize>, stop: Option<usize>) -> Option<(usize, usize)> {
        match self {
            Self::Empty => None,
            Self::StrtStop => Some((strt?, stop?)),
            Self::StrtD8 => Some((strt?, DDF_HW_STOP)),
            Self::HwStartStop => Some((DDF_HW_START, stop?)),
            Self::HwStartD8 => Some((DDF_HW_START, DDF_HW_STOP)),
        }
    }
}

/// Effective fetch window in cycles-in-line, `strt <= h < stop`.
///
/// Odd and even planes share one window. BPLCON1 scroll only moves the
/// drawing flags, never the fetch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DdfWindow {
    pub strt: usize,
    pub stop: usize,
}

impl DdfWindow {
    pub const EMPTY: Self = Self { strt: 0, stop: 0 };

    /// Low resolution: the start rounds up to the next fetch unit boundary.
    #[must_use]
    pub fn lores(strt: usize, stop: usize) -> Self {
        let strt = ((strt & !3) + 7) & !7;
        Self::with_units(strt, stop & !3)
    }

    /// High resolution: the start is taken literally.
    #[must_use]
    pub fn hires(strt: usize, stop: usize) -> Self {
        Self::with_units(strt & !3, stop & !3)
    }

    // The unit that starts at or after DDFSTOP is the last one fetched, so
    // the stop depends on where the first unit started.
    fn with_units(strt: usize, stop: usize) -> Self {
        if stop < strt {
            return Self { strt, stop: strt };
        }
        let units = ((stop - strt + 7) >> 3) + 1;
        Self {
            strt,
            stop: strt + 8 * units,
        }
    }

    #[must_use]
    pub const fn contains(&self, h: usize) -> bool {
        self.strt <= h && h < self.stop
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stop <= self.strt
    }
}
