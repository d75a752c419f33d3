//! Beam position and frame bookkeeping.
//!
//! Every timing decision in the chipset is made against a `(line, cycle)`
//! coordinate. One cycle-in-line is one DMA cycle (a color clock), which is
//! eight master clock cycles.

use serde::{Deserialize, Serialize};

use crate::config::Region;
use crate::event::{Cycle, dma_cycles};

/// DMA cycles per scanline.
pub const HPOS_CNT: usize = 227;

/// Highest cycle-in-line value (0xE2).
pub const HPOS_MAX: usize = HPOS_CNT - 1;

/// Lines in a PAL long frame.
pub const PAL_LINES_LONG: usize = 313;
/// Lines in a PAL short frame.
pub const PAL_LINES_SHORT: usize = 312;
/// Lines in an NTSC long frame.
pub const NTSC_LINES_LONG: usize = 263;
/// Lines in an NTSC short frame.
pub const NTSC_LINES_SHORT: usize = 262;

/// A beam coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Beam {
    /// Line.
    pub v: usize,
    /// Cycle in line.
    pub h: usize,
}

impl Beam {
    #[must_use]
    pub const fn new(v: usize, h: usize) -> Self {
        Self { v, h }
    }

    /// Position as a linear DMA cycle count from the start of the frame.
    #[must_use]
    pub const fn linear(self) -> i64 {
        (self.v * HPOS_CNT + self.h) as i64
    }

    /// Advances the position by `cycles` DMA cycles without wrapping lines
    /// at the end of the frame.
    #[must_use]
    pub fn add(self, cycles: i64) -> Self {
        let cycle = self.linear() + cycles;
        debug_assert!(cycle >= 0, "beam position before frame start");
        let cycle = cycle.max(0) as usize;
        Self {
            v: cycle / HPOS_CNT,
            h: cycle % HPOS_CNT,
        }
    }

    /// Number of master cycles between `self` and a later position.
    #[must_use]
    pub fn diff(self, later: Self) -> Cycle {
        dma_cycles(later.linear() - self.linear())
    }
}

/// Frame counter and long/short frame alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame number since power-on.
    pub nr: u64,
    /// Long frame flag of the current frame.
    pub lof: bool,
    /// Long frame flag of the previous frame.
    pub prev_lof: bool,
}

impl Frame {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nr: 0,
            lof: true,
            prev_lof: true,
        }
    }

    /// Lines in the current frame.
    #[must_use]
    pub const fn num_lines(&self, region: Region) -> usize {
        match (region, self.lof) {
            (Region::Pal, true) => PAL_LINES_LONG,
            (Region::Pal, false) => PAL_LINES_SHORT,
            (Region::Ntsc, true) => NTSC_LINES_LONG,
            (Region::Ntsc, false) => NTSC_LINES_SHORT,
        }
    }

    /// Index of the last line of the current frame.
    #[must_use]
    pub const fn last_line(&self, region: Region) -> usize {
        self.num_lines(region) - 1
    }

    /// Index of the last line of the previous frame.
    #[must_use]
    pub const fn prev_last_line(&self, region: Region) -> usize {
        let prev = Self {
            nr: self.nr,
            lof: self.prev_lof,
            prev_lof: self.prev_lof,
        };
        prev.last_line(region)
    }

    /// Advances to the next frame. Interlaced output alternates between
    /// long and short frames.
    pub fn next(&mut self, interlace: bool) {
        self.nr += 1;
        self.prev_lof = self.lof;
        if interlace {
            self.lof = !self.lof;
        }
    }

    /// True if this frame and the previous one differ in length.
    #[must_use]
    pub const fn is_interlaced(&self) -> bool {
        self.lof != self.prev_lof
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wraps_into_following_lines() {
        let beam = Beam::new(10, 220);
        assert_eq!(beam.add(10), Beam::new(11, 3));
        assert_eq!(beam.add(-221), Beam::new(9, 226));
    }

    #[test]
    fn diff_is_measured_in_master_cycles() {
        let a = Beam::new(0, 0);
        let b = Beam::new(1, 2);
        assert_eq!(a.diff(b), 8 * (HPOS_CNT as i64 + 2));
    }

    #[test]
    fn lof_toggles_only_when_interlaced() {
        let mut frame = Frame::new();
        assert_eq!(frame.num_lines(Region::Pal), 313);

        frame.next(false);
        assert!(frame.lof);
        assert_eq!(frame.nr, 1);

        frame.next(true);
        assert!(!frame.lof);
        assert_eq!(frame.num_lines(Region::Pal), 312);
        assert_eq!(frame.last_line(Region::Ntsc), 261);
        assert!(frame.is_interlaced());
    }
}
