//! Per-cycle bus ownership record.
//!
//! Every cycle-in-line has exactly one owner. The record is cleared at the
//! start of each line. Claims are first-come: precedence between agents is
//! already encoded in the DMA tables and in the slot dispatch order.

use serde::{Deserialize, Serialize};

use crate::beam::HPOS_CNT;

/// Agent holding the bus in a given cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BusOwner {
    #[default]
    None,
    Cpu,
    Refresh,
    Disk,
    Audio,
    /// Zero-based bitplane.
    Bitplane(u8),
    Sprite(u8),
    Copper,
    Blitter,
}

impl BusOwner {
    /// Number of statistics categories.
    pub const CATEGORIES: usize = 9;

    /// Statistics category; bitplanes and sprites are pooled.
    #[must_use]
    pub const fn category(self) -> usize {
        match self {
            Self::None => 0,
            Self::Cpu => 1,
            Self::Refresh => 2,
            Self::Disk => 3,
            Self::Audio => 4,
            Self::Bitplane(_) => 5,
            Self::Sprite(_) => 6,
            Self::Copper => 7,
            Self::Blitter => 8,
        }
    }
}

/// Bus usage counters, one per [`BusOwner::category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub usage: [u64; BusOwner::CATEGORIES],
}

impl BusStats {
    #[must_use]
    pub const fn get(&self, owner: BusOwner) -> u64 {
        self.usage[owner.category()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusArbiter {
    owner: Vec<BusOwner>,
    value: Vec<u16>,
    /// Blitter slowdown: the CPU has been waiting for the bus.
    pub bls: bool,
    /// Counters for the running frame.
    pub stats: BusStats,
    /// Counters of the last completed frame.
    pub last_frame: BusStats,
}

impl BusArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: vec![BusOwner::None; HPOS_CNT],
            value: vec![0; HPOS_CNT],
            bls: false,
            stats: BusStats::default(),
            last_frame: BusStats::default(),
        }
    }

    #[must_use]
    pub fn owner(&self, h: usize) -> BusOwner {
        self.owner[h]
    }

    /// Value transferred in cycle `h` of the current line.
    #[must_use]
    pub fn value(&self, h: usize) -> u16 {
        self.value[h]
    }

    #[must_use]
    pub fn is_free(&self, h: usize) -> bool {
        self.owner[h] == BusOwner::None
    }

    /// Claims cycle `h` if nobody owns it yet.
    pub fn claim(&mut self, h: usize, owner: BusOwner) -> bool {
        if !self.is_free(h) {
            return false;
        }
        self.owner[h] = owner;
        true
    }

    /// Overrides the owner of cycle `h`.
    pub fn set_owner(&mut self, h: usize, owner: BusOwner) {
        self.owner[h] = owner;
    }

    /// Records a completed transfer and counts it.
    pub fn record(&mut self, h: usize, owner: BusOwner, value: u16) {
        self.owner[h] = owner;
        self.value[h] = value;
        self.stats.usage[owner.category()] += 1;
    }

    pub fn count(&mut self, owner: BusOwner, n: u64) {
        self.stats.usage[owner.category()] += n;
    }

    pub fn clear_line(&mut self) {
        self.owner.fill(BusOwner::None);
    }

    pub fn end_frame(&mut self) {
        self.last_frame = self.stats;
        self.stats = BusStats::default();
    }
}

impl Default for BusArbiter {
    fn default() -> Self {
        Self::new()
    }
}
