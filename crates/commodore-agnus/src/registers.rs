//! Custom register offsets and the delayed register-change recorder.

use serde::{Deserialize, Serialize};

use crate::event::{Cycle, NEVER};

/// Custom register offsets handled by the chipset core.
pub mod reg {
    pub const DMACONR: u16 = 0x002;
    pub const VPOSR: u16 = 0x004;
    pub const VHPOSR: u16 = 0x006;
    pub const VPOSW: u16 = 0x02A;
    pub const VHPOSW: u16 = 0x02C;
    pub const COPCON: u16 = 0x02E;
    pub const BLTCON0: u16 = 0x040;
    pub const BLTCON1: u16 = 0x042;
    pub const BLTAFWM: u16 = 0x044;
    pub const BLTALWM: u16 = 0x046;
    pub const BLTCPTH: u16 = 0x048;
    pub const BLTCPTL: u16 = 0x04A;
    pub const BLTBPTH: u16 = 0x04C;
    pub const BLTBPTL: u16 = 0x04E;
    pub const BLTAPTH: u16 = 0x050;
    pub const BLTAPTL: u16 = 0x052;
    pub const BLTDPTH: u16 = 0x054;
    pub const BLTDPTL: u16 = 0x056;
    pub const BLTSIZE: u16 = 0x058;
    pub const BLTCON0L: u16 = 0x05A;
    pub const BLTSIZV: u16 = 0x05C;
    pub const BLTSIZH: u16 = 0x05E;
    pub const BLTCMOD: u16 = 0x060;
    pub const BLTBMOD: u16 = 0x062;
    pub const BLTAMOD: u16 = 0x064;
    pub const BLTDMOD: u16 = 0x066;
    pub const BLTCDAT: u16 = 0x070;
    pub const BLTBDAT: u16 = 0x072;
    pub const BLTADAT: u16 = 0x074;
    pub const DSKPTH: u16 = 0x020;
    pub const DSKPTL: u16 = 0x022;
    pub const COP1LCH: u16 = 0x080;
    pub const COP1LCL: u16 = 0x082;
    pub const COP2LCH: u16 = 0x084;
    pub const COP2LCL: u16 = 0x086;
    pub const COPJMP1: u16 = 0x088;
    pub const COPJMP2: u16 = 0x08A;
    pub const COPINS: u16 = 0x08C;
    pub const DIWSTRT: u16 = 0x08E;
    pub const DIWSTOP: u16 = 0x090;
    pub const DDFSTRT: u16 = 0x092;
    pub const DDFSTOP: u16 = 0x094;
    pub const DMACON: u16 = 0x096;
    /// First audio location register; channels are 0x10 apart.
    pub const AUD0LCH: u16 = 0x0A0;
    pub const BPL1PTH: u16 = 0x0E0;
    pub const BPLCON0: u16 = 0x100;
    pub const BPLCON1: u16 = 0x102;
    pub const BPL1MOD: u16 = 0x108;
    pub const BPL2MOD: u16 = 0x10A;
    pub const SPR0PTH: u16 = 0x120;
    pub const SPR0POS: u16 = 0x140;
}

/// Register updated by a delayed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegTarget {
    BplPtH(u8),
    BplPtL(u8),
    SprPtH(u8),
    SprPtL(u8),
    Bpl1Mod,
    Bpl2Mod,
    DdfStrt,
    DdfStop,
    DiwStrt,
    DiwStop,
    BplCon0,
    BplCon1,
    BltCon0,
    BltCon0L,
    BltCon1,
    BltSize,
    BltSizV,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegChange {
    pub trigger: Cycle,
    pub target: RegTarget,
    pub value: u16,
}

/// Pending register changes, ordered by trigger. Changes with equal
/// triggers apply in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecorder {
    changes: Vec<RegChange>,
}

impl ChangeRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            changes: Vec::with_capacity(16),
        }
    }

    pub fn insert(&mut self, trigger: Cycle, target: RegTarget, value: u16) {
        let at = self.changes.partition_point(|c| c.trigger <= trigger);
        self.changes.insert(at, RegChange { trigger, target, value });
    }

    /// Trigger of the earliest pending change.
    #[must_use]
    pub fn trigger(&self) -> Cycle {
        self.changes.first().map_or(NEVER, |c| c.trigger)
    }

    /// Removes and returns the earliest change if it is due at `cycle`.
    pub fn pop_due(&mut self, cycle: Cycle) -> Option<RegChange> {
        if self.changes.first()?.trigger <= cycle {
            Some(self.changes.remove(0))
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_pop_in_trigger_order() {
        let mut rec = ChangeRecorder::new();
        rec.insert(48, RegTarget::BplCon0, 1);
        rec.insert(16, RegTarget::DdfStrt, 2);
        rec.insert(48, RegTarget::BplCon1, 3);
        assert_eq!(rec.trigger(), 16);

        assert_eq!(rec.pop_due(8), None);
        assert_eq!(rec.pop_due(16).map(|c| c.target), Some(RegTarget::DdfStrt));
        assert_eq!(rec.pop_due(40), None);
        assert_eq!(rec.pop_due(48).map(|c| c.value), Some(1));
        assert_eq!(rec.pop_due(48).map(|c| c.value), Some(3));
        assert!(rec.is_empty());
        assert_eq!(rec.trigger(), NEVER);
    }
}
