//! Per-line DMA event tables.
//!
//! Two tables describe what happens in every cycle of a line: one for
//! bitplane DMA, one for disk, audio and sprite DMA (DAS). Each table carries
//! a parallel successor chain so the scheduler can jump straight to the next
//! active cycle. Both are derived from static templates selected by the
//! current register state.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::beam::{HPOS_CNT, HPOS_MAX};
use crate::ddf::DdfWindow;
use crate::event::{BplEvent, DasEvent};

/// DMACON bits.
pub mod dmacon {
    pub const AUD0EN: u16 = 0x0001;
    pub const AUD1EN: u16 = 0x0002;
    pub const AUD2EN: u16 = 0x0004;
    pub const AUD3EN: u16 = 0x0008;
    pub const DSKEN: u16 = 0x0010;
    pub const SPREN: u16 = 0x0020;
    pub const BLTEN: u16 = 0x0040;
    pub const COPEN: u16 = 0x0080;
    pub const BPLEN: u16 = 0x0100;
    pub const DMAEN: u16 = 0x0200;
    pub const BLTPRI: u16 = 0x0400;
    pub const BZERO: u16 = 0x2000;
    pub const BBUSY: u16 = 0x4000;
    pub const SETCLR: u16 = 0x8000;
}

/// Cycles used by memory refresh. Only the first carries an event; the
/// handler claims the rest.
pub const REFRESH_CYCLES: [usize; 4] = [0x01, 0x03, 0x05, 0xE2];

/// Entry type of a line table.
pub trait LineEvent: Copy + Default + PartialEq {
    fn is_none(self) -> bool;
}

impl LineEvent for BplEvent {
    fn is_none(self) -> bool {
        BplEvent::is_none(self)
    }
}

impl LineEvent for DasEvent {
    fn is_none(self) -> bool {
        DasEvent::is_none(self)
    }
}

/// Static templates, built once.
pub struct DmaTemplates {
    /// `[hires][planes][h]`
    bpl: Box<[[[BplEvent; HPOS_CNT]; 7]; 2]>,
    /// `[dmacon & 0x3F][h]`
    das: Box<[[DasEvent; HPOS_CNT]; 64]>,
}

impl DmaTemplates {
    fn build() -> Self {
        let mut bpl = Box::new([[[BplEvent::NONE; HPOS_CNT]; 7]; 2]);
        for planes in 0..7 {
            let lores = &mut bpl[0][planes];
            for unit in (0..=0xD8).step_by(8) {
                // Fetch order inside one lores unit.
                let slots: [(usize, BplEvent); 6] = [
                    (7, BplEvent::L1),
                    (3, BplEvent::L2),
                    (5, BplEvent::L3),
                    (1, BplEvent::L4),
                    (6, BplEvent::L5),
                    (2, BplEvent::L6),
                ];
                for (offset, event) in slots.iter().take(planes) {
                    lores[unit + offset] = *event;
                }
            }
            lores[HPOS_MAX] = BplEvent::EOL;

            let hires = &mut bpl[1][planes];
            for unit in (0..=0xD8).step_by(8) {
                let slots: [(usize, BplEvent); 4] = [
                    (3, BplEvent::H1),
                    (1, BplEvent::H2),
                    (2, BplEvent::H3),
                    (0, BplEvent::H4),
                ];
                for (offset, event) in slots.iter().take(planes.min(4)) {
                    hires[unit + offset] = *event;
                    hires[unit + offset + 4] = *event;
                }
            }
            hires[HPOS_MAX] = BplEvent::EOL;
        }

        let mut das = Box::new([[DasEvent::None; HPOS_CNT]; 64]);
        for (bits, line) in das.iter_mut().enumerate() {
            let bits = bits as u16;
            line[REFRESH_CYCLES[0]] = DasEvent::Refresh;
            if bits & dmacon::DSKEN != 0 {
                for (i, h) in [0x07, 0x09, 0x0B].into_iter().enumerate() {
                    line[h] = DasEvent::Disk(i as u8);
                }
            }
            // Audio slots exist regardless of the enable bits.
            for (i, h) in [0x0D, 0x0F, 0x11, 0x13].into_iter().enumerate() {
                line[h] = DasEvent::Audio(i as u8);
            }
            if bits & dmacon::SPREN != 0 {
                for sprite in 0..8u8 {
                    let h = 0x15 + 4 * sprite as usize;
                    line[h] = DasEvent::Sprite1(sprite);
                    line[h + 2] = DasEvent::Sprite2(sprite);
                }
            }
            line[0xDF] = DasEvent::Sdma;
            line[0x52] = DasEvent::Tick2;
            line[0x66] = DasEvent::Tick;
        }

        Self { bpl, das }
    }

    #[must_use]
    pub fn bpl(&self, hires: bool, planes: usize) -> &[BplEvent; HPOS_CNT] {
        &self.bpl[usize::from(hires)][planes.min(6)]
    }

    #[must_use]
    pub fn das(&self, bits: u16) -> &[DasEvent; HPOS_CNT] {
        &self.das[usize::from(bits & 0x3F)]
    }
}

/// Shared templates.
pub fn templates() -> &'static DmaTemplates {
    static TEMPLATES: OnceLock<DmaTemplates> = OnceLock::new();
    TEMPLATES.get_or_init(DmaTemplates::build)
}

/// Drawing-flag offsets derived from BPLCON1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scroll {
    pub lores_odd: usize,
    pub lores_even: usize,
    pub hires_odd: usize,
    pub hires_even: usize,
}

impl Scroll {
    #[must_use]
    pub const fn from_bplcon1(value: u16) -> Self {
        let b = (value & 0xFF) as usize;
        Self {
            lores_odd: (b & 0x0E) >> 1,
            lores_even: (b & 0xE0) >> 5,
            hires_odd: (b & 0x06) >> 1,
            hires_even: (b & 0x60) >> 5,
        }
    }
}

/// One line worth of events plus its successor chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLine<E> {
    events: Vec<E>,
    /// `next[h]` is the first active cycle after `h`, or 0 if there is none.
    next: Vec<u8>,
}

impl<E: LineEvent> EventLine<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: vec![E::default(); HPOS_CNT],
            next: vec![0; HPOS_CNT],
        }
    }

    #[must_use]
    pub fn get(&self, h: usize) -> E {
        self.events[h]
    }

    #[must_use]
    pub fn events(&self) -> &[E] {
        &self.events
    }

    /// Next active cycle after `h`, via the successor chain.
    #[must_use]
    pub fn next_after(&self, h: usize) -> Option<usize> {
        match self.next[h] {
            0 => None,
            n => Some(n as usize),
        }
    }

    /// Next active cycle after `h`, by scanning the events.
    #[must_use]
    pub fn scan_after(&self, h: usize) -> Option<usize> {
        (h + 1..HPOS_CNT).find(|&i| !self.events[i].is_none())
    }

    pub fn clear(&mut self) {
        self.events.fill(E::default());
        self.next.fill(0);
    }

    /// Copies `template` into cycles `first..` and refreshes the chain.
    pub fn copy_from(&mut self, template: &[E; HPOS_CNT], first: usize) {
        self.events[first..].copy_from_slice(&template[first..]);
        self.update_chain();
    }

    /// Rebuilds the successor chain over the whole line.
    pub fn update_chain(&mut self) {
        let mut next = 0u8;
        for i in (0..HPOS_CNT).rev() {
            self.next[i] = next;
            if !self.events[i].is_none() {
                next = i as u8;
            }
        }
    }
}

impl<E: LineEvent> Default for EventLine<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLine<BplEvent> {
    /// Rewrites cycles `first..` of the bitplane line.
    ///
    /// `planes` is the number of fetched planes (0 disables fetches),
    /// `window` the fetch window of the active resolution. Earlier cycles
    /// keep their events.
    pub fn rebuild(&mut self, first: usize, hires: bool, planes: usize, window: DdfWindow, scroll: Scroll) {
        let template = templates().bpl(hires, planes);
        for h in first..HPOS_MAX {
            self.events[h] = if window.contains(h) {
                template[h]
            } else {
                BplEvent::NONE
            };
        }
        self.events[HPOS_MAX] = BplEvent::EOL;

        let (odd, even, step) = if hires {
            (scroll.hires_odd, scroll.hires_even, 4)
        } else {
            (scroll.lores_odd, scroll.lores_even, 8)
        };
        for h in (odd..HPOS_CNT).step_by(step).filter(|h| *h >= first) {
            self.events[h] = self.events[h].with_flags(BplEvent::DRAW_ODD);
        }
        for h in (even..HPOS_CNT).step_by(step).filter(|h| *h >= first) {
            self.events[h] = self.events[h].with_flags(BplEvent::DRAW_EVEN);
        }
        self.update_chain();
    }

    /// True if cycle `h` fetches zero-based plane `plane`.
    #[must_use]
    pub fn fetches_plane(&self, h: usize, plane: usize) -> bool {
        self.events[h].plane() == Some(plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lores_template_matches_fetch_order() {
        let t = templates().bpl(false, 6);
        assert_eq!(t[0x3F], BplEvent::L1);
        assert_eq!(t[0x3B], BplEvent::L2);
        assert_eq!(t[0x3D], BplEvent::L3);
        assert_eq!(t[0x39], BplEvent::L4);
        assert_eq!(t[0x3E], BplEvent::L5);
        assert_eq!(t[0x3A], BplEvent::L6);
        assert!(t[0x38].is_none());
        assert!(t[0x3C].is_none());
        assert_eq!(t[HPOS_MAX], BplEvent::EOL);

        let two = templates().bpl(false, 2);
        assert!(two[0x3D].is_none());
        assert_eq!(two[0x3B], BplEvent::L2);
    }

    #[test]
    fn hires_caps_at_four_planes() {
        assert_eq!(templates().bpl(true, 6), templates().bpl(true, 4));
        let t = templates().bpl(true, 4);
        assert_eq!(t[0x38], BplEvent::H4);
        assert_eq!(t[0x3C], BplEvent::H4);
        assert_eq!(t[0x3B], BplEvent::H1);
        assert_eq!(t[0x3F], BplEvent::H1);
    }

    #[test]
    fn das_template_follows_enable_bits() {
        let off = templates().das(0);
        assert_eq!(off[0x01], DasEvent::Refresh);
        assert_eq!(off[0x0D], DasEvent::Audio(0));
        assert!(off[0x07].is_none());
        assert!(off[0x15].is_none());

        let all = templates().das(dmacon::DSKEN | dmacon::SPREN);
        assert_eq!(all[0x09], DasEvent::Disk(1));
        assert_eq!(all[0x15], DasEvent::Sprite1(0));
        assert_eq!(all[0x33], DasEvent::Sprite2(7));
        assert_eq!(all[0xDF], DasEvent::Sdma);
    }

    #[test]
    fn chain_skips_to_next_active_cycle() {
        let mut line = EventLine::<DasEvent>::new();
        line.copy_from(templates().das(0), 0);
        assert_eq!(line.next_after(0), Some(0x01));
        assert_eq!(line.next_after(0x01), Some(0x0D));
        assert_eq!(line.next_after(0x13), Some(0x52));
        assert_eq!(line.next_after(0xDF), None);
    }

    #[test]
    fn rebuild_only_touches_later_cycles() {
        let mut line = EventLine::<BplEvent>::new();
        let window = DdfWindow::lores(0x38, 0xD0);
        line.rebuild(0, false, 4, window, Scroll::default());
        assert_eq!(line.get(0x39).kind(), BplEvent::L4);

        line.rebuild(0x60, false, 1, window, Scroll::default());
        assert_eq!(line.get(0x39).kind(), BplEvent::L4);
        assert!(line.get(0x61).kind().is_none());
        assert_eq!(line.get(0x67).kind(), BplEvent::L1);
    }

    #[test]
    fn scroll_places_drawing_flags() {
        let mut line = EventLine::<BplEvent>::new();
        line.rebuild(0, false, 0, DdfWindow::EMPTY, Scroll::from_bplcon1(0x0032));
        // Odd scroll 1, even scroll 1.
        assert!(line.get(1).draw_odd());
        assert!(line.get(9).draw_even());
        assert!(!line.get(8).draw_odd());
        assert_eq!(line.next_after(0), Some(1));
    }
}
