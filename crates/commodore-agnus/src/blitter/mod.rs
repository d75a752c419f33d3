//! Blitter - block transfer and line drawing.
//!
//! A blit starts when BLTSIZE (or ECS BLTSIZH) is written. The BLT slot
//! then runs through two start states before the selected engine takes
//! over:
//!
//! ```text
//! BLTSIZE ─1─> STRT1 ─1─> STRT2 ─┬─> fast blit ─2─> FAST_END      (level 0)
//!                                ├─> fast blit ─1─> COPY/LINE_FAKE (level 1)
//!                                └─> COPY_SLOW / fast line + LINE_FAKE
//!                                                                  (level 2)
//! ```
//!
//! The micro-program states stay due until their last instruction ends the
//! blit, so the slot fires in every cycle and each instruction retries
//! while the bus is taken.

mod fast;
pub mod logic;
pub mod microcode;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::agnus::Agnus;
use crate::bus::BusOwner;
use crate::config::BlitterAccuracy;
use crate::copper::Copper;
use crate::event::{BltEvent, EventId, NEVER, SlotId};
use crate::host::{Accessor, Host, Irq};
use crate::registers::RegTarget;
use microcode::{COPY, LINE};

/// Delay between the fast blit and its completion.
const FAST_END_DELAY: i64 = 2;

/// Source or destination channel of the Blitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blitter {
    pub bltcon0: u16,
    pub bltcon1: u16,

    pub bltapt: u32,
    pub bltbpt: u32,
    pub bltcpt: u32,
    pub bltdpt: u32,

    pub bltafwm: u16,
    pub bltalwm: u16,

    /// Width in words and height in lines.
    pub bltsize_h: u16,
    pub bltsize_v: u16,

    pub bltamod: i16,
    pub bltbmod: i16,
    pub bltcmod: i16,
    pub bltdmod: i16,

    // Pipeline
    pub anew: u16,
    pub bnew: u16,
    pub aold: u16,
    pub bold: u16,
    pub ahold: u16,
    pub bhold: u16,
    pub chold: u16,
    pub dhold: u16,

    /// Micro-program counter.
    pub bltpc: u16,
    /// Completed loop iterations of the running blit.
    pub iteration: u32,

    x_counter: u16,
    y_counter: u16,
    cnt_a: u16,
    cnt_b: u16,
    cnt_c: u16,
    cnt_d: u16,

    fill_carry: bool,
    /// First/last word mask of the current iteration.
    mask: u16,
    /// D stays locked until the first word has passed the pipeline.
    lock_d: bool,

    running: bool,
    bbusy: bool,
    bzero: bool,
    /// The Blitter interrupt of the running blit was raised.
    birq: bool,
}

impl Blitter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bltcon0: 0,
            bltcon1: 0,
            bltapt: 0,
            bltbpt: 0,
            bltcpt: 0,
            bltdpt: 0,
            bltafwm: 0,
            bltalwm: 0,
            bltsize_h: 0,
            bltsize_v: 0,
            bltamod: 0,
            bltbmod: 0,
            bltcmod: 0,
            bltdmod: 0,
            anew: 0,
            bnew: 0,
            aold: 0,
            bold: 0,
            ahold: 0,
            bhold: 0,
            chold: 0,
            dhold: 0,
            bltpc: 0,
            iteration: 0,
            x_counter: 0,
            y_counter: 0,
            cnt_a: 0,
            cnt_b: 0,
            cnt_c: 0,
            cnt_d: 0,
            fill_carry: false,
            mask: 0xFFFF,
            lock_d: false,
            running: false,
            bbusy: false,
            bzero: false,
            birq: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    //
    // Status
    //

    /// BBUSY. Drops one instruction ahead of the actual end of the blit.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.bbusy
    }

    /// BZERO: no bit was set in any result word.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.bzero
    }

    /// True from the start of a blit until its last cycle.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.running
    }

    //
    // Control bits
    //

    #[must_use]
    pub const fn ash(&self) -> u16 {
        self.bltcon0 >> 12
    }

    #[must_use]
    pub const fn bsh(&self) -> u16 {
        self.bltcon1 >> 12
    }

    /// Channel enable bits USEA..USED, A in bit 3.
    #[must_use]
    pub const fn channel_mask(&self) -> usize {
        ((self.bltcon0 >> 8) & 0xF) as usize
    }

    const fn use_a(&self) -> bool {
        self.bltcon0 & 0x0800 != 0
    }

    const fn use_b(&self) -> bool {
        self.bltcon0 & 0x0400 != 0
    }

    const fn use_c(&self) -> bool {
        self.bltcon0 & 0x0200 != 0
    }

    const fn use_d(&self) -> bool {
        self.bltcon0 & 0x0100 != 0
    }

    const fn minterm_select(&self) -> u8 {
        self.bltcon0 as u8
    }

    const fn efe(&self) -> bool {
        self.bltcon1 & 0x0010 != 0
    }

    const fn fci(&self) -> bool {
        self.bltcon1 & 0x0004 != 0
    }

    const fn desc(&self) -> bool {
        self.bltcon1 & 0x0002 != 0
    }

    #[must_use]
    pub const fn line_mode(&self) -> bool {
        self.bltcon1 & 0x0001 != 0
    }

    /// Inclusive or exclusive fill is enabled.
    #[must_use]
    pub const fn fill_enabled(&self) -> bool {
        self.bltcon1 & 0x0018 != 0
    }

    //
    // Registers
    //

    pub fn poke_bltcon0(&mut self, agnus: &mut Agnus, value: u16) {
        agnus.record_change(2, RegTarget::BltCon0, value);
    }

    /// ECS only: replaces the minterm byte.
    pub fn poke_bltcon0l(&mut self, agnus: &mut Agnus, value: u16) {
        if agnus.is_ecs() {
            agnus.record_change(2, RegTarget::BltCon0L, value);
        }
    }

    pub fn poke_bltcon1(&mut self, agnus: &mut Agnus, value: u16) {
        agnus.record_change(2, RegTarget::BltCon1, value);
    }

    pub fn poke_pointer(&mut self, channel: Channel, value: u16, high: bool) {
        if self.running {
            trace!("BLT{channel:?}PT written while the Blitter is running");
        }
        let ptr = match channel {
            Channel::A => &mut self.bltapt,
            Channel::B => &mut self.bltbpt,
            Channel::C => &mut self.bltcpt,
            Channel::D => &mut self.bltdpt,
        };
        *ptr = if high {
            (*ptr & 0x0000_FFFF) | (u32::from(value) << 16)
        } else {
            (*ptr & 0xFFFF_0000) | u32::from(value & 0xFFFE)
        };
    }

    pub fn poke_modulo(&mut self, channel: Channel, value: u16) {
        let value = (value & 0xFFFE) as i16;
        match channel {
            Channel::A => self.bltamod = value,
            Channel::B => self.bltbmod = value,
            Channel::C => self.bltcmod = value,
            Channel::D => self.bltdmod = value,
        }
    }

    pub fn poke_bltafwm(&mut self, value: u16) {
        self.bltafwm = value;
    }

    pub fn poke_bltalwm(&mut self, value: u16) {
        self.bltalwm = value;
    }

    pub fn poke_bltadat(&mut self, value: u16) {
        self.anew = value;
    }

    pub fn poke_bltbdat(&mut self, value: u16) {
        self.bnew = value;
    }

    pub fn poke_bltcdat(&mut self, value: u16) {
        self.chold = value;
    }

    /// BLTSIZE. A Copper write lands one cycle late, a CPU write at once.
    pub fn poke_bltsize(&mut self, agnus: &mut Agnus, accessor: Accessor, value: u16) {
        match accessor {
            Accessor::Copper => agnus.record_change(1, RegTarget::BltSize, value),
            Accessor::Cpu => self.set_bltsize(agnus, value),
        }
    }

    fn set_bltsize(&mut self, agnus: &mut Agnus, value: u16) {
        self.bltsize_v = match value >> 6 {
            0 => 0x0400,
            v => v,
        };
        self.bltsize_h = match value & 0x3F {
            0 => 0x0040,
            h => h,
        };
        if agnus.events.has_event(SlotId::Blt) {
            trace!("BLTSIZE overrides {:?}", agnus.events.id(SlotId::Blt));
        }
        agnus.schedule_rel(SlotId::Blt, 1, EventId::Blt(BltEvent::Strt1));
    }

    /// ECS only: big blit height.
    pub fn poke_bltsizv(&mut self, agnus: &mut Agnus, value: u16) {
        if agnus.is_ecs() {
            agnus.record_change(2, RegTarget::BltSizV, value);
        }
    }

    /// ECS only: big blit width. Starts the blit.
    pub fn poke_bltsizh(&mut self, agnus: &mut Agnus, value: u16) {
        if !agnus.is_ecs() {
            return;
        }
        self.bltsize_h = match value & 0x07FF {
            0 => 0x0800,
            h => h,
        };
        if self.bltsize_v == 0 {
            self.bltsize_v = 0x8000;
        }
        agnus.schedule_rel(SlotId::Blt, 1, EventId::Blt(BltEvent::Strt1));
    }

    /// Applies a delayed Blitter register change.
    pub fn apply_change(&mut self, agnus: &mut Agnus, target: RegTarget, value: u16) {
        match target {
            RegTarget::BltCon0 => self.bltcon0 = value,
            RegTarget::BltCon0L => self.bltcon0 = (self.bltcon0 & 0xFF00) | (value & 0x00FF),
            RegTarget::BltCon1 => self.bltcon1 = value,
            RegTarget::BltSize => self.set_bltsize(agnus, value),
            RegTarget::BltSizV => self.bltsize_v = value & 0x7FFF,
            _ => {}
        }
    }

    //
    // Event handler
    //

    pub fn service_event<H: Host>(&mut self, agnus: &mut Agnus, copper: &mut Copper, host: &mut H) {
        let EventId::Blt(event) = agnus.events.id(SlotId::Blt) else {
            return;
        };

        match event {
            BltEvent::Strt1 => {
                self.prepare_blit();
                // Waits for DMACON. Enabling Blitter DMA restarts this state.
                if !agnus.bltdma() {
                    agnus.events.reschedule_abs(SlotId::Blt, NEVER);
                } else if agnus.bus_is_free(BusOwner::Blitter) {
                    agnus.schedule_rel(SlotId::Blt, 1, EventId::Blt(BltEvent::Strt2));
                }
            }
            BltEvent::Strt2 => {
                if agnus.bus_is_free(BusOwner::Blitter) {
                    self.begin_blit(agnus, host);
                }
            }
            BltEvent::CopySlow => {
                let program = &COPY[self.channel_mask()][usize::from(self.fill_enabled())];
                match program.get(usize::from(self.bltpc)) {
                    Some(&op) => self.exec(op, agnus, copper, host),
                    None => self.end_blit(agnus, copper),
                }
            }
            BltEvent::CopyFake => {
                let program = &COPY[self.channel_mask()][usize::from(self.fill_enabled())];
                match program.get(usize::from(self.bltpc)) {
                    Some(&op) => self.fake_exec(op, agnus, copper, host),
                    None => self.end_blit(agnus, copper),
                }
            }
            BltEvent::LineFake => match LINE.get(usize::from(self.bltpc)) {
                Some(&op) => self.fake_exec(op, agnus, copper, host),
                None => self.end_blit(agnus, copper),
            },
            BltEvent::FastEnd => {
                self.signal_end(host);
                self.end_blit(agnus, copper);
            }
        }
    }

    fn prepare_blit(&mut self) {
        self.cnt_a = self.bltsize_h;
        self.cnt_b = self.bltsize_h;
        self.cnt_c = self.bltsize_h;
        self.cnt_d = self.bltsize_h;

        self.running = true;
        self.bzero = true;
        self.bbusy = true;
        self.birq = false;

        self.bltpc = 0;
        self.iteration = 0;
    }

    fn begin_blit<H: Host>(&mut self, agnus: &mut Agnus, host: &mut H) {
        let accuracy = agnus.config.blitter_accuracy;
        let ptr_mask = agnus.config.revision.ptr_mask();
        debug!(
            "{} blit {}x{} con0 {:#06x} con1 {:#06x} at ({}, {:#x}), {accuracy:?}",
            if self.line_mode() { "line" } else { "copy" },
            self.bltsize_h,
            self.bltsize_v,
            self.bltcon0,
            self.bltcon1,
            agnus.pos.v,
            agnus.pos.h,
        );

        let next = if self.line_mode() {
            self.do_fast_line_blit(host, ptr_mask);
            if accuracy == BlitterAccuracy::Fast {
                (FAST_END_DELAY, BltEvent::FastEnd)
            } else {
                // There is no cycle-exact line engine. The bus pattern is
                // replayed after the result is in memory.
                self.bltsize_h = 1;
                self.reset_x_counter();
                self.y_counter = self.bltsize_v;
                (1, BltEvent::LineFake)
            }
        } else {
            match accuracy {
                BlitterAccuracy::Fast => {
                    self.do_fast_copy_blit(host, ptr_mask);
                    (FAST_END_DELAY, BltEvent::FastEnd)
                }
                BlitterAccuracy::Fake => {
                    self.do_fast_copy_blit(host, ptr_mask);
                    self.reset_x_counter();
                    self.y_counter = self.bltsize_v;
                    self.lock_d = true;
                    (1, BltEvent::CopyFake)
                }
                BlitterAccuracy::Slow => {
                    self.reset_x_counter();
                    self.y_counter = self.bltsize_v;
                    self.aold = 0;
                    self.bold = 0;
                    self.fill_carry = self.fci();
                    self.lock_d = true;
                    (1, BltEvent::CopySlow)
                }
            }
        };
        agnus.schedule_rel(SlotId::Blt, next.0, EventId::Blt(next.1));
    }

    // BBUSY drops and the interrupt fires once per blit.
    fn signal_end<H: Host>(&mut self, host: &mut H) {
        if !self.birq {
            self.bbusy = false;
            host.raise_irq(Irq::Blit);
            self.birq = true;
        }
    }

    fn end_blit(&mut self, agnus: &mut Agnus, copper: &mut Copper) {
        trace!("blit ends at ({}, {:#x})", agnus.pos.v, agnus.pos.h);
        self.running = false;
        agnus.events.cancel(SlotId::Blt);
        copper.blitter_did_terminate(agnus);
    }

    //
    // Loop counters
    //

    fn set_x_counter(&mut self, value: u16) {
        self.x_counter = value;
        self.mask = 0xFFFF;
        if value == self.bltsize_h {
            self.mask &= self.bltafwm;
        }
        if value == 1 {
            self.mask &= self.bltalwm;
        }
    }

    fn reset_x_counter(&mut self) {
        self.set_x_counter(self.bltsize_h);
    }
}

impl Default for Blitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChipsetConfig;
    use crate::dma::dmacon;
    use crate::host::ChipRam;

    struct Rig {
        agnus: Agnus,
        copper: Copper,
        blitter: Blitter,
        ram: ChipRam,
    }

    impl Rig {
        fn new(accuracy: BlitterAccuracy) -> Self {
            let config = ChipsetConfig {
                blitter_accuracy: accuracy,
                ..ChipsetConfig::a500()
            };
            let mut agnus = Agnus::new(config);
            // Stay clear of the refresh slots at the start of the line.
            agnus.clock = 0x40 * 8;
            agnus.pos.h = 0x40;
            agnus.poke_dmacon(dmacon::SETCLR | dmacon::DMAEN | dmacon::BLTEN);
            Self {
                agnus,
                copper: Copper::new(),
                blitter: Blitter::new(),
                ram: ChipRam::new(0x8_0000),
            }
        }

        // Only the BLT and REG slots are serviced.
        fn step(&mut self) {
            let clock = self.agnus.clock;
            while let Some(change) = self.agnus.recorder.pop_due(clock) {
                self.blitter.apply_change(&mut self.agnus, change.target, change.value);
            }
            if self.agnus.events.is_due(SlotId::Blt, clock) {
                self.blitter
                    .service_event(&mut self.agnus, &mut self.copper, &mut self.ram);
            }
            self.agnus.advance();
        }

        fn event(&self) -> EventId {
            self.agnus.events.id(SlotId::Blt)
        }
    }

    #[test]
    fn zero_size_means_maximum() {
        let mut rig = Rig::new(BlitterAccuracy::Slow);
        rig.blitter.poke_bltsize(&mut rig.agnus, Accessor::Cpu, 0);
        assert_eq!((rig.blitter.bltsize_h, rig.blitter.bltsize_v), (64, 1024));
        rig.blitter
            .poke_bltsize(&mut rig.agnus, Accessor::Cpu, (3 << 6) | 5);
        assert_eq!((rig.blitter.bltsize_h, rig.blitter.bltsize_v), (5, 3));
    }

    #[test]
    fn copper_bltsize_lands_one_cycle_late() {
        let mut rig = Rig::new(BlitterAccuracy::Slow);
        rig.blitter
            .poke_bltsize(&mut rig.agnus, Accessor::Copper, (1 << 6) | 1);
        assert!(!rig.agnus.events.has_event(SlotId::Blt));
        rig.step();
        rig.step();
        assert_eq!(rig.event(), EventId::Blt(BltEvent::Strt1));
        assert_eq!(rig.blitter.bltsize_h, 1);
    }

    #[test]
    fn ecs_size_registers_are_ignored_on_ocs() {
        let mut rig = Rig::new(BlitterAccuracy::Slow);
        rig.blitter.poke_bltsizh(&mut rig.agnus, 0x10);
        assert!(!rig.agnus.events.has_event(SlotId::Blt));
        rig.blitter.poke_bltcon0l(&mut rig.agnus, 0xCA);
        assert!(rig.agnus.recorder.is_empty());
    }

    #[test]
    fn blit_waits_for_dma() {
        let mut rig = Rig::new(BlitterAccuracy::Fast);
        rig.agnus.poke_dmacon(dmacon::BLTEN);
        rig.blitter.poke_bltsize(&mut rig.agnus, Accessor::Cpu, (1 << 6) | 1);
        rig.step();
        rig.step();
        assert_eq!(rig.event(), EventId::Blt(BltEvent::Strt1));
        assert_eq!(rig.agnus.events.trigger(SlotId::Blt), NEVER);
        assert!(rig.blitter.is_busy());

        rig.agnus.poke_dmacon(dmacon::SETCLR | dmacon::BLTEN);
        assert!(rig.agnus.events.is_due(SlotId::Blt, rig.agnus.clock));
    }

    #[test]
    fn fast_blit_completes_two_cycles_after_start() {
        let mut rig = Rig::new(BlitterAccuracy::Fast);
        rig.ram.load(0x1000, &[0x1234]);
        rig.blitter.bltcon0 = 0x09F0;
        rig.blitter.bltafwm = 0xFFFF;
        rig.blitter.bltalwm = 0xFFFF;
        rig.blitter.bltapt = 0x1000;
        rig.blitter.bltdpt = 0x2000;
        rig.blitter.poke_bltsize(&mut rig.agnus, Accessor::Cpu, (1 << 6) | 1);

        // Idle, STRT1, STRT2. The blit happens in STRT2.
        for _ in 0..3 {
            rig.step();
        }
        assert_eq!(rig.ram.peek(0x2000), 0x1234);
        assert!(rig.blitter.is_busy());
        rig.step();
        assert!(rig.blitter.is_busy());
        // FAST_END
        rig.step();
        assert!(!rig.blitter.is_busy());
        assert!(!rig.blitter.is_active());
        assert!(!rig.blitter.is_zero());
        assert!(!rig.agnus.events.has_event(SlotId::Blt));
    }

    #[test]
    fn fake_blit_claims_the_bus_without_writing() {
        let mut rig = Rig::new(BlitterAccuracy::Fake);
        rig.ram.load(0x1000, &[0xAAAA, 0x5555]);
        rig.blitter.bltcon0 = 0x09F0;
        rig.blitter.bltafwm = 0xFFFF;
        rig.blitter.bltalwm = 0xFFFF;
        rig.blitter.bltapt = 0x1000;
        rig.blitter.bltdpt = 0x2000;
        rig.blitter.poke_bltsize(&mut rig.agnus, Accessor::Cpu, (1 << 6) | 2);

        rig.step();
        rig.step();
        rig.step();
        // The data is already there when the bus pattern starts.
        assert_eq!(rig.ram.peek(0x2002), 0x5555);
        let first = rig.agnus.pos.h;
        while rig.blitter.is_active() {
            rig.step();
        }
        // FETCH_A, WRITE_D (locked), FETCH_A, WRITE_D, HOLD_D, WRITE_D.
        assert_eq!(rig.agnus.pos.h - first, 6);
        let owners: Vec<BusOwner> = (first..first + 6).map(|h| rig.agnus.bus.owner(h)).collect();
        assert_eq!(
            owners,
            [
                BusOwner::Blitter,
                BusOwner::None,
                BusOwner::Blitter,
                BusOwner::Blitter,
                BusOwner::None,
                BusOwner::Blitter
            ]
        );
        assert_eq!(rig.agnus.bus.value(first), 0x8888);
    }

    #[test]
    fn interrupt_fires_once() {
        #[derive(Default)]
        struct Irqs(usize);
        impl Host for Irqs {
            fn read_word(&mut self, _: BusOwner, _: u32) -> u16 {
                0
            }
            fn write_word(&mut self, _: BusOwner, _: u32, _: u16) {}
            fn raise_irq(&mut self, irq: Irq) {
                assert_eq!(irq, Irq::Blit);
                self.0 += 1;
            }
        }

        let mut rig = Rig::new(BlitterAccuracy::Slow);
        let mut host = Irqs::default();
        rig.blitter.bltcon0 = 0x0100;
        rig.blitter.poke_bltsize(&mut rig.agnus, Accessor::Cpu, (2 << 6) | 2);
        while rig.agnus.events.has_event(SlotId::Blt) {
            let clock = rig.agnus.clock;
            if rig.agnus.events.is_due(SlotId::Blt, clock) {
                rig.blitter
                    .service_event(&mut rig.agnus, &mut rig.copper, &mut host);
            }
            rig.agnus.advance();
        }
        assert_eq!(host.0, 1);
        assert!(rig.blitter.is_zero());
    }

    #[test]
    fn delayed_bltcon_writes() {
        let mut rig = Rig::new(BlitterAccuracy::Slow);
        rig.blitter.poke_bltcon0(&mut rig.agnus, 0x0FCA);
        rig.blitter.poke_bltcon1(&mut rig.agnus, 0x0002);
        rig.step();
        assert_eq!(rig.blitter.bltcon0, 0);
        rig.step();
        rig.step();
        assert_eq!(rig.blitter.bltcon0, 0x0FCA);
        assert!(rig.blitter.desc());
    }

    #[test]
    fn pointer_and_modulo_writes_clear_bit_zero() {
        let mut blt = Blitter::new();
        blt.poke_pointer(Channel::C, 0x0007, true);
        blt.poke_pointer(Channel::C, 0x1235, false);
        assert_eq!(blt.bltcpt, 0x0007_1234);
        blt.poke_modulo(Channel::D, 0xFFFF);
        assert_eq!(blt.bltdmod, -2);
    }
}
