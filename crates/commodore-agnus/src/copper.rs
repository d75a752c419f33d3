//! Copper - coprocessor for beam-synchronized register updates.
//!
//! The Copper runs as a chain of events in the COP slot, one state per bus
//! cycle. Every state that touches the bus re-checks it and retries one
//! cycle later when it is taken.
//!
//! ```text
//!             MOVE            WAIT            SKIP
//! Bit     ir1    ir2      ir1    ir2      ir1    ir2
//!  15      x    DW15      VP7    BFD      VP7    BFD
//! 14-8     x   DW14-8    VP6-0  VM6-0    VP6-0  VM6-0
//!  7-1   RA7-1  DW7-1    HP8-2  HM8-2    HP8-2  HM8-2
//!   0      0     DW0       1      0        1      1
//! ```

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::agnus::Agnus;
use crate::beam::{Beam, HPOS_CNT};
use crate::bus::BusOwner;
use crate::event::{CopEvent, EventId, NEVER, SlotId, dma_cycles};
use crate::host::Host;
use crate::registers::reg;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Copper {
    /// Active list (1 or 2).
    pub list: u8,
    pub cop1lc: u32,
    pub cop2lc: u32,
    /// Highest address fetched from each list in this session.
    pub cop1end: u32,
    pub cop2end: u32,
    pub pc: u32,
    pub ir1: u16,
    pub ir2: u16,
    /// Set by a SKIP whose condition held; the next MOVE is not executed.
    pub skip: bool,
    /// COPCON CDANG.
    pub danger: bool,
    /// Copper DMA was on at the last vertical blank restart. While false,
    /// COP1LC writes go straight to the program counter.
    pub active_in_this_frame: bool,
}

impl Copper {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            list: 1,
            cop1lc: 0,
            cop2lc: 0,
            cop1end: 0,
            cop2end: 0,
            pc: 0,
            ir1: 0,
            ir2: 0,
            skip: false,
            danger: false,
            active_in_this_frame: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    //
    // Instruction decoding
    //

    #[must_use]
    pub const fn is_move(&self) -> bool {
        self.ir1 & 1 == 0
    }

    #[must_use]
    pub const fn is_wait(&self) -> bool {
        !self.is_move() && self.ir2 & 1 == 0
    }

    /// Blitter-finished-disable: a WAIT or SKIP ignores the Blitter.
    #[must_use]
    pub const fn bfd(&self) -> bool {
        self.ir2 & 0x8000 != 0
    }

    const fn vphp(&self) -> u16 {
        self.ir1 & 0xFFFE
    }

    const fn vmhm(&self) -> u16 {
        self.ir2 & 0x7FFE
    }

    /// True if a MOVE to `addr` halts the Copper.
    #[must_use]
    pub fn is_illegal_address(&self, addr: u16, ecs: bool) -> bool {
        let addr = addr & 0x1FE;
        if self.danger {
            !ecs && addr < 0x40
        } else {
            addr < 0x80
        }
    }

    //
    // Register interface
    //

    pub fn poke_copcon(&mut self, value: u16) {
        self.danger = value & 0b10 != 0;
    }

    pub fn poke_cop1lch(&mut self, value: u16) {
        let lc = (self.cop1lc & 0x0000_FFFF) | (u32::from(value) << 16);
        self.set_cop1lc(lc);
    }

    pub fn poke_cop1lcl(&mut self, value: u16) {
        let lc = (self.cop1lc & 0xFFFF_0000) | u32::from(value & 0xFFFE);
        self.set_cop1lc(lc);
    }

    fn set_cop1lc(&mut self, lc: u32) {
        if lc != self.cop1lc {
            self.cop1lc = lc;
            if !self.active_in_this_frame {
                self.pc = lc;
            }
        }
    }

    pub fn poke_cop2lch(&mut self, value: u16) {
        self.cop2lc = (self.cop2lc & 0x0000_FFFF) | (u32::from(value) << 16);
    }

    pub fn poke_cop2lcl(&mut self, value: u16) {
        self.cop2lc = (self.cop2lc & 0xFFFF_0000) | u32::from(value & 0xFFFE);
    }

    /// COPJMP1/COPJMP2 strobe by the CPU. Copper writes go through the
    /// JMP states instead.
    pub fn poke_copjmp(&mut self, agnus: &mut Agnus, list: u8) {
        self.switch_to_list(list);
        schedule(agnus, CopEvent::ReqDma, 0);
    }

    fn switch_to_list(&mut self, list: u8) {
        self.list = list;
        self.pc = if list == 1 { self.cop1lc } else { self.cop2lc };
        debug!("copper list {list} at {:#08x}", self.pc);
    }

    fn advance_pc(&mut self) {
        self.pc = self.pc.wrapping_add(2);
    }

    fn fetch<H: Host>(&mut self, agnus: &mut Agnus, host: &mut H) -> u16 {
        let value = agnus.dma_read(host, BusOwner::Copper, self.pc);
        self.advance_pc();
        value
    }

    //
    // Event handler
    //

    /// Services the COP slot. Returns the register write of a completed MOVE
    /// as `(register, value)`; the caller routes it.
    pub fn service_event<H: Host>(
        &mut self,
        agnus: &mut Agnus,
        host: &mut H,
        blitter_active: bool,
    ) -> Option<(u16, u16)> {
        let EventId::Cop(event) = agnus.events.id(SlotId::Cop) else {
            return None;
        };
        trace!("{event:?} at ({}, {:#x})", agnus.pos.v, agnus.pos.h);

        match event {
            CopEvent::ReqDma | CopEvent::WakeUp => {
                if !agnus.bus_is_free(BusOwner::Copper) || agnus.pos.h % 2 == 1 {
                    reschedule(agnus);
                } else {
                    schedule(agnus, CopEvent::Fetch, 2);
                }
            }
            CopEvent::WakeUpBlit => {
                if blitter_active {
                    park(agnus, CopEvent::WaitBlit);
                } else if !agnus.bus_is_free(BusOwner::Copper) || agnus.pos.h % 2 == 1 {
                    reschedule(agnus);
                } else {
                    schedule(agnus, CopEvent::Fetch, 2);
                }
            }
            CopEvent::Fetch => {
                if !agnus.bus_is_free(BusOwner::Copper) {
                    reschedule(agnus);
                    return None;
                }
                self.ir1 = self.fetch(agnus, host);
                if self.list == 1 {
                    self.cop1end = self.cop1end.max(self.pc);
                } else {
                    self.cop2end = self.cop2end.max(self.pc);
                }
                let next = if self.is_move() { CopEvent::Move } else { CopEvent::WaitOrSkip };
                schedule(agnus, next, 2);
            }
            CopEvent::Move => return self.service_move(agnus, host),
            CopEvent::WaitOrSkip => {
                if !agnus.bus_is_free(BusOwner::Copper) {
                    reschedule(agnus);
                    return None;
                }
                self.ir2 = self.fetch(agnus, host);
                let next = if self.is_wait() { CopEvent::Wait1 } else { CopEvent::Skip1 };
                schedule(agnus, next, 2);
            }
            CopEvent::Wait1 | CopEvent::Skip1 => {
                if !agnus.bus_is_free(BusOwner::Copper) {
                    reschedule(agnus);
                } else {
                    let next = if event == CopEvent::Wait1 { CopEvent::Wait2 } else { CopEvent::Skip2 };
                    schedule(agnus, next, 2);
                }
            }
            CopEvent::Wait2 => {
                self.skip = false;
                if !self.bfd() && blitter_active {
                    park(agnus, CopEvent::WaitBlit);
                } else if !agnus.bus_is_free(BusOwner::Copper) || agnus.pos.h == 0xE1 {
                    // Cycle 0xE1 is blocked in this state.
                    reschedule(agnus);
                } else {
                    self.schedule_wait_wakeup(agnus, self.bfd());
                }
            }
            CopEvent::WaitBlit => self.service_wait_blit(agnus),
            CopEvent::Skip2 => {
                if !agnus.bus_is_free(BusOwner::Copper) || agnus.pos.h == 0xE1 {
                    reschedule(agnus);
                    return None;
                }
                // The comparator looks at the position of the next fetch.
                let beam = agnus.pos.add(2);
                self.skip = comparator(beam, self.vphp(), self.vmhm());
                if !self.bfd() {
                    self.skip &= !blitter_active;
                }
                schedule(agnus, CopEvent::Fetch, 2);
            }
            CopEvent::Jmp1 => {
                // The bus is not used but still allocated.
                let _ = agnus.allocate_bus(BusOwner::Copper);
                // From 0xE0 the Copper continues in 0xE1.
                let delay = if agnus.pos.h == 0xE0 { 1 } else { 2 };
                schedule(agnus, CopEvent::Jmp2, delay);
            }
            CopEvent::Jmp2 => {
                if !agnus.bus_is_free(BusOwner::Copper) {
                    reschedule(agnus);
                    return None;
                }
                let list = if agnus.events.data(SlotId::Cop) == 2 { 2 } else { 1 };
                self.switch_to_list(list);
                schedule(agnus, CopEvent::Fetch, 2);
            }
            CopEvent::Vblank => {
                if agnus.copdma() && !agnus.allocate_bus(BusOwner::Copper) {
                    reschedule(agnus);
                    return None;
                }
                self.switch_to_list(1);
                self.active_in_this_frame = agnus.copdma();
                schedule(agnus, CopEvent::Fetch, 2);
            }
        }
        None
    }

    fn service_move<H: Host>(&mut self, agnus: &mut Agnus, host: &mut H) -> Option<(u16, u16)> {
        if !agnus.bus_is_free(BusOwner::Copper) {
            reschedule(agnus);
            return None;
        }
        self.ir2 = self.fetch(agnus, host);

        let addr = self.ir1 & 0x1FE;
        if self.is_illegal_address(addr, agnus.is_ecs()) {
            debug!("copper halted on illegal address {addr:#05x} at {:#08x}", self.pc);
            agnus.events.cancel(SlotId::Cop);
            return None;
        }

        schedule(agnus, CopEvent::Fetch, 2);
        if self.skip {
            self.skip = false;
            return None;
        }

        match addr {
            reg::COPJMP1 | reg::COPJMP2 => {
                schedule(agnus, CopEvent::Jmp1, 2);
                let list = if addr == reg::COPJMP1 { 1 } else { 2 };
                agnus.events.set_data(SlotId::Cop, list);
                None
            }
            _ => Some((addr, self.ir2)),
        }
    }

    fn service_wait_blit(&mut self, agnus: &mut Agnus) {
        let owner = agnus.bus.owner(agnus.pos.h);
        if owner != BusOwner::None && owner != BusOwner::Blitter {
            reschedule(agnus);
        } else {
            self.schedule_wait_wakeup(agnus, false);
        }
    }

    /// Blitter termination. Releases a Copper blocked on the Blitter in this
    /// or the next even cycle.
    pub fn blitter_did_terminate(&mut self, agnus: &mut Agnus) {
        if agnus.events.id(SlotId::Cop) == EventId::Cop(CopEvent::WaitBlit) {
            if agnus.pos.h % 2 == 0 {
                self.service_wait_blit(agnus);
            } else {
                schedule(agnus, CopEvent::WaitBlit, 1);
            }
        }
    }

    // Wakes up two cycles ahead of the matching position so the next fetch
    // lands exactly on it.
    fn schedule_wait_wakeup(&self, agnus: &mut Agnus, bfd: bool) {
        let from = agnus.pos.add(2);
        let Some(target) = find_match(from, self.vphp(), self.vmhm(), agnus.num_lines()) else {
            trace!("wait {:#06x} {:#06x} does not match in this frame", self.ir1, self.ir2);
            park(agnus, CopEvent::WakeUp);
            return;
        };

        let delay = target.linear() - agnus.pos.linear() - 2;
        trace!("wait until ({}, {:#x}), {delay} cycles", target.v, target.h);
        if delay == 0 {
            schedule(agnus, CopEvent::Fetch, 2);
        } else {
            let next = if bfd { CopEvent::WakeUp } else { CopEvent::WakeUpBlit };
            schedule(agnus, next, delay);
        }
    }
}

impl Default for Copper {
    fn default() -> Self {
        Self::new()
    }
}

fn schedule(agnus: &mut Agnus, next: CopEvent, delay: i64) {
    agnus.schedule_rel(SlotId::Cop, delay, EventId::Cop(next));
}

fn reschedule(agnus: &mut Agnus) {
    let cycle = agnus.clock + dma_cycles(1);
    agnus.events.reschedule_abs(SlotId::Cop, cycle);
}

fn park(agnus: &mut Agnus, next: CopEvent) {
    agnus.events.schedule_abs(SlotId::Cop, NEVER, EventId::Cop(next));
}

/// Beam comparator. The vertical position is compared first; V7 has no mask
/// bit and is always compared. Horizontal positions have two-cycle
/// granularity.
#[must_use]
pub fn comparator(beam: Beam, waitpos: u16, mask: u16) -> bool {
    let v_mask = (mask >> 8) as u8 | 0x80;
    let v_beam = beam.v as u8 & v_mask;
    let v_wait = (waitpos >> 8) as u8 & v_mask;
    if v_beam != v_wait {
        return v_beam > v_wait;
    }

    let h_mask = mask as u8 & 0xFE;
    (beam.h as u8 & h_mask) >= (waitpos as u8 & 0xFE & h_mask)
}

/// First position at or after `from` in this frame that satisfies the
/// comparator.
#[must_use]
pub fn find_match(from: Beam, waitpos: u16, mask: u16, num_lines: usize) -> Option<Beam> {
    let v_mask = (mask >> 8) as u8 | 0x80;
    let v_wait = (waitpos >> 8) as u8 & v_mask;

    for v in from.v..num_lines {
        let first = if v == from.v { from.h } else { 0 };
        let v_beam = v as u8 & v_mask;
        if v_beam > v_wait {
            return Some(Beam::new(v, first));
        }
        if v_beam == v_wait
            && let Some(h) = (first..HPOS_CNT).find(|&h| comparator(Beam::new(v, h), waitpos, mask))
        {
            return Some(Beam::new(v, h));
        }
    }
    None
}
