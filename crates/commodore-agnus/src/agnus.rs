//! Agnus: beam counter, DMA scheduling and bus arbitration.
//!
//! Agnus owns the master clock, the event table and the per-line DMA tables.
//! The bitplane and DAS slots walk their tables through the successor chains;
//! every register change that affects the tables rebuilds them from the
//! current cycle onwards so passed cycles keep their schedule.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::beam::{Beam, Frame, HPOS_CNT, HPOS_MAX};
use crate::bus::{BusArbiter, BusOwner};
use crate::config::ChipsetConfig;
use crate::ddf::{self, DDF_HW_START, DdfState, DdfWindow};
use crate::dma::{EventLine, REFRESH_CYCLES, Scroll, dmacon, templates};
use crate::event::{
    BltEvent, BplEvent, CopEvent, Cycle, DasEvent, EventId, EventTable, NEVER, RasEvent, RegEvent, SecEvent,
    SlotId, VblEvent, as_dma_cycles, dma_cycles,
};
use crate::host::{Cia, DiskTransfer, Host, Irq, SpriteReg};
use crate::registers::{ChangeRecorder, RegTarget};

// Work queued for the next hsync.
const HSYNC_PREDICT_DDF: u8 = 0b001;
const HSYNC_UPDATE_BPL: u8 = 0b010;
const HSYNC_UPDATE_DAS: u8 = 0b100;

/// First line in which sprite DMA may run.
const SPRITE_FIRST_LINE: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpriteDmaState {
    #[default]
    Idle,
    Active,
}

/// Vertical trigger lines and DMA state of one sprite channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpriteDma {
    pub vstrt: usize,
    pub vstop: usize,
    pub state: SpriteDmaState,
}

/// Number of bitplanes selected by BPLCON0. The unused value 7 acts as 4.
#[must_use]
pub const fn bpu(bplcon0: u16) -> usize {
    match (bplcon0 >> 12) & 7 {
        7 => 4,
        n => n as usize,
    }
}

/// Hires bit of BPLCON0.
#[must_use]
pub const fn hires(bplcon0: u16) -> bool {
    bplcon0 & 0x8000 != 0
}

// Comparator positions use -1 for "never reached".
fn signed(pos: Option<usize>) -> i64 {
    pos.map_or(-1, |p| p as i64)
}

fn replace_hi(ptr: u32, value: u16) -> u32 {
    (ptr & 0x0000_FFFF) | (u32::from(value) << 16)
}

fn replace_lo(ptr: u32, value: u16) -> u32 {
    (ptr & 0xFFFF_0000) | u32::from(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agnus {
    pub config: ChipsetConfig,

    /// Master clock of the cycle being executed.
    pub clock: Cycle,
    pub pos: Beam,
    pub frame: Frame,

    pub events: EventTable,
    pub bus: BusArbiter,
    pub recorder: ChangeRecorder,
    pub bpl_line: EventLine<BplEvent>,
    pub das_line: EventLine<DasEvent>,

    // Registers
    pub dmacon: u16,
    pub bplcon0: u16,
    pub bplcon1: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,
    pub diwstrt: u16,
    pub diwstop: u16,
    pub bpl1mod: i16,
    pub bpl2mod: i16,

    // DMA pointers
    pub bplpt: [u32; 6],
    pub sprpt: [u32; 8],
    pub audpt: [u32; 4],
    pub audlc: [u32; 4],
    pub dskpt: u32,

    pub sprites: [SpriteDma; 8],
    /// Pending audio DMA requests.
    pub audx_dr: [bool; 4],

    dmacon_at_ddf_strt: u16,
    bplcon0_at_ddf_strt: u16,
    scroll: Scroll,

    ddfstrt_reached: Option<usize>,
    ddfstop_reached: Option<usize>,
    ddf_state: DdfState,
    ddf_lores: DdfWindow,
    ddf_hires: DdfWindow,
    ocs_early_access_line: Option<usize>,

    diw_vstrt: usize,
    diw_vstop: usize,
    diw_hstrt: Option<usize>,
    diw_hstop: Option<usize>,
    diw_v_flop: bool,
    diw_h_flop: bool,
    diw_h_flop_on: Option<usize>,
    diw_h_flop_off: Option<usize>,
    ddf_v_flop: bool,

    bpl_dma_line: bool,
    das_dma: u16,
    hsync_actions: u8,

    v_latched: usize,
    h_latched: usize,
}

impl Agnus {
    #[must_use]
    pub fn new(config: ChipsetConfig) -> Self {
        let mut agnus = Self::blank(config);
        agnus.reset();
        agnus
    }

    /// Hard reset. Keeps the configuration.
    pub fn reset(&mut self) {
        *self = Self::blank(self.config);

        self.events
            .schedule_abs(SlotId::Ras, dma_cycles(HPOS_CNT as i64), EventId::Ras(RasEvent::Hsync));
        self.events.schedule_abs(SlotId::Sec, NEVER, EventId::Sec(SecEvent::Trigger));
        self.schedule_strobe0();
        // Power-on starts the Copper as if a frame had just begun.
        self.events
            .schedule_abs(SlotId::Cop, self.clock, EventId::Cop(CopEvent::Vblank));

        self.bpl_line
            .rebuild(0, false, 0, DdfWindow::EMPTY, Scroll::default());
        self.das_line.copy_from(templates().das(0), 0);
        self.schedule_next_bpl_event(0);
        self.schedule_next_das_event(0);
    }

    fn blank(config: ChipsetConfig) -> Self {
        Self {
            config,
            clock: 0,
            pos: Beam::default(),
            frame: Frame::new(),
            events: EventTable::new(),
            bus: BusArbiter::new(),
            recorder: ChangeRecorder::new(),
            bpl_line: EventLine::new(),
            das_line: EventLine::new(),
            dmacon: 0,
            bplcon0: 0,
            bplcon1: 0,
            ddfstrt: 0,
            ddfstop: 0,
            diwstrt: 0,
            diwstop: 0,
            bpl1mod: 0,
            bpl2mod: 0,
            bplpt: [0; 6],
            sprpt: [0; 8],
            audpt: [0; 4],
            audlc: [0; 4],
            dskpt: 0,
            sprites: [SpriteDma::default(); 8],
            audx_dr: [false; 4],
            dmacon_at_ddf_strt: 0,
            bplcon0_at_ddf_strt: 0,
            scroll: Scroll::default(),
            ddfstrt_reached: None,
            ddfstop_reached: None,
            ddf_state: DdfState::Off,
            ddf_lores: DdfWindow::EMPTY,
            ddf_hires: DdfWindow::EMPTY,
            ocs_early_access_line: None,
            diw_vstrt: 0,
            diw_vstop: 0,
            diw_hstrt: None,
            diw_hstop: None,
            diw_v_flop: false,
            diw_h_flop: true,
            diw_h_flop_on: None,
            diw_h_flop_off: None,
            ddf_v_flop: false,
            bpl_dma_line: false,
            das_dma: 0,
            hsync_actions: 0,
            v_latched: 0,
            h_latched: 0,
        }
    }

    //
    // Frame geometry
    //

    #[must_use]
    pub const fn num_lines(&self) -> usize {
        self.frame.num_lines(self.config.region)
    }

    #[must_use]
    pub const fn last_line(&self) -> usize {
        self.frame.last_line(self.config.region)
    }

    #[must_use]
    pub const fn in_last_line(&self) -> bool {
        self.pos.v == self.last_line()
    }

    #[must_use]
    pub const fn is_ecs(&self) -> bool {
        self.config.revision.is_ecs()
    }

    #[must_use]
    pub const fn is_ocs(&self) -> bool {
        self.config.revision.is_ocs()
    }

    //
    // Time conversion and scheduling helpers
    //

    /// Master cycle of (0, 0) in the current frame.
    #[must_use]
    pub const fn start_of_frame(&self) -> Cycle {
        self.clock - dma_cycles(self.pos.linear())
    }

    /// Master cycle of a position in the current frame. Positions beyond the
    /// last line refer to the following frame.
    #[must_use]
    pub const fn beam_to_cycle(&self, beam: Beam) -> Cycle {
        self.start_of_frame() + dma_cycles(beam.linear())
    }

    /// Beam position of a master cycle, without wrapping at the frame end.
    #[must_use]
    pub fn beam_at(&self, cycle: Cycle) -> Beam {
        self.pos.add(as_dma_cycles(cycle - self.clock))
    }

    /// Schedules `id` `delay` DMA cycles from now.
    pub fn schedule_rel(&mut self, slot: SlotId, delay: i64, id: EventId) {
        self.events.schedule_abs(slot, self.clock + dma_cycles(delay), id);
    }

    pub fn schedule_pos(&mut self, slot: SlotId, v: usize, h: usize, id: EventId) {
        let cycle = self.beam_to_cycle(Beam::new(v, h));
        self.events.schedule_abs(slot, cycle, id);
    }

    /// Advances the clock by one DMA cycle. Line changes happen in the
    /// hsync handler.
    pub fn advance(&mut self) {
        self.clock += dma_cycles(1);
        self.pos.h = if self.pos.h < HPOS_MAX { self.pos.h + 1 } else { 0 };
    }

    /// Skips `count` idle DMA cycles. The caller guarantees that no event
    /// falls into the skipped range and that no line boundary is crossed.
    pub fn skip(&mut self, count: i64) {
        debug_assert!(count >= 0);
        self.clock += dma_cycles(count);
        self.pos.h = (self.pos.h + count as usize) % HPOS_CNT;
    }

    //
    // DMA enable predicates
    //

    #[must_use]
    pub const fn bpldma(dmacon: u16) -> bool {
        dmacon & (dmacon::DMAEN | dmacon::BPLEN) == dmacon::DMAEN | dmacon::BPLEN
    }

    const fn enabled(&self, bit: u16) -> bool {
        self.dmacon & (dmacon::DMAEN | bit) == dmacon::DMAEN | bit
    }

    #[must_use]
    pub const fn copdma(&self) -> bool {
        self.enabled(dmacon::COPEN)
    }

    #[must_use]
    pub const fn bltdma(&self) -> bool {
        self.enabled(dmacon::BLTEN)
    }

    #[must_use]
    pub const fn sprdma(&self) -> bool {
        self.enabled(dmacon::SPREN)
    }

    #[must_use]
    pub const fn dskdma(&self) -> bool {
        self.enabled(dmacon::DSKEN)
    }

    #[must_use]
    pub const fn auddma(&self, channel: usize) -> bool {
        self.enabled(dmacon::AUD0EN << channel)
    }

    #[must_use]
    pub const fn bltpri(&self) -> bool {
        self.dmacon & dmacon::BLTPRI != 0
    }

    //
    // Bus arbitration
    //

    /// True if `owner` may use the bus in the current cycle. Pure query.
    #[must_use]
    pub fn bus_is_free(&self, owner: BusOwner) -> bool {
        if !self.bus.is_free(self.pos.h) {
            return false;
        }
        match owner {
            // The Copper has no access in cycle 0xE0.
            BusOwner::Copper => self.copdma() && self.pos.h != 0xE0,
            BusOwner::Blitter => self.bltdma() && !(self.bus.bls && !self.bltpri()),
            _ => true,
        }
    }

    /// Claims the current cycle for `owner`.
    pub fn allocate_bus(&mut self, owner: BusOwner) -> bool {
        if !self.bus.is_free(self.pos.h) {
            return false;
        }
        if owner == BusOwner::Blitter && (!self.bltdma() || (self.bus.bls && !self.bltpri())) {
            return false;
        }
        self.bus.claim(self.pos.h, owner)
    }

    /// DMA read in the current cycle, recorded on the bus.
    pub fn dma_read<H: Host>(&mut self, host: &mut H, owner: BusOwner, addr: u32) -> u16 {
        let value = host.read_word(owner, addr & self.config.revision.ptr_mask());
        self.bus.record(self.pos.h, owner, value);
        value
    }

    /// DMA write in the current cycle, recorded on the bus.
    pub fn dma_write<H: Host>(&mut self, host: &mut H, owner: BusOwner, addr: u32, value: u16) {
        host.write_word(owner, addr & self.config.revision.ptr_mask(), value);
        self.bus.record(self.pos.h, owner, value);
    }

    //
    // Line and frame transitions
    //

    /// End-of-line handler, dispatched from the RAS slot at cycle 0.
    pub fn hsync<H: Host>(&mut self, host: &mut H) {
        host.end_of_line(self.pos.v);

        self.pos.h = 0;
        self.pos.v += 1;
        if self.pos.v >= self.num_lines() {
            self.vsync(host);
        }
        self.events.schedule_abs(
            SlotId::Ras,
            self.clock + dma_cycles(HPOS_CNT as i64),
            EventId::Ras(RasEvent::Hsync),
        );

        self.dmacon_at_ddf_strt = self.dmacon;
        self.bplcon0_at_ddf_strt = self.bplcon0;

        let v = self.pos.v;
        if v == self.diw_vstrt && !self.diw_v_flop {
            self.diw_v_flop = true;
        }
        if v == self.diw_vstop && self.diw_v_flop {
            self.diw_v_flop = false;
        }
        if self.diw_h_flop_off.is_some() {
            self.diw_h_flop = false;
        } else if self.diw_h_flop_on.is_some() {
            self.diw_h_flop = true;
        }
        self.diw_h_flop_on = self.diw_hstrt;
        self.diw_h_flop_off = self.diw_hstop;

        self.ddf_v_flop = !self.in_last_line() && self.diw_v_flop;

        let bpl_dma_line = self.in_bpl_dma_line(self.dmacon, self.bplcon0);
        if bpl_dma_line != self.bpl_dma_line {
            self.bpl_dma_line = bpl_dma_line;
            self.hsync_actions |= HSYNC_UPDATE_BPL;
        }

        let das_dma = self.das_bits();
        if das_dma != self.das_dma {
            self.das_dma = das_dma;
            self.hsync_actions |= HSYNC_UPDATE_DAS;
        }

        if self.hsync_actions & HSYNC_PREDICT_DDF != 0 {
            self.hsync_actions &= !HSYNC_PREDICT_DDF;
            self.predict_ddf();
        }
        if self.hsync_actions & HSYNC_UPDATE_BPL != 0 {
            self.hsync_actions &= !HSYNC_UPDATE_BPL;
            self.update_bpl_events(self.dmacon, self.bplcon0, 0);
        }
        if self.hsync_actions & HSYNC_UPDATE_DAS != 0 {
            self.hsync_actions &= !HSYNC_UPDATE_DAS;
            self.das_line.copy_from(templates().das(self.das_dma), 0);
        }

        self.bus.clear_line();
        self.schedule_next_bpl_event(0);
        self.schedule_next_das_event(0);
    }

    fn vsync<H: Host>(&mut self, host: &mut H) {
        self.frame.next(self.bplcon0 & 0x0004 != 0);
        self.pos.v = 0;
        self.diw_v_flop = false;
        self.diw_h_flop = true;

        // Restart the Copper once per frame.
        self.events
            .schedule_abs(SlotId::Cop, self.clock, EventId::Cop(CopEvent::Vblank));

        self.bus.end_frame();
        host.end_of_frame();
        trace!("frame {} lof={}", self.frame.nr, self.frame.lof);
    }

    // DAS template selector for the current line.
    const fn das_bits(&self) -> u16 {
        if self.dmacon & dmacon::DMAEN == 0 {
            return 0;
        }
        let mut bits = self.dmacon & 0x3F;
        if self.pos.v < SPRITE_FIRST_LINE || self.pos.v >= self.last_line() {
            bits &= !dmacon::SPREN;
        }
        bits
    }

    const fn in_bpl_dma_line(&self, dmacon: u16, bplcon0: u16) -> bool {
        self.ddf_v_flop && bpu(bplcon0) != 0 && Self::bpldma(dmacon)
    }

    //
    // Display data fetch window
    //

    fn predict_ddf(&mut self) {
        let (lores, hires, state) = (self.ddf_lores, self.ddf_hires, self.ddf_state);

        self.ddfstrt_reached = (usize::from(self.ddfstrt) < HPOS_CNT).then_some(usize::from(self.ddfstrt));
        self.ddfstop_reached = (usize::from(self.ddfstop) < HPOS_CNT).then_some(usize::from(self.ddfstop));
        self.compute_ddf_window();

        if self.ddf_lores != lores || self.ddf_hires != hires || self.ddf_state != state {
            self.hsync_actions |= HSYNC_UPDATE_BPL | HSYNC_PREDICT_DDF;
        }
    }

    fn compute_ddf_window(&mut self) {
        if self.is_ocs() {
            self.compute_ddf_window_ocs();
        } else {
            self.compute_ddf_window_ecs();
        }
    }

    fn compute_ddf_window_ocs(&mut self) {
        let (strt, stop) = (self.ddfstrt_reached, self.ddfstop_reached);

        // Scanline effect: an early DDFSTRT enables DMA every other line.
        if let Some(s) = strt.filter(|s| *s < DDF_HW_START) {
            if self.ocs_early_access_line == Some(self.pos.v) {
                match stop {
                    Some(stop) => self.set_ddf_window(s, stop),
                    None => self.set_ddf_empty(),
                }
            } else {
                self.set_ddf_empty();
                self.ocs_early_access_line = Some(self.pos.v + 1);
            }
            return;
        }

        match ddf::ocs_interval(strt, stop).bounds(strt, stop) {
            Some((s, e)) => self.set_ddf_window(s, e),
            None => self.set_ddf_empty(),
        }
    }

    fn compute_ddf_window_ecs(&mut self) {
        let (strt, stop) = (self.ddfstrt_reached, self.ddfstop_reached);
        let (interval, state) = ddf::ecs_interval(strt, stop, self.ddf_state);
        match interval.bounds(strt, stop) {
            Some((s, e)) => self.set_ddf_window(s, e),
            None => self.set_ddf_empty(),
        }
        self.ddf_state = state;
    }

    fn set_ddf_window(&mut self, strt: usize, stop: usize) {
        self.ddf_lores = DdfWindow::lores(strt, stop);
        self.ddf_hires = DdfWindow::hires(strt, stop);
        debug!(
            "ddf window lores {:#x}..{:#x} hires {:#x}..{:#x}",
            self.ddf_lores.strt, self.ddf_lores.stop, self.ddf_hires.strt, self.ddf_hires.stop
        );
    }

    fn set_ddf_empty(&mut self) {
        self.ddf_lores = DdfWindow::EMPTY;
        self.ddf_hires = DdfWindow::EMPTY;
        debug!("ddf window empty");
    }

    /// Current fetch windows as `(lores, hires)`.
    #[must_use]
    pub const fn ddf_windows(&self) -> (DdfWindow, DdfWindow) {
        (self.ddf_lores, self.ddf_hires)
    }

    /// Rewrites the bitplane table from cycle `first` for the given register
    /// values.
    pub fn update_bpl_events(&mut self, dmacon: u16, bplcon0: u16, first: usize) {
        let hires = hires(bplcon0);
        let mut planes = bpu(bplcon0);
        if !self.in_bpl_dma_line(dmacon, bplcon0) || self.ddfstrt_reached.is_none() {
            planes = 0;
        }
        let window = if hires { self.ddf_hires } else { self.ddf_lores };
        self.bpl_line.rebuild(first, hires, planes, window, self.scroll);
    }

    fn clear_bpl_events(&mut self, first: usize) {
        self.bpl_line
            .rebuild(first, hires(self.bplcon0), 0, DdfWindow::EMPTY, self.scroll);
    }

    //
    // BPL and DAS slots
    //

    /// Schedules the first bitplane event after cycle `h`.
    pub fn schedule_next_bpl_event(&mut self, h: usize) {
        if let Some(next) = self.bpl_line.next_after(h) {
            let delay = next as i64 - self.pos.h as i64;
            self.schedule_rel(SlotId::Bpl, delay, EventId::Bpl(self.bpl_line.get(next)));
        }
    }

    /// Schedules the bitplane event at cycle `h`, or the next one after it.
    pub fn schedule_bpl_event_for_cycle(&mut self, h: usize) {
        debug_assert!(h >= self.pos.h);
        let event = self.bpl_line.get(h);
        if event.is_none() {
            self.schedule_next_bpl_event(h);
        } else {
            self.schedule_rel(SlotId::Bpl, (h - self.pos.h) as i64, EventId::Bpl(event));
        }
    }

    pub fn schedule_next_das_event(&mut self, h: usize) {
        match self.das_line.next_after(h) {
            Some(next) => {
                let delay = next as i64 - self.pos.h as i64;
                self.schedule_rel(SlotId::Das, delay, EventId::Das(self.das_line.get(next)));
            }
            None => self.events.cancel(SlotId::Das),
        }
    }

    pub fn schedule_das_event_for_cycle(&mut self, h: usize) {
        debug_assert!(h >= self.pos.h);
        let event = self.das_line.get(h);
        if event.is_none() {
            self.schedule_next_das_event(h);
        } else {
            self.schedule_rel(SlotId::Das, (h - self.pos.h) as i64, EventId::Das(event));
        }
    }

    pub fn service_bpl_event<H: Host>(&mut self, host: &mut H) {
        let EventId::Bpl(event) = self.events.id(SlotId::Bpl) else {
            return;
        };

        if event.kind() == BplEvent::EOL {
            draw(host, event, hires(self.bplcon0));
            // The next hsync reschedules the slot.
            return;
        }

        match event.plane() {
            Some(0) => {
                draw(host, event, event.is_hires_fetch());
                self.fetch_bitplane(host, 0, event.is_hires_fetch());
            }
            Some(plane) => {
                self.fetch_bitplane(host, plane, event.is_hires_fetch());
                draw(host, event, event.is_hires_fetch());
            }
            None => draw(host, event, hires(self.bplcon0)),
        }

        self.schedule_next_bpl_event(self.pos.h);
    }

    fn fetch_bitplane<H: Host>(&mut self, host: &mut H, plane: usize, hires: bool) {
        let addr = self.bplpt[plane];
        let value = self.dma_read(host, BusOwner::Bitplane(plane as u8), addr);
        self.bplpt[plane] = addr.wrapping_add(2);
        host.bitplane_data(plane, value);

        // Modulo is added on the last fetch unit.
        let last_unit = if hires {
            self.ddf_hires.stop.saturating_sub(4)
        } else {
            self.ddf_lores.stop.saturating_sub(8)
        };
        if self.pos.h >= last_unit {
            let modulo = if plane % 2 == 1 { self.bpl2mod } else { self.bpl1mod };
            self.bplpt[plane] = self.bplpt[plane].wrapping_add_signed(i32::from(modulo));
        }
    }

    pub fn service_das_event<H: Host>(&mut self, host: &mut H) {
        let EventId::Das(event) = self.events.id(SlotId::Das) else {
            return;
        };

        match event {
            DasEvent::Refresh => {
                for h in REFRESH_CYCLES {
                    self.bus.set_owner(h, BusOwner::Refresh);
                }
                self.bus.count(BusOwner::Refresh, REFRESH_CYCLES.len() as u64);
            }
            DasEvent::Disk(_) => self.disk_slot(host),
            DasEvent::Audio(channel) => {
                let channel = usize::from(channel);
                if self.audx_dr[channel] {
                    self.audx_dr[channel] = false;
                    let value = self.dma_read(host, BusOwner::Audio, self.audpt[channel]);
                    self.audpt[channel] = self.audpt[channel].wrapping_add(2);
                    host.audio_data(channel, value);
                }
            }
            DasEvent::Sprite1(nr) => self.sprite_cycle(host, usize::from(nr), true),
            DasEvent::Sprite2(nr) => self.sprite_cycle(host, usize::from(nr), false),
            DasEvent::Sdma => self.update_sprite_dma(),
            DasEvent::Tick => host.tod_tick(Cia::B),
            DasEvent::Tick2 | DasEvent::None => {}
        }

        self.schedule_next_das_event(self.pos.h);
    }

    fn disk_slot<H: Host>(&mut self, host: &mut H) {
        match host.disk_dma() {
            DiskTransfer::Idle => {}
            DiskTransfer::ToMemory(value) => {
                self.dma_write(host, BusOwner::Disk, self.dskpt, value);
                self.dskpt = self.dskpt.wrapping_add(2);
            }
            DiskTransfer::FromMemory => {
                let value = self.dma_read(host, BusOwner::Disk, self.dskpt);
                self.dskpt = self.dskpt.wrapping_add(2);
                host.disk_data(value);
            }
        }
    }

    fn sprite_cycle<H: Host>(&mut self, host: &mut H, nr: usize, first: bool) {
        let h = self.pos.h;
        if self.pos.v == self.sprites[nr].vstop {
            self.sprites[nr].state = SpriteDmaState::Idle;
            if self.bus.is_free(h) {
                // Reload the control words.
                let value = self.fetch_sprite(host, nr);
                if first {
                    self.set_spr_pos(nr, value);
                    host.sprite_data(nr, SpriteReg::Pos, value);
                } else {
                    self.set_spr_ctl(nr, value);
                    host.sprite_data(nr, SpriteReg::Ctl, value);
                }
            }
        } else if self.sprites[nr].state == SpriteDmaState::Active && self.bus.is_free(h) {
            let value = self.fetch_sprite(host, nr);
            let reg = if first { SpriteReg::Data } else { SpriteReg::Datb };
            host.sprite_data(nr, reg, value);
        }
    }

    fn fetch_sprite<H: Host>(&mut self, host: &mut H, nr: usize) -> u16 {
        let value = self.dma_read(host, BusOwner::Sprite(nr as u8), self.sprpt[nr]);
        self.sprpt[nr] = self.sprpt[nr].wrapping_add(2);
        value
    }

    // Runs in cycle 0xDF; the sprite logic already sees the next line.
    fn update_sprite_dma(&mut self) {
        let v = self.pos.v + 1;

        if v == SPRITE_FIRST_LINE && self.sprdma() {
            for sprite in &mut self.sprites {
                sprite.vstop = SPRITE_FIRST_LINE;
            }
            return;
        }
        if v == self.last_line() {
            for sprite in &mut self.sprites {
                sprite.state = SpriteDmaState::Idle;
            }
            return;
        }
        for sprite in &mut self.sprites {
            if v == sprite.vstrt {
                sprite.state = SpriteDmaState::Active;
            }
            if v == sprite.vstop {
                sprite.state = SpriteDmaState::Idle;
            }
        }
    }

    /// SPRxPOS as seen by Agnus: vertical start bits 0..=7.
    pub fn set_spr_pos(&mut self, nr: usize, value: u16) {
        // Writes after the sprite comparator ran apply to the next line.
        let seen_v = if self.pos.h < 0xDF { self.pos.v } else { self.pos.v + 1 };
        let sprite = &mut self.sprites[nr];
        sprite.vstrt = usize::from(value >> 8) | (sprite.vstrt & 0x100);
        Self::update_sprite_state(sprite, seen_v);
    }

    /// SPRxCTL as seen by Agnus: vertical stop and the two V8 bits.
    pub fn set_spr_ctl(&mut self, nr: usize, value: u16) {
        let seen_v = if self.pos.h < 0xDF { self.pos.v } else { self.pos.v + 1 };
        let sprite = &mut self.sprites[nr];
        sprite.vstrt = (usize::from(value & 0b100) << 6) | (sprite.vstrt & 0xFF);
        sprite.vstop = (usize::from(value & 0b010) << 7) | usize::from(value >> 8);
        Self::update_sprite_state(sprite, seen_v);
    }

    fn update_sprite_state(sprite: &mut SpriteDma, v: usize) {
        if v == sprite.vstrt {
            sprite.state = SpriteDmaState::Active;
        }
        if v == sprite.vstop {
            sprite.state = SpriteDmaState::Idle;
        }
    }

    //
    // Vertical blank strobes
    //

    const fn strobe_line(&self) -> usize {
        if self.is_ecs() { 0 } else { 1 }
    }

    fn schedule_strobe0(&mut self) {
        let v = self.num_lines() + self.strobe_line();
        self.schedule_pos(SlotId::Vbl, v, 0, EventId::Vbl(VblEvent::Strobe0));
    }

    fn schedule_strobe1(&mut self) {
        self.schedule_pos(SlotId::Vbl, 5, 84, EventId::Vbl(VblEvent::Strobe1));
    }

    fn schedule_strobe2(&mut self) {
        self.schedule_pos(SlotId::Vbl, 5, 178, EventId::Vbl(VblEvent::Strobe2));
    }

    pub fn service_vbl_event<H: Host>(&mut self, host: &mut H) {
        match self.events.id(SlotId::Vbl) {
            EventId::Vbl(VblEvent::Strobe0) => {
                host.raise_irq(Irq::Vertb);
                self.schedule_strobe1();
            }
            EventId::Vbl(VblEvent::Strobe1) => {
                host.tod_tick(Cia::A);
                self.schedule_strobe2();
            }
            EventId::Vbl(VblEvent::Strobe2) => self.schedule_strobe0(),
            _ => self.events.cancel(SlotId::Vbl),
        }
    }

    //
    // Register change recorder
    //

    /// Queues a register change `delay` DMA cycles from now.
    pub fn record_change(&mut self, delay: i64, target: RegTarget, value: u16) {
        self.recorder
            .insert(self.clock + dma_cycles(delay), target, value);
        self.events
            .schedule_abs(SlotId::Reg, self.recorder.trigger(), EventId::Reg(RegEvent::Change));
    }

    /// Points the REG slot at the earliest pending change.
    pub fn schedule_next_reg_event(&mut self) {
        if self.recorder.is_empty() {
            self.events.cancel(SlotId::Reg);
        } else {
            self.events
                .schedule_abs(SlotId::Reg, self.recorder.trigger(), EventId::Reg(RegEvent::Change));
        }
    }

    /// Applies a delayed change to an Agnus register. Blitter targets are
    /// routed by the caller.
    pub fn apply_change(&mut self, target: RegTarget, value: u16) {
        trace!("reg change {target:?} = {value:#06x} at ({}, {:#x})", self.pos.v, self.pos.h);
        match target {
            RegTarget::BplPtH(x) => self.set_bplpt(usize::from(x), value, true),
            RegTarget::BplPtL(x) => self.set_bplpt(usize::from(x), value, false),
            RegTarget::SprPtH(x) => self.set_sprpt(usize::from(x), value, true),
            RegTarget::SprPtL(x) => self.set_sprpt(usize::from(x), value, false),
            RegTarget::Bpl1Mod => self.bpl1mod = (value & 0xFFFE) as i16,
            RegTarget::Bpl2Mod => self.bpl2mod = (value & 0xFFFE) as i16,
            RegTarget::DdfStrt => self.set_ddfstrt(value),
            RegTarget::DdfStop => self.set_ddfstop(value),
            RegTarget::DiwStrt => self.set_diwstrt(value),
            RegTarget::DiwStop => self.set_diwstop(value),
            RegTarget::BplCon0 => self.set_bplcon0(value),
            RegTarget::BplCon1 => self.set_bplcon1(value),
            RegTarget::BltCon0
            | RegTarget::BltCon0L
            | RegTarget::BltCon1
            | RegTarget::BltSize
            | RegTarget::BltSizV => {}
        }
    }

    // A pointer write is lost if the channel used the pointer one cycle
    // before the write lands.
    fn drop_write(&self, owner: BusOwner) -> bool {
        self.pos.h >= 1 && self.bus.owner(self.pos.h - 1) == owner
    }

    fn set_bplpt(&mut self, x: usize, value: u16, high: bool) {
        if self.bpl_line.fetches_plane(self.pos.h, x) {
            // The write collides with the fetch and trashes the pointer.
            trace!("BPL{}PT trashed", x + 1);
            self.bplpt[x] = if high {
                replace_hi(self.bplpt[x], 0xFFFF)
            } else {
                replace_lo(self.bplpt[x], 0xFFFE)
            };
            return;
        }
        if self.drop_write(BusOwner::Bitplane(x as u8)) {
            trace!("BPL{}PT write dropped", x + 1);
            return;
        }
        self.bplpt[x] = if high {
            replace_hi(self.bplpt[x], value)
        } else {
            replace_lo(self.bplpt[x], value & 0xFFFE)
        };
    }

    fn set_sprpt(&mut self, x: usize, value: u16, high: bool) {
        if self.drop_write(BusOwner::Sprite(x as u8)) {
            trace!("SPR{x}PT write dropped");
            return;
        }
        self.sprpt[x] = if high {
            replace_hi(self.sprpt[x], value)
        } else {
            replace_lo(self.sprpt[x], value & 0xFFFE)
        };
    }

    fn set_ddfstrt(&mut self, value: u16) {
        self.ddfstrt = value;
        self.hsync_actions |= HSYNC_PREDICT_DDF | HSYNC_UPDATE_BPL;

        let h = self.pos.h;
        // Immediate effect only while the old start has not been reached.
        if let Some(reached) = self.ddfstrt_reached
            && h < reached
        {
            let new = usize::from(value);
            if new <= h + 2 {
                self.ddfstrt_reached = None;
                self.clear_bpl_events(h);
                self.schedule_next_bpl_event(h);
            } else {
                self.ddfstrt_reached = (new <= HPOS_MAX).then_some(new);
                self.compute_ddf_window();
                self.update_bpl_events(self.dmacon, self.bplcon0, h);
                self.schedule_next_bpl_event(h);
            }
        }
    }

    fn set_ddfstop(&mut self, value: u16) {
        self.ddfstop = value;
        self.hsync_actions |= HSYNC_PREDICT_DDF | HSYNC_UPDATE_BPL;

        let h = self.pos.h;
        if signed(Some(h + 2)) < signed(self.ddfstop_reached) || self.ddfstop_reached.is_none() {
            let new = usize::from(value);
            if new <= h + 2 {
                self.ddfstop_reached = None;
            } else {
                self.ddfstop_reached = (new <= HPOS_MAX).then_some(new);
                if self.ddfstrt_reached.is_some() {
                    self.compute_ddf_window();
                    self.update_bpl_events(self.dmacon, self.bplcon0, h);
                    self.schedule_next_bpl_event(h);
                }
            }
        }
    }

    fn set_diwstrt(&mut self, value: u16) {
        self.diwstrt = value;

        let vstrt = usize::from(value >> 8);
        let hstrt = usize::from(value & 0xFF);
        let hstrt = (hstrt >= 2).then_some(hstrt);

        let cur = 2 * self.pos.h as i64;
        let (old, new) = (signed(self.diw_hstrt), signed(hstrt));
        if cur < old && cur < new {
            self.diw_h_flop_on = hstrt;
        }
        if new < cur && cur < old {
            self.diw_h_flop_on = None;
        }

        self.diw_vstrt = vstrt;
        self.diw_hstrt = hstrt;
        self.update_diw_v_flop();
    }

    fn set_diwstop(&mut self, value: u16) {
        self.diwstop = value;

        let vstop = usize::from(value >> 8) | if value & 0x8000 != 0 { 0 } else { 0x100 };
        let hstop = usize::from(value & 0xFF) | 0x100;
        let hstop = (hstop <= 0x1C7).then_some(hstop);

        let cur = 2 * self.pos.h as i64;
        let (old, new) = (signed(self.diw_hstop), signed(hstop));
        if cur < old && cur < new {
            self.diw_h_flop_off = hstop;
        }
        if new < cur && cur < old {
            self.diw_h_flop_off = None;
        }

        self.diw_vstop = vstop;
        self.diw_hstop = hstop;
        self.update_diw_v_flop();
    }

    fn update_diw_v_flop(&mut self) {
        if self.pos.v == self.diw_vstrt {
            self.diw_v_flop = true;
        }
        if self.pos.v == self.diw_vstop {
            self.diw_v_flop = false;
        }
    }

    /// Vertical display window flip-flop.
    #[must_use]
    pub const fn diw_v_flop(&self) -> bool {
        self.diw_v_flop
    }

    /// Horizontal display window flip-flop.
    #[must_use]
    pub const fn diw_h_flop(&self) -> bool {
        self.diw_h_flop
    }

    /// Display window corners as `(vstrt, hstrt, vstop, hstop)`.
    #[must_use]
    pub const fn diw(&self) -> (usize, Option<usize>, usize, Option<usize>) {
        (self.diw_vstrt, self.diw_hstrt, self.diw_vstop, self.diw_hstop)
    }

    fn set_bplcon0(&mut self, value: u16) {
        let old = self.bplcon0;
        let h = self.pos.h;

        if signed(Some(h)) < signed(self.ddfstrt_reached) {
            self.bplcon0_at_ddf_strt = value;
        }
        self.hsync_actions |= HSYNC_UPDATE_BPL;

        // Resolution or plane count changed: rebuild the rest of the line.
        if (old ^ value) & 0xF000 != 0 {
            self.update_bpl_events(self.dmacon, value, h);
            self.schedule_bpl_event_for_cycle(h);
        }

        // ERSY freezes the position counters.
        if value & 0b10 != 0 && old & 0b10 == 0 {
            self.v_latched = self.pos.v;
            self.h_latched = h;
        }
        self.bplcon0 = value;
    }

    /// BPLCON0 write. Agnus sees the new value four cycles later.
    pub fn poke_bplcon0(&mut self, value: u16) {
        self.record_change(4, RegTarget::BplCon0, value);
    }

    /// BPLCON1 write. Only changes are recorded.
    pub fn poke_bplcon1(&mut self, value: u16) {
        if self.bplcon1 != value {
            self.record_change(1, RegTarget::BplCon1, value);
        }
    }

    fn set_bplcon1(&mut self, value: u16) {
        self.bplcon1 = value & 0xFF;
        self.scroll = Scroll::from_bplcon1(self.bplcon1);

        let h = self.pos.h;
        self.update_bpl_events(self.dmacon, self.bplcon0, h);
        self.schedule_bpl_event_for_cycle(h);
        self.hsync_actions |= HSYNC_UPDATE_BPL | HSYNC_PREDICT_DDF;
    }

    //
    // DMACON
    //

    /// DMACON write. Takes effect immediately and returns the previous value.
    pub fn poke_dmacon(&mut self, value: u16) -> u16 {
        let old = self.dmacon;
        let new = if value & dmacon::SETCLR != 0 {
            (old | value) & 0x07FF
        } else {
            (old & !value) & 0x07FF
        };
        if old == new {
            return old;
        }
        self.dmacon = new;

        let h = self.pos.h;
        if signed(Some(h + 2)) < signed(self.ddfstrt_reached) {
            self.dmacon_at_ddf_strt = new;
        }

        let on = |v: u16, bit: u16| v & (dmacon::DMAEN | bit) == dmacon::DMAEN | bit;

        // A blit waiting for DMA starts right away.
        if !on(old, dmacon::BLTEN)
            && on(new, dmacon::BLTEN)
            && self.events.id(SlotId::Blt) == EventId::Blt(BltEvent::Strt1)
        {
            self.schedule_rel(SlotId::Blt, 0, EventId::Blt(BltEvent::Strt1));
        }

        let (old_bpl, new_bpl) = (on(old, dmacon::BPLEN), on(new, dmacon::BPLEN));
        if old_bpl != new_bpl {
            match (self.is_ocs(), new_bpl) {
                (true, true) => self.enable_bpl_dma_ocs(),
                (false, true) => self.enable_bpl_dma_ecs(),
                (_, false) => self.disable_bpl_dma(),
            }
            self.hsync_actions |= HSYNC_UPDATE_BPL;
        }

        let toggled = |bit: u16| on(old, bit) != on(new, bit);
        if toggled(dmacon::DSKEN) || toggled(dmacon::SPREN) {
            self.hsync_actions |= HSYNC_UPDATE_DAS;
            self.das_line.copy_from(templates().das(self.das_bits()), h);
            self.schedule_das_event_for_cycle(h);
        }

        debug!("DMACON {old:#06x} -> {new:#06x}");
        old
    }

    fn enable_bpl_dma_ocs(&mut self) {
        let h = self.pos.h;
        if signed(Some(h + 2)) < signed(self.ddfstrt_reached) || Self::bpldma(self.dmacon_at_ddf_strt) {
            self.update_bpl_events(self.dmacon, self.bplcon0, h + 2);
            self.schedule_bpl_event_for_cycle(h);
        }
    }

    fn enable_bpl_dma_ecs(&mut self) {
        let h = self.pos.h;
        if signed(Some(h + 2)) < signed(self.ddfstrt_reached) {
            self.update_bpl_events(self.dmacon, self.bplcon0, h + 2);
            self.schedule_bpl_event_for_cycle(h);
            return;
        }
        if signed(Some(h + 2)) >= signed(self.ddfstop_reached) {
            return;
        }
        // The window opens late, at the current position.
        let strt = (h + 4).max(self.ddfstrt_reached.unwrap_or(0));
        let stop = self.ddfstop_reached.unwrap_or(ddf::DDF_HW_STOP);
        self.set_ddf_window(strt, stop);
        self.hsync_actions |= HSYNC_PREDICT_DDF;
        self.update_bpl_events(self.dmacon, self.bplcon0, h + 2);
        self.schedule_bpl_event_for_cycle(h);
    }

    fn disable_bpl_dma(&mut self) {
        let h = self.pos.h;
        self.update_bpl_events(self.dmacon, self.bplcon0, (h + 2).min(HPOS_MAX));
        self.schedule_bpl_event_for_cycle(h);
    }

    //
    // Beam registers
    //

    const fn ersy(&self) -> bool {
        self.bplcon0 & 0b10 != 0
    }

    /// VHPOSR, read four cycles ahead of the internal counter.
    #[must_use]
    pub fn peek_vhposr(&self) -> u16 {
        if self.ersy() {
            return ((self.v_latched as u16 & 0xFF) << 8) | (self.h_latched as u16 & 0xFF);
        }

        let mut posh = self.pos.h + 4;
        let mut posv = self.pos.v;
        if posh > HPOS_MAX {
            posh -= HPOS_CNT;
            posv += 1;
            if posv >= self.num_lines() {
                posv = 0;
            }
        }

        // The new line number shows up in cycle 2.
        let v = if posh > 1 {
            posv
        } else if posv > 0 {
            posv - 1
        } else {
            self.frame.prev_last_line(self.config.region)
        };
        ((v as u16 & 0xFF) << 8) | posh as u16
    }

    #[must_use]
    pub fn peek_vposr(&self) -> u16 {
        let mut result = self.config.revision.id_bits(self.config.region);
        if self.frame.lof {
            result |= 0x8000;
        }
        let v = if self.ersy() { self.v_latched } else { self.pos.v };
        result | (v >> 8) as u16
    }

    /// VPOS write. Only the long frame bit is honored.
    pub fn poke_vpos(&mut self, value: u16) {
        let lof = value & 0x8000 != 0;
        if self.frame.lof == lof {
            return;
        }
        // A long frame cannot become short in its last line.
        if !lof && self.in_last_line() {
            return;
        }
        debug!("VPOS makes a {} frame", if lof { "long" } else { "short" });
        self.frame.lof = lof;

        match self.events.id(SlotId::Vbl) {
            EventId::Vbl(VblEvent::Strobe0) => self.schedule_strobe0(),
            EventId::Vbl(VblEvent::Strobe1) => self.schedule_strobe1(),
            EventId::Vbl(VblEvent::Strobe2) => self.schedule_strobe2(),
            _ => {}
        }
    }

    //
    // Audio
    //

    /// Requests one audio DMA word in the channel's next slot.
    pub fn request_audio_dma(&mut self, channel: usize) {
        self.audx_dr[channel] = true;
    }

    /// Restarts a channel at its location register.
    pub fn reload_audio_pointer(&mut self, channel: usize) {
        self.audpt[channel] = self.audlc[channel];
    }
}

fn draw<H: Host>(host: &mut H, event: BplEvent, hires: bool) {
    if event.draw_odd() || event.draw_even() {
        host.draw(event.draw_odd(), event.draw_even(), hires);
    }
}
