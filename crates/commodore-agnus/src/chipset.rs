//! Chipset driver.
//!
//! Owns Agnus, the Copper, the Blitter and the host, dispatches due events
//! in slot order and routes custom register accesses.
//!
//! One DMA cycle is 8 master ticks. `run_until` executes every DMA cycle
//! whose clock lies below the target; idle stretches between events are
//! skipped without visiting each cycle.

use emu_core::{Observable, Tickable, Ticks, Value};
use log::{debug, trace, warn};

use crate::agnus::Agnus;
use crate::beam::{HPOS_CNT, HPOS_MAX};
use crate::blitter::{Blitter, Channel};
use crate::bus::BusOwner;
use crate::config::{ChipsetConfig, ConfigError, ConfigOption};
use crate::copper::Copper;
use crate::event::{Cycle, EventId, SlotId, as_dma_cycles, dma_cycles};
use crate::host::{Accessor, Host};
use crate::registers::{RegTarget, reg};

/// DMACONR status bits that are not part of DMACON.
const BBUSY: u16 = 0x4000;
const BZERO: u16 = 0x2000;

pub struct Chipset<H: Host> {
    pub agnus: Agnus,
    pub copper: Copper,
    pub blitter: Blitter,
    pub host: H,
    /// Master ticks accumulated towards the next DMA cycle.
    phase: u8,
}

impl<H: Host> Chipset<H> {
    #[must_use]
    pub fn new(config: ChipsetConfig, host: H) -> Self {
        Self {
            agnus: Agnus::new(config),
            copper: Copper::new(),
            blitter: Blitter::new(),
            host,
            phase: 0,
        }
    }

    /// Hard reset. The host and the configuration are kept.
    pub fn reset(&mut self) {
        self.agnus.reset();
        self.copper.reset();
        self.blitter.reset();
        self.phase = 0;
    }

    #[must_use]
    pub const fn config(&self) -> &ChipsetConfig {
        &self.agnus.config
    }

    #[must_use]
    pub const fn clock(&self) -> Cycle {
        self.agnus.clock
    }

    pub(crate) const fn phase(&self) -> u8 {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: u8) {
        self.phase = phase % self.ticks_per_cycle() as u8;
    }

    /// Master ticks per DMA cycle.
    const fn ticks_per_cycle(&self) -> u64 {
        self.agnus.config.region.master_clock().divider
    }

    //
    // Configuration
    //

    /// Changes a runtime option. Returns `false` if the value was rejected
    /// or did not change anything.
    pub fn set_config_item(&mut self, option: ConfigOption, value: i64) -> bool {
        match self.try_set_config_item(option, value) {
            Ok(changed) => changed,
            Err(err) => {
                warn!("{option:?}: {err}");
                false
            }
        }
    }

    /// Like [`Self::set_config_item`], but reports why a value was rejected.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `value` is out of range for `option`.
    pub fn try_set_config_item(&mut self, option: ConfigOption, value: i64) -> Result<bool, ConfigError> {
        let next = self.agnus.config.with(option, value)?;
        if next == self.agnus.config {
            return Ok(false);
        }
        if next.blitter_accuracy != self.agnus.config.blitter_accuracy {
            debug!(
                "blitter accuracy {:?} -> {:?}",
                self.agnus.config.blitter_accuracy, next.blitter_accuracy
            );
        }
        self.agnus.config = next;
        Ok(true)
    }

    #[must_use]
    pub const fn config_item(&self, option: ConfigOption) -> i64 {
        self.agnus.config.get(option)
    }

    //
    // Execution
    //

    /// Executes one DMA cycle.
    pub fn execute(&mut self) {
        if self.agnus.events.next_trigger() <= self.agnus.clock {
            self.dispatch();
        }
        self.agnus.advance();
    }

    /// Executes all DMA cycles before `target`.
    pub fn run_until(&mut self, target: Cycle) {
        while self.agnus.clock < target {
            let next = self.agnus.events.next_trigger();
            if next > self.agnus.clock {
                // Nothing due: jump to the next event, the target or the end
                // of the line, whichever comes first.
                let to_event = as_dma_cycles(next - self.agnus.clock);
                let to_target = as_dma_cycles(target - self.agnus.clock + dma_cycles(1) - 1);
                let to_line_end = (HPOS_CNT - self.agnus.pos.h) as i64;
                let count = to_event.min(to_target).min(to_line_end);
                if count > 0 {
                    self.agnus.skip(count);
                    continue;
                }
            }
            self.execute();
        }
    }

    /// Lets DMA run until the bus is free for the CPU. The CPU then owns the
    /// cycle that has just passed. Returns the number of master cycles the
    /// CPU had to wait.
    pub fn execute_until_bus_is_free(&mut self) -> Cycle {
        let mut posh = if self.agnus.pos.h == 0 { HPOS_MAX } else { self.agnus.pos.h - 1 };
        let mut delay = 0;

        if self.agnus.bus.owner(posh) != BusOwner::None {
            loop {
                posh = self.agnus.pos.h;
                self.execute();
                delay += 1;
                if delay == 2 {
                    self.agnus.bus.bls = true;
                }
                if self.agnus.bus.owner(posh) == BusOwner::None {
                    break;
                }
            }
            self.agnus.bus.bls = false;
        }

        self.agnus.bus.set_owner(posh, BusOwner::Cpu);
        self.agnus.bus.count(BusOwner::Cpu, 1);
        dma_cycles(delay)
    }

    fn dispatch(&mut self) {
        let clock = self.agnus.clock;
        trace!("dispatch at ({}, {:#x})", self.agnus.pos.v, self.agnus.pos.h);

        if self.agnus.events.is_due(SlotId::Ras, clock) {
            self.agnus.hsync(&mut self.host);
        }
        if self.agnus.events.is_due(SlotId::Reg, clock) {
            self.service_reg_event();
        }
        for slot in [SlotId::CiaA, SlotId::CiaB] {
            if self.agnus.events.is_due(slot, clock) {
                self.service_external_event(slot);
            }
        }
        if self.agnus.events.is_due(SlotId::Bpl, clock) {
            self.agnus.service_bpl_event(&mut self.host);
        }
        if self.agnus.events.is_due(SlotId::Das, clock) {
            self.agnus.service_das_event(&mut self.host);
        }
        if self.agnus.events.is_due(SlotId::Cop, clock) {
            let blitting = self.blitter.is_active();
            if let Some((addr, value)) = self.copper.service_event(&mut self.agnus, &mut self.host, blitting) {
                self.poke_custom(Accessor::Copper, addr, value);
            }
        }
        if self.agnus.events.is_due(SlotId::Blt, clock) {
            self.blitter
                .service_event(&mut self.agnus, &mut self.copper, &mut self.host);
        }
        if self.agnus.events.is_due(SlotId::Sec, clock) {
            self.service_secondary_events();
        }

        self.agnus.events.refresh_next_trigger();
    }

    fn service_reg_event(&mut self) {
        let clock = self.agnus.clock;
        while let Some(change) = self.agnus.recorder.pop_due(clock) {
            match change.target {
                RegTarget::BltCon0
                | RegTarget::BltCon0L
                | RegTarget::BltCon1
                | RegTarget::BltSize
                | RegTarget::BltSizV => {
                    self.blitter
                        .apply_change(&mut self.agnus, change.target, change.value);
                }
                target => self.agnus.apply_change(target, change.value),
            }
        }
        self.agnus.schedule_next_reg_event();
    }

    fn service_secondary_events(&mut self) {
        let clock = self.agnus.clock;
        for slot in SlotId::SECONDARY {
            if !self.agnus.events.is_due(slot, clock) {
                continue;
            }
            if slot == SlotId::Vbl {
                self.agnus.service_vbl_event(&mut self.host);
            } else {
                self.service_external_event(slot);
            }
        }
        self.agnus.events.refresh_secondary_trigger();
    }

    fn service_external_event(&mut self, slot: SlotId) {
        let (id, data) = (self.agnus.events.id(slot), self.agnus.events.data(slot));
        match self.host.service_event(slot, id, data) {
            Some((cycle, next)) => self.agnus.events.schedule_abs(slot, cycle, next),
            None => self.agnus.events.cancel(slot),
        }
    }

    /// Schedules an event in a slot owned by the host.
    pub fn schedule_external(&mut self, slot: SlotId, cycle: Cycle, id: EventId) {
        debug_assert!(!matches!(
            slot,
            SlotId::Ras | SlotId::Reg | SlotId::Bpl | SlotId::Das | SlotId::Cop | SlotId::Blt | SlotId::Sec | SlotId::Vbl
        ));
        self.agnus.events.schedule_abs(slot, cycle, id);
    }

    //
    // Custom registers
    //

    /// DMACONR: DMACON plus the Blitter status bits.
    #[must_use]
    pub const fn dmaconr(&self) -> u16 {
        let mut result = self.agnus.dmacon;
        if self.blitter.is_busy() {
            result |= BBUSY;
        }
        if self.blitter.is_zero() {
            result |= BZERO;
        }
        result
    }

    /// Reads a register handled by the chipset core. Returns `None` for
    /// registers that belong to other chips.
    #[must_use]
    pub fn peek_custom(&self, addr: u16) -> Option<u16> {
        match addr & 0x1FE {
            reg::DMACONR => Some(self.dmaconr()),
            reg::VPOSR => Some(self.agnus.peek_vposr()),
            reg::VHPOSR => Some(self.agnus.peek_vhposr()),
            _ => None,
        }
    }

    /// Custom register write by the CPU or the Copper.
    pub fn poke_custom(&mut self, accessor: Accessor, addr: u16, value: u16) {
        let addr = addr & 0x1FE;
        trace!("{accessor:?} writes {addr:#05x} = {value:#06x}");

        let agnus = &mut self.agnus;
        let blitter = &mut self.blitter;
        match addr {
            reg::DMACON => {
                agnus.poke_dmacon(value);
            }
            reg::VPOSW => agnus.poke_vpos(value),
            reg::VHPOSW => {}
            reg::COPCON => self.copper.poke_copcon(value),
            reg::COP1LCH => self.copper.poke_cop1lch(value),
            reg::COP1LCL => self.copper.poke_cop1lcl(value),
            reg::COP2LCH => self.copper.poke_cop2lch(value),
            reg::COP2LCL => self.copper.poke_cop2lcl(value),
            reg::COPJMP1 => self.copper.poke_copjmp(agnus, 1),
            reg::COPJMP2 => self.copper.poke_copjmp(agnus, 2),
            reg::COPINS => {}
            reg::DSKPTH => agnus.dskpt = (agnus.dskpt & 0x0000_FFFF) | (u32::from(value) << 16),
            reg::DSKPTL => agnus.dskpt = (agnus.dskpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),

            reg::DIWSTRT => agnus.record_change(2, RegTarget::DiwStrt, value),
            reg::DIWSTOP => agnus.record_change(2, RegTarget::DiwStop, value),
            reg::DDFSTRT => agnus.record_change(2, RegTarget::DdfStrt, value),
            reg::DDFSTOP => agnus.record_change(2, RegTarget::DdfStop, value),
            reg::BPL1MOD => agnus.record_change(2, RegTarget::Bpl1Mod, value),
            reg::BPL2MOD => agnus.record_change(2, RegTarget::Bpl2Mod, value),
            reg::BPLCON0 => {
                agnus.poke_bplcon0(value);
                self.host.write_custom(accessor, addr, value);
            }
            reg::BPLCON1 => {
                agnus.poke_bplcon1(value);
                self.host.write_custom(accessor, addr, value);
            }
            0x0E0..=0x0F6 => {
                let nr = ((addr - reg::BPL1PTH) >> 2) as u8;
                let target = if addr & 2 == 0 { RegTarget::BplPtH(nr) } else { RegTarget::BplPtL(nr) };
                agnus.record_change(2, target, value);
            }
            0x120..=0x13E => {
                let nr = ((addr - reg::SPR0PTH) >> 2) as u8;
                let target = if addr & 2 == 0 { RegTarget::SprPtH(nr) } else { RegTarget::SprPtL(nr) };
                agnus.record_change(2, target, value);
            }
            0x140..=0x17E => {
                let nr = usize::from((addr - reg::SPR0POS) >> 3);
                match addr & 6 {
                    0 => agnus.set_spr_pos(nr, value),
                    2 => agnus.set_spr_ctl(nr, value),
                    _ => {}
                }
                self.host.write_custom(accessor, addr, value);
            }
            0x0A0..=0x0DE => {
                let channel = usize::from((addr - reg::AUD0LCH) >> 4);
                match addr & 0xE {
                    0 => agnus.audlc[channel] = (agnus.audlc[channel] & 0x0000_FFFF) | (u32::from(value) << 16),
                    2 => agnus.audlc[channel] = (agnus.audlc[channel] & 0xFFFF_0000) | u32::from(value & 0xFFFE),
                    _ => self.host.write_custom(accessor, addr, value),
                }
            }

            reg::BLTCON0 => blitter.poke_bltcon0(agnus, value),
            reg::BLTCON0L => blitter.poke_bltcon0l(agnus, value),
            reg::BLTCON1 => blitter.poke_bltcon1(agnus, value),
            reg::BLTAFWM => blitter.poke_bltafwm(value),
            reg::BLTALWM => blitter.poke_bltalwm(value),
            reg::BLTAPTH => blitter.poke_pointer(Channel::A, value, true),
            reg::BLTAPTL => blitter.poke_pointer(Channel::A, value, false),
            reg::BLTBPTH => blitter.poke_pointer(Channel::B, value, true),
            reg::BLTBPTL => blitter.poke_pointer(Channel::B, value, false),
            reg::BLTCPTH => blitter.poke_pointer(Channel::C, value, true),
            reg::BLTCPTL => blitter.poke_pointer(Channel::C, value, false),
            reg::BLTDPTH => blitter.poke_pointer(Channel::D, value, true),
            reg::BLTDPTL => blitter.poke_pointer(Channel::D, value, false),
            reg::BLTSIZE => blitter.poke_bltsize(agnus, accessor, value),
            reg::BLTSIZV => blitter.poke_bltsizv(agnus, value),
            reg::BLTSIZH => blitter.poke_bltsizh(agnus, value),
            reg::BLTAMOD => blitter.poke_modulo(Channel::A, value),
            reg::BLTBMOD => blitter.poke_modulo(Channel::B, value),
            reg::BLTCMOD => blitter.poke_modulo(Channel::C, value),
            reg::BLTDMOD => blitter.poke_modulo(Channel::D, value),
            reg::BLTADAT => blitter.poke_bltadat(value),
            reg::BLTBDAT => blitter.poke_bltbdat(value),
            reg::BLTCDAT => blitter.poke_bltcdat(value),

            _ => self.host.write_custom(accessor, addr, value),
        }
    }
}

impl<H: Host> Tickable for Chipset<H> {
    fn tick(&mut self) {
        self.tick_n(Ticks::new(1));
    }

    fn tick_n(&mut self, count: Ticks) {
        let per_cycle = self.ticks_per_cycle();
        let total = u64::from(self.phase) + count.get();
        let cycles = (total / per_cycle) as i64;
        self.phase = (total % per_cycle) as u8;
        if cycles > 0 {
            let target = self.agnus.clock + dma_cycles(cycles);
            self.run_until(target);
        }
    }
}

const QUERY_PATHS: &[&str] = &[
    "agnus.clock",
    "agnus.v",
    "agnus.h",
    "agnus.frame",
    "agnus.lof",
    "agnus.dmacon",
    "agnus.bplcon0",
    "agnus.ddfstrt",
    "agnus.ddfstop",
    "agnus.diwstrt",
    "agnus.diwstop",
    "agnus.bls",
    "copper.pc",
    "copper.list",
    "copper.cop1lc",
    "copper.cop2lc",
    "blitter.busy",
    "blitter.zero",
    "blitter.active",
    "blitter.bltcon0",
    "blitter.bltcon1",
    "blitter.bltsize",
];

impl<H: Host> Observable for Chipset<H> {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(field) = path.strip_prefix("agnus.") {
            let agnus = &self.agnus;
            return match field {
                "clock" => Some((agnus.clock as u64).into()),
                "v" => Some((agnus.pos.v as u16).into()),
                "h" => Some((agnus.pos.h as u16).into()),
                "frame" => Some(agnus.frame.nr.into()),
                "lof" => Some(agnus.frame.lof.into()),
                "dmacon" => Some(agnus.dmacon.into()),
                "bplcon0" => Some(agnus.bplcon0.into()),
                "ddfstrt" => Some(agnus.ddfstrt.into()),
                "ddfstop" => Some(agnus.ddfstop.into()),
                "diwstrt" => Some(agnus.diwstrt.into()),
                "diwstop" => Some(agnus.diwstop.into()),
                "bls" => Some(agnus.bus.bls.into()),
                _ => None,
            };
        }
        if let Some(field) = path.strip_prefix("copper.") {
            return match field {
                "pc" => Some(self.copper.pc.into()),
                "list" => Some(self.copper.list.into()),
                "cop1lc" => Some(self.copper.cop1lc.into()),
                "cop2lc" => Some(self.copper.cop2lc.into()),
                _ => None,
            };
        }
        if let Some(field) = path.strip_prefix("blitter.") {
            let blitter = &self.blitter;
            return match field {
                "busy" => Some(blitter.is_busy().into()),
                "zero" => Some(blitter.is_zero().into()),
                "active" => Some(blitter.is_active().into()),
                "bltcon0" => Some(blitter.bltcon0.into()),
                "bltcon1" => Some(blitter.bltcon1.into()),
                "bltsize" => Some(((u32::from(blitter.bltsize_v) << 16) | u32::from(blitter.bltsize_h)).into()),
                _ => None,
            };
        }
        None
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlitterAccuracy;
    use crate::dma::dmacon;
    use crate::host::ChipRam;

    fn chipset() -> Chipset<ChipRam> {
        Chipset::new(ChipsetConfig::a500(), ChipRam::new(0x8_0000))
    }

    #[test]
    fn rejected_config_values_leave_the_config_alone() {
        let mut cs = chipset();
        assert!(!cs.set_config_item(ConfigOption::BlitterAccuracy, 7));
        assert_eq!(cs.config().blitter_accuracy, BlitterAccuracy::Slow);
        assert!(cs.set_config_item(ConfigOption::BlitterAccuracy, 0));
        assert!(!cs.set_config_item(ConfigOption::BlitterAccuracy, 0));
        assert_eq!(cs.config_item(ConfigOption::BlitterAccuracy), 0);
    }

    #[test]
    fn ticks_execute_one_cycle_per_eight() {
        let mut cs = chipset();
        cs.tick_n(Ticks::new(7));
        assert_eq!(cs.clock(), 0);
        cs.tick();
        assert_eq!(cs.clock(), 8);
        cs.tick_n(Ticks::new(8 * 300));
        assert_eq!(cs.clock(), 8 * 301);
        assert_eq!(cs.agnus.pos.v, 1);
        assert_eq!(cs.agnus.pos.h, 301 - HPOS_CNT);
    }

    #[test]
    fn skipping_matches_stepping() {
        let mut stepped = chipset();
        let mut skipped = chipset();
        stepped.poke_custom(Accessor::Cpu, reg::DMACON, dmacon::SETCLR | dmacon::DMAEN | dmacon::SPREN);
        skipped.poke_custom(Accessor::Cpu, reg::DMACON, dmacon::SETCLR | dmacon::DMAEN | dmacon::SPREN);

        let target = dma_cycles(3 * HPOS_CNT as i64 + 17);
        while stepped.clock() < target {
            stepped.execute();
        }
        skipped.run_until(target);
        assert_eq!(stepped.agnus, skipped.agnus);
    }

    #[test]
    fn dmaconr_reports_blitter_status() {
        let mut cs = chipset();
        cs.poke_custom(Accessor::Cpu, reg::DMACON, dmacon::SETCLR | dmacon::DMAEN | dmacon::BLTEN);
        assert_eq!(cs.peek_custom(reg::DMACONR), Some(dmacon::DMAEN | dmacon::BLTEN));

        cs.poke_custom(Accessor::Cpu, reg::BLTSIZE, (1 << 6) | 1);
        cs.run_until(cs.clock() + dma_cycles(2));
        let status = cs.peek_custom(reg::DMACONR).unwrap_or_default();
        assert_eq!(status & (BBUSY | BZERO), BBUSY | BZERO);
    }

    #[test]
    fn unknown_registers_go_to_the_host() {
        let mut cs = chipset();
        assert_eq!(cs.peek_custom(0x180), None);
        cs.poke_custom(Accessor::Cpu, 0x180, 0x0FFF);
        assert!(cs.agnus.recorder.is_empty());
    }

    // Host that reschedules its event slot at the queued cycles, then lets
    // it lapse.
    struct ExternalHost {
        ram: ChipRam,
        follow_ups: Vec<Cycle>,
        serviced: Vec<(SlotId, EventId)>,
    }

    impl Host for ExternalHost {
        fn read_word(&mut self, _owner: BusOwner, addr: u32) -> u16 {
            self.ram.peek(addr)
        }

        fn write_word(&mut self, _owner: BusOwner, addr: u32, value: u16) {
            self.ram.poke(addr, value);
        }

        fn service_event(&mut self, slot: SlotId, id: EventId, _data: i64) -> Option<(Cycle, EventId)> {
            self.serviced.push((slot, id));
            let cycle = self.follow_ups.pop()?;
            let EventId::External(n) = id else { return None };
            Some((cycle, EventId::External(n + 1)))
        }
    }

    #[test]
    fn external_events_follow_the_host_answer() {
        let host = ExternalHost {
            ram: ChipRam::new(0x8_0000),
            follow_ups: vec![dma_cycles(40)],
            serviced: Vec::new(),
        };
        let mut cs = Chipset::new(ChipsetConfig::a500(), host);
        cs.schedule_external(SlotId::Kbd, dma_cycles(10), EventId::External(1));

        cs.run_until(dma_cycles(30));
        assert_eq!(cs.host.serviced, vec![(SlotId::Kbd, EventId::External(1))]);
        assert_eq!(cs.agnus.events.trigger(SlotId::Kbd), dma_cycles(40));

        // No follow-up: the slot is cleared instead of firing again.
        cs.run_until(dma_cycles(100));
        assert_eq!(
            cs.host.serviced,
            vec![(SlotId::Kbd, EventId::External(1)), (SlotId::Kbd, EventId::External(2))]
        );
        assert!(!cs.agnus.events.is_pending(SlotId::Kbd));
        assert!(!cs.agnus.events.has_event(SlotId::Kbd));
    }

    #[test]
    fn observable_paths_resolve() {
        let mut cs = chipset();
        cs.run_until(dma_cycles(HPOS_CNT as i64 + 5));
        for path in cs.query_paths() {
            assert!(cs.query(path).is_some(), "{path}");
        }
        assert_eq!(cs.query("agnus.v"), Some(Value::U16(1)));
        assert_eq!(cs.query("agnus.h"), Some(Value::U16(5)));
        assert_eq!(cs.query("blitter.busy"), Some(Value::Bool(false)));
        assert_eq!(cs.query("agnus.nope"), None);
    }
}
