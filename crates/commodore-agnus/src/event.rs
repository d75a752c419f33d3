//! Event slots and the two-tier scheduler table.
//!
//! Each slot holds at most one pending event. Primary slots are checked on
//! every DMA cycle; secondary slots are only checked when the `Sec` slot,
//! whose trigger tracks the earliest secondary trigger, becomes due. Slots
//! are dispatched in ascending id order within one cycle.

use serde::{Deserialize, Serialize};

/// Master clock cycle. One DMA cycle spans eight master cycles.
pub type Cycle = i64;

/// Trigger value of a parked slot.
pub const NEVER: Cycle = i64::MAX;

/// Converts DMA cycles to master cycles.
#[must_use]
pub const fn dma_cycles(count: i64) -> Cycle {
    count * 8
}

/// Converts master cycles to whole DMA cycles.
#[must_use]
pub const fn as_dma_cycles(cycles: Cycle) -> i64 {
    cycles >> 3
}

/// Scheduler slot, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SlotId {
    /// Raster (hsync).
    Ras,
    /// Delayed register changes.
    Reg,
    CiaA,
    CiaB,
    /// Bitplane DMA.
    Bpl,
    /// Disk, audio, sprite DMA.
    Das,
    Cop,
    Blt,
    /// Wakeup for the secondary tier.
    Sec,
    Ch0,
    Ch1,
    Ch2,
    Ch3,
    Dsk,
    /// Disk change.
    Dch,
    /// Vertical blank strobes.
    Vbl,
    Irq,
    Kbd,
    Txd,
    Rxd,
    Pot,
    Ipl,
    /// Periodic inspection.
    Ins,
}

impl SlotId {
    pub const COUNT: usize = 23;

    /// Primary slots, excluding `Sec`.
    pub const PRIMARY: [Self; 8] = [
        Self::Ras,
        Self::Reg,
        Self::CiaA,
        Self::CiaB,
        Self::Bpl,
        Self::Das,
        Self::Cop,
        Self::Blt,
    ];

    pub const SECONDARY: [Self; 14] = [
        Self::Ch0,
        Self::Ch1,
        Self::Ch2,
        Self::Ch3,
        Self::Dsk,
        Self::Dch,
        Self::Vbl,
        Self::Irq,
        Self::Kbd,
        Self::Txd,
        Self::Rxd,
        Self::Pot,
        Self::Ipl,
        Self::Ins,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn is_primary(self) -> bool {
        (self as u8) <= (Self::Sec as u8)
    }

    #[must_use]
    pub const fn is_secondary(self) -> bool {
        !self.is_primary()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasEvent {
    Hsync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegEvent {
    Change,
}

/// Bitplane event: a fetch kind in the upper six bits, drawing flags in the
/// lower two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BplEvent(pub u8);

impl BplEvent {
    pub const NONE: Self = Self(0);
    pub const DRAW_ODD: u8 = 0b01;
    pub const DRAW_EVEN: u8 = 0b10;

    pub const L1: Self = Self(0x04);
    pub const L2: Self = Self(0x08);
    pub const L3: Self = Self(0x0C);
    pub const L4: Self = Self(0x10);
    pub const L5: Self = Self(0x14);
    pub const L6: Self = Self(0x18);
    pub const H1: Self = Self(0x1C);
    pub const H2: Self = Self(0x20);
    pub const H3: Self = Self(0x24);
    pub const H4: Self = Self(0x28);
    /// End of line.
    pub const EOL: Self = Self(0x2C);

    /// The event without its drawing flags.
    #[must_use]
    pub const fn kind(self) -> Self {
        Self(self.0 & !0b11)
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn draw_odd(self) -> bool {
        self.0 & Self::DRAW_ODD != 0
    }

    #[must_use]
    pub const fn draw_even(self) -> bool {
        self.0 & Self::DRAW_EVEN != 0
    }

    #[must_use]
    pub const fn with_flags(self, flags: u8) -> Self {
        Self(self.0 | (flags & 0b11))
    }

    /// Zero-based plane index fetched by this event.
    #[must_use]
    pub const fn plane(self) -> Option<usize> {
        match self.kind().0 {
            k @ 0x04..=0x18 => Some((k as usize >> 2) - 1),
            k @ 0x1C..=0x28 => Some((k as usize >> 2) - 7),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_hires_fetch(self) -> bool {
        matches!(self.kind().0, 0x1C..=0x28)
    }
}

/// Disk, audio and sprite DMA events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DasEvent {
    #[default]
    None,
    Refresh,
    Disk(u8),
    Audio(u8),
    /// First sprite slot (POS or DATA).
    Sprite1(u8),
    /// Second sprite slot (CTL or DATB).
    Sprite2(u8),
    /// Per-line sprite DMA state update.
    Sdma,
    Tick,
    Tick2,
}

impl DasEvent {
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopEvent {
    ReqDma,
    WakeUp,
    WakeUpBlit,
    Fetch,
    Move,
    WaitOrSkip,
    Wait1,
    Wait2,
    WaitBlit,
    Skip1,
    Skip2,
    Jmp1,
    Jmp2,
    Vblank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BltEvent {
    Strt1,
    Strt2,
    CopySlow,
    CopyFake,
    LineFake,
    /// Completion of a blit already performed in one step.
    FastEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecEvent {
    Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VblEvent {
    /// Vertical blank interrupt.
    Strobe0,
    /// CIA A time-of-day tick.
    Strobe1,
    Strobe2,
}

/// Event identifier. Each slot only ever holds its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventId {
    #[default]
    None,
    Ras(RasEvent),
    Reg(RegEvent),
    Bpl(BplEvent),
    Das(DasEvent),
    Cop(CopEvent),
    Blt(BltEvent),
    Sec(SecEvent),
    Vbl(VblEvent),
    /// Owned by an external collaborator.
    External(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub trigger: Cycle,
    pub id: EventId,
    pub data: i64,
}

impl Slot {
    pub const EMPTY: Self = Self {
        trigger: NEVER,
        id: EventId::None,
        data: 0,
    };
}

impl Default for Slot {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Fixed table of event slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTable {
    slots: [Slot; SlotId::COUNT],
    next_trigger: Cycle,
}

impl EventTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; SlotId::COUNT],
            next_trigger: NEVER,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub const fn slot(&self, s: SlotId) -> &Slot {
        &self.slots[s.index()]
    }

    #[must_use]
    pub const fn id(&self, s: SlotId) -> EventId {
        self.slots[s.index()].id
    }

    #[must_use]
    pub const fn trigger(&self, s: SlotId) -> Cycle {
        self.slots[s.index()].trigger
    }

    #[must_use]
    pub const fn data(&self, s: SlotId) -> i64 {
        self.slots[s.index()].data
    }

    /// Earliest trigger of all primary slots.
    #[must_use]
    pub const fn next_trigger(&self) -> Cycle {
        self.next_trigger
    }

    #[must_use]
    pub fn has_event(&self, s: SlotId) -> bool {
        self.id(s) != EventId::None
    }

    #[must_use]
    pub const fn is_pending(&self, s: SlotId) -> bool {
        self.trigger(s) != NEVER
    }

    #[must_use]
    pub const fn is_due(&self, s: SlotId, cycle: Cycle) -> bool {
        cycle >= self.trigger(s)
    }

    pub fn schedule_abs(&mut self, s: SlotId, cycle: Cycle, id: EventId) {
        let slot = &mut self.slots[s.index()];
        slot.trigger = cycle;
        slot.id = id;
        self.lower_triggers(s, cycle);
    }

    pub fn schedule_abs_with_data(&mut self, s: SlotId, cycle: Cycle, id: EventId, data: i64) {
        self.schedule_abs(s, cycle, id);
        self.slots[s.index()].data = data;
    }

    /// Moves the trigger and keeps the event id.
    pub fn reschedule_abs(&mut self, s: SlotId, cycle: Cycle) {
        self.slots[s.index()].trigger = cycle;
        self.lower_triggers(s, cycle);
    }

    pub fn set_data(&mut self, s: SlotId, data: i64) {
        self.slots[s.index()].data = data;
    }

    pub fn cancel(&mut self, s: SlotId) {
        self.slots[s.index()] = Slot::EMPTY;
    }

    fn lower_triggers(&mut self, s: SlotId, cycle: Cycle) {
        if cycle < self.next_trigger {
            self.next_trigger = cycle;
        }
        if s.is_secondary() {
            let sec = &mut self.slots[SlotId::Sec.index()];
            if cycle < sec.trigger {
                sec.trigger = cycle;
            }
        }
    }

    /// Sets the `Sec` trigger to the earliest secondary trigger.
    pub fn refresh_secondary_trigger(&mut self) {
        let next = SlotId::SECONDARY
            .iter()
            .map(|s| self.trigger(*s))
            .min()
            .unwrap_or(NEVER);
        self.slots[SlotId::Sec.index()].trigger = next;
    }

    /// Recomputes the earliest primary trigger.
    pub fn refresh_next_trigger(&mut self) {
        self.next_trigger = self.slots[..=SlotId::Sec.index()]
            .iter()
            .map(|slot| slot.trigger)
            .min()
            .unwrap_or(NEVER);
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}
