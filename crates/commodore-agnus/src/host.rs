//! Collaborators outside the chipset core.
//!
//! The core owns timing and arbitration. Memory, the display and audio
//! consumers, the CIAs and the disk controller are reached through [`Host`].
//! Only memory access is mandatory; every other hook defaults to a no-op.

use serde::{Deserialize, Serialize};

use crate::bus::BusOwner;
use crate::event::{Cycle, EventId, SlotId};

/// Who issued a custom register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessor {
    Cpu,
    Copper,
}

/// Interrupt sources raised by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    /// Vertical blank (INTREQ bit 5).
    Vertb,
    /// Blitter finished (INTREQ bit 6).
    Blit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cia {
    A,
    B,
}

/// Sprite register loaded by sprite DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteReg {
    Pos,
    Ctl,
    Data,
    Datb,
}

/// Direction of a disk DMA slot, as decided by the disk controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskTransfer {
    /// No transfer in this slot.
    #[default]
    Idle,
    /// Word read from the drive, to be stored in memory.
    ToMemory(u16),
    /// The controller wants the next word from memory.
    FromMemory,
}

pub trait Host {
    /// Reads a word on behalf of a DMA channel. Addresses are already masked
    /// to the DMA range.
    fn read_word(&mut self, owner: BusOwner, addr: u32) -> u16;

    fn write_word(&mut self, owner: BusOwner, addr: u32, value: u16);

    /// Custom register write that the core does not handle itself
    /// (colors, Denise, Paula).
    fn write_custom(&mut self, _accessor: Accessor, _reg: u16, _value: u16) {}

    /// Word fetched for bitplane `plane` (zero-based).
    fn bitplane_data(&mut self, _plane: usize, _value: u16) {}

    /// Drawing strobe. `odd`/`even` select the plane groups whose shift
    /// registers load in this cycle.
    fn draw(&mut self, _odd: bool, _even: bool, _hires: bool) {}

    fn sprite_data(&mut self, _sprite: usize, _reg: SpriteReg, _value: u16) {}

    fn audio_data(&mut self, _channel: usize, _value: u16) {}

    /// Polled in each disk DMA slot.
    fn disk_dma(&mut self) -> DiskTransfer {
        DiskTransfer::Idle
    }

    /// Word read from memory for a disk write.
    fn disk_data(&mut self, _value: u16) {}

    fn raise_irq(&mut self, _irq: Irq) {}

    /// Time-of-day counter strobe.
    fn tod_tick(&mut self, _cia: Cia) {}

    /// Services an event in a slot owned by an external collaborator.
    /// Returns the follow-up event, if any.
    fn service_event(&mut self, _slot: SlotId, _id: EventId, _data: i64) -> Option<(Cycle, EventId)> {
        None
    }

    fn end_of_line(&mut self, _v: usize) {}

    fn end_of_frame(&mut self) {}
}

/// Plain chip RAM. Addresses wrap at the RAM size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipRam {
    words: Vec<u16>,
    mask: u32,
}

impl ChipRam {
    /// Creates `size` bytes of RAM. The size is rounded up to a power of two.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(2).next_power_of_two();
        Self {
            words: vec![0; size / 2],
            mask: (size - 1) as u32 & !1,
        }
    }

    #[must_use]
    pub fn peek(&self, addr: u32) -> u16 {
        self.words[((addr & self.mask) >> 1) as usize]
    }

    pub fn poke(&mut self, addr: u32, value: u16) {
        self.words[((addr & self.mask) >> 1) as usize] = value;
    }

    /// Stores consecutive words starting at `addr`.
    pub fn load(&mut self, addr: u32, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            self.poke(addr.wrapping_add(2 * i as u32), *w);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len() * 2
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Host for ChipRam {
    fn read_word(&mut self, _owner: BusOwner, addr: u32) -> u16 {
        self.peek(addr)
    }

    fn write_word(&mut self, _owner: BusOwner, addr: u32, value: u16) {
        self.poke(addr, value);
    }
}
