//! Commodore Agnus chipset core: beam counter, event scheduler, DMA
//! arbitration, Copper and Blitter.
//!
//! Time is counted in master cycles; one DMA (colour clock) cycle is 8 of
//! them. All agents are state machines driven from a fixed table of event
//! slots. [`Chipset`] dispatches due slots once per DMA cycle in slot order,
//! which also fixes the precedence between agents competing for the bus.
//!
//! Memory, the display and audio chips, the CIAs and the disk controller are
//! outside the core and reached through the [`Host`] trait.

pub mod agnus;
pub mod beam;
pub mod blitter;
pub mod bus;
pub mod chipset;
pub mod config;
pub mod copper;
pub mod ddf;
pub mod dma;
pub mod event;
pub mod host;
pub mod registers;
pub mod state;

pub use agnus::Agnus;
pub use beam::{Beam, Frame, HPOS_CNT, HPOS_MAX};
pub use blitter::{Blitter, Channel};
pub use bus::{BusArbiter, BusOwner, BusStats};
pub use chipset::Chipset;
pub use config::{AgnusVariant, BlitterAccuracy, ChipsetConfig, ConfigError, ConfigOption, Region};
pub use copper::Copper;
pub use event::{Cycle, EventId, NEVER, SlotId, dma_cycles};
pub use host::{Accessor, ChipRam, Host, Irq};
pub use registers::reg;
pub use state::{ChipsetState, StateError};
