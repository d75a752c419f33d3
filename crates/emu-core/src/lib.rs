//! Timing and inspection traits shared by the chipset cores.
//!
//! Time is counted in ticks of the master crystal. A chip that runs on a
//! divided clock keeps its own phase against it.

mod clock;
mod observable;
mod tickable;
mod ticks;

pub use clock::MasterClock;
pub use observable::{Observable, Value};
pub use tickable::Tickable;
pub use ticks::Ticks;
