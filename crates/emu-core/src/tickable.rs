//! Components driven by the master clock.

use crate::Ticks;

pub trait Tickable {
    /// Advances by one master tick.
    fn tick(&mut self);

    /// Advances by `count` master ticks.
    ///
    /// Overrides must end in the same state as `count` calls to `tick`.
    fn tick_n(&mut self, count: Ticks) {
        for _ in 0..count.get() {
            self.tick();
        }
    }
}
