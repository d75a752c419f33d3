//! Blitter micro-programs and their interpreter.
//!
//! A program is six micro-instructions. Instruction 0 up to the one carrying
//! [`REPEAT`] form the per-word loop; the instructions after it drain the
//! pipeline and end the blit. Each instruction takes one bus cycle and is
//! retried in the next cycle while the bus it needs is taken.
//!
//! The copy programs are indexed by the channel mask (BLTCON0 USEA..USED,
//! A in bit 3) and by the fill flag. The same programs drive the real slow
//! Blitter and the fake pass that only replays the bus timing.

use log::trace;

use super::Blitter;
use super::logic::{barrel, fill, minterm};
use crate::agnus::Agnus;
use crate::bus::BusOwner;
use crate::copper::Copper;
use crate::host::Host;

/// No action.
pub const NOTHING: u16 = 0x0000;
/// Waits for a free bus without using it.
pub const BUSIDLE: u16 = 0x0001;
/// Waits for a free bus and claims it.
pub const BUS: u16 = 0x0002;
/// Writes the D hold register.
pub const WRITE_D: u16 = 0x0004;
pub const FETCH_A: u16 = 0x0008;
pub const FETCH_B: u16 = 0x0010;
pub const FETCH_C: u16 = 0x0020;
/// Runs the barrel shifter of channel A.
pub const HOLD_A: u16 = 0x0040;
/// Runs the barrel shifter of channel B.
pub const HOLD_B: u16 = 0x0080;
/// Runs the minterm logic into the D hold register.
pub const HOLD_D: u16 = 0x0100;
/// Runs the fill circuit on the D hold register.
pub const FILL: u16 = 0x0200;
/// Drops BBUSY on first execution and ends the blit.
pub const BLTDONE: u16 = 0x0400;
/// Loops back to instruction 0 while words remain.
pub const REPEAT: u16 = 0x0800;
pub const FETCH: u16 = FETCH_A | FETCH_B | FETCH_C;

const DONE: u16 = BLTDONE;

/// Copy programs, `[channel mask][fill]`.
pub const COPY: [[[u16; 6]; 2]; 16] = [
    // -
    [
        [BUSIDLE, BUSIDLE | REPEAT, NOTHING, DONE, DONE, DONE],
        [BUSIDLE, BUSIDLE | REPEAT, NOTHING, DONE, DONE, DONE],
    ],
    // D
    [
        [HOLD_D | BUSIDLE, WRITE_D | HOLD_A | HOLD_B | REPEAT, HOLD_D, WRITE_D | DONE, DONE, DONE],
        [
            FILL | HOLD_D | BUSIDLE,
            WRITE_D,
            BUSIDLE | HOLD_A | HOLD_B | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
            DONE,
        ],
    ],
    // C
    [
        [HOLD_D | BUSIDLE, FETCH_C | HOLD_A | HOLD_B | REPEAT, HOLD_D, DONE, DONE, DONE],
        [FILL | HOLD_D | BUSIDLE, FETCH_C | HOLD_A | HOLD_B | REPEAT, FILL | HOLD_D, DONE, DONE, DONE],
    ],
    // CD
    [
        [HOLD_D | BUSIDLE, FETCH_C | HOLD_A | HOLD_B, WRITE_D | REPEAT, HOLD_D, WRITE_D | DONE, DONE],
        [
            FILL | HOLD_D | BUSIDLE,
            FETCH_C | HOLD_A | HOLD_B,
            WRITE_D | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
            DONE,
        ],
    ],
    // B
    [
        [HOLD_D | BUSIDLE, FETCH_B | HOLD_A, HOLD_B | BUSIDLE | REPEAT, HOLD_D, DONE, DONE],
        [FILL | HOLD_D | BUSIDLE, FETCH_B | HOLD_A, HOLD_B | BUSIDLE | REPEAT, FILL | HOLD_D, DONE, DONE],
    ],
    // BD
    [
        [BUSIDLE | HOLD_D, FETCH_B | HOLD_A, WRITE_D | HOLD_B | REPEAT, HOLD_D, WRITE_D | DONE, DONE],
        [
            BUSIDLE | FILL | HOLD_D,
            FETCH_B | HOLD_A,
            WRITE_D | HOLD_B,
            BUSIDLE | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
        ],
    ],
    // BC
    [
        [BUSIDLE | HOLD_D, FETCH_B | HOLD_A, FETCH_C | HOLD_B | REPEAT, HOLD_D, DONE, DONE],
        [BUSIDLE | FILL | HOLD_D, FETCH_B | HOLD_A, FETCH_C | HOLD_B | REPEAT, FILL | HOLD_D, DONE, DONE],
    ],
    // BCD
    [
        [BUSIDLE | HOLD_D, FETCH_B | HOLD_A, FETCH_C | HOLD_B, WRITE_D | REPEAT, HOLD_D, WRITE_D | DONE],
        [
            BUSIDLE | FILL | HOLD_D,
            FETCH_B | HOLD_A,
            FETCH_C | HOLD_B,
            WRITE_D | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
        ],
    ],
    // A
    [
        [FETCH_A | HOLD_D, HOLD_A | HOLD_B | BUSIDLE | REPEAT, HOLD_D, DONE, DONE, DONE],
        [FETCH_A | FILL | HOLD_D, HOLD_A | HOLD_B | BUSIDLE | REPEAT, FILL | HOLD_D, DONE, DONE, DONE],
    ],
    // AD
    [
        [FETCH_A | HOLD_D, WRITE_D | HOLD_A | HOLD_B | REPEAT, HOLD_D, WRITE_D | DONE, DONE, DONE],
        [
            FETCH_A | FILL | HOLD_D,
            WRITE_D | HOLD_A | HOLD_B,
            BUSIDLE | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
            DONE,
        ],
    ],
    // AC
    [
        [FETCH_A | HOLD_D, FETCH_C | HOLD_A | HOLD_B | REPEAT, HOLD_D, DONE, DONE, DONE],
        [FETCH_A | FILL | HOLD_D, FETCH_C | HOLD_A | HOLD_B | REPEAT, FILL | HOLD_D, DONE, DONE, DONE],
    ],
    // ACD
    [
        [FETCH_A | HOLD_D, FETCH_C | HOLD_A | HOLD_B, WRITE_D | REPEAT, HOLD_D, WRITE_D | DONE, DONE],
        [
            FETCH_A | FILL | HOLD_D,
            FETCH_C | HOLD_A | HOLD_B,
            WRITE_D | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
            DONE,
        ],
    ],
    // AB
    [
        [FETCH_A | HOLD_D, FETCH_B | HOLD_A, HOLD_B | BUSIDLE | REPEAT, HOLD_D, DONE, DONE],
        [FETCH_A | FILL | HOLD_D, FETCH_B | HOLD_A, HOLD_B | BUSIDLE | REPEAT, FILL | HOLD_D, DONE, DONE],
    ],
    // ABD
    [
        [FETCH_A | HOLD_D, FETCH_B | HOLD_A, WRITE_D | HOLD_B | REPEAT, HOLD_D, WRITE_D | DONE, DONE],
        [
            FETCH_A | FILL | HOLD_D,
            FETCH_B | HOLD_A,
            WRITE_D | HOLD_B,
            BUSIDLE | REPEAT,
            FILL | HOLD_D,
            WRITE_D | DONE,
        ],
    ],
    // ABC
    [
        [FETCH_A | HOLD_D, FETCH_B | HOLD_A, FETCH_C | HOLD_B | REPEAT, HOLD_D, DONE, DONE],
        [FETCH_A | FILL | HOLD_D, FETCH_B | HOLD_A, FETCH_C | HOLD_B | REPEAT, FILL | HOLD_D, DONE, DONE],
    ],
    // ABCD. With fill, the drain step runs without the fill circuit.
    [
        [FETCH_A | HOLD_D, FETCH_B | HOLD_A, FETCH_C | HOLD_B, WRITE_D | REPEAT, HOLD_D, WRITE_D | DONE],
        [
            FETCH_A | FILL | HOLD_D,
            FETCH_B | HOLD_A,
            FETCH_C | HOLD_B,
            WRITE_D | REPEAT,
            HOLD_D,
            WRITE_D | DONE,
        ],
    ],
];

/// Bus pattern of a line blit. Only replayed after the fast line Blitter
/// produced the result.
pub const LINE: [u16; 6] = [BUSIDLE, FETCH_C, BUSIDLE, WRITE_D | REPEAT, NOTHING, WRITE_D | DONE];

// Advances a channel pointer by one word and adds the modulo at the end of
// a row.
fn step(ptr: &mut u32, count: &mut u16, width: u16, modulo: i16, desc: bool) {
    let (incr, modulo) = if desc {
        (-2, -i32::from(modulo))
    } else {
        (2, i32::from(modulo))
    };
    *ptr = ptr.wrapping_add_signed(incr);
    *count = count.saturating_sub(1);
    if *count == 0 {
        *ptr = ptr.wrapping_add_signed(modulo);
        *count = width;
    }
}

impl Blitter {
    /// Bus handling shared by both interpreters. Returns false if the
    /// instruction has to be retried in the next cycle.
    fn acquire<H: Host>(&mut self, op: u16, agnus: &mut Agnus, host: &mut H) -> bool {
        let (bus, busidle) = if op & WRITE_D != 0 {
            (!self.lock_d, self.lock_d)
        } else {
            (op & (FETCH | BUS) != 0, op & BUSIDLE != 0)
        };

        // BBUSY drops with the first attempt of the final instruction.
        if op & BLTDONE != 0 && !self.birq {
            self.signal_end(host);
        }

        if bus && !agnus.allocate_bus(BusOwner::Blitter) {
            return false;
        }
        if busidle && !agnus.bus_is_free(BusOwner::Blitter) {
            return false;
        }
        self.bltpc += 1;
        true
    }

    fn repeat(&mut self) {
        self.iteration += 1;
        self.lock_d = false;

        if self.x_counter > 1 {
            self.bltpc = 0;
            self.set_x_counter(self.x_counter - 1);
        } else if self.y_counter > 1 {
            self.bltpc = 0;
            self.reset_x_counter();
            self.y_counter -= 1;
        }
    }

    /// Executes one instruction of the slow Blitter.
    pub(super) fn exec<H: Host>(&mut self, op: u16, agnus: &mut Agnus, copper: &mut Copper, host: &mut H) {
        if !self.acquire(op, agnus, host) {
            return;
        }
        trace!("blitter op {op:#06x} pc {} x {} y {}", self.bltpc - 1, self.x_counter, self.y_counter);

        let desc = self.desc();
        let width = self.bltsize_h;

        if op & WRITE_D != 0 && !self.lock_d {
            agnus.dma_write(host, BusOwner::Blitter, self.bltdpt, self.dhold);
            let before = self.cnt_d;
            step(&mut self.bltdpt, &mut self.cnt_d, width, self.bltdmod, desc);
            if before == 1 {
                self.fill_carry = self.fci();
            }
        }
        if op & FETCH_A != 0 {
            self.anew = agnus.dma_read(host, BusOwner::Blitter, self.bltapt);
            step(&mut self.bltapt, &mut self.cnt_a, width, self.bltamod, desc);
        }
        if op & FETCH_B != 0 {
            self.bnew = agnus.dma_read(host, BusOwner::Blitter, self.bltbpt);
            step(&mut self.bltbpt, &mut self.cnt_b, width, self.bltbmod, desc);
        }
        if op & FETCH_C != 0 {
            self.chold = agnus.dma_read(host, BusOwner::Blitter, self.bltcpt);
            step(&mut self.bltcpt, &mut self.cnt_c, width, self.bltcmod, desc);
        }
        if op & HOLD_A != 0 {
            let masked = self.anew & self.mask;
            self.ahold = barrel(masked, self.aold, self.ash(), desc);
            self.aold = masked;
        }
        if op & HOLD_B != 0 {
            self.bhold = barrel(self.bnew, self.bold, self.bsh(), desc);
            self.bold = self.bnew;
        }
        if op & HOLD_D != 0 {
            self.dhold = minterm(self.ahold, self.bhold, self.chold, self.minterm_select());
            if !self.lock_d {
                if op & FILL != 0 {
                    let efe = self.efe();
                    self.dhold = fill(self.dhold, &mut self.fill_carry, efe);
                }
                if self.dhold != 0 {
                    self.bzero = false;
                }
            }
        }
        if op & REPEAT != 0 {
            self.repeat();
        }
        if op & BLTDONE != 0 {
            self.end_blit(agnus, copper);
        }
    }

    /// Replays the bus pattern of an instruction without touching memory.
    pub(super) fn fake_exec<H: Host>(&mut self, op: u16, agnus: &mut Agnus, copper: &mut Copper, host: &mut H) {
        if !self.acquire(op, agnus, host) {
            return;
        }
        if op & FETCH != 0 || (op & WRITE_D != 0 && !self.lock_d) {
            agnus.bus.record(agnus.pos.h, BusOwner::Blitter, 0x8888);
        }
        if op & REPEAT != 0 {
            self.repeat();
        }
        if op & BLTDONE != 0 {
            self.end_blit(agnus, copper);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_length(program: &[u16; 6]) -> usize {
        program
            .iter()
            .position(|op| op & REPEAT != 0)
            .map_or(0, |i| i + 1)
    }

    #[test]
    fn loop_lengths_match_the_channel_mask() {
        let plain: Vec<usize> = COPY.iter().map(|p| loop_length(&p[0])).collect();
        let filled: Vec<usize> = COPY.iter().map(|p| loop_length(&p[1])).collect();
        pretty_assertions::assert_eq!(plain, vec![2, 2, 2, 3, 3, 3, 3, 4, 2, 2, 2, 3, 3, 3, 3, 4]);
        pretty_assertions::assert_eq!(filled, vec![2, 3, 2, 3, 3, 4, 3, 4, 2, 3, 2, 3, 3, 4, 3, 4]);
    }

    #[test]
    fn every_program_ends_the_blit() {
        for (mask, variants) in COPY.iter().enumerate() {
            for program in variants {
                assert_eq!(program.iter().filter(|op| *op & REPEAT != 0).count(), 1, "mask {mask}");
                assert!(program[5] & BLTDONE != 0, "mask {mask}");
                // Each loop fetches exactly the enabled source channels.
                let fetched = program.iter().fold(0, |acc, op| acc | (op & FETCH));
                let expected = (if mask & 8 != 0 { FETCH_A } else { 0 })
                    | (if mask & 4 != 0 { FETCH_B } else { 0 })
                    | (if mask & 2 != 0 { FETCH_C } else { 0 });
                assert_eq!(fetched, expected, "mask {mask}");
                let writes = program.iter().any(|op| op & WRITE_D != 0);
                assert_eq!(writes, mask & 1 != 0, "mask {mask}");
            }
        }
    }

    #[test]
    fn fill_variants_only_differ_by_fill_bits_unless_reordered() {
        for mask in [0, 2, 3, 4, 6, 7, 8, 10, 11, 12, 14, 15] {
            for (plain, filled) in COPY[mask][0].iter().zip(&COPY[mask][1]) {
                assert_eq!(plain & !FILL, filled & !FILL, "mask {mask}");
            }
        }
    }

    #[test]
    fn step_adds_modulo_after_the_last_word() {
        let (mut ptr, mut count) = (0x1000, 2);
        step(&mut ptr, &mut count, 2, 10, false);
        assert_eq!((ptr, count), (0x1002, 1));
        step(&mut ptr, &mut count, 2, 10, false);
        assert_eq!((ptr, count), (0x100E, 2));

        let (mut ptr, mut count) = (0x1000, 1);
        step(&mut ptr, &mut count, 1, 4, true);
        assert_eq!((ptr, count), (0x0FFA, 1));
    }
}
