//! Fast Blitter: performs a whole blit in one go.
//!
//! Memory is accessed directly, without claiming bus cycles. Timing is
//! either approximated by a fixed delay or replayed by the fake
//! micro-programs afterwards.

use super::Blitter;
use super::logic::{barrel, fill, minterm};
use crate::bus::BusOwner;
use crate::host::Host;

fn add(ptr: u32, offset: i32) -> u32 {
    ptr.wrapping_add_signed(offset)
}

impl Blitter {
    /// Copy blit over all rows and words.
    pub(super) fn do_fast_copy_blit<H: Host>(&mut self, host: &mut H, ptr_mask: u32) {
        let (use_a, use_b, use_c, use_d) = (self.use_a(), self.use_b(), self.use_c(), self.use_d());
        let desc = self.desc();
        let fill_enabled = self.fill_enabled();
        let exclusive = self.efe();
        let lf = self.minterm_select();

        let incr = if desc { -2 } else { 2 };
        let sign = if desc { -1 } else { 1 };
        let amod = sign * i32::from(self.bltamod);
        let bmod = sign * i32::from(self.bltbmod);
        let cmod = sign * i32::from(self.bltcmod);
        let dmod = sign * i32::from(self.bltdmod);

        let (mut apt, mut bpt, mut cpt, mut dpt) = (self.bltapt, self.bltbpt, self.bltcpt, self.bltdpt);
        self.aold = 0;
        self.bold = 0;

        for _ in 0..self.bltsize_v {
            let mut carry = self.fci();
            let mut mask = self.bltafwm;

            for x in 0..self.bltsize_h {
                if x == self.bltsize_h - 1 {
                    mask &= self.bltalwm;
                }
                if use_a {
                    self.anew = host.read_word(BusOwner::Blitter, apt & ptr_mask);
                    apt = add(apt, incr);
                }
                if use_b {
                    self.bnew = host.read_word(BusOwner::Blitter, bpt & ptr_mask);
                    bpt = add(bpt, incr);
                }
                if use_c {
                    self.chold = host.read_word(BusOwner::Blitter, cpt & ptr_mask);
                    cpt = add(cpt, incr);
                }

                // Channel A is shifted even when disabled.
                let masked = self.anew & mask;
                self.ahold = barrel(masked, self.aold, self.ash(), desc);
                self.aold = masked;
                if use_b {
                    self.bhold = barrel(self.bnew, self.bold, self.bsh(), desc);
                    self.bold = self.bnew;
                }

                self.dhold = minterm(self.ahold, self.bhold, self.chold, lf);
                if fill_enabled {
                    self.dhold = fill(self.dhold, &mut carry, exclusive);
                }
                if self.dhold != 0 {
                    self.bzero = false;
                }
                if use_d {
                    host.write_word(BusOwner::Blitter, dpt & ptr_mask, self.dhold);
                    dpt = add(dpt, incr);
                }
                mask = 0xFFFF;
            }

            if use_a {
                apt = add(apt, amod);
            }
            if use_b {
                bpt = add(bpt, bmod);
            }
            if use_c {
                cpt = add(cpt, cmod);
            }
            if use_d {
                dpt = add(dpt, dmod);
            }
        }

        self.bltapt = apt;
        self.bltbpt = bpt;
        self.bltcpt = cpt;
        self.bltdpt = dpt;
    }

    /// Line blit. BLTAPT holds the decision variable, BLTBMOD and BLTAMOD
    /// its increments, BLTBDAT the texture and BLTCON1 the octant.
    pub(super) fn do_fast_line_blit<H: Host>(&mut self, host: &mut H, ptr_mask: u32) {
        self.bltapt &= ptr_mask;
        self.bltcpt &= ptr_mask;
        self.bltdpt &= ptr_mask;

        let use_a = self.use_a();
        let use_c = self.use_c();
        let lf = self.minterm_select();

        let mut texture = self.bnew.rotate_right(u32::from(self.bsh()));
        let mut cdat = self.chold;
        let mut bdat = 0;
        let mut any_set = 0;

        let mut signed = self.bltcon1 & 0x0040 != 0;
        let mut decision = self.bltapt;
        // With A disabled the decision variable stays put.
        let inc_signed = if use_a { i32::from(self.bltbmod) } else { 0 };
        let inc_unsigned = if use_a { i32::from(self.bltamod) } else { 0 };

        let mut cpt = self.bltcpt;
        let mut dpt = self.bltdpt;
        let mut shift = self.ash();

        let octant = (self.bltcon1 >> 2) & 7;
        let x_independent = octant & 4 != 0;
        let x_inc = if x_independent { octant & 1 == 0 } else { octant & 2 == 0 };
        let y_inc = if x_independent { octant & 2 == 0 } else { octant & 1 == 0 };
        let one_dot = self.bltcon1 & 0x0002 != 0;
        let mut dot_drawn = false;
        let cmod = i32::from(self.bltcmod);

        let step_x = |shift: &mut u16, cpt: &mut u32| {
            if x_inc {
                if *shift < 15 {
                    *shift += 1;
                } else {
                    *shift = 0;
                    *cpt = add(*cpt, 2);
                }
            } else {
                if *shift == 0 {
                    *shift = 16;
                    *cpt = add(*cpt, -2);
                }
                *shift -= 1;
            }
        };
        let step_y = |cpt: &mut u32| *cpt = add(*cpt, if y_inc { cmod } else { -cmod });

        for _ in 0..self.bltsize_v {
            if use_c {
                cdat = host.read_word(BusOwner::Blitter, cpt & ptr_mask);
            }

            let mut adat = (self.anew & self.bltafwm) >> shift;
            if x_independent && one_dot {
                if dot_drawn {
                    adat = 0;
                } else {
                    dot_drawn = true;
                }
            }
            bdat = if texture & 1 != 0 { 0xFFFF } else { 0 };

            let ddat = minterm(adat, bdat, cdat, lf);
            if use_c {
                host.write_word(BusOwner::Blitter, dpt & ptr_mask, ddat);
            }
            any_set |= ddat;
            texture = texture.rotate_left(1);

            if signed {
                decision = decision.wrapping_add_signed(inc_signed);
            } else {
                decision = decision.wrapping_add_signed(inc_unsigned);
                if x_independent {
                    step_y(&mut cpt);
                    dot_drawn = false;
                } else {
                    step_x(&mut shift, &mut cpt);
                }
            }
            signed = (decision as u16 as i16) < 0;

            if x_independent {
                step_x(&mut shift, &mut cpt);
            } else {
                step_y(&mut cpt);
            }
            dpt = cpt;
        }

        self.bltcon0 = (self.bltcon0 & 0x0FFF) | (shift << 12);
        self.bltcon1 = (self.bltcon1 & !0x0040) | if signed { 0x0040 } else { 0 };
        self.bnew = bdat;
        self.bltapt = decision & ptr_mask;
        self.bltcpt = cpt & ptr_mask;
        self.bltdpt = dpt & ptr_mask;
        self.bzero = any_set == 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ChipRam;

    fn blitter(bltcon0: u16, bltcon1: u16, w: u16, h: u16) -> Blitter {
        let mut blt = Blitter::new();
        blt.bltcon0 = bltcon0;
        blt.bltcon1 = bltcon1;
        blt.bltafwm = 0xFFFF;
        blt.bltalwm = 0xFFFF;
        blt.bltsize_h = w;
        blt.bltsize_v = h;
        blt.bzero = true;
        blt
    }

    #[test]
    fn copy_applies_masks_and_modulo() {
        let mut ram = ChipRam::new(0x10000);
        ram.load(0x1000, &[0x1111, 0x2222, 0xAAAA, 0x3333, 0x4444]);

        // D = A over a 2x2 area, skipping one source word per row.
        let mut blt = blitter(0x09F0, 0, 2, 2);
        blt.bltafwm = 0xFF00;
        blt.bltapt = 0x1000;
        blt.bltamod = 2;
        blt.bltdpt = 0x2000;
        blt.do_fast_copy_blit(&mut ram, 0x7FFFE);

        assert_eq!(ram.peek(0x2000), 0x1100);
        assert_eq!(ram.peek(0x2002), 0x2222);
        assert_eq!(ram.peek(0x2004), 0x3300);
        assert_eq!(ram.peek(0x2006), 0x4444);
        assert_eq!(blt.bltapt, 0x100C);
        assert_eq!(blt.bltdpt, 0x2008);
        assert!(!blt.bzero);
    }

    #[test]
    fn descending_copy_shifts_left() {
        let mut ram = ChipRam::new(0x10000);
        ram.load(0x1000, &[0x0001, 0x8000]);

        let mut blt = blitter(0x49F0, 0x0002, 2, 1);
        blt.bltapt = 0x1002;
        blt.bltdpt = 0x2002;
        blt.do_fast_copy_blit(&mut ram, 0x7FFFE);

        assert_eq!(ram.peek(0x2002), 0x0000);
        assert_eq!(ram.peek(0x2000), 0x0018);
        assert_eq!(blt.bltdpt, 0x1FFE);
    }

    #[test]
    fn fill_blit_sets_bzero_only_for_empty_results() {
        let mut ram = ChipRam::new(0x10000);
        let mut blt = blitter(0x01FF, 0x0008, 1, 1);
        blt.bltdpt = 0x2000;
        blt.do_fast_copy_blit(&mut ram, 0x7FFFE);
        assert_eq!(ram.peek(0x2000), 0xFFFF);
        assert!(!blt.bzero);

        let mut blt = blitter(0x0100, 0x0008, 1, 1);
        blt.bltdpt = 0x2000;
        blt.do_fast_copy_blit(&mut ram, 0x7FFFE);
        assert_eq!(ram.peek(0x2000), 0x0000);
        assert!(blt.bzero);
    }

    #[test]
    fn horizontal_line_sets_consecutive_pixels() {
        let mut ram = ChipRam::new(0x10000);

        // SUD set: x steps every pixel. The sign bit starts set and a zero
        // increment keeps it set, so y never steps.
        let mut blt = blitter(0x0BCA, 0x0051, 2, 4);
        blt.anew = 0x8000;
        blt.bnew = 0xFFFF;
        blt.bltapt = (-2i32) as u32;
        blt.bltamod = -4;
        blt.bltbmod = 0;
        blt.bltcmod = 40;
        blt.bltcpt = 0x3000;
        blt.bltdpt = 0x3000;
        blt.do_fast_line_blit(&mut ram, 0x7FFFE);

        assert_eq!(ram.peek(0x3000), 0xF000);
        assert!(!blt.bzero);
        // Four pixels moved the shift by four.
        assert_eq!(blt.ash(), 4);
        assert_eq!(blt.bltcon1 & 0x0040, 0x0040);
    }
}
