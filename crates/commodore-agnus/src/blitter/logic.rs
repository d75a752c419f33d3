//! Combinational parts of the Blitter data path: minterm logic, barrel
//! shifter and area fill.

/// Minterm combiner.
///
/// Bit `n` of `lf` selects the product term whose inputs match the binary
/// digits of `n`, with A as the most significant input: bit 7 is `ABC`,
/// bit 0 is `!A!B!C`. All sixteen bit positions are combined in parallel.
#[must_use]
pub const fn minterm(a: u16, b: u16, c: u16, lf: u8) -> u16 {
    let terms = [
        !a & !b & !c,
        !a & !b & c,
        !a & b & !c,
        !a & b & c,
        a & !b & !c,
        a & !b & c,
        a & b & !c,
        a & b & c,
    ];
    let mut result = 0;
    let mut i = 0;
    while i < 8 {
        if lf & (1 << i) != 0 {
            result |= terms[i];
        }
        i += 1;
    }
    result
}

/// Barrel shifter. Combines the previous and the current word of a channel
/// into the shifted hold value. In descending mode the words swap halves and
/// the window moves left.
#[must_use]
pub const fn barrel(new: u16, old: u16, shift: u16, desc: bool) -> u16 {
    let shift = (shift & 0xF) as u32;
    if desc {
        ((((new as u32) << 16) | old as u32) >> (16 - shift)) as u16
    } else {
        ((((old as u32) << 16) | new as u32) >> shift) as u16
    }
}

const fn fill_tables() -> ([[[u8; 256]; 2]; 2], [[bool; 256]; 2]) {
    let mut pattern = [[[0u8; 256]; 2]; 2];
    let mut carry_out = [[false; 256]; 2];

    let mut carry_in = 0;
    while carry_in < 2 {
        let mut byte = 0;
        while byte < 256 {
            let mut carry = carry_in as u8;
            let mut inclusive = byte as u8;
            let mut exclusive = byte as u8;
            let mut bit = 0;
            while bit < 8 {
                inclusive |= carry << bit;
                exclusive ^= carry << bit;
                if byte & (1 << bit) != 0 {
                    carry ^= 1;
                }
                bit += 1;
            }
            pattern[0][carry_in][byte] = inclusive;
            pattern[1][carry_in][byte] = exclusive;
            carry_out[carry_in][byte] = carry == 1;
            byte += 1;
        }
        carry_in += 1;
    }
    (pattern, carry_out)
}

// [exclusive][carry in][byte]
static FILL: ([[[u8; 256]; 2]; 2], [[bool; 256]; 2]) = fill_tables();

/// Area fill. Runs from bit 0 upwards, low byte first, and carries the fill
/// state into the next word through `carry`.
#[must_use]
pub fn fill(data: u16, carry: &mut bool, exclusive: bool) -> u16 {
    let (pattern, carry_out) = &FILL;
    let [lo, hi] = data.to_le_bytes();
    let mode = exclusive as usize;

    let lo_out = pattern[mode][*carry as usize][lo as usize];
    *carry = carry_out[*carry as usize][lo as usize];
    let hi_out = pattern[mode][*carry as usize][hi as usize];
    *carry = carry_out[*carry as usize][hi as usize];

    u16::from_le_bytes([lo_out, hi_out])
}
