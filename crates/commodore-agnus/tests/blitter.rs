mod common;

use commodore_agnus::{BusOwner, ConfigOption, Irq, reg};
use pretty_assertions::assert_eq;

use common::{TestChipset, chipset, poke, run_to};

const SRC: u32 = 0x2000;
const DST: u32 = 0x3000;

const ROWS: [[u16; 4]; 2] = [[0x1234, 0x5678, 0x9ABC, 0xDEF7], [0x1111, 0x2222, 0x3333, 0x4444]];

// A+D copy with a shift of four, 4 words by 2 rows, started at cycle 0x44
// of line 0 where no other DMA competes.
fn start_copy(accuracy: i64) -> TestChipset {
    let mut cs = chipset();
    cs.set_config_item(ConfigOption::BlitterAccuracy, accuracy);
    cs.host.ram.load(SRC, &ROWS[0]);
    cs.host.ram.load(SRC + 8, &ROWS[1]);

    run_to(&mut cs, 0, 0x40);
    poke(&mut cs, reg::DMACON, 0x8000 | 0x0200 | 0x0040);
    poke(&mut cs, reg::BLTCON0, 0x49F0);
    poke(&mut cs, reg::BLTCON1, 0x0000);
    poke(&mut cs, reg::BLTAFWM, 0xFFFF);
    poke(&mut cs, reg::BLTALWM, 0xFFFF);
    poke(&mut cs, reg::BLTAPTH, 0);
    poke(&mut cs, reg::BLTAPTL, SRC as u16);
    poke(&mut cs, reg::BLTDPTH, 0);
    poke(&mut cs, reg::BLTDPTL, DST as u16);
    poke(&mut cs, reg::BLTAMOD, 0);
    poke(&mut cs, reg::BLTDMOD, 0);
    run_to(&mut cs, 0, 0x44);
    poke(&mut cs, reg::BLTSIZE, (2 << 6) | 4);
    cs
}

// The shifter carries the last word of a row into the next row.
const EXPECTED: [u16; 8] = [0x0123, 0x4567, 0x89AB, 0xCDEF, 0x7111, 0x1222, 0x2333, 0x3444];

fn destination(cs: &TestChipset) -> Vec<u16> {
    (0..8).map(|i| cs.host.ram.peek(DST + 2 * i)).collect()
}

#[test]
fn slow_copy_takes_the_exact_number_of_cycles() {
    let mut cs = start_copy(2);

    // The BLTSIZE cycle, two start cycles, 8 words x 2 instructions and two
    // drain steps. BBUSY drops in the last one.
    for _ in 0..20 {
        cs.execute();
    }
    assert!(cs.blitter.is_busy());
    assert!(cs.host.irqs.is_empty());

    cs.execute();
    assert!(!cs.blitter.is_busy());
    assert!(!cs.blitter.is_active());
    assert_eq!(cs.host.irqs, vec![Irq::Blit]);
    assert_eq!(destination(&cs), EXPECTED.to_vec());

    // 8 A fetches and 8 D writes.
    assert_eq!(cs.agnus.bus.stats.get(BusOwner::Blitter), 16);
    assert_eq!(cs.blitter.bltapt, SRC + 16);
    assert_eq!(cs.blitter.bltdpt, DST + 16);
}

#[test]
fn slow_copy_claims_fetch_and_write_cycles() {
    let mut cs = start_copy(2);
    for _ in 0..21 {
        cs.execute();
    }

    // The first write waits for the pipeline, so the first word only
    // fetches.
    let owners: Vec<_> = (0x47..0x59).map(|h| cs.agnus.bus.owner(h)).collect();
    let b = BusOwner::Blitter;
    let n = BusOwner::None;
    assert_eq!(
        owners,
        vec![b, n, b, b, b, b, b, b, b, b, b, b, b, b, b, b, n, b]
    );
}

#[test]
fn all_accuracy_levels_produce_the_same_result() {
    for accuracy in 0..=2 {
        let mut cs = start_copy(accuracy);
        cs.run_until(cs.clock() + 8 * 40);
        assert!(!cs.blitter.is_busy(), "accuracy {accuracy}");
        assert_eq!(destination(&cs), EXPECTED.to_vec(), "accuracy {accuracy}");
        assert_eq!(cs.host.irqs, vec![Irq::Blit], "accuracy {accuracy}");
    }
}

#[test]
fn fake_copy_keeps_the_bus_pattern_of_the_slow_copy() {
    let mut slow = start_copy(2);
    let mut fake = start_copy(1);
    for _ in 0..21 {
        slow.execute();
        fake.execute();
    }
    for h in 0x40..0x60 {
        assert_eq!(slow.agnus.bus.owner(h), fake.agnus.bus.owner(h), "h = {h:#x}");
    }
    assert_eq!(slow.blitter.is_busy(), fake.blitter.is_busy());
}

#[test]
fn blitter_yields_to_a_waiting_cpu() {
    let mut cs = start_copy(2);
    for _ in 0..6 {
        cs.execute();
    }
    // The Blitter holds the bus for two more cycles, then backs off for
    // the stalled CPU.
    let waited = cs.execute_until_bus_is_free();
    assert_eq!(waited, 3 * 8);
    assert!(!cs.agnus.bus.bls);
    let h = cs.agnus.pos.h - 1;
    assert_eq!(cs.agnus.bus.owner(h), BusOwner::Cpu);
}

// Two-pixel line in octant 0, started at cycle 0x44 of line 0.
fn start_line(accuracy: i64) -> TestChipset {
    let mut cs = chipset();
    cs.set_config_item(ConfigOption::BlitterAccuracy, accuracy);

    run_to(&mut cs, 0, 0x40);
    poke(&mut cs, reg::DMACON, 0x8000 | 0x0200 | 0x0040);
    poke(&mut cs, reg::BLTCON0, 0x0BCA);
    poke(&mut cs, reg::BLTCON1, 0x0001);
    poke(&mut cs, reg::BLTADAT, 0x8000);
    poke(&mut cs, reg::BLTBDAT, 0xFFFF);
    poke(&mut cs, reg::BLTAFWM, 0xFFFF);
    poke(&mut cs, reg::BLTALWM, 0xFFFF);
    poke(&mut cs, reg::BLTAPTH, 0);
    poke(&mut cs, reg::BLTAPTL, 0x0002);
    poke(&mut cs, reg::BLTAMOD, 0xFFFC);
    poke(&mut cs, reg::BLTBMOD, 0x0004);
    poke(&mut cs, reg::BLTCPTH, 0);
    poke(&mut cs, reg::BLTCPTL, DST as u16);
    poke(&mut cs, reg::BLTDPTH, 0);
    poke(&mut cs, reg::BLTDPTL, DST as u16);
    poke(&mut cs, reg::BLTCMOD, 40);
    poke(&mut cs, reg::BLTDMOD, 40);
    run_to(&mut cs, 0, 0x44);
    poke(&mut cs, reg::BLTSIZE, (2 << 6) | 2);
    cs
}

#[test]
fn line_blit_replays_the_line_bus_pattern() {
    for accuracy in 1..=2 {
        let mut cs = start_line(accuracy);

        // The BLTSIZE cycle, two start cycles, 2 pixels x 4 cycles and the
        // two cycle tail. BBUSY drops in the last one.
        for _ in 0..12 {
            cs.execute();
        }
        assert!(cs.blitter.is_busy(), "accuracy {accuracy}");
        assert!(cs.host.irqs.is_empty(), "accuracy {accuracy}");

        cs.execute();
        assert!(!cs.blitter.is_busy(), "accuracy {accuracy}");
        assert!(!cs.blitter.is_active(), "accuracy {accuracy}");
        assert_eq!(cs.host.irqs, vec![Irq::Blit], "accuracy {accuracy}");

        // Per pixel: idle, C fetch, idle, D write. The tail writes D once more.
        let owners: Vec<_> = (0x47..0x51).map(|h| cs.agnus.bus.owner(h)).collect();
        let b = BusOwner::Blitter;
        let n = BusOwner::None;
        assert_eq!(owners, vec![n, b, n, b, n, b, n, b, n, b], "accuracy {accuracy}");
        assert_eq!(cs.agnus.bus.stats.get(BusOwner::Blitter), 5, "accuracy {accuracy}");

        cs.run_until(cs.clock() + 8 * 40);
        assert_eq!(cs.host.irqs, vec![Irq::Blit], "accuracy {accuracy}");
    }
}

#[test]
fn line_blit_draws_before_the_bus_pattern_ends() {
    let mut cs = start_line(2);
    // Strt2 runs the line engine.
    for _ in 0..3 {
        cs.execute();
    }
    assert_ne!(cs.host.ram.peek(DST), 0);
    assert!(cs.blitter.is_busy());
}
