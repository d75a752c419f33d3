mod common;

use commodore_agnus::dma::{REFRESH_CYCLES, dmacon};
use commodore_agnus::{Agnus, Beam, BusOwner, ChipsetConfig, reg};
use pretty_assertions::assert_eq;

use common::{TestChipset, chipset, poke, run_to};

#[test]
fn bus_is_free_does_not_claim() {
    let mut agnus = Agnus::new(ChipsetConfig::a500());
    agnus.poke_dmacon(dmacon::SETCLR | dmacon::DMAEN | dmacon::BLTEN | dmacon::COPEN);
    agnus.pos = Beam::new(50, 0x40);

    for owner in [BusOwner::Blitter, BusOwner::Copper, BusOwner::Cpu] {
        assert!(agnus.bus_is_free(owner));
        assert!(agnus.bus_is_free(owner));
    }
    assert_eq!(agnus.bus.owner(0x40), BusOwner::None);

    assert!(agnus.allocate_bus(BusOwner::Blitter));
    assert!(!agnus.allocate_bus(BusOwner::Blitter));
    assert!(!agnus.allocate_bus(BusOwner::Copper));
    assert!(!agnus.bus_is_free(BusOwner::Cpu));
    assert_eq!(agnus.bus.owner(0x40), BusOwner::Blitter);
}

#[test]
fn cpu_gets_a_free_bus_without_waiting() {
    let mut cs = chipset();
    run_to(&mut cs, 3, 0x40);
    assert_eq!(cs.execute_until_bus_is_free(), 0);
    assert_eq!(cs.agnus.bus.owner(0x3F), BusOwner::Cpu);
    assert_eq!(cs.clock(), cs.agnus.beam_to_cycle(Beam::new(3, 0x40)));
}

#[test]
fn cpu_waits_behind_refresh() {
    let mut cs = chipset();
    run_to(&mut cs, 3, 0x04);
    // Cycle 3 went to refresh; cycle 4 is free.
    assert_eq!(cs.execute_until_bus_is_free(), 8);
    assert_eq!(cs.agnus.bus.owner(0x03), BusOwner::Refresh);
    assert_eq!(cs.agnus.bus.owner(0x04), BusOwner::Cpu);
    assert_eq!(cs.agnus.pos.h, 0x05);
}

fn busy_frame() -> TestChipset {
    let mut cs = chipset();

    // Copper: a burst of colour changes in two places of the display.
    let mut list = vec![0x2C21, 0xFFFE];
    list.extend((0..40).flat_map(|i| [0x0180, i]));
    list.extend([0x4021, 0xFFFE]);
    list.extend((0..40).flat_map(|i| [0x0182, i]));
    list.extend([0xFFFF, 0xFFFE]);
    cs.host.ram.load(0x1000, &list);
    poke(&mut cs, reg::COP1LCH, 0);
    poke(&mut cs, reg::COP1LCL, 0x1000);

    poke(&mut cs, reg::DIWSTRT, 0x2C81);
    poke(&mut cs, reg::DIWSTOP, 0x2CC1);
    poke(&mut cs, reg::DDFSTRT, 0x0038);
    poke(&mut cs, reg::DDFSTOP, 0x00D0);
    poke(&mut cs, reg::BPLCON0, 0x4200);
    poke(
        &mut cs,
        reg::DMACON,
        dmacon::SETCLR
            | dmacon::DMAEN
            | dmacon::BPLEN
            | dmacon::COPEN
            | dmacon::BLTEN
            | dmacon::SPREN
            | dmacon::BLTPRI,
    );

    run_to(&mut cs, 0x28, 0x10);
    poke(&mut cs, reg::BLTCON0, 0x0FCA);
    poke(&mut cs, reg::BLTAFWM, 0xFFFF);
    poke(&mut cs, reg::BLTALWM, 0xFFFF);
    for (hi, lo, addr) in [
        (reg::BLTAPTH, reg::BLTAPTL, 0x4_0000u32),
        (reg::BLTBPTH, reg::BLTBPTL, 0x5_0000),
        (reg::BLTCPTH, reg::BLTCPTL, 0x6_0000),
        (reg::BLTDPTH, reg::BLTDPTL, 0x7_0000),
    ] {
        poke(&mut cs, hi, (addr >> 16) as u16);
        poke(&mut cs, lo, addr as u16);
    }
    poke(&mut cs, reg::BLTSIZE, (200 << 6) | 20);
    cs
}

#[test]
fn every_cycle_has_at_most_one_owner() {
    let mut cs = busy_frame();
    let end = cs.agnus.beam_to_cycle(Beam::new(0x70, 0));

    while cs.clock() < end {
        let h = cs.agnus.pos.h;
        let planned = (h != 0).then(|| cs.agnus.bpl_line.get(h));
        cs.host.accesses.clear();
        cs.execute();

        let owner = cs.agnus.bus.owner(h);
        assert!(cs.host.accesses.len() <= 1, "{:?} at {h:#x}", cs.host.accesses);
        if let Some((accessor, _)) = cs.host.accesses.first() {
            assert_eq!(*accessor, owner, "h = {h:#x}");
        }

        // Table slots win over the Copper and the Blitter.
        if let Some(plane) = planned.and_then(|e| e.plane()) {
            assert_eq!(owner, BusOwner::Bitplane(plane as u8), "h = {h:#x}");
        }
        if REFRESH_CYCLES.contains(&h) {
            assert_eq!(owner, BusOwner::Refresh, "h = {h:#x}");
        }
    }

    let stats = cs.agnus.bus.stats;
    assert!(stats.get(BusOwner::Bitplane(0)) > 0);
    assert!(stats.get(BusOwner::Copper) > 0);
    assert!(stats.get(BusOwner::Blitter) > 0);
}
