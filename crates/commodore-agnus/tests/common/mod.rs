#![allow(dead_code)]

use commodore_agnus::{Accessor, Beam, BusOwner, ChipRam, Chipset, ChipsetConfig, Host, Irq};

/// Chip RAM plus a log of everything the core did through the host.
#[derive(Clone)]
pub struct TestHost {
    pub ram: ChipRam,
    /// DMA accesses of the current cycle, drained by the test.
    pub accesses: Vec<(BusOwner, u32)>,
    pub custom: Vec<(Accessor, u16, u16)>,
    pub irqs: Vec<Irq>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            ram: ChipRam::new(0x8_0000),
            accesses: Vec::new(),
            custom: Vec::new(),
            irqs: Vec::new(),
        }
    }
}

impl Host for TestHost {
    fn read_word(&mut self, owner: BusOwner, addr: u32) -> u16 {
        self.accesses.push((owner, addr));
        self.ram.peek(addr)
    }

    fn write_word(&mut self, owner: BusOwner, addr: u32, value: u16) {
        self.accesses.push((owner, addr));
        self.ram.poke(addr, value);
    }

    fn write_custom(&mut self, accessor: Accessor, reg: u16, value: u16) {
        self.custom.push((accessor, reg, value));
    }

    fn raise_irq(&mut self, irq: Irq) {
        self.irqs.push(irq);
    }
}

pub type TestChipset = Chipset<TestHost>;

pub fn chipset() -> TestChipset {
    Chipset::new(ChipsetConfig::a500(), TestHost::new())
}

pub fn poke(cs: &mut TestChipset, reg: u16, value: u16) {
    cs.poke_custom(Accessor::Cpu, reg, value);
}

/// Runs until the cycle at `(v, h)` of the current frame is next.
pub fn run_to(cs: &mut TestChipset, v: usize, h: usize) {
    let target = cs.agnus.beam_to_cycle(Beam::new(v, h));
    cs.run_until(target);
}

/// Steps one DMA cycle at a time up to `(v, h)`.
pub fn step_to(cs: &mut TestChipset, v: usize, h: usize) {
    let target = cs.agnus.beam_to_cycle(Beam::new(v, h));
    while cs.clock() < target {
        cs.execute();
    }
}
