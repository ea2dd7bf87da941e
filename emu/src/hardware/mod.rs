//! # Hardware collaborators
//!
//! The scheduler never looks inside a peripheral. Graphics, timers, serial
//! and sound only ever receive elapsed cycles; DMA and the interrupt
//! controller additionally answer "how long until you need attention?".
//!
//! ```text
//!                      ┌──────────────┐  advance_by(n)  ┌──────────┐
//!                      │              │ ──────────────► │ graphics │─┐
//!  Cpu ── advance ───► │  Io (clock   │ ──────────────► │ timers   │─┤ raised
//!                      │  distributor)│ ──────────────► │ serial   │─┤ lines
//!                      │              │ ──────────────► │ audio    │ │
//!                      └──────┬───────┘                 └──────────┘ │
//!                             │ trigger / request  ◄─────────────────┘
//!                             ▼
//!                    ┌─────────────────┐
//!                    │ dma, interrupts │
//!                    └─────────────────┘
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub mod interrupt_control;

bitflags! {
    /// Interrupt request lines, laid out like the `IE`/`IF` registers.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct InterruptFlags: u16 {
        const VBLANK = 1 << 0;
        const HBLANK = 1 << 1;
        const VCOUNT = 1 << 2;
        const TIMER0 = 1 << 3;
        const TIMER1 = 1 << 4;
        const TIMER2 = 1 << 5;
        const TIMER3 = 1 << 6;
        const SERIAL = 1 << 7;
        const DMA0 = 1 << 8;
        const DMA1 = 1 << 9;
        const DMA2 = 1 << 10;
        const DMA3 = 1 << 11;
        const KEYPAD = 1 << 12;
        const GAMEPAK = 1 << 13;
    }
}

/// The next interrupt a peripheral will raise if left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Lines that will be raised.
    pub lines: InterruptFlags,
    /// Cycles from now until they are raised.
    pub cycles: u32,
}

impl Deadline {
    #[must_use]
    pub const fn new(lines: InterruptFlags, cycles: u32) -> Self {
        Self { lines, cycles }
    }
}

/// A peripheral that is lazily clocked by the scheduler.
pub trait Clocked {
    /// Catch up by `cycles`, returning the interrupt lines raised meanwhile.
    fn advance_by(&mut self, cycles: u32) -> InterruptFlags;

    /// When the next interrupt will be raised, if one is scheduled.
    fn next_interrupt(&self) -> Option<Deadline> {
        None
    }
}

pub trait AudioUnit {
    /// Catch up by `cycles`.
    fn advance_by(&mut self, cycles: u32);

    /// The CPU is stopped for `cycles`: the mixer keeps running on silence.
    fn fill_silence(&mut self, cycles: u32) {
        self.advance_by(cycles);
    }

    /// Makes sure the output buffer is topped up; called once per quantum.
    fn audio_jit(&mut self) {}
}

/// Outcome of a single DMA transfer step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmaStep {
    /// Bus cycles the step took.
    pub cycles: u32,
    /// The last active channel completed; DMA releases the bus.
    pub finished: bool,
    /// Completion interrupts raised by this step.
    pub raised: InterruptFlags,
}

pub trait DmaUnit {
    /// Peripheral lines were raised (VBlank, HBlank, timers...).
    /// Returns true when this started a transfer that now owns the bus.
    fn trigger(&mut self, _lines: InterruptFlags) -> bool {
        false
    }

    /// Perform one read/write of the active transfer.
    fn perform(&mut self) -> DmaStep;

    /// Cycles until a transfer will want the bus, if any is scheduled.
    fn cycles_until_next_event(&self) -> Option<u32> {
        None
    }

    /// Value last seen on the bus by a DMA-driven fetch.
    fn current_fetch_value(&self) -> u32 {
        0
    }
}

pub trait InterruptUnit {
    /// Latch raised lines into the request register.
    fn request(&mut self, lines: InterruptFlags);

    /// Clear serviced lines from the request register.
    fn acknowledge(&mut self, lines: InterruptFlags);

    /// An enabled interrupt is requested, whatever the master enable says.
    /// This is what wakes the CPU from HALT.
    fn irq_match(&self) -> bool;

    /// The IRQ line towards the CPU is asserted.
    fn irq_line(&self) -> bool;

    /// Cycles until the IRQ line could be asserted, given the deadlines
    /// reported by the clocked peripherals.
    fn cycles_until_irq(&self, upcoming: &[Option<Deadline>]) -> Option<u32>;

    /// Cycles until a HALT could be left, given the same deadlines.
    fn cycles_until_halt_exit(&self, upcoming: &[Option<Deadline>]) -> Option<u32>;
}

/// Stand-in for a peripheral that is not emulated.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconnected;

impl Clocked for Unconnected {
    fn advance_by(&mut self, _cycles: u32) -> InterruptFlags {
        InterruptFlags::empty()
    }
}

impl AudioUnit for Unconnected {
    fn advance_by(&mut self, _cycles: u32) {}
}

impl DmaUnit for Unconnected {
    fn perform(&mut self) -> DmaStep {
        // Nothing can own the bus, so any burst ends immediately.
        DmaStep {
            finished: true,
            ..DmaStep::default()
        }
    }
}

/// Everything the scheduler clocks, apart from the CPU.
pub struct Devices {
    pub graphics: Box<dyn Clocked>,
    pub timers: Box<dyn Clocked>,
    pub serial: Box<dyn Clocked>,
    pub audio: Box<dyn AudioUnit>,
    pub dma: Box<dyn DmaUnit>,
    pub interrupts: Box<dyn InterruptUnit>,
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            graphics: Box::new(Unconnected),
            timers: Box::new(Unconnected),
            serial: Box::new(Unconnected),
            audio: Box::new(Unconnected),
            dma: Box::new(Unconnected),
            interrupts: Box::new(interrupt_control::InterruptControl::default()),
        }
    }
}

impl Devices {
    /// Interrupt deadlines of every clocked peripheral.
    pub(crate) fn upcoming_interrupts(&self) -> [Option<Deadline>; 3] {
        [
            self.graphics.next_interrupt(),
            self.timers.next_interrupt(),
            self.serial.next_interrupt(),
        ]
    }
}
