//! # Synthetic machine
//!
//! Deterministic stand-ins for the peripherals and the CPU, with the GBA's
//! display timing. They do no real work: every device only records what the
//! scheduler delivered to it in a shared [`Ledger`], so that the host can
//! check that each cycle arrived exactly once.
//!
//! ```text
//!  0                           960        1232
//!  ├──────── visible ───────────┼─ hblank ──┤  x 160 lines
//!  ├──────────────────── vblank ────────────┤  x  68 lines
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use emu::cpu::{Cpu, CpuState};
use emu::hardware::interrupt_control::InterruptControl;
use emu::hardware::{AudioUnit, Clocked, Deadline, Devices, DmaStep, DmaUnit, InterruptFlags};
use emu::io::{ContractViolation, Io, IoCore};

pub const CYCLES_PER_LINE: u32 = 1232;
pub const HBLANK_START: u32 = 960;
pub const LINES: u32 = 228;
pub const VBLANK_LINE: u32 = 160;
pub const CYCLES_PER_FRAME: u32 = CYCLES_PER_LINE * LINES;

/// Timer 0 at prescaler 64 reloaded with 0xFC00.
const TIMER_PERIOD: u32 = 0x400 * 64;
/// Words copied by the VBlank transfer.
const DMA_WORDS: u32 = 512;
/// Instruction steps the game loop runs before waiting for VBlank.
const WORK_PER_FRAME: u32 = 60_000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deliveries {
    pub graphics: u64,
    pub timers: u64,
    pub serial: u64,
    pub audio: u64,
    /// Part of `audio` played while stopped.
    pub silence: u64,
    pub audio_jits: u32,
    pub frames: u32,
    pub timer_overflows: u32,
    pub dma_steps: u32,
    pub irqs: u32,
    pub instructions: u64,
}

/// What every synthetic device received, shared between them and the host.
#[derive(Debug, Default, Clone)]
pub struct Ledger(Rc<RefCell<Deliveries>>);

impl Ledger {
    #[must_use]
    pub fn deliveries(&self) -> Deliveries {
        *self.0.borrow()
    }

    fn record(&self, entry: impl FnOnce(&mut Deliveries)) {
        entry(&mut self.0.borrow_mut());
    }
}

/// Scanline timing. Only the lines in `raises` reach the interrupt
/// controller, like the DISPSTAT enable bits.
pub struct Lcd {
    line: u32,
    dot: u32,
    raises: InterruptFlags,
    ledger: Ledger,
}

impl Lcd {
    #[must_use]
    pub const fn new(raises: InterruptFlags, ledger: Ledger) -> Self {
        Self {
            line: 0,
            dot: 0,
            raises,
            ledger,
        }
    }

    const fn cycles_to_hblank(&self) -> u32 {
        if self.dot < HBLANK_START {
            HBLANK_START - self.dot
        } else {
            CYCLES_PER_LINE - self.dot + HBLANK_START
        }
    }

    const fn cycles_to_vblank(&self) -> u32 {
        let whole_lines = (VBLANK_LINE + LINES - self.line - 1) % LINES;
        whole_lines * CYCLES_PER_LINE + CYCLES_PER_LINE - self.dot
    }
}

impl Clocked for Lcd {
    fn advance_by(&mut self, mut cycles: u32) -> InterruptFlags {
        self.ledger.record(|d| d.graphics += u64::from(cycles));
        let mut raised = InterruptFlags::empty();
        while cycles > 0 {
            let edge = if self.dot < HBLANK_START {
                HBLANK_START
            } else {
                CYCLES_PER_LINE
            };
            let step = cycles.min(edge - self.dot);
            self.dot += step;
            cycles -= step;

            if self.dot == HBLANK_START {
                raised |= InterruptFlags::HBLANK;
            } else if self.dot == CYCLES_PER_LINE {
                self.dot = 0;
                self.line = (self.line + 1) % LINES;
                if self.line == VBLANK_LINE {
                    raised |= InterruptFlags::VBLANK;
                    self.ledger.record(|d| d.frames += 1);
                }
            }
        }
        raised & self.raises
    }

    fn next_interrupt(&self) -> Option<Deadline> {
        [
            Deadline::new(InterruptFlags::HBLANK, self.cycles_to_hblank()),
            Deadline::new(InterruptFlags::VBLANK, self.cycles_to_vblank()),
        ]
        .into_iter()
        .filter(|deadline| self.raises.contains(deadline.lines))
        .min_by_key(|deadline| deadline.cycles)
    }
}

/// A free-running timer overflowing every `period` cycles.
pub struct Timer {
    period: u32,
    elapsed: u32,
    ledger: Ledger,
}

impl Timer {
    #[must_use]
    pub const fn new(period: u32, ledger: Ledger) -> Self {
        Self {
            period,
            elapsed: 0,
            ledger,
        }
    }
}

impl Clocked for Timer {
    fn advance_by(&mut self, cycles: u32) -> InterruptFlags {
        self.ledger.record(|d| d.timers += u64::from(cycles));
        self.elapsed += cycles;
        if self.elapsed < self.period {
            return InterruptFlags::empty();
        }
        let overflows = self.elapsed / self.period;
        self.elapsed %= self.period;
        self.ledger.record(|d| d.timer_overflows += overflows);
        InterruptFlags::TIMER0
    }

    fn next_interrupt(&self) -> Option<Deadline> {
        Some(Deadline::new(
            InterruptFlags::TIMER0,
            self.period - self.elapsed,
        ))
    }
}

/// Serial port with no cable plugged in.
pub struct Link(Ledger);

impl Clocked for Link {
    fn advance_by(&mut self, cycles: u32) -> InterruptFlags {
        self.0.record(|d| d.serial += u64::from(cycles));
        InterruptFlags::empty()
    }
}

pub struct Mixer(Ledger);

impl AudioUnit for Mixer {
    fn advance_by(&mut self, cycles: u32) {
        self.0.record(|d| d.audio += u64::from(cycles));
    }

    fn fill_silence(&mut self, cycles: u32) {
        self.0.record(|d| {
            d.audio += u64::from(cycles);
            d.silence += u64::from(cycles);
        });
    }

    fn audio_jit(&mut self) {
        self.0.record(|d| d.audio_jits += 1);
    }
}

/// Channel 0 copying `words` words on every VBlank, 2 cycles a word.
pub struct VblankDma {
    words: u32,
    remaining: u32,
    source: u32,
    latch: u32,
    ledger: Ledger,
}

impl VblankDma {
    #[must_use]
    pub const fn new(words: u32, ledger: Ledger) -> Self {
        Self {
            words,
            remaining: 0,
            source: 0x0200_0000,
            latch: 0,
            ledger,
        }
    }
}

impl DmaUnit for VblankDma {
    fn trigger(&mut self, lines: InterruptFlags) -> bool {
        if !lines.contains(InterruptFlags::VBLANK) {
            return false;
        }
        self.remaining = self.words;
        true
    }

    fn perform(&mut self) -> DmaStep {
        if self.remaining == 0 {
            return DmaStep {
                finished: true,
                ..DmaStep::default()
            };
        }
        self.remaining -= 1;
        self.source = self.source.wrapping_add(4);
        self.latch = self.source.rotate_left(7) ^ 0x5A5A_5A5A;
        self.ledger.record(|d| d.dma_steps += 1);

        let finished = self.remaining == 0;
        DmaStep {
            cycles: 2,
            finished,
            raised: if finished {
                InterruptFlags::DMA0
            } else {
                InterruptFlags::empty()
            },
        }
    }

    fn current_fetch_value(&self) -> u32 {
        self.latch
    }
}

/// Cost of the steps of the instruction mix; 0 is a taken branch.
const MIX: [u32; 8] = [1, 1, 2, 1, 3, 1, 2, 0];
const MODE_SWITCH_EVERY: usize = 1021;
const HANDLER_STEPS: u32 = 24;

#[derive(Debug, Clone, Copy)]
struct Handler {
    left: u32,
    resume: CpuState,
}

/// A game loop: a fixed instruction mix with the odd ARM/THUMB switch, then
/// a wait for VBlank. Interrupt handlers acknowledge everything on return.
pub struct SyntheticCpu {
    steps: usize,
    worked: u32,
    work_per_frame: u32,
    handler: Option<Handler>,
    fetch: u32,
    ledger: Ledger,
}

impl SyntheticCpu {
    #[must_use]
    pub const fn new(work_per_frame: u32, ledger: Ledger) -> Self {
        Self {
            steps: 0,
            worked: 0,
            work_per_frame,
            handler: None,
            fetch: 0x0800_0000,
            ledger,
        }
    }

    fn return_from_irq(resume: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        io.devices_mut().interrupts.acknowledge(InterruptFlags::all());
        if resume == CpuState::Thumb {
            io.enter_thumb();
        }
        io.set_irq_disabled(false);
        io.flag_bubble();
        io.advance(3)
    }
}

impl Cpu for SyntheticCpu {
    fn execute(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        self.ledger.record(|d| d.instructions += 1);
        self.fetch = self.fetch.wrapping_add(match state {
            CpuState::Arm => 4,
            CpuState::Thumb => 2,
        });

        if let Some(handler) = &mut self.handler {
            if handler.left > 0 {
                handler.left -= 1;
                io.advance_one();
                return Ok(());
            }
            let resume = handler.resume;
            self.handler = None;
            return Self::return_from_irq(resume, io);
        }

        self.steps += 1;
        if self.worked == self.work_per_frame {
            self.worked = 0;
            io.advance_one();
            return io.halt();
        }
        self.worked += 1;

        if self.steps % MODE_SWITCH_EVERY == 0 {
            match state {
                CpuState::Arm => io.enter_thumb(),
                CpuState::Thumb => io.enter_arm(),
            }
            io.flag_bubble();
            return io.advance(3);
        }
        match MIX[self.steps % MIX.len()] {
            0 => {
                io.flag_bubble();
                io.advance(3)
            }
            1 => {
                io.advance_one();
                Ok(())
            }
            2 => {
                io.advance_two();
                Ok(())
            }
            cycles => io.advance(cycles),
        }
    }

    fn execute_bubble(&mut self, _state: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        io.advance_one();
        io.clear_bubble()
    }

    fn enter_irq(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        io.complete_irq_entry()?;
        self.ledger.record(|d| d.irqs += 1);
        self.handler = Some(Handler {
            left: HANDLER_STEPS,
            resume: state,
        });
        io.enter_arm();
        io.set_irq_disabled(true);
        io.flag_bubble();
        io.advance(3)
    }

    fn current_fetch_value(&self) -> u32 {
        self.fetch
    }
}

/// The scheduler wired to the synthetic devices, all reporting to `ledger`.
#[must_use]
pub fn machine(ledger: &Ledger) -> IoCore<SyntheticCpu> {
    let enabled = InterruptFlags::VBLANK | InterruptFlags::TIMER0 | InterruptFlags::DMA0;
    let devices = Devices {
        graphics: Box::new(Lcd::new(InterruptFlags::VBLANK, ledger.clone())),
        timers: Box::new(Timer::new(TIMER_PERIOD, ledger.clone())),
        serial: Box::new(Link(ledger.clone())),
        audio: Box::new(Mixer(ledger.clone())),
        dma: Box::new(VblankDma::new(DMA_WORDS, ledger.clone())),
        interrupts: Box::new(InterruptControl::new(enabled, true)),
    };
    IoCore::new(SyntheticCpu::new(WORK_PER_FRAME, ledger.clone()), devices)
}
