//! Scripted collaborators for scheduler tests. Handles are cheap clones
//! sharing their log, so a test keeps one and boxes the other.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::cpu::{Cpu, CpuState};
use crate::hardware::{AudioUnit, Clocked, Deadline, DmaStep, DmaUnit, InterruptFlags};
use crate::io::{ContractViolation, Io};

#[derive(Debug, Default)]
struct RecorderLog {
    delivered: u64,
    silence: u64,
    jit_calls: u32,
}

/// Counts the cycles it receives.
#[derive(Debug, Default, Clone)]
pub struct Recorder(Rc<RefCell<RecorderLog>>);

impl Recorder {
    pub fn delivered(&self) -> u64 {
        self.0.borrow().delivered
    }

    pub fn silence(&self) -> u64 {
        self.0.borrow().silence
    }

    pub fn jit_calls(&self) -> u32 {
        self.0.borrow().jit_calls
    }
}

impl Clocked for Recorder {
    fn advance_by(&mut self, cycles: u32) -> InterruptFlags {
        self.0.borrow_mut().delivered += u64::from(cycles);
        InterruptFlags::empty()
    }
}

impl AudioUnit for Recorder {
    fn advance_by(&mut self, cycles: u32) {
        self.0.borrow_mut().delivered += u64::from(cycles);
    }

    fn fill_silence(&mut self, cycles: u32) {
        let mut log = self.0.borrow_mut();
        log.delivered += u64::from(cycles);
        log.silence += u64::from(cycles);
    }

    fn audio_jit(&mut self) {
        self.0.borrow_mut().jit_calls += 1;
    }
}

#[derive(Debug, Default)]
struct PeriodicLog {
    delivered: u64,
    elapsed: u32,
}

/// Raises `lines` every `period` cycles and reports the next one as deadline.
#[derive(Debug, Clone)]
pub struct Periodic {
    lines: InterruptFlags,
    period: u32,
    log: Rc<RefCell<PeriodicLog>>,
}

impl Periodic {
    pub fn new(lines: InterruptFlags, period: u32) -> Self {
        Self {
            lines,
            period,
            log: Rc::default(),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.log.borrow().delivered
    }
}

impl Clocked for Periodic {
    fn advance_by(&mut self, cycles: u32) -> InterruptFlags {
        let mut log = self.log.borrow_mut();
        log.delivered += u64::from(cycles);
        log.elapsed += cycles;
        if log.elapsed < self.period {
            return InterruptFlags::empty();
        }
        log.elapsed %= self.period;
        self.lines
    }

    fn next_interrupt(&self) -> Option<Deadline> {
        let elapsed = self.log.borrow().elapsed;
        Some(Deadline::new(self.lines, self.period - elapsed))
    }
}

#[derive(Debug, Default)]
struct QueueLog {
    pending: u32,
    performed: u32,
}

/// Transfer steps waiting for the bus, shared by whoever starts transfers.
#[derive(Debug, Default, Clone)]
pub struct DmaQueue(Rc<RefCell<QueueLog>>);

impl DmaQueue {
    pub fn start(&self, steps: u32) {
        self.0.borrow_mut().pending += steps;
    }

    pub fn performed(&self) -> u32 {
        self.0.borrow().performed
    }
}

/// DMA that starts a burst of `steps` whenever one of `lines` is raised and
/// raises `DMA0` when the queue runs dry.
pub struct ScriptedDma {
    queue: DmaQueue,
    lines: InterruptFlags,
    steps: u32,
    cycles_per_step: u32,
    next_event: Option<u32>,
}

impl ScriptedDma {
    pub const FETCH: u32 = 0xDEAD_BEEF;

    pub fn idle() -> Self {
        Self {
            queue: DmaQueue::default(),
            lines: InterruptFlags::empty(),
            steps: 0,
            cycles_per_step: 1,
            next_event: None,
        }
    }

    pub fn on(mut self, lines: InterruptFlags, steps: u32, cycles_per_step: u32) -> Self {
        self.lines = lines;
        self.steps = steps;
        self.cycles_per_step = cycles_per_step;
        self
    }

    pub fn with_queue(mut self, queue: DmaQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_next_event(mut self, next_event: Option<u32>) -> Self {
        self.next_event = next_event;
        self
    }
}

impl DmaUnit for ScriptedDma {
    fn trigger(&mut self, lines: InterruptFlags) -> bool {
        if !lines.intersects(self.lines) || self.steps == 0 {
            return false;
        }
        self.queue.start(self.steps);
        true
    }

    fn perform(&mut self) -> DmaStep {
        let mut log = self.queue.0.borrow_mut();
        log.pending = log.pending.saturating_sub(1);
        log.performed += 1;
        let finished = log.pending == 0;
        DmaStep {
            cycles: self.cycles_per_step,
            finished,
            raised: if finished {
                InterruptFlags::DMA0
            } else {
                InterruptFlags::empty()
            },
        }
    }

    fn cycles_until_next_event(&self) -> Option<u32> {
        self.next_event
    }

    fn current_fetch_value(&self) -> u32 {
        Self::FETCH
    }
}

/// One scripted CPU step. Everything but `Cycles` takes a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Cycles(u32),
    /// Taken branch: the pipeline is refilled.
    Branch,
    Thumb,
    Arm,
    Halt,
    Stop,
    /// Start a transfer of that many steps.
    Dma(u32),
    /// Broken CPU clearing a bubble it never flagged.
    ClearBubble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    Execute(CpuState),
    Bubble(CpuState),
    EnterIrq(CpuState),
}

/// Plays `script`, then `fallback` forever.
pub struct ScriptedCpu {
    script: VecDeque<Op>,
    fallback: Op,
    dma: DmaQueue,
    trace: Vec<Trace>,
    executed: usize,
}

impl ScriptedCpu {
    pub const FETCH: u32 = 0xE1A0_0000;

    pub fn script(script: impl IntoIterator<Item = Op>, fallback: Op) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            dma: DmaQueue::default(),
            trace: Vec::new(),
            executed: 0,
        }
    }

    pub fn repeating(op: Op) -> Self {
        Self::script([], op)
    }

    /// Queue where `Op::Dma` transfers are started.
    pub fn with_dma(mut self, dma: DmaQueue) -> Self {
        self.dma = dma;
        self
    }

    pub fn executed(&self) -> usize {
        self.executed
    }

    pub fn trace(&self) -> &[Trace] {
        &self.trace
    }
}

impl Cpu for ScriptedCpu {
    fn execute(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        self.trace.push(Trace::Execute(state));
        self.executed += 1;
        let op = self.script.pop_front().unwrap_or(self.fallback);
        if let Op::Cycles(cycles) = op {
            return io.advance(cycles);
        }
        io.advance_one();
        match op {
            Op::Cycles(_) => {}
            Op::Branch => io.flag_bubble(),
            Op::Thumb => {
                io.enter_thumb();
                io.flag_bubble();
            }
            Op::Arm => {
                io.enter_arm();
                io.flag_bubble();
            }
            Op::Halt => io.halt()?,
            Op::Stop => io.stop()?,
            Op::Dma(steps) => {
                self.dma.start(steps);
                io.request_dma();
            }
            Op::ClearBubble => io.clear_bubble()?,
        }
        Ok(())
    }

    fn execute_bubble(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        self.trace.push(Trace::Bubble(state));
        io.advance_one();
        io.clear_bubble()
    }

    fn enter_irq(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation> {
        self.trace.push(Trace::EnterIrq(state));
        io.complete_irq_entry()?;
        io.enter_arm();
        io.set_irq_disabled(true);
        io.flag_bubble();
        io.advance_one();
        Ok(())
    }

    fn current_fetch_value(&self) -> u32 {
        Self::FETCH
    }
}
