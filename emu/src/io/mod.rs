//! # IO core scheduler
//!
//! Every emulated cycle goes through this module. It decides, pass after
//! pass, whether the CPU executes, steps a pipeline bubble, enters an IRQ,
//! lets DMA own the bus, sleeps in HALT or sits in STOP, and it lazily hands
//! elapsed cycles to the timing-sensitive peripherals.
//!
//! ```text
//! run_quantum(n)
//!   │ budget = n + carried
//!   ├─ predict next event ──► min(budget, irq, dma)
//!   ├─ dispatch loop ───────► cpu / bubble / irq / dma / halt / stop
//!   │     └─ advance(clocks) ──► flush when the prediction is reached
//!   ├─ flush what is left
//!   └─ carried = what is left of the budget
//! ```
//!
//! [`Io`] is the narrow capability collaborators get: clocking, flag
//! transitions and peripheral syncs. [`IoCore`] owns it together with the
//! CPU and exposes the quantum entry point to the host.

mod budget;
mod clock;
mod dispatch;
mod error;
mod prediction;
mod status;

use serde::{Deserialize, Serialize};

pub use budget::CycleBudget;
pub use clock::{ClockDistributor, Pending, Sink};
pub use dispatch::IoCore;
pub use error::{ContractViolation, Suspension};
pub use prediction::solve_closest_time;
pub use status::{Activity, SystemStatus};

use crate::cpu::CpuState;
use crate::hardware::{Devices, InterruptFlags};

/// Everything the scheduler needs to resume exactly where it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoState {
    pub status: SystemStatus,
    pub budget: CycleBudget,
    pub clock: ClockDistributor,
    pub irq_disabled: bool,
}

pub struct Io {
    status: SystemStatus,
    budget: CycleBudget,
    clock: ClockDistributor,
    /// Mirror of the CPSR I bit.
    irq_disabled: bool,
    devices: Devices,
}

impl Io {
    #[must_use]
    pub fn new(devices: Devices) -> Self {
        Self {
            status: SystemStatus::empty(),
            budget: CycleBudget::default(),
            clock: ClockDistributor::default(),
            irq_disabled: false,
            devices,
        }
    }

    // Clocking

    /// Account for `clocks` elapsed cycles.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::ClockOverflow`] if consuming the accumulated
    /// cycles would push the budget out of its signed range.
    #[inline]
    pub fn advance(&mut self, clocks: u32) -> Result<(), ContractViolation> {
        if self.clock.accumulate(clocks, self.budget.headroom())? {
            self.spill();
        }
        Ok(())
    }

    #[inline]
    pub fn advance_one(&mut self) {
        if self.clock.accumulate_one() {
            self.spill();
        }
    }

    #[inline]
    pub fn advance_two(&mut self) {
        if self.clock.accumulate_two() {
            self.spill();
        }
    }

    /// Flush every peripheral and predict the next event from scratch.
    /// Collaborators call this after changing timing-relevant state.
    pub fn reschedule(&mut self) {
        self.spill();
    }

    /// Flush every peripheral, keeping the current prediction: it only moves
    /// to count from the new checkpoint.
    pub fn flush_retaining_prediction(&mut self) {
        self.clock.retain_prediction();
        self.flush();
    }

    /// Bring graphics up to date, e.g. before one of its registers is read.
    pub fn sync_graphics(&mut self) {
        let clocks = self.clock.sync(Sink::Graphics);
        let raised = self.devices.graphics.advance_by(clocks);
        self.raise(raised);
    }

    pub fn sync_timers(&mut self) {
        let clocks = self.clock.sync(Sink::Timers);
        let raised = self.devices.timers.advance_by(clocks);
        self.raise(raised);
    }

    pub fn sync_serial(&mut self) {
        let clocks = self.clock.sync(Sink::Serial);
        let raised = self.devices.serial.advance_by(clocks);
        self.raise(raised);
    }

    fn spill(&mut self) {
        self.flush();
        self.update_event_time();
    }

    /// Deliver everything accumulated and take it out of the budget.
    fn flush(&mut self) {
        let pending = self.clock.drain();
        self.budget.consume(pending.total);

        let raised = self.devices.graphics.advance_by(pending.graphics)
            | self.devices.timers.advance_by(pending.timers)
            | self.devices.serial.advance_by(pending.serial);
        self.devices.audio.advance_by(pending.total);
        self.raise(raised);
    }

    /// Interrupt lines raised by a peripheral: DMA may start on them, and
    /// the interrupt controller latches them.
    pub fn raise(&mut self, lines: InterruptFlags) {
        if lines.is_empty() {
            return;
        }
        if self.devices.dma.trigger(lines) {
            self.status.insert(SystemStatus::DMA);
        }
        self.devices.interrupts.request(lines);
        self.update_irq_line();
    }

    // Flag transitions

    /// Flag IRQ entry if the controller asserts the line and the CPU lets it in.
    pub fn update_irq_line(&mut self) {
        if !self.irq_disabled && self.devices.interrupts.irq_line() {
            self.status.insert(SystemStatus::IRQ);
        }
    }

    /// The CPU changed its IRQ mask (the CPSR I bit).
    pub fn set_irq_disabled(&mut self, disabled: bool) {
        self.irq_disabled = disabled;
        self.update_irq_line();
    }

    #[inline]
    pub fn flag_bubble(&mut self) {
        self.status.insert(SystemStatus::BUBBLE);
    }

    /// # Errors
    ///
    /// [`ContractViolation::NoBubblePending`] if no bubble was flagged.
    #[inline]
    pub fn clear_bubble(&mut self) -> Result<(), ContractViolation> {
        if !self.status.contains(SystemStatus::BUBBLE) {
            return Err(ContractViolation::NoBubblePending);
        }
        self.status.remove(SystemStatus::BUBBLE);
        Ok(())
    }

    pub fn enter_thumb(&mut self) {
        self.status.insert(SystemStatus::THUMB);
    }

    pub fn enter_arm(&mut self) {
        self.status.remove(SystemStatus::THUMB);
    }

    /// # Errors
    ///
    /// [`ContractViolation::NoIrqPending`] if no IRQ was pending.
    pub fn complete_irq_entry(&mut self) -> Result<(), ContractViolation> {
        if !self.status.contains(SystemStatus::IRQ) {
            return Err(ContractViolation::NoIrqPending);
        }
        self.status.remove(SystemStatus::IRQ);
        Ok(())
    }

    /// A transfer was started and owns the bus from the next pass on.
    pub fn request_dma(&mut self) {
        self.status.insert(SystemStatus::DMA);
    }

    /// # Errors
    ///
    /// [`ContractViolation::DmaNotActive`] if no transfer owned the bus.
    pub fn finish_dma(&mut self) -> Result<(), ContractViolation> {
        if !self.status.contains(SystemStatus::DMA) {
            return Err(ContractViolation::DmaNotActive);
        }
        self.status.remove(SystemStatus::DMA);
        Ok(())
    }

    /// # Errors
    ///
    /// [`ContractViolation::AlreadySuspended`] if the CPU is halted or stopped.
    pub fn halt(&mut self) -> Result<(), ContractViolation> {
        self.ensure_running(Suspension::Halt)?;
        tracing::debug!("entering halt");
        self.status.insert(SystemStatus::HALT);
        Ok(())
    }

    /// # Errors
    ///
    /// [`ContractViolation::AlreadySuspended`] if the CPU is halted or stopped.
    pub fn stop(&mut self) -> Result<(), ContractViolation> {
        self.ensure_running(Suspension::Stop)?;
        tracing::debug!("entering stop");
        self.status.insert(SystemStatus::STOP);
        Ok(())
    }

    /// External wake source (keypad, cartridge) ends a STOP.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::NotStopped`] if the CPU was not stopped.
    pub fn wake(&mut self) -> Result<(), ContractViolation> {
        if !self.status.contains(SystemStatus::STOP) {
            return Err(ContractViolation::NotStopped);
        }
        tracing::debug!("woken from stop");
        self.status.remove(SystemStatus::STOP);
        Ok(())
    }

    fn ensure_running(&self, requested: Suspension) -> Result<(), ContractViolation> {
        let current = if self.status.contains(SystemStatus::STOP) {
            Suspension::Stop
        } else if self.status.contains(SystemStatus::HALT) {
            Suspension::Halt
        } else {
            return Ok(());
        };
        tracing::warn!(%requested, %current, "suspension requested while suspended");
        Err(ContractViolation::AlreadySuspended { requested, current })
    }

    // Queries

    #[must_use]
    pub const fn status(&self) -> SystemStatus {
        self.status
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.status.contains(SystemStatus::STOP)
    }

    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.status.contains(SystemStatus::HALT)
    }

    #[must_use]
    pub const fn in_dma(&self) -> bool {
        self.status.contains(SystemStatus::DMA)
    }

    #[must_use]
    pub const fn in_thumb(&self) -> bool {
        self.status.contains(SystemStatus::THUMB)
    }

    #[must_use]
    pub fn cpu_state(&self) -> CpuState {
        self.status.cpu_state()
    }

    #[must_use]
    pub const fn budget(&self) -> &CycleBudget {
        &self.budget
    }

    #[must_use]
    pub const fn clock(&self) -> &ClockDistributor {
        &self.clock
    }

    #[must_use]
    pub const fn devices(&self) -> &Devices {
        &self.devices
    }

    pub const fn devices_mut(&mut self) -> &mut Devices {
        &mut self.devices
    }

    // Save states

    #[must_use]
    pub const fn snapshot(&self) -> IoState {
        IoState {
            status: self.status,
            budget: self.budget,
            clock: self.clock,
            irq_disabled: self.irq_disabled,
        }
    }

    pub const fn restore(&mut self, state: IoState) {
        self.status = state.status;
        self.budget = state.budget;
        self.clock = state.clock;
        self.irq_disabled = state.irq_disabled;
    }
}
