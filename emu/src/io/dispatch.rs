use super::{Activity, ContractViolation, Io, SystemStatus};
use crate::cpu::{Cpu, CpuState};
use crate::hardware::Devices;

/// The CPU together with the scheduler it runs under.
pub struct IoCore<C: Cpu> {
    cpu: C,
    io: Io,
}

impl<C: Cpu> IoCore<C> {
    pub fn new(cpu: C, devices: Devices) -> Self {
        Self {
            cpu,
            io: Io::new(devices),
        }
    }

    /// Run for about `requested` cycles. Whatever the last step overshot (or
    /// left unused) is carried into the next call.
    ///
    /// # Errors
    ///
    /// The first [`ContractViolation`] raised by a collaborator. The quantum
    /// is abandoned where it happened; the machine state is not consistent
    /// anymore and emulation should not continue.
    pub fn run_quantum(&mut self, requested: u32) -> Result<(), ContractViolation> {
        if self.io.budget.begin(requested)? {
            self.io.update_event_time();
            self.run()?;
            // Spill what the last steps accumulated.
            self.io.flush();
            self.io.devices.audio.audio_jit();
        } else {
            tracing::trace!(
                requested,
                carried = self.io.budget.carried(),
                "quantum swallowed by overshoot"
            );
        }
        self.io.budget.end();
        Ok(())
    }

    /// Outer gate: pick the instruction set loop until the iteration ends.
    fn run(&mut self) -> Result<(), ContractViolation> {
        while let Some(state) = self.io.status.gate() {
            self.run_state(state)?;
        }
        self.io.status.remove(SystemStatus::ITERATION_END);
        Ok(())
    }

    /// Inner loop for one instruction set. Flags are re-read on every pass
    /// and the loop is left as soon as they stop matching `state`.
    fn run_state(&mut self, state: CpuState) -> Result<(), ContractViolation> {
        loop {
            match self.io.status.activity(state) {
                Activity::Execute => self.cpu.execute(state, &mut self.io)?,
                Activity::Bubble => self.cpu.execute_bubble(state, &mut self.io)?,
                Activity::EnterIrq => self.cpu.enter_irq(state, &mut self.io)?,
                Activity::Dma => self.handle_dma()?,
                Activity::Halt => self.handle_halt()?,
                Activity::Stop => self.handle_stop(),
                Activity::Leave => return Ok(()),
            }
        }
    }

    /// Step the active transfer until the burst ends.
    fn handle_dma(&mut self) -> Result<(), ContractViolation> {
        let halted = self.io.status.contains(SystemStatus::HALT);
        let mut steps = 0_u32;
        loop {
            let step = self.io.devices.dma.perform();
            steps += 1;
            // Released before the step is clocked: a line raised by the flush
            // may start the next transfer right away.
            if step.finished {
                self.io.finish_dma()?;
                tracing::trace!(steps, "DMA released the bus");
            }
            self.io.advance(step.cycles)?;
            self.io.raise(step.raised);
            if !self.io.status.continues_dma(halted) {
                return Ok(());
            }
        }
    }

    fn handle_halt(&mut self) -> Result<(), ContractViolation> {
        if self.io.devices.interrupts.irq_match() {
            tracing::debug!("interrupt requested, leaving halt");
            self.io.status.remove(SystemStatus::HALT);
            return Ok(());
        }
        if self.io.clock.accumulated() > 0 {
            // Peripherals lag behind the CPU, catch them up before predicting
            // and look at the interrupt state again.
            self.io.spill();
            return Ok(());
        }
        // Nothing changes until the next halt event: skip straight to it.
        let clocks = self.io.cycles_until_next_halt_event();
        if clocks == 0 && !self.io.status.contains(SystemStatus::ITERATION_END) {
            tracing::warn!("halt event predicted now, but nothing was raised");
            return Err(ContractViolation::HaltStalled);
        }
        self.io.clock.accumulate(clocks, self.io.budget.headroom())?;
        self.io.spill();
        Ok(())
    }

    /// A stop sleeps through the whole quantum; audio keeps playing silence.
    fn handle_stop(&mut self) {
        // Cycles spent before the stop belong to the peripherals, not to the silence.
        self.io.flush();
        let remaining = self.io.budget.remaining(&mut self.io.status);
        self.io.devices.audio.fill_silence(remaining);
        self.io.budget.clear();
    }

    /// Value on the bus from the current fetch, whoever owns the bus.
    #[must_use]
    pub fn current_fetch_value(&self) -> u32 {
        if self.io.in_dma() {
            self.io.devices.dma.current_fetch_value()
        } else {
            self.cpu.current_fetch_value()
        }
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.io.is_stopped()
    }

    #[must_use]
    pub const fn in_dma(&self) -> bool {
        self.io.in_dma()
    }

    #[must_use]
    pub const fn in_thumb(&self) -> bool {
        self.io.in_thumb()
    }

    #[must_use]
    pub const fn io(&self) -> &Io {
        &self.io
    }

    pub const fn io_mut(&mut self) -> &mut Io {
        &mut self.io
    }

    #[must_use]
    pub const fn cpu(&self) -> &C {
        &self.cpu
    }

    pub const fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }
}
