//! # Event prediction
//!
//! Instead of asking DMA and the interrupt controller whether they need
//! attention on every cycle, the scheduler asks once how far away their next
//! event is and lets the clock run freely until then.

use super::Io;

/// Closest of the quantum end and the two candidate events.
/// `None` means the collaborator knows of nothing pending.
#[inline]
#[must_use]
pub fn solve_closest_time(remaining: u32, first: Option<u32>, second: Option<u32>) -> u32 {
    [first, second]
        .into_iter()
        .flatten()
        .fold(remaining, u32::min)
}

impl Io {
    /// Predict how many clocks until the next DMA or IRQ event and make it
    /// the next flush threshold.
    pub(crate) fn update_event_time(&mut self) {
        let clocks = self.cycles_until_next_event();
        self.clock.set_next_event(clocks);
    }

    /// Clocks until the next IRQ or DMA event, capped by the quantum end.
    pub(crate) fn cycles_until_next_event(&mut self) -> u32 {
        let upcoming = self.devices.upcoming_interrupts();
        let irq = self.devices.interrupts.cycles_until_irq(&upcoming);
        let dma = self.devices.dma.cycles_until_next_event();
        let remaining = self.budget.remaining(&mut self.status);
        solve_closest_time(remaining, irq, dma)
    }

    /// Clocks until HALT could be left or DMA wants the bus. General IRQ
    /// latency is irrelevant here: nothing else can end a halt.
    pub(crate) fn cycles_until_next_halt_event(&mut self) -> u32 {
        let upcoming = self.devices.upcoming_interrupts();
        let halt = self.devices.interrupts.cycles_until_halt_exit(&upcoming);
        let dma = self.devices.dma.cycles_until_next_event();
        let remaining = self.budget.remaining(&mut self.status);
        solve_closest_time(remaining, halt, dma)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hardware::interrupt_control::InterruptControl;
    use crate::hardware::{Devices, InterruptFlags};
    use crate::io::SystemStatus;
    use crate::testing::{Periodic, ScriptedDma};

    #[test]
    fn closest_time_ignores_missing_candidates() {
        assert_eq!(solve_closest_time(100, None, None), 100);
        assert_eq!(solve_closest_time(100, Some(40), None), 40);
        assert_eq!(solve_closest_time(100, None, Some(30)), 30);
        assert_eq!(solve_closest_time(100, Some(40), Some(30)), 30);
        assert_eq!(solve_closest_time(100, Some(400), Some(300)), 100);
        assert_eq!(solve_closest_time(0, Some(5), Some(0)), 0);
    }

    fn io_with(irq: InterruptControl, timer_in: u32, dma_in: Option<u32>) -> Io {
        let devices = Devices {
            timers: Box::new(Periodic::new(InterruptFlags::TIMER0, timer_in)),
            dma: Box::new(ScriptedDma::idle().with_next_event(dma_in)),
            interrupts: Box::new(irq),
            ..Devices::default()
        };
        let mut io = Io::new(devices);
        io.budget.begin(1000).unwrap();
        io
    }

    #[test]
    fn general_prediction_respects_master_enable() {
        let mut io = io_with(InterruptControl::new(InterruptFlags::TIMER0, true), 120, None);
        assert_eq!(io.cycles_until_next_event(), 120);

        let mut io = io_with(InterruptControl::new(InterruptFlags::TIMER0, false), 120, None);
        assert_eq!(io.cycles_until_next_event(), 1000);
    }

    #[test]
    fn halt_prediction_ignores_master_enable() {
        let mut io = io_with(InterruptControl::new(InterruptFlags::TIMER0, false), 120, Some(500));
        assert_eq!(io.cycles_until_next_halt_event(), 120);

        let mut io = io_with(InterruptControl::new(InterruptFlags::VBLANK, false), 120, Some(500));
        assert_eq!(io.cycles_until_next_halt_event(), 500);
    }

    #[test]
    fn exhausted_budget_predicts_zero_and_ends_iteration() {
        let mut io = io_with(InterruptControl::new(InterruptFlags::TIMER0, true), 120, Some(7));
        io.budget.consume(1000);
        assert_eq!(io.cycles_until_next_event(), 0);
        assert!(io.status.contains(SystemStatus::ITERATION_END));
    }
}
