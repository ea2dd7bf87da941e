use serde::{Deserialize, Serialize};

use super::{Deadline, InterruptFlags, InterruptUnit};

/// Interrupt controller registers, as far as interrupt presence and timing go.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptControl {
    /// Interrupt Enable (IE), one bit per line.
    pub interrupt_enable: InterruptFlags,
    /// Interrupt Request Flags (IF), bits are set when interrupts are requested,
    /// cleared by writing 1 to the corresponding bit
    pub interrupt_request: InterruptFlags,
    /// Interrupt Master Enable (IME), only bit 0 is used.
    pub interrupt_master_enable: u16,
}

impl InterruptControl {
    #[must_use]
    pub const fn new(enabled: InterruptFlags, master_enable: bool) -> Self {
        Self {
            interrupt_enable: enabled,
            interrupt_request: InterruptFlags::empty(),
            interrupt_master_enable: master_enable as u16,
        }
    }

    #[must_use]
    pub const fn master_enabled(&self) -> bool {
        self.interrupt_master_enable & 1 == 1
    }

    fn closest_enabled(&self, upcoming: &[Option<Deadline>]) -> Option<u32> {
        upcoming
            .iter()
            .flatten()
            .filter(|deadline| deadline.lines.intersects(self.interrupt_enable))
            .map(|deadline| deadline.cycles)
            .min()
    }
}

impl InterruptUnit for InterruptControl {
    fn request(&mut self, lines: InterruptFlags) {
        self.interrupt_request.insert(lines);
    }

    /// Write-1-to-clear acknowledge of `IF`.
    fn acknowledge(&mut self, lines: InterruptFlags) {
        self.interrupt_request.remove(lines);
    }

    fn irq_match(&self) -> bool {
        self.interrupt_enable.intersects(self.interrupt_request)
    }

    fn irq_line(&self) -> bool {
        self.master_enabled() && self.irq_match()
    }

    fn cycles_until_irq(&self, upcoming: &[Option<Deadline>]) -> Option<u32> {
        if !self.master_enabled() {
            return None;
        }
        self.closest_enabled(upcoming)
    }

    fn cycles_until_halt_exit(&self, upcoming: &[Option<Deadline>]) -> Option<u32> {
        // HALT is left on IE & IF alone, IME does not gate it.
        self.closest_enabled(upcoming)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn deadlines() -> [Option<Deadline>; 3] {
        [
            Some(Deadline::new(InterruptFlags::HBLANK, 960)),
            Some(Deadline::new(InterruptFlags::TIMER0, 300)),
            None,
        ]
    }

    #[test]
    fn match_requires_enable() {
        let mut irq = InterruptControl::new(InterruptFlags::VBLANK, true);
        irq.request(InterruptFlags::HBLANK);
        assert!(!irq.irq_match());
        assert!(!irq.irq_line());

        irq.request(InterruptFlags::VBLANK);
        assert!(irq.irq_match());
        assert!(irq.irq_line());
    }

    #[test]
    fn master_enable_gates_line_not_match() {
        let mut irq = InterruptControl::new(InterruptFlags::TIMER0, false);
        irq.request(InterruptFlags::TIMER0);
        assert!(irq.irq_match());
        assert!(!irq.irq_line());
    }

    #[test]
    fn acknowledge_clears_request() {
        let mut irq = InterruptControl::new(InterruptFlags::TIMER0, true);
        irq.request(InterruptFlags::TIMER0 | InterruptFlags::SERIAL);
        irq.acknowledge(InterruptFlags::TIMER0);
        assert_eq!(irq.interrupt_request, InterruptFlags::SERIAL);
        assert!(!irq.irq_line());
    }

    #[test]
    fn prediction_only_considers_enabled_lines() {
        let irq = InterruptControl::new(InterruptFlags::HBLANK, true);
        assert_eq!(irq.cycles_until_irq(&deadlines()), Some(960));

        let irq = InterruptControl::new(InterruptFlags::HBLANK | InterruptFlags::TIMER0, true);
        assert_eq!(irq.cycles_until_irq(&deadlines()), Some(300));

        let irq = InterruptControl::new(InterruptFlags::SERIAL, true);
        assert_eq!(irq.cycles_until_irq(&deadlines()), None);
    }

    #[test]
    fn halt_exit_prediction_ignores_master_enable() {
        let irq = InterruptControl::new(InterruptFlags::TIMER0, false);
        assert_eq!(irq.cycles_until_irq(&deadlines()), None);
        assert_eq!(irq.cycles_until_halt_exit(&deadlines()), Some(300));
    }
}
