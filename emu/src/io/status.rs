//! # System status register
//!
//! Seven orthogonal flags packed in one byte. The dispatcher never keeps a
//! state of its own: every pass it looks at the combination of flags and
//! resolves what runs next.
//!
//! ```text
//!   6     5      4     3     2     1      0
//! ┌─────┬──────┬──────┬─────┬─────┬──────┬────────┐
//! │ END │ STOP │ HALT │ DMA │ IRQ │THUMB │ BUBBLE │
//! └─────┴──────┴──────┴─────┴─────┴──────┴────────┘
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::cpu::CpuState;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SystemStatus: u8 {
        /// One idle pipeline cycle has to elapse before execution resumes.
        const BUBBLE = 0x01;
        /// The compact (THUMB) instruction set is selected.
        const THUMB = 0x02;
        /// The IRQ entry sequence has to run next.
        const IRQ = 0x04;
        /// A DMA transfer owns the bus.
        const DMA = 0x08;
        /// The CPU waits for an interrupt.
        const HALT = 0x10;
        /// The CPU and most peripherals wait for an external wake.
        const STOP = 0x20;
        /// The current quantum is over, control goes back to the caller.
        const ITERATION_END = 0x40;
    }
}

/// What the inner dispatch loop does on a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Execute,
    Bubble,
    EnterIrq,
    Dma,
    Halt,
    Stop,
    /// Mode switched or quantum over: back to the outer gate.
    Leave,
}

impl SystemStatus {
    /// The bits the outer gate looks at.
    const GATE: Self = Self::THUMB.union(Self::ITERATION_END);

    /// Mode bit pattern of an instruction set.
    #[inline]
    const fn mode(state: CpuState) -> Self {
        match state {
            CpuState::Arm => Self::empty(),
            CpuState::Thumb => Self::THUMB,
        }
    }

    /// Outer gate: which inner loop to run, or `None` at the end of the quantum.
    #[inline]
    #[must_use]
    pub fn gate(self) -> Option<CpuState> {
        match self.intersection(Self::GATE) {
            gate if gate == Self::empty() => Some(CpuState::Arm),
            gate if gate == Self::THUMB => Some(CpuState::Thumb),
            _ => None,
        }
    }

    /// Inner loop priority resolution for the loop running `state`.
    #[inline]
    #[must_use]
    pub fn activity(self, state: CpuState) -> Activity {
        let mode = Self::mode(state);

        if self == mode {
            return Activity::Execute;
        }
        if self.difference(Self::IRQ) == mode.union(Self::BUBBLE) {
            return Activity::Bubble;
        }
        if self == mode.union(Self::IRQ) {
            return Activity::EnterIrq;
        }

        // Past this point BUBBLE and IRQ are irrelevant.
        let suspended = self.intersection(Self::GATE | Self::DMA | Self::HALT | Self::STOP);
        if suspended.contains(Self::DMA)
            && suspended.difference(Self::DMA | Self::HALT) == mode
        {
            return Activity::Dma;
        }
        if suspended == mode.union(Self::HALT) {
            return Activity::Halt;
        }
        if self.intersection(Self::GATE) != mode {
            return Activity::Leave;
        }
        Activity::Stop
    }

    /// The DMA burst keeps going while this holds.
    #[inline]
    #[must_use]
    pub fn continues_dma(self, halted_on_entry: bool) -> bool {
        self.intersection(Self::DMA | Self::ITERATION_END) == Self::DMA
            && self.contains(Self::HALT) == halted_on_entry
    }

    #[inline]
    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        self.contains(Self::THUMB).into()
    }
}
