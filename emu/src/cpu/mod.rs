//! # CPU collaborator
//!
//! The scheduler does not decode or execute instructions. It decides *when*
//! the CPU runs and through which instruction set, and hands the CPU an
//! [`Io`] so that every step can advance the clock and request state
//! transitions (bubble, mode switch, halt...).

use serde::{Deserialize, Serialize};

use crate::io::{ContractViolation, Io};

/// Instruction set the CPU is currently executing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// 32-bit instructions.
    #[default]
    Arm,
    /// 16-bit instructions.
    Thumb,
}

impl From<bool> for CpuState {
    fn from(thumb: bool) -> Self {
        if thumb { Self::Thumb } else { Self::Arm }
    }
}

pub trait Cpu {
    /// Execute exactly one instruction-equivalent step of `state`.
    ///
    /// The step must account for its own cycles through `io`
    /// (`advance_one`, `advance_two`, `advance`).
    ///
    /// # Errors
    ///
    /// Returns the violation raised by any `io` operation it performed.
    fn execute(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation>;

    /// Step through one idle pipeline cycle and clear the bubble.
    ///
    /// # Errors
    ///
    /// Returns the violation raised by any `io` operation it performed.
    fn execute_bubble(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation>;

    /// Run the IRQ entry sequence: clear the pending IRQ, switch to ARM
    /// and flag the bubble for the pipeline refill.
    ///
    /// # Errors
    ///
    /// Returns the violation raised by any `io` operation it performed.
    fn enter_irq(&mut self, state: CpuState, io: &mut Io) -> Result<(), ContractViolation>;

    /// Value of the instruction currently being fetched.
    fn current_fetch_value(&self) -> u32;
}
