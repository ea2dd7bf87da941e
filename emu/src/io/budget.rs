use serde::{Deserialize, Serialize};

use super::{ContractViolation, SystemStatus};

/// Cycles left in the current quantum, plus the balance carried between quanta.
///
/// The balance is whatever was left when the last quantum ended: usually
/// zero or negative (the last instruction overshot the boundary), and it is
/// always folded into the next request so that no cycle is ever lost.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleBudget {
    cycles_to_iterate: i32,
    carried: i32,
}

impl CycleBudget {
    /// Start a quantum of `requested` cycles on top of the carried balance.
    /// Returns whether there is anything to run.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::QuantumOverflow`] if the budget does not fit.
    pub fn begin(&mut self, requested: u32) -> Result<bool, ContractViolation> {
        let overflow = ContractViolation::QuantumOverflow {
            requested,
            carried: self.carried,
        };
        let requested = i32::try_from(requested).map_err(|_| overflow)?;
        self.cycles_to_iterate = requested.checked_add(self.carried).ok_or(overflow)?;
        Ok(self.cycles_to_iterate > 0)
    }

    /// Cycles left in the quantum. Once none are left this flags the end of
    /// the iteration and returns 0.
    #[inline]
    pub fn remaining(&self, status: &mut SystemStatus) -> u32 {
        if self.cycles_to_iterate < 1 {
            status.insert(SystemStatus::ITERATION_END);
            return 0;
        }
        self.cycles_to_iterate.unsigned_abs()
    }

    /// Account for cycles that were delivered to the peripherals.
    #[inline]
    pub const fn consume(&mut self, clocks: u32) {
        // `Io::advance` keeps the accumulated cycles within `headroom`.
        self.cycles_to_iterate = self.cycles_to_iterate.saturating_sub_unsigned(clocks);
    }

    /// Cycles that can still be consumed before the balance leaves the `i32`
    /// range.
    #[must_use]
    pub const fn headroom(&self) -> u32 {
        self.cycles_to_iterate.abs_diff(i32::MIN)
    }

    /// Throw away what is left of the quantum.
    pub const fn clear(&mut self) {
        self.cycles_to_iterate = 0;
    }

    /// Carry whatever is left (usually an overshoot) into the next quantum.
    pub const fn end(&mut self) {
        self.carried = self.cycles_to_iterate;
    }

    #[must_use]
    pub const fn cycles_to_iterate(&self) -> i32 {
        self.cycles_to_iterate
    }

    #[must_use]
    pub const fn carried(&self) -> i32 {
        self.carried
    }
}
