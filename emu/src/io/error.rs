use std::fmt;

use thiserror::Error;

/// Why the CPU cannot take a new suspension request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    Halt,
    Stop,
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => write!(f, "halted"),
            Self::Stop => write!(f, "stopped"),
        }
    }
}

/// A collaborator broke the scheduler's contract.
///
/// These are programming errors: the emulated machine would silently drift
/// out of cycle-exact timing if they were tolerated, so the current quantum
/// is aborted and the violation is handed back to the host.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("quantum of {requested} cycles does not fit with a carried balance of {carried}")]
    QuantumOverflow { requested: u32, carried: i32 },

    #[error("advancing {clocks} cycles on top of {accumulated} accumulated overruns the cycle budget")]
    ClockOverflow { clocks: u32, accumulated: u32 },

    #[error("halt cannot progress: an event is due now but nothing was raised")]
    HaltStalled,

    #[error("pipeline bubble cleared while none was pending")]
    NoBubblePending,

    #[error("IRQ entry completed while no IRQ was pending")]
    NoIrqPending,

    #[error("DMA completion reported while no transfer owned the bus")]
    DmaNotActive,

    #[error("CPU asked to be {requested} while already {current}")]
    AlreadySuspended {
        requested: Suspension,
        current: Suspension,
    },

    #[error("external wake delivered while not stopped")]
    NotStopped,
}
