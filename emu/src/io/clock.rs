//! # Clock distributor
//!
//! Cycles are not handed to the peripherals as they happen. They pile up in
//! `accumulated` and are delivered in one go once the predicted next event
//! is reached, or earlier when someone needs a peripheral to be up to date.
//!
//! A peripheral synced early keeps a watermark of what it already received,
//! so the following full flush only hands it the rest:
//!
//! ```text
//!            accumulated = 10
//! graphics   ██████████          watermark 6  -> flush delivers 4
//! timers     ──────────          watermark 0  -> flush delivers 10
//! serial     ──────────          watermark 0  -> flush delivers 10
//! ```

use serde::{Deserialize, Serialize};

use super::ContractViolation;

/// Peripherals with their own delivery watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Graphics,
    Timers,
    Serial,
}

/// Cycles owed to each peripheral by a full flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub total: u32,
    pub graphics: u32,
    pub timers: u32,
    pub serial: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDistributor {
    accumulated: u32,
    graphics: u32,
    timers: u32,
    serial: u32,
    next_event: u32,
}

impl ClockDistributor {
    /// Add `clocks`, returning whether the predicted event has been reached.
    /// The total may not go past `limit`.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::ClockOverflow`] if the total would exceed `limit`.
    #[inline]
    pub fn accumulate(&mut self, clocks: u32, limit: u32) -> Result<bool, ContractViolation> {
        let accumulated = self.accumulated;
        self.accumulated = accumulated
            .checked_add(clocks)
            .filter(|&total| total <= limit)
            .ok_or(ContractViolation::ClockOverflow {
                clocks,
                accumulated,
            })?;
        Ok(self.reached_event())
    }

    #[inline]
    pub const fn accumulate_one(&mut self) -> bool {
        // Below `next_event` before the step, and `next_event` never exceeds
        // the remaining budget. Larger advances are bounded by `accumulate`.
        self.accumulated += 1;
        self.reached_event()
    }

    #[inline]
    pub const fn accumulate_two(&mut self) -> bool {
        self.accumulated += 2;
        self.reached_event()
    }

    #[inline]
    const fn reached_event(&self) -> bool {
        self.accumulated >= self.next_event
    }

    /// Everything not yet delivered, resetting the accumulation window.
    pub const fn drain(&mut self) -> Pending {
        let pending = Pending {
            total: self.accumulated,
            graphics: self.accumulated - self.graphics,
            timers: self.accumulated - self.timers,
            serial: self.accumulated - self.serial,
        };
        self.accumulated = 0;
        self.graphics = 0;
        self.timers = 0;
        self.serial = 0;
        pending
    }

    /// Cycles owed to a single peripheral, moving its watermark up to date.
    pub const fn sync(&mut self, sink: Sink) -> u32 {
        let watermark = match sink {
            Sink::Graphics => &mut self.graphics,
            Sink::Timers => &mut self.timers,
            Sink::Serial => &mut self.serial,
        };
        let delta = self.accumulated - *watermark;
        *watermark = self.accumulated;
        delta
    }

    /// Move the prediction to the next checkpoint without recomputing it.
    pub const fn retain_prediction(&mut self) {
        self.next_event = self.next_event.saturating_sub(self.accumulated);
    }

    pub const fn set_next_event(&mut self, clocks: u32) {
        self.next_event = clocks;
    }

    #[must_use]
    pub const fn accumulated(&self) -> u32 {
        self.accumulated
    }

    #[must_use]
    pub const fn next_event(&self) -> u32 {
        self.next_event
    }

    /// Cycles already delivered to `sink` in the current window.
    #[must_use]
    pub const fn watermark(&self, sink: Sink) -> u32 {
        match sink {
            Sink::Graphics => self.graphics,
            Sink::Timers => self.timers,
            Sink::Serial => self.serial,
        }
    }
}
