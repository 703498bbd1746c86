//! Step-counter discontinuity compensation.
//!
//! The hardware step counter occasionally jumps or stalls inconsistently
//! with any plausible step rate. This filter keeps a running offset that is
//! subtracted from every raw reading: a suspicious jump is absorbed into
//! the offset, and if the next reading progresses normally the speculative
//! compensation is taken back out. Tie-breaks favor suppressing a report
//! over emitting a suspect value.

use log::debug;

/// Gap tiers: within the short gap any advance above the tight bound is
/// implausible, within the long gap any advance above the loose bound is.
pub const MIN_DELTA_TS_NS: i64 = 10_000_000_000;
pub const MAX_DELTA_TS_NS: i64 = 30_000_000_000;
pub const MIN_RATE_COUNTER: i32 = 10;
pub const MAX_RATE_COUNTER: i32 = 30;

#[derive(Debug, Clone, Copy)]
pub struct StepReading {
    pub value: u16,
    pub report: bool,
}

/// Owned per-device filter state; one instance per driver, no globals.
#[derive(Debug, Default)]
pub struct StepCompensator {
    offset: u16,
    last_compensate: u16,
    before_last_counter: u16,
    last_counter: u16,
    last_timestamp: i64,
    force_report: bool,
}

impl StepCompensator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all history and let the next reading through the suppression
    /// check unconditionally.
    pub fn reset(&mut self) {
        *self = Self {
            force_report: true,
            ..Self::default()
        };
    }

    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn compensate(&mut self, counter: u16, timestamp: i64) -> StepReading {
        let delta = counter as i32 - self.last_counter as i32;
        let mut report = true;

        if delta == 0 {
            // duplicate read; a genuine zero is still worth reporting
            if counter != 0 {
                report = false;
            }
        } else {
            let elapsed = timestamp - self.last_timestamp;
            if (elapsed < MIN_DELTA_TS_NS && delta > MIN_RATE_COUNTER)
                || (elapsed < MAX_DELTA_TS_NS && delta > MAX_RATE_COUNTER)
            {
                // counter advanced faster than anyone can walk
                self.offset = self.offset.wrapping_add(delta as u16);
                self.last_compensate = delta as u16;
            } else {
                // normal progression disproves the glitch hypothesis
                if self.last_compensate != 0 {
                    self.offset = self.offset.wrapping_sub(self.last_compensate);
                }
                self.last_compensate = 0;
            }

            self.before_last_counter = self.last_counter;
            self.last_counter = counter;
            self.last_timestamp = timestamp;
        }

        if self.force_report {
            report = true;
            self.force_report = false;
        }

        debug!(
            "step_counter_compensate: [{}] {}, {}, {} report={}",
            self.offset, self.before_last_counter, self.last_counter, counter, report
        );

        StepReading {
            value: counter.wrapping_sub(self.offset),
            report,
        }
    }
}
