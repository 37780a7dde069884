//! Finite-duration measurement state machine.
//!
//! `Idle -> Measuring -> Completed | Aborted`. A terminal session goes back to
//! `Measuring` on the next `begin`. The machine only counts; timers and
//! device commands live in the pipeline.

use crate::error::SessionError;

/// Length of one measurement
pub const DEFAULT_DURATION_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Measuring,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub elapsed_secs: u32,
    /// elapsed / duration, 0.0..=1.0
    pub fraction: f64,
    /// This tick reached the full duration
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct MeasurementSession {
    phase: Phase,
    elapsed_secs: u32,
    duration_secs: u32,
}

impl Default for MeasurementSession {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_SECS)
    }
}

impl MeasurementSession {
    pub fn new(duration_secs: u32) -> Self {
        Self {
            phase: Phase::Idle,
            elapsed_secs: 0,
            duration_secs: duration_secs.max(1),
        }
    }

    /// Enter `Measuring` with elapsed time reset to zero
    pub fn begin(&mut self) -> Result<(), SessionError> {
        if self.phase == Phase::Measuring {
            return Err(SessionError::AlreadyMeasuring);
        }
        self.phase = Phase::Measuring;
        self.elapsed_secs = 0;
        log::info!("Measurement started ({}s)", self.duration_secs);
        Ok(())
    }

    /// Advance one second; `None` when not measuring
    pub fn tick(&mut self) -> Option<Progress> {
        if self.phase != Phase::Measuring {
            return None;
        }

        self.elapsed_secs += 1;
        let completed = self.elapsed_secs >= self.duration_secs;
        if completed {
            self.phase = Phase::Completed;
            log::info!("Measurement completed after {}s", self.elapsed_secs);
        }
        Some(Progress {
            elapsed_secs: self.elapsed_secs,
            fraction: self.fraction(),
            completed,
        })
    }

    /// Manual stop; returns false if nothing was running
    pub fn finish(&mut self) -> bool {
        if self.phase != Phase::Measuring {
            return false;
        }
        self.phase = Phase::Completed;
        log::info!("Measurement stopped at {}s", self.elapsed_secs);
        true
    }

    pub fn abort(&mut self) {
        if self.phase == Phase::Measuring {
            log::info!("Measurement aborted at {}s", self.elapsed_secs);
            self.phase = Phase::Aborted;
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_measuring(&self) -> bool {
        self.phase == Phase::Measuring
    }

    pub fn elapsed_secs(&self) -> u32 {
        self.elapsed_secs
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    pub fn fraction(&self) -> f64 {
        (self.elapsed_secs as f64 / self.duration_secs as f64).min(1.0)
    }
}
