//! # Signal Processing Port
//!
//! The ring vendor's demodulation and beat-detection algorithm is consumed as
//! an opaque `SignalProcessor`: it takes one raw integer sample, returns the
//! processed amplitude, and now and then reports beat-derived heart rate or
//! HRV. At the end of a measurement it classifies the whole recording.

use crate::models::DerivedIndices;

/// Values the algorithm derives from the beats it detects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlgorithmEvent {
    HeartRate(u32),
    Hrv(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSample {
    pub amplitude: f64,
    pub events: Vec<AlgorithmEvent>,
}

/// Classification of a finished recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnosis {
    /// 0 = failed measurement, 1..=7 = classifier outcome
    pub diagnose_type: u8,
    pub is_afib: bool,
    pub indices: DerivedIndices,
}

pub trait SignalProcessor: Send {
    fn process(&mut self, raw: i32) -> ProcessedSample;
    fn diagnose(&mut self) -> Diagnosis;
    fn reset(&mut self);
}

/// Processor that forwards raw samples as amplitudes
///
/// Used when the vendor algorithm is not linked (simulation and tests).
/// A recording shorter than `min_samples` is classified as failed.
#[derive(Debug, Clone)]
pub struct PassthroughProcessor {
    min_samples: usize,
    seen: usize,
}

impl PassthroughProcessor {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples,
            seen: 0,
        }
    }
}

impl SignalProcessor for PassthroughProcessor {
    fn process(&mut self, raw: i32) -> ProcessedSample {
        self.seen += 1;
        ProcessedSample {
            amplitude: raw as f64,
            events: Vec::new(),
        }
    }

    fn diagnose(&mut self) -> Diagnosis {
        Diagnosis {
            diagnose_type: if self.seen >= self.min_samples { 1 } else { 0 },
            is_afib: false,
            indices: DerivedIndices::default(),
        }
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}
