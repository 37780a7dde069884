//! # Waveform Draw Buffer
//!
//! The arbiter appends display points in arrival order; the draw scheduler
//! reads them back at a fixed cadence. Points are never reordered or dropped,
//! so the buffer also holds the full waveform of the session.

use std::time::Duration;

/// Nominal device sampling rate
pub const SAMPLE_RATE_HZ: u32 = 250;

/// Raw samples averaged into one display point
pub const SAMPLES_PER_POINT: u32 = 3;

/// One display point per group of samples at the nominal rate: 12 ms
pub const TICK_INTERVAL: Duration =
    Duration::from_micros(1_000_000 * SAMPLES_PER_POINT as u64 / SAMPLE_RATE_HZ as u64);

#[derive(Debug, Default, Clone)]
pub struct DrawBuffer {
    points: Vec<f64>,
}

impl DrawBuffer {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn push(&mut self, value: f64) {
        self.points.push(value);
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn last_points(&self, n: usize) -> &[f64] {
        &self.points[self.points.len().saturating_sub(n)..]
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Paced reader over a `DrawBuffer`
///
/// Each tick emits at most one point. When the buffer is exhausted the tick
/// is a no-op and the cursor stays put, so late data is drawn in order.
#[derive(Debug, Default, Clone)]
pub struct DrawScheduler {
    cursor: usize,
}

impl DrawScheduler {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }

    pub fn tick(&mut self, buffer: &DrawBuffer) -> Option<f64> {
        let point = buffer.get(self.cursor)?;
        self.cursor += 1;
        Some(point)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Points buffered but not drawn yet
    pub fn backlog(&self, buffer: &DrawBuffer) -> usize {
        buffer.len().saturating_sub(self.cursor)
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
