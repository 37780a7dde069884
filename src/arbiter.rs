//! # Signal Ingest Arbiter
//!
//! Consumes ring notifications. Vitals are split from waveform samples and
//! forwarded to observers; heart rate and HRV are arbitrated between the
//! ring's own values and the values the signal processor derives from beats.
//! Once the ring reports a valid value of a kind, derived values of that kind
//! are dropped until the next reset.
//!
//! Waveform samples are processed, averaged in groups of three, scaled to
//! display cells and appended to the draw buffer.

use crate::device::{Notification, VitalsMessage};
use crate::draw::{DrawBuffer, SAMPLES_PER_POINT};
use crate::electrode::{ElectrodeContactMonitor, ElectrodeEvent, ElectrodeStatus};
use crate::pipeline::PipelineEvent;
use crate::processing::{AlgorithmEvent, Diagnosis, SignalProcessor};
use crossbeam_channel::Sender;
use tokio::time::Instant;

/// Height of one display cell in output units
pub const DEFAULT_CELL_SIZE: f64 = 10.0;

/// Processed amplitude that maps to one cell
pub const SCALE_DIVISOR: f64 = 4000.0;

/// Points are clipped to this many cells either side of zero
pub const CLIP_CELLS: f64 = 20.0;

/// Leading points drawn flat while the signal settles
pub const STARTUP_POINTS: usize = 50;

/// Ring HRV above this is invalid
pub const HRV_CEILING: u32 = 150;

/// A vital value forwarded to observers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VitalReading {
    HeartRate(u32),
    Hrv(u32),
    BloodOxygen(u32),
    Temperature(f64),
    BloodPressure { systolic: u32, diastolic: u32 },
}

/// Last forwarded value of every vital; zero when never seen
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatestVitals {
    pub heart_rate: u32,
    pub hrv: u32,
    pub systolic_bp: u32,
    pub diastolic_bp: u32,
    pub blood_oxygen: u32,
    pub temperature: f64,
}

impl LatestVitals {
    fn record(&mut self, reading: VitalReading) {
        match reading {
            VitalReading::HeartRate(bpm) => self.heart_rate = bpm,
            VitalReading::Hrv(hrv) => self.hrv = hrv,
            VitalReading::BloodOxygen(spo2) => self.blood_oxygen = spo2,
            VitalReading::Temperature(celsius) => self.temperature = celsius,
            VitalReading::BloodPressure {
                systolic,
                diastolic,
            } => {
                self.systolic_bp = systolic;
                self.diastolic_bp = diastolic;
            }
        }
    }
}

/// Scale a processed amplitude to display units and clip it
pub fn scale_and_clip(value: f64, cell_size: f64) -> f64 {
    let limit = cell_size * CLIP_CELLS;
    (value / SCALE_DIVISOR * cell_size).clamp(-limit, limit)
}

pub struct SignalIngestArbiter {
    processor: Box<dyn SignalProcessor>,
    events: Sender<PipelineEvent>,
    cell_size: f64,

    device_hr_priority: bool,
    device_hrv_priority: bool,
    latest: LatestVitals,

    // trailing memory of the averaging window
    prev: f64,
    prev_prev: f64,
    samples_seen: u64,
    points_emitted: usize,

    buffer: DrawBuffer,
    electrode: ElectrodeContactMonitor,
}

impl SignalIngestArbiter {
    pub fn new(
        processor: Box<dyn SignalProcessor>,
        events: Sender<PipelineEvent>,
        cell_size: f64,
    ) -> Self {
        Self {
            processor,
            events,
            cell_size,
            device_hr_priority: false,
            device_hrv_priority: false,
            latest: LatestVitals::default(),
            prev: 0.0,
            prev_prev: 0.0,
            samples_seen: 0,
            points_emitted: 0,
            buffer: DrawBuffer::new(),
            electrode: ElectrodeContactMonitor::default(),
        }
    }

    /// Handle one device notification received at `now`
    pub fn ingest(&mut self, payload: &Notification, now: Instant) {
        if let Some(vitals) = &payload.vitals {
            self.ingest_vitals(vitals);
        }
        if let Some(samples) = &payload.waveform {
            for &raw in samples {
                self.ingest_sample(raw, now);
            }
        }
    }

    fn ingest_vitals(&mut self, vitals: &VitalsMessage) {
        if vitals.heart_rate > 0 {
            if !self.device_hr_priority {
                log::debug!("Ring heart rate takes priority for this session");
            }
            self.device_hr_priority = true;
            self.forward(VitalReading::HeartRate(vitals.heart_rate));
        }

        if vitals.hrv > 0 && vitals.hrv <= HRV_CEILING {
            self.device_hrv_priority = true;
            self.forward(VitalReading::Hrv(vitals.hrv));
        }

        if vitals.systolic_bp > 0 && vitals.diastolic_bp > 0 {
            self.forward(VitalReading::BloodPressure {
                systolic: vitals.systolic_bp,
                diastolic: vitals.diastolic_bp,
            });
        }

        if vitals.blood_oxygen > 0 {
            self.forward(VitalReading::BloodOxygen(vitals.blood_oxygen));
        }

        if vitals.temperature > 0.0 {
            self.forward(VitalReading::Temperature(vitals.temperature));
        }
    }

    fn ingest_sample(&mut self, raw: i32, now: Instant) {
        if let Some(edge) = self.electrode.record_sample(now) {
            self.report_electrode(edge);
        }

        let processed = self.processor.process(raw);
        for event in processed.events {
            match event {
                AlgorithmEvent::HeartRate(bpm) if bpm > 0 && !self.device_hr_priority => {
                    self.forward(VitalReading::HeartRate(bpm));
                }
                AlgorithmEvent::Hrv(hrv) if hrv > 0 && !self.device_hrv_priority => {
                    self.forward(VitalReading::Hrv(hrv));
                }
                _ => {}
            }
        }

        let current = processed.amplitude;
        self.samples_seen += 1;
        if self.samples_seen % SAMPLES_PER_POINT as u64 == 0 {
            let average = (current + self.prev + self.prev_prev) / 3.0;
            self.emit_point(average);
        }
        self.prev_prev = self.prev;
        self.prev = current;
    }

    fn emit_point(&mut self, average: f64) {
        let point = if self.points_emitted < STARTUP_POINTS {
            0.0
        } else {
            scale_and_clip(average, self.cell_size)
        };
        self.points_emitted += 1;
        self.buffer.push(point);
    }

    fn forward(&mut self, reading: VitalReading) {
        self.latest.record(reading);
        if let Err(why) = self.events.send(PipelineEvent::Vital(reading)) {
            log::debug!("Vital observer gone: {:?}", why);
        }
    }

    fn report_electrode(&self, edge: ElectrodeEvent) {
        log::info!("Electrode contact: {:?}", edge);
        if let Err(why) = self.events.send(PipelineEvent::Electrode(edge)) {
            log::debug!("Electrode observer gone: {:?}", why);
        }
    }

    /// Check waveform liveness at `now`, reporting a disconnect edge
    pub fn poll_electrode(&mut self, now: Instant) -> Option<ElectrodeEvent> {
        let edge = self.electrode.poll(now)?;
        self.report_electrode(edge);
        Some(edge)
    }

    pub fn electrode_status(&self) -> ElectrodeStatus {
        self.electrode.status()
    }

    pub fn draw_buffer(&self) -> &DrawBuffer {
        &self.buffer
    }

    pub fn latest_vitals(&self) -> LatestVitals {
        self.latest
    }

    pub fn diagnose(&mut self) -> Diagnosis {
        self.processor.diagnose()
    }

    /// Clear latches, averaging memory, draw buffer and electrode tracking
    pub fn reset(&mut self) {
        self.device_hr_priority = false;
        self.device_hrv_priority = false;
        self.latest = LatestVitals::default();
        self.prev = 0.0;
        self.prev_prev = 0.0;
        self.samples_seen = 0;
        self.points_emitted = 0;
        self.buffer.clear();
        self.electrode.reset();
        self.processor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{PassthroughProcessor, ProcessedSample};
    use crossbeam_channel::{unbounded, Receiver};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Processor that emits queued algorithm events on the next sample
    #[derive(Default)]
    struct ScriptedProcessor {
        pending: VecDeque<AlgorithmEvent>,
    }

    impl SignalProcessor for ScriptedProcessor {
        fn process(&mut self, raw: i32) -> ProcessedSample {
            ProcessedSample {
                amplitude: raw as f64,
                events: self.pending.drain(..).collect(),
            }
        }

        fn diagnose(&mut self) -> Diagnosis {
            Diagnosis {
                diagnose_type: 0,
                is_afib: false,
                indices: Default::default(),
            }
        }

        fn reset(&mut self) {
            self.pending.clear();
        }
    }

    fn arbiter() -> (SignalIngestArbiter, Receiver<PipelineEvent>) {
        let (tx, rx) = unbounded();
        let arbiter =
            SignalIngestArbiter::new(Box::new(PassthroughProcessor::new(0)), tx, DEFAULT_CELL_SIZE);
        (arbiter, rx)
    }

    fn vitals(rx: &Receiver<PipelineEvent>) -> Vec<VitalReading> {
        rx.try_iter()
            .filter_map(|event| match event {
                PipelineEvent::Vital(reading) => Some(reading),
                _ => None,
            })
            .collect()
    }

    fn feed(arbiter: &mut SignalIngestArbiter, samples: Vec<i32>) {
        arbiter.ingest(&Notification::waveform(samples), Instant::now());
    }

    fn derived(arbiter: &mut SignalIngestArbiter, event: AlgorithmEvent) {
        let mut processor = ScriptedProcessor::default();
        processor.pending.push_back(event);
        arbiter.processor = Box::new(processor);
        feed(arbiter, vec![0]);
    }

    #[test]
    fn test_device_heart_rate_blocks_derived_until_reset() {
        let (tx, rx) = unbounded();
        let mut arbiter =
            SignalIngestArbiter::new(Box::new(ScriptedProcessor::default()), tx, DEFAULT_CELL_SIZE);

        derived(&mut arbiter, AlgorithmEvent::HeartRate(70));
        assert_eq!(vitals(&rx), vec![VitalReading::HeartRate(70)]);

        arbiter.ingest(
            &Notification::vitals(VitalsMessage {
                heart_rate: 72,
                ..Default::default()
            }),
            Instant::now(),
        );
        derived(&mut arbiter, AlgorithmEvent::HeartRate(90));
        assert_eq!(vitals(&rx), vec![VitalReading::HeartRate(72)]);
        assert_eq!(arbiter.latest_vitals().heart_rate, 72);

        arbiter.reset();
        derived(&mut arbiter, AlgorithmEvent::HeartRate(65));
        assert_eq!(vitals(&rx), vec![VitalReading::HeartRate(65)]);
    }

    #[test]
    fn test_device_hrv_blocks_derived_until_reset() {
        let (mut arbiter, rx) = arbiter();
        let ring = |heart_rate, hrv| {
            Notification::vitals(VitalsMessage {
                heart_rate,
                hrv,
                ..Default::default()
            })
        };

        arbiter.ingest(&ring(0, 48), Instant::now());
        derived(&mut arbiter, AlgorithmEvent::Hrv(35));
        assert_eq!(vitals(&rx), vec![VitalReading::Hrv(48)]);
        assert_eq!(arbiter.latest_vitals().hrv, 48);

        // the HRV latch leaves derived heart rate alone
        derived(&mut arbiter, AlgorithmEvent::HeartRate(68));
        assert_eq!(vitals(&rx), vec![VitalReading::HeartRate(68)]);

        arbiter.reset();
        derived(&mut arbiter, AlgorithmEvent::Hrv(35));
        assert_eq!(vitals(&rx), vec![VitalReading::Hrv(35)]);

        // and the heart rate latch leaves derived HRV alone
        arbiter.ingest(&ring(74, 0), Instant::now());
        derived(&mut arbiter, AlgorithmEvent::HeartRate(90));
        derived(&mut arbiter, AlgorithmEvent::Hrv(41));
        assert_eq!(
            vitals(&rx),
            vec![VitalReading::HeartRate(74), VitalReading::Hrv(41)]
        );
    }

    #[test]
    fn test_hrv_ceiling_neither_forwards_nor_latches() {
        let (mut arbiter, rx) = arbiter();

        arbiter.ingest(
            &Notification::vitals(VitalsMessage {
                hrv: 151,
                ..Default::default()
            }),
            Instant::now(),
        );
        derived(&mut arbiter, AlgorithmEvent::Hrv(40));
        assert_eq!(vitals(&rx), vec![VitalReading::Hrv(40)]);

        arbiter.ingest(
            &Notification::vitals(VitalsMessage {
                hrv: 150,
                ..Default::default()
            }),
            Instant::now(),
        );
        assert_eq!(vitals(&rx), vec![VitalReading::Hrv(150)]);
    }

    #[test]
    fn test_unarbitrated_vitals_forwarded_when_positive() {
        let (mut arbiter, rx) = arbiter();
        arbiter.ingest(
            &Notification::vitals(VitalsMessage {
                heart_rate: 0,
                systolic_bp: 121,
                diastolic_bp: 79,
                hrv: 0,
                blood_oxygen: 97,
                temperature: 36.4,
            }),
            Instant::now(),
        );

        assert_eq!(
            vitals(&rx),
            vec![
                VitalReading::BloodPressure {
                    systolic: 121,
                    diastolic: 79
                },
                VitalReading::BloodOxygen(97),
                VitalReading::Temperature(36.4),
            ]
        );
        assert_eq!(arbiter.latest_vitals().heart_rate, 0);
    }

    #[test]
    fn test_startup_points_are_flat() {
        let (mut arbiter, _rx) = arbiter();
        feed(&mut arbiter, vec![4000; STARTUP_POINTS * 3]);
        assert_eq!(arbiter.draw_buffer().len(), STARTUP_POINTS);
        assert!(arbiter.draw_buffer().points().iter().all(|&p| p == 0.0));

        feed(&mut arbiter, vec![4000; 3]);
        assert_eq!(arbiter.draw_buffer().get(STARTUP_POINTS), Some(DEFAULT_CELL_SIZE));
    }

    #[test]
    fn test_point_101_averages_its_group() {
        let (mut arbiter, _rx) = arbiter();
        feed(&mut arbiter, vec![0; 300]);
        // split across notifications; groups count across bursts
        feed(&mut arbiter, vec![1000]);
        feed(&mut arbiter, vec![2000, 6000]);

        let expected = scale_and_clip((1000.0 + 2000.0 + 6000.0) / 3.0, DEFAULT_CELL_SIZE);
        assert_eq!(arbiter.draw_buffer().len(), 101);
        assert_eq!(arbiter.draw_buffer().get(100), Some(expected));
        assert!((expected - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_points_are_clipped() {
        assert_eq!(scale_and_clip(1_000_000.0, 10.0), 200.0);
        assert_eq!(scale_and_clip(-1_000_000.0, 10.0), -200.0);
        assert_eq!(scale_and_clip(-4000.0, 10.0), -10.0);
    }

    #[test]
    fn test_electrode_edges_reported() {
        let (mut arbiter, rx) = arbiter();
        let t0 = Instant::now();
        arbiter.ingest(&Notification::waveform(vec![1, 2]), t0);
        assert_eq!(arbiter.poll_electrode(t0 + Duration::from_millis(200)), None);
        assert_eq!(
            arbiter.poll_electrode(t0 + Duration::from_millis(600)),
            Some(ElectrodeEvent::Disconnected)
        );

        let edges: Vec<ElectrodeEvent> = rx
            .try_iter()
            .filter_map(|event| match event {
                PipelineEvent::Electrode(edge) => Some(edge),
                _ => None,
            })
            .collect();
        assert_eq!(edges, vec![ElectrodeEvent::Connected, ElectrodeEvent::Disconnected]);
    }

    #[test]
    fn test_reset_clears_buffer_and_averaging() {
        let (mut arbiter, _rx) = arbiter();
        feed(&mut arbiter, vec![1; 200]);
        arbiter.reset();

        assert!(arbiter.draw_buffer().is_empty());
        assert!(!arbiter.electrode_status().is_connected);
        feed(&mut arbiter, vec![1, 1]);
        assert!(arbiter.draw_buffer().is_empty());
    }
}
