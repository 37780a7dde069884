//! # Device Port
//!
//! Narrow boundary to the ring. The vendor SDK adapter implements
//! `DevicePort` for the start/stop commands and pushes every notification it
//! receives into a `NotificationSink`. Nothing past this module sees vendor
//! types.
//!
//! `SimulatedRing` is an adapter that synthesizes an ECG stream, used by the
//! binary when no hardware is attached.

use crate::error::DeviceError;
use crate::scheduler::CancelToken;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Vitals sub-message; a value of zero means "not measured"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VitalsMessage {
    pub heart_rate: u32,
    pub systolic_bp: u32,
    pub diastolic_bp: u32,
    pub hrv: u32,
    pub blood_oxygen: u32,
    pub temperature: f64,
}

/// One notification from the ring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub vitals: Option<VitalsMessage>,
    /// Raw samples in arrival order
    pub waveform: Option<Vec<i32>>,
}

impl Notification {
    pub fn vitals(vitals: VitalsMessage) -> Self {
        Self {
            vitals: Some(vitals),
            waveform: None,
        }
    }

    pub fn waveform(samples: Vec<i32>) -> Self {
        Self {
            vitals: None,
            waveform: Some(samples),
        }
    }
}

#[async_trait]
pub trait DevicePort: Send + Sync {
    async fn start_measurement(&self) -> Result<(), DeviceError>;
    async fn stop_measurement(&self) -> Result<(), DeviceError>;
}

/// Receiver of device notifications
pub trait NotificationSink: Send + Sync {
    fn on_notification(&self, payload: Notification);
}

// Burst shape of the simulated transport
const BURST_INTERVAL: Duration = Duration::from_millis(48);
const SAMPLES_PER_BURST: u64 = 12;
const BEAT_PERIOD_SAMPLES: u64 = 200;
// Ring reports its own heart rate only after it settles
const DEVICE_HR_DELAY_BURSTS: u64 = 100;

/// Synthetic ring streaming a 75 bpm ECG at 250 Hz in 48 ms bursts
pub struct SimulatedRing {
    sink: Mutex<Option<Arc<dyn NotificationSink>>>,
    running: Mutex<Option<CancelToken>>,
    connected: AtomicBool,
}

impl Default for SimulatedRing {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRing {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            running: Mutex::new(None),
            connected: AtomicBool::new(true),
        }
    }

    /// Route notifications to `sink`
    pub fn attach(&self, sink: Arc<dyn NotificationSink>) {
        if let Ok(mut guard) = self.sink.lock() {
            *guard = Some(sink);
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    fn stop_stream(&self) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(token) = running.take() {
                token.cancel();
            }
        }
    }
}

/// One synthetic ECG sample: baseline wander, P, QRS and T waves
pub fn synthetic_sample(n: u64) -> i32 {
    let phase = (n % BEAT_PERIOD_SAMPLES) as f64 / BEAT_PERIOD_SAMPLES as f64;
    let bump = |center: f64, width: f64, height: f64| {
        height * (-((phase - center) / width).powi(2)).exp()
    };

    let wander = 150.0 * (n as f64 / 250.0 * std::f64::consts::TAU * 0.2).sin();
    let p_wave = bump(0.15, 0.025, 250.0);
    let qrs = bump(0.30, 0.008, 4000.0) - bump(0.32, 0.01, 600.0);
    let t_wave = bump(0.60, 0.05, 700.0);

    (wander + p_wave + qrs + t_wave).round() as i32
}

#[async_trait]
impl DevicePort for SimulatedRing {
    async fn start_measurement(&self) -> Result<(), DeviceError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(DeviceError::NotConnected);
        }

        let sink = self
            .sink
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| DeviceError::CommandFailed {
                command: "start",
                reason: "no notification sink attached".to_string(),
            })?;

        self.stop_stream();
        let token = CancelToken::new();
        if let Ok(mut running) = self.running.lock() {
            *running = Some(token.clone());
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BURST_INTERVAL);
            let mut sample_index = 0u64;
            let mut burst = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let samples = (0..SAMPLES_PER_BURST)
                            .map(|i| synthetic_sample(sample_index + i))
                            .collect();
                        sample_index += SAMPLES_PER_BURST;
                        sink.on_notification(Notification::waveform(samples));

                        // roughly once per second
                        if burst % 21 == 0 {
                            sink.on_notification(Notification::vitals(VitalsMessage {
                                heart_rate: if burst >= DEVICE_HR_DELAY_BURSTS { 75 } else { 0 },
                                systolic_bp: 118,
                                diastolic_bp: 77,
                                hrv: 48,
                                blood_oxygen: 98,
                                temperature: 36.5,
                            }));
                        }
                        burst += 1;
                    }
                }
            }
            log::debug!("Simulated ring stream stopped after {} bursts", burst);
        });

        log::info!("Simulated ring: measurement started");
        Ok(())
    }

    async fn stop_measurement(&self) -> Result<(), DeviceError> {
        self.stop_stream();
        log::info!("Simulated ring: measurement stopped");
        Ok(())
    }
}
