//! # Measurement Pipeline
//!
//! `MeasurementController` wires the device port, the arbiter, the draw
//! scheduler and the session state machine together. Observers receive every
//! output as a `PipelineEvent` on one channel.
//!
//! Three repeating jobs run while measuring: the draw tick, the electrode
//! poll and the one-second countdown. All of them check the session
//! generation under the state lock before doing anything, so after a reset,
//! stop or completion no job touches the new session.

use crate::arbiter::{LatestVitals, SignalIngestArbiter, VitalReading};
use crate::device::{DevicePort, Notification, NotificationSink};
use crate::draw::{DrawScheduler, TICK_INTERVAL};
use crate::electrode::{ElectrodeEvent, POLL_INTERVAL};
use crate::error::SessionError;
use crate::models::EcgRecord;
use crate::processing::SignalProcessor;
use crate::scheduler::Scheduler;
use crate::session::{MeasurementSession, Phase, Progress};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Vital(VitalReading),
    Electrode(ElectrodeEvent),
    /// One display point, in draw order
    Waveform(f64),
    Progress(Progress),
    Phase(Phase),
    /// Result of a measurement that ran its full duration
    Result(EcgRecord),
}

struct ControllerState {
    generation: u64,
    arbiter: SignalIngestArbiter,
    draw: DrawScheduler,
    session: MeasurementSession,
    started_at: DateTime<Utc>,
}

impl ControllerState {
    fn build_result(&mut self) -> EcgRecord {
        let diagnosis = self.arbiter.diagnose();
        let LatestVitals {
            heart_rate,
            hrv,
            systolic_bp,
            diastolic_bp,
            blood_oxygen,
            temperature,
        } = self.arbiter.latest_vitals();

        EcgRecord {
            timestamp: EcgRecord::timestamp_for(self.started_at),
            heart_rate,
            systolic_bp,
            diastolic_bp,
            hrv,
            waveform: self.arbiter.draw_buffer().points().to_vec(),
            diagnose_type: diagnosis.diagnose_type,
            is_afib: diagnosis.is_afib,
            indices: diagnosis.indices,
            blood_oxygen,
            temperature,
            is_synced: false,
        }
    }
}

type SharedState = Arc<Mutex<ControllerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit(events: &Sender<PipelineEvent>, event: PipelineEvent) {
    if let Err(why) = events.send(event) {
        log::debug!("Pipeline observer gone: {:?}", why);
    }
}

/// Notification sink handed to the device adapter
#[derive(Clone)]
pub struct IngestHandle {
    state: SharedState,
}

impl NotificationSink for IngestHandle {
    fn on_notification(&self, payload: Notification) {
        let mut state = lock(&self.state);
        // late notifications after a stop are dropped
        if state.session.is_measuring() {
            state.arbiter.ingest(&payload, Instant::now());
        }
    }
}

pub struct MeasurementController {
    device: Arc<dyn DevicePort>,
    state: SharedState,
    scheduler: Mutex<Scheduler>,
    events: Sender<PipelineEvent>,
}

impl MeasurementController {
    pub fn new(
        device: Arc<dyn DevicePort>,
        processor: Box<dyn SignalProcessor>,
        events: Sender<PipelineEvent>,
        cell_size: f64,
        duration_secs: u32,
    ) -> Self {
        let state = ControllerState {
            generation: 0,
            arbiter: SignalIngestArbiter::new(processor, events.clone(), cell_size),
            draw: DrawScheduler::new(),
            session: MeasurementSession::new(duration_secs),
            started_at: Utc::now(),
        };

        Self {
            device,
            state: Arc::new(Mutex::new(state)),
            scheduler: Mutex::new(Scheduler::new()),
            events,
        }
    }

    /// Sink to register with the device adapter
    pub fn ingest_handle(&self) -> IngestHandle {
        IngestHandle {
            state: self.state.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).session.phase()
    }

    pub fn elapsed_secs(&self) -> u32 {
        lock(&self.state).session.elapsed_secs()
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset all per-session state, command the ring to start and run the
    /// draw, electrode and countdown jobs
    ///
    /// A failed start command leaves the session `Aborted` with no jobs
    /// running.
    pub async fn start(&self) -> Result<(), SessionError> {
        let generation = {
            let mut state = lock(&self.state);
            state.session.begin()?;
            self.scheduler().cancel_all();

            state.generation += 1;
            state.arbiter.reset();
            state.draw.reset();
            state.started_at = Utc::now();
            state.generation
        };
        emit(&self.events, PipelineEvent::Phase(Phase::Measuring));

        if let Err(e) = self.device.start_measurement().await {
            log::error!("Failed to start measurement: {}", e);
            let mut state = lock(&self.state);
            if state.generation == generation {
                state.session.abort();
                emit(&self.events, PipelineEvent::Phase(state.session.phase()));
            }
            return Err(e.into());
        }

        let state = lock(&self.state);
        // stopped or restarted while the start command was in flight
        if state.generation != generation || !state.session.is_measuring() {
            return Ok(());
        }
        let mut scheduler = self.scheduler();
        self.spawn_draw_job(&mut scheduler, generation);
        self.spawn_electrode_job(&mut scheduler, generation);
        self.spawn_countdown_job(&mut scheduler, generation);
        Ok(())
    }

    fn spawn_draw_job(&self, scheduler: &mut Scheduler, generation: u64) {
        let state = self.state.clone();
        let events = self.events.clone();
        scheduler.every("draw", TICK_INTERVAL, move || {
            let mut guard = lock(&state);
            if guard.generation != generation {
                return ControlFlow::Break(());
            }
            let ControllerState { arbiter, draw, .. } = &mut *guard;
            if let Some(point) = draw.tick(arbiter.draw_buffer()) {
                emit(&events, PipelineEvent::Waveform(point));
            }
            ControlFlow::Continue(())
        });
    }

    fn spawn_electrode_job(&self, scheduler: &mut Scheduler, generation: u64) {
        let state = self.state.clone();
        scheduler.every("electrode", POLL_INTERVAL, move || {
            let mut guard = lock(&state);
            if guard.generation != generation {
                return ControlFlow::Break(());
            }
            guard.arbiter.poll_electrode(Instant::now());
            ControlFlow::Continue(())
        });
    }

    fn spawn_countdown_job(&self, scheduler: &mut Scheduler, generation: u64) {
        let state = self.state.clone();
        let events = self.events.clone();
        let device = self.device.clone();
        scheduler.every("countdown", COUNTDOWN_INTERVAL, move || {
            let mut guard = lock(&state);
            if guard.generation != generation {
                return ControlFlow::Break(());
            }
            let Some(progress) = guard.session.tick() else {
                return ControlFlow::Break(());
            };
            emit(&events, PipelineEvent::Progress(progress));
            if !progress.completed {
                return ControlFlow::Continue(());
            }

            // retire the draw and electrode jobs of this session
            guard.generation += 1;
            emit(&events, PipelineEvent::Phase(Phase::Completed));
            let record = guard.build_result();
            emit(&events, PipelineEvent::Result(record));
            drop(guard);

            let device = device.clone();
            tokio::spawn(async move {
                if let Err(e) = device.stop_measurement().await {
                    log::error!("Failed to stop measurement: {}", e);
                }
            });
            ControlFlow::Break(())
        });
    }

    /// Stop early at the user's request
    ///
    /// The session becomes `Completed` without a result; call
    /// `compute_result` if one is wanted. A failed stop command is returned
    /// but does not change the phase.
    pub async fn stop(&self) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.state);
            if !state.session.finish() {
                return Ok(());
            }
            state.generation += 1;
            self.scheduler().cancel_all();
        }
        emit(&self.events, PipelineEvent::Phase(Phase::Completed));

        self.device.stop_measurement().await.map_err(|e| {
            log::error!("Failed to stop measurement: {}", e);
            SessionError::from(e)
        })
    }

    /// Build a result from everything ingested so far
    pub fn compute_result(&self) -> EcgRecord {
        lock(&self.state).build_result()
    }

    /// Cancel every job; a running session is aborted
    pub fn teardown(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        self.scheduler().cancel_all();
        if state.session.is_measuring() {
            state.session.abort();
            emit(&self.events, PipelineEvent::Phase(Phase::Aborted));
        }
    }
}

impl Drop for MeasurementController {
    fn drop(&mut self) {
        self.scheduler().cancel_all();
    }
}
