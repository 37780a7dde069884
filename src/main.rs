use async_trait::async_trait;
use chrono::NaiveDate;
use ring_vitals::config::Config;
use ring_vitals::device::SimulatedRing;
use ring_vitals::error::SyncError;
use ring_vitals::models::{EcgRecord, HeartRateRecord, VitalKind};
use ring_vitals::pipeline::{MeasurementController, PipelineEvent};
use ring_vitals::processing::PassthroughProcessor;
use ring_vitals::store::{BatchReport, Store};
use ring_vitals::sync::{
    DayVitals, EcgHistoryPage, RemoteCollaborator, SyncQueue, VitalUpload, VitalUploader,
};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

// Two seconds of signal at 250 Hz
const MIN_DIAGNOSABLE_SAMPLES: usize = 500;

/// Backend stand-in that logs what would be sent
struct LoggingRemote;

#[async_trait]
impl RemoteCollaborator for LoggingRemote {
    async fn upload_vitals(&self, upload: &VitalUpload) -> Result<(), SyncError> {
        let body = serde_json::to_string(upload).map_err(|e| SyncError::Upload(e.to_string()))?;
        log::info!("POST vitals/{:?}: {} bytes", upload.kind, body.len());
        Ok(())
    }

    async fn upload_ecg(&self, records: &[EcgRecord]) -> Result<(), SyncError> {
        let body = serde_json::to_string(records).map_err(|e| SyncError::Upload(e.to_string()))?;
        log::info!("POST ecg: {} records, {} bytes", records.len(), body.len());
        Ok(())
    }

    async fn fetch_ecg_history(&self, page: u32) -> Result<EcgHistoryPage, SyncError> {
        Ok(EcgHistoryPage {
            page,
            records: Vec::new(),
            has_more: false,
        })
    }

    async fn fetch_vital_history(
        &self,
        _user_id: &str,
        _kind: VitalKind,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<DayVitals>, SyncError> {
        Ok(Vec::new())
    }
}

fn main() {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_filter))
        .init();

    if let Some(e) = config_error {
        log::warn!("Using default configuration: {}", e);
    }

    let rt = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(config)) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(config.database_path())?;
    let remote: Arc<dyn RemoteCollaborator> = Arc::new(LoggingRemote);

    let ring = Arc::new(SimulatedRing::new());
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let controller = MeasurementController::new(
        ring.clone(),
        Box::new(PassthroughProcessor::new(MIN_DIAGNOSABLE_SAMPLES)),
        event_tx,
        config.cell_size,
        config.measurement_duration_secs,
    );
    ring.attach(Arc::new(controller.ingest_handle()));

    // Observer thread standing in for the display
    let (result_tx, result_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut drawn = 0usize;
        for event in event_rx {
            match event {
                PipelineEvent::Waveform(_) => drawn += 1,
                PipelineEvent::Progress(progress) if progress.elapsed_secs % 10 == 0 => {
                    log::info!(
                        "{}s elapsed ({:.0}%), {} points drawn",
                        progress.elapsed_secs,
                        progress.fraction * 100.0,
                        drawn
                    );
                }
                PipelineEvent::Vital(reading) => log::debug!("Vital: {:?}", reading),
                PipelineEvent::Result(record) => {
                    let _ = result_tx.send(record);
                    return;
                }
                _ => {}
            }
        }
    });

    controller.start().await?;

    let record = tokio::select! {
        record = result_rx => record?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping measurement");
            controller.stop().await?;
            controller.compute_result()
        }
    };
    controller.teardown();

    log::info!(
        "Result {}: diagnose type {}, heart rate {}, {} waveform points",
        record.timestamp,
        record.diagnose_type,
        record.heart_rate,
        record.waveform.len()
    );

    let heart_rate: Vec<HeartRateRecord> = if record.heart_rate > 0 {
        vec![HeartRateRecord {
            timestamp: chrono::Utc::now().timestamp(),
            bpm: record.heart_rate,
            batch_id: 0,
        }]
    } else {
        Vec::new()
    };
    let report = BatchReport::from(
        store
            .repository::<HeartRateRecord>()
            .save_batch(heart_rate.clone())
            .await,
    );
    log::info!("Heart rate saved: {:?}", report);

    let ecg = store.repository::<EcgRecord>();
    match ecg.save(record).await {
        Ok(inserted) => log::info!("ECG record saved (new: {})", inserted),
        Err(e) => log::warn!("ECG record not saved: {}", e),
    }

    let uploader = VitalUploader::new(remote.clone(), config.user_id.clone());
    if let Err(e) = uploader.upload(&heart_rate).await {
        log::warn!("Heart rate upload failed: {}", e);
    }

    let queue = SyncQueue::new(ecg, remote);
    let uploaded = queue.drain().await;
    log::info!("Uploaded {} ECG records, {} pending", uploaded, queue.pending().await?);

    store.close();
    Ok(())
}
