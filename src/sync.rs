//! # Backend Synchronization
//!
//! `SyncQueue` uploads persisted ECG records one at a time, oldest first,
//! with at-least-once delivery: a record is flagged synced only after the
//! backend acknowledged it, so a failed upload is retried by the next call.
//!
//! `VitalUploader` sends per-kind vital batches in the `{type, value,
//! timestamp}` shape. The transport behind `RemoteCollaborator` is not part
//! of this crate.

use crate::error::SyncError;
use crate::models::{EcgRecord, VitalKind, VitalSample};
use crate::store::{TimeSeriesRepository, VitalRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Body of the vital batch upload endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalUpload {
    pub user_id: String,
    pub kind: VitalKind,
    pub samples: Vec<VitalSample>,
}

/// One page of the remote ECG history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcgHistoryPage {
    pub page: u32,
    pub records: Vec<EcgRecord>,
    pub has_more: bool,
}

/// Remote vitals of one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayVitals {
    pub date: NaiveDate,
    pub samples: Vec<VitalSample>,
}

#[async_trait]
pub trait RemoteCollaborator: Send + Sync {
    async fn upload_vitals(&self, upload: &VitalUpload) -> Result<(), SyncError>;

    /// Upload full ECG records; the endpoint always takes an array
    async fn upload_ecg(&self, records: &[EcgRecord]) -> Result<(), SyncError>;

    /// Pages start at 1
    async fn fetch_ecg_history(&self, page: u32) -> Result<EcgHistoryPage, SyncError>;

    async fn fetch_vital_history(
        &self,
        user_id: &str,
        kind: VitalKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayVitals>, SyncError>;
}

pub struct SyncQueue {
    ecg: TimeSeriesRepository<EcgRecord>,
    remote: Arc<dyn RemoteCollaborator>,
    in_flight: Mutex<()>,
}

impl SyncQueue {
    pub fn new(ecg: TimeSeriesRepository<EcgRecord>, remote: Arc<dyn RemoteCollaborator>) -> Self {
        Self {
            ecg,
            remote,
            in_flight: Mutex::new(()),
        }
    }

    /// Upload the oldest unsynced ECG record
    ///
    /// Returns true when a record was uploaded and acknowledged. Returns
    /// false when the queue is empty, the upload or acknowledgment failed, or
    /// another upload is still running.
    pub async fn sync_next(&self) -> bool {
        let Ok(_guard) = self.in_flight.try_lock() else {
            log::debug!("ECG upload already in flight");
            return false;
        };

        let record = match self.ecg.get_unsynced().await {
            Ok(records) => match records.into_iter().next() {
                Some(record) => record,
                None => return false,
            },
            Err(e) => {
                log::warn!("Could not read unsynced ECG records: {}", e);
                return false;
            }
        };

        if let Err(e) = self.remote.upload_ecg(std::slice::from_ref(&record)).await {
            log::warn!("ECG upload of {} failed: {}", record.timestamp, e);
            return false;
        }

        match self.ecg.mark_synced(&record.timestamp).await {
            Ok(true) => {
                log::info!("ECG record {} synced", record.timestamp);
                true
            }
            Ok(false) => {
                log::warn!("ECG record {} vanished before acknowledgment", record.timestamp);
                false
            }
            Err(e) => {
                log::warn!("Could not mark ECG record {} synced: {}", record.timestamp, e);
                false
            }
        }
    }

    /// Upload until the queue is empty or an upload fails; returns the count uploaded
    pub async fn drain(&self) -> usize {
        let mut uploaded = 0;
        while self.sync_next().await {
            uploaded += 1;
        }
        uploaded
    }

    /// Number of records waiting for upload
    pub async fn pending(&self) -> Result<usize, SyncError> {
        Ok(self.ecg.get_unsynced().await?.len())
    }

    /// Page through the remote ECG history and store it locally as synced
    ///
    /// Records already stored are skipped; returns how many were inserted.
    pub async fn restore_history(&self) -> Result<usize, SyncError> {
        let mut page = 1;
        let mut inserted = 0;

        loop {
            let batch = self.remote.fetch_ecg_history(page).await?;
            let fetched = batch.records.len();

            let records: Vec<EcgRecord> = batch
                .records
                .into_iter()
                .filter(|record| {
                    let valid = record.has_valid_diagnosis();
                    if !valid {
                        log::warn!(
                            "Skipping remote ECG {} with diagnose type {}",
                            record.timestamp,
                            record.diagnose_type
                        );
                    }
                    valid
                })
                .map(|record| EcgRecord {
                    is_synced: true,
                    ..record
                })
                .collect();
            inserted += self.ecg.save_batch(records).await?;

            if !batch.has_more || fetched == 0 {
                break;
            }
            page += 1;
        }

        log::info!("Restored {} ECG records from {} pages", inserted, page);
        Ok(inserted)
    }
}

/// Batch uploader for per-kind vital records
pub struct VitalUploader {
    remote: Arc<dyn RemoteCollaborator>,
    user_id: String,
}

impl VitalUploader {
    pub fn new(remote: Arc<dyn RemoteCollaborator>, user_id: impl Into<String>) -> Self {
        Self {
            remote,
            user_id: user_id.into(),
        }
    }

    /// Build the upload body for one batch of records
    pub fn payload<R: VitalRecord>(&self, records: &[R]) -> VitalUpload {
        VitalUpload {
            user_id: self.user_id.clone(),
            kind: R::KIND,
            samples: records.iter().flat_map(|record| record.samples()).collect(),
        }
    }

    /// Upload one batch; returns the number of samples sent
    pub async fn upload<R: VitalRecord>(&self, records: &[R]) -> Result<usize, SyncError> {
        let upload = self.payload(records);
        if upload.samples.is_empty() {
            return Ok(0);
        }

        let count = upload.samples.len();
        self.remote.upload_vitals(&upload).await?;
        log::info!("Uploaded {} {:?} samples", count, upload.kind);
        Ok(count)
    }

    pub async fn fetch_history(
        &self,
        kind: VitalKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayVitals>, SyncError> {
        self.remote
            .fetch_vital_history(&self.user_id, kind, start, end)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodPressureRecord, DerivedIndices, VitalType};
    use crate::store::Store;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockRemote {
        ecg_uploads: StdMutex<Vec<Vec<String>>>,
        vital_uploads: StdMutex<Vec<VitalUpload>>,
        fail_next: StdMutex<usize>,
        upload_delay: Option<Duration>,
        history: StdMutex<VecDeque<EcgHistoryPage>>,
        vital_days: Vec<DayVitals>,
        history_queries: StdMutex<Vec<(String, VitalKind)>>,
    }

    #[async_trait]
    impl RemoteCollaborator for MockRemote {
        async fn upload_vitals(&self, upload: &VitalUpload) -> Result<(), SyncError> {
            self.vital_uploads.lock().unwrap().push(upload.clone());
            Ok(())
        }

        async fn upload_ecg(&self, records: &[EcgRecord]) -> Result<(), SyncError> {
            if let Some(delay) = self.upload_delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut fail = self.fail_next.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(SyncError::Upload("503 service unavailable".to_string()));
                }
            }
            self.ecg_uploads
                .lock()
                .unwrap()
                .push(records.iter().map(|r| r.timestamp.clone()).collect());
            Ok(())
        }

        async fn fetch_ecg_history(&self, page: u32) -> Result<EcgHistoryPage, SyncError> {
            self.history
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SyncError::Fetch(format!("no page {}", page)))
        }

        async fn fetch_vital_history(
            &self,
            user_id: &str,
            kind: VitalKind,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DayVitals>, SyncError> {
            self.history_queries
                .lock()
                .unwrap()
                .push((user_id.to_string(), kind));
            Ok(self
                .vital_days
                .iter()
                .filter(|day| day.date >= start && day.date <= end)
                .cloned()
                .collect())
        }
    }

    fn ecg(timestamp: &str) -> EcgRecord {
        EcgRecord {
            timestamp: timestamp.to_string(),
            heart_rate: 70,
            systolic_bp: 120,
            diastolic_bp: 80,
            hrv: 42,
            waveform: vec![0.0, 2.5],
            diagnose_type: 1,
            is_afib: false,
            indices: DerivedIndices::default(),
            blood_oxygen: 98,
            temperature: 36.7,
            is_synced: false,
        }
    }

    async fn queue_with(
        remote: Arc<MockRemote>,
        records: Vec<EcgRecord>,
    ) -> (SyncQueue, TimeSeriesRepository<EcgRecord>) {
        let store = Store::open_in_memory().unwrap();
        let repo = store.repository::<EcgRecord>();
        repo.save_batch(records).await.unwrap();
        (SyncQueue::new(repo.clone(), remote), repo)
    }

    #[tokio::test]
    async fn test_sync_next_uploads_oldest_only() {
        let remote = Arc::new(MockRemote::default());
        let (queue, repo) = queue_with(
            remote.clone(),
            vec![ecg("2024-03-10 09:00:00"), ecg("2024-03-10 08:00:00")],
        )
        .await;

        assert!(queue.sync_next().await);
        assert_eq!(
            *remote.ecg_uploads.lock().unwrap(),
            vec![vec!["2024-03-10 08:00:00".to_string()]]
        );
        let first = repo.find("2024-03-10 08:00:00".to_string()).await.unwrap().unwrap();
        assert!(first.is_synced);

        assert!(queue.sync_next().await);
        assert_eq!(remote.ecg_uploads.lock().unwrap()[1], vec!["2024-03-10 09:00:00".to_string()]);
        assert!(!queue.sync_next().await);
    }

    #[tokio::test]
    async fn test_failed_upload_is_retried() {
        let remote = Arc::new(MockRemote {
            fail_next: StdMutex::new(1),
            ..Default::default()
        });
        let (queue, repo) = queue_with(remote.clone(), vec![ecg("2024-03-10 08:00:00")]).await;

        assert!(!queue.sync_next().await);
        assert_eq!(queue.pending().await.unwrap(), 1);
        assert!(!repo.get_all().await.unwrap()[0].is_synced);

        assert!(queue.sync_next().await);
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_call_does_not_double_upload() {
        let remote = Arc::new(MockRemote {
            upload_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let (queue, _repo) = queue_with(remote.clone(), vec![ecg("2024-03-10 08:00:00")]).await;

        let (first, second) = tokio::join!(queue.sync_next(), queue.sync_next());
        assert!(first);
        assert!(!second);
        assert_eq!(remote.ecg_uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_stops_at_failure() {
        let remote = Arc::new(MockRemote::default());
        let (queue, _repo) = queue_with(
            remote.clone(),
            vec![
                ecg("2024-03-10 08:00:00"),
                ecg("2024-03-10 09:00:00"),
                ecg("2024-03-10 10:00:00"),
            ],
        )
        .await;

        assert_eq!(queue.drain().await, 3);
        assert_eq!(queue.drain().await, 0);
    }

    #[tokio::test]
    async fn test_restore_history_marks_synced_and_skips_failed() {
        let mut failed = ecg("2024-03-09 07:00:00");
        failed.diagnose_type = 0;
        let remote = Arc::new(MockRemote {
            history: StdMutex::new(VecDeque::from(vec![
                EcgHistoryPage {
                    page: 1,
                    records: vec![ecg("2024-03-09 08:00:00"), failed],
                    has_more: true,
                },
                EcgHistoryPage {
                    page: 2,
                    records: vec![ecg("2024-03-10 08:00:00")],
                    has_more: false,
                },
            ])),
            ..Default::default()
        });
        let (queue, repo) = queue_with(remote, vec![ecg("2024-03-10 08:00:00")]).await;

        assert_eq!(queue.restore_history().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 2);
        // the local copy keeps its unsynced flag
        assert_eq!(queue.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vital_upload_shape() {
        let remote = Arc::new(MockRemote::default());
        let uploader = VitalUploader::new(remote.clone(), "u1");
        let records = vec![BloodPressureRecord {
            timestamp: 1_710_000_000,
            systolic: 118,
            diastolic: 76,
            batch_id: 3,
        }];

        assert_eq!(uploader.upload(&records).await.unwrap(), 2);
        let upload = remote.vital_uploads.lock().unwrap()[0].clone();
        assert_eq!(upload.kind, VitalKind::BloodPressure);

        let json = serde_json::to_value(&upload).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["kind"], "blood_pressure");
        assert_eq!(json["samples"][0]["type"], "systolic");
        assert_eq!(json["samples"][0]["value"], 118.0);
        assert_eq!(json["samples"][0]["timestamp"], 1_710_000_000);
        assert!(json["samples"][0].get("batchId").is_none());

        let empty: Vec<BloodPressureRecord> = Vec::new();
        assert_eq!(uploader.upload(&empty).await.unwrap(), 0);
        assert_eq!(remote.vital_uploads.lock().unwrap().len(), 1);
        assert_eq!(upload.samples[1].vital_type, VitalType::Diastolic);
    }

    #[tokio::test]
    async fn test_fetch_history_queries_as_user() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        let heart_rate = |timestamp, value| VitalSample {
            vital_type: VitalType::HeartRate,
            value,
            timestamp,
            batch_id: 0,
        };
        let remote = Arc::new(MockRemote {
            vital_days: vec![
                DayVitals {
                    date: day(1),
                    samples: vec![heart_rate(1_709_280_000, 64.0)],
                },
                DayVitals {
                    date: day(2),
                    samples: vec![heart_rate(1_709_366_400, 66.0), heart_rate(1_709_370_000, 71.0)],
                },
                DayVitals {
                    date: day(9),
                    samples: vec![heart_rate(1_709_971_200, 60.0)],
                },
            ],
            ..Default::default()
        });
        let uploader = VitalUploader::new(remote.clone(), "u1");

        let days = uploader
            .fetch_history(VitalKind::HeartRate, day(1), day(7))
            .await
            .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[1].samples[1].value, 71.0);
        assert_eq!(
            remote.history_queries.lock().unwrap().as_slice(),
            &[("u1".to_string(), VitalKind::HeartRate)]
        );
    }
}
