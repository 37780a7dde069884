//! # Health Record Types
//!
//! Records produced by the ring and persisted by the store. All instants are
//! epoch seconds unless a field says otherwise; ECG records are keyed by a
//! formatted UTC timestamp string because that is what the backend uses
//! as their identity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Format of the ECG record key. Lexicographic order equals time order.
pub const ECG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Diagnose type reported for a failed measurement
pub const FAILED_DIAGNOSE: u8 = 0;

/// Highest diagnose type the classifier produces
pub const MAX_DIAGNOSE: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalType {
    HeartRate,
    Hrv,
    BloodOxygen,
    Temperature,
    Systolic,
    Diastolic,
    Glucose,
}

/// Store a vital reading belongs to; also the key of the batch upload endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalKind {
    HeartRate,
    BloodPressure,
    BloodGlucose,
}

/// One reading in the shape the backend accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSample {
    #[serde(rename = "type")]
    pub vital_type: VitalType,
    pub value: f64,
    pub timestamp: i64,
    #[serde(skip)]
    pub batch_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateRecord {
    pub timestamp: i64,
    pub bpm: u32,
    pub batch_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BloodPressureRecord {
    pub timestamp: i64,
    pub systolic: u32,
    pub diastolic: u32,
    pub batch_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BloodGlucoseRecord {
    pub timestamp: i64,
    /// mmol/L
    pub glucose: f64,
    pub batch_id: i64,
}

/// Indices the ECG classifier derives alongside the diagnosis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedIndices {
    pub stress: f64,
    pub fatigue: f64,
    pub body_load: f64,
    pub heart_strength: f64,
}

/// Summary of one finished ECG measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcgRecord {
    pub timestamp: String,
    pub heart_rate: u32,
    #[serde(rename = "systolicBP")]
    pub systolic_bp: u32,
    #[serde(rename = "diastolicBP")]
    pub diastolic_bp: u32,
    pub hrv: u32,
    pub waveform: Vec<f64>,
    pub diagnose_type: u8,
    pub is_afib: bool,
    pub indices: DerivedIndices,
    pub blood_oxygen: u32,
    pub temperature: f64,
    pub is_synced: bool,
}

impl EcgRecord {
    /// Render an instant as an ECG record key
    pub fn timestamp_for(at: DateTime<Utc>) -> String {
        at.format(ECG_TIMESTAMP_FORMAT).to_string()
    }

    pub fn is_failed(&self) -> bool {
        self.diagnose_type == FAILED_DIAGNOSE
    }

    pub fn has_valid_diagnosis(&self) -> bool {
        self.diagnose_type != FAILED_DIAGNOSE && self.diagnose_type <= MAX_DIAGNOSE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Deep,
    Light,
    Rem,
    Awake,
}

impl SleepStage {
    /// Stage codes used by the ring's sleep sync
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SleepStage::Deep),
            2 => Some(SleepStage::Light),
            3 => Some(SleepStage::Rem),
            4 => Some(SleepStage::Awake),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            SleepStage::Deep => 1,
            SleepStage::Light => 2,
            SleepStage::Rem => 3,
            SleepStage::Awake => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepDetail {
    pub start_time: i64,
    pub end_time: i64,
    pub stage: SleepStage,
}

impl SleepDetail {
    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).max(0)
    }
}

/// Minutes spent in each stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTotals {
    pub deep: i64,
    pub light: i64,
    pub rem: i64,
    pub awake: i64,
}

/// One night as delivered by a ring sync batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
    pub statistic_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub totals: StageTotals,
    pub details: Vec<SleepDetail>,
}

impl SleepSession {
    /// Stage totals computed from the detail segments, falling back to the
    /// ring-reported totals when the session carries no segments
    pub fn stage_totals(&self) -> StageTotals {
        if self.details.is_empty() {
            return self.totals;
        }

        let mut seconds = [0i64; 4];
        for detail in &self.details {
            let slot = match detail.stage {
                SleepStage::Deep => 0,
                SleepStage::Light => 1,
                SleepStage::Rem => 2,
                SleepStage::Awake => 3,
            };
            seconds[slot] += detail.duration_secs();
        }

        StageTotals {
            deep: seconds[0] / 60,
            light: seconds[1] / 60,
            rem: seconds[2] / 60,
            awake: seconds[3] / 60,
        }
    }
}

/// One row per user per calendar day summarizing all sleep sessions ending that day
#[derive(Debug, Clone, PartialEq)]
pub struct DailySleepAggregate {
    pub user_id: String,
    pub date: NaiveDate,
    pub totals: StageTotals,
    pub session_count: u32,
    pub last_updated: DateTime<Utc>,
}

/// Step counts reported by the ring
#[derive(Debug, Clone, PartialEq)]
pub struct StepSample {
    pub timestamp: i64,
    pub steps: u32,
    pub distance_meters: f64,
    pub calories: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyStepsAggregate {
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: u64,
    pub distance_meters: f64,
    pub calories: f64,
    pub session_count: u32,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ecg_timestamp_format_sorts_by_time() {
        let a = EcgRecord::timestamp_for(Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap());
        let b = EcgRecord::timestamp_for(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(a, "2024-03-01 09:05:00");
        assert!(a < b);
    }

    #[test]
    fn test_stage_totals_from_details() {
        let session = SleepSession {
            statistic_time: 0,
            start_time: 0,
            end_time: 7200,
            totals: StageTotals::default(),
            details: vec![
                SleepDetail { start_time: 0, end_time: 1800, stage: SleepStage::Light },
                SleepDetail { start_time: 1800, end_time: 4200, stage: SleepStage::Deep },
                SleepDetail { start_time: 4200, end_time: 6000, stage: SleepStage::Rem },
                SleepDetail { start_time: 6000, end_time: 7200, stage: SleepStage::Awake },
            ],
        };

        let totals = session.stage_totals();
        assert_eq!(totals, StageTotals { deep: 40, light: 30, rem: 30, awake: 20 });
    }

    #[test]
    fn test_stage_totals_fall_back_to_reported() {
        let reported = StageTotals { deep: 90, light: 200, rem: 60, awake: 15 };
        let session = SleepSession {
            statistic_time: 0,
            start_time: 0,
            end_time: 1,
            totals: reported,
            details: vec![],
        };
        assert_eq!(session.stage_totals(), reported);
    }

    #[test]
    fn test_sleep_stage_codes() {
        for stage in [SleepStage::Deep, SleepStage::Light, SleepStage::Rem, SleepStage::Awake] {
            assert_eq!(SleepStage::from_code(stage.code()), Some(stage));
        }
        assert_eq!(SleepStage::from_code(9), None);
    }

    #[test]
    fn test_diagnosis_validity() {
        let mut record = EcgRecord {
            timestamp: "2024-03-01 09:05:00".to_string(),
            heart_rate: 70,
            systolic_bp: 120,
            diastolic_bp: 80,
            hrv: 40,
            waveform: vec![],
            diagnose_type: 0,
            is_afib: false,
            indices: DerivedIndices::default(),
            blood_oxygen: 98,
            temperature: 36.5,
            is_synced: false,
        };
        assert!(record.is_failed());
        assert!(!record.has_valid_diagnosis());
        record.diagnose_type = 3;
        assert!(record.has_valid_diagnosis());
        record.diagnose_type = 8;
        assert!(!record.has_valid_diagnosis());
    }
}
