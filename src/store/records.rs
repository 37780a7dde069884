use super::repository::{query_records, DailyRecord, TimeSeriesRecord, TimeSeriesRepository};
use crate::error::StoreError;
use crate::models::{
    BloodGlucoseRecord, BloodPressureRecord, DailySleepAggregate, DailyStepsAggregate,
    DerivedIndices, EcgRecord, HeartRateRecord, SleepDetail, SleepSession, SleepStage,
    StageTotals, VitalKind, VitalSample, VitalType,
};
use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, Connection, Row};

pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS heart_rate (
    id INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL UNIQUE,
    bpm INTEGER NOT NULL,
    batch_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blood_pressure (
    id INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL UNIQUE,
    systolic INTEGER NOT NULL,
    diastolic INTEGER NOT NULL,
    batch_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blood_glucose (
    id INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL UNIQUE,
    glucose REAL NOT NULL,
    batch_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ecg_records (
    id INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL UNIQUE,
    heart_rate INTEGER NOT NULL,
    systolic_bp INTEGER NOT NULL,
    diastolic_bp INTEGER NOT NULL,
    hrv INTEGER NOT NULL,
    waveform TEXT NOT NULL,             -- JSON array of amplitudes
    diagnose_type INTEGER NOT NULL CHECK (diagnose_type BETWEEN 1 AND 7),
    is_afib INTEGER NOT NULL,
    stress REAL NOT NULL,
    fatigue REAL NOT NULL,
    body_load REAL NOT NULL,
    heart_strength REAL NOT NULL,
    blood_oxygen INTEGER NOT NULL,
    temperature REAL NOT NULL,
    is_synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_ecg_unsynced ON ecg_records(is_synced, timestamp);

CREATE TABLE IF NOT EXISTS sleep_sessions (
    id INTEGER PRIMARY KEY,
    statistic_time INTEGER NOT NULL UNIQUE,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    deep_minutes INTEGER NOT NULL,
    light_minutes INTEGER NOT NULL,
    rem_minutes INTEGER NOT NULL,
    awake_minutes INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sleep_details (
    id INTEGER PRIMARY KEY,
    session_id INTEGER NOT NULL REFERENCES sleep_sessions(id) ON DELETE CASCADE,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    stage INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sleep_details_session ON sleep_details(session_id);

CREATE TABLE IF NOT EXISTS daily_sleep (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    date TEXT NOT NULL,                 -- YYYY-MM-DD
    deep_minutes INTEGER NOT NULL,
    light_minutes INTEGER NOT NULL,
    rem_minutes INTEGER NOT NULL,
    awake_minutes INTEGER NOT NULL,
    session_count INTEGER NOT NULL,
    last_updated TEXT NOT NULL,
    UNIQUE(user_id, date)
);

CREATE TABLE IF NOT EXISTS daily_steps (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    date TEXT NOT NULL,
    steps INTEGER NOT NULL,
    distance_meters REAL NOT NULL,
    calories REAL NOT NULL,
    session_count INTEGER NOT NULL,
    last_updated TEXT NOT NULL,
    UNIQUE(user_id, date)
);
"#;

/// Records that map onto the `{type, value, timestamp}` upload shape
pub trait VitalRecord: TimeSeriesRecord {
    const KIND: VitalKind;

    fn samples(&self) -> Vec<VitalSample>;
}

fn date_param(date: NaiveDate) -> Value {
    Value::Text(date.format("%Y-%m-%d").to_string())
}

/// Local calendar day of an instant, matching the local midnight of `get_today_latest`
fn local_date_param(at: DateTime<Utc>) -> Value {
    date_param(at.with_timezone(&Local).date_naive())
}

fn sample(vital_type: VitalType, value: f64, timestamp: i64, batch_id: i64) -> VitalSample {
    VitalSample {
        vital_type,
        value,
        timestamp,
        batch_id,
    }
}

impl TimeSeriesRecord for HeartRateRecord {
    type Key = i64;

    const TABLE: &'static str = "heart_rate";
    const COLUMNS: &'static str = "timestamp, bpm, batch_id";
    const KEY_PREDICATE: &'static str = "timestamp = ?1";
    const TIME_COLUMN: &'static str = "timestamp";

    fn key(&self) -> i64 {
        self.timestamp
    }

    fn key_params(key: &i64) -> Vec<Value> {
        vec![Value::Integer(*key)]
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached("INSERT INTO heart_rate (timestamp, bpm, batch_id) VALUES (?1, ?2, ?3)")?
            .execute(params![self.timestamp, self.bpm, self.batch_id])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HeartRateRecord {
            timestamp: row.get(0)?,
            bpm: row.get(1)?,
            batch_id: row.get(2)?,
        })
    }
}

impl VitalRecord for HeartRateRecord {
    const KIND: VitalKind = VitalKind::HeartRate;

    fn samples(&self) -> Vec<VitalSample> {
        vec![sample(VitalType::HeartRate, self.bpm as f64, self.timestamp, self.batch_id)]
    }
}

impl TimeSeriesRecord for BloodPressureRecord {
    type Key = i64;

    const TABLE: &'static str = "blood_pressure";
    const COLUMNS: &'static str = "timestamp, systolic, diastolic, batch_id";
    const KEY_PREDICATE: &'static str = "timestamp = ?1";
    const TIME_COLUMN: &'static str = "timestamp";

    fn key(&self) -> i64 {
        self.timestamp
    }

    fn key_params(key: &i64) -> Vec<Value> {
        vec![Value::Integer(*key)]
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO blood_pressure (timestamp, systolic, diastolic, batch_id) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![self.timestamp, self.systolic, self.diastolic, self.batch_id])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(BloodPressureRecord {
            timestamp: row.get(0)?,
            systolic: row.get(1)?,
            diastolic: row.get(2)?,
            batch_id: row.get(3)?,
        })
    }
}

impl VitalRecord for BloodPressureRecord {
    const KIND: VitalKind = VitalKind::BloodPressure;

    fn samples(&self) -> Vec<VitalSample> {
        vec![
            sample(VitalType::Systolic, self.systolic as f64, self.timestamp, self.batch_id),
            sample(VitalType::Diastolic, self.diastolic as f64, self.timestamp, self.batch_id),
        ]
    }
}

impl TimeSeriesRecord for BloodGlucoseRecord {
    type Key = i64;

    const TABLE: &'static str = "blood_glucose";
    const COLUMNS: &'static str = "timestamp, glucose, batch_id";
    const KEY_PREDICATE: &'static str = "timestamp = ?1";
    const TIME_COLUMN: &'static str = "timestamp";

    fn key(&self) -> i64 {
        self.timestamp
    }

    fn key_params(key: &i64) -> Vec<Value> {
        vec![Value::Integer(*key)]
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached("INSERT INTO blood_glucose (timestamp, glucose, batch_id) VALUES (?1, ?2, ?3)")?
            .execute(params![self.timestamp, self.glucose, self.batch_id])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(BloodGlucoseRecord {
            timestamp: row.get(0)?,
            glucose: row.get(1)?,
            batch_id: row.get(2)?,
        })
    }
}

impl VitalRecord for BloodGlucoseRecord {
    const KIND: VitalKind = VitalKind::BloodGlucose;

    fn samples(&self) -> Vec<VitalSample> {
        vec![sample(VitalType::Glucose, self.glucose, self.timestamp, self.batch_id)]
    }
}

impl TimeSeriesRecord for EcgRecord {
    type Key = String;

    const TABLE: &'static str = "ecg_records";
    const COLUMNS: &'static str = "timestamp, heart_rate, systolic_bp, diastolic_bp, hrv, waveform, \
        diagnose_type, is_afib, stress, fatigue, body_load, heart_strength, blood_oxygen, \
        temperature, is_synced";
    const KEY_PREDICATE: &'static str = "timestamp = ?1";
    const TIME_COLUMN: &'static str = "timestamp";

    fn key(&self) -> String {
        self.timestamp.clone()
    }

    fn key_params(key: &String) -> Vec<Value> {
        vec![Value::Text(key.clone())]
    }

    fn time_param(at: DateTime<Utc>) -> Value {
        Value::Text(EcgRecord::timestamp_for(at))
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.has_valid_diagnosis() {
            Ok(())
        } else {
            Err(StoreError::InvalidMeasurement {
                timestamp: self.timestamp.clone(),
                diagnose_type: self.diagnose_type,
            })
        }
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        let waveform = serde_json::to_string(&self.waveform)?;
        conn.prepare_cached(
            "INSERT INTO ecg_records (timestamp, heart_rate, systolic_bp, diastolic_bp, hrv, waveform,
                diagnose_type, is_afib, stress, fatigue, body_load, heart_strength, blood_oxygen,
                temperature, is_synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?
        .execute(params![
            self.timestamp,
            self.heart_rate,
            self.systolic_bp,
            self.diastolic_bp,
            self.hrv,
            waveform,
            self.diagnose_type,
            self.is_afib,
            self.indices.stress,
            self.indices.fatigue,
            self.indices.body_load,
            self.indices.heart_strength,
            self.blood_oxygen,
            self.temperature,
            self.is_synced,
        ])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let waveform: String = row.get(5)?;
        let waveform = serde_json::from_str(&waveform)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(EcgRecord {
            timestamp: row.get(0)?,
            heart_rate: row.get(1)?,
            systolic_bp: row.get(2)?,
            diastolic_bp: row.get(3)?,
            hrv: row.get(4)?,
            waveform,
            diagnose_type: row.get(6)?,
            is_afib: row.get(7)?,
            indices: DerivedIndices {
                stress: row.get(8)?,
                fatigue: row.get(9)?,
                body_load: row.get(10)?,
                heart_strength: row.get(11)?,
            },
            blood_oxygen: row.get(12)?,
            temperature: row.get(13)?,
            is_synced: row.get(14)?,
        })
    }
}

impl TimeSeriesRepository<EcgRecord> {
    /// Records not yet acknowledged by the backend, oldest first
    pub async fn get_unsynced(&self) -> Result<Vec<EcgRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ecg_records WHERE is_synced = 0 ORDER BY timestamp ASC",
            EcgRecord::COLUMNS
        );
        self.query(sql, Vec::new()).await
    }

    /// Flag one record as acknowledged; `false` when no such record exists
    pub async fn mark_synced(&self, timestamp: &str) -> Result<bool, StoreError> {
        let timestamp = timestamp.to_string();
        let updated = self
            .store()
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE ecg_records SET is_synced = 1 WHERE timestamp = ?1",
                    params![timestamp],
                )?)
            })
            .await?;
        Ok(updated == 1)
    }
}

impl TimeSeriesRecord for SleepSession {
    type Key = i64;

    const TABLE: &'static str = "sleep_sessions";
    const COLUMNS: &'static str = "statistic_time, start_time, end_time, deep_minutes, \
        light_minutes, rem_minutes, awake_minutes";
    const KEY_PREDICATE: &'static str = "statistic_time = ?1";
    const TIME_COLUMN: &'static str = "end_time";

    fn key(&self) -> i64 {
        self.statistic_time
    }

    fn key_params(key: &i64) -> Vec<Value> {
        vec![Value::Integer(*key)]
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO sleep_sessions (statistic_time, start_time, end_time, deep_minutes,
                light_minutes, rem_minutes, awake_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            self.statistic_time,
            self.start_time,
            self.end_time,
            self.totals.deep,
            self.totals.light,
            self.totals.rem,
            self.totals.awake,
        ])?;
        let session_id = conn.last_insert_rowid();

        let mut stmt = conn.prepare_cached(
            "INSERT INTO sleep_details (session_id, start_time, end_time, stage) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for detail in &self.details {
            stmt.execute(params![
                session_id,
                detail.start_time,
                detail.end_time,
                detail.stage.code()
            ])?;
        }
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SleepSession {
            statistic_time: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            totals: StageTotals {
                deep: row.get(3)?,
                light: row.get(4)?,
                rem: row.get(5)?,
                awake: row.get(6)?,
            },
            details: Vec::new(),
        })
    }

    fn load_children(conn: &Connection, records: &mut [Self]) -> Result<(), StoreError> {
        let mut stmt = conn.prepare_cached(
            "SELECT d.start_time, d.end_time, d.stage
             FROM sleep_details d JOIN sleep_sessions s ON s.id = d.session_id
             WHERE s.statistic_time = ?1
             ORDER BY d.start_time",
        )?;

        for session in records.iter_mut() {
            session.details = stmt
                .query_map(params![session.statistic_time], |row| {
                    let code: u8 = row.get(2)?;
                    let stage = SleepStage::from_code(code)
                        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, code as i64))?;
                    Ok(SleepDetail {
                        start_time: row.get(0)?,
                        end_time: row.get(1)?,
                        stage,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }
        Ok(())
    }
}

impl TimeSeriesRecord for DailySleepAggregate {
    type Key = (String, NaiveDate);

    const TABLE: &'static str = "daily_sleep";
    const COLUMNS: &'static str = "user_id, date, deep_minutes, light_minutes, rem_minutes, \
        awake_minutes, session_count, last_updated";
    const KEY_PREDICATE: &'static str = "user_id = ?1 AND date = ?2";
    const TIME_COLUMN: &'static str = "date";

    fn key(&self) -> Self::Key {
        (self.user_id.clone(), self.date)
    }

    fn key_params(key: &Self::Key) -> Vec<Value> {
        vec![Value::Text(key.0.clone()), date_param(key.1)]
    }

    fn time_param(at: DateTime<Utc>) -> Value {
        local_date_param(at)
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO daily_sleep (user_id, date, deep_minutes, light_minutes, rem_minutes,
                awake_minutes, session_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(params![
            self.user_id,
            self.date,
            self.totals.deep,
            self.totals.light,
            self.totals.rem,
            self.totals.awake,
            self.session_count,
            self.last_updated,
        ])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DailySleepAggregate {
            user_id: row.get(0)?,
            date: row.get(1)?,
            totals: StageTotals {
                deep: row.get(2)?,
                light: row.get(3)?,
                rem: row.get(4)?,
                awake: row.get(5)?,
            },
            session_count: row.get(6)?,
            last_updated: row.get(7)?,
        })
    }
}

impl DailyRecord for DailySleepAggregate {
    fn same_totals(&self, other: &Self) -> bool {
        self.totals == other.totals && self.session_count == other.session_count
    }

    fn upsert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO daily_sleep (user_id, date, deep_minutes, light_minutes, rem_minutes,
                awake_minutes, session_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, date) DO UPDATE SET
                deep_minutes = excluded.deep_minutes,
                light_minutes = excluded.light_minutes,
                rem_minutes = excluded.rem_minutes,
                awake_minutes = excluded.awake_minutes,
                session_count = excluded.session_count,
                last_updated = excluded.last_updated",
        )?
        .execute(params![
            self.user_id,
            self.date,
            self.totals.deep,
            self.totals.light,
            self.totals.rem,
            self.totals.awake,
            self.session_count,
            self.last_updated,
        ])?;
        Ok(())
    }
}

impl TimeSeriesRecord for DailyStepsAggregate {
    type Key = (String, NaiveDate);

    const TABLE: &'static str = "daily_steps";
    const COLUMNS: &'static str =
        "user_id, date, steps, distance_meters, calories, session_count, last_updated";
    const KEY_PREDICATE: &'static str = "user_id = ?1 AND date = ?2";
    const TIME_COLUMN: &'static str = "date";

    fn key(&self) -> Self::Key {
        (self.user_id.clone(), self.date)
    }

    fn key_params(key: &Self::Key) -> Vec<Value> {
        vec![Value::Text(key.0.clone()), date_param(key.1)]
    }

    fn time_param(at: DateTime<Utc>) -> Value {
        local_date_param(at)
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO daily_steps (user_id, date, steps, distance_meters, calories,
                session_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            self.user_id,
            self.date,
            self.steps as i64,
            self.distance_meters,
            self.calories,
            self.session_count,
            self.last_updated,
        ])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let steps: i64 = row.get(2)?;
        Ok(DailyStepsAggregate {
            user_id: row.get(0)?,
            date: row.get(1)?,
            steps: steps.max(0) as u64,
            distance_meters: row.get(3)?,
            calories: row.get(4)?,
            session_count: row.get(5)?,
            last_updated: row.get(6)?,
        })
    }
}

impl DailyRecord for DailyStepsAggregate {
    fn same_totals(&self, other: &Self) -> bool {
        self.steps == other.steps
            && self.distance_meters == other.distance_meters
            && self.calories == other.calories
            && self.session_count == other.session_count
    }

    fn upsert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO daily_steps (user_id, date, steps, distance_meters, calories,
                session_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, date) DO UPDATE SET
                steps = excluded.steps,
                distance_meters = excluded.distance_meters,
                calories = excluded.calories,
                session_count = excluded.session_count,
                last_updated = excluded.last_updated",
        )?
        .execute(params![
            self.user_id,
            self.date,
            self.steps as i64,
            self.distance_meters,
            self.calories,
            self.session_count,
            self.last_updated,
        ])?;
        Ok(())
    }
}

impl<R: DailyRecord<Key = (String, NaiveDate)>> TimeSeriesRepository<R> {
    /// The row for one user and day, if any
    pub async fn get_day(&self, user_id: &str, date: NaiveDate) -> Result<Option<R>, StoreError> {
        self.find((user_id.to_string(), date)).await
    }

    /// All rows of one user between two days inclusive, newest first
    pub async fn get_user_days(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ?1 AND date >= ?2 AND date <= ?3 ORDER BY date DESC",
            R::COLUMNS,
            R::TABLE
        );
        let params = vec![Value::Text(user_id.to_string()), date_param(start), date_param(end)];
        self.store()
            .call(move |conn| query_records::<R>(conn, &sql, params))
            .await
    }
}
