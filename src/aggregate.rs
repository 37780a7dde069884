//! # Daily Aggregation
//!
//! Folds raw ring data into one row per user per calendar day. Sleep sessions
//! are attributed to the day their end time falls on, in the configured UTC
//! offset. A sleep day is always rebuilt from every stored session ending
//! on it, never from one sync batch alone. Step samples are attributed to
//! the day of their timestamp.
//!
//! Writes go through `upsert_changed`, so a day whose totals did not change
//! is left untouched, including its `last_updated` stamp.

use crate::error::StoreError;
use crate::models::{
    DailySleepAggregate, DailyStepsAggregate, SleepSession, StageTotals, StepSample,
};
use crate::store::{Store, TimeSeriesRepository};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Calendar day of an epoch timestamp in `offset`
pub fn day_of(epoch_secs: i64, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0).map(|at| at.with_timezone(&offset).date_naive())
}

/// First and last second of `date` in `offset`, as UTC instants
pub fn day_bounds(date: NaiveDate, offset: FixedOffset) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = date
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(offset)
        .single()?
        .with_timezone(&Utc);
    Some((start, start + Duration::days(1) - Duration::seconds(1)))
}

/// Today's date in `offset`
fn today_in(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

/// Outcome of ingesting one sleep batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepIngestReport {
    pub sessions_inserted: usize,
    pub days_changed: usize,
}

#[derive(Clone)]
pub struct SleepAggregator {
    sessions: TimeSeriesRepository<SleepSession>,
    daily: TimeSeriesRepository<DailySleepAggregate>,
    offset: FixedOffset,
}

impl SleepAggregator {
    pub fn new(store: &Store, offset: FixedOffset) -> Self {
        Self {
            sessions: store.repository(),
            daily: store.repository(),
            offset,
        }
    }

    /// Per-day stage totals of a batch, oldest day first
    pub fn aggregate(
        &self,
        user_id: &str,
        sessions: &[SleepSession],
        now: DateTime<Utc>,
    ) -> Vec<DailySleepAggregate> {
        let mut days: BTreeMap<NaiveDate, (StageTotals, u32)> = BTreeMap::new();

        for session in sessions {
            let Some(date) = day_of(session.end_time, self.offset) else {
                log::warn!(
                    "Skipping sleep session {} with invalid end time {}",
                    session.statistic_time,
                    session.end_time
                );
                continue;
            };

            let totals = session.stage_totals();
            let (day, count) = days.entry(date).or_default();
            day.deep += totals.deep;
            day.light += totals.light;
            day.rem += totals.rem;
            day.awake += totals.awake;
            *count += 1;
        }

        days.into_iter()
            .map(|(date, (totals, session_count))| DailySleepAggregate {
                user_id: user_id.to_string(),
                date,
                totals,
                session_count,
                last_updated: now,
            })
            .collect()
    }

    /// Recompute the days touched by `sessions` from every stored session ending on them
    ///
    /// Returns how many days changed. Sessions must already be in the store.
    pub async fn save_daily_stats(
        &self,
        user_id: &str,
        sessions: &[SleepSession],
    ) -> Result<usize, StoreError> {
        let dates: BTreeSet<NaiveDate> = sessions
            .iter()
            .filter_map(|session| day_of(session.end_time, self.offset))
            .collect();

        let now = Utc::now();
        let mut rows = Vec::with_capacity(dates.len());
        for date in dates {
            let Some((start, end)) = day_bounds(date, self.offset) else {
                continue;
            };
            let stored = self.sessions.get_by_date_range(start, end).await?;
            rows.extend(self.aggregate(user_id, &stored, now));
        }

        let days = rows.len();
        let changed = self.daily.upsert_changed(rows).await?;
        log::info!("Sleep: {} of {} days changed", changed, days);
        Ok(changed)
    }

    /// Store the raw sessions of a sync batch and refresh their days
    pub async fn ingest(
        &self,
        user_id: &str,
        sessions: Vec<SleepSession>,
    ) -> Result<SleepIngestReport, StoreError> {
        let sessions_inserted = self.sessions.save_batch(sessions.clone()).await?;
        let days_changed = self.save_daily_stats(user_id, &sessions).await?;
        Ok(SleepIngestReport {
            sessions_inserted,
            days_changed,
        })
    }

    pub async fn get_day(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailySleepAggregate>, StoreError> {
        self.daily.get_day(user_id, date).await
    }

    /// Today's row, with "today" taken in the aggregation offset
    pub async fn get_today(&self, user_id: &str) -> Result<Option<DailySleepAggregate>, StoreError> {
        self.daily.get_day(user_id, today_in(self.offset)).await
    }
}

#[derive(Clone)]
pub struct StepsAggregator {
    daily: TimeSeriesRepository<DailyStepsAggregate>,
    offset: FixedOffset,
}

impl StepsAggregator {
    pub fn new(store: &Store, offset: FixedOffset) -> Self {
        Self {
            daily: store.repository(),
            offset,
        }
    }

    /// Per-day step totals, oldest day first
    pub fn aggregate(
        &self,
        user_id: &str,
        samples: &[StepSample],
        now: DateTime<Utc>,
    ) -> Vec<DailyStepsAggregate> {
        let mut days: BTreeMap<NaiveDate, DailyStepsAggregate> = BTreeMap::new();

        for sample in samples {
            let Some(date) = day_of(sample.timestamp, self.offset) else {
                continue;
            };
            let day = days.entry(date).or_insert_with(|| DailyStepsAggregate {
                user_id: user_id.to_string(),
                date,
                steps: 0,
                distance_meters: 0.0,
                calories: 0.0,
                session_count: 0,
                last_updated: now,
            });
            day.steps += u64::from(sample.steps);
            day.distance_meters += sample.distance_meters;
            day.calories += sample.calories;
            day.session_count += 1;
        }

        days.into_values().collect()
    }

    pub async fn save_daily_stats(
        &self,
        user_id: &str,
        samples: &[StepSample],
    ) -> Result<usize, StoreError> {
        let rows = self.aggregate(user_id, samples, Utc::now());
        let days = rows.len();
        let changed = self.daily.upsert_changed(rows).await?;
        log::info!("Steps: {} of {} days changed", changed, days);
        Ok(changed)
    }

    pub async fn get_day(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepsAggregate>, StoreError> {
        self.daily.get_day(user_id, date).await
    }

    pub async fn get_today(&self, user_id: &str) -> Result<Option<DailyStepsAggregate>, StoreError> {
        self.daily.get_day(user_id, today_in(self.offset)).await
    }
}
