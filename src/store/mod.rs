//! # Local Time-Series Store
//!
//! SQLite-backed persistence for every vital kind the ring produces.
//!
//! ## Architecture
//! - **Store**: Owns the connection on a dedicated writer thread
//! - **Writer Thread**: Executes queued jobs one at a time, in submission order
//! - **TimeSeriesRepository**: Typed view of one table (one instance per vital kind)
//!
//! ## Key Features
//! 1. Non-blocking callers: jobs are queued over a channel and the reply is awaited
//! 2. Serialized writes: duplicate detection and insert share one transaction on one thread
//! 3. Idempotent batches: replaying a batch inserts nothing the second time
//!
//! ## Tables
//! ```text
//! heart_rate, blood_pressure, blood_glucose   UNIQUE(timestamp)
//! ecg_records                                 UNIQUE(timestamp TEXT)
//! sleep_sessions                              UNIQUE(statistic_time)
//! └── sleep_details                           ON DELETE CASCADE
//! daily_sleep, daily_steps                    UNIQUE(user_id, date)
//! ```

mod records;
mod repository;

pub use records::VitalRecord;
pub use repository::{DailyRecord, TimeSeriesRecord, TimeSeriesRepository};

use crate::error::StoreError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// Command sent from callers to the writer thread
enum StoreCommand {
    /// Run a job against the connection
    Run(Job),
    /// Stop the writer thread
    Stop,
}

struct Writer {
    command_tx: Sender<StoreCommand>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Writer {
    fn shutdown(&self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            let _ = self.command_tx.send(StoreCommand::Stop);
            let _ = handle.join();
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to the local store. Cheap to clone; all clones share one writer thread.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Writer>,
}

impl Store {
    /// Open (or create) the database file and start the writer thread
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
            }
        }

        log::info!("Opening store at {}", path.display());
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Store journal mode: {}", mode);
        Self::start(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::start(Connection::open_in_memory()?)
    }

    fn start(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(records::SCHEMA_SQL)?;

        let (command_tx, command_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || Self::writer_loop(command_rx, conn))
            .map_err(StoreError::Io)?;

        Ok(Store {
            writer: Arc::new(Writer {
                command_tx,
                thread: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Typed repository over one table of this store
    pub fn repository<R: TimeSeriesRecord>(&self) -> TimeSeriesRepository<R> {
        TimeSeriesRepository::new(self.clone())
    }

    /// Run a job on the writer thread and await its result
    pub async fn call<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let (respond, response) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = respond.send(job(conn));
        });

        self.writer
            .command_tx
            .send(StoreCommand::Run(job))
            .map_err(|_| StoreError::Unavailable)?;

        response.await.map_err(|_| StoreError::Unavailable)?
    }

    /// Stop the writer thread. Later calls on any clone fail with `Unavailable`.
    pub fn close(&self) {
        self.writer.shutdown();
    }

    /// Writer thread loop
    ///
    /// Executes jobs in arrival order until told to stop or every handle is gone.
    fn writer_loop(command_rx: Receiver<StoreCommand>, mut conn: Connection) {
        log::info!("Store writer started");
        loop {
            match command_rx.recv() {
                Ok(StoreCommand::Run(job)) => job(&mut conn),
                Ok(StoreCommand::Stop) => {
                    log::info!("Store writer stopped");
                    break;
                }
                Err(_) => {
                    log::info!("Store writer: command channel closed");
                    break;
                }
            }
        }
    }
}

/// Outcome of a batch save as reported to callers that only need success and a count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub success: bool,
    pub inserted: usize,
}

impl From<Result<usize, StoreError>> for BatchReport {
    fn from(result: Result<usize, StoreError>) -> Self {
        match result {
            Ok(inserted) => BatchReport {
                success: true,
                inserted,
            },
            Err(e) => {
                log::error!("Batch save failed: {}", e);
                BatchReport {
                    success: false,
                    inserted: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_store_runs_jobs() {
        let store = Store::open_in_memory().unwrap();
        let value = store
            .call(|conn| Ok(conn.query_row("SELECT 40 + 2", [], |row| row.get::<_, i64>(0))?))
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_store_creates_file_and_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("vitals.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        store.close();
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = Store::open_in_memory().unwrap();
        let clone = store.clone();
        store.close();

        let result = clone.call(|_| Ok(())).await;
        assert!(matches!(result, Err(StoreError::Unavailable)));
    }

    #[test]
    fn test_batch_report_from_failure() {
        let report = BatchReport::from(Err(StoreError::Unavailable));
        assert_eq!(report, BatchReport { success: false, inserted: 0 });

        let report = BatchReport::from(Ok(3));
        assert_eq!(report, BatchReport { success: true, inserted: 3 });
    }
}
