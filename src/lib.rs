//! Companion core for a biosensor ring: live ECG ingest and display pacing,
//! measurement sessions, local time-series storage and backend sync.

pub mod aggregate;
pub mod arbiter;
pub mod config;
pub mod device;
pub mod draw;
pub mod electrode;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod sync;
