//! # Electrode Contact Monitor
//!
//! Infers whether the ring's electrodes touch skin from waveform liveness.
//! The monitor arms itself on the first sample of a session, then a poller
//! checks every `POLL_INTERVAL` whether samples stopped arriving for longer
//! than `CONTACT_TIMEOUT`.
//!
//! Only edges are reported: a poll or sample that does not change the state
//! yields `None`.

use std::time::Duration;
use tokio::time::Instant;

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const CONTACT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectrodeEvent {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContactState {
    Unarmed,
    Connected,
    Disconnected,
}

/// Snapshot of the current contact status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectrodeStatus {
    pub is_connected: bool,
    pub last_sample_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ElectrodeContactMonitor {
    state: ContactState,
    last_sample_at: Option<Instant>,
    timeout: Duration,
}

impl Default for ElectrodeContactMonitor {
    fn default() -> Self {
        Self::new(CONTACT_TIMEOUT)
    }
}

impl ElectrodeContactMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ContactState::Unarmed,
            last_sample_at: None,
            timeout,
        }
    }

    /// Record one waveform sample arriving at `now`
    pub fn record_sample(&mut self, now: Instant) -> Option<ElectrodeEvent> {
        self.last_sample_at = Some(now);
        match self.state {
            ContactState::Connected => None,
            ContactState::Unarmed | ContactState::Disconnected => {
                self.state = ContactState::Connected;
                Some(ElectrodeEvent::Connected)
            }
        }
    }

    /// Check liveness at `now`
    pub fn poll(&mut self, now: Instant) -> Option<ElectrodeEvent> {
        if self.state != ContactState::Connected {
            return None;
        }

        let last = self.last_sample_at?;
        if now.saturating_duration_since(last) > self.timeout {
            self.state = ContactState::Disconnected;
            Some(ElectrodeEvent::Disconnected)
        } else {
            None
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state != ContactState::Unarmed
    }

    pub fn status(&self) -> ElectrodeStatus {
        ElectrodeStatus {
            is_connected: self.state == ContactState::Connected,
            last_sample_at: self.last_sample_at,
        }
    }

    /// Back to unarmed; the next sample reports `Connected` again
    pub fn reset(&mut self) {
        self.state = ContactState::Unarmed;
        self.last_sample_at = None;
    }
}
