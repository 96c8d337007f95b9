// src/link/sink.rs
//! Location sink: where synthesized fixes and provider status go

use crate::error::Result;
use crate::gnss::Fix;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info};

/// Availability of the location provider as seen by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProviderStatus {
    OutOfService,
    TemporarilyUnavailable,
    Available,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProviderStatus::OutOfService => "out of service",
            ProviderStatus::TemporarilyUnavailable => "temporarily unavailable",
            ProviderStatus::Available => "available",
        };
        f.write_str(text)
    }
}

/// Receives fixes and provider status from the parser.
///
/// Returning [`GnssError::SinkRejected`](crate::error::GnssError::SinkRejected)
/// from `notify_fix` makes the link disable itself.
pub trait LocationSink: Send + Sync {
    fn notify_fix(&self, fix: &Fix) -> Result<()>;

    fn notify_status_changed(&self, status: ProviderStatus, timestamp: i64);

    fn is_status(&self, status: ProviderStatus) -> bool;
}

#[derive(Debug)]
struct SinkState {
    status: ProviderStatus,
    last_fix: Option<Fix>,
    fixes: u64,
}

/// Default sink: logs every fix and remembers the latest one.
#[derive(Debug)]
pub struct LoggingSink {
    state: Mutex<SinkState>,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                status: ProviderStatus::OutOfService,
                last_fix: None,
                fixes: 0,
            }),
        }
    }

    pub fn status(&self) -> ProviderStatus {
        self.lock().status
    }

    pub fn last_fix(&self) -> Option<Fix> {
        self.lock().last_fix.clone()
    }

    pub fn fix_count(&self) -> u64 {
        self.lock().fixes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LoggingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationSink for LoggingSink {
    fn notify_fix(&self, fix: &Fix) -> Result<()> {
        info!(fix = %fix, "New fix");
        let mut state = self.lock();
        state.last_fix = Some(fix.clone());
        state.fixes += 1;
        Ok(())
    }

    fn notify_status_changed(&self, status: ProviderStatus, timestamp: i64) {
        debug!(%status, timestamp, "Provider status changed");
        self.lock().status = status;
    }

    fn is_status(&self, status: ProviderStatus) -> bool {
        self.lock().status == status
    }
}
