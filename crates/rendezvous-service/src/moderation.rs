//! Moderation sink for user reports.
//!
//! Reports leave the matching path through this trait. The default sink only
//! logs; deployments plug in a queue or review service.

use chrono::{DateTime, Utc};
use common::types::{AccountId, ConnectionId, PairingId};
use tracing::warn;

/// A report filed by one participant of a pairing against another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReport {
    pub reporter: ConnectionId,
    pub reporter_account: Option<AccountId>,
    pub reported: ConnectionId,
    pub reported_account: Option<AccountId>,
    /// Pairing the two were in when the report was filed, if still active.
    pub pairing_id: Option<PairingId>,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
}

/// Destination for user reports.
#[async_trait::async_trait]
pub trait ModerationSink: Send + Sync {
    async fn submit(&self, report: UserReport);
}

/// Sink that writes reports to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingModerationSink;

#[async_trait::async_trait]
impl ModerationSink for LoggingModerationSink {
    async fn submit(&self, report: UserReport) {
        warn!(
            target: "rv.moderation",
            reporter = %report.reporter,
            reported = %report.reported,
            pairing_id = ?report.pairing_id.as_ref().map(PairingId::as_str),
            reason_len = report.reason.len(),
            "User report submitted"
        );
    }
}
