//! Moderation sink that records every report it receives.

use rendezvous_service::moderation::{ModerationSink, UserReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Records reports in arrival order.
#[derive(Clone, Default)]
pub struct RecordingModerationSink {
    reports: Arc<Mutex<Vec<UserReport>>>,
    submitted: Arc<Notify>,
}

impl RecordingModerationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far.
    pub async fn reports(&self) -> Vec<UserReport> {
        self.reports.lock().await.clone()
    }

    /// Wait until at least `count` reports arrived. Submission happens off
    /// the coordinator loop, so tests must not assume it is synchronous.
    pub async fn wait_for(&self, count: usize) -> Vec<UserReport> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = self.submitted.notified();
                {
                    let reports = self.reports.lock().await;
                    if reports.len() >= count {
                        return reports.clone();
                    }
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for moderation reports")
    }
}

#[async_trait::async_trait]
impl ModerationSink for RecordingModerationSink {
    async fn submit(&self, report: UserReport) {
        self.reports.lock().await.push(report);
        self.submitted.notify_waiters();
    }
}
