//! Last-request-wins coordination for report builds.
//!
//! The UI layer issues a fresh request per filter change; fetches for a
//! superseded request may still be in flight when the newer one completes.
//! Tokens order the requests, and the publish slot refuses anything older
//! than what it already holds, so a slow early request can never overwrite
//! a newer report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::AttendanceReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestToken(u64);

/// Issues monotonically increasing tokens. A token is current while no
/// newer token has been issued.
#[derive(Debug, Default)]
pub struct ReportSequencer {
    next: AtomicU64,
}

impl ReportSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> RequestToken {
        RequestToken(self.next.fetch_add(1, Ordering::SeqCst))
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        token.0 + 1 == self.next.load(Ordering::SeqCst)
    }
}

/// Holds the most recent published report. Publishes from stale tokens are
/// dropped and reported back to the caller as `None`.
#[derive(Debug, Default)]
pub struct LatestReport {
    slot: Mutex<Option<(RequestToken, Arc<AttendanceReport>)>>,
}

impl LatestReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        token: RequestToken,
        report: AttendanceReport,
    ) -> Option<Arc<AttendanceReport>> {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((held, _)) = slot.as_ref() {
            if token < *held {
                debug!("discarding report from superseded request");
                return None;
            }
        }
        let report = Arc::new(report);
        *slot = Some((token, Arc::clone(&report)));
        Some(report)
    }

    pub fn snapshot(&self) -> Option<Arc<AttendanceReport>> {
        let slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().map(|(_, report)| Arc::clone(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportMeta, ReportWindow};
    use chrono::{TimeZone, Utc};

    fn fixture(subject: &str) -> AttendanceReport {
        AttendanceReport {
            meta: ReportMeta {
                institution_id: "inst-1".to_string(),
                subject: subject.to_string(),
                year: "SE".to_string(),
                department: "Computer".to_string(),
                division: "-".to_string(),
                window: ReportWindow {
                    from: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
                    to: Utc.with_ymd_and_hms(2026, 8, 31, 0, 0, 0).unwrap(),
                },
                teacher_name: None,
            },
            columns: Vec::new(),
            rows: Vec::new(),
            dropped_mark_count: 0,
        }
    }

    #[test]
    fn newer_token_supersedes_older() {
        let seq = ReportSequencer::new();
        let first = seq.begin();
        assert!(seq.is_current(first));
        let second = seq.begin();
        assert!(!seq.is_current(first));
        assert!(seq.is_current(second));
    }

    #[test]
    fn stale_publish_is_discarded() {
        let seq = ReportSequencer::new();
        let latest = LatestReport::new();
        let first = seq.begin();
        let second = seq.begin();

        assert!(latest.publish(second, fixture("second")).is_some());
        assert!(latest.publish(first, fixture("first")).is_none());

        let snapshot = latest.snapshot().unwrap();
        assert_eq!(snapshot.meta.subject, "second");
    }

    #[tokio::test]
    async fn slow_first_request_cannot_overwrite_newer() {
        let seq = Arc::new(ReportSequencer::new());
        let latest = Arc::new(LatestReport::new());
        let (newer_done_tx, newer_done_rx) = tokio::sync::oneshot::channel::<()>();

        let first = seq.begin();
        let slow = {
            let seq = Arc::clone(&seq);
            let latest = Arc::clone(&latest);
            tokio::spawn(async move {
                // Simulated slow fetch: resolves only after the newer
                // request has already published.
                newer_done_rx.await.unwrap();
                assert!(!seq.is_current(first));
                assert!(latest.publish(first, fixture("first")).is_none());
            })
        };

        let second = seq.begin();
        assert!(latest.publish(second, fixture("second")).is_some());
        newer_done_tx.send(()).unwrap();
        slow.await.unwrap();

        assert_eq!(latest.snapshot().unwrap().meta.subject, "second");
    }
}
