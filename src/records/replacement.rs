//! Replacement Records
//!
//! A replacement ticket tracks one disk swap for one chunkserver from the
//! moment an operator names the new device until formatting completes.
//!
//! ```text
//!   absent ──replace──▶ pending ──commit──▶ running ──100%──▶ done
//!                          │                   │
//!                          └──────stop─────────┴──▶ absent
//! ```

use crate::domain::ports::FormatReport;
use crate::records::disk::DiskRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Status
// =============================================================================

/// Lifecycle state of a replacement ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementStatus {
    /// Ticket created, device not yet committed
    Pending,
    /// New device committed and formatting
    Running,
    /// Formatting finished
    Done,
}

impl ReplacementStatus {
    /// Whether the ticket still holds the cluster-wide replacement slot
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ReplacementStatus::Pending | ReplacementStatus::Running)
    }
}

impl fmt::Display for ReplacementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementStatus::Pending => write!(f, "pending"),
            ReplacementStatus::Running => write!(f, "running"),
            ReplacementStatus::Done => write!(f, "done"),
        }
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Parse a `current/target` formatted-units string into a floored percentage
///
/// Missing or malformed input and a zero target yield 0: formatting may not
/// have started reporting yet. The result is capped at 100.
pub fn parse_progress(raw: Option<&str>) -> u8 {
    let Some(raw) = raw else {
        return 0;
    };
    let Some((current, target)) = raw.trim().split_once('/') else {
        return 0;
    };
    let (Ok(current), Ok(target)) = (current.trim().parse::<u64>(), target.trim().parse::<u64>())
    else {
        return 0;
    };
    if target == 0 {
        return 0;
    }
    let percent = (current as u128 * 100) / target as u128;
    percent.min(100) as u8
}

// =============================================================================
// Replacement Ticket
// =============================================================================

/// Durable ticket for one disk swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    /// Chunkserver the swap is for
    pub service_id: String,
    /// Host of the chunkserver
    pub host: String,
    /// Device being replaced
    pub old_device: String,
    /// Device replacing it
    pub new_device: String,
    /// Physical-disk id of the old device, if one was recorded
    pub old_disk_id: Option<String>,
    /// Snapshot of the old disk record taken when the ticket was created
    pub previous: DiskRecord,
    /// Whether a record for the new device existed before the swap
    #[serde(default)]
    pub new_record_preexisted: bool,
    pub status: ReplacementStatus,
    /// Formatting progress, 0-100
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Replacement {
    /// Open a pending ticket replacing `previous` with `new_device`
    pub fn new(service_id: impl Into<String>, previous: DiskRecord, new_device: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            service_id: service_id.into(),
            host: previous.host.clone(),
            old_device: previous.device.clone(),
            new_device: new_device.into(),
            old_disk_id: previous.disk_id().map(str::to_string),
            previous,
            new_record_preexisted: false,
            status: ReplacementStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The new device has been committed into the topology
    pub fn mark_running(&mut self) {
        if self.status == ReplacementStatus::Pending {
            self.status = ReplacementStatus::Running;
            self.updated_at = Utc::now();
        }
    }

    /// Fold a format status report into the ticket
    ///
    /// Returns whether the ticket changed. Only a `running` ticket moves:
    /// a `pending` ticket has not committed its device yet and `done` is
    /// terminal.
    pub fn apply_progress(&mut self, report: &FormatReport) -> bool {
        if self.status != ReplacementStatus::Running {
            return false;
        }

        let percent = parse_progress(report.progress.as_deref());
        let (status, progress) = if report.finished || percent >= 100 {
            (ReplacementStatus::Done, 100)
        } else {
            (ReplacementStatus::Running, percent)
        };

        if status == self.status && progress == self.progress {
            return false;
        }
        self.status = status;
        self.progress = progress;
        self.updated_at = Utc::now();
        true
    }
}

/// Query over replacement tickets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementFilter {
    /// Every ticket
    All,
    /// Tickets of one chunkserver
    Service(String),
    /// Tickets in `pending` or `running`
    InFlight,
}

impl ReplacementFilter {
    /// Whether a ticket satisfies this filter
    pub fn matches(&self, ticket: &Replacement) -> bool {
        match self {
            ReplacementFilter::All => true,
            ReplacementFilter::Service(id) => &ticket.service_id == id,
            ReplacementFilter::InFlight => ticket.status.is_in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::disk::DiskUri;

    fn ticket() -> Replacement {
        let mut old = DiskRecord::new("h1", "/dev/sdb", "/data/cs0", "img", 90);
        old.service_id = Some("cs-1".into());
        old.uri = Some(DiskUri::fs_uuid("A"));
        Replacement::new("cs-1", old, "/dev/sdc")
    }

    fn report(progress: Option<&str>, finished: bool) -> FormatReport {
        FormatReport {
            progress: progress.map(str::to_string),
            finished,
        }
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress(Some("50/100")), 50);
        assert_eq!(parse_progress(Some("1/3")), 33);
        assert_eq!(parse_progress(Some("2/3")), 66);
        assert_eq!(parse_progress(Some(" 10 / 10 ")), 100);
        assert_eq!(parse_progress(Some("12/10")), 100);
    }

    #[test]
    fn test_parse_progress_degenerate_is_zero() {
        assert_eq!(parse_progress(None), 0);
        assert_eq!(parse_progress(Some("")), 0);
        assert_eq!(parse_progress(Some("5/0")), 0);
        assert_eq!(parse_progress(Some("abc")), 0);
        assert_eq!(parse_progress(Some("x/10")), 0);
    }

    #[test]
    fn test_new_ticket_captures_old_identity() {
        let t = ticket();
        assert_eq!(t.status, ReplacementStatus::Pending);
        assert_eq!(t.old_device, "/dev/sdb");
        assert_eq!(t.host, "h1");
        assert_eq!(t.old_disk_id.as_deref(), Some("A"));
        assert_eq!(t.progress, 0);
    }

    #[test]
    fn test_progress_transitions() {
        let mut t = ticket();
        t.mark_running();

        assert!(!t.apply_progress(&report(None, false)));
        assert_eq!(t.status, ReplacementStatus::Running);

        assert!(t.apply_progress(&report(Some("25/100"), false)));
        assert_eq!(t.status, ReplacementStatus::Running);
        assert_eq!(t.progress, 25);

        assert!(t.apply_progress(&report(Some("100/100"), false)));
        assert_eq!(t.status, ReplacementStatus::Done);
        assert_eq!(t.progress, 100);
    }

    #[test]
    fn test_finished_flag_completes() {
        let mut t = ticket();
        t.mark_running();
        assert!(t.apply_progress(&report(Some("3/10"), true)));
        assert_eq!(t.status, ReplacementStatus::Done);
        assert_eq!(t.progress, 100);
    }

    #[test]
    fn test_pending_ticket_ignores_reports() {
        let mut t = ticket();
        assert!(!t.apply_progress(&report(Some("40/100"), false)));
        assert!(!t.apply_progress(&report(Some("1024/1024"), true)));
        assert_eq!(t.status, ReplacementStatus::Pending);
        assert_eq!(t.progress, 0);
    }

    #[test]
    fn test_done_is_terminal() {
        let mut t = ticket();
        t.mark_running();
        t.apply_progress(&report(None, true));
        assert_eq!(t.status, ReplacementStatus::Done);

        for r in [report(Some("1/100"), false), report(None, false), report(Some("0/0"), true)] {
            assert!(!t.apply_progress(&r));
            assert_eq!(t.status, ReplacementStatus::Done);
            assert_eq!(t.progress, 100);
        }
    }

    #[test]
    fn test_filters() {
        let mut t = ticket();
        assert!(ReplacementFilter::InFlight.matches(&t));
        assert!(ReplacementFilter::Service("cs-1".into()).matches(&t));
        assert!(!ReplacementFilter::Service("cs-2".into()).matches(&t));

        t.mark_running();
        t.apply_progress(&report(None, true));
        assert!(!ReplacementFilter::InFlight.matches(&t));
        assert!(ReplacementFilter::All.matches(&t));
    }
}
