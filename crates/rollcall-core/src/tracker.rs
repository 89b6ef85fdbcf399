//! Per-session attendance bookkeeping.
//!
//! Two independent maps: first-seen attendance (exported at session end) and
//! first-display instants (bounding how long an overlay stays on screen).
//! Both are first-write-wins.

use crate::types::Identity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a recognized face keeps its overlay after first display.
pub const DEFAULT_DISPLAY_TIME: Duration = Duration::from_secs(10);

/// Format of the `time` field in exported attendance.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("attendance file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("attendance json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One exported attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub name: String,
    pub time: String,
}

/// Exported attendance keyed by identifier.
pub type AttendanceSheet = BTreeMap<String, AttendanceEntry>;

#[derive(Debug)]
pub struct AttendanceTracker {
    attendance: AttendanceSheet,
    displayed: HashMap<String, Instant>,
    display_time: Duration,
}

impl Default for AttendanceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_TIME)
    }
}

impl AttendanceTracker {
    pub fn new(display_time: Duration) -> Self {
        Self {
            attendance: AttendanceSheet::new(),
            displayed: HashMap::new(),
            display_time,
        }
    }

    /// Record attendance unless the identity already has an entry.
    ///
    /// Returns `true` when a new entry was created.
    pub fn record_if_new(&mut self, identity: &Identity, seen_at: NaiveDateTime) -> bool {
        if self.attendance.contains_key(&identity.id) {
            return false;
        }
        self.attendance.insert(
            identity.id.clone(),
            AttendanceEntry {
                name: identity.name.clone(),
                time: seen_at.format(TIMESTAMP_FORMAT).to_string(),
            },
        );
        tracing::info!(id = %identity.id, name = %identity.name, "attendance recorded");
        true
    }

    /// Remember when the identity was first displayed. No-op if already known.
    pub fn mark_displayed(&mut self, identity: &Identity, at: Instant) -> bool {
        if self.displayed.contains_key(&identity.id) {
            return false;
        }
        self.displayed.insert(identity.id.clone(), at);
        true
    }

    /// Whether the overlay for `identity` should still be drawn at `now`.
    pub fn is_within_display_window(&self, identity: &Identity, now: Instant) -> bool {
        self.displayed
            .get(&identity.id)
            .is_some_and(|&first| now.saturating_duration_since(first) < self.display_time)
    }

    pub fn display_time(&self) -> Duration {
        self.display_time
    }

    pub fn attendance(&self) -> &AttendanceSheet {
        &self.attendance
    }

    pub fn len(&self) -> usize {
        self.attendance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attendance.is_empty()
    }

    /// Write the attendance map as pretty JSON, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> Result<(), ExportError> {
        write_sheet(&self.attendance, path)
    }
}

pub fn write_sheet(sheet: &AttendanceSheet, path: &Path) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(sheet)?;
    std::fs::write(path, json).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_sheet(path: &Path) -> Result<AttendanceSheet, ExportError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_record_if_new_keeps_first_timestamp() {
        let mut tracker = AttendanceTracker::default();
        let alice = Identity::new("101", "Alice");

        assert!(tracker.record_if_new(&alice, at(9, 0, 0)));
        assert!(!tracker.record_if_new(&alice, at(9, 5, 0)));

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.attendance()["101"].time, "2024-03-07 09:00:00");
        assert_eq!(tracker.attendance()["101"].name, "Alice");
    }

    #[test]
    fn test_display_window() {
        let mut tracker = AttendanceTracker::new(Duration::from_secs(10));
        let alice = Identity::new("101", "Alice");
        let t0 = Instant::now();

        assert!(!tracker.is_within_display_window(&alice, t0));
        assert!(tracker.mark_displayed(&alice, t0));
        assert!(tracker.is_within_display_window(&alice, t0));
        assert!(tracker.is_within_display_window(&alice, t0 + Duration::from_secs(9)));
        assert!(!tracker.is_within_display_window(&alice, t0 + Duration::from_secs(10)));
        assert!(!tracker.is_within_display_window(&alice, t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_mark_displayed_is_first_write_wins() {
        let mut tracker = AttendanceTracker::new(Duration::from_secs(10));
        let alice = Identity::new("101", "Alice");
        let t0 = Instant::now();

        tracker.mark_displayed(&alice, t0);
        assert!(!tracker.mark_displayed(&alice, t0 + Duration::from_secs(8)));
        assert!(!tracker.is_within_display_window(&alice, t0 + Duration::from_secs(12)));
    }

    #[test]
    fn test_display_does_not_gate_attendance() {
        let mut tracker = AttendanceTracker::new(Duration::from_secs(1));
        let bob = Identity::new("102", "Bob");
        tracker.mark_displayed(&bob, Instant::now());

        assert!(tracker.record_if_new(&bob, at(10, 0, 0)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_write_and_read_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.json");
        std::fs::write(&path, "stale").unwrap();

        let mut tracker = AttendanceTracker::default();
        tracker.record_if_new(&Identity::new("101", "Alice"), at(8, 30, 15));
        tracker.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"101": {"name": "Alice", "time": "2024-03-07 08:30:15"}})
        );

        let sheet = read_sheet(&path).unwrap();
        assert_eq!(&sheet, tracker.attendance());
    }
}
