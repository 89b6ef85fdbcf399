//! Per-student attendance aggregation and session import.

use crate::models::{AttendanceItem, StudentRecord, StudentReport};
use crate::store::AttendanceMark;
use rollcall_core::AttendanceSheet;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Summarize one student's attendance history.
///
/// Percentage is present/total; average attentiveness covers present
/// sessions only. Both are zero without data and rounded to two decimals.
pub fn summarize(student: &StudentRecord, marks: &[AttendanceMark]) -> StudentReport {
    let total = marks.len();
    let present: Vec<f64> = marks
        .iter()
        .filter(|m| m.present)
        .map(|m| m.attentiveness_score)
        .collect();

    let percentage = if total > 0 {
        present.len() as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let average = if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    };

    StudentReport {
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        student_usn: student.usn.clone(),
        attendance_percentage: round2(percentage),
        average_attentiveness: round2(average),
        total_classes: total,
        present_classes: present.len(),
    }
}

/// Turn a recognition session export into a batch for a class roster:
/// a student is present iff their USN was recognized.
pub fn items_from_sheet(
    students: &[StudentRecord],
    sheet: &AttendanceSheet,
) -> Vec<AttendanceItem> {
    students
        .iter()
        .map(|s| AttendanceItem {
            student_id: s.id.clone(),
            present: sheet.contains_key(&s.usn),
            attentiveness_score: None,
        })
        .collect()
}
