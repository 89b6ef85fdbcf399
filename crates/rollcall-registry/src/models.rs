use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored teacher account. The password hash never leaves the registry.
#[derive(Debug, Clone)]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    pub department: String,
    pub(crate) password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Teacher {
    pub fn profile(&self) -> TeacherProfile {
        TeacherProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            teacher_id: self.teacher_id.clone(),
            department: self.department.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeacher {
    pub name: String,
    pub teacher_id: String,
    pub department: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherProfile {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub teacher: TeacherProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCreate {
    pub subject: String,
    pub semester: i64,
    pub class_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: String,
    pub subject: String,
    pub semester: i64,
    pub class_name: String,
    pub description: Option<String>,
    pub teacher_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentCreate {
    pub name: String,
    pub usn: String,
    pub semester: i64,
    pub department: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub usn: String,
    pub semester: i64,
    pub department: String,
    pub class_id: String,
    pub registered_at: DateTime<Utc>,
}

/// One student's entry in an attendance submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceItem {
    pub student_id: String,
    pub present: bool,
    #[serde(default)]
    pub attentiveness_score: Option<f64>,
}

/// A batch of attendance for one class on one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceCreate {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub records: Vec<AttendanceItem>,
    /// Minutes.
    #[serde(default)]
    pub session_duration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceReceipt {
    pub message: String,
    pub records_count: usize,
}

/// An attendance row joined with its student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceView {
    pub id: String,
    pub student_name: String,
    pub student_usn: String,
    pub date: String,
    pub present: bool,
    pub attentiveness_score: f64,
    pub session_duration: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentReport {
    pub student_id: String,
    pub student_name: String,
    pub student_usn: String,
    pub attendance_percentage: f64,
    pub average_attentiveness: f64,
    pub total_classes: usize,
    pub present_classes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
