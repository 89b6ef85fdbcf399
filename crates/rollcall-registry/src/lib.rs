//! Teacher accounts, classes, student rosters and attendance records.
//!
//! Everything is scoped to an authenticated teacher: classes belong to the
//! teacher who created them, and students and attendance belong to a class.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod report;
pub mod service;
pub mod store;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use models::{
    AttendanceCreate, AttendanceItem, AttendanceReceipt, AttendanceView, ClassCreate, ClassRecord,
    Health, LoginResponse, NewTeacher, StudentCreate, StudentRecord, StudentReport, Teacher,
    TeacherProfile,
};
pub use service::Registry;
