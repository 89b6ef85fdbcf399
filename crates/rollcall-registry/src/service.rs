use crate::auth;
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::models::*;
use crate::report;
use crate::store::{NewAttendanceRow, Store};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rollcall_core::AttendanceSheet;
use uuid::Uuid;

/// Cap on classes and students returned by list calls.
pub const LIST_LIMIT: usize = 100;
/// Cap on attendance rows returned by a list call.
pub const ATTENDANCE_LIST_LIMIT: usize = 1000;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Teacher, class, student and attendance operations.
///
/// Ownership checks and the writes that follow them are separate statements;
/// concurrent writers are not serialized against each other.
pub struct Registry {
    store: Store,
    token_ttl: Duration,
}

impl Registry {
    pub fn new(store: Store, token_ttl: Duration) -> Self {
        Self { store, token_ttl }
    }

    pub fn open(config: &RegistryConfig) -> Result<Self, RegistryError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Store::open(&config.db_path)?;
        tracing::debug!(path = %config.db_path.display(), "registry opened");
        Ok(Self::new(store, Duration::minutes(config.token_ttl_mins)))
    }

    pub fn in_memory() -> Result<Self, RegistryError> {
        Ok(Self::new(
            Store::open_in_memory()?,
            Duration::minutes(auth::DEFAULT_TOKEN_TTL_MINS),
        ))
    }

    // --- auth ---

    /// Create a teacher account, returning its generated id.
    pub fn register_teacher(&self, new: NewTeacher) -> Result<String, RegistryError> {
        if self.store.teacher_by_login(&new.teacher_id)?.is_some() {
            return Err(RegistryError::Conflict("Teacher ID already exists".into()));
        }

        let teacher = Teacher {
            id: new_id(),
            name: new.name,
            teacher_id: new.teacher_id,
            department: new.department,
            password_hash: auth::hash_password(&new.password)?,
            created_at: Utc::now(),
        };
        self.store.insert_teacher(&teacher)?;
        tracing::info!(id = %teacher.id, teacher_id = %teacher.teacher_id, "teacher registered");
        Ok(teacher.id)
    }

    pub fn login(&self, teacher_id: &str, password: &str) -> Result<LoginResponse, RegistryError> {
        self.login_at(teacher_id, password, Utc::now())
    }

    fn login_at(
        &self,
        teacher_id: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginResponse, RegistryError> {
        let teacher = self
            .store
            .teacher_by_login(teacher_id)?
            .filter(|t| auth::verify_password(password, &t.password_hash))
            .ok_or(RegistryError::Unauthorized("invalid credentials"))?;

        self.store.purge_tokens(now)?;
        let token = auth::new_token();
        self.store.insert_token(&token, &teacher.id, now + self.token_ttl)?;
        tracing::info!(teacher_id, "login succeeded");

        Ok(LoginResponse {
            access_token: token,
            token_type: "bearer".into(),
            teacher: teacher.profile(),
        })
    }

    /// Resolve a bearer token to its teacher.
    pub fn authenticate(&self, token: &str) -> Result<Teacher, RegistryError> {
        self.authenticate_at(token, Utc::now())
    }

    fn authenticate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Teacher, RegistryError> {
        let (teacher_ref, expires_at) = self
            .store
            .token(token)?
            .ok_or(RegistryError::Unauthorized("invalid authentication"))?;
        if expires_at <= now {
            return Err(RegistryError::Unauthorized("token expired"));
        }
        self.store
            .teacher(&teacher_ref)?
            .ok_or(RegistryError::Unauthorized("teacher not found"))
    }

    pub fn profile(&self, teacher: &Teacher) -> TeacherProfile {
        teacher.profile()
    }

    // --- classes ---

    pub fn create_class(
        &self,
        teacher: &Teacher,
        class: ClassCreate,
    ) -> Result<ClassRecord, RegistryError> {
        let record = ClassRecord {
            id: new_id(),
            subject: class.subject,
            semester: class.semester,
            class_name: class.class_name,
            description: class.description,
            teacher_id: teacher.id.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_class(&record)?;
        tracing::info!(id = %record.id, class_name = %record.class_name, "class created");
        Ok(record)
    }

    pub fn list_classes(&self, teacher: &Teacher) -> Result<Vec<ClassRecord>, RegistryError> {
        Ok(self.store.classes_for_teacher(&teacher.id, LIST_LIMIT)?)
    }

    /// A class owned by `teacher`; classes of other teachers are not found.
    pub fn get_class(
        &self,
        teacher: &Teacher,
        class_id: &str,
    ) -> Result<ClassRecord, RegistryError> {
        self.store
            .owned_class(class_id, &teacher.id)?
            .ok_or(RegistryError::NotFound("class"))
    }

    // --- students ---

    pub fn register_student(
        &self,
        teacher: &Teacher,
        class_id: &str,
        student: StudentCreate,
    ) -> Result<StudentRecord, RegistryError> {
        let class = self.get_class(teacher, class_id)?;
        if self.store.student_by_usn(&class.id, &student.usn)?.is_some() {
            return Err(RegistryError::Conflict(
                "Student already registered in this class".into(),
            ));
        }

        let record = StudentRecord {
            id: new_id(),
            name: student.name,
            usn: student.usn,
            semester: student.semester,
            department: student.department,
            class_id: class.id,
            registered_at: Utc::now(),
        };
        self.store.insert_student(&record)?;
        tracing::info!(id = %record.id, usn = %record.usn, class_id, "student registered");
        Ok(record)
    }

    pub fn list_students(
        &self,
        teacher: &Teacher,
        class_id: &str,
    ) -> Result<Vec<StudentRecord>, RegistryError> {
        let class = self.get_class(teacher, class_id)?;
        Ok(self.store.students_in_class(&class.id, LIST_LIMIT)?)
    }

    // --- attendance ---

    pub fn mark_attendance(
        &self,
        teacher: &Teacher,
        class_id: &str,
        batch: AttendanceCreate,
    ) -> Result<AttendanceReceipt, RegistryError> {
        let class = self.get_class(teacher, class_id)?;
        validate_date(&batch.date)?;

        let rows: Vec<NewAttendanceRow> = batch
            .records
            .into_iter()
            .map(|item| NewAttendanceRow {
                id: new_id(),
                student_ref: item.student_id,
                present: item.present,
                attentiveness_score: item.attentiveness_score.unwrap_or(0.0),
            })
            .collect();

        if !rows.is_empty() {
            self.store.insert_attendance(
                &class.id,
                &batch.date,
                batch.session_duration.unwrap_or(0),
                Utc::now(),
                &rows,
            )?;
        }
        tracing::info!(class_id, date = %batch.date, records = rows.len(), "attendance marked");

        Ok(AttendanceReceipt {
            message: "Attendance marked successfully".into(),
            records_count: rows.len(),
        })
    }

    /// Record a recognition session for a class: every student on the roster
    /// is marked, present iff their USN appears in `sheet`.
    pub fn import_session(
        &self,
        teacher: &Teacher,
        class_id: &str,
        date: &str,
        session_duration: Option<i64>,
        sheet: &AttendanceSheet,
    ) -> Result<AttendanceReceipt, RegistryError> {
        let students = self.list_students(teacher, class_id)?;
        let records = report::items_from_sheet(&students, sheet);

        let unknown = sheet
            .keys()
            .filter(|usn| !students.iter().any(|s| &s.usn == *usn))
            .count();
        if unknown > 0 {
            tracing::warn!(class_id, unknown, "recognized identities not on the class roster");
        }

        self.mark_attendance(
            teacher,
            class_id,
            AttendanceCreate {
                date: date.to_string(),
                records,
                session_duration,
            },
        )
    }

    pub fn list_attendance(
        &self,
        teacher: &Teacher,
        class_id: &str,
        date: Option<&str>,
    ) -> Result<Vec<AttendanceView>, RegistryError> {
        let class = self.get_class(teacher, class_id)?;
        Ok(self
            .store
            .attendance_for_class(&class.id, date, ATTENDANCE_LIST_LIMIT)?)
    }

    pub fn class_report(
        &self,
        teacher: &Teacher,
        class_id: &str,
    ) -> Result<Vec<StudentReport>, RegistryError> {
        let class = self.get_class(teacher, class_id)?;
        let students = self.store.students_in_class(&class.id, LIST_LIMIT)?;

        students
            .iter()
            .map(|student| -> Result<StudentReport, RegistryError> {
                let marks = self.store.marks_for_student(&class.id, &student.id)?;
                Ok(report::summarize(student, &marks))
            })
            .collect()
    }

    pub fn health(&self) -> Health {
        Health {
            status: "healthy".into(),
            timestamp: Utc::now(),
        }
    }
}

fn validate_date(date: &str) -> Result<(), RegistryError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| RegistryError::InvalidInput(format!("date must be YYYY-MM-DD, got {date:?}")))
}
