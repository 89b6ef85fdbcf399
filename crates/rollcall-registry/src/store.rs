//! SQLite persistence for the four registry collections plus issued tokens.
//!
//! Every record is keyed by a generated uuid. Cross-collection checks are the
//! caller's concern; this layer only reads and writes rows.

use crate::models::{AttendanceView, ClassRecord, StudentRecord, Teacher};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS teachers (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    teacher_id    TEXT NOT NULL UNIQUE,
    department    TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tokens (
    token       TEXT PRIMARY KEY,
    teacher_ref TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS classes (
    id          TEXT PRIMARY KEY,
    subject     TEXT NOT NULL,
    semester    INTEGER NOT NULL,
    class_name  TEXT NOT NULL,
    description TEXT,
    teacher_ref TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS students (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    usn           TEXT NOT NULL,
    semester      INTEGER NOT NULL,
    department    TEXT NOT NULL,
    class_ref     TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    UNIQUE (class_ref, usn)
);
CREATE TABLE IF NOT EXISTS attendance (
    id                  TEXT PRIMARY KEY,
    student_ref         TEXT NOT NULL,
    class_ref           TEXT NOT NULL,
    date                TEXT NOT NULL,
    present             INTEGER NOT NULL,
    attentiveness_score REAL NOT NULL,
    session_duration    INTEGER NOT NULL,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_by_class ON attendance (class_ref, date);
";

/// Attendance row as inserted.
#[derive(Debug, Clone)]
pub struct NewAttendanceRow {
    pub id: String,
    pub student_ref: String,
    pub present: bool,
    pub attentiveness_score: f64,
}

/// The fields report aggregation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendanceMark {
    pub present: bool,
    pub attentiveness_score: f64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // --- teachers ---

    pub fn insert_teacher(&self, teacher: &Teacher) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO teachers (id, name, teacher_id, department, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                teacher.id,
                teacher.name,
                teacher.teacher_id,
                teacher.department,
                teacher.password_hash,
                teacher.created_at
            ],
        )?;
        Ok(())
    }

    pub fn teacher_by_login(&self, teacher_id: &str) -> rusqlite::Result<Option<Teacher>> {
        self.conn
            .query_row(
                "SELECT id, name, teacher_id, department, password_hash, created_at
                 FROM teachers WHERE teacher_id = ?1",
                [teacher_id],
                teacher_from_row,
            )
            .optional()
    }

    pub fn teacher(&self, id: &str) -> rusqlite::Result<Option<Teacher>> {
        self.conn
            .query_row(
                "SELECT id, name, teacher_id, department, password_hash, created_at
                 FROM teachers WHERE id = ?1",
                [id],
                teacher_from_row,
            )
            .optional()
    }

    // --- tokens ---

    pub fn insert_token(
        &self,
        token: &str,
        teacher_ref: &str,
        expires_at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO tokens (token, teacher_ref, expires_at) VALUES (?1, ?2, ?3)",
            params![token, teacher_ref, expires_at],
        )?;
        Ok(())
    }

    /// Teacher reference and expiry for a token.
    pub fn token(&self, token: &str) -> rusqlite::Result<Option<(String, DateTime<Utc>)>> {
        self.conn
            .query_row(
                "SELECT teacher_ref, expires_at FROM tokens WHERE token = ?1",
                [token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    pub fn purge_tokens(&self, now: DateTime<Utc>) -> rusqlite::Result<usize> {
        self.conn
            .execute("DELETE FROM tokens WHERE expires_at <= ?1", params![now])
    }

    // --- classes ---

    pub fn insert_class(&self, class: &ClassRecord) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO classes (id, subject, semester, class_name, description, teacher_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                class.id,
                class.subject,
                class.semester,
                class.class_name,
                class.description,
                class.teacher_id,
                class.created_at
            ],
        )?;
        Ok(())
    }

    pub fn classes_for_teacher(
        &self,
        teacher_ref: &str,
        limit: usize,
    ) -> rusqlite::Result<Vec<ClassRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject, semester, class_name, description, teacher_ref, created_at
             FROM classes WHERE teacher_ref = ?1 ORDER BY created_at, id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![teacher_ref, limit as i64], class_from_row)?;
        rows.collect()
    }

    /// A class, only if it belongs to `teacher_ref`.
    pub fn owned_class(
        &self,
        class_id: &str,
        teacher_ref: &str,
    ) -> rusqlite::Result<Option<ClassRecord>> {
        self.conn
            .query_row(
                "SELECT id, subject, semester, class_name, description, teacher_ref, created_at
                 FROM classes WHERE id = ?1 AND teacher_ref = ?2",
                [class_id, teacher_ref],
                class_from_row,
            )
            .optional()
    }

    // --- students ---

    pub fn insert_student(&self, student: &StudentRecord) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO students (id, name, usn, semester, department, class_ref, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                student.id,
                student.name,
                student.usn,
                student.semester,
                student.department,
                student.class_id,
                student.registered_at
            ],
        )?;
        Ok(())
    }

    pub fn student_by_usn(
        &self,
        class_ref: &str,
        usn: &str,
    ) -> rusqlite::Result<Option<StudentRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, usn, semester, department, class_ref, registered_at
                 FROM students WHERE class_ref = ?1 AND usn = ?2",
                [class_ref, usn],
                student_from_row,
            )
            .optional()
    }

    pub fn students_in_class(
        &self,
        class_ref: &str,
        limit: usize,
    ) -> rusqlite::Result<Vec<StudentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, usn, semester, department, class_ref, registered_at
             FROM students WHERE class_ref = ?1 ORDER BY registered_at, id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![class_ref, limit as i64], student_from_row)?;
        rows.collect()
    }

    // --- attendance ---

    /// Insert a batch in a single transaction.
    pub fn insert_attendance(
        &self,
        class_ref: &str,
        date: &str,
        session_duration: i64,
        created_at: DateTime<Utc>,
        rows: &[NewAttendanceRow],
    ) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance
                 (id, student_ref, class_ref, date, present, attentiveness_score, session_duration, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.id,
                    row.student_ref,
                    class_ref,
                    date,
                    row.present,
                    row.attentiveness_score,
                    session_duration,
                    created_at
                ])?;
            }
        }
        tx.commit()
    }

    /// Attendance for a class joined with student details. Rows whose student
    /// no longer exists are left out.
    pub fn attendance_for_class(
        &self,
        class_ref: &str,
        date: Option<&str>,
        limit: usize,
    ) -> rusqlite::Result<Vec<AttendanceView>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, s.name, s.usn, a.date, a.present, a.attentiveness_score, a.session_duration
             FROM attendance a JOIN students s ON s.id = a.student_ref
             WHERE a.class_ref = ?1 AND (?2 IS NULL OR a.date = ?2)
             ORDER BY a.date, a.created_at, a.id
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![class_ref, date, limit as i64], |row| {
            Ok(AttendanceView {
                id: row.get(0)?,
                student_name: row.get(1)?,
                student_usn: row.get(2)?,
                date: row.get(3)?,
                present: row.get(4)?,
                attentiveness_score: row.get(5)?,
                session_duration: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    pub fn marks_for_student(
        &self,
        class_ref: &str,
        student_ref: &str,
    ) -> rusqlite::Result<Vec<AttendanceMark>> {
        let mut stmt = self.conn.prepare(
            "SELECT present, attentiveness_score FROM attendance
             WHERE class_ref = ?1 AND student_ref = ?2",
        )?;
        let rows = stmt.query_map([class_ref, student_ref], |row| {
            Ok(AttendanceMark {
                present: row.get(0)?,
                attentiveness_score: row.get(1)?,
            })
        })?;
        rows.collect()
    }
}

fn teacher_from_row(row: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: row.get(0)?,
        name: row.get(1)?,
        teacher_id: row.get(2)?,
        department: row.get(3)?,
        password_hash: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<ClassRecord> {
    Ok(ClassRecord {
        id: row.get(0)?,
        subject: row.get(1)?,
        semester: row.get(2)?,
        class_name: row.get(3)?,
        description: row.get(4)?,
        teacher_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        usn: row.get(2)?,
        semester: row.get(3)?,
        department: row.get(4)?,
        class_id: row.get(5)?,
        registered_at: row.get(6)?,
    })
}
