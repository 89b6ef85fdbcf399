use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use rollcall_registry::{
    AttendanceCreate, AttendanceItem, ClassCreate, NewTeacher, Registry, RegistryConfig,
    StudentCreate, Teacher,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Environment variable read for the password of `login` and `teacher register`.
const PASSWORD_ENV: &str = "ROLLCALL_PASSWORD";

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance registry CLI", version)]
struct Cli {
    /// Bearer token from `rollcall login`
    #[arg(long, global = true, env = "ROLLCALL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Teacher accounts
    #[command(subcommand)]
    Teacher(TeacherCommand),
    /// Log in and print a bearer token (password from ROLLCALL_PASSWORD or stdin)
    Login {
        #[arg(long)]
        teacher_id: String,
    },
    /// Show the authenticated teacher
    Profile,
    /// Manage classes
    #[command(subcommand)]
    Class(ClassCommand),
    /// Manage students in a class
    #[command(subcommand)]
    Student(StudentCommand),
    /// Record and inspect attendance
    #[command(subcommand)]
    Attendance(AttendanceCommand),
    /// Per-student attendance report for a class
    Report {
        class_id: String,
    },
    /// Registry health check
    Health,
    /// List V4L2 capture devices
    Cameras,
}

#[derive(Subcommand)]
enum TeacherCommand {
    /// Create a teacher account (password from ROLLCALL_PASSWORD or stdin)
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        teacher_id: String,
        #[arg(long)]
        department: String,
    },
}

#[derive(Subcommand)]
enum ClassCommand {
    /// Create a class
    Create {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        semester: i64,
        #[arg(long)]
        class_name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List your classes
    List,
    /// Show one class
    Show { class_id: String },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Register a student in a class
    Add {
        class_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        usn: String,
        #[arg(long)]
        semester: i64,
        #[arg(long)]
        department: String,
    },
    /// List the students of a class
    List { class_id: String },
}

#[derive(Subcommand)]
enum AttendanceCommand {
    /// Mark attendance from a JSON array of {student_id, present, attentiveness_score?}
    Mark {
        class_id: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        records: PathBuf,
        /// Session length in minutes
        #[arg(long)]
        duration: Option<i64>,
    },
    /// Import a rollcall-session attendance export
    Import {
        class_id: String,
        /// Export file written by rollcall-session
        sheet: PathBuf,
        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Session length in minutes
        #[arg(long)]
        duration: Option<i64>,
    },
    /// List attendance records of a class
    List {
        class_id: String,
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let output = match cli.command {
        Commands::Cameras => cameras(),
        command => {
            let registry = Registry::open(&RegistryConfig::from_env())?;
            let password = std::env::var(PASSWORD_ENV).ok();
            dispatch(&registry, cli.token.as_deref(), password.as_deref(), command)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn authenticated(registry: &Registry, token: Option<&str>) -> Result<Teacher> {
    let token = token.context("not logged in: pass --token or set ROLLCALL_TOKEN")?;
    Ok(registry.authenticate(token)?)
}

/// The supplied password, or one line read from stdin after a prompt on stderr.
fn password(supplied: Option<&str>) -> Result<String> {
    if let Some(password) = supplied {
        return Ok(password.to_string());
    }
    eprint!("Password: ");
    std::io::stderr().flush()?;
    read_password(std::io::stdin().lock())
}

fn read_password(mut input: impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).context("reading password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("no password given: set {PASSWORD_ENV} or pipe it on stdin");
    }
    Ok(password.to_string())
}

fn dispatch(
    registry: &Registry,
    token: Option<&str>,
    supplied_password: Option<&str>,
    command: Commands,
) -> Result<Value> {
    let teacher = || authenticated(registry, token);

    match command {
        Commands::Teacher(TeacherCommand::Register {
            name,
            teacher_id,
            department,
        }) => {
            let id = registry.register_teacher(NewTeacher {
                name,
                teacher_id,
                department,
                password: password(supplied_password)?,
            })?;
            Ok(json!({ "message": "Teacher registered successfully", "teacher_id": id }))
        }
        Commands::Login { teacher_id } => {
            to_json(registry.login(&teacher_id, &password(supplied_password)?)?)
        }
        Commands::Profile => to_json(registry.profile(&teacher()?)),
        Commands::Class(ClassCommand::Create {
            subject,
            semester,
            class_name,
            description,
        }) => to_json(registry.create_class(
            &teacher()?,
            ClassCreate {
                subject,
                semester,
                class_name,
                description,
            },
        )?),
        Commands::Class(ClassCommand::List) => to_json(registry.list_classes(&teacher()?)?),
        Commands::Class(ClassCommand::Show { class_id }) => {
            to_json(registry.get_class(&teacher()?, &class_id)?)
        }
        Commands::Student(StudentCommand::Add {
            class_id,
            name,
            usn,
            semester,
            department,
        }) => to_json(registry.register_student(
            &teacher()?,
            &class_id,
            StudentCreate {
                name,
                usn,
                semester,
                department,
            },
        )?),
        Commands::Student(StudentCommand::List { class_id }) => {
            to_json(registry.list_students(&teacher()?, &class_id)?)
        }
        Commands::Attendance(AttendanceCommand::Mark {
            class_id,
            date,
            records,
            duration,
        }) => {
            let teacher = teacher()?;
            let raw = std::fs::read_to_string(&records)
                .with_context(|| format!("reading {}", records.display()))?;
            let records: Vec<AttendanceItem> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", records.display()))?;
            to_json(registry.mark_attendance(
                &teacher,
                &class_id,
                AttendanceCreate {
                    date,
                    records,
                    session_duration: duration,
                },
            )?)
        }
        Commands::Attendance(AttendanceCommand::Import {
            class_id,
            sheet,
            date,
            duration,
        }) => {
            let teacher = teacher()?;
            let attendance = rollcall_core::tracker::read_sheet(&sheet)?;
            let date = date.unwrap_or_else(|| {
                chrono::Local::now()
                    .date_naive()
                    .format("%Y-%m-%d")
                    .to_string()
            });
            to_json(registry.import_session(&teacher, &class_id, &date, duration, &attendance)?)
        }
        Commands::Attendance(AttendanceCommand::List { class_id, date }) => {
            to_json(registry.list_attendance(&teacher()?, &class_id, date.as_deref())?)
        }
        Commands::Report { class_id } => to_json(registry.class_report(&teacher()?, &class_id)?),
        Commands::Health => to_json(registry.health()),
        Commands::Cameras => Ok(cameras()),
    }
}

fn cameras() -> Value {
    let devices: Vec<Value> = Camera::list_devices()
        .into_iter()
        .map(|d| json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus }))
        .collect();
    tracing::debug!(count = devices.len(), "capture devices found");
    Value::Array(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::tracker::write_sheet;
    use rollcall_core::{AttendanceEntry, AttendanceSheet};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("rollcall").chain(args.iter().copied()))
    }

    fn run_as(
        registry: &Registry,
        token: Option<&str>,
        password: Option<&str>,
        args: &[&str],
    ) -> Result<Value> {
        let cli = parse(args)?;
        dispatch(registry, token.or(cli.token.as_deref()), password, cli.command)
    }

    fn run(registry: &Registry, token: Option<&str>, args: &[&str]) -> Result<Value> {
        run_as(registry, token, None, args)
    }

    fn register(registry: &Registry) {
        run_as(
            registry,
            None,
            Some("pw"),
            &["teacher", "register", "--name", "Ada", "--teacher-id", "T1", "--department", "CSE"],
        )
        .unwrap();
    }

    fn login(registry: &Registry) -> String {
        register(registry);
        let response =
            run_as(registry, None, Some("pw"), &["login", "--teacher-id", "T1"]).unwrap();
        response["access_token"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_password_flag_rejected() {
        assert!(parse(&["login", "--teacher-id", "T1", "--password", "pw"]).is_err());
        let register = ["teacher", "register", "--name", "Ada", "--teacher-id", "T1"];
        let mut with_password = register.to_vec();
        with_password.extend(["--department", "CSE", "--password", "pw"]);
        assert!(parse(&with_password).is_err());
    }

    #[test]
    fn test_login_uses_supplied_password() {
        let registry = Registry::in_memory().unwrap();
        register(&registry);

        let wrong = run_as(&registry, None, Some("nope"), &["login", "--teacher-id", "T1"]);
        assert!(wrong.is_err());
        let ok = run_as(&registry, None, Some("pw"), &["login", "--teacher-id", "T1"]).unwrap();
        assert!(ok["access_token"].is_string());
    }

    #[test]
    fn test_read_password_from_line() {
        let read = |input: &str| read_password(std::io::Cursor::new(input.as_bytes().to_vec()));
        assert_eq!(read("s3cret\n").unwrap(), "s3cret");
        assert_eq!(read("with space\r\n").unwrap(), "with space");
        assert!(read("\n").is_err());
        assert!(read("").is_err());
    }

    #[test]
    fn test_requires_token() {
        let registry = Registry::in_memory().unwrap();
        let err = run(&registry, None, &["class", "list"]).unwrap_err();
        assert!(err.to_string().contains("not logged in"));
        assert!(run(&registry, Some("bogus"), &["profile"]).is_err());
    }

    #[test]
    fn test_session_import_flow() {
        let registry = Registry::in_memory().unwrap();
        let token = login(&registry);
        let t = Some(token.as_str());

        let class = run(
            &registry,
            t,
            &["class", "create", "--subject", "DBMS", "--semester", "5", "--class-name", "5A"],
        )
        .unwrap();
        let class_id = class["id"].as_str().unwrap().to_string();

        for (name, usn) in [("Alice", "101"), ("Bob", "102")] {
            run(
                &registry,
                t,
                &[
                    "student", "add", &class_id, "--name", name, "--usn", usn, "--semester", "5",
                    "--department", "CSE",
                ],
            )
            .unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let sheet_path = dir.path().join("attendance.json");
        let mut sheet = AttendanceSheet::new();
        sheet.insert(
            "101".into(),
            AttendanceEntry {
                name: "Alice".into(),
                time: "2024-03-07 09:00:00".into(),
            },
        );
        write_sheet(&sheet, &sheet_path).unwrap();

        let receipt = run(
            &registry,
            t,
            &[
                "attendance",
                "import",
                &class_id,
                sheet_path.to_str().unwrap(),
                "--date",
                "2024-03-07",
            ],
        )
        .unwrap();
        assert_eq!(receipt["records_count"], 2);

        let report = run(&registry, t, &["report", &class_id]).unwrap();
        let rows = report.as_array().unwrap();
        let alice = rows.iter().find(|r| r["student_usn"] == "101").unwrap();
        let bob = rows.iter().find(|r| r["student_usn"] == "102").unwrap();
        assert_eq!(alice["attendance_percentage"], 100.0);
        assert_eq!(bob["attendance_percentage"], 0.0);
    }

    #[test]
    fn test_mark_from_records_file() {
        let registry = Registry::in_memory().unwrap();
        let token = login(&registry);
        let t = Some(token.as_str());

        let class = run(
            &registry,
            t,
            &["class", "create", "--subject", "OS", "--semester", "5", "--class-name", "5B"],
        )
        .unwrap();
        let class_id = class["id"].as_str().unwrap().to_string();
        let student = run(
            &registry,
            t,
            &[
                "student", "add", &class_id, "--name", "Alice", "--usn", "101", "--semester", "5",
                "--department", "CSE",
            ],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.json");
        std::fs::write(
            &records,
            json!([{ "student_id": student["id"], "present": true, "attentiveness_score": 0.9 }])
                .to_string(),
        )
        .unwrap();

        run(
            &registry,
            t,
            &[
                "attendance",
                "mark",
                &class_id,
                "--date",
                "2024-03-07",
                "--records",
                records.to_str().unwrap(),
                "--duration",
                "45",
            ],
        )
        .unwrap();

        let listed = run(
            &registry,
            t,
            &["attendance", "list", &class_id, "--date", "2024-03-07"],
        )
        .unwrap();
        assert_eq!(listed[0]["student_usn"], "101");
        assert_eq!(listed[0]["session_duration"], 45);
    }
}
