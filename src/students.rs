use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::audit;

pub const MARKS_MIN: i64 = 0;
pub const MARKS_MAX: i64 = 100;
/// Upper bound on `name` and `subject`, in characters.
pub const LABEL_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub marks: i64,
}

/// Domain failure carrying the envelope error code it surfaces as.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentsError {
    pub code: &'static str,
    pub message: String,
}

impl StudentsError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::DatabaseBusy
                || f.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn db_err(code: &'static str, e: rusqlite::Error) -> StudentsError {
    if is_busy(&e) {
        StudentsError::new("db_busy", "database is busy")
    } else {
        StudentsError::new(code, e.to_string())
    }
}

/// Take the write lock up front so read-modify-write cycles in other
/// portal processes queue behind this one instead of racing it.
fn begin_immediate(conn: &Connection) -> Result<Transaction<'_>, StudentsError> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| db_err("db_tx_failed", e))
}

pub fn list(conn: &Connection) -> Result<Vec<Student>, StudentsError> {
    let mut stmt = conn
        .prepare("SELECT id, name, subject, marks FROM students ORDER BY name, subject")
        .map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map([], |r| {
        Ok(Student {
            id: r.get(0)?,
            name: r.get(1)?,
            subject: r.get(2)?,
            marks: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err("db_query_failed", e))
}

/// Add marks for a (name, subject) identity. Creates the row when it does
/// not exist yet, otherwise adds `marks` onto the stored total; neither the
/// initial value nor the new total may pass 100. Returns the row plus
/// whether it was created.
pub fn upsert_increment(
    conn: &Connection,
    teacher_id: &str,
    name: &str,
    subject: &str,
    marks: i64,
) -> Result<(Student, bool), StudentsError> {
    // A negative delta could drag an existing total below zero; checked
    // here before the lock so the stored range never depends on the caller.
    if marks < MARKS_MIN {
        return Err(StudentsError::new(
            "bad_params",
            "Marks must be an integer between 0 and 100.",
        ));
    }

    let tx = begin_immediate(conn)?;

    let existing = tx
        .query_row(
            "SELECT id, marks FROM students WHERE name = ? AND subject = ?",
            (name, subject),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;

    let (student, created) = match existing {
        Some((id, old)) => {
            let new_total = old + marks;
            if new_total > MARKS_MAX {
                return Err(StudentsError::new(
                    "marks_conflict",
                    "Total marks cannot exceed 100.",
                ));
            }
            tx.execute(
                "UPDATE students SET marks = ? WHERE id = ?",
                (new_total, &id),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            audit::record(
                &tx,
                Some(teacher_id),
                "update",
                &format!(
                    "Incremented \"{}-{}\" from {} by {} -> {}",
                    name, subject, old, marks, new_total
                ),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            (
                Student {
                    id,
                    name: name.to_string(),
                    subject: subject.to_string(),
                    marks: new_total,
                },
                false,
            )
        }
        None => {
            if marks > MARKS_MAX {
                return Err(StudentsError::new(
                    "marks_conflict",
                    "Marks cannot exceed 100.",
                ));
            }
            let id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO students(id, name, subject, marks) VALUES(?, ?, ?, ?)",
                (&id, name, subject, marks),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            audit::record(
                &tx,
                Some(teacher_id),
                "create",
                &format!("Created \"{}-{}\" with {}", name, subject, marks),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            (
                Student {
                    id,
                    name: name.to_string(),
                    subject: subject.to_string(),
                    marks,
                },
                true,
            )
        }
    };

    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;
    Ok((student, created))
}

/// Overwrite a student's marks. The range check runs before the row
/// lookup, so an out-of-range value reports bad input even for ids that
/// do not exist.
pub fn set_marks(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
    marks: i64,
) -> Result<Student, StudentsError> {
    if !(MARKS_MIN..=MARKS_MAX).contains(&marks) {
        return Err(StudentsError::new(
            "bad_params",
            "Marks must be an integer between 0 and 100.",
        ));
    }

    let tx = begin_immediate(conn)?;

    let existing = tx
        .query_row(
            "SELECT name, subject, marks FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    let Some((name, subject, old)) = existing else {
        return Err(StudentsError::new("not_found", "Student not found."));
    };

    tx.execute(
        "UPDATE students SET marks = ? WHERE id = ?",
        (marks, student_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;
    audit::record(
        &tx,
        Some(teacher_id),
        "update",
        &format!("Updated student {} marks: {} -> {}", student_id, old, marks),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;
    Ok(Student {
        id: student_id.to_string(),
        name,
        subject,
        marks,
    })
}

pub fn delete(conn: &Connection, teacher_id: &str, student_id: &str) -> Result<(), StudentsError> {
    let tx = begin_immediate(conn)?;

    let removed = tx
        .execute("DELETE FROM students WHERE id = ?", [student_id])
        .map_err(|e| db_err("db_update_failed", e))?;
    if removed == 0 {
        return Err(StudentsError::new("not_found", "Student not found."));
    }
    audit::record(
        &tx,
        Some(teacher_id),
        "delete",
        &format!("Deleted student {}", student_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn seed_teacher(conn: &Connection) {
        conn.execute(
            "INSERT INTO teachers(id, username, password_salt, password_hash, created_at)
             VALUES('t-1', 'deepak', 'ab', 'cd', strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            [],
        )
        .expect("seed teacher");
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");
        seed_teacher(&conn);
        conn
    }

    fn audit_rows(conn: &Connection) -> Vec<(String, String)> {
        let mut stmt = conn
            .prepare("SELECT action, details FROM audit_log ORDER BY rowid")
            .expect("prepare");
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect")
    }

    #[test]
    fn add_creates_then_increments_same_identity() {
        let conn = test_conn();
        let (s, created) = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 40).expect("create");
        assert!(created);
        assert_eq!(s.marks, 40);

        let (s2, created2) =
            upsert_increment(&conn, "t-1", "Asha Rao", "Math", 20).expect("increment");
        assert!(!created2);
        assert_eq!(s2.id, s.id);
        assert_eq!(s2.marks, 60);

        let log = audit_rows(&conn);
        assert_eq!(
            log,
            vec![
                (
                    "create".to_string(),
                    "Created \"Asha Rao-Math\" with 40".to_string()
                ),
                (
                    "update".to_string(),
                    "Incremented \"Asha Rao-Math\" from 40 by 20 -> 60".to_string()
                ),
            ]
        );
    }

    #[test]
    fn increment_past_cap_is_rejected_and_rolled_back() {
        let conn = test_conn();
        upsert_increment(&conn, "t-1", "Asha Rao", "Math", 40).expect("create");

        let err = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 70).unwrap_err();
        assert_eq!(err.code, "marks_conflict");
        assert_eq!(err.message, "Total marks cannot exceed 100.");

        let rows = list(&conn).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].marks, 40);
        assert_eq!(audit_rows(&conn).len(), 1);

        // landing exactly on the cap is fine
        let (s, _) = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 60).expect("to 100");
        assert_eq!(s.marks, 100);
    }

    #[test]
    fn creating_above_the_cap_is_rejected() {
        let conn = test_conn();
        let err = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 150).unwrap_err();
        assert_eq!(err.code, "marks_conflict");
        assert_eq!(err.message, "Marks cannot exceed 100.");
        assert!(list(&conn).expect("list").is_empty());
        assert!(audit_rows(&conn).is_empty());
    }

    #[test]
    fn negative_delta_is_rejected_before_any_lookup() {
        let conn = test_conn();
        upsert_increment(&conn, "t-1", "Asha Rao", "Math", 10).expect("create");

        let err = upsert_increment(&conn, "t-1", "Asha Rao", "Math", -20).unwrap_err();
        assert_eq!(err.code, "bad_params");
        assert_eq!(err.message, "Marks must be an integer between 0 and 100.");

        let rows = list(&conn).expect("list");
        assert_eq!(rows[0].marks, 10);
        assert_eq!(audit_rows(&conn).len(), 1);
    }

    #[test]
    fn same_name_under_another_subject_is_a_new_row() {
        let conn = test_conn();
        let (_, a) = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 30).expect("math");
        let (_, b) = upsert_increment(&conn, "t-1", "Asha Rao", "Physics", 50).expect("physics");
        assert!(a);
        assert!(b);
        assert_eq!(list(&conn).expect("list").len(), 2);
    }

    #[test]
    fn set_marks_overwrites_and_audits() {
        let conn = test_conn();
        let (s, _) = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 40).expect("create");

        let updated = set_marks(&conn, "t-1", &s.id, 85).expect("set");
        assert_eq!(updated.marks, 85);
        assert_eq!(updated.name, "Asha Rao");

        let log = audit_rows(&conn);
        assert_eq!(log[1].0, "update");
        assert_eq!(log[1].1, format!("Updated student {} marks: 40 -> 85", s.id));
    }

    #[test]
    fn set_marks_checks_range_before_lookup() {
        let conn = test_conn();
        for bad in [-1, 101] {
            let err = set_marks(&conn, "t-1", "no-such-id", bad).unwrap_err();
            assert_eq!(err.code, "bad_params");
            assert_eq!(err.message, "Marks must be an integer between 0 and 100.");
        }
        let err = set_marks(&conn, "t-1", "no-such-id", 50).unwrap_err();
        assert_eq!(err.code, "not_found");
        assert_eq!(err.message, "Student not found.");
        assert!(audit_rows(&conn).is_empty());
    }

    #[test]
    fn delete_removes_row_and_audits() {
        let conn = test_conn();
        let (s, _) = upsert_increment(&conn, "t-1", "Asha Rao", "Math", 40).expect("create");

        delete(&conn, "t-1", &s.id).expect("delete");
        assert!(list(&conn).expect("list").is_empty());
        let log = audit_rows(&conn);
        assert_eq!(log[1], ("delete".to_string(), format!("Deleted student {}", s.id)));

        let err = delete(&conn, "t-1", &s.id).unwrap_err();
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn list_orders_by_name_then_subject() {
        let conn = test_conn();
        upsert_increment(&conn, "t-1", "Binta Diallo", "Math", 10).expect("add");
        upsert_increment(&conn, "t-1", "Asha Rao", "Physics", 10).expect("add");
        upsert_increment(&conn, "t-1", "Asha Rao", "Chemistry", 10).expect("add");

        let order: Vec<(String, String)> = list(&conn)
            .expect("list")
            .into_iter()
            .map(|s| (s.name, s.subject))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Asha Rao".to_string(), "Chemistry".to_string()),
                ("Asha Rao".to_string(), "Physics".to_string()),
                ("Binta Diallo".to_string(), "Math".to_string()),
            ]
        );
    }

    #[test]
    fn concurrent_increments_from_many_connections_never_lose_updates() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("portald-students-{}", nanos));
        let conn = db::open_db(&dir).expect("open");
        seed_teacher(&conn);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dir = dir.clone();
            handles.push(std::thread::spawn(move || {
                let conn = db::open_db(&dir).expect("open");
                upsert_increment(&conn, "t-1", "Asha Rao", "Math", 10).expect("increment");
            }));
        }
        for h in handles {
            h.join().expect("join");
        }

        let marks: i64 = conn
            .query_row(
                "SELECT marks FROM students WHERE name = ? AND subject = ?",
                ("Asha Rao", "Math"),
                |r| r.get(0),
            )
            .expect("marks");
        assert_eq!(marks, 50);
        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))
            .expect("count");
        assert_eq!(entries, 5);

        drop(conn);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
