use rusqlite::Connection;
use serde::Serialize;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

/// One audit row. `teacher` is the acting teacher's username, already
/// resolved; it goes `None` once that account is deleted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub teacher: Option<String>,
    pub action: String,
    pub details: String,
    pub created_at: String,
}

/// Append an entry. Runs inside the caller's transaction when invoked on
/// one, so a rolled-back mutation leaves no trace here either.
pub fn record(
    conn: &Connection,
    teacher_id: Option<&str>,
    action: &str,
    details: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log(id, teacher_id, action, details, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            uuid::Uuid::new_v4().to_string(),
            teacher_id,
            action,
            details,
        ),
    )?;
    Ok(())
}

/// Newest entries first. rowid breaks ties within one second.
pub fn list(conn: &Connection, limit: Option<i64>) -> rusqlite::Result<Vec<AuditEntry>> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut stmt = conn.prepare(
        "SELECT a.id, t.username, a.action, a.details, a.created_at
         FROM audit_log a
         LEFT JOIN teachers t ON t.id = a.teacher_id
         ORDER BY a.created_at DESC, a.rowid DESC
         LIMIT ?",
    )?;
    stmt.query_map([limit], |r| {
        Ok(AuditEntry {
            id: r.get(0)?,
            teacher: r.get(1)?,
            action: r.get(2)?,
            details: r.get(3)?,
            created_at: r.get(4)?,
        })
    })
    .and_then(|it| it.collect())
}
