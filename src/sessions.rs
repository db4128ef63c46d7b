use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::crypto;

/// Fixed session lifetime from issuance.
pub const SESSION_TTL_HOURS: i64 = 12;

/// Round-trips through TEXT columns and compares lexicographically.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn now_utc() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub csrf_token: String,
    pub expires_at: String,
}

/// Teacher identity attached to a request once its session resolves.
#[derive(Debug, Clone)]
pub struct AuthedTeacher {
    pub id: String,
    pub username: String,
    pub csrf_token: String,
}

/// Issue a fresh session for a teacher. The token and the session-bound CSRF
/// token are random 32-byte hex strings; uniqueness of the session token is
/// enforced by the primary key, with a bounded regenerate-and-retry on the
/// (astronomically unlikely) collision. Expired rows are swept lazily here.
pub fn issue(
    conn: &Connection,
    teacher_id: &str,
    user_agent: Option<&str>,
    ip: Option<&str>,
) -> anyhow::Result<IssuedSession> {
    let issued_at = Utc::now();
    let now = issued_at.format(TIME_FORMAT).to_string();
    let expires_at = (issued_at + Duration::hours(SESSION_TTL_HOURS))
        .format(TIME_FORMAT)
        .to_string();

    sweep_expired(conn, &now)?;

    let fingerprint = crypto::user_agent_fingerprint(user_agent.unwrap_or(""));
    let csrf_token = crypto::new_token();

    for _ in 0..3 {
        let token = crypto::new_token();
        let inserted = conn.execute(
            "INSERT INTO sessions(token, teacher_id, user_agent_hash, csrf_token, ip, created_at, expires_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &token,
                teacher_id,
                &fingerprint,
                &csrf_token,
                ip,
                &now,
                &expires_at,
            ),
        );
        match inserted {
            Ok(_) => {
                return Ok(IssuedSession {
                    token,
                    csrf_token,
                    expires_at,
                });
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    anyhow::bail!("could not allocate a unique session token")
}

/// Look up a live session. The token must exist, carry the same client
/// fingerprint, and not be expired; every failure mode is the same `None`.
pub fn resolve(
    conn: &Connection,
    token: &str,
    user_agent: Option<&str>,
) -> anyhow::Result<Option<AuthedTeacher>> {
    resolve_at(conn, token, user_agent, &now_utc())
}

fn resolve_at(
    conn: &Connection,
    token: &str,
    user_agent: Option<&str>,
    now: &str,
) -> anyhow::Result<Option<AuthedTeacher>> {
    let fingerprint = crypto::user_agent_fingerprint(user_agent.unwrap_or(""));
    let row = conn
        .query_row(
            "SELECT s.teacher_id, t.username, s.csrf_token
             FROM sessions s
             JOIN teachers t ON t.id = s.teacher_id
             WHERE s.token = ? AND s.user_agent_hash = ? AND s.expires_at > ?",
            (token, &fingerprint, now),
            |r| {
                Ok(AuthedTeacher {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    csrf_token: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Remove a session. Revoking an unknown token is a no-op, not an error.
pub fn revoke(conn: &Connection, token: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(())
}

pub fn sweep_expired(conn: &Connection, now: &str) -> anyhow::Result<usize> {
    let removed = conn.execute("DELETE FROM sessions WHERE expires_at <= ?", [now])?;
    if removed > 0 {
        tracing::debug!(removed, "swept expired sessions");
    }
    Ok(removed)
}
