use rusqlite::Connection;

use crate::crypto;
use crate::ipc::error::err;
use crate::ipc::types::ClientContext;
use crate::sessions::{self, AuthedTeacher};
use crate::students;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<students::StudentsError> for HandlerErr {
    fn from(e: students::StudentsError) -> Self {
        HandlerErr::new(e.code, e.message)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Required trimmed text field (student name / subject).
pub fn get_label(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let t = raw.trim();
    if t.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    if t.chars().count() > students::LABEL_MAX_CHARS {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must be at most {} characters", key, students::LABEL_MAX_CHARS),
        ));
    }
    Ok(t.to_string())
}

pub fn get_marks(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let n = params.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
        HandlerErr::new("bad_params", "Marks must be an integer between 0 and 100.")
    })?;
    if !(students::MARKS_MIN..=students::MARKS_MAX).contains(&n) {
        return Err(HandlerErr::new(
            "bad_params",
            "Marks must be an integer between 0 and 100.",
        ));
    }
    Ok(n)
}

/// Session guard for API methods. Missing, unknown, expired and
/// wrong-client tokens all come back as the same `unauthorized` error.
pub fn require_teacher_api(
    conn: &Connection,
    client: &ClientContext,
) -> Result<AuthedTeacher, HandlerErr> {
    require_teacher(conn, client, "unauthorized")
}

/// Session guard for page methods. Same checks as the API guard; the
/// `login_required` code tells the shell to redirect to the login page.
pub fn require_teacher_page(
    conn: &Connection,
    client: &ClientContext,
) -> Result<AuthedTeacher, HandlerErr> {
    require_teacher(conn, client, "login_required")
}

fn require_teacher(
    conn: &Connection,
    client: &ClientContext,
    code: &'static str,
) -> Result<AuthedTeacher, HandlerErr> {
    let Some(token) = client.session_token.as_deref() else {
        return Err(HandlerErr::new(code, "Unauthorized"));
    };
    sessions::resolve(conn, token, client.user_agent.as_deref())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new(code, "Unauthorized"))
}

/// Mutating methods must present the CSRF token bound to the session.
pub fn require_csrf(teacher: &AuthedTeacher, client: &ClientContext) -> Result<(), HandlerErr> {
    let presented = client.csrf_token.as_deref().unwrap_or("");
    if !crypto::constant_time_eq(presented.as_bytes(), teacher.csrf_token.as_bytes()) {
        return Err(HandlerErr::new(
            "csrf_failed",
            "CSRF verification failed. Request aborted.",
        ));
    }
    Ok(())
}
