use crate::audit;
use crate::crypto;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_csrf, require_teacher_api, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sessions;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const USERNAME_MAX_CHARS: usize = 150;

struct TeacherRow {
    id: String,
    username: String,
    password_salt: String,
    password_hash: String,
}

fn find_teacher(conn: &Connection, username: &str) -> Result<Option<TeacherRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, username, password_salt, password_hash FROM teachers WHERE username = ?",
        [username],
        |r| {
            Ok(TeacherRow {
                id: r.get(0)?,
                username: r.get(1)?,
                password_salt: r.get(2)?,
                password_hash: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn login(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let username_raw = get_required_str(&req.params, "username")?;
    let password = get_required_str(&req.params, "password")?;
    let username = username_raw.trim();
    if username.is_empty() || password.is_empty() || username.chars().count() > USERNAME_MAX_CHARS
    {
        return Err(HandlerErr::new("bad_params", "Invalid input."));
    }

    let Some(teacher) = find_teacher(conn, username)? else {
        // Unknown account still burns one KDF run so both rejection paths
        // cost the same.
        crypto::dummy_password_check(&password);
        return Err(HandlerErr::new("invalid_credentials", "Invalid credentials."));
    };

    let verified = match crypto::verify_password(
        &password,
        &teacher.password_salt,
        &teacher.password_hash,
    ) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(teacher = %teacher.username, error = %e, "stored credentials unreadable");
            false
        }
    };
    if !verified {
        return Err(HandlerErr::new("invalid_credentials", "Invalid credentials."));
    }

    let session = sessions::issue(
        conn,
        &teacher.id,
        req.client.user_agent.as_deref(),
        req.client.ip.as_deref(),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    audit::record(conn, Some(&teacher.id), "login", "Manual session login")
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(teacher = %teacher.username, "login");

    Ok(json!({
        "teacher": { "id": teacher.id, "username": teacher.username },
        "sessionToken": session.token,
        "csrfToken": session.csrf_token,
        "expiresAt": session.expires_at
    }))
}

fn logout(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher = require_teacher_api(conn, &req.client)?;
    require_csrf(&teacher, &req.client)?;
    let token = req.client.session_token.as_deref().unwrap_or("");
    sessions::revoke(conn, token)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(teacher = %teacher.username, "logout");
    Ok(json!({ "ok": true }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match login(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match logout(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
