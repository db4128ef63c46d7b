use crate::audit;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_teacher_api, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn audit_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_teacher_api(conn, &req.client)?;
    let limit = match req.params.get("limit") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| HandlerErr::new("bad_params", "limit must be an integer"))?,
        ),
    };
    let entries = audit::list(conn, limit)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "entries": entries }))
}

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match audit_list(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
