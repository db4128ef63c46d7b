use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_label, get_marks, get_required_str, require_csrf, require_teacher_api,
    require_teacher_page, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::students;
use rusqlite::Connection;
use serde_json::json;

/// Page model for the gradebook screen: the roster plus everything the
/// shell needs to render forms for the signed-in teacher.
fn home_open(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher = require_teacher_page(conn, &req.client)?;
    let rows = students::list(conn)?;
    Ok(json!({
        "teacher": { "id": teacher.id, "username": teacher.username },
        "csrfToken": teacher.csrf_token,
        "students": rows
    }))
}

fn students_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_teacher_api(conn, &req.client)?;
    let rows = students::list(conn)?;
    Ok(json!({ "students": rows }))
}

fn students_add(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher = require_teacher_api(conn, &req.client)?;
    require_csrf(&teacher, &req.client)?;
    let name = get_label(&req.params, "name")?;
    let subject = get_label(&req.params, "subject")?;
    let marks = get_marks(&req.params, "marks")?;

    let (student, created) = students::upsert_increment(conn, &teacher.id, &name, &subject, marks)?;
    let mut result = json!({
        "id": student.id,
        "name": student.name,
        "subject": student.subject,
        "marks": student.marks
    });
    result[if created { "created" } else { "updated" }] = json!(true);
    Ok(result)
}

fn students_set_marks(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher = require_teacher_api(conn, &req.client)?;
    require_csrf(&teacher, &req.client)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let marks = get_marks(&req.params, "marks")?;

    let student = students::set_marks(conn, &teacher.id, &student_id, marks)?;
    Ok(json!({ "id": student.id, "marks": student.marks }))
}

fn students_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher = require_teacher_api(conn, &req.client)?;
    require_csrf(&teacher, &req.client)?;
    let student_id = get_required_str(&req.params, "studentId")?;

    students::delete(conn, &teacher.id, &student_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_home_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match home_open(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_list(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_add(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_set_marks(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_set_marks(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_delete(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "home.open" => Some(handle_home_open(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.add" => Some(handle_students_add(state, req)),
        "students.setMarks" => Some(handle_students_set_marks(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
