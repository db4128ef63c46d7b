
use serde_json::json;
use test_support::{
    client, client_readonly, error_code, error_message, login, open_workspace, provision_teacher,
    request_ok_with_client, request_with_client, spawn_sidecar, temp_dir, USER_AGENT,
};

#[test]
fn session_guards_api_calls_until_logout() {
    let workspace = temp_dir("portal-session-lifecycle");
    provision_teacher(&workspace, "deepak", "admin123");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "1", &workspace);

    let anonymous = request_with_client(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({}),
        json!({ "userAgent": USER_AGENT }),
    );
    assert_eq!(error_code(&anonymous), "unauthorized");
    assert_eq!(error_message(&anonymous), "Unauthorized");

    let session = login(&mut stdin, &mut reader, "3", "deepak", "admin123");

    let listed = request_ok_with_client(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({}),
        client_readonly(&session),
    );
    assert_eq!(
        listed
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // The token presented from another client fingerprint fails exactly
    // like no token at all.
    let stolen = request_with_client(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({}),
        json!({ "sessionToken": session.token, "userAgent": "Somebody-Else/9.9" }),
    );
    assert_eq!(error_code(&stolen), "unauthorized");
    assert_eq!(stolen.get("error"), anonymous.get("error"));

    let forged = request_with_client(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({}),
        json!({ "sessionToken": "feedfacefeedface", "userAgent": USER_AGENT }),
    );
    assert_eq!(error_code(&forged), "unauthorized");

    let out = request_ok_with_client(
        &mut stdin,
        &mut reader,
        "7",
        "auth.logout",
        json!({}),
        client(&session),
    );
    assert_eq!(out.get("ok").and_then(|v| v.as_bool()), Some(true));

    let after = request_with_client(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({}),
        client_readonly(&session),
    );
    assert_eq!(error_code(&after), "unauthorized");

    let double_logout = request_with_client(
        &mut stdin,
        &mut reader,
        "9",
        "auth.logout",
        json!({}),
        client(&session),
    );
    assert_eq!(error_code(&double_logout), "unauthorized");

    let second = login(&mut stdin, &mut reader, "10", "deepak", "admin123");
    assert_ne!(second.token, session.token);
}

#[test]
fn expired_sessions_are_rejected_like_missing_ones() {
    let workspace = temp_dir("portal-session-expiry");
    provision_teacher(&workspace, "deepak", "admin123");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "1", &workspace);
    let session = login(&mut stdin, &mut reader, "2", "deepak", "admin123");

    // Backdate the expiry directly in the workspace database.
    let db = rusqlite::Connection::open(workspace.join("portal.sqlite3")).expect("open db");
    db.execute(
        "UPDATE sessions SET expires_at = '2000-01-01T00:00:00Z' WHERE token = ?",
        [&session.token],
    )
    .expect("backdate session");
    drop(db);

    let expired = request_with_client(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({}),
        client_readonly(&session),
    );
    assert_eq!(error_code(&expired), "unauthorized");
    assert_eq!(error_message(&expired), "Unauthorized");

    // The next login lazily sweeps the stale row.
    let _fresh = login(&mut stdin, &mut reader, "4", "deepak", "admin123");
    let db = rusqlite::Connection::open(workspace.join("portal.sqlite3")).expect("open db");
    let stale: i64 = db
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE token = ?",
            [&session.token],
            |r| r.get(0),
        )
        .expect("count stale");
    assert_eq!(stale, 0);
}

#[test]
fn one_teacher_can_hold_several_live_sessions() {
    let workspace = temp_dir("portal-session-multi");
    provision_teacher(&workspace, "deepak", "admin123");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "1", &workspace);

    let first = login(&mut stdin, &mut reader, "2", "deepak", "admin123");
    let second = login(&mut stdin, &mut reader, "3", "deepak", "admin123");
    assert_ne!(first.token, second.token);

    let _ = request_ok_with_client(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({}),
        client_readonly(&first),
    );
    let _ = request_ok_with_client(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({}),
        client_readonly(&second),
    );

    // Revoking one leaves the other alone.
    let _ = request_ok_with_client(
        &mut stdin,
        &mut reader,
        "6",
        "auth.logout",
        json!({}),
        client(&first),
    );
    let gone = request_with_client(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({}),
        client_readonly(&first),
    );
    assert_eq!(error_code(&gone), "unauthorized");
    let _ = request_ok_with_client(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({}),
        client_readonly(&second),
    );
}
