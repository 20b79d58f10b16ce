use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
}

fn student_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "className": row.get::<_, String>(2)?,
        "nisn": row.get::<_, Option<String>>(3)?,
        "birthPlace": row.get::<_, Option<String>>(4)?,
        "birthDate": row.get::<_, Option<String>>(5)?,
        "address": row.get::<_, Option<String>>(6)?,
        "parentName": row.get::<_, Option<String>>(7)?,
        "photoUrl": row.get::<_, Option<String>>(8)?,
    }))
}

const STUDENT_COLUMNS: &str =
    "id, name, class_name, nisn, birth_place, birth_date, address, parent_name, photo_url";

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY name",
        STUDENT_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_id = Uuid::new_v4().to_string();
    let updated_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, class_name, nisn, birth_place, birth_date, address, parent_name, photo_url, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &name,
            &class_name,
            optional_str(req, "nisn"),
            optional_str(req, "birthPlace"),
            optional_str(req, "birthDate"),
            optional_str(req, "address"),
            optional_str(req, "parentName"),
            optional_str(req, "photoUrl"),
            &updated_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated_at = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE students SET
           name = ?, class_name = ?, nisn = ?, birth_place = ?, birth_date = ?,
           address = ?, parent_name = ?, photo_url = ?, updated_at = ?
         WHERE id = ?",
        (
            &name,
            &class_name,
            optional_str(req, "nisn"),
            optional_str(req, "birthPlace"),
            optional_str(req, "birthDate"),
            optional_str(req, "address"),
            optional_str(req, "parentName"),
            optional_str(req, "photoUrl"),
            &updated_at,
            &student_id,
        ),
    );
    match changed {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

/// Deleting a student removes that student's grades and attendance first, in
/// one transaction, so no orphaned dependents can survive a partial failure.
fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependents first (no ON DELETE CASCADE in the schema).
    let grades_removed = match tx.execute("DELETE FROM grades WHERE student_id = ?", [&student_id])
    {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    let attendance_removed =
        match tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id]) {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_delete_failed", e.to_string(), None);
            }
        };
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "gradesRemoved": grades_removed,
            "attendanceRemoved": attendance_removed
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
