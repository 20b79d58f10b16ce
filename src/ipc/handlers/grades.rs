use crate::agg::{self, GradeRow};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
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

/// All grades joined with the parent student's name/class, newest entry
/// first (the order the grade table renders in).
pub fn fetch_grade_rows(conn: &Connection) -> Result<Vec<GradeRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.student_id, s.name, s.class_name, g.semester, g.subject,
                g.score, g.rubric, g.reflection, g.portfolio_url
         FROM grades g
         JOIN students s ON s.id = g.student_id
         ORDER BY g.rowid DESC",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(GradeRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            class_name: r.get(3)?,
            semester: r.get(4)?,
            subject: r.get(5)?,
            score: r.get(6)?,
            rubric: r.get(7)?,
            reflection: r.get(8)?,
            portfolio_url: r.get(9)?,
        })
    })?;
    rows.collect()
}

fn grade_fields(req: &Request) -> Result<(String, i64, String, String), serde_json::Value> {
    let subject = required_str(req, "subject")?;
    let score = req
        .params
        .get("score")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing score", None))?;
    let semester = required_str(req, "semester")?;
    if !agg::is_semester_label(&semester) {
        return Err(err(
            &req.id,
            "bad_params",
            "semester must be one of the fixed labels",
            Some(json!({ "semester": semester })),
        ));
    }
    let rubric = required_str(req, "rubric")?;
    if !agg::RUBRIC_OPTIONS.contains(&rubric.as_str()) {
        return Err(err(
            &req.id,
            "bad_params",
            "rubric must be one of the fixed tiers",
            Some(json!({ "rubric": rubric })),
        ));
    }
    Ok((subject, score, semester, rubric))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grades": [] }));
    };

    let semester = optional_str(req, "semester").unwrap_or_else(|| agg::FILTER_ALL.to_string());
    let subject = optional_str(req, "subject").unwrap_or_else(|| agg::FILTER_ALL.to_string());

    let rows = match fetch_grade_rows(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let filtered = agg::filter_grades(&rows, &semester, &subject);

    ok(
        &req.id,
        json!({
            "grades": filtered,
            "semester": semester,
            "subject": subject
        }),
    )
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (subject, score, semester, rubric) = match grade_fields(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let grade_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, student_id, semester, subject, score, rubric, reflection, portfolio_url)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &student_id,
            &semester,
            &subject,
            score,
            &rubric,
            optional_str(req, "reflection"),
            optional_str(req, "portfolioUrl"),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    ok(&req.id, json!({ "gradeId": grade_id }))
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (subject, score, semester, rubric) = match grade_fields(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = conn.execute(
        "UPDATE grades SET
           semester = ?, subject = ?, score = ?, rubric = ?, reflection = ?, portfolio_url = ?
         WHERE id = ?",
        (
            &semester,
            &subject,
            score,
            &rubric,
            optional_str(req, "reflection"),
            optional_str(req, "portfolioUrl"),
            &grade_id,
        ),
    );
    match changed {
        Ok(0) => err(&req.id, "not_found", "grade not found", None),
        Ok(_) => ok(&req.id, json!({ "gradeId": grade_id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.create" => Some(handle_grades_create(state, req)),
        "grades.update" => Some(handle_grades_update(state, req)),
        _ => None,
    }
}
