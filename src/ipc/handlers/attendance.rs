use crate::agg::{self, AttendanceEntry, Status};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_date(req: &Request, raw: &str) -> Result<NaiveDate, serde_json::Value> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        err(
            &req.id,
            "bad_params",
            "date must be YYYY-MM-DD",
            Some(json!({ "date": raw })),
        )
    })
}

/// Attendance rows in the closed date range. Rows whose stored status no
/// longer parses are dropped, matching the read-as-empty policy for bad data.
fn fetch_entries_in_range(
    conn: &Connection,
    first: NaiveDate,
    last: NaiveDate,
) -> Result<Vec<AttendanceEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT student_id, date, status FROM attendance WHERE date >= ? AND date <= ?",
    )?;
    let rows = stmt.query_map(
        (first.to_string(), last.to_string()),
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        },
    )?;
    let mut entries = Vec::new();
    for row in rows {
        let (student_id, date, status) = row?;
        let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
            continue;
        };
        let Some(status) = Status::parse(&status) else {
            continue;
        };
        entries.push(AttendanceEntry {
            student_id,
            date,
            status,
        });
    }
    Ok(entries)
}

fn roster(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id, name FROM students ORDER BY name")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    rows.collect()
}

/// The daily roster view: per-student status for the date (null = unmarked),
/// each student's tally for the month containing the date, and the day's
/// summary counts. Recomputed from storage on every call.
fn handle_day_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match parse_date(req, &date_raw) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let students = match roster(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let (first, last) = agg::month_bounds(date);
    let month_entries = match fetch_entries_in_range(conn, first, last) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let day_map = agg::daily_status_map(&month_entries, date);
    let summary = agg::daily_counts(&day_map);
    let monthly = agg::monthly_stats(&month_entries, date);

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|(id, name)| {
            json!({
                "studentId": id,
                "name": name,
                "status": day_map.get(id).map(|s| s.as_str()),
                "monthly": monthly.get(id).copied().unwrap_or_default(),
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "date": date_raw,
            "rows": rows,
            "summary": summary,
            "total": students.len()
        }),
    )
}

fn upsert_status(
    conn: &Connection,
    student_id: &str,
    date: &str,
    status: Status,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO attendance(student_id, date, status)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status",
        (student_id, date, status.as_str()),
    )?;
    Ok(())
}

fn handle_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = parse_date(req, &date_raw) {
        return e;
    }
    let status_raw = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(status) = Status::parse(&status_raw) else {
        return err(
            &req.id,
            "bad_params",
            "status must be Hadir, Sakit, Izin or Alpha",
            Some(json!({ "status": status_raw })),
        );
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

    if let Err(e) = upsert_status(conn, &student_id, &date_raw, status) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "attendance" })),
        );
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "date": date_raw,
            "status": status.as_str()
        }),
    )
}

/// One Hadir upsert per rostered student, applied independently: a failure
/// does not roll back the writes already applied, it is reported once as an
/// aggregate error carrying the failed student ids.
fn handle_mark_all_present(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = parse_date(req, &date_raw) {
        return e;
    }

    let students = match roster(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut applied = 0usize;
    let mut failed: Vec<serde_json::Value> = Vec::new();
    for (student_id, _) in &students {
        match upsert_status(conn, student_id, &date_raw, Status::Present) {
            Ok(()) => applied += 1,
            Err(e) => failed.push(json!({ "studentId": student_id, "message": e.to_string() })),
        }
    }

    if !failed.is_empty() {
        tracing::warn!(
            applied,
            failed = failed.len(),
            date = %date_raw,
            "bulk mark-present partially failed"
        );
        return err(
            &req.id,
            "bulk_update_failed",
            format!("{} of {} updates failed", failed.len(), students.len()),
            Some(json!({ "applied": applied, "failed": failed })),
        );
    }

    ok(
        &req.id,
        json!({ "date": date_raw, "marked": applied }),
    )
}

/// Lifetime tally for one student, all four statuses (the report card uses
/// the non-present counts; the report view also shows Hadir).
fn handle_student_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let statuses = match fetch_student_statuses(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tally = agg::lifetime_stats(statuses.iter());

    ok(&req.id, json!({ "studentId": student_id, "stats": tally }))
}

pub fn fetch_student_statuses(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<Status>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT status FROM attendance WHERE student_id = ?")?;
    let rows = stmt.query_map([student_id], |r| r.get::<_, String>(0))?;
    let mut statuses = Vec::new();
    for row in rows {
        if let Some(status) = Status::parse(&row?) {
            statuses.push(status);
        }
    }
    Ok(statuses)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(handle_day_open(state, req)),
        "attendance.setStatus" => Some(handle_set_status(state, req)),
        "attendance.markAllPresent" => Some(handle_mark_all_present(state, req)),
        "attendance.studentStats" => Some(handle_student_stats(state, req)),
        _ => None,
    }
}
