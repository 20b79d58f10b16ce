use crate::agg;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, StudentBio};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::OptionalExtension;
use serde_json::json;

use super::{attendance, grades};

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

fn pdf_response(req: &Request, pdf: report::ReportPdf, rows: usize) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "fileName": pdf.file_name,
            "pageCount": pdf.page_count,
            "rowCount": rows,
            "pdfBase64": BASE64.encode(&pdf.bytes),
        }),
    )
}

fn handle_grade_list_pdf(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester = optional_str(req, "semester").unwrap_or_else(|| agg::FILTER_ALL.to_string());
    let subject = optional_str(req, "subject").unwrap_or_else(|| agg::FILTER_ALL.to_string());

    let all = match grades::fetch_grade_rows(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let filtered = agg::filter_grades(&all, &semester, &subject);

    match report::grade_list_pdf(&filtered, &semester) {
        Ok(pdf) => {
            tracing::debug!(rows = filtered.len(), %semester, "grade list exported");
            pdf_response(req, pdf, filtered.len())
        }
        Err(e) => err(&req.id, "report_failed", format!("{e:?}"), None),
    }
}

fn handle_student_report_pdf(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = optional_str(req, "semester").unwrap_or_else(|| agg::FILTER_ALL.to_string());

    let student: Option<StudentBio> = match conn
        .query_row(
            "SELECT name, class_name, nisn, birth_place, birth_date, address, parent_name
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok(StudentBio {
                    name: r.get(0)?,
                    class_name: r.get(1)?,
                    nisn: r.get(2)?,
                    birth_place: r.get(3)?,
                    birth_date: r.get(4)?,
                    address: r.get(5)?,
                    parent_name: r.get(6)?,
                })
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let all = match grades::fetch_grade_rows(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let own: Vec<agg::GradeRow> = all
        .into_iter()
        .filter(|g| g.student_id == student_id)
        .collect();
    let groups = agg::group_by_semester(&own);

    let statuses = match attendance::fetch_student_statuses(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tally = agg::lifetime_stats(statuses.iter());

    let today = chrono::Local::now().date_naive();
    match report::student_report_pdf(&student, &groups, tally, &semester, today) {
        Ok(pdf) => {
            tracing::debug!(student = %student.name, %semester, "report card exported");
            pdf_response(req, pdf, own.len())
        }
        Err(e) => err(&req.id, "report_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.gradeListPdf" => Some(handle_grade_list_pdf(state, req)),
        "reports.studentReportPdf" => Some(handle_student_report_pdf(state, req)),
        _ => None,
    }
}
