use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rapord");
    let mut child = Command::new(exe)
        .env_remove("RAPORD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rapord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn decoded_pdf(result: &serde_json::Value) -> Vec<u8> {
    let encoded = result
        .get("pdfBase64")
        .and_then(|v| v.as_str())
        .expect("pdfBase64");
    BASE64.decode(encoded).expect("valid base64")
}

/// The full export scenario: one student, one graded semester with a packed
/// two-link portfolio, two non-present attendance days.
fn seed_ani(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let ani = request_ok(
        stdin,
        reader,
        "seed-student",
        "students.create",
        json!({
            "name": "Ani",
            "className": "1A",
            "nisn": "0051",
            "birthPlace": "Bandung",
            "birthDate": "2017-01-05",
            "parentName": "Ibu Sari"
        }),
    );
    let ani_id = ani
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        stdin,
        reader,
        "seed-grade",
        "grades.create",
        json!({
            "studentId": ani_id,
            "semester": "Kelas 1 - Ganjil",
            "subject": "Matematika",
            "score": 90,
            "rubric": "Mahir",
            "portfolioUrl": "http://a.com,http://b.com"
        }),
    );
    for (i, (date, status)) in [("2024-03-05", "Sakit"), ("2024-03-20", "Alpha")]
        .iter()
        .enumerate()
    {
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-att-{}", i),
            "attendance.setStatus",
            json!({ "studentId": ani_id, "date": date, "status": status }),
        );
    }
    ani_id
}

#[test]
fn individual_report_full_and_single_semester() {
    let workspace = temp_dir("rapord-report-individual");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ani_id = seed_ani(&mut stdin, &mut reader);

    let full = request_ok(
        &mut stdin,
        &mut reader,
        "full",
        "reports.studentReportPdf",
        json!({ "studentId": ani_id, "semester": "Semua" }),
    );
    assert_eq!(
        full.get("fileName").and_then(|v| v.as_str()),
        Some("Rapor_Lengkap_Ani.pdf")
    );
    assert_eq!(full.get("rowCount").and_then(|v| v.as_u64()), Some(1));
    let bytes = decoded_pdf(&full);
    assert!(bytes.starts_with(b"%PDF"), "not a pdf byte stream");

    let single = request_ok(
        &mut stdin,
        &mut reader,
        "single",
        "reports.studentReportPdf",
        json!({ "studentId": ani_id, "semester": "Kelas 1 - Ganjil" }),
    );
    assert_eq!(
        single.get("fileName").and_then(|v| v.as_str()),
        Some("Rapor_Kelas 1 - Ganjil_Ani.pdf")
    );
    assert!(decoded_pdf(&single).starts_with(b"%PDF"));

    // Repeated exports keep the same deterministic name.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "again",
        "reports.studentReportPdf",
        json!({ "studentId": ani_id, "semester": "Semua" }),
    );
    assert_eq!(
        again.get("fileName").and_then(|v| v.as_str()),
        Some("Rapor_Lengkap_Ani.pdf")
    );

    // The report card's attendance block source: lifetime counts.
    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "stats",
        "attendance.studentStats",
        json!({ "studentId": ani_id }),
    );
    let tally = stats.get("stats").expect("stats");
    assert_eq!(tally.get("sick").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(tally.get("excused").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(tally.get("absent").and_then(|v| v.as_u64()), Some(1));
}

#[test]
fn grade_list_export_respects_the_filter() {
    let workspace = temp_dir("rapord-report-list");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ani_id = seed_ani(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "extra",
        "grades.create",
        json!({
            "studentId": ani_id,
            "semester": "Kelas 1 - Genap",
            "subject": "IPA",
            "score": 88,
            "rubric": "Cakap"
        }),
    );

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "all",
        "reports.gradeListPdf",
        json!({}),
    );
    assert_eq!(
        all.get("fileName").and_then(|v| v.as_str()),
        Some("Rekap_Nilai.pdf")
    );
    assert_eq!(all.get("rowCount").and_then(|v| v.as_u64()), Some(2));
    assert!(decoded_pdf(&all).starts_with(b"%PDF"));

    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "filtered",
        "reports.gradeListPdf",
        json!({ "semester": "Kelas 1 - Ganjil" }),
    );
    assert_eq!(filtered.get("rowCount").and_then(|v| v.as_u64()), Some(1));
    assert!(decoded_pdf(&filtered).starts_with(b"%PDF"));
}

#[test]
fn report_for_unknown_student_fails_cleanly() {
    let workspace = temp_dir("rapord-report-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let value = request(
        &mut stdin,
        &mut reader,
        "missing",
        "reports.studentReportPdf",
        json!({ "studentId": "missing", "semester": "Semua" }),
    );
    assert!(!value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true));
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );
}
