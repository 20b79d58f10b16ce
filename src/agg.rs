use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The fixed semester labels offered by the grade form, in display order.
pub const SEMESTER_LABELS: [&str; 12] = [
    "Kelas 1 - Ganjil",
    "Kelas 1 - Genap",
    "Kelas 2 - Ganjil",
    "Kelas 2 - Genap",
    "Kelas 3 - Ganjil",
    "Kelas 3 - Genap",
    "Kelas 4 - Ganjil",
    "Kelas 4 - Genap",
    "Kelas 5 - Ganjil",
    "Kelas 5 - Genap",
    "Kelas 6 - Ganjil",
    "Kelas 6 - Genap",
];

/// Filter value meaning "no restriction" for both semester and subject.
pub const FILTER_ALL: &str = "Semua";

pub const RUBRIC_OPTIONS: [&str; 4] = ["Sangat Mahir", "Mahir", "Cakap", "Perlu Bimbingan"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Present,
    Sick,
    Excused,
    Absent,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "Hadir",
            Status::Sick => "Sakit",
            Status::Excused => "Izin",
            Status::Absent => "Alpha",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "Hadir" => Some(Status::Present),
            "Sakit" => Some(Status::Sick),
            "Izin" => Some(Status::Excused),
            "Alpha" => Some(Status::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceEntry {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: Status,
}

/// Sick/excused/absent tallies for one student over one calendar month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTally {
    pub sick: u32,
    pub excused: u32,
    pub absent: u32,
}

/// Full-history tallies for one student, all four statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeTally {
    pub present: u32,
    pub sick: u32,
    pub excused: u32,
    pub absent: u32,
}

/// Per-status head counts for a single day's roster view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounts {
    pub present: u32,
    pub sick: u32,
    pub excused: u32,
    pub absent: u32,
}

/// Folds the records matching `date` exactly into a per-student status map.
/// A student with no record that day has no key; callers must treat a missing
/// key as "unmarked", which is distinct from every status.
pub fn daily_status_map(records: &[AttendanceEntry], date: NaiveDate) -> HashMap<String, Status> {
    let mut map = HashMap::new();
    for rec in records {
        if rec.date == date {
            map.insert(rec.student_id.clone(), rec.status);
        }
    }
    map
}

pub fn daily_counts(map: &HashMap<String, Status>) -> DailyCounts {
    let mut counts = DailyCounts::default();
    for status in map.values() {
        match status {
            Status::Present => counts.present += 1,
            Status::Sick => counts.sick += 1,
            Status::Excused => counts.excused += 1,
            Status::Absent => counts.absent += 1,
        }
    }
    counts
}

/// First and last calendar day of the month containing `reference`, inclusive.
pub fn month_bounds(reference: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = reference.with_day(1).unwrap_or(reference);
    let next_month_first = if reference.month() == 12 {
        NaiveDate::from_ymd_opt(reference.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(reference.year(), reference.month() + 1, 1)
    };
    let last = next_month_first
        .and_then(|d| d.pred_opt())
        .unwrap_or(reference);
    (first, last)
}

/// Counts Sakit/Izin/Alpha per student over the calendar month containing
/// `reference`. Hadir never increments a counter, and students with no
/// matching record are absent from the result (callers default to zero).
pub fn monthly_stats(
    records: &[AttendanceEntry],
    reference: NaiveDate,
) -> HashMap<String, MonthlyTally> {
    let (first, last) = month_bounds(reference);
    let mut stats: HashMap<String, MonthlyTally> = HashMap::new();
    for rec in records {
        if rec.date < first || rec.date > last || rec.status == Status::Present {
            continue;
        }
        let tally = stats.entry(rec.student_id.clone()).or_default();
        match rec.status {
            Status::Sick => tally.sick += 1,
            Status::Excused => tally.excused += 1,
            Status::Absent => tally.absent += 1,
            Status::Present => {}
        }
    }
    stats
}

/// Full-history tally over a single student's statuses.
pub fn lifetime_stats<'a, I>(records: I) -> LifetimeTally
where
    I: IntoIterator<Item = &'a Status>,
{
    let mut tally = LifetimeTally::default();
    for status in records {
        match status {
            Status::Present => tally.present += 1,
            Status::Sick => tally.sick += 1,
            Status::Excused => tally.excused += 1,
            Status::Absent => tally.absent += 1,
        }
    }
    tally
}

/// One grade row as read back from storage, joined with the parent student.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub semester: String,
    pub subject: String,
    pub score: i64,
    pub rubric: String,
    pub reflection: Option<String>,
    pub portfolio_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterGroup {
    pub semester: String,
    pub grades: Vec<GradeRow>,
}

/// Partitions grades by semester label. Groups appear in first-appearance
/// order and keep their records in input order; labels not present in the
/// input produce no group.
pub fn group_by_semester(grades: &[GradeRow]) -> Vec<SemesterGroup> {
    let mut groups: Vec<SemesterGroup> = Vec::new();
    for grade in grades {
        match groups.iter_mut().find(|g| g.semester == grade.semester) {
            Some(group) => group.grades.push(grade.clone()),
            None => groups.push(SemesterGroup {
                semester: grade.semester.clone(),
                grades: vec![grade.clone()],
            }),
        }
    }
    groups
}

/// Applies the ANDed semester/subject predicates. `Semua` matches everything;
/// the subject predicate is a case-insensitive substring match.
pub fn filter_grades(grades: &[GradeRow], semester: &str, subject: &str) -> Vec<GradeRow> {
    let subject_lower = subject.to_lowercase();
    grades
        .iter()
        .filter(|g| semester == FILTER_ALL || g.semester == semester)
        .filter(|g| subject == FILTER_ALL || g.subject.to_lowercase().contains(&subject_lower))
        .cloned()
        .collect()
}

/// Splits the packed portfolio field on any run of whitespace and/or commas,
/// discarding empty tokens and preserving order.
pub fn split_portfolio_urls(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Print rendering of the packed portfolio field: a link count, or `-` when
/// the field holds no tokens.
pub fn portfolio_link_label(text: Option<&str>) -> String {
    let count = text.map(split_portfolio_urls).map(|u| u.len()).unwrap_or(0);
    if count > 0 {
        format!("{} Link Terlampir", count)
    } else {
        "-".to_string()
    }
}

pub fn is_semester_label(s: &str) -> bool {
    SEMESTER_LABELS.contains(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
    }

    fn entry(student_id: &str, date: &str, status: Status) -> AttendanceEntry {
        AttendanceEntry {
            student_id: student_id.to_string(),
            date: d(date),
            status,
        }
    }

    fn grade(id: &str, student: &str, semester: &str, subject: &str) -> GradeRow {
        GradeRow {
            id: id.to_string(),
            student_id: student.to_string(),
            student_name: student.to_string(),
            class_name: "1A".to_string(),
            semester: semester.to_string(),
            subject: subject.to_string(),
            score: 80,
            rubric: "Cakap".to_string(),
            reflection: None,
            portfolio_url: None,
        }
    }

    #[test]
    fn daily_map_contains_exactly_that_days_records() {
        let records = vec![
            entry("a", "2024-03-05", Status::Present),
            entry("b", "2024-03-05", Status::Sick),
            entry("a", "2024-03-06", Status::Absent),
        ];
        let map = daily_status_map(&records, d("2024-03-05"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(&Status::Present));
        assert_eq!(map.get("b"), Some(&Status::Sick));
        // "c" never marked: no key, not a status.
        assert!(!map.contains_key("c"));
    }

    #[test]
    fn daily_map_keeps_dates_separate() {
        let records = vec![
            entry("a", "2024-03-05", Status::Sick),
            entry("a", "2024-03-06", Status::Present),
        ];
        let map = daily_status_map(&records, d("2024-03-06"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a"), Some(&Status::Present));
    }

    #[test]
    fn daily_counts_fold_the_map() {
        let records = vec![
            entry("a", "2024-03-05", Status::Present),
            entry("b", "2024-03-05", Status::Present),
            entry("c", "2024-03-05", Status::Absent),
        ];
        let counts = daily_counts(&daily_status_map(&records, d("2024-03-05")));
        assert_eq!(counts.present, 2);
        assert_eq!(counts.absent, 1);
        assert_eq!(counts.sick, 0);
    }

    #[test]
    fn month_bounds_cover_whole_month() {
        assert_eq!(
            month_bounds(d("2024-03-10")),
            (d("2024-03-01"), d("2024-03-31"))
        );
        // Leap February.
        assert_eq!(
            month_bounds(d("2024-02-15")),
            (d("2024-02-01"), d("2024-02-29"))
        );
        // December rolls the year.
        assert_eq!(
            month_bounds(d("2023-12-31")),
            (d("2023-12-01"), d("2023-12-31"))
        );
    }

    #[test]
    fn monthly_stats_counts_non_present_in_month() {
        let records = vec![
            entry("1", "2024-03-05", Status::Sick),
            entry("1", "2024-03-20", Status::Absent),
            entry("1", "2024-03-11", Status::Present),
            entry("1", "2024-04-01", Status::Sick),
            entry("2", "2024-02-29", Status::Excused),
        ];
        let stats = monthly_stats(&records, d("2024-03-10"));
        assert_eq!(stats.len(), 1);
        let s1 = stats.get("1").copied().expect("student 1 tallied");
        assert_eq!(s1.sick, 1);
        assert_eq!(s1.excused, 0);
        assert_eq!(s1.absent, 1);
        // Student 2 has no March records: absent from the map entirely.
        assert!(!stats.contains_key("2"));
    }

    #[test]
    fn monthly_stats_includes_month_edges() {
        let records = vec![
            entry("1", "2024-03-01", Status::Excused),
            entry("1", "2024-03-31", Status::Excused),
        ];
        let stats = monthly_stats(&records, d("2024-03-15"));
        assert_eq!(stats.get("1").map(|t| t.excused), Some(2));
    }

    #[test]
    fn lifetime_stats_counts_all_four() {
        let statuses = [
            Status::Present,
            Status::Present,
            Status::Sick,
            Status::Excused,
            Status::Absent,
        ];
        let tally = lifetime_stats(statuses.iter());
        assert_eq!(tally.present, 2);
        assert_eq!(tally.sick, 1);
        assert_eq!(tally.excused, 1);
        assert_eq!(tally.absent, 1);
    }

    #[test]
    fn group_by_semester_partitions_without_loss() {
        let grades = vec![
            grade("g1", "a", "Kelas 1 - Ganjil", "Matematika"),
            grade("g2", "a", "Kelas 1 - Genap", "IPA"),
            grade("g3", "b", "Kelas 1 - Ganjil", "Bahasa"),
        ];
        let groups = group_by_semester(&grades);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].semester, "Kelas 1 - Ganjil");
        assert_eq!(groups[1].semester, "Kelas 1 - Genap");
        // Union of members equals the input, each exactly once, order kept.
        let ids: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.grades.iter().map(|r| r.id.as_str()))
            .collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(groups[0].grades[0].id, "g1");
        assert_eq!(groups[0].grades[1].id, "g3");
        assert_eq!(groups[1].grades[0].id, "g2");
    }

    #[test]
    fn group_by_semester_empty_input_has_no_groups() {
        assert!(group_by_semester(&[]).is_empty());
    }

    #[test]
    fn filter_grades_ands_both_predicates() {
        let grades = vec![
            grade("g1", "a", "Kelas 1 - Ganjil", "Matematika"),
            grade("g2", "a", "Kelas 1 - Genap", "Matematika"),
            grade("g3", "a", "Kelas 1 - Ganjil", "IPA Terpadu"),
        ];
        let all = filter_grades(&grades, FILTER_ALL, FILTER_ALL);
        assert_eq!(all.len(), 3);

        let sem = filter_grades(&grades, "Kelas 1 - Ganjil", FILTER_ALL);
        assert_eq!(sem.len(), 2);

        // Subject match is a case-insensitive substring.
        let sub = filter_grades(&grades, FILTER_ALL, "matem");
        assert_eq!(sub.len(), 2);

        let both = filter_grades(&grades, "Kelas 1 - Ganjil", "ipa");
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, "g3");
    }

    #[test]
    fn portfolio_split_is_order_preserving() {
        assert_eq!(
            split_portfolio_urls("a.com, b.com  c.com"),
            vec!["a.com", "b.com", "c.com"]
        );
        assert!(split_portfolio_urls("").is_empty());
        assert!(split_portfolio_urls("  , ,\n ").is_empty());
        assert_eq!(
            split_portfolio_urls("http://a.com,http://b.com"),
            vec!["http://a.com", "http://b.com"]
        );
    }

    #[test]
    fn portfolio_label_counts_links() {
        assert_eq!(
            portfolio_link_label(Some("http://a.com,http://b.com")),
            "2 Link Terlampir"
        );
        assert_eq!(portfolio_link_label(Some("   ")), "-");
        assert_eq!(portfolio_link_label(None), "-");
    }

    #[test]
    fn semester_labels_are_the_fixed_twelve() {
        assert_eq!(SEMESTER_LABELS.len(), 12);
        assert!(is_semester_label("Kelas 1 - Ganjil"));
        assert!(is_semester_label("Kelas 6 - Genap"));
        assert!(!is_semester_label("Kelas 7 - Ganjil"));
        assert!(!is_semester_label(FILTER_ALL));
    }

    #[test]
    fn status_round_trips_display_strings() {
        for s in [
            Status::Present,
            Status::Sick,
            Status::Excused,
            Status::Absent,
        ] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
        assert_eq!(Status::parse("Bolos"), None);
    }
}
