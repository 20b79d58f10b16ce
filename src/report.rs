use chrono::{Datelike, NaiveDate};
use printpdf::path::PaintMode;
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point, Rect, Rgb,
};

use crate::agg::{self, GradeRow, LifetimeTally, SemesterGroup};

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN_LEFT: f32 = 14.0;
const CONTENT_RIGHT: f32 = 196.0;
const CONTENT_W: f32 = CONTENT_RIGHT - MARGIN_LEFT;
const TABLE_BOTTOM: f32 = 282.0;
// Near-bottom thresholds before the attendance and signature blocks.
const ATTENDANCE_BREAK: f32 = 220.0;
const SIGNATURE_BREAK: f32 = 250.0;
const TOP_AFTER_BREAK: f32 = 20.0;

const PT_TO_MM: f32 = 0.352_778;
// Average Helvetica glyph width as a fraction of the font size.
const GLYPH_EM: f32 = 0.5;

const NAVY: (u8, u8, u8) = (30, 60, 114);
const BLACK: (u8, u8, u8) = (0, 0, 0);
const WHITE: (u8, u8, u8) = (255, 255, 255);
const BAND_GREY: (u8, u8, u8) = (240, 240, 240);
const RULE_GREY: (u8, u8, u8) = (180, 180, 180);

const MONTH_NAMES_ID: [&str; 12] = [
    "Januari",
    "Februari",
    "Maret",
    "April",
    "Mei",
    "Juni",
    "Juli",
    "Agustus",
    "September",
    "Oktober",
    "November",
    "Desember",
];

/// Biodata fields printed on the individual report card.
#[derive(Debug, Clone)]
pub struct StudentBio {
    pub name: String,
    pub class_name: String,
    pub nisn: Option<String>,
    pub birth_place: Option<String>,
    pub birth_date: Option<String>,
    pub address: Option<String>,
    pub parent_name: Option<String>,
}

#[derive(Debug)]
pub struct ReportPdf {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Deterministic export name: full report vs single-semester report get
/// distinct names, so repeated exports of the same inputs collide on purpose.
pub fn report_file_name(student_name: &str, semester_filter: &str) -> String {
    let raw = if semester_filter == agg::FILTER_ALL {
        format!("Rapor_Lengkap_{}.pdf", student_name)
    } else {
        format!("Rapor_{}_{}.pdf", semester_filter, student_name)
    };
    sanitize_filename::sanitize(raw)
}

struct DocWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    // Vertical cursor in mm measured from the top edge of the page.
    cursor: f32,
    page_count: usize,
}

fn rgb(c: (u8, u8, u8)) -> Color {
    Color::Rgb(Rgb::new(
        c.0 as f32 / 255.0,
        c.1 as f32 / 255.0,
        c.2 as f32 / 255.0,
        None,
    ))
}

impl DocWriter {
    fn new(title: &str) -> anyhow::Result<Self> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "halaman 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| anyhow::anyhow!("builtin font: {e}"))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| anyhow::anyhow!("builtin font: {e}"))?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(DocWriter {
            doc,
            layer,
            regular,
            bold,
            cursor: TOP_AFTER_BREAK,
            page_count: 1,
        })
    }

    fn add_page(&mut self) {
        self.page_count += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_W),
            Mm(PAGE_H),
            format!("halaman {}", self.page_count),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = TOP_AFTER_BREAK;
    }

    /// Draws `text` with its baseline `y` mm from the top of the page.
    fn text(&self, text: &str, size: f32, x: f32, y: f32, font: &IndirectFontRef) {
        self.layer
            .use_text(text.to_string(), size, Mm(x), Mm(PAGE_H - y), font);
    }

    fn text_centered(&self, text: &str, size: f32, y: f32, font: &IndirectFontRef) {
        let width = approx_text_width(text, size);
        self.text(text, size, (PAGE_W - width) / 2.0, y, font);
    }

    fn set_fill(&self, color: (u8, u8, u8)) {
        self.layer.set_fill_color(rgb(color));
    }

    fn hline(&self, x1: f32, x2: f32, y: f32, thickness_pt: f32, color: (u8, u8, u8)) {
        self.layer.set_outline_color(rgb(color));
        self.layer.set_outline_thickness(thickness_pt);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x1), Mm(PAGE_H - y)), false),
                (Point::new(Mm(x2), Mm(PAGE_H - y)), false),
            ],
            is_closed: false,
        });
    }

    /// `y` is the top edge of the rectangle, from the top of the page.
    fn fill_rect(&self, x: f32, y: f32, w: f32, h: f32, color: (u8, u8, u8)) {
        self.set_fill(color);
        self.layer.add_rect(
            Rect::new(Mm(x), Mm(PAGE_H - y - h), Mm(x + w), Mm(PAGE_H - y))
                .with_mode(PaintMode::Fill),
        );
    }

    fn stroke_rect(&self, x: f32, y: f32, w: f32, h: f32, color: (u8, u8, u8)) {
        self.layer.set_outline_color(rgb(color));
        self.layer.set_outline_thickness(0.3);
        self.layer.add_rect(
            Rect::new(Mm(x), Mm(PAGE_H - y - h), Mm(x + w), Mm(PAGE_H - y))
                .with_mode(PaintMode::Stroke),
        );
    }

    fn into_bytes(self) -> anyhow::Result<(Vec<u8>, usize)> {
        let pages = self.page_count;
        let bytes = self
            .doc
            .save_to_bytes()
            .map_err(|e| anyhow::anyhow!("pdf serialize: {e}"))?;
        Ok((bytes, pages))
    }
}

fn approx_text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * GLYPH_EM * size * PT_TO_MM
}

/// Greedy word wrap against a character budget; words longer than the budget
/// are hard-broken so a single token can never overflow its cell.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split_at = word
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            lines.push(word[..split_at].to_string());
            word = &word[split_at..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

struct TableSpec {
    headers: Vec<&'static str>,
    widths: Vec<f32>,
    font_size: f32,
    // Ruled tables draw cell borders and a filled header band; plain tables
    // draw bold header text only.
    ruled: bool,
}

const CELL_PAD: f32 = 2.0;

impl TableSpec {
    fn line_height(&self) -> f32 {
        self.font_size * 1.3 * PT_TO_MM
    }

    fn max_chars(&self, col: usize) -> usize {
        let inner = self.widths[col] - 2.0 * CELL_PAD;
        (inner / (GLYPH_EM * self.font_size * PT_TO_MM)).floor() as usize
    }
}

fn draw_table_header(w: &mut DocWriter, spec: &TableSpec) {
    let line_h = spec.line_height();
    let row_h = line_h + 2.0 * CELL_PAD;
    if spec.ruled {
        w.fill_rect(MARGIN_LEFT, w.cursor, spec.widths.iter().sum(), row_h, NAVY);
        w.set_fill(WHITE);
    } else {
        w.set_fill(BLACK);
    }
    let mut x = MARGIN_LEFT;
    for (col, header) in spec.headers.iter().enumerate() {
        w.text(
            header,
            spec.font_size,
            x + CELL_PAD,
            w.cursor + CELL_PAD + line_h * 0.8,
            &w.bold,
        );
        x += spec.widths[col];
    }
    w.cursor += row_h;
}

/// Renders a table at the current cursor, breaking to a new page (and
/// repeating the header) whenever a row would cross the bottom margin.
fn draw_table(w: &mut DocWriter, spec: &TableSpec, rows: &[Vec<String>]) {
    draw_table_header(w, spec);
    let line_h = spec.line_height();

    for row in rows {
        let wrapped: Vec<Vec<String>> = row
            .iter()
            .enumerate()
            .map(|(col, cell)| wrap_text(cell, spec.max_chars(col)))
            .collect();
        let lines = wrapped.iter().map(|c| c.len()).max().unwrap_or(1);
        let row_h = lines as f32 * line_h + 2.0 * CELL_PAD;

        if w.cursor + row_h > TABLE_BOTTOM {
            w.add_page();
            draw_table_header(w, spec);
        }

        let mut x = MARGIN_LEFT;
        w.set_fill(BLACK);
        for (col, cell_lines) in wrapped.iter().enumerate() {
            for (i, cell_line) in cell_lines.iter().enumerate() {
                w.text(
                    cell_line,
                    spec.font_size,
                    x + CELL_PAD,
                    w.cursor + CELL_PAD + line_h * (i as f32 + 0.8),
                    &w.regular,
                );
            }
            if spec.ruled {
                w.stroke_rect(x, w.cursor, spec.widths[col], row_h, RULE_GREY);
            }
            x += spec.widths[col];
        }
        w.cursor += row_h;
    }
}

fn format_date_id(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.day(),
        MONTH_NAMES_ID[(date.month0()) as usize],
        date.year()
    )
}

fn or_dash(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}

/// Class-wide grade list: one ruled table over the filtered rows, titled
/// with the active semester filter.
pub fn grade_list_pdf(rows: &[GradeRow], semester_filter: &str) -> anyhow::Result<ReportPdf> {
    let mut w = DocWriter::new("Rekap Nilai")?;

    w.set_fill(BLACK);
    w.text(
        &format!("Rekap Nilai - {}", semester_filter),
        16.0,
        MARGIN_LEFT,
        20.0,
        &w.regular,
    );
    w.cursor = 30.0;

    let spec = TableSpec {
        headers: vec!["Nama", "Kelas/Smt", "Mapel", "Nilai", "Predikat"],
        widths: vec![50.0, 40.0, 40.0, 17.0, 35.0],
        font_size: 10.0,
        ruled: true,
    };
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|g| {
            vec![
                g.student_name.clone(),
                g.semester.clone(),
                g.subject.clone(),
                g.score.to_string(),
                g.rubric.clone(),
            ]
        })
        .collect();
    draw_table(&mut w, &spec, &body);

    let (bytes, page_count) = w.into_bytes()?;
    Ok(ReportPdf {
        file_name: "Rekap_Nilai.pdf".to_string(),
        bytes,
        page_count,
    })
}

/// Individual report card: title, biodata, per-semester grade tables,
/// lifetime attendance summary, and the signature block, with forced page
/// breaks when a block would start too close to the bottom edge.
pub fn student_report_pdf(
    student: &StudentBio,
    groups: &[SemesterGroup],
    attendance: LifetimeTally,
    semester_filter: &str,
    today: NaiveDate,
) -> anyhow::Result<ReportPdf> {
    let mut w = DocWriter::new("Laporan Hasil Belajar")?;

    // Title block, suffixed with the selected semester when not "Semua".
    let title = if semester_filter == agg::FILTER_ALL {
        "LAPORAN HASIL BELAJAR".to_string()
    } else {
        format!(
            "LAPORAN HASIL BELAJAR - {}",
            semester_filter.to_uppercase()
        )
    };
    w.set_fill(NAVY);
    w.text_centered(&title, 16.0, 20.0, &w.bold);

    // Biodata, two columns.
    w.set_fill(BLACK);
    let start_y = 35.0;
    let ttl = format!(
        "{}, {}",
        or_dash(student.birth_place.as_deref()),
        or_dash(student.birth_date.as_deref())
    );
    let left = [
        format!("Nama: {}", student.name),
        format!("NISN: {}", or_dash(student.nisn.as_deref())),
        format!("Kelas: {}", student.class_name),
    ];
    let right = [
        format!("TTL: {}", ttl),
        format!("Wali: {}", or_dash(student.parent_name.as_deref())),
        format!("Alamat: {}", or_dash(student.address.as_deref())),
    ];
    for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        let y = start_y + 6.0 * i as f32;
        w.text(l, 10.0, MARGIN_LEFT, y, &w.regular);
        w.text(r, 10.0, 110.0, y, &w.regular);
    }
    w.hline(MARGIN_LEFT, CONTENT_RIGHT, start_y + 18.0, 0.5, BLACK);
    w.cursor = start_y + 25.0;

    // All groups when "Semua", else just the selected label when present.
    let to_print: Vec<&SemesterGroup> = if semester_filter == agg::FILTER_ALL {
        groups.iter().collect()
    } else {
        groups
            .iter()
            .filter(|g| g.semester == semester_filter)
            .collect()
    };

    let spec = TableSpec {
        headers: vec!["Mata Pelajaran", "Nilai", "Predikat", "Catatan", "Portofolio"],
        widths: vec![45.0, 15.0, 30.0, 54.0, 38.0],
        font_size: 10.0,
        ruled: true,
    };
    for group in to_print {
        // Keep the band together with at least the table header.
        if w.cursor + 28.0 > TABLE_BOTTOM {
            w.add_page();
        }
        w.fill_rect(MARGIN_LEFT, w.cursor, CONTENT_W, 8.0, BAND_GREY);
        w.set_fill(NAVY);
        w.text(
            &group.semester,
            11.0,
            MARGIN_LEFT + 2.0,
            w.cursor + 5.5,
            &w.bold,
        );
        w.cursor += 10.0;

        let body: Vec<Vec<String>> = group
            .grades
            .iter()
            .map(|g| {
                vec![
                    g.subject.clone(),
                    g.score.to_string(),
                    g.rubric.clone(),
                    or_dash(g.reflection.as_deref()),
                    agg::portfolio_link_label(g.portfolio_url.as_deref()),
                ]
            })
            .collect();
        draw_table(&mut w, &spec, &body);
        w.cursor += 10.0;
    }

    // Attendance summary uses the full-history counts, never the monthly
    // tallies.
    if w.cursor > ATTENDANCE_BREAK {
        w.add_page();
    }
    w.set_fill(BLACK);
    w.text(
        "Keterangan Ketidakhadiran:",
        11.0,
        MARGIN_LEFT,
        w.cursor,
        &w.bold,
    );
    w.cursor += 5.0;
    let attendance_spec = TableSpec {
        headers: vec!["Keterangan", "Jumlah Hari"],
        widths: vec![60.0, 40.0],
        font_size: 10.0,
        ruled: false,
    };
    let attendance_rows = vec![
        vec!["Sakit".to_string(), format!("{} hari", attendance.sick)],
        vec!["Izin".to_string(), format!("{} hari", attendance.excused)],
        vec!["Alpha".to_string(), format!("{} hari", attendance.absent)],
    ];
    draw_table(&mut w, &attendance_spec, &attendance_rows);
    w.cursor += 15.0;

    // Signature block.
    if w.cursor > SIGNATURE_BREAK {
        w.add_page();
    }
    w.set_fill(BLACK);
    let sign_x = 140.0;
    w.text(
        &format!(".................., {}", format_date_id(today)),
        10.0,
        sign_x,
        w.cursor,
        &w.regular,
    );
    w.text("Wali Kelas", 10.0, sign_x, w.cursor + 20.0, &w.regular);
    w.text(
        "( ..................................... )",
        10.0,
        sign_x,
        w.cursor + 45.0,
        &w.regular,
    );

    let file_name = report_file_name(&student.name, semester_filter);
    let (bytes, page_count) = w.into_bytes()?;
    Ok(ReportPdf {
        file_name,
        bytes,
        page_count,
    })
}
