//! Report exporters: flat CSV and tabular PDF.
//!
//! Both render the finished matrix into bytes first and only then touch the
//! filesystem, through a temp-file-and-rename write, so a failed render or
//! interrupted write never leaves a partial artifact at the target path.

use std::fs;
use std::path::Path;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

use crate::error::ExportError;
use crate::models::{AttendanceReport, ReportRow};

/// One row per student, one column per session plus the summary columns,
/// suitable for spreadsheet import.
pub fn csv_bytes(report: &AttendanceReport) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["Roll No".to_string(), "Name".to_string()];
    header.extend(report.columns.iter().map(|column| column.label.clone()));
    header.push("Total Held".to_string());
    header.push("Total Attended".to_string());
    header.push("Percentage".to_string());
    writer.write_record(&header)?;

    for row in &report.rows {
        let mut record = vec![row.roll_label.clone(), row.name.clone()];
        record.extend(row.cells.iter().map(|cell| cell.code().to_string()));
        record.push(row.total_held.to_string());
        record.push(row.total_attended.to_string());
        record.push(row.percentage.to_string());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

pub fn write_csv(report: &AttendanceReport, path: &Path) -> Result<(), ExportError> {
    let bytes = csv_bytes(report)?;
    write_atomic(path, &bytes)
}

pub fn write_pdf(report: &AttendanceReport, path: &Path) -> Result<(), ExportError> {
    let bytes = pdf_bytes(report)?;
    write_atomic(path, &bytes)
}

// A4 landscape, all coordinates in millimetres from the bottom-left corner.
const PAGE_W: f64 = 297.0;
const PAGE_H: f64 = 210.0;
const MARGIN: f64 = 12.0;
const ROW_STEP: f64 = 5.0;

fn mm(value: f64) -> Mm {
    Mm(value as _)
}

struct TableLayout {
    roll_x: f64,
    name_x: f64,
    session_x: f64,
    session_w: f64,
    held_x: f64,
    attended_x: f64,
    percent_x: f64,
}

impl TableLayout {
    fn for_report(report: &AttendanceReport) -> TableLayout {
        let roll_x = MARGIN;
        let name_x = roll_x + 14.0;
        let session_x = name_x + 48.0;
        let summary_w = 40.0;
        let summary_x = PAGE_W - MARGIN - summary_w;
        let count = report.columns.len().max(1) as f64;
        TableLayout {
            roll_x,
            name_x,
            session_x,
            session_w: (summary_x - session_x) / count,
            held_x: summary_x + 2.0,
            attended_x: summary_x + 16.0,
            percent_x: summary_x + 32.0,
        }
    }

    fn session_chars(&self) -> usize {
        // ~1.1mm per character at the header font size, with slack.
        (self.session_w / 1.3).max(1.0) as usize
    }
}

/// Tabular PDF with the cohort metadata, legend, and the full matrix,
/// paginated by rows with the header repeated on every page.
pub fn pdf_bytes(report: &AttendanceReport) -> Result<Vec<u8>, ExportError> {
    let meta = &report.meta;
    let title = format!("Attendance Report - {}", meta.subject);
    let (doc, first_page, first_layer) =
        PdfDocument::new(title.clone(), mm(PAGE_W), mm(PAGE_H), "report");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;

    let layout = TableLayout::for_report(report);
    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = PAGE_H - 16.0;

    layer.use_text(title, 14.0, mm(MARGIN), mm(y), &bold);
    y -= 7.0;
    layer.use_text(
        format!(
            "{} {} | Division: {} | Window: {} to {}",
            meta.year,
            meta.department,
            meta.division,
            meta.window.from.format("%Y-%m-%d"),
            meta.window.to.format("%Y-%m-%d")
        ),
        9.0,
        mm(MARGIN),
        mm(y),
        &font,
    );
    y -= 5.0;
    if let Some(teacher) = &meta.teacher_name {
        layer.use_text(format!("Teacher: {}", teacher), 9.0, mm(MARGIN), mm(y), &font);
        y -= 5.0;
    }
    layer.use_text(
        "P = Present, A = Absent, - = Not applicable",
        8.0,
        mm(MARGIN),
        mm(y),
        &font,
    );
    y -= 9.0;

    draw_header_row(&layer, &layout, report, y, &bold);
    y -= 8.0;

    for row in &report.rows {
        if y < MARGIN + 4.0 {
            let (page, page_layer) = doc.add_page(mm(PAGE_W), mm(PAGE_H), "report");
            layer = doc.get_page(page).get_layer(page_layer);
            y = PAGE_H - 16.0;
            draw_header_row(&layer, &layout, report, y, &bold);
            y -= 8.0;
        }
        draw_data_row(&layer, &layout, row, y, &font);
        y -= ROW_STEP;
    }

    doc.save_to_bytes()
        .map_err(|e| ExportError::Pdf(e.to_string()))
}

fn draw_header_row(
    layer: &PdfLayerReference,
    layout: &TableLayout,
    report: &AttendanceReport,
    y: f64,
    font: &IndirectFontRef,
) {
    layer.use_text("Roll", 7.0, mm(layout.roll_x), mm(y), font);
    layer.use_text("Name", 7.0, mm(layout.name_x), mm(y), font);
    let max_chars = layout.session_chars();
    for (idx, column) in report.columns.iter().enumerate() {
        let x = layout.session_x + layout.session_w * idx as f64;
        let when = column.held_at.format("%d/%m %H:%M").to_string();
        layer.use_text(clip_chars(&when, max_chars), 6.0, mm(x), mm(y), font);
        layer.use_text(
            clip_chars(&column.kind_label, max_chars),
            6.0,
            mm(x),
            mm(y - 2.8),
            font,
        );
    }
    layer.use_text("Held", 7.0, mm(layout.held_x), mm(y), font);
    layer.use_text("Att", 7.0, mm(layout.attended_x), mm(y), font);
    layer.use_text("%", 7.0, mm(layout.percent_x), mm(y), font);
}

fn draw_data_row(
    layer: &PdfLayerReference,
    layout: &TableLayout,
    row: &ReportRow,
    y: f64,
    font: &IndirectFontRef,
) {
    layer.use_text(row.roll_label.as_str(), 7.0, mm(layout.roll_x), mm(y), font);
    layer.use_text(clip_chars(&row.name, 28), 7.0, mm(layout.name_x), mm(y), font);
    for (idx, cell) in row.cells.iter().enumerate() {
        let x = layout.session_x + layout.session_w * idx as f64 + layout.session_w / 2.0 - 1.0;
        layer.use_text(cell.code(), 7.0, mm(x), mm(y), font);
    }
    layer.use_text(row.total_held.to_string(), 7.0, mm(layout.held_x), mm(y), font);
    layer.use_text(
        row.total_attended.to_string(),
        7.0,
        mm(layout.attended_x),
        mm(y),
        font,
    );
    layer.use_text(row.percentage.to_string(), 7.0, mm(layout.percent_x), mm(y), font);
}

fn clip_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|source| ExportError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix;
    use crate::models::{
        DivisionScope, PresenceMark, ReportRequest, ReportWindow, RollNo, Session, SessionKind,
        Student,
    };
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn scenario_report() -> AttendanceReport {
        let roster = vec![
            Student {
                id: Uuid::from_u128(1),
                first_name: "Asha".to_string(),
                last_name: "Apte".to_string(),
                roll_raw: "1".to_string(),
                roll_no: RollNo(1),
                division: None,
            },
            Student {
                id: Uuid::from_u128(2),
                first_name: "Bala".to_string(),
                last_name: "Bhosale".to_string(),
                roll_raw: "2".to_string(),
                roll_no: RollNo(2),
                division: None,
            },
        ];
        let session = Session {
            id: Uuid::from_u128(10),
            subject: "DBMS".to_string(),
            held_at: Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap(),
            kind: SessionKind::Theory,
            division: None,
            teacher_name: None,
        };
        let marks = vec![PresenceMark {
            session_id: session.id,
            roll_no: RollNo(1),
            marked_at: session.held_at,
        }];
        let request = ReportRequest {
            institution_id: "inst-1".to_string(),
            subject: "DBMS".to_string(),
            year: "SE".to_string(),
            department: "Computer".to_string(),
            division: DivisionScope::NotUsed,
            window: ReportWindow {
                from: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
                to: Utc.with_ymd_and_hms(2026, 8, 31, 0, 0, 0).unwrap(),
            },
            teacher_name: None,
            defaulter_threshold: 75,
        };
        matrix::build(&request, &roster, &[session], &marks)
    }

    #[test]
    fn csv_has_header_and_one_row_per_student() {
        let bytes = csv_bytes(&scenario_report()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Roll No,Name,03/08 10:00 TH,Total Held,Total Attended,Percentage"
        );
        assert_eq!(lines[1], "1,Asha Apte,P,1,1,100");
        assert_eq!(lines[2], "2,Bala Bhosale,A,1,0,0");
    }

    #[test]
    fn pdf_bytes_produce_a_pdf_document() {
        let bytes = pdf_bytes(&scenario_report()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn write_to_missing_directory_surfaces_error() {
        let target = std::env::temp_dir()
            .join("acadex-no-such-dir")
            .join("report.csv");
        let result = write_csv(&scenario_report(), &target);
        assert!(matches!(result, Err(ExportError::Write { .. })));
    }

    #[test]
    fn write_csv_creates_file_and_cleans_temp() {
        let dir = std::env::temp_dir().join("acadex-export-test");
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("report.csv");
        write_csv(&scenario_report(), &target).unwrap();
        assert!(target.exists());
        assert!(!target.with_extension("tmp").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
