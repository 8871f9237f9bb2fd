use std::fmt::Write;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::debug;

use crate::db;
use crate::error::ReportError;
use crate::matrix;
use crate::models::{AttendanceReport, ReportRequest, ReportRow};
use crate::request::{LatestReport, ReportSequencer};

/// Builds attendance reports against one connection pool, keeping only the
/// most recent result. Each `refresh` is tagged with a token so a slow,
/// superseded request can never replace a newer report.
pub struct ReportService {
    pool: PgPool,
    sequencer: ReportSequencer,
    latest: LatestReport,
}

impl ReportService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sequencer: ReportSequencer::new(),
            latest: LatestReport::new(),
        }
    }

    /// Fetch a fresh snapshot and rebuild the matrix. The roster, session,
    /// and mark fetches are independent and run concurrently; aggregation
    /// waits for all three. Returns `None` when a newer request superseded
    /// this one mid-fetch.
    pub async fn refresh(
        &self,
        request: &ReportRequest,
    ) -> Result<Option<Arc<AttendanceReport>>, ReportError> {
        let token = self.sequencer.begin();
        let (roster, sessions, marks) = tokio::try_join!(
            db::fetch_roster(&self.pool, request),
            db::fetch_sessions(&self.pool, &request.subject, &request.window),
            db::fetch_presence_marks(&self.pool, &request.subject, &request.window),
        )?;
        if !self.sequencer.is_current(token) {
            debug!(subject = %request.subject, "report request superseded during fetch");
            return Ok(None);
        }
        let report = matrix::build(request, &roster, &sessions, &marks);
        Ok(self.latest.publish(token, report))
    }

    /// The most recently published report, if any.
    pub fn latest(&self) -> Option<Arc<AttendanceReport>> {
        self.latest.snapshot()
    }
}

pub fn render_text(report: &AttendanceReport, defaulter_threshold: u32) -> String {
    let mut output = String::new();
    let meta = &report.meta;

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(
        output,
        "{} {} | Division: {} | Subject: {}",
        meta.year, meta.department, meta.division, meta.subject
    );
    let _ = writeln!(
        output,
        "Window: {} to {}",
        meta.window.from.format("%Y-%m-%d"),
        meta.window.to.format("%Y-%m-%d")
    );
    if let Some(teacher) = &meta.teacher_name {
        let _ = writeln!(output, "Teacher: {}", teacher);
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Sessions: {} | Students: {} | Class average: {}%",
        report.columns.len(),
        report.rows.len(),
        class_average(&report.rows)
    );
    if report.dropped_mark_count > 0 {
        let _ = writeln!(
            output,
            "Ignored {} presence mark(s) without session metadata.",
            report.dropped_mark_count
        );
    }
    let _ = writeln!(output);

    if report.rows.is_empty() {
        let _ = writeln!(output, "No students in scope for this report.");
        return output;
    }

    let roll_w = report
        .rows
        .iter()
        .map(|row| row.roll_label.len())
        .chain([4])
        .max()
        .unwrap_or(4);
    let name_w = report
        .rows
        .iter()
        .map(|row| row.name.chars().count())
        .chain([4])
        .max()
        .unwrap_or(4)
        .min(24);

    let mut header = format!("{:<roll_w$}  {:<name_w$}", "Roll", "Name");
    for column in &report.columns {
        let _ = write!(header, "  {}", column.label);
    }
    let _ = write!(header, "  {:>4}  {:>8}  {:>4}", "Held", "Attended", "%");
    let _ = writeln!(output, "{}", header);

    for row in &report.rows {
        let mut line = format!("{:<roll_w$}  {:<name_w$}", row.roll_label, clip(&row.name, name_w));
        for (cell, column) in row.cells.iter().zip(&report.columns) {
            let _ = write!(line, "  {:^width$}", cell.code(), width = column.label.len());
        }
        let _ = write!(
            line,
            "  {:>4}  {:>8}  {:>3}%",
            row.total_held, row.total_attended, row.percentage
        );
        let _ = writeln!(output, "{}", line);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "P = Present, A = Absent, - = Not applicable");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Below {}% attendance", defaulter_threshold);
    let defaulters: Vec<&ReportRow> = report
        .rows
        .iter()
        .filter(|row| row.total_held > 0 && row.percentage < defaulter_threshold)
        .collect();
    if defaulters.is_empty() {
        let _ = writeln!(output, "No students below the threshold.");
    } else {
        for row in defaulters {
            let _ = writeln!(
                output,
                "- {} {} at {}% ({}/{})",
                row.roll_label, row.name, row.percentage, row.total_attended, row.total_held
            );
        }
    }

    output
}

fn class_average(rows: &[ReportRow]) -> u32 {
    if rows.is_empty() {
        return 0;
    }
    let sum: u32 = rows.iter().map(|row| row.percentage).sum();
    ((f64::from(sum) / rows.len() as f64) + 0.5).floor() as u32
}

fn clip(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DivisionScope, PresenceMark, ReportWindow, RollNo, Session, SessionKind, Student,
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
            teacher_name: Some("Prof. Kelkar".to_string()),
            defaulter_threshold: 75,
        };
        matrix::build(&request, &roster, &[session], &marks)
    }

    #[test]
    fn rendered_report_has_header_table_and_legend() {
        let rendered = render_text(&scenario_report(), 75);
        assert!(rendered.contains("# Attendance Report"));
        assert!(rendered.contains("SE Computer | Division: - | Subject: DBMS"));
        assert!(rendered.contains("Teacher: Prof. Kelkar"));
        assert!(rendered.contains("Sessions: 1 | Students: 2 | Class average: 50%"));
        assert!(rendered.contains("P = Present, A = Absent, - = Not applicable"));
    }

    #[test]
    fn defaulters_are_listed_below_threshold() {
        let rendered = render_text(&scenario_report(), 75);
        assert!(rendered.contains("## Below 75% attendance"));
        assert!(rendered.contains("- 2 Bala Bhosale at 0% (0/1)"));
        assert!(!rendered.contains("- 1 Asha Apte"));
    }

    #[test]
    fn empty_roster_renders_without_table() {
        let mut report = scenario_report();
        report.rows.clear();
        let rendered = render_text(&report, 75);
        assert!(rendered.contains("No students in scope for this report."));
    }
}
