use std::collections::HashSet;

use tracing::warn;
use uuid::Uuid;

use crate::models::{
    AttendanceReport, CellStatus, PresenceMark, ReportColumn, ReportMeta, ReportRequest,
    ReportRow, RollNo, Session, Student,
};

/// Attendance percentage, rounded half-up. Zero held sessions is a valid
/// state (a student outside every roll-range) and yields zero, not NaN.
pub fn percentage(attended: u32, held: u32) -> u32 {
    if held == 0 {
        0
    } else {
        ((100.0 * f64::from(attended) / f64::from(held)) + 0.5).floor() as u32
    }
}

/// Build the roll x session matrix from one snapshot of roster, resolved
/// sessions, and raw presence marks. Pure: same inputs, same output,
/// including row and column order.
pub fn build(
    request: &ReportRequest,
    roster: &[Student],
    sessions: &[Session],
    marks: &[PresenceMark],
) -> AttendanceReport {
    // Column order is chronological; session id breaks timestamp ties so
    // the output is stable across invocations.
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| a.held_at.cmp(&b.held_at).then_with(|| a.id.cmp(&b.id)));

    let resolved: HashSet<Uuid> = ordered.iter().map(|s| s.id).collect();

    // Presence is a boolean fact per (session, roll): duplicates collapse,
    // and marks pointing at unresolvable sessions are excluded up front.
    let mut present: HashSet<(Uuid, RollNo)> = HashSet::new();
    let mut dropped_mark_count = 0usize;
    for mark in marks {
        if !resolved.contains(&mark.session_id) {
            dropped_mark_count += 1;
            continue;
        }
        present.insert((mark.session_id, mark.roll_no));
    }
    if dropped_mark_count > 0 {
        warn!(
            dropped = dropped_mark_count,
            subject = %request.subject,
            "excluded presence marks without resolvable session metadata"
        );
    }

    let mut students: Vec<&Student> = roster.iter().collect();
    students.sort_by(|a, b| {
        a.roll_no
            .cmp(&b.roll_no)
            .then_with(|| a.last_name.cmp(&b.last_name))
            .then_with(|| a.first_name.cmp(&b.first_name))
    });

    let mut rows = Vec::with_capacity(students.len());
    for student in students {
        if student.roll_no.is_malformed() {
            warn!(
                roll = %student.roll_raw,
                student = %student.full_name(),
                "roster record has a non-numeric roll number"
            );
        }
        let mut cells = Vec::with_capacity(ordered.len());
        let mut total_held = 0u32;
        let mut total_attended = 0u32;
        for session in &ordered {
            let status = if !session.applies_to(student, &request.division) {
                CellStatus::NotApplicable
            } else if present.contains(&(session.id, student.roll_no)) {
                CellStatus::Present
            } else {
                CellStatus::Absent
            };
            if status != CellStatus::NotApplicable {
                total_held += 1;
            }
            if status == CellStatus::Present {
                total_attended += 1;
            }
            cells.push(status);
        }
        rows.push(ReportRow {
            roll_no: student.roll_no,
            roll_label: student.roll_label(),
            name: student.full_name(),
            cells,
            total_held,
            total_attended,
            percentage: percentage(total_attended, total_held),
        });
    }

    let columns = ordered
        .iter()
        .map(|session| ReportColumn {
            session_id: session.id,
            held_at: session.held_at,
            label: session.column_label(),
            kind_label: session.kind.short_label(),
        })
        .collect();

    AttendanceReport {
        meta: meta_for(request),
        columns,
        rows,
        dropped_mark_count,
    }
}

fn meta_for(request: &ReportRequest) -> ReportMeta {
    ReportMeta {
        institution_id: request.institution_id.clone(),
        subject: request.subject.clone(),
        year: request.year.clone(),
        department: request.department.clone(),
        division: request.division.label(),
        window: request.window,
        teacher_name: request.teacher_name.clone(),
    }
}
