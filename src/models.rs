use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Ordinal roll number, parsed once at ingestion. Raw values that do not
/// parse as an unsigned integer map to `MALFORMED`, which sorts after every
/// real roll number so anomalous records stay visible at the end of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RollNo(pub u32);

impl RollNo {
    pub const MALFORMED: RollNo = RollNo(u32::MAX);

    pub fn parse(raw: &str) -> RollNo {
        raw.trim().parse::<u32>().map(RollNo).unwrap_or(RollNo::MALFORMED)
    }

    pub fn is_malformed(self) -> bool {
        self == RollNo::MALFORMED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub roll_raw: String,
    pub roll_no: RollNo,
    pub division: Option<String>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Roll number as shown on the report: the raw enrollment value for
    /// malformed records, the parsed number otherwise.
    pub fn roll_label(&self) -> String {
        if self.roll_no.is_malformed() {
            format!("{}?", self.roll_raw.trim())
        } else {
            self.roll_no.0.to_string()
        }
    }
}

/// Inclusive roll-number range a practical session applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RollRange {
    pub start: u32,
    pub end: u32,
}

impl RollRange {
    pub fn contains(&self, roll_no: RollNo) -> bool {
        !roll_no.is_malformed() && self.start <= roll_no.0 && roll_no.0 <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionKind {
    Theory,
    Practical {
        batch: String,
        roll_range: Option<RollRange>,
    },
}

impl SessionKind {
    pub fn short_label(&self) -> String {
        match self {
            SessionKind::Theory => "TH".to_string(),
            SessionKind::Practical { batch, .. } => format!("PR {}", batch),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub subject: String,
    pub held_at: DateTime<Utc>,
    pub kind: SessionKind,
    /// Specific division this session was held for; `None` means all divisions.
    pub division: Option<String>,
    pub teacher_name: Option<String>,
}

impl Session {
    /// Whether this session counts toward the student's totals at all.
    /// Applicability is the single dispatch point for the theory/practical
    /// split and the division-mismatch rule.
    pub fn applies_to(&self, student: &Student, division_scope: &DivisionScope) -> bool {
        if division_scope.uses_divisions() {
            if let Some(session_division) = &self.division {
                if student.division.as_deref() != Some(session_division.as_str()) {
                    return false;
                }
            }
        }
        match &self.kind {
            SessionKind::Theory => true,
            SessionKind::Practical {
                roll_range: Some(range),
                ..
            } => range.contains(student.roll_no),
            SessionKind::Practical { roll_range: None, .. } => true,
        }
    }

    pub fn column_label(&self) -> String {
        format!("{} {}", self.held_at.format("%d/%m %H:%M"), self.kind.short_label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMark {
    pub session_id: Uuid,
    pub roll_no: RollNo,
    pub marked_at: DateTime<Utc>,
}

/// How the requested cohort relates to divisions. The caller decides which
/// cohort types use divisions; the core only acts on what it is told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DivisionScope {
    /// Cohort type has no divisions; session-level division data is ignored.
    NotUsed,
    /// Division-aware cohort, no roster filter ("All").
    All,
    /// Division-aware cohort restricted to one division.
    Only(String),
}

impl DivisionScope {
    pub fn uses_divisions(&self) -> bool {
        !matches!(self, DivisionScope::NotUsed)
    }

    pub fn label(&self) -> String {
        match self {
            DivisionScope::NotUsed => "-".to_string(),
            DivisionScope::All => "All".to_string(),
            DivisionScope::Only(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Immutable parameters for one report invocation. The caller constructs a
/// fresh request per filter change; nothing in the report path mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub institution_id: String,
    pub subject: String,
    pub year: String,
    pub department: String,
    pub division: DivisionScope,
    pub window: ReportWindow,
    pub teacher_name: Option<String>,
    pub defaulter_threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellStatus {
    Present,
    Absent,
    NotApplicable,
}

impl CellStatus {
    pub fn code(self) -> &'static str {
        match self {
            CellStatus::Present => "P",
            CellStatus::Absent => "A",
            CellStatus::NotApplicable => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportColumn {
    pub session_id: Uuid,
    pub held_at: DateTime<Utc>,
    /// Combined header, e.g. "03/08 10:00 PR A1".
    pub label: String,
    /// Kind/batch part alone, e.g. "TH" or "PR A1".
    pub kind_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub roll_no: RollNo,
    pub roll_label: String,
    pub name: String,
    pub cells: Vec<CellStatus>,
    pub total_held: u32,
    pub total_attended: u32,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMeta {
    pub institution_id: String,
    pub subject: String,
    pub year: String,
    pub department: String,
    pub division: String,
    pub window: ReportWindow,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceReport {
    pub meta: ReportMeta,
    pub columns: Vec<ReportColumn>,
    pub rows: Vec<ReportRow>,
    /// Presence marks whose session metadata could not be resolved.
    pub dropped_mark_count: usize,
}
