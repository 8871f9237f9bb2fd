use anyhow::Context;
use chrono::{TimeZone, Utc};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::error::ReportError;
use crate::models::{
    DivisionScope, PresenceMark, ReportRequest, ReportWindow, RollNo, RollRange, Session,
    SessionKind, Student,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fetch the roster for the requested (institution, year, department) scope,
/// optionally narrowed to one division. An empty result set is valid.
pub async fn fetch_roster(
    pool: &PgPool,
    request: &ReportRequest,
) -> Result<Vec<Student>, ReportError> {
    if request.year.trim().is_empty() || request.department.trim().is_empty() {
        return Err(ReportError::InvalidScope(
            "year and department must be non-empty".to_string(),
        ));
    }

    let mut query = String::from(
        "SELECT id, first_name, last_name, roll_no, division \
         FROM acadex.students \
         WHERE institution_id = $1 AND year = $2 AND department = $3",
    );
    if matches!(request.division, DivisionScope::Only(_)) {
        query.push_str(" AND division = $4");
    }

    let mut rows = sqlx::query(&query)
        .bind(&request.institution_id)
        .bind(&request.year)
        .bind(&request.department);
    if let DivisionScope::Only(division) = &request.division {
        rows = rows.bind(division);
    }

    let records = rows.fetch_all(pool).await?;
    let mut roster = Vec::with_capacity(records.len());
    for row in records {
        let roll_raw: String = row.get("roll_no");
        roster.push(Student {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            roll_no: RollNo::parse(&roll_raw),
            roll_raw,
            division: normalize_division(row.get("division")),
        });
    }
    Ok(roster)
}

/// Resolve session metadata for a subject and window. Rows that cannot be
/// classified (unknown kind) are dropped with a warning; a roll-range only
/// exists when both endpoints are present and non-negative.
pub async fn fetch_sessions(
    pool: &PgPool,
    subject: &str,
    window: &ReportWindow,
) -> Result<Vec<Session>, ReportError> {
    let records = sqlx::query(
        "SELECT id, subject, held_at, kind, batch, division, roll_start, roll_end, teacher_name \
         FROM acadex.sessions \
         WHERE subject = $1 AND held_at >= $2 AND held_at <= $3 \
         ORDER BY held_at",
    )
    .bind(subject)
    .bind(window.from)
    .bind(window.to)
    .fetch_all(pool)
    .await?;

    let mut sessions = Vec::with_capacity(records.len());
    for row in records {
        let id: Uuid = row.get("id");
        let kind_raw: String = row.get("kind");
        let kind = match kind_raw.as_str() {
            "theory" => SessionKind::Theory,
            "practical" => {
                let batch: Option<String> = row.get("batch");
                let roll_start: Option<i32> = row.get("roll_start");
                let roll_end: Option<i32> = row.get("roll_end");
                let roll_range = match (roll_start, roll_end) {
                    (Some(start), Some(end)) if start >= 0 && end >= 0 => Some(RollRange {
                        start: start as u32,
                        end: end as u32,
                    }),
                    (None, None) => None,
                    _ => {
                        warn!(session = %id, "ignoring half-formed roll range");
                        None
                    }
                };
                SessionKind::Practical {
                    batch: batch.unwrap_or_else(|| "All".to_string()),
                    roll_range,
                }
            }
            other => {
                warn!(session = %id, kind = %other, "dropping session with unknown kind");
                continue;
            }
        };
        sessions.push(Session {
            id,
            subject: row.get("subject"),
            held_at: row.get("held_at"),
            kind,
            division: normalize_division(row.get("division")),
            teacher_name: row.get("teacher_name"),
        });
    }
    Ok(sessions)
}

pub async fn fetch_presence_marks(
    pool: &PgPool,
    subject: &str,
    window: &ReportWindow,
) -> Result<Vec<PresenceMark>, ReportError> {
    let records = sqlx::query(
        "SELECT session_id, roll_no, marked_at \
         FROM acadex.presence_marks \
         WHERE subject = $1 AND marked_at >= $2 AND marked_at <= $3",
    )
    .bind(subject)
    .bind(window.from)
    .bind(window.to)
    .fetch_all(pool)
    .await?;

    let mut marks = Vec::with_capacity(records.len());
    for row in records {
        let roll_raw: String = row.get("roll_no");
        marks.push(PresenceMark {
            session_id: row.get("session_id"),
            roll_no: RollNo::parse(&roll_raw),
            marked_at: row.get("marked_at"),
        });
    }
    Ok(marks)
}

/// Session-level division sentinel: "All" (or blank) means no specific division.
fn normalize_division(raw: Option<String>) -> Option<String> {
    raw.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let institution = "acadex-demo";
    let subject = "Mechanics";

    let students = vec![
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e01", "Aarav", "Joshi", "1", Some("A")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e02", "Diya", "Kulkarni", "2", Some("A")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e03", "Ishaan", "Deshpande", "3", Some("A")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e04", "Meera", "Patil", "4", Some("A")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e05", "Rohan", "Sawant", "5", Some("A")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e06", "Sara", "Shaikh", "6", Some("B")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e07", "Vihaan", "Gokhale", "7", Some("B")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e08", "Anaya", "Kamat", "8", Some("B")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e09", "Kabir", "Naik", "9", Some("B")),
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e10", "Zoya", "Fernandes", "10", Some("B")),
        // Raw roll from the enrollment feed that never got a number.
        ("7b0c7f4e-51d6-4f6e-9e43-1a2b3c4d5e11", "Tanvi", "Rane", "TBD", Some("A")),
    ];

    for (id, first_name, last_name, roll_no, division) in students {
        sqlx::query(
            r#"
            INSERT INTO acadex.students (id, institution_id, first_name, last_name, roll_no, year, department, division)
            VALUES ($1, $2, $3, $4, $5, 'FE', 'Computer', $6)
            ON CONFLICT (institution_id, year, department, roll_no) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                division = EXCLUDED.division
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(institution)
        .bind(first_name)
        .bind(last_name)
        .bind(roll_no)
        .bind(division)
        .execute(pool)
        .await?;
    }

    let sessions = vec![
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0001", 3, 10, "theory", None, Some("A"), None, Some("Prof. Kelkar")),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0002", 3, 11, "theory", None, Some("B"), None, Some("Prof. Kelkar")),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0003", 4, 14, "practical", Some("A1"), Some("A"), Some((1, 3)), Some("Prof. Kelkar")),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0004", 5, 14, "practical", Some("A2"), Some("A"), Some((4, 5)), Some("Prof. Kelkar")),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", 6, 9, "theory", None, None, None, Some("Prof. Kelkar")),
    ];

    for (id, day, hour, kind, batch, division, roll_range, teacher_name) in sessions {
        let held_at = Utc
            .with_ymd_and_hms(2026, 8, day, hour, 0, 0)
            .single()
            .context("invalid session date")?;
        let (roll_start, roll_end) = match roll_range {
            Some((start, end)) => (Some(start), Some(end)),
            None => (None::<i32>, None::<i32>),
        };
        sqlx::query(
            r#"
            INSERT INTO acadex.sessions (id, subject, held_at, kind, batch, division, roll_start, roll_end, teacher_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET held_at = EXCLUDED.held_at,
                kind = EXCLUDED.kind,
                batch = EXCLUDED.batch,
                division = EXCLUDED.division,
                roll_start = EXCLUDED.roll_start,
                roll_end = EXCLUDED.roll_end,
                teacher_name = EXCLUDED.teacher_name
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(subject)
        .bind(held_at)
        .bind(kind)
        .bind(batch)
        .bind(division)
        .bind(roll_start)
        .bind(roll_end)
        .bind(teacher_name)
        .execute(pool)
        .await?;
    }

    let marks = vec![
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0001", "1"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0001", "2"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0001", "3"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0001", "5"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0002", "6"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0002", "7"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0002", "9"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0002", "10"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0003", "1"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0003", "3"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0004", "4"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "1"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "2"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "4"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "6"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "8"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "9"),
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0005", "TBD"),
        // Mark left behind by a session that was deleted afterwards; the
        // report path must drop it rather than fail.
        ("9e1f2a3b-0001-4c5d-8e9f-aabbccdd0099", "2"),
    ];

    for (session_id, roll_no) in marks {
        let session_id = Uuid::parse_str(session_id)?;
        let marked_at = Utc
            .with_ymd_and_hms(2026, 8, 6, 12, 0, 0)
            .single()
            .context("invalid mark date")?;
        sqlx::query(
            r#"
            INSERT INTO acadex.presence_marks (id, subject, session_id, roll_no, marked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, roll_no) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(session_id)
        .bind(roll_no)
        .bind(marked_at)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        subject: String,
        session_id: Uuid,
        roll_no: String,
        marked_at: chrono::DateTime<Utc>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let outcome = sqlx::query(
            r#"
            INSERT INTO acadex.presence_marks (id, subject, session_id, roll_no, marked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, roll_no) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.subject)
        .bind(row.session_id)
        .bind(&row.roll_no)
        .bind(row.marked_at)
        .execute(pool)
        .await?;

        if outcome.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
