use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod db;
mod error;
mod export;
mod matrix;
mod models;
mod report;
mod request;

use crate::models::{DivisionScope, ReportRequest, ReportWindow};
use crate::report::ReportService;

#[derive(Parser)]
#[command(name = "attendance-report")]
#[command(about = "Roster reconciliation and attendance reporting for AcadeX", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ScopeArgs {
    #[arg(long, default_value = "acadex-demo")]
    institution: String,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    year: String,
    #[arg(long)]
    department: String,
    /// Division name, or "All" for a division-aware cohort without a
    /// filter. Omit entirely for cohort types that do not use divisions.
    #[arg(long)]
    division: Option<String>,
    #[arg(long, default_value_t = 30)]
    since_days: i64,
    /// Teacher name printed in report headers.
    #[arg(long)]
    teacher: Option<String>,
    /// Attendance percentage below which a student is listed as a defaulter.
    #[arg(long, default_value_t = 75)]
    threshold: u32,
}

impl ScopeArgs {
    fn to_request(&self) -> ReportRequest {
        let division = match self.division.as_deref() {
            None => DivisionScope::NotUsed,
            Some(name) if name.eq_ignore_ascii_case("all") => DivisionScope::All,
            Some(name) => DivisionScope::Only(name.to_string()),
        };
        ReportRequest {
            institution_id: self.institution.clone(),
            subject: self.subject.clone(),
            year: self.year.clone(),
            department: self.department.clone(),
            division,
            window: window_ending_now(self.since_days),
            teacher_name: self.teacher.clone(),
            defaulter_threshold: self.threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Pdf,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import presence marks from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List resolvable sessions for a subject, most recent first
    Sessions {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
    /// Build the attendance matrix and print it
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Print the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Export the attendance matrix to a file
    Export {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum)]
        format: ExportFormat,
        #[arg(long)]
        out: PathBuf,
    },
}

fn window_ending_now(since_days: i64) -> ReportWindow {
    let to = Utc::now();
    ReportWindow {
        from: to - Duration::days(since_days.max(1)),
        to,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} presence marks from {}.", csv.display());
        }
        Commands::Sessions { subject, since_days } => {
            let window = window_ending_now(since_days);
            let mut sessions = db::fetch_sessions(&pool, &subject, &window).await?;
            if sessions.is_empty() {
                println!("No sessions found for this window.");
                return Ok(());
            }
            // History browsing shows the most recent session first.
            sessions.sort_by(|a, b| b.held_at.cmp(&a.held_at).then_with(|| a.id.cmp(&b.id)));
            for session in &sessions {
                println!(
                    "- {} {} ({})",
                    session.held_at.format("%Y-%m-%d %H:%M"),
                    session.kind.short_label(),
                    session.id
                );
            }
        }
        Commands::Report { scope, json } => {
            let request = scope.to_request();
            let service = ReportService::new(pool);
            if service.refresh(&request).await?.is_none() {
                println!("Report request was superseded; showing the latest result.");
            }
            let Some(built) = service.latest() else {
                println!("No report available for this scope.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&*built)?);
            } else {
                print!("{}", report::render_text(&built, request.defaulter_threshold));
            }
        }
        Commands::Export { scope, format, out } => {
            let request = scope.to_request();
            let service = ReportService::new(pool);
            let Some(built) = service.refresh(&request).await? else {
                println!("Export request was superseded before completing.");
                return Ok(());
            };
            match format {
                ExportFormat::Csv => export::write_csv(&built, &out)?,
                ExportFormat::Pdf => export::write_pdf(&built, &out)?,
            }
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
