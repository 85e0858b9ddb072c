use std::path::PathBuf;

use anyhow::Context;
use chrono::Datelike;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod metrics;
mod models;
mod report;
mod telemetry;

use config::AppConfig;
use models::{LessonSubmission, NewStudent};
use report::context::CONTEXT_KEYS;
use report::{ReportService, TemplateRenderer};

#[derive(Parser)]
#[command(name = "english-lessons")]
#[command(about = "Monthly English lesson records and PDF reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Add the starter students if none exist
    Seed,
    /// Register a student
    AddStudent {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, default_value = "")]
        first_name_he: String,
        #[arg(long, default_value = "")]
        last_name_he: String,
    },
    /// Save lesson data for a month, replacing what was there
    Submit {
        #[arg(long)]
        student_id: i64,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: i32,
        #[arg(long, default_value = "")]
        grammar: String,
        #[arg(long, default_value = "")]
        reading: String,
        #[arg(long, default_value = "")]
        speaking: String,
        #[arg(long, default_value = "")]
        writing: String,
        #[arg(long, default_value_t = 1)]
        hours: i32,
    },
    /// Import lesson rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate the PDF report for one student and month
    Report {
        #[arg(long)]
        student_id: i64,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: i32,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the template's placeholders and flag names no record fills
    CheckTemplate,
    /// Run the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.logging)?;

    if let Commands::CheckTemplate = cli.command {
        return check_template(&config);
    }

    let database_url = config
        .database
        .url
        .clone()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} students.");
        }
        Commands::AddStudent {
            first_name,
            last_name,
            first_name_he,
            last_name_he,
        } => {
            let student = NewStudent {
                first_name,
                last_name,
                first_name_he,
                last_name_he,
            };
            student.validate().map_err(anyhow::Error::msg)?;
            let created = db::create_student(&pool, &student).await?;
            println!("Student {} created: {}.", created.id, created.full_name());
        }
        Commands::Submit {
            student_id,
            year,
            month,
            grammar,
            reading,
            speaking,
            writing,
            hours,
        } => {
            let lesson = LessonSubmission {
                student_id,
                year: year.unwrap_or_else(current_year),
                month,
                grammar_e: grammar,
                reading_e: reading,
                speaking_e: speaking,
                writing_e: writing,
                hours_studied: hours,
            };
            lesson.validate().map_err(anyhow::Error::msg)?;
            if db::get_student(&pool, student_id).await?.is_none() {
                anyhow::bail!("student {student_id} not found");
            }
            let record = db::upsert_lesson(&pool, &lesson).await?;
            println!(
                "Saved lesson data for student {} ({}-{:02}).",
                record.student_id, record.year, record.month
            );
        }
        Commands::Import { csv } => {
            let upserted = db::import_csv(&pool, &csv).await?;
            println!("Saved {upserted} lesson rows from {}.", csv.display());
        }
        Commands::Report {
            student_id,
            year,
            month,
            out,
        } => {
            let year = year.unwrap_or_else(current_year);
            let record = db::fetch_report_record(&pool, student_id, year, month)
                .await?
                .with_context(|| {
                    format!("no lesson data for student {student_id} in {year}-{month:02}")
                })?;

            let service = ReportService::from_config(&config.report);
            let pdf = service.generate(&record).await?;
            let out = out.unwrap_or_else(|| {
                PathBuf::from(report::report_filename(student_id, year, month))
            });
            std::fs::write(&out, pdf)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::CheckTemplate => unreachable!("handled before connecting"),
        Commands::Serve => serve(&config, pool).await?,
    }

    Ok(())
}

fn check_template(config: &AppConfig) -> anyhow::Result<()> {
    let renderer = TemplateRenderer::from_config(&config.report);
    let names = renderer.placeholders()?;
    println!(
        "{} placeholders in {}:",
        names.len(),
        config.report.template_path().display()
    );

    let mut unknown = 0;
    for name in &names {
        if CONTEXT_KEYS.contains(&name.as_str()) {
            println!("  [[{name}]]");
        } else {
            unknown += 1;
            println!("  [[{name}]]  (unknown, renders empty)");
        }
    }

    if unknown > 0 {
        warn!(unknown, "template uses placeholders no lesson record fills");
    }
    Ok(())
}

async fn serve(config: &AppConfig, pool: PgPool) -> anyhow::Result<()> {
    db::init_db(&pool).await?;
    db::seed(&pool).await?;

    let metrics = metrics::Metrics::new().context("failed to register metrics")?;
    let state = api::AppState::new(pool, ReportService::from_config(&config.report), metrics);
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        template = %config.report.template_path().display(),
        converter = %config.report.converter.binary,
        "english-lessons API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
    }
}

fn current_year() -> i32 {
    chrono::Utc::now().year()
}
