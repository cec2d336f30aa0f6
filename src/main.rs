use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod analytics;
mod config;
mod context;
mod data;
mod db;
mod error;
mod forest;
mod models;
mod orchestrator;
mod predictor;
mod prescriptive;
mod report;
mod retriever;
mod router;

use crate::config::Settings;
use crate::context::AppContext;
use crate::models::{ChatRequest, ChatResult};

#[derive(Parser)]
#[command(name = "teacher-assistant")]
#[command(about = "Answers teacher questions about student performance", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres schema
    InitDb,
    /// Import course data from a CSV file into Postgres
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Retrain the grade predictor and overwrite the artifact
    Train,
    /// Ask a single question
    Ask {
        #[arg(long)]
        course: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "T1")]
        teacher: String,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Chat interactively, one question per line
    Chat {
        #[arg(long)]
        course: String,
        #[arg(long, default_value = "T1")]
        teacher: String,
    },
    /// Struggling students and hardest assignments for a course
    Insights {
        #[arg(long)]
        course: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown course report
    Report {
        #[arg(long)]
        course: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings;

    match cli.command {
        Commands::InitDb => {
            let pool = db::connect(database_url(&settings)?).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = db::connect(database_url(&settings)?).await?;
            let written = db::import_csv(&pool, &csv).await?;
            println!("Wrote {written} rows from {}.", csv.display());
        }
        Commands::Train => {
            let tables = AppContext::load_tables(&settings).await?;
            let predictor = predictor::GradePredictor::train(&tables.students)?;
            let path = settings.artifact_path();
            predictor.save(&path)?;
            println!(
                "Trained on {} rows at {}; artifact written to {}.",
                predictor.training_rows(),
                predictor.trained_at().format("%Y-%m-%d %H:%M:%S UTC"),
                path.display()
            );
        }
        Commands::Ask {
            course,
            message,
            teacher,
            json,
        } => {
            let ctx = AppContext::bootstrap(&settings).await?;
            let request = ChatRequest {
                teacher_id: teacher,
                course_id: course,
                message,
                history: Vec::new(),
            };
            let result = ctx.handle(&request);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Chat { course, teacher } => {
            let ctx = AppContext::bootstrap(&settings).await?;
            let mut request = ChatRequest {
                teacher_id: teacher,
                course_id: course,
                message: String::new(),
                history: Vec::new(),
            };
            println!("Ask about course {} (empty line to quit).", request.course_id);
            let stdin = std::io::stdin();
            let mut lines = stdin.lock().lines();
            loop {
                print!("> ");
                std::io::stdout().flush()?;
                let Some(line) = lines.next() else { break };
                let line = line.context("failed to read from stdin")?;
                if line.trim().is_empty() {
                    break;
                }
                request.message = line;
                let result = ctx.handle(&request);
                print_result(&result);
                request.remember(&result.answer, settings.max_context_turns);
            }
        }
        Commands::Insights { course, json } => {
            let ctx = AppContext::bootstrap(&settings).await?;
            let insights = ctx.insights(&course);
            if json {
                println!("{}", serde_json::to_string_pretty(&insights)?);
                return Ok(());
            }

            if insights.struggling_students.is_empty() {
                println!("No students below 70% in course {course}.");
            } else {
                println!("Struggling students in {course}:");
                for student in &insights.struggling_students {
                    println!(
                        "- {} at {:.1}% (risk {:.2})",
                        student.student_id, student.current_grade, student.risk_of_failing
                    );
                }
            }
            println!("Hardest assignments:");
            for assignment in &insights.hardest_assignments {
                println!(
                    "- {} (avg {:.1})",
                    assignment.assignment_name, assignment.avg_score
                );
            }
        }
        Commands::Report { course, out } => {
            let ctx = AppContext::bootstrap(&settings).await?;
            let insights = ctx.insights(&course);
            let struggling = analytics::struggling_students(
                &ctx.tables.students,
                &course,
                analytics::STRUGGLING_THRESHOLD,
            );
            let report = report::build_report(
                &insights,
                &struggling,
                chrono::Utc::now().date_naive(),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn database_url(settings: &Settings) -> anyhow::Result<&str> {
    settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")
}

fn print_result(result: &ChatResult) {
    println!("{}", result.answer);
    for (key, value) in &result.cited_data {
        println!("\n[{key}]\n{}", value.trim_end());
    }
    if !result.suggested_followups.is_empty() {
        println!("\nTry next:");
        for followup in &result.suggested_followups {
            println!("- {followup}");
        }
    }
}
