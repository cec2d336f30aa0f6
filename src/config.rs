use std::path::PathBuf;

use clap::Args;

pub const ARTIFACT_FILE: &str = "grade_predictor.json";

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// CSV file holding student and assignment rows
    #[arg(long, global = true, env = "DATA_PATH", default_value = "data/synthetic_course_data.csv")]
    pub data_path: PathBuf,

    /// Directory where the trained grade predictor is stored
    #[arg(long, global = true, env = "ARTIFACTS_DIR", default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    /// Turns of chat history kept per conversation
    #[arg(long, global = true, env = "MAX_CONTEXT_TURNS", default_value_t = 8)]
    pub max_context_turns: usize,

    /// Load tables from Postgres instead of the CSV file
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,
}

impl Settings {
    pub fn artifact_path(&self) -> PathBuf {
        self.artifacts_dir.join(ARTIFACT_FILE)
    }
}
