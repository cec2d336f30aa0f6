use anyhow::Context;
use uuid::Uuid;

use crate::analytics;
use crate::config::Settings;
use crate::data::{self, CourseTables};
use crate::db;
use crate::models::{ChatRequest, ChatResult, CourseInsights};
use crate::orchestrator;
use crate::predictor::GradePredictor;
use crate::retriever::MiniRetriever;

/// Everything a request needs, built once at startup and read-only after.
pub struct AppContext {
    pub tables: CourseTables,
    pub predictor: GradePredictor,
    pub retriever: MiniRetriever,
}

impl AppContext {
    pub fn new(tables: CourseTables, predictor: GradePredictor, retriever: MiniRetriever) -> Self {
        Self {
            tables,
            predictor,
            retriever,
        }
    }

    pub async fn load_tables(settings: &Settings) -> anyhow::Result<CourseTables> {
        match &settings.database_url {
            Some(url) => {
                let pool = db::connect(url).await?;
                db::fetch_tables(&pool)
                    .await
                    .context("failed to load tables from Postgres")
            }
            None => data::load_csv(&settings.data_path)
                .with_context(|| format!("failed to load {}", settings.data_path.display())),
        }
    }

    pub async fn bootstrap(settings: &Settings) -> anyhow::Result<Self> {
        let tables = Self::load_tables(settings).await?;
        let artifact = settings.artifact_path();
        let predictor = GradePredictor::load_or_train(&artifact, &tables.students)
            .with_context(|| format!("failed to prepare predictor at {}", artifact.display()))?;
        let retriever = MiniRetriever::course_notes();
        tracing::info!(
            students = tables.students.len(),
            assignments = tables.assignments.len(),
            notes = retriever.len(),
            "assistant ready"
        );
        Ok(Self::new(tables, predictor, retriever))
    }

    pub fn answer(&self, course_id: &str, message: &str) -> ChatResult {
        orchestrator::answer(
            &self.tables.students,
            &self.tables.assignments,
            course_id,
            message,
            &self.predictor,
            &self.retriever,
        )
    }

    /// History is accepted for the conversation record but does not change
    /// the answer.
    pub fn handle(&self, request: &ChatRequest) -> ChatResult {
        let span = tracing::info_span!(
            "chat",
            request_id = %Uuid::new_v4(),
            teacher_id = %request.teacher_id,
            course_id = %request.course_id
        );
        let _guard = span.enter();
        tracing::debug!(history_turns = request.history.len() / 2, "handling chat request");
        self.answer(&request.course_id, &request.message)
    }

    pub fn insights(&self, course_id: &str) -> CourseInsights {
        analytics::course_insights(&self.tables.students, &self.tables.assignments, course_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tests::{assignment, at_risk, healthy};
    use crate::models::{ChatMessage, Role};
    use crate::predictor::tests::small_predictor;

    fn context() -> AppContext {
        AppContext::new(
            CourseTables {
                students: vec![at_risk("S100001"), healthy("S100002")],
                assignments: vec![assignment("A1", 55.0), assignment("A2", 91.0)],
            },
            small_predictor(),
            MiniRetriever::course_notes(),
        )
    }

    #[test]
    fn context_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppContext>();
    }

    #[test]
    fn history_does_not_change_the_answer() {
        let ctx = context();
        let mut request = ChatRequest {
            teacher_id: "T1".to_string(),
            course_id: "C1".to_string(),
            message: "How is student S100001 doing?".to_string(),
            history: Vec::new(),
        };
        let first = ctx.handle(&request);
        request.history.push(ChatMessage {
            role: Role::User,
            content: "Which students are struggling?".to_string(),
        });
        assert_eq!(ctx.handle(&request), first);
    }

    #[test]
    fn insights_include_risk() {
        let insights = context().insights("C1");
        assert_eq!(insights.struggling_students.len(), 1);
        assert_eq!(insights.struggling_students[0].risk_of_failing, 0.25);
        assert_eq!(insights.hardest_assignments[0].assignment_id, "A1");
    }

    #[tokio::test]
    async fn bootstrap_trains_then_reuses_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("course.csv");
        let mut text = String::from(
            "record_type,course_id,assignment_id,assignment_name,avg_score,submission_rate,student_id,attendance_rate,missing_assignments,late_submissions,avg_quiz_score,avg_hw_score,avg_exam_score,logins_last_7d,current_grade,final_grade,label\n",
        );
        text.push_str("assignment,C1,A1,Assignment 1,64.0,0.88,,,,,,,,,,,\n");
        for i in 0..12 {
            let grade = 40.0 + 4.0 * i as f64;
            text.push_str(&format!(
                "student,C1,,,,,S{},0.9,1.0,0.0,{grade},{grade},{grade},3.0,{grade},{},0\n",
                100000 + i,
                grade - 2.0
            ));
        }
        std::fs::write(&csv_path, text).unwrap();

        let settings = Settings {
            data_path: csv_path,
            artifacts_dir: dir.path().join("artifacts"),
            max_context_turns: 8,
            database_url: None,
        };
        let first = AppContext::bootstrap(&settings).await.unwrap();
        assert!(settings.artifact_path().exists());
        let second = AppContext::bootstrap(&settings).await.unwrap();
        assert_eq!(first.predictor.trained_at(), second.predictor.trained_at());
        assert_eq!(second.tables.students.len(), 12);
    }

    #[tokio::test]
    async fn bootstrap_fails_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_path: dir.path().join("missing.csv"),
            artifacts_dir: dir.path().join("artifacts"),
            max_context_turns: 8,
            database_url: None,
        };
        assert!(AppContext::bootstrap(&settings).await.is_err());
    }
}
