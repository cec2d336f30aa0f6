use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub course_id: String,
    pub student_id: String,
    pub current_grade: f64,
    /// Training target; absent for live rows.
    pub final_grade: Option<f64>,
    pub attendance_rate: f64,
    pub missing_assignments: u32,
    pub late_submissions: u32,
    pub avg_quiz_score: f64,
    pub avg_hw_score: f64,
    pub avg_exam_score: f64,
    pub logins_last_7d: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub course_id: String,
    pub assignment_id: String,
    pub assignment_name: String,
    pub avg_score: f64,
    pub submission_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSnapshot {
    pub student_id: String,
    pub course_id: String,
    pub current_grade: f64,
    pub attendance_rate: f64,
    pub missing_assignments: u32,
    pub late_submissions: u32,
    pub avg_quiz_score: f64,
    pub avg_hw_score: f64,
    pub avg_exam_score: f64,
    pub recent_activity: u32,
}

/// Shared by grade drivers (severity) and recommendations (priority).
/// Variant order is the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Medium,
    Low,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::High => "high",
            Level::Medium => "medium",
            Level::Low => "low",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeDriver {
    pub factor: &'static str,
    pub severity: Level,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub priority: Level,
    pub action: &'static str,
    pub details: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSummary {
    pub student_id: String,
    pub current_grade: f64,
    pub attendance_rate: f64,
    pub missing_assignments: u32,
    pub risk_of_failing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseInsights {
    pub course_id: String,
    pub struggling_students: Vec<StudentSummary>,
    pub hardest_assignments: Vec<AssignmentRecord>,
}

/// One orchestrator reply. Citation values are free-form debug text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatResult {
    pub answer: String,
    pub cited_data: BTreeMap<String, String>,
    pub suggested_followups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub teacher_id: String,
    pub course_id: String,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Appends one exchange and drops the oldest turns beyond `max_turns`.
    pub fn remember(&mut self, reply: &str, max_turns: usize) {
        self.history.push(ChatMessage {
            role: Role::User,
            content: self.message.clone(),
        });
        self.history.push(ChatMessage {
            role: Role::Assistant,
            content: reply.to_string(),
        });
        let excess = self.history.len().saturating_sub(max_turns * 2);
        self.history.drain(..excess);
    }
}
