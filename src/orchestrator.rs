use std::collections::BTreeMap;

use serde::Serialize;

use crate::analytics::{self, percent, STRUGGLING_THRESHOLD};
use crate::error::LookupError;
use crate::models::{AssignmentRecord, ChatResult, StudentRecord};
use crate::predictor::{GradePredictor, PASS_CUTOFF};
use crate::prescriptive;
use crate::retriever::{MiniRetriever, DEFAULT_TOP_K};
use crate::router::{self, Intent};

const CHAT_STUDENT_LIMIT: usize = 10;
const CHAT_ASSIGNMENT_LIMIT: usize = 5;

const STATUS_EXAMPLE: &str = "How is student S100123 doing?";
const DRIVERS_EXAMPLE: &str = "What is pulling student S100123's grade down?";
const STRUGGLING_EXAMPLE: &str = "Which students are struggling?";

/// Routes one teacher message and composes the reply. Lookup misses and
/// missing student ids come back as conversational answers, never errors.
pub fn answer(
    students: &[StudentRecord],
    assignments: &[AssignmentRecord],
    course_id: &str,
    message: &str,
    predictor: &GradePredictor,
    retriever: &MiniRetriever,
) -> ChatResult {
    let turn = Turn {
        students,
        assignments,
        course_id,
        message,
        predictor,
        retriever,
    };
    let intent = router::classify(message);
    tracing::debug!(%intent, course_id, "routed message");

    match turn.dispatch(intent) {
        Ok(result) => result,
        Err(LookupError::MissingEntity) => clarification(),
        Err(LookupError::NotFound {
            course_id,
            student_id,
        }) => {
            tracing::debug!(%student_id, %course_id, "student not found");
            reply(format!("I can't find {student_id} in course {course_id}."))
        }
    }
}

fn clarification() -> ChatResult {
    ChatResult {
        answer: "I can help with that. Which student? Please include a student_id (example: S100123)."
            .to_string(),
        cited_data: BTreeMap::new(),
        suggested_followups: followups([STATUS_EXAMPLE, DRIVERS_EXAMPLE]),
    }
}

fn reply(answer: String) -> ChatResult {
    ChatResult {
        answer,
        ..ChatResult::default()
    }
}

fn followups<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn cite(key: &str, value: String) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value)])
}

fn json_text<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unavailable: {err}>"))
}

fn csv_text<T: Serialize>(rows: impl IntoIterator<Item = T>) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        if let Err(err) = writer.serialize(row) {
            return format!("<unavailable: {err}>");
        }
    }
    match writer.into_inner() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => format!("<unavailable: {err}>"),
    }
}

struct Turn<'a> {
    students: &'a [StudentRecord],
    assignments: &'a [AssignmentRecord],
    course_id: &'a str,
    message: &'a str,
    predictor: &'a GradePredictor,
    retriever: &'a MiniRetriever,
}

impl Turn<'_> {
    fn dispatch(&self, intent: Intent) -> Result<ChatResult, LookupError> {
        let student_id = if intent.needs_student() {
            router::require_student_id(self.message)?
        } else {
            ""
        };
        match intent {
            Intent::StudentStatus => self.student_status(student_id),
            Intent::GradeDrivers => self.grade_drivers(student_id),
            Intent::StrugglingStudents => Ok(self.struggling_students()),
            Intent::HardAssignments => Ok(self.hard_assignments()),
            Intent::PredictOutcome => self.predict_outcome(student_id),
            Intent::Prescribe => self.prescribe(student_id),
            Intent::Fallback => Ok(self.course_notes()),
        }
    }

    fn student_status(&self, sid: &str) -> Result<ChatResult, LookupError> {
        let snap = analytics::student_snapshot(self.students, self.course_id, sid)?;
        Ok(ChatResult {
            answer: format!(
                "Student {sid} currently has a {:.1}% with {} attendance and {} missing assignments. \
                 Recent activity: {} logins in the last 7 days.",
                snap.current_grade,
                percent(snap.attendance_rate),
                snap.missing_assignments,
                snap.recent_activity
            ),
            cited_data: cite("student_snapshot", json_text(&snap)),
            suggested_followups: vec![
                format!("What is pulling {sid}'s grade down?"),
                format!("How will {sid} do by the end of the course?"),
            ],
        })
    }

    fn grade_drivers(&self, sid: &str) -> Result<ChatResult, LookupError> {
        let drivers = analytics::grade_drivers(self.students, self.course_id, sid)?;
        let bullets = if drivers.is_empty() {
            "- No major drivers detected.".to_string()
        } else {
            drivers
                .iter()
                .map(|d| format!("- **{}** ({}): {}", d.factor, d.severity, d.detail))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(ChatResult {
            answer: format!("Here are the main factors pulling {sid}'s grade down:\n{bullets}"),
            cited_data: cite("grade_drivers", json_text(&drivers)),
            suggested_followups: vec![
                format!("Give recommendations to help {sid} pass."),
                "Which students are struggling in this course?".to_string(),
            ],
        })
    }

    fn struggling_students(&self) -> ChatResult {
        #[derive(Serialize)]
        struct GradeRow<'r> {
            student_id: &'r str,
            current_grade: f64,
        }

        let struggling: Vec<&StudentRecord> =
            analytics::struggling_students(self.students, self.course_id, STRUGGLING_THRESHOLD)
                .into_iter()
                .take(CHAT_STUDENT_LIMIT)
                .collect();
        let cited_data = cite(
            "struggling_students_top10",
            csv_text(struggling.iter().map(|s| GradeRow {
                student_id: &s.student_id,
                current_grade: s.current_grade,
            })),
        );
        let suggested_followups = followups([
            "What are key assignments students struggled with?",
            "Pick a student_id and ask why they're struggling.",
        ]);

        let answer = if struggling.is_empty() {
            "No students are currently below 70% in this course.".to_string()
        } else {
            let ids: Vec<&str> = struggling.iter().map(|s| s.student_id.as_str()).collect();
            format!("Students currently struggling (below 70%): {}", ids.join(", "))
        };
        ChatResult {
            answer,
            cited_data,
            suggested_followups,
        }
    }

    fn hard_assignments(&self) -> ChatResult {
        let hardest =
            analytics::hardest_assignments(self.assignments, self.course_id, CHAT_ASSIGNMENT_LIMIT);
        let suggested_followups = followups([
            "Which students struggled the most on assignment A3?",
            "What skills are required for the hardest assignments?",
        ]);
        if hardest.is_empty() {
            return ChatResult {
                answer: format!("I don't have assignment data for course {}.", self.course_id),
                cited_data: BTreeMap::new(),
                suggested_followups,
            };
        }

        let names = hardest
            .iter()
            .map(|a| {
                format!(
                    "- {} (avg {:.1}, submit {})",
                    a.assignment_name,
                    a.avg_score,
                    percent(a.submission_rate)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        ChatResult {
            answer: format!("Hardest assignments in the course:\n{names}"),
            cited_data: cite("hardest_assignments", csv_text(hardest.iter().copied())),
            suggested_followups,
        }
    }

    fn predict_outcome(&self, sid: &str) -> Result<ChatResult, LookupError> {
        let record = analytics::find_student(self.students, self.course_id, sid)?;
        let predicted = self.predictor.predict_final_grade(record);
        let p_fail = self.predictor.prob_fail(predicted, PASS_CUTOFF);
        let outcome = if predicted >= PASS_CUTOFF { "pass" } else { "fail" };
        Ok(ChatResult {
            answer: format!(
                "Projected final grade for {sid} is **{predicted:.1}%** (likely to **{outcome}**). \
                 Estimated probability of failing: **{}**.",
                percent(p_fail)
            ),
            cited_data: cite("prediction_inputs", json_text(record)),
            suggested_followups: vec![
                format!("What can we do to help {sid} improve?"),
                format!("What is pulling {sid}'s grade down?"),
            ],
        })
    }

    fn prescribe(&self, sid: &str) -> Result<ChatResult, LookupError> {
        let record = analytics::find_student(self.students, self.course_id, sid)?;
        let recs = prescriptive::recommendations(record);
        let bullets = recs
            .iter()
            .map(|r| {
                format!(
                    "- **{}**: {}. {}",
                    r.priority.as_str().to_uppercase(),
                    r.action,
                    r.details
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ChatResult {
            answer: format!("Recommendations to help {sid} move to passing:\n{bullets}"),
            cited_data: cite("recommendations", json_text(&recs)),
            suggested_followups: vec![
                format!("Which assignment patterns explain {sid}'s struggles?"),
                "Which students are struggling overall?".to_string(),
            ],
        })
    }

    fn course_notes(&self) -> ChatResult {
        let hits = self.retriever.retrieve(self.message, DEFAULT_TOP_K);
        if hits.is_empty() {
            return ChatResult {
                answer: [
                    "I can help with questions like:",
                    "- How is student S100123 doing?",
                    "- What is pulling student S100123's grade down?",
                    "- Which students are struggling?",
                    "- What assignments are hardest?",
                    "- How will student S100123 do by end of course?",
                    "- What recommendations help student S100123 pass?",
                ]
                .join("\n"),
                cited_data: BTreeMap::new(),
                suggested_followups: followups([STATUS_EXAMPLE, STRUGGLING_EXAMPLE]),
            };
        }

        let notes = hits
            .iter()
            .map(|doc| format!("- {}", doc.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let cited = hits
            .iter()
            .map(|doc| format!("[{}] {}", doc.doc_id, doc.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        ChatResult {
            answer: format!(
                "I can answer student and course performance questions. \
                 Based on your question, here are relevant course notes:\n\n{notes}\n\n\
                 Try asking: \"{STATUS_EXAMPLE}\" or \"{STRUGGLING_EXAMPLE}\""
            ),
            cited_data: cite("retrieved_notes", cited),
            suggested_followups: followups([STATUS_EXAMPLE, STRUGGLING_EXAMPLE, DRIVERS_EXAMPLE]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tests::{assignment, at_risk, healthy};
    use crate::predictor::tests::small_predictor;

    struct Fixture {
        students: Vec<StudentRecord>,
        assignments: Vec<AssignmentRecord>,
        predictor: GradePredictor,
        retriever: MiniRetriever,
    }

    impl Fixture {
        fn new() -> Self {
            let mut failing = at_risk("S100002");
            failing.current_grade = 48.0;
            Self {
                students: vec![at_risk("S100001"), failing, healthy("S100003")],
                assignments: vec![
                    assignment("A1", 82.0),
                    assignment("A2", 61.5),
                    assignment("A3", 70.0),
                ],
                predictor: small_predictor(),
                retriever: MiniRetriever::course_notes(),
            }
        }

        fn ask(&self, message: &str) -> ChatResult {
            answer(
                &self.students,
                &self.assignments,
                "C1",
                message,
                &self.predictor,
                &self.retriever,
            )
        }
    }

    #[test]
    fn status_answer_cites_snapshot() {
        let result = Fixture::new().ask("How is student S100001 doing?");
        assert!(result.answer.starts_with("Student S100001 currently has a 65.0% with 85% attendance"));
        assert!(result.cited_data.contains_key("student_snapshot"));
        assert_eq!(result.suggested_followups.len(), 2);
    }

    #[test]
    fn missing_id_asks_for_clarification() {
        let result = Fixture::new().ask("How is my student doing?");
        assert!(result.answer.contains("student_id"));
        assert!(result.cited_data.is_empty());
        assert_eq!(
            result.suggested_followups,
            vec![STATUS_EXAMPLE.to_string(), DRIVERS_EXAMPLE.to_string()]
        );
    }

    #[test]
    fn unknown_student_is_not_an_error() {
        let fixture = Fixture::new();
        for message in [
            "How will S999999 do by the end of the course?",
            "Give recommendations for S999999",
            "How is S999999 doing?",
            "What is pulling S999999's grade down?",
        ] {
            let result = fixture.ask(message);
            assert_eq!(result.answer, "I can't find S999999 in course C1.");
            assert!(result.cited_data.is_empty());
            assert!(result.suggested_followups.is_empty());
        }
    }

    #[test]
    fn drivers_answer_lists_bullets() {
        let result = Fixture::new().ask("What is pulling student S100001's grade down?");
        assert!(result.answer.contains("- **attendance** (high): Attendance is 85%."));
        let healthy = Fixture::new().ask("What is pulling S100003's grade down?");
        assert!(healthy.answer.ends_with("- No major drivers detected."));
    }

    #[test]
    fn struggling_students_are_listed_lowest_first() {
        let result = Fixture::new().ask("Which students are struggling?");
        assert_eq!(
            result.answer,
            "Students currently struggling (below 70%): S100002, S100001"
        );
        let csv = &result.cited_data["struggling_students_top10"];
        assert!(csv.starts_with("student_id,current_grade\nS100002,48"));
    }

    #[test]
    fn hard_assignments_sorted_by_score() {
        let result = Fixture::new().ask("What key assignments did students find hard?");
        assert_eq!(
            result.answer,
            "Hardest assignments in the course:\n\
             - Assignment 2 (avg 61.5, submit 90%)\n\
             - Assignment 3 (avg 70.0, submit 90%)\n\
             - Assignment 1 (avg 82.0, submit 90%)"
        );
    }

    #[test]
    fn prediction_reports_grade_and_probability() {
        let result = Fixture::new().ask("Will S100001 pass by the end of the term?");
        assert!(result.answer.starts_with("Projected final grade for S100001 is **"));
        assert!(result.answer.contains("Estimated probability of failing"));
        assert!(result.cited_data.contains_key("prediction_inputs"));
    }

    #[test]
    fn prescription_lists_high_priority_first() {
        let result = Fixture::new().ask("Any recommendation for S100001?");
        let first = result.answer.lines().nth(1).unwrap();
        assert_eq!(
            first,
            "- **HIGH**: Missing work recovery plan. Create a 7-day plan to complete missing assignments. Offer partial credit and office hours."
        );
    }

    #[test]
    fn fallback_cites_matching_notes() {
        let result = Fixture::new().ask("What is the late work penalty?");
        assert!(result.answer.contains("Late work is accepted up to 3 days"));
        assert!(result.cited_data["retrieved_notes"].starts_with("[course_policy]"));
        assert_eq!(result.suggested_followups.len(), 3);
    }

    #[test]
    fn fallback_without_notes_lists_capabilities() {
        let result = Fixture::new().ask("zebra xylophone");
        assert!(result.answer.starts_with("I can help with questions like:"));
        assert!(result.cited_data.is_empty());
        assert_eq!(result.suggested_followups.len(), 2);
    }
}
