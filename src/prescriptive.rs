use crate::models::{Level, Recommendation, StudentRecord};

struct Rule {
    fires: fn(&StudentRecord) -> bool,
    priority: Level,
    action: &'static str,
    details: &'static str,
}

// Evaluated in order; high-impact levers first.
const RULES: &[Rule] = &[
    Rule {
        fires: |s: &StudentRecord| s.missing_assignments >= 3,
        priority: Level::High,
        action: "Missing work recovery plan",
        details: "Create a 7-day plan to complete missing assignments. Offer partial credit and office hours.",
    },
    Rule {
        fires: |s: &StudentRecord| s.attendance_rate < 0.9,
        priority: Level::High,
        action: "Attendance intervention",
        details: "Identify pattern (days/times). Contact guardian/counselor. Set attendance goal + check-ins.",
    },
    Rule {
        fires: |s: &StudentRecord| s.avg_exam_score < 70.0,
        priority: Level::High,
        action: "Exam prep + reteach plan",
        details: "Assign targeted practice on weak standards; retake opportunities; short daily retrieval practice.",
    },
    Rule {
        fires: |s: &StudentRecord| s.avg_hw_score < 75.0 || s.avg_quiz_score < 75.0,
        priority: Level::Medium,
        action: "Practice scaffolding",
        details: "Shorten assignments, provide exemplars, and use spaced practice. Add 2 quick formative checks weekly.",
    },
    Rule {
        fires: |s: &StudentRecord| s.late_submissions >= 3,
        priority: Level::Medium,
        action: "Time management supports",
        details: "Break tasks into milestones with due dates; allow structured extensions; teach planning routines.",
    },
    Rule {
        fires: |s: &StudentRecord| s.logins_last_7d < 2,
        priority: Level::Medium,
        action: "Engagement nudge",
        details: "Set a weekly platform routine; send reminders; assign a short mandatory check-in activity.",
    },
];

const GENERAL_SUPPORT: Recommendation = Recommendation {
    priority: Level::Low,
    action: "General support",
    details: "Schedule a student conference and set two measurable goals for the next 2 weeks.",
};

pub fn recommendations(record: &StudentRecord) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = RULES
        .iter()
        .filter(|rule| (rule.fires)(record))
        .map(|rule| Recommendation {
            priority: rule.priority,
            action: rule.action,
            details: rule.details,
        })
        .collect();

    if recs.is_empty() {
        recs.push(GENERAL_SUPPORT);
    }
    recs.sort_by_key(|r| r.priority);
    recs
}
