use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LookupError;

static STUDENT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"S\d{6,}").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    StudentStatus,
    GradeDrivers,
    StrugglingStudents,
    HardAssignments,
    PredictOutcome,
    Prescribe,
    Fallback,
}

impl Intent {
    pub fn needs_student(self) -> bool {
        matches!(
            self,
            Intent::StudentStatus
                | Intent::GradeDrivers
                | Intent::PredictOutcome
                | Intent::Prescribe
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::StudentStatus => "student_status",
            Intent::GradeDrivers => "grade_drivers",
            Intent::StrugglingStudents => "struggling_students",
            Intent::HardAssignments => "hard_assignments",
            Intent::PredictOutcome => "predict_outcome",
            Intent::Prescribe => "prescribe",
            Intent::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered; the first matching rule wins.
pub const RULES: &[(fn(&str) -> bool, Intent)] = &[
    (|m: &str| m.contains("how is") && m.contains("doing"), Intent::StudentStatus),
    (|m: &str| m.contains("pulling") && m.contains("grade"), Intent::GradeDrivers),
    (
        |m: &str| m.contains("which students") && (m.contains("struggling") || m.contains("failing")),
        Intent::StrugglingStudents,
    ),
    (
        |m: &str| m.contains("key assignments") && (m.contains("struggled") || m.contains("hard")),
        Intent::HardAssignments,
    ),
    (
        |m: &str| {
            m.contains("by the end")
                || (m.contains("will")
                    && (m.contains("pass") || m.contains("fail") || m.contains("final")))
        },
        Intent::PredictOutcome,
    ),
    (
        |m: &str| m.contains("recommendation") || (m.contains("given") && m.contains("failing")),
        Intent::Prescribe,
    ),
];

/// Lowercases, trims and collapses runs of whitespace.
pub fn normalize(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn classify(message: &str) -> Intent {
    let normalized = normalize(message);
    RULES
        .iter()
        .find(|(rule, _)| rule(normalized.as_str()))
        .map_or(Intent::Fallback, |(_, intent)| *intent)
}

/// First `S` followed by six or more digits; case-sensitive.
pub fn extract_student_id(message: &str) -> Option<&str> {
    STUDENT_ID.find(message).map(|m| m.as_str())
}

pub fn require_student_id(message: &str) -> Result<&str, LookupError> {
    extract_student_id(message).ok_or(LookupError::MissingEntity)
}
