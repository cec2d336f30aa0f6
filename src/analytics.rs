use crate::error::LookupError;
use crate::models::{
    AssignmentRecord, CourseInsights, GradeDriver, Level, StudentRecord, StudentSnapshot,
    StudentSummary,
};

pub const STRUGGLING_THRESHOLD: f64 = 70.0;
pub const INSIGHT_STUDENT_LIMIT: usize = 10;
pub const INSIGHT_ASSIGNMENT_LIMIT: usize = 5;

pub fn find_student<'a>(
    students: &'a [StudentRecord],
    course_id: &str,
    student_id: &str,
) -> Result<&'a StudentRecord, LookupError> {
    students
        .iter()
        .find(|s| s.course_id == course_id && s.student_id == student_id)
        .ok_or_else(|| LookupError::NotFound {
            course_id: course_id.to_string(),
            student_id: student_id.to_string(),
        })
}

pub fn student_snapshot(
    students: &[StudentRecord],
    course_id: &str,
    student_id: &str,
) -> Result<StudentSnapshot, LookupError> {
    let record = find_student(students, course_id, student_id)?;
    Ok(snapshot_of(record))
}

pub fn snapshot_of(record: &StudentRecord) -> StudentSnapshot {
    StudentSnapshot {
        student_id: record.student_id.clone(),
        course_id: record.course_id.clone(),
        current_grade: record.current_grade,
        attendance_rate: record.attendance_rate,
        missing_assignments: record.missing_assignments,
        late_submissions: record.late_submissions,
        avg_quiz_score: record.avg_quiz_score,
        avg_hw_score: record.avg_hw_score,
        avg_exam_score: record.avg_exam_score,
        recent_activity: record.logins_last_7d,
    }
}

pub fn grade_drivers(
    students: &[StudentRecord],
    course_id: &str,
    student_id: &str,
) -> Result<Vec<GradeDriver>, LookupError> {
    let snapshot = student_snapshot(students, course_id, student_id)?;
    Ok(drivers_for(&snapshot))
}

/// Rule-based explanation of a low grade, high severity first.
pub fn drivers_for(s: &StudentSnapshot) -> Vec<GradeDriver> {
    let mut drivers = Vec::new();
    let mut flag = |factor, severity, detail: String| {
        drivers.push(GradeDriver {
            factor,
            severity,
            detail,
        })
    };

    if s.attendance_rate < 0.90 {
        flag(
            "attendance",
            Level::High,
            format!("Attendance is {}.", percent(s.attendance_rate)),
        );
    }
    if s.missing_assignments >= 3 {
        flag(
            "missing_assignments",
            Level::High,
            format!("Missing {} assignments.", s.missing_assignments),
        );
    }
    if s.late_submissions >= 3 {
        flag(
            "late_work",
            Level::Medium,
            format!("{} late submissions.", s.late_submissions),
        );
    }
    if s.avg_exam_score < 70.0 {
        flag(
            "exam_performance",
            Level::High,
            format!("Average exam score {:.1}.", s.avg_exam_score),
        );
    }
    if s.avg_hw_score < 75.0 {
        flag(
            "homework_performance",
            Level::Medium,
            format!("Average HW score {:.1}.", s.avg_hw_score),
        );
    }
    if s.avg_quiz_score < 75.0 {
        flag(
            "quiz_performance",
            Level::Medium,
            format!("Average quiz score {:.1}.", s.avg_quiz_score),
        );
    }
    if s.recent_activity < 2 {
        flag(
            "low_platform_engagement",
            Level::Medium,
            format!("Only {} logins in last 7 days.", s.recent_activity),
        );
    }

    // sort_by_key is stable, so rule order survives within a tier
    drivers.sort_by_key(|d| d.severity);
    drivers
}

pub fn struggling_students<'a>(
    students: &'a [StudentRecord],
    course_id: &str,
    threshold: f64,
) -> Vec<&'a StudentRecord> {
    let mut struggling: Vec<&StudentRecord> = students
        .iter()
        .filter(|s| s.course_id == course_id && s.current_grade < threshold)
        .collect();
    struggling.sort_by(|a, b| a.current_grade.total_cmp(&b.current_grade));
    struggling
}

pub fn hardest_assignments<'a>(
    assignments: &'a [AssignmentRecord],
    course_id: &str,
    top_n: usize,
) -> Vec<&'a AssignmentRecord> {
    let mut hardest: Vec<&AssignmentRecord> = assignments
        .iter()
        .filter(|a| a.course_id == course_id)
        .collect();
    hardest.sort_by(|a, b| a.avg_score.total_cmp(&b.avg_score));
    hardest.truncate(top_n);
    hardest
}

/// Linear ramp from 0 at a 70% grade to 1 at 50%.
pub fn risk_of_failing(current_grade: f64) -> f64 {
    ((STRUGGLING_THRESHOLD - current_grade) / 20.0).clamp(0.0, 1.0)
}

pub fn course_insights(
    students: &[StudentRecord],
    assignments: &[AssignmentRecord],
    course_id: &str,
) -> CourseInsights {
    let struggling_students = struggling_students(students, course_id, STRUGGLING_THRESHOLD)
        .into_iter()
        .take(INSIGHT_STUDENT_LIMIT)
        .map(|s| StudentSummary {
            student_id: s.student_id.clone(),
            current_grade: s.current_grade,
            attendance_rate: s.attendance_rate,
            missing_assignments: s.missing_assignments,
            risk_of_failing: risk_of_failing(s.current_grade),
        })
        .collect();
    let hardest_assignments = hardest_assignments(assignments, course_id, INSIGHT_ASSIGNMENT_LIMIT)
        .into_iter()
        .cloned()
        .collect();

    CourseInsights {
        course_id: course_id.to_string(),
        struggling_students,
        hardest_assignments,
    }
}

/// Whole-number percentage of a 0..1 rate, e.g. `0.85` -> `85%`.
pub fn percent(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}
