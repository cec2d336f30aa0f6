use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::analytics::{self, percent};
use crate::models::{CourseInsights, Level, StudentRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct FactorSummary {
    pub factor: &'static str,
    pub severity: Level,
    pub count: usize,
}

/// How often each grade driver shows up among the given students.
pub fn summarize_drivers(students: &[&StudentRecord]) -> Vec<FactorSummary> {
    let mut map: HashMap<&'static str, (Level, usize)> = HashMap::new();

    for student in students {
        for driver in analytics::drivers_for(&analytics::snapshot_of(student)) {
            let entry = map.entry(driver.factor).or_insert((driver.severity, 0));
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<FactorSummary> = map
        .into_iter()
        .map(|(factor, (severity, count))| FactorSummary {
            factor,
            severity,
            count,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.factor.cmp(b.factor)));
    summaries
}

pub fn build_report(
    insights: &CourseInsights,
    struggling: &[&StudentRecord],
    generated_on: NaiveDate,
) -> String {
    let drivers = summarize_drivers(struggling);
    let mut output = String::new();

    let _ = writeln!(output, "# Course Performance Report");
    let _ = writeln!(
        output,
        "Generated for course {} on {}",
        insights.course_id, generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Struggling Students");

    if insights.struggling_students.is_empty() {
        let _ = writeln!(output, "No students are currently below 70% in this course.");
    } else {
        for student in insights.struggling_students.iter() {
            let _ = writeln!(
                output,
                "- {} at {:.1}% ({} attendance, {} missing) risk {:.2}",
                student.student_id,
                student.current_grade,
                percent(student.attendance_rate),
                student.missing_assignments,
                student.risk_of_failing
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Hardest Assignments");

    if insights.hardest_assignments.is_empty() {
        let _ = writeln!(output, "No assignment data for this course.");
    } else {
        for assignment in insights.hardest_assignments.iter() {
            let _ = writeln!(
                output,
                "- {} (avg {:.1}, submit {})",
                assignment.assignment_name,
                assignment.avg_score,
                percent(assignment.submission_rate)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Common Grade Drivers");

    if drivers.is_empty() {
        let _ = writeln!(output, "No grade drivers flagged among struggling students.");
    } else {
        for summary in drivers.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} students",
                summary.factor, summary.severity, summary.count
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tests::{assignment, at_risk, healthy};
    use crate::analytics::{course_insights, struggling_students, STRUGGLING_THRESHOLD};

    #[test]
    fn drivers_are_counted_across_students() {
        let a = at_risk("S1");
        let b = StudentRecord {
            attendance_rate: 0.97,
            ..at_risk("S2")
        };
        let summaries = summarize_drivers(&[&a, &b]);
        assert_eq!(summaries[0].count, 2);
        let attendance = summaries.iter().find(|s| s.factor == "attendance").unwrap();
        assert_eq!(attendance.count, 1);
        assert_eq!(attendance.severity, Level::High);
    }

    #[test]
    fn report_has_every_section() {
        let students = vec![at_risk("S100001"), healthy("S100002")];
        let assignments = vec![assignment("A1", 58.0)];
        let insights = course_insights(&students, &assignments, "C1");
        let struggling = struggling_students(&students, "C1", STRUGGLING_THRESHOLD);
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(&insights, &struggling, date);

        assert!(report.starts_with("# Course Performance Report\nGenerated for course C1 on 2026-02-02"));
        assert!(report.contains("- S100001 at 65.0% (85% attendance, 4 missing) risk 0.25"));
        assert!(report.contains("- Assignment 1 (avg 58.0, submit 90%)"));
        assert!(report.contains("- attendance (high): 1 students"));
    }

    #[test]
    fn empty_course_report_says_so() {
        let insights = course_insights(&[], &[], "C9");
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(&insights, &[], date);
        assert!(report.contains("No students are currently below 70% in this course."));
        assert!(report.contains("No assignment data for this course."));
        assert!(report.contains("No grade drivers flagged among struggling students."));
    }
}
