use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AssistantError, Result};
use crate::models::{AssignmentRecord, StudentRecord};

/// Both record sets of one course data snapshot.
#[derive(Debug, Clone, Default)]
pub struct CourseTables {
    pub students: Vec<StudentRecord>,
    pub assignments: Vec<AssignmentRecord>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CsvRow {
    record_type: Option<String>,
    course_id: Option<String>,
    student_id: Option<String>,
    assignment_id: Option<String>,
    assignment_name: Option<String>,
    avg_score: Option<String>,
    submission_rate: Option<String>,
    current_grade: Option<String>,
    final_grade: Option<String>,
    attendance_rate: Option<String>,
    missing_assignments: Option<String>,
    late_submissions: Option<String>,
    avg_quiz_score: Option<String>,
    avg_hw_score: Option<String>,
    avg_exam_score: Option<String>,
    logins_last_7d: Option<String>,
}

pub fn load_csv(path: &Path) -> Result<CourseTables> {
    if !path.exists() {
        return Err(AssistantError::DataUnavailable(format!(
            "data file not found: {}",
            path.display()
        )));
    }
    let file = std::fs::File::open(path)?;
    let tables = read_tables(file)?;
    tracing::info!(
        path = %path.display(),
        students = tables.students.len(),
        assignments = tables.assignments.len(),
        "loaded course data"
    );
    Ok(tables)
}

pub fn read_tables<R: Read>(source: R) -> Result<CourseTables> {
    let mut reader = csv::Reader::from_reader(source);
    let headers = reader.headers()?.clone();
    let mut tables = CourseTables::default();
    let mut seen_students = HashSet::new();
    let mut seen_assignments = HashSet::new();
    let mut coerced = 0usize;

    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        let row: CsvRow = record.deserialize(Some(&headers))?;
        let mut row_reader = RowReader {
            line,
            coerced: &mut coerced,
        };

        match row.record_type.as_deref().map(str::trim) {
            Some("student") => {
                let record = row_reader.student(&row)?;
                let key = (record.course_id.clone(), record.student_id.clone());
                if !seen_students.insert(key) {
                    return Err(AssistantError::InvalidRecord {
                        line,
                        reason: format!(
                            "duplicate student {} in course {}",
                            record.student_id, record.course_id
                        ),
                    });
                }
                tables.students.push(record);
            }
            Some("assignment") => {
                let record = row_reader.assignment(&row)?;
                let key = (record.course_id.clone(), record.assignment_id.clone());
                if !seen_assignments.insert(key) {
                    return Err(AssistantError::InvalidRecord {
                        line,
                        reason: format!(
                            "duplicate assignment {} in course {}",
                            record.assignment_id, record.course_id
                        ),
                    });
                }
                tables.assignments.push(record);
            }
            other => {
                tracing::warn!(line, record_type = ?other, "skipping row with unknown record_type");
            }
        }
    }

    if coerced > 0 {
        tracing::warn!(fields = coerced, "blank or unparseable metrics treated as missing");
    }
    Ok(tables)
}

struct RowReader<'a> {
    line: u64,
    coerced: &'a mut usize,
}

impl RowReader<'_> {
    fn student(&mut self, row: &CsvRow) -> Result<StudentRecord> {
        Ok(StudentRecord {
            course_id: self.text(&row.course_id, "course_id")?,
            student_id: self.text(&row.student_id, "student_id")?,
            current_grade: self.metric(&row.current_grade),
            final_grade: parse_float(row.final_grade.as_deref()),
            attendance_rate: self.metric(&row.attendance_rate),
            missing_assignments: self.count(&row.missing_assignments, "missing_assignments")?,
            late_submissions: self.count(&row.late_submissions, "late_submissions")?,
            avg_quiz_score: self.metric(&row.avg_quiz_score),
            avg_hw_score: self.metric(&row.avg_hw_score),
            avg_exam_score: self.metric(&row.avg_exam_score),
            logins_last_7d: self.count(&row.logins_last_7d, "logins_last_7d")?,
        })
    }

    fn assignment(&mut self, row: &CsvRow) -> Result<AssignmentRecord> {
        Ok(AssignmentRecord {
            course_id: self.text(&row.course_id, "course_id")?,
            assignment_id: self.text(&row.assignment_id, "assignment_id")?,
            assignment_name: self.text(&row.assignment_name, "assignment_name")?,
            avg_score: self.metric(&row.avg_score),
            submission_rate: self.metric(&row.submission_rate),
        })
    }

    fn text(&self, value: &Option<String>, field: &str) -> Result<String> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(AssistantError::InvalidRecord {
                line: self.line,
                reason: format!("{field} is empty"),
            }),
        }
    }

    fn metric(&mut self, value: &Option<String>) -> f64 {
        parse_float(value.as_deref()).unwrap_or_else(|| {
            *self.coerced += 1;
            f64::NAN
        })
    }

    fn count(&self, value: &Option<String>, field: &str) -> Result<u32> {
        parse_count(value.as_deref()).ok_or_else(|| AssistantError::InvalidRecord {
            line: self.line,
            reason: format!("{field} is not a non-negative whole number"),
        })
    }
}

/// Blank, unparseable and non-finite values all read as missing.
pub fn parse_float(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Accepts integral floats such as `2.0`, which pandas writes for int
/// columns that contain blanks.
pub fn parse_count(raw: Option<&str>) -> Option<u32> {
    let value = parse_float(raw)?;
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return None;
    }
    Some(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "record_type,course_id,assignment_id,assignment_name,avg_score,submission_rate,student_id,attendance_rate,missing_assignments,late_submissions,avg_quiz_score,avg_hw_score,avg_exam_score,logins_last_7d,current_grade,final_grade,label";

    fn csv_text(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    #[test]
    fn splits_rows_by_record_type() {
        let text = csv_text(&[
            "assignment,C1,A1,Assignment 1,71.5,0.9,,,,,,,,,,,",
            "student,C1,,,,,S100000,0.93,2.0,1.0,78.1,80.2,76.3,4.0,74.9,73.0,0",
        ]);
        let tables = read_tables(text.as_bytes()).unwrap();
        assert_eq!(tables.assignments.len(), 1);
        assert_eq!(tables.assignments[0].assignment_name, "Assignment 1");
        assert_eq!(tables.students.len(), 1);
        let student = &tables.students[0];
        assert_eq!(student.student_id, "S100000");
        assert_eq!(student.missing_assignments, 2);
        assert_eq!(student.logins_last_7d, 4);
        assert_eq!(student.final_grade, Some(73.0));
    }

    #[test]
    fn blank_metric_becomes_missing() {
        let text = csv_text(&["student,C1,,,,,S100000,,0,0,78,80,76,4,74.9,,0"]);
        let tables = read_tables(text.as_bytes()).unwrap();
        assert!(tables.students[0].attendance_rate.is_nan());
        assert_eq!(tables.students[0].final_grade, None);
    }

    #[test]
    fn fractional_count_is_rejected() {
        let text = csv_text(&["student,C1,,,,,S100000,0.9,2.5,0,78,80,76,4,74.9,70,0"]);
        let err = read_tables(text.as_bytes()).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidRecord { line: 2, .. }));
    }

    #[test]
    fn duplicate_student_is_rejected() {
        let row = "student,C1,,,,,S100000,0.9,0,0,78,80,76,4,74.9,70,0";
        let text = csv_text(&[row, row]);
        let err = read_tables(text.as_bytes()).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidRecord { line: 3, .. }));
    }

    #[test]
    fn missing_file_is_data_unavailable() {
        let err = load_csv(Path::new("/nonexistent/course.csv")).unwrap_err();
        assert!(matches!(err, AssistantError::DataUnavailable(_)));
    }

    #[test]
    fn parse_count_handles_pandas_floats() {
        assert_eq!(parse_count(Some("3.0")), Some(3));
        assert_eq!(parse_count(Some("-1")), None);
        assert_eq!(parse_count(Some("")), None);
    }
}
