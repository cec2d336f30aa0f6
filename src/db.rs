use std::path::Path;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::data::{self, CourseTables};
use crate::error::{AssistantError, Result};
use crate::models::{AssignmentRecord, StudentRecord};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Upserts every row of a course CSV. Returns the number of rows written.
pub async fn import_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let tables = data::load_csv(csv_path)?;
    let mut written = 0usize;

    for (position, student) in tables.students.iter().enumerate() {
        let result = sqlx::query(
            r#"
            INSERT INTO teacher_assistant.students
            (course_id, student_id, current_grade, final_grade, attendance_rate,
             missing_assignments, late_submissions, avg_quiz_score, avg_hw_score,
             avg_exam_score, logins_last_7d, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (course_id, student_id) DO UPDATE
            SET current_grade = EXCLUDED.current_grade,
                final_grade = EXCLUDED.final_grade,
                attendance_rate = EXCLUDED.attendance_rate,
                missing_assignments = EXCLUDED.missing_assignments,
                late_submissions = EXCLUDED.late_submissions,
                avg_quiz_score = EXCLUDED.avg_quiz_score,
                avg_hw_score = EXCLUDED.avg_hw_score,
                avg_exam_score = EXCLUDED.avg_exam_score,
                logins_last_7d = EXCLUDED.logins_last_7d,
                position = EXCLUDED.position
            "#,
        )
        .bind(&student.course_id)
        .bind(&student.student_id)
        .bind(student.current_grade)
        .bind(student.final_grade)
        .bind(student.attendance_rate)
        .bind(to_db_count(student.missing_assignments)?)
        .bind(to_db_count(student.late_submissions)?)
        .bind(student.avg_quiz_score)
        .bind(student.avg_hw_score)
        .bind(student.avg_exam_score)
        .bind(to_db_count(student.logins_last_7d)?)
        .bind(to_db_position(position)?)
        .execute(pool)
        .await?;
        written += result.rows_affected() as usize;
    }

    for (position, assignment) in tables.assignments.iter().enumerate() {
        let result = sqlx::query(
            r#"
            INSERT INTO teacher_assistant.assignments
            (course_id, assignment_id, assignment_name, avg_score, submission_rate, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (course_id, assignment_id) DO UPDATE
            SET assignment_name = EXCLUDED.assignment_name,
                avg_score = EXCLUDED.avg_score,
                submission_rate = EXCLUDED.submission_rate,
                position = EXCLUDED.position
            "#,
        )
        .bind(&assignment.course_id)
        .bind(&assignment.assignment_id)
        .bind(&assignment.assignment_name)
        .bind(assignment.avg_score)
        .bind(assignment.submission_rate)
        .bind(to_db_position(position)?)
        .execute(pool)
        .await?;
        written += result.rows_affected() as usize;
    }

    tracing::info!(rows = written, path = %csv_path.display(), "imported course data");
    Ok(written)
}

/// Reads both tables once. Rows keep their import order so ties in grade or
/// score rank the same way they do when reading the CSV directly.
pub async fn fetch_tables(pool: &PgPool) -> Result<CourseTables> {
    let rows = sqlx::query(
        "SELECT course_id, student_id, current_grade, final_grade, attendance_rate, \
         missing_assignments, late_submissions, avg_quiz_score, avg_hw_score, \
         avg_exam_score, logins_last_7d \
         FROM teacher_assistant.students \
         ORDER BY position, course_id, student_id",
    )
    .fetch_all(pool)
    .await?;

    let mut students = Vec::with_capacity(rows.len());
    for row in rows {
        students.push(StudentRecord {
            course_id: row.get("course_id"),
            student_id: row.get("student_id"),
            current_grade: row.get("current_grade"),
            final_grade: row.get("final_grade"),
            attendance_rate: row.get("attendance_rate"),
            missing_assignments: from_db_count(row.get("missing_assignments"))?,
            late_submissions: from_db_count(row.get("late_submissions"))?,
            avg_quiz_score: row.get("avg_quiz_score"),
            avg_hw_score: row.get("avg_hw_score"),
            avg_exam_score: row.get("avg_exam_score"),
            logins_last_7d: from_db_count(row.get("logins_last_7d"))?,
        });
    }

    let assignments = sqlx::query(
        "SELECT course_id, assignment_id, assignment_name, avg_score, submission_rate \
         FROM teacher_assistant.assignments \
         ORDER BY position, course_id, assignment_id",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| AssignmentRecord {
        course_id: row.get("course_id"),
        assignment_id: row.get("assignment_id"),
        assignment_name: row.get("assignment_name"),
        avg_score: row.get("avg_score"),
        submission_rate: row.get("submission_rate"),
    })
    .collect::<Vec<_>>();

    tracing::info!(
        students = students.len(),
        assignments = assignments.len(),
        "loaded course data from Postgres"
    );
    Ok(CourseTables {
        students,
        assignments,
    })
}

fn to_db_count(value: u32) -> anyhow::Result<i32> {
    i32::try_from(value).context("count does not fit in an INTEGER column")
}

fn to_db_position(position: usize) -> anyhow::Result<i32> {
    i32::try_from(position).context("too many rows to record import order")
}

fn from_db_count(value: i32) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AssistantError::DataUnavailable(format!("negative count {value} in database")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_convert_both_ways() {
        assert_eq!(to_db_count(12).unwrap(), 12);
        assert_eq!(from_db_count(3).unwrap(), 3);
        assert!(matches!(
            from_db_count(-1),
            Err(AssistantError::DataUnavailable(_))
        ));
        assert!(to_db_count(u32::MAX).is_err());
    }

    #[test]
    fn positions_fit_the_column() {
        assert_eq!(to_db_position(0).unwrap(), 0);
        assert!(to_db_position(usize::MAX).is_err());
    }
}
