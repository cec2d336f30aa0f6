use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AssistantError, Result};
use crate::forest::{ForestParams, RandomForest, RegressionTree};
use crate::models::StudentRecord;

pub const FEATURE_COUNT: usize = 8;

pub const FEATURES: [&str; FEATURE_COUNT] = [
    "current_grade",
    "attendance_rate",
    "missing_assignments",
    "late_submissions",
    "avg_quiz_score",
    "avg_hw_score",
    "avg_exam_score",
    "logins_last_7d",
];

pub const PASS_CUTOFF: f64 = 60.0;

/// Fail-probability curve width, in grade points.
const FAIL_CURVE_SCALE: f64 = 6.0;

pub type FeatureRow = [Option<f64>; FEATURE_COUNT];

/// Reads the model features off a record; non-finite values become missing.
pub fn coerce_features(record: &StudentRecord) -> FeatureRow {
    [
        record.current_grade,
        record.attendance_rate,
        f64::from(record.missing_assignments),
        f64::from(record.late_submissions),
        record.avg_quiz_score,
        record.avg_hw_score,
        record.avg_exam_score,
        f64::from(record.logins_last_7d),
    ]
    .map(|value| Some(value).filter(|v| v.is_finite()))
}

pub fn impute(row: &FeatureRow, medians: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
    let mut filled = *medians;
    for (slot, value) in filled.iter_mut().zip(row) {
        if let Some(v) = value {
            *slot = *v;
        }
    }
    filled
}

/// Per-column medians over the present values.
pub fn column_medians(rows: &[FeatureRow]) -> Result<[f64; FEATURE_COUNT]> {
    let mut medians = [0.0; FEATURE_COUNT];
    for (column, slot) in medians.iter_mut().enumerate() {
        let mut values: Vec<f64> = rows.iter().filter_map(|row| row[column]).collect();
        *slot = median(&mut values).ok_or_else(|| {
            AssistantError::DataUnavailable(format!(
                "feature {} has no values in the training set",
                FEATURES[column]
            ))
        })?;
    }
    Ok(medians)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Logistic curve centred on the cutoff: a prediction at the cutoff is 0.5.
pub fn prob_fail(predicted_final: f64, pass_cutoff: f64) -> f64 {
    let x = (pass_cutoff - predicted_final) / FAIL_CURVE_SCALE;
    (1.0 / (1.0 + (-x).exp())).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradePredictor {
    features: Vec<String>,
    /// Training-set medians, reused to impute at prediction time.
    medians: [f64; FEATURE_COUNT],
    forest: RandomForest,
    training_rows: usize,
    trained_at: DateTime<Utc>,
}

impl GradePredictor {
    pub fn train(students: &[StudentRecord]) -> Result<Self> {
        Self::train_with(students, ForestParams::default())
    }

    pub fn train_with(students: &[StudentRecord], params: ForestParams) -> Result<Self> {
        let (rows, targets): (Vec<FeatureRow>, Vec<f64>) = students
            .iter()
            .filter_map(|s| {
                let target = s.final_grade.filter(|v| v.is_finite())?;
                Some((coerce_features(s), target))
            })
            .unzip();
        if rows.is_empty() {
            return Err(AssistantError::DataUnavailable(
                "no student rows with a final_grade to train on".to_string(),
            ));
        }
        let skipped = students.len() - rows.len();
        if skipped > 0 {
            tracing::warn!(skipped, "training rows without final_grade skipped");
        }

        let medians = column_medians(&rows)?;
        let x: Vec<[f64; FEATURE_COUNT]> = rows.iter().map(|row| impute(row, &medians)).collect();
        let forest = RandomForest::fit(&x, &targets, params);
        tracing::info!(
            rows = x.len(),
            trees = forest.trees().len(),
            nodes = forest.trees().iter().map(RegressionTree::node_count).sum::<usize>(),
            seed = params.seed,
            "trained grade predictor"
        );

        Ok(Self {
            features: FEATURES.iter().map(|f| f.to_string()).collect(),
            medians,
            forest,
            training_rows: x.len(),
            trained_at: Utc::now(),
        })
    }

    /// Projected final grade, clipped to [0, 100].
    pub fn predict_final_grade(&self, record: &StudentRecord) -> f64 {
        self.predict_features(&coerce_features(record))
    }

    pub fn predict_features(&self, row: &FeatureRow) -> f64 {
        let x = impute(row, &self.medians);
        self.forest.predict(&x).clamp(0.0, 100.0)
    }

    pub fn prob_fail(&self, predicted_final: f64, pass_cutoff: f64) -> f64 {
        prob_fail(predicted_final, pass_cutoff)
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "saved grade predictor");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let predictor: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        if predictor.features != FEATURES {
            return Err(AssistantError::DataUnavailable(format!(
                "artifact {} was trained on features {:?}",
                path.display(),
                predictor.features
            )));
        }
        tracing::info!(
            path = %path.display(),
            rows = predictor.training_rows,
            trained_at = %predictor.trained_at,
            "loaded grade predictor"
        );
        Ok(predictor)
    }

    /// Loads the artifact when present, otherwise trains and saves it.
    pub fn load_or_train(path: &Path, students: &[StudentRecord]) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::info!(path = %path.display(), "no predictor artifact, training");
        let predictor = Self::train(students)?;
        predictor.save(path)?;
        Ok(predictor)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn student(id: &str, grade: f64, final_grade: f64) -> StudentRecord {
        StudentRecord {
            course_id: "C1".to_string(),
            student_id: id.to_string(),
            current_grade: grade,
            final_grade: Some(final_grade),
            attendance_rate: 0.95,
            missing_assignments: 0,
            late_submissions: 0,
            avg_quiz_score: grade,
            avg_hw_score: grade,
            avg_exam_score: grade,
            logins_last_7d: 5,
        }
    }

    pub(crate) fn small_predictor() -> GradePredictor {
        let students: Vec<StudentRecord> = (0..30)
            .map(|i| {
                let grade = 30.0 + 2.0 * i as f64;
                student(&format!("S{}", 100000 + i), grade, grade - 1.0)
            })
            .collect();
        let params = ForestParams {
            n_trees: 15,
            ..ForestParams::default()
        };
        GradePredictor::train_with(&students, params).unwrap()
    }

    #[test]
    fn prob_fail_is_half_at_cutoff() {
        assert_eq!(prob_fail(60.0, 60.0), 0.5);
    }

    #[test]
    fn prob_fail_saturates_far_from_cutoff() {
        assert!(prob_fail(100.0, 60.0) < 0.01);
        assert!(prob_fail(0.0, 60.0) > 0.99);
    }

    #[test]
    fn impute_fills_only_missing_columns() {
        let mut row: FeatureRow = [Some(1.0); FEATURE_COUNT];
        row[2] = None;
        let filled = impute(&row, &[9.0; FEATURE_COUNT]);
        assert_eq!(filled[1], 1.0);
        assert_eq!(filled[2], 9.0);
    }

    #[test]
    fn medians_ignore_missing_values() {
        let mut a: FeatureRow = [Some(1.0); FEATURE_COUNT];
        let b: FeatureRow = [Some(3.0); FEATURE_COUNT];
        a[0] = None;
        let medians = column_medians(&[a, b]).unwrap();
        assert_eq!(medians[0], 3.0);
        assert_eq!(medians[1], 2.0);
    }

    #[test]
    fn nan_metric_is_coerced_to_missing() {
        let mut record = student("S100000", 70.0, 70.0);
        record.attendance_rate = f64::NAN;
        let row = coerce_features(&record);
        assert_eq!(row[1], None);
        assert_eq!(row[0], Some(70.0));
    }

    #[test]
    fn training_requires_final_grades() {
        let mut record = student("S100000", 70.0, 70.0);
        record.final_grade = None;
        let err = GradePredictor::train(&[record]).unwrap_err();
        assert!(matches!(err, AssistantError::DataUnavailable(_)));
    }

    #[test]
    fn predictions_track_grades_and_stay_in_range() {
        let predictor = small_predictor();
        let weak = predictor.predict_final_grade(&student("S1", 32.0, 0.0));
        let strong = predictor.predict_final_grade(&student("S2", 86.0, 0.0));
        assert!(weak < strong);
        assert!((0.0..=100.0).contains(&weak));
        assert!((0.0..=100.0).contains(&strong));
    }

    #[test]
    fn missing_feature_uses_training_median() {
        let predictor = small_predictor();
        let mut record = student("S1", 50.0, 0.0);
        record.attendance_rate = f64::NAN;
        let prediction = predictor.predict_final_grade(&record);
        assert!(prediction.is_finite());
    }

    #[test]
    fn artifact_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("grade_predictor.json");
        let predictor = small_predictor();
        predictor.save(&path).unwrap();
        let loaded = GradePredictor::load(&path).unwrap();
        assert_eq!(loaded.training_rows(), 30);
        let probe = student("S1", 64.0, 0.0);
        let delta = loaded.predict_final_grade(&probe) - predictor.predict_final_grade(&probe);
        assert!(delta.abs() < 1e-9);
    }

    #[test]
    fn load_or_train_prefers_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grade_predictor.json");
        let predictor = small_predictor();
        predictor.save(&path).unwrap();
        // an empty table would fail to train, so success means it loaded
        let loaded = GradePredictor::load_or_train(&path, &[]).unwrap();
        assert_eq!(loaded.trained_at(), predictor.trained_at());
    }
}
