use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FovPatchError, Result};
use crate::utils::*;

/// conf_mat[[true_class, predicted_class]] over binary labels; a score counts as
/// class 1 when it reaches `threshold`, a label when it reaches 0.5.
pub fn add_to_conf_mat(conf_mat: &mut NdArray<u64>, y_true: &[f32], y_scores: &[f32], threshold: f32) {
    debug_assert_eq!(conf_mat.shape, vec![2, 2]);

    for (&t, &p) in y_true.iter().zip(y_scores) {
        let true_class: i32 = if t >= 0.5 { 1 } else { 0 };
        let predicted_class: i32 = if p >= threshold { 1 } else { 0 };
        conf_mat[[true_class, predicted_class]] += 1;
    }
}

/// Area under the ROC curve via the rank-sum statistic; tied scores share their
/// average rank. `None` unless both classes are present.
pub fn auc_roc(y_true: &[f32], y_scores: &[f32]) -> Option<f64> {
    let mut order: Vec<usize> = (0..y_scores.len()).collect();
    order.sort_by(|&a, &b| y_scores[a].partial_cmp(&y_scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut positive_rank_sum = 0.0_f64;
    let mut positives = 0_u64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && y_scores[order[j]] == y_scores[order[i]] {
            j += 1;
        }

        // ranks i+1..=j share their mean
        let rank = (i + 1 + j) as f64 / 2.0;
        for &k in &order[i..j] {
            if y_true[k] >= 0.5 {
                positive_rank_sum += rank;
                positives += 1;
            }
        }
        i = j;
    }

    let negatives = order.len() as u64 - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let p = positives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSummary {
    pub auc_roc: Option<f64>,
    pub f1: f64,
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub precision: f64,
    pub confusion_matrix: [[u64; 2]; 2],
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 { 0.0 } else { num as f64 / denom as f64 }
}

/// Collects FOV-filtered (label, score) pairs over one or more batches.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub threshold: f32,
    y_true: Vec<f32>,
    y_scores: Vec<f32>,
}

#[derive(Serialize)]
struct SavedResults<'a> {
    y_true: &'a [f32],
    y_scores: &'a [f32],
    metrics: MetricSummary,
}

impl Evaluation {
    pub fn new(threshold: f32) -> Self {
        Evaluation {
            threshold: threshold,
            y_true: Vec::new(),
            y_scores: Vec::new(),
        }
    }

    pub fn add_batch(&mut self, y_true: &[f32], y_scores: &[f32]) -> Result<()> {
        if y_true.len() != y_scores.len() {
            return Err(FovPatchError::ShapeMismatch(format!(
                "{} labels but {} scores", y_true.len(), y_scores.len())));
        }

        self.y_true.extend_from_slice(y_true);
        self.y_scores.extend_from_slice(y_scores);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.y_true.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_true.is_empty()
    }

    pub fn confusion_matrix(&self) -> NdArray<u64> {
        ndarray!(new: conf_mat -> 0_u64; [2, 2]);
        add_to_conf_mat(&mut conf_mat, &self.y_true, &self.y_scores, self.threshold);
        conf_mat
    }

    pub fn auc_roc(&self) -> Option<f64> {
        auc_roc(&self.y_true, &self.y_scores)
    }

    pub fn summary(&self) -> MetricSummary {
        let cm = self.confusion_matrix();
        let (tn, fp, fn_, tp) = (cm[[0, 0]], cm[[0, 1]], cm[[1, 0]], cm[[1, 1]]);

        let precision = ratio(tp, tp + fp);
        let sensitivity = ratio(tp, tp + fn_);
        let f1 = if precision + sensitivity > 0.0 {
            2.0 * precision * sensitivity / (precision + sensitivity)
        } else {
            0.0
        };

        MetricSummary {
            auc_roc: self.auc_roc(),
            f1: f1,
            accuracy: ratio(tp + tn, tp + tn + fp + fn_),
            sensitivity: sensitivity,
            specificity: ratio(tn, tn + fp),
            precision: precision,
            confusion_matrix: [[tn, fp], [fn_, tp]],
        }
    }

    /// Writes labels, scores and the metric summary as one JSON document.
    pub fn save_results<P: AsRef<Path>>(&self, path: P) -> Result<MetricSummary> {
        let metrics = self.summary();
        let saved = SavedResults {
            y_true: &self.y_true,
            y_scores: &self.y_scores,
            metrics: metrics.clone(),
        };

        fs::write(path.as_ref(), serde_json::to_vec(&saved)?)?;
        log::info!("saved {} scored pixels to {:?}", self.len(), path.as_ref());
        Ok(metrics)
    }
}

#[derive(Serialize, Deserialize)]
struct SavedArray {
    shape: Vec<i32>,
    data: Vec<f32>,
}

/// Writes a prediction array (e.g. recomposed full images) as `{shape, data}` JSON.
pub fn save_predictions<P: AsRef<Path>>(path: P, preds: &NdArray<f32>) -> Result<()> {
    let saved = SavedArray {
        shape: preds.shape.clone(),
        data: preds.as_slice().to_vec(),
    };

    fs::write(path.as_ref(), serde_json::to_vec(&saved)?)?;
    log::info!("saved predictions {:?} to {:?}", preds.shape, path.as_ref());
    Ok(())
}

pub fn load_predictions<P: AsRef<Path>>(path: P) -> Result<NdArray<f32>> {
    let saved: SavedArray = serde_json::from_slice(&fs::read(path)?)?;
    if saved.shape.is_empty() || saved.shape.iter().any(|&d| d < 0) {
        return Err(FovPatchError::ShapeMismatch(format!("invalid saved shape {:?}", saved.shape)));
    }
    NdArray::from_vec(saved.data, saved.shape)
}
