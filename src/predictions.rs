use std::str::FromStr;

use crate::error::{FovPatchError, Result};
use crate::utils::*;

/// How per-pixel class probabilities become a patch image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredMode {
    /// probability of the vessel class
    Prob,
    /// vessel probability thresholded at 0.5
    Threshold,
}

impl FromStr for PredMode {
    type Err = FovPatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" | "prob" => Ok(PredMode::Prob),
            "threshold" => Ok(PredMode::Threshold),
            _ => Err(FovPatchError::UnknownMode(s.to_string())),
        }
    }
}

/// Converts model output [B, patch_h*patch_w, classes] to patch images [B, 1, patch_h, patch_w]
/// holding the class-1 (vessel) channel.
pub fn pred_to_imgs(pred: &NdArray<f32>, patch_h: i32, patch_w: i32, mode: PredMode) -> Result<NdArray<f32>> {
    if pred.ndim() != 3 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "expected [B, pixels, classes] predictions, got {:?}", pred.shape)));
    }
    let (n, pixels, classes) = (pred.shape[0], pred.shape[1], pred.shape[2]);
    if pixels != patch_h * patch_w {
        return Err(FovPatchError::ShapeMismatch(format!(
            "{} pixels per prediction do not form a {}x{} patch", pixels, patch_h, patch_w)));
    }
    if classes < 2 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "need at least two classes, got {}", classes)));
    }

    ndarray!(new: out -> 0.0_f32; [n, 1, patch_h, patch_w]);
    for i in 0..n {
        for p in 0..pixels {
            let vessel = pred[[i, p, 1]];
            out[[i, 0, p / patch_w, p % patch_w]] = match mode {
                PredMode::Prob => vessel,
                PredMode::Threshold => if vessel >= 0.5 { 1.0 } else { 0.0 },
            };
        }
    }

    Ok(out)
}

/// Hard labels from probabilities: 1 where `p >= threshold`.
pub fn binarize(probs: &NdArray<f32>, threshold: f32) -> NdArray<f32> {
    probs.map(|p| if p >= threshold { 1.0 } else { 0.0 })
}
