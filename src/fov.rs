use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use num::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{FovPatchError, Result};
use crate::utils::*;

/// How much of a candidate patch has to lie inside the field of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FovMode {
    /// only the center pixel is tested
    Center,
    /// every pixel of the patch's bounding box is tested
    All,
}

impl FromStr for FovMode {
    type Err = FovPatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "center" => Ok(FovMode::Center),
            "all" => Ok(FovMode::All),
            _ => Err(FovPatchError::UnknownMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for FovMode {
    type Error = FovPatchError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FovMode> for String {
    fn from(mode: FovMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for FovMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FovMode::Center => write!(f, "center"),
            FovMode::All => write!(f, "all"),
        }
    }
}

pub fn check_fov_masks<T: Copy>(masks: &NdArray<T>) -> Result<()> {
    let (_, c, _, _) = masks.dims4()?;
    if c != 1 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "FOV masks must have a single channel, got {}", c)));
    }
    Ok(())
}

/// Pixel (x, y) of image `i` lies inside the FOV iff it is within the mask and the
/// raw mask value there is positive. `masks` is [N, 1, H, W].
#[inline]
pub fn inside_fov<T: Copy + Zero + PartialOrd>(i: i32, x: i32, y: i32, masks: &NdArray<T>) -> bool {
    if x < 0 || y < 0 || x >= masks.shape[3] || y >= masks.shape[2] {
        return false;
    }

    masks[[i, 0, y, x]] > T::zero()
}

/// Acceptance test for a patch centered at (x, y) in image `i`. The bounding box
/// starts at `(y - patch_h/2, x - patch_w/2)` and spans `patch_h x patch_w`.
pub fn is_patch_inside_fov<T: Copy + Zero + PartialOrd>(
    x: i32, y: i32, i: i32, masks: &NdArray<T>, patch_h: i32, patch_w: i32, mode: FovMode) -> bool {

    match mode {
        FovMode::Center => inside_fov(i, x, y, masks),
        FovMode::All => {
            let top = y - patch_h / 2;
            let left = x - patch_w / 2;

            for py in top..top+patch_h {
                for px in left..left+patch_w {
                    if !inside_fov(i, px, py, masks) {
                        return false;
                    }
                }
            }

            true
        }
    }
}

/// Zeroes every channel of every pixel outside the FOV. `data` may be larger than
/// the masks (e.g. after border padding); pixels beyond the masks count as outside.
pub fn kill_border<T: Copy + Zero, U: Copy + Zero + PartialOrd>(data: &mut NdArray<T>, masks: &NdArray<U>) -> Result<()> {
    let (n, c, height, width) = data.dims4()?;
    if c != 1 && c != 3 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "expected 1 or 3 channels, got {}", c)));
    }
    check_fov_masks(masks)?;
    if n > masks.shape[0] {
        return Err(FovPatchError::ShapeMismatch(format!(
            "{} images but only {} FOV masks", n, masks.shape[0])));
    }

    let mut killed = 0_usize;
    for i in 0..n {
        for x in 0..width {
            for y in 0..height {
                if inside_fov(i, x, y, masks) {
                    continue;
                }

                for ch in 0..c {
                    data[[i, ch, y, x]] = T::zero();
                }
                killed += 1;
            }
        }
    }

    log::debug!("zeroed {} pixels outside the FOV", killed);
    Ok(())
}

/// Flattens predictions and labels to the pixels inside the FOV. Scan order is
/// image, then column, then row; the two outputs are paired element by element.
pub fn pred_only_fov<U: Copy + Zero + PartialOrd>(
    preds: &NdArray<f32>, gts: &NdArray<f32>, masks: &NdArray<U>) -> Result<(Vec<f32>, Vec<f32>)> {

    let (n, c, height, width) = preds.dims4()?;
    let (gn, gc, gh, gw) = gts.dims4()?;
    if n != gn || height != gh || width != gw {
        return Err(FovPatchError::ShapeMismatch(format!(
            "predictions {:?} and labels {:?} differ", preds.shape, gts.shape)));
    }
    if c != 1 || gc != 1 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "predictions and labels must be single channel, got {} and {}", c, gc)));
    }
    check_fov_masks(masks)?;
    if n > masks.shape[0] {
        return Err(FovPatchError::ShapeMismatch(format!(
            "{} images but only {} FOV masks", n, masks.shape[0])));
    }

    let mut scores = Vec::new();
    let mut labels = Vec::new();

    for i in 0..n {
        for x in 0..width {
            for y in 0..height {
                if inside_fov(i, x, y, masks) {
                    scores.push(preds[[i, 0, y, x]]);
                    labels.push(gts[[i, 0, y, x]]);
                }
            }
        }
    }

    log::info!("{} pixels inside the FOV out of {}", scores.len(), n * height * width);
    Ok((scores, labels))
}
