use serde::{Deserialize, Serialize};

use crate::error::{FovPatchError, Result};

/// Where a patch came from: source image and top-left pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchOrigin {
    pub image: i32,
    pub y: i32,
    pub x: i32,
}

/// Zero rows/cols to append on the high side so that `(dim + pad - patch) % stride == 0`.
pub fn border_padding(dim: i32, patch: i32, stride: i32) -> Result<i32> {
    if patch <= 0 || stride <= 0 {
        return Err(FovPatchError::Configuration(format!(
            "patch {} and stride {} must be positive", patch, stride)));
    }
    if stride > patch {
        return Err(FovPatchError::Configuration(format!(
            "stride {} exceeds patch {}, tiles would leave gaps", stride, patch)));
    }
    if dim < patch {
        return Err(FovPatchError::Configuration(format!(
            "patch {} does not fit into image dimension {}", patch, dim)));
    }

    let leftover = (dim - patch) % stride;
    Ok(if leftover == 0 { 0 } else { stride - leftover })
}

/// Regular grid of patch origins over one image; rows are enumerated before columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileLayout {
    pub img_h: i32,
    pub img_w: i32,
    pub patch_h: i32,
    pub patch_w: i32,
    pub stride_h: i32,
    pub stride_w: i32,
}

impl TileLayout {
    pub fn new(img_h: i32, img_w: i32, patch_h: i32, patch_w: i32, stride_h: i32, stride_w: i32) -> Result<Self> {
        if border_padding(img_h, patch_h, stride_h)? != 0 || border_padding(img_w, patch_w, stride_w)? != 0 {
            return Err(FovPatchError::Configuration(format!(
                "{}x{} image cannot be tiled by {}x{} patches with stride {}x{}; pad it first",
                img_h, img_w, patch_h, patch_w, stride_h, stride_w)));
        }

        let rows = (img_h - patch_h) / stride_h + 1;
        let cols = (img_w - patch_w) / stride_w + 1;
        if rows.checked_mul(cols).is_none() {
            return Err(FovPatchError::Configuration(format!(
                "{}x{} tiles per image are too many", rows, cols)));
        }

        Ok(TileLayout {
            img_h: img_h,
            img_w: img_w,
            patch_h: patch_h,
            patch_w: patch_w,
            stride_h: stride_h,
            stride_w: stride_w,
        })
    }

    pub fn rows(&self) -> i32 {
        (self.img_h - self.patch_h) / self.stride_h + 1
    }

    pub fn cols(&self) -> i32 {
        (self.img_w - self.patch_w) / self.stride_w + 1
    }

    pub fn per_image(&self) -> i32 {
        self.rows() * self.cols()
    }

    pub fn origin(&self, image: i32, row: i32, col: i32) -> PatchOrigin {
        PatchOrigin {
            image: image,
            y: row * self.stride_h,
            x: col * self.stride_w,
        }
    }

    /// All origins for `n_images` images: image-major, then row, then column.
    pub fn origins(&self, n_images: i32) -> impl Iterator<Item = PatchOrigin> + '_ {
        let rows = self.rows();
        let cols = self.cols();

        (0..n_images).flat_map(move |i| {
            (0..rows).flat_map(move |h| (0..cols).map(move |w| self.origin(i, h, w)))
        })
    }
}
