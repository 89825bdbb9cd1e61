use rand::Rng;

use crate::config::{LimitPolicy, SamplingConfig};
use crate::error::{FovPatchError, Result};
use crate::fov::{check_fov_masks, is_patch_inside_fov, FovMode};
use crate::tiling::{border_padding, PatchOrigin, TileLayout};
use crate::utils::*;
use crate::validate::data_consistency_check;

/// Patches [N, C, patch_h, patch_w] together with where each one was taken from.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchSet {
    pub patches: NdArray<f32>,
    pub origins: Vec<PatchOrigin>,
}

impl PatchSet {
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

macro_rules! for_each_pixel {
    ( ($height: expr, $width: expr, $offsets: expr) -> ($y: ident, $x: ident), $sample_pos: ident $code: block ) => {
        for $y in 0..$height {
            let y_offset = $y + $offsets.0;

            for $x in 0..$width {
                let $sample_pos = (
                    y_offset,
                    $x + $offsets.1
                );

                $code
            }
        }
    }
}

fn check_channels(imgs: &NdArray<f32>) -> Result<(i32, i32, i32, i32)> {
    let dims = imgs.dims4()?;
    if dims.1 != 1 && dims.1 != 3 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "images must have 1 or 3 channels, got {}", dims.1)));
    }
    Ok(dims)
}

// appends the [C, patch_h, patch_w] window of image i at (top, left) to `out`
fn push_window(out: &mut Vec<f32>, img: &NdArray<f32>, i: i32, origin: (i32, i32), patch_h: i32, patch_w: i32) {
    for c in 0..img.shape[1] {
        for_each_pixel!(
            (patch_h, patch_w, origin) -> (y, x), sample_pos {
                out.push(img[[i, c, sample_pos.0, sample_pos.1]]);
            }
        );
    }
}

/// Extends every image with zeros on the bottom/right until
/// `(H - patch_h) % stride_h == 0` and `(W - patch_w) % stride_w == 0`.
pub fn paint_border_overlap(imgs: &NdArray<f32>, patch_h: i32, patch_w: i32, stride_h: i32, stride_w: i32) -> Result<NdArray<f32>> {
    let (n, c, img_h, img_w) = check_channels(imgs)?;
    let pad_h = border_padding(img_h, patch_h, stride_h)?;
    let pad_w = border_padding(img_w, patch_w, stride_w)?;

    if pad_h != 0 {
        log::info!("H side {} is not compatible with patch {} / stride {}, padding with {} pixels",
            img_h, patch_h, stride_h, pad_h);
    }
    if pad_w != 0 {
        log::info!("W side {} is not compatible with patch {} / stride {}, padding with {} pixels",
            img_w, patch_w, stride_w, pad_w);
    }
    if pad_h == 0 && pad_w == 0 {
        return Ok(imgs.clone());
    }

    ndarray!(new: padded -> 0.0_f32; [n, c, img_h + pad_h, img_w + pad_w]);
    for i in 0..n {
        for ch in 0..c {
            for y in 0..img_h {
                for x in 0..img_w {
                    padded[[i, ch, y, x]] = imgs[[i, ch, y, x]];
                }
            }
        }
    }

    log::info!("new full images shape: {:?}", padded.shape);
    Ok(padded)
}

/// Border padding for non-overlapping tiles.
pub fn paint_border(imgs: &NdArray<f32>, patch_h: i32, patch_w: i32) -> Result<NdArray<f32>> {
    paint_border_overlap(imgs, patch_h, patch_w, patch_h, patch_w)
}

/// Cuts every image into `patch_h x patch_w` tiles at multiples of the stride.
/// The images must already be padded (see `paint_border_overlap`).
pub fn extract_ordered_overlap(imgs: &NdArray<f32>, patch_h: i32, patch_w: i32, stride_h: i32, stride_w: i32) -> Result<PatchSet> {
    let (n, c, img_h, img_w) = check_channels(imgs)?;
    let layout = TileLayout::new(img_h, img_w, patch_h, patch_w, stride_h, stride_w)?;
    let total = n.checked_mul(layout.per_image()).ok_or_else(|| FovPatchError::Configuration(format!(
        "{} images of {} tiles each are too many patches", n, layout.per_image())))?;

    log::info!("patches on h: {}, on w: {}, per image: {}, total: {}",
        layout.rows(), layout.cols(), layout.per_image(), total);

    let mut data = Vec::with_capacity(element_count(&[total, c, patch_h, patch_w])?);
    let origins: Vec<PatchOrigin> = layout.origins(n).collect();
    for origin in &origins {
        push_window(&mut data, imgs, origin.image, (origin.y, origin.x), patch_h, patch_w);
    }
    debug_assert_eq!(origins.len() as i32, total);

    Ok(PatchSet {
        patches: NdArray::from_vec(data, vec![total, c, patch_h, patch_w])?,
        origins: origins,
    })
}

/// Non-overlapping tiling (stride equal to the patch size).
pub fn extract_ordered(imgs: &NdArray<f32>, patch_h: i32, patch_w: i32) -> Result<PatchSet> {
    extract_ordered_overlap(imgs, patch_h, patch_w, patch_h, patch_w)
}

/// Training patches and the matching ground-truth patches.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainPatches {
    pub images: PatchSet,
    pub masks: NdArray<f32>,
}

/// Samples `n_patches / N` patch centers uniformly per image. With `inside_fov`,
/// candidates failing the `sampling.mode` FOV test are redrawn; `max_attempts`
/// bounds the redraws for one patch, after which `on_limit` decides between an
/// error and relaxing to the center-pixel test.
pub fn extract_random<R: Rng>(
    imgs: &NdArray<f32>, masks: &NdArray<f32>, fovs: &NdArray<f32>,
    patch_h: i32, patch_w: i32, sampling: &SamplingConfig, rng: &mut R) -> Result<TrainPatches> {

    let (n, c, img_h, img_w) = check_channels(imgs)?;
    data_consistency_check(imgs, masks)?;
    check_fov_masks(fovs)?;
    if fovs.shape[0] < n || fovs.shape[2] != img_h || fovs.shape[3] != img_w {
        return Err(FovPatchError::ShapeMismatch(format!(
            "FOV masks {:?} do not cover images {:?}", fovs.shape, imgs.shape)));
    }
    if patch_h <= 0 || patch_w <= 0 || patch_h > img_h || patch_w > img_w {
        return Err(FovPatchError::Configuration(format!(
            "{}x{} patches do not fit into {}x{} images", patch_h, patch_w, img_h, img_w)));
    }
    if sampling.n_patches <= 0 || n == 0 {
        return Err(FovPatchError::Configuration("nothing to sample".into()));
    }

    let per_image = sampling.n_patches / n;
    if sampling.n_patches % n != 0 {
        log::warn!("{} patches do not divide evenly over {} images, dropping {}",
            sampling.n_patches, n, sampling.n_patches % n);
    }
    log::info!("patches per image: {}", per_image);

    let half_h = patch_h / 2;
    let half_w = patch_w / 2;
    let y_range = half_h..=(img_h - patch_h + half_h);
    let x_range = half_w..=(img_w - patch_w + half_w);

    let total = per_image * n;
    let mut data = Vec::with_capacity(element_count(&[total, c, patch_h, patch_w])?);
    let mut mask_data = Vec::with_capacity(element_count(&[total, patch_h, patch_w])?);
    let mut origins = Vec::with_capacity(total as usize);

    for i in 0..n {
        let mut k = 0;
        let mut attempts = 0_u64;
        let mut mode = sampling.mode;

        while k < per_image {
            let x_center = rng.gen_range(x_range.clone());
            let y_center = rng.gen_range(y_range.clone());

            if sampling.inside_fov && !is_patch_inside_fov(x_center, y_center, i, fovs, patch_h, patch_w, mode) {
                attempts += 1;
                if let Some(max_attempts) = sampling.max_attempts {
                    if attempts >= max_attempts {
                        match (sampling.on_limit, mode) {
                            (LimitPolicy::FallbackCenter, FovMode::All) => {
                                log::warn!("image {}: {} candidates rejected, relaxing to center test", i, attempts);
                                mode = FovMode::Center;
                                attempts = 0;
                            }
                            _ => {
                                log::warn!("image {}: giving up after {} rejected candidates", i, attempts);
                                return Err(FovPatchError::RejectionLimit { image: i, attempts: attempts });
                            }
                        }
                    }
                }
                continue;
            }

            let origin = (y_center - half_h, x_center - half_w);
            push_window(&mut data, imgs, i, origin, patch_h, patch_w);
            push_window(&mut mask_data, masks, i, origin, patch_h, patch_w);
            origins.push(PatchOrigin { image: i, y: origin.0, x: origin.1 });

            k += 1;
            attempts = 0;
            mode = sampling.mode;
        }
    }

    let patches = TrainPatches {
        images: PatchSet {
            patches: NdArray::from_vec(data, vec![total, c, patch_h, patch_w])?,
            origins: origins,
        },
        masks: NdArray::from_vec(mask_data, vec![total, 1, patch_h, patch_w])?,
    };
    data_consistency_check(&patches.images.patches, &patches.masks)?;

    Ok(patches)
}
