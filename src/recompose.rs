use crate::error::{FovPatchError, Result};
use crate::tiling::{PatchOrigin, TileLayout};
use crate::utils::*;

/// Averaged full-size predictions and the number of patches that covered each pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Recomposed {
    pub average: NdArray<f32>,
    pub coverage: NdArray<u32>,
}

fn check_patches(preds: &NdArray<f32>) -> Result<(i32, i32, i32, i32)> {
    let dims = preds.dims4()?;
    if dims.1 != 1 && dims.1 != 3 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "patches must have 1 or 3 channels, got {}", dims.1)));
    }
    Ok(dims)
}

// elements of one output image; every output dimension must be at least 1
fn check_output(n_images: i32, c: i32, img_h: i32, img_w: i32) -> Result<usize> {
    if n_images < 1 || img_h < 1 || img_w < 1 {
        return Err(FovPatchError::Configuration(format!(
            "cannot recompose {} images of {}x{}", n_images, img_h, img_w)));
    }
    element_count(&[n_images, c, img_h, img_w])?;
    element_count(&[c, img_h, img_w])
}

// adds patch k to the [C, H, W] slabs of its image
fn accumulate_patch(prob: &mut [f32], sum: &mut [u32], preds: &NdArray<f32>, k: i32, origin: &PatchOrigin, img_h: i32, img_w: i32) {
    let (channels, patch_h, patch_w) = (preds.shape[1], preds.shape[2], preds.shape[3]);

    for c in 0..channels {
        for y in 0..patch_h {
            let row = ((c * img_h + origin.y + y) as usize) * (img_w as usize) + origin.x as usize;
            for x in 0..patch_w {
                prob[row + x as usize] += preds[[k, c, y, x]];
                sum[row + x as usize] += 1;
            }
        }
    }
}

fn finalize(mut prob: NdArray<f32>, sum: NdArray<u32>) -> Result<Recomposed> {
    if sum.min().map_or(true, |m| m < 1) {
        return Err(FovPatchError::Configuration("some pixels are not covered by any patch".into()));
    }

    for (p, &s) in prob.as_mut_slice().iter_mut().zip(sum.as_slice()) {
        *p /= s as f32;
    }

    Ok(Recomposed {
        average: prob,
        coverage: sum,
    })
}

/// Folds patch predictions, given in the order produced by `extract_ordered_overlap`
/// (image, row, column), back into `img_h x img_w` images by averaging overlaps.
/// With `num_threads > 1` whole images are distributed over worker threads.
pub fn recompone_overlap(preds: &NdArray<f32>, img_h: i32, img_w: i32, stride_h: i32, stride_w: i32, num_threads: i32) -> Result<Recomposed> {
    let (n_patches, c, patch_h, patch_w) = check_patches(preds)?;
    let layout = TileLayout::new(img_h, img_w, patch_h, patch_w, stride_h, stride_w)?;
    let per_image = layout.per_image();

    log::info!("patches on h: {}, on w: {}, per image: {}", layout.rows(), layout.cols(), per_image);
    if n_patches % per_image != 0 {
        return Err(FovPatchError::Configuration(format!(
            "{} patches are not a multiple of the {} patches per {}x{} image",
            n_patches, per_image, img_h, img_w)));
    }
    let n_images = n_patches / per_image;
    let slab = check_output(n_images, c, img_h, img_w)?;
    log::info!("recomposing {} full images of {}x{}", n_images, img_h, img_w);

    ndarray!(new: prob -> 0.0_f32; [n_images, c, img_h, img_w]);
    ndarray!(new: sum -> 0_u32; [n_images, c, img_h, img_w]);

    let fold_image = |i: i32, prob: &mut [f32], sum: &mut [u32]| {
        let first = i * per_image;
        for (j, origin) in layout.origins(1).enumerate() {
            accumulate_patch(prob, sum, preds, first + j as i32, &origin, img_h, img_w);
        }
    };

    if num_threads <= 1 || n_images <= 1 {
        for (i, (p, s)) in prob.as_mut_slice().chunks_mut(slab).zip(sum.as_mut_slice().chunks_mut(slab)).enumerate() {
            fold_image(i as i32, p, s);
        }
    } else {
        let mut work: Vec<Vec<(i32, &mut [f32], &mut [u32])>> = (0..num_threads).map(|_| Vec::new()).collect();
        for (i, (p, s)) in prob.as_mut_slice().chunks_mut(slab).zip(sum.as_mut_slice().chunks_mut(slab)).enumerate() {
            let i = i as i32;
            work[(i % num_threads) as usize].push((i, p, s));
        }

        let fold_image = &fold_image;
        std::thread::scope(|scope| {
            for images in work {
                scope.spawn(move || {
                    for (i, p, s) in images {
                        fold_image(i, p, s);
                    }
                });
            }
        });
    }

    finalize(prob, sum)
}

/// Averages patches placed at explicit origins. Order carries no meaning here.
pub fn recompose_keyed(preds: &NdArray<f32>, origins: &[PatchOrigin], n_images: i32, img_h: i32, img_w: i32) -> Result<Recomposed> {
    let (n_patches, c, patch_h, patch_w) = check_patches(preds)?;
    if origins.len() != n_patches as usize {
        return Err(FovPatchError::ShapeMismatch(format!(
            "{} patches but {} origins", n_patches, origins.len())));
    }
    check_output(n_images, c, img_h, img_w)?;

    ndarray!(new: prob -> 0.0_f32; [n_images, c, img_h, img_w]);
    ndarray!(new: sum -> 0_u32; [n_images, c, img_h, img_w]);

    for (k, origin) in origins.iter().enumerate() {
        if origin.image < 0 || origin.image >= n_images
            || origin.y < 0 || origin.y + patch_h > img_h
            || origin.x < 0 || origin.x + patch_w > img_w {
            return Err(FovPatchError::Configuration(format!(
                "patch {} at {:?} falls outside {} images of {}x{}", k, origin, n_images, img_h, img_w)));
        }

        let i = origin.image;
        accumulate_patch(prob.image_mut(i), sum.image_mut(i), preds, k as i32, origin, img_h, img_w);
    }

    finalize(prob, sum)
}

/// Inverse of `extract_ordered`: `n_h x n_w` non-overlapping tiles per image.
pub fn recompone(preds: &NdArray<f32>, n_h: i32, n_w: i32) -> Result<NdArray<f32>> {
    let (_, _, patch_h, patch_w) = check_patches(preds)?;
    let recomposed = recompone_overlap(preds, n_h * patch_h, n_w * patch_w, patch_h, patch_w, 1)?;
    Ok(recomposed.average)
}
