use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::config::{validate_overlap, validate_patch, SamplingConfig, TestConfig, TrainConfig};
use crate::dataset::{Dataset, Preprocess};
use crate::error::{FovPatchError, Result};
use crate::extract::{extract_ordered_overlap, extract_random, paint_border_overlap, PatchSet, TrainPatches};
use crate::fov::{kill_border, pred_only_fov};
use crate::metrics::{save_predictions, Evaluation, MetricSummary};
use crate::predictions::{pred_to_imgs, PredMode};
use crate::recompose::recompose_keyed;
use crate::utils::*;
use crate::validate::{check_range, data_consistency_check};

/// The segmentation network: [B, C, patch_h, patch_w] in,
/// per-pixel class probabilities [B, patch_h*patch_w, classes] out.
pub trait Model {
    fn predict(&mut self, batch: &NdArray<f32>) -> Result<NdArray<f32>>;
}

pub fn sampling_rng(sampling: &SamplingConfig) -> XorShiftRng {
    XorShiftRng::seed_from_u64(sampling.seed)
}

/// Normalizes, scales masks to [0,1], binarizes FOVs, crops the border and samples
/// random training patches.
pub fn get_data_train<P: Preprocess, R: Rng>(dataset: &Dataset, preprocess: &P, config: &TrainConfig, rng: &mut R) -> Result<TrainPatches> {
    validate_patch(&config.patch)?;
    let imgs = preprocess.normalize(dataset.imgs.clone())?;
    let masks = dataset.ground_truth.map(|v| v / 255.0);
    let fovs = dataset.fovs.map(|v| (v / 255.0).floor());

    let (_, _, height, width) = imgs.dims4()?;
    let crop = config.border_crop;
    if crop < 0 || 2 * crop >= height || 2 * crop >= width {
        return Err(FovPatchError::Configuration(format!(
            "cannot crop {} pixels from each side of {}x{} images", crop, height, width)));
    }
    let (imgs, masks, fovs) = if crop > 0 {
        let (h, w) = (height - 2 * crop, width - 2 * crop);
        (imgs.crop(crop, crop, h, w), masks.crop(crop, crop, h, w), fovs.crop(crop, crop, h, w))
    } else {
        (imgs, masks, fovs)
    };

    data_consistency_check(&imgs, &masks)?;
    check_range("train masks", &masks, 0.0, 1.0)?;
    check_range("train FOVs", &fovs, 0.0, 1.0)?;
    log::info!("train images/masks shape: {:?} {:?}", imgs.shape, masks.shape);
    log::info!("train images range: {:?} - {:?}", imgs.min(), imgs.max());

    let patches = extract_random(&imgs, &masks, &fovs,
        config.patch.patch_height, config.patch.patch_width, &config.sampling, rng)?;

    log::info!("train patches shape: {:?}", patches.images.patches.shape);
    Ok(patches)
}

/// Everything needed to run and score overlapping test inference.
#[derive(Clone, Debug, PartialEq)]
pub struct TestData {
    pub patches: PatchSet,
    pub masks: NdArray<f32>,
    pub fovs: NdArray<f32>,
    pub height: i32,
    pub width: i32,
    pub padded_height: i32,
    pub padded_width: i32,
}

pub fn get_data_test_overlap<P: Preprocess>(dataset: &Dataset, preprocess: &P, config: &TestConfig) -> Result<TestData> {
    validate_overlap(&config.patch, &config.stride)?;
    let (patch_h, patch_w) = (config.patch.patch_height, config.patch.patch_width);
    let (stride_h, stride_w) = (config.stride.stride_height, config.stride.stride_width);

    let imgs = preprocess.normalize(dataset.imgs.clone())?;
    let masks = dataset.ground_truth.map(|v| v / 255.0);
    data_consistency_check(&imgs, &masks)?;
    check_range("test masks", &masks, 0.0, 1.0)?;

    let (_, _, height, width) = imgs.dims4()?;
    let padded = paint_border_overlap(&imgs, patch_h, patch_w, stride_h, stride_w)?;
    let (_, _, padded_height, padded_width) = padded.dims4()?;
    log::info!("test images range: {:?} - {:?}", padded.min(), padded.max());

    let patches = extract_ordered_overlap(&padded, patch_h, patch_w, stride_h, stride_w)?;
    log::info!("test patches shape: {:?}", patches.patches.shape);

    Ok(TestData {
        patches: patches,
        masks: masks,
        fovs: dataset.fovs.clone(),
        height: height,
        width: width,
        padded_height: padded_height,
        padded_width: padded_width,
    })
}

/// Feeds patches to `model` in order, `batch_size` at a time, and stacks the outputs.
pub fn run_inference<M: Model>(model: &mut M, patches: &NdArray<f32>, batch_size: usize) -> Result<NdArray<f32>> {
    let (n, c, patch_h, patch_w) = patches.dims4()?;
    if batch_size == 0 {
        return Err(FovPatchError::Configuration("batch_size must be positive".into()));
    }

    let slab = element_count(&[c, patch_h, patch_w])?;
    let mut out = Vec::new();
    let mut out_shape = None;

    for begin in (0..n as usize).step_by(batch_size) {
        let end = (begin + batch_size).min(n as usize);
        let batch = NdArray::from_vec(
            patches.as_slice()[begin * slab..end * slab].to_vec(),
            vec![(end - begin) as i32, c, patch_h, patch_w])?;

        let pred = model.predict(&batch)?;
        if pred.ndim() != 3 || pred.shape[0] != (end - begin) as i32 {
            return Err(FovPatchError::ShapeMismatch(format!(
                "model returned {:?} for a batch of {}", pred.shape, end - begin)));
        }
        if let Some((pixels, classes)) = out_shape {
            if (pred.shape[1], pred.shape[2]) != (pixels, classes) {
                return Err(FovPatchError::ShapeMismatch(format!(
                    "model output {:?} changed between batches", pred.shape)));
            }
        }
        out_shape = Some((pred.shape[1], pred.shape[2]));
        out.extend_from_slice(pred.as_slice());
        log::trace!("predicted patches {}..{}", begin, end);
    }

    let (pixels, classes) = out_shape.ok_or_else(|| FovPatchError::Configuration("no patches to predict".into()))?;
    NdArray::from_vec(out, vec![n, pixels, classes])
}

/// Full-size predictions and the FOV-restricted scores they produced.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    pub pred_imgs: NdArray<f32>,
    pub evaluation: Evaluation,
}

impl TestOutcome {
    /// Writes the full-size predictions and the scored pixels side by side.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<MetricSummary> {
        save_predictions(dir.as_ref().join("predictions.json"), &self.pred_imgs)?;
        self.evaluation.save_results(dir.as_ref().join("results.json"))
    }
}

/// Predicts every test patch, averages the overlaps back into full images, blanks
/// everything outside the FOV, crops the padding away and scores inside the FOV.
pub fn evaluate_overlap<M: Model>(model: &mut M, test: &TestData, config: &TestConfig) -> Result<TestOutcome> {
    let (patch_h, patch_w) = (config.patch.patch_height, config.patch.patch_width);
    let n_images = test.masks.shape[0];

    let preds = run_inference(model, &test.patches.patches, config.batch_size)?;
    let pred_patches = pred_to_imgs(&preds, patch_h, patch_w, PredMode::Prob)?;
    let recomposed = recompose_keyed(&pred_patches, &test.patches.origins,
        n_images, test.padded_height, test.padded_width)?;

    let mut pred_imgs = recomposed.average;
    kill_border(&mut pred_imgs, &test.fovs)?;
    let pred_imgs = pred_imgs.crop(0, 0, test.height, test.width);

    let (y_scores, y_true) = pred_only_fov(&pred_imgs, &test.masks, &test.fovs)?;
    let mut evaluation = Evaluation::new(config.threshold);
    evaluation.add_batch(&y_true, &y_scores)?;

    Ok(TestOutcome {
        pred_imgs: pred_imgs,
        evaluation: evaluation,
    })
}
