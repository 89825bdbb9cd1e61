//! Patch extraction, recomposition and field-of-view filtering for retinal fundus
//! segmentation.

#[macro_use]
mod utils;
pub mod error;
pub mod config;
pub mod fov;
pub mod tiling;
pub mod validate;
pub mod extract;
pub mod recompose;
pub mod predictions;
pub mod metrics;
pub mod dataset;
pub mod pipeline;

pub use utils::NdArray;
pub use error::{FovPatchError, RangeReport, Result};
pub use config::{Config, LimitPolicy, PatchConfig, SamplingConfig, StrideConfig, TestConfig, TrainConfig};
pub use fov::{inside_fov, is_patch_inside_fov, kill_border, pred_only_fov, FovMode};
pub use tiling::{border_padding, PatchOrigin, TileLayout};
pub use validate::{check_range, data_consistency_check};
pub use extract::{extract_ordered, extract_ordered_overlap, extract_random, paint_border, paint_border_overlap, PatchSet, TrainPatches};
pub use recompose::{recompone, recompone_overlap, recompose_keyed, Recomposed};
pub use predictions::{binarize, pred_to_imgs, PredMode};
pub use metrics::{load_predictions, save_predictions, Evaluation, MetricSummary};
pub use dataset::{load_data, load_file_path_txt, load_manifest, Dataset, Identity, ImageFileLoader, ImageLoader, Preprocess, RawImage, SampleTriple};
pub use pipeline::{evaluate_overlap, get_data_test_overlap, get_data_train, run_inference, sampling_rng, Model, TestData, TestOutcome};
