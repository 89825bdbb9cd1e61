//! Run configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so a JSON file only needs
//! to name the values it changes. Defaults follow the retinal vessel setup the
//! crate was written for (96x96 patches, stride 8, seed 2020).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FovPatchError, Result};
use crate::fov::FovMode;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub patch_height: i32,
    pub patch_width: i32,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_height: 96,
            patch_width: 96,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrideConfig {
    pub stride_height: i32,
    pub stride_width: i32,
}

impl Default for StrideConfig {
    fn default() -> Self {
        Self {
            stride_height: 8,
            stride_width: 8,
        }
    }
}

/// What random sampling does once a patch slot exhausts `max_attempts`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    Error,
    FallbackCenter,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub n_patches: i32,
    pub inside_fov: bool,
    pub mode: FovMode,
    /// `None` retries forever.
    pub max_attempts: Option<u64>,
    pub on_limit: LimitPolicy,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_patches: 1000,
            inside_fov: true,
            mode: FovMode::All,
            max_attempts: Some(100_000),
            on_limit: LimitPolicy::Error,
            seed: 2020,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub patch: PatchConfig,
    pub sampling: SamplingConfig,
    /// Pixels removed from every side of the training images before sampling.
    pub border_crop: i32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            patch: PatchConfig::default(),
            sampling: SamplingConfig::default(),
            border_crop: 9,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub patch: PatchConfig,
    pub stride: StrideConfig,
    pub batch_size: usize,
    pub threshold: f32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            patch: PatchConfig::default(),
            stride: StrideConfig::default(),
            batch_size: 32,
            threshold: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub train: TrainConfig,
    pub test: TestConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        validate_patch(&self.train.patch)?;
        if self.train.sampling.n_patches <= 0 {
            return Err(FovPatchError::Configuration("n_patches must be positive".into()));
        }
        if self.train.border_crop < 0 {
            return Err(FovPatchError::Configuration("border_crop must not be negative".into()));
        }
        if self.train.sampling.max_attempts == Some(0) {
            return Err(FovPatchError::Configuration("max_attempts must be at least 1".into()));
        }

        validate_overlap(&self.test.patch, &self.test.stride)?;
        if self.test.batch_size == 0 {
            return Err(FovPatchError::Configuration("batch_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.test.threshold) {
            return Err(FovPatchError::Configuration(format!(
                "threshold {} is outside [0, 1]", self.test.threshold)));
        }

        Ok(())
    }
}

pub fn validate_patch(patch: &PatchConfig) -> Result<()> {
    if patch.patch_height <= 0 || patch.patch_width <= 0 {
        return Err(FovPatchError::Configuration(format!(
            "patch size {}x{} must be positive", patch.patch_height, patch.patch_width)));
    }
    Ok(())
}

/// Overlapping tiling needs `0 < stride < patch` on both axes.
pub fn validate_overlap(patch: &PatchConfig, stride: &StrideConfig) -> Result<()> {
    validate_patch(patch)?;
    if stride.stride_height <= 0 || stride.stride_width <= 0 {
        return Err(FovPatchError::Configuration(format!(
            "stride {}x{} must be positive", stride.stride_height, stride.stride_width)));
    }
    if stride.stride_height >= patch.patch_height || stride.stride_width >= patch.patch_width {
        return Err(FovPatchError::Configuration(format!(
            "stride {}x{} must be smaller than patch {}x{}",
            stride.stride_height, stride.stride_width, patch.patch_height, patch.patch_width)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.test.stride.stride_height, 8);
        assert_eq!(config.train.sampling.mode, FovMode::All);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let json = r#"{
            "train": { "sampling": { "mode": "center", "on_limit": "fallback_center", "seed": 7 } },
            "test": { "stride": { "stride_height": 16 } }
        }"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.train.sampling.mode, FovMode::Center);
        assert_eq!(config.train.sampling.on_limit, LimitPolicy::FallbackCenter);
        assert_eq!(config.train.sampling.seed, 7);
        assert_eq!(config.train.sampling.n_patches, 1000);
        assert_eq!(config.test.stride.stride_height, 16);
        assert_eq!(config.test.stride.stride_width, 8);
    }

    #[test]
    fn stride_not_smaller_than_patch_is_rejected() {
        let json = r#"{ "test": { "patch": { "patch_height": 48, "patch_width": 48 },
                                  "stride": { "stride_height": 48, "stride_width": 8 } } }"#;
        let err = Config::from_json_str(json).unwrap_err();
        assert!(matches!(err, FovPatchError::Configuration(_)));
    }

    #[test]
    fn unknown_mode_string_fails_to_parse() {
        let json = r#"{ "train": { "sampling": { "mode": "corner" } } }"#;
        let err = Config::from_json_str(json).unwrap_err();
        // serde wraps the UnknownMode raised by FovMode::try_from
        assert!(matches!(err, FovPatchError::Json(_)));
        assert!(err.to_string().contains(&FovPatchError::UnknownMode("corner".into()).to_string()));
    }
}
