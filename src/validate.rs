use crate::error::{FovPatchError, RangeReport, Result};
use crate::utils::*;

/// Image batch [N,C,H,W] and mask batch [N,1,H,W] describe the same pixels.
pub fn data_consistency_check(imgs: &NdArray<f32>, masks: &NdArray<f32>) -> Result<()> {
    let (n, c, h, w) = imgs.dims4()?;
    let (mn, mc, mh, mw) = masks.dims4()?;

    if n != mn || h != mh || w != mw {
        return Err(FovPatchError::ShapeMismatch(format!(
            "images {:?} and masks {:?} disagree", imgs.shape, masks.shape)));
    }
    if mc != 1 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "masks must have exactly one channel, got {}", mc)));
    }
    if c != 1 && c != 3 {
        return Err(FovPatchError::ShapeMismatch(format!(
            "images must have 1 or 3 channels, got {}", c)));
    }

    Ok(())
}

pub fn range_report(name: &str, data: &NdArray<f32>, expected_min: f32, expected_max: f32) -> Result<RangeReport> {
    match (data.min(), data.max()) {
        (Some(min), Some(max)) => Ok(RangeReport {
            name: name.to_string(),
            min: min,
            max: max,
            expected_min: expected_min,
            expected_max: expected_max,
        }),
        _ => Err(FovPatchError::ShapeMismatch(format!("{} is empty", name))),
    }
}

/// Both extremes must be present: the minimum equals `expected_min` and the
/// maximum equals `expected_max`.
pub fn check_range(name: &str, data: &NdArray<f32>, expected_min: f32, expected_max: f32) -> Result<RangeReport> {
    let report = range_report(name, data, expected_min, expected_max)?;
    if !report.is_valid() {
        return Err(FovPatchError::ValueRange(report));
    }

    log::debug!("{} within [{}, {}]", name, expected_min, expected_max);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_batches_pass() {
        let imgs = NdArray::zeros(vec![2, 3, 8, 9]);
        let masks = NdArray::zeros(vec![2, 1, 8, 9]);
        assert!(data_consistency_check(&imgs, &masks).is_ok());
    }

    #[test]
    fn mismatches_are_reported() {
        let masks = NdArray::zeros(vec![2, 1, 8, 9]);
        let cases = vec![
            NdArray::zeros(vec![3, 1, 8, 9]),
            NdArray::zeros(vec![2, 1, 8, 8]),
            NdArray::zeros(vec![2, 2, 8, 9]),
        ];
        for imgs in cases {
            assert!(matches!(data_consistency_check(&imgs, &masks), Err(FovPatchError::ShapeMismatch(_))));
        }

        let imgs = NdArray::zeros(vec![2, 1, 8, 9]);
        let masks = NdArray::zeros(vec![2, 3, 8, 9]);
        assert!(data_consistency_check(&imgs, &masks).is_err());
    }

    #[test]
    fn range_needs_both_extremes() {
        let mut data = NdArray::zeros(vec![1, 1, 2, 2]);
        data[[0_usize, 0, 1, 1]] = 255.0;
        let report = check_range("ground truth", &data, 0.0, 255.0).unwrap();
        assert_eq!(report.max, 255.0);

        let blank = NdArray::zeros(vec![1, 1, 2, 2]);
        match check_range("ground truth", &blank, 0.0, 255.0) {
            Err(FovPatchError::ValueRange(report)) => {
                assert_eq!(report.min, 0.0);
                assert_eq!(report.max, 0.0);
                assert!(!report.is_valid());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
