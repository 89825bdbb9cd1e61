use std::fs;
use std::path::Path;

use fovpatch::*;

fn write_gray<F: Fn(u32, u32) -> u8>(path: &Path, width: u32, height: u32, f: F) {
    image::GrayImage::from_fn(width, height, |x, y| image::Luma([f(x, y)]))
        .save(path)
        .unwrap();
}

fn write_rgb<F: Fn(u32, u32) -> u8>(path: &Path, width: u32, height: u32, f: F) {
    image::RgbImage::from_fn(width, height, |x, y| {
        let v = f(x, y);
        image::Rgb([v, v / 2, 0])
    })
    .save(path)
    .unwrap();
}

// circular FOV of radius 16 around (20, 20); vessels on every 5th column
fn write_fixture(dir: &Path, n: usize) -> std::path::PathBuf {
    let (width, height) = (40, 40);
    let in_fov = |x: u32, y: u32| {
        let (dx, dy) = (x as i32 - 20, y as i32 - 20);
        dx * dx + dy * dy <= 16 * 16
    };

    let mut manifest = String::new();
    for i in 0..n {
        let img = dir.join(format!("img{}.png", i));
        let gt = dir.join(format!("gt{}.png", i));
        let fov = dir.join(format!("fov{}.png", i));

        write_rgb(&img, width, height, |x, _| if x % 5 == 0 { 250 } else { 10 });
        write_gray(&gt, width, height, |x, _| if x % 5 == 0 { 255 } else { 0 });
        write_gray(&fov, width, height, |x, y| if in_fov(x, y) { 255 } else { 0 });

        manifest.push_str(&format!("{} {} {}\n", img.display(), gt.display(), fov.display()));
    }

    let path = dir.join("test.txt");
    fs::write(&path, manifest).unwrap();
    path
}

// scores every pixel by the red channel
struct RedChannel;

impl Model for RedChannel {
    fn predict(&mut self, batch: &NdArray<f32>) -> Result<NdArray<f32>> {
        let (b, _, h, w) = batch.dims4()?;
        let mut out = NdArray::new(0.0_f32, vec![b, h * w, 2]);
        for i in 0..b {
            for y in 0..h {
                for x in 0..w {
                    let p = batch[[i, 0, y, x]] / 255.0;
                    out[[i, y * w + x, 0]] = 1.0 - p;
                    out[[i, y * w + x, 1]] = p;
                }
            }
        }
        Ok(out)
    }
}

#[test]
fn manifest_to_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_fixture(dir.path(), 2);

    let config = Config::from_json_str(r#"{
        "train": { "patch": { "patch_height": 12, "patch_width": 12 },
                   "sampling": { "n_patches": 20, "mode": "all", "seed": 3 },
                   "border_crop": 2 },
        "test": { "patch": { "patch_height": 12, "patch_width": 12 },
                  "stride": { "stride_height": 5, "stride_width": 5 },
                  "batch_size": 16 }
    }"#).unwrap();

    let dataset = load_manifest(&manifest, &ImageFileLoader).unwrap();
    assert_eq!(dataset.imgs.shape, vec![2, 3, 40, 40]);
    assert_eq!(dataset.fovs.shape, vec![2, 1, 40, 40]);

    let mut rng = sampling_rng(&config.train.sampling);
    let train = get_data_train(&dataset, &Identity, &config.train, &mut rng).unwrap();
    assert_eq!(train.images.patches.shape, vec![20, 3, 12, 12]);
    assert_eq!(train.masks.shape, vec![20, 1, 12, 12]);
    for (k, origin) in train.images.origins.iter().enumerate() {
        assert_eq!(origin.image, (k / 10) as i32);
    }

    let test = get_data_test_overlap(&dataset, &Identity, &config.test).unwrap();
    // (40 - 12) % 5 = 3, so two pixels of padding per axis
    assert_eq!((test.padded_height, test.padded_width), (42, 42));
    assert_eq!(test.patches.len(), 2 * 7 * 7);

    let outcome = evaluate_overlap(&mut RedChannel, &test, &config.test).unwrap();
    assert_eq!(outcome.pred_imgs.shape, vec![2, 1, 40, 40]);
    assert_eq!(outcome.pred_imgs[[0_usize, 0, 0, 0]], 0.0);

    let summary = outcome.save(dir.path()).unwrap();
    assert_eq!(summary.auc_roc, Some(1.0));
    assert_eq!(summary.accuracy, 1.0);
    assert!(dir.path().join("results.json").exists());
    let saved = load_predictions(dir.path().join("predictions.json")).unwrap();
    assert_eq!(saved.shape, outcome.pred_imgs.shape);
    for (a, b) in saved.as_slice().iter().zip(outcome.pred_imgs.as_slice()) {
        approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn non_overlapping_tiles_recompose_to_padded_images() {
    let imgs = NdArray::new(1.0_f32, vec![2, 1, 50, 50]);

    let padded = paint_border_overlap(&imgs, 20, 20, 20, 20).unwrap();
    assert_eq!(padded.shape, vec![2, 1, 60, 60]);

    let patches = extract_ordered_overlap(&padded, 20, 20, 20, 20).unwrap();
    assert_eq!(patches.len(), 18);

    let copies = recompone_overlap(&patches.patches, 60, 60, 20, 20, 2).unwrap();
    assert_eq!(copies.average, padded);

    let preds = NdArray::new(1.0_f32, vec![18, 1, 20, 20]);
    let recomposed = recompone_overlap(&preds, 60, 60, 20, 20, 2).unwrap();
    assert_eq!(recomposed.average.shape, vec![2, 1, 60, 60]);
    assert!(recomposed.average.as_slice().iter().all(|&v| v == 1.0));
    assert!(recomposed.coverage.as_slice().iter().all(|&n| n == 1));
}

#[test]
fn unreachable_fov_stops_sampling() {
    let imgs = NdArray::new(0.5_f32, vec![1, 1, 10, 10]);
    let masks = NdArray::new(0.0_f32, vec![1, 1, 10, 10]);
    let mut fovs = NdArray::new(0.0_f32, vec![1, 1, 10, 10]);
    fovs[[0_usize, 0, 5, 5]] = 1.0;

    let sampling = SamplingConfig { n_patches: 2, max_attempts: Some(50), ..SamplingConfig::default() };
    let mut rng = sampling_rng(&sampling);
    match extract_random(&imgs, &masks, &fovs, 4, 4, &sampling, &mut rng) {
        Err(FovPatchError::RejectionLimit { image, attempts }) => {
            assert_eq!(image, 0);
            assert_eq!(attempts, 50);
        }
        other => panic!("unexpected {:?}", other),
    }

    // the center test can still succeed on the single FOV pixel
    let relaxed = SamplingConfig { max_attempts: Some(5000), on_limit: LimitPolicy::FallbackCenter, ..sampling };
    let patches = extract_random(&imgs, &masks, &fovs, 4, 4, &relaxed, &mut rng).unwrap();
    assert!(patches.images.origins.iter().all(|o| o.y == 3 && o.x == 3));
}
