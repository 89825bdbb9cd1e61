//! Path manifests and stacking of (image, ground truth, FOV) triples into batches.

use std::fs;
use std::path::{Path, PathBuf};

use image::GenericImageView;

use crate::error::{FovPatchError, Result};
use crate::utils::*;
use crate::validate::check_range;

/// One manifest line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleTriple {
    pub image: PathBuf,
    pub ground_truth: PathBuf,
    pub fov: PathBuf,
}

/// Reads `image ground_truth fov` lines; reading stops at the first blank line.
pub fn load_file_path_txt<P: AsRef<Path>>(path: P) -> Result<Vec<SampleTriple>> {
    parse_manifest(&fs::read_to_string(path)?)
}

pub fn parse_manifest(text: &str) -> Result<Vec<SampleTriple>> {
    let mut samples = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(FovPatchError::Manifest {
                line: index + 1,
                reason: format!("expected 3 paths, found {}", fields.len()),
            });
        }

        samples.push(SampleTriple {
            image: PathBuf::from(fields[0]),
            ground_truth: PathBuf::from(fields[1]),
            fov: PathBuf::from(fields[2]),
        });
    }

    Ok(samples)
}

/// Decoded pixels in row-major [H, W, C] order, raw values (0..=255 for 8 bit).
#[derive(Clone, Debug, PartialEq)]
pub struct RawImage {
    pub height: i32,
    pub width: i32,
    pub channels: i32,
    pub data: Vec<f32>,
}

impl RawImage {
    pub fn first_channel(&self) -> RawImage {
        if self.channels == 1 {
            return self.clone();
        }

        RawImage {
            height: self.height,
            width: self.width,
            channels: 1,
            data: self.data.iter().step_by(self.channels as usize).cloned().collect(),
        }
    }
}

pub trait ImageLoader {
    fn load(&self, path: &Path) -> Result<RawImage>;
}

/// Decodes files with the `image` crate; grayscale stays single channel,
/// everything else becomes RGB.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageFileLoader;

impl ImageLoader for ImageFileLoader {
    fn load(&self, path: &Path) -> Result<RawImage> {
        let img = image::open(path)?;
        let (width, height) = img.dimensions();
        let (width, height) = (width as i32, height as i32);

        let (channels, data) = match img.color().channel_count() {
            1 | 2 => (1, img.into_luma8().into_raw()),
            _ => (3, img.into_rgb8().into_raw()),
        };
        log::trace!("decoded {:?}: {}x{}x{}", path, height, width, channels);

        Ok(RawImage {
            height: height,
            width: width,
            channels: channels,
            data: data.into_iter().map(f32::from).collect(),
        })
    }
}

/// Intensity normalization of a whole [N, C, H, W] batch.
pub trait Preprocess {
    fn normalize(&self, batch: NdArray<f32>) -> Result<NdArray<f32>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Preprocess for Identity {
    fn normalize(&self, batch: NdArray<f32>) -> Result<NdArray<f32>> {
        Ok(batch)
    }
}

/// Images [N,C,H,W], ground truth [N,1,H,W] and FOV masks [N,1,H,W], raw values.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub imgs: NdArray<f32>,
    pub ground_truth: NdArray<f32>,
    pub fovs: NdArray<f32>,
}

// appends `raw` transposed to [C, H, W]
fn push_channel_first(out: &mut Vec<f32>, raw: &RawImage) {
    for c in 0..raw.channels {
        for y in 0..raw.height {
            for x in 0..raw.width {
                out.push(raw.data[((y * raw.width + x) * raw.channels + c) as usize]);
            }
        }
    }
}

pub fn load_data<L: ImageLoader>(samples: &[SampleTriple], loader: &L) -> Result<Dataset> {
    if samples.is_empty() {
        return Err(FovPatchError::Configuration("manifest lists no samples".into()));
    }

    let mut imgs = Vec::new();
    let mut gts = Vec::new();
    let mut fovs = Vec::new();
    let mut reference = None;

    for sample in samples {
        let img = loader.load(&sample.image)?;
        // the first image fixes the batch shape
        let (height, width, channels) = *reference.get_or_insert((img.height, img.width, img.channels));
        let gt = loader.load(&sample.ground_truth)?.first_channel();
        let fov = loader.load(&sample.fov)?.first_channel();

        for (path, raw, c) in &[(&sample.image, &img, channels), (&sample.ground_truth, &gt, 1), (&sample.fov, &fov, 1)] {
            if raw.height != height || raw.width != width || raw.channels != *c {
                return Err(FovPatchError::ShapeMismatch(format!(
                    "{:?} is {}x{}x{}, expected {}x{}x{}",
                    path, raw.height, raw.width, raw.channels, height, width, c)));
            }
        }

        push_channel_first(&mut imgs, &img);
        push_channel_first(&mut gts, &gt);
        push_channel_first(&mut fovs, &fov);
    }

    let n = samples.len() as i32;
    let (height, width, channels) = reference.unwrap_or((0, 0, 0));
    let dataset = Dataset {
        imgs: NdArray::from_vec(imgs, vec![n, channels, height, width])?,
        ground_truth: NdArray::from_vec(gts, vec![n, 1, height, width])?,
        fovs: NdArray::from_vec(fovs, vec![n, 1, height, width])?,
    };

    log::info!("imgs range: {:?} - {:?}", dataset.imgs.min(), dataset.imgs.max());
    check_range("ground truth", &dataset.ground_truth, 0.0, 255.0)?;
    check_range("FOV masks", &dataset.fovs, 0.0, 255.0)?;
    log::info!("data shape: {:?} {:?} {:?}", dataset.imgs.shape, dataset.ground_truth.shape, dataset.fovs.shape);

    Ok(dataset)
}

pub fn load_manifest<P: AsRef<Path>, L: ImageLoader>(path: P, loader: &L) -> Result<Dataset> {
    let samples = load_file_path_txt(path)?;
    load_data(&samples, loader)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory loader keyed by path.
    pub struct MapLoader(pub HashMap<PathBuf, RawImage>);

    impl ImageLoader for MapLoader {
        fn load(&self, path: &Path) -> Result<RawImage> {
            self.0.get(path).cloned().ok_or_else(|| FovPatchError::Io(
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("{:?}", path))))
        }
    }

    pub fn raw<F: Fn(i32, i32, i32) -> f32>(height: i32, width: i32, channels: i32, f: F) -> RawImage {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(y, x, c));
                }
            }
        }
        RawImage { height: height, width: width, channels: channels, data: data }
    }

    fn triple(i: usize) -> SampleTriple {
        SampleTriple {
            image: PathBuf::from(format!("img{}.png", i)),
            ground_truth: PathBuf::from(format!("gt{}.png", i)),
            fov: PathBuf::from(format!("fov{}.png", i)),
        }
    }

    fn loader(n: usize, gt_max: f32) -> MapLoader {
        let mut map = HashMap::new();
        for i in 0..n {
            let t = triple(i);
            map.insert(t.image, raw(4, 5, 3, |y, x, c| (100 * c + 10 * y + x) as f32));
            map.insert(t.ground_truth, raw(4, 5, 3, move |y, x, c| if y == x && c == 0 { gt_max } else { 0.0 }));
            map.insert(t.fov, raw(4, 5, 1, |y, _, _| if y > 0 { 255.0 } else { 0.0 }));
        }
        MapLoader(map)
    }

    #[test]
    fn manifest_lines_become_triples() {
        let samples = parse_manifest("a.tif  b.gif\tc.gif\nd.tif e.gif f.gif\n\nignored line\n").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].ground_truth, PathBuf::from("b.gif"));
        assert_eq!(samples[1].fov, PathBuf::from("f.gif"));
    }

    #[test]
    fn manifest_line_with_two_fields_fails() {
        match parse_manifest("a b c\nd e\n") {
            Err(FovPatchError::Manifest { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn triples_are_stacked_channel_first() {
        let samples: Vec<SampleTriple> = (0..2).map(triple).collect();
        let data = load_data(&samples, &loader(2, 255.0)).unwrap();

        assert_eq!(data.imgs.shape, vec![2, 3, 4, 5]);
        assert_eq!(data.ground_truth.shape, vec![2, 1, 4, 5]);
        assert_eq!(data.fovs.shape, vec![2, 1, 4, 5]);
        assert_eq!(data.imgs[[1_usize, 2, 3, 4]], 234.0);
        assert_eq!(data.ground_truth[[0_usize, 0, 2, 2]], 255.0);
        assert_eq!(data.ground_truth[[0_usize, 0, 2, 3]], 0.0);
        assert_eq!(data.fovs[[1_usize, 0, 0, 1]], 0.0);
    }

    struct CountingLoader {
        inner: MapLoader,
        calls: std::cell::Cell<usize>,
    }

    impl ImageLoader for CountingLoader {
        fn load(&self, path: &Path) -> Result<RawImage> {
            self.calls.set(self.calls.get() + 1);
            self.inner.load(path)
        }
    }

    #[test]
    fn every_file_is_decoded_once() {
        let samples: Vec<SampleTriple> = (0..3).map(triple).collect();
        let loader = CountingLoader { inner: loader(3, 255.0), calls: std::cell::Cell::new(0) };
        load_data(&samples, &loader).unwrap();
        assert_eq!(loader.calls.get(), 9);
    }

    #[test]
    fn ground_truth_without_full_range_is_rejected() {
        let samples = vec![triple(0)];
        match load_data(&samples, &loader(1, 128.0)) {
            Err(FovPatchError::ValueRange(report)) => {
                assert_eq!(report.name, "ground truth");
                assert_eq!(report.max, 128.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_manifest_is_a_configuration_error() {
        assert!(matches!(load_data(&[], &loader(0, 255.0)), Err(FovPatchError::Configuration(_))));
    }
}
