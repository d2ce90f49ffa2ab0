use crate::wsi::annotation::AnnotationSet;
use crate::wsi::PatchError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Draws per random patch request before giving up
pub const MAX_ATTEMPTS: usize = 100;

/// Minimum fraction of tissue pixels for a tissue patch
pub const MIN_TISSUE_RATIO: f64 = 0.5;

/// Grid resolution used to estimate the class area of a patch
const AREA_GRID: u32 = 8;

/// Pixels brighter than this on every channel count as glass
const BACKGROUND_INTENSITY: u8 = 220;
/// Unless their channels spread further apart than this
const MIN_SATURATION: u8 = 20;

/// Fill for regions outside the slide
const OUTSIDE: Rgb<u8> = Rgb([255, 255, 255]);

/// Multi-resolution slide access
pub trait Slide {
    /// Number of pyramid levels
    fn level_count(&self) -> usize;

    /// Width and height of a level
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Scale factor of a level relative to level 0
    fn level_downsample(&self, level: usize) -> f64 {
        (1u64 << level) as f64
    }

    /// Read `size` pixels at `level` whose top-left corner is `location` in level-0 coordinates
    fn read_region(&self, location: (u32, u32), level: usize, size: (u32, u32)) -> Result<RgbImage, PatchError>;
}

/// Slide backed by a single raster image, with a 2x downsampled pyramid
pub struct RasterSlide {
    path: PathBuf,
    levels: Vec<RgbImage>,
}

impl RasterSlide {
    /// Smallest level edge kept in the pyramid
    const MIN_LEVEL_EDGE: u32 = 256;
    const MAX_LEVELS: usize = 8;

    /// Decode an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PatchError> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|source| PatchError::Slide {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        debug!("Opened {:?} ({}x{})", path, image.width(), image.height());
        Ok(Self::from_image(path, image))
    }

    /// Wrap an in-memory image
    pub fn from_image<P: Into<PathBuf>>(path: P, base: RgbImage) -> Self {
        let mut levels = vec![base];
        while levels.len() < Self::MAX_LEVELS {
            let last = &levels[levels.len() - 1];
            let (w, h) = (last.width() / 2, last.height() / 2);
            if w.min(h) < Self::MIN_LEVEL_EDGE {
                break;
            }
            let next = imageops::resize(last, w, h, FilterType::Triangle);
            levels.push(next);
        }
        Self {
            path: path.into(),
            levels,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Slide for RasterSlide {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|img| img.dimensions())
    }

    fn read_region(&self, location: (u32, u32), level: usize, size: (u32, u32)) -> Result<RgbImage, PatchError> {
        let img = self.levels.get(level).ok_or(PatchError::InvalidLevel {
            level,
            available: self.levels.len(),
        })?;

        let downsample = self.level_downsample(level);
        let x = (location.0 as f64 / downsample) as u32;
        let y = (location.1 as f64 / downsample) as u32;

        let mut out = RgbImage::from_pixel(size.0, size.1, OUTSIDE);
        if x < img.width() && y < img.height() {
            let w = size.0.min(img.width() - x);
            let h = size.1.min(img.height() - y);
            let region = imageops::crop_imm(img, x, y, w, h).to_image();
            imageops::replace(&mut out, &region, 0, 0);
        }
        Ok(out)
    }
}

/// Fraction of pixels that look like stained tissue rather than glass
pub fn tissue_ratio(patch: &RgbImage) -> f64 {
    let total = patch.width() as usize * patch.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let tissue = patch
        .pixels()
        .filter(|Rgb([r, g, b])| {
            let max = (*r).max(*g).max(*b);
            let min = (*r).min(*g).min(*b);
            max < BACKGROUND_INTENSITY || max - min > MIN_SATURATION
        })
        .count();
    tissue as f64 / total as f64
}

/// Level-0 extent covered by a patch at `level`
fn level0_extent<S: Slide + ?Sized>(slide: &S, level: usize, size: (u32, u32)) -> (f64, f64) {
    let ds = slide.level_downsample(level);
    (size.0 as f64 * ds, size.1 as f64 * ds)
}

fn check_level<S: Slide + ?Sized>(slide: &S, level: usize) -> Result<(u32, u32), PatchError> {
    let dims0 = slide.level_dimensions(0);
    match (slide.level_dimensions(level), dims0) {
        (Some(_), Some(dims0)) => Ok(dims0),
        _ => Err(PatchError::InvalidLevel {
            level,
            available: slide.level_count(),
        }),
    }
}

/// Random patch with at least [`MIN_TISSUE_RATIO`] tissue
///
/// Returns `Ok(None)` when no location satisfied the threshold within
/// [`MAX_ATTEMPTS`] draws.
pub fn read_random_tissue_patch<S: Slide + ?Sized, R: Rng + ?Sized>(
    slide: &S,
    level: usize,
    size: (u32, u32),
    rng: &mut R,
) -> Result<Option<RgbImage>, PatchError> {
    let (w0, h0) = check_level(slide, level)?;
    let (ew, eh) = level0_extent(slide, level, size);
    let max_x = (w0 as f64 - ew).max(0.0) as u32;
    let max_y = (h0 as f64 - eh).max(0.0) as u32;

    for attempt in 0..MAX_ATTEMPTS {
        let x = rng.gen_range(0..=max_x);
        let y = rng.gen_range(0..=max_y);
        let patch = slide.read_region((x, y), level, size)?;
        if tissue_ratio(&patch) >= MIN_TISSUE_RATIO {
            debug!("Tissue patch at ({}, {}) after {} attempts", x, y, attempt + 1);
            return Ok(Some(patch));
        }
    }
    Ok(None)
}

/// Random patch centred inside a region of `target_class`
///
/// Regions are chosen with probability proportional to their area. The
/// fraction of the patch covered by the class, estimated on a coarse grid,
/// must reach `min_class_area_ratio`. Returns the patch and the class at its
/// centre.
pub fn read_random_patch<S: Slide + ?Sized, R: Rng + ?Sized>(
    slide: &S,
    annotations: &AnnotationSet,
    level: usize,
    size: (u32, u32),
    target_class: u32,
    min_class_area_ratio: f64,
    rng: &mut R,
) -> Result<(RgbImage, u32), PatchError> {
    check_level(slide, level)?;
    let (ew, eh) = level0_extent(slide, level, size);
    let no_region = PatchError::NoTargetRegion {
        class: target_class,
        min_ratio: min_class_area_ratio,
    };

    for _ in 0..MAX_ATTEMPTS {
        let Some(region) = annotations.choose_by_area(target_class, rng) else {
            return Err(no_region);
        };
        let Some((cx, cy)) = region.polygon.random_point(rng, MAX_ATTEMPTS) else {
            continue;
        };

        let x0 = (cx - ew / 2.0).max(0.0);
        let y0 = (cy - eh / 2.0).max(0.0);
        if class_area_ratio(annotations, target_class, (x0, y0), (ew, eh)) < min_class_area_ratio {
            continue;
        }

        let patch = slide.read_region((x0 as u32, y0 as u32), level, size)?;
        return Ok((patch, annotations.class_at(cx, cy)));
    }

    Err(no_region)
}

/// Share of grid points inside `class_id` regions
fn class_area_ratio(annotations: &AnnotationSet, class_id: u32, origin: (f64, f64), extent: (f64, f64)) -> f64 {
    let step_x = extent.0 / AREA_GRID as f64;
    let step_y = extent.1 / AREA_GRID as f64;
    let mut hits = 0;
    for i in 0..AREA_GRID {
        for j in 0..AREA_GRID {
            let x = origin.0 + (i as f64 + 0.5) * step_x;
            let y = origin.1 + (j as f64 + 0.5) * step_y;
            if annotations.class_at(x, y) == class_id {
                hits += 1;
            }
        }
    }
    hits as f64 / (AREA_GRID * AREA_GRID) as f64
}
