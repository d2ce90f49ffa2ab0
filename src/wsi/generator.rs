use crate::utils::random::rng_from;
use crate::wsi::annotation::AnnotationSet;
use crate::wsi::slide::{read_random_patch, read_random_tissue_patch, RasterSlide};
use crate::wsi::{Patch, PatchConfig, PatchError, SamplingMode, SlidePair};
use rand_chacha::ChaCha8Rng;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// A slide opened for sampling, with its annotations when the mode needs them
pub struct LoadedSlide {
    pub name: String,
    pub slide: RasterSlide,
    pub annotations: Option<AnnotationSet>,
}

struct Cursor {
    index: usize,
    rng: ChaCha8Rng,
}

/// Generator of random WSI patches, one per slide per pass
///
/// The cursor and RNG sit behind a mutex so one generator can be shared by
/// several consumers; each call to [`next_patch`](Self::next_patch) hands out
/// the next slide's patch.
pub struct PatchGenerator {
    slides: Vec<SlidePair>,
    config: PatchConfig,
    state: Mutex<Cursor>,
}

impl PatchGenerator {
    /// Create a generator; `seed` makes sampling reproducible
    pub fn new(slides: Vec<SlidePair>, config: PatchConfig, seed: Option<u64>) -> Self {
        Self {
            slides,
            config,
            state: Mutex::new(Cursor {
                index: 0,
                rng: rng_from(seed),
            }),
        }
    }

    pub fn slides(&self) -> &[SlidePair] {
        &self.slides
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Number of slides
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rewind to the first slide
    pub fn reset(&self) {
        self.lock().index = 0;
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.lock().index
    }

    /// Open a slide and, in annotated mode, its annotations
    pub fn open(&self, pair: &SlidePair) -> Result<LoadedSlide, PatchError> {
        let annotations = match self.config.mode {
            SamplingMode::Tissue => None,
            SamplingMode::Annotated { .. } => {
                let path = pair.annotation.as_ref().ok_or(PatchError::NoAnnotations)?;
                let set = AnnotationSet::from_file(path)?;
                // Some slides have no tumour regions at all
                if set.labels().is_empty() {
                    return Err(PatchError::NoAnnotations);
                }
                Some(set)
            }
        };

        Ok(LoadedSlide {
            name: pair.slide_name(),
            slide: RasterSlide::open(&pair.slide)?,
            annotations,
        })
    }

    /// Draw one random patch from an opened slide
    pub fn draw(&self, loaded: &LoadedSlide) -> Result<Patch, PatchError> {
        let mut state = self.lock();
        self.draw_with(loaded, &mut state.rng)
    }

    fn draw_with(&self, loaded: &LoadedSlide, rng: &mut ChaCha8Rng) -> Result<Patch, PatchError> {
        let PatchConfig { level, size, mode, return_annotation } = self.config;

        let (image, label) = match (mode, loaded.annotations.as_ref()) {
            (SamplingMode::Tissue, _) => {
                let image = read_random_tissue_patch(&loaded.slide, level, size, rng)?
                    .ok_or(PatchError::NoTissue)?;
                (image, None)
            }
            (SamplingMode::Annotated { target_class, min_class_area_ratio }, Some(annotations)) => {
                let (image, label) = read_random_patch(
                    &loaded.slide,
                    annotations,
                    level,
                    size,
                    target_class,
                    min_class_area_ratio,
                    rng,
                )?;
                (image, Some(label))
            }
            (SamplingMode::Annotated { .. }, None) => return Err(PatchError::NoAnnotations),
        };

        Ok(Patch {
            image,
            label: if return_annotation { label } else { None },
            slide_name: loaded.name.clone(),
        })
    }

    /// Open a slide and draw one patch from it
    pub fn sample(&self, pair: &SlidePair) -> Result<Patch, PatchError> {
        let loaded = self.open(pair)?;
        self.draw(&loaded)
    }

    /// Patch from the next slide that yields one
    ///
    /// Failing slides are logged and skipped. Once every slide has been
    /// visited the cursor rewinds and `None` ends the pass.
    pub fn next_patch(&self) -> Option<Patch> {
        let mut state = self.lock();
        let n = self.slides.len();

        while state.index < n {
            let i = state.index;
            state.index += 1;

            let result = self
                .open(&self.slides[i])
                .and_then(|loaded| self.draw_with(&loaded, &mut state.rng));

            match result {
                Ok(patch) => {
                    debug!("Patch from slide {}/{}", i + 1, n);
                    return Some(patch);
                }
                Err(PatchError::NoTissue) => {
                    warn!("Skipped slide {}/{}: no valid tissue area.", i + 1, n);
                }
                Err(e) => {
                    warn!("Skipped slide {}/{} due to error: {}", i + 1, n, e);
                }
            }
        }

        state.index = 0;
        None
    }
}

impl Iterator for PatchGenerator {
    type Item = Patch;

    fn next(&mut self) -> Option<Patch> {
        self.next_patch()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// Writes a 400x400 PNG, purple (tissue) or white (glass)
    pub(crate) fn write_slide(dir: &Path, name: &str, tissue: bool) -> SlidePair {
        let color = if tissue { Rgb([160, 70, 180]) } else { Rgb([255, 255, 255]) };
        let path = dir.join(name);
        RgbImage::from_pixel(400, 400, color).save(&path).unwrap();
        SlidePair::unannotated(path)
    }

    fn tissue_config() -> PatchConfig {
        PatchConfig {
            level: 0,
            size: (64, 64),
            mode: SamplingMode::Tissue,
            return_annotation: false,
        }
    }

    #[test]
    fn test_skips_failing_slides_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let slides = vec![
            SlidePair::unannotated(dir.path().join("missing.png")),
            write_slide(dir.path(), "blank.png", false),
            write_slide(dir.path(), "tissue.png", true),
        ];

        let gen = PatchGenerator::new(slides, tissue_config(), Some(5));

        let patch = gen.next_patch().unwrap();
        assert_eq!(patch.slide_name, "tissue.png");
        assert_eq!(patch.image.dimensions(), (64, 64));
        assert_eq!(patch.label, None);
        assert_eq!(gen.position(), 3);

        // Pass exhausted: cursor rewinds
        assert!(gen.next_patch().is_none());
        assert_eq!(gen.position(), 0);

        // Next pass starts over
        assert_eq!(gen.next_patch().unwrap().slide_name, "tissue.png");
    }

    #[test]
    fn test_iterator_yields_one_patch_per_good_slide() {
        let dir = tempfile::tempdir().unwrap();
        let slides = vec![
            write_slide(dir.path(), "a.png", true),
            write_slide(dir.path(), "b.png", true),
        ];

        let gen = PatchGenerator::new(slides, tissue_config(), Some(1));
        let names: Vec<String> = gen.map(|p| p.slide_name).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_annotated_mode_without_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let pair = write_slide(dir.path(), "a.png", true);
        let gen = PatchGenerator::new(vec![pair.clone()], PatchConfig::default(), Some(1));

        assert!(matches!(gen.sample(&pair), Err(PatchError::NoAnnotations)));
        assert!(gen.next_patch().is_none());
    }

    #[test]
    fn test_annotated_mode_returns_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut pair = write_slide(dir.path(), "a.png", true);
        let xml = dir.path().join("a.xml");
        std::fs::write(
            &xml,
            r#"<ASAP_Annotations><Annotations>
            <Annotation Name="t" Type="Polygon" PartOfGroup="tumor"><Coordinates>
              <Coordinate Order="0" X="0" Y="0" /><Coordinate Order="1" X="400" Y="0" />
              <Coordinate Order="2" X="400" Y="400" /><Coordinate Order="3" X="0" Y="400" />
            </Coordinates></Annotation></Annotations></ASAP_Annotations>"#,
        )
        .unwrap();
        pair.annotation = Some(xml);

        let config = PatchConfig {
            size: (32, 32),
            return_annotation: true,
            ..PatchConfig::default()
        };
        let gen = PatchGenerator::new(vec![pair.clone()], config, Some(9));
        let patch = gen.sample(&pair).unwrap();
        assert_eq!(patch.label, Some(1));
    }
}
