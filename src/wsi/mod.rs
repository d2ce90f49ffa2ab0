//! Whole-slide image patch extraction
//!
//! Random patches are drawn either from annotated regions of a target class
//! or from anywhere that contains tissue, and written to disk as PNG so that
//! pixel values survive unchanged.

pub mod annotation;
pub mod generator;
pub mod patcher;
pub mod slide;

pub use annotation::AnnotationSet;
pub use generator::PatchGenerator;
pub use patcher::{OfflinePatcher, PatchRunSummary};
pub use slide::{RasterSlide, Slide};

use anyhow::{Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Slide file extensions picked up by [`discover_slides`]
pub const SLIDE_EXTENSIONS: &[&str] = &["svs", "tif", "tiff", "png", "jpg", "jpeg"];

/// Default patch edge length in pixels
pub const DEFAULT_PATCH_SIZE: u32 = 299;

/// Errors raised while drawing a patch from one slide
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("No tumor annotations found.")]
    NoAnnotations,

    #[error("No valid tissue patch found.")]
    NoTissue,

    #[error("No region of class {class} satisfying the area ratio {min_ratio}")]
    NoTargetRegion { class: u32, min_ratio: f64 },

    #[error("Slide level {level} not available (slide has {available})")]
    InvalidLevel { level: usize, available: usize },

    #[error("Failed to read slide {path:?}: {source}")]
    Slide {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to parse annotations {path:?}: {message}")]
    Annotation { path: PathBuf, message: String },
}

/// A slide file and its optional annotation file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidePair {
    pub slide: PathBuf,
    pub annotation: Option<PathBuf>,
}

impl SlidePair {
    /// Pair without annotations
    pub fn unannotated<P: Into<PathBuf>>(slide: P) -> Self {
        Self {
            slide: slide.into(),
            annotation: None,
        }
    }

    /// Slide file name without directories
    pub fn slide_name(&self) -> String {
        crate::utils::base_name(&self.slide)
    }
}

/// Where random patches are taken from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Inside annotated polygons of `target_class`
    Annotated {
        target_class: u32,
        min_class_area_ratio: f64,
    },
    /// Anywhere with enough tissue, ignoring annotations
    Tissue,
}

impl Default for SamplingMode {
    fn default() -> Self {
        SamplingMode::Annotated {
            target_class: 1,
            min_class_area_ratio: 0.0,
        }
    }
}

/// Patch sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Pyramid level to read from
    pub level: usize,
    /// Patch width and height
    pub size: (u32, u32),
    pub mode: SamplingMode,
    /// Keep the centre class label on each patch
    pub return_annotation: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            level: 0,
            size: (DEFAULT_PATCH_SIZE, DEFAULT_PATCH_SIZE),
            mode: SamplingMode::default(),
            return_annotation: false,
        }
    }
}

/// A sampled patch
#[derive(Debug, Clone)]
pub struct Patch {
    pub image: RgbImage,
    /// Class id at the patch centre, when requested
    pub label: Option<u32>,
    /// Base file name of the source slide
    pub slide_name: String,
}

/// Pair every slide in `slide_dir` with `<stem>.xml` from `annotation_dir`
///
/// Slides are returned sorted by path. A slide without a matching XML file
/// gets `annotation: None`.
pub fn discover_slides<P: AsRef<Path>>(
    slide_dir: P,
    annotation_dir: Option<&Path>,
) -> Result<Vec<SlidePair>> {
    let slide_dir = slide_dir.as_ref();
    let mut slides: Vec<PathBuf> = std::fs::read_dir(slide_dir)
        .with_context(|| format!("Failed to read slide directory: {:?}", slide_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            crate::utils::get_extension(path)
                .is_some_and(|ext| SLIDE_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect();
    slides.sort();

    let pairs: Vec<SlidePair> = slides
        .into_iter()
        .map(|slide| {
            let annotation = annotation_dir.and_then(|dir| {
                let stem = slide.file_stem()?.to_str()?;
                let xml = dir.join(format!("{}.xml", stem));
                xml.is_file().then_some(xml)
            });
            debug!("Slide {:?} annotation {:?}", slide, annotation);
            SlidePair { slide, annotation }
        })
        .collect();

    info!(
        "Found {} slides ({} annotated) in {:?}",
        pairs.len(),
        pairs.iter().filter(|p| p.annotation.is_some()).count(),
        slide_dir
    );
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_slides_pairs_annotations() {
        let slides = tempfile::tempdir().unwrap();
        let xmls = tempfile::tempdir().unwrap();

        std::fs::write(slides.path().join("b.svs"), b"").unwrap();
        std::fs::write(slides.path().join("a.tif"), b"").unwrap();
        std::fs::write(slides.path().join("notes.txt"), b"").unwrap();
        std::fs::write(xmls.path().join("a.xml"), b"<ASAP_Annotations/>").unwrap();

        let pairs = discover_slides(slides.path(), Some(xmls.path())).unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].slide_name(), "a.tif");
        assert_eq!(pairs[0].annotation, Some(xmls.path().join("a.xml")));
        assert_eq!(pairs[1].slide_name(), "b.svs");
        assert_eq!(pairs[1].annotation, None);
    }

    #[test]
    fn test_patch_error_messages() {
        assert_eq!(PatchError::NoAnnotations.to_string(), "No tumor annotations found.");
        assert_eq!(PatchError::NoTissue.to_string(), "No valid tissue patch found.");
    }
}
