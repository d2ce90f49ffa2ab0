use crate::utils::{ensure_dir, strip_extensions};
use crate::wsi::generator::PatchGenerator;
use crate::wsi::{Patch, PatchConfig, SlidePair};
use anyhow::{Context, Result};
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Hex characters of the random suffix
const ID_LEN: usize = 5;

/// Outcome of an offline patching run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatchRunSummary {
    /// Slides visited
    pub slides: usize,
    /// Patches written
    pub saved: usize,
    /// Slides abandoned after a failed draw
    pub failed_slides: Vec<String>,
    /// Run stopped by an interrupt
    pub interrupted: bool,
}

/// Draws patches from every slide and writes them as PNG files
pub struct OfflinePatcher {
    generator: PatchGenerator,
    target_dir: PathBuf,
    interrupt: Arc<AtomicBool>,
    show_progress: bool,
}

impl OfflinePatcher {
    /// Create a patcher, creating `target_dir` if needed
    pub fn new<P: AsRef<Path>>(
        slides: Vec<SlidePair>,
        target_dir: P,
        config: PatchConfig,
        seed: Option<u64>,
    ) -> Result<Self> {
        let target_dir = target_dir.as_ref().to_path_buf();
        ensure_dir(&target_dir)?;

        Ok(Self {
            generator: PatchGenerator::new(slides, config, seed),
            target_dir,
            interrupt: Arc::new(AtomicBool::new(false)),
            show_progress: true,
        })
    }

    /// Share an externally owned interrupt flag
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Toggle the per-slide progress bar
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Flag that stops the run once set
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Unique output path `<slide-stem>_<5 hex>.png`
    ///
    /// The slide name loses up to two extensions. A fresh id is drawn while
    /// the path already exists.
    pub fn compose_path(&self, slide_name: &str) -> PathBuf {
        let stem = strip_extensions(slide_name, 2);
        loop {
            let id = Uuid::new_v4().simple().to_string();
            let path = self
                .target_dir
                .join(format!("{}_{}.png", stem, &id[..ID_LEN]));
            if !path.exists() {
                return path;
            }
        }
    }

    /// Save a patch losslessly
    pub fn save(&self, patch: &Patch) -> Result<PathBuf> {
        let path = self.compose_path(&patch.slide_name);
        patch
            .image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("Failed to save patch: {:?}", path))?;
        Ok(path)
    }

    fn progress_bar(&self, len: usize, name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let pb = ProgressBar::new(len as u64).with_style(style);
        pb.set_message(name.to_string());
        pb
    }

    /// Generate and save `n` patches per slide
    ///
    /// A failed draw abandons the rest of that slide. On interrupt the patch
    /// in hand is still written before the run stops.
    pub fn run(&self, n: usize) -> Result<PatchRunSummary> {
        self.run_with(n, |_| {})
    }

    /// [`run`](Self::run), calling `on_draw` with each patch before it is saved
    pub fn run_with<F: FnMut(&Patch)>(&self, n: usize, mut on_draw: F) -> Result<PatchRunSummary> {
        info!("Generating WSI patches: {} per slide, {} slides", n, self.generator.len());

        let mut summary = PatchRunSummary::default();

        for pair in self.generator.slides() {
            if self.interrupt.load(Ordering::SeqCst) {
                summary.interrupted = true;
                break;
            }

            let name = pair.slide_name();
            info!("Processing: {}", name);
            summary.slides += 1;

            let loaded = match self.generator.open(pair) {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!("Failed on patch 1 for {:?}: {}", pair.slide, e);
                    summary.failed_slides.push(name);
                    continue;
                }
            };

            let pb = self.progress_bar(n, &name);
            for i in 0..n {
                let patch = match self.generator.draw(&loaded) {
                    Ok(patch) => patch,
                    Err(e) => {
                        warn!("Failed on patch {} for {:?}: {}", i + 1, pair.slide, e);
                        summary.failed_slides.push(name.clone());
                        break;
                    }
                };
                on_draw(&patch);

                match self.save(&patch) {
                    Ok(_) => summary.saved += 1,
                    Err(e) => warn!("{:#}", e),
                }
                pb.inc(1);

                if self.interrupt.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    break;
                }
            }
            pb.finish_and_clear();

            if summary.interrupted {
                warn!("Interrupted, last patch saved");
                break;
            }
        }

        info!(
            "Saved {} patches from {} slides ({} failed)",
            summary.saved,
            summary.slides,
            summary.failed_slides.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsi::generator::tests::write_slide;
    use crate::wsi::SamplingMode;

    fn config() -> PatchConfig {
        PatchConfig {
            level: 0,
            size: (32, 32),
            mode: SamplingMode::Tissue,
            return_annotation: false,
        }
    }

    fn png_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".png"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_compose_path() {
        let out = tempfile::tempdir().unwrap();
        let patcher = OfflinePatcher::new(vec![], out.path(), config(), None).unwrap();

        let path = patcher.compose_path("TCGA-BR-4187-01Z-00-DX1.5f0c.svs");
        let name = path.file_name().unwrap().to_str().unwrap();

        assert_eq!(path.parent().unwrap(), out.path());
        assert!(name.starts_with("TCGA-BR-4187-01Z-00-DX1_"));
        assert!(name.ends_with(".png"));
        let id = &name["TCGA-BR-4187-01Z-00-DX1_".len()..name.len() - 4];
        assert_eq!(id.len(), 5);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_creates_target_dir() {
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("patches").join("train");
        OfflinePatcher::new(vec![], &target, config(), None).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_run_saves_n_per_slide_and_skips_failures() {
        let slides_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let slides = vec![
            write_slide(slides_dir.path(), "a.tif.png", true),
            write_slide(slides_dir.path(), "blank.png", false),
            SlidePair::unannotated(slides_dir.path().join("missing.png")),
            write_slide(slides_dir.path(), "b.png", true),
        ];

        let patcher = OfflinePatcher::new(slides, out.path(), config(), Some(4))
            .unwrap()
            .with_progress(false);
        let summary = patcher.run(3).unwrap();

        assert_eq!(summary.slides, 4);
        assert_eq!(summary.saved, 6);
        assert_eq!(summary.failed_slides, vec!["blank.png", "missing.png"]);
        assert!(!summary.interrupted);

        let files = png_files(out.path());
        assert_eq!(files.len(), 6);
        assert_eq!(files.iter().filter(|f| f.starts_with("a_")).count(), 3);
        assert_eq!(files.iter().filter(|f| f.starts_with("b_")).count(), 3);

        let saved = image::open(out.path().join(&files[0])).unwrap();
        assert_eq!((saved.width(), saved.height()), (32, 32));
    }

    #[test]
    fn test_interrupt_before_first_slide() {
        let slides_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let slides = vec![
            write_slide(slides_dir.path(), "a.png", true),
            write_slide(slides_dir.path(), "b.png", true),
        ];

        let patcher = OfflinePatcher::new(slides, out.path(), config(), Some(4))
            .unwrap()
            .with_progress(false);
        let flag = patcher.interrupt_handle();
        flag.store(true, Ordering::SeqCst);

        // Flag already set: nothing is drawn
        let summary = patcher.run(5).unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.saved, 0);
        assert!(png_files(out.path()).is_empty());
    }

    #[test]
    fn test_interrupt_mid_slide_saves_patch_in_hand() {
        let slides_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let slides = vec![
            write_slide(slides_dir.path(), "a.png", true),
            write_slide(slides_dir.path(), "b.png", true),
        ];

        let patcher = OfflinePatcher::new(slides, out.path(), config(), Some(4))
            .unwrap()
            .with_progress(false);
        let flag = patcher.interrupt_handle();

        let mut drawn = 0;
        let summary = patcher
            .run_with(5, |_| {
                drawn += 1;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(drawn, 1);
        assert!(summary.interrupted);
        assert_eq!(summary.slides, 1);
        assert_eq!(summary.saved, 1);

        let files = png_files(out.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("a_"));
    }
}
