//! Metadata ingestion into a document store
//!
//! Every TSV under a modality folder becomes one document keyed by patient
//! id (the file stem), holding the table column by column.

pub mod store;

pub use store::{DocumentStore, JsonDirStore, UpsertOutcome};

use crate::data::loader::TableLoader;
use crate::data::StringTable;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Data modality and its collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Clinical,
    Cnv,
    Dnam,
    Mirna,
    Mrna,
    Wsi,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::Clinical,
        Modality::Cnv,
        Modality::Dnam,
        Modality::Mirna,
        Modality::Mrna,
        Modality::Wsi,
    ];

    /// Collection name in the document store
    pub fn collection(&self) -> &'static str {
        match self {
            Modality::Clinical => "clinical",
            Modality::Cnv => "cnv",
            Modality::Dnam => "dnam",
            Modality::Mirna => "mirna",
            Modality::Mrna => "mrna",
            Modality::Wsi => "wsi",
        }
    }

    /// Source folder under the processed-data root
    pub fn folder(&self) -> &'static str {
        match self {
            Modality::Clinical => "Clinical",
            Modality::Cnv => "CNV",
            Modality::Dnam => "DNAm",
            Modality::Mirna => "miRNA-seq",
            Modality::Mrna => "RNA-seq",
            Modality::Wsi => "WSI",
        }
    }

    /// Parse from collection or folder name
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.collection().eq_ignore_ascii_case(s) || m.folder().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.collection())
    }
}

/// One patient's table, column oriented
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDocument {
    pub patient_id: String,
    /// Column name -> values; empty cells are `null`
    pub data: BTreeMap<String, Vec<Option<String>>>,
}

impl PatientDocument {
    /// Build a document from a table
    pub fn from_table(patient_id: impl Into<String>, table: &StringTable) -> Self {
        let data = table
            .to_columns()
            .into_iter()
            .map(|(column, values)| {
                let values = values
                    .into_iter()
                    .map(|v| (!v.is_empty()).then_some(v))
                    .collect();
                (column, values)
            })
            .collect();

        Self {
            patient_id: patient_id.into(),
            data,
        }
    }

    /// Number of rows in the source table
    pub fn rows(&self) -> usize {
        self.data.values().map(|v| v.len()).max().unwrap_or(0)
    }
}

/// Per-modality ingestion counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModalitySummary {
    pub files: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub failed: Vec<PathBuf>,
}

/// Counts for a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub modalities: BTreeMap<String, ModalitySummary>,
}

impl IngestSummary {
    /// Documents written across all modalities
    pub fn total_written(&self) -> usize {
        self.modalities.values().map(|m| m.inserted + m.replaced).sum()
    }

    /// Print summary to stdout
    pub fn print(&self) {
        println!("\n=== Ingestion Summary ===");
        for (collection, m) in &self.modalities {
            println!(
                "{:<10} files: {:>5}  inserted: {:>5}  replaced: {:>5}  failed: {}",
                collection,
                m.files,
                m.inserted,
                m.replaced,
                m.failed.len()
            );
        }
        println!("Total documents written: {}", crate::utils::format_number(self.total_written()));
        println!("=========================\n");
    }
}

/// Walks modality folders and upserts one document per TSV
pub struct Ingester<S: DocumentStore> {
    base_dir: PathBuf,
    store: S,
    modalities: Vec<Modality>,
    loader: TableLoader,
}

impl<S: DocumentStore> Ingester<S> {
    /// Ingest every modality found under `base_dir`
    pub fn new<P: AsRef<Path>>(base_dir: P, store: S) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            store,
            modalities: Modality::ALL.to_vec(),
            loader: TableLoader::new(),
        }
    }

    /// Restrict to some modalities
    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.modalities = modalities;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Sorted `*.tsv` files of a modality folder; a missing folder yields none
    pub fn list_files(&self, modality: Modality) -> Result<Vec<PathBuf>> {
        let dir = self.base_dir.join(modality.folder());
        if !dir.is_dir() {
            warn!("No folder for {} at {:?}", modality, dir);
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && crate::utils::get_extension(path).as_deref() == Some("tsv"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn ingest_file(&mut self, modality: Modality, path: &Path) -> Result<UpsertOutcome> {
        let patient_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("Invalid file name: {:?}", path))?;
        let table = self.loader.load(path)?;
        let doc = PatientDocument::from_table(patient_id, &table);
        self.store.replace_one(modality.collection(), &doc)
    }

    /// Ingest all configured modalities
    pub fn run(&mut self) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        for modality in self.modalities.clone() {
            let files = self.list_files(modality)?;
            info!("Ingesting {} files into collection `{}`", files.len(), modality.collection());

            let pb = ProgressBar::new(files.len() as u64).with_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40}] {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb.set_message(modality.collection());

            let mut counts = ModalitySummary {
                files: files.len(),
                ..Default::default()
            };

            for path in files {
                match self.ingest_file(modality, &path) {
                    Ok(UpsertOutcome::Inserted) => counts.inserted += 1,
                    Ok(UpsertOutcome::Replaced) => counts.replaced += 1,
                    Err(e) => {
                        warn!("Failed to ingest {:?}: {:#}", path, e);
                        counts.failed.push(path);
                    }
                }
                pb.inc(1);
            }
            pb.finish_and_clear();

            summary.modalities.insert(modality.collection().to_string(), counts);
        }

        info!("Done ingesting all metadata ({} documents)", summary.total_written());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_names() {
        assert_eq!(Modality::Mirna.collection(), "mirna");
        assert_eq!(Modality::Mirna.folder(), "miRNA-seq");
        assert_eq!(Modality::parse("RNA-seq"), Some(Modality::Mrna));
        assert_eq!(Modality::parse("dnam"), Some(Modality::Dnam));
        assert_eq!(Modality::parse("proteomics"), None);
    }

    #[test]
    fn test_document_from_table() {
        let table = StringTable::new(
            vec!["submitter_id".into(), "value".into()],
            vec![
                vec!["P1".into(), "0.5".into()],
                vec!["P1".into(), "".into()],
            ],
        );
        let doc = PatientDocument::from_table("P1", &table);

        assert_eq!(doc.patient_id, "P1");
        assert_eq!(doc.rows(), 2);
        assert_eq!(doc.data["value"], vec![Some("0.5".to_string()), None]);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["data"]["value"][1], serde_json::Value::Null);
    }

    #[test]
    fn test_ingest_run_upserts() {
        let base = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let clinical = base.path().join("Clinical");
        std::fs::create_dir_all(&clinical).unwrap();
        std::fs::write(clinical.join("TCGA-01.tsv"), "submitter_id\tage\nTCGA-01\t61\n").unwrap();
        std::fs::write(clinical.join("TCGA-02.tsv"), "submitter_id\tage\nTCGA-02\t45\n").unwrap();
        std::fs::write(clinical.join("readme.md"), "ignored").unwrap();

        let cnv = base.path().join("CNV");
        std::fs::create_dir_all(&cnv).unwrap();
        std::fs::write(cnv.join("TCGA-01.tsv"), "gene\tcn\nTP53\t2\nKRAS\tNA\n").unwrap();

        let store = JsonDirStore::new(store_dir.path()).unwrap();
        let mut ingester = Ingester::new(base.path(), store)
            .with_modalities(vec![Modality::Clinical, Modality::Cnv, Modality::Wsi]);

        let first = ingester.run().unwrap();
        assert_eq!(first.modalities["clinical"].inserted, 2);
        assert_eq!(first.modalities["cnv"].inserted, 1);
        assert_eq!(first.modalities["wsi"].files, 0);
        assert_eq!(first.total_written(), 3);

        // Second pass replaces rather than duplicates
        let second = ingester.run().unwrap();
        assert_eq!(second.modalities["clinical"].replaced, 2);
        assert_eq!(ingester.store().count("clinical").unwrap(), 2);

        let doc = ingester.store().find_one("cnv", "TCGA-01").unwrap().unwrap();
        assert_eq!(doc.data["gene"], vec![Some("TP53".to_string()), Some("KRAS".to_string())]);
        assert_eq!(doc.data["cn"], vec![Some("2".to_string()), None]);
    }
}
