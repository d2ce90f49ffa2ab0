use super::PatientDocument;
use crate::utils::ensure_dir;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether an upsert created or overwrote a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Collection-oriented store keyed by patient id
pub trait DocumentStore {
    /// Insert or replace the document with the same `patient_id`
    fn replace_one(&mut self, collection: &str, doc: &PatientDocument) -> Result<UpsertOutcome>;

    fn find_one(&self, collection: &str, patient_id: &str) -> Result<Option<PatientDocument>>;

    /// Number of documents in a collection
    fn count(&self, collection: &str) -> Result<usize>;
}

/// One directory per collection, one pretty-printed JSON file per document
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, collection: &str, patient_id: &str) -> PathBuf {
        self.root
            .join(encode_name(collection))
            .join(format!("{}.json", encode_name(patient_id)))
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]` (and a leading dot)
/// so distinct ids always map to distinct file names
fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            b'.' if i > 0 => encoded.push('.'),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

impl DocumentStore for JsonDirStore {
    fn replace_one(&mut self, collection: &str, doc: &PatientDocument) -> Result<UpsertOutcome> {
        let path = self.document_path(collection, &doc.patient_id);
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }

        let outcome = if path.exists() {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        };

        let json = serde_json::to_string_pretty(doc)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write document: {:?}", path))?;
        debug!("{:?} {} into {}", outcome, doc.patient_id, collection);
        Ok(outcome)
    }

    fn find_one(&self, collection: &str, patient_id: &str) -> Result<Option<PatientDocument>> {
        let path = self.document_path(collection, patient_id);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read document: {:?}", path))?;
        let doc = serde_json::from_str(&content).with_context(|| format!("Malformed document: {:?}", path))?;
        Ok(Some(doc))
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let dir = self.root.join(encode_name(collection));
        if !dir.is_dir() {
            return Ok(0);
        }
        let n = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read collection: {:?}", dir))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
            .count();
        Ok(n)
    }
}
