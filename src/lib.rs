//! # msurv: multimodal survival data preparation
//!
//! Tooling around a multimodal cancer survival model.
//!
//! ## Features
//!
//! - Clinical table comparison keyed by patient id
//! - Random patch extraction from whole-slide images, annotated or tissue-only
//! - Per-patient metadata ingestion into a document store
//! - Modality sub-models (clinical, copy number, WSI) and their fusion layer
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use msurv::compare::{compare_tables, CompareOptions};
//! use msurv::data::loader::TableLoader;
//!
//! let options = CompareOptions::default();
//! let loader = TableLoader::new();
//! let old = loader.load("clinical_old.tsv").unwrap().keyed_by(&options.key).unwrap();
//! let new = loader.load("clinical_new.tsv").unwrap().keyed_by(&options.key).unwrap();
//!
//! let result = compare_tables(&old, &new, &options);
//! result.print_summary();
//! ```

pub mod cli;
pub mod compare;
pub mod data;
pub mod ingest;
pub mod model;
pub mod utils;
pub mod wsi;

use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Re-export commonly used types
pub use compare::{compare_tables, CompareOptions, ComparisonResult};
pub use data::loader::TableLoader;
pub use data::{KeyedTable, StringTable};
pub use ingest::{DocumentStore, Ingester, JsonDirStore, Modality};
pub use model::{Fusion, FusionMethod, ModelError};
pub use wsi::{OfflinePatcher, PatchError, PatchGenerator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!("{} v{} - multimodal survival data preparation", NAME, VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("msurv"));
        assert!(info_str.contains(VERSION));
    }
}
