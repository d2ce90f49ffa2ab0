use crate::data::StringTable;
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    Err(anyhow::anyhow!("Cannot determine format of gzipped file"))
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(anyhow::anyhow!("Unsupported file format: {:?}", path)),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Cell values read as missing, matching pandas' `read_csv` defaults
pub const DEFAULT_NA_VALUES: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Table loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Maximum number of rows to load (0 = unlimited)
    pub max_rows: usize,
    /// Trim surrounding whitespace from cells
    pub trim: bool,
    /// Exact cell values replaced by the empty string
    pub na_values: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_rows: 0,
            trim: false,
            na_values: DEFAULT_NA_VALUES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LoaderConfig {
    fn cell(&self, raw: &str) -> String {
        let value = if self.trim { raw.trim() } else { raw };
        if self.na_values.iter().any(|na| na == value) {
            String::new()
        } else {
            value.to_string()
        }
    }
}

/// Loader for string-typed delimited tables
pub struct TableLoader {
    config: LoaderConfig,
}

impl TableLoader {
    /// Create new loader with default config
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
        }
    }

    /// Create new loader with custom config
    pub fn with_config(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Load a table from file, detecting format by extension
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<StringTable> {
        let path = path.as_ref();
        info!("Loading table from {:?}", path);

        let format = FileFormat::from_path(path)?;
        debug!("Detected file format: {:?}", format);

        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {:?}", path))?;

        let table = if format.is_gzipped() {
            self.parse_table(BufReader::new(GzDecoder::new(file)), format)?
        } else {
            self.parse_table(BufReader::new(file), format)?
        };

        info!("Loaded {} rows x {} columns", table.len(), table.headers.len());
        Ok(table)
    }

    /// Parse a table from reader
    pub fn parse_table<R: Read>(&self, reader: R, format: FileFormat) -> Result<StringTable> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .context("Failed to read header row")?
            .iter()
            .map(|s| s.trim().to_string())
            .collect::<Vec<_>>();

        debug!("Headers: {:?}", headers);

        let mut rows = Vec::new();
        for (line, result) in csv_reader.records().enumerate() {
            let record = result.with_context(|| format!("Failed to parse record at line {}", line + 2))?;

            if record.len() != headers.len() {
                debug!("Line {} has {} fields, expected {}", line + 2, record.len(), headers.len());
            }

            let row = record
                .iter()
                .map(|s| self.config.cell(s))
                .collect::<Vec<_>>();
            rows.push(row);

            if self.config.max_rows > 0 && rows.len() >= self.config.max_rows {
                warn!("Reached maximum row limit: {}", self.config.max_rows);
                break;
            }
        }

        Ok(StringTable::new(headers, rows))
    }
}

impl Default for TableLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_file_format_detection() {
        assert_eq!(FileFormat::from_path("data.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_path("data.tsv").unwrap(), FileFormat::Tsv);
        assert_eq!(FileFormat::from_path("data.csv.gz").unwrap(), FileFormat::GzippedCsv);
        assert_eq!(FileFormat::from_path("data.tsv.gz").unwrap(), FileFormat::GzippedTsv);
        assert!(FileFormat::from_path("data.xlsx").is_err());
    }

    #[test]
    fn test_parse_tsv_keeps_strings() {
        let tsv = "submitter_id\tage\tstage\nTCGA-01\t061\tIIa\nTCGA-02\t\tIII";
        let table = TableLoader::new()
            .parse_table(Cursor::new(tsv), FileFormat::Tsv)
            .unwrap();

        assert_eq!(table.headers, vec!["submitter_id", "age", "stage"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][1], "061");
        assert_eq!(table.rows[1][1], "");
    }

    #[test]
    fn test_short_rows_filled() {
        let tsv = "submitter_id\tage\tstage\nTCGA-01\t61";
        let table = TableLoader::new()
            .parse_table(Cursor::new(tsv), FileFormat::Tsv)
            .unwrap();

        assert_eq!(table.rows[0], vec!["TCGA-01", "61", ""]);
    }

    #[test]
    fn test_na_tokens_read_as_empty() {
        let tsv = "submitter_id\trace\tage\tnote\nP1\tNA\tNaN\tNAN\nP2\t<NA>\tnull\t N/A";
        let table = TableLoader::new()
            .parse_table(Cursor::new(tsv), FileFormat::Tsv)
            .unwrap();

        assert_eq!(table.rows[0], vec!["P1", "", "", "NAN"]);
        assert_eq!(table.rows[1], vec!["P2", "", "", " N/A"]);
    }

    #[test]
    fn test_na_values_configurable() {
        let tsv = "submitter_id\tage\nP1\tNA\nP2\t--";
        let config = LoaderConfig {
            na_values: vec!["--".to_string()],
            ..LoaderConfig::default()
        };
        let table = TableLoader::with_config(config)
            .parse_table(Cursor::new(tsv), FileFormat::Tsv)
            .unwrap();

        assert_eq!(table.column("age").unwrap(), vec!["NA", ""]);
    }

    #[test]
    fn test_load_gzipped() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinical.tsv.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"submitter_id\tgender\nP1\tmale\n").unwrap();
        enc.finish().unwrap();

        let table = TableLoader::new().load(&path).unwrap();
        assert_eq!(table.column("gender").unwrap(), vec!["male"]);
    }
}
