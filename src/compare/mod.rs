//! Reconciliation of two clinical tables keyed by submitter id.

pub mod report;

use crate::data::{KeyedTable, SUBMITTER_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Absolute tolerance for numeric equality
pub const NUMERIC_TOLERANCE: f64 = 1e-6;

/// Check if two cell values are equivalent
///
/// Accepts exact and case-insensitive matches, numbers equal within
/// [`NUMERIC_TOLERANCE`] (`23486.0` vs `23486`), and case-insensitive
/// containment in either direction (`TCGA-STAD` vs `STAD`). Containment only
/// counts on token boundaries, so `Male` is not found inside `Female`. The
/// empty string is contained in everything, so blank cells never differ.
pub fn values_are_equivalent(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return true;
    }

    if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        if (x - y).abs() < NUMERIC_TOLERANCE {
            return true;
        }
    }

    contains_token(&a_lower, &b_lower) || contains_token(&b_lower, &a_lower)
}

/// Check if `needle` occurs in `haystack` without touching alphanumerics on either side
fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }

    haystack.match_indices(needle).any(|(start, m)| {
        let end = start + m.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Options for a table comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Join key column
    pub key: String,
    /// Columns excluded from value comparison
    pub ignore_columns: Vec<String>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            key: SUBMITTER_ID.to_string(),
            ignore_columns: vec!["group".to_string()],
        }
    }
}

/// A single non-equivalent cell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDifference {
    pub column: String,
    pub table1_value: String,
    pub table2_value: String,
}

/// All non-equivalent cells of one submitter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowDifference {
    pub submitter_id: String,
    pub differences: Vec<ColumnDifference>,
}

/// Outcome of comparing two tables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComparisonResult {
    /// Rows in table 1
    pub total_table1: usize,
    /// Rows in table 2
    pub total_table2: usize,
    /// Number of ids present in both tables
    pub total_common: usize,
    /// Ids only in table 1, sorted
    pub only_in_table1: Vec<String>,
    /// Ids only in table 2, sorted
    pub only_in_table2: Vec<String>,
    /// Rows with at least one difference, ordered by id
    pub differences: Vec<RowDifference>,
    /// Common rows without differences
    pub identical_rows: usize,
}

impl ComparisonResult {
    /// Number of rows with differences
    pub fn rows_with_differences(&self) -> usize {
        self.differences.len()
    }

    /// Ids whose rows differ in the given column
    pub fn ids_with_column_difference(&self, column: &str) -> Vec<&str> {
        self.differences
            .iter()
            .filter(|row| row.differences.iter().any(|d| d.column == column))
            .map(|row| row.submitter_id.as_str())
            .collect()
    }

    /// Count of differences per column, most frequent first
    pub fn column_difference_summary(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &self.differences {
            for diff in &row.differences {
                *counts.entry(diff.column.as_str()).or_default() += 1;
            }
        }

        let mut summary: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(col, n)| (col.to_string(), n))
            .collect();
        // Stable sort keeps the alphabetical order among equal counts
        summary.sort_by(|a, b| b.1.cmp(&a.1));
        summary
    }
}

/// Compare two keyed tables cell by cell
pub fn compare_tables(
    table1: &KeyedTable,
    table2: &KeyedTable,
    options: &CompareOptions,
) -> ComparisonResult {
    let ids1: HashSet<&str> = table1.ids().collect();
    let ids2: HashSet<&str> = table2.ids().collect();

    let mut common: Vec<&str> = ids1.intersection(&ids2).copied().collect();
    common.sort_unstable();

    let mut only_in_table1: Vec<String> = ids1.difference(&ids2).map(|s| s.to_string()).collect();
    only_in_table1.sort_unstable();
    let mut only_in_table2: Vec<String> = ids2.difference(&ids1).map(|s| s.to_string()).collect();
    only_in_table2.sort_unstable();

    let columns: Vec<&str> = table1
        .value_columns()
        .filter(|c| *c != options.key)
        .filter(|c| !options.ignore_columns.iter().any(|i| i.as_str() == *c))
        .filter(|c| table2.table().has_column(c))
        .collect();

    debug!("Comparing {} columns over {} common ids", columns.len(), common.len());

    let mut differences = Vec::new();
    let mut identical_rows = 0;

    for id in &common {
        let row_differences: Vec<ColumnDifference> = columns
            .iter()
            .filter_map(|col| {
                let v1 = table1.get(id, col).unwrap_or_default();
                let v2 = table2.get(id, col).unwrap_or_default();
                (!values_are_equivalent(v1, v2)).then(|| ColumnDifference {
                    column: col.to_string(),
                    table1_value: v1.to_string(),
                    table2_value: v2.to_string(),
                })
            })
            .collect();

        if row_differences.is_empty() {
            identical_rows += 1;
        } else {
            differences.push(RowDifference {
                submitter_id: id.to_string(),
                differences: row_differences,
            });
        }
    }

    ComparisonResult {
        total_table1: table1.len(),
        total_table2: table2.len(),
        total_common: common.len(),
        only_in_table1,
        only_in_table2,
        differences,
        identical_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StringTable;

    fn keyed(headers: &[&str], rows: &[&[&str]]) -> KeyedTable {
        StringTable::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
        .keyed_by(SUBMITTER_ID)
        .unwrap()
    }

    #[test]
    fn test_equivalence_examples() {
        assert!(values_are_equivalent("23486.0", "23486"));
        assert!(values_are_equivalent("TCGA-STAD", "STAD"));
        assert!(!values_are_equivalent("Male", "Female"));
    }

    #[test]
    fn test_equivalence_case_and_tolerance() {
        assert!(values_are_equivalent("Stage IIA", "stage iia"));
        assert!(values_are_equivalent("0.1234567", "0.1234569"));
        assert!(!values_are_equivalent("0.12", "0.13"));
        assert!(values_are_equivalent(" 12 ", "12.0"));
    }

    #[test]
    fn test_equivalence_reflexive_and_symmetric() {
        let values = ["", "0", "0.0", "1e3", "1000", "Male", "female", "TCGA-STAD", "stad", "white", "nan"];
        for a in values {
            assert!(values_are_equivalent(a, a), "not reflexive for {:?}", a);
            for b in values {
                assert_eq!(
                    values_are_equivalent(a, b),
                    values_are_equivalent(b, a),
                    "not symmetric for {:?} / {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_empty_matches_anything() {
        assert!(values_are_equivalent("", "white"));
    }

    #[test]
    fn test_containment_on_token_boundaries() {
        assert!(values_are_equivalent("stad", "TCGA-STAD"));
        assert!(values_are_equivalent("Stage II", "stage ii (unspecified)"));
        assert!(!values_are_equivalent("Stage II", "Stage IIB"));
        assert!(!values_are_equivalent("male", "FEMALE"));
    }

    #[test]
    fn test_compare_tables() {
        let t1 = keyed(
            &["submitter_id", "age", "race", "group", "only1"],
            &[
                &["P1", "61.0", "white", "a", "x"],
                &["P2", "45", "asian", "a", "x"],
                &["P3", "70", "white", "a", "x"],
            ],
        );
        let t2 = keyed(
            &["submitter_id", "race", "age", "group"],
            &[
                &["P1", "WHITE", "61", "b"],
                &["P2", "black", "45", "b"],
                &["P4", "white", "30", "b"],
            ],
        );

        let result = compare_tables(&t1, &t2, &CompareOptions::default());

        assert_eq!(result.total_table1, 3);
        assert_eq!(result.total_table2, 3);
        assert_eq!(result.total_common, 2);
        assert_eq!(result.only_in_table1, vec!["P3"]);
        assert_eq!(result.only_in_table2, vec!["P4"]);
        assert_eq!(result.identical_rows, 1);
        assert_eq!(result.rows_with_differences(), 1);

        let diff = &result.differences[0];
        assert_eq!(diff.submitter_id, "P2");
        assert_eq!(
            diff.differences,
            vec![ColumnDifference {
                column: "race".into(),
                table1_value: "asian".into(),
                table2_value: "black".into(),
            }]
        );
        assert_eq!(result.ids_with_column_difference("race"), vec!["P2"]);
        assert!(result.ids_with_column_difference("age").is_empty());
    }

    #[test]
    fn test_column_difference_summary_order() {
        let result = ComparisonResult {
            differences: vec![
                RowDifference {
                    submitter_id: "P1".into(),
                    differences: vec![
                        ColumnDifference { column: "race".into(), table1_value: "a".into(), table2_value: "b".into() },
                        ColumnDifference { column: "age".into(), table1_value: "1".into(), table2_value: "2".into() },
                    ],
                },
                RowDifference {
                    submitter_id: "P2".into(),
                    differences: vec![
                        ColumnDifference { column: "stage".into(), table1_value: "I".into(), table2_value: "II".into() },
                        ColumnDifference { column: "race".into(), table1_value: "a".into(), table2_value: "b".into() },
                    ],
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            result.column_difference_summary(),
            vec![("race".to_string(), 2), ("age".to_string(), 1), ("stage".to_string(), 1)]
        );
    }

    #[test]
    fn test_na_cells_count_as_missing() {
        use crate::data::loader::{FileFormat, TableLoader};
        use std::io::Cursor;

        let loader = TableLoader::new();
        let load = |text: &str| {
            loader
                .parse_table(Cursor::new(text.to_string()), FileFormat::Tsv)
                .unwrap()
                .keyed_by(SUBMITTER_ID)
                .unwrap()
        };
        let t1 = load("submitter_id\trace\tage\nP1\twhite\t61");
        let t2 = load("submitter_id\trace\tage\nP1\tNA\tNaN");

        let result = compare_tables(&t1, &t2, &CompareOptions::default());
        assert_eq!(result.identical_rows, 1);
        assert!(result.differences.is_empty());
    }
}
