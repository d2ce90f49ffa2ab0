use crate::compare::ComparisonResult;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Rows and ids shown on the console before truncating
const CONSOLE_PREVIEW: usize = 10;

impl ComparisonResult {
    /// Print summary and a preview of differences to stdout
    pub fn print_summary(&self) {
        println!("Total submitter_ids in table 1: {}", self.total_table1);
        println!("Total submitter_ids in table 2: {}", self.total_table2);
        println!("Common submitter_ids: {}", self.total_common);
        println!("Only in table 1: {}", self.only_in_table1.len());
        println!("Only in table 2: {}", self.only_in_table2.len());
        println!("{}", "-".repeat(50));
        println!("Identical rows: {}", self.identical_rows);
        println!("Rows with differences: {}", self.rows_with_differences());

        if !self.differences.is_empty() {
            println!("\nDETAILED DIFFERENCES:");
            println!("{}", "=".repeat(50));

            let mut out = String::new();
            for row in self.differences.iter().take(CONSOLE_PREVIEW) {
                write_row(&mut out, row);
            }
            print!("{}", out);

            if self.differences.len() > CONSOLE_PREVIEW {
                println!(
                    "\n... and {} more rows with differences",
                    self.differences.len() - CONSOLE_PREVIEW
                );
            }
        }

        if !self.only_in_table1.is_empty() {
            println!(
                "\nSubmitter IDs only in table 1 (first {}): {:?}",
                CONSOLE_PREVIEW,
                preview(&self.only_in_table1)
            );
        }
        if !self.only_in_table2.is_empty() {
            println!(
                "Submitter IDs only in table 2 (first {}): {:?}",
                CONSOLE_PREVIEW,
                preview(&self.only_in_table2)
            );
        }
    }

    /// Print per-column difference counts to stdout
    pub fn print_column_summary(&self) {
        println!("\nDIFFERENCES BY COLUMN:");
        println!("{}", "-".repeat(30));
        for (column, count) in self.column_difference_summary() {
            println!("{}: {} differences", column, count);
        }
    }

    /// Render the full plain-text report
    pub fn render_report(&self) -> String {
        let mut out = String::new();

        out.push_str("TSV COMPARISON RESULTS\n");
        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");
        let _ = writeln!(out, "Total submitter_ids in table 1: {}", self.total_table1);
        let _ = writeln!(out, "Total submitter_ids in table 2: {}", self.total_table2);
        let _ = writeln!(out, "Common submitter_ids: {}", self.total_common);
        let _ = writeln!(out, "Only in table 1: {}", self.only_in_table1.len());
        let _ = writeln!(out, "Only in table 2: {}", self.only_in_table2.len());
        let _ = writeln!(out, "Identical rows: {}", self.identical_rows);
        let _ = writeln!(out, "Rows with differences: {}\n", self.rows_with_differences());

        if !self.differences.is_empty() {
            out.push_str("DETAILED DIFFERENCES:\n");
            out.push_str(&"-".repeat(30));
            out.push('\n');
            for row in &self.differences {
                write_row(&mut out, row);
            }
        }

        if !self.only_in_table1.is_empty() {
            let _ = writeln!(out, "\nSubmitter IDs only in table 1:\n{:?}", self.only_in_table1);
        }
        if !self.only_in_table2.is_empty() {
            let _ = writeln!(out, "\nSubmitter IDs only in table 2:\n{:?}", self.only_in_table2);
        }

        out
    }

    /// Write the plain-text report to a file
    pub fn write_report<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.render_report())
            .with_context(|| format!("Failed to write comparison report: {:?}", path))?;
        info!("Comparison report saved to {:?}", path);
        Ok(())
    }
}

fn write_row(out: &mut String, row: &crate::compare::RowDifference) {
    let _ = writeln!(out, "\nSubmitter ID: {}", row.submitter_id);
    for diff in &row.differences {
        let _ = writeln!(out, "  Column '{}':", diff.column);
        let _ = writeln!(out, "    Table 1: '{}'", diff.table1_value);
        let _ = writeln!(out, "    Table 2: '{}'", diff.table2_value);
    }
}

fn preview(ids: &[String]) -> &[String] {
    &ids[..ids.len().min(CONSOLE_PREVIEW)]
}

#[cfg(test)]
mod tests {
    use crate::compare::{ColumnDifference, ComparisonResult, RowDifference};

    fn result() -> ComparisonResult {
        ComparisonResult {
            total_table1: 3,
            total_table2: 2,
            total_common: 2,
            only_in_table1: vec!["P3".into()],
            only_in_table2: vec![],
            differences: vec![RowDifference {
                submitter_id: "P2".into(),
                differences: vec![ColumnDifference {
                    column: "race".into(),
                    table1_value: "asian".into(),
                    table2_value: "black".into(),
                }],
            }],
            identical_rows: 1,
        }
    }

    #[test]
    fn test_render_report() {
        let report = result().render_report();

        assert!(report.starts_with("TSV COMPARISON RESULTS\n"));
        assert!(report.contains("Common submitter_ids: 2\n"));
        assert!(report.contains("Rows with differences: 1\n"));
        assert!(report.contains("Submitter ID: P2\n  Column 'race':\n    Table 1: 'asian'\n    Table 2: 'black'\n"));
        assert!(report.contains("Submitter IDs only in table 1:\n[\"P3\"]"));
        assert!(!report.contains("only in table 2:\n"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comparison_results.txt");
        result().write_report(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, result().render_report());
    }
}
