//! Revenue ledger - appends one line per billed car
//!
//! Lines are `<plate> $<dollars>.<cents>`. The file is created if absent and
//! never truncated. The running total is advisory and lives with the ledger.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{Cents, Plate};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only ledger writer
pub struct RevenueLedger {
    file_path: PathBuf,
    /// Serializes appends across billing workers and holds the running total
    total: Mutex<Cents>,
}

impl RevenueLedger {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "ledger_initialized");
        Self { file_path, total: Mutex::new(Cents(0)) }
    }

    /// Append a bill and add it to the running total
    ///
    /// The total only moves when the line was written.
    pub fn record(&self, plate: Plate, fare: Cents) -> Result<Cents> {
        let mut total = self.total.lock();
        self.append_line(&format_line(plate, fare))
            .map_err(|source| ParkingError::LedgerWriteFailure { plate, source })?;
        *total += fare;
        Ok(*total)
    }

    /// Running revenue total
    pub fn total(&self) -> Cents {
        *self.total.lock()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = self.file_path.as_path();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %path.display(), bytes = %line.len(), "ledger_written");
        Ok(())
    }
}

/// Ledger line for one bill (without trailing newline)
pub fn format_line(plate: Plate, fare: Cents) -> String {
    format!("{} {}", plate, fare)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_format_line() {
        assert_eq!(format_line(Plate::new("029MZH"), Cents(12345)), "029MZH $123.45");
        assert_eq!(format_line(Plate::new("029MZH"), Cents(7)), "029MZH $0.07");
    }

    #[test]
    fn test_record_appends_and_totals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("billing.txt");
        let ledger = RevenueLedger::new(&path);

        ledger.record(Plate::new("029MZH"), Cents(150)).unwrap();
        let total = ledger.record(Plate::new("111AAA"), Cents(250)).unwrap();
        assert_eq!(total, Cents(400));
        assert_eq!(ledger.total(), Cents(400));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "029MZH $1.50\n111AAA $2.50\n");
    }

    #[test]
    fn test_never_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("billing.txt");
        fs::write(&path, "OLD001 $9.99\n").unwrap();

        let ledger = RevenueLedger::new(&path);
        ledger.record(Plate::new("029MZH"), Cents(5)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("OLD001 $9.99\n"));
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("billing.txt");
        let ledger = RevenueLedger::new(&path);
        ledger.record(Plate::new("029MZH"), Cents(5)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_failure_leaves_total_unchanged() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for append
        let ledger = RevenueLedger::new(dir.path());
        let err = ledger.record(Plate::new("029MZH"), Cents(5)).unwrap_err();
        assert!(matches!(err, ParkingError::LedgerWriteFailure { .. }));
        assert_eq!(ledger.total(), Cents(0));
    }
}
