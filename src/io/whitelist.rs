//! Whitelist file reader
//!
//! One plate per line. Lines are truncated to the plate width; blank lines are
//! skipped and repeated plates are kept once.

use crate::domain::types::Plate;
use anyhow::Context;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Parse plates from any line-oriented reader
pub fn parse_plates<R: BufRead>(reader: R) -> std::io::Result<Vec<Plate>> {
    let mut plates: Vec<Plate> = Vec::new();
    let mut seen: HashSet<Plate> = HashSet::new();
    for line in reader.split(b'\n') {
        let line = line?;
        let line = line.strip_suffix(b"\r").unwrap_or(&line);
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let plate = Plate::from_bytes(line);
        if !seen.insert(plate) {
            debug!(plate = %plate, "whitelist_duplicate_skipped");
            continue;
        }
        plates.push(plate);
    }
    Ok(plates)
}

/// Load the whitelist file
pub fn load_whitelist<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Plate>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open whitelist {}", path.display()))?;
    let plates = parse_plates(BufReader::new(file))
        .with_context(|| format!("Failed to read whitelist {}", path.display()))?;
    info!(path = %path.display(), plates = plates.len(), "whitelist_loaded");
    Ok(plates)
}
