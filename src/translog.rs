//! JSONL audit log of completed uploads
//!
//! One line per finished `/store`, appended to `.fex_transfers.jsonl` in the
//! storage root. Best effort: a failed append is logged and never reported
//! to the client.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = ".fex_transfers.jsonl";

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadLogEntry {
    pub timestamp: String,
    pub handle: String,
    pub filename: String,
    pub bytes: u64,
}

pub struct UploadLog {
    log_file_path: PathBuf,
}

impl UploadLog {
    pub fn new(storage_root: &Path) -> Self {
        UploadLog {
            log_file_path: storage_root.join(LOG_FILE),
        }
    }

    pub fn record(&self, handle: &str, filename: &str, bytes: u64) -> Result<()> {
        let entry = UploadLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            handle: handle.to_string(),
            filename: filename.to_string(),
            bytes,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open upload log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<UploadLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path).context("Failed to open upload log for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_append_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let log = UploadLog::new(tmp.path());

        log.record("alice", "notes.txt", 12).unwrap();
        log.record("bob", "image.bin", 4096).unwrap();

        let entries = log.read_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].handle, "alice");
        assert_eq!(entries[0].filename, "notes.txt");
        assert_eq!(entries[0].bytes, 12);
        assert_eq!(entries[1].handle, "bob");
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let log = UploadLog::new(tmp.path());
        assert!(log.read_log().unwrap().is_empty());
    }
}
