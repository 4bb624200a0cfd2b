//! Record streams for a project and period.
//!
//! The engine only consumes [`RecordSource`]; where records live is up to the
//! implementation. [`DirectorySource`] reads a local tree laid out as
//!
//! ```text
//! <root>/<project>/<YYYYMMDD>/events*.jsonl        one or more shards, read in lexical order
//! <root>/<project>/<YYYYMMDD>/channels/<ch>.jsonl  normalized ad-channel documents
//! <root>/<project>/<YYYYMMDD>/users.jsonl          profile records
//! ```
//!
//! where the date is the UTC day of the period start.

use crate::error::{Error, Result};
use crate::types::Period;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Boxed line reader handed to the engine.
pub type RecordReader = Box<dyn BufRead + Send>;

/// Supplies newline-delimited records. Events must be grouped by user and
/// time-ordered within a user.
pub trait RecordSource: Send + Sync {
    fn events(&self, project_id: i64, period: Period) -> Result<RecordReader>;

    fn channel_documents(&self, project_id: i64, period: Period, channel: &str)
        -> Result<RecordReader>;

    fn profiles(&self, project_id: i64, period: Period) -> Result<RecordReader>;
}

/// Local directory tree of JSONL files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn period_dir(&self, project_id: i64, period: Period) -> PathBuf {
        self.root
            .join(project_id.to_string())
            .join(period.date_key())
    }

    fn open(path: &Path) -> Result<RecordReader> {
        let file = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {}: {}", path.display(), e),
            ))
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    /// Event shards of a period in lexical order.
    pub fn event_shards(&self, project_id: i64, period: Period) -> Result<Vec<PathBuf>> {
        let pattern = self.period_dir(project_id, period).join("events*.jsonl");
        let pattern_str = pattern.to_string_lossy();
        let entries = glob::glob(&pattern_str)
            .map_err(|e| Error::Config(format!("invalid shard pattern {}: {}", pattern_str, e)))?;
        let mut shards: Vec<PathBuf> = entries.flatten().collect();
        shards.sort();
        Ok(shards)
    }
}

impl RecordSource for DirectorySource {
    fn events(&self, project_id: i64, period: Period) -> Result<RecordReader> {
        let shards = self.event_shards(project_id, period)?;
        if shards.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "no event shards under {}",
                    self.period_dir(project_id, period).display()
                ),
            )));
        }
        tracing::debug!(project_id, shards = shards.len(), "opening event shards");

        let mut reader: Box<dyn Read + Send> = Box::new(std::io::empty());
        for shard in shards {
            let file = File::open(&shard)?;
            // A shard without a trailing newline must not glue onto the next one.
            reader = Box::new(reader.chain(file).chain(&b"\n"[..]));
        }
        Ok(Box::new(BufReader::new(reader)))
    }

    fn channel_documents(
        &self,
        project_id: i64,
        period: Period,
        channel: &str,
    ) -> Result<RecordReader> {
        let path = self
            .period_dir(project_id, period)
            .join("channels")
            .join(format!("{}.jsonl", channel));
        Self::open(&path)
    }

    fn profiles(&self, project_id: i64, period: Period) -> Result<RecordReader> {
        Self::open(&self.period_dir(project_id, period).join("users.jsonl"))
    }
}

// ============================================
// Line scanning
// ============================================

/// Line counters of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Non-empty lines read.
    pub lines: u64,
    pub decoded: u64,
    /// Lines that failed to decode and were skipped.
    pub skipped: u64,
}

impl ScanStats {
    pub fn add(&mut self, other: ScanStats) {
        self.lines += other.lines;
        self.decoded += other.decoded;
        self.skipped += other.skipped;
    }
}

/// Decodes every line of `reader` as `T` and hands it to `f`.
///
/// Undecodable lines are counted and skipped; read errors abort the scan.
pub fn scan_jsonl<T, R, F>(reader: R, mut f: F) -> Result<ScanStats>
where
    T: DeserializeOwned,
    R: BufRead,
    F: FnMut(T),
{
    let mut stats = ScanStats::default();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;
        match serde_json::from_str::<T>(&line) {
            Ok(record) => {
                stats.decoded += 1;
                f(record);
            }
            Err(e) => {
                stats.skipped += 1;
                tracing::warn!(line = line_number + 1, error = %e, "skipping malformed record");
            }
        }
    }
    Ok(stats)
}

/// Like [`scan_jsonl`] but `f` may fail, aborting the scan.
pub fn try_scan_jsonl<T, R, F>(reader: R, mut f: F) -> Result<ScanStats>
where
    T: DeserializeOwned,
    R: BufRead,
    F: FnMut(T) -> Result<()>,
{
    let mut outcome = Ok(());
    let stats = scan_jsonl(reader, |record: T| {
        if outcome.is_ok() {
            outcome = f(record);
        }
    })?;
    outcome.map(|_| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_scan_counts_and_skips() {
        let input = concat!(
            r#"{"uid":"u1","en":"a","et":1}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"uid":"u2","en":"b","et":2}"#,
            "\n"
        );
        let mut names = Vec::new();
        let stats = scan_jsonl(Cursor::new(input), |e: Event| names.push(e.name)).unwrap();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(
            stats,
            ScanStats {
                lines: 3,
                decoded: 2,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_try_scan_stops_feeding_after_error() {
        let input = "{\"uid\":\"u1\"}\n{\"uid\":\"u2\"}\n";
        let mut seen = 0;
        let result = try_scan_jsonl(Cursor::new(input), |_: Event| {
            seen += 1;
            Err(Error::Query("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_directory_source_reads_shards_in_order() {
        let temp = TempDir::new().unwrap();
        let period = Period::new(1_714_953_600, 1_715_558_399);
        let dir = temp.path().join("42").join("20240506");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("events-b.jsonl"), "{\"uid\":\"u2\",\"en\":\"b\"}").unwrap();
        std::fs::write(dir.join("events-a.jsonl"), "{\"uid\":\"u1\",\"en\":\"a\"}\n").unwrap();

        let source = DirectorySource::new(temp.path());
        let reader = source.events(42, period).unwrap();
        let mut names = Vec::new();
        let stats = scan_jsonl(reader, |e: Event| names.push(e.name)).unwrap();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_missing_events_is_io_error() {
        let temp = TempDir::new().unwrap();
        let source = DirectorySource::new(temp.path());
        let result = source.events(1, Period::new(0, 10));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
