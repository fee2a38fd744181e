//!
//! src/sink.rs
//!
//! Writes zstd compressed json snapshots of short-term tables into a dated
//! archive tree: {root}/YYYY/MM/DD/{table}.json.zst
//!

use std::{fs, path::{Path, PathBuf}};

use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use tracing::debug;

use crate::errors::CrawlerError;

pub struct ArchiveSink {
    root: PathBuf,
    level: i32
}

impl ArchiveSink {
    pub fn new(root: impl AsRef<Path>, level: i32) -> Self {
        Self { root: root.as_ref().to_path_buf(), level: level.clamp(0, 21) }
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    /// Writes atomically: the file only appears once fully compressed.
    pub fn write_table(&self, date: NaiveDate, table: &str, rows: &Value) ->
        Result<PathBuf, CrawlerError> {

        let dir = self.day_dir(date);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json.zst", Self::sanitize_key(table)));

        let temp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut enc = zstd::stream::write::Encoder::new(temp.as_file(), self.level)?;
            serde_json::to_writer(&mut enc, rows)?;
            enc.finish()?;
        }
        temp.persist(&path).map_err(|e| e.error)?;

        debug!(path = %path.display(), "archive.write");
        Ok(path)
    }

    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_dated_compressed_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ArchiveSink::new(dir.path(), 3);
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let rows = json!([{"id": "abc", "name": "Water"}]);

        let path = sink.write_table(date, "track", &rows).unwrap();
        assert_eq!(path, dir.path().join("2024/03/07/track.json.zst"));

        let bytes = fs::read(&path).unwrap();
        let decoded: Value = serde_json::from_slice(&zstd::decode_all(&bytes[..]).unwrap()).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn table_names_are_sanitized_and_level_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ArchiveSink::new(dir.path(), 99);
        assert_eq!(sink.level, 21);
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let path = sink.write_table(date, "../escape", &json!([])).unwrap();
        assert_eq!(path.file_name().unwrap(), "___escape.json.zst");
        assert!(path.starts_with(dir.path()));
    }
}
