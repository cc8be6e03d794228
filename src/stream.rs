//! Append-only JSON artifact for the polling loop.
//!
//! The artifact is a single top-level array holding one element per poll
//! cycle. While the loop runs the closing bracket is withheld so each
//! cycle is a plain append; an interrupted run therefore leaves the file
//! one bracket short, which [`repair`] closes before conversion.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("usage artifact i/o failed at {}: {source}", path.display())]
pub struct StreamError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl StreamError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Writer holding the artifact open for the duration of one run.
pub struct StreamWriter {
    file: File,
    path: PathBuf,
    elements: usize,
}

impl StreamWriter {
    /// Create the artifact and emit the opening bracket.
    pub fn create(path: &Path) -> Result<Self, StreamError> {
        let mut file = File::create(path).map_err(|e| StreamError::new(path, e))?;
        file.write_all(b"[").map_err(|e| StreamError::new(path, e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            elements: 0,
        })
    }

    /// Append one cycle's payload as the next array element.
    ///
    /// The separator is keyed off elements already written, not cycles
    /// run, so a cycle that skipped its write cannot leave a dangling
    /// comma behind.
    pub fn append(&mut self, raw: &str) -> Result<(), StreamError> {
        if self.elements > 0 {
            self.file
                .write_all(b",\n")
                .map_err(|e| StreamError::new(&self.path, e))?;
        }

        self.file
            .write_all(raw.as_bytes())
            .map_err(|e| StreamError::new(&self.path, e))?;
        self.elements += 1;

        Ok(())
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    /// Close the outer array; the artifact is valid JSON from here on.
    pub fn close(mut self) -> Result<(), StreamError> {
        self.file
            .write_all(b"]")
            .map_err(|e| StreamError::new(&self.path, e))
    }
}

/// Close an artifact that an interrupted run left a bracket short.
///
/// Only between-cycles truncation is recoverable here: the last inner
/// array closed but the outer one did not. Anything worse surfaces later
/// as a parse error, with the raw file left in place for inspection.
/// Returns the artifact contents with the same fix applied in memory.
pub fn repair(path: &Path) -> Result<String, StreamError> {
    let mut contents = fs::read_to_string(path).map_err(|e| StreamError::new(path, e))?;

    if !contents.ends_with("]]") {
        tracing::info!("Collected JSON does not appear complete, correcting the file");

        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| StreamError::new(path, e))?;
        file.write_all(b"]").map_err(|e| StreamError::new(path, e))?;
        contents.push(']');
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_run_closes_to_empty_array() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output.json");

        let writer = StreamWriter::create(&path).expect("create");
        writer.close().expect("close");

        assert_eq!(fs::read_to_string(&path).expect("read"), "[]");
    }

    #[test]
    fn test_appends_are_separated_and_close_yields_valid_json() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output.json");

        let mut writer = StreamWriter::create(&path).expect("create");
        writer.append("[1,2]").expect("append");
        writer.append("[3]").expect("append");
        assert_eq!(writer.elements(), 2);
        writer.close().expect("close");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "[[1,2],\n[3]]");

        let parsed: Vec<Vec<i64>> = serde_json::from_str(&contents).expect("parse");
        assert_eq!(parsed, vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_repair_closes_interrupted_artifact() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output.json");

        let mut writer = StreamWriter::create(&path).expect("create");
        writer.append("[1,2]").expect("append");
        drop(writer);

        let repaired = repair(&path).expect("repair");
        assert_eq!(repaired, "[[1,2]]");
        assert_eq!(fs::read_to_string(&path).expect("read"), "[[1,2]]");

        let parsed: Vec<Vec<i64>> = serde_json::from_str(&repaired).expect("parse");
        assert_eq!(parsed, vec![vec![1, 2]]);
    }

    #[test]
    fn test_repair_closes_empty_interrupted_artifact() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output.json");

        let writer = StreamWriter::create(&path).expect("create");
        drop(writer);

        let repaired = repair(&path).expect("repair");
        assert_eq!(repaired, "[]");
    }

    #[test]
    fn test_repair_leaves_valid_artifact_untouched() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output.json");

        let mut writer = StreamWriter::create(&path).expect("create");
        writer.append("[1]").expect("append");
        writer.close().expect("close");
        let before = fs::read(&path).expect("read");

        let repaired = repair(&path).expect("repair");
        assert_eq!(repaired.as_bytes(), before.as_slice());
        assert_eq!(fs::read(&path).expect("read"), before);
    }
}
