//! CSV projections of the collected usage artifact.
//!
//! Both projections are regenerated wholesale from the parsed artifact:
//! a flat dump with one row per quota entry, and a transposed table with
//! one row per poll cycle and the tracked metrics as columns.

use crate::models::UsageEntry;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FLAT_FILE: &str = "output.csv";
const TRANSPOSED_FILE: &str = "output_transposed.csv";

/// Quota metrics carried into the transposed table, keyed by their
/// `name.value` so upstream reordering cannot mislabel a column.
const TRANSPOSED_METRICS: [&str; 6] = [
    "ContainerGroups",
    "StandardCores",
    "StandardK80Cores",
    "StandardP100Cores",
    "StandardV100Cores",
    "DedicatedContainerGroups",
];

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("usage artifact is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("poll cycle {cycle} is missing the {metric} metric")]
    MissingMetric { cycle: usize, metric: &'static str },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Materialize both CSV projections next to the artifact.
pub fn convert(output_dir: &Path, raw: &str) -> Result<(), ConvertError> {
    let cycles: Vec<Vec<UsageEntry>> = serde_json::from_str(raw)?;

    tracing::info!("Transforming JSON to CSV data");
    write_flat_csv(&output_dir.join(FLAT_FILE), &cycles)?;

    tracing::info!("Transposing usage counts into metric columns");
    write_transposed_csv(&output_dir.join(TRANSPOSED_FILE), &cycles)?;

    Ok(())
}

/// Flat projection: one row per entry, in artifact order. The header is
/// always written, even for an empty artifact.
fn write_flat_csv(path: &Path, cycles: &[Vec<UsageEntry>]) -> Result<(), ConvertError> {
    let mut out = String::from("id,unit,currentValue,limit,name.value,name.localizedValue\n");

    for cycle in cycles {
        for entry in cycle {
            let row = [
                csv_field(&entry.id),
                csv_field(&entry.unit),
                entry.current_value.to_string(),
                entry.limit.to_string(),
                csv_field(&entry.name.value),
                csv_field(&entry.name.localized_value),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
    }

    write_file(path, &out)
}

/// Transposed projection: one row per poll cycle, one column per tracked
/// metric. A cycle missing a metric is a data-quality error, reported
/// with the offending cycle rather than mislabeled or skipped.
fn write_transposed_csv(path: &Path, cycles: &[Vec<UsageEntry>]) -> Result<(), ConvertError> {
    let mut out = TRANSPOSED_METRICS.join(",");
    out.push('\n');

    for (cycle, entries) in cycles.iter().enumerate() {
        let mut row = Vec::with_capacity(TRANSPOSED_METRICS.len());

        for metric in TRANSPOSED_METRICS {
            let entry = entries
                .iter()
                .find(|e| e.name.value == metric)
                .ok_or(ConvertError::MissingMetric { cycle, metric })?;
            row.push(entry.current_value.to_string());
        }

        out.push_str(&row.join(","));
        out.push('\n');
    }

    write_file(path, &out)
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConvertError> {
    fs::write(path, contents).map_err(|source| ConvertError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Quote a field only when it carries a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Gate shown on the interrupted path before any conversion work.
/// Re-prompts until an answer is given; end of input counts as declining.
pub fn confirm_conversion(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    loop {
        write!(output, "Convert collected JSON to CSV data? (y or n): ")?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }

        match answer.trim().to_lowercase().as_str() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn entry_json(name: &str, current: i64) -> String {
        format!(
            "{{\"id\":\"/subscriptions/sub/providers/Microsoft.ContainerInstance/usages/{name}\",\
             \"unit\":\"Count\",\"currentValue\":{current},\"limit\":100,\
             \"name\":{{\"value\":\"{name}\",\"localizedValue\":\"{name} localized\"}}}}"
        )
    }

    fn full_cycle_json(base: i64) -> String {
        let entries: Vec<String> = TRANSPOSED_METRICS
            .iter()
            .enumerate()
            .map(|(i, name)| entry_json(name, base + i as i64))
            .collect();
        format!("[{}]", entries.join(","))
    }

    #[test]
    fn test_convert_produces_both_projections() {
        let dir = tempdir().expect("tempdir");
        let raw = format!("[{},\n{}]", full_cycle_json(0), full_cycle_json(10));

        convert(dir.path(), &raw).expect("convert");

        let flat = fs::read_to_string(dir.path().join(FLAT_FILE)).expect("read");
        let lines: Vec<&str> = flat.lines().collect();
        assert_eq!(
            lines[0],
            "id,unit,currentValue,limit,name.value,name.localizedValue"
        );
        // Two cycles of six entries: header plus twelve data rows.
        assert_eq!(lines.len(), 13);
        assert!(lines[1].ends_with("Count,0,100,ContainerGroups,ContainerGroups localized"));

        let transposed =
            fs::read_to_string(dir.path().join(TRANSPOSED_FILE)).expect("read");
        let lines: Vec<&str> = transposed.lines().collect();
        assert_eq!(lines[0], TRANSPOSED_METRICS.join(","));
        assert_eq!(lines[1], "0,1,2,3,4,5");
        assert_eq!(lines[2], "10,11,12,13,14,15");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_empty_artifact_yields_header_only_csvs() {
        let dir = tempdir().expect("tempdir");

        convert(dir.path(), "[]").expect("convert");

        let flat = fs::read_to_string(dir.path().join(FLAT_FILE)).expect("read");
        assert_eq!(
            flat,
            "id,unit,currentValue,limit,name.value,name.localizedValue\n"
        );

        let transposed =
            fs::read_to_string(dir.path().join(TRANSPOSED_FILE)).expect("read");
        assert_eq!(transposed, format!("{}\n", TRANSPOSED_METRICS.join(",")));
    }

    #[test]
    fn test_reordered_entries_still_land_in_named_columns() {
        let dir = tempdir().expect("tempdir");
        let entries: Vec<String> = TRANSPOSED_METRICS
            .iter()
            .enumerate()
            .rev()
            .map(|(i, name)| entry_json(name, i as i64))
            .collect();
        let raw = format!("[[{}]]", entries.join(","));

        convert(dir.path(), &raw).expect("convert");

        let transposed =
            fs::read_to_string(dir.path().join(TRANSPOSED_FILE)).expect("read");
        assert_eq!(transposed.lines().nth(1), Some("0,1,2,3,4,5"));
    }

    #[test]
    fn test_missing_metric_is_reported_with_cycle() {
        let dir = tempdir().expect("tempdir");
        let raw = format!(
            "[{},\n[{}]]",
            full_cycle_json(0),
            entry_json("ContainerGroups", 1)
        );

        let err = convert(dir.path(), &raw).expect_err("short cycle must fail");
        match err {
            ConvertError::MissingMetric { cycle, metric } => {
                assert_eq!(cycle, 1);
                assert_eq!(metric, "StandardCores");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_artifact_fails_to_parse() {
        let dir = tempdir().expect("tempdir");
        let raw = "[[{\"id\":\"x\",\"unit\":\"Count\"";

        assert!(matches!(
            convert(dir.path(), raw),
            Err(ConvertError::Parse(_))
        ));
    }

    #[test]
    fn test_csv_field_quotes_only_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_confirm_accepts_case_insensitive_answers() {
        let mut out = Vec::new();
        assert!(confirm_conversion(&mut Cursor::new("Y\n"), &mut out).expect("confirm"));
        assert!(!confirm_conversion(&mut Cursor::new("N\n"), &mut out).expect("confirm"));
        assert!(confirm_conversion(&mut Cursor::new("y\n"), &mut out).expect("confirm"));
    }

    #[test]
    fn test_confirm_reprompts_until_answered() {
        let mut out = Vec::new();
        let confirmed =
            confirm_conversion(&mut Cursor::new("maybe\n\nyes\ny\n"), &mut out).expect("confirm");

        assert!(confirmed);
        let prompts = String::from_utf8(out).expect("utf8");
        assert_eq!(
            prompts.matches("Convert collected JSON to CSV data?").count(),
            4
        );
    }

    #[test]
    fn test_confirm_treats_eof_as_decline() {
        let mut out = Vec::new();
        assert!(!confirm_conversion(&mut Cursor::new(""), &mut out).expect("confirm"));
    }
}
