use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Append one NDJSON line to `path` and force it to stable storage before returning.
///
/// The parent directory is created on demand. The call only returns `Ok` once
/// `sync_data` has completed, so a record acknowledged here survives a crash.
pub fn append_line_durable(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    file.sync_data()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}

/// Reads every non-blank line of `path`, returning `(line_number, line)` pairs.
///
/// A missing file yields an empty list.
pub fn read_nonblank_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| (index + 1, line.to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{append_line_durable, read_nonblank_lines};

    #[test]
    fn unit_append_line_durable_creates_parent_and_appends_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("journal.jsonl");

        append_line_durable(path.as_path(), r#"{"seq":1}"#).expect("append first");
        append_line_durable(path.as_path(), r#"{"seq":2}"#).expect("append second");

        let lines = read_nonblank_lines(path.as_path()).expect("read lines");
        assert_eq!(
            lines,
            vec![
                (1, r#"{"seq":1}"#.to_string()),
                (2, r#"{"seq":2}"#.to_string())
            ]
        );
    }

    #[test]
    fn unit_read_nonblank_lines_skips_blank_lines_and_keeps_line_numbers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journal.jsonl");
        std::fs::write(&path, "{\"a\":1}\n\n   \n{\"b\":2}\n").expect("seed file");

        let lines = read_nonblank_lines(path.as_path()).expect("read lines");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].0, 4);
    }

    #[test]
    fn regression_read_nonblank_lines_missing_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lines = read_nonblank_lines(&temp.path().join("absent.jsonl")).expect("read");
        assert!(lines.is_empty());
    }
}
