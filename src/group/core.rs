use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Output buffer per group file.
const WRITE_BUF_SIZE: usize = 1024 * 1024;

/// Read buffer for the sequential scan.
const READ_BUF_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create directory '{path}': {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: no key field (missing ',')")]
    MissingKey { line: u64 },

    #[error("line {line}: invalid key '{key}'")]
    BadKey { line: u64, key: String },

    #[error("read failed at line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: io::Error,
    },

    #[error("cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GroupSummary {
    pub lines: u64,
    pub groups: u64,
}

/// Integer magnitude of the float in the leading comma-separated field.
fn key_of(line: &[u8], line_no: u64) -> Result<u64, GroupError> {
    let comma = memchr::memchr(b',', line).ok_or(GroupError::MissingKey { line: line_no })?;
    let field = &line[..comma];
    let text = std::str::from_utf8(field).ok().map(str::trim);
    match text.and_then(|t| t.parse::<f64>().ok()) {
        Some(v) if v.is_finite() => Ok(v.abs() as u64),
        _ => Err(GroupError::BadKey {
            line: line_no,
            key: String::from_utf8_lossy(field).into_owned(),
        }),
    }
}

/// Split a CSV file into per-key files by scanning sequentially and
/// switching output files whenever the leading key field changes value.
///
/// Each run of equal keys lands in `<dest>/group-<key:06>.csv`; a key
/// that reappears later reopens (and truncates) its file, matching the
/// sequential group-by this is meant for: input sorted by key.
pub fn group_file(input: &Path, dest: &Path) -> Result<GroupSummary, GroupError> {
    let file = File::open(input).map_err(|e| GroupError::Open {
        path: input.to_path_buf(),
        source: e,
    })?;
    fs::create_dir_all(dest).map_err(|e| GroupError::DirectoryCreation {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut reader = BufReader::with_capacity(READ_BUF_SIZE, file);
    let mut current: Option<(u64, BufWriter<File>)> = None;
    let mut summary = GroupSummary::default();
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        let line_no = summary.lines + 1;
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| GroupError::Read {
                line: line_no,
                source: e,
            })?;
        if n == 0 {
            break;
        }
        summary.lines += 1;

        let key = key_of(&line, line_no)?;
        let switch = match &current {
            Some((k, _)) => *k != key,
            None => true,
        };
        if switch {
            if let Some((k, mut w)) = current.take() {
                w.flush().map_err(|e| GroupError::Write {
                    path: group_path(dest, k),
                    source: e,
                })?;
            }
            let path = group_path(dest, key);
            let out = File::create(&path).map_err(|e| GroupError::Write {
                path: path.clone(),
                source: e,
            })?;
            current = Some((key, BufWriter::with_capacity(WRITE_BUF_SIZE, out)));
            summary.groups += 1;
        }

        let (k, writer) = current.as_mut().unwrap();
        writer.write_all(&line).map_err(|e| GroupError::Write {
            path: group_path(dest, *k),
            source: e,
        })?;
    }

    if let Some((k, mut w)) = current.take() {
        w.flush().map_err(|e| GroupError::Write {
            path: group_path(dest, k),
            source: e,
        })?;
    }
    Ok(summary)
}

/// Output path for one key run.
pub fn group_path(dest: &Path, key: u64) -> PathBuf {
    dest.join(format!("group-{:06}.csv", key))
}
