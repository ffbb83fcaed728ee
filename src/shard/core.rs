use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use thiserror::Error;

use crate::common::io_error_msg;

use super::pool::Semaphore;
use super::source::{ByteSource, open_source};

/// Lookback window searched backward for the nearest line terminator
/// when snapping an ideal cut point to a line boundary.
pub const LOOKBACK_WINDOW: u64 = 4096;

/// Upper bound on the leading-line skip scan. A skip request that needs
/// more terminators than fit in this buffer fails; it is never extended.
pub const SKIP_SCAN_LIMIT: usize = 64 * 1024;

/// Output buffer per chunk writer, sized to amortize write syscalls.
const WRITE_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Fatal errors that abort a run before any extraction work begins.
/// Per-chunk write failures are deliberately not here: they are local
/// to one chunk and reported without stopping siblings.
#[derive(Debug, Error)]
pub enum ShardError {
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

    #[error("no line terminator in the {window} bytes before offset {at}; chunk size too small for these line lengths")]
    NoBoundary { at: u64, window: u64 },

    #[error("read failed at offset {at}: {source}")]
    Read {
        at: u64,
        #[source]
        source: io::Error,
    },

    #[error("cannot skip {requested} lines: only {found} line terminators in the first {limit} bytes")]
    InsufficientData {
        requested: u64,
        found: u64,
        limit: usize,
    },
}

/// One planned contiguous byte range of the source, destined to become
/// one output chunk. Half-open: `end` is one past the last byte, and the
/// line terminator that closes the chunk is the chunk's own last byte,
/// so consecutive sections tile `[0, file_size)` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub start: u64,
    pub end: u64,
}

impl Section {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How section boundaries are derived.
#[derive(Debug, Clone, Copy)]
pub enum PlanMode {
    /// Each section is approximately this many bytes.
    BySize(u64),
    /// Approximately this many sections overall.
    ByCount(u64),
}

/// Configuration for one chunking run. Everything the planner and the
/// pipeline need is passed in here; no process-wide state survives a run.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub mode: PlanMode,
    /// Leading lines dropped from the first chunk.
    pub skip_lines: u64,
    /// Concurrent chunk writers; 0 means all available cores.
    pub workers: usize,
    /// Output filename prefix.
    pub prefix: String,
    /// Memory-map the source (plain positional reads otherwise).
    pub mapped: bool,
    pub verbose: bool,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            mode: PlanMode::BySize(1 << 30),
            skip_lines: 0,
            workers: 0,
            prefix: "part".to_string(),
            mapped: true,
            verbose: false,
        }
    }
}

/// Outcome of a run. Chunk write failures are counted, not propagated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardSummary {
    /// Sections the planner produced.
    pub planned: usize,
    /// Chunks fully written and flushed.
    pub written: usize,
    /// Chunks whose write failed (reported on stderr).
    pub failed: usize,
    /// Sections never submitted because the permit pool closed early.
    pub skipped: usize,
    /// Highest number of copies in flight at once.
    pub peak_workers: usize,
}

/// Fill `buf` from `source` starting at `offset`, retrying short reads.
/// Returns the number of bytes actually available there.
fn read_full_at(source: &dyn ByteSource, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = source.read_at(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Plan sections of approximately `target` bytes, each snapped so its
/// last byte is a line terminator (except possibly the final section,
/// which may end at end-of-file without one).
///
/// Each pass computes the ideal cut `offset + target`, reads the
/// `min(4096, target)` bytes preceding it, and cuts one past the last
/// terminator found there. A window with no terminator is an error:
/// silently splitting mid-line would corrupt a record. A truncated
/// window read near end-of-file is searched as far as it goes, never
/// treated as a boundary by itself.
pub fn plan_by_size(source: &dyn ByteSource, target: u64) -> Result<Vec<Section>, ShardError> {
    let len = source.len();
    if len == 0 {
        return Ok(Vec::new());
    }
    let target = target.max(1);
    if target >= len {
        return Ok(vec![Section { start: 0, end: len }]);
    }

    let window = target.min(LOOKBACK_WINDOW);
    let mut buf = vec![0u8; window as usize];
    let mut sections = Vec::with_capacity((len / target) as usize + 1);
    let mut offset = 0u64;

    while offset < len {
        let ideal = offset + target;
        if ideal >= len {
            sections.push(Section {
                start: offset,
                end: len,
            });
            break;
        }

        let window_start = ideal - window;
        let got = read_full_at(source, &mut buf, window_start).map_err(|e| ShardError::Read {
            at: window_start,
            source: e,
        })?;
        let cut = match memchr::memrchr(b'\n', &buf[..got]) {
            Some(pos) => window_start + pos as u64 + 1,
            None => {
                return Err(ShardError::NoBoundary {
                    at: ideal,
                    window,
                });
            }
        };

        sections.push(Section {
            start: offset,
            end: cut,
        });
        offset = cut;
    }

    Ok(sections)
}

/// Plan approximately `count` sections. The per-section target is padded
/// by one lookback window so the backward snap lands the totals near the
/// requested count; the actual number varies with line-length variance.
pub fn plan_by_count(source: &dyn ByteSource, count: u64) -> Result<Vec<Section>, ShardError> {
    let count = count.max(1);
    let target = source.len() / count + LOOKBACK_WINDOW;
    plan_by_size(source, target)
}

/// Bounded sequential reader over exactly one section of a source.
///
/// Reads are forwarded to the source at a private cursor which advances
/// by the bytes actually returned, so short reads resume correctly.
/// End-of-stream is reported exactly at the section boundary.
pub struct SegmentReader<'a> {
    source: &'a dyn ByteSource,
    offset: u64,
    remaining: u64,
}

impl<'a> SegmentReader<'a> {
    pub fn new(source: &'a dyn ByteSource, section: Section) -> Self {
        Self {
            source,
            offset: section.start,
            remaining: section.len(),
        }
    }
}

impl Read for SegmentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.source.read_at(&mut buf[..want], self.offset)?;
        if n == 0 {
            // The source ended before the section did.
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source truncated at offset {}", self.offset),
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Return the offset one past the `count`-th line terminator, scanning a
/// single bounded read from the start of the source. The scan buffer is
/// a hard limit: requests denser than its terminator content fail.
pub fn skip_lines(source: &dyn ByteSource, count: u64) -> Result<u64, ShardError> {
    if count == 0 {
        return Ok(0);
    }
    let scan = (source.len()).min(SKIP_SCAN_LIMIT as u64) as usize;
    let mut buf = vec![0u8; scan];
    let got = read_full_at(source, &mut buf, 0).map_err(|e| ShardError::Read {
        at: 0,
        source: e,
    })?;

    let mut found = 0u64;
    for pos in memchr::memchr_iter(b'\n', &buf[..got]) {
        found += 1;
        if found == count {
            return Ok(pos as u64 + 1);
        }
    }
    Err(ShardError::InsufficientData {
        requested: count,
        found,
        limit: SKIP_SCAN_LIMIT,
    })
}

/// Source file extension including the leading dot (e.g. ".csv"),
/// empty when there is none. Preserved verbatim on every chunk.
/// Everything from the file name's last dot counts, so a dotfile like
/// ".env" keeps its full suffix.
pub fn source_ext(path: &Path) -> String {
    let Some(name) = path.file_name() else {
        return String::new();
    };
    let name = name.to_string_lossy();
    match name.rfind('.') {
        Some(i) => name[i..].to_string(),
        None => String::new(),
    }
}

/// Deterministic chunk filename: position in planning order plus the
/// section's byte offsets, so chunks are independently addressable
/// regardless of completion order.
pub fn chunk_file_name(prefix: &str, index: usize, section: Section, ext: &str) -> String {
    format!(
        "{}-{:04}-{:012}-{:012}{}",
        prefix, index, section.start, section.end, ext
    )
}

/// Stream one section into a freshly created output file through a large
/// write buffer, then flush.
fn carve(source: &dyn ByteSource, section: Section, path: &Path) -> io::Result<()> {
    let mut reader = SegmentReader::new(source, section);
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(WRITE_BUF_SIZE.min(section.len() as usize + 1), file);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()
}

/// Copy every section to its own file under `dest`, at most `pool`-many
/// at a time.
///
/// Sections are submitted in ascending order; each submission blocks on
/// a permit, then the copy runs on its own scoped thread and releases
/// the permit when done. The scope join is the completion barrier: only
/// work actually spawned is waited on, so closing the pool mid-run stops
/// further submissions without deadlocking, and copies already in flight
/// run to completion. A failed copy is reported and counted, never fatal
/// to its siblings.
pub fn extract_sections(
    source: &dyn ByteSource,
    dest: &Path,
    ext: &str,
    sections: &[Section],
    pool: &Semaphore,
    prefix: &str,
    verbose: bool,
) -> ShardSummary {
    let failed = AtomicUsize::new(0);
    let mut submitted = 0usize;

    thread::scope(|scope| {
        for (index, &section) in sections.iter().enumerate() {
            let permit = match pool.acquire() {
                Ok(p) => p,
                Err(e) => {
                    eprintln!(
                        "fshard: stopping submission at chunk {} of {}: {}",
                        index,
                        sections.len(),
                        e
                    );
                    break;
                }
            };
            let path = dest.join(chunk_file_name(prefix, index, section, ext));
            if verbose {
                eprintln!(
                    "creating file '{}' ({} bytes)",
                    path.display(),
                    section.len()
                );
            }
            submitted += 1;
            let failed = &failed;
            scope.spawn(move || {
                if let Err(e) = carve(source, section, &path) {
                    eprintln!(
                        "fshard: cannot write '{}': {}",
                        path.display(),
                        io_error_msg(&e)
                    );
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                drop(permit);
            });
        }
    });

    let failed = failed.load(Ordering::Relaxed);
    ShardSummary {
        planned: sections.len(),
        written: submitted - failed,
        failed,
        skipped: sections.len() - submitted,
        peak_workers: pool.peak_in_flight(),
    }
}

/// Split `input` into line-aligned chunk files under `dest`.
///
/// Planning and setup errors abort before any chunk is written;
/// individual chunk write failures are reported and reflected in the
/// returned summary without stopping the rest of the batch.
pub fn shard_file(
    input: &Path,
    dest: &Path,
    config: &ShardConfig,
) -> Result<ShardSummary, ShardError> {
    let source = open_source(input, config.mapped).map_err(|e| ShardError::Open {
        path: input.to_path_buf(),
        source: e,
    })?;

    fs::create_dir_all(dest).map_err(|e| ShardError::DirectoryCreation {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut sections = match config.mode {
        PlanMode::BySize(size) => plan_by_size(&*source, size)?,
        PlanMode::ByCount(count) => plan_by_count(&*source, count)?,
    };

    if config.skip_lines > 0 {
        let skip_to = skip_lines(&*source, config.skip_lines)?;
        if let Some(first) = sections.first_mut() {
            // A skip that swallows the whole first section leaves it empty
            // rather than inverted.
            first.start = skip_to.min(first.end);
        }
    }

    if config.verbose {
        for (i, s) in sections.iter().enumerate() {
            eprintln!("section {:04}: {:012}..{:012} ({} bytes)", i, s.start, s.end, s.len());
        }
    }

    let workers = if config.workers > 0 {
        config.workers
    } else {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    };
    if config.verbose {
        eprintln!(
            "extracting {} sections with {} workers",
            sections.len(),
            workers
        );
    }

    let pool = Semaphore::new(workers);
    let ext = source_ext(input);
    let summary = extract_sections(
        &*source,
        dest,
        &ext,
        &sections,
        &pool,
        &config.prefix,
        config.verbose,
    );
    if config.verbose {
        eprintln!(
            "done: {} written, {} failed (peak {} in flight)",
            summary.written, summary.failed, summary.peak_workers
        );
    }
    Ok(summary)
}

/// Parse a SIZE string with an optional unit suffix.
/// K/M/G/T are powers of 1024; KB/MB/GB/TB are powers of 1000;
/// KiB/MiB/GiB/TiB are accepted as aliases for the 1024 forms.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let num_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if num_end == 0 {
        return Err(format!("invalid size: '{}'", s));
    }
    let num: u64 = s[..num_end]
        .parse()
        .map_err(|_| format!("invalid size: '{}'", s))?;
    let multiplier: u64 = match &s[num_end..] {
        "" => 1,
        "K" | "KiB" => 1 << 10,
        "M" | "MiB" => 1 << 20,
        "G" | "GiB" => 1 << 30,
        "T" | "TiB" => 1 << 40,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        _ => return Err(format!("invalid suffix in '{}'", s)),
    };
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: '{}'", s))
}
