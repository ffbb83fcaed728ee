use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

/// Random-access byte source shared read-only across chunk workers.
///
/// Reads at arbitrary offsets may be issued concurrently from multiple
/// threads without coordination; implementations never mutate the
/// underlying bytes.
pub trait ByteSource: Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Read into `buf` starting at `offset`, returning the number of bytes
    /// actually read. Reads past the end return fewer bytes (or zero).
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whole-file memory mapping, the default source for regular files.
pub struct MappedSource {
    map: Mmap,
}

impl MappedSource {
    /// Map `path` read-only. Fails for empty files (the OS rejects
    /// zero-length mappings); callers fall back to [`FileSource`].
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: read-only mapping of a file we just opened.
        let map = unsafe { MmapOptions::new().map(&file) }?;
        #[cfg(target_os = "linux")]
        {
            // Workers fault pages from disjoint ranges at once, so readahead
            // hints help more than strict-sequential would.
            let _ = map.advise(memmap2::Advice::WillNeed);
            if map.len() >= 2 * 1024 * 1024 {
                let _ = map.advise(memmap2::Advice::HugePage);
            }
        }
        Ok(Self { map })
    }
}

impl ByteSource for MappedSource {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(copy_at(&self.map, buf, offset))
    }
}

/// Plain file handle using positional reads; selected with `--no-mmap`
/// and for empty files.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_RANDOM);
            }
        }
        Ok(Self { file, len })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(not(unix))]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }
}

/// In-memory source; used by tests and embedding callers that already
/// hold the data. The impl lives on `&[u8]` so a borrowed slice can be
/// handed to the `&dyn ByteSource` entry points directly.
impl ByteSource for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(copy_at(self, buf, offset))
    }
}

fn copy_at(data: &[u8], buf: &mut [u8], offset: u64) -> usize {
    if offset >= data.len() as u64 {
        return 0;
    }
    let start = offset as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

/// Open `path` as a [`ByteSource`], mapped when `mapped` is set.
/// Empty files always use the plain-file path: a zero-length mmap fails.
pub fn open_source(path: &Path, mapped: bool) -> io::Result<Box<dyn ByteSource>> {
    if mapped {
        let len = std::fs::metadata(path)?.len();
        if len > 0 {
            return Ok(Box::new(MappedSource::open(path)?));
        }
    }
    Ok(Box::new(FileSource::open(path)?))
}
