//! # File utilities
//!
//! Helpers for managing the directory a crash reporter writes into. These run
//! in a normal execution context (startup, cleanup between launches), so they
//! use `std::fs` and log through `tracing`.
//!
//! The one piece meant for the fault path is [`MappedFile`]: a file mapped
//! ahead of time so a handler can store into it with plain memory writes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use crate::error::{FaultlineError, Result};

/// Final component of a `/`-separated path
///
/// ```rust
/// use faultline_core::io::files::last_path_entry;
///
/// assert_eq!(last_path_entry("/var/log/crash.json"), "crash.json");
/// assert_eq!(last_path_entry("crash.json"), "crash.json");
/// assert_eq!(last_path_entry("/var/log/"), "");
/// ```
pub fn last_path_entry(path: &str) -> &str
{
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

/// Read a whole file, or only its tail
///
/// With `max_len == 0` or a file no larger than `max_len`, the entire file is
/// returned. Otherwise the last `max_len` bytes are returned, which keeps the
/// newest lines of an append-only log.
pub fn read_entire_file(path: impl AsRef<Path>, max_len: usize) -> Result<Vec<u8>>
{
    let path = path.as_ref();
    let mut file = File::open(path).inspect_err(|err| {
        tracing::error!("Could not open {}: {}", path.display(), err);
    })?;
    let size = usize::try_from(file.metadata()?.len())
        .map_err(|_| FaultlineError::InvalidArgument(format!("{} is too large to read", path.display())))?;

    let to_read = if max_len == 0 || max_len >= size {
        size
    } else {
        let back = i64::try_from(max_len)
            .map_err(|_| FaultlineError::InvalidArgument(format!("tail length {max_len} out of range")))?;
        file.seek(SeekFrom::End(-back))?;
        max_len
    };

    let mut data = vec![0u8; to_read];
    file.read_exact(&mut data).inspect_err(|err| {
        tracing::error!("Could not read {}: {}", path.display(), err);
    })?;
    Ok(data)
}

/// Create `path` and every missing parent, each with mode `0700`
pub fn make_path(path: impl AsRef<Path>) -> Result<()>
{
    let path = path.as_ref();
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path).map_err(|err| {
        tracing::error!("Could not create directory {}: {}", path.display(), err);
        FaultlineError::Io(err)
    })
}

/// Remove a file or an empty directory
///
/// Returns `Ok(false)` when the path was already gone and `must_exist` is
/// false. A missing path only counts as an error when `must_exist` is set.
pub fn remove_file(path: impl AsRef<Path>, must_exist: bool) -> Result<bool>
{
    let path = path.as_ref();
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !must_exist => Ok(false),
        Err(err) => {
            tracing::error!("Could not delete {}: {}", path.display(), err);
            Err(err.into())
        }
    }
}

fn is_deletable(path: &Path) -> bool
{
    match path.to_str() {
        Some(text) => !matches!(last_path_entry(text), "." | ".."),
        None => true,
    }
}

/// Delete everything inside `path`, leaving the directory itself
///
/// Paths ending in `.` or `..` are refused. Entries that disappear while the
/// directory is being walked are skipped, since another process may be
/// cleaning the same directory.
pub fn delete_contents_of_path(path: impl AsRef<Path>) -> Result<()>
{
    let path = path.as_ref();
    if !is_deletable(path) {
        return Err(FaultlineError::InvalidArgument(format!("refusing to delete {}", path.display())));
    }
    delete_path_contents(path, false)
}

fn delete_path_contents(path: &Path, delete_top_level: bool) -> Result<()>
{
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("{} vanished before it could be deleted", path.display());
            return Ok(());
        }
        Err(err) => {
            tracing::error!("Could not stat {}: {}", path.display(), err);
            return Err(err.into());
        }
    };

    if meta.is_dir() {
        match fs::read_dir(path) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok(entry) => {
                            let child = entry.path();
                            if is_deletable(&child) {
                                // A failing child shouldn't stop the rest of the sweep.
                                let _ = delete_path_contents(&child, true);
                            }
                        }
                        Err(err) => tracing::warn!("Contents of {} changed while listing: {}", path.display(), err),
                    }
                }
            }
            Err(err) => tracing::error!("Error reading directory {}: {}", path.display(), err),
        }
        if delete_top_level {
            remove_file(path, false)?;
        }
        Ok(())
    } else if meta.is_file() || meta.file_type().is_symlink() {
        remove_file(path, false).map(|_| ())
    } else {
        tracing::error!("Could not delete {}: not a regular file", path.display());
        Err(FaultlineError::InvalidArgument(format!("{} is not a regular file", path.display())))
    }
}

/// A file mapped read-write and shared with the page cache
///
/// Stores into the mapping reach the file without any system call, so a
/// handler can fill it in without touching the descriptor layer at all.
#[derive(Debug)]
pub struct MappedFile
{
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively by this value.
unsafe impl Send for MappedFile {}

impl MappedFile
{
    pub fn len(&self) -> usize
    {
        self.len
    }

    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8]
    {
        // SAFETY: `ptr` maps `len` readable bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8]
    {
        // SAFETY: `ptr` maps `len` writable bytes, borrowed uniquely here.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedFile
{
    fn drop(&mut self)
    {
        // SAFETY: the region was returned by mmap with exactly this length.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

/// Create (or truncate) `path`, size it to `size` bytes and map it shared
///
/// The file is removed again if sizing or mapping fails.
pub fn mmap_file(path: impl AsRef<Path>, size: usize) -> Result<MappedFile>
{
    let path = path.as_ref();
    if size == 0 {
        return Err(FaultlineError::InvalidArgument("cannot map an empty file".to_string()));
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .inspect_err(|err| tracing::error!("Could not open file {}: {}", path.display(), err))?;

    let mapped = file.set_len(size as u64).and_then(|()| {
        // SAFETY: mapping a descriptor we own; the result is checked below.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            Err(io::Error::last_os_error())
        } else {
            NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::Other))
        }
    });

    match mapped {
        Ok(ptr) => Ok(MappedFile { ptr, len: size }),
        Err(err) => {
            tracing::error!("Could not mmap file {}: {}", path.display(), err);
            let _ = fs::remove_file(path);
            Err(err.into())
        }
    }
}
