#![allow(unknown_lints)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::invalid_html_tags)]
//! This crate resolves where the pages of a linux process live: for every page of every mapping in
//! `/proc/<pid>/maps`, it reads the matching 8-byte record of `/proc/<pid>/pagemap` and reports
//! whether the page is resident (and at which physical frame), swapped out, or absent.
//!
//! All parsing lives in [`vpmap_core`], which is re-exported here.  This crate adds the file
//! access: [`process::Process`], [`process::PageMap`] and the [`MappingWalker`] that drives a
//! whole scan.
//!
//! # Permissions
//!
//! Any process may read its own pagemap, but since Linux 4.0 the page frame numbers are zeroed
//! unless the reader has `CAP_SYS_ADMIN`.  Reading another user's process needs root.
//!
//! # Consistency
//!
//! A scan is a best-effort snapshot.  The target may map, unmap, exit or exec between reading a
//! maps line and reading the pagemap records for it.  Any I/O error ends the scan; re-scan to
//! recover.
//!
//! # Examples
//!
//! ```rust,no_run
//! use vpmap::{MappingWalker, ScanConfig, TextRenderer};
//!
//! let walker = MappingWalker::open(std::process::id() as i32, ScanConfig::default()).unwrap();
//! let mut renderer = TextRenderer::new(std::io::stdout());
//! let summary = walker.run(&mut renderer).unwrap();
//! println!("{} pages present", summary.present);
//! ```

pub use vpmap_core::*;

use lazy_static::lazy_static;
use rustix::fd::AsFd;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

macro_rules! wrap_io_error {
    ($path:expr, $expr:expr) => {
        match $expr {
            Ok(v) => Ok(v),
            Err(e) => {
                let inner: ::std::io::Error = e.into();
                Err(::std::io::Error::new(
                    inner.kind(),
                    vpmap_core::IoErrorWrapper {
                        path: $path.to_owned(),
                        inner,
                    },
                ))
            }
        }
    };
}

pub mod process;

mod config;
pub use config::*;

mod walker;
pub use walker::*;

mod render;
pub use render::*;

lazy_static! {
    /// Memory page size, in bytes.
    ///
    /// This is calculated from `sysconf(_SC_PAGESIZE)`.
    static ref PAGESIZE: u64 = {
        rustix::param::page_size() as u64
    };
}

/// A wrapper around a `File` that remembers the name of the path
pub struct FileWrapper {
    inner: File,
    path: PathBuf,
}

impl FileWrapper {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileWrapper, io::Error> {
        let p = path.as_ref();
        let f = wrap_io_error!(p, File::open(p))?;
        Ok(FileWrapper {
            inner: f,
            path: p.to_owned(),
        })
    }

    pub fn open_at<P, Q, Fd: AsFd>(root: P, dirfd: Fd, path: Q) -> Result<FileWrapper, io::Error>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        use rustix::fs::{Mode, OFlags};

        let p = root.as_ref().join(path.as_ref());
        let fd = wrap_io_error!(
            p,
            rustix::fs::openat(dirfd, path.as_ref(), OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())
        )?;
        Ok(FileWrapper {
            inner: File::from(fd),
            path: p,
        })
    }

    /// The path this file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads at `offset` without moving the file cursor (`pread(2)`).
    ///
    /// A single call; a short count is returned as-is.  Interrupted calls are retried.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        loop {
            match rustix::io::pread(&self.inner, &mut *buf, offset) {
                Err(rustix::io::Errno::INTR) => continue,
                other => return wrap_io_error!(self.path, other),
            }
        }
    }
}

impl Read for FileWrapper {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        wrap_io_error!(self.path, self.inner.read(buf))
    }
    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        wrap_io_error!(self.path, self.inner.read_to_end(buf))
    }
    fn read_to_string(&mut self, buf: &mut String) -> io::Result<usize> {
        wrap_io_error!(self.path, self.inner.read_to_string(buf))
    }
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        wrap_io_error!(self.path, self.inner.read_exact(buf))
    }
}

/// Memory page size, in bytes.
///
/// Resolved once, from `sysconf(_SC_PAGESIZE)`, and cached for the life of the process.
pub fn page_size() -> u64 {
    *PAGESIZE
}

/// An [`AddressTranslator`] for the running system's page size.
///
/// Fails with [`VpmapError::UnsupportedEnvironment`] if the page size is unusable.
pub fn translator() -> VpmapResult<AddressTranslator> {
    AddressTranslator::new(page_size())
}
