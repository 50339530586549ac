#![allow(unknown_lints)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::invalid_html_tags)]
//! This crate provides data structures and parsing for the two linux pseudo-files that describe a
//! process's virtual address space: `/proc/<pid>/maps` and `/proc/<pid>/pagemap`.
//!
//! Nothing in this crate touches the filesystem.  Every parser here takes a line of text or a
//! handful of bytes, which makes it usable for parsing data captured on another machine.  For
//! reading a live process, see the `vpmap` crate, which re-exports everything in here.
//!
//! # Overview
//!
//! * [`MemoryMap`] is one parsed line of `/proc/<pid>/maps`.
//! * [`PageTableEntry`] is one decoded 8-byte record of `/proc/<pid>/pagemap`.
//! * [`AddressTranslator`] turns virtual addresses into pagemap offsets, and frame numbers into
//!   physical addresses.
//!
//! # Kernel support
//!
//! The pagemap bit layout is taken from `Documentation/admin-guide/mm/pagemap.rst`.  Some bits were
//! added in specific kernel releases (exclusive mapping in 4.2, uffd write-protect in 5.13).  On
//! older kernels those bits read as zero.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

pub trait IntoOption<T> {
    fn into_option(t: Self) -> Option<T>;
}

impl<T> IntoOption<T> for Option<T> {
    fn into_option(t: Option<T>) -> Option<T> {
        t
    }
}

impl<T, R> IntoOption<T> for Result<T, R> {
    fn into_option(t: Result<T, R>) -> Option<T> {
        t.ok()
    }
}

/// Unwraps an `Option` or `Result`, or bails out of the enclosing function with a
/// [`VpmapError::MalformedMapsLine`] naming the offending line.
#[macro_export]
#[doc(hidden)]
macro_rules! expect {
    ($e:expr, $line:expr, $msg:expr) => {
        match $crate::IntoOption::into_option($e) {
            Some(v) => v,
            None => return Err($crate::VpmapError::malformed($line, $msg)),
        }
    };
}

/// Parses an unsigned integer field in the given radix.
///
/// Unlike a bare `from_str_radix`, signs and empty fields are rejected.
#[macro_export]
#[doc(hidden)]
macro_rules! from_str {
    ($t:tt, $e:expr, $radix:expr, $line:expr) => {{
        let e: &str = $e;
        let digits_ok = !e.is_empty() && e.chars().all(|c| c.is_digit($radix));
        match $t::from_str_radix(e, $radix) {
            Ok(v) if digits_ok => v,
            _ => {
                return Err($crate::VpmapError::malformed(
                    $line,
                    format!("failed to parse {} ({:?}) as a {}", stringify!($e), e, stringify!($t)),
                ))
            }
        }
    }};
}

mod maps;
pub use maps::*;

mod pagemap;
pub use pagemap::*;

mod translate;
pub use translate::*;

mod types;
pub use types::*;

/// A type that can be parsed from anything that implements [`Read`].
pub trait FromRead: Sized {
    /// Read the type from a Read
    fn from_read<R: Read>(r: R) -> VpmapResult<Self>;

    /// Read the type from a file
    fn from_file<P: AsRef<Path>>(path: P) -> VpmapResult<Self> {
        std::fs::File::open(path.as_ref())
            .map_err(VpmapError::from)
            .and_then(|f| Self::from_read(f))
            .map_err(|e| e.with_path(path.as_ref()))
    }
}

/// A type that can be parsed from anything that implements [`BufRead`].
pub trait FromBufRead: Sized {
    fn from_buf_read<R: BufRead>(r: R) -> VpmapResult<Self>;
}

impl<T: FromBufRead> FromRead for T {
    fn from_read<R: Read>(r: R) -> VpmapResult<Self> {
        Self::from_buf_read(BufReader::new(r))
    }
}

/// Which pseudo-file an error relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum Resource {
    /// `/proc/<pid>/maps`
    Maps,
    /// `/proc/<pid>/pagemap`
    Pagemap,
    /// Anything else (the `/proc/<pid>` directory itself, for example)
    Other,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Maps => write!(f, "maps"),
            Resource::Pagemap => write!(f, "pagemap"),
            Resource::Other => write!(f, "proc"),
        }
    }
}

/// An `io::Error` wrapper that remembers which file it came from.
///
/// This is how a path survives the trip through `std::io::Read` implementations, which can only
/// return a plain `io::Error`.
#[doc(hidden)]
#[derive(Debug)]
pub struct IoErrorWrapper {
    pub path: PathBuf,
    pub inner: std::io::Error,
}

impl std::error::Error for IoErrorWrapper {}
impl fmt::Display for IoErrorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IoErrorWrapper({}): {}", self.path.display(), self.inner)
    }
}

/// The various ways a scan can fail.
///
/// Every one of these is fatal for the scan that produced it.  The walker never retries, because the
/// target's address space may have changed in the meantime.
#[derive(Debug)]
pub enum VpmapError {
    /// The maps or pagemap file could not be opened.
    ///
    /// Usually a permission problem, or a process that doesn't exist (anymore).
    ResourceUnavailable {
        resource: Resource,
        path: Option<PathBuf>,
        cause: io::Error,
    },
    /// A line of the maps file did not have the expected structure.
    MalformedMapsLine { line: String, reason: String },
    /// A read failed for a reason other than returning too few bytes.
    IoFailure {
        resource: Resource,
        path: Option<PathBuf>,
        cause: io::Error,
    },
    /// Fewer bytes than a full pagemap record came back from a positioned read.
    ShortRead { requested: usize, obtained: usize, offset: u64 },
    /// The page size is unusable, or some other platform precondition failed.
    UnsupportedEnvironment { detail: String },
}

/// The result type used throughout this crate and `vpmap`.
pub type VpmapResult<T> = Result<T, VpmapError>;

impl VpmapError {
    pub fn malformed<L: Into<String>, R: Into<String>>(line: L, reason: R) -> Self {
        VpmapError::MalformedMapsLine {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Re-tags an I/O error as belonging to `resource`.
    ///
    /// Errors that are not I/O related are returned unchanged.
    pub fn for_resource(self, resource: Resource) -> Self {
        match self {
            VpmapError::ResourceUnavailable { path, cause, .. } => VpmapError::ResourceUnavailable {
                resource,
                path,
                cause,
            },
            VpmapError::IoFailure { path, cause, .. } => VpmapError::IoFailure { resource, path, cause },
            other => other,
        }
    }

    /// Turns an I/O failure into a [`VpmapError::ResourceUnavailable`].  Used for errors that
    /// happen while opening a file.
    pub fn unavailable(self) -> Self {
        match self {
            VpmapError::IoFailure { resource, path, cause } => {
                VpmapError::ResourceUnavailable { resource, path, cause }
            }
            other => other,
        }
    }

    fn with_path<P: AsRef<Path>>(self, new_path: P) -> Self {
        let new_path = Some(new_path.as_ref().to_owned());
        match self {
            VpmapError::ResourceUnavailable { resource, cause, .. } => VpmapError::ResourceUnavailable {
                resource,
                path: new_path,
                cause,
            },
            VpmapError::IoFailure { resource, cause, .. } => VpmapError::IoFailure {
                resource,
                path: new_path,
                cause,
            },
            other => other,
        }
    }

    fn cause(&self) -> Option<&io::Error> {
        match self {
            VpmapError::ResourceUnavailable { cause, .. } | VpmapError::IoFailure { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// The path implicated by this error, if known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            VpmapError::ResourceUnavailable { path, .. } | VpmapError::IoFailure { path, .. } => path.as_deref(),
            _ => None,
        }
    }

    /// True if the kernel refused access.  Reading another user's pagemap needs root.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.cause(), Some(e) if e.kind() == io::ErrorKind::PermissionDenied)
    }

    /// True if the process (or the file) doesn't exist.
    pub fn is_not_found(&self) -> bool {
        // All platforms happen to have ESRCH=3
        const ESRCH: i32 = 3;
        match self.cause() {
            Some(e) => e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(ESRCH),
            None => false,
        }
    }
}

/// The error behind `cause`, without the path an [`IoErrorWrapper`] adds.
fn bare_cause(cause: &io::Error) -> &dyn fmt::Display {
    match cause.get_ref().and_then(|e| e.downcast_ref::<IoErrorWrapper>()) {
        Some(wrapper) => &wrapper.inner,
        None => cause,
    }
}

impl fmt::Display for VpmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpmapError::ResourceUnavailable { resource, path, cause } => match path {
                Some(p) => write!(f, "Unable to open {} ({}): {}", resource, p.display(), bare_cause(cause)),
                None => write!(f, "Unable to open {}: {}", resource, bare_cause(cause)),
            },
            VpmapError::MalformedMapsLine { line, reason } => {
                write!(f, "Malformed maps line {:?}: {}", line, reason)
            }
            VpmapError::IoFailure { resource, path, cause } => match path {
                Some(p) => write!(f, "Failed reading {} ({}): {}", resource, p.display(), bare_cause(cause)),
                None => write!(f, "Failed reading {}: {}", resource, bare_cause(cause)),
            },
            VpmapError::ShortRead {
                requested,
                obtained,
                offset,
            } => write!(
                f,
                "Short read from pagemap at offset {:#x}: requested {} bytes, got {}",
                offset, requested, obtained
            ),
            VpmapError::UnsupportedEnvironment { detail } => write!(f, "Unsupported environment: {}", detail),
        }
    }
}

impl std::error::Error for VpmapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VpmapError::ResourceUnavailable { cause, .. } | VpmapError::IoFailure { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VpmapError {
    fn from(io: std::io::Error) -> Self {
        // the only way we'll have a path for the IO error is if this IO error is a inner type of our IoErrorWrapper
        let path: Option<PathBuf> = io
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<IoErrorWrapper>())
            .map(|inner| inner.path.clone());
        VpmapError::IoFailure {
            resource: Resource::Other,
            path,
            cause: io,
        }
    }
}
