//! Access to the `/proc/<pid>/` files that describe a process's address space.
//!
//! If you have a process ID, use [`Process::new(pid)`](struct.Process.html#method.new).  In case
//! procfs is mounted somewhere other than `/proc`, use
//! [`Process::new_with_root()`](struct.Process.html#method.new_with_root).
//!
//! ```rust
//! # use vpmap::process::Process;
//! let me = Process::myself().unwrap();
//! let page_size = vpmap::page_size();
//!
//! for map in me.maps().unwrap() {
//!     let pages = map.size() / page_size;
//!     println!("{:>8} pages  {}", pages, map);
//! }
//! ```

use super::*;

use log::debug;
use rustix::fd::OwnedFd;
use rustix::fs::{Mode, OFlags};
use std::io::BufReader;

mod pagemap;
pub use pagemap::*;


/// Represents a process in `/proc/<pid>`.
///
/// The `/proc/<pid>` directory is held open, so the files opened later always belong to this
/// process even if the pid is reused.
#[derive(Debug)]
pub struct Process {
    fd: OwnedFd,
    pub pid: i32,
    pub(crate) root: PathBuf,
}

/// Methods for constructing a new `Process` object.
impl Process {
    /// Returns a `Process` based on a specified PID.
    ///
    /// This can fail if the process doesn't exist, or if you don't have permission to access it.
    pub fn new(pid: i32) -> VpmapResult<Process> {
        let root = PathBuf::from("/proc").join(pid.to_string());
        Self::new_with_root(root)
    }

    /// Returns a `Process` based on a specified `/proc/<pid>` path.
    pub fn new_with_root(root: PathBuf) -> VpmapResult<Process> {
        let flags = OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC;
        let file = wrap_io_error!(root, rustix::fs::openat(rustix::fs::CWD, &root, flags, Mode::empty()))
            .map_err(|e| VpmapError::from(e).unavailable())?;

        let pidres = root
            .as_path()
            .components()
            .last()
            .and_then(|c| match c {
                std::path::Component::Normal(s) => Some(s),
                _ => None,
            })
            .and_then(|s| s.to_string_lossy().parse::<i32>().ok())
            .or_else(|| {
                rustix::fs::readlinkat(rustix::fs::CWD, &root, Vec::new())
                    .ok()
                    .and_then(|s| s.to_string_lossy().parse::<i32>().ok())
            });
        let pid = match pidres {
            Some(pid) => pid,
            None => {
                return Err(VpmapError::ResourceUnavailable {
                    resource: Resource::Other,
                    path: Some(root),
                    cause: io::Error::new(io::ErrorKind::NotFound, "not a /proc/<pid> directory"),
                })
            }
        };

        Ok(Process { fd: file, pid, root })
    }

    /// Returns a `Process` for the currently running process.
    ///
    /// This is done by using the `/proc/self` symlink
    pub fn myself() -> VpmapResult<Process> {
        let root = PathBuf::from("/proc/self");
        Self::new_with_root(root)
    }
}

impl Process {
    /// Returns the process ID for this process.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    fn open(&self, name: &str, resource: Resource) -> VpmapResult<FileWrapper> {
        let file = FileWrapper::open_at(&self.root, &self.fd, name)
            .map_err(|e| VpmapError::from(e).for_resource(resource).unavailable())?;
        debug!("opened {}", file.path().display());
        Ok(file)
    }

    /// Opens `/proc/<pid>/maps` for line-by-line reading.
    pub fn maps_reader(&self) -> VpmapResult<BufReader<FileWrapper>> {
        Ok(BufReader::new(self.open("maps", Resource::Maps)?))
    }

    /// Return a list of the currently mapped memory regions and their access permissions, based on
    /// the `/proc/pid/maps` file.
    pub fn maps(&self) -> VpmapResult<MemoryMaps> {
        let reader = self.maps_reader()?;
        MemoryMaps::from_buf_read(reader).map_err(|e| e.for_resource(Resource::Maps))
    }

    /// Returns a struct that can be used to access information in the `/proc/pid/pagemap` file.
    pub fn pagemap(&self) -> VpmapResult<PageMap> {
        let file = self.open("pagemap", Resource::Pagemap)?;
        Ok(PageMap::from_file_wrapper(file, translator()?))
    }
}
