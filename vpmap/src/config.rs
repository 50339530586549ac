use std::path::PathBuf;

use crate::{page_size, AddressTranslator, VpmapResult};

/// What the walker does with a maps line it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedLinePolicy {
    /// End the scan with [`VpmapError::MalformedMapsLine`](crate::VpmapError::MalformedMapsLine).
    ///
    /// The maps file is generated by the kernel, so a line that doesn't parse is more likely a
    /// parser bug than bad input.
    #[default]
    Abort,
    /// Log a warning and carry on with the next line.
    Skip,
}

/// Which pages of each mapping get resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSelection {
    /// Every page
    #[default]
    All,
    /// Only the first page of every mapping
    FirstOnly,
}

/// Settings for one scan.
///
/// ```rust
/// use vpmap::{MalformedLinePolicy, ScanConfig};
///
/// let config = ScanConfig::default()
///     .with_proc_root("/host/proc")
///     .with_malformed_lines(MalformedLinePolicy::Skip);
/// assert!(config.skip_vsyscall);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Where procfs is mounted.  Defaults to `/proc`.
    pub proc_root: PathBuf,
    pub malformed_lines: MalformedLinePolicy,
    /// Don't walk the pages of the `[vsyscall]` mapping.
    ///
    /// It lies above the user address limit and reading its pagemap record returns no data, which
    /// would end the scan with a short read.  The mapping itself is still reported.
    pub skip_vsyscall: bool,
    pub pages: PageSelection,
    /// Overrides the system page size.  Meant for tests; validated like the real one.
    pub page_size: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            proc_root: PathBuf::from("/proc"),
            malformed_lines: MalformedLinePolicy::Abort,
            skip_vsyscall: true,
            pages: PageSelection::All,
            page_size: None,
        }
    }
}

impl ScanConfig {
    pub fn with_proc_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn with_malformed_lines(mut self, policy: MalformedLinePolicy) -> Self {
        self.malformed_lines = policy;
        self
    }

    pub fn with_skip_vsyscall(mut self, skip: bool) -> Self {
        self.skip_vsyscall = skip;
        self
    }

    pub fn with_pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// The translator for the configured (or the system's) page size.
    pub fn translator(&self) -> VpmapResult<AddressTranslator> {
        AddressTranslator::new(self.page_size.unwrap_or_else(page_size))
    }
}
