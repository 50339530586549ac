use std::io::{BufRead, BufReader};
use std::rc::Rc;

use log::{debug, info, trace, warn};

use crate::process::{PageMap, PagemapSource, Process};
use crate::{
    AddressTranslator, FileWrapper, MMapPath, MalformedLinePolicy, MemoryMap, PageLocation, PageSelection,
    PageTableEntry, Pages, Resource, ScanConfig, VpmapError, VpmapResult, Vpn,
};

/// Where a [`MappingWalker`] is in its scan.
///
/// Opening the two files happens in [`MappingWalker::open`], before a walker exists, so there is
/// no state for it here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Nothing read yet
    Idle,
    /// Reading the next maps line
    ScanningLines,
    /// Resolving the pages of the current mapping
    WalkingRangePages,
    /// The maps file is exhausted
    Done,
    /// An error ended the scan
    Failed,
}

/// One resolved page: the `(vaddr, mapping, entry)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVisit {
    /// Page-aligned virtual address
    pub vaddr: u64,
    pub vpn: Vpn,
    /// The mapping `vaddr` belongs to
    pub map: Rc<MemoryMap>,
    pub entry: PageTableEntry,
    /// Physical address of the frame, for present pages
    pub physical_address: Option<u64>,
}

/// What the walker yields, in address order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    /// A new mapping starts.  Its pages (if any are walked) follow.
    Mapping(Rc<MemoryMap>),
    Page(PageVisit),
}

/// Receives the results of a scan.  See [`MappingWalker::run`].
pub trait PageSink {
    fn begin_mapping(&mut self, map: &MemoryMap) -> VpmapResult<()>;

    fn page(&mut self, visit: &PageVisit) -> VpmapResult<()>;

    fn end_mapping(&mut self, _map: &MemoryMap) -> VpmapResult<()> {
        Ok(())
    }
}

/// Collects every visited page.
impl PageSink for Vec<PageVisit> {
    fn begin_mapping(&mut self, _map: &MemoryMap) -> VpmapResult<()> {
        Ok(())
    }

    fn page(&mut self, visit: &PageVisit) -> VpmapResult<()> {
        self.push(visit.clone());
        Ok(())
    }
}

/// Counts gathered over a whole scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub mappings: usize,
    pub pages: usize,
    pub present: usize,
    pub swapped: usize,
    pub absent: usize,
    /// Maps lines dropped under [`MalformedLinePolicy::Skip`]
    pub skipped_lines: usize,
}

impl ScanSummary {
    fn record(&mut self, entry: &PageTableEntry) {
        self.pages += 1;
        match entry.location {
            PageLocation::Present { .. } => self.present += 1,
            PageLocation::Swapped { .. } => self.swapped += 1,
            PageLocation::Absent => self.absent += 1,
        }
    }
}

/// Walks every mapping of a process, and every page of every mapping, resolving each page through
/// the pagemap.
///
/// The walker owns both files for the duration of the scan; they are closed when it is dropped,
/// whichever way the scan ended.  Addresses come out in the order of the maps file, and strictly
/// increasing within a mapping.
///
/// Any error is final: the walker moves to [`ScanState::Failed`] and yields nothing more.
///
/// With the default [`ScanConfig::skip_vsyscall`], the pages of `[vsyscall]` are not visited: the
/// mapping lies above the user address limit and the kernel returns no pagemap data for it.  The
/// mapping itself is still yielded.  Clear the flag to walk it, in which case the scan ends with
/// a [`VpmapError::ShortRead`].
pub struct MappingWalker<M, P> {
    maps: M,
    pagemap: P,
    translator: AddressTranslator,
    config: ScanConfig,
    state: ScanState,
    current: Option<(Rc<MemoryMap>, Pages)>,
    buf: Vec<u8>,
    line_no: usize,
    skipped_lines: usize,
}

impl MappingWalker<BufReader<FileWrapper>, PageMap> {
    /// Opens `maps` and `pagemap` for `pid` under `config.proc_root`.
    ///
    /// The page size is checked first, so an unsupported environment is reported before any file
    /// is touched.  A missing or inaccessible `/proc/<pid>` directory is reported against `maps`,
    /// the first file the scan needs.
    pub fn open(pid: i32, config: ScanConfig) -> VpmapResult<Self> {
        let translator = config.translator()?;
        let process = Process::new_with_root(config.proc_root.join(pid.to_string()))
            .map_err(|e| e.for_resource(Resource::Maps))?;
        let maps = process.maps_reader()?;
        let pagemap = process.pagemap()?;
        debug!("scanning pid {} with page size {}", pid, translator.page_size());
        Ok(MappingWalker::new(maps, pagemap, translator, config))
    }
}

impl<M: BufRead, P: PagemapSource> MappingWalker<M, P> {
    /// Builds a walker over already opened resources.
    pub fn new(maps: M, pagemap: P, translator: AddressTranslator, config: ScanConfig) -> Self {
        MappingWalker {
            maps,
            pagemap,
            translator,
            config,
            state: ScanState::Idle,
            current: None,
            buf: Vec::new(),
            line_no: 0,
            skipped_lines: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Drives the whole scan, feeding `sink`.
    ///
    /// There are no partial results: on error, whatever reached the sink so far is all there is.
    pub fn run<S: PageSink + ?Sized>(mut self, sink: &mut S) -> VpmapResult<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut open: Option<Rc<MemoryMap>> = None;

        while let Some(event) = self.next() {
            match event? {
                WalkEvent::Mapping(map) => {
                    if let Some(prev) = open.take() {
                        sink.end_mapping(&prev)?;
                    }
                    sink.begin_mapping(&map)?;
                    summary.mappings += 1;
                    open = Some(map);
                }
                WalkEvent::Page(visit) => {
                    summary.record(&visit.entry);
                    sink.page(&visit)?;
                }
            }
        }
        if let Some(prev) = open {
            sink.end_mapping(&prev)?;
        }

        summary.skipped_lines = self.skipped_lines;
        info!(
            "scan done: {} mappings, {} pages ({} present, {} swapped, {} absent), {} lines skipped",
            summary.mappings, summary.pages, summary.present, summary.swapped, summary.absent, summary.skipped_lines
        );
        Ok(summary)
    }

    fn fail(&mut self, e: VpmapError) -> VpmapError {
        self.state = ScanState::Failed;
        self.current = None;
        e
    }

    /// Reads maps lines until one parses, or the file ends.
    fn next_record(&mut self) -> VpmapResult<Option<MemoryMap>> {
        loop {
            self.buf.clear();
            let n = self
                .maps
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| VpmapError::from(e).for_resource(Resource::Maps))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let text = String::from_utf8_lossy(&self.buf);
            let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if line.trim().is_empty() {
                continue;
            }
            match MemoryMap::from_line(line) {
                Ok(map) => return Ok(Some(map)),
                Err(e) => match self.config.malformed_lines {
                    MalformedLinePolicy::Abort => return Err(e),
                    MalformedLinePolicy::Skip => {
                        warn!("skipping maps line {}: {}", self.line_no, e);
                        self.skipped_lines += 1;
                    }
                },
            }
        }
    }

    /// The pages of `map` that will be resolved.
    fn pages_for(&self, map: &MemoryMap) -> Pages {
        if self.config.skip_vsyscall && map.kind() == MMapPath::Vsyscall {
            debug!("not walking {:x}-{:x} [vsyscall]", map.start(), map.end());
            return self.translator.pages(map.start(), map.start());
        }
        match self.config.pages {
            PageSelection::All => self.translator.pages_in(map),
            PageSelection::FirstOnly => {
                let end = map.end().min(map.start().saturating_add(self.translator.page_size()));
                self.translator.pages(map.start(), end)
            }
        }
    }

    fn resolve(&mut self, vaddr: u64, map: Rc<MemoryMap>) -> VpmapResult<PageVisit> {
        let offset = self.translator.offset_for(vaddr);
        let entry = self.pagemap.read_entry(offset)?;
        trace!("{:#x} -> {:016x}", vaddr, entry.raw());
        Ok(PageVisit {
            vaddr,
            vpn: self.translator.vpn(vaddr),
            physical_address: self.translator.physical_for(&entry),
            map,
            entry,
        })
    }
}

impl<M: BufRead, P: PagemapSource> Iterator for MappingWalker<M, P> {
    type Item = VpmapResult<WalkEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                ScanState::Done | ScanState::Failed => return None,
                ScanState::Idle => self.state = ScanState::ScanningLines,
                ScanState::ScanningLines => match self.next_record() {
                    Ok(Some(map)) => {
                        debug!("mapping {}", map);
                        let pages = self.pages_for(&map);
                        let map = Rc::new(map);
                        self.current = Some((Rc::clone(&map), pages));
                        self.state = ScanState::WalkingRangePages;
                        return Some(Ok(WalkEvent::Mapping(map)));
                    }
                    Ok(None) => {
                        self.state = ScanState::Done;
                        return None;
                    }
                    Err(e) => return Some(Err(self.fail(e))),
                },
                ScanState::WalkingRangePages => {
                    let next = self
                        .current
                        .as_mut()
                        .and_then(|(map, pages)| pages.next().map(|vaddr| (vaddr, Rc::clone(map))));
                    match next {
                        Some((vaddr, map)) => {
                            return Some(match self.resolve(vaddr, map) {
                                Ok(visit) => Ok(WalkEvent::Page(visit)),
                                Err(e) => Err(self.fail(e)),
                            })
                        }
                        None => {
                            self.current = None;
                            self.state = ScanState::ScanningLines;
                        }
                    }
                }
            }
        }
    }
}
