use crate::{AddressTranslator, FileWrapper, PageTableEntry, Resource, VpmapError, VpmapResult, PAGEMAP_ENTRY_SIZE};
use std::{
    io,
    ops::{Bound, RangeBounds},
};

/// Something pagemap records can be read from at arbitrary offsets.
///
/// Implemented by [`PageMap`]; tests implement it over an in-memory buffer.
pub trait PagemapSource {
    /// Reads up to `buf.len()` bytes at `offset` in a single call, without moving any cursor.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Reads and decodes the record at byte `offset`.
    ///
    /// Anything short of a full 8-byte record, including 0 bytes, is a
    /// [`VpmapError::ShortRead`].
    fn read_entry(&mut self, offset: u64) -> VpmapResult<PageTableEntry> {
        let mut info_bytes = [0; PAGEMAP_ENTRY_SIZE];
        let obtained = self
            .read_at(&mut info_bytes, offset)
            .map_err(|e| VpmapError::from(e).for_resource(Resource::Pagemap))?;
        if obtained < PAGEMAP_ENTRY_SIZE {
            return Err(VpmapError::ShortRead {
                requested: PAGEMAP_ENTRY_SIZE,
                obtained,
                offset,
            });
        }
        Ok(PageTableEntry::from_bytes(info_bytes))
    }
}

impl<S: PagemapSource + ?Sized> PagemapSource for &mut S {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Upper bound on the entries reserved up front by [`PageMap::get_range_info`].
const MAX_PREALLOC: u64 = 4096;

/// Parses page table entries accessing `/proc/<pid>/pagemap`.
pub struct PageMap {
    file: FileWrapper,
    translator: AddressTranslator,
}

impl PageMap {
    pub(crate) fn from_file_wrapper(file: FileWrapper, translator: AddressTranslator) -> Self {
        Self { file, translator }
    }

    /// Retrieves the page table entry for the page containing `vaddr`.
    ///
    /// Some mappings are not accessible, and will return an Err: `vsyscall`
    pub fn entry_at(&mut self, vaddr: u64) -> VpmapResult<PageTableEntry> {
        let offset = self.translator.offset_for(vaddr);
        self.read_entry(offset)
    }

    /// Retrieves the page table entry for the page at index `page_index`.
    ///
    /// An index whose record would lie past the largest file offset is a
    /// [`VpmapError::ShortRead`] of 0 bytes, as any read past the end of the pagemap would be.
    pub fn get_info(&mut self, page_index: u64) -> VpmapResult<PageTableEntry> {
        match page_index.checked_mul(PAGEMAP_ENTRY_SIZE as u64) {
            Some(offset) => self.read_entry(offset),
            None => Err(VpmapError::ShortRead {
                requested: PAGEMAP_ENTRY_SIZE,
                obtained: 0,
                offset: u64::MAX,
            }),
        }
    }

    /// Retrieves the page table entries for the pages with index in range `page_range`.
    pub fn get_range_info(&mut self, page_range: impl RangeBounds<u64>) -> VpmapResult<Vec<PageTableEntry>> {
        // `end` is always excluded
        let end = match page_range.end_bound() {
            Bound::Included(v) => v.saturating_add(1),
            Bound::Excluded(v) => *v,
            Bound::Unbounded => u64::MAX / self.translator.page_size(),
        };

        // `start` is always included
        let start = match page_range.start_bound() {
            Bound::Included(v) => *v,
            Bound::Excluded(v) => v.checked_add(1).unwrap_or(end),
            Bound::Unbounded => 0,
        };

        let mut page_infos = Vec::with_capacity(end.saturating_sub(start).min(MAX_PREALLOC) as usize);
        for page_index in start..end {
            page_infos.push(self.get_info(page_index)?);
        }

        Ok(page_infos)
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }
}

impl PagemapSource for PageMap {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pagemap held in memory, optionally cut off after `limit` bytes.
    struct MemPagemap {
        data: Vec<u8>,
        limit: usize,
    }

    impl PagemapSource for MemPagemap {
        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            let offset = offset as usize;
            if offset >= self.limit {
                return Ok(0);
            }
            let end = (offset + buf.len()).min(self.limit);
            buf[..end - offset].copy_from_slice(&self.data[offset..end]);
            Ok(end - offset)
        }
    }

    #[test]
    fn test_read_entry() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x8000000000012345u64.to_le_bytes());
        data.extend_from_slice(&0x4000000000000003u64.to_le_bytes());
        let mut pm = MemPagemap { data, limit: 12 };

        let entry = pm.read_entry(0).unwrap();
        assert_eq!(entry.frame_number(), Some(crate::Pfn(0x12345)));

        match pm.read_entry(8) {
            Err(VpmapError::ShortRead {
                requested,
                obtained,
                offset,
            }) => {
                assert_eq!(requested, 8);
                assert_eq!(obtained, 4);
                assert_eq!(offset, 8);
            }
            x => panic!("Unexpected return value: {:?}", x),
        }

        match pm.read_entry(16) {
            Err(VpmapError::ShortRead { obtained: 0, .. }) => {}
            x => panic!("Unexpected return value: {:?}", x),
        }
    }

    #[test]
    fn test_read_error_is_tagged() {
        struct Broken;
        impl PagemapSource for Broken {
            fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "boom"))
            }
        }
        match Broken.read_entry(0) {
            Err(VpmapError::IoFailure { resource, .. }) => assert_eq!(resource, Resource::Pagemap),
            x => panic!("Unexpected return value: {:?}", x),
        }
    }

    #[test]
    fn test_range_bounds_at_the_limits() {
        let mut pagemap = crate::process::Process::myself().unwrap().pagemap().unwrap();

        assert!(pagemap.get_range_info((Bound::Excluded(u64::MAX), Bound::Unbounded)).unwrap().is_empty());
        assert!(pagemap.get_range_info(5..5).unwrap().is_empty());

        match pagemap.get_info(u64::MAX) {
            Err(VpmapError::ShortRead { obtained: 0, .. }) => {}
            x => panic!("Unexpected return value: {:?}", x),
        }
        match pagemap.get_range_info((u64::MAX - 1)..=(u64::MAX - 1)) {
            Err(VpmapError::ShortRead { obtained: 0, .. }) => {}
            x => panic!("Unexpected return value: {:?}", x),
        }
    }
}
