use crate::{MemoryMap, PageTableEntry, Vpn, VpmapError, VpmapResult, PAGEMAP_ENTRY_SIZE};

/// Converts between virtual addresses, virtual page numbers and pagemap offsets, and between frame
/// numbers and physical addresses.
///
/// The only state is the page size, which must be a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTranslator {
    page_size: u64,
    page_shift: u32,
}

impl AddressTranslator {
    /// Fails with [`VpmapError::UnsupportedEnvironment`] if `page_size` is not a power of two, or
    /// is smaller than a pagemap record.
    pub fn new(page_size: u64) -> VpmapResult<AddressTranslator> {
        if !page_size.is_power_of_two() {
            return Err(VpmapError::UnsupportedEnvironment {
                detail: format!("page size {} is not a power of two", page_size),
            });
        }
        if page_size < PAGEMAP_ENTRY_SIZE as u64 {
            return Err(VpmapError::UnsupportedEnvironment {
                detail: format!("page size {} is smaller than a pagemap record", page_size),
            });
        }
        Ok(AddressTranslator {
            page_size,
            page_shift: page_size.trailing_zeros(),
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// The virtual page number containing `vaddr`
    pub fn vpn(&self, vaddr: u64) -> Vpn {
        Vpn(vaddr >> self.page_shift)
    }

    /// Byte offset of the pagemap record describing the page that contains `vaddr`.
    pub fn offset_for(&self, vaddr: u64) -> u64 {
        self.vpn(vaddr).0 * PAGEMAP_ENTRY_SIZE as u64
    }

    /// The physical address of the start of the frame backing `entry`.
    ///
    /// `None` unless the page is present and not swapped, and also when `pfn * page_size` does not
    /// fit in 64 bits.
    pub fn physical_for(&self, entry: &PageTableEntry) -> Option<u64> {
        if !entry.present() || entry.swapped() {
            return None;
        }
        entry.frame_number().and_then(|pfn| pfn.0.checked_mul(self.page_size))
    }

    /// Rounds `vaddr` down to the start of its page.
    pub fn page_start(&self, vaddr: u64) -> u64 {
        vaddr & !(self.page_size - 1)
    }

    /// Every page-aligned address `a` with `start <= a < end`, in increasing order.
    pub fn pages(&self, start: u64, end: u64) -> Pages {
        let first = match start.checked_add(self.page_size - 1) {
            Some(v) => self.page_start(v),
            None => end,
        };
        Pages {
            next: Some(first),
            end,
            step: self.page_size,
        }
    }

    /// Every page-aligned address inside `map`.
    pub fn pages_in(&self, map: &MemoryMap) -> Pages {
        self.pages(map.start(), map.end())
    }
}

/// Iterator over page-aligned addresses, see [`AddressTranslator::pages`].
#[derive(Debug, Clone)]
pub struct Pages {
    next: Option<u64>,
    end: u64,
    step: u64,
}

impl Iterator for Pages {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next.filter(|a| *a < self.end)?;
        self.next = current.checked_add(self.step);
        Some(current)
    }
}
