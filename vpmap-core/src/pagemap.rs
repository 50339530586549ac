use bitflags::bitflags;
use std::mem::size_of;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::Pfn;

/// Size in bytes of one `/proc/<pid>/pagemap` record.
pub const PAGEMAP_ENTRY_SIZE: usize = size_of::<u64>();

const fn genmask(high: usize, low: usize) -> u64 {
    let mask_bits = size_of::<u64>() * 8;
    (!0 - (1 << low) + 1) & (!0 >> (mask_bits - 1 - high))
}

// source: include/linux/swap.h
const MAX_SWAPFILES_SHIFT: usize = 5;

/// Bits 0-54: the page frame number, when the page is present
pub const PFN_MASK: u64 = genmask(54, 0);
/// Bits 0-4: the swap type, when the page is swapped
pub const SWAP_TYPE_MASK: u64 = genmask(MAX_SWAPFILES_SHIFT - 1, 0);
/// Bits 5-54: the swap offset, when the page is swapped
pub const SWAP_OFFSET_MASK: u64 = genmask(54, MAX_SWAPFILES_SHIFT);

// source: fs/proc/task_mmu.c
bitflags! {
    /// The flag bits of a pagemap record, common to present and swapped pages.
    ///
    /// Bits 58-60 are always zero and are not represented here.
    #[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
    #[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
    pub struct PageFlags: u64 {
        /// pte is soft-dirty (see `Documentation/admin-guide/mm/soft-dirty.rst`)
        const SOFT_DIRTY = 1 << 55;
        /// page exclusively mapped (since 4.2)
        const MMAP_EXCLUSIVE = 1 << 56;
        /// pte is uffd-wp write-protected (since 5.13)
        const UFFD_WP = 1 << 57;
        /// page is file-page or shared-anon (since 3.5)
        const FILE = 1 << 61;
        /// page swapped
        const SWAP = 1 << 62;
        /// page present
        const PRESENT = 1 << 63;
    }
}

/// Where the data of a virtual page lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum PageLocation {
    /// Resident in RAM at the given frame.
    ///
    /// The frame number reads as zero unless the reader has `CAP_SYS_ADMIN` (since 4.0).
    Present { frame_number: Pfn },
    /// Swapped out.
    Swapped { swap_type: u8, swap_offset: u64 },
    /// Neither present nor swapped: never faulted in, or not mapped at all.
    Absent,
}

/// A decoded `/proc/<pid>/pagemap` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct PageTableEntry {
    raw: u64,
    pub flags: PageFlags,
    pub location: PageLocation,
}

impl PageTableEntry {
    /// Decodes a raw 64-bit record.  Every bit pattern decodes.
    ///
    /// The present bit is checked first, and only then the swap bit: bits 0-54 mean something
    /// different depending on which is set.
    pub fn from_raw(raw: u64) -> Self {
        let flags = PageFlags::from_bits_truncate(raw);

        let location = if flags.contains(PageFlags::PRESENT) {
            PageLocation::Present {
                frame_number: Pfn(raw & PFN_MASK),
            }
        } else if flags.contains(PageFlags::SWAP) {
            PageLocation::Swapped {
                swap_type: (raw & SWAP_TYPE_MASK) as u8,
                swap_offset: (raw & SWAP_OFFSET_MASK) >> MAX_SWAPFILES_SHIFT,
            }
        } else {
            PageLocation::Absent
        };

        PageTableEntry { raw, flags, location }
    }

    /// Decodes the 8 bytes exactly as read from the pagemap file.
    ///
    /// The kernel writes records in little-endian order on every architecture it supports
    /// this file on.
    pub fn from_bytes(bytes: [u8; PAGEMAP_ENTRY_SIZE]) -> Self {
        Self::from_raw(u64::from_le_bytes(bytes))
    }

    /// The undecoded record
    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn present(&self) -> bool {
        self.flags.contains(PageFlags::PRESENT)
    }

    pub fn swapped(&self) -> bool {
        self.flags.contains(PageFlags::SWAP)
    }

    pub fn soft_dirty(&self) -> bool {
        self.flags.contains(PageFlags::SOFT_DIRTY)
    }

    pub fn exclusive(&self) -> bool {
        self.flags.contains(PageFlags::MMAP_EXCLUSIVE)
    }

    pub fn write_protected(&self) -> bool {
        self.flags.contains(PageFlags::UFFD_WP)
    }

    pub fn file_backed_or_shared_anon(&self) -> bool {
        self.flags.contains(PageFlags::FILE)
    }

    /// The page frame number, for a resident page.
    pub fn frame_number(&self) -> Option<Pfn> {
        match self.location {
            PageLocation::Present { frame_number } => Some(frame_number),
            _ => None,
        }
    }

    /// `(swap_type, swap_offset)` for a swapped-out page.
    pub fn swap(&self) -> Option<(u8, u64)> {
        match self.location {
            PageLocation::Swapped { swap_type, swap_offset } => Some((swap_type, swap_offset)),
            _ => None,
        }
    }
}

impl From<u64> for PageTableEntry {
    fn from(raw: u64) -> Self {
        PageTableEntry::from_raw(raw)
    }
}
