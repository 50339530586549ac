use std::io::Write;

use crate::{MemoryMap, PageLocation, PageSink, PageTableEntry, PageVisit, VpmapError, VpmapResult};

/// Prints a scan as text: one header line per mapping, then one line per page.
///
/// ```text
/// 7ffd3a1c0000-7ffd3a1e1000 rw-p 00000000 00:00 0 [stack]
///   7ffd3a1c0000 vpn 7ffd3a1c0 | ENTRY 8100000000012345 | -E-- | PFN 12345 PHYS 12345000
///   7ffd3a1c1000 vpn 7ffd3a1c1 | ENTRY 0000000000000000 | ---- | NOT PRESENT
/// ```
pub struct TextRenderer<W: Write> {
    out: W,
    present_only: bool,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        TextRenderer {
            out,
            present_only: false,
        }
    }

    /// Only print page lines for resident pages.  Mapping headers are always printed.
    pub fn present_only(mut self, present_only: bool) -> Self {
        self.present_only = present_only;
        self
    }

    pub fn flush(&mut self) -> VpmapResult<()> {
        Ok(self.out.flush()?)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Soft-dirty, exclusive, write-protected, file/shared: a letter when set, `-` otherwise.
fn flag_letters(entry: &PageTableEntry) -> String {
    [
        (entry.soft_dirty(), 'D'),
        (entry.exclusive(), 'E'),
        (entry.write_protected(), 'W'),
        (entry.file_backed_or_shared_anon(), 'F'),
    ]
    .iter()
    .map(|&(set, c)| if set { c } else { '-' })
    .collect()
}

impl<W: Write> PageSink for TextRenderer<W> {
    fn begin_mapping(&mut self, map: &MemoryMap) -> VpmapResult<()> {
        writeln!(self.out, "{}", map).map_err(VpmapError::from)
    }

    fn page(&mut self, visit: &PageVisit) -> VpmapResult<()> {
        let entry = &visit.entry;
        if self.present_only && !entry.present() {
            return Ok(());
        }
        write!(
            self.out,
            "  {:x} vpn {:x} | ENTRY {:016x} | {} | ",
            visit.vaddr,
            visit.vpn,
            entry.raw(),
            flag_letters(entry)
        )?;
        match entry.location {
            PageLocation::Present { frame_number } => match visit.physical_address {
                Some(phys) => writeln!(self.out, "PFN {:x} PHYS {:x}", frame_number, phys)?,
                None => writeln!(self.out, "PFN {:x}", frame_number)?,
            },
            PageLocation::Swapped { swap_type, swap_offset } => {
                writeln!(self.out, "SWAPPED type {} offset {:#x}", swap_type, swap_offset)?
            }
            PageLocation::Absent => writeln!(self.out, "NOT PRESENT")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, Vpn};
    use std::rc::Rc;

    fn visit(map: &Rc<MemoryMap>, vaddr: u64, raw: u64) -> PageVisit {
        let t = AddressTranslator::new(4096).unwrap();
        let entry = PageTableEntry::from_raw(raw);
        PageVisit {
            vaddr,
            vpn: t.vpn(vaddr),
            map: Rc::clone(map),
            physical_address: t.physical_for(&entry),
            entry,
        }
    }

    #[test]
    fn test_render() {
        let map = Rc::new(MemoryMap::from_line("7ffd3a1c0000-7ffd3a1c3000 rw-p 00000000 00:00 0   [stack]").unwrap());
        let mut r = TextRenderer::new(Vec::new());
        r.begin_mapping(&map).unwrap();
        r.page(&visit(&map, 0x7ffd3a1c0000, 0x8100000000012345)).unwrap();
        r.page(&visit(&map, 0x7ffd3a1c1000, 0x4080000000000043)).unwrap();
        r.page(&visit(&map, 0x7ffd3a1c2000, 0)).unwrap();
        r.end_mapping(&map).unwrap();

        let text = String::from_utf8(r.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "7ffd3a1c0000-7ffd3a1c3000 rw-p 00000000 00:00 0 [stack]");
        assert_eq!(
            lines[1],
            "  7ffd3a1c0000 vpn 7ffd3a1c0 | ENTRY 8100000000012345 | -E-- | PFN 12345 PHYS 12345000"
        );
        assert_eq!(
            lines[2],
            "  7ffd3a1c1000 vpn 7ffd3a1c1 | ENTRY 4080000000000043 | D--- | SWAPPED type 3 offset 0x2"
        );
        assert_eq!(
            lines[3],
            "  7ffd3a1c2000 vpn 7ffd3a1c2 | ENTRY 0000000000000000 | ---- | NOT PRESENT"
        );
        assert_eq!(lines.len(), 4);
        assert_eq!(visit(&map, 0x7ffd3a1c2000, 0).vpn, Vpn(0x7ffd3a1c2));
    }

    #[test]
    fn test_present_only() {
        let map = Rc::new(MemoryMap::from_line("1000-3000 rw-p 00000000 00:00 0").unwrap());
        let mut r = TextRenderer::new(Vec::new()).present_only(true);
        r.begin_mapping(&map).unwrap();
        r.page(&visit(&map, 0x1000, 0)).unwrap();
        r.page(&visit(&map, 0x2000, 0x8000000000000009)).unwrap();
        let text = String::from_utf8(r.into_inner()).unwrap();
        assert_eq!(
            text,
            "1000-3000 rw-p 00000000 00:00 0\n  2000 vpn 2 | ENTRY 8000000000000009 | ---- | PFN 9 PHYS 9000\n"
        );
    }
}
