use std::fmt;
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;

use bitflags::bitflags;
#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::{FromBufRead, VpmapError, VpmapResult};

bitflags! {
    /// The permissions of a memory mapping, the `rwxp` column of `/proc/<pid>/maps`
    #[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
    #[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
    pub struct MMPermissions: u8 {
        /// No permissions
        const NONE = 0;
        /// Read permission
        const READ = 1 << 0;
        /// Write permission
        const WRITE = 1 << 1;
        /// Execute permission
        const EXECUTE = 1 << 2;
        /// Memory is shared with another process.
        ///
        /// Mutually exclusive with PRIVATE.
        const SHARED = 1 << 3;
        /// Memory is private (and copy-on-write)
        ///
        /// Mutually exclusive with SHARED.
        const PRIVATE = 1 << 4;
    }
}

impl MMPermissions {
    /// Returns the 4-character form used by the kernel, e.g. `r-xp`.
    pub fn as_str(&self) -> String {
        let mut s = String::with_capacity(4);
        s.push(if self.contains(Self::READ) { 'r' } else { '-' });
        s.push(if self.contains(Self::WRITE) { 'w' } else { '-' });
        s.push(if self.contains(Self::EXECUTE) { 'x' } else { '-' });
        s.push(if self.contains(Self::SHARED) {
            's'
        } else if self.contains(Self::PRIVATE) {
            'p'
        } else {
            '-'
        });
        s
    }
}

impl FromStr for MMPermissions {
    type Err = VpmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = s.as_bytes();
        if b.len() != 4 {
            return Err(VpmapError::malformed(s, "permissions must be exactly 4 characters"));
        }
        let flag = |c: u8, letter: u8, set: MMPermissions| match c {
            _ if c == letter => Some(set),
            b'-' => Some(MMPermissions::NONE),
            _ => None,
        };
        let sharing = match b[3] {
            b's' => Some(MMPermissions::SHARED),
            b'p' => Some(MMPermissions::PRIVATE),
            b'-' => Some(MMPermissions::NONE),
            _ => None,
        };
        match (
            flag(b[0], b'r', MMPermissions::READ),
            flag(b[1], b'w', MMPermissions::WRITE),
            flag(b[2], b'x', MMPermissions::EXECUTE),
            sharing,
        ) {
            (Some(r), Some(w), Some(x), Some(p)) => Ok(r | w | x | p),
            _ => Err(VpmapError::malformed(s, "unexpected character in permissions")),
        }
    }
}

impl fmt::Display for MMPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// What kind of region a mapping's pathname names.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum MMapPath {
    /// The file that is backing the mapping.
    Path(PathBuf),
    /// The process's heap.
    Heap,
    /// The initial process's (also known as the main thread's) stack.
    Stack,
    /// A thread's stack (where the `<tid>` is a thread ID).  It corresponds to the
    /// `/proc/<pid>/task/<tid>/` path.
    ///
    /// (since Linux 3.4)
    TStack(u32),
    /// The virtual dynamically linked shared object.
    Vdso,
    /// Shared kernel variables
    Vvar,
    /// obsolete virtual syscalls, succeeded by vdso
    Vsyscall,
    /// An anonymous mapping as obtained via mmap(2).
    Anonymous,
    /// Some other pseudo-path
    Other(String),
}

impl MMapPath {
    pub fn from(path: &str) -> MMapPath {
        match path.trim() {
            "" => MMapPath::Anonymous,
            "[heap]" => MMapPath::Heap,
            "[stack]" => MMapPath::Stack,
            "[vdso]" => MMapPath::Vdso,
            "[vvar]" => MMapPath::Vvar,
            "[vsyscall]" => MMapPath::Vsyscall,
            x if x.starts_with("[stack:") && x.ends_with(']') => match x[7..x.len() - 1].parse() {
                Ok(tid) => MMapPath::TStack(tid),
                Err(_) => MMapPath::Other(x[1..x.len() - 1].to_string()),
            },
            x if x.starts_with('[') && x.ends_with(']') => MMapPath::Other(x[1..x.len() - 1].to_string()),
            x => MMapPath::Path(PathBuf::from(x)),
        }
    }
}

/// Represents an entry in a `/proc/<pid>/maps` file.
///
/// A line looks like this:
///
/// ```text
/// 7f1234560000-7f1234580000 r--p 00000000 08:01 131074                     /usr/lib/libc.so
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MemoryMap {
    /// The address space in the process that the mapping occupies, as `(start, end)`.
    ///
    /// `end` is exclusive.
    pub address: (u64, u64),
    pub perms: MMPermissions,
    /// The offset into the backing file, zero for anonymous mappings
    pub offset: u64,
    /// The device (major, minor)
    pub dev: (u32, u32),
    /// The inode on that device
    ///
    /// 0 indicates that no inode is associated with the memory region, as would be the case with
    /// BSS (uninitialized data).
    pub inode: u64,
    /// Everything after the inode, trimmed.  `None` when that is empty.
    ///
    /// This may contain spaces, e.g. `/tmp/some file (deleted)`.
    pub pathname: Option<String>,
}

/// Splits the next whitespace-delimited field off the front of `rest`.
fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let s = rest.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    let (field, tail) = s.split_at(end);
    *rest = tail;
    Some(field)
}

impl MemoryMap {
    /// Parses one line of `/proc/<pid>/maps`, without its line terminator.
    pub fn from_line(line: &str) -> VpmapResult<MemoryMap> {
        let mut rest = line;
        let address = expect!(next_field(&mut rest), line, "missing address range");
        let perms = expect!(next_field(&mut rest), line, "missing permissions");
        let offset = expect!(next_field(&mut rest), line, "missing offset");
        let dev = expect!(next_field(&mut rest), line, "missing device");
        let inode = expect!(next_field(&mut rest), line, "missing inode");

        let (start, end) = expect!(address.split_once('-'), line, "address range is not start-end");
        let start = from_str!(u64, start, 16, line);
        let end = from_str!(u64, end, 16, line);
        if start >= end {
            return Err(VpmapError::malformed(line, "mapping start is not below its end"));
        }

        let perms = match MMPermissions::from_str(perms) {
            Ok(p) => p,
            Err(_) => return Err(VpmapError::malformed(line, format!("bad permissions {:?}", perms))),
        };

        let (major, minor) = expect!(dev.split_once(':'), line, "device is not major:minor");
        let major = from_str!(u32, major, 16, line);
        let minor = from_str!(u32, minor, 16, line);

        let path = rest.trim();

        Ok(MemoryMap {
            address: (start, end),
            perms,
            offset: from_str!(u64, offset, 16, line),
            dev: (major, minor),
            inode: from_str!(u64, inode, 10, line),
            pathname: if path.is_empty() { None } else { Some(path.to_string()) },
        })
    }

    pub fn start(&self) -> u64 {
        self.address.0
    }

    pub fn end(&self) -> u64 {
        self.address.1
    }

    /// Size of the mapping in bytes
    pub fn size(&self) -> u64 {
        self.address.1 - self.address.0
    }

    pub fn contains(&self, vaddr: u64) -> bool {
        self.address.0 <= vaddr && vaddr < self.address.1
    }

    /// Classifies the pathname (heap, stack, a file, ...)
    pub fn kind(&self) -> MMapPath {
        MMapPath::from(self.pathname.as_deref().unwrap_or(""))
    }
}

impl FromStr for MemoryMap {
    type Err = VpmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryMap::from_line(s)
    }
}

/// Formats the mapping the way the kernel does, minus the column padding before the pathname.
impl fmt::Display for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x} {} {:08x} {:02x}:{:02x} {}",
            self.address.0, self.address.1, self.perms, self.offset, self.dev.0, self.dev.1, self.inode
        )?;
        if let Some(path) = &self.pathname {
            write!(f, " {}", path)?;
        }
        Ok(())
    }
}

/// All the mappings of a process, in the order the kernel listed them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MemoryMaps(pub Vec<MemoryMap>);

impl MemoryMaps {
    /// Return an iterator over [MemoryMap].
    pub fn iter(&self) -> std::slice::Iter<MemoryMap> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a MemoryMaps {
    type IntoIter = std::slice::Iter<'a, MemoryMap>;
    type Item = &'a MemoryMap;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for MemoryMaps {
    type IntoIter = std::vec::IntoIter<MemoryMap>;
    type Item = MemoryMap;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromBufRead for MemoryMaps {
    fn from_buf_read<R: BufRead>(r: R) -> VpmapResult<Self> {
        let mut vec = Vec::new();
        for line in r.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            vec.push(MemoryMap::from_line(&line)?);
        }
        Ok(MemoryMaps(vec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FromRead;

    #[test]
    fn test_parse_file_backed() {
        let line = "7f1234560000-7f1234580000 r--p 00000000 08:01 131074 /usr/lib/libc.so";
        let map = MemoryMap::from_line(line).unwrap();
        assert_eq!(map.start(), 0x7f1234560000);
        assert_eq!(map.end(), 0x7f1234580000);
        assert_eq!(map.perms, MMPermissions::READ | MMPermissions::PRIVATE);
        assert_eq!(map.perms.as_str(), "r--p");
        assert_eq!(map.offset, 0);
        assert_eq!(map.dev, (8, 1));
        assert_eq!(map.inode, 131074);
        assert_eq!(map.pathname.as_deref(), Some("/usr/lib/libc.so"));
        assert_eq!(map.kind(), MMapPath::Path(PathBuf::from("/usr/lib/libc.so")));
        assert_eq!(map.size(), 0x20000);
    }

    #[test]
    fn test_parse_no_pathname() {
        let map = MemoryMap::from_line("7ffd3a1c0000-7ffd3a1e1000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(map.pathname, None);
        assert_eq!(map.kind(), MMapPath::Anonymous);

        // the kernel pads with spaces up to the pathname column even when there is none
        let map = MemoryMap::from_line("7ffd3a1c0000-7ffd3a1e1000 rw-p 00000000 00:00 0                          ")
            .unwrap();
        assert_eq!(map.pathname, None);
    }

    #[test]
    fn test_parse_padded_and_spaced_pathname() {
        let line = "55d0c6e8e000-55d0c6eaf000 rw-s 0001a000 fd:02 2883598                    /tmp/my file (deleted)";
        let map = MemoryMap::from_line(line).unwrap();
        assert_eq!(map.perms, MMPermissions::READ | MMPermissions::WRITE | MMPermissions::SHARED);
        assert_eq!(map.offset, 0x1a000);
        assert_eq!(map.dev, (0xfd, 2));
        assert_eq!(map.pathname.as_deref(), Some("/tmp/my file (deleted)"));
    }

    #[test]
    fn test_special_paths() {
        let heap = MemoryMap::from_line("55d0c7000000-55d0c7021000 rw-p 00000000 00:00 0  [heap]").unwrap();
        assert_eq!(heap.kind(), MMapPath::Heap);
        let vsys =
            MemoryMap::from_line("ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0  [vsyscall]").unwrap();
        assert_eq!(vsys.kind(), MMapPath::Vsyscall);
        assert_eq!(vsys.perms, MMPermissions::EXECUTE | MMPermissions::PRIVATE);
        assert_eq!(MMapPath::from("[stack:1234]"), MMapPath::TStack(1234));
        assert_eq!(MMapPath::from("[anon:rust]"), MMapPath::Other("anon:rust".to_string()));
    }

    #[test]
    fn test_fixed_fields_round_trip() {
        let lines = [
            "7f1234560000-7f1234580000 r--p 00000000 08:01 131074 /usr/lib/libc.so",
            "400000-452000 r-xp 00001000 fd:00 65 /usr/bin/cat",
            "7ffd3a1c0000-7ffd3a1e1000 rw-p 00000000 00:00 0 [stack]",
            "7f0000000000-7f0000021000 ---s 00000000 00:05 4242",
        ];
        for line in lines {
            let map = MemoryMap::from_line(line).unwrap();
            let reparsed = MemoryMap::from_line(&map.to_string()).unwrap();
            assert_eq!(map, reparsed);
        }
        let map = MemoryMap::from_line(lines[1]).unwrap();
        assert_eq!(map.to_string(), "400000-452000 r-xp 00001000 fd:00 65 /usr/bin/cat");
    }

    #[test]
    fn test_malformed_lines() {
        let bad = [
            "",
            "7f1234560000 r--p 00000000 08:01 131074",
            "7f1234560000-7f1234580000 r--p 00000000 08:01",
            "7f1234560000-zz r--p 00000000 08:01 131074",
            "7f1234560000-7f1234580000 r--pp 00000000 08:01 131074",
            "7f1234560000-7f1234580000 rq-p 00000000 08:01 131074",
            "7f1234560000-7f1234580000 r--p 0000000g 08:01 131074",
            "7f1234560000-7f1234580000 r--p 00000000 0801 131074",
            "7f1234560000-7f1234580000 r--p 00000000 08:01 -5",
            "7f1234580000-7f1234560000 r--p 00000000 08:01 131074",
            "7f1234560000-7f1234560000 r--p 00000000 08:01 131074",
        ];
        for line in bad {
            match MemoryMap::from_line(line) {
                Err(VpmapError::MalformedMapsLine { line: l, .. }) => assert_eq!(l, line),
                x => panic!("{:?} should not parse: {:?}", line, x),
            }
        }
    }

    #[test]
    fn test_memory_maps() {
        let data = "00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/dbus-daemon

00651000-00652000 r--p 00051000 08:02 173521      /usr/bin/dbus-daemon
00e03000-00e24000 rw-p 00000000 00:00 0           [heap]
";
        let r = std::io::Cursor::new(data.as_bytes());
        let maps = MemoryMaps::from_read(r).unwrap();
        assert_eq!(maps.len(), 3);
        let starts: Vec<u64> = maps.iter().map(|m| m.start()).collect();
        assert_eq!(starts, vec![0x400000, 0x651000, 0xe03000]);
        assert_eq!(maps.0[2].kind(), MMapPath::Heap);
    }

    #[cfg(feature = "serde1")]
    #[test]
    fn test_serde() {
        let map = MemoryMap::from_line("400000-452000 r-xp 00001000 fd:00 65 /usr/bin/cat").unwrap();
        let json = serde_json::to_string(&map).unwrap();
        let back: MemoryMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
