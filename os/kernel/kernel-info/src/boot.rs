//! # Kernel Boot Information
//!
//! The kernel is loaded by a Multiboot (v1) compliant loader. The loader
//! leaves a [`MultibootInfo`] record in low physical memory; the kernel only
//! needs two things from it: the bounds of usable RAM and the command line.
//!
//! Everything in here works on byte slices and plain values so it can be fed
//! from a real boot or from a test.

use core::str::FromStr;
use kernel_memory_addresses::PhysicalAddress;
use log::LevelFilter;

/// Value in `EAX` when a Multiboot loader jumps to the kernel.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Magic number of the Multiboot header embedded in the kernel image.
pub const MULTIBOOT_HEADER_MAGIC: u32 = 0x1BAD_B002;

/// `mem_lower`/`mem_upper` are valid.
pub const FLAG_MEMORY: u32 = 1 << 0;

/// `cmdline` is valid.
pub const FLAG_CMDLINE: u32 = 1 << 2;

/// `mmap_length`/`mmap_addr` are valid.
pub const FLAG_MMAP: u32 = 1 << 6;

/// Memory map entry type for usable RAM.
pub const MMAP_TYPE_RAM: u32 = 1;

/// Information record handed over by the boot loader.
///
/// Only the fields up to the memory map are modeled.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct MultibootInfo {
    pub flags: u32,
    /// KiB of memory below 1 MiB.
    pub mem_lower: u32,
    /// KiB of memory above 1 MiB.
    pub mem_upper: u32,
    pub boot_device: u32,
    /// Physical address of a NUL-terminated command line.
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    /// Size of the memory map buffer in bytes.
    pub mmap_length: u32,
    /// Physical address of the memory map buffer.
    pub mmap_addr: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootInfoError {
    #[error("not loaded by a multiboot loader (magic {0:#010x})")]
    BadMagic(u32),
    #[error("the boot loader provided neither a memory map nor memory sizes")]
    NoMemoryInformation,
    #[error("the memory map lists no usable RAM below 4 GiB")]
    NoUsableRam,
    #[error("memory map entry at byte {offset} is truncated")]
    TruncatedMemoryMap { offset: usize },
}

/// Checks the value the loader left in `EAX`.
///
/// # Errors
/// [`BootInfoError::BadMagic`] if the kernel was not started by a Multiboot loader.
pub const fn check_magic(magic: u32) -> Result<(), BootInfoError> {
    if magic == MULTIBOOT_BOOTLOADER_MAGIC {
        Ok(())
    } else {
        Err(BootInfoError::BadMagic(magic))
    }
}

/// Half-open range `[start, end)` of usable physical memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRange {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl MemoryRange {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
        }
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end.as_u32().saturating_sub(self.start.as_u32())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MultibootInfo {
    #[inline]
    #[must_use]
    pub const fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Physical location and length of the memory map, if present.
    #[must_use]
    pub const fn mmap_region(&self) -> Option<(PhysicalAddress, usize)> {
        if self.has(FLAG_MMAP) {
            Some((PhysicalAddress::new(self.mmap_addr), self.mmap_length as usize))
        } else {
            None
        }
    }

    /// Physical address of the command line, if present.
    #[must_use]
    pub const fn cmdline_addr(&self) -> Option<PhysicalAddress> {
        if self.has(FLAG_CMDLINE) && self.cmdline != 0 {
            Some(PhysicalAddress::new(self.cmdline))
        } else {
            None
        }
    }

    /// Determines the usable RAM range.
    ///
    /// `mmap` must be the buffer described by [`mmap_region`](Self::mmap_region)
    /// (pass an empty slice if there is none). The **last** RAM entry wins,
    /// which on PC firmware is the large region above 1 MiB. Without a memory
    /// map, the `mem_upper` size is used starting at 1 MiB.
    ///
    /// # Errors
    /// See [`BootInfoError`].
    pub fn memory_range(&self, mmap: &[u8]) -> Result<MemoryRange, BootInfoError> {
        if self.has(FLAG_MMAP) {
            let mut found = None;
            for entry in MemoryMapIter::new(mmap) {
                let entry = entry?;
                log::trace!(
                    "mmap entry: base={:#x} len={:#x} type={}",
                    entry.base,
                    entry.length,
                    entry.kind
                );
                if let Some(range) = entry.ram_range() {
                    found = Some(range);
                }
            }
            return found.ok_or(BootInfoError::NoUsableRam);
        }

        if self.has(FLAG_MEMORY) {
            let start = 0x0010_0000_u32;
            let bytes = u64::from(self.mem_upper) * 1024;
            let end = u32::try_from(u64::from(start) + bytes).unwrap_or(u32::MAX);
            return Ok(MemoryRange::new(start, end));
        }

        Err(BootInfoError::NoMemoryInformation)
    }
}

/// One entry of the loader's memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
}

impl MemoryMapEntry {
    /// Size in bytes of an entry without its leading `size` field.
    pub const ENCODED_LEN: usize = 20;

    #[must_use]
    pub const fn is_ram(&self) -> bool {
        self.kind == MMAP_TYPE_RAM
    }

    /// The part of a RAM entry addressable with 32 bits.
    #[must_use]
    pub fn ram_range(&self) -> Option<MemoryRange> {
        if !self.is_ram() || self.length == 0 {
            return None;
        }
        let start = u32::try_from(self.base).ok()?;
        let end = u32::try_from(self.base.saturating_add(self.length)).unwrap_or(u32::MAX);
        Some(MemoryRange::new(start, end))
    }
}

/// Walks a raw memory map buffer.
///
/// Each entry is prefixed with its own size, which does not count the size
/// field itself.
pub struct MemoryMapIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> MemoryMapIter<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_u32(&self, at: usize) -> Option<u32> {
        let b = self.bytes.get(at..at + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&self, at: usize) -> Option<u64> {
        let lo = self.read_u32(at)?;
        let hi = self.read_u32(at + 4)?;
        Some(u64::from(hi) << 32 | u64::from(lo))
    }
}

impl Iterator for MemoryMapIter<'_> {
    type Item = Result<MemoryMapEntry, BootInfoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }

        let at = self.offset;
        let parsed = (|| {
            let size = self.read_u32(at)? as usize;
            if size < MemoryMapEntry::ENCODED_LEN {
                return None;
            }
            let base = self.read_u64(at + 4)?;
            let length = self.read_u64(at + 12)?;
            let kind = self.read_u32(at + 20)?;
            Some((size, MemoryMapEntry { base, length, kind }))
        })();

        match parsed {
            Some((size, entry)) => {
                self.offset = at + 4 + size;
                Some(Ok(entry))
            }
            None => {
                self.offset = self.bytes.len();
                Some(Err(BootInfoError::TruncatedMemoryMap { offset: at }))
            }
        }
    }
}

/// Options read from the kernel command line.
///
/// Recognized keys:
/// - `log=<off|error|warn|info|debug|trace>` overrides the maximum log level.
/// - `paging=<on|off>` controls whether the kernel page directory is built.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootOptions {
    pub log_level: Option<LevelFilter>,
    pub paging: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            log_level: None,
            paging: true,
        }
    }
}

impl BootOptions {
    /// Parses a whitespace separated `key=value` command line.
    ///
    /// Words without `=` (typically the kernel path) are skipped. Unknown
    /// keys and malformed values are reported and ignored.
    #[must_use]
    pub fn parse(cmdline: &str) -> Self {
        let mut options = Self::default();
        for word in cmdline.split_whitespace() {
            let Some((key, value)) = word.split_once('=') else {
                continue;
            };
            match key {
                "log" => match LevelFilter::from_str(value) {
                    Ok(level) => options.log_level = Some(level),
                    Err(_) => log::warn!("ignoring invalid log level {value:?}"),
                },
                "paging" => match value {
                    "on" | "1" | "true" => options.paging = true,
                    "off" | "0" | "false" => options.paging = false,
                    _ => log::warn!("ignoring invalid paging option {value:?}"),
                },
                _ => log::warn!("ignoring unknown boot option {key:?}"),
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(base: u64, length: u64, kind: u32) -> [u8; 24] {
        let mut e = [0u8; 24];
        e[0..4].copy_from_slice(&20u32.to_le_bytes());
        e[4..12].copy_from_slice(&base.to_le_bytes());
        e[12..20].copy_from_slice(&length.to_le_bytes());
        e[20..24].copy_from_slice(&kind.to_le_bytes());
        e
    }

    #[test]
    fn last_ram_entry_wins() {
        let mut mmap = Vec::new();
        mmap.extend_from_slice(&entry(0, 0x9_FC00, MMAP_TYPE_RAM));
        mmap.extend_from_slice(&entry(0x9_FC00, 0x400, 2));
        mmap.extend_from_slice(&entry(0x10_0000, 0x0FF0_0000, MMAP_TYPE_RAM));
        mmap.extend_from_slice(&entry(0xFFFC_0000, 0x4_0000, 2));

        let info = MultibootInfo {
            flags: FLAG_MMAP | FLAG_MEMORY,
            mem_upper: 1,
            mmap_length: u32::try_from(mmap.len()).unwrap(),
            ..MultibootInfo::default()
        };
        let range = info.memory_range(&mmap).unwrap();
        assert_eq!(range, MemoryRange::new(0x10_0000, 0x1000_0000));
        assert_eq!(range.len(), 0x0FF0_0000);
    }

    #[test]
    fn ram_above_4g_is_skipped() {
        let mut mmap = Vec::new();
        mmap.extend_from_slice(&entry(0x10_0000, 0x100_0000, MMAP_TYPE_RAM));
        mmap.extend_from_slice(&entry(0x1_0000_0000, 0x1000_0000, MMAP_TYPE_RAM));
        let info = MultibootInfo {
            flags: FLAG_MMAP,
            ..MultibootInfo::default()
        };
        assert_eq!(info.memory_range(&mmap), Ok(MemoryRange::new(0x10_0000, 0x110_0000)));
    }

    #[test]
    fn falls_back_to_mem_upper() {
        let info = MultibootInfo {
            flags: FLAG_MEMORY,
            mem_upper: 15 * 1024,
            ..MultibootInfo::default()
        };
        assert_eq!(info.memory_range(&[]), Ok(MemoryRange::new(0x10_0000, 0x100_0000)));
    }

    #[test]
    fn errors() {
        assert_eq!(
            MultibootInfo::default().memory_range(&[]),
            Err(BootInfoError::NoMemoryInformation)
        );

        let info = MultibootInfo {
            flags: FLAG_MMAP,
            ..MultibootInfo::default()
        };
        let reserved = entry(0, 0x1000, 2);
        assert_eq!(info.memory_range(&reserved), Err(BootInfoError::NoUsableRam));
        assert_eq!(
            info.memory_range(&reserved[..10]),
            Err(BootInfoError::TruncatedMemoryMap { offset: 0 })
        );

        assert!(check_magic(MULTIBOOT_BOOTLOADER_MAGIC).is_ok());
        assert_eq!(check_magic(0), Err(BootInfoError::BadMagic(0)));
    }

    #[test]
    fn boot_options() {
        assert_eq!(BootOptions::parse(""), BootOptions::default());

        let o = BootOptions::parse("/boot/kernel.bin log=trace paging=off bogus=1");
        assert_eq!(o.log_level, Some(LevelFilter::Trace));
        assert!(!o.paging);

        let o = BootOptions::parse("log=loud paging=maybe");
        assert_eq!(o.log_level, None);
        assert!(o.paging);
    }

    #[test]
    fn cmdline_requires_flag() {
        let mut info = MultibootInfo {
            cmdline: 0x1_0000,
            ..MultibootInfo::default()
        };
        assert_eq!(info.cmdline_addr(), None);
        info.flags |= FLAG_CMDLINE;
        assert_eq!(info.cmdline_addr(), Some(PhysicalAddress::new(0x1_0000)));
    }
}
