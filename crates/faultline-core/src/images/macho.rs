//! # Mach-O structure walking
//!
//! Index-based traversal of Mach-O headers and load commands as they sit in
//! the memory of the running process. Every structure is copied out through
//! a [`MemoryReader`] before it is looked at, and every offset is checked
//! against the size the header declares, because a crashing process may
//! well have scribbled over its own images.
//!
//! Only native-endian headers (`MH_MAGIC`, `MH_MAGIC_64`) are accepted. A
//! byte-swapped header cannot belong to a loaded image and is treated as
//! corrupt.

use std::mem::size_of;

use object::endian::Endianness;
use object::macho::{
    self, DylibCommand, LoadCommand, MachHeader32, MachHeader64, Nlist32, Nlist64, Section32, Section64, SegmentCommand32,
    SegmentCommand64, SymtabCommand, UuidCommand,
};
use object::pod;

use super::string::ImageString;
use crate::log::LogLevel;
use crate::memory::{page_size, MemoryReader};
use crate::safe_log;
use crate::types::Address;

/// `n_desc` value the linker leaves on the lone symbol of a stripped image
const STRIPPED_DESC: u16 = 16;

fn native() -> Endianness
{
    Endianness::default()
}

/// Compare a fixed 16-byte, NUL-padded Mach-O name with `name`
pub(crate) fn fixed_name_eq(field: &[u8; 16], name: &[u8]) -> bool
{
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..len] == name
}

/// The fields of a Mach-O header the capture code needs
#[derive(Debug, Clone, Copy)]
pub(crate) struct MachHeader
{
    pub address: Address,
    pub is_64: bool,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
}

impl MachHeader
{
    pub fn read<M: MemoryReader>(memory: &M, address: Address) -> Option<Self>
    {
        let e = native();
        let magic: u32 = memory.read_pod(address)?;
        match magic {
            macho::MH_MAGIC_64 => {
                let header: MachHeader64<Endianness> = memory.read_pod(address)?;
                Some(Self {
                    address,
                    is_64: true,
                    cpu_type: header.cputype.get(e),
                    cpu_subtype: header.cpusubtype.get(e),
                    ncmds: header.ncmds.get(e),
                    sizeofcmds: header.sizeofcmds.get(e),
                })
            }
            macho::MH_MAGIC => {
                let header: MachHeader32<Endianness> = memory.read_pod(address)?;
                Some(Self {
                    address,
                    is_64: false,
                    cpu_type: header.cputype.get(e),
                    cpu_subtype: header.cpusubtype.get(e),
                    ncmds: header.ncmds.get(e),
                    sizeofcmds: header.sizeofcmds.get(e),
                })
            }
            _ => {
                safe_log!(LogLevel::Trace, "header at {} is corrupt (magic {:#x})", address, magic);
                None
            }
        }
    }

    fn header_size(&self) -> u64
    {
        if self.is_64 {
            size_of::<MachHeader64<Endianness>>() as u64
        } else {
            size_of::<MachHeader32<Endianness>>() as u64
        }
    }

    /// Iterate the load commands following the header
    pub fn commands<'m, M: MemoryReader>(&self, memory: &'m M) -> LoadCommands<'m, M>
    {
        let first = self.address + self.header_size();
        LoadCommands {
            memory,
            next: first,
            end: first + u64::from(self.sizeofcmds),
            remaining: self.ncmds,
        }
    }
}

/// One load command: its type, where it starts and how long it is
#[derive(Debug, Clone, Copy)]
pub(crate) struct Command
{
    pub cmd: u32,
    pub address: Address,
    pub size: u32,
}

impl Command
{
    fn read_as<T: pod::Pod, M: MemoryReader>(&self, memory: &M) -> Option<T>
    {
        if (self.size as usize) < size_of::<T>() {
            return None;
        }
        memory.read_pod(self.address)
    }
}

/// Bounds-checked iterator over load commands
///
/// Stops early, without error, at the first command that is unreadable,
/// shorter than a bare `load_command`, or runs past `sizeofcmds`.
pub(crate) struct LoadCommands<'m, M>
{
    memory: &'m M,
    next: Address,
    end: Address,
    remaining: u32,
}

impl<M: MemoryReader> Iterator for LoadCommands<'_, M>
{
    type Item = Command;

    fn next(&mut self) -> Option<Command>
    {
        if self.remaining == 0 {
            return None;
        }
        let e = native();
        let command = self
            .memory
            .read_pod::<LoadCommand<Endianness>>(self.next)
            .map(|lc| (lc.cmd.get(e), lc.cmdsize.get(e)))
            .filter(|&(_, size)| size as usize >= size_of::<LoadCommand<Endianness>>())
            .filter(|&(_, size)| self.next.value().saturating_add(u64::from(size)) <= self.end.value());

        let Some((cmd, size)) = command else {
            safe_log!(LogLevel::Trace, "load command at {} is unreadable or out of bounds", self.next);
            self.remaining = 0;
            return None;
        };
        let item = Command {
            cmd,
            address: self.next,
            size,
        };
        self.next = self.next + u64::from(size);
        self.remaining -= 1;
        Some(item)
    }
}

/// An `LC_SEGMENT` or `LC_SEGMENT_64` command
#[derive(Debug, Clone, Copy)]
pub(crate) struct Segment
{
    pub name: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    nsects: u32,
    sections: Address,
    section_size: u64,
}

impl Segment
{
    pub fn read<M: MemoryReader>(memory: &M, command: &Command) -> Option<Self>
    {
        let e = native();
        let (segment, header_size, section_size) = match command.cmd {
            macho::LC_SEGMENT_64 => {
                let seg: SegmentCommand64<Endianness> = command.read_as(memory)?;
                let segment = Self {
                    name: seg.segname,
                    vmaddr: seg.vmaddr.get(e),
                    vmsize: seg.vmsize.get(e),
                    fileoff: seg.fileoff.get(e),
                    nsects: seg.nsects.get(e),
                    sections: Address::ZERO,
                    section_size: 0,
                };
                (segment, size_of::<SegmentCommand64<Endianness>>(), size_of::<Section64<Endianness>>())
            }
            macho::LC_SEGMENT => {
                let seg: SegmentCommand32<Endianness> = command.read_as(memory)?;
                let segment = Self {
                    name: seg.segname,
                    vmaddr: u64::from(seg.vmaddr.get(e)),
                    vmsize: u64::from(seg.vmsize.get(e)),
                    fileoff: u64::from(seg.fileoff.get(e)),
                    nsects: seg.nsects.get(e),
                    sections: Address::ZERO,
                    section_size: 0,
                };
                (segment, size_of::<SegmentCommand32<Endianness>>(), size_of::<Section32<Endianness>>())
            }
            _ => return None,
        };

        // Never trust nsects beyond what the command can actually hold.
        let room = (command.size as usize).saturating_sub(header_size) / section_size;
        Some(Self {
            nsects: segment.nsects.min(u32::try_from(room).unwrap_or(u32::MAX)),
            sections: command.address + header_size as u64,
            section_size: section_size as u64,
            ..segment
        })
    }

    pub fn is_named(&self, name: &[u8]) -> bool
    {
        fixed_name_eq(&self.name, name)
    }

    /// Whether an unslid address falls inside this segment
    pub fn contains(&self, address: u64) -> bool
    {
        address >= self.vmaddr && address - self.vmaddr < self.vmsize
    }

    /// Unslid address and size of section `name` in this segment
    pub fn find_section<M: MemoryReader>(&self, memory: &M, name: &[u8]) -> Option<(u64, u64)>
    {
        let e = native();
        (0..u64::from(self.nsects)).find_map(|index| {
            let at = self.sections + index * self.section_size;
            if self.section_size == size_of::<Section64<Endianness>>() as u64 {
                let section: Section64<Endianness> = memory.read_pod(at)?;
                fixed_name_eq(&section.sectname, name).then(|| (section.addr.get(e), section.size.get(e)))
            } else {
                let section: Section32<Endianness> = memory.read_pod(at)?;
                fixed_name_eq(&section.sectname, name)
                    .then(|| (u64::from(section.addr.get(e)), u64::from(section.size.get(e))))
            }
        })
    }
}

/// `LC_UUID` payload
pub(crate) fn read_uuid<M: MemoryReader>(memory: &M, command: &Command) -> Option<[u8; 16]>
{
    let uuid: UuidCommand<Endianness> = command.read_as(memory)?;
    Some(uuid.uuid)
}

/// `LC_ID_DYLIB` current version, packed as `xxxx.yy.zz`
pub(crate) fn read_dylib_version<M: MemoryReader>(memory: &M, command: &Command) -> Option<u32>
{
    let dylib: DylibCommand<Endianness> = command.read_as(memory)?;
    Some(dylib.dylib.current_version.get(native()))
}

/// Whether any segment of the image covers the unslid `address`
pub(crate) fn segment_contains<M: MemoryReader>(memory: &M, header: &MachHeader, address: u64) -> bool
{
    header
        .commands(memory)
        .filter_map(|command| Segment::read(memory, &command))
        .any(|segment| segment.contains(address))
}

/// Linked address of file offset zero, derived from `__LINKEDIT`
///
/// Symbol and string table offsets in `LC_SYMTAB` are file offsets; adding
/// this (plus the slide) turns them into addresses.
pub(crate) fn linkedit_base<M: MemoryReader>(memory: &M, header: &MachHeader) -> Option<u64>
{
    header
        .commands(memory)
        .filter_map(|command| Segment::read(memory, &command))
        .find(|segment| segment.is_named(b"__LINKEDIT"))
        .map(|segment| segment.vmaddr.wrapping_sub(segment.fileoff))
}

/// Find the NUL terminator of the string at `address` within `max_len`
/// readable bytes
///
/// Reads are split at page boundaries so that an unreadable page after the
/// terminator does not hide a valid string.
pub(crate) fn find_c_str<M: MemoryReader>(memory: &M, address: Address, max_len: usize) -> Option<ImageString>
{
    if address.is_null() {
        return None;
    }
    let page = page_size().max(1) as u64;
    let mut chunk = [0u8; 64];
    let mut offset = 0usize;
    while offset < max_len {
        let at = address + offset as u64;
        let to_page_end = usize::try_from(page - at.value() % page).unwrap_or(usize::MAX);
        let len = chunk.len().min(max_len - offset).min(to_page_end);
        if !memory.copy_safely(at, &mut chunk[..len]) {
            return None;
        }
        if let Some(nul) = chunk[..len].iter().position(|&byte| byte == 0) {
            return Some(ImageString::new(address, offset + nul));
        }
        offset += len;
    }
    None
}

/// One decoded `nlist` entry
#[derive(Debug, Clone, Copy)]
struct RawSymbol
{
    strx: u32,
    n_type: u8,
    desc: u16,
    value: u64,
}

/// Closest preceding symbol found by [`find_symbol`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct SymbolMatch
{
    /// Unslid symbol value
    pub value: u64,
    /// `None` for stripped images
    pub name: Option<ImageString>,
}

/// Number of `u64` words read per chunk of the symbol table
const SYMBOL_CHUNK_WORDS: usize = 128;

/// Walk `nsyms` entries at `table`, a chunk at a time
fn scan_symbols<M: MemoryReader>(memory: &M, is_64: bool, table: Address, nsyms: u32, mut visit: impl FnMut(RawSymbol))
{
    let e = native();
    let entry_size = if is_64 {
        size_of::<Nlist64<Endianness>>()
    } else {
        size_of::<Nlist32<Endianness>>()
    };
    let per_chunk = SYMBOL_CHUNK_WORDS * 8 / entry_size;

    let mut storage = [0u64; SYMBOL_CHUNK_WORDS];
    let mut index = 0usize;
    let total = nsyms as usize;
    while index < total {
        let count = per_chunk.min(total - index);
        let bytes = &mut pod::bytes_of_slice_mut(&mut storage[..])[..count * entry_size];
        if !memory.copy_safely(table + (index * entry_size) as u64, bytes) {
            safe_log!(LogLevel::Debug, "symbol table at {} unreadable at entry {}", table, index);
            return;
        }
        let bytes = &bytes[..];
        if is_64 {
            let Ok((entries, _)) = pod::slice_from_bytes::<Nlist64<Endianness>>(bytes, count) else {
                return;
            };
            for entry in entries {
                visit(RawSymbol {
                    strx: entry.n_strx.get(e),
                    n_type: entry.n_type,
                    desc: entry.n_desc.get(e),
                    value: entry.n_value.get(e),
                });
            }
        } else {
            let Ok((entries, _)) = pod::slice_from_bytes::<Nlist32<Endianness>>(bytes, count) else {
                return;
            };
            for entry in entries {
                visit(RawSymbol {
                    strx: entry.n_strx.get(e),
                    n_type: entry.n_type,
                    desc: entry.n_desc.get(e),
                    value: u64::from(entry.n_value.get(e)),
                });
            }
        }
        index += count;
    }
}

/// Find the symbol closest below the unslid `address`
///
/// `segment_base` is the slid address of file offset zero. Debug (`N_STAB`)
/// entries and entries with a zero value are ignored. Among equally close
/// candidates the one appearing last in the table wins. The first symbol
/// table that yields a candidate ends the search.
pub(crate) fn find_symbol<M: MemoryReader>(memory: &M, header: &MachHeader, segment_base: u64, address: u64) -> Option<SymbolMatch>
{
    let e = native();
    for command in header.commands(memory) {
        if command.cmd != macho::LC_SYMTAB {
            continue;
        }
        let Some(symtab) = command.read_as::<SymtabCommand<Endianness>, _>(memory) else {
            continue;
        };
        let table = Address::new(segment_base.wrapping_add(u64::from(symtab.symoff.get(e))));
        let strings = Address::new(segment_base.wrapping_add(u64::from(symtab.stroff.get(e))));
        let strsize = symtab.strsize.get(e);

        let mut best: Option<RawSymbol> = None;
        let mut best_distance = u64::MAX;
        scan_symbols(memory, header.is_64, table, symtab.nsyms.get(e), |symbol| {
            if symbol.n_type & macho::N_STAB != 0 || symbol.value == 0 || address < symbol.value {
                return;
            }
            let distance = address - symbol.value;
            if distance <= best_distance {
                best = Some(symbol);
                best_distance = distance;
            }
        });

        if let Some(symbol) = best {
            let name = if symbol.desc == STRIPPED_DESC || symbol.strx >= strsize {
                None
            } else {
                let at = strings + u64::from(symbol.strx);
                find_c_str(memory, at, (strsize - symbol.strx) as usize).map(|name| strip_leading_underscore(memory, name))
            };
            return Some(SymbolMatch { value: symbol.value, name });
        }
    }
    None
}

fn strip_leading_underscore<M: MemoryReader>(memory: &M, name: ImageString) -> ImageString
{
    let mut first = [0u8; 1];
    if !name.is_empty() && memory.copy_safely(name.address(), &mut first) && first[0] == b'_' {
        name.skip(1)
    } else {
        name
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::memory::LiveMemory;

    #[test]
    fn test_fixed_name_eq()
    {
        let mut field = [0u8; 16];
        field[..6].copy_from_slice(b"__TEXT");
        assert!(fixed_name_eq(&field, b"__TEXT"));
        assert!(!fixed_name_eq(&field, b"__TEX"));
        assert!(fixed_name_eq(b"0123456789abcdef", b"0123456789abcdef"));
    }

    #[test]
    fn test_strip_leading_underscore()
    {
        let mut buffer = [0u8; 32];
        for (raw, stripped) in [(c"_main", c"main"), (c"__ZN4core", c"_ZN4core"), (c"plain", c"plain"), (c"_", c"")] {
            let name = find_c_str(&LiveMemory, Address::from_ptr(raw.as_ptr()), 64).unwrap();
            assert_eq!(name.len(), raw.to_bytes().len());
            assert_eq!(strip_leading_underscore(&LiveMemory, name).read(&mut buffer), Some(stripped));
        }
    }

    #[test]
    fn test_find_c_str_needs_terminator_within_bound()
    {
        let text = c"terminated";
        let at = Address::from_ptr(text.as_ptr());
        assert_eq!(find_c_str(&LiveMemory, at, 11).map(|s| s.len()), Some(10));
        assert!(find_c_str(&LiveMemory, at, 10).is_none());
        assert!(find_c_str(&LiveMemory, Address::ZERO, 10).is_none());
    }
}
