//! # Binary Image Table
//!
//! Answers "which loaded image, and which symbol in it, owns address X" and
//! describes loaded images for a crash report.
//!
//! ## Design
//!
//! The table holds no state of its own. Each query re-enumerates the images
//! through an [`ImageSource`] (dyld on Apple targets) and reads their Mach-O
//! structures through a [`MemoryReader`], so it always reflects the images
//! loaded at the moment of the call. Nothing allocates, which keeps every
//! query usable from a signal handler.
//!
//! ## Resolution rules
//!
//! - The first image with a segment containing the address wins; there is
//!   no fallback to the nearest image.
//! - The symbol is the closest one at or below the address, ignoring
//!   `N_STAB` entries and zero values. Equal distances go to the later entry.
//! - Stripped images report the symbol address but no name.
//! - One leading `_` is removed from symbol names.
//!
//! Symbol names and crash-info strings come back as [`ImageString`]
//! locations, read through the same [`MemoryReader`] when they are printed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use faultline_core::images;
//! use faultline_core::types::Address;
//!
//! fn where_am_i() {}
//!
//! let pc = Address::from(where_am_i as usize);
//! if let Some(info) = images::resolve(pc) {
//!     let mut name = [0u8; 256];
//!     let symbol = info.symbol_name.and_then(|symbol| symbol.read(&mut name));
//!     println!("{:?} + {:#x}", symbol, info.offset(pc).unwrap_or(0));
//! }
//! ```

mod crash_info;
mod macho;
mod source;
mod string;

use std::ffi::CStr;

pub use crash_info::{CrashInfo, MAX_CRASH_INFO_STRING_LENGTH};
use macho::{find_symbol, linkedit_base, read_dylib_version, read_uuid, segment_contains, MachHeader, Segment};
use object::macho as consts;
pub use source::{ImageSource, NoImages};
pub use string::ImageString;

use crate::log::LogLevel;
use crate::memory::{LiveMemory, MemoryReader};
use crate::platform::LiveImages;
use crate::safe_log;
use crate::types::Address;

/// Description of one loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryImage
{
    /// Address of the Mach-O header in memory
    pub address: Address,
    /// Linked (unslid) address of `__TEXT`
    pub vm_address: u64,
    /// Size of `__TEXT`, not of the whole file
    pub size: u64,
    /// Load slide
    pub slide: u64,
    pub name: Option<&'static CStr>,
    /// Raw `LC_UUID` bytes
    pub uuid: Option<[u8; 16]>,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub revision_version: u32,
    pub crash_info: CrashInfo,
}

impl BinaryImage
{
    /// Build identifier as a [`uuid::Uuid`]
    pub fn uuid(&self) -> Option<uuid::Uuid>
    {
        self.uuid.map(uuid::Uuid::from_bytes)
    }

    /// Name as UTF-8, if it is valid UTF-8
    pub fn name_str(&self) -> Option<&'static str>
    {
        self.name.and_then(|name| name.to_str().ok())
    }
}

/// Result of resolving an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo
{
    pub image_index: usize,
    pub image_name: Option<&'static CStr>,
    /// Header address of the owning image
    pub image_address: Address,
    /// Slid address of the closest preceding symbol
    pub symbol_address: Option<Address>,
    /// `None` when no symbol matched or the image is stripped
    pub symbol_name: Option<ImageString>,
}

impl SymbolInfo
{
    /// Distance from the symbol to `address`
    pub fn offset(&self, address: Address) -> Option<u64>
    {
        self.symbol_address.and_then(|symbol| address.offset_from(symbol))
    }
}

/// Query interface over an [`ImageSource`]
///
/// [`ImageTable::live`] inspects the current process; tests build tables over
/// synthetic images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTable<S = LiveImages, M = LiveMemory>
{
    source: S,
    memory: M,
}

impl ImageTable<LiveImages, LiveMemory>
{
    /// Table over the images loaded into this process
    pub fn live() -> Self
    {
        Self::new(LiveImages::default(), LiveMemory)
    }
}

impl<S: ImageSource, M: MemoryReader> ImageTable<S, M>
{
    pub fn new(source: S, memory: M) -> Self
    {
        Self { source, memory }
    }

    /// Reader the table inspects images through
    pub fn memory(&self) -> &M
    {
        &self.memory
    }

    pub fn image_count(&self) -> usize
    {
        self.source.image_count()
    }

    /// Describe image `index`, or `None` if it is gone or corrupt
    pub fn image_at(&self, index: usize) -> Option<BinaryImage>
    {
        let header = self.source.image_header(index)?;
        self.describe(header, self.source.image_name(index))
    }

    /// Iterate descriptions of every image that can be described
    pub fn images(&self) -> impl Iterator<Item = BinaryImage> + '_
    {
        (0..self.image_count()).filter_map(move |index| self.image_at(index))
    }

    /// Describe the image whose header is at `header`
    ///
    /// One pass over the load commands collects `__TEXT`, `LC_UUID`,
    /// `LC_ID_DYLIB` and the location of `__DATA,__crash_info`.
    pub fn describe(&self, header: Address, name: Option<&'static CStr>) -> Option<BinaryImage>
    {
        let mach = MachHeader::read(&self.memory, header)?;

        let mut text: Option<(u64, u64)> = None;
        let mut uuid = None;
        let mut version = 0u32;
        let mut crash_section: Option<(u64, u64)> = None;
        for command in mach.commands(&self.memory) {
            match command.cmd {
                consts::LC_SEGMENT | consts::LC_SEGMENT_64 => {
                    let Some(segment) = Segment::read(&self.memory, &command) else {
                        continue;
                    };
                    if segment.is_named(b"__TEXT") {
                        text = Some((segment.vmaddr, segment.vmsize));
                    } else if segment.is_named(b"__DATA") && mach.is_64 {
                        crash_section = crash_section.or_else(|| segment.find_section(&self.memory, b"__crash_info"));
                    }
                }
                consts::LC_UUID => uuid = read_uuid(&self.memory, &command),
                consts::LC_ID_DYLIB => version = read_dylib_version(&self.memory, &command).unwrap_or(0),
                _ => {}
            }
        }

        let (vm_address, size) = text.unwrap_or((0, 0));
        let slide = header.value().wrapping_sub(vm_address);
        let crash_info = match crash_section {
            Some((address, section_size)) => {
                safe_log!(LogLevel::Trace, "found crash info section in {:?}", name);
                crash_info::read_crash_info(&self.memory, Address::new(address.wrapping_add(slide)), section_size)
            }
            None => CrashInfo::default(),
        };

        Some(BinaryImage {
            address: header,
            vm_address,
            size,
            slide,
            name,
            uuid,
            cpu_type: mach.cpu_type,
            cpu_subtype: mach.cpu_subtype,
            major_version: version >> 16,
            minor_version: (version >> 8) & 0xff,
            revision_version: version & 0xff,
            crash_info,
        })
    }

    /// Index of the first image whose path equals (or contains) `name`
    pub fn find_by_name(&self, name: &str, exact: bool) -> Option<usize>
    {
        let needle = name.as_bytes();
        (0..self.image_count()).find(|&index| {
            let Some(path) = self.source.image_name(index) else {
                return false;
            };
            let path = path.to_bytes();
            if exact {
                path == needle
            } else {
                needle.is_empty() || path.windows(needle.len()).any(|window| window == needle)
            }
        })
    }

    /// `LC_UUID` of the image found by [`find_by_name`](Self::find_by_name)
    pub fn image_uuid(&self, name: &str, exact: bool) -> Option<[u8; 16]>
    {
        let index = self.find_by_name(name, exact)?;
        let header = MachHeader::read(&self.memory, self.source.image_header(index)?)?;
        header
            .commands(&self.memory)
            .find(|command| command.cmd == consts::LC_UUID)
            .and_then(|command| read_uuid(&self.memory, &command))
    }

    /// Index of the first image with a segment covering `address`
    pub fn image_index_containing(&self, address: Address) -> Option<usize>
    {
        (0..self.image_count()).find(|&index| {
            let Some(header) = self.source.image_header(index).and_then(|at| MachHeader::read(&self.memory, at)) else {
                return false;
            };
            let unslid = address.value().wrapping_sub(self.source.image_slide(index));
            segment_contains(&self.memory, &header, unslid)
        })
    }

    /// Map `address` to its image and closest preceding symbol
    ///
    /// Read the symbol name through the same reader with
    /// [`ImageString::read_with`] (or [`ImageString::read`] for a live table).
    ///
    /// Returns `None` if no image covers the address, or if the owning image
    /// has no `__LINKEDIT` to locate its symbol table.
    pub fn resolve(&self, address: Address) -> Option<SymbolInfo>
    {
        let index = self.image_index_containing(address)?;
        let header_address = self.source.image_header(index)?;
        let header = MachHeader::read(&self.memory, header_address)?;
        let slide = self.source.image_slide(index);
        let unslid = address.value().wrapping_sub(slide);
        let segment_base = linkedit_base(&self.memory, &header)?.wrapping_add(slide);
        if segment_base == 0 {
            return None;
        }

        let symbol = find_symbol(&self.memory, &header, segment_base, unslid);
        Some(SymbolInfo {
            image_index: index,
            image_name: self.source.image_name(index),
            image_address: header_address,
            symbol_address: symbol.map(|s| Address::new(s.value.wrapping_add(slide))),
            symbol_name: symbol.and_then(|s| s.name),
        })
    }
}

/// Number of images loaded into this process
pub fn image_count() -> usize
{
    ImageTable::live().image_count()
}

/// Describe loaded image `index`
pub fn image_at(index: usize) -> Option<BinaryImage>
{
    ImageTable::live().image_at(index)
}

/// Find a loaded image by path
pub fn find_by_name(name: &str, exact: bool) -> Option<usize>
{
    ImageTable::live().find_by_name(name, exact)
}

/// UUID of a loaded image found by path
pub fn image_uuid(name: &str, exact: bool) -> Option<[u8; 16]>
{
    ImageTable::live().image_uuid(name, exact)
}

/// Resolve an address in this process to an image and symbol
pub fn resolve(address: Address) -> Option<SymbolInfo>
{
    ImageTable::live().resolve(address)
}
