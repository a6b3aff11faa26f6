//! # I/O
//!
//! Allocation-free descriptor I/O for use while a fault is being handled,
//! plus the file utilities a crash reporter needs around it.
//!
//! - [`fd`]: exact reads and writes on raw descriptors
//! - [`buffered`]: [`BufferedWriter`] and [`BufferedReader`]
//! - [`files`]: directory management and memory-mapped files

pub mod buffered;
pub mod fd;
pub mod files;

pub use buffered::{BufferedReader, BufferedWriter};
pub use fd::{read_bytes_from_fd, read_line_from_fd, write_bytes_to_fd, write_fmt_to_fd, write_string_to_fd};
pub use files::{delete_contents_of_path, last_path_entry, make_path, mmap_file, read_entire_file, remove_file, MappedFile};
