//! # dyld Image List
//!
//! [`ImageSource`] backed by the dynamic linker's list of loaded images.
//!
//! dyld may add or remove images between any two calls, so an index that was
//! valid a moment ago can return a null header. Every accessor therefore
//! tolerates stale indices.

use std::ffi::CStr;

use super::ffi;
use crate::images::ImageSource;
use crate::types::Address;

/// Images currently registered with dyld
#[derive(Debug, Clone, Copy, Default)]
pub struct DyldImages;

fn dyld_index(index: usize) -> Option<u32>
{
    u32::try_from(index).ok()
}

impl ImageSource for DyldImages
{
    fn image_count(&self) -> usize
    {
        // SAFETY: reads dyld's image count.
        unsafe { ffi::_dyld_image_count() as usize }
    }

    fn image_header(&self, index: usize) -> Option<Address>
    {
        let index = dyld_index(index)?;
        // SAFETY: out-of-range indices return null.
        let header = unsafe { ffi::_dyld_get_image_header(index) };
        (!header.is_null()).then(|| Address::from_ptr(header))
    }

    fn image_slide(&self, index: usize) -> u64
    {
        let Some(index) = dyld_index(index) else {
            return 0;
        };
        // SAFETY: out-of-range indices return 0.
        unsafe { ffi::_dyld_get_image_vmaddr_slide(index) as u64 }
    }

    fn image_name(&self, index: usize) -> Option<&'static CStr>
    {
        let index = dyld_index(index)?;
        // SAFETY: dyld owns the string for as long as the image stays loaded.
        unsafe {
            let name = ffi::_dyld_get_image_name(index);
            (!name.is_null()).then(|| CStr::from_ptr(name))
        }
    }
}
