//! Where the list of loaded images comes from.

use std::ffi::CStr;

use crate::types::Address;

/// Read-only view of the images loaded into the process
///
/// Implementations must not cache: the loader can add or remove images at
/// any time, and an index that was valid a moment ago may no longer be.
/// Every accessor returns `None` (or zero) for indices that have gone stale.
pub trait ImageSource
{
    /// Number of images currently loaded
    fn image_count(&self) -> usize;

    /// Address of the Mach-O header of image `index`
    fn image_header(&self, index: usize) -> Option<Address>;

    /// Load slide of image `index` (actual address minus linked address)
    fn image_slide(&self, index: usize) -> u64;

    /// Path of image `index`
    fn image_name(&self, index: usize) -> Option<&'static CStr>;
}

/// An image source with nothing in it
///
/// Used on platforms without Mach-O images.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImages;

impl ImageSource for NoImages
{
    fn image_count(&self) -> usize
    {
        0
    }

    fn image_header(&self, _index: usize) -> Option<Address>
    {
        None
    }

    fn image_slide(&self, _index: usize) -> u64
    {
        0
    }

    fn image_name(&self, _index: usize) -> Option<&'static CStr>
    {
        None
    }
}
