//! Buffer allocator port
//!
//! The slave codec never owns memory itself. It asks an [`Allocator`] for a
//! buffer of the exact size it is about to build and releases it again by
//! requesting size `0`.

use crate::error::Error;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// What the requested buffer is used for.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPurpose {
    /// Copy of an incoming ADU. The bundled sessions parse requests in place
    /// and never ask for one.
    Request,
    /// Outgoing ADU built by the slave codec.
    Response,
}

/// Buffer allocation capability.
pub trait Allocator {
    /// Resize the held buffer to exactly `size` bytes.
    ///
    /// A `size` of `0` releases the buffer and always succeeds. On failure
    /// no buffer is held afterwards.
    fn allocate(&mut self, purpose: BufferPurpose, size: usize) -> Result<(), Error>;

    /// The currently held buffer, empty if none.
    fn buffer(&self) -> &[u8];

    fn buffer_mut(&mut self) -> &mut [u8];
}

impl<A: Allocator + ?Sized> Allocator for &mut A {
    fn allocate(&mut self, purpose: BufferPurpose, size: usize) -> Result<(), Error> {
        (**self).allocate(purpose, size)
    }

    fn buffer(&self) -> &[u8] {
        (**self).buffer()
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        (**self).buffer_mut()
    }
}

/// Default capacity of a [`StaticAllocator`], one full TCP ADU. Any RTU
/// frame fits as well.
pub const DEFAULT_STATIC_CAPACITY: usize = 260;

/// Single slot allocator backed by a fixed array.
///
/// At most one buffer is associated with the region at any time.
#[derive(Debug, Clone)]
pub struct StaticAllocator<const N: usize = DEFAULT_STATIC_CAPACITY> {
    region: [u8; N],
    len: Option<usize>,
}

impl<const N: usize> StaticAllocator<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region: [0; N],
            len: None,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Whether a buffer is currently associated with the region.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.len.is_some()
    }
}

impl<const N: usize> Default for StaticAllocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Allocator for StaticAllocator<N> {
    fn allocate(&mut self, _: BufferPurpose, size: usize) -> Result<(), Error> {
        if size == 0 {
            if self.len.take().is_some() {
                self.region.fill(0);
            }
            return Ok(());
        }
        if size > N {
            #[cfg(feature = "log")]
            log::debug!("Static buffer of {N} bytes cannot hold {size} bytes");
            self.len = None;
            return Err(Error::Allocation);
        }
        self.len = Some(size);
        Ok(())
    }

    fn buffer(&self) -> &[u8] {
        &self.region[..self.len.unwrap_or(0)]
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.region[..self.len.unwrap_or(0)]
    }
}

/// Heap allocator resizing its buffer to exactly the requested size.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, Default)]
pub struct DynamicAllocator {
    buf: Vec<u8>,
    limit: Option<usize>,
}

#[cfg(feature = "alloc")]
impl DynamicAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            limit: None,
        }
    }

    /// Refuse any request above `limit` bytes.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit: Some(limit),
        }
    }

    fn release(&mut self) {
        self.buf = Vec::new();
    }
}

#[cfg(feature = "alloc")]
impl Allocator for DynamicAllocator {
    fn allocate(&mut self, _: BufferPurpose, size: usize) -> Result<(), Error> {
        if size == 0 {
            self.release();
            return Ok(());
        }
        if self.limit.is_some_and(|limit| size > limit) {
            self.release();
            return Err(Error::Allocation);
        }
        if size > self.buf.len() {
            let additional = size - self.buf.len();
            if self.buf.try_reserve_exact(additional).is_err() {
                #[cfg(feature = "log")]
                log::warn!("Failed to allocate {size} bytes");
                self.release();
                return Err(Error::Allocation);
            }
            self.buf.resize(size, 0);
        } else {
            self.buf.truncate(size);
            self.buf.shrink_to_fit();
        }
        Ok(())
    }

    fn buffer(&self) -> &[u8] {
        &self.buf
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}
