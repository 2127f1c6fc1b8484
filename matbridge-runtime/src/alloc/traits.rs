/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::ptr::NonNull;

use thiserror::Error;

/// Indicate that a host allocation has failed.
///
/// The error carries no payload: building context for a failed allocation would need
/// more memory, which is exactly what we just failed to get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("host memory allocation failed")]
pub struct AllocatorError;

/// A host memory allocator backing the buffers of host matrices.
///
/// # Safety
///
/// Implementations must ensure that if `allocate` succeeds, the returned slice has a length
/// of at least `layout.size()` bytes and an alignment of at least `layout.align()`. If this
/// cannot be satisfied, then an error **must** be returned.
pub unsafe trait AllocatorCore {
    /// Allocate space for at least `layout.size()` bytes aligned to at least
    /// `layout.align()`.
    fn allocate(&self, layout: std::alloc::Layout) -> Result<NonNull<[u8]>, AllocatorError>;

    /// Deallocation companion to `allocate`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that
    ///
    /// 1. `ptr` is currently allocated from this allocator.
    /// 2. `ptr` has the same base pointer as the slice-pointer returned from [`Self::allocate`].
    /// 3. `layout` is the same layout that was passed to [`Self::allocate`] for this pointer.
    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: std::alloc::Layout);
}

/// A cloneable [`AllocatorCore`].
///
/// Owning buffers keep a clone of their allocator so they can release themselves, so
/// users should implement [`AllocatorCore`] and rely on this blanket implementation.
pub trait Allocator: AllocatorCore + Clone {}

impl<T> Allocator for T where T: AllocatorCore + Clone {}

/// The memory domain an allocator hands out.
///
/// The choice between pageable and page-locked memory is made once, through the type
/// of the allocator, so a matrix can never switch allocators halfway through its life.
pub trait HostMemory: Allocator + std::fmt::Debug {
    /// Whether memory from this allocator is page-locked.
    const PINNED: bool;
}
