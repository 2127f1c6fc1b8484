/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Host allocators for pageable and page-locked ("pinned") memory.

use std::{alloc::Layout, ptr::NonNull};

mod pinned;
mod traits;

pub use pinned::{PinnedAllocator, PAGE_SIZE};
pub use traits::{Allocator, AllocatorCore, AllocatorError, HostMemory};

/// A handle to Rust's global allocator, used for ordinary pageable host memory.
///
/// This type does not support allocations of size 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GlobalAllocator;

// SAFETY: This is a thin wrapper around Rust's built-in allocation and deallocation
// methods that refuses zero sized layouts.
//
// The returned slice from `allocate` always has the exact size and alignment as `layout`.
unsafe impl AllocatorCore for GlobalAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        if layout.size() == 0 {
            return Err(AllocatorError);
        }

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        let ptr = std::ptr::slice_from_raw_parts_mut(ptr, layout.size());
        NonNull::new(ptr).ok_or(AllocatorError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: Layout) {
        // SAFETY: The caller has the responsibility to ensure that `ptr` and `layout`
        // came from a previous allocation.
        unsafe { std::alloc::dealloc(ptr.as_ptr().cast::<u8>(), layout) }
    }
}

impl HostMemory for GlobalAllocator {
    const PINNED: bool = false;
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T>() {
        let layout = Layout::new::<T>();
        let ptr = GlobalAllocator.allocate(layout).unwrap();

        assert_eq!(ptr.len(), layout.size());
        assert_eq!((ptr.as_ptr().cast::<u8>() as usize) % layout.align(), 0);

        // SAFETY: `ptr` was obtained from this allocator with the specified `layout`.
        unsafe { GlobalAllocator.deallocate(ptr, layout) };
    }

    #[test]
    fn global_allocator_rejects_empty_layouts() {
        assert_eq!(
            GlobalAllocator.allocate(Layout::new::<()>()),
            Err(AllocatorError)
        );
    }

    #[test]
    fn global_allocator_respects_layout() {
        roundtrip::<u8>();
        roundtrip::<f32>();
        roundtrip::<f64>();
        roundtrip::<[f64; 3]>();
        roundtrip::<[u32; 17]>();
    }

    #[test]
    fn global_allocator_is_pageable() {
        const { assert!(!GlobalAllocator::PINNED) };
    }
}
