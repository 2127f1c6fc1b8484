/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{alloc::Layout, ptr::NonNull};

use super::{AllocatorCore, AllocatorError, HostMemory};
use crate::DeviceRuntime;

/// The granularity at which page-locked host memory is handed out.
pub const PAGE_SIZE: usize = 4096;

/// An [`AllocatorCore`] handing out page-locked host memory obtained from a device
/// runtime.
///
/// Page-locked memory cannot be swapped out, which lets the device copy engines access
/// it directly. The allocator keeps a handle to the runtime that owns the mappings and
/// releases every allocation back through that same runtime.
#[derive(Debug, Clone)]
pub struct PinnedAllocator<R> {
    runtime: R,
}

impl<R> PinnedAllocator<R>
where
    R: DeviceRuntime,
{
    /// Construct a new allocator drawing page-locked memory from `runtime`.
    pub fn new(runtime: R) -> Self {
        Self { runtime }
    }

    /// Return the runtime backing this allocator.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }
}

// SAFETY: `DeviceRuntime::malloc_host` carries the same size and alignment contract as
// `AllocatorCore::allocate`, and we forward deallocation to the matching `free_host`.
unsafe impl<R> AllocatorCore for PinnedAllocator<R>
where
    R: DeviceRuntime,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        self.runtime.malloc_host(layout).map_err(|err| {
            tracing::debug!(bytes = layout.size(), %err, "page-locked allocation failed");
            AllocatorError
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: Layout) {
        // SAFETY: Inherited from the caller, who guarantees `ptr` came from `allocate`
        // which in turn obtained it from `malloc_host` with this `layout`.
        unsafe { self.runtime.free_host(ptr, layout) }
    }
}

impl<R> HostMemory for PinnedAllocator<R>
where
    R: DeviceRuntime,
{
    const PINNED: bool = true;
}

///////////
// Tests //
///////////
