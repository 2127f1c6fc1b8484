/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    alloc::Layout,
    ptr::NonNull,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use matbridge_runtime::{
    alloc::{AllocatorCore, AllocatorError, HostMemory},
    DevicePtr, DeviceRuntime, DeviceTransfer, RuntimeError, SimulatedDevice,
};

/// An allocator that always fails.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AlwaysFails;

// SAFETY: This always fails.
unsafe impl AllocatorCore for AlwaysFails {
    fn allocate(&self, _layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        Err(AllocatorError)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<[u8]>, _layout: Layout) {}
}

impl HostMemory for AlwaysFails {
    const PINNED: bool = false;
}

/// A simulated device that can only perform a limited number of device allocations.
///
/// Used to test that matrices survive a failed allocation.
#[derive(Debug, Clone)]
pub(crate) struct FlakyDevice {
    device: SimulatedDevice,
    remaining: Arc<AtomicUsize>,
}

impl FlakyDevice {
    pub(crate) fn new(allocations: usize) -> Self {
        Self {
            device: SimulatedDevice::default(),
            remaining: Arc::new(AtomicUsize::new(allocations)),
        }
    }

    pub(crate) fn inner(&self) -> &SimulatedDevice {
        &self.device
    }

    fn take_one(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl DeviceTransfer for FlakyDevice {
    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), RuntimeError> {
        self.device.copy_host_to_device(dst, src)
    }

    fn copy_device_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), RuntimeError> {
        self.device.copy_device_to_host(dst, src)
    }

    fn copy_device_to_device(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), RuntimeError> {
        self.device.copy_device_to_device(dst, src, bytes)
    }
}

impl DeviceRuntime for FlakyDevice {
    fn malloc(&self, bytes: usize) -> Result<DevicePtr, RuntimeError> {
        if !self.take_one() {
            return Err(RuntimeError::OutOfMemory {
                requested: bytes,
                available: 0,
            });
        }
        self.device.malloc(bytes)
    }

    unsafe fn free(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        // SAFETY: Forwarded from the caller.
        unsafe { self.device.free(ptr) }
    }

    fn memset(&self, dst: DevicePtr, value: u8, bytes: usize) -> Result<(), RuntimeError> {
        self.device.memset(dst, value, bytes)
    }

    fn malloc_host(&self, layout: Layout) -> Result<NonNull<[u8]>, RuntimeError> {
        self.device.malloc_host(layout)
    }

    unsafe fn free_host(&self, ptr: NonNull<[u8]>, layout: Layout) {
        // SAFETY: Forwarded from the caller.
        unsafe { self.device.free_host(ptr, layout) }
    }

    fn symbol_size(&self, name: &str) -> Option<usize> {
        self.device.symbol_size(name)
    }

    fn copy_to_symbol(&self, name: &str, src: &[u8]) -> Result<(), RuntimeError> {
        self.device.copy_to_symbol(name, src)
    }
}
