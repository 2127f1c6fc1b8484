/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{alloc::Layout, fmt, num::NonZeroU64, ptr::NonNull};

use crate::RuntimeError;

/// An address in device memory.
///
/// Device addresses live in the accelerator's own address space and cannot be
/// dereferenced by host code. The only things host code can do with a `DevicePtr` is
/// hand it back to the runtime that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DevicePtr(NonZeroU64);

impl DevicePtr {
    /// Wrap a raw device address.
    pub const fn from_raw(addr: NonZeroU64) -> Self {
        Self(addr)
    }

    /// Return the raw device address.
    pub const fn addr(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{:#x}", self.addr())
    }
}

/// The copy half of a device runtime.
///
/// This is split out of [`DeviceRuntime`] so it remains object safe. Cross-domain copies
/// dispatch through `&dyn DeviceTransfer` without caring which concrete runtime owns the
/// memory.
///
/// All copies start at the base of the device allocation and are synchronous: when the
/// call returns the bytes have landed.
pub trait DeviceTransfer {
    /// Copy all of `src` into the allocation starting at `dst`.
    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), RuntimeError>;

    /// Fill all of `dst` from the allocation starting at `src`.
    fn copy_device_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), RuntimeError>;

    /// Copy `bytes` bytes between two device allocations.
    fn copy_device_to_device(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), RuntimeError>;
}

/// The driver surface needed to manage matrices in accelerator memory.
///
/// Handles are cheap to clone; every device matrix and every page-locked host allocator
/// keeps its own clone so it can release memory on drop. All calls are issued on a single
/// default stream and are therefore ordered with respect to each other.
pub trait DeviceRuntime: DeviceTransfer + Clone + fmt::Debug {
    /// Allocate `bytes` bytes of device memory.
    fn malloc(&self, bytes: usize) -> Result<DevicePtr, RuntimeError>;

    /// Release a device allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Self::malloc`] on this runtime and must not have
    /// been freed already.
    unsafe fn free(&self, ptr: DevicePtr) -> Result<(), RuntimeError>;

    /// Set the first `bytes` bytes of the allocation at `dst` to `value`.
    fn memset(&self, dst: DevicePtr, value: u8, bytes: usize) -> Result<(), RuntimeError>;

    /// Allocate page-locked host memory.
    ///
    /// On success, the returned slice has a length of at least `layout.size()` and an
    /// alignment of at least `layout.align()`.
    fn malloc_host(&self, layout: Layout) -> Result<NonNull<[u8]>, RuntimeError>;

    /// Release page-locked host memory.
    ///
    /// # Safety
    ///
    /// `ptr` and `layout` must match a previous successful call to [`Self::malloc_host`]
    /// on this runtime and the memory must not have been released already.
    unsafe fn free_host(&self, ptr: NonNull<[u8]>, layout: Layout);

    /// Return the size in bytes of the device symbol `name`, if it is declared.
    fn symbol_size(&self, name: &str) -> Option<usize>;

    /// Copy `src` into the beginning of the device symbol `name`.
    fn copy_to_symbol(&self, name: &str, src: &[u8]) -> Result<(), RuntimeError>;

    /// Resolve the declared device symbol `name` into a handle that can be written to.
    fn symbol(&self, name: &str) -> Result<DeviceSymbol<Self>, RuntimeError> {
        let bytes = self
            .symbol_size(name)
            .ok_or_else(|| RuntimeError::UnknownSymbol(name.to_owned()))?;

        Ok(DeviceSymbol {
            name: name.to_owned(),
            bytes,
            runtime: self.clone(),
        })
    }
}

/// A named, pre-declared slot of device memory consumed by compute kernels.
///
/// The name and size of the slot are fixed by whoever declared it. Holding a
/// `DeviceSymbol` means the name resolved at the time the handle was created.
#[derive(Debug, Clone)]
pub struct DeviceSymbol<R> {
    name: String,
    bytes: usize,
    runtime: R,
}

impl<R> DeviceSymbol<R>
where
    R: DeviceRuntime,
{
    /// Return the declared name of the symbol.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the declared size of the symbol in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Copy `src` into the beginning of the symbol.
    pub fn write(&self, src: &[u8]) -> Result<(), RuntimeError> {
        if src.len() > self.bytes {
            return Err(RuntimeError::SymbolOverflow {
                name: self.name.clone(),
                bytes: src.len(),
                capacity: self.bytes,
            });
        }

        tracing::debug!(symbol = %self.name, bytes = src.len(), "publishing to device symbol");
        self.runtime.copy_to_symbol(&self.name, src)
    }
}

///////////
// Tests //
///////////
