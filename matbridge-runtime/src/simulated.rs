/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! A host-backed stand-in for an accelerator.
//!
//! Device memory is modelled as a set of byte arenas keyed by opaque addresses, so host
//! code still has no way to reach into "device" memory except through the runtime calls.
//! Capacities and symbols come from a [`RuntimeConfig`], which makes out-of-memory and
//! symbol errors reproducible in tests.

use std::{
    alloc::Layout,
    collections::HashMap,
    num::NonZeroU64,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    alloc::{AllocatorCore, GlobalAllocator, PAGE_SIZE},
    ConfigError, DevicePtr, DeviceRuntime, DeviceTransfer, RuntimeConfig, RuntimeError,
};

// Start of the simulated device address space. Any non-zero value works, this one just
// makes device addresses easy to tell apart from host addresses in logs.
const DEVICE_BASE: u64 = 0x7f00_0000_0000;

// Every device owns a 1 TiB window of addresses above `DEVICE_BASE`, selected by a
// process-wide device number, so a pointer from one device is never live on another.
const WINDOW_BITS: u32 = 40;
const WINDOWS: u64 = 1 << 23;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Arena {
    device_capacity: Option<usize>,
    pinned_capacity: Option<usize>,
    alignment: u64,
    next: u64,
    end: u64,
    allocations: HashMap<u64, Box<[u8]>>,
    device_in_use: usize,
    pinned_in_use: usize,
    symbols: HashMap<String, Box<[u8]>>,
}

impl Arena {
    fn allocation(&self, ptr: DevicePtr, bytes: usize) -> Result<&[u8], RuntimeError> {
        let data = self
            .allocations
            .get(&ptr.addr())
            .ok_or(RuntimeError::InvalidPointer(ptr))?;
        data.get(..bytes).ok_or(RuntimeError::OutOfBounds {
            ptr,
            bytes,
            allocation: data.len(),
        })
    }

    fn allocation_mut(&mut self, ptr: DevicePtr, bytes: usize) -> Result<&mut [u8], RuntimeError> {
        let data = self
            .allocations
            .get_mut(&ptr.addr())
            .ok_or(RuntimeError::InvalidPointer(ptr))?;
        let allocation = data.len();
        data.get_mut(..bytes).ok_or(RuntimeError::OutOfBounds {
            ptr,
            bytes,
            allocation,
        })
    }
}

/// A [`DeviceRuntime`] that keeps "device" memory in host-side arenas.
///
/// Clones share the same arena, exactly like clones of a handle to a real device context.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    arena: Arc<Mutex<Arena>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::from_valid_config(RuntimeConfig::default())
    }
}

impl SimulatedDevice {
    /// Construct a new simulated device from `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RuntimeConfig) -> Self {
        let symbols = config
            .symbols
            .into_iter()
            .map(|decl| (decl.name, vec![0u8; decl.bytes].into_boxed_slice()))
            .collect();

        let window = NEXT_DEVICE.fetch_add(1, Ordering::Relaxed) % WINDOWS;
        let base = DEVICE_BASE + (window << WINDOW_BITS);

        let arena = Arena {
            device_capacity: config.device_capacity,
            pinned_capacity: config.pinned_capacity,
            alignment: config.device_alignment as u64,
            next: base,
            end: base + (1 << WINDOW_BITS),
            allocations: HashMap::new(),
            device_in_use: 0,
            pinned_in_use: 0,
            symbols,
        };

        Self {
            arena: Arc::new(Mutex::new(arena)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        // The arena is left consistent between statements, so a panic elsewhere while the
        // lock was held does not invalidate it.
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the number of device bytes currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.lock().device_in_use
    }

    /// Return the number of live device allocations.
    pub fn live_allocations(&self) -> usize {
        self.lock().allocations.len()
    }

    /// Return the number of page-locked host bytes currently allocated.
    pub fn pinned_bytes(&self) -> usize {
        self.lock().pinned_in_use
    }

    /// Return a copy of the current contents of the device symbol `name`.
    ///
    /// This is the view a kernel would have of the symbol.
    pub fn read_symbol(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        self.lock()
            .symbols
            .get(name)
            .map(|data| data.to_vec())
            .ok_or_else(|| RuntimeError::UnknownSymbol(name.to_owned()))
    }
}

impl DeviceTransfer for SimulatedDevice {
    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), RuntimeError> {
        let mut arena = self.lock();
        arena.allocation_mut(dst, src.len())?.copy_from_slice(src);
        Ok(())
    }

    fn copy_device_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), RuntimeError> {
        let arena = self.lock();
        dst.copy_from_slice(arena.allocation(src, dst.len())?);
        Ok(())
    }

    fn copy_device_to_device(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), RuntimeError> {
        let mut arena = self.lock();
        // Distinct allocations cannot be borrowed from the map at the same time.
        let staging = arena.allocation(src, bytes)?.to_vec();
        arena.allocation_mut(dst, bytes)?.copy_from_slice(&staging);
        Ok(())
    }
}

impl DeviceRuntime for SimulatedDevice {
    fn malloc(&self, bytes: usize) -> Result<DevicePtr, RuntimeError> {
        if bytes == 0 {
            return Err(RuntimeError::ZeroSized);
        }

        let mut arena = self.lock();
        if let Some(capacity) = arena.device_capacity {
            let available = capacity - arena.device_in_use;
            if bytes > available {
                return Err(RuntimeError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }

        let span = (bytes as u64).div_ceil(arena.alignment) * arena.alignment;
        // Addresses only grow, so running out of the window is the same as running out of
        // memory.
        let next = arena.next.checked_add(span).filter(|&next| next <= arena.end);
        let ptr = match (NonZeroU64::new(arena.next), next) {
            (Some(addr), Some(next)) => {
                arena.next = next;
                DevicePtr::from_raw(addr)
            }
            _ => {
                return Err(RuntimeError::OutOfMemory {
                    requested: bytes,
                    available: 0,
                })
            }
        };

        arena
            .allocations
            .insert(ptr.addr(), vec![0u8; bytes].into_boxed_slice());
        arena.device_in_use += bytes;
        tracing::trace!(%ptr, bytes, "simulated device allocation");
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        let mut arena = self.lock();
        let data = arena
            .allocations
            .remove(&ptr.addr())
            .ok_or(RuntimeError::InvalidPointer(ptr))?;
        arena.device_in_use -= data.len();
        tracing::trace!(%ptr, bytes = data.len(), "simulated device free");
        Ok(())
    }

    fn memset(&self, dst: DevicePtr, value: u8, bytes: usize) -> Result<(), RuntimeError> {
        let mut arena = self.lock();
        arena.allocation_mut(dst, bytes)?.fill(value);
        Ok(())
    }

    fn malloc_host(&self, layout: Layout) -> Result<NonNull<[u8]>, RuntimeError> {
        if layout.size() == 0 {
            return Err(RuntimeError::ZeroSized);
        }

        let mut arena = self.lock();
        if let Some(capacity) = arena.pinned_capacity {
            let available = capacity - arena.pinned_in_use;
            if layout.size() > available {
                return Err(RuntimeError::PinnedOutOfMemory {
                    requested: layout.size(),
                    available,
                });
            }
        }

        let page_layout = layout
            .align_to(PAGE_SIZE)
            .map_err(|_| RuntimeError::InvalidLayout)?;
        let ptr = GlobalAllocator
            .allocate(page_layout)
            .map_err(|_| RuntimeError::PinnedOutOfMemory {
                requested: layout.size(),
                available: 0,
            })?;
        arena.pinned_in_use += layout.size();
        Ok(ptr)
    }

    unsafe fn free_host(&self, ptr: NonNull<[u8]>, layout: Layout) {
        // `malloc_host` succeeded with this layout, so re-aligning it cannot fail.
        let Ok(page_layout) = layout.align_to(PAGE_SIZE) else {
            return;
        };

        // SAFETY: The caller guarantees `ptr` came from `malloc_host` with `layout`, which
        // allocated it from the global allocator with `page_layout`.
        unsafe { GlobalAllocator.deallocate(ptr, page_layout) };
        self.lock().pinned_in_use -= layout.size();
    }

    fn symbol_size(&self, name: &str) -> Option<usize> {
        self.lock().symbols.get(name).map(|data| data.len())
    }

    fn copy_to_symbol(&self, name: &str, src: &[u8]) -> Result<(), RuntimeError> {
        let mut arena = self.lock();
        let slot = arena
            .symbols
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownSymbol(name.to_owned()))?;
        let capacity = slot.len();
        slot.get_mut(..src.len())
            .ok_or_else(|| RuntimeError::SymbolOverflow {
                name: name.to_owned(),
                bytes: src.len(),
                capacity,
            })?
            .copy_from_slice(src);
        Ok(())
    }
}

///////////
// Tests //
///////////
