/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{alloc::Layout, fmt, ptr::NonNull};

use matbridge_runtime::alloc::{AllocatorCore, AllocatorError};

use crate::Element;

/// A zero-initialized, fixed-length slice of `T` allocated from `A`.
///
/// Like `Box<[T]>`, but the memory comes from (and returns to) a custom allocator.
pub(crate) struct HostBuffer<T, A>
where
    A: AllocatorCore,
{
    ptr: NonNull<T>,
    len: usize,
    allocator: A,
}

// SAFETY: `HostBuffer` owns its contents exclusively, like a `Box<[T]>`.
unsafe impl<T, A> Send for HostBuffer<T, A>
where
    T: Send,
    A: AllocatorCore + Send,
{
}

// SAFETY: Shared access only hands out `&[T]`.
unsafe impl<T, A> Sync for HostBuffer<T, A>
where
    T: Sync,
    A: AllocatorCore + Sync,
{
}

impl<T, A> HostBuffer<T, A>
where
    T: Element,
    A: AllocatorCore,
{
    /// Allocate `len` zeroed elements from `allocator`.
    ///
    /// Fails for empty layouts: a buffer always owns memory.
    pub(crate) fn zeroed(len: usize, allocator: A) -> Result<Self, AllocatorError> {
        let layout = Layout::array::<T>(len).map_err(|_| AllocatorError)?;
        if layout.size() == 0 {
            return Err(AllocatorError);
        }

        let ptr = allocator.allocate(layout)?;
        debug_assert!(ptr.len() >= layout.size());

        // SAFETY: The allocator returned at least `layout.size()` writable bytes. All zeros
        // is a valid `T` because `T: Pod`.
        unsafe { ptr.cast::<u8>().as_ptr().write_bytes(0, layout.size()) };

        Ok(Self {
            ptr: ptr.cast::<T>(),
            len,
            allocator,
        })
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        // SAFETY: `ptr` is valid for `len` initialized elements for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: `ptr` is valid for `len` initialized elements and `self` is borrowed
        // mutably, so no other reference exists.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T, A> HostBuffer<T, A>
where
    A: AllocatorCore,
{
    fn layout(&self) -> Layout {
        let size = self.len * std::mem::size_of::<T>();
        // SAFETY: This exact layout was computed successfully in `zeroed`.
        unsafe { Layout::from_size_align_unchecked(size, std::mem::align_of::<T>()) }
    }
}

impl<T, A> Drop for HostBuffer<T, A>
where
    A: AllocatorCore,
{
    fn drop(&mut self) {
        // Elements are `Pod` and have no drop glue, so releasing the memory is all there
        // is to do.
        let layout = self.layout();
        let ptr = NonNull::slice_from_raw_parts(self.ptr.cast::<u8>(), layout.size());

        // SAFETY: `ptr` was allocated from `self.allocator` with `layout` and is released
        // exactly once, here.
        unsafe { self.allocator.deallocate(ptr, layout) }
    }
}

impl<T, A> fmt::Debug for HostBuffer<T, A>
where
    T: Element,
    A: AllocatorCore,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("len", &self.len)
            .field("bytes", &self.layout().size())
            .finish()
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use matbridge_runtime::alloc::GlobalAllocator;

    use super::*;
    use crate::test_util::AlwaysFails;

    #[test]
    fn zeroed_buffers() {
        let mut buffer = HostBuffer::<f64, _>::zeroed(5, GlobalAllocator).unwrap();
        assert_eq!(buffer.as_slice(), &[0.0; 5]);
        assert_eq!((buffer.as_slice().as_ptr() as usize) % std::mem::align_of::<f64>(), 0);

        buffer.as_mut_slice()[2] = 4.5;
        assert_eq!(buffer.as_slice(), &[0.0, 0.0, 4.5, 0.0, 0.0]);
        assert_eq!(format!("{:?}", buffer), "HostBuffer { len: 5, bytes: 40 }");
    }

    #[test]
    fn empty_buffers_are_refused() {
        assert!(HostBuffer::<f32, _>::zeroed(0, GlobalAllocator).is_err());
        assert!(HostBuffer::<(), _>::zeroed(10, GlobalAllocator).is_err());
    }

    #[test]
    fn allocation_failure_propagates() {
        assert_eq!(
            HostBuffer::<u32, _>::zeroed(4, AlwaysFails).unwrap_err(),
            AllocatorError
        );
    }
}
