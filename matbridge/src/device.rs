/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::marker::PhantomData;

use matbridge_runtime::{alloc::HostMemory, DevicePtr, DeviceRuntime, RuntimeError};

use crate::{
    error::{checked_bytes, checked_elements},
    transfer::{transfer, Destination, Source},
    Element, HostMatrix, MatrixError, MatrixResult, Shape,
};

/// An owning matrix in device memory.
///
/// The buffer is allocated through, and released back to, the runtime handle stored in
/// the matrix. Device memory cannot be read directly; element access goes through a
/// host copy (see [`DeviceMatrix::to_host`]).
#[derive(Debug)]
pub struct DeviceMatrix<T, R>
where
    T: Element,
    R: DeviceRuntime,
{
    ptr: Option<DevicePtr>,
    width: usize,
    height: usize,
    runtime: R,
    _elem: PhantomData<T>,
}

impl<T, R> DeviceMatrix<T, R>
where
    T: Element,
    R: DeviceRuntime,
{
    /// Construct an empty matrix. Nothing is allocated until the first [`Self::resize`].
    pub fn new(runtime: R) -> Self {
        Self {
            ptr: None,
            width: 0,
            height: 0,
            runtime,
            _elem: PhantomData,
        }
    }

    /// Construct a `width x height` matrix. The initial contents are unspecified.
    pub fn with_size(width: usize, height: usize, runtime: R) -> MatrixResult<Self> {
        let mut this = Self::new(runtime);
        this.resize(width, height)?;
        Ok(this)
    }

    /// Construct a device copy of `src` on `runtime`.
    ///
    /// ```
    /// use matbridge::{DeviceMatrix, HostMatrix, Shape};
    /// use matbridge_runtime::SimulatedDevice;
    ///
    /// let mut host = HostMatrix::<u32>::pageable();
    /// host.resize(4, 2).unwrap();
    /// host.fill(3).unwrap();
    ///
    /// let device = DeviceMatrix::from_host(&host, SimulatedDevice::default()).unwrap();
    /// assert_eq!((device.width(), device.height()), (4, 2));
    /// assert_eq!(device.to_host().unwrap(), host);
    /// ```
    pub fn from_host<A>(src: &HostMatrix<T, A>, runtime: R) -> MatrixResult<Self>
    where
        A: HostMemory,
    {
        let mut this = Self::new(runtime);
        this.assign_from_host(src)?;
        Ok(this)
    }

    /// Return the runtime that owns the buffer.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Return the device address of the buffer, if one is allocated.
    pub fn device_ptr(&self) -> Option<DevicePtr> {
        self.ptr
    }

    /// Change the shape to `width x height`.
    ///
    /// A new buffer is allocated whenever the dimensions change, even if the byte size
    /// stays the same. The contents after a reallocation are unspecified. If allocation
    /// fails, `self` is left exactly as it was. Once the new buffer is in place the resize
    /// has succeeded; a failure to release the old buffer is only logged.
    pub fn resize(&mut self, width: usize, height: usize) -> MatrixResult<()> {
        let elements = checked_elements::<T>(width, height)?;
        if self.ptr.is_some() && (width, height) == (self.width, self.height) {
            tracing::trace!(width, height, "device resize keeps the current buffer");
            return Ok(());
        }

        let bytes = checked_bytes::<T>(elements)?;
        let ptr = self.runtime.malloc(bytes)?;
        tracing::debug!(%ptr, width, height, bytes, "allocated device matrix");

        let previous = self.ptr.replace(ptr).map(|ptr| (ptr, self.byte_size()));
        self.width = width;
        self.height = height;
        if let Some((ptr, bytes)) = previous {
            if let Err(err) = self.free(ptr, bytes) {
                tracing::warn!("Error when releasing the previous device buffer: {}", err);
            }
        }
        Ok(())
    }

    /// Release the buffer and return to the empty `0 x 0` state.
    ///
    /// The matrix is empty afterwards even if the runtime reports an error.
    pub fn deallocate(&mut self) -> MatrixResult<()> {
        let result = self.release();
        self.width = 0;
        self.height = 0;
        Ok(result?)
    }

    /// Set every byte of the buffer to `value`.
    pub fn fill_bytes(&mut self, value: u8) -> MatrixResult<()> {
        let ptr = self.ptr.ok_or(MatrixError::NotAllocated)?;
        self.runtime.memset(ptr, value, self.byte_size())?;
        Ok(())
    }

    /// Make `self` a device copy of `src`, adopting its shape.
    ///
    /// An empty `src` empties `self`. Otherwise the buffer is reallocated only if the byte
    /// sizes differ. A new buffer is filled before it replaces the old one, so if
    /// allocation or the copy fails `self` keeps its shape and buffer. When the buffer is
    /// reused, a failed copy may leave its contents partially overwritten.
    pub fn assign_from_host<A>(&mut self, src: &HostMatrix<T, A>) -> MatrixResult<()>
    where
        A: HostMemory,
    {
        self.assign(src.width(), src.height(), src.source())
    }

    /// Make `self` a copy of the device matrix `src`, adopting its shape.
    ///
    /// Follows the same rules as [`Self::assign_from_host`]. The copy is issued on the
    /// runtime of `self`, which rejects a `src` living on a different device.
    pub fn assign_from_device(&mut self, src: &DeviceMatrix<T, R>) -> MatrixResult<()> {
        self.assign(src.width, src.height, src.source())
    }

    /// Copy the first `count` elements of `src` into the beginning of `self`.
    ///
    /// `count` defaults to the number of elements in `self`. Nothing is copied if either
    /// side is too small.
    pub fn copy_submatrix_from_host<A>(
        &mut self,
        src: &HostMatrix<T, A>,
        count: Option<usize>,
    ) -> MatrixResult<()>
    where
        A: HostMemory,
    {
        let bytes = checked_bytes::<T>(count.unwrap_or(self.elements()))?;
        transfer(self.destination(), src.source(), bytes)?;
        Ok(())
    }

    /// Copy the first `count` elements of the device matrix `src` into the beginning of
    /// `self`. See [`Self::copy_submatrix_from_host`].
    pub fn copy_submatrix_from_device(
        &mut self,
        src: &DeviceMatrix<T, R>,
        count: Option<usize>,
    ) -> MatrixResult<()> {
        let bytes = checked_bytes::<T>(count.unwrap_or(self.elements()))?;
        transfer(self.destination(), src.source(), bytes)?;
        Ok(())
    }

    /// Allocate a second device matrix on the same runtime holding the same contents.
    pub fn try_clone(&self) -> MatrixResult<Self> {
        let mut clone = Self::new(self.runtime.clone());
        clone.assign_from_device(self)?;
        Ok(clone)
    }

    /// Copy the contents into a new pageable host matrix.
    pub fn to_host(&self) -> MatrixResult<HostMatrix<T>> {
        HostMatrix::from_device(self)
    }

    /// Copy the `width x height` matrix behind `src` into `self`, reallocating only if the
    /// byte size changes.
    fn assign(&mut self, width: usize, height: usize, src: Source<'_>) -> MatrixResult<()> {
        if width == 0 || height == 0 {
            return self.deallocate();
        }

        let elements = checked_elements::<T>(width, height)?;
        let bytes = checked_bytes::<T>(elements)?;
        if self.ptr.is_some() && elements == self.elements() {
            transfer(self.destination(), src, bytes)?;
            self.width = width;
            self.height = height;
        } else {
            let mut staged = Self::with_size(width, height, self.runtime.clone())?;
            transfer(staged.destination(), src, bytes)?;
            *self = staged;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), RuntimeError> {
        match self.ptr.take() {
            Some(ptr) => self.free(ptr, self.byte_size()),
            None => Ok(()),
        }
    }

    /// Return `ptr` to the runtime. `ptr` must already have been taken out of `self.ptr`.
    fn free(&self, ptr: DevicePtr, bytes: usize) -> Result<(), RuntimeError> {
        tracing::debug!(%ptr, bytes, "releasing device matrix");
        // SAFETY: Every pointer stored in `self.ptr` came from `self.runtime.malloc`. It
        // is removed from `self.ptr` before getting here, so it cannot be freed twice.
        unsafe { self.runtime.free(ptr) }
    }

    pub(crate) fn source(&self) -> Source<'_> {
        match self.ptr {
            Some(ptr) => Source::Device {
                ptr,
                len: self.byte_size(),
                runtime: &self.runtime,
            },
            None => Source::EMPTY,
        }
    }

    pub(crate) fn destination(&mut self) -> Destination<'_> {
        match self.ptr {
            Some(ptr) => Destination::Device {
                ptr,
                len: self.byte_size(),
                runtime: &self.runtime,
            },
            None => Destination::Host(&mut []),
        }
    }
}

impl<T, R> Shape for DeviceMatrix<T, R>
where
    T: Element,
    R: DeviceRuntime,
{
    type Elem = T;

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn is_allocated(&self) -> bool {
        self.ptr.is_some()
    }
}

impl<T, R> Drop for DeviceMatrix<T, R>
where
    T: Element,
    R: DeviceRuntime,
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!("Error when dropping DeviceMatrix: {}", err);
        }
    }
}

///////////
// Tests //
///////////
