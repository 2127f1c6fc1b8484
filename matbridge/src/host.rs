/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::ops::{Index, IndexMut};

use matbridge_runtime::{
    alloc::{GlobalAllocator, HostMemory, PinnedAllocator},
    DeviceRuntime, DeviceSymbol,
};

use crate::{
    buffer::HostBuffer,
    error::{checked_bytes, checked_elements},
    foreign::{DenseData, ForeignBase, MutDenseData},
    transfer::{transfer, Destination, Source},
    DeviceMatrix, Element, MatrixError, MatrixResult, Shape,
};

/// An owning matrix in host memory.
///
/// The allocator `A` decides once and for all whether the buffer is ordinary pageable
/// memory ([`GlobalAllocator`], the default) or page-locked memory obtained from a device
/// runtime ([`PinnedAllocator`]). See [`PinnedHostMatrix`].
///
/// Element `(i, j)`, with `i < width` and `j < height`, lives at `j * width + i`. The
/// buffer is present exactly when `width * height != 0`; the empty matrix is `0 x 0`.
#[derive(Debug)]
pub struct HostMatrix<T, A = GlobalAllocator>
where
    T: Element,
    A: HostMemory,
{
    buffer: Option<HostBuffer<T, A>>,
    width: usize,
    height: usize,
    allocator: A,
}

/// A host matrix backed by page-locked memory from the runtime `R`.
pub type PinnedHostMatrix<T, R> = HostMatrix<T, PinnedAllocator<R>>;

impl<T> HostMatrix<T, GlobalAllocator>
where
    T: Element,
{
    /// Construct an empty matrix in pageable memory.
    pub fn pageable() -> Self {
        Self::new(GlobalAllocator)
    }

    /// Construct a pageable copy of `src`.
    pub fn from_device<R>(src: &DeviceMatrix<T, R>) -> MatrixResult<Self>
    where
        R: DeviceRuntime,
    {
        let mut this = Self::pageable();
        this.assign_from_device(src)?;
        Ok(this)
    }

    /// Make `self` a copy of `src`, adopting its shape.
    ///
    /// An empty `src` empties `self`. Otherwise the buffer is reallocated only if the byte
    /// sizes differ. A new buffer is filled before it replaces the old one, so if
    /// allocation fails `self` keeps its shape and contents. Only pageable matrices can be
    /// assigned from host memory:
    ///
    /// ```compile_fail
    /// use matbridge::HostMatrix;
    /// use matbridge_runtime::SimulatedDevice;
    ///
    /// let src = HostMatrix::<f32>::pageable();
    /// let mut dst = HostMatrix::<f32, _>::pinned(SimulatedDevice::default());
    /// dst.assign_from_host(&src).unwrap();
    /// ```
    pub fn assign_from_host<B>(&mut self, src: &HostMatrix<T, B>) -> MatrixResult<()>
    where
        B: HostMemory,
    {
        self.assign(src.width, src.height, src.source())
    }
}

impl<T, R> HostMatrix<T, PinnedAllocator<R>>
where
    T: Element,
    R: DeviceRuntime,
{
    /// Construct an empty matrix whose memory will be page-locked through `runtime`.
    pub fn pinned(runtime: R) -> Self {
        Self::new(PinnedAllocator::new(runtime))
    }
}

impl<T, A> HostMatrix<T, A>
where
    T: Element,
    A: HostMemory,
{
    /// Construct an empty matrix. Nothing is allocated until the first [`Self::resize`].
    pub fn new(allocator: A) -> Self {
        Self {
            buffer: None,
            width: 0,
            height: 0,
            allocator,
        }
    }

    /// Construct a zero-initialized `width x height` matrix.
    ///
    /// ```
    /// use matbridge::{HostMatrix, MatrixError, Shape};
    /// use matbridge_runtime::alloc::GlobalAllocator;
    ///
    /// let m = HostMatrix::<f32>::with_size(3, 2, GlobalAllocator).unwrap();
    /// assert_eq!(m.elements(), 6);
    /// assert_eq!(m.byte_size(), 24);
    ///
    /// let err = HostMatrix::<f32>::with_size(0, 2, GlobalAllocator).unwrap_err();
    /// assert!(matches!(err, MatrixError::ZeroSize { width: 0, height: 2 }));
    /// ```
    pub fn with_size(width: usize, height: usize, allocator: A) -> MatrixResult<Self> {
        let mut this = Self::new(allocator);
        this.resize(width, height)?;
        Ok(this)
    }

    /// Return the allocator backing this matrix.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Whether the buffer lives in page-locked memory.
    pub fn is_pinned(&self) -> bool {
        A::PINNED
    }

    /// Change the shape to `width x height`.
    ///
    /// The buffer is reallocated (and zeroed) only if the byte size changes. Otherwise the
    /// existing buffer is kept and only the dimensions are updated. If allocation fails,
    /// `self` is left exactly as it was.
    pub fn resize(&mut self, width: usize, height: usize) -> MatrixResult<()> {
        let elements = checked_elements::<T>(width, height)?;
        if self.buffer.is_some() && elements == self.elements() {
            tracing::trace!(width, height, "host resize keeps the current buffer");
        } else {
            let bytes = checked_bytes::<T>(elements)?;
            tracing::debug!(width, height, bytes, pinned = A::PINNED, "allocating host matrix");
            self.buffer = Some(HostBuffer::zeroed(elements, self.allocator.clone())?);
        }

        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Release the buffer and return to the empty `0 x 0` state.
    pub fn deallocate(&mut self) {
        if self.buffer.take().is_some() {
            tracing::debug!(bytes = self.byte_size(), "releasing host matrix");
        }
        self.width = 0;
        self.height = 0;
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) -> MatrixResult<()> {
        self.buffer
            .as_mut()
            .ok_or(MatrixError::NotAllocated)?
            .as_mut_slice()
            .fill(value);
        Ok(())
    }

    /// Return all elements in memory order. Empty matrices return an empty slice.
    pub fn as_slice(&self) -> &[T] {
        match &self.buffer {
            Some(buffer) => buffer.as_slice(),
            None => &[],
        }
    }

    /// Return all elements in memory order, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.buffer {
            Some(buffer) => buffer.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Return a pointer to the first element. Dangling for empty matrices.
    pub fn as_ptr(&self) -> *const T {
        self.as_slice().as_ptr()
    }

    /// Return a reference to element `(i, j)`, or `None` if it is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> Option<&T> {
        if i < self.width && j < self.height {
            self.as_slice().get(j * self.width + i)
        } else {
            None
        }
    }

    /// Return a mutable reference to element `(i, j)`, or `None` if it is out of bounds.
    pub fn get_mut(&mut self, i: usize, j: usize) -> Option<&mut T> {
        if i < self.width && j < self.height {
            let offset = j * self.width + i;
            self.as_mut_slice().get_mut(offset)
        } else {
            None
        }
    }

    /// Return line `j`: elements `(0, j)..(width, j)`.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.height()`.
    pub fn row(&self, j: usize) -> &[T] {
        assert!(j < self.height, "row {j} is out of bounds (max: {})", self.height);
        let start = j * self.width;
        &self.as_slice()[start..start + self.width]
    }

    /// Return line `j` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.height()`.
    pub fn row_mut(&mut self, j: usize) -> &mut [T] {
        assert!(j < self.height, "row {j} is out of bounds (max: {})", self.height);
        let start = j * self.width;
        let width = self.width;
        &mut self.as_mut_slice()[start..start + width]
    }

    /// Return an iterator over all lines, beginning with line 0.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        (0..self.height).map(move |j| self.row(j))
    }

    /// Make `self` a copy of the device matrix `src`, adopting its shape.
    ///
    /// Follows the same rules as [`HostMatrix::assign_from_host`], and is available for
    /// pinned matrices too. If the device copy fails, `self` keeps its shape. When the
    /// buffer is reused its contents may be partially overwritten.
    pub fn assign_from_device<R>(&mut self, src: &DeviceMatrix<T, R>) -> MatrixResult<()>
    where
        R: DeviceRuntime,
    {
        self.assign(src.width(), src.height(), src.source())
    }

    /// Copy the first `count` elements of `src` into the beginning of `self`.
    ///
    /// `count` defaults to the number of elements in `self`. Shapes are not consulted;
    /// this is a flat copy in memory order. Nothing is copied if either side is too small.
    pub fn copy_submatrix_from_host<B>(
        &mut self,
        src: &HostMatrix<T, B>,
        count: Option<usize>,
    ) -> MatrixResult<()>
    where
        B: HostMemory,
    {
        let bytes = checked_bytes::<T>(count.unwrap_or(self.elements()))?;
        transfer(self.destination(), src.source(), bytes)?;
        Ok(())
    }

    /// Copy the first `count` elements of the device matrix `src` into the beginning of
    /// `self`. See [`Self::copy_submatrix_from_host`].
    pub fn copy_submatrix_from_device<R>(
        &mut self,
        src: &DeviceMatrix<T, R>,
        count: Option<usize>,
    ) -> MatrixResult<()>
    where
        R: DeviceRuntime,
    {
        let bytes = checked_bytes::<T>(count.unwrap_or(self.elements()))?;
        transfer(self.destination(), src.source(), bytes)?;
        Ok(())
    }

    /// Write the transpose of `self` into `out`, resizing it to `height x width`.
    ///
    /// ```
    /// use matbridge::{HostMatrix, Shape};
    /// use matbridge_runtime::alloc::GlobalAllocator;
    ///
    /// let mut m = HostMatrix::<f32>::with_size(3, 2, GlobalAllocator).unwrap();
    /// m[(2, 0)] = 1.0;
    ///
    /// let mut t = HostMatrix::pageable();
    /// m.transpose(&mut t).unwrap();
    /// assert_eq!((t.width(), t.height()), (2, 3));
    /// assert_eq!(t[(0, 2)], 1.0);
    /// ```
    pub fn transpose<B>(&self, out: &mut HostMatrix<T, B>) -> MatrixResult<()>
    where
        B: HostMemory,
    {
        if self.is_empty() {
            out.deallocate();
            return Ok(());
        }

        out.resize(self.height, self.width)?;
        for (j, row) in self.rows().enumerate() {
            for (i, value) in row.iter().enumerate() {
                out[(j, i)] = *value;
            }
        }
        Ok(())
    }

    /// Overwrite `self` with the transpose of the device matrix `src`.
    ///
    /// `src` must be `self.height() x self.width()`. The device contents are staged
    /// through a temporary pageable copy.
    pub fn copy_transpose<R>(&mut self, src: &DeviceMatrix<T, R>) -> MatrixResult<()>
    where
        R: DeviceRuntime,
    {
        if src.width() != self.height || src.height() != self.width {
            return Err(MatrixError::DimensionMismatch {
                expected_width: self.height,
                expected_height: self.width,
                width: src.width(),
                height: src.height(),
            });
        }

        let staged = HostMatrix::from_device(src)?;
        staged.transpose(self)
    }

    /// Copy the whole buffer into the device symbol `symbol`.
    ///
    /// Fails with [`MatrixError::NotAllocated`] for an empty matrix. The runtime reports
    /// a symbol that is too small to hold the buffer.
    pub fn publish_to_symbol<R>(&self, symbol: &DeviceSymbol<R>) -> MatrixResult<()>
    where
        R: DeviceRuntime,
    {
        let buffer = self.buffer.as_ref().ok_or(MatrixError::NotAllocated)?;
        symbol.write(bytemuck::cast_slice(buffer.as_slice()))?;
        Ok(())
    }

    /// Repack the strided view `src` into `self`, adopting its shape.
    pub fn load_foreign<D>(&mut self, src: &ForeignBase<D>) -> MatrixResult<()>
    where
        D: DenseData<Elem = T>,
    {
        if self.adopt_shape(src.width(), src.height())? {
            for (j, row) in src.rows().enumerate() {
                self.row_mut(j).copy_from_slice(row);
            }
        }
        Ok(())
    }

    /// Write the contents of `self` into the strided view `dst`, which must have the same
    /// shape.
    pub fn store_foreign<D>(&self, dst: &mut ForeignBase<D>) -> MatrixResult<()>
    where
        D: MutDenseData<Elem = T>,
    {
        if dst.width() != self.width || dst.height() != self.height {
            return Err(MatrixError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: dst.width(),
                height: dst.height(),
            });
        }

        for (j, row) in self.rows().enumerate() {
            dst.row_mut(j).copy_from_slice(row);
        }
        Ok(())
    }

    /// Allocate a copy of `self` from the same allocator.
    pub fn try_clone(&self) -> MatrixResult<Self> {
        let mut clone = Self::new(self.allocator.clone());
        if clone.adopt_shape(self.width, self.height)? {
            transfer(clone.destination(), self.source(), self.byte_size())?;
        }
        Ok(clone)
    }

    /// Copy the `width x height` matrix behind `src` into `self`, reallocating only if the
    /// byte size changes.
    fn assign(&mut self, width: usize, height: usize, src: Source<'_>) -> MatrixResult<()> {
        if width == 0 || height == 0 {
            self.deallocate();
            return Ok(());
        }

        let elements = checked_elements::<T>(width, height)?;
        let bytes = checked_bytes::<T>(elements)?;
        if self.buffer.is_some() && elements == self.elements() {
            transfer(self.destination(), src, bytes)?;
            self.width = width;
            self.height = height;
        } else {
            let mut staged = Self::with_size(width, height, self.allocator.clone())?;
            transfer(staged.destination(), src, bytes)?;
            *self = staged;
        }
        Ok(())
    }

    /// Reconcile `self` with a source of shape `width x height`.
    ///
    /// Returns `false` if the source is empty, in which case `self` has been emptied and
    /// there is nothing to copy.
    fn adopt_shape(&mut self, width: usize, height: usize) -> MatrixResult<bool> {
        if width == 0 || height == 0 {
            self.deallocate();
            Ok(false)
        } else {
            self.resize(width, height)?;
            Ok(true)
        }
    }

    pub(crate) fn source(&self) -> Source<'_> {
        Source::Host(bytemuck::cast_slice(self.as_slice()))
    }

    pub(crate) fn destination(&mut self) -> Destination<'_> {
        Destination::Host(bytemuck::cast_slice_mut(self.as_mut_slice()))
    }
}

impl<T, A> Shape for HostMatrix<T, A>
where
    T: Element,
    A: HostMemory,
{
    type Elem = T;

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Return a reference to element `(i, j)`.
///
/// # Panics
///
/// Panics if `i >= self.width()` or `j >= self.height()`.
impl<T, A> Index<(usize, usize)> for HostMatrix<T, A>
where
    T: Element,
    A: HostMemory,
{
    type Output = T;

    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        assert!(i < self.width, "i {i} is out of bounds (max: {})", self.width);
        assert!(j < self.height, "j {j} is out of bounds (max: {})", self.height);
        &self.as_slice()[j * self.width + i]
    }
}

/// Return a mutable reference to element `(i, j)`.
///
/// # Panics
///
/// Panics if `i >= self.width()` or `j >= self.height()`.
impl<T, A> IndexMut<(usize, usize)> for HostMatrix<T, A>
where
    T: Element,
    A: HostMemory,
{
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut Self::Output {
        assert!(i < self.width, "i {i} is out of bounds (max: {})", self.width);
        assert!(j < self.height, "j {j} is out of bounds (max: {})", self.height);
        let offset = j * self.width + i;
        &mut self.as_mut_slice()[offset]
    }
}

impl<T, A, B> PartialEq<HostMatrix<T, B>> for HostMatrix<T, A>
where
    T: Element + PartialEq,
    A: HostMemory,
    B: HostMemory,
{
    fn eq(&self, other: &HostMatrix<T, B>) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.as_slice() == other.as_slice()
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use half::f16;
    use matbridge_runtime::{
        logging::init_test_subscriber, RuntimeConfig, RuntimeError, SimulatedDevice, SymbolDecl,
    };
    use rstest::rstest;

    use super::*;
    use crate::{test_util::AlwaysFails, ForeignMatrix, ForeignMatrixMut};

    fn iota(width: usize, height: usize) -> HostMatrix<f32> {
        let mut m = HostMatrix::with_size(width, height, GlobalAllocator).unwrap();
        m.as_mut_slice()
            .iter_mut()
            .enumerate()
            .for_each(|(k, v)| *v = k as f32);
        m
    }

    #[test]
    fn empty_matrices() {
        let m = HostMatrix::<f64>::pageable();
        assert_eq!((m.width(), m.height()), (0, 0));
        assert!(!m.is_allocated());
        assert!(m.is_empty());
        assert!(!m.is_pinned());
        assert!(m.as_slice().is_empty());
        assert!(m.rows().next().is_none());
        assert_eq!(m.get(0, 0), None);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(0, 4)]
    #[case(5, 0)]
    fn zero_sizes_are_rejected(#[case] width: usize, #[case] height: usize) {
        let err = HostMatrix::<f32>::with_size(width, height, GlobalAllocator).unwrap_err();
        assert!(matches!(err, MatrixError::ZeroSize { .. }));

        let mut m = iota(2, 2);
        let err = m.resize(width, height).unwrap_err();
        assert!(matches!(err, MatrixError::ZeroSize { .. }));
        assert_eq!(m, iota(2, 2));
    }

    #[test]
    fn fill_and_transpose() {
        let _guard = init_test_subscriber();

        let mut m = HostMatrix::<f32>::with_size(3, 2, GlobalAllocator).unwrap();
        m.fill(7.0).unwrap();
        assert_eq!(m.elements(), 6);
        assert_eq!(m.byte_size(), 24);
        assert!(m.as_slice().iter().all(|&v| v == 7.0));

        let mut out = HostMatrix::pageable();
        m.transpose(&mut out).unwrap();
        assert_eq!((out.width(), out.height()), (2, 3));
        for i in 0..3 {
            for j in 0..2 {
                assert_eq!(out[(j, i)], 7.0);
            }
        }
    }

    #[test]
    fn fill_requires_a_buffer() {
        let mut m = HostMatrix::<u32>::pageable();
        assert!(matches!(m.fill(1), Err(MatrixError::NotAllocated)));
    }

    #[test]
    fn addressing() {
        let m = iota(3, 2);
        assert_eq!(m[(0, 0)], 0.0);
        assert_eq!(m[(2, 0)], 2.0);
        assert_eq!(m[(0, 1)], 3.0);
        assert_eq!(m[(2, 1)], 5.0);
        assert_eq!(m.row(1), &[3.0, 4.0, 5.0]);
        assert_eq!(m.get(3, 0), None);
        assert_eq!(m.get(0, 2), None);
        assert_eq!(m.rows().count(), 2);
    }

    #[test]
    #[should_panic(expected = "j 2 is out of bounds (max: 2)")]
    fn index_panics_on_j() {
        let m = iota(3, 2);
        let _ = m[(0, 2)];
    }

    #[test]
    fn resize_keeps_buffer_when_bytes_match() {
        let mut m = iota(3, 2);
        let ptr = m.as_ptr();

        m.resize(2, 3).unwrap();
        assert_eq!(m.as_ptr(), ptr);
        assert_eq!((m.width(), m.height()), (2, 3));
        assert_eq!(m.as_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        m.resize(6, 1).unwrap();
        assert_eq!(m.as_ptr(), ptr);

        m.resize(4, 4).unwrap();
        assert_ne!(m.as_ptr(), ptr);
        assert_eq!(m.elements(), 16);
    }

    #[test]
    fn deallocate_returns_to_empty() {
        let mut m = iota(4, 3);
        m.deallocate();
        assert_eq!((m.width(), m.height()), (0, 0));
        assert!(!m.is_allocated());

        m.resize(1, 1).unwrap();
        assert_eq!(m.as_slice(), &[0.0]);
    }

    #[test]
    fn assignment() {
        let src = iota(4, 2);

        let mut dst = HostMatrix::pageable();
        dst.assign_from_host(&src).unwrap();
        assert_eq!(dst, src);

        // Same byte size: copied in place with the source shape.
        let mut dst = iota(2, 4);
        let ptr = dst.as_ptr();
        dst.fill(-1.0).unwrap();
        dst.assign_from_host(&src).unwrap();
        assert_eq!(dst.as_ptr(), ptr);
        assert_eq!(dst, src);

        // Different byte size: reallocated.
        let mut dst = iota(5, 5);
        dst.assign_from_host(&src).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn assigning_an_empty_source_empties_the_destination() {
        let mut dst = iota(3, 3);
        dst.assign_from_host(&HostMatrix::<f32>::pageable()).unwrap();
        assert_eq!((dst.width(), dst.height()), (0, 0));
        assert!(!dst.is_allocated());
    }

    #[test]
    fn submatrix_copies() {
        let src = iota(3, 3);

        let mut dst = HostMatrix::<f32>::with_size(2, 2, GlobalAllocator).unwrap();
        dst.copy_submatrix_from_host(&src, None).unwrap();
        assert_eq!(dst.as_slice(), &[0.0, 1.0, 2.0, 3.0]);

        dst.fill(9.0).unwrap();
        dst.copy_submatrix_from_host(&src, Some(3)).unwrap();
        assert_eq!(dst.as_slice(), &[0.0, 1.0, 2.0, 9.0]);
    }

    #[test]
    fn oversized_submatrix_copies_do_nothing() {
        let small = iota(2, 2);
        let large = iota(3, 3);

        let mut dst = HostMatrix::<f32>::with_size(3, 3, GlobalAllocator).unwrap();
        dst.fill(1.0).unwrap();

        let err = dst.copy_submatrix_from_host(&small, None).unwrap_err();
        assert!(matches!(
            err,
            MatrixError::SourceTooSmall {
                requested: 36,
                available: 16
            }
        ));
        assert!(dst.as_slice().iter().all(|&v| v == 1.0));

        let mut dst = HostMatrix::<f32>::with_size(2, 2, GlobalAllocator).unwrap();
        let err = dst.copy_submatrix_from_host(&large, Some(5)).unwrap_err();
        assert!(matches!(
            err,
            MatrixError::DestinationTooSmall {
                requested: 20,
                capacity: 16
            }
        ));
        assert!(dst.as_slice().iter().all(|&v| v == 0.0));
    }

    #[rstest]
    fn transpose_is_an_involution(
        #[values(1, 2, 5)] width: usize,
        #[values(1, 3, 4)] height: usize,
    ) {
        let m = iota(width, height);
        let mut t = HostMatrix::pageable();
        let mut tt = HostMatrix::pageable();

        m.transpose(&mut t).unwrap();
        t.transpose(&mut tt).unwrap();

        assert_eq!((t.width(), t.height()), (height, width));
        assert_eq!(tt, m);
    }

    #[test]
    fn transposing_an_empty_matrix_empties_the_output() {
        let mut out = iota(2, 2);
        HostMatrix::<f32>::pageable().transpose(&mut out).unwrap();
        assert!(!out.is_allocated());
        assert_eq!((out.width(), out.height()), (0, 0));
    }

    #[test]
    fn device_round_trip() {
        let device = SimulatedDevice::default();
        let src = iota(5, 3);

        let on_device = DeviceMatrix::from_host(&src, device.clone()).unwrap();
        let back = HostMatrix::from_device(&on_device).unwrap();
        assert_eq!(back, src);

        let mut partial = HostMatrix::<f32>::with_size(2, 2, GlobalAllocator).unwrap();
        partial.copy_submatrix_from_device(&on_device, None).unwrap();
        assert_eq!(partial.as_slice(), &[0.0, 1.0, 2.0, 3.0]);

        let err = partial
            .copy_submatrix_from_device(&on_device, Some(16))
            .unwrap_err();
        assert!(matches!(err, MatrixError::SourceTooSmall { .. }));
    }

    #[test]
    fn copy_transpose_from_device() {
        let device = SimulatedDevice::default();
        let src = iota(3, 2);
        let on_device = DeviceMatrix::from_host(&src, device).unwrap();

        let mut dst = HostMatrix::<f32>::with_size(2, 3, GlobalAllocator).unwrap();
        dst.copy_transpose(&on_device).unwrap();
        for i in 0..3 {
            for j in 0..2 {
                assert_eq!(dst[(j, i)], src[(i, j)]);
            }
        }

        let mut wrong = HostMatrix::<f32>::with_size(3, 2, GlobalAllocator).unwrap();
        wrong.fill(-1.0).unwrap();
        let err = wrong.copy_transpose(&on_device).unwrap_err();
        assert!(matches!(
            err,
            MatrixError::DimensionMismatch {
                expected_width: 2,
                expected_height: 3,
                width: 3,
                height: 2,
            }
        ));
        assert!(wrong.as_slice().iter().all(|&v| v == -1.0));
    }

    #[test]
    fn pinned_matrices() {
        let _guard = init_test_subscriber();

        let device = SimulatedDevice::default();
        let mut m = HostMatrix::<f64, _>::pinned(device.clone());
        assert!(m.is_pinned());
        assert!(!m.is_allocated());

        m.resize(4, 4).unwrap();
        assert_eq!(device.pinned_bytes(), 128);
        assert_eq!((m.as_ptr() as usize) % matbridge_runtime::alloc::PAGE_SIZE, 0);
        m.fill(2.5).unwrap();

        // Pinned matrices can still be filled from the device.
        let on_device = DeviceMatrix::from_host(&m, device.clone()).unwrap();
        let mut other = HostMatrix::<f64, _>::pinned(device.clone());
        other.assign_from_device(&on_device).unwrap();
        assert_eq!(other, m);

        drop(m);
        drop(other);
        assert_eq!(device.pinned_bytes(), 0);
    }

    #[test]
    fn pinned_exhaustion_is_recoverable() {
        let config = RuntimeConfig {
            pinned_capacity: Some(64),
            ..RuntimeConfig::default()
        };
        let device = SimulatedDevice::new(config).unwrap();

        let mut m = HostMatrix::<f32, _>::pinned(device);
        let err = m.resize(10, 10).unwrap_err();
        assert!(matches!(err, MatrixError::Allocation(_)));
        assert!(!m.is_allocated());

        m.resize(4, 4).unwrap();
        assert!(m.is_allocated());
    }

    #[test]
    fn failed_device_assignment_keeps_the_shape() {
        let _guard = init_test_subscriber();

        let config = RuntimeConfig {
            pinned_capacity: Some(64),
            ..RuntimeConfig::default()
        };
        let device = SimulatedDevice::new(config).unwrap();
        let src = DeviceMatrix::from_host(&iota(5, 5), device.clone()).unwrap();

        // The staged buffer does not fit in page-locked memory.
        let mut pinned = HostMatrix::<f32, _>::pinned(device.clone());
        pinned.resize(2, 2).unwrap();
        pinned.fill(3.0).unwrap();
        let err = pinned.assign_from_device(&src).unwrap_err();
        assert!(matches!(err, MatrixError::Allocation(_)));
        assert_eq!((pinned.width(), pinned.height()), (2, 2));
        assert!(pinned.as_slice().iter().all(|&v| v == 3.0));
        assert_eq!(device.pinned_bytes(), 16);

        // SAFETY: Deliberate misuse; the simulated device detects stale pointers.
        unsafe { device.free(src.device_ptr().unwrap()).unwrap() };

        let mut dst = iota(2, 3);
        let err = dst.assign_from_device(&src).unwrap_err();
        assert!(matches!(
            err,
            MatrixError::Runtime(RuntimeError::InvalidPointer(_))
        ));
        assert_eq!(dst, iota(2, 3));

        let mut same = iota(25, 1);
        let err = same.assign_from_device(&src).unwrap_err();
        assert!(matches!(err, MatrixError::Runtime(_)));
        assert_eq!((same.width(), same.height()), (25, 1));
    }

    #[test]
    fn allocation_failure_leaves_the_matrix_intact() {
        let mut m = HostMatrix::<u8, _>::new(AlwaysFails);
        let err = m.resize(2, 2).unwrap_err();
        assert!(matches!(err, MatrixError::Allocation(_)));
        assert_eq!(err.to_string(), "host allocation failed");
        assert!(!m.is_allocated());
        assert_eq!((m.width(), m.height()), (0, 0));
    }

    #[test]
    fn symbols() {
        let config = RuntimeConfig {
            symbols: vec![SymbolDecl::new("gpu_coords", 32), SymbolDecl::new("gpu_tiny", 4)],
            ..RuntimeConfig::default()
        };
        let device = SimulatedDevice::new(config).unwrap();

        let m = iota(2, 2);
        m.publish_to_symbol(&device.symbol("gpu_coords").unwrap())
            .unwrap();
        let published = device.read_symbol("gpu_coords").unwrap();
        assert_eq!(&published[..16], bytemuck::cast_slice::<f32, u8>(m.as_slice()));
        assert!(published[16..].iter().all(|&b| b == 0));

        let err = m
            .publish_to_symbol(&device.symbol("gpu_tiny").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            MatrixError::Runtime(RuntimeError::SymbolOverflow { bytes: 16, capacity: 4, .. })
        ));

        let err = HostMatrix::<f32>::pageable()
            .publish_to_symbol(&device.symbol("gpu_coords").unwrap())
            .unwrap_err();
        assert!(matches!(err, MatrixError::NotAllocated));

        assert_eq!(
            device.symbol("gpu_missing").unwrap_err(),
            RuntimeError::UnknownSymbol("gpu_missing".into())
        );
    }

    #[test]
    fn foreign_load_and_store() {
        // Column-major 2 x 3 with a leading dimension of 3.
        let data = [1.0f32, 2.0, 0.0, 3.0, 4.0, 0.0, 5.0, 6.0];
        let view = ForeignMatrix::try_from(&data, 2, 3, 3).unwrap();

        let mut m = HostMatrix::pageable();
        m.load_foreign(&view).unwrap();
        assert_eq!((m.width(), m.height()), (2, 3));
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        m.fill(8.0).unwrap();
        let mut out = vec![0.0f32; 8];
        let mut view = ForeignMatrixMut::try_from(out.as_mut_slice(), 2, 3, 3).unwrap();
        m.store_foreign(&mut view).unwrap();
        assert_eq!(out, [8.0, 8.0, 0.0, 8.0, 8.0, 0.0, 8.0, 8.0]);

        let mut out = vec![0.0f32; 8];
        let mut view = ForeignMatrixMut::try_from(out.as_mut_slice(), 3, 2, 3).unwrap();
        let err = m.store_foreign(&mut view).unwrap_err();
        assert!(matches!(err, MatrixError::DimensionMismatch { .. }));
    }

    #[test]
    fn try_clone() {
        let m = iota(3, 4);
        let clone = m.try_clone().unwrap();
        assert_eq!(clone, m);
        assert_ne!(clone.as_ptr(), m.as_ptr());

        let empty = HostMatrix::<f32>::pageable().try_clone().unwrap();
        assert!(!empty.is_allocated());
    }

    #[test]
    fn half_precision() {
        let mut m = HostMatrix::<f16>::with_size(2, 2, GlobalAllocator).unwrap();
        m.fill(f16::from_f32(0.5)).unwrap();
        m[(1, 1)] = f16::from_f32(-2.0);
        assert_eq!(m.byte_size(), 8);
        assert_eq!(m.row(1), &[f16::from_f32(0.5), f16::from_f32(-2.0)]);
    }

    #[test]
    fn vector_elements() {
        let mut m = HostMatrix::<[f64; 3]>::with_size(2, 1, GlobalAllocator).unwrap();
        m[(1, 0)] = [1.0, 2.0, 3.0];
        assert_eq!(m.byte_size(), 48);
        assert_eq!(m.as_slice(), &[[0.0; 3], [1.0, 2.0, 3.0]]);
    }
}
