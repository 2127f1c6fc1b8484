/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Non-owning, strided views over matrices that live in someone else's buffer.

use std::ops::{Index, IndexMut};

use thiserror::Error;

use crate::{Element, Shape};

/// Types that can be borrowed as a contiguous slice.
///
/// # Safety
///
/// `as_slice` must be idempotent: it must **always** return the same slice with the same
/// length. Unchecked indexing in [`ForeignBase`] relies on this.
pub unsafe trait DenseData {
    type Elem;

    /// Return the underlying data as a slice.
    fn as_slice(&self) -> &[Self::Elem];
}

/// A mutable companion to [`DenseData`].
///
/// # Safety
///
/// The returned slice must span exactly the same memory as `as_slice`.
pub unsafe trait MutDenseData: DenseData {
    fn as_mut_slice(&mut self) -> &mut [Self::Elem];
}

// SAFETY: This fulfills the idempotency requirement.
unsafe impl<T> DenseData for &[T] {
    type Elem = T;
    fn as_slice(&self) -> &[T] {
        self
    }
}

// SAFETY: This fulfills the idempotency requirement.
unsafe impl<T> DenseData for &mut [T] {
    type Elem = T;
    fn as_slice(&self) -> &[T] {
        self
    }
}

// SAFETY: Both methods return the same underlying slice.
unsafe impl<T> MutDenseData for &mut [T] {
    fn as_mut_slice(&mut self) -> &mut [T] {
        self
    }
}

/// A matrix stored in an externally owned buffer with a leading dimension.
///
/// Element `(i, j)` lives at `j * stride + i`. Lines along the `i` axis are contiguous and
/// consecutive lines are `stride` elements apart:
///
/// ```text
///           |<------- stride ------->|
///           |<-- width -->|
///           +-------------+
/// line 0 -> | a0 a1 a2 a3 | a4 a5 a6     ^
/// line 1 -> | b0 b1 b2 b3 | b4 b5 b6     |
/// line 2 -> | c0 c1 c2 c3 | c4 c5 c6   height
/// line 3 -> | d0 d1 d2 d3 |              v
///           +-------------+
/// ```
///
/// A column-major array `A(n, m)` with leading dimension `lda` maps onto
/// `width = n`, `height = m`, `stride = lda`.
///
/// The view never allocates, frees, or resizes anything. Copying data in or out goes
/// through [`HostMatrix::load_foreign`](crate::HostMatrix::load_foreign) and
/// [`HostMatrix::store_foreign`](crate::HostMatrix::store_foreign).
#[derive(Debug, Clone, Copy)]
pub struct ForeignBase<D>
where
    D: DenseData,
{
    data: D,
    width: usize,
    height: usize,
    // Distance between the starts of consecutive lines. Always `>= width`.
    stride: usize,
}

pub type ForeignMatrix<'a, T> = ForeignBase<&'a [T]>;
pub type ForeignMatrixMut<'a, T> = ForeignBase<&'a mut [T]>;

/// Return the number of elements a strided buffer with the given parameters must span.
///
/// The last line only needs `width` elements, not a full `stride`. Returns `None` on
/// overflow.
pub fn linear_length(width: usize, height: usize, stride: usize) -> Option<usize> {
    match height {
        0 => Some(0),
        _ => (height - 1).checked_mul(stride)?.checked_add(width),
    }
}

/// Errors raised while constructing a [`ForeignBase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ForeignError {
    #[error("foreign matrix pointer is null")]
    NullPointer,

    #[error("foreign matrix pointer {addr:#x} is not aligned to {align} bytes")]
    Misaligned { addr: usize, align: usize },

    #[error("stride {stride} is smaller than the width {width}")]
    StrideTooSmall { width: usize, stride: usize },

    #[error(
        "a {width} x {height} matrix with stride {stride} needs {expected} elements but \
         the buffer holds {len}"
    )]
    TooShort {
        width: usize,
        height: usize,
        stride: usize,
        len: usize,
        expected: usize,
    },

    #[error("a {width} x {height} matrix with stride {stride} exceeds the addressable size")]
    Overflow {
        width: usize,
        height: usize,
        stride: usize,
    },
}

/// Check the geometry of a strided view and return the number of elements it spans.
fn checked_span<T>(width: usize, height: usize, stride: usize) -> Result<usize, ForeignError> {
    if stride < width {
        return Err(ForeignError::StrideTooSmall { width, stride });
    }

    linear_length(width, height, stride)
        .filter(|&len| {
            len.checked_mul(std::mem::size_of::<T>())
                .is_some_and(|bytes| bytes <= isize::MAX as usize)
        })
        .ok_or(ForeignError::Overflow {
            width,
            height,
            stride,
        })
}

impl<'a, T> ForeignBase<&'a [T]>
where
    T: Element,
{
    /// Construct a view over `data`, shrinking the slice to the span the view covers.
    ///
    /// ```
    /// use matbridge::{ForeignMatrix, Shape};
    ///
    /// // A 2 x 3 matrix with a leading dimension of 4.
    /// let data = [1.0f32, 2.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0, 5.0, 6.0];
    /// let view = ForeignMatrix::try_from(&data, 2, 3, 4).unwrap();
    ///
    /// assert_eq!(view.elements(), 6);
    /// assert_eq!(view[(1, 2)], 6.0);
    /// assert_eq!(view.row(1), &[3.0, 4.0]);
    /// ```
    pub fn try_from(
        data: &'a [T],
        width: usize,
        height: usize,
        stride: usize,
    ) -> Result<Self, ForeignError> {
        let expected = checked_span::<T>(width, height, stride)?;
        match data.get(..expected) {
            Some(data) => Ok(Self {
                data,
                width,
                height,
                stride,
            }),
            None => Err(ForeignError::TooShort {
                width,
                height,
                stride,
                len: data.len(),
                expected,
            }),
        }
    }

    /// Construct a view over a raw buffer handed over by foreign code.
    ///
    /// # Safety
    ///
    /// If `ptr` is non-null and properly aligned, it must be valid for reads of
    /// `linear_length(width, height, stride)` elements of `T` for the lifetime `'a`, and
    /// that memory must not be mutated for `'a`.
    pub unsafe fn from_raw_parts(
        ptr: *const T,
        width: usize,
        height: usize,
        stride: usize,
    ) -> Result<Self, ForeignError> {
        let len = checked_raw::<T>(ptr, width, height, stride)?;

        // SAFETY: `ptr` is non-null and aligned, `len * size_of::<T>()` fits in an `isize`,
        // and the caller guarantees the memory is valid for `'a`.
        let data = unsafe { std::slice::from_raw_parts(ptr, len) };
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }
}

impl<'a, T> ForeignBase<&'a mut [T]>
where
    T: Element,
{
    /// Construct a mutable view over `data`, shrinking the slice to the span the view
    /// covers.
    pub fn try_from(
        data: &'a mut [T],
        width: usize,
        height: usize,
        stride: usize,
    ) -> Result<Self, ForeignError> {
        let expected = checked_span::<T>(width, height, stride)?;
        let len = data.len();
        match data.get_mut(..expected) {
            Some(data) => Ok(Self {
                data,
                width,
                height,
                stride,
            }),
            None => Err(ForeignError::TooShort {
                width,
                height,
                stride,
                len,
                expected,
            }),
        }
    }

    /// Construct a mutable view over a raw buffer handed over by foreign code.
    ///
    /// # Safety
    ///
    /// If `ptr` is non-null and properly aligned, it must be valid for reads and writes
    /// of `linear_length(width, height, stride)` elements of `T` for the lifetime `'a`,
    /// and nothing else may access that memory for `'a`.
    pub unsafe fn from_raw_parts_mut(
        ptr: *mut T,
        width: usize,
        height: usize,
        stride: usize,
    ) -> Result<Self, ForeignError> {
        let len = checked_raw::<T>(ptr, width, height, stride)?;

        // SAFETY: `ptr` is non-null and aligned, `len * size_of::<T>()` fits in an `isize`,
        // and the caller guarantees exclusive access for `'a`.
        let data = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }
}

fn checked_raw<T>(
    ptr: *const T,
    width: usize,
    height: usize,
    stride: usize,
) -> Result<usize, ForeignError> {
    if ptr.is_null() {
        return Err(ForeignError::NullPointer);
    }
    let align = std::mem::align_of::<T>();
    if !ptr.is_aligned() {
        return Err(ForeignError::Misaligned {
            addr: ptr as usize,
            align,
        });
    }
    checked_span::<T>(width, height, stride)
}

impl<D> ForeignBase<D>
where
    D: DenseData,
    D::Elem: Element,
{
    /// Return the distance, in elements, between the starts of consecutive lines.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Return the underlying data, covering exactly `linear_length` elements.
    pub fn as_slice(&self) -> &[D::Elem] {
        self.data.as_slice()
    }

    /// Return a reference to element `(i, j)`, or `None` if it is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> Option<&D::Elem> {
        if i < self.width && j < self.height {
            // SAFETY: Checked above.
            Some(unsafe { self.get_unchecked(i, j) })
        } else {
            None
        }
    }

    /// Return a mutable reference to element `(i, j)`, or `None` if it is out of bounds.
    pub fn get_mut(&mut self, i: usize, j: usize) -> Option<&mut D::Elem>
    where
        D: MutDenseData,
    {
        if i < self.width && j < self.height {
            // SAFETY: Checked above.
            Some(unsafe { self.get_unchecked_mut(i, j) })
        } else {
            None
        }
    }

    /// Returns a reference to an element without bounds checking.
    ///
    /// # Safety
    ///
    /// `i < self.width()` and `j < self.height()`.
    pub unsafe fn get_unchecked(&self, i: usize, j: usize) -> &D::Elem {
        debug_assert!(i < self.width && j < self.height);
        // SAFETY: The constructors guarantee `as_slice` spans `linear_length` elements, and
        // `j * stride + i` is below that for in-bounds `(i, j)`.
        unsafe { self.data.as_slice().get_unchecked(j * self.stride + i) }
    }

    /// Returns a mutable reference to an element without bounds checking.
    ///
    /// # Safety
    ///
    /// `i < self.width()` and `j < self.height()`.
    pub unsafe fn get_unchecked_mut(&mut self, i: usize, j: usize) -> &mut D::Elem
    where
        D: MutDenseData,
    {
        debug_assert!(i < self.width && j < self.height);
        let offset = j * self.stride + i;
        // SAFETY: See `get_unchecked`. `as_mut_slice` spans the same memory as `as_slice`.
        unsafe { self.data.as_mut_slice().get_unchecked_mut(offset) }
    }

    /// Return line `j`: the `width` contiguous elements `(0, j)..(width, j)`.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.height()`.
    pub fn row(&self, j: usize) -> &[D::Elem] {
        assert!(j < self.height, "row {j} is out of bounds (max: {})", self.height);
        let start = j * self.stride;
        &self.data.as_slice()[start..start + self.width]
    }

    /// Return line `j` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.height()`.
    pub fn row_mut(&mut self, j: usize) -> &mut [D::Elem]
    where
        D: MutDenseData,
    {
        assert!(j < self.height, "row {j} is out of bounds (max: {})", self.height);
        let start = j * self.stride;
        let width = self.width;
        &mut self.data.as_mut_slice()[start..start + width]
    }

    /// Return an iterator over all lines, beginning with line 0.
    pub fn rows(&self) -> impl Iterator<Item = &[D::Elem]> {
        (0..self.height).map(move |j| self.row(j))
    }

    /// Reborrow as an immutable view.
    pub fn as_view(&self) -> ForeignMatrix<'_, D::Elem> {
        ForeignBase {
            data: self.data.as_slice(),
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }
}

impl<D> Shape for ForeignBase<D>
where
    D: DenseData,
    D::Elem: Element,
{
    type Elem = D::Elem;

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    /// Foreign views always refer to a buffer, even when it spans no elements.
    fn is_allocated(&self) -> bool {
        true
    }
}

/// Return a reference to element `(i, j)`.
///
/// # Panics
///
/// Panics if `i >= self.width()` or `j >= self.height()`.
impl<D> Index<(usize, usize)> for ForeignBase<D>
where
    D: DenseData,
    D::Elem: Element,
{
    type Output = D::Elem;

    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        assert!(i < self.width, "i {i} is out of bounds (max: {})", self.width);
        assert!(j < self.height, "j {j} is out of bounds (max: {})", self.height);
        // SAFETY: We have checked that `i` and `j` are in-bounds.
        unsafe { self.get_unchecked(i, j) }
    }
}

/// Return a mutable reference to element `(i, j)`.
///
/// # Panics
///
/// Panics if `i >= self.width()` or `j >= self.height()`.
impl<D> IndexMut<(usize, usize)> for ForeignBase<D>
where
    D: MutDenseData,
    D::Elem: Element,
{
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut Self::Output {
        assert!(i < self.width, "i {i} is out of bounds (max: {})", self.width);
        assert!(j < self.height, "j {j} is out of bounds (max: {})", self.height);
        // SAFETY: We have checked that `i` and `j` are in-bounds.
        unsafe { self.get_unchecked_mut(i, j) }
    }
}

///////////
// Tests //
///////////
