/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

/// A scalar or small vector type that can be stored in a matrix.
///
/// Elements must be plain old data: every bit pattern is a valid value and the type has
/// no padding. This is what makes raw byte copies between memory domains and byte-pattern
/// fills on the device sound. Scalars (`f32`, `f64`, `u32`), small arrays (`[f32; 3]`,
/// `[f64; 3]`), and `half::f16` all qualify.
pub trait Element: bytemuck::Pod + std::fmt::Debug {}

impl<T> Element for T where T: bytemuck::Pod + std::fmt::Debug {}

/// The shape shared by every matrix, owning or not.
///
/// Elements are addressed as `(i, j)` with `i < width` and `j < height`. The `i` axis is
/// contiguous in memory: element `(i, j)` lives at `j * pitch + i`, where the pitch equals
/// the width for owning matrices and the declared stride for foreign views.
pub trait Shape {
    type Elem: Element;

    /// Number of elements along the contiguous axis.
    fn width(&self) -> usize;

    /// Number of lines of `width` elements.
    fn height(&self) -> usize;

    /// Whether the matrix is backed by a buffer.
    fn is_allocated(&self) -> bool;

    /// Return `width * height`.
    fn elements(&self) -> usize {
        self.width() * self.height()
    }

    /// Return the number of bytes covered by the logical elements.
    fn byte_size(&self) -> usize {
        self.elements() * std::mem::size_of::<Self::Elem>()
    }

    /// Whether the shape contains no elements.
    fn is_empty(&self) -> bool {
        self.elements() == 0
    }
}
