/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use matbridge_runtime::{alloc::AllocatorError, RuntimeError};
use thiserror::Error;

/// Convenience alias for a `Result<T, MatrixError>`.
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Errors raised by matrix allocation, transfer, and reshaping operations.
///
/// Size and shape violations are always reported through this type. Nothing is ever
/// silently clamped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MatrixError {
    #[error("cannot allocate a {width} x {height} matrix: both dimensions must be non-zero")]
    ZeroSize { width: usize, height: usize },

    #[error("a {width} x {height} matrix exceeds the addressable size")]
    Overflow { width: usize, height: usize },

    #[error("the matrix has no allocated buffer")]
    NotAllocated,

    #[error("cannot copy {requested} bytes from a source holding {available} bytes")]
    SourceTooSmall { requested: usize, available: usize },

    #[error("cannot copy {requested} bytes into a destination holding {capacity} bytes")]
    DestinationTooSmall { requested: usize, capacity: usize },

    #[error(
        "expected a {expected_width} x {expected_height} matrix but found {width} x {height}"
    )]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    #[error("host allocation failed")]
    Allocation(#[from] AllocatorError),

    #[error("device runtime call failed")]
    Runtime(#[from] RuntimeError),
}

/// Return `width * height` for a shape that is about to be allocated.
///
/// Rejects shapes with no elements and shapes whose byte size for `T` does not fit in
/// an `isize`.
pub(crate) fn checked_elements<T>(width: usize, height: usize) -> MatrixResult<usize> {
    if width == 0 || height == 0 {
        return Err(MatrixError::ZeroSize { width, height });
    }

    width
        .checked_mul(height)
        .filter(|elements| {
            elements
                .checked_mul(std::mem::size_of::<T>())
                .is_some_and(|bytes| bytes <= isize::MAX as usize)
        })
        .ok_or(MatrixError::Overflow { width, height })
}

/// Return the number of bytes covered by `count` elements of `T`.
pub(crate) fn checked_bytes<T>(count: usize) -> MatrixResult<usize> {
    count
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(MatrixError::Overflow {
            width: count,
            height: 1,
        })
}

///////////
// Tests //
///////////
