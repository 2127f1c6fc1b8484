/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The single byte-copy routine behind every cross-domain operation.
//!
//! Matrices describe their buffers as a [`Source`] or a [`Destination`]; [`transfer`]
//! checks the requested byte count against both and dispatches on the resulting
//! [`Direction`]. No other code in the crate moves bytes between matrices.

use std::fmt;

use matbridge_runtime::{DevicePtr, DeviceTransfer};

use crate::{MatrixError, MatrixResult};

/// The pair of memory domains a transfer moves bytes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// The readable side of a transfer.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    Host(&'a [u8]),
    Device {
        ptr: DevicePtr,
        len: usize,
        runtime: &'a dyn DeviceTransfer,
    },
}

impl Source<'_> {
    /// A source holding nothing.
    pub const EMPTY: Source<'static> = Source::Host(&[]);

    /// Return the number of readable bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Host(data) => data.len(),
            Self::Device { len, .. } => *len,
        }
    }

    /// Whether the source holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Source<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(data) => f.debug_tuple("Host").field(&data.len()).finish(),
            Self::Device { ptr, len, .. } => f
                .debug_struct("Device")
                .field("ptr", ptr)
                .field("len", len)
                .finish(),
        }
    }
}

/// The writable side of a transfer.
pub enum Destination<'a> {
    Host(&'a mut [u8]),
    Device {
        ptr: DevicePtr,
        len: usize,
        runtime: &'a dyn DeviceTransfer,
    },
}

impl Destination<'_> {
    /// Return the number of writable bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Host(data) => data.len(),
            Self::Device { len, .. } => *len,
        }
    }

    /// Whether the destination can hold no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Destination<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(data) => f.debug_tuple("Host").field(&data.len()).finish(),
            Self::Device { ptr, len, .. } => f
                .debug_struct("Device")
                .field("ptr", ptr)
                .field("len", len)
                .finish(),
        }
    }
}

/// Check that `requested` bytes can be read from a source holding `available` bytes and
/// written into a destination holding `capacity` bytes.
pub fn check_bounds(requested: usize, available: usize, capacity: usize) -> MatrixResult<()> {
    if requested > available {
        return Err(MatrixError::SourceTooSmall {
            requested,
            available,
        });
    }
    if requested > capacity {
        return Err(MatrixError::DestinationTooSmall {
            requested,
            capacity,
        });
    }
    Ok(())
}

/// Copy the first `bytes` bytes of `src` into the beginning of `dst`.
///
/// Fails without touching either side if `bytes` exceeds what `src` holds or what `dst`
/// can take. Device-to-device copies are issued on the destination's runtime.
pub fn transfer(dst: Destination<'_>, src: Source<'_>, bytes: usize) -> MatrixResult<Direction> {
    check_bounds(bytes, src.len(), dst.len())?;

    let direction = match (dst, src) {
        (Destination::Host(dst), Source::Host(src)) => {
            dst[..bytes].copy_from_slice(&src[..bytes]);
            Direction::HostToHost
        }
        (Destination::Device { ptr, runtime, .. }, Source::Host(src)) => {
            if bytes != 0 {
                runtime.copy_host_to_device(ptr, &src[..bytes])?;
            }
            Direction::HostToDevice
        }
        (Destination::Host(dst), Source::Device { ptr, runtime, .. }) => {
            if bytes != 0 {
                runtime.copy_device_to_host(&mut dst[..bytes], ptr)?;
            }
            Direction::DeviceToHost
        }
        (
            Destination::Device {
                ptr: dst, runtime, ..
            },
            Source::Device { ptr: src, .. },
        ) => {
            if bytes != 0 {
                runtime.copy_device_to_device(dst, src, bytes)?;
            }
            Direction::DeviceToDevice
        }
    };

    tracing::debug!(?direction, bytes, "transfer");
    Ok(direction)
}

///////////
// Tests //
///////////
