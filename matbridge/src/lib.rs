/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Owning matrices in host, page-locked host, and device memory, plus non-owning views
//! over externally allocated buffers.
//!
//! Every matrix shares one addressing convention: element `(i, j)` with `i < width` and
//! `j < height` lives at `j * pitch + i`, where the pitch is the width for owning matrices
//! and the declared stride for [`ForeignMatrix`] views.
//!
//! * [`HostMatrix`]: host memory. The allocator type decides between pageable memory
//!   and page-locked memory ([`PinnedHostMatrix`]).
//! * [`DeviceMatrix`]: device memory managed through a
//!   [`DeviceRuntime`](matbridge_runtime::DeviceRuntime) handle.
//! * [`ForeignMatrix`] / [`ForeignMatrixMut`]: strided views that never allocate.
//!
//! All byte movement between matrices goes through [`transfer`], which checks sizes on
//! both sides before copying anything.
//!
//! ```
//! use matbridge::{DeviceMatrix, HostMatrix, Shape};
//! use matbridge_runtime::{alloc::GlobalAllocator, SimulatedDevice};
//!
//! let device = SimulatedDevice::default();
//!
//! let mut host = HostMatrix::<f32>::with_size(3, 2, GlobalAllocator).unwrap();
//! host.fill(7.0).unwrap();
//!
//! let on_device = DeviceMatrix::from_host(&host, device).unwrap();
//! let back = on_device.to_host().unwrap();
//! assert_eq!(back, host);
//! assert_eq!(back.elements(), 6);
//! ```

mod buffer;

mod device;
pub use device::DeviceMatrix;

mod error;
pub use error::{MatrixError, MatrixResult};

pub mod foreign;
pub use foreign::{ForeignBase, ForeignError, ForeignMatrix, ForeignMatrixMut};

mod host;
pub use host::{HostMatrix, PinnedHostMatrix};

mod shape;
pub use shape::{Element, Shape};

pub mod transfer;
pub use transfer::{transfer, Direction};

#[cfg(test)]
mod test_util;
