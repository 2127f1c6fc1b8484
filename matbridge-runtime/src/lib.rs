/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The driver seam underneath `matbridge`.
//!
//! Matrices never talk to an accelerator directly. They go through a [`DeviceRuntime`]
//! handle that they are given at construction time, which keeps them testable without a
//! live device: [`SimulatedDevice`] implements the same trait on top of host memory.
//!
//! The [`alloc`] module provides the host-side allocators, including the page-locked
//! [`alloc::PinnedAllocator`] which draws its memory from a runtime.

pub mod alloc;

mod config;
pub use config::{RuntimeConfig, SymbolDecl, DEFAULT_DEVICE_ALIGNMENT};

mod error;
pub use error::{ConfigError, RuntimeError};

mod runtime;
pub use runtime::{DevicePtr, DeviceRuntime, DeviceSymbol, DeviceTransfer};

mod simulated;
pub use simulated::SimulatedDevice;

#[cfg(any(test, feature = "testing"))]
pub mod logging;
