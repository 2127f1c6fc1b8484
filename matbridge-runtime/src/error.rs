/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use thiserror::Error;

use crate::DevicePtr;

/// Errors reported by a [`crate::DeviceRuntime`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("device allocation of {requested} bytes failed ({available} bytes available)")]
    OutOfMemory { requested: usize, available: usize },

    #[error(
        "page-locked host allocation of {requested} bytes failed ({available} bytes available)"
    )]
    PinnedOutOfMemory { requested: usize, available: usize },

    #[error("zero-sized allocations are not supported")]
    ZeroSized,

    #[error("the requested host layout cannot be represented")]
    InvalidLayout,

    #[error("{0} does not refer to a live device allocation")]
    InvalidPointer(DevicePtr),

    #[error("a transfer of {bytes} bytes exceeds the {allocation} byte allocation at {ptr}")]
    OutOfBounds {
        ptr: DevicePtr,
        bytes: usize,
        allocation: usize,
    },

    #[error("device symbol \"{0}\" is not declared")]
    UnknownSymbol(String),

    #[error("cannot write {bytes} bytes into device symbol \"{name}\" of {capacity} bytes")]
    SymbolOverflow {
        name: String,
        bytes: usize,
        capacity: usize,
    },
}

/// Errors raised while loading or validating a [`crate::RuntimeConfig`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to parse the runtime configuration")]
    Parse(#[from] serde_json::Error),

    #[error("device alignment {0} must be a power of two")]
    NotPowerOfTwo(usize),

    #[error("device symbol \"{0}\" is declared more than once")]
    DuplicateSymbol(String),

    #[error("device symbol \"{0}\" must have a non-zero size")]
    EmptySymbol(String),
}
