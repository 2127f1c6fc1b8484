/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// The default base alignment of device allocations.
pub const DEFAULT_DEVICE_ALIGNMENT: usize = 256;

/// A device symbol declared up front by the compute kernels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDecl {
    pub name: String,
    pub bytes: usize,
}

impl SymbolDecl {
    pub fn new(name: impl Into<String>, bytes: usize) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Configuration for a [`crate::SimulatedDevice`].
///
/// Every field has a default, so a JSON document only needs to mention what it changes:
/// ```
/// use matbridge_runtime::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{
///     "device_capacity": 1048576,
///     "symbols": [{ "name": "gpu_atom_positions", "bytes": 1536 }]
/// }"#).unwrap();
///
/// assert_eq!(config.device_capacity, Some(1 << 20));
/// assert_eq!(config.pinned_capacity, None);
/// assert_eq!(config.device_alignment, 256);
/// assert_eq!(config.symbols.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Total bytes of device memory. `None` means unlimited.
    pub device_capacity: Option<usize>,

    /// Total bytes of page-locked host memory. `None` means unlimited.
    pub pinned_capacity: Option<usize>,

    /// Base alignment of device allocations. Must be a power of two.
    pub device_alignment: usize,

    /// Device symbols available for publication.
    pub symbols: Vec<SymbolDecl>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_capacity: None,
            pinned_capacity: None,
            device_alignment: DEFAULT_DEVICE_ALIGNMENT,
            symbols: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants that cannot be expressed through the field types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.device_alignment.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo(self.device_alignment));
        }

        let mut seen = HashSet::with_capacity(self.symbols.len());
        for symbol in self.symbols.iter() {
            if symbol.bytes == 0 {
                return Err(ConfigError::EmptySymbol(symbol.name.clone()));
            }
            if !seen.insert(symbol.name.as_str()) {
                return Err(ConfigError::DuplicateSymbol(symbol.name.clone()));
            }
        }
        Ok(())
    }
}

///////////
// Tests //
///////////
