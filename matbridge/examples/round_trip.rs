/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Move a matrix to a simulated device and back, publishing it to a device symbol on the
//! way. Run with `RUST_LOG=debug` to see every allocation and transfer.

use std::error::Error;

use matbridge::{DeviceMatrix, HostMatrix, Shape};
use matbridge_runtime::{
    alloc::GlobalAllocator, logging::init_subscriber, DeviceRuntime, RuntimeConfig,
    SimulatedDevice, SymbolDecl,
};

fn main() -> Result<(), Box<dyn Error>> {
    init_subscriber();

    let config = RuntimeConfig {
        symbols: vec![SymbolDecl::new("gpu_weights", 64)],
        ..RuntimeConfig::default()
    };
    let device = SimulatedDevice::new(config)?;

    let mut weights = HostMatrix::<f32>::with_size(4, 4, GlobalAllocator)?;
    for j in 0..weights.height() {
        for i in 0..weights.width() {
            weights[(i, j)] = (i + 4 * j) as f32;
        }
    }

    let on_device = DeviceMatrix::from_host(&weights, device.clone())?;
    weights.publish_to_symbol(&device.symbol("gpu_weights")?)?;

    let mut transposed = HostMatrix::pinned(device.clone());
    transposed.resize(4, 4)?;
    transposed.copy_transpose(&on_device)?;

    for row in transposed.rows() {
        tracing::info!("{:?}", row);
    }
    tracing::info!(
        device_bytes = device.allocated_bytes(),
        pinned_bytes = device.pinned_bytes(),
        "done"
    );
    Ok(())
}
