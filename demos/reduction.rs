//! Example: Reduction
//!
//! Sums a buffer with per-group partial sums on the device and a final
//! host-side add, for two work-group sizes.
//!
//! Run with: cargo run --example reduction

use accel_kernels::{Accelerator, AcceleratorConfig, EmulatorBackend, EmulatorConfig};

fn main() {
    println!("=== Reduction Example ===\n");

    let data: Vec<i32> = (1..=1000).collect();

    for group_size in [256, 64] {
        let backend = EmulatorBackend::new(EmulatorConfig::new("emulated-device", group_size, 1 << 20));
        let mut acc = Accelerator::with_config(backend, AcceleratorConfig::default()).unwrap();
        let buffer = acc.upload(&data).unwrap();

        let sum = acc.sum_reduce(&buffer).unwrap();
        println!(
            "Work-group size {:>3}: {} groups, sum = {}",
            group_size,
            data.len().div_ceil(group_size),
            sum
        );
    }

    let mut acc = Accelerator::new(EmulatorBackend::default()).unwrap();
    let ramp = acc.iota(10).unwrap();
    let roots = acc.sqrt(&ramp).unwrap();
    println!("\nsum(sqrt(0..10)) = {}", acc.sum_reduce(&roots).unwrap());
}
