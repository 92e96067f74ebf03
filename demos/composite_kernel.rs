//! Example: Composite Kernel
//!
//! Fuses `sqrt(a) * b + 0.5` into one kernel with the expression builder,
//! prints the generated source and runs it.
//!
//! Run with: cargo run --example composite_kernel

use accel_kernels::{Accelerator, ElementType, EmulatorBackend, KernelBuilder};

fn main() {
    println!("=== Composite Kernel Example ===\n");

    let mut acc = Accelerator::new(EmulatorBackend::default()).unwrap();
    let a = acc.upload(&[1.0f32, 4.0, 9.0, 16.0]).unwrap();
    let b = acc.upload(&[1, 2, 3, 4]).unwrap();
    let out = acc.zeros(4, ElementType::Floating).unwrap();

    let mut builder = KernelBuilder::new();
    let y = builder.var(&a).sqrt().mul(&b).add(0.5f32);
    builder.assign(&out, y);
    let kernel = builder.finalize(out.len()).unwrap();

    println!("Generated source:\n{}", kernel.source);
    println!("Arguments:");
    for argument in &kernel.arguments {
        println!("  {} : {:?}", argument.name, argument.value);
    }

    acc.run(&kernel).unwrap();
    println!("\nResult: {:?}", acc.to_vec::<f32>(&out).unwrap());

    // A second episode starts again from a0 / l0
    let mut builder = KernelBuilder::new();
    builder.for_range(0, 2, 1, |t| {
        let x = builder.element_at(&a, t);
        builder.add_assign(&out, x);
    });
    let kernel = builder.finalize(out.len()).unwrap();
    println!("\nLoop kernel:\n{}", kernel.source);
    acc.run(&kernel).unwrap();
    println!("Result: {:?}", acc.to_vec::<f32>(&out).unwrap());
}
