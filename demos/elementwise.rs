//! Example: Elementwise Operations
//!
//! Runs single-operation kernels from the precompiled library and shows how
//! the operand types pick the kernel and its result type.
//!
//! Run with: cargo run --example elementwise

use accel_kernels::{Accelerator, EmulatorBackend, KernelSignature, OpKind, Operand};

fn main() {
    println!("=== Elementwise Operations Example ===\n");

    let mut acc = Accelerator::new(EmulatorBackend::default()).unwrap();

    // Example 1: buffer + buffer
    let ramp = acc.iota(8).unwrap();
    let doubled = acc.add(&ramp, &ramp).unwrap();
    println!("Example 1: iota(8) + iota(8)");
    println!("  {:?}\n", acc.to_vec::<f32>(&doubled).unwrap());

    // Example 2: the scalar's type decides the result type
    let a = acc.upload(&[1, 2, 3, 4]).unwrap();
    for scalar in [Operand::from(5), Operand::from(5.0f32)] {
        let signature = KernelSignature::resolve(OpKind::Mul, &[a.operand_type(), scalar.operand_type()]).unwrap();
        let product = acc.mul(&a, scalar).unwrap();
        println!("Example 2: {} -> {}", signature, product.element_type());
    }
    println!();

    // Example 3: rotation and in-place update
    let values = acc.upload(&[0, 1, 2, 3, 4]).unwrap();
    let left = acc.rotate_left(&values, 2).unwrap();
    println!("Example 3: rotate_left([0,1,2,3,4], 2) = {:?}", acc.to_vec::<i32>(&left).unwrap());
    acc.mul_in_place(&values, 10).unwrap();
    println!("           after mul_in_place(x, 10)  = {:?}\n", acc.to_vec::<i32>(&values).unwrap());

    // Example 4: unsupported combinations are reported, not coerced
    match acc.bit_and(&ramp, 1) {
        Ok(_) => println!("Example 4: unexpected success"),
        Err(e) => println!("Example 4: {}", e),
    }

    // Example 5: 2x2 matrix product, one rank-one update per column
    let lhs = acc.upload(&[1, 2, 3, 4]).unwrap();
    let rhs = acc.upload(&[5, 6, 7, 8]).unwrap();
    let product = acc.zeros(4, accel_kernels::ElementType::Integral).unwrap();
    for k in 0..2 {
        acc.matrix_fma(&lhs, &rhs, &product, 2, 2, k).unwrap();
    }
    println!("\nExample 5: [[1,2],[3,4]] x [[5,6],[7,8]] = {:?}", acc.to_vec::<i32>(&product).unwrap());
    let column = acc.upload(&[1.0f32, -1.0]).unwrap();
    let applied = acc.mul_vector(&lhs, &column).unwrap();
    println!("           [[1,2],[3,4]] x [1,-1]        = {:?}", acc.to_vec::<f32>(&applied).unwrap());

    let stats = acc.backend().stats();
    println!("\nPrograms compiled: {}, kernels launched: {}", stats.compiles, stats.enqueues);
}
