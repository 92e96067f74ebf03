//! Accelerator kernel generation and type-specialized dispatch
//!
//! Elementwise operations on device buffers of 32-bit integers or floats.
//! Each operation resolves a kernel from its operand types, compiles it once
//! per accelerator and launches it. Chained expressions can be fused into a
//! single composite kernel with the [`KernelBuilder`].
//!
//! # Example
//!
//! ```rust
//! use accel_kernels::{Accelerator, EmulatorBackend, ElementType};
//!
//! let mut acc = Accelerator::new(EmulatorBackend::default()).unwrap();
//! let a = acc.upload(&[1, 2, 3, 4]).unwrap();
//! let scaled = acc.mul(&a, 2.5f32).unwrap();
//! assert_eq!(scaled.element_type(), ElementType::Floating);
//! assert_eq!(acc.to_vec::<f32>(&scaled).unwrap(), vec![2.5, 5.0, 7.5, 10.0]);
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod analyzer;
pub mod interpreter;
pub mod backend;
pub mod emulator;
pub mod config;
pub mod types;
pub mod naming;
pub mod library;
pub mod buffer;
pub mod builder;
pub mod dispatch;
pub mod error;

pub use analyzer::Analyzer;
pub use backend::{Backend, BufferHandle, HostSlice, HostSliceMut, KernelArg};
pub use buffer::DeviceBuffer;
pub use builder::{KernelArgument, KernelBuilder, KernelSource, Statement, Term};
pub use config::{AcceleratorConfig, EmulatorConfig};
pub use dispatch::{Accelerator, Operand};
pub use emulator::{EmulatorBackend, EmulatorStats};
pub use error::{DispatchError, DispatchResult};
pub use library::KernelLibrary;
pub use naming::{name_for, KernelSignature, OpKind, OperandKind, OperandType};
pub use types::{result_type, type_of, ElementType, HostElement, Scalar};

/// Parse and check kernel source, as a backend compiler would
pub fn compile_source(source: &str) -> DispatchResult<ast::Module> {
    let module = parser::parse(source)?;
    Analyzer::new().analyze(&module)?;
    Ok(module)
}
