//! Accelerator backend interface
//!
//! The dispatcher talks to a device exclusively through [`Backend`]. Handles
//! are opaque newtypes; a backend must never hand out the same handle value
//! twice, so a released handle can always be recognised.

use std::fmt;

use crate::error::DispatchResult;
use crate::types::ElementType;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, " #{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// A compute device
    DeviceHandle,
    "device"
);
handle_type!(
    /// A context owning programs and buffers
    ContextHandle,
    "context"
);
handle_type!(
    /// An in-order command queue
    QueueHandle,
    "queue"
);
handle_type!(
    /// A compiled program holding one or more kernel functions
    ProgramHandle,
    "program"
);
handle_type!(
    /// One kernel function instance with its own argument slots
    KernelHandle,
    "kernel"
);
handle_type!(
    /// Device memory
    BufferHandle,
    "buffer"
);

/// A value bound to one kernel argument slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Buffer(BufferHandle),
    Int(i32),
    Float(f32),
}

/// Host data being uploaded
#[derive(Debug, Clone, Copy)]
pub enum HostSlice<'a> {
    Int(&'a [i32]),
    Float(&'a [f32]),
}

impl HostSlice<'_> {
    pub fn len(&self) -> usize {
        match self {
            HostSlice::Int(data) => data.len(),
            HostSlice::Float(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            HostSlice::Int(_) => ElementType::Integral,
            HostSlice::Float(_) => ElementType::Floating,
        }
    }
}

/// Host storage being filled by a download
#[derive(Debug)]
pub enum HostSliceMut<'a> {
    Int(&'a mut [i32]),
    Float(&'a mut [f32]),
}

impl HostSliceMut<'_> {
    pub fn len(&self) -> usize {
        match self {
            HostSliceMut::Int(data) => data.len(),
            HostSliceMut::Float(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            HostSliceMut::Int(_) => ElementType::Integral,
            HostSliceMut::Float(_) => ElementType::Floating,
        }
    }
}

/// The runtime that owns devices, compiles kernel source and executes kernels.
///
/// Calls on one queue execute in submission order.
pub trait Backend {
    /// Human-readable backend name
    fn name(&self) -> &str;

    fn create_device(&mut self) -> DispatchResult<DeviceHandle>;

    fn create_context(&mut self, device: DeviceHandle) -> DispatchResult<ContextHandle>;

    fn create_command_queue(
        &mut self,
        context: ContextHandle,
        device: DeviceHandle,
    ) -> DispatchResult<QueueHandle>;

    fn release_queue(&mut self, queue: QueueHandle) -> DispatchResult<()>;

    fn release_context(&mut self, context: ContextHandle) -> DispatchResult<()>;

    fn release_device(&mut self, device: DeviceHandle) -> DispatchResult<()>;

    /// Compile every kernel function in `source`. Fails with
    /// `KernelCompile` carrying the diagnostic text.
    fn compile_program(
        &mut self,
        context: ContextHandle,
        source: &str,
    ) -> DispatchResult<ProgramHandle>;

    fn release_program(&mut self, program: ProgramHandle) -> DispatchResult<()>;

    fn create_kernel(
        &mut self,
        program: ProgramHandle,
        function_name: &str,
    ) -> DispatchResult<KernelHandle>;

    fn release_kernel(&mut self, kernel: KernelHandle) -> DispatchResult<()>;

    fn set_kernel_argument(
        &mut self,
        kernel: KernelHandle,
        position: usize,
        value: KernelArg,
    ) -> DispatchResult<()>;

    /// Schedule `global_size` work items of `kernel` on `queue`
    fn enqueue(
        &mut self,
        kernel: KernelHandle,
        queue: QueueHandle,
        global_size: usize,
    ) -> DispatchResult<()>;

    /// Zero-initialised storage of `length` elements
    fn allocate_buffer(
        &mut self,
        context: ContextHandle,
        length: usize,
        element_type: ElementType,
    ) -> DispatchResult<BufferHandle>;

    fn upload_buffer(
        &mut self,
        queue: QueueHandle,
        buffer: BufferHandle,
        data: HostSlice<'_>,
    ) -> DispatchResult<()>;

    /// Blocking read-back of the whole buffer
    fn download_buffer(
        &mut self,
        queue: QueueHandle,
        buffer: BufferHandle,
        out: HostSliceMut<'_>,
    ) -> DispatchResult<()>;

    fn release_buffer(&mut self, buffer: BufferHandle) -> DispatchResult<()>;

    fn max_work_group_size(&self, device: DeviceHandle) -> usize;
}
