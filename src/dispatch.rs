//! The dispatcher
//!
//! Every operation follows the same path: resolve the kernel signature from
//! the operand types, check lengths (and, for in-place calls, that the
//! receiver keeps its element type), allocate the result, fetch the compiled
//! kernel from the cache or compile its program once, bind operands, result
//! and auxiliary integers in that order, and enqueue.
//!
//! Allocating operations always return a fresh buffer. `_in_place` variants
//! write into the receiver and hand the same buffer back.

use std::collections::HashMap;

use crate::backend::{Backend, ContextHandle, DeviceHandle, KernelArg, KernelHandle, ProgramHandle, QueueHandle};
use crate::buffer::DeviceBuffer;
use crate::builder::{KernelArgument, KernelSource};
use crate::config::AcceleratorConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::library::KernelLibrary;
use crate::naming::{describe, KernelSignature, OpKind, OperandType};
use crate::types::{ElementType, HostElement, Scalar};

/// One operand of a dispatched operation
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Buffer(&'a DeviceBuffer),
    Scalar(Scalar),
}

impl<'a> Operand<'a> {
    pub fn operand_type(&self) -> OperandType {
        match self {
            Operand::Buffer(buffer) => buffer.operand_type(),
            Operand::Scalar(scalar) => OperandType::scalar(scalar.element_type()),
        }
    }

    fn kernel_arg(&self) -> KernelArg {
        match self {
            Operand::Buffer(buffer) => KernelArg::Buffer(buffer.handle()),
            Operand::Scalar(Scalar::Int(v)) => KernelArg::Int(*v),
            Operand::Scalar(Scalar::Float(v)) => KernelArg::Float(*v),
        }
    }
}

impl<'a> From<&'a DeviceBuffer> for Operand<'a> {
    fn from(buffer: &'a DeviceBuffer) -> Self {
        Operand::Buffer(buffer)
    }
}

impl<'a> From<Scalar> for Operand<'a> {
    fn from(scalar: Scalar) -> Self {
        Operand::Scalar(scalar)
    }
}

impl<'a> From<i32> for Operand<'a> {
    fn from(value: i32) -> Self {
        Operand::Scalar(Scalar::Int(value))
    }
}

impl<'a> From<f32> for Operand<'a> {
    fn from(value: f32) -> Self {
        Operand::Scalar(Scalar::Float(value))
    }
}

fn signature_of(op: OpKind, operands: &[Operand<'_>]) -> DispatchResult<KernelSignature> {
    let types: Vec<OperandType> = operands.iter().map(Operand::operand_type).collect();
    KernelSignature::resolve(op, &types)
}

/// Length shared by every buffer operand
fn common_length(op: OpKind, operands: &[Operand<'_>]) -> DispatchResult<usize> {
    let mut lengths = operands.iter().filter_map(|operand| match operand {
        Operand::Buffer(buffer) => Some(buffer.len()),
        Operand::Scalar(_) => None,
    });

    let Some(expected) = lengths.next() else {
        let types: Vec<OperandType> = operands.iter().map(Operand::operand_type).collect();
        return Err(DispatchError::unsupported(op.mnemonic(), describe(&types)));
    };
    match lengths.find(|&got| got != expected) {
        Some(got) => Err(DispatchError::length(expected, got)),
        None => Ok(expected),
    }
}

/// An in-place result must keep the receiver's element type
fn check_receiver(signature: &KernelSignature, receiver: &DeviceBuffer) -> DispatchResult<()> {
    if signature.result != receiver.element_type() {
        return Err(DispatchError::TypeInvariantViolation {
            operation: signature.op.mnemonic().to_string(),
            receiver: receiver.element_type(),
            promoted: signature.result,
        });
    }
    Ok(())
}

/// Signature and amount argument of a shift
fn shift_signature(op: OpKind, input: &DeviceBuffer, amount: u32) -> DispatchResult<(KernelSignature, [i32; 1])> {
    let signature = signature_of(op, &[Operand::Buffer(input)])?;
    if amount >= 32 {
        return Err(DispatchError::invalid_argument(format!(
            "shift amount {} out of range for 32-bit elements",
            amount
        )));
    }
    Ok((signature, [amount as i32]))
}

fn int_arg(value: usize, what: &str) -> DispatchResult<i32> {
    i32::try_from(value)
        .map_err(|_| DispatchError::invalid_argument(format!("{} {} does not fit a kernel integer", what, value)))
}

/// A backend bound to one device, context and queue, plus the kernel cache
pub struct Accelerator<B: Backend> {
    backend: B,
    device: DeviceHandle,
    context: ContextHandle,
    queue: QueueHandle,
    library: KernelLibrary,
    config: AcceleratorConfig,
    /// One program per operation, compiled on first use
    programs: HashMap<OpKind, ProgramHandle>,
    /// Kernel objects by kernel name; entries are never removed
    kernels: HashMap<String, KernelHandle>,
}

impl<B: Backend> Accelerator<B> {
    pub fn new(backend: B) -> DispatchResult<Self> {
        Self::with_config(backend, AcceleratorConfig::default())
    }

    pub fn with_config(mut backend: B, config: AcceleratorConfig) -> DispatchResult<Self> {
        let library = KernelLibrary::standard();
        if config.validate_library {
            library.validate()?;
        }

        let device = backend.create_device()?;
        let context = backend.create_context(device)?;
        let queue = backend.create_command_queue(context, device)?;
        log::info!(
            "Accelerator ready on {}: {} kernels in library",
            backend.name(),
            library.len()
        );

        Ok(Self {
            backend,
            device,
            context,
            queue,
            library,
            config,
            programs: HashMap::new(),
            kernels: HashMap::new(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn queue(&self) -> QueueHandle {
        self.queue
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.library
    }

    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    pub fn compiled_program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn cached_kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Release every cached kernel and program, then the queue, context and
    /// device, and hand the backend back
    pub fn close(mut self) -> DispatchResult<B> {
        for (_, kernel) in self.kernels.drain() {
            self.backend.release_kernel(kernel)?;
        }
        for (_, program) in self.programs.drain() {
            self.backend.release_program(program)?;
        }
        self.backend.release_queue(self.queue)?;
        self.backend.release_context(self.context)?;
        self.backend.release_device(self.device)?;
        log::debug!("Accelerator on {} closed", self.backend.name());
        Ok(self.backend)
    }

    // Host marshalling

    pub fn upload<T: HostElement>(&mut self, data: &[T]) -> DispatchResult<DeviceBuffer> {
        DeviceBuffer::upload(self, data)
    }

    pub fn download<T: HostElement>(&mut self, buffer: &DeviceBuffer, out: &mut [T]) -> DispatchResult<()> {
        buffer.download(self, out)
    }

    pub fn to_vec<T: HostElement>(&mut self, buffer: &DeviceBuffer) -> DispatchResult<Vec<T>> {
        buffer.to_vec(self)
    }

    /// Upload `data[index..index + amount]`
    pub fn upload_range<T: HostElement>(&mut self, data: &[T], index: usize, amount: usize) -> DispatchResult<DeviceBuffer> {
        DeviceBuffer::upload_range(self, data, index, amount)
    }

    /// Overwrite every element of `buffer` from the host
    pub fn fill<'r, T: HostElement>(&mut self, buffer: &'r DeviceBuffer, data: &[T]) -> DispatchResult<&'r DeviceBuffer> {
        buffer.fill(self, data)
    }

    /// Download `out.len()` elements starting at `offset`
    pub fn download_range<T: HostElement>(
        &mut self,
        buffer: &DeviceBuffer,
        offset: usize,
        out: &mut [T],
    ) -> DispatchResult<()> {
        buffer.download_range(self, offset, out)
    }

    pub fn release(&mut self, buffer: DeviceBuffer) -> DispatchResult<()> {
        buffer.release(self)
    }

    pub fn zeros(&mut self, length: usize, element_type: ElementType) -> DispatchResult<DeviceBuffer> {
        DeviceBuffer::allocate(self, length, element_type)
    }

    /// FLOATING `[0, 1, .., length - 1]`
    pub fn iota(&mut self, length: usize) -> DispatchResult<DeviceBuffer> {
        let data: Vec<f32> = (0..length).map(|i| i as f32).collect();
        self.upload(&data)
    }

    /// `length` copies of `value`, typed like the value
    pub fn broadcast(&mut self, value: impl Into<Scalar>, length: usize) -> DispatchResult<DeviceBuffer> {
        match value.into() {
            Scalar::Int(v) => self.upload(&vec![v; length]),
            Scalar::Float(v) => self.upload(&vec![v; length]),
        }
    }

    // Kernel cache

    fn kernel_for(&mut self, signature: &KernelSignature) -> DispatchResult<KernelHandle> {
        let name = signature.name();
        if let Some(&kernel) = self.kernels.get(&name) {
            log::debug!("Kernel cache hit: {}", name);
            return Ok(kernel);
        }
        if !self.library.contains(signature) {
            return Err(DispatchError::unsupported(
                signature.op.mnemonic(),
                describe(&signature.operands),
            ));
        }

        let program = match self.programs.get(&signature.op) {
            Some(&program) => program,
            None => {
                let source = self.library.program_source(signature.op);
                let program = self.backend.compile_program(self.context, &source)?;
                log::debug!("Compiled program for `{}` as {}", signature.op, program);
                self.programs.insert(signature.op, program);
                program
            }
        };

        log::debug!("Kernel cache miss: {}", name);
        let kernel = self.backend.create_kernel(program, &name)?;
        self.kernels.insert(name, kernel);
        Ok(kernel)
    }

    fn launch(&mut self, kernel: KernelHandle, args: &[KernelArg], global_size: usize) -> DispatchResult<()> {
        for (position, arg) in args.iter().enumerate() {
            self.backend.set_kernel_argument(kernel, position, *arg)?;
        }
        log::trace!("Enqueue {} with {} argument(s) over {} work item(s)", kernel, args.len(), global_size);
        self.backend.enqueue(kernel, self.queue, global_size)
    }

    /// Bind operands, then the result, then auxiliary integers, and launch
    fn execute(
        &mut self,
        signature: &KernelSignature,
        operands: &[Operand<'_>],
        out: &DeviceBuffer,
        aux: &[i32],
        global_size: usize,
    ) -> DispatchResult<()> {
        let kernel = self.kernel_for(signature)?;
        let mut args: Vec<KernelArg> = operands.iter().map(Operand::kernel_arg).collect();
        args.push(KernelArg::Buffer(out.handle()));
        args.extend(aux.iter().map(|&value| KernelArg::Int(value)));
        self.launch(kernel, &args, global_size)
    }

    /// Allocate a result of `length` elements and run the kernel into it.
    /// The result is released again if the launch fails.
    fn with_result(
        &mut self,
        signature: &KernelSignature,
        operands: &[Operand<'_>],
        length: usize,
        aux: &[i32],
        global_size: usize,
    ) -> DispatchResult<DeviceBuffer> {
        let result = DeviceBuffer::allocate(self, length, signature.result)?;
        match self.execute(signature, operands, &result, aux, global_size) {
            Ok(()) => Ok(result),
            Err(e) => {
                let handle = result.handle();
                if let Err(release_error) = result.release(self) {
                    log::warn!("Leaked {} after failed launch: {}", handle, release_error);
                }
                Err(e)
            }
        }
    }

    fn elementwise(&mut self, op: OpKind, operands: &[Operand<'_>]) -> DispatchResult<DeviceBuffer> {
        let signature = signature_of(op, operands)?;
        let length = common_length(op, operands)?;
        self.with_result(&signature, operands, length, &[], length)
    }

    fn elementwise_in_place<'r>(
        &mut self,
        op: OpKind,
        receiver: &'r DeviceBuffer,
        others: &[Operand<'_>],
    ) -> DispatchResult<&'r DeviceBuffer> {
        let mut operands = Vec::with_capacity(others.len() + 1);
        operands.push(Operand::Buffer(receiver));
        operands.extend_from_slice(others);

        let signature = signature_of(op, &operands)?;
        check_receiver(&signature, receiver)?;
        let length = common_length(op, &operands)?;
        self.execute(&signature, &operands, receiver, &[], length)?;
        Ok(receiver)
    }

    // Ternary

    /// `x + (y - x) * mask`
    pub fn blend(&mut self, x: &DeviceBuffer, y: &DeviceBuffer, mask: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        self.elementwise(OpKind::Blend, &[x.into(), y.into(), mask.into()])
    }

    pub fn blend_in_place<'r>(
        &mut self,
        x: &'r DeviceBuffer,
        y: &DeviceBuffer,
        mask: &DeviceBuffer,
    ) -> DispatchResult<&'r DeviceBuffer> {
        self.elementwise_in_place(OpKind::Blend, x, &[y.into(), mask.into()])
    }

    /// `a * b + c`
    pub fn fma(&mut self, a: &DeviceBuffer, b: &DeviceBuffer, c: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        self.elementwise(OpKind::Fma, &[a.into(), b.into(), c.into()])
    }

    pub fn fma_in_place<'r>(
        &mut self,
        a: &'r DeviceBuffer,
        b: &DeviceBuffer,
        c: &DeviceBuffer,
    ) -> DispatchResult<&'r DeviceBuffer> {
        self.elementwise_in_place(OpKind::Fma, a, &[b.into(), c.into()])
    }

    // Windowed and repeating products

    /// `out[i] = a[i] * factors[i % factors.len()]`
    pub fn multiply_repeat(&mut self, a: &DeviceBuffer, factors: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        let operands = [Operand::Buffer(a), Operand::Buffer(factors)];
        let signature = signature_of(OpKind::MultiplyRepeat, &operands)?;
        let aux = [int_arg(factors.len(), "factor length")?];
        self.with_result(&signature, &operands, a.len(), &aux, a.len())
    }

    pub fn multiply_repeat_in_place<'r>(
        &mut self,
        a: &'r DeviceBuffer,
        factors: &DeviceBuffer,
    ) -> DispatchResult<&'r DeviceBuffer> {
        let operands = [Operand::Buffer(a), Operand::Buffer(factors)];
        let signature = signature_of(OpKind::MultiplyRepeat, &operands)?;
        check_receiver(&signature, a)?;
        let aux = [int_arg(factors.len(), "factor length")?];
        self.execute(&signature, &operands, a, &aux, a.len())?;
        Ok(a)
    }

    /// `out[i] = a[offset_a + i] * b[offset_b + i]` for `i < amount`
    pub fn mul_range(
        &mut self,
        a: &DeviceBuffer,
        offset_a: usize,
        b: &DeviceBuffer,
        offset_b: usize,
        amount: usize,
    ) -> DispatchResult<DeviceBuffer> {
        if amount == 0 {
            return Err(DispatchError::invalid_argument("mul_range needs a non-empty window"));
        }
        for (buffer, offset) in [(a, offset_a), (b, offset_b)] {
            match offset.checked_add(amount) {
                Some(end) if end <= buffer.len() => {}
                _ => {
                    return Err(DispatchError::invalid_argument(format!(
                        "window {}..{}+{} exceeds {} of length {}",
                        offset,
                        offset,
                        amount,
                        buffer.handle(),
                        buffer.len()
                    )))
                }
            }
        }

        let operands = [Operand::Buffer(a), Operand::Buffer(b)];
        let signature = signature_of(OpKind::MulRange, &operands)?;
        let aux = [int_arg(offset_a, "offset")?, int_arg(offset_b, "offset")?];
        self.with_result(&signature, &operands, amount, &aux, amount)
    }

    // Matrix products

    /// Square matrix times vector: `out[r] = sum_j matrix[r * n + j] * vector[j]`
    /// with `n = vector.len()`. The result is promoted.
    pub fn mul_vector(&mut self, matrix: &DeviceBuffer, vector: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        let operands = [Operand::Buffer(matrix), Operand::Buffer(vector)];
        let signature = signature_of(OpKind::MulVector, &operands)?;
        let n = vector.len();
        if n.checked_mul(n) != Some(matrix.len()) {
            return Err(DispatchError::invalid_argument(format!(
                "matrix of {} elements is not {} x {}",
                matrix.len(),
                n,
                n
            )));
        }
        let aux = [int_arg(n, "vector length")?];
        self.with_result(&signature, &operands, n, &aux, n)
    }

    /// Sliding-window product sum. `input` is row-major with `width`
    /// columns and `factor` is a `kernel_width` square; output element `o`
    /// sums the window whose top-left corner is
    /// `(o / out_width, o % out_width)`, where
    /// `out_width = width - kernel_width + 1`.
    pub fn each_area_fma(
        &mut self,
        input: &DeviceBuffer,
        factor: &DeviceBuffer,
        width: usize,
        kernel_width: usize,
        result_length: usize,
    ) -> DispatchResult<DeviceBuffer> {
        let operands = [Operand::Buffer(input), Operand::Buffer(factor)];
        let signature = signature_of(OpKind::EachAreaFma, &operands)?;

        if width == 0 || kernel_width == 0 || kernel_width > width || input.len() % width != 0 {
            return Err(DispatchError::invalid_argument(format!(
                "{} elements do not form rows of width {} for a kernel of width {}",
                input.len(),
                width,
                kernel_width
            )));
        }
        let area = kernel_width
            .checked_mul(kernel_width)
            .ok_or_else(|| DispatchError::invalid_argument("kernel width overflows"))?;
        if factor.len() != area {
            return Err(DispatchError::length(area, factor.len()));
        }
        let height = input.len() / width;
        let windows = (width - kernel_width + 1) * (height.saturating_sub(kernel_width) + 1);
        if kernel_width > height || result_length == 0 || result_length > windows {
            return Err(DispatchError::invalid_argument(format!(
                "result length {} outside 1..={} windows of a {} x {} input",
                result_length,
                if kernel_width > height { 0 } else { windows },
                height,
                width
            )));
        }

        let aux = [int_arg(width, "width")?, int_arg(kernel_width, "kernel width")?];
        self.with_result(&signature, &operands, result_length, &aux, result_length)
    }

    /// Rank-one update of `summand` (rows x `n`) with column `k` of `a`
    /// (rows x `m`) and row `k` of `factor` (`m` x `n`):
    /// `summand[r * n + c] += a[r * m + k] * factor[k * n + c]`.
    /// Summing over every `k` accumulates the product `a * factor`.
    pub fn matrix_fma<'r>(
        &mut self,
        a: &DeviceBuffer,
        factor: &DeviceBuffer,
        summand: &'r DeviceBuffer,
        m: usize,
        n: usize,
        k: usize,
    ) -> DispatchResult<&'r DeviceBuffer> {
        let operands = [Operand::Buffer(a), Operand::Buffer(factor), Operand::Buffer(summand)];
        let signature = signature_of(OpKind::MatrixFma, &operands)?;
        check_receiver(&signature, summand)?;

        if m == 0 || n == 0 || k >= m || summand.len() % n != 0 {
            return Err(DispatchError::invalid_argument(format!(
                "column {} of an m = {}, n = {} product does not fit a summand of {} elements",
                k,
                m,
                n,
                summand.len()
            )));
        }
        let rows = summand.len() / n;
        for (buffer, expected) in [(a, rows.checked_mul(m)), (factor, m.checked_mul(n))] {
            let expected = expected.ok_or_else(|| DispatchError::invalid_argument("matrix shape overflows"))?;
            if buffer.len() != expected {
                return Err(DispatchError::length(expected, buffer.len()));
            }
        }

        let aux = [int_arg(m, "m")?, int_arg(n, "n")?, int_arg(k, "k")?];
        self.execute(&signature, &operands, summand, &aux, summand.len())?;
        Ok(summand)
    }

    // Permutations

    fn rotate(&mut self, op: OpKind, input: &DeviceBuffer, amount: usize) -> DispatchResult<DeviceBuffer> {
        let operands = [Operand::Buffer(input)];
        let signature = signature_of(op, &operands)?;
        let length = input.len();
        let aux = [
            int_arg(amount % length, "rotation amount")?,
            int_arg(length, "buffer length")?,
        ];
        self.with_result(&signature, &operands, length, &aux, length)
    }

    /// Rotate into a temporary, then copy back over the receiver
    fn rotate_in_place<'r>(
        &mut self,
        op: OpKind,
        receiver: &'r DeviceBuffer,
        amount: usize,
    ) -> DispatchResult<&'r DeviceBuffer> {
        let rotated = self.rotate(op, receiver, amount)?;
        let outcome = signature_of(OpKind::Copy, &[Operand::Buffer(&rotated)]).and_then(|copy| {
            check_receiver(&copy, receiver)?;
            self.execute(&copy, &[Operand::Buffer(&rotated)], receiver, &[], receiver.len())
        });
        let released = rotated.release(self);
        outcome.and(released)?;
        Ok(receiver)
    }

    /// `out[i] = input[(i + amount) % len]`
    pub fn rotate_left(&mut self, input: &DeviceBuffer, amount: usize) -> DispatchResult<DeviceBuffer> {
        self.rotate(OpKind::RotateLeft, input, amount)
    }

    /// `out[i] = input[(i - amount) mod len]`
    pub fn rotate_right(&mut self, input: &DeviceBuffer, amount: usize) -> DispatchResult<DeviceBuffer> {
        self.rotate(OpKind::RotateRight, input, amount)
    }

    pub fn rotate_left_in_place<'r>(&mut self, receiver: &'r DeviceBuffer, amount: usize) -> DispatchResult<&'r DeviceBuffer> {
        self.rotate_in_place(OpKind::RotateLeft, receiver, amount)
    }

    pub fn rotate_right_in_place<'r>(&mut self, receiver: &'r DeviceBuffer, amount: usize) -> DispatchResult<&'r DeviceBuffer> {
        self.rotate_in_place(OpKind::RotateRight, receiver, amount)
    }

    /// Duplicate a buffer into fresh storage
    pub fn copy(&mut self, input: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        self.elementwise(OpKind::Copy, &[input.into()])
    }

    // Shifts

    pub fn shift_left(&mut self, input: &DeviceBuffer, amount: u32) -> DispatchResult<DeviceBuffer> {
        let (signature, aux) = shift_signature(OpKind::ShiftLeft, input, amount)?;
        self.with_result(&signature, &[input.into()], input.len(), &aux, input.len())
    }

    /// Arithmetic right shift
    pub fn shift_right(&mut self, input: &DeviceBuffer, amount: u32) -> DispatchResult<DeviceBuffer> {
        let (signature, aux) = shift_signature(OpKind::ShiftRight, input, amount)?;
        self.with_result(&signature, &[input.into()], input.len(), &aux, input.len())
    }

    pub fn shift_left_in_place<'r>(&mut self, receiver: &'r DeviceBuffer, amount: u32) -> DispatchResult<&'r DeviceBuffer> {
        let (signature, aux) = shift_signature(OpKind::ShiftLeft, receiver, amount)?;
        self.execute(&signature, &[receiver.into()], receiver, &aux, receiver.len())?;
        Ok(receiver)
    }

    pub fn shift_right_in_place<'r>(&mut self, receiver: &'r DeviceBuffer, amount: u32) -> DispatchResult<&'r DeviceBuffer> {
        let (signature, aux) = shift_signature(OpKind::ShiftRight, receiver, amount)?;
        self.execute(&signature, &[receiver.into()], receiver, &aux, receiver.len())?;
        Ok(receiver)
    }

    // Conversions

    pub fn to_int(&mut self, input: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        self.elementwise(OpKind::ToInt, &[input.into()])
    }

    pub fn to_float(&mut self, input: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
        self.elementwise(OpKind::ToFloat, &[input.into()])
    }

    // Repetition

    fn repeat(&mut self, op: OpKind, input: &DeviceBuffer, repetition: usize) -> DispatchResult<DeviceBuffer> {
        if repetition == 0 {
            return Err(DispatchError::invalid_argument("repetition count must be at least 1"));
        }
        let operands = [Operand::Buffer(input)];
        let signature = signature_of(op, &operands)?;
        let length = input
            .len()
            .checked_mul(repetition)
            .ok_or_else(|| DispatchError::invalid_argument("repeated length overflows"))?;
        let aux = [
            int_arg(repetition, "repetition")?,
            int_arg(input.len(), "buffer length")?,
        ];
        // One work item per input element, each writing `repetition` outputs
        self.with_result(&signature, &operands, length, &aux, input.len())
    }

    /// `[a, b]` repeated twice is `[a, b, a, b]`
    pub fn repeat_full(&mut self, input: &DeviceBuffer, repetition: usize) -> DispatchResult<DeviceBuffer> {
        self.repeat(OpKind::RepeatFull, input, repetition)
    }

    /// `[a, b]` repeated twice is `[a, a, b, b]`
    pub fn repeat_each(&mut self, input: &DeviceBuffer, repetition: usize) -> DispatchResult<DeviceBuffer> {
        self.repeat(OpKind::RepeatEach, input, repetition)
    }

    // Reduction

    /// Sum of all elements, in the buffer's element type. Integral sums wrap.
    ///
    /// One work item per group of `group_size` elements writes a partial sum
    /// into a scratch buffer; the partials are added on the host.
    pub fn sum_reduce(&mut self, input: &DeviceBuffer) -> DispatchResult<Scalar> {
        let operands = [Operand::Buffer(input)];
        let signature = signature_of(OpKind::SumReduce, &operands)?;
        let group_size = self
            .config
            .reduction_group_size
            .unwrap_or_else(|| self.backend.max_work_group_size(self.device))
            .max(1);
        let groups = input.len().div_ceil(group_size);
        let aux = [
            int_arg(input.len(), "buffer length")?,
            int_arg(group_size, "group size")?,
        ];
        log::debug!("sum_reduce over {} elements in {} group(s) of {}", input.len(), groups, group_size);

        let partials = self.with_result(&signature, &operands, groups, &aux, groups)?;
        let outcome = match signature.result {
            ElementType::Integral => partials
                .to_vec::<_, i32>(self)
                .map(|values| Scalar::Int(values.into_iter().fold(0, i32::wrapping_add))),
            ElementType::Floating => partials
                .to_vec::<_, f32>(self)
                .map(|values| Scalar::Float(values.into_iter().sum())),
        };
        let released = partials.release(self);
        let sum = outcome?;
        released?;
        Ok(sum)
    }

    // Composite kernels

    /// Compile, bind and launch a finalized composite kernel. Its program is
    /// released afterwards; composite kernels are not cached.
    pub fn run(&mut self, kernel: &KernelSource<'_>) -> DispatchResult<()> {
        let program = self.backend.compile_program(self.context, &kernel.source)?;
        log::debug!("Compiled composite kernel `{}` as {}", kernel.name, program);

        let outcome = self.backend.create_kernel(program, &kernel.name).and_then(|handle| {
            let args: Vec<KernelArg> = kernel.arguments.iter().map(KernelArgument::kernel_arg).collect();
            let launched = self.launch(handle, &args, kernel.thread_count);
            let released = self.backend.release_kernel(handle);
            launched.and(released)
        });
        let released = self.backend.release_program(program);
        outcome.and(released)
    }
}

macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident, $in_place:ident => $op:expr;)*) => {
        impl<B: Backend> Accelerator<B> {
            $(
                $(#[$doc])*
                pub fn $name<'x, 'y>(
                    &mut self,
                    lhs: impl Into<Operand<'x>>,
                    rhs: impl Into<Operand<'y>>,
                ) -> DispatchResult<DeviceBuffer> {
                    self.elementwise($op, &[lhs.into(), rhs.into()])
                }

                pub fn $in_place<'r, 'y>(
                    &mut self,
                    receiver: &'r DeviceBuffer,
                    rhs: impl Into<Operand<'y>>,
                ) -> DispatchResult<&'r DeviceBuffer> {
                    self.elementwise_in_place($op, receiver, &[rhs.into()])
                }
            )*
        }
    };
}

binary_ops! {
    add, add_in_place => OpKind::Add;
    sub, sub_in_place => OpKind::Sub;
    mul, mul_in_place => OpKind::Mul;
    /// Integral division truncates; dividing by an integral zero faults the launch
    div, div_in_place => OpKind::Div;
    min, min_in_place => OpKind::Min;
    max, max_in_place => OpKind::Max;
    /// 1 where `lhs > rhs`, else 0, in the promoted type
    compare_gt, compare_gt_in_place => OpKind::CompareGt;
    bit_and, bit_and_in_place => OpKind::BitAnd;
    bit_or, bit_or_in_place => OpKind::BitOr;
}

macro_rules! unary_ops {
    ($($name:ident, $in_place:ident => $op:expr;)*) => {
        impl<B: Backend> Accelerator<B> {
            $(
                pub fn $name(&mut self, input: &DeviceBuffer) -> DispatchResult<DeviceBuffer> {
                    self.elementwise($op, &[input.into()])
                }

                pub fn $in_place<'r>(&mut self, receiver: &'r DeviceBuffer) -> DispatchResult<&'r DeviceBuffer> {
                    self.elementwise_in_place($op, receiver, &[])
                }
            )*
        }
    };
}

unary_ops! {
    sqrt, sqrt_in_place => OpKind::Sqrt;
    log, log_in_place => OpKind::Log;
    exp, exp_in_place => OpKind::Exp;
    sin, sin_in_place => OpKind::Sin;
    cos, cos_in_place => OpKind::Cos;
    abs, abs_in_place => OpKind::Abs;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostSlice, HostSliceMut};
    use crate::builder::KernelBuilder;
    use crate::config::EmulatorConfig;
    use crate::emulator::EmulatorBackend;
    use pretty_assertions::assert_eq;

    fn accelerator() -> Accelerator<EmulatorBackend> {
        Accelerator::new(EmulatorBackend::default()).unwrap()
    }

    fn floats(acc: &mut Accelerator<EmulatorBackend>, buffer: &DeviceBuffer) -> Vec<f32> {
        acc.to_vec(buffer).unwrap()
    }

    fn ints(acc: &mut Accelerator<EmulatorBackend>, buffer: &DeviceBuffer) -> Vec<i32> {
        acc.to_vec(buffer).unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= 1e-4 * e.abs().max(1.0), "{:?} != {:?}", actual, expected);
        }
    }

    /// Emulator whose buffer releases always fail
    struct ReleaseFails(EmulatorBackend);

    impl Backend for ReleaseFails {
        fn name(&self) -> &str {
            "release-fails"
        }
        fn create_device(&mut self) -> DispatchResult<DeviceHandle> {
            self.0.create_device()
        }
        fn create_context(&mut self, device: DeviceHandle) -> DispatchResult<ContextHandle> {
            self.0.create_context(device)
        }
        fn create_command_queue(&mut self, context: ContextHandle, device: DeviceHandle) -> DispatchResult<QueueHandle> {
            self.0.create_command_queue(context, device)
        }
        fn release_queue(&mut self, queue: QueueHandle) -> DispatchResult<()> {
            self.0.release_queue(queue)
        }
        fn release_context(&mut self, context: ContextHandle) -> DispatchResult<()> {
            self.0.release_context(context)
        }
        fn release_device(&mut self, device: DeviceHandle) -> DispatchResult<()> {
            self.0.release_device(device)
        }
        fn compile_program(&mut self, context: ContextHandle, source: &str) -> DispatchResult<ProgramHandle> {
            self.0.compile_program(context, source)
        }
        fn release_program(&mut self, program: ProgramHandle) -> DispatchResult<()> {
            self.0.release_program(program)
        }
        fn create_kernel(&mut self, program: ProgramHandle, function_name: &str) -> DispatchResult<KernelHandle> {
            self.0.create_kernel(program, function_name)
        }
        fn release_kernel(&mut self, kernel: KernelHandle) -> DispatchResult<()> {
            self.0.release_kernel(kernel)
        }
        fn set_kernel_argument(&mut self, kernel: KernelHandle, position: usize, value: KernelArg) -> DispatchResult<()> {
            self.0.set_kernel_argument(kernel, position, value)
        }
        fn enqueue(&mut self, kernel: KernelHandle, queue: QueueHandle, global_size: usize) -> DispatchResult<()> {
            self.0.enqueue(kernel, queue, global_size)
        }
        fn allocate_buffer(
            &mut self,
            context: ContextHandle,
            length: usize,
            element_type: ElementType,
        ) -> DispatchResult<crate::backend::BufferHandle> {
            self.0.allocate_buffer(context, length, element_type)
        }
        fn upload_buffer(
            &mut self,
            queue: QueueHandle,
            buffer: crate::backend::BufferHandle,
            data: HostSlice<'_>,
        ) -> DispatchResult<()> {
            self.0.upload_buffer(queue, buffer, data)
        }
        fn download_buffer(
            &mut self,
            queue: QueueHandle,
            buffer: crate::backend::BufferHandle,
            out: HostSliceMut<'_>,
        ) -> DispatchResult<()> {
            self.0.download_buffer(queue, buffer, out)
        }
        fn release_buffer(&mut self, buffer: crate::backend::BufferHandle) -> DispatchResult<()> {
            Err(DispatchError::invalid_handle(format!("cannot release {}", buffer)))
        }
        fn max_work_group_size(&self, device: DeviceHandle) -> usize {
            self.0.max_work_group_size(device)
        }
    }

    #[test]
    fn test_add_two_buffers() {
        let mut acc = accelerator();
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let a = acc.upload(&data).unwrap();
        let b = acc.upload(&data).unwrap();

        let sum = acc.add(&a, &b).unwrap();
        assert_eq!(floats(&mut acc, &sum), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0]);
        assert!(!sum.is_same(&a));
        assert!(!sum.is_same(&b));
    }

    #[test]
    fn test_scalar_type_decides_result() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 3, 4]).unwrap();

        let by_int = acc.mul(&a, 5).unwrap();
        assert_eq!(by_int.element_type(), ElementType::Integral);
        assert_eq!(ints(&mut acc, &by_int), vec![5, 10, 15, 20]);

        let by_float = acc.mul(&a, 5.0f32).unwrap();
        assert_eq!(by_float.element_type(), ElementType::Floating);
        assert_eq!(floats(&mut acc, &by_float), vec![5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn test_sum_reduce() {
        let mut acc = accelerator();
        let data: Vec<i32> = (1..=1000).collect();
        let buffer = acc.upload(&data).unwrap();
        assert_eq!(acc.sum_reduce(&buffer).unwrap(), Scalar::Int(500500));
    }

    #[test]
    fn test_sum_reduce_group_override_and_floats() {
        let config = AcceleratorConfig::new(Some(3), true);
        let mut acc = Accelerator::with_config(EmulatorBackend::default(), config).unwrap();
        let buffer = acc.upload(&[0.5f32, 1.5, 2.0, 4.0, 8.0]).unwrap();
        assert_eq!(acc.sum_reduce(&buffer).unwrap(), Scalar::Float(16.0));
        // Scratch buffer is released again
        assert_eq!(acc.backend().live_buffers(), 1);
    }

    #[test]
    fn test_in_place_type_violation_issues_no_backend_call() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 3]).unwrap();
        let b = acc.upload(&[0.5f32, 0.5, 0.5]).unwrap();

        let before = acc.backend().stats();
        let err = acc.add_in_place(&a, &b).unwrap_err();
        match err {
            DispatchError::TypeInvariantViolation { receiver, promoted, .. } => {
                assert_eq!(receiver, ElementType::Integral);
                assert_eq!(promoted, ElementType::Floating);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(acc.backend().stats(), before);
        assert_eq!(ints(&mut acc, &a), vec![1, 2, 3]);
    }

    #[test]
    fn test_rotate() {
        let mut acc = accelerator();
        let buffer = acc.upload(&[0, 1, 2, 3, 4]).unwrap();

        let left = acc.rotate_left(&buffer, 2).unwrap();
        assert_eq!(ints(&mut acc, &left), vec![2, 3, 4, 0, 1]);
        let right = acc.rotate_right(&buffer, 2).unwrap();
        assert_eq!(ints(&mut acc, &right), vec![3, 4, 0, 1, 2]);

        // Amounts wrap around the length
        let wrapped = acc.rotate_left(&buffer, 7).unwrap();
        assert_eq!(ints(&mut acc, &wrapped), vec![2, 3, 4, 0, 1]);
    }

    #[test]
    fn test_rotate_in_place() {
        let mut acc = accelerator();
        let buffer = acc.upload(&[0.0f32, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let result = acc.rotate_right_in_place(&buffer, 1).unwrap();
        assert!(result.is_same(&buffer));
        assert_eq!(floats(&mut acc, &buffer), vec![4.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(acc.backend().live_buffers(), 1);
    }

    #[test]
    fn test_in_place_returns_receiver() {
        let mut acc = accelerator();
        let a = acc.upload(&[1.0f32, 2.0, 3.0]).unwrap();
        let b = acc.upload(&[1, 1, 1]).unwrap();

        let result = acc.add_in_place(&a, &b).unwrap();
        assert!(result.is_same(&a));
        assert_eq!(floats(&mut acc, &a), vec![2.0, 3.0, 4.0]);

        acc.mul_in_place(&a, 2).unwrap();
        acc.sqrt_in_place(&a).unwrap();
        assert_eq!(floats(&mut acc, &a), vec![2.0, 6.0f32.sqrt(), 8.0f32.sqrt()]);
    }

    #[test]
    fn test_results_never_alias_inputs() {
        let mut acc = accelerator();
        let a = acc.upload(&[4, 5, 6]).unwrap();
        let b = acc.upload(&[1, 2, 3]).unwrap();
        for result in [
            acc.sub(&a, &b).unwrap(),
            acc.div(&a, &b).unwrap(),
            acc.max(&a, &b).unwrap(),
            acc.bit_or(&a, &b).unwrap(),
        ] {
            assert!(!result.is_same(&a));
            assert!(!result.is_same(&b));
        }
    }

    #[test]
    fn test_scalar_buffer_layout() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 4]).unwrap();
        let result = acc.sub(10, &a).unwrap();
        assert_eq!(ints(&mut acc, &result), vec![9, 8, 6]);

        let halves = acc.div(1.0f32, &a).unwrap();
        assert_eq!(floats(&mut acc, &halves), vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_length_mismatch() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 3]).unwrap();
        let b = acc.upload(&[1, 2]).unwrap();
        assert!(matches!(
            acc.add(&a, &b),
            Err(DispatchError::LengthMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_bitwise_on_floats_is_unsupported() {
        let mut acc = accelerator();
        let a = acc.upload(&[1.0f32, 2.0]).unwrap();
        let before = acc.backend().stats();
        let err = acc.bit_and(&a, 1).unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedOperationType { .. }));
        assert!(err.to_string().contains("buffer FLOATING"));
        assert_eq!(acc.backend().stats(), before);
    }

    #[test]
    fn test_kernels_compile_once() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2]).unwrap();
        let b = acc.upload(&[3, 4]).unwrap();

        acc.add(&a, &b).unwrap();
        acc.add(&a, &b).unwrap();
        acc.add(&a, 7).unwrap();
        assert_eq!(acc.backend().stats().compiles, 1);
        assert_eq!(acc.compiled_program_count(), 1);
        assert_eq!(acc.cached_kernel_count(), 2);

        acc.mul(&a, &b).unwrap();
        assert_eq!(acc.backend().stats().compiles, 2);
    }

    #[test]
    fn test_compare_blend_and_fma() {
        let mut acc = accelerator();
        let x = acc.upload(&[1.0f32, 5.0, 3.0]).unwrap();
        let y = acc.upload(&[4.0f32, 2.0, 3.0]).unwrap();

        let mask = acc.compare_gt(&x, &y).unwrap();
        assert_eq!(floats(&mut acc, &mask), vec![0.0, 1.0, 0.0]);

        let picked = acc.blend(&x, &y, &mask).unwrap();
        assert_eq!(floats(&mut acc, &picked), vec![1.0, 2.0, 3.0]);

        let fused = acc.fma(&x, &y, &mask).unwrap();
        assert_eq!(floats(&mut acc, &fused), vec![4.0, 11.0, 9.0]);
    }

    #[test]
    fn test_integral_division_by_zero_faults() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2]).unwrap();
        let err = acc.div(&a, 0).unwrap_err();
        assert!(matches!(err, DispatchError::KernelLaunch { .. }));
        // The failed result is not leaked
        assert_eq!(acc.backend().live_buffers(), 1);
    }

    #[test]
    fn test_shifts() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, -8, 3]).unwrap();
        let left = acc.shift_left(&a, 2).unwrap();
        assert_eq!(ints(&mut acc, &left), vec![4, -32, 12]);
        let right = acc.shift_right(&a, 1).unwrap();
        assert_eq!(ints(&mut acc, &right), vec![0, -4, 1]);

        assert!(matches!(acc.shift_left(&a, 32), Err(DispatchError::InvalidArgument { .. })));
        let f = acc.upload(&[1.0f32]).unwrap();
        assert!(matches!(
            acc.shift_left(&f, 1),
            Err(DispatchError::UnsupportedOperationType { .. })
        ));
    }

    #[test]
    fn test_repeat() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 3]).unwrap();
        let full = acc.repeat_full(&a, 2).unwrap();
        assert_eq!(ints(&mut acc, &full), vec![1, 2, 3, 1, 2, 3]);
        let each = acc.repeat_each(&a, 2).unwrap();
        assert_eq!(ints(&mut acc, &each), vec![1, 1, 2, 2, 3, 3]);
        assert!(acc.repeat_full(&a, 0).is_err());
    }

    #[test]
    fn test_multiply_repeat_and_mul_range() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 3, 4, 5]).unwrap();
        let factors = acc.upload(&[10, 100]).unwrap();

        let repeated = acc.multiply_repeat(&a, &factors).unwrap();
        assert_eq!(ints(&mut acc, &repeated), vec![10, 200, 30, 400, 50]);

        let window = acc.mul_range(&a, 1, &a, 3, 2).unwrap();
        assert_eq!(ints(&mut acc, &window), vec![8, 15]);
        assert!(matches!(
            acc.mul_range(&a, 4, &a, 0, 2),
            Err(DispatchError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_unary_and_conversions() {
        let mut acc = accelerator();
        let a = acc.upload(&[-4, 9]).unwrap();

        let magnitude = acc.abs(&a).unwrap();
        assert_eq!(magnitude.element_type(), ElementType::Integral);
        assert_eq!(ints(&mut acc, &magnitude), vec![4, 9]);

        let root = acc.sqrt(&magnitude).unwrap();
        assert_eq!(root.element_type(), ElementType::Floating);
        assert_eq!(floats(&mut acc, &root), vec![2.0, 3.0]);

        let back = acc.to_int(&root).unwrap();
        assert_eq!(ints(&mut acc, &back), vec![2, 3]);

        assert!(matches!(
            acc.sqrt_in_place(&a),
            Err(DispatchError::TypeInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_host_constructors() {
        let mut acc = accelerator();
        let ramp = acc.iota(4).unwrap();
        assert_eq!(floats(&mut acc, &ramp), vec![0.0, 1.0, 2.0, 3.0]);
        let sevens = acc.broadcast(7, 3).unwrap();
        assert_eq!(ints(&mut acc, &sevens), vec![7, 7, 7]);
        let zeros = acc.zeros(2, ElementType::Integral).unwrap();
        assert_eq!(ints(&mut acc, &zeros), vec![0, 0]);
    }

    #[test]
    fn test_run_composite_kernel() {
        let mut acc = accelerator();
        let a = acc.upload(&[1.0f32, 4.0, 9.0]).unwrap();
        let b = acc.upload(&[1, 2, 3]).unwrap();
        let out = acc.zeros(3, ElementType::Floating).unwrap();

        let mut builder = KernelBuilder::new();
        let y = builder.var(&a).sqrt().mul(&b).add(0.5f32);
        builder.assign(&out, y);
        let kernel = builder.finalize(out.len()).unwrap();

        let compiles = acc.backend().stats().compiles;
        acc.run(&kernel).unwrap();
        assert_eq!(floats(&mut acc, &out), vec![1.5, 4.5, 9.5]);

        // Composite programs are not cached
        acc.run(&kernel).unwrap();
        assert_eq!(acc.backend().stats().compiles, compiles + 2);
        assert_eq!(acc.compiled_program_count(), 0);
    }

    #[test]
    fn test_close_releases_everything() {
        let mut acc = Accelerator::new(EmulatorBackend::new(EmulatorConfig::default())).unwrap();
        let a = acc.upload(&[1, 2]).unwrap();
        let sum = acc.add(&a, &a).unwrap();
        acc.release(sum).unwrap();
        acc.release(a).unwrap();

        let backend = acc.close().unwrap();
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_failed_release_keeps_launch_error() {
        let mut acc = Accelerator::new(ReleaseFails(EmulatorBackend::default())).unwrap();
        let a = acc.upload(&[1, 2]).unwrap();

        let err = acc.div(&a, 0).unwrap_err();
        assert!(matches!(err, DispatchError::KernelLaunch { .. }));
        // The result could not be released and stays visible as live
        assert_eq!(acc.backend().0.live_buffers(), 2);
    }

    #[test]
    fn test_composite_rejects_foreign_statement() {
        let mut acc = accelerator();
        let a = acc.upload(&[1.0f32, 2.0, 3.0]).unwrap();
        let b = acc.upload(&[100.0f32, 200.0, 300.0]).unwrap();
        let out = acc.zeros(3, ElementType::Floating).unwrap();

        let mut builder = KernelBuilder::new();
        let other = KernelBuilder::new();
        let from_other = other.var(&b);
        let sum = builder.var(&a).add(from_other);
        builder.assign(&out, sum);
        assert!(matches!(builder.finalize(3), Err(DispatchError::InvalidArgument { .. })));

        let sum = builder.var(&a).add(&b);
        builder.assign(&out, sum);
        let kernel = builder.finalize(3).unwrap();
        acc.run(&kernel).unwrap();
        assert_eq!(floats(&mut acc, &out), vec![101.0, 202.0, 303.0]);
    }

    #[test]
    fn test_composite_loop_accumulates() {
        let mut acc = accelerator();
        let a = acc.upload(&[1.0f32, 2.0, 3.0]).unwrap();
        let out = acc.zeros(3, ElementType::Floating).unwrap();

        // out[i] = sum over t of a[t] * i
        let mut builder = KernelBuilder::new();
        builder.for_range(0, 3, 1, |t| {
            let x = builder.element_at(&a, t);
            builder.add_assign(&out, x.mul(builder.index()));
        });
        let kernel = builder.finalize(out.len()).unwrap();
        acc.run(&kernel).unwrap();
        assert_eq!(floats(&mut acc, &out), vec![0.0, 6.0, 12.0]);
    }

    #[test]
    fn test_math_functions() {
        let mut acc = accelerator();
        let counts = acc.upload(&[1, 2]).unwrap();

        let logs = acc.log(&counts).unwrap();
        assert_eq!(logs.element_type(), ElementType::Floating);
        assert_close(&floats(&mut acc, &logs), &[0.0, 2.0f32.ln()]);

        let powers = acc.exp(&counts).unwrap();
        assert_eq!(powers.element_type(), ElementType::Floating);
        assert_close(&floats(&mut acc, &powers), &[1.0f32.exp(), 2.0f32.exp()]);

        let angles = acc.upload(&[0.0f32, std::f32::consts::FRAC_PI_2]).unwrap();
        let sines = acc.sin(&angles).unwrap();
        assert_close(&floats(&mut acc, &sines), &[0.0, 1.0]);
        let cosines = acc.cos(&angles).unwrap();
        assert_close(&floats(&mut acc, &cosines), &[1.0, 0.0]);

        let degrees = acc.upload(&[0, 3]).unwrap();
        let from_ints = acc.cos(&degrees).unwrap();
        assert_close(&floats(&mut acc, &from_ints), &[1.0, 3.0f32.cos()]);
    }

    #[test]
    fn test_min_max_bitwise_and_to_float() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 5]).unwrap();
        let f = acc.upload(&[0.5f32, 7.5]).unwrap();

        let low = acc.min(&a, 2.5f32).unwrap();
        assert_eq!(low.element_type(), ElementType::Floating);
        assert_eq!(floats(&mut acc, &low), vec![1.0, 2.5]);
        let high = acc.max(&a, &f).unwrap();
        assert_eq!(floats(&mut acc, &high), vec![1.0, 7.5]);
        let int_low = acc.min(&a, 3).unwrap();
        assert_eq!(ints(&mut acc, &int_low), vec![1, 3]);

        let bits = acc.upload(&[12, 10]).unwrap();
        let masked = acc.bit_and(&bits, 6).unwrap();
        assert_eq!(ints(&mut acc, &masked), vec![4, 2]);
        let ones = acc.upload(&[1, 1]).unwrap();
        let merged = acc.bit_or(&bits, &ones).unwrap();
        assert_eq!(ints(&mut acc, &merged), vec![13, 11]);

        let signed = acc.upload(&[-3, 7]).unwrap();
        let widened = acc.to_float(&signed).unwrap();
        assert_eq!(widened.element_type(), ElementType::Floating);
        assert_eq!(floats(&mut acc, &widened), vec![-3.0, 7.0]);
    }

    #[test]
    fn test_integral_in_place_twins() {
        let mut acc = accelerator();
        let r = acc.upload(&[10, 20, 30]).unwrap();
        let threes = acc.upload(&[3, 3, 3]).unwrap();

        acc.sub_in_place(&r, 1).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![9, 19, 29]);
        acc.div_in_place(&r, &threes).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![3, 6, 9]);
        acc.min_in_place(&r, 7).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![3, 6, 7]);
        acc.max_in_place(&r, 4).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![4, 6, 7]);
        acc.compare_gt_in_place(&r, 5).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![0, 1, 1]);
        acc.bit_or_in_place(&r, 2).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![2, 3, 3]);
        acc.bit_and_in_place(&r, 1).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![0, 1, 1]);
        acc.shift_left_in_place(&r, 3).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![0, 8, 8]);
        acc.shift_right_in_place(&r, 2).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![0, 2, 2]);
        acc.sub_in_place(&r, 5).unwrap();
        acc.abs_in_place(&r).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![5, 3, 3]);

        let factors = acc.upload(&[1, 2]).unwrap();
        let same = acc.multiply_repeat_in_place(&r, &factors).unwrap();
        assert!(same.is_same(&r));
        assert_eq!(ints(&mut acc, &r), vec![5, 6, 3]);
        acc.rotate_left_in_place(&r, 1).unwrap();
        assert_eq!(ints(&mut acc, &r), vec![6, 3, 5]);

        // No temporaries left behind
        assert_eq!(acc.backend().live_buffers(), 3);
    }

    #[test]
    fn test_floating_in_place_twins() {
        let mut acc = accelerator();
        let f = acc.upload(&[1.0f32, 2.0, 4.0]).unwrap();
        let y = acc.upload(&[3.0f32, 3.0, 3.0]).unwrap();
        let mask = acc.upload(&[0.0f32, 1.0, 0.5]).unwrap();

        acc.blend_in_place(&f, &y, &mask).unwrap();
        assert_eq!(floats(&mut acc, &f), vec![1.0, 3.0, 3.5]);

        let twos = acc.broadcast(2.0f32, 3).unwrap();
        let ones = acc.broadcast(1, 3).unwrap();
        acc.fma_in_place(&f, &twos, &ones).unwrap();
        assert_eq!(floats(&mut acc, &f), vec![3.0, 7.0, 8.0]);

        let z = acc.zeros(2, ElementType::Floating).unwrap();
        acc.exp_in_place(&z).unwrap();
        assert_eq!(floats(&mut acc, &z), vec![1.0, 1.0]);
        acc.log_in_place(&z).unwrap();
        assert_eq!(floats(&mut acc, &z), vec![0.0, 0.0]);
        acc.cos_in_place(&z).unwrap();
        assert_eq!(floats(&mut acc, &z), vec![1.0, 1.0]);
        acc.sub_in_place(&z, 1).unwrap();
        acc.sin_in_place(&z).unwrap();
        assert_eq!(floats(&mut acc, &z), vec![0.0, 0.0]);

        let n = acc.upload(&[-1.5f32, 2.0]).unwrap();
        acc.abs_in_place(&n).unwrap();
        assert_eq!(floats(&mut acc, &n), vec![1.5, 2.0]);
    }

    #[test]
    fn test_mul_vector() {
        let mut acc = accelerator();
        let matrix = acc.upload(&[1, 2, 3, 4]).unwrap();
        let vector = acc.upload(&[1.0f32, 0.5]).unwrap();

        let product = acc.mul_vector(&matrix, &vector).unwrap();
        assert_eq!(product.element_type(), ElementType::Floating);
        assert_eq!(floats(&mut acc, &product), vec![2.0, 5.0]);

        let ragged = acc.upload(&[1, 2, 3]).unwrap();
        assert!(matches!(
            acc.mul_vector(&ragged, &vector),
            Err(DispatchError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_each_area_fma() {
        let mut acc = accelerator();
        let grid: Vec<i32> = (1..=9).collect();
        let input = acc.upload(&grid).unwrap();
        let diagonal = acc.upload(&[1.0f32, 0.0, 0.0, 1.0]).unwrap();

        let windows = acc.each_area_fma(&input, &diagonal, 3, 2, 4).unwrap();
        assert_eq!(windows.element_type(), ElementType::Floating);
        assert_eq!(floats(&mut acc, &windows), vec![6.0, 8.0, 12.0, 14.0]);

        let first = acc.each_area_fma(&input, &diagonal, 3, 2, 1).unwrap();
        assert_eq!(floats(&mut acc, &first), vec![6.0]);

        assert!(matches!(
            acc.each_area_fma(&input, &diagonal, 3, 2, 5),
            Err(DispatchError::InvalidArgument { .. })
        ));
        assert!(matches!(
            acc.each_area_fma(&input, &diagonal, 3, 3, 1),
            Err(DispatchError::LengthMismatch { expected: 9, got: 4 })
        ));
        assert!(matches!(
            acc.each_area_fma(&input, &diagonal, 4, 2, 1),
            Err(DispatchError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_matrix_fma_accumulates_product() {
        let mut acc = accelerator();
        let a = acc.upload(&[1, 2, 3, 4]).unwrap();
        let factor = acc.upload(&[5, 6, 7, 8]).unwrap();
        let summand = acc.zeros(4, ElementType::Integral).unwrap();

        let result = acc.matrix_fma(&a, &factor, &summand, 2, 2, 0).unwrap();
        assert!(result.is_same(&summand));
        assert_eq!(ints(&mut acc, &summand), vec![5, 6, 15, 18]);

        acc.matrix_fma(&a, &factor, &summand, 2, 2, 1).unwrap();
        assert_eq!(ints(&mut acc, &summand), vec![19, 22, 43, 50]);

        assert!(matches!(
            acc.matrix_fma(&a, &factor, &summand, 2, 2, 2),
            Err(DispatchError::InvalidArgument { .. })
        ));
        let halves = acc.upload(&[0.5f32, 0.5, 0.5, 0.5]).unwrap();
        assert!(matches!(
            acc.matrix_fma(&halves, &factor, &summand, 2, 2, 0),
            Err(DispatchError::TypeInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_ranged_marshalling_and_fill() {
        let mut acc = accelerator();
        let data = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        let window = acc.upload_range(&data, 2, 3).unwrap();
        assert_eq!(floats(&mut acc, &window), vec![2.0, 3.0, 4.0]);

        acc.fill(&window, &[9.0f32, 8.0, 7.0]).unwrap();
        let mut tail = [0.0f32; 2];
        acc.download_range(&window, 1, &mut tail).unwrap();
        assert_eq!(tail, [8.0, 7.0]);
    }
}
