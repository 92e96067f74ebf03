//! Kernel expression builder
//!
//! Assembles the body of one composite kernel from chained statements:
//!
//! ```text
//! let b = KernelBuilder::new();
//! let x = b.var(&input);
//! let y = x.mul(2.5f32).add(&bias).sqrt();
//! b.assign(&output, y);
//! let kernel = b.finalize(input.len())?;
//! ```
//!
//! Every statement declares exactly one new local `lN`. Every referenced
//! buffer gets one argument name `aN` per episode, keyed by buffer identity;
//! every scalar literal is a fresh argument. `finalize` emits the parameters
//! in first-reference order and resets the episode, so the next kernel starts
//! again from `a0`/`l0`.
//!
//! The builder and the finalized [`KernelSource`] borrow every buffer they
//! reference, so none of them can be released while the kernel can still be
//! launched.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{self, Write};
use std::marker::PhantomData;

use crate::backend::{BufferHandle, KernelArg};
use crate::buffer::DeviceBuffer;
use crate::error::{DispatchError, DispatchResult};
use crate::types::{ElementType, Scalar};

/// Function name of every composite kernel
pub const COMPOSITE_KERNEL_NAME: &str = "composite";

/// What one kernel argument is bound to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgumentValue {
    Buffer {
        handle: BufferHandle,
        element_type: ElementType,
    },
    Scalar(Scalar),
}

/// One generated kernel parameter
#[derive(Debug, Clone, PartialEq)]
pub struct KernelArgument {
    pub name: String,
    pub value: ArgumentValue,
}

impl KernelArgument {
    pub fn element_type(&self) -> ElementType {
        match self.value {
            ArgumentValue::Buffer { element_type, .. } => element_type,
            ArgumentValue::Scalar(scalar) => scalar.element_type(),
        }
    }

    /// Parameter declaration in the kernel header
    fn declaration(&self) -> String {
        match self.value {
            ArgumentValue::Buffer { element_type, .. } => {
                format!("__global {}* {}", element_type.c_type(), self.name)
            }
            ArgumentValue::Scalar(scalar) => {
                format!("const {} {}", scalar.element_type().c_type(), self.name)
            }
        }
    }

    /// The value to bind at launch
    pub fn kernel_arg(&self) -> KernelArg {
        match self.value {
            ArgumentValue::Buffer { handle, .. } => KernelArg::Buffer(handle),
            ArgumentValue::Scalar(Scalar::Int(v)) => KernelArg::Int(v),
            ArgumentValue::Scalar(Scalar::Float(v)) => KernelArg::Float(v),
        }
    }
}

/// A finalized composite kernel, ready to compile and launch. Borrows the
/// buffers its arguments refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSource<'buf> {
    pub name: String,
    pub source: String,
    /// In parameter order
    pub arguments: Vec<KernelArgument>,
    pub thread_count: usize,
    buffers: PhantomData<&'buf DeviceBuffer>,
}

/// State of one build episode
#[derive(Debug, Default)]
struct Episode {
    body: String,
    arguments: Vec<KernelArgument>,
    buffer_slots: HashMap<BufferHandle, usize>,
    next_local: usize,
    next_loop: usize,
    depth: usize,
    /// First statement used here that another builder created
    foreign: Option<String>,
}

impl Episode {
    fn emit(&mut self, line: fmt::Arguments<'_>) {
        for _ in 0..=self.depth {
            self.body.push_str("    ");
        }
        let _ = self.body.write_fmt(line);
        self.body.push('\n');
    }

    fn push_argument(&mut self, value: ArgumentValue) -> usize {
        let index = self.arguments.len();
        self.arguments.push(KernelArgument {
            name: format!("a{}", index),
            value,
        });
        index
    }

    /// Argument index for a buffer, reusing its name if already referenced.
    /// Handles are unique among live buffers, and every buffer stays
    /// borrowed for the life of the builder.
    fn buffer_argument(&mut self, buffer: &DeviceBuffer) -> usize {
        if let Some(&index) = self.buffer_slots.get(&buffer.handle()) {
            return index;
        }
        let index = self.push_argument(ArgumentValue::Buffer {
            handle: buffer.handle(),
            element_type: buffer.element_type(),
        });
        self.buffer_slots.insert(buffer.handle(), index);
        index
    }

    fn next_local(&mut self) -> usize {
        let local = self.next_local;
        self.next_local += 1;
        local
    }
}

/// Where a statement's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Local(usize),
    GlobalIndex,
    LoopIndex(usize),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Local(n) => write!(f, "l{}", n),
            Slot::GlobalIndex => write!(f, "i"),
            Slot::LoopIndex(n) => write!(f, "t{}", n),
        }
    }
}

/// A typed value inside the kernel being built
#[derive(Debug, Clone, Copy)]
pub struct Statement<'b, 'buf> {
    builder: &'b KernelBuilder<'buf>,
    slot: Slot,
    ty: ElementType,
}

/// Anything that can appear as an operand
#[derive(Debug, Clone, Copy)]
pub enum Term<'b, 'buf> {
    Value(Statement<'b, 'buf>),
    Scalar(Scalar),
    /// The buffer's element at the work-item index
    Element(&'buf DeviceBuffer),
}

impl<'b, 'buf> From<Statement<'b, 'buf>> for Term<'b, 'buf> {
    fn from(statement: Statement<'b, 'buf>) -> Self {
        Term::Value(statement)
    }
}

impl<'b, 'buf> From<Scalar> for Term<'b, 'buf> {
    fn from(scalar: Scalar) -> Self {
        Term::Scalar(scalar)
    }
}

impl<'b, 'buf> From<i32> for Term<'b, 'buf> {
    fn from(value: i32) -> Self {
        Term::Scalar(Scalar::Int(value))
    }
}

impl<'b, 'buf> From<f32> for Term<'b, 'buf> {
    fn from(value: f32) -> Self {
        Term::Scalar(Scalar::Float(value))
    }
}

impl<'b, 'buf> From<&'buf DeviceBuffer> for Term<'b, 'buf> {
    fn from(buffer: &'buf DeviceBuffer) -> Self {
        Term::Element(buffer)
    }
}

/// `(T)expr` when `from` differs from `to`
fn converted(expr: &str, from: ElementType, to: ElementType) -> String {
    if from == to {
        expr.to_string()
    } else {
        format!("({}){}", to.c_type(), expr)
    }
}

/// Builder for one composite kernel.
///
/// `'buf` is invariant: every buffer passed in must stay alive, and
/// unreleased, until the builder and its finalized kernels are gone.
///
/// ```compile_fail
/// use accel_kernels::{Accelerator, EmulatorBackend, KernelBuilder};
///
/// let mut acc = Accelerator::new(EmulatorBackend::default()).unwrap();
/// let a = acc.upload(&[1.0f32, 4.0]).unwrap();
/// let mut builder = KernelBuilder::new();
/// let root = builder.var(&a).sqrt();
/// builder.assign(&a, root);
/// acc.release(a).unwrap();
/// let kernel = builder.finalize(2).unwrap();
/// acc.run(&kernel).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct KernelBuilder<'buf> {
    episode: RefCell<Episode>,
    buffers: PhantomData<Cell<&'buf DeviceBuffer>>,
}

impl<'buf> KernelBuilder<'buf> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source name of a statement's value. A statement created by another
    /// builder is recorded, and `finalize` rejects the episode.
    fn slot_of(&self, statement: Statement<'_, 'buf>) -> String {
        let name = statement.slot.to_string();
        if !std::ptr::eq(statement.builder, self) {
            log::warn!("Statement `{}` used outside the builder that created it", name);
            self.episode
                .borrow_mut()
                .foreign
                .get_or_insert_with(|| name.clone());
        }
        name
    }

    /// Source text and type of an operand, registering arguments as needed
    fn operand(&self, term: Term<'_, 'buf>) -> (String, ElementType) {
        match term {
            Term::Value(statement) => (self.slot_of(statement), statement.ty),
            Term::Scalar(scalar) => {
                let index = self
                    .episode
                    .borrow_mut()
                    .push_argument(ArgumentValue::Scalar(scalar));
                (format!("a{}", index), scalar.element_type())
            }
            Term::Element(buffer) => {
                let index = self.episode.borrow_mut().buffer_argument(buffer);
                (format!("a{}[i]", index), buffer.element_type())
            }
        }
    }

    /// Declare a new local `T lN = expr;`
    fn declare(&self, ty: ElementType, expr: &str) -> Statement<'_, 'buf> {
        let mut episode = self.episode.borrow_mut();
        let local = episode.next_local();
        episode.emit(format_args!("{} l{} = {};", ty.c_type(), local, expr));
        Statement {
            builder: self,
            slot: Slot::Local(local),
            ty,
        }
    }

    /// Bind a buffer element, a scalar or another statement to a new local
    pub fn var<'b>(&'b self, source: impl Into<Term<'b, 'buf>>) -> Statement<'b, 'buf> {
        let (expr, ty) = self.operand(source.into());
        self.declare(ty, &expr)
    }

    /// The work-item index `i`
    pub fn index(&self) -> Statement<'_, 'buf> {
        Statement {
            builder: self,
            slot: Slot::GlobalIndex,
            ty: ElementType::Integral,
        }
    }

    /// Integral index text for `buffer[...]`
    fn index_of(&self, index: Statement<'_, 'buf>) -> String {
        converted(&self.slot_of(index), index.ty, ElementType::Integral)
    }

    /// Read `buffer[index]` into a new local
    pub fn element_at<'b>(&'b self, buffer: &'buf DeviceBuffer, index: Statement<'_, 'buf>) -> Statement<'b, 'buf> {
        let at = self.index_of(index);
        let slot = self.episode.borrow_mut().buffer_argument(buffer);
        self.declare(buffer.element_type(), &format!("a{}[{}]", slot, at))
    }

    fn store(&self, buffer: &'buf DeviceBuffer, index: &str, op: &str, value: Statement<'_, 'buf>) {
        let value = converted(&self.slot_of(value), value.ty, buffer.element_type());
        let mut episode = self.episode.borrow_mut();
        let slot = episode.buffer_argument(buffer);
        episode.emit(format_args!("a{}[{}] {} {};", slot, index, op, value));
    }

    /// `buffer[i] = value;`
    pub fn assign(&self, buffer: &'buf DeviceBuffer, value: Statement<'_, 'buf>) {
        self.store(buffer, "i", "=", value);
    }

    /// `buffer[i] += value;`
    pub fn add_assign(&self, buffer: &'buf DeviceBuffer, value: Statement<'_, 'buf>) {
        self.store(buffer, "i", "+=", value);
    }

    /// `buffer[index] = value;`
    pub fn assign_at(&self, buffer: &'buf DeviceBuffer, index: Statement<'_, 'buf>, value: Statement<'_, 'buf>) {
        let at = self.index_of(index);
        self.store(buffer, &at, "=", value);
    }

    /// Emit `for (int tN = offset; tN < limit; tN += step) { body }`.
    /// Locals declared in `body` still get kernel-wide unique names.
    pub fn for_range<'b, F>(&'b self, offset: i32, limit: i32, step: i32, body: F)
    where
        F: FnOnce(Statement<'b, 'buf>),
    {
        let index = {
            let mut episode = self.episode.borrow_mut();
            let n = episode.next_loop;
            episode.next_loop += 1;
            episode.emit(format_args!(
                "for (int t{n} = {offset}; t{n} < {limit}; t{n} += {step}) {{"
            ));
            episode.depth += 1;
            n
        };

        body(Statement {
            builder: self,
            slot: Slot::LoopIndex(index),
            ty: ElementType::Integral,
        });

        let mut episode = self.episode.borrow_mut();
        episode.depth = episode.depth.saturating_sub(1);
        episode.emit(format_args!("}}"));
    }

    /// Number of locals declared so far in this episode
    pub fn local_count(&self) -> usize {
        self.episode.borrow().next_local
    }

    /// Close the episode: wrap the body in a header and prologue, return
    /// the source with its ordered arguments, and reset all counters.
    ///
    /// Fails with `InvalidArgument` if the episode used a statement from
    /// another builder; the episode is discarded either way.
    pub fn finalize(&mut self, thread_count: usize) -> DispatchResult<KernelSource<'buf>> {
        let episode = std::mem::take(self.episode.get_mut());
        if let Some(name) = episode.foreign {
            return Err(DispatchError::invalid_argument(format!(
                "statement `{}` belongs to another kernel builder",
                name
            )));
        }

        let params: Vec<String> = episode.arguments.iter().map(KernelArgument::declaration).collect();
        let source = format!(
            "__kernel void {}({}) {{\n    int i = get_global_id(0);\n{}}}\n",
            COMPOSITE_KERNEL_NAME,
            params.join(", "),
            episode.body
        );

        log::debug!(
            "Finalized composite kernel: {} argument(s), {} local(s), {} thread(s)",
            episode.arguments.len(),
            episode.next_local,
            thread_count
        );

        Ok(KernelSource {
            name: COMPOSITE_KERNEL_NAME.to_string(),
            source,
            arguments: episode.arguments,
            thread_count,
            buffers: PhantomData,
        })
    }
}

impl<'b, 'buf> Statement<'b, 'buf> {
    pub fn element_type(&self) -> ElementType {
        self.ty
    }

    /// Generated name of the local (or index) holding this value
    pub fn name(&self) -> String {
        self.slot.to_string()
    }

    fn binary(self, op: &str, rhs: Term<'_, 'buf>) -> Statement<'b, 'buf> {
        let (rhs, rhs_ty) = self.builder.operand(rhs);
        let ty = self.ty.promote(rhs_ty);
        self.builder
            .declare(ty, &format!("{} {} {}", self.slot, op, rhs))
    }

    fn call2(self, function: &str, rhs: Term<'_, 'buf>) -> Statement<'b, 'buf> {
        let (rhs, rhs_ty) = self.builder.operand(rhs);
        let ty = self.ty.promote(rhs_ty);
        let lhs = converted(&self.slot.to_string(), self.ty, ty);
        let rhs = converted(&rhs, rhs_ty, ty);
        self.builder.declare(ty, &format!("{}({}, {})", function, lhs, rhs))
    }

    fn float_call(self, function: &str) -> Statement<'b, 'buf> {
        let arg = converted(&self.slot.to_string(), self.ty, ElementType::Floating);
        self.builder
            .declare(ElementType::Floating, &format!("{}({})", function, arg))
    }

    pub fn add<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        self.binary("+", rhs.into())
    }

    pub fn sub<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        self.binary("-", rhs.into())
    }

    pub fn mul<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        self.binary("*", rhs.into())
    }

    pub fn div<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        self.binary("/", rhs.into())
    }

    pub fn min<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        self.call2("min", rhs.into())
    }

    pub fn max<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        self.call2("max", rhs.into())
    }

    /// 1 where `self > rhs`, else 0, in the promoted type
    pub fn compare_gt<'t>(self, rhs: impl Into<Term<'t, 'buf>>) -> Statement<'b, 'buf>
    where
        'buf: 't,
    {
        let (rhs, rhs_ty) = self.builder.operand(rhs.into());
        let ty = self.ty.promote(rhs_ty);
        self.builder
            .declare(ty, &format!("{} > {} ? 1 : 0", self.slot, rhs))
    }

    /// `self + (other - self) * mask`
    pub fn blend<'t, 'u>(
        self,
        other: impl Into<Term<'t, 'buf>>,
        mask: impl Into<Term<'u, 'buf>>,
    ) -> Statement<'b, 'buf>
    where
        'buf: 't + 'u,
    {
        let (other, other_ty) = self.builder.operand(other.into());
        let (mask, mask_ty) = self.builder.operand(mask.into());
        let ty = self.ty.promote(other_ty).promote(mask_ty);
        self.builder.declare(
            ty,
            &format!("{x} + ({y} - {x}) * {m}", x = self.slot, y = other, m = mask),
        )
    }

    pub fn sqrt(self) -> Statement<'b, 'buf> {
        self.float_call("sqrt")
    }

    pub fn log(self) -> Statement<'b, 'buf> {
        self.float_call("log")
    }

    pub fn exp(self) -> Statement<'b, 'buf> {
        self.float_call("exp")
    }

    pub fn sin(self) -> Statement<'b, 'buf> {
        self.float_call("sin")
    }

    pub fn cos(self) -> Statement<'b, 'buf> {
        self.float_call("cos")
    }

    /// Absolute value, keeping the operand's type
    pub fn abs(self) -> Statement<'b, 'buf> {
        let function = match self.ty {
            ElementType::Integral => "abs",
            ElementType::Floating => "fabs",
        };
        self.builder
            .declare(self.ty, &format!("{}({})", function, self.slot))
    }

    pub fn cast(self, ty: ElementType) -> Statement<'b, 'buf> {
        self.builder
            .declare(ty, &format!("({}){}", ty.c_type(), self.slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn buffer(handle: u64, length: usize, ty: ElementType) -> DeviceBuffer {
        DeviceBuffer::from_raw(BufferHandle(handle), length, ty)
    }

    fn assert_compiles(kernel: &KernelSource) {
        let module = parse(&kernel.source).unwrap();
        Analyzer::new().analyze(&module).unwrap();
    }

    #[test]
    fn test_chained_expression() {
        let a = buffer(1, 8, ElementType::Integral);
        let b = buffer(2, 8, ElementType::Floating);
        let out = buffer(3, 8, ElementType::Floating);

        let mut builder = KernelBuilder::new();
        let x = builder.var(&a);
        let y = x.mul(&b).add(2);
        builder.assign(&out, y);
        let kernel = builder.finalize(8).unwrap();

        assert_eq!(
            kernel.source,
            "__kernel void composite(__global int* a0, __global float* a1, const int a2, __global float* a3) {\n\
             \x20   int i = get_global_id(0);\n\
             \x20   int l0 = a0[i];\n\
             \x20   float l1 = l0 * a1[i];\n\
             \x20   float l2 = l1 + a2;\n\
             \x20   a3[i] = l2;\n\
             }\n"
        );
        assert_eq!(kernel.thread_count, 8);
        assert_eq!(
            kernel.arguments.iter().map(|a| a.kernel_arg()).collect::<Vec<_>>(),
            vec![
                KernelArg::Buffer(BufferHandle(1)),
                KernelArg::Buffer(BufferHandle(2)),
                KernelArg::Int(2),
                KernelArg::Buffer(BufferHandle(3)),
            ]
        );
        assert_compiles(&kernel);
    }

    #[test]
    fn test_same_buffer_reuses_argument_name() {
        let a = buffer(1, 4, ElementType::Floating);
        let builder = KernelBuilder::new();
        let x = builder.var(&a);
        let y = x.add(&a);
        builder.assign(&a, y);

        let episode = builder.episode.borrow();
        assert_eq!(episode.arguments.len(), 1);
        assert!(episode.body.contains("float l1 = l0 + a0[i];"));
        assert!(episode.body.contains("a0[i] = l1;"));
    }

    #[test]
    fn test_distinct_buffers_get_distinct_names() {
        // Equal length, type and (conceptually) contents, different identity
        let a = buffer(1, 4, ElementType::Floating);
        let b = buffer(2, 4, ElementType::Floating);
        let builder = KernelBuilder::new();
        builder.var(&a).add(&b);

        let episode = builder.episode.borrow();
        let names: Vec<_> = episode.arguments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a0", "a1"]);
    }

    #[test]
    fn test_each_scalar_is_a_new_argument() {
        let builder = KernelBuilder::new();
        builder.var(3).add(3);

        let episode = builder.episode.borrow();
        assert_eq!(episode.arguments.len(), 2);
    }

    #[test]
    fn test_chaining_is_not_destructive() {
        let a = buffer(1, 4, ElementType::Integral);
        let builder = KernelBuilder::new();
        let x = builder.var(&a);
        let first = x.add(1);
        let second = x.add(1);

        assert_eq!(x.name(), "l0");
        assert_eq!(first.name(), "l1");
        assert_eq!(second.name(), "l2");
        assert_eq!(builder.local_count(), 3);
    }

    #[test]
    fn test_finalize_resets_counters() {
        let a = buffer(1, 4, ElementType::Floating);
        let out = buffer(2, 4, ElementType::Floating);
        let mut builder = KernelBuilder::new();

        fn build<'buf>(
            builder: &mut KernelBuilder<'buf>,
            a: &'buf DeviceBuffer,
            out: &'buf DeviceBuffer,
        ) -> KernelSource<'buf> {
            let y = builder.var(a).sqrt();
            builder.assign(out, y);
            builder.finalize(4).unwrap()
        }

        let first = build(&mut builder, &a, &out);
        let second = build(&mut builder, &a, &out);
        assert_eq!(first, second);
        assert_eq!(builder.local_count(), 0);
    }

    #[test]
    fn test_unary_promotes_to_floating() {
        let a = buffer(1, 4, ElementType::Integral);
        let builder = KernelBuilder::new();
        let root = builder.var(&a).sqrt();
        let magnitude = builder.var(&a).abs();

        assert_eq!(root.element_type(), ElementType::Floating);
        assert_eq!(magnitude.element_type(), ElementType::Integral);
        let episode = builder.episode.borrow();
        assert!(episode.body.contains("float l1 = sqrt((float)l0);"));
        assert!(episode.body.contains("int l3 = abs(l2);"));
    }

    #[test]
    fn test_for_range_nests_and_compiles() {
        let input = buffer(1, 4, ElementType::Floating);
        let out = buffer(2, 4, ElementType::Floating);
        let mut builder = KernelBuilder::new();

        builder.for_range(0, 4, 1, |t| {
            let x = builder.element_at(&input, t);
            builder.for_range(0, 2, 1, |u| {
                let w = x.mul(u);
                builder.add_assign(&out, w);
            });
        });
        let kernel = builder.finalize(4).unwrap();

        assert!(kernel.source.contains("    for (int t0 = 0; t0 < 4; t0 += 1) {\n"));
        assert!(kernel.source.contains("        float l0 = a0[t0];\n"));
        assert!(kernel.source.contains("        for (int t1 = 0; t1 < 2; t1 += 1) {\n"));
        assert!(kernel.source.contains("            a1[i] += l1;\n"));
        assert_compiles(&kernel);
    }

    #[test]
    fn test_compare_blend_and_index() {
        let a = buffer(1, 4, ElementType::Floating);
        let b = buffer(2, 4, ElementType::Floating);
        let out = buffer(3, 4, ElementType::Floating);
        let mut builder = KernelBuilder::new();

        let x = builder.var(&a);
        let mask = x.compare_gt(&b);
        let mixed = x.blend(&b, mask);
        let shifted = mixed.add(builder.index());
        builder.assign_at(&out, builder.index(), shifted.max(0));
        let kernel = builder.finalize(4).unwrap();

        assert!(kernel.source.contains("float l1 = l0 > a1[i] ? 1 : 0;"));
        assert!(kernel.source.contains("float l2 = l0 + (a1[i] - l0) * l1;"));
        assert!(kernel.source.contains("float l4 = max(l3, (float)a2);"));
        assert_compiles(&kernel);
    }

    #[test]
    fn test_statement_from_another_builder_is_rejected() {
        let a = buffer(1, 3, ElementType::Floating);
        let b = buffer(2, 3, ElementType::Floating);
        let out = buffer(3, 3, ElementType::Floating);
        let mut builder = KernelBuilder::new();
        let other = KernelBuilder::new();

        // Both name their first local `l0`
        let from_other = other.var(&b);
        let sum = builder.var(&a).add(from_other);
        builder.assign(&out, sum);

        let err = builder.finalize(3).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument { .. }));
        assert!(err.to_string().contains("`l0`"));

        // The rejected episode is discarded
        assert_eq!(builder.local_count(), 0);
        let y = builder.var(&a);
        builder.assign(&out, y);
        assert!(builder.finalize(3).is_ok());
    }

    #[test]
    fn test_foreign_index_and_store_are_rejected() {
        let a = buffer(1, 3, ElementType::Integral);
        let out = buffer(2, 3, ElementType::Integral);
        let mut builder = KernelBuilder::new();
        let other = KernelBuilder::new();

        let position = other.index();
        let x = builder.element_at(&a, position);
        builder.assign(&out, x);
        assert!(builder.finalize(3).is_err());

        let stray = other.var(5);
        builder.assign(&out, stray);
        assert!(builder.finalize(3).is_err());
    }
}
