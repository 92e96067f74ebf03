//! The precompiled kernel library
//!
//! One template per operation renders every type variant, so coverage is the
//! cross-product computed by [`KernelSignature::enumerate`] rather than a
//! hand-maintained list. Each operation's variants form one program.
//!
//! Parameter order for every kernel: operands `x0..xN` (buffers as global
//! pointers, scalars by value), the result buffer `out`, then the
//! operation's auxiliary integers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write;

use crate::error::{DispatchError, DispatchResult};
use crate::naming::{describe, KernelSignature, OpKind, OperandKind, OperandType};
use crate::parser;
use crate::types::ElementType;

/// Operand `k` read at `index`, converted to `target` when its type differs
fn read(operand: &OperandType, k: usize, index: &str, target: ElementType) -> String {
    let access = match operand.kind {
        OperandKind::Buffer => format!("x{}[{}]", k, index),
        OperandKind::Scalar => format!("x{}", k),
    };
    if operand.ty == target {
        access
    } else {
        format!("({}){}", target.c_type(), access)
    }
}

fn header(signature: &KernelSignature) -> String {
    let mut params = Vec::new();
    for (k, operand) in signature.operands.iter().enumerate() {
        params.push(match operand.kind {
            OperandKind::Buffer => format!("__global const {}* x{}", operand.ty.c_type(), k),
            OperandKind::Scalar => format!("const {} x{}", operand.ty.c_type(), k),
        });
    }
    params.push(format!("__global {}* out", signature.result.c_type()));
    for aux in signature.op.aux_params() {
        params.push(format!("const int {}", aux));
    }

    format!("__kernel void {}({})", signature.name(), params.join(", "))
}

fn body(signature: &KernelSignature) -> String {
    let result = signature.result;
    let r = result.c_type();
    let ops = &signature.operands;
    let at = |k: usize, index: &str| read(&ops[k], k, index, result);
    let a = |k: usize| at(k, "i");
    let float = |k: usize| read(&ops[k], k, "i", ElementType::Floating);

    match signature.op {
        OpKind::Add => format!("out[i] = {} + {};", a(0), a(1)),
        OpKind::Sub => format!("out[i] = {} - {};", a(0), a(1)),
        OpKind::Mul => format!("out[i] = {} * {};", a(0), a(1)),
        OpKind::Div => format!("out[i] = {} / {};", a(0), a(1)),
        OpKind::Min => format!("out[i] = min({}, {});", a(0), a(1)),
        OpKind::Max => format!("out[i] = max({}, {});", a(0), a(1)),
        OpKind::CompareGt => format!("out[i] = {} > {} ? 1 : 0;", a(0), a(1)),
        OpKind::BitAnd => format!("out[i] = {} & {};", a(0), a(1)),
        OpKind::BitOr => format!("out[i] = {} | {};", a(0), a(1)),
        OpKind::Blend => format!(
            "out[i] = {x} + ({y} - {x}) * {m};",
            x = a(0),
            y = a(1),
            m = a(2)
        ),
        OpKind::Fma => format!("out[i] = {} * {} + {};", a(0), a(1), a(2)),
        OpKind::MultiplyRepeat => {
            format!("out[i] = {} * {};", a(0), at(1, "i % factor_length"))
        }
        OpKind::MulRange => format!(
            "out[i] = {} * {};",
            at(0, "offset_a + i"),
            at(1, "offset_b + i")
        ),
        OpKind::MulVector => format!(
            "{r} acc = 0;\n    \
             for (int j = 0; j < length; j += 1) {{\n        \
             acc += {row} * {column};\n    \
             }}\n    \
             out[i] = acc;",
            row = at(0, "i * length + j"),
            column = at(1, "j")
        ),
        OpKind::EachAreaFma => format!(
            "int out_width = width - kernel_width + 1;\n    \
             int row = i / out_width;\n    \
             int col = i % out_width;\n    \
             {r} acc = 0;\n    \
             for (int u = 0; u < kernel_width; u += 1) {{\n        \
             for (int v = 0; v < kernel_width; v += 1) {{\n            \
             acc += {area} * {weight};\n        \
             }}\n    \
             }}\n    \
             out[i] = acc;",
            area = at(0, "(row + u) * width + col + v"),
            weight = at(1, "u * kernel_width + v")
        ),
        OpKind::MatrixFma => format!(
            "int lhs = i / n * m + k;\n    \
             int rhs = i % n + k * n;\n    \
             out[i] = {} * {} + {};",
            at(0, "lhs"),
            at(1, "rhs"),
            a(2)
        ),
        OpKind::RotateLeft => "out[i] = x0[(i + amount) % length];".to_string(),
        OpKind::RotateRight => "out[i] = x0[(i + length - amount) % length];".to_string(),
        OpKind::ShiftLeft => "out[i] = x0[i] << amount;".to_string(),
        OpKind::ShiftRight => "out[i] = x0[i] >> amount;".to_string(),
        OpKind::Sqrt => format!("out[i] = sqrt({});", float(0)),
        OpKind::Log => format!("out[i] = log({});", float(0)),
        OpKind::Exp => format!("out[i] = exp({});", float(0)),
        OpKind::Sin => format!("out[i] = sin({});", float(0)),
        OpKind::Cos => format!("out[i] = cos({});", float(0)),
        OpKind::Abs => match result {
            ElementType::Integral => "out[i] = abs(x0[i]);".to_string(),
            ElementType::Floating => "out[i] = fabs(x0[i]);".to_string(),
        },
        OpKind::ToInt | OpKind::ToFloat | OpKind::Copy => format!("out[i] = {};", a(0)),
        OpKind::RepeatFull => "for (int r = 0; r < repetition; r += 1) {\n        \
             out[r * length + i] = x0[i];\n    }"
            .to_string(),
        OpKind::RepeatEach => "for (int r = 0; r < repetition; r += 1) {\n        \
             out[i * repetition + r] = x0[i];\n    }"
            .to_string(),
        OpKind::SumReduce => format!(
            "int start = i * group_size;\n    \
             int end = min(start + group_size, length);\n    \
             {r} acc = 0;\n    \
             for (int j = start; j < end; j += 1) {{\n        \
             acc += x0[j];\n    \
             }}\n    \
             out[i] = acc;"
        ),
    }
}

/// Complete source of one kernel function
pub fn kernel_source(signature: &KernelSignature) -> String {
    format!(
        "{} {{\n    int i = get_global_id(0);\n    {}\n}}\n",
        header(signature),
        body(signature)
    )
}

/// The set of single-operation kernels available to the dispatcher
#[derive(Debug, Clone)]
pub struct KernelLibrary {
    signatures: Vec<KernelSignature>,
    by_name: HashMap<String, usize>,
}

impl KernelLibrary {
    /// Library covering every signature of every operation
    pub fn standard() -> Self {
        Self::from_signatures(KernelSignature::enumerate())
    }

    pub fn from_signatures(signatures: Vec<KernelSignature>) -> Self {
        let by_name = signatures
            .iter()
            .enumerate()
            .map(|(index, signature)| (signature.name(), index))
            .collect();
        Self { signatures, by_name }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signatures(&self) -> &[KernelSignature] {
        &self.signatures
    }

    pub fn get(&self, name: &str) -> Option<&KernelSignature> {
        self.by_name.get(name).map(|&index| &self.signatures[index])
    }

    /// Whether a kernel with this signature is registered
    pub fn contains(&self, signature: &KernelSignature) -> bool {
        self.get(&signature.name()) == Some(signature)
    }

    /// The program holding every registered variant of `op`
    pub fn program_source(&self, op: OpKind) -> String {
        let mut source = String::new();
        for signature in self.signatures.iter().filter(|s| s.op == op) {
            let _ = writeln!(source, "{}", kernel_source(signature));
        }
        source
    }

    /// Check the library against the full cross-product: every combination
    /// must be present exactly once, each name must parse back to its
    /// signature, and every program must parse with the expected parameter
    /// counts. Returns the number of kernels.
    pub fn validate(&self) -> DispatchResult<usize> {
        let mut seen = HashSet::new();
        for signature in &self.signatures {
            let name = signature.name();
            if !seen.insert(name.clone()) {
                return Err(DispatchError::compile(format!("kernel `{}` registered twice", name)));
            }
            if KernelSignature::parse(&name).as_ref() != Some(signature) {
                return Err(DispatchError::compile(format!(
                    "kernel name `{}` does not identify its signature",
                    name
                )));
            }
        }

        for required in KernelSignature::enumerate() {
            if !self.contains(&required) {
                return Err(DispatchError::unsupported(
                    required.op.mnemonic(),
                    describe(&required.operands),
                ));
            }
        }

        let mut per_op: BTreeMap<OpKind, usize> = BTreeMap::new();
        for signature in &self.signatures {
            *per_op.entry(signature.op).or_default() += 1;
        }

        for (&op, &count) in &per_op {
            let module = parser::parse(&self.program_source(op))?;
            if module.functions.len() != count {
                return Err(DispatchError::compile(format!(
                    "program for `{}` defines {} kernels, expected {}",
                    op,
                    module.functions.len(),
                    count
                )));
            }
            for signature in self.signatures.iter().filter(|s| s.op == op) {
                let expected = signature.operands.len() + 1 + op.aux_params().len();
                let found = module.function(&signature.name()).map(|f| f.params.len());
                if found != Some(expected) {
                    return Err(DispatchError::compile(format!(
                        "kernel `{}` has {:?} parameters, expected {}",
                        signature.name(),
                        found,
                        expected
                    )));
                }
            }
        }

        log::debug!("Kernel library validated: {} kernels over {} operations", self.len(), per_op.len());
        Ok(self.len())
    }
}

impl Default for KernelLibrary {
    fn default() -> Self {
        Self::standard()
    }
}
