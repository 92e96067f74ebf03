//! Kernel signatures and the naming scheme
//!
//! A signature is (operation, operand kinds and types, result type). Its name
//! is `<op>_<operand tags>_<result tag>` where each operand tag is `B`/`S`
//! (buffer/scalar) followed by `I`/`F`, e.g. `add_BF_SI_F`. Mnemonics are
//! lowercase and tags uppercase, so every name parses back to exactly one
//! signature.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::types::ElementType;

/// How an operand reaches the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Buffer,
    Scalar,
}

use OperandKind::{Buffer as B, Scalar as S};

const BINARY: &[&[OperandKind]] = &[&[B, B], &[B, S], &[S, B]];
const BUFFER_PAIR: &[&[OperandKind]] = &[&[B, B]];
const TERNARY: &[&[OperandKind]] = &[&[B, B, B]];
const UNARY: &[&[OperandKind]] = &[&[B]];

/// One operand slot of a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperandType {
    pub kind: OperandKind,
    pub ty: ElementType,
}

impl OperandType {
    pub fn buffer(ty: ElementType) -> Self {
        Self { kind: OperandKind::Buffer, ty }
    }

    pub fn scalar(ty: ElementType) -> Self {
        Self { kind: OperandKind::Scalar, ty }
    }

    pub fn tag(&self) -> String {
        let kind = match self.kind {
            OperandKind::Buffer => 'B',
            OperandKind::Scalar => 'S',
        };
        format!("{}{}", kind, self.ty.tag())
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let mut chars = tag.chars();
        let kind = match chars.next()? {
            'B' => OperandKind::Buffer,
            'S' => OperandKind::Scalar,
            _ => return None,
        };
        let ty = ElementType::from_tag(chars.next()?)?;
        chars.next().is_none().then_some(Self { kind, ty })
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperandKind::Buffer => write!(f, "buffer {}", self.ty),
            OperandKind::Scalar => write!(f, "scalar {}", self.ty),
        }
    }
}

/// Comma-separated operand description for error messages
pub fn describe(operands: &[OperandType]) -> String {
    operands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// How an operation derives its result type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultRule {
    /// Promotion across all operands
    Promote,
    /// Type of the first operand
    Preserve,
    /// Always FLOATING; operands are promoted first
    Floating,
    /// Always INTEGRAL
    Integral,
    /// INTEGRAL, and only defined for INTEGRAL operands
    IntegralOnly,
}

/// Every single-operation kernel the library provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    CompareGt,
    BitAnd,
    BitOr,
    Blend,
    Fma,
    MultiplyRepeat,
    MulRange,
    MulVector,
    EachAreaFma,
    MatrixFma,
    RotateLeft,
    RotateRight,
    ShiftLeft,
    ShiftRight,
    Sqrt,
    Log,
    Exp,
    Sin,
    Cos,
    Abs,
    ToInt,
    ToFloat,
    Copy,
    RepeatFull,
    RepeatEach,
    SumReduce,
}

impl OpKind {
    pub const ALL: [OpKind; 32] = [
        OpKind::Add,
        OpKind::Sub,
        OpKind::Mul,
        OpKind::Div,
        OpKind::Min,
        OpKind::Max,
        OpKind::CompareGt,
        OpKind::BitAnd,
        OpKind::BitOr,
        OpKind::Blend,
        OpKind::Fma,
        OpKind::MultiplyRepeat,
        OpKind::MulRange,
        OpKind::MulVector,
        OpKind::EachAreaFma,
        OpKind::MatrixFma,
        OpKind::RotateLeft,
        OpKind::RotateRight,
        OpKind::ShiftLeft,
        OpKind::ShiftRight,
        OpKind::Sqrt,
        OpKind::Log,
        OpKind::Exp,
        OpKind::Sin,
        OpKind::Cos,
        OpKind::Abs,
        OpKind::ToInt,
        OpKind::ToFloat,
        OpKind::Copy,
        OpKind::RepeatFull,
        OpKind::RepeatEach,
        OpKind::SumReduce,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Min => "min",
            OpKind::Max => "max",
            OpKind::CompareGt => "compare_gt",
            OpKind::BitAnd => "bit_and",
            OpKind::BitOr => "bit_or",
            OpKind::Blend => "blend",
            OpKind::Fma => "fma",
            OpKind::MultiplyRepeat => "multiply_repeat",
            OpKind::MulRange => "mul_range",
            OpKind::MulVector => "mul_vector",
            OpKind::EachAreaFma => "each_area_fma",
            OpKind::MatrixFma => "matrix_fma",
            OpKind::RotateLeft => "rotate_left",
            OpKind::RotateRight => "rotate_right",
            OpKind::ShiftLeft => "shift_left",
            OpKind::ShiftRight => "shift_right",
            OpKind::Sqrt => "sqrt",
            OpKind::Log => "log",
            OpKind::Exp => "exp",
            OpKind::Sin => "sin",
            OpKind::Cos => "cos",
            OpKind::Abs => "abs",
            OpKind::ToInt => "to_int",
            OpKind::ToFloat => "to_float",
            OpKind::Copy => "copy",
            OpKind::RepeatFull => "repeat_full",
            OpKind::RepeatEach => "repeat_each",
            OpKind::SumReduce => "sum_reduce",
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<OpKind> {
        OpKind::ALL.into_iter().find(|op| op.mnemonic() == mnemonic)
    }

    /// Operand layouts a kernel exists for
    pub fn layouts(self) -> &'static [&'static [OperandKind]] {
        match self {
            OpKind::Add
            | OpKind::Sub
            | OpKind::Mul
            | OpKind::Div
            | OpKind::Min
            | OpKind::Max
            | OpKind::CompareGt
            | OpKind::BitAnd
            | OpKind::BitOr => BINARY,
            OpKind::MultiplyRepeat | OpKind::MulRange | OpKind::MulVector | OpKind::EachAreaFma => {
                BUFFER_PAIR
            }
            OpKind::Blend | OpKind::Fma | OpKind::MatrixFma => TERNARY,
            _ => UNARY,
        }
    }

    /// Integer parameters appended after the operands and the result
    pub fn aux_params(self) -> &'static [&'static str] {
        match self {
            OpKind::MultiplyRepeat => &["factor_length"],
            OpKind::MulRange => &["offset_a", "offset_b"],
            OpKind::MulVector => &["length"],
            OpKind::EachAreaFma => &["width", "kernel_width"],
            OpKind::MatrixFma => &["m", "n", "k"],
            OpKind::RotateLeft | OpKind::RotateRight => &["amount", "length"],
            OpKind::ShiftLeft | OpKind::ShiftRight => &["amount"],
            OpKind::RepeatFull | OpKind::RepeatEach => &["repetition", "length"],
            OpKind::SumReduce => &["length", "group_size"],
            _ => &[],
        }
    }

    fn rule(self) -> ResultRule {
        match self {
            OpKind::BitAnd | OpKind::BitOr | OpKind::ShiftLeft | OpKind::ShiftRight => {
                ResultRule::IntegralOnly
            }
            OpKind::Sqrt | OpKind::Log | OpKind::Exp | OpKind::Sin | OpKind::Cos | OpKind::ToFloat => {
                ResultRule::Floating
            }
            OpKind::ToInt => ResultRule::Integral,
            OpKind::Abs
            | OpKind::Copy
            | OpKind::RotateLeft
            | OpKind::RotateRight
            | OpKind::RepeatFull
            | OpKind::RepeatEach
            | OpKind::SumReduce => ResultRule::Preserve,
            _ => ResultRule::Promote,
        }
    }

    /// Result type for these operand types, or `None` if no kernel exists
    pub fn result_type(self, operand_types: &[ElementType]) -> Option<ElementType> {
        let first = *operand_types.first()?;
        match self.rule() {
            ResultRule::Promote => ElementType::promote_all(operand_types.iter().copied()),
            ResultRule::Preserve => Some(first),
            ResultRule::Floating => Some(ElementType::Floating),
            ResultRule::Integral => Some(ElementType::Integral),
            ResultRule::IntegralOnly => operand_types
                .iter()
                .all(|&ty| ty == ElementType::Integral)
                .then_some(ElementType::Integral),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Deterministic, injective kernel name
pub fn name_for(op: OpKind, operands: &[OperandType], result: ElementType) -> String {
    let mut name = String::from(op.mnemonic());
    for operand in operands {
        name.push('_');
        name.push_str(&operand.tag());
    }
    name.push('_');
    name.push(result.tag());
    name
}

/// Lookup key of one concrete single-operation kernel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelSignature {
    pub op: OpKind,
    pub operands: Vec<OperandType>,
    pub result: ElementType,
}

impl KernelSignature {
    /// Resolve the signature for `op` over `operands`, or report that no
    /// kernel exists for that combination
    pub fn resolve(op: OpKind, operands: &[OperandType]) -> DispatchResult<Self> {
        let kinds: Vec<OperandKind> = operands.iter().map(|o| o.kind).collect();
        let types: Vec<ElementType> = operands.iter().map(|o| o.ty).collect();

        let supported_layout = op.layouts().iter().any(|layout| *layout == kinds.as_slice());
        match op.result_type(&types) {
            Some(result) if supported_layout => Ok(Self {
                op,
                operands: operands.to_vec(),
                result,
            }),
            _ => Err(DispatchError::unsupported(op.mnemonic(), describe(operands))),
        }
    }

    pub fn name(&self) -> String {
        name_for(self.op, &self.operands, self.result)
    }

    /// Recover the signature from a kernel name
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts: Vec<&str> = name.split('_').collect();

        let mut result_tag = parts.pop()?.chars();
        let result = ElementType::from_tag(result_tag.next()?)?;
        if result_tag.next().is_some() {
            return None;
        }

        let mut operands = Vec::new();
        while let Some(operand) = parts.last().and_then(|tag| OperandType::from_tag(tag)) {
            operands.push(operand);
            parts.pop();
        }
        operands.reverse();

        let op = OpKind::from_mnemonic(&parts.join("_"))?;
        let signature = Self::resolve(op, &operands).ok()?;
        (signature.result == result).then_some(signature)
    }

    /// Every signature the library must provide: the full cross-product of
    /// element types over every operand layout of every operation
    pub fn enumerate() -> Vec<KernelSignature> {
        let mut signatures = Vec::new();

        for op in OpKind::ALL {
            for layout in op.layouts() {
                for mask in 0..(1u32 << layout.len()) {
                    let operands: Vec<OperandType> = layout
                        .iter()
                        .enumerate()
                        .map(|(bit, &kind)| OperandType {
                            kind,
                            ty: if mask & (1 << bit) != 0 {
                                ElementType::Floating
                            } else {
                                ElementType::Integral
                            },
                        })
                        .collect();

                    if let Ok(signature) = Self::resolve(op, &operands) {
                        signatures.push(signature);
                    }
                }
            }
        }

        signatures
    }
}

impl fmt::Display for KernelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use crate::types::ElementType::{Floating as F, Integral as I};

    #[test]
    fn test_name_format() {
        let sig = KernelSignature::resolve(
            OpKind::Mul,
            &[OperandType::buffer(I), OperandType::scalar(F)],
        )
        .unwrap();
        assert_eq!(sig.result, F);
        assert_eq!(sig.name(), "mul_BI_SF_F");
    }

    #[test]
    fn test_naming_is_deterministic() {
        let operands = [OperandType::buffer(F), OperandType::buffer(I)];
        assert_eq!(
            name_for(OpKind::Add, &operands, F),
            name_for(OpKind::Add, &operands, F)
        );
    }

    #[test]
    fn test_naming_is_injective() {
        let signatures = KernelSignature::enumerate();
        let names: HashSet<String> = signatures.iter().map(KernelSignature::name).collect();
        assert_eq!(names.len(), signatures.len());
    }

    #[test]
    fn test_names_parse_back() {
        for signature in KernelSignature::enumerate() {
            assert_eq!(KernelSignature::parse(&signature.name()), Some(signature));
        }
        assert_eq!(KernelSignature::parse("add_BI"), None);
        assert_eq!(KernelSignature::parse("add_BI_BI_F"), None);
        assert_eq!(KernelSignature::parse("nope_BI_I"), None);
        assert_eq!(
            KernelSignature::parse("each_area_fma_BI_BF_F").map(|s| s.op),
            Some(OpKind::EachAreaFma)
        );
    }

    #[test]
    fn test_binary_ops_cover_every_combination() {
        let signatures = KernelSignature::enumerate();
        for op in [OpKind::Add, OpKind::Sub, OpKind::Mul, OpKind::Div, OpKind::CompareGt] {
            // 3 layouts x 4 type pairs
            assert_eq!(signatures.iter().filter(|s| s.op == op).count(), 12, "{}", op);
        }
        for op in [OpKind::RotateLeft, OpKind::RotateRight, OpKind::Abs] {
            assert_eq!(signatures.iter().filter(|s| s.op == op).count(), 2, "{}", op);
        }
        assert_eq!(signatures.iter().filter(|s| s.op == OpKind::MulVector).count(), 4);
        assert_eq!(signatures.iter().filter(|s| s.op == OpKind::MatrixFma).count(), 8);
    }

    #[test]
    fn test_bitwise_requires_integral() {
        let err = KernelSignature::resolve(
            OpKind::BitAnd,
            &[OperandType::buffer(I), OperandType::scalar(F)],
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedOperationType { .. }));
        assert!(err.to_string().contains("bit_and"));
        assert!(err.to_string().contains("scalar FLOATING"));
    }

    #[test]
    fn test_unsupported_layout() {
        assert!(KernelSignature::resolve(
            OpKind::Sqrt,
            &[OperandType::scalar(F)]
        )
        .is_err());
        assert!(KernelSignature::resolve(
            OpKind::Add,
            &[OperandType::scalar(F), OperandType::scalar(F)]
        )
        .is_err());
    }

    #[test]
    fn test_result_rules() {
        assert_eq!(OpKind::Sqrt.result_type(&[I]), Some(F));
        assert_eq!(OpKind::Abs.result_type(&[I]), Some(I));
        assert_eq!(OpKind::ToInt.result_type(&[F]), Some(I));
        assert_eq!(OpKind::Blend.result_type(&[I, I, F]), Some(F));
        assert_eq!(OpKind::RotateLeft.result_type(&[F]), Some(F));
        assert_eq!(OpKind::ShiftLeft.result_type(&[F]), None);
        assert_eq!(OpKind::EachAreaFma.result_type(&[I, F]), Some(F));
        assert_eq!(OpKind::MatrixFma.result_type(&[I, I, I]), Some(I));
    }
}
