//! Element types, scalar literals and the promotion lattice
//!
//! Every buffer and scalar is either INTEGRAL (32-bit signed) or FLOATING
//! (32-bit IEEE). Mixing the two always promotes to FLOATING.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{HostSlice, HostSliceMut};

/// The two representable element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Integral,
    Floating,
}

impl ElementType {
    pub const ALL: [ElementType; 2] = [ElementType::Integral, ElementType::Floating];

    /// Promote two element types: FLOATING wins
    pub fn promote(self, other: ElementType) -> ElementType {
        if self == ElementType::Floating || other == ElementType::Floating {
            ElementType::Floating
        } else {
            ElementType::Integral
        }
    }

    /// Fold a promotion across any number of operands. `None` for no operands.
    pub fn promote_all<I>(types: I) -> Option<ElementType>
    where
        I: IntoIterator<Item = ElementType>,
    {
        types.into_iter().reduce(ElementType::promote)
    }

    /// Type name in generated kernel source
    pub fn c_type(self) -> &'static str {
        match self {
            ElementType::Integral => "int",
            ElementType::Floating => "float",
        }
    }

    /// Single-letter tag used in kernel names
    pub fn tag(self) -> char {
        match self {
            ElementType::Integral => 'I',
            ElementType::Floating => 'F',
        }
    }

    pub fn from_tag(tag: char) -> Option<ElementType> {
        match tag {
            'I' => Some(ElementType::Integral),
            'F' => Some(ElementType::Floating),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Integral => write!(f, "INTEGRAL"),
            ElementType::Floating => write!(f, "FLOATING"),
        }
    }
}

/// Promotion of two operand types
pub fn result_type(a: ElementType, b: ElementType) -> ElementType {
    a.promote(b)
}

/// Classify a literal scalar
pub fn type_of(literal: Scalar) -> ElementType {
    literal.element_type()
}

/// A literal scalar operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Int(i32),
    Float(f32),
}

impl Scalar {
    pub fn element_type(&self) -> ElementType {
        match self {
            Scalar::Int(_) => ElementType::Integral,
            Scalar::Float(_) => ElementType::Floating,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            Scalar::Int(v) => v as f32,
            Scalar::Float(v) => v,
        }
    }

    /// Truncating conversion, as a C `(int)` cast
    pub fn as_i32(&self) -> i32 {
        match *self {
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i32,
        }
    }

    pub fn cast(&self, to: ElementType) -> Scalar {
        match to {
            ElementType::Integral => Scalar::Int(self.as_i32()),
            ElementType::Floating => Scalar::Float(self.as_f32()),
        }
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::Float(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// Host element types that can be marshalled into a device buffer
pub trait HostElement: Copy + Default + fmt::Debug {
    const ELEMENT_TYPE: ElementType;

    fn host_slice(data: &[Self]) -> HostSlice<'_>;

    fn host_slice_mut(data: &mut [Self]) -> HostSliceMut<'_>;
}

impl HostElement for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Integral;

    fn host_slice(data: &[Self]) -> HostSlice<'_> {
        HostSlice::Int(data)
    }

    fn host_slice_mut(data: &mut [Self]) -> HostSliceMut<'_> {
        HostSliceMut::Int(data)
    }
}

impl HostElement for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Floating;

    fn host_slice(data: &[Self]) -> HostSlice<'_> {
        HostSlice::Float(data)
    }

    fn host_slice_mut(data: &mut [Self]) -> HostSliceMut<'_> {
        HostSliceMut::Float(data)
    }
}
