//! Function and kernel-argument prototypes.

use crate::ast::ParamDirection;
use crate::types::{Specifier, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl From<ParamDirection> for Direction {
    fn from(d: ParamDirection) -> Direction {
        match d {
            ParamDirection::In => Direction::In,
            ParamDirection::Out => Direction::Out,
            ParamDirection::InOut => Direction::InOut,
        }
    }
}

impl Direction {
    pub fn requires_lvalue(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub ty: Type,
    pub direction: Direction,
}

/// Whether a kernel's return type marks it as a render kernel (`vec4`) or a
/// reduce kernel (`void`).D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelTarget {
    Render,
    Reduce,
}

impl KernelTarget {
    pub fn from_return_specifier(spec: Specifier) -> Option<KernelTarget> {
        match spec {
            Specifier::Vec4 | Specifier::Color => Some(KernelTarget::Render),
            Specifier::Void => Some(KernelTarget::Reduce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionPrototype {
    pub name: String,
    pub params: Vec<FunctionParameter>,
    pub return_specifier: Specifier,
    /// `None` for plain `function`s; `Some` for `kernel`s.
    pub kernel_target: Option<KernelTarget>,
    /// External linkage for kernels, internal for helper functions.
    pub external_linkage: bool,
}

impl FunctionPrototype {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Two prototypes conflict when they share a name and every parameter
    /// specifier matches positionally. Qualifiers are irrelevant to conflict
    /// detection.
    pub fn conflicts_with(&self, other: &FunctionPrototype) -> bool {
        self.name == other.name
            && self.arity() == other.arity()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.ty.specifier_eq(b.ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto(name: &str, specs: &[Specifier]) -> FunctionPrototype {
        FunctionPrototype {
            name: name.to_string(),
            params: specs
                .iter()
                .map(|s| FunctionParameter {
                    name: "p".into(),
                    ty: Type::plain(*s),
                    direction: Direction::In,
                })
                .collect(),
            return_specifier: Specifier::Float,
            kernel_target: None,
            external_linkage: false,
        }
    }

    #[test]
    fn same_name_and_specifiers_conflict_regardless_of_qualifiers() {
        let a = proto("f", &[Specifier::Float, Specifier::Int]);
        let b = proto("f", &[Specifier::Float, Specifier::Int]);
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn different_arity_does_not_conflict() {
        let a = proto("f", &[Specifier::Float]);
        let b = proto("f", &[Specifier::Float, Specifier::Int]);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn kernel_target_follows_return_specifier() {
        assert_eq!(
            KernelTarget::from_return_specifier(Specifier::Vec4),
            Some(KernelTarget::Render)
        );
        assert_eq!(
            KernelTarget::from_return_specifier(Specifier::Void),
            Some(KernelTarget::Reduce)
        );
        assert_eq!(KernelTarget::from_return_specifier(Specifier::Int), None);
    }
}
