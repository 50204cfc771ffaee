//! The kernel-language type system.
//!
//! A [`Type`] is a `(qualifier, specifier)` pair. Implicit casts are limited
//! to const-drop, `bool -> int -> float` widening, and scalar-to-vector
//! splat; everything else is a type error at lowering time.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    None,
    Const,
    /// A link-time constant; its value can be baked into the specialised
    /// module.
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Specifier {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    /// `vec4` with a distinct intent bit for host bindings.
    Color,
    Sampler,
    Void,
}

impl Specifier {
    /// scalar=1, vec_n=n, sampler=0, void=0.
    pub fn arity(self) -> usize {
        match self {
            Specifier::Float | Specifier::Int | Specifier::Bool => 1,
            Specifier::Vec2 => 2,
            Specifier::Vec3 => 3,
            Specifier::Vec4 | Specifier::Color => 4,
            Specifier::Sampler | Specifier::Void => 0,
        }
    }

    pub fn is_scalar(self) -> bool {
        matches!(self, Specifier::Float | Specifier::Int | Specifier::Bool)
    }

    pub fn is_vector(self) -> bool {
        matches!(
            self,
            Specifier::Vec2 | Specifier::Vec3 | Specifier::Vec4 | Specifier::Color
        )
    }

    /// The scalar element specifier of a vector, or itself for scalars.
    pub fn element(self) -> Specifier {
        match self {
            Specifier::Vec2 | Specifier::Vec3 | Specifier::Vec4 | Specifier::Color => {
                Specifier::Float
            }
            other => other,
        }
    }

    /// The vector specifier of the given arity with `Float` elements, used
    /// when splatting a scalar.
    pub fn vector_of_arity(n: usize) -> Option<Specifier> {
        match n {
            2 => Some(Specifier::Vec2),
            3 => Some(Specifier::Vec3),
            4 => Some(Specifier::Vec4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Specifier::Float => "float",
            Specifier::Int => "int",
            Specifier::Bool => "bool",
            Specifier::Vec2 => "vec2",
            Specifier::Vec3 => "vec3",
            Specifier::Vec4 => "vec4",
            Specifier::Color => "color",
            Specifier::Sampler => "sampler",
            Specifier::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    pub qualifier: Qualifier,
    pub specifier: Specifier,
}

impl Type {
    pub const fn new(qualifier: Qualifier, specifier: Specifier) -> Type {
        Type {
            qualifier,
            specifier,
        }
    }

    pub const fn plain(specifier: Specifier) -> Type {
        Type::new(Qualifier::None, specifier)
    }

    pub fn arity(self) -> usize {
        self.specifier.arity()
    }

    pub fn is_static(self) -> bool {
        matches!(self.qualifier, Qualifier::Static)
    }

    /// Overload-resolution identity ignores qualifiers: two prototypes
    /// conflict when their parameter *specifiers* match.
    pub fn specifier_eq(self, other: Type) -> bool {
        self.specifier == other.specifier
    }

    pub fn with_qualifier(self, qualifier: Qualifier) -> Type {
        Type {
            qualifier,
            ..self
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.qualifier {
            Qualifier::None => write!(f, "{}", self.specifier.name()),
            Qualifier::Const => write!(f, "const {}", self.specifier.name()),
            Qualifier::Static => write!(f, "static {}", self.specifier.name()),
        }
    }
}

/// The implicit coercion, if any, required to turn a value of type `from`
/// into a value of type `to`. Ordered roughly by "cost" for overload scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Types already match exactly (after ignoring qualifiers).
    Identity,
    /// Dropping a `const`/`static` qualifier only.
    ConstDrop,
    /// `bool -> int`.
    BoolToInt,
    /// `int -> float`.
    IntToFloat,
    /// `bool -> float` (via int, scored as two steps).
    BoolToFloat,
    /// scalar -> vec_n by splat.
    Splat,
    /// Explicit narrowing casts, legal only when written out as `(T) expr` —
    /// never selected by implicit coercion/overload scoring.
    FloatToInt,
    FloatToBool,
    IntToBool,
}

impl CastKind {
    /// Score used by overload resolution: lower is preferred. Ties are
    /// ambiguous.
    pub fn cost(self) -> u32 {
        match self {
            CastKind::Identity => 0,
            CastKind::ConstDrop => 0,
            CastKind::BoolToInt => 1,
            CastKind::IntToFloat => 1,
            CastKind::BoolToFloat => 2,
            CastKind::Splat => 1,
            // Never produced by `implicit_cast`, so never scored; kept finite
            // for completeness of the match.
            CastKind::FloatToInt | CastKind::FloatToBool | CastKind::IntToBool => u32::MAX,
        }
    }
}

/// Determine the (possibly empty) sequence of coercions needed to convert a
/// value of type `from` to type `to`. Returns `None` if no implicit
/// conversion exists.
pub fn implicit_cast(from: Type, to: Type) -> Option<CastKind> {
    if from.specifier == to.specifier {
        return Some(if from.qualifier == to.qualifier || from.qualifier == Qualifier::None {
            CastKind::Identity
        } else {
            CastKind::ConstDrop
        });
    }

    use Specifier::*;
    match (from.specifier, to.specifier) {
        (Bool, Int) => Some(CastKind::BoolToInt),
        (Int, Float) => Some(CastKind::IntToFloat),
        (Bool, Float) => Some(CastKind::BoolToFloat),
        (Float, Vec2) | (Float, Vec3) | (Float, Vec4) | (Float, Color) => Some(CastKind::Splat),
        (Int, Vec2) | (Int, Vec3) | (Int, Vec4) | (Int, Color) => Some(CastKind::Splat),
        (Bool, Vec2) | (Bool, Vec3) | (Bool, Vec4) | (Bool, Color) => Some(CastKind::Splat),
        _ => None,
    }
}

/// `vec4`/`color` are interchangeable for the purposes of implicit casts and
/// overload scoring (: "`color` (= vec4)").
pub fn specifiers_compatible(a: Specifier, b: Specifier) -> bool {
    a == b || matches!((a, b), (Specifier::Vec4, Specifier::Color) | (Specifier::Color, Specifier::Vec4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_drop_is_the_only_qualifier_change() {
        let from = Type::new(Qualifier::Const, Specifier::Float);
        let to = Type::plain(Specifier::Float);
        assert_eq!(implicit_cast(from, to), Some(CastKind::ConstDrop));
    }

    #[test]
    fn scalar_widening_chain() {
        assert_eq!(
            implicit_cast(Type::plain(Specifier::Bool), Type::plain(Specifier::Int)),
            Some(CastKind::BoolToInt)
        );
        assert_eq!(
            implicit_cast(Type::plain(Specifier::Int), Type::plain(Specifier::Float)),
            Some(CastKind::IntToFloat)
        );
    }

    #[test]
    fn no_narrowing_is_implicit() {
        assert_eq!(
            implicit_cast(Type::plain(Specifier::Float), Type::plain(Specifier::Int)),
            None
        );
        assert_eq!(
            implicit_cast(Type::plain(Specifier::Vec2), Type::plain(Specifier::Float)),
            None
        );
    }

    #[test]
    fn scalar_splats_to_vector() {
        assert_eq!(
            implicit_cast(Type::plain(Specifier::Float), Type::plain(Specifier::Vec3)),
            Some(CastKind::Splat)
        );
    }

    #[test]
    fn vec4_and_color_share_arity() {
        assert_eq!(Specifier::Vec4.arity(), Specifier::Color.arity());
        assert!(specifiers_compatible(Specifier::Vec4, Specifier::Color));
    }
}
