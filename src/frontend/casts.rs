//! Implicit-cast insertion.

use crate::ir::{ExprKind, TypedExpr};
use crate::types::{implicit_cast, Type};

/// Wrap `expr` in whatever cast is needed to reach `target`, or return it
/// unchanged if already that type. `None` means no implicit conversion
/// exists — the caller reports a type error.
pub fn coerce(expr: TypedExpr, target: Type) -> Option<TypedExpr> {
    let kind = implicit_cast(expr.ty, target)?;
    Some(match kind {
        crate::types::CastKind::Identity => TypedExpr::new(target, expr.kind),
        crate::types::CastKind::ConstDrop => TypedExpr::new(target, expr.kind),
        other => TypedExpr::new(
            target,
            ExprKind::Cast {
                kind: other,
                operand: Box::new(expr),
            },
        ),
    })
}
