//! Overload resolution.

use crate::ir::{Callee, Intrinsic};
use crate::proto::{Direction, FunctionPrototype};
use crate::types::{implicit_cast, Specifier, Type};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub callee: Callee,
    pub params: Vec<Type>,
    pub directions: Vec<Direction>,
    pub return_ty: Type,
}

impl Candidate {
    pub fn from_user(proto: &FunctionPrototype) -> Candidate {
        Candidate {
            callee: Callee::User(proto.name.clone()),
            params: proto.params.iter().map(|p| p.ty).collect(),
            directions: proto.params.iter().map(|p| p.direction).collect(),
            return_ty: Type::plain(proto.return_specifier),
        }
    }
}

fn plain(spec: Specifier) -> Type {
    Type::plain(spec)
}

/// Built-in candidates visible under `name`, independent of the user's
/// translation unit.
pub fn builtin_candidates(name: &str) -> Vec<Candidate> {
    use Specifier::*;
    let vec2 = plain(Vec2);
    let vec4 = plain(Vec4);
    let sampler = plain(Sampler);
    let float = plain(Float);

    let mut out = Vec::new();
    match name {
        "sample" => out.push(Candidate {
            callee: Callee::Sample,
            params: vec![sampler, vec2],
            directions: vec![Direction::In, Direction::In],
            return_ty: vec4,
        }),
        "samplerTransform" => out.push(Candidate {
            callee: Callee::SamplerTransform,
            params: vec![sampler, vec2],
            directions: vec![Direction::In, Direction::In],
            return_ty: vec2,
        }),
        "samplerExtent" => out.push(Candidate {
            callee: Callee::SamplerExtent,
            params: vec![sampler],
            directions: vec![Direction::In],
            return_ty: vec4,
        }),
        "samplerCoord" => out.push(Candidate {
            callee: Callee::SamplerCoord,
            params: vec![sampler],
            directions: vec![Direction::In],
            return_ty: vec2,
        }),
        "destCoord" => out.push(Candidate {
            callee: Callee::DestCoord,
            params: vec![],
            directions: vec![],
            return_ty: vec2,
        }),
        _ => {
            if let Some(intr) = Intrinsic::from_name(name) {
                out.push(intrinsic_candidate(intr, float));
            }
        }
    }
    out
}

fn intrinsic_candidate(intr: Intrinsic, float: Type) -> Candidate {
    use Intrinsic::*;
    let arity = match intr {
        Atan2 | Mod | Min | Max | Step | Distance | Dot | Cross => 2,
        Clamp | Mix | Smoothstep => 3,
        _ => 1,
    };
    Candidate {
        callee: Callee::Intrinsic(intr),
        params: vec![float; arity],
        directions: vec![Direction::In; arity],
        return_ty: float,
    }
}

#[derive(Debug)]
pub enum ResolveError {
    NoMatch,
    Ambiguous,
}

/// Score `candidate` against call-site argument types, returning the total
/// cast cost or `None` if some argument has no implicit conversion.
fn score(candidate: &Candidate, args: &[Type]) -> Option<u32> {
    if candidate.params.len() != args.len() {
        return None;
    }
    let mut total = 0u32;
    for (param_ty, arg_ty) in candidate.params.iter().zip(args.iter()) {
        let kind = implicit_cast(*arg_ty, *param_ty)?;
        total += kind.cost();
    }
    Some(total)
}

/// Pick the best-scoring candidate by name/arity, matching "candidates by
/// name with parameter arity n, scored by implicit casts".
pub fn resolve<'a>(
    candidates: &'a [Candidate],
    args: &[Type],
) -> Result<&'a Candidate, ResolveError> {
    let mut best: Option<(u32, &Candidate)> = None;
    let mut tied = false;
    for cand in candidates {
        let Some(cost) = score(cand, args) else {
            continue;
        };
        match best {
            None => best = Some((cost, cand)),
            Some((best_cost, _)) if cost < best_cost => {
                best = Some((cost, cand));
                tied = false;
            }
            Some((best_cost, _)) if cost == best_cost => tied = true,
            _ => {}
        }
    }
    match best {
        None => Err(ResolveError::NoMatch),
        Some(_) if tied => Err(ResolveError::Ambiguous),
        Some((_, cand)) => Ok(cand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_widening() {
        let cands = vec![
            Candidate {
                callee: Callee::User("f_float".into()),
                params: vec![plain(Specifier::Float)],
                directions: vec![Direction::In],
                return_ty: plain(Specifier::Float),
            },
            Candidate {
                callee: Callee::User("f_int".into()),
                params: vec![plain(Specifier::Int)],
                directions: vec![Direction::In],
                return_ty: plain(Specifier::Float),
            },
        ];
        let picked = resolve(&cands, &[plain(Specifier::Int)]).unwrap();
        assert_eq!(picked.callee, Callee::User("f_int".into()));
    }

    #[test]
    fn equally_costly_candidates_are_ambiguous() {
        let cands = vec![
            Candidate {
                callee: Callee::User("a".into()),
                params: vec![plain(Specifier::Float)],
                directions: vec![Direction::In],
                return_ty: plain(Specifier::Float),
            },
            Candidate {
                callee: Callee::User("b".into()),
                params: vec![plain(Specifier::Float)],
                directions: vec![Direction::In],
                return_ty: plain(Specifier::Float),
            },
        ];
        let err = resolve(&cands, &[plain(Specifier::Int)]).unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous));
    }

    #[test]
    fn sample_builtin_resolves_with_exact_types() {
        let cands = builtin_candidates("sample");
        let picked = resolve(&cands, &[plain(Specifier::Sampler), plain(Specifier::Vec2)]).unwrap();
        assert_eq!(picked.callee, Callee::Sample);
    }
}
