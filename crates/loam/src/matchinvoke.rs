//! Matching one overload against an argument-type key.
//!
//! The overload's pattern state (cells for its pattern vars, the callable
//! pattern, per-formal type patterns, the variadic tail pattern) is built
//! once and cached on the declaration. Each match attempt unifies against
//! that state and then resets every cell, success or failure; bindings
//! survive only as concrete objects copied into the returned static env.

use crate::ast::{Code, ExprKind};
use crate::decls::{OverloadPatterns, ReadyPatterns};
use crate::env::EnvParent;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnvId, ExprId, OverloadId, TypeId};
use crate::intern::StrId;
use crate::object::Object;
use crate::pattern::{
    MultiPattern, Pattern, deref_deep, deref_deep_multi, evaluate_multi_pattern,
    evaluate_one_pattern, unify_multi_static, unify_pattern_obj,
};
use crate::state::CompilerState;

#[derive(Debug, Clone)]
pub struct MatchSuccess {
    pub overload: OverloadId,
    pub call_by_name: bool,
    pub is_inline: bool,
    /// The static env: overload env extended with bound pattern vars.
    pub env: EnvId,
    pub fixed_arg_names: Vec<StrId>,
    pub fixed_arg_types: Vec<TypeId>,
    pub var_arg_name: Option<StrId>,
    pub var_arg_types: Vec<TypeId>,
}

#[derive(Debug, Clone)]
pub enum MatchResult {
    Success(Box<MatchSuccess>),
    /// The callable pattern did not accept this callable.
    CallableError,
    ArityError {
        expected: usize,
        got: usize,
        variadic: bool,
    },
    ArgumentError {
        index: usize,
        actual: TypeId,
    },
    MultiArgumentError {
        start_index: usize,
    },
    PredicateError {
        predicate: ExprId,
    },
}

impl MatchResult {
    pub fn describe(&self, state: &CompilerState) -> String {
        match self {
            Self::Success(_) => "matched".to_owned(),
            Self::CallableError => "callable pattern did not match".to_owned(),
            Self::ArityError {
                expected,
                got,
                variadic,
            } => {
                let at_least = if *variadic { "at least " } else { "" };
                format!(
                    "incorrect number of arguments: expected {at_least}{expected}, got {got}"
                )
            }
            Self::ArgumentError { index, actual } => format!(
                "pattern did not match type {} of argument {}",
                state.type_name(*actual),
                index + 1
            ),
            Self::MultiArgumentError { start_index } => format!(
                "variadic argument pattern did not match argument types starting at {}",
                start_index + 1
            ),
            Self::PredicateError { predicate } => {
                format!("predicate {} failed", state.expr_text(*predicate))
            }
        }
    }
}

/// Builds the overload's cached pattern state on first use. Re-entry while
/// building is a genuine recursion (the overload's own target mentions
/// itself) and is reported as such.
fn initialize_patterns(state: &mut CompilerState, overload: OverloadId) -> CompileResult<()> {
    match state.overloads[overload.index()].patterns {
        OverloadPatterns::Ready(_) => return Ok(()),
        OverloadPatterns::Initializing => {
            return Err(state.error(DiagnosticKind::Recursion {
                what: "overload pattern initialization".to_owned(),
            }));
        }
        OverloadPatterns::NotInitialized => {}
    }
    state.overloads[overload.index()].patterns = OverloadPatterns::Initializing;

    let (env, target, pattern_vars, formal_types, var_arg_type) = {
        let decl = &state.overloads[overload.index()];
        (
            decl.env,
            decl.target,
            decl.code.pattern_vars.clone(),
            decl.code
                .formal_args
                .iter()
                .map(|a| a.ty)
                .collect::<Vec<_>>(),
            decl.code.var_arg.as_ref().and_then(|a| a.ty),
        )
    };

    let pattern_env = state.new_env(EnvParent::Env(env));
    let mut cells = Vec::with_capacity(pattern_vars.len());
    let mut multi_cells = Vec::with_capacity(pattern_vars.len());
    for var in &pattern_vars {
        if var.is_multi {
            let cell = state.new_multi_cell();
            multi_cells.push(Some(cell));
            cells.push(None);
            state.add_local(
                pattern_env,
                var.name,
                Object::MultiPattern(Box::new(MultiPattern::Cell(cell))),
            );
        } else {
            let cell = state.new_cell();
            cells.push(Some(cell));
            multi_cells.push(None);
            state.add_local(
                pattern_env,
                var.name,
                Object::Pattern(Box::new(Pattern::Cell(cell))),
            );
        }
    }

    let callable_pattern = evaluate_one_pattern(state, target, pattern_env)?;

    let mut arg_patterns = Vec::with_capacity(formal_types.len());
    for ty in formal_types {
        match ty {
            Some(ty) => arg_patterns.push(Some(evaluate_one_pattern(state, ty, pattern_env)?)),
            None => arg_patterns.push(None),
        }
    }

    let var_arg_pattern = match var_arg_type {
        Some(ty) => {
            let location = state.expr_location(ty);
            let unpack = state.add_expr(ExprKind::Unpack(ty), location);
            Some(evaluate_multi_pattern(state, &[unpack], pattern_env)?)
        }
        None => None,
    };

    state.overloads[overload.index()].patterns =
        OverloadPatterns::Ready(Box::new(ReadyPatterns {
            cells,
            multi_cells,
            pattern_env,
            callable_pattern,
            arg_patterns,
            var_arg_pattern,
        }));
    Ok(())
}

/// Attempts to match one overload against a callable and argument types.
/// Total: every outcome leaves the overload's cells cleared.
pub fn match_invoke(
    state: &mut CompilerState,
    overload: OverloadId,
    callable: &Object,
    args_key: &[TypeId],
) -> CompileResult<MatchResult> {
    initialize_patterns(state, overload)?;
    let ready = match &state.overloads[overload.index()].patterns {
        OverloadPatterns::Ready(ready) => (**ready).clone(),
        _ => unreachable!("patterns initialized above"),
    };

    let result = match_invoke_inner(state, overload, &ready, callable, args_key);
    state.reset_cells(&ready.cells, &ready.multi_cells);
    result
}

fn match_invoke_inner(
    state: &mut CompilerState,
    overload: OverloadId,
    ready: &ReadyPatterns,
    callable: &Object,
    args_key: &[TypeId],
) -> CompileResult<MatchResult> {
    if !unify_pattern_obj(state, &ready.callable_pattern, callable)? {
        return Ok(MatchResult::CallableError);
    }

    let (formal_count, has_var_arg, pattern_vars, predicate, call_by_name, is_inline, env) = {
        let decl = &state.overloads[overload.index()];
        (
            decl.code.formal_args.len(),
            decl.code.var_arg.is_some(),
            decl.code.pattern_vars.clone(),
            decl.code.predicate,
            decl.call_by_name,
            decl.is_inline,
            decl.env,
        )
    };

    if has_var_arg {
        if args_key.len() < formal_count {
            return Ok(MatchResult::ArityError {
                expected: formal_count,
                got: args_key.len(),
                variadic: true,
            });
        }
    } else if args_key.len() != formal_count {
        return Ok(MatchResult::ArityError {
            expected: formal_count,
            got: args_key.len(),
            variadic: false,
        });
    }

    for (i, pattern) in ready.arg_patterns.iter().enumerate() {
        if let Some(pattern) = pattern {
            if !unify_pattern_obj(state, pattern, &Object::Type(args_key[i]))? {
                return Ok(MatchResult::ArgumentError {
                    index: i,
                    actual: args_key[i],
                });
            }
        }
    }
    if let Some(var_pattern) = &ready.var_arg_pattern {
        let rest: Vec<Object> = args_key[formal_count..]
            .iter()
            .map(|&t| Object::Type(t))
            .collect();
        if !unify_multi_static(state, var_pattern, &rest)? {
            return Ok(MatchResult::MultiArgumentError {
                start_index: formal_count,
            });
        }
    }

    // copy bound pattern vars out into the static env before the caller
    // resets the cells
    let static_env = state.new_env(EnvParent::Env(env));
    for (i, var) in pattern_vars.iter().enumerate() {
        if var.is_multi {
            let cell = ready.multi_cells[i].expect("multi cell for multi var");
            let Some(values) = deref_deep_multi(state, &MultiPattern::Cell(cell))? else {
                let name = state.interner.get(var.name).to_owned();
                return Err(state.error_at(
                    DiagnosticKind::Lookup {
                        name: format!("unbound pattern variable {name}"),
                    },
                    var.location,
                ));
            };
            state.add_local(static_env, var.name, Object::MultiStatic(values));
        } else {
            let cell = ready.cells[i].expect("cell for single var");
            let Some(value) = deref_deep(state, &Pattern::Cell(cell))? else {
                let name = state.interner.get(var.name).to_owned();
                return Err(state.error_at(
                    DiagnosticKind::Lookup {
                        name: format!("unbound pattern variable {name}"),
                    },
                    var.location,
                ));
            };
            state.add_local(static_env, var.name, value);
        }
    }

    // the predicate sees only the copied-out bindings, so resetting the
    // cells first is safe; it is the caller's reset that enforces the
    // state contract
    state.reset_cells(&ready.cells, &ready.multi_cells);

    if let Some(predicate) = predicate {
        if !crate::evaluator::evaluate_bool(state, predicate, static_env)? {
            return Ok(MatchResult::PredicateError { predicate });
        }
    }

    let (fixed_arg_names, var_arg_name) = {
        let decl = &state.overloads[overload.index()];
        (
            decl.code
                .formal_args
                .iter()
                .map(|a| a.name)
                .collect::<Vec<_>>(),
            decl.code.var_arg.as_ref().map(|a| a.name),
        )
    };

    Ok(MatchResult::Success(Box::new(MatchSuccess {
        overload,
        call_by_name,
        is_inline,
        env: static_env,
        fixed_arg_types: args_key[..formal_count].to_vec(),
        fixed_arg_names,
        var_arg_name,
        var_arg_types: if has_var_arg {
            args_key[formal_count..].to_vec()
        } else {
            Vec::new()
        },
    })))
}

/// Whether every formal arg of the overload is an unconstrained pattern
/// variable; such candidates are elided from default match-error reports.
pub fn is_universal_overload(state: &CompilerState, overload: OverloadId) -> bool {
    let decl = &state.overloads[overload.index()];
    let vars: Vec<StrId> = decl.code.pattern_vars.iter().map(|v| v.name).collect();
    let unconstrained = |code: &Code| {
        code.formal_args.iter().chain(code.var_arg.iter()).all(|a| match a.ty {
            None => true,
            Some(ty) => match &state.expr(ty).kind {
                ExprKind::NameRef(name) => vars.contains(name),
                _ => false,
            },
        })
    };
    unconstrained(&decl.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CompilerState;

    fn generic_overload(state: &mut CompilerState) -> (OverloadId, Object) {
        let module = crate::loader::load_program_source(
            state,
            "t.clay",
            b"define id;\noverload id[T](x:T) = x;\nmain() { return; }\n".to_vec(),
        )
        .unwrap_or_else(|d| panic!("load failed: {d}"));
        let _ = module;
        let proc = state
            .procedures
            .iter()
            .position(|p| state.interner.get(p.name) == "id")
            .expect("id procedure");
        let proc = crate::ids::ProcId::new(proc);
        let overload = state.procedures[proc.index()].overloads[0];
        (overload, Object::Procedure(proc))
    }

    /// After `match_invoke` returns, every pattern cell on the overload is
    /// back in its pre-call state, for failure and success alike.
    #[test]
    fn cells_reset_after_failure_and_success() {
        let mut state = CompilerState::new();
        let (overload, callable) = generic_overload(&mut state);
        let int32 = state.core.int32;

        let result = match_invoke(&mut state, overload, &callable, &[int32, int32])
            .unwrap_or_else(|d| panic!("match failed: {d}"));
        assert!(matches!(result, MatchResult::ArityError { .. }));
        let ready = match &state.overloads[overload.index()].patterns {
            OverloadPatterns::Ready(r) => (**r).clone(),
            _ => panic!("patterns not initialized"),
        };
        for cell in ready.cells.iter().flatten() {
            assert!(state.cells[cell.index()].is_none());
        }

        let result = match_invoke(&mut state, overload, &callable, &[int32]).unwrap();
        let MatchResult::Success(success) = result else {
            panic!("expected a match");
        };
        assert_eq!(success.fixed_arg_types, vec![int32]);
        for cell in ready.cells.iter().flatten() {
            assert!(state.cells[cell.index()].is_none());
        }
        // the bound pattern var was copied out into the static env
        let t = state.interner.find("T").expect("interned T");
        let bound = state.lookup_env(success.env, t).unwrap().expect("T bound");
        assert!(matches!(bound, Object::Type(ty) if ty == int32));
    }

    /// Matching depends only on the overload and the argument key, not on
    /// call history.
    #[test]
    fn matching_is_deterministic() {
        let mut state = CompilerState::new();
        let (overload, callable) = generic_overload(&mut state);
        let int32 = state.core.int32;
        let float32 = state.core.float32;
        for _ in 0..3 {
            let a = match_invoke(&mut state, overload, &callable, &[int32]).unwrap();
            let MatchResult::Success(a) = a else { panic!("expected a match") };
            assert_eq!(a.fixed_arg_types, vec![int32]);
            let b = match_invoke(&mut state, overload, &callable, &[float32]).unwrap();
            let MatchResult::Success(b) = b else { panic!("expected a match") };
            assert_eq!(b.fixed_arg_types, vec![float32]);
        }
    }
}
