//! Type propagation.
//!
//! For every expression the analyzer computes a canonical [`MultiPValue`]
//! (one `(type, rvalue?)` pair per produced value), memoized per node.
//! Statement analysis accumulates a function's return types and reports
//! `{fallthrough, recursive, terminated}`.
//!
//! Recursion: analyzing a call whose specialization is still being
//! analyzed yields `None`, a sentinel that short-circuits without
//! committing result types; the outer fixed point retries until stable.

use smallvec::smallvec;

use crate::ast::{
    BindingKind, ExprKind, ExprList, LambdaCapture, ReturnKind, StmtKind, Tempness, VariadicOpKind,
    Visibility,
};
use crate::decls::{OverloadDecl, OverloadPatterns, ProcedureDecl, RecordBody, RecordDecl};
use crate::env::EnvParent;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnvId, ExprId, GvarInstanceId, InvokeEntryId, StmtId, TypeId};
use crate::intern::StrId;
use crate::object::{Object, object_key, print_object};
use crate::primops::PrimOp;
use crate::state::CompilerState;
use crate::types::{RecordInfo, TypeKind, VariantInfo};

/// The analyzer's static abstraction of a run-time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PValue {
    pub ty: TypeId,
    pub is_temp: bool,
}

/// An ordered sequence of propagation values; procedures return multiple
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiPValue(pub Vec<PValue>);

impl MultiPValue {
    pub fn single(pv: PValue) -> Self {
        Self(vec![pv])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementAnalysis {
    Fallthrough,
    Recursive,
    Terminated,
}

#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub has_recursive_propagation: bool,
    pub return_initialized: bool,
    pub return_is_ref: Vec<bool>,
    pub return_types: Vec<TypeId>,
}

//
// foreign expressions
//

/// Resolves a foreign expression to `(inner, env)`, loading and caching
/// the named module's env on first touch.
pub fn resolve_foreign(state: &mut CompilerState, expr: ExprId) -> CompileResult<(ExprId, EnvId)> {
    let ExprKind::ForeignExpr {
        module_name,
        env,
        expr: inner,
    } = state.expr(expr).kind.clone()
    else {
        unreachable!("resolve_foreign on non-foreign expression");
    };
    if let Some(env) = env {
        return Ok((inner, env));
    }
    let Some(module_name) = module_name else {
        return Err(state.eval_error("foreign expression with no environment"));
    };
    let name = state.interner.get(module_name).to_owned();
    let module = crate::loader::load_module(state, &name)?;
    let module_env = state.modules[module.index()].env;
    let ExprKind::ForeignExpr { env, .. } = &mut state.exprs[expr.index()].kind else {
        unreachable!()
    };
    *env = Some(module_env);
    Ok((inner, module_env))
}

//
// safe wrappers: recursion sentinel becomes a diagnostic
//

fn recursion_error(state: &CompilerState) -> Box<crate::error::Diagnostic> {
    state.error(DiagnosticKind::Recursion {
        what: "type analysis".to_owned(),
    })
}

pub fn safe_analyze_expr(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<MultiPValue> {
    analyze_expr(state, expr, env)?.ok_or_else(|| recursion_error(state))
}

pub fn safe_analyze_one(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<PValue> {
    analyze_one(state, expr, env)?.ok_or_else(|| recursion_error(state))
}

pub fn safe_analyze_multi(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
) -> CompileResult<MultiPValue> {
    analyze_multi(state, exprs, env)?.ok_or_else(|| recursion_error(state))
}

//
// expression analysis
//

pub fn analyze_one(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Option<PValue>> {
    let Some(mpv) = analyze_expr(state, expr, env)? else {
        return Ok(None);
    };
    if mpv.len() != 1 {
        return Err(state.error_at(
            DiagnosticKind::TypeMismatch {
                context: "expression".to_owned(),
                expected: "a single value".to_owned(),
                actual: format!("{} values", mpv.len()),
            },
            state.expr_location(expr),
        ));
    }
    Ok(Some(mpv.0[0]))
}

/// Analyzes an expression list, splicing `..` unpacks.
pub fn analyze_multi(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    let mut out = MultiPValue::default();
    for &x in exprs {
        let kind = state.expr(x).kind.clone();
        if let ExprKind::Unpack(inner) = kind {
            let Some(mpv) = analyze_expr(state, inner, env)? else {
                return Ok(None);
            };
            out.0.extend(mpv.0);
        } else {
            let Some(pv) = analyze_one(state, x, env)? else {
                return Ok(None);
            };
            out.0.push(pv);
        }
    }
    Ok(Some(out))
}

/// Argument analysis: like [`analyze_multi`] but records the positions of
/// `*expr` dispatch arguments.
pub fn analyze_multi_args(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
    dispatch_indices: &mut Vec<usize>,
) -> CompileResult<Option<MultiPValue>> {
    let mut out = MultiPValue::default();
    for &x in exprs {
        let kind = state.expr(x).kind.clone();
        match kind {
            ExprKind::DispatchExpr(inner) => {
                let Some(pv) = analyze_one(state, inner, env)? else {
                    return Ok(None);
                };
                dispatch_indices.push(out.len());
                out.0.push(pv);
            }
            ExprKind::Unpack(inner) => {
                let Some(mpv) = analyze_expr(state, inner, env)? else {
                    return Ok(None);
                };
                out.0.extend(mpv.0);
            }
            _ => {
                let Some(pv) = analyze_one(state, x, env)? else {
                    return Ok(None);
                };
                out.0.push(pv);
            }
        }
    }
    Ok(Some(out))
}

pub fn analyze_expr(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    if state.caching_disabled == 0 {
        if let Some(cached) = state.analysis_cache.get(&expr) {
            return Ok(Some(cached.clone()));
        }
    }
    let location = state.expr_location(expr);
    state.push_location(location);
    let result = analyze_expr_inner(state, expr, env);
    state.pop_location();
    let result = result?;
    if state.caching_disabled == 0 {
        if let Some(mpv) = &result {
            state.analysis_cache.insert(expr, mpv.clone());
        }
    }
    Ok(result)
}

fn static_pvalue(state: &mut CompilerState, obj: Object) -> CompileResult<PValue> {
    let ty = state.static_type(obj)?;
    Ok(PValue { ty, is_temp: true })
}

fn analyze_expr_inner(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    let kind = state.expr(expr).kind.clone();
    match kind {
        ExprKind::BoolLiteral(_) => Ok(Some(MultiPValue::single(PValue {
            ty: state.core.bool_type,
            is_temp: true,
        }))),
        ExprKind::IntLiteral { value, suffix } => {
            let default_ty = module_default_int(state, env);
            let text = state.interner.get(value).to_owned();
            let suffix_text = suffix.map(|s| state.interner.get(s).to_owned());
            let holder =
                crate::literals::parse_int_literal(state, &text, suffix_text.as_deref(), default_ty)?;
            let ty = state.holders[holder.index()].ty;
            Ok(Some(MultiPValue::single(PValue { ty, is_temp: true })))
        }
        ExprKind::FloatLiteral { value, suffix } => {
            let default_ty = module_default_float(state, env);
            let text = state.interner.get(value).to_owned();
            let suffix_text = suffix.map(|s| state.interner.get(s).to_owned());
            let holder = crate::literals::parse_float_literal(
                state,
                &text,
                suffix_text.as_deref(),
                default_ty,
            )?;
            let ty = state.holders[holder.index()].ty;
            Ok(Some(MultiPValue::single(PValue { ty, is_temp: true })))
        }
        ExprKind::CharLiteral(c) => {
            let desugared = match state.desugared_exprs.get(&expr) {
                Some(d) => *d,
                None => {
                    let location = state.expr_location(expr);
                    let d = crate::desugar::desugar_char_literal(state, c, location);
                    state.desugared_exprs.insert(expr, d);
                    d
                }
            };
            analyze_expr(state, desugared, env)
        }
        ExprKind::StringLiteral(s) | ExprKind::IdentifierLiteral(s) => {
            let pv = static_pvalue(state, Object::Ident(s))?;
            Ok(Some(MultiPValue::single(pv)))
        }
        ExprKind::FileExpr => {
            let name = match state.expr_location(expr) {
                Some(l) => state.sources.get(l.source).name.clone(),
                None => String::new(),
            };
            let ident = state.intern(&name);
            let pv = static_pvalue(state, Object::Ident(ident))?;
            Ok(Some(MultiPValue::single(pv)))
        }
        ExprKind::LineExpr | ExprKind::ColumnExpr => {
            let lc = state
                .expr_location(expr)
                .map(|l| state.sources.line_col(l));
            let value = match (&state.expr(expr).kind, lc) {
                (ExprKind::LineExpr, Some(lc)) => u64::from(lc.line),
                (_, Some(lc)) => u64::from(lc.column),
                _ => 0,
            };
            let holder = state.size_holder(value);
            let pv = static_pvalue(state, Object::Value(holder))?;
            Ok(Some(MultiPValue::single(pv)))
        }
        ExprKind::NameRef(name) => {
            let obj = state.safe_lookup_env(env, name)?;
            match obj {
                Object::Expr(inner, home_env) => analyze_expr(state, inner, home_env),
                Object::ExprList(inner, home_env) => analyze_multi(state, &inner, home_env),
                other => analyze_static_object(state, &other),
            }
        }
        ExprKind::Tuple(args) => {
            if args.len() == 1
                && !matches!(state.expr(args[0]).kind, ExprKind::Unpack(_))
            {
                return analyze_expr(state, args[0], env);
            }
            let Some(mpv) = analyze_multi(state, &args, env)? else {
                return Ok(None);
            };
            let ty = state.tuple_type(mpv.0.iter().map(|pv| pv.ty).collect());
            Ok(Some(MultiPValue::single(PValue { ty, is_temp: true })))
        }
        ExprKind::Paren(args) => analyze_multi(state, &args, env),
        ExprKind::Indexing { expr: base, args } => {
            analyze_indexing_expr(state, base, &args, env)
        }
        ExprKind::Call { expr: callable, args } => analyze_call_expr(state, callable, &args, env),
        ExprKind::FieldRef { .. } => {
            let module = state
                .env_module(env)
                .ok_or_else(|| state.eval_error("field reference outside a module"))?;
            let desugared = crate::desugar::desugar_field_ref(state, expr, module)?;
            analyze_expr(state, desugared, env)
        }
        ExprKind::StaticIndexing { .. } => {
            let desugared = crate::desugar::desugar_static_indexing(state, expr);
            analyze_expr(state, desugared, env)
        }
        ExprKind::VariadicOp { op, .. } => {
            if op == VariadicOpKind::AddressOf {
                // taking the address of a temporary is rejected up front
                let ExprKind::VariadicOp { exprs, .. } = state.expr(expr).kind.clone() else {
                    unreachable!()
                };
                if let Some(pv) = analyze_one(state, exprs[0], env)? {
                    if pv.is_temp {
                        return Err(
                            state.eval_error("cannot take the address of a temporary value")
                        );
                    }
                }
            }
            let desugared = crate::desugar::desugar_variadic_op(state, expr);
            analyze_expr(state, desugared, env)
        }
        ExprKind::And { left, right } | ExprKind::Or { left, right } => {
            let Some(a) = analyze_one(state, left, env)? else {
                return Ok(None);
            };
            if a.is_temp {
                return Ok(Some(MultiPValue::single(PValue {
                    ty: a.ty,
                    is_temp: true,
                })));
            }
            let Some(b) = analyze_one(state, right, env)? else {
                return Ok(None);
            };
            if a.ty != b.ty {
                return Err(state.error(DiagnosticKind::TypeMismatch {
                    context: "boolean connective".to_owned(),
                    expected: state.type_name(a.ty),
                    actual: state.type_name(b.ty),
                }));
            }
            Ok(Some(MultiPValue::single(PValue {
                ty: a.ty,
                is_temp: a.is_temp || b.is_temp,
            })))
        }
        ExprKind::Lambda(_) => {
            let converted = initialize_lambda(state, expr, env)?;
            analyze_expr(state, converted, env)
        }
        ExprKind::Unpack(_) => Err(state.eval_error("incorrect usage of the unpack operator")),
        ExprKind::StaticExpr(inner) => {
            let obj = crate::evaluator::evaluate_one_static(state, inner, env)?;
            let pv = static_pvalue(state, obj)?;
            Ok(Some(MultiPValue::single(pv)))
        }
        ExprKind::DispatchExpr(_) => {
            Err(state.eval_error("dispatch operator used outside call arguments"))
        }
        ExprKind::ForeignExpr { .. } => {
            let (inner, foreign_env) = resolve_foreign(state, expr)?;
            analyze_expr(state, inner, foreign_env)
        }
        ExprKind::ObjectExpr(obj) => analyze_static_object(state, &obj),
        ExprKind::EvalExpr { .. } => {
            let value = crate::desugar::desugar_eval_expr(state, expr, env)?;
            analyze_multi(state, &value, env)
        }
    }
}

fn module_default_int(state: &CompilerState, env: EnvId) -> TypeId {
    state
        .env_module(env)
        .map_or(state.core.int32, |m| state.modules[m.index()].default_integer_type)
}

fn module_default_float(state: &CompilerState, env: EnvId) -> TypeId {
    state
        .env_module(env)
        .map_or(state.core.float64, |m| state.modules[m.index()].default_float_type)
}

//
// static objects
//

pub fn analyze_static_object(
    state: &mut CompilerState,
    obj: &Object,
) -> CompileResult<Option<MultiPValue>> {
    match obj {
        Object::EnumMember { decl, .. } => {
            let ty = state.enum_type(*decl);
            Ok(Some(MultiPValue::single(PValue { ty, is_temp: true })))
        }
        Object::GlobalVar(g) => {
            let decl = &state.global_vars[g.index()];
            if decl.has_params() {
                let pv = static_pvalue(state, obj.clone())?;
                return Ok(Some(MultiPValue::single(pv)));
            }
            let instance = lookup_gvar_instance(state, *g, &[])?;
            analyze_gvar_instance(state, instance)
        }
        Object::ExternalVar(v) => {
            let ty = match state.external_vars[v.index()].resolved {
                Some(ty) => ty,
                None => {
                    let (expr, decl_env) = {
                        let d = &state.external_vars[v.index()];
                        (d.ty, d.env)
                    };
                    let ty = crate::evaluator::evaluate_type(state, expr, decl_env)?;
                    state.external_vars[v.index()].resolved = Some(ty);
                    ty
                }
            };
            Ok(Some(MultiPValue::single(PValue { ty, is_temp: false })))
        }
        Object::ExternalProc(p) => {
            let info = analyze_external_proc(state, *p)?;
            Ok(Some(MultiPValue::single(PValue {
                ty: info.ptr_type,
                is_temp: true,
            })))
        }
        Object::GlobalAlias(a) => {
            let decl = &state.global_aliases[a.index()];
            if decl.has_params() {
                let pv = static_pvalue(state, obj.clone())?;
                return Ok(Some(MultiPValue::single(pv)));
            }
            let (expr, decl_env) = (decl.expr, decl.env);
            analyze_expr(state, expr, decl_env)
        }
        Object::Value(v) => {
            let ty = state.holders[v.index()].ty;
            Ok(Some(MultiPValue::single(PValue { ty, is_temp: true })))
        }
        Object::MultiStatic(items) => {
            let mut out = MultiPValue::default();
            for item in items {
                let ty = state.static_object_type(item)?;
                out.0.push(PValue { ty, is_temp: true });
            }
            Ok(Some(out))
        }
        Object::PValue(pv) => Ok(Some(MultiPValue::single(*pv))),
        Object::MultiPValue(mpv) => Ok(Some(mpv.clone())),
        Object::EValue(ev) => Ok(Some(MultiPValue::single(PValue {
            ty: ev.ty,
            is_temp: ev.forwarded_rvalue,
        }))),
        Object::MultiEValue(evs) => Ok(Some(MultiPValue(
            evs.iter()
                .map(|ev| PValue {
                    ty: ev.ty,
                    is_temp: ev.forwarded_rvalue,
                })
                .collect(),
        ))),
        Object::Pattern(_) | Object::MultiPattern(_) => {
            Err(state.eval_error("pattern cannot be used as a value"))
        }
        Object::Expr(inner, home_env) => analyze_expr(state, *inner, *home_env),
        Object::ExprList(inner, home_env) => {
            let inner = inner.clone();
            analyze_multi(state, &inner, *home_env)
        }
        other => {
            let pv = static_pvalue(state, other.clone())?;
            Ok(Some(MultiPValue::single(pv)))
        }
    }
}

//
// global variable instances
//

pub fn lookup_gvar_instance(
    state: &mut CompilerState,
    gvar: crate::ids::GlobalId,
    params: &[Object],
) -> CompileResult<GvarInstanceId> {
    let mut keys = Vec::with_capacity(params.len());
    for p in params {
        match object_key(state, p) {
            Some(k) => keys.push(k),
            None => {
                let rendered = print_object(state, p);
                return Err(state.type_mismatch(
                    "global variable parameter",
                    "a static object",
                    &rendered,
                ));
            }
        }
    }
    if let Some((_, id)) = state.global_vars[gvar.index()]
        .instances
        .iter()
        .find(|(k, _)| *k == keys)
    {
        return Ok(*id);
    }
    let (expr, decl_env, param_names, var_param) = {
        let d = &state.global_vars[gvar.index()];
        (d.expr, d.env, d.params.clone(), d.var_param)
    };
    let env = state.new_env(EnvParent::Env(decl_env));
    for (i, name) in param_names.iter().enumerate() {
        let value = params.get(i).cloned().ok_or_else(|| {
            state.eval_error("too few parameters for global variable")
        })?;
        state.add_local(env, *name, value);
    }
    if let Some(name) = var_param {
        let rest = params.get(param_names.len()..).unwrap_or(&[]).to_vec();
        state.add_local(env, name, Object::MultiStatic(rest));
    }
    let id = GvarInstanceId::new(state.gvar_instances.len());
    state.gvar_instances.push(crate::decls::GvarInstance {
        gvar,
        params: params.to_vec(),
        analyzing: false,
        expr,
        env,
        ty: None,
    });
    state.global_vars[gvar.index()].instances.push((keys, id));
    Ok(id)
}

pub fn analyze_gvar_instance(
    state: &mut CompilerState,
    instance: GvarInstanceId,
) -> CompileResult<Option<MultiPValue>> {
    if let Some(ty) = state.gvar_instances[instance.index()].ty {
        return Ok(Some(MultiPValue::single(PValue { ty, is_temp: false })));
    }
    if state.gvar_instances[instance.index()].analyzing {
        return Ok(None);
    }
    state.gvar_instances[instance.index()].analyzing = true;
    let (expr, env) = {
        let i = &state.gvar_instances[instance.index()];
        (i.expr, i.env)
    };
    // the declaration expression is shared between instances with
    // different parameters; its per-node memo must not leak across them
    state.caching_disabled += 1;
    let result = analyze_one(state, expr, env);
    state.caching_disabled -= 1;
    state.gvar_instances[instance.index()].analyzing = false;
    match result? {
        None => Ok(None),
        Some(pv) => {
            state.gvar_instances[instance.index()].ty = Some(pv.ty);
            Ok(Some(MultiPValue::single(PValue {
                ty: pv.ty,
                is_temp: false,
            })))
        }
    }
}

//
// indexing: type construction and parameterized aliases
//

pub fn analyze_indexing_expr(
    state: &mut CompilerState,
    base: ExprId,
    args: &[ExprId],
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    let Some(pv) = analyze_one(state, base, env)? else {
        return Ok(None);
    };
    let TypeKind::Static(obj) = state.types.get(pv.ty).kind.clone() else {
        let name = state.type_name(pv.ty);
        return Err(state.type_mismatch("indexing", "a static callable", &name));
    };
    match *obj {
        Object::PrimOp(op) if op.is_pattern_head() => {
            let params = crate::evaluator::evaluate_multi_static(state, args, env)?;
            let ty = construct_type(state, &Object::PrimOp(op), &params)?;
            let pv = static_pvalue(state, Object::Type(ty))?;
            Ok(Some(MultiPValue::single(pv)))
        }
        Object::Record(_) | Object::Variant(_) => {
            let params = crate::evaluator::evaluate_multi_static(state, args, env)?;
            let ty = construct_type(state, &obj, &params)?;
            let pv = static_pvalue(state, Object::Type(ty))?;
            Ok(Some(MultiPValue::single(pv)))
        }
        Object::GlobalAlias(alias) => analyze_alias_indexing(state, alias, args, env),
        Object::GlobalVar(gvar) => {
            let params = crate::evaluator::evaluate_multi_static(state, args, env)?;
            let instance = lookup_gvar_instance(state, gvar, &params)?;
            analyze_gvar_instance(state, instance)
        }
        other => {
            let rendered = print_object(state, &other);
            Err(state.type_mismatch("indexing", "an indexable object", &rendered))
        }
    }
}

fn analyze_alias_indexing(
    state: &mut CompilerState,
    alias: crate::ids::AliasId,
    args: &[ExprId],
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    let params = crate::evaluator::evaluate_multi_static(state, args, env)?;
    let (expr, decl_env, param_names, var_param) = {
        let d = &state.global_aliases[alias.index()];
        (d.expr, d.env, d.params.clone(), d.var_param)
    };
    if params.len() < param_names.len()
        || (params.len() > param_names.len() && var_param.is_none())
    {
        return Err(state.error(DiagnosticKind::TypeMismatch {
            context: "alias parameters".to_owned(),
            expected: format!("{} parameters", param_names.len()),
            actual: format!("{}", params.len()),
        }));
    }
    let env2 = state.new_env(EnvParent::Env(decl_env));
    for (name, value) in param_names.iter().zip(&params) {
        state.add_local(env2, *name, value.clone());
    }
    if let Some(name) = var_param {
        let rest = params[param_names.len()..].to_vec();
        state.add_local(env2, name, Object::MultiStatic(rest));
    }
    // the alias body is shared between parameterizations; keep its
    // per-node memo out of the cache
    state.caching_disabled += 1;
    let result = analyze_expr(state, expr, env2);
    state.caching_disabled -= 1;
    result
}

//
// type construction
//

pub(crate) fn obj_as_type(state: &mut CompilerState, obj: &Object) -> CompileResult<TypeId> {
    match obj {
        Object::Type(t) => Ok(*t),
        Object::Record(decl) => {
            let d = &state.records[decl.index()];
            if d.params.is_empty() && d.var_param.is_none() {
                state.record_type(*decl, Vec::new())
            } else {
                let rendered = print_object(state, obj);
                Err(state.type_mismatch("type expression", "a complete type", &rendered))
            }
        }
        Object::Variant(decl) => {
            let d = &state.variants[decl.index()];
            if d.params.is_empty() && d.var_param.is_none() {
                state.variant_type(*decl, Vec::new())
            } else {
                let rendered = print_object(state, obj);
                Err(state.type_mismatch("type expression", "a complete type", &rendered))
            }
        }
        Object::NewType(decl) => Ok(state.newtype_type(*decl)),
        Object::Enumeration(decl) => Ok(state.enum_type(*decl)),
        other => {
            let rendered = print_object(state, other);
            Err(state.type_mismatch("type expression", "a type", &rendered))
        }
    }
}

fn obj_as_size(state: &CompilerState, obj: &Object) -> CompileResult<u64> {
    if let Object::Value(v) = obj {
        let holder = &state.holders[v.index()];
        if let TypeKind::Integer { bits, signed } = state.types.get(holder.ty).kind {
            let value = crate::state::read_int_bytes(&holder.bytes, bits, signed);
            if value >= 0 {
                return Ok(u64::try_from(value).unwrap_or_default());
            }
        }
    }
    let rendered = print_object(state, obj);
    Err(state.type_mismatch("size parameter", "a non-negative integer", &rendered))
}

/// Element objects of a tuple-of-statics value (the canonical decomposed
/// form produced by the unifier).
fn tuple_value_types(state: &mut CompilerState, obj: &Object) -> CompileResult<Vec<TypeId>> {
    let elements = match obj {
        Object::Value(v) => {
            let ty = state.holders[v.index()].ty;
            crate::evaluator::tuple_value_elements(state, *v, ty)?
        }
        Object::MultiStatic(items) => items.clone(),
        other => vec![other.clone()],
    };
    let mut out = Vec::with_capacity(elements.len());
    for e in &elements {
        out.push(obj_as_type(state, e)?);
    }
    Ok(out)
}

/// Applies a type constructor head to concrete parameters; the inverse of
/// the unifier's struct decomposition.
pub fn construct_type(
    state: &mut CompilerState,
    constructor: &Object,
    args: &[Object],
) -> CompileResult<TypeId> {
    match constructor {
        Object::PrimOp(PrimOp::Pointer) => {
            arity(state, args, 1)?;
            let pointee = obj_as_type(state, &args[0])?;
            Ok(state.pointer_type(pointee))
        }
        Object::PrimOp(PrimOp::CodePointer) => {
            arity(state, args, 2)?;
            let arg_types = tuple_value_types(state, &args[0])?;
            let return_types = tuple_value_types(state, &args[1])?;
            let return_is_ref = vec![false; return_types.len()];
            Ok(state.code_pointer_type(arg_types, return_is_ref, return_types))
        }
        Object::PrimOp(PrimOp::ExternalCodePointer) => {
            arity(state, args, 3)?;
            let has_var_args = matches!(
                &args[0],
                Object::Value(v)
                    if state.holders[v.index()].bytes.first() == Some(&1)
            );
            let arg_types = tuple_value_types(state, &args[1])?;
            let return_types = tuple_value_types(state, &args[2])?;
            Ok(state.c_code_pointer_type(
                crate::ast::CallingConv::Default,
                arg_types,
                has_var_args,
                return_types.first().copied(),
            ))
        }
        Object::PrimOp(PrimOp::Array) => {
            arity(state, args, 2)?;
            let element = obj_as_type(state, &args[0])?;
            let size = obj_as_size(state, &args[1])?;
            Ok(state.array_type(element, size))
        }
        Object::PrimOp(PrimOp::Vec) => {
            arity(state, args, 2)?;
            let element = obj_as_type(state, &args[0])?;
            let size = obj_as_size(state, &args[1])?;
            Ok(state.vector_type(element, size))
        }
        Object::PrimOp(PrimOp::Tuple) => {
            let mut elements = Vec::with_capacity(args.len());
            for a in args {
                elements.push(obj_as_type(state, a)?);
            }
            Ok(state.tuple_type(elements))
        }
        Object::PrimOp(PrimOp::Union) => {
            let mut members = Vec::with_capacity(args.len());
            for a in args {
                members.push(obj_as_type(state, a)?);
            }
            Ok(state.union_type(members))
        }
        Object::PrimOp(PrimOp::Static) => {
            arity(state, args, 1)?;
            state.static_type(args[0].clone())
        }
        Object::Record(decl) => {
            check_decl_params(
                state,
                args.len(),
                state.records[decl.index()].params.len(),
                state.records[decl.index()].var_param.is_some(),
            )?;
            state.record_type(*decl, args.to_vec())
        }
        Object::Variant(decl) => {
            check_decl_params(
                state,
                args.len(),
                state.variants[decl.index()].params.len(),
                state.variants[decl.index()].var_param.is_some(),
            )?;
            state.variant_type(*decl, args.to_vec())
        }
        other => {
            let rendered = print_object(state, other);
            Err(state.type_mismatch("type construction", "a type constructor", &rendered))
        }
    }
}

fn arity(state: &CompilerState, args: &[Object], expected: usize) -> CompileResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(state.error(DiagnosticKind::TypeMismatch {
            context: "type constructor".to_owned(),
            expected: format!("{expected} parameters"),
            actual: format!("{}", args.len()),
        }))
    }
}

fn check_decl_params(
    state: &CompilerState,
    got: usize,
    fixed: usize,
    has_var: bool,
) -> CompileResult<()> {
    let ok = if has_var { got >= fixed } else { got == fixed };
    if ok {
        Ok(())
    } else {
        Err(state.error(DiagnosticKind::TypeMismatch {
            context: "type parameters".to_owned(),
            expected: format!("{}{fixed}", if has_var { "at least " } else { "" }),
            actual: format!("{got}"),
        }))
    }
}

//
// calls
//

pub fn compute_args_key(mpv: &MultiPValue) -> (Vec<TypeId>, Vec<Tempness>) {
    let mut key = Vec::with_capacity(mpv.len());
    let mut tempness = Vec::with_capacity(mpv.len());
    for pv in &mpv.0 {
        key.push(pv.ty);
        tempness.push(if pv.is_temp {
            Tempness::Rvalue
        } else {
            Tempness::Lvalue
        });
    }
    (key, tempness)
}

/// A multi-value from resolved return descriptors: by-ref returns are
/// lvalues, by-value returns are temporaries.
pub fn analyze_return(return_is_ref: &[bool], return_types: &[TypeId]) -> MultiPValue {
    MultiPValue(
        return_types
            .iter()
            .zip(return_is_ref)
            .map(|(&ty, &is_ref)| PValue {
                ty,
                is_temp: !is_ref,
            })
            .collect(),
    )
}

pub fn analyze_call_expr(
    state: &mut CompilerState,
    callable: ExprId,
    args: &[ExprId],
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    let Some(pv) = analyze_one(state, callable, env)? else {
        return Ok(None);
    };
    match state.types.get(pv.ty).kind.clone() {
        TypeKind::CodePointer {
            return_is_ref,
            return_types,
            ..
        } => {
            let Some(_) = analyze_multi(state, args, env)? else {
                return Ok(None);
            };
            return Ok(Some(analyze_return(&return_is_ref, &return_types)));
        }
        TypeKind::CCodePointer { return_type, .. } => {
            let Some(_) = analyze_multi(state, args, env)? else {
                return Ok(None);
            };
            return Ok(Some(MultiPValue(
                return_type
                    .into_iter()
                    .map(|ty| PValue { ty, is_temp: true })
                    .collect(),
            )));
        }
        TypeKind::Static(obj) => {
            return analyze_call_static(state, &obj, args, env);
        }
        _ => {}
    }
    // a plain value in call position goes through the `call` operator
    let location = state.expr_location(callable);
    let call_op = crate::desugar::prelude_ref(state, "call", location);
    let mut new_args: ExprList = smallvec![callable];
    new_args.extend(args.iter().copied());
    analyze_call_expr(state, call_op, &new_args, env)
}

fn analyze_call_static(
    state: &mut CompilerState,
    obj: &Object,
    args: &[ExprId],
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    match obj {
        Object::PrimOp(op) => {
            let Some(mpv) = analyze_multi(state, args, env)? else {
                return Ok(None);
            };
            analyze_prim_op(state, *op, &mpv).map(Some)
        }
        Object::Type(_)
        | Object::Record(_)
        | Object::Variant(_)
        | Object::Procedure(_)
        | Object::GlobalAlias(_) => {
            let mut dispatch_indices = Vec::new();
            let Some(mpv) = analyze_multi_args(state, args, env, &mut dispatch_indices)? else {
                return Ok(None);
            };
            if !dispatch_indices.is_empty() {
                return analyze_dispatch(state, obj, &mpv, &dispatch_indices);
            }
            let (args_key, args_tempness) = compute_args_key(&mpv);
            with_call_context(state, obj, &args_key, |state| {
                let Some(entry) = analyze_callable(state, obj, &args_key, &args_tempness)?
                else {
                    return Ok(None);
                };
                let e = &state.invoke_entries[entry.index()];
                if e.call_by_name {
                    analyze_call_by_name(state, entry, args, env)
                } else if e.analyzed {
                    Ok(Some(analyze_return(&e.return_is_ref, &e.return_types)))
                } else {
                    Ok(None)
                }
            })
        }
        other => {
            let rendered = print_object(state, other);
            Err(state.type_mismatch("call", "a callable", &rendered))
        }
    }
}

/// Pushes a compile-context frame around an overloaded call resolution.
pub fn with_call_context<T>(
    state: &mut CompilerState,
    callable: &Object,
    args_key: &[TypeId],
    f: impl FnOnce(&mut CompilerState) -> CompileResult<T>,
) -> CompileResult<T> {
    let rendered = print_object(state, callable);
    let args = args_key
        .iter()
        .map(|&t| state.type_name(t))
        .collect::<Vec<_>>()
        .join(", ");
    let location = state.location_stack.iter().rev().find_map(|l| *l);
    state.push_context(format!("{rendered}({args})"), location);
    let result = f(state);
    state.pop_context();
    result
}

/// Resolves `(callable, argsKey, argsTempness)` to an invoke entry and
/// drives its body analysis; `None` only when the entry is still being
/// analyzed further up the stack.
pub fn analyze_callable(
    state: &mut CompilerState,
    callable: &Object,
    args_key: &[TypeId],
    args_tempness: &[Tempness],
) -> CompileResult<Option<InvokeEntryId>> {
    let Some(entry) =
        crate::invoke::lookup_invoke_entry(state, callable, args_key, args_tempness)?
    else {
        let set = crate::invoke::lookup_invoke_set(state, callable, args_key)?;
        return Err(crate::invoke::match_failure_error(state, set));
    };
    let e = &state.invoke_entries[entry.index()];
    if e.call_by_name || e.analyzed || e.analyzing {
        return Ok(Some(entry));
    }
    analyze_code_body(state, entry)?;
    Ok(Some(entry))
}

/// `CallDefined?`: resolution without diagnostics.
pub fn analyze_is_defined(
    state: &mut CompilerState,
    callable: &Object,
    args_key: &[TypeId],
    args_tempness: &[Tempness],
) -> CompileResult<bool> {
    Ok(
        crate::invoke::lookup_invoke_entry(state, callable, args_key, args_tempness)?
            .is_some(),
    )
}

pub fn analyze_code_body(
    state: &mut CompilerState,
    entry: InvokeEntryId,
) -> CompileResult<()> {
    let (code, env, fixed_names, fixed_types, var_name, var_types, forwarded) = {
        let e = &state.invoke_entries[entry.index()];
        debug_assert!(!e.call_by_name);
        if e.ctor.is_some() {
            return Ok(());
        }
        let Some(code) = e.code.clone() else {
            return Err(state.eval_error("operation has no body"));
        };
        (
            code,
            e.env,
            e.fixed_arg_names.clone(),
            e.fixed_arg_types.clone(),
            e.var_arg_name,
            e.var_arg_types.clone(),
            e.forwarded_rvalue_flags.clone(),
        )
    };

    if let crate::ast::CodeBody::Llvm(_) = code.body {
        // inline-LLVM bodies must declare their returns; the body itself
        // belongs to the backend
        let (is_ref, types) =
            crate::evaluator::evaluate_return_specs(state, &code, env)?;
        let e = &mut state.invoke_entries[entry.index()];
        e.return_is_ref = is_ref;
        e.return_types = types;
        e.analyzed = true;
        return Ok(());
    }
    let crate::ast::CodeBody::Statements(body) = code.body else {
        return Err(state.eval_error("operation has no body"));
    };

    state.invoke_entries[entry.index()].analyzing = true;
    let result = (|| -> CompileResult<()> {
        let body_env = state.new_env(EnvParent::Env(env));
        for (i, name) in fixed_names.iter().enumerate() {
            state.add_local(
                body_env,
                *name,
                Object::PValue(PValue {
                    ty: fixed_types[i],
                    is_temp: forwarded.get(i).copied().unwrap_or(false),
                }),
            );
        }
        if let Some(var_name) = var_name {
            let n = fixed_names.len();
            let mpv = MultiPValue(
                var_types
                    .iter()
                    .enumerate()
                    .map(|(i, &ty)| PValue {
                        ty,
                        is_temp: forwarded.get(n + i).copied().unwrap_or(false),
                    })
                    .collect(),
            );
            state.add_local(body_env, var_name, Object::MultiPValue(mpv));
        }

        let mut ctx = AnalysisContext::default();
        if code.has_return_specs() {
            let (is_ref, types) =
                crate::evaluator::evaluate_return_specs(state, &code, env)?;
            // named return specs are visible in the body
            for (spec, &ty) in code.return_specs.iter().zip(&types) {
                if let Some(name) = spec.name {
                    state.add_local(
                        body_env,
                        name,
                        Object::PValue(PValue { ty, is_temp: false }),
                    );
                }
            }
            ctx.return_initialized = true;
            ctx.return_is_ref = is_ref;
            ctx.return_types = types;
        }

        let sa = analyze_statement(state, body, body_env, &mut ctx)?;
        if (sa == StatementAnalysis::Recursive || ctx.has_recursive_propagation)
            && !ctx.return_initialized
        {
            // try again once the outer fixed point makes progress
            return Ok(());
        }
        let e = &mut state.invoke_entries[entry.index()];
        if ctx.return_initialized {
            e.return_is_ref = ctx.return_is_ref;
            e.return_types = ctx.return_types;
        }
        e.analyzed = true;
        Ok(())
    })();
    state.invoke_entries[entry.index()].analyzing = false;
    result
}

pub fn analyze_call_by_name(
    state: &mut CompilerState,
    entry: InvokeEntryId,
    args: &[ExprId],
    env: EnvId,
) -> CompileResult<Option<MultiPValue>> {
    let (code, entry_env, fixed_names, var_name) = {
        let e = &state.invoke_entries[entry.index()];
        let Some(code) = e.code.clone() else {
            return Err(state.eval_error("call-by-name operation has no body"));
        };
        (code, e.env, e.fixed_arg_names.clone(), e.var_arg_name)
    };
    let crate::ast::CodeBody::Statements(body) = code.body else {
        return Err(state.eval_error("call-by-name operation has no body"));
    };
    let body_env = state.new_env(EnvParent::Env(entry_env));
    for (i, name) in fixed_names.iter().enumerate() {
        state.add_local(body_env, *name, Object::Expr(args[i], env));
    }
    if let Some(var_name) = var_name {
        let rest: ExprList = args[fixed_names.len()..].iter().copied().collect();
        state.add_local(body_env, var_name, Object::ExprList(rest, env));
    }
    let mut ctx = AnalysisContext::default();
    let sa = analyze_statement(state, body, body_env, &mut ctx)?;
    if !ctx.return_initialized {
        if sa == StatementAnalysis::Recursive || ctx.has_recursive_propagation {
            return Ok(None);
        }
        return Ok(Some(MultiPValue::default()));
    }
    Ok(Some(analyze_return(&ctx.return_is_ref, &ctx.return_types)))
}

/// Expands variant dispatch: for each member type of the variant at the
/// first dispatched position, the call is re-resolved with that member
/// substituted. Every member must resolve, and all branches must agree on
/// the result.
pub fn analyze_dispatch(
    state: &mut CompilerState,
    callable: &Object,
    args: &MultiPValue,
    dispatch_indices: &[usize],
) -> CompileResult<Option<MultiPValue>> {
    let Some((&index, rest)) = dispatch_indices.split_first() else {
        let (args_key, args_tempness) = compute_args_key(args);
        return with_call_context(state, callable, &args_key, |state| {
            let Some(entry) = analyze_callable(state, callable, &args_key, &args_tempness)?
            else {
                return Ok(None);
            };
            let e = &state.invoke_entries[entry.index()];
            if e.analyzed {
                Ok(Some(analyze_return(&e.return_is_ref, &e.return_types)))
            } else {
                Ok(None)
            }
        });
    };
    let pv = args.0[index];
    let TypeKind::Variant { .. } = state.types.get(pv.ty).kind else {
        let name = state.type_name(pv.ty);
        return Err(state.type_mismatch("dispatch operand", "a variant", &name));
    };
    let info = state.variant_info(pv.ty)?;
    if info.member_types.is_empty() {
        return Err(state.eval_error("dispatch on a variant with no members"));
    }
    let mut common: Option<MultiPValue> = None;
    for &member in &info.member_types {
        let mut branch_args = args.clone();
        branch_args.0[index] = PValue {
            ty: member,
            is_temp: pv.is_temp,
        };
        let Some(result) = analyze_dispatch(state, callable, &branch_args, rest)? else {
            return Ok(None);
        };
        match &common {
            None => common = Some(result),
            Some(existing) if *existing == result => {}
            Some(existing) => {
                return Err(state.error(DiagnosticKind::TypeMismatch {
                    context: "variant dispatch".to_owned(),
                    expected: format!("{} values in every branch", existing.len()),
                    actual: "branches with differing result types".to_owned(),
                }));
            }
        }
    }
    Ok(common)
}

//
// primitive op analysis
//

fn static_type_object(state: &CompilerState, ty: TypeId) -> Option<Object> {
    match &state.types.get(ty).kind {
        TypeKind::Static(obj) => Some((**obj).clone()),
        _ => None,
    }
}

fn arg_static_type(state: &mut CompilerState, args: &MultiPValue, index: usize) -> CompileResult<TypeId> {
    let obj = arg_static(state, args, index)?;
    obj_as_type(state, &obj)
}

fn arg_static(
    state: &mut CompilerState,
    args: &MultiPValue,
    index: usize,
) -> CompileResult<Object> {
    let Some(pv) = args.0.get(index) else {
        return Err(state.eval_error("too few arguments to primitive operation"));
    };
    static_type_object(state, pv.ty).ok_or_else(|| {
        let name = state.type_name(args.0[index].ty);
        state.type_mismatch("primitive operation", "a static argument", &name)
    })
}

fn numeric(state: &CompilerState, ty: TypeId) -> bool {
    matches!(
        state.types.get(ty).kind,
        TypeKind::Integer { .. } | TypeKind::Float { .. } | TypeKind::Bool | TypeKind::Enum(_)
    )
}

pub fn analyze_prim_op(
    state: &mut CompilerState,
    op: PrimOp,
    args: &MultiPValue,
) -> CompileResult<MultiPValue> {
    let temp = |ty| MultiPValue::single(PValue { ty, is_temp: true });
    let lvalue = |ty| MultiPValue::single(PValue { ty, is_temp: false });
    let need = |state: &CompilerState, n: usize| -> CompileResult<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(state.eval_error(format!(
                "primitive {} expects {n} arguments, got {}",
                op.name(),
                args.len()
            )))
        }
    };
    match op {
        PrimOp::TypeP
        | PrimOp::RecordP
        | PrimOp::VariantP
        | PrimOp::EnumP
        | PrimOp::IdentifierP
        | PrimOp::RecordWithFieldP
        | PrimOp::CallDefinedP => Ok(temp(state.core.bool_type)),
        PrimOp::TypeSize
        | PrimOp::TypeAlignment
        | PrimOp::TupleElementCount
        | PrimOp::UnionMemberCount
        | PrimOp::RecordFieldCount
        | PrimOp::VariantMemberIndex
        | PrimOp::VariantMemberCount
        | PrimOp::EnumMemberCount
        | PrimOp::IdentifierSize => Ok(temp(state.core.size_type)),
        PrimOp::BoolNot => {
            need(state, 1)?;
            Ok(temp(state.core.bool_type))
        }
        PrimOp::NumericEqualsP | PrimOp::NumericLesserP => {
            need(state, 2)?;
            for pv in &args.0 {
                if !numeric(state, pv.ty) {
                    let name = state.type_name(pv.ty);
                    return Err(state.type_mismatch("numeric comparison", "a numeric type", &name));
                }
            }
            Ok(temp(state.core.bool_type))
        }
        PrimOp::NumericAdd
        | PrimOp::NumericSubtract
        | PrimOp::NumericMultiply
        | PrimOp::NumericDivide => {
            need(state, 2)?;
            let (a, b) = (args.0[0].ty, args.0[1].ty);
            if a != b || !numeric(state, a) {
                return Err(state.error(DiagnosticKind::TypeMismatch {
                    context: "numeric arithmetic".to_owned(),
                    expected: state.type_name(a),
                    actual: state.type_name(b),
                }));
            }
            Ok(temp(a))
        }
        PrimOp::NumericNegate => {
            need(state, 1)?;
            Ok(temp(args.0[0].ty))
        }
        PrimOp::IntegerRemainder
        | PrimOp::IntegerBitwiseAnd
        | PrimOp::IntegerBitwiseOr
        | PrimOp::IntegerBitwiseXor => {
            need(state, 2)?;
            let (a, b) = (args.0[0].ty, args.0[1].ty);
            if a != b || !matches!(state.types.get(a).kind, TypeKind::Integer { .. }) {
                return Err(state.error(DiagnosticKind::TypeMismatch {
                    context: "integer operation".to_owned(),
                    expected: state.type_name(a),
                    actual: state.type_name(b),
                }));
            }
            Ok(temp(a))
        }
        PrimOp::IntegerShiftLeft | PrimOp::IntegerShiftRight => {
            need(state, 2)?;
            Ok(temp(args.0[0].ty))
        }
        PrimOp::IntegerBitwiseNot => {
            need(state, 1)?;
            Ok(temp(args.0[0].ty))
        }
        PrimOp::NumericConvert => {
            need(state, 2)?;
            let dest = arg_static_type(state, args, 0)?;
            Ok(temp(dest))
        }
        PrimOp::AddressOf => {
            need(state, 1)?;
            let ty = state.pointer_type(args.0[0].ty);
            Ok(temp(ty))
        }
        PrimOp::PointerDereference => {
            need(state, 1)?;
            match state.types.get(args.0[0].ty).kind.clone() {
                TypeKind::Pointer(pointee) => Ok(lvalue(pointee)),
                _ => {
                    let name = state.type_name(args.0[0].ty);
                    Err(state.type_mismatch("dereference", "a pointer", &name))
                }
            }
        }
        PrimOp::PointerEqualsP | PrimOp::PointerLesserP => Ok(temp(state.core.bool_type)),
        PrimOp::PointerOffset => {
            need(state, 2)?;
            Ok(temp(args.0[0].ty))
        }
        PrimOp::PointerToInt => Ok(temp(state.core.size_type)),
        PrimOp::IntToPointer => {
            need(state, 2)?;
            let pointee = arg_static_type(state, args, 0)?;
            let ty = state.pointer_type(pointee);
            Ok(temp(ty))
        }
        PrimOp::Pointer
        | PrimOp::CodePointer
        | PrimOp::ExternalCodePointer
        | PrimOp::Array
        | PrimOp::Vec
        | PrimOp::Tuple
        | PrimOp::Union
        | PrimOp::Static => Err(state.eval_error(format!(
            "type constructor {} is used with indexing, not a call",
            op.name()
        ))),
        PrimOp::ArrayRef => {
            need(state, 2)?;
            match state.types.get(args.0[0].ty).kind.clone() {
                TypeKind::Array(element, _) | TypeKind::Vector(element, _) => Ok(lvalue(element)),
                _ => {
                    let name = state.type_name(args.0[0].ty);
                    Err(state.type_mismatch("array reference", "an array", &name))
                }
            }
        }
        PrimOp::TupleRef => {
            need(state, 2)?;
            let TypeKind::Tuple(elements) = state.types.get(args.0[0].ty).kind.clone() else {
                let name = state.type_name(args.0[0].ty);
                return Err(state.type_mismatch("tuple reference", "a tuple", &name));
            };
            let index_obj = arg_static(state, args, 1)?;
            let index = obj_as_size(state, &index_obj)? as usize;
            let Some(&element) = elements.get(index) else {
                return Err(state.eval_error(format!("tuple index {index} out of range")));
            };
            Ok(lvalue(element))
        }
        PrimOp::TupleElements => {
            need(state, 1)?;
            let TypeKind::Tuple(elements) = state.types.get(args.0[0].ty).kind.clone() else {
                let name = state.type_name(args.0[0].ty);
                return Err(state.type_mismatch("tuple elements", "a tuple", &name));
            };
            Ok(MultiPValue(
                elements
                    .into_iter()
                    .map(|ty| PValue { ty, is_temp: false })
                    .collect(),
            ))
        }
        PrimOp::RecordFieldRef | PrimOp::RecordFieldRefByName => {
            need(state, 2)?;
            let info = state.record_info(args.0[0].ty)?;
            let index = match op {
                PrimOp::RecordFieldRef => {
                    let index_obj = arg_static(state, args, 1)?;
                    obj_as_size(state, &index_obj)? as usize
                }
                _ => {
                    let Object::Ident(name) = arg_static(state, args, 1)? else {
                        return Err(state.eval_error("record field name must be an identifier"));
                    };
                    match info.field_names.iter().position(|&f| f == name) {
                        Some(i) => i,
                        None => {
                            let rendered = state.interner.get(name).to_owned();
                            let type_name = state.type_name(args.0[0].ty);
                            return Err(state.eval_error(format!(
                                "{type_name} has no field named {rendered}"
                            )));
                        }
                    }
                }
            };
            let Some(&field) = info.field_types.get(index) else {
                return Err(state.eval_error(format!("field index {index} out of range")));
            };
            Ok(lvalue(field))
        }
        PrimOp::RecordFieldName | PrimOp::EnumMemberName => {
            need(state, 2)?;
            let name = match op {
                PrimOp::RecordFieldName => {
                    let ty = arg_static_type(state, args, 0)?;
                    let info = state.record_info(ty)?;
                    let index_obj = arg_static(state, args, 1)?;
                    let index = obj_as_size(state, &index_obj)? as usize;
                    *info.field_names.get(index).ok_or_else(|| {
                        state.eval_error(format!("field index {index} out of range"))
                    })?
                }
                _ => {
                    let ty = arg_static_type(state, args, 0)?;
                    let TypeKind::Enum(decl) = state.types.get(ty).kind else {
                        let name = state.type_name(ty);
                        return Err(state.type_mismatch("enum member name", "an enum", &name));
                    };
                    let index_obj = arg_static(state, args, 1)?;
                    let index = obj_as_size(state, &index_obj)? as usize;
                    *state.enums[decl.index()].members.get(index).ok_or_else(|| {
                        state.eval_error(format!("enum member index {index} out of range"))
                    })?
                }
            };
            let pv = static_pvalue(state, Object::Ident(name))?;
            Ok(MultiPValue::single(pv))
        }
        PrimOp::VariantTag => {
            need(state, 1)?;
            Ok(temp(state.core.cint))
        }
        PrimOp::VariantPayload => {
            need(state, 2)?;
            let info = state.variant_info(args.0[0].ty)?;
            let index_obj = arg_static(state, args, 1)?;
            let index = obj_as_size(state, &index_obj)? as usize;
            let Some(&member) = info.member_types.get(index) else {
                return Err(state.eval_error(format!("variant member {index} out of range")));
            };
            Ok(lvalue(member))
        }
        PrimOp::StaticName | PrimOp::ModuleName => {
            need(state, 1)?;
            let obj = arg_static(state, args, 0)?;
            let rendered = match op {
                PrimOp::StaticName => print_object(state, &obj),
                _ => match crate::object::object_module(state, &obj) {
                    Some(m) => state.modules[m.index()].name.clone(),
                    None => String::new(),
                },
            };
            let ident = state.intern(&rendered);
            let pv = static_pvalue(state, Object::Ident(ident))?;
            Ok(MultiPValue::single(pv))
        }
        PrimOp::StaticIntegers => {
            need(state, 1)?;
            let count_obj = arg_static(state, args, 0)?;
            let count = obj_as_size(state, &count_obj)?;
            let mut out = MultiPValue::default();
            for i in 0..count {
                let holder = state.size_holder(i);
                out.0.push(static_pvalue(state, Object::Value(holder))?);
            }
            Ok(out)
        }
        PrimOp::EnumToInt => {
            need(state, 1)?;
            Ok(temp(state.core.cint))
        }
        PrimOp::IntToEnum => {
            need(state, 2)?;
            let dest = arg_static_type(state, args, 0)?;
            Ok(temp(dest))
        }
        PrimOp::IdentifierConcat | PrimOp::IdentifierSlice => {
            // the result identifier is computed during analysis; both
            // prims are value-free
            let result = crate::evaluator::eval_identifier_prim(state, op, args)?;
            let pv = static_pvalue(state, Object::Ident(result))?;
            Ok(MultiPValue::single(pv))
        }
    }
}

//
// lambdas
//

/// Converts a lambda on first touch. A lambda with free variables becomes
/// a capture record plus a `call` overload on that record; a stateless
/// lambda becomes a plain procedure.
pub fn initialize_lambda(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<ExprId> {
    if let Some(converted) = state.lambda_converted.get(&expr) {
        return Ok(*converted);
    }
    let ExprKind::Lambda(lambda) = state.expr(expr).kind.clone() else {
        unreachable!("initialize_lambda on non-lambda");
    };
    let location = state.expr_location(expr);
    let module = state
        .env_module(env)
        .ok_or_else(|| state.eval_error("lambda outside a module"))?;

    let mut bound: Vec<StrId> = lambda.formal_args.iter().map(|a| a.name).collect();
    if let Some(var_arg) = &lambda.var_arg {
        bound.push(var_arg.name);
    }
    let mut free = Vec::new();
    collect_free_vars(state, lambda.body, &mut bound, env, &mut free)?;

    let lambda_name = state.intern(&format!("%lambda{}", expr.index()));
    let code = crate::ast::Code {
        pattern_vars: Vec::new(),
        predicate: None,
        formal_args: lambda.formal_args.clone(),
        var_arg: lambda.var_arg.clone(),
        return_specs: Vec::new(),
        var_return_spec: None,
        body: crate::ast::CodeBody::Statements(lambda.body),
        location,
    };

    let converted = if free.is_empty() {
        // a plain anonymous procedure
        let proc_id = crate::ids::ProcId::new(state.procedures.len());
        state.procedures.push(ProcedureDecl {
            module,
            name: lambda_name,
            visibility: Visibility::Private,
            overloads: Vec::new(),
            interface: None,
            location,
        });
        let target = state.add_expr(
            ExprKind::ObjectExpr(Object::Procedure(proc_id)),
            location,
        );
        let module_env = state.modules[module.index()].env;
        let overload_id = crate::ids::OverloadId::new(state.overloads.len());
        state.overloads.push(OverloadDecl {
            module,
            target,
            code,
            call_by_name: false,
            is_inline: false,
            env: module_env,
            patterns: OverloadPatterns::NotInitialized,
            location,
        });
        state.procedures[proc_id.index()].overloads.push(overload_id);
        state.add_expr(ExprKind::ObjectExpr(Object::Procedure(proc_id)), location)
    } else {
        convert_capturing_lambda(state, &free, lambda.capture, code, module, location)?
    };
    state.lambda_converted.insert(expr, converted);
    Ok(converted)
}

/// Builds the capture record and its `call` overload, and returns the
/// construction expression `%LambdaN(captures...)`.
fn convert_capturing_lambda(
    state: &mut CompilerState,
    free: &[StrId],
    capture: LambdaCapture,
    mut code: crate::ast::Code,
    module: crate::ids::ModuleId,
    location: Option<crate::source::Location>,
) -> CompileResult<ExprId> {
    let _ = capture; // captures are by value at compile time
    let module_env = state.modules[module.index()].env;
    let record_name = state.intern(&format!("%Lambda{}", state.records.len()));

    // record %LambdaN[C0, C1, ...] (fv0: C0, fv1: C1, ...)
    let mut params = Vec::with_capacity(free.len());
    let mut fields = Vec::with_capacity(free.len());
    for (i, &fv) in free.iter().enumerate() {
        let param = state.intern(&format!("%C{i}"));
        params.push(param);
        let ty = state.add_expr(ExprKind::NameRef(param), location);
        fields.push(crate::decls::RecordField {
            name: fv,
            ty,
            location,
        });
    }
    let record_id = crate::ids::RecordId::new(state.records.len());
    state.records.push(RecordDecl {
        module,
        name: record_name,
        visibility: Visibility::Private,
        params,
        var_param: None,
        body: RecordBody::Fields(fields),
        overloads: Vec::new(),
        env: module_env,
        location,
    });

    // overload call(%closure: %LambdaN[..Ts], <formals>) { <fv bindings>; body }
    let closure_name = state.intern("%closure");
    let ts = state.intern("%Ts");
    let record_obj = state.add_expr(
        ExprKind::ObjectExpr(Object::Record(record_id)),
        location,
    );
    let ts_ref = state.add_expr(ExprKind::NameRef(ts), location);
    let ts_unpack = state.add_expr(ExprKind::Unpack(ts_ref), location);
    let closure_ty = state.add_expr(
        ExprKind::Indexing {
            expr: record_obj,
            args: smallvec![ts_unpack],
        },
        location,
    );
    let mut formal_args = vec![crate::ast::FormalArg {
        name: closure_name,
        ty: Some(closure_ty),
        tempness: Tempness::Forward,
        as_type: None,
        location,
    }];
    formal_args.append(&mut code.formal_args);

    // alias each free var to a field of the closure
    let crate::ast::CodeBody::Statements(original_body) = code.body else {
        unreachable!("lambda bodies are statements");
    };
    let mut statements = Vec::with_capacity(free.len() + 1);
    for &fv in free {
        let closure_ref = state.add_expr(ExprKind::NameRef(closure_name), location);
        let field = state.add_expr(
            ExprKind::FieldRef {
                expr: closure_ref,
                name: fv,
            },
            location,
        );
        statements.push(state.add_stmt(
            StmtKind::Binding {
                kind: BindingKind::Alias,
                args: vec![crate::ast::FormalArg {
                    name: fv,
                    ty: None,
                    tempness: Tempness::DontCare,
                    as_type: None,
                    location,
                }],
                values: smallvec![field],
            },
            location,
        ));
    }
    statements.push(original_body);
    let body = state.add_stmt(StmtKind::Block(statements), location);

    let call_target = crate::desugar::prelude_ref(state, "call", location);
    let overload_id = crate::ids::OverloadId::new(state.overloads.len());
    state.overloads.push(OverloadDecl {
        module,
        target: call_target,
        code: crate::ast::Code {
            pattern_vars: vec![crate::ast::PatternVar {
                is_multi: true,
                name: ts,
                location,
            }],
            predicate: None,
            formal_args,
            var_arg: code.var_arg,
            return_specs: code.return_specs,
            var_return_spec: code.var_return_spec,
            body: crate::ast::CodeBody::Statements(body),
            location,
        },
        call_by_name: false,
        is_inline: false,
        env: module_env,
        patterns: OverloadPatterns::NotInitialized,
        location,
    });
    // attach to the prelude `call` procedure
    let prelude = state.prelude_module.expect("prelude loaded");
    let call_name = state.intern("call");
    let Some(Object::Procedure(call_proc)) =
        state.modules[prelude.index()].globals.get(&call_name).cloned()
    else {
        return Err(state.eval_error("prelude does not define the call operator"));
    };
    state.procedures[call_proc.index()]
        .overloads
        .insert(0, overload_id);

    // the conversion: construct the closure record from the captures
    let ctor = state.add_expr(ExprKind::ObjectExpr(Object::Record(record_id)), location);
    let mut capture_args = ExprList::new();
    for &fv in free {
        capture_args.push(state.add_expr(ExprKind::NameRef(fv), location));
    }
    Ok(state.add_expr(
        ExprKind::Call {
            expr: ctor,
            args: capture_args,
        },
        location,
    ))
}

/// Names referenced by the body that are not bound inside it and resolve
/// to run-time locals of the enclosing scope.
fn collect_free_vars(
    state: &mut CompilerState,
    stmt: StmtId,
    bound: &mut Vec<StrId>,
    env: EnvId,
    free: &mut Vec<StrId>,
) -> CompileResult<()> {
    let kind = state.stmt(stmt).kind.clone();
    let depth = bound.len();
    match kind {
        StmtKind::Block(statements) => {
            for s in statements {
                collect_free_vars(state, s, bound, env, free)?;
            }
        }
        StmtKind::Binding { args, values, .. } => {
            for v in &values {
                collect_free_vars_expr(state, *v, bound, env, free)?;
            }
            for a in &args {
                bound.push(a.name);
            }
            return Ok(()); // bindings stay visible for the rest of the block
        }
        StmtKind::Assignment { left, right } | StmtKind::InitAssignment { left, right } => {
            for e in left.iter().chain(right.iter()) {
                collect_free_vars_expr(state, *e, bound, env, free)?;
            }
        }
        StmtKind::VariadicAssignment { left, right, .. } => {
            collect_free_vars_expr(state, left, bound, env, free)?;
            collect_free_vars_expr(state, right, bound, env, free)?;
        }
        StmtKind::Return { values, .. } | StmtKind::EvalStatement { args: values } => {
            for e in &values {
                collect_free_vars_expr(state, *e, bound, env, free)?;
            }
        }
        StmtKind::If {
            condition_statements,
            condition,
            then_part,
            else_part,
        } => {
            for s in condition_statements {
                collect_free_vars(state, s, bound, env, free)?;
            }
            collect_free_vars_expr(state, condition, bound, env, free)?;
            collect_free_vars(state, then_part, bound, env, free)?;
            if let Some(e) = else_part {
                collect_free_vars(state, e, bound, env, free)?;
            }
        }
        StmtKind::Switch {
            expr_statements,
            expr,
            case_blocks,
            default_case,
        } => {
            for s in expr_statements {
                collect_free_vars(state, s, bound, env, free)?;
            }
            collect_free_vars_expr(state, expr, bound, env, free)?;
            for cb in case_blocks {
                for l in &cb.labels {
                    collect_free_vars_expr(state, *l, bound, env, free)?;
                }
                collect_free_vars(state, cb.body, bound, env, free)?;
            }
            if let Some(d) = default_case {
                collect_free_vars(state, d, bound, env, free)?;
            }
        }
        StmtKind::ExprStatement(e) => collect_free_vars_expr(state, e, bound, env, free)?,
        StmtKind::While {
            condition_statements,
            condition,
            body,
        } => {
            for s in condition_statements {
                collect_free_vars(state, s, bound, env, free)?;
            }
            collect_free_vars_expr(state, condition, bound, env, free)?;
            collect_free_vars(state, body, bound, env, free)?;
        }
        StmtKind::For {
            variables,
            expr,
            body,
        } => {
            collect_free_vars_expr(state, expr, bound, env, free)?;
            bound.extend(variables);
            collect_free_vars(state, body, bound, env, free)?;
        }
        StmtKind::Try {
            try_block,
            catch_blocks,
        } => {
            collect_free_vars(state, try_block, bound, env, free)?;
            for c in catch_blocks {
                bound.push(c.exception_var);
                collect_free_vars(state, c.body, bound, env, free)?;
            }
        }
        StmtKind::Throw { expr } => {
            if let Some(e) = expr {
                collect_free_vars_expr(state, e, bound, env, free)?;
            }
        }
        StmtKind::StaticFor {
            variable,
            values,
            body,
        } => {
            for v in &values {
                collect_free_vars_expr(state, *v, bound, env, free)?;
            }
            bound.push(variable);
            collect_free_vars(state, body, bound, env, free)?;
        }
        StmtKind::Finally(body) | StmtKind::OnError(body) | StmtKind::ForeignStatement { body, .. } => {
            collect_free_vars(state, body, bound, env, free)?;
        }
        StmtKind::StaticAssert { condition, message } => {
            collect_free_vars_expr(state, condition, bound, env, free)?;
            for m in &message {
                collect_free_vars_expr(state, *m, bound, env, free)?;
            }
        }
        StmtKind::Label(_)
        | StmtKind::Goto(_)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Unreachable => {}
    }
    bound.truncate(depth);
    Ok(())
}

fn collect_free_vars_expr(
    state: &mut CompilerState,
    expr: ExprId,
    bound: &mut Vec<StrId>,
    env: EnvId,
    free: &mut Vec<StrId>,
) -> CompileResult<()> {
    let kind = state.expr(expr).kind.clone();
    match kind {
        ExprKind::NameRef(name) => {
            if bound.contains(&name) || free.contains(&name) {
                return Ok(());
            }
            if let Some(obj) = state.lookup_env(env, name)? {
                if matches!(
                    obj,
                    Object::PValue(_)
                        | Object::MultiPValue(_)
                        | Object::EValue(_)
                        | Object::MultiEValue(_)
                ) {
                    free.push(name);
                }
            }
        }
        ExprKind::Tuple(args) | ExprKind::Paren(args) | ExprKind::VariadicOp { exprs: args, .. } => {
            for a in &args {
                collect_free_vars_expr(state, *a, bound, env, free)?;
            }
        }
        ExprKind::Indexing { expr: base, args } | ExprKind::Call { expr: base, args } => {
            collect_free_vars_expr(state, base, bound, env, free)?;
            for a in &args {
                collect_free_vars_expr(state, *a, bound, env, free)?;
            }
        }
        ExprKind::FieldRef { expr: base, .. } | ExprKind::StaticIndexing { expr: base, .. } => {
            collect_free_vars_expr(state, base, bound, env, free)?;
        }
        ExprKind::And { left, right } | ExprKind::Or { left, right } => {
            collect_free_vars_expr(state, left, bound, env, free)?;
            collect_free_vars_expr(state, right, bound, env, free)?;
        }
        ExprKind::Lambda(inner) => {
            let depth = bound.len();
            for a in &inner.formal_args {
                bound.push(a.name);
            }
            collect_free_vars(state, inner.body, bound, env, free)?;
            bound.truncate(depth);
        }
        ExprKind::Unpack(inner)
        | ExprKind::StaticExpr(inner)
        | ExprKind::DispatchExpr(inner)
        | ExprKind::EvalExpr { args: inner } => {
            collect_free_vars_expr(state, inner, bound, env, free)?;
        }
        _ => {}
    }
    Ok(())
}

//
// statements
//

pub fn analyze_statement(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
    ctx: &mut AnalysisContext,
) -> CompileResult<StatementAnalysis> {
    let location = state.stmt(stmt).location;
    state.push_location(location);
    let result = analyze_statement_inner(state, stmt, env, ctx);
    state.pop_location();
    result
}

fn combine(a: StatementAnalysis, b: StatementAnalysis) -> StatementAnalysis {
    use StatementAnalysis as SA;
    match (a, b) {
        (SA::Recursive, _) | (_, SA::Recursive) => SA::Recursive,
        (SA::Terminated, SA::Terminated) => SA::Terminated,
        _ => SA::Fallthrough,
    }
}

fn analyze_statement_inner(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
    ctx: &mut AnalysisContext,
) -> CompileResult<StatementAnalysis> {
    use StatementAnalysis as SA;
    let kind = state.stmt(stmt).kind.clone();
    match kind {
        StmtKind::Block(statements) => {
            let mut env = env;
            for s in statements {
                let inner_kind = state.stmt(s).kind.clone();
                match inner_kind {
                    StmtKind::Label(_) => {}
                    StmtKind::Binding { .. } => match analyze_binding(state, s, env, ctx)? {
                        Some(new_env) => env = new_env,
                        None => return Ok(SA::Recursive),
                    },
                    _ => {
                        let sa = analyze_statement(state, s, env, ctx)?;
                        if sa == SA::Terminated {
                            return Ok(SA::Terminated);
                        }
                        if sa == SA::Recursive {
                            ctx.has_recursive_propagation = true;
                        }
                    }
                }
            }
            Ok(SA::Fallthrough)
        }
        StmtKind::Label(_) => Ok(SA::Fallthrough),
        StmtKind::Binding { .. } => {
            Err(state.eval_error("binding outside a block"))
        }
        StmtKind::Assignment { left, right } => {
            let Some(lhs) = analyze_multi(state, &left, env)? else {
                return Ok(SA::Recursive);
            };
            let Some(rhs) = analyze_multi(state, &right, env)? else {
                return Ok(SA::Recursive);
            };
            if lhs.len() != rhs.len() {
                return Err(state.error(DiagnosticKind::TypeMismatch {
                    context: "assignment".to_owned(),
                    expected: format!("{} values", lhs.len()),
                    actual: format!("{} values", rhs.len()),
                }));
            }
            for pv in &lhs.0 {
                if pv.is_temp {
                    return Err(state.eval_error("cannot assign to a temporary value"));
                }
            }
            Ok(SA::Fallthrough)
        }
        StmtKind::InitAssignment { left, right } => {
            let Some(lhs) = analyze_multi(state, &left, env)? else {
                return Ok(SA::Recursive);
            };
            let Some(rhs) = analyze_multi(state, &right, env)? else {
                return Ok(SA::Recursive);
            };
            if lhs.len() != rhs.len() {
                return Err(state.error(DiagnosticKind::TypeMismatch {
                    context: "initialization".to_owned(),
                    expected: format!("{} values", lhs.len()),
                    actual: format!("{} values", rhs.len()),
                }));
            }
            for (l, r) in lhs.0.iter().zip(&rhs.0) {
                if l.ty != r.ty {
                    return Err(state.error(DiagnosticKind::TypeMismatch {
                        context: "initialization".to_owned(),
                        expected: state.type_name(l.ty),
                        actual: state.type_name(r.ty),
                    }));
                }
            }
            Ok(SA::Fallthrough)
        }
        StmtKind::VariadicAssignment { .. } => {
            let desugared = crate::desugar::desugar_variadic_assignment(state, stmt);
            analyze_statement(state, desugared, env, ctx)
        }
        StmtKind::Goto(_) => Ok(SA::Terminated),
        StmtKind::Return { kind, values, .. } => {
            let Some(mpv) = analyze_multi(state, &values, env)? else {
                return Ok(SA::Recursive);
            };
            let mut is_ref = Vec::with_capacity(mpv.len());
            for pv in &mpv.0 {
                let by_ref = match kind {
                    ReturnKind::Value => false,
                    ReturnKind::Ref => {
                        if pv.is_temp {
                            return Err(state
                                .eval_error("cannot return a temporary value by reference"));
                        }
                        true
                    }
                    ReturnKind::Forward => !pv.is_temp,
                };
                is_ref.push(by_ref);
            }
            let types: Vec<TypeId> = mpv.0.iter().map(|pv| pv.ty).collect();
            if ctx.return_initialized {
                if ctx.return_types != types || ctx.return_is_ref != is_ref {
                    return Err(state.error(DiagnosticKind::TypeMismatch {
                        context: "return".to_owned(),
                        expected: format!(
                            "({})",
                            ctx.return_types
                                .iter()
                                .map(|&t| state.type_name(t))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        actual: format!(
                            "({})",
                            types
                                .iter()
                                .map(|&t| state.type_name(t))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    }));
                }
            } else {
                ctx.return_initialized = true;
                ctx.return_is_ref = is_ref;
                ctx.return_types = types;
            }
            Ok(SA::Terminated)
        }
        StmtKind::If {
            condition_statements,
            condition,
            then_part,
            else_part,
        } => {
            let mut env = env;
            for s in condition_statements {
                match analyze_binding(state, s, env, ctx)? {
                    Some(new_env) => env = new_env,
                    None => return Ok(SA::Recursive),
                }
            }
            if analyze_one(state, condition, env)?.is_none() {
                return Ok(SA::Recursive);
            }
            let then_sa = analyze_statement(state, then_part, env, ctx)?;
            let else_sa = match else_part {
                Some(e) => analyze_statement(state, e, env, ctx)?,
                None => SA::Fallthrough,
            };
            Ok(combine(then_sa, else_sa))
        }
        StmtKind::Switch { .. } => {
            let desugared = crate::desugar::desugar_switch(state, stmt);
            analyze_statement(state, desugared, env, ctx)
        }
        StmtKind::ExprStatement(e) => {
            if analyze_expr(state, e, env)?.is_none() {
                return Ok(SA::Recursive);
            }
            Ok(SA::Fallthrough)
        }
        StmtKind::While {
            condition_statements,
            condition,
            body,
        } => {
            let mut env = env;
            for s in condition_statements {
                match analyze_binding(state, s, env, ctx)? {
                    Some(new_env) => env = new_env,
                    None => return Ok(SA::Recursive),
                }
            }
            if analyze_one(state, condition, env)?.is_none() {
                return Ok(SA::Recursive);
            }
            let sa = analyze_statement(state, body, env, ctx)?;
            if sa == SA::Recursive {
                ctx.has_recursive_propagation = true;
            }
            Ok(SA::Fallthrough)
        }
        StmtKind::Break | StmtKind::Continue => Ok(SA::Terminated),
        StmtKind::For { .. } => {
            let desugared = crate::desugar::desugar_for_statement(state, stmt);
            analyze_statement(state, desugared, env, ctx)
        }
        StmtKind::ForeignStatement { env: foreign_env, body } => {
            analyze_statement(state, body, foreign_env, ctx)
        }
        StmtKind::Try {
            try_block,
            catch_blocks,
        } => {
            let try_sa = analyze_statement(state, try_block, env, ctx)?;
            let catch_chain = match state.desugared_stmts.get(&stmt) {
                Some(d) => *d,
                None => {
                    let d = crate::desugar::desugar_catch_blocks(state, &catch_blocks)?;
                    state.desugared_stmts.insert(stmt, d);
                    d
                }
            };
            let catch_sa = analyze_statement(state, catch_chain, env, ctx)?;
            Ok(combine(try_sa, catch_sa))
        }
        StmtKind::Throw { expr } => {
            if let Some(e) = expr {
                if analyze_one(state, e, env)?.is_none() {
                    return Ok(SA::Recursive);
                }
            }
            Ok(SA::Terminated)
        }
        StmtKind::StaticFor {
            variable, values, ..
        } => {
            let Some(mpv) = analyze_multi(state, &values, env)? else {
                return Ok(SA::Recursive);
            };
            let clones = initialize_static_for_clones(state, stmt, mpv.len());
            let mut recursive = false;
            for (i, clone) in clones.into_iter().enumerate() {
                let env2 = state.new_env(EnvParent::Env(env));
                state.add_local(env2, variable, Object::PValue(mpv.0[i]));
                let sa = analyze_statement(state, clone, env2, ctx)?;
                recursive = recursive || sa == SA::Recursive;
            }
            Ok(if recursive { SA::Recursive } else { SA::Fallthrough })
        }
        StmtKind::Finally(body) | StmtKind::OnError(body) => {
            analyze_statement(state, body, env, ctx)?;
            Ok(SA::Fallthrough)
        }
        StmtKind::Unreachable => Ok(SA::Terminated),
        StmtKind::EvalStatement { .. } => {
            let statements = crate::desugar::desugar_eval_statement(state, stmt, env)?;
            let mut result = SA::Fallthrough;
            for s in statements {
                let sa = analyze_statement(state, s, env, ctx)?;
                result = combine(result, sa);
                if sa == SA::Terminated {
                    return Ok(SA::Terminated);
                }
            }
            Ok(result)
        }
        StmtKind::StaticAssert { condition, message } => {
            crate::evaluator::execute_static_assert(state, condition, &message, env)?;
            Ok(SA::Fallthrough)
        }
    }
}

/// Clones a static-for body once per value, cached on the statement node.
pub fn initialize_static_for_clones(
    state: &mut CompilerState,
    stmt: StmtId,
    count: usize,
) -> Vec<StmtId> {
    if let Some(clones) = state.static_for_clones.get(&stmt) {
        if clones.len() == count {
            return clones.clone();
        }
    }
    let StmtKind::StaticFor { body, .. } = state.stmt(stmt).kind.clone() else {
        unreachable!("static-for clones of a non-static-for");
    };
    let clones: Vec<StmtId> = (0..count)
        .map(|_| crate::clone::clone_stmt(state, body))
        .collect();
    state.static_for_clones.insert(stmt, clones.clone());
    clones
}

/// Analyzes a binding statement, producing the extended environment, or
/// `None` on the recursion sentinel.
pub fn analyze_binding(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
    ctx: &mut AnalysisContext,
) -> CompileResult<Option<EnvId>> {
    let _ = ctx;
    let StmtKind::Binding { kind, args, values } = state.stmt(stmt).kind.clone() else {
        unreachable!("analyze_binding on non-binding");
    };
    if kind == BindingKind::Alias {
        if args.len() != 1 || values.len() != 1 {
            return Err(state.eval_error("alias bindings take exactly one name and value"));
        }
        let env2 = state.new_env(EnvParent::Env(env));
        state.add_local(env2, args[0].name, Object::Expr(values[0], env));
        return Ok(Some(env2));
    }
    let Some(mpv) = analyze_multi(state, &values, env)? else {
        return Ok(None);
    };
    if mpv.len() != args.len() {
        return Err(state.error(DiagnosticKind::TypeMismatch {
            context: "binding".to_owned(),
            expected: format!("{} values", args.len()),
            actual: format!("{} values", mpv.len()),
        }));
    }
    let env2 = state.new_env(EnvParent::Env(env));
    for (arg, pv) in args.iter().zip(&mpv.0) {
        if let Some(ty_expr) = arg.ty {
            let declared = crate::evaluator::evaluate_type(state, ty_expr, env)?;
            if declared != pv.ty {
                return Err(state.error_at(
                    DiagnosticKind::TypeMismatch {
                        context: "binding".to_owned(),
                        expected: state.type_name(declared),
                        actual: state.type_name(pv.ty),
                    },
                    arg.location,
                ));
            }
        }
        let is_temp = match kind {
            BindingKind::Forward => pv.is_temp,
            _ => false,
        };
        state.add_local(
            env2,
            arg.name,
            Object::PValue(PValue {
                ty: pv.ty,
                is_temp,
            }),
        );
    }
    Ok(Some(env2))
}

//
// declaration analysis shared with the evaluator
//

impl CompilerState {
    /// Field names, types, and offsets of a record type, computed once.
    pub fn record_info(&mut self, ty: TypeId) -> CompileResult<RecordInfo> {
        if let Some(info) = &self.types.get(ty).record_info {
            return Ok(info.clone());
        }
        let TypeKind::Record { decl, params } = self.types.get(ty).kind.clone() else {
            let name = self.type_name(ty);
            return Err(self.type_mismatch("record operation", "a record type", &name));
        };
        let (decl_env, param_names, var_param, body) = {
            let d = &self.records[decl.index()];
            (d.env, d.params.clone(), d.var_param, d.body.clone())
        };
        let env = self.new_env(EnvParent::Env(decl_env));
        for (i, name) in param_names.iter().enumerate() {
            let value = params.get(i).cloned().ok_or_else(|| {
                self.eval_error("too few parameters for record type")
            })?;
            self.add_local(env, *name, value);
        }
        if let Some(name) = var_param {
            let rest = params.get(param_names.len()..).unwrap_or(&[]).to_vec();
            self.add_local(env, name, Object::MultiStatic(rest));
        }
        let mut field_names = Vec::new();
        let mut field_types = Vec::new();
        match body {
            RecordBody::Fields(fields) => {
                for field in fields {
                    field_names.push(field.name);
                    field_types.push(crate::evaluator::evaluate_type(self, field.ty, env)?);
                }
            }
            RecordBody::Computed(exprs) => {
                let values = crate::evaluator::evaluate_multi_static(self, &exprs, env)?;
                for value in values {
                    let Object::Value(v) = value else {
                        return Err(
                            self.eval_error("computed record body must produce field pairs")
                        );
                    };
                    let vty = self.holders[v.index()].ty;
                    let elements = crate::evaluator::tuple_value_elements(self, v, vty)?;
                    let [name, field_ty] = elements.as_slice() else {
                        return Err(self.eval_error(
                            "computed record fields are [name, Type] pairs",
                        ));
                    };
                    let Object::Ident(name) = name else {
                        return Err(
                            self.eval_error("computed record field name must be an identifier")
                        );
                    };
                    field_names.push(*name);
                    let field_ty = field_ty.clone();
                    field_types.push(obj_as_type(self, &field_ty)?);
                }
            }
        }
        let (offsets, _) = self.struct_layout(&field_types)?;
        let info = RecordInfo {
            field_names,
            field_types,
            offsets,
        };
        self.types.get_mut(ty).record_info = Some(info.clone());
        Ok(info)
    }

    /// Member types of a variant type: default members in source order,
    /// then matching instances in registration order.
    pub fn variant_info(&mut self, ty: TypeId) -> CompileResult<VariantInfo> {
        if let Some(info) = &self.types.get(ty).variant_info {
            return Ok(info.clone());
        }
        let TypeKind::Variant { decl, params } = self.types.get(ty).kind.clone() else {
            let name = self.type_name(ty);
            return Err(self.type_mismatch("variant operation", "a variant type", &name));
        };
        let (decl_env, param_names, var_param, defaults, instances) = {
            let d = &self.variants[decl.index()];
            (
                d.env,
                d.params.clone(),
                d.var_param,
                d.default_members.clone(),
                d.instances.clone(),
            )
        };
        let env = self.new_env(EnvParent::Env(decl_env));
        for (i, name) in param_names.iter().enumerate() {
            let value = params.get(i).cloned().ok_or_else(|| {
                self.eval_error("too few parameters for variant type")
            })?;
            self.add_local(env, *name, value);
        }
        if let Some(name) = var_param {
            let rest = params.get(param_names.len()..).unwrap_or(&[]).to_vec();
            self.add_local(env, name, Object::MultiStatic(rest));
        }
        let mut member_types = Vec::new();
        for member in &defaults {
            member_types.push(crate::evaluator::evaluate_type(self, *member, env)?);
        }
        for instance in instances {
            if let Some(member) = match_instance(self, instance, ty)? {
                member_types.push(member);
            }
        }
        let mut align = 4u64;
        for &m in &member_types {
            align = align.max(self.type_alignment(m)?);
        }
        let info = VariantInfo {
            member_types,
            payload_offset: 4u64.div_ceil(align.max(1)) * align.max(1),
        };
        self.types.get_mut(ty).variant_info = Some(info.clone());
        Ok(info)
    }

    pub fn newtype_base(&mut self, decl: crate::ids::NewTypeId) -> CompileResult<TypeId> {
        if let Some(base) = self.newtypes[decl.index()].base {
            return Ok(base);
        }
        let (expr, env) = {
            let d = &self.newtypes[decl.index()];
            (d.expr, d.env)
        };
        let base = crate::evaluator::evaluate_type(self, expr, env)?;
        self.newtypes[decl.index()].base = Some(base);
        Ok(base)
    }
}

/// Tries one instance declaration against a concrete variant type;
/// `None` when its target pattern or predicate rejects this
/// parameterization.
fn match_instance(
    state: &mut CompilerState,
    instance: crate::ids::InstanceId,
    ty: TypeId,
) -> CompileResult<Option<TypeId>> {
    let (pattern_vars, predicate, target, member, env) = {
        let d = &state.instances[instance.index()];
        (
            d.pattern_vars.clone(),
            d.predicate,
            d.target,
            d.member,
            d.env,
        )
    };
    let pattern_env = state.new_env(EnvParent::Env(env));
    let mut cells = Vec::new();
    let mut multi_cells = Vec::new();
    for var in &pattern_vars {
        if var.is_multi {
            let cell = state.new_multi_cell();
            multi_cells.push(Some(cell));
            cells.push(None);
            state.add_local(
                pattern_env,
                var.name,
                Object::MultiPattern(Box::new(crate::pattern::MultiPattern::Cell(cell))),
            );
        } else {
            let cell = state.new_cell();
            cells.push(Some(cell));
            multi_cells.push(None);
            state.add_local(
                pattern_env,
                var.name,
                Object::Pattern(Box::new(crate::pattern::Pattern::Cell(cell))),
            );
        }
    }
    let result = (|| -> CompileResult<Option<TypeId>> {
        let pattern = crate::pattern::evaluate_one_pattern(state, target, pattern_env)?;
        if !crate::pattern::unify_pattern_obj(state, &pattern, &Object::Type(ty))? {
            return Ok(None);
        }
        let static_env = state.new_env(EnvParent::Env(env));
        for (i, var) in pattern_vars.iter().enumerate() {
            if var.is_multi {
                let cell = multi_cells[i].expect("multi cell");
                let Some(values) = crate::pattern::deref_deep_multi(
                    state,
                    &crate::pattern::MultiPattern::Cell(cell),
                )?
                else {
                    return Ok(None);
                };
                state.add_local(static_env, var.name, Object::MultiStatic(values));
            } else {
                let cell = cells[i].expect("cell");
                let Some(value) =
                    crate::pattern::deref_deep(state, &crate::pattern::Pattern::Cell(cell))?
                else {
                    return Ok(None);
                };
                state.add_local(static_env, var.name, value);
            }
        }
        if let Some(predicate) = predicate {
            if !crate::evaluator::evaluate_bool(state, predicate, static_env)? {
                return Ok(None);
            }
        }
        let member_ty = crate::evaluator::evaluate_type(state, member, static_env)?;
        Ok(Some(member_ty))
    })();
    state.reset_cells(&cells, &multi_cells);
    result
}

/// Resolves an external procedure's signature and pointer type once.
pub fn analyze_external_proc(
    state: &mut CompilerState,
    id: crate::ids::ExternalProcId,
) -> CompileResult<crate::decls::ExternalProcInfo> {
    if let Some(info) = &state.external_procs[id.index()].info {
        return Ok(info.clone());
    }
    let (args, return_type, env, has_var_args) = {
        let d = &state.external_procs[id.index()];
        (d.args.clone(), d.return_type, d.env, d.has_var_args)
    };
    let mut arg_types = Vec::with_capacity(args.len());
    for arg in &args {
        arg_types.push(crate::evaluator::evaluate_type(state, arg.ty, env)?);
    }
    let ret = match return_type {
        Some(r) => Some(crate::evaluator::evaluate_type(state, r, env)?),
        None => None,
    };
    let ptr_type = state.c_code_pointer_type(
        crate::ast::CallingConv::Default,
        arg_types.clone(),
        has_var_args,
        ret,
    );
    let info = crate::decls::ExternalProcInfo {
        arg_types,
        return_type: ret,
        ptr_type,
    };
    state.external_procs[id.index()].info = Some(info.clone());
    Ok(info)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::state::CompilerState;

    fn program_with_expr(text: &str) -> (CompilerState, ExprId, EnvId) {
        let mut state = CompilerState::new();
        let module = crate::loader::load_program_source(
            &mut state,
            "t.clay",
            b"main() { return; }\n".to_vec(),
        )
        .unwrap_or_else(|d| panic!("load failed: {d}"));
        let source = state.sources.add("expr.clay".to_owned(), text.as_bytes().to_vec());
        let expr = crate::parser::parse_expr_source(&mut state, source, module)
            .unwrap_or_else(|d| panic!("parse failed: {d}"));
        let env = state.modules[module.index()].env;
        (state, expr, env)
    }

    #[test]
    fn analysis_is_idempotent() {
        let (mut state, expr, env) = program_with_expr("3 + 4");
        let first = safe_analyze_expr(&mut state, expr, env)
            .unwrap_or_else(|d| panic!("analysis failed: {d}"));
        let second = safe_analyze_expr(&mut state, expr, env).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first.0[0].ty, state.core.int32);
        assert!(first.0[0].is_temp);
    }

    #[test]
    fn caching_disabler_suppresses_the_memo() {
        let (mut state, expr, env) = program_with_expr("3 + 4");
        state.caching_disabled += 1;
        let first = safe_analyze_expr(&mut state, expr, env).unwrap();
        assert!(!state.analysis_cache.contains_key(&expr));
        state.caching_disabled -= 1;
        let second = safe_analyze_expr(&mut state, expr, env).unwrap();
        assert_eq!(first, second);
        assert!(state.analysis_cache.contains_key(&expr));
    }

    #[test]
    fn comparison_produces_bool() {
        let (mut state, expr, env) = program_with_expr("3 < 4");
        let result = safe_analyze_expr(&mut state, expr, env).unwrap();
        assert_eq!(result.0[0].ty, state.core.bool_type);
    }
}
