//! Patterns and Robinson-style unification.
//!
//! A [`Pattern`] is either a cell (a unification variable living in the
//! cell arena) or a constructor application of a head to a parameter list.
//! [`MultiPattern`]s are the variadic counterpart: a variadic cell or an
//! item list with an optional variadic tail.
//!
//! Unification is total: it either binds cells and succeeds, or fails
//! without undoing anything; the *caller* owning the cells resets them
//! after a speculative match (see `matchinvoke`). `deref_deep`
//! reconstructs a concrete object from a bound pattern and returns `None`
//! while any referenced cell is unbound.

use crate::ast::ExprKind;
use crate::error::CompileResult;
use crate::ids::{CellId, EnvId, ExprId, MultiCellId};
use crate::object::{Object, object_eq, object_key};
use crate::primops::PrimOp;
use crate::state::CompilerState;

#[derive(Debug, Clone)]
pub enum Pattern {
    Cell(CellId),
    /// `head[params...]`; a `None` head is the anonymous tuple-value
    /// constructor.
    Struct {
        head: Option<Object>,
        params: MultiPattern,
    },
}

#[derive(Debug, Clone)]
pub enum MultiPattern {
    Cell(MultiCellId),
    List {
        items: Vec<Pattern>,
        tail: Option<Box<MultiPattern>>,
    },
}

impl MultiPattern {
    pub fn empty() -> Self {
        Self::List {
            items: Vec::new(),
            tail: None,
        }
    }
}

/// What a bound single-value cell holds: a concrete object, or another
/// pattern (cells chain through each other during unification).
#[derive(Debug, Clone)]
pub enum CellValue {
    Obj(Object),
    Pattern(Pattern),
}

impl CompilerState {
    pub fn new_cell(&mut self) -> CellId {
        let id = CellId::new(self.cells.len());
        self.cells.push(None);
        id
    }

    pub fn new_bound_cell(&mut self, obj: Object) -> CellId {
        let id = CellId::new(self.cells.len());
        self.cells.push(Some(CellValue::Obj(obj)));
        id
    }

    pub fn new_multi_cell(&mut self) -> MultiCellId {
        let id = MultiCellId::new(self.multi_cells.len());
        self.multi_cells.push(None);
        id
    }

    /// Clears the given cells back to unbound; the reset half of the
    /// speculative-match contract.
    pub fn reset_cells(&mut self, cells: &[Option<CellId>], multi_cells: &[Option<MultiCellId>]) {
        for cell in cells.iter().flatten() {
            self.cells[cell.index()] = None;
        }
        for cell in multi_cells.iter().flatten() {
            self.multi_cells[cell.index()] = None;
        }
    }
}

//
// deref_deep
//

fn compute_struct(
    state: &mut CompilerState,
    head: Option<&Object>,
    params: Vec<Object>,
) -> CompileResult<Object> {
    match head {
        None => crate::evaluator::make_tuple_value(state, &params),
        Some(head) => {
            let ty = crate::analyzer::construct_type(state, head, &params)?;
            Ok(Object::Type(ty))
        }
    }
}

pub fn deref_deep(state: &mut CompilerState, pattern: &Pattern) -> CompileResult<Option<Object>> {
    match pattern {
        Pattern::Cell(cell) => match state.cells[cell.index()].clone() {
            None => Ok(None),
            Some(CellValue::Pattern(inner)) => deref_deep(state, &inner),
            Some(CellValue::Obj(obj)) => Ok(Some(obj)),
        },
        Pattern::Struct { head, params } => {
            let Some(params) = deref_deep_multi(state, params)? else {
                return Ok(None);
            };
            compute_struct(state, head.as_ref(), params).map(Some)
        }
    }
}

pub fn deref_deep_multi(
    state: &mut CompilerState,
    pattern: &MultiPattern,
) -> CompileResult<Option<Vec<Object>>> {
    match pattern {
        MultiPattern::Cell(cell) => match state.multi_cells[cell.index()].clone() {
            None => Ok(None),
            Some(inner) => deref_deep_multi(state, &inner),
        },
        MultiPattern::List { items, tail } => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match deref_deep(state, item)? {
                    None => return Ok(None),
                    Some(obj) => out.push(obj),
                }
            }
            if let Some(tail) = tail {
                match deref_deep_multi(state, tail)? {
                    None => return Ok(None),
                    Some(rest) => out.extend(rest),
                }
            }
            Ok(Some(out))
        }
    }
}

//
// lifting objects to struct form
//

/// Lifts an object to pattern form. Types built by a constructor expose
/// their head and parameters; tuple values whose elements are all static
/// decompose analogously; everything else becomes a pre-bound cell.
pub fn object_to_pattern(state: &mut CompilerState, obj: &Object) -> CompileResult<Pattern> {
    use crate::types::TypeKind;
    match obj {
        Object::Pattern(p) => Ok((**p).clone()),
        Object::MultiPattern(_) => Err(state.eval_error(
            "incorrect usage of multi-valued pattern in single-valued context",
        )),
        Object::Value(v) => {
            let ty = state.holders[v.index()].ty;
            if let TypeKind::Tuple(elements) = state.types.get(ty).kind.clone() {
                let mut element_objects = Vec::with_capacity(elements.len());
                for e in &elements {
                    match state.types.get(*e).kind.clone() {
                        TypeKind::Static(inner) => element_objects.push((*inner).clone()),
                        _ => {
                            element_objects.clear();
                            break;
                        }
                    }
                }
                if element_objects.len() == elements.len() {
                    let mut items = Vec::with_capacity(element_objects.len());
                    for o in &element_objects {
                        items.push(object_to_pattern(state, o)?);
                    }
                    return Ok(Pattern::Struct {
                        head: None,
                        params: MultiPattern::List { items, tail: None },
                    });
                }
            }
            Ok(Pattern::Cell(state.new_bound_cell(obj.clone())))
        }
        Object::Type(ty) => {
            let kind = state.types.get(*ty).kind.clone();
            match kind {
                TypeKind::Pointer(pointee) => {
                    struct_of(state, Object::PrimOp(PrimOp::Pointer), vec![Object::Type(pointee)])
                }
                TypeKind::CodePointer {
                    arg_types,
                    return_types,
                    ..
                } => {
                    let args = types_pattern(state, &arg_types)?;
                    let rets = types_pattern(state, &return_types)?;
                    Ok(Pattern::Struct {
                        head: Some(Object::PrimOp(PrimOp::CodePointer)),
                        params: MultiPattern::List {
                            items: vec![args, rets],
                            tail: None,
                        },
                    })
                }
                TypeKind::CCodePointer {
                    arg_types,
                    has_var_args,
                    return_type,
                    ..
                } => {
                    let args = types_pattern(state, &arg_types)?;
                    let ret_list: Vec<crate::ids::TypeId> = return_type.into_iter().collect();
                    let rets = types_pattern(state, &ret_list)?;
                    let vararg_holder = state.bool_holder(has_var_args);
                    let vararg = object_to_pattern(state, &Object::Value(vararg_holder))?;
                    Ok(Pattern::Struct {
                        head: Some(Object::PrimOp(PrimOp::ExternalCodePointer)),
                        params: MultiPattern::List {
                            items: vec![vararg, args, rets],
                            tail: None,
                        },
                    })
                }
                TypeKind::Array(element, size) => {
                    let holder = state.size_holder(size);
                    struct_of(
                        state,
                        Object::PrimOp(PrimOp::Array),
                        vec![Object::Type(element), Object::Value(holder)],
                    )
                }
                TypeKind::Vector(element, size) => {
                    let holder = state.size_holder(size);
                    struct_of(
                        state,
                        Object::PrimOp(PrimOp::Vec),
                        vec![Object::Type(element), Object::Value(holder)],
                    )
                }
                TypeKind::Tuple(elements) => {
                    let params: Vec<Object> = elements.into_iter().map(Object::Type).collect();
                    struct_of(state, Object::PrimOp(PrimOp::Tuple), params)
                }
                TypeKind::Union(members) => {
                    let params: Vec<Object> = members.into_iter().map(Object::Type).collect();
                    struct_of(state, Object::PrimOp(PrimOp::Union), params)
                }
                TypeKind::Static(inner) => {
                    struct_of(state, Object::PrimOp(PrimOp::Static), vec![(*inner).clone()])
                }
                TypeKind::Record { decl, params } => {
                    struct_of(state, Object::Record(decl), params)
                }
                TypeKind::Variant { decl, params } => {
                    struct_of(state, Object::Variant(decl), params)
                }
                _ => Ok(Pattern::Cell(state.new_bound_cell(obj.clone()))),
            }
        }
        _ => Ok(Pattern::Cell(state.new_bound_cell(obj.clone()))),
    }
}

fn struct_of(
    state: &mut CompilerState,
    head: Object,
    params: Vec<Object>,
) -> CompileResult<Pattern> {
    let mut items = Vec::with_capacity(params.len());
    for p in &params {
        items.push(object_to_pattern(state, p)?);
    }
    Ok(Pattern::Struct {
        head: Some(head),
        params: MultiPattern::List { items, tail: None },
    })
}

fn types_pattern(
    state: &mut CompilerState,
    types: &[crate::ids::TypeId],
) -> CompileResult<Pattern> {
    let mut items = Vec::with_capacity(types.len());
    for &t in types {
        items.push(object_to_pattern(state, &Object::Type(t))?);
    }
    Ok(Pattern::Struct {
        head: None,
        params: MultiPattern::List { items, tail: None },
    })
}

//
// unification
//

fn heads_equal(state: &CompilerState, a: Option<&Object>, b: Option<&Object>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => object_eq(state, a, b),
        _ => false,
    }
}

pub fn unify_obj_obj(state: &mut CompilerState, a: &Object, b: &Object) -> CompileResult<bool> {
    match (a, b) {
        (Object::Pattern(pa), _) => unify_pattern_obj(state, &(**pa).clone(), b),
        (Object::MultiPattern(_), _) | (_, Object::MultiPattern(_)) => Err(state.eval_error(
            "incorrect usage of multi-valued pattern in single-valued context",
        )),
        (_, Object::Pattern(pb)) => unify_obj_pattern(state, a, &(**pb).clone()),
        _ => {
            // deep object equality through canonical keys
            match (object_key(state, a), object_key(state, b)) {
                (Some(ka), Some(kb)) => Ok(ka == kb),
                _ => Ok(false),
            }
        }
    }
}

pub fn unify_obj_pattern(
    state: &mut CompilerState,
    a: &Object,
    b: &Pattern,
) -> CompileResult<bool> {
    match a {
        Object::Pattern(pa) => return unify(state, &(**pa).clone(), b),
        Object::MultiPattern(_) => {
            return Err(state.eval_error(
                "incorrect usage of multi-valued pattern in single-valued context",
            ));
        }
        _ => {}
    }
    match b {
        Pattern::Cell(cell) => match state.cells[cell.index()].clone() {
            None => {
                state.cells[cell.index()] = Some(CellValue::Obj(a.clone()));
                Ok(true)
            }
            Some(CellValue::Obj(bound)) => unify_obj_obj(state, &bound, a),
            Some(CellValue::Pattern(bound)) => unify_obj_pattern(state, a, &bound),
        },
        Pattern::Struct { head, params } => {
            let lifted = object_to_pattern(state, a)?;
            match lifted {
                Pattern::Struct {
                    head: lifted_head,
                    params: lifted_params,
                } => {
                    if heads_equal(state, lifted_head.as_ref(), head.as_ref()) {
                        unify_multi(state, &lifted_params, params)
                    } else {
                        Ok(false)
                    }
                }
                Pattern::Cell(_) => Ok(false),
            }
        }
    }
}

pub fn unify_pattern_obj(
    state: &mut CompilerState,
    a: &Pattern,
    b: &Object,
) -> CompileResult<bool> {
    unify_obj_pattern(state, b, a)
}

pub fn unify(state: &mut CompilerState, a: &Pattern, b: &Pattern) -> CompileResult<bool> {
    match (a, b) {
        (Pattern::Cell(cell), _) => match state.cells[cell.index()].clone() {
            None => {
                state.cells[cell.index()] = Some(CellValue::Pattern(b.clone()));
                Ok(true)
            }
            Some(CellValue::Obj(bound)) => unify_obj_pattern(state, &bound, b),
            Some(CellValue::Pattern(bound)) => unify(state, &bound, b),
        },
        (_, Pattern::Cell(cell)) => match state.cells[cell.index()].clone() {
            None => {
                state.cells[cell.index()] = Some(CellValue::Pattern(a.clone()));
                Ok(true)
            }
            Some(CellValue::Obj(bound)) => unify_pattern_obj(state, a, &bound),
            Some(CellValue::Pattern(bound)) => unify(state, a, &bound),
        },
        (
            Pattern::Struct { head: ha, params: pa },
            Pattern::Struct { head: hb, params: pb },
        ) => {
            if heads_equal(state, ha.as_ref(), hb.as_ref()) {
                unify_multi(state, pa, pb)
            } else {
                Ok(false)
            }
        }
    }
}

/// Unifies a multi-pattern against a sequence of concrete objects.
pub fn unify_multi_static(
    state: &mut CompilerState,
    a: &MultiPattern,
    b: &[Object],
) -> CompileResult<bool> {
    let mut items = Vec::with_capacity(b.len());
    for obj in b {
        items.push(object_to_pattern(state, obj)?);
    }
    let list = MultiPattern::List { items, tail: None };
    unify_multi(state, a, &list)
}

pub fn unify_multi(
    state: &mut CompilerState,
    a: &MultiPattern,
    b: &MultiPattern,
) -> CompileResult<bool> {
    match a {
        MultiPattern::Cell(cell) => match state.multi_cells[cell.index()].clone() {
            None => {
                state.multi_cells[cell.index()] = Some(b.clone());
                Ok(true)
            }
            Some(bound) => unify_multi(state, &bound, b),
        },
        MultiPattern::List { items, tail } => {
            unify_multi_list(state, items, tail.as_deref(), 0, b)
        }
    }
}

fn sub_list(items: &[Pattern], tail: Option<&MultiPattern>, index: usize) -> MultiPattern {
    MultiPattern::List {
        items: items[index.min(items.len())..].to_vec(),
        tail: tail.cloned().map(Box::new),
    }
}

fn unify_multi_list(
    state: &mut CompilerState,
    a_items: &[Pattern],
    a_tail: Option<&MultiPattern>,
    index_a: usize,
    b: &MultiPattern,
) -> CompileResult<bool> {
    match b {
        MultiPattern::Cell(cell) => match state.multi_cells[cell.index()].clone() {
            None => {
                state.multi_cells[cell.index()] = Some(sub_list(a_items, a_tail, index_a));
                Ok(true)
            }
            Some(bound) => unify_multi_list(state, a_items, a_tail, index_a, &bound),
        },
        MultiPattern::List {
            items: b_items,
            tail: b_tail,
        } => unify_multi_lists(
            state,
            a_items,
            a_tail,
            index_a,
            b_items,
            b_tail.as_deref(),
            0,
        ),
    }
}

fn unify_multi_lists(
    state: &mut CompilerState,
    a_items: &[Pattern],
    a_tail: Option<&MultiPattern>,
    mut index_a: usize,
    b_items: &[Pattern],
    b_tail: Option<&MultiPattern>,
    mut index_b: usize,
) -> CompileResult<bool> {
    while index_a < a_items.len() && index_b < b_items.len() {
        if !unify(state, &a_items[index_a], &b_items[index_b])? {
            return Ok(false);
        }
        index_a += 1;
        index_b += 1;
    }
    if index_a < a_items.len() {
        debug_assert!(index_b == b_items.len());
        match b_tail {
            None => Ok(false),
            Some(tail) => unify_multi_list(state, a_items, a_tail, index_a, tail),
        }
    } else if let Some(tail) = a_tail {
        let rest = sub_list(b_items, b_tail, index_b);
        unify_multi(state, tail, &rest)
    } else {
        unify_empty_list(state, b_items, b_tail, index_b)
    }
}

fn unify_empty_list(
    state: &mut CompilerState,
    items: &[Pattern],
    tail: Option<&MultiPattern>,
    index: usize,
) -> CompileResult<bool> {
    if index < items.len() {
        return Ok(false);
    }
    match tail {
        None => Ok(true),
        Some(tail) => unify_empty(state, tail),
    }
}

pub fn unify_empty(state: &mut CompilerState, x: &MultiPattern) -> CompileResult<bool> {
    match x {
        MultiPattern::Cell(cell) => match state.multi_cells[cell.index()].clone() {
            None => {
                state.multi_cells[cell.index()] = Some(MultiPattern::empty());
                Ok(true)
            }
            Some(bound) => unify_empty(state, &bound),
        },
        MultiPattern::List { items, tail } => {
            unify_empty_list(state, items, tail.as_deref(), 0)
        }
    }
}

//
// evaluating expressions as patterns
//

fn is_pattern_head(obj: &Object) -> bool {
    match obj {
        Object::PrimOp(p) => p.is_pattern_head(),
        Object::Record(_) | Object::Variant(_) => true,
        _ => false,
    }
}

fn named_to_pattern(state: &mut CompilerState, obj: Object) -> CompileResult<Pattern> {
    match obj {
        Object::Pattern(p) => {
            debug_assert!(matches!(*p, Pattern::Cell(_)));
            Ok(*p)
        }
        Object::MultiPattern(_) => Err(state.eval_error(
            "incorrect usage of multi-valued pattern in single-valued context",
        )),
        Object::GlobalAlias(alias) => {
            let decl = &state.global_aliases[alias.index()];
            if decl.has_params() {
                Ok(Pattern::Cell(state.new_bound_cell(Object::GlobalAlias(alias))))
            } else {
                let (expr, env) = (decl.expr, decl.env);
                evaluate_one_pattern(state, expr, env)
            }
        }
        Object::Record(decl) => {
            let d = &state.records[decl.index()];
            if d.params.is_empty() && d.var_param.is_none() {
                let ty = state.record_type(decl, Vec::new())?;
                Ok(Pattern::Cell(state.new_bound_cell(Object::Type(ty))))
            } else {
                Ok(Pattern::Cell(state.new_bound_cell(Object::Record(decl))))
            }
        }
        Object::Variant(decl) => {
            let d = &state.variants[decl.index()];
            if d.params.is_empty() && d.var_param.is_none() {
                let ty = state.variant_type(decl, Vec::new())?;
                Ok(Pattern::Cell(state.new_bound_cell(Object::Type(ty))))
            } else {
                Ok(Pattern::Cell(state.new_bound_cell(Object::Variant(decl))))
            }
        }
        other => Ok(Pattern::Cell(state.new_bound_cell(other))),
    }
}

/// Evaluates an expression in pattern position.
pub fn evaluate_one_pattern(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Pattern> {
    let location = state.expr_location(expr);
    state.push_location(location);
    let result = evaluate_one_pattern_inner(state, expr, env);
    state.pop_location();
    result
}

fn evaluate_one_pattern_inner(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Pattern> {
    let kind = state.expr(expr).kind.clone();
    match kind {
        ExprKind::NameRef(name) => {
            let obj = state.safe_lookup_env(env, name)?;
            named_to_pattern(state, obj)
        }
        ExprKind::Indexing { expr: base, args } => {
            let indexable = crate::evaluator::evaluate_one_static(state, base, env)?;
            if is_pattern_head(&indexable) {
                let params = evaluate_multi_pattern(state, &args, env)?;
                return Ok(Pattern::Struct {
                    head: Some(indexable),
                    params,
                });
            }
            if let Object::GlobalAlias(alias) = indexable {
                let params = evaluate_multi_pattern(state, &args, env)?;
                return evaluate_alias_pattern(state, alias, &params);
            }
            let value = crate::evaluator::evaluate_one_static(state, expr, env)?;
            Ok(Pattern::Cell(state.new_bound_cell(value)))
        }
        ExprKind::Tuple(args) => {
            let params = evaluate_multi_pattern(state, &args, env)?;
            Ok(Pattern::Struct { head: None, params })
        }
        ExprKind::ForeignExpr { .. } => {
            let (inner, foreign_env) = crate::analyzer::resolve_foreign(state, expr)?;
            evaluate_one_pattern(state, inner, foreign_env)
        }
        _ => {
            let value = crate::evaluator::evaluate_one_static(state, expr, env)?;
            Ok(Pattern::Cell(state.new_bound_cell(value)))
        }
    }
}

/// Expands a parameterized alias in pattern position: fresh cells stand in
/// for the alias parameters and must unify with the supplied params.
pub fn evaluate_alias_pattern(
    state: &mut CompilerState,
    alias: crate::ids::AliasId,
    params: &MultiPattern,
) -> CompileResult<Pattern> {
    let decl_env = state.global_aliases[alias.index()].env;
    let decl_params = state.global_aliases[alias.index()].params.clone();
    let decl_var_param = state.global_aliases[alias.index()].var_param;
    let decl_expr = state.global_aliases[alias.index()].expr;

    let env = state.new_env(crate::env::EnvParent::Env(decl_env));
    let mut items = Vec::with_capacity(decl_params.len());
    for name in decl_params {
        let cell = state.new_cell();
        items.push(Pattern::Cell(cell));
        state.add_local(env, name, Object::Pattern(Box::new(Pattern::Cell(cell))));
    }
    let mut tail = None;
    if let Some(name) = decl_var_param {
        let cell = state.new_multi_cell();
        tail = Some(Box::new(MultiPattern::Cell(cell)));
        state.add_local(
            env,
            name,
            Object::MultiPattern(Box::new(MultiPattern::Cell(cell))),
        );
    }
    let out = evaluate_one_pattern(state, decl_expr, env)?;
    let args = MultiPattern::List { items, tail };
    if !unify_multi(state, &args, params)? {
        return Err(state.eval_error("non-matching alias"));
    }
    Ok(out)
}

fn check_multi_pattern_name_ref(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Option<MultiPattern>> {
    let ExprKind::NameRef(name) = state.expr(expr).kind else {
        return Ok(None);
    };
    let obj = state.safe_lookup_env(env, name)?;
    match obj {
        Object::Pattern(_) => Err(state.eval_error(
            "single-valued pattern incorrectly used in multi-valued context",
        )),
        Object::MultiPattern(mp) => Ok(Some(*mp)),
        _ => Ok(None),
    }
}

/// Appends a multi-pattern to the open end of a list under construction.
/// Returns false when the list is already closed by a variadic tail.
fn append_pattern(
    current: &mut Option<&mut MultiPattern>,
    x: &MultiPattern,
    state: &CompilerState,
) -> bool {
    match x {
        MultiPattern::Cell(cell) => {
            if let Some(bound) = state.multi_cells[cell.index()].clone() {
                return append_pattern(current, &bound, state);
            }
            let Some(list) = current.take() else {
                return false;
            };
            let MultiPattern::List { tail, .. } = list else {
                unreachable!("append target is always a list");
            };
            *tail = Some(Box::new(x.clone()));
            true
        }
        MultiPattern::List { items, tail } => {
            if !items.is_empty() {
                let Some(list) = current.as_deref_mut() else {
                    return false;
                };
                let MultiPattern::List {
                    items: out_items, ..
                } = list
                else {
                    unreachable!("append target is always a list");
                };
                out_items.extend(items.iter().cloned());
            }
            if let Some(tail) = tail {
                return append_pattern(current, tail, state);
            }
            true
        }
    }
}

/// Evaluates an expression list in multi-pattern position. Unpack splices
/// of multi pattern vars become the variadic tail; nothing may follow one.
pub fn evaluate_multi_pattern(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
) -> CompileResult<MultiPattern> {
    let mut out = MultiPattern::empty();
    let mut open = true;
    for &x in exprs {
        let kind = state.expr(x).kind.clone();
        match kind {
            ExprKind::Unpack(inner) => {
                if let Some(mp) = check_multi_pattern_name_ref(state, inner, env)? {
                    let mut current = if open { Some(&mut out) } else { None };
                    if !append_pattern(&mut current, &mp, state) {
                        return Err(state
                            .eval_error("expressions cannot occur after multi-pattern variable"));
                    }
                    open = current.is_some();
                } else {
                    let values = crate::evaluator::evaluate_expr_static(state, inner, env)?;
                    if !open && !values.is_empty() {
                        return Err(state
                            .eval_error("expressions cannot occur after multi-pattern variable"));
                    }
                    let MultiPattern::List { items, .. } = &mut out else {
                        unreachable!()
                    };
                    for value in values {
                        items.push(Pattern::Cell(state.new_bound_cell(value)));
                    }
                }
            }
            ExprKind::Paren(args) => {
                let mp = evaluate_multi_pattern(state, &args, env)?;
                let mut current = if open { Some(&mut out) } else { None };
                if !append_pattern(&mut current, &mp, state) {
                    return Err(
                        state.eval_error("expressions cannot occur after multi-pattern variable")
                    );
                }
                open = current.is_some();
            }
            _ => {
                if !open {
                    return Err(
                        state.eval_error("expressions cannot occur after multi-pattern variable")
                    );
                }
                let p = evaluate_one_pattern(state, x, env)?;
                let MultiPattern::List { items, .. } = &mut out else {
                    unreachable!()
                };
                items.push(p);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `[A, B, ..Xs]` against `[t1, t2, t3, t4]` binds `A=t1, B=t2,
    /// Xs=[t3, t4]`; against `[t1]` fails with nothing learned.
    #[test]
    fn variadic_unification_binds_tail() {
        let mut state = CompilerState::new();
        let a = state.new_cell();
        let b = state.new_cell();
        let xs = state.new_multi_cell();
        let pattern = MultiPattern::List {
            items: vec![Pattern::Cell(a), Pattern::Cell(b)],
            tail: Some(Box::new(MultiPattern::Cell(xs))),
        };
        let t = [
            state.core.int8,
            state.core.int16,
            state.core.int32,
            state.core.int64,
        ];
        let objs: Vec<Object> = t.iter().map(|&t| Object::Type(t)).collect();
        assert!(unify_multi_static(&mut state, &pattern, &objs).unwrap());
        let bound_a = deref_deep(&mut state, &Pattern::Cell(a)).unwrap().unwrap();
        let bound_b = deref_deep(&mut state, &Pattern::Cell(b)).unwrap().unwrap();
        assert!(matches!(bound_a, Object::Type(x) if x == t[0]));
        assert!(matches!(bound_b, Object::Type(x) if x == t[1]));
        let bound_xs = deref_deep_multi(&mut state, &MultiPattern::Cell(xs))
            .unwrap()
            .unwrap();
        assert_eq!(bound_xs.len(), 2);
        assert!(matches!(bound_xs[0], Object::Type(x) if x == t[2]));
        assert!(matches!(bound_xs[1], Object::Type(x) if x == t[3]));

        // arity failure against a single element
        state.reset_cells(&[Some(a), Some(b)], &[Some(xs)]);
        let one = [Object::Type(t[0])];
        assert!(!unify_multi_static(&mut state, &pattern, &one).unwrap());
    }

    #[test]
    fn struct_pattern_matches_constructed_type() {
        let mut state = CompilerState::new();
        let int32 = state.core.int32;
        let ptr = state.pointer_type(int32);
        let cell = state.new_cell();
        // Pointer[T] vs Pointer[Int32]
        let pattern = Pattern::Struct {
            head: Some(Object::PrimOp(PrimOp::Pointer)),
            params: MultiPattern::List {
                items: vec![Pattern::Cell(cell)],
                tail: None,
            },
        };
        assert!(unify_pattern_obj(&mut state, &pattern, &Object::Type(ptr)).unwrap());
        let bound = deref_deep(&mut state, &Pattern::Cell(cell)).unwrap().unwrap();
        assert!(matches!(bound, Object::Type(t) if t == int32));
        // and the struct itself dereferences back to the pointer type
        let whole = deref_deep(&mut state, &pattern).unwrap().unwrap();
        assert!(matches!(whole, Object::Type(t) if t == ptr));
    }

    #[test]
    fn mismatched_heads_fail() {
        let mut state = CompilerState::new();
        let int32 = state.core.int32;
        let arr = state.array_type(int32, 3);
        let cell = state.new_cell();
        let pattern = Pattern::Struct {
            head: Some(Object::PrimOp(PrimOp::Pointer)),
            params: MultiPattern::List {
                items: vec![Pattern::Cell(cell)],
                tail: None,
            },
        };
        assert!(!unify_pattern_obj(&mut state, &pattern, &Object::Type(arr)).unwrap());
    }

    #[test]
    fn unbound_cell_dereferences_to_none() {
        let mut state = CompilerState::new();
        let cell = state.new_cell();
        assert!(deref_deep(&mut state, &Pattern::Cell(cell)).unwrap().is_none());
    }
}
