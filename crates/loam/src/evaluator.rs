//! The compile-time evaluator.
//!
//! An interpreter that walks statements over a marker-disciplined stack of
//! typed byte cells. It evaluates type expressions and constants, produces
//! value holders for static arguments, resolves `eval` constructs, and
//! runs static assertions.
//!
//! Compile-time memory is addressed by [`Place`]s (a slot or holder plus
//! a byte offset), and pointers are places encoded into eight bytes, so
//! every pointer primitive is total and deterministic without raw host
//! memory.

use ahash::AHashMap;

use crate::ast::{BindingKind, Code, CodeBody, ExprKind, ReturnKind, StmtKind, Tempness};
use crate::env::EnvParent;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnvId, ExprId, InvokeEntryId, StmtId, TypeId, ValueId};
use crate::intern::StrId;
use crate::invoke::CtorKind;
use crate::object::{Object, print_object};
use crate::primops::PrimOp;
use crate::source::Location;
use crate::state::{CompilerState, read_int_bytes, write_int_bytes};
use crate::types::TypeKind;

//
// places and the evaluator stack
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceRoot {
    Slot(u32),
    Holder(u32),
}

/// A byte address in compile-time memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Place {
    pub root: PlaceRoot,
    pub offset: u32,
}

impl Place {
    pub fn slot(index: usize) -> Self {
        Self {
            root: PlaceRoot::Slot(u32::try_from(index).expect("eval stack overflow")),
            offset: 0,
        }
    }

    pub fn holder(id: ValueId) -> Self {
        Self {
            root: PlaceRoot::Holder(u32::try_from(id.index()).expect("holder arena overflow")),
            offset: 0,
        }
    }

    pub fn offset_by(self, delta: u64) -> Self {
        Self {
            root: self.root,
            offset: self.offset.wrapping_add(delta as u32),
        }
    }
}

const HOLDER_BIT: u64 = 1 << 63;

pub fn encode_place(place: Place) -> u64 {
    let (flag, index) = match place.root {
        PlaceRoot::Slot(i) => (0, i),
        PlaceRoot::Holder(i) => (HOLDER_BIT, i),
    };
    flag | (u64::from(index) + 1) << 32 | u64::from(place.offset)
}

pub fn decode_place(value: u64) -> Option<Place> {
    let index = ((value >> 32) & 0x7fff_ffff).checked_sub(1)?;
    let root = if value & HOLDER_BIT != 0 {
        PlaceRoot::Holder(index as u32)
    } else {
        PlaceRoot::Slot(index as u32)
    };
    Some(Place {
        root,
        offset: (value & 0xffff_ffff) as u32,
    })
}

/// An evaluator cell: a typed view of compile-time memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EValue {
    pub ty: TypeId,
    pub place: Place,
    pub forwarded_rvalue: bool,
}

pub type MultiEValue = Vec<EValue>;

#[derive(Debug)]
pub struct EvalSlot {
    pub ty: TypeId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct EvalStack {
    pub slots: Vec<EvalSlot>,
}

impl CompilerState {
    pub fn eval_mark(&self) -> usize {
        self.eval_stack.slots.len()
    }

    pub fn eval_alloc(&mut self, ty: TypeId) -> CompileResult<EValue> {
        let size = self.type_size(ty)?;
        let index = self.eval_stack.slots.len();
        self.eval_stack.slots.push(EvalSlot {
            ty,
            bytes: vec![0u8; size as usize],
        });
        Ok(EValue {
            ty,
            place: Place::slot(index),
            forwarded_rvalue: false,
        })
    }

    pub fn read_place(&self, place: Place, len: usize) -> CompileResult<Vec<u8>> {
        let bytes: &[u8] = match place.root {
            PlaceRoot::Slot(i) => self
                .eval_stack
                .slots
                .get(i as usize)
                .map(|s| s.bytes.as_slice())
                .ok_or_else(|| self.eval_error("dangling compile-time pointer"))?,
            PlaceRoot::Holder(i) => self
                .holders
                .get(i as usize)
                .map(|h| &*h.bytes)
                .ok_or_else(|| self.eval_error("dangling compile-time pointer"))?,
        };
        let start = place.offset as usize;
        let end = start + len;
        if end > bytes.len() {
            return Err(self.eval_error("compile-time pointer out of bounds"));
        }
        Ok(bytes[start..end].to_vec())
    }

    pub fn write_place(&mut self, place: Place, data: &[u8]) -> CompileResult<()> {
        let start = place.offset as usize;
        let end = start + data.len();
        let dangling = self.eval_error("dangling compile-time pointer");
        let bytes: &mut [u8] = match place.root {
            PlaceRoot::Slot(i) => {
                let slot = self
                    .eval_stack
                    .slots
                    .get_mut(i as usize)
                    .ok_or(dangling)?;
                &mut slot.bytes
            }
            PlaceRoot::Holder(i) => {
                let holder = self.holders.get_mut(i as usize).ok_or(dangling)?;
                &mut holder.bytes
            }
        };
        if end > bytes.len() {
            return Err(self.eval_error("compile-time pointer out of bounds"));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}

fn copy_value(state: &mut CompilerState, dest: &EValue, src: &EValue) -> CompileResult<()> {
    debug_assert_eq!(dest.ty, src.ty);
    let size = state.type_size(src.ty)? as usize;
    let bytes = state.read_place(src.place, size)?;
    state.write_place(dest.place, &bytes)
}

/// Destroys every cell above `marker`, newest first, then pops them.
/// Values whose type is plain data drop bytewise; the rest go through the
/// prelude `destroy` operator.
pub fn eval_destroy_and_pop(state: &mut CompilerState, marker: usize) -> CompileResult<()> {
    let mut index = state.eval_stack.slots.len();
    while index > marker {
        index -= 1;
        let ty = state.eval_stack.slots[index].ty;
        if !state.is_plain_data(ty) {
            let ev = EValue {
                ty,
                place: Place::slot(index),
                forwarded_rvalue: false,
            };
            call_operator(state, "destroy", &[ev], &[])?;
        }
    }
    state.eval_stack.slots.truncate(marker);
    Ok(())
}

pub fn eval_pop(state: &mut CompilerState, marker: usize) {
    state.eval_stack.slots.truncate(marker);
}

//
// terminations
//

#[derive(Debug)]
pub enum Termination {
    Return,
    Break,
    Continue,
    Goto(StrId, Option<Location>),
}

#[derive(Debug, Clone, Copy)]
struct LabelInfo {
    env: EnvId,
    marker: usize,
    position: usize,
}

#[derive(Debug, Clone)]
struct EReturn {
    by_ref: bool,
    ty: TypeId,
    value: EValue,
}

struct EvalContext {
    returns: Vec<EReturn>,
}

//
// static entry points
//

/// Converts an evaluated cell to a static object: statics come out of the
/// type, anything else is snapshotted into a value holder.
pub fn evalue_to_static(state: &mut CompilerState, ev: &EValue) -> CompileResult<Object> {
    if let TypeKind::Static(obj) = &state.types.get(ev.ty).kind {
        return Ok((**obj).clone());
    }
    let size = state.type_size(ev.ty)? as usize;
    let bytes = state.read_place(ev.place, size)?;
    let holder = state.new_holder(ev.ty, bytes.into_boxed_slice());
    Ok(Object::Value(holder))
}

/// Evaluates an expression to its static objects. Analysis caching is
/// disabled for the duration: speculative evaluation must not pollute the
/// memo tables.
pub fn evaluate_expr_static(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Vec<Object>> {
    state.caching_disabled += 1;
    let result = evaluate_expr_static_inner(state, expr, env);
    state.caching_disabled -= 1;
    result
}

fn evaluate_expr_static_inner(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Vec<Object>> {
    let mpv = crate::analyzer::safe_analyze_expr(state, expr, env)?;
    let marker = state.eval_mark();
    let mut out = MultiEValue::with_capacity(mpv.len());
    for pv in &mpv.0 {
        out.push(state.eval_alloc(pv.ty)?);
    }
    let result = (|| -> CompileResult<Vec<Object>> {
        eval_expr_into(state, expr, env, &out)?;
        let mut objects = Vec::with_capacity(out.len());
        for ev in &out {
            objects.push(evalue_to_static(state, ev)?);
        }
        Ok(objects)
    })();
    eval_destroy_and_pop(state, marker)?;
    result
}

pub fn evaluate_one_static(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<Object> {
    let values = evaluate_expr_static(state, expr, env)?;
    if values.len() != 1 {
        return Err(state.error(DiagnosticKind::TypeMismatch {
            context: "static expression".to_owned(),
            expected: "a single value".to_owned(),
            actual: format!("{} values", values.len()),
        }));
    }
    Ok(values.into_iter().next().expect("length checked"))
}

pub fn evaluate_multi_static(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
) -> CompileResult<Vec<Object>> {
    let mut out = Vec::new();
    for &expr in exprs {
        let kind = state.expr(expr).kind.clone();
        match kind {
            ExprKind::Unpack(inner) => out.extend(evaluate_expr_static(state, inner, env)?),
            _ => out.extend(evaluate_expr_static(state, expr, env)?),
        }
    }
    Ok(out)
}

pub fn evaluate_type(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<TypeId> {
    let obj = evaluate_one_static(state, expr, env)?;
    crate::analyzer::obj_as_type(state, &obj)
}

pub fn evaluate_identifier(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<StrId> {
    match evaluate_one_static(state, expr, env)? {
        Object::Ident(s) => Ok(s),
        other => {
            let rendered = print_object(state, &other);
            Err(state.type_mismatch("static expression", "an identifier", &rendered))
        }
    }
}

pub fn evaluate_bool(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<bool> {
    match evaluate_one_static(state, expr, env)? {
        Object::Value(v) => {
            let holder = &state.holders[v.index()];
            if state.types.get(holder.ty).kind_is_bool() {
                Ok(holder.bytes.first() != Some(&0))
            } else {
                let name = state.type_name(holder.ty);
                Err(state.type_mismatch("condition", "Bool", &name))
            }
        }
        other => {
            let rendered = print_object(state, &other);
            Err(state.type_mismatch("condition", "Bool", &rendered))
        }
    }
}

/// Runs a `staticassert`; failure reports the original condition text and
/// the evaluated message objects.
pub fn execute_static_assert(
    state: &mut CompilerState,
    condition: ExprId,
    message: &[ExprId],
    env: EnvId,
) -> CompileResult<()> {
    if evaluate_bool(state, condition, env)? {
        return Ok(());
    }
    let values = evaluate_multi_static(state, message, env)?;
    let rendered = values
        .iter()
        .map(|v| print_object(state, v))
        .collect::<Vec<_>>()
        .join(" ");
    Err(state.error_at(
        DiagnosticKind::StaticAssert {
            expression: state.expr_text(condition),
            message: rendered,
        },
        state.expr_location(condition),
    ))
}

/// Resolves declared return specs to `(by-ref flags, types)`.
pub fn evaluate_return_specs(
    state: &mut CompilerState,
    code: &Code,
    env: EnvId,
) -> CompileResult<(Vec<bool>, Vec<TypeId>)> {
    let mut types = Vec::new();
    for spec in &code.return_specs {
        types.push(evaluate_type(state, spec.ty, env)?);
    }
    if let Some(var_spec) = &code.var_return_spec {
        for obj in evaluate_expr_static(state, var_spec.ty, env)? {
            types.push(crate::analyzer::obj_as_type(state, &obj)?);
        }
    }
    Ok((vec![false; types.len()], types))
}

//
// tuple values
//

/// Builds a tuple value from static objects: static elements contribute
/// their `Static` type (and no bytes), value holders contribute their
/// type and bytes.
pub fn make_tuple_value(state: &mut CompilerState, elements: &[Object]) -> CompileResult<Object> {
    let mut element_types = Vec::with_capacity(elements.len());
    for e in elements {
        element_types.push(state.static_object_type(e)?);
    }
    let ty = state.tuple_type(element_types.clone());
    let (offsets, (size, _)) = state.struct_layout(&element_types)?;
    let mut bytes = vec![0u8; size as usize];
    for (i, e) in elements.iter().enumerate() {
        if let Object::Value(v) = e {
            let holder_bytes = state.holders[v.index()].bytes.clone();
            let at = offsets[i] as usize;
            bytes[at..at + holder_bytes.len()].copy_from_slice(&holder_bytes);
        }
    }
    let holder = state.new_holder(ty, bytes.into_boxed_slice());
    Ok(Object::Value(holder))
}

/// The element objects of a tuple value holder.
pub fn tuple_value_elements(
    state: &mut CompilerState,
    value: ValueId,
    ty: TypeId,
) -> CompileResult<Vec<Object>> {
    let TypeKind::Tuple(element_types) = state.types.get(ty).kind.clone() else {
        let name = state.type_name(ty);
        return Err(state.type_mismatch("tuple decomposition", "a tuple value", &name));
    };
    let (offsets, _) = state.struct_layout(&element_types)?;
    let mut out = Vec::with_capacity(element_types.len());
    for (i, &ety) in element_types.iter().enumerate() {
        if let TypeKind::Static(obj) = &state.types.get(ety).kind {
            out.push((**obj).clone());
            continue;
        }
        let size = state.type_size(ety)? as usize;
        let at = offsets[i] as usize;
        let bytes = state.holders[value.index()].bytes[at..at + size].to_vec();
        let holder = state.new_holder(ety, bytes.into_boxed_slice());
        out.push(Object::Value(holder));
    }
    Ok(out)
}

//
// evaluating expressions
//

/// Evaluates an expression as references: temporaries are materialized on
/// the stack, lvalues come back as views of their existing storage.
pub fn eval_expr_as_ref(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<MultiEValue> {
    let mpv = crate::analyzer::safe_analyze_expr(state, expr, env)?;
    let mut out = MultiEValue::with_capacity(mpv.len());
    for pv in &mpv.0 {
        if pv.is_temp {
            out.push(state.eval_alloc(pv.ty)?);
        } else {
            let ptr_ty = state.pointer_type(pv.ty);
            out.push(state.eval_alloc(ptr_ty)?);
        }
    }
    eval_expr(state, expr, env, &out)?;
    let mut refs = MultiEValue::with_capacity(out.len());
    for (pv, ev) in mpv.0.iter().zip(&out) {
        if pv.is_temp {
            refs.push(*ev);
        } else {
            refs.push(deref_pointer_cell(state, ev, pv.ty)?);
        }
    }
    Ok(refs)
}

fn deref_pointer_cell(
    state: &mut CompilerState,
    cell: &EValue,
    pointee: TypeId,
) -> CompileResult<EValue> {
    let bytes = state.read_place(cell.place, 8)?;
    let raw = u64::from_le_bytes(bytes.try_into().expect("eight bytes"));
    let place = decode_place(raw)
        .ok_or_else(|| state.eval_error("invalid compile-time pointer"))?;
    Ok(EValue {
        ty: pointee,
        place,
        forwarded_rvalue: false,
    })
}

pub fn eval_one_as_ref(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<EValue> {
    let mut values = eval_expr_as_ref(state, expr, env)?;
    if values.len() != 1 {
        return Err(state.error(DiagnosticKind::TypeMismatch {
            context: "expression".to_owned(),
            expected: "a single value".to_owned(),
            actual: format!("{} values", values.len()),
        }));
    }
    Ok(values.pop().expect("length checked"))
}

pub fn eval_multi_as_ref(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
) -> CompileResult<MultiEValue> {
    let mut out = MultiEValue::new();
    for &expr in exprs {
        let kind = state.expr(expr).kind.clone();
        let inner = match kind {
            ExprKind::Unpack(inner) => inner,
            _ => expr,
        };
        out.extend(eval_expr_as_ref(state, inner, env)?);
    }
    Ok(out)
}

/// As-ref evaluation with forwarded-rvalue marking, for `forward`
/// bindings.
fn eval_forward_multi_as_ref(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
) -> CompileResult<MultiEValue> {
    let mut out = MultiEValue::new();
    for &expr in exprs {
        let kind = state.expr(expr).kind.clone();
        let inner = match kind {
            ExprKind::Unpack(inner) => inner,
            _ => expr,
        };
        let mpv = crate::analyzer::safe_analyze_expr(state, inner, env)?;
        let mut refs = eval_expr_as_ref(state, inner, env)?;
        for (pv, ev) in mpv.0.iter().zip(refs.iter_mut()) {
            ev.forwarded_rvalue = pv.is_temp;
        }
        out.append(&mut refs);
    }
    Ok(out)
}

/// Evaluates into caller-provided destinations by value.
pub fn eval_expr_into(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
    dests: &[EValue],
) -> CompileResult<()> {
    let mpv = crate::analyzer::safe_analyze_expr(state, expr, env)?;
    if mpv.len() != dests.len() {
        return Err(state.eval_error("arity mismatch in compile-time evaluation"));
    }
    let marker = state.eval_mark();
    let mut out = MultiEValue::with_capacity(dests.len());
    for (pv, dest) in mpv.0.iter().zip(dests) {
        if pv.is_temp {
            out.push(*dest);
        } else {
            let ptr_ty = state.pointer_type(pv.ty);
            out.push(state.eval_alloc(ptr_ty)?);
        }
    }
    eval_expr(state, expr, env, &out)?;
    for ((pv, dest), cell) in mpv.0.iter().zip(dests).zip(&out) {
        if !pv.is_temp {
            let source = deref_pointer_cell(state, cell, pv.ty)?;
            copy_value(state, dest, &source)?;
        }
    }
    eval_pop(state, marker);
    Ok(())
}

pub fn eval_multi_into(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
    dests: &[EValue],
) -> CompileResult<()> {
    let mut at = 0usize;
    for &expr in exprs {
        let kind = state.expr(expr).kind.clone();
        let inner = match kind {
            ExprKind::Unpack(inner) => inner,
            _ => expr,
        };
        let mpv = crate::analyzer::safe_analyze_expr(state, inner, env)?;
        let n = mpv.len();
        if at + n > dests.len() {
            return Err(state.eval_error("arity mismatch in compile-time evaluation"));
        }
        eval_expr_into(state, inner, env, &dests[at..at + n])?;
        at += n;
    }
    if at != dests.len() {
        return Err(state.eval_error("arity mismatch in compile-time evaluation"));
    }
    Ok(())
}

/// Raw multi-value evaluation into `out` cells whose shapes follow the
/// analysis (value cells for temporaries, pointer cells otherwise).
pub fn eval_multi(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    let mut at = 0usize;
    for &expr in exprs {
        let kind = state.expr(expr).kind.clone();
        let inner = match kind {
            ExprKind::Unpack(inner) => inner,
            _ => expr,
        };
        let mpv = crate::analyzer::safe_analyze_expr(state, inner, env)?;
        let n = mpv.len();
        if at + n > out.len() {
            return Err(state.eval_error("arity mismatch in compile-time evaluation"));
        }
        eval_expr(state, inner, env, &out[at..at + n])?;
        at += n;
    }
    Ok(())
}

/// The core walk: evaluates one expression into `out` cells.
pub fn eval_expr(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    let location = state.expr_location(expr);
    state.push_location(location);
    let result = eval_expr_inner(state, expr, env, out);
    state.pop_location();
    result
}

fn eval_expr_inner(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    let kind = state.expr(expr).kind.clone();
    match kind {
        ExprKind::BoolLiteral(value) => {
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &[u8::from(value)])
        }
        ExprKind::IntLiteral { value, suffix } => {
            let default_ty = {
                let module = state.env_module(env);
                module.map_or(state.core.int32, |m| {
                    state.modules[m.index()].default_integer_type
                })
            };
            let text = state.interner.get(value).to_owned();
            let suffix_text = suffix.map(|s| state.interner.get(s).to_owned());
            let holder = crate::literals::parse_int_literal(
                state,
                &text,
                suffix_text.as_deref(),
                default_ty,
            )?;
            eval_value_holder(state, holder, out)
        }
        ExprKind::FloatLiteral { value, suffix } => {
            let default_ty = {
                let module = state.env_module(env);
                module.map_or(state.core.float64, |m| {
                    state.modules[m.index()].default_float_type
                })
            };
            let text = state.interner.get(value).to_owned();
            let suffix_text = suffix.map(|s| state.interner.get(s).to_owned());
            let holder = crate::literals::parse_float_literal(
                state,
                &text,
                suffix_text.as_deref(),
                default_ty,
            )?;
            eval_value_holder(state, holder, out)
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
            eval_expr(state, desugared, env, out)
        }
        ExprKind::StringLiteral(_)
        | ExprKind::IdentifierLiteral(_)
        | ExprKind::FileExpr
        | ExprKind::LineExpr
        | ExprKind::ColumnExpr => {
            // statics: the value is carried entirely by the type
            let _ = single_out(state, out)?;
            Ok(())
        }
        ExprKind::NameRef(name) => {
            let obj = state.safe_lookup_env(env, name)?;
            match obj {
                Object::Expr(inner, home_env) => eval_expr(state, inner, home_env, out),
                Object::ExprList(inner, home_env) => {
                    let inner = inner.clone();
                    eval_multi(state, &inner, home_env, out)
                }
                other => eval_static_object(state, &other, out),
            }
        }
        ExprKind::Tuple(args) => {
            if args.len() == 1 && !matches!(state.expr(args[0]).kind, ExprKind::Unpack(_)) {
                return eval_expr(state, args[0], env, out);
            }
            let dest = single_out(state, out)?;
            let TypeKind::Tuple(element_types) = state.types.get(dest.ty).kind.clone() else {
                return Err(state.eval_error("tuple expression with a non-tuple destination"));
            };
            let (offsets, _) = state.struct_layout(&element_types)?;
            let mut element_dests = MultiEValue::with_capacity(element_types.len());
            for (i, &ety) in element_types.iter().enumerate() {
                element_dests.push(EValue {
                    ty: ety,
                    place: dest.place.offset_by(offsets[i]),
                    forwarded_rvalue: false,
                });
            }
            eval_multi_into(state, &args, env, &element_dests)
        }
        ExprKind::Paren(args) => eval_multi(state, &args, env, out),
        ExprKind::Indexing { expr: base, args } => {
            eval_indexing_expr(state, base, &args, env, out)
        }
        ExprKind::Call { expr: callable, args } => {
            eval_call_expr(state, callable, &args, env, out)
        }
        ExprKind::FieldRef { .. } => {
            let module = state
                .env_module(env)
                .ok_or_else(|| state.eval_error("field reference outside a module"))?;
            let desugared = crate::desugar::desugar_field_ref(state, expr, module)?;
            eval_expr(state, desugared, env, out)
        }
        ExprKind::StaticIndexing { .. } => {
            let desugared = crate::desugar::desugar_static_indexing(state, expr);
            eval_expr(state, desugared, env, out)
        }
        ExprKind::VariadicOp { .. } => {
            let desugared = crate::desugar::desugar_variadic_op(state, expr);
            eval_expr(state, desugared, env, out)
        }
        ExprKind::And { left, right } => {
            let dest = single_out(state, out)?;
            let marker = state.eval_mark();
            let a = eval_one_as_ref(state, left, env)?;
            let mut result = eval_to_bool(state, &a)?;
            if result {
                let b = eval_one_as_ref(state, right, env)?;
                result = eval_to_bool(state, &b)?;
            }
            eval_destroy_and_pop(state, marker)?;
            state.write_place(dest.place, &[u8::from(result)])
        }
        ExprKind::Or { left, right } => {
            let dest = single_out(state, out)?;
            let marker = state.eval_mark();
            let a = eval_one_as_ref(state, left, env)?;
            let mut result = eval_to_bool(state, &a)?;
            if !result {
                let b = eval_one_as_ref(state, right, env)?;
                result = eval_to_bool(state, &b)?;
            }
            eval_destroy_and_pop(state, marker)?;
            state.write_place(dest.place, &[u8::from(result)])
        }
        ExprKind::Lambda(_) => {
            let converted = crate::analyzer::initialize_lambda(state, expr, env)?;
            eval_expr(state, converted, env, out)
        }
        ExprKind::Unpack(_) => Err(state.eval_error("incorrect usage of the unpack operator")),
        ExprKind::StaticExpr(_) => {
            // statics carry no bytes
            let _ = single_out(state, out)?;
            Ok(())
        }
        ExprKind::DispatchExpr(_) => {
            Err(state.eval_error("dispatch operator used outside call arguments"))
        }
        ExprKind::ForeignExpr { .. } => {
            let (inner, foreign_env) = crate::analyzer::resolve_foreign(state, expr)?;
            eval_expr(state, inner, foreign_env, out)
        }
        ExprKind::ObjectExpr(obj) => eval_static_object(state, &obj, out),
        ExprKind::EvalExpr { .. } => {
            let value = crate::desugar::desugar_eval_expr(state, expr, env)?;
            eval_multi(state, &value, env, out)
        }
    }
}

fn single_out<'a>(
    state: &CompilerState,
    out: &'a [EValue],
) -> CompileResult<&'a EValue> {
    match out {
        [one] => Ok(one),
        _ => Err(state.eval_error("arity mismatch in compile-time evaluation")),
    }
}

fn eval_to_bool(state: &mut CompilerState, ev: &EValue) -> CompileResult<bool> {
    if !state.types.get(ev.ty).kind_is_bool() {
        let name = state.type_name(ev.ty);
        return Err(state.type_mismatch("condition", "Bool", &name));
    }
    Ok(state.read_place(ev.place, 1)?[0] != 0)
}

fn eval_value_holder(
    state: &mut CompilerState,
    holder: ValueId,
    out: &[EValue],
) -> CompileResult<()> {
    let dest = single_out(state, out)?;
    let bytes = state.holders[holder.index()].bytes.clone();
    state.write_place(dest.place, &bytes)
}

/// Materializes a static object into the destination cells.
fn eval_static_object(
    state: &mut CompilerState,
    obj: &Object,
    out: &[EValue],
) -> CompileResult<()> {
    match obj {
        Object::Value(v) => eval_value_holder(state, *v, out),
        Object::EnumMember { index, .. } => {
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &(*index as i32).to_le_bytes())
        }
        Object::EValue(ev) => {
            let dest = single_out(state, out)?;
            write_reference(state, dest, ev)
        }
        Object::MultiEValue(evs) => {
            if evs.len() != out.len() {
                return Err(state.eval_error("arity mismatch in compile-time evaluation"));
            }
            for (ev, dest) in evs.iter().zip(out) {
                write_reference(state, dest, ev)?;
            }
            Ok(())
        }
        Object::MultiStatic(items) => {
            if items.len() != out.len() {
                return Err(state.eval_error("arity mismatch in compile-time evaluation"));
            }
            for (item, dest) in items.iter().zip(out) {
                eval_static_object(state, item, std::slice::from_ref(dest))?;
            }
            Ok(())
        }
        Object::GlobalVar(_) | Object::ExternalVar(_) | Object::ExternalProc(_) => {
            Err(state.eval_error("run-time globals are not available at compile time"))
        }
        Object::Pattern(_) | Object::MultiPattern(_) => {
            Err(state.eval_error("pattern cannot be used as a value"))
        }
        Object::GlobalAlias(a) => {
            let decl = &state.global_aliases[a.index()];
            if decl.has_params() {
                let _ = single_out(state, out)?;
                return Ok(());
            }
            let (expr, decl_env) = (decl.expr, decl.env);
            eval_expr(state, expr, decl_env, out)
        }
        // statics carry no bytes
        _ => {
            let _ = single_out(state, out)?;
            Ok(())
        }
    }
}

/// Writes either the value or the address of `src`, depending on the
/// destination cell's shape.
fn write_reference(
    state: &mut CompilerState,
    dest: &EValue,
    src: &EValue,
) -> CompileResult<()> {
    if dest.ty == src.ty {
        return copy_value(state, dest, src);
    }
    let ptr_ty = state.pointer_type(src.ty);
    if dest.ty == ptr_ty {
        let encoded = encode_place(src.place).to_le_bytes();
        return state.write_place(dest.place, &encoded);
    }
    Err(state.eval_error("type mismatch materializing a local value"))
}

fn eval_indexing_expr(
    state: &mut CompilerState,
    base: ExprId,
    args: &[ExprId],
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    // indexing in evaluated position is type construction or alias
    // expansion; both produce statics
    let pv = crate::analyzer::safe_analyze_one(state, base, env)?;
    if let TypeKind::Static(obj) = state.types.get(pv.ty).kind.clone() {
        if let Object::GlobalAlias(alias) = *obj {
            let decl = &state.global_aliases[alias.index()];
            if decl.has_params() {
                let (expr, decl_env, param_names, var_param) = {
                    let d = &state.global_aliases[alias.index()];
                    (d.expr, d.env, d.params.clone(), d.var_param)
                };
                let params = evaluate_multi_static(state, args, env)?;
                let env2 = state.new_env(EnvParent::Env(decl_env));
                for (name, value) in param_names.iter().zip(&params) {
                    state.add_local(env2, *name, value.clone());
                }
                if let Some(name) = var_param {
                    let rest = params.get(param_names.len()..).unwrap_or(&[]).to_vec();
                    state.add_local(env2, name, Object::MultiStatic(rest));
                }
                return eval_expr(state, expr, env2, out);
            }
        }
    }
    // type construction: the analyzer already computed the static result
    let _ = single_out(state, out)?;
    Ok(())
}

//
// calls
//

fn eval_call_expr(
    state: &mut CompilerState,
    callable: ExprId,
    args: &[ExprId],
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    let pv = crate::analyzer::safe_analyze_one(state, callable, env)?;
    match state.types.get(pv.ty).kind.clone() {
        TypeKind::CodePointer { .. } | TypeKind::CCodePointer { .. } => {
            return Err(
                state.eval_error("code pointers cannot be invoked at compile time")
            );
        }
        TypeKind::Static(obj) => {
            return eval_call_static(state, &obj, args, env, out);
        }
        _ => {}
    }
    let location = state.expr_location(callable);
    let call_op = crate::desugar::prelude_ref(state, "call", location);
    let mut new_args: crate::ast::ExprList = smallvec::smallvec![callable];
    new_args.extend(args.iter().copied());
    eval_call_expr(state, call_op, &new_args, env, out)
}

fn eval_call_static(
    state: &mut CompilerState,
    obj: &Object,
    args: &[ExprId],
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    match obj {
        Object::PrimOp(op) => {
            let marker = state.eval_mark();
            let mev = eval_multi_as_ref(state, args, env)?;
            let result = eval_prim_op(state, *op, &mev, out);
            eval_destroy_and_pop(state, marker)?;
            result
        }
        Object::Type(_)
        | Object::Record(_)
        | Object::Variant(_)
        | Object::Procedure(_)
        | Object::GlobalAlias(_) => {
            let mut dispatch_indices = Vec::new();
            let Some(mpv) =
                crate::analyzer::analyze_multi_args(state, args, env, &mut dispatch_indices)?
            else {
                return Err(state.error(DiagnosticKind::Recursion {
                    what: "compile-time call analysis".to_owned(),
                }));
            };
            if !dispatch_indices.is_empty() {
                let marker = state.eval_mark();
                let mev = eval_multi_as_ref(state, args, env)?;
                let result = eval_dispatch(state, obj, &mev, &mpv, &dispatch_indices, out);
                eval_destroy_and_pop(state, marker)?;
                return result;
            }
            let (args_key, args_tempness) = crate::analyzer::compute_args_key(&mpv);
            crate::analyzer::with_call_context(state, obj, &args_key, |state| {
                let Some(entry) =
                    crate::analyzer::analyze_callable(state, obj, &args_key, &args_tempness)?
                else {
                    return Err(state.error(DiagnosticKind::Recursion {
                        what: "compile-time call".to_owned(),
                    }));
                };
                if state.invoke_entries[entry.index()].call_by_name {
                    eval_call_by_name(state, entry, args, env, out)
                } else {
                    if !state.invoke_entries[entry.index()].analyzed {
                        return Err(state.error(DiagnosticKind::Recursion {
                            what: "compile-time call".to_owned(),
                        }));
                    }
                    let marker = state.eval_mark();
                    let mev = eval_multi_as_ref(state, args, env)?;
                    let result = eval_call_code(state, entry, &mev, out);
                    eval_destroy_and_pop(state, marker)?;
                    result
                }
            })
        }
        other => {
            let rendered = print_object(state, other);
            Err(state.type_mismatch("compile-time call", "a callable", &rendered))
        }
    }
}

/// Calls a prelude operator with already-evaluated arguments; used for
/// scope-exit destruction.
fn call_operator(
    state: &mut CompilerState,
    name: &str,
    args: &[EValue],
    out: &[EValue],
) -> CompileResult<()> {
    let Some(prelude) = state.prelude_module else {
        return Ok(());
    };
    let op_name = match state.interner.find(name) {
        Some(n) => n,
        None => return Ok(()),
    };
    let Some(obj) = state.modules[prelude.index()].globals.get(&op_name).cloned() else {
        return Ok(());
    };
    let args_key: Vec<TypeId> = args.iter().map(|ev| ev.ty).collect();
    let args_tempness: Vec<Tempness> = vec![Tempness::Lvalue; args.len()];
    let Some(entry) = crate::analyzer::analyze_callable(state, &obj, &args_key, &args_tempness)?
    else {
        return Ok(());
    };
    if !state.invoke_entries[entry.index()].analyzed {
        return Ok(());
    }
    eval_call_code(state, entry, &args.to_vec(), out)
}

fn eval_ctor(
    state: &mut CompilerState,
    ctor: CtorKind,
    args: &MultiEValue,
    out: &[EValue],
) -> CompileResult<()> {
    let dest = single_out(state, out)?;
    match ctor {
        CtorKind::Record(ty) => {
            let info = state.record_info(ty)?;
            for ((arg, &offset), &fty) in
                args.iter().zip(&info.offsets).zip(&info.field_types)
            {
                let field_dest = EValue {
                    ty: fty,
                    place: dest.place.offset_by(offset),
                    forwarded_rvalue: false,
                };
                copy_value(state, &field_dest, arg)?;
            }
            Ok(())
        }
        CtorKind::Variant { ty, tag } => {
            let info = state.variant_info(ty)?;
            state.write_place(dest.place, &(tag as i32).to_le_bytes())?;
            let member_ty = info.member_types[tag as usize];
            let payload_dest = EValue {
                ty: member_ty,
                place: dest.place.offset_by(info.payload_offset),
                forwarded_rvalue: false,
            };
            copy_value(state, &payload_dest, &args[0])
        }
        CtorKind::NewType(_) => copy_value(
            state,
            &EValue {
                ty: args[0].ty,
                place: dest.place,
                forwarded_rvalue: false,
            },
            &args[0],
        ),
    }
}

/// Executes a specialized body over evaluated arguments.
pub fn eval_call_code(
    state: &mut CompilerState,
    entry: InvokeEntryId,
    args: &MultiEValue,
    out: &[EValue],
) -> CompileResult<()> {
    let (ctor, code, entry_env, fixed_names, var_name, var_types, forwarded, return_is_ref, return_types) = {
        let e = &state.invoke_entries[entry.index()];
        (
            e.ctor,
            e.code.clone(),
            e.env,
            e.fixed_arg_names.clone(),
            e.var_arg_name,
            e.var_arg_types.clone(),
            e.forwarded_rvalue_flags.clone(),
            e.return_is_ref.clone(),
            e.return_types.clone(),
        )
    };
    if let Some(ctor) = ctor {
        return eval_ctor(state, ctor, args, out);
    }
    let Some(code) = code else {
        return Err(state.eval_error("operation has no body"));
    };
    if code.is_llvm() {
        return Err(state.eval_error(
            "inline llvm bodies cannot be executed at compile time",
        ));
    }
    let CodeBody::Statements(body) = code.body else {
        return Err(state.eval_error("operation has no body"));
    };

    let env = state.new_env(EnvParent::Env(entry_env));
    for (i, name) in fixed_names.iter().enumerate() {
        let mut ev = args[i];
        ev.forwarded_rvalue = forwarded.get(i).copied().unwrap_or(false);
        state.add_local(env, *name, Object::EValue(ev));
    }
    if let Some(var_name) = var_name {
        let n = fixed_names.len();
        let mut var_args = MultiEValue::with_capacity(var_types.len());
        for i in 0..var_types.len() {
            let mut ev = args[n + i];
            ev.forwarded_rvalue = forwarded.get(n + i).copied().unwrap_or(false);
            var_args.push(ev);
        }
        state.add_local(env, var_name, Object::MultiEValue(var_args));
    }

    if out.len() != return_types.len() {
        return Err(state.eval_error("arity mismatch in compile-time call"));
    }
    let mut returns = Vec::with_capacity(out.len());
    for ((&is_ref, &ty), ev) in return_is_ref.iter().zip(&return_types).zip(out) {
        returns.push(EReturn {
            by_ref: is_ref,
            ty,
            value: *ev,
        });
    }
    bind_named_returns(state, &code, env, &returns);

    let ctx = EvalContext { returns };
    let term = eval_statement(state, body, env, &ctx)?;
    match term {
        None | Some(Termination::Return) => Ok(()),
        Some(Termination::Break) => Err(state.eval_error("invalid 'break' statement")),
        Some(Termination::Continue) => Err(state.eval_error("invalid 'continue' statement")),
        Some(Termination::Goto(..)) => Err(state.eval_error("invalid 'goto' statement")),
    }
}

fn bind_named_returns(
    state: &mut CompilerState,
    code: &Code,
    env: EnvId,
    returns: &[EReturn],
) {
    if !code.has_return_specs() {
        return;
    }
    let mut i = 0usize;
    for spec in &code.return_specs {
        if let Some(name) = spec.name {
            if let Some(r) = returns.get(i) {
                state.add_local(env, name, Object::EValue(r.value));
            }
        }
        i += 1;
    }
    if let Some(var_spec) = &code.var_return_spec {
        if let Some(name) = var_spec.name {
            let rest: MultiEValue = returns[i.min(returns.len())..]
                .iter()
                .map(|r| r.value)
                .collect();
            state.add_local(env, name, Object::MultiEValue(rest));
        }
    }
}

/// Call-by-name: each argument expression, with its home environment, is
/// bound into the body env and re-evaluated where referenced.
pub fn eval_call_by_name(
    state: &mut CompilerState,
    entry: InvokeEntryId,
    args: &[ExprId],
    env: EnvId,
    out: &[EValue],
) -> CompileResult<()> {
    let (code, entry_env, fixed_names, var_name) = {
        let e = &state.invoke_entries[entry.index()];
        debug_assert!(e.call_by_name);
        let Some(code) = e.code.clone() else {
            return Err(state.eval_error("call-by-name operation has no body"));
        };
        (code, e.env, e.fixed_arg_names.clone(), e.var_arg_name)
    };
    let CodeBody::Statements(body) = code.body else {
        return Err(state.eval_error("call-by-name operation has no body"));
    };
    let body_env = state.new_env(EnvParent::Env(entry_env));
    for (i, name) in fixed_names.iter().enumerate() {
        state.add_local(body_env, *name, Object::Expr(args[i], env));
    }
    if let Some(var_name) = var_name {
        let rest: crate::ast::ExprList = args[fixed_names.len()..].iter().copied().collect();
        state.add_local(body_env, var_name, Object::ExprList(rest, env));
    }

    let Some(mpv) = crate::analyzer::analyze_call_by_name(state, entry, args, env)? else {
        return Err(state.error(DiagnosticKind::Recursion {
            what: "call-by-name analysis".to_owned(),
        }));
    };
    if mpv.len() != out.len() {
        return Err(state.eval_error("arity mismatch in compile-time call"));
    }
    let mut returns = Vec::with_capacity(out.len());
    for (pv, ev) in mpv.0.iter().zip(out) {
        returns.push(EReturn {
            by_ref: !pv.is_temp,
            ty: pv.ty,
            value: *ev,
        });
    }
    bind_named_returns(state, &code, body_env, &returns);

    let ctx = EvalContext { returns };
    let term = eval_statement(state, body, body_env, &ctx)?;
    match term {
        None | Some(Termination::Return) => Ok(()),
        Some(_) => Err(state.eval_error("invalid loop control in call-by-name body")),
    }
}

/// Variant dispatch: reads the tag, substitutes the payload view, and
/// recurses until no dispatched positions remain.
fn eval_dispatch(
    state: &mut CompilerState,
    callable: &Object,
    args: &MultiEValue,
    pv_args: &crate::analyzer::MultiPValue,
    dispatch_indices: &[usize],
    out: &[EValue],
) -> CompileResult<()> {
    let Some((&index, rest)) = dispatch_indices.split_first() else {
        let (args_key, args_tempness) = crate::analyzer::compute_args_key(pv_args);
        let Some(entry) =
            crate::analyzer::analyze_callable(state, callable, &args_key, &args_tempness)?
        else {
            return Err(state.error(DiagnosticKind::Recursion {
                what: "compile-time dispatch".to_owned(),
            }));
        };
        if !state.invoke_entries[entry.index()].analyzed {
            return Err(state.error(DiagnosticKind::Recursion {
                what: "compile-time dispatch".to_owned(),
            }));
        }
        return eval_call_code(state, entry, args, out);
    };
    let variant = args[index];
    let info = state.variant_info(variant.ty)?;
    let tag_bytes = state.read_place(variant.place, 4)?;
    let tag = i32::from_le_bytes(tag_bytes.try_into().expect("four bytes"));
    let Some(&member_ty) = info.member_types.get(usize::try_from(tag).unwrap_or(usize::MAX))
    else {
        return Err(state.eval_error("invalid variant tag in dispatch"));
    };
    let mut new_args = args.clone();
    new_args[index] = EValue {
        ty: member_ty,
        place: variant.place.offset_by(info.payload_offset),
        forwarded_rvalue: variant.forwarded_rvalue,
    };
    let mut new_pvs = pv_args.clone();
    new_pvs.0[index] = crate::analyzer::PValue {
        ty: member_ty,
        is_temp: pv_args.0[index].is_temp,
    };
    eval_dispatch(state, callable, &new_args, &new_pvs, rest, out)
}

//
// statements
//

fn eval_statement(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
    ctx: &EvalContext,
) -> CompileResult<Option<Termination>> {
    let location = state.stmt(stmt).location;
    state.push_location(location);
    let result = eval_statement_inner(state, stmt, env, ctx);
    state.pop_location();
    result
}

fn eval_statement_inner(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
    ctx: &EvalContext,
) -> CompileResult<Option<Termination>> {
    let kind = state.stmt(stmt).kind.clone();
    match kind {
        StmtKind::Block(statements) => {
            let block_marker = state.eval_mark();
            let mut env = env;
            let mut labels: AHashMap<StrId, LabelInfo> = AHashMap::new();
            collect_labels(state, &statements, 0, env, &mut labels);
            let mut termination = None;
            let mut position = 0usize;
            while position < statements.len() {
                let s = statements[position];
                let inner_kind = state.stmt(s).kind.clone();
                match inner_kind {
                    StmtKind::Label(_) => {}
                    StmtKind::Binding { .. } => {
                        env = eval_binding(state, s, env)?;
                        collect_labels(state, &statements, position + 1, env, &mut labels);
                    }
                    _ => {
                        let term = eval_statement(state, s, env, ctx)?;
                        if let Some(term) = term {
                            if let Termination::Goto(label, _) = &term {
                                if let Some(info) = labels.get(label).copied() {
                                    env = info.env;
                                    eval_destroy_and_pop(state, info.marker)?;
                                    position = info.position;
                                    continue;
                                }
                            }
                            termination = Some(term);
                            break;
                        }
                    }
                }
                position += 1;
            }
            eval_destroy_and_pop(state, block_marker)?;
            Ok(termination)
        }
        StmtKind::Label(_) | StmtKind::Binding { .. } => {
            Err(state.eval_error("invalid statement position"))
        }
        StmtKind::Assignment { left, right } => {
            let lhs_pv = crate::analyzer::safe_analyze_multi(state, &left, env)?;
            let rhs_pv = crate::analyzer::safe_analyze_multi(state, &right, env)?;
            if lhs_pv.len() != rhs_pv.len() {
                return Err(
                    state.eval_error("arity mismatch between assignment sides")
                );
            }
            for pv in &lhs_pv.0 {
                if pv.is_temp {
                    return Err(state.eval_error("cannot assign to a temporary value"));
                }
            }
            let marker = state.eval_mark();
            if lhs_pv.len() == 1 {
                let rhs = eval_multi_as_ref(state, &right, env)?;
                let lhs = eval_multi_as_ref(state, &left, env)?;
                copy_value(state, &lhs[0], &rhs[0])?;
            } else {
                // fully evaluate the right side first so swaps behave
                let mut temps = MultiEValue::with_capacity(rhs_pv.len());
                for pv in &rhs_pv.0 {
                    temps.push(state.eval_alloc(pv.ty)?);
                }
                eval_multi_into(state, &right, env, &temps)?;
                let lhs = eval_multi_as_ref(state, &left, env)?;
                for (l, r) in lhs.iter().zip(&temps) {
                    copy_value(state, l, r)?;
                }
            }
            eval_destroy_and_pop(state, marker)?;
            Ok(None)
        }
        StmtKind::InitAssignment { left, right } => {
            let lhs_pv = crate::analyzer::safe_analyze_multi(state, &left, env)?;
            let rhs_pv = crate::analyzer::safe_analyze_multi(state, &right, env)?;
            if lhs_pv.len() != rhs_pv.len() {
                return Err(
                    state.eval_error("arity mismatch between assignment sides")
                );
            }
            for (l, r) in lhs_pv.0.iter().zip(&rhs_pv.0) {
                if l.is_temp {
                    return Err(state.eval_error("cannot assign to a temporary value"));
                }
                if l.ty != r.ty {
                    return Err(state.error(DiagnosticKind::TypeMismatch {
                        context: "initialization".to_owned(),
                        expected: state.type_name(l.ty),
                        actual: state.type_name(r.ty),
                    }));
                }
            }
            let marker = state.eval_mark();
            let lhs = eval_multi_as_ref(state, &left, env)?;
            eval_multi_into(state, &right, env, &lhs)?;
            eval_destroy_and_pop(state, marker)?;
            Ok(None)
        }
        StmtKind::VariadicAssignment { .. } => {
            let desugared = crate::desugar::desugar_variadic_assignment(state, stmt);
            eval_statement(state, desugared, env, ctx)
        }
        StmtKind::Goto(label) => Ok(Some(Termination::Goto(
            label,
            state.stmt(stmt).location,
        ))),
        StmtKind::Return { kind, values, .. } => {
            let mpv = crate::analyzer::safe_analyze_multi(state, &values, env)?;
            if mpv.len() != ctx.returns.len() {
                return Err(state.eval_error("return arity mismatch"));
            }
            let mut dests = MultiEValue::with_capacity(ctx.returns.len());
            for (pv, r) in mpv.0.iter().zip(&ctx.returns) {
                let by_ref = match kind {
                    ReturnKind::Value => false,
                    ReturnKind::Ref => true,
                    ReturnKind::Forward => !pv.is_temp,
                };
                if r.ty != pv.ty {
                    return Err(state.error(DiagnosticKind::TypeMismatch {
                        context: "return".to_owned(),
                        expected: state.type_name(r.ty),
                        actual: state.type_name(pv.ty),
                    }));
                }
                if by_ref != r.by_ref {
                    return Err(
                        state.eval_error("mismatching by-ref and by-value returns")
                    );
                }
                if by_ref && pv.is_temp {
                    return Err(
                        state.eval_error("cannot return a temporary value by reference")
                    );
                }
                dests.push(r.value);
            }
            let marker = state.eval_mark();
            match kind {
                ReturnKind::Value => eval_multi_into(state, &values, env, &dests)?,
                ReturnKind::Ref => {
                    let refs = eval_multi_as_ref(state, &values, env)?;
                    for (dest, r) in dests.iter().zip(&refs) {
                        let encoded = encode_place(r.place).to_le_bytes();
                        state.write_place(dest.place, &encoded)?;
                    }
                }
                ReturnKind::Forward => eval_multi(state, &values, env, &dests)?,
            }
            eval_destroy_and_pop(state, marker)?;
            Ok(Some(Termination::Return))
        }
        StmtKind::If {
            condition_statements,
            condition,
            then_part,
            else_part,
        } => {
            let outer_marker = state.eval_mark();
            let mut env = env;
            for s in condition_statements {
                env = eval_binding(state, s, env)?;
            }
            let marker = state.eval_mark();
            let cond = eval_one_as_ref(state, condition, env)?;
            let flag = eval_to_bool(state, &cond)?;
            eval_destroy_and_pop(state, marker)?;
            let result = if flag {
                eval_statement(state, then_part, env, ctx)?
            } else if let Some(else_part) = else_part {
                eval_statement(state, else_part, env, ctx)?
            } else {
                None
            };
            eval_destroy_and_pop(state, outer_marker)?;
            Ok(result)
        }
        StmtKind::Switch { .. } => {
            let desugared = crate::desugar::desugar_switch(state, stmt);
            eval_statement(state, desugared, env, ctx)
        }
        StmtKind::ExprStatement(expr) => {
            let marker = state.eval_mark();
            eval_expr_as_ref(state, expr, env)?;
            eval_destroy_and_pop(state, marker)?;
            Ok(None)
        }
        StmtKind::While {
            condition_statements,
            condition,
            body,
        } => {
            loop {
                let iteration_marker = state.eval_mark();
                let mut loop_env = env;
                for &s in &condition_statements {
                    loop_env = eval_binding(state, s, loop_env)?;
                }
                let marker = state.eval_mark();
                let cond = eval_one_as_ref(state, condition, loop_env)?;
                let flag = eval_to_bool(state, &cond)?;
                eval_destroy_and_pop(state, marker)?;
                if !flag {
                    eval_destroy_and_pop(state, iteration_marker)?;
                    break;
                }
                let term = eval_statement(state, body, loop_env, ctx)?;
                eval_destroy_and_pop(state, iteration_marker)?;
                match term {
                    Some(Termination::Break) => break,
                    Some(Termination::Continue) | None => {}
                    other => return Ok(other),
                }
            }
            Ok(None)
        }
        StmtKind::Break => Ok(Some(Termination::Break)),
        StmtKind::Continue => Ok(Some(Termination::Continue)),
        StmtKind::For { .. } => {
            let desugared = crate::desugar::desugar_for_statement(state, stmt);
            eval_statement(state, desugared, env, ctx)
        }
        StmtKind::ForeignStatement { env: foreign_env, body } => {
            eval_statement(state, body, foreign_env, ctx)
        }
        StmtKind::Try { try_block, .. } => {
            // exception handling does not exist at compile time; the
            // protected block runs directly
            eval_statement(state, try_block, env, ctx)
        }
        StmtKind::Throw { .. } => {
            Err(state.eval_error("throw is not supported in the compile-time evaluator"))
        }
        StmtKind::StaticFor {
            variable, values, ..
        } => {
            let marker = state.eval_mark();
            let mev = eval_forward_multi_as_ref(state, &values, env)?;
            let clones =
                crate::analyzer::initialize_static_for_clones(state, stmt, mev.len());
            for (i, clone) in clones.into_iter().enumerate() {
                let env2 = state.new_env(EnvParent::Env(env));
                state.add_local(env2, variable, Object::EValue(mev[i]));
                if let Some(term) = eval_statement(state, clone, env2, ctx)? {
                    eval_destroy_and_pop(state, marker)?;
                    return Ok(Some(term));
                }
            }
            eval_destroy_and_pop(state, marker)?;
            Ok(None)
        }
        StmtKind::Finally(body) => {
            // no unwinding at compile time: the cleanup runs in order
            eval_statement(state, body, env, ctx)
        }
        StmtKind::OnError(_) => Ok(None),
        StmtKind::Unreachable => {
            Err(state.eval_error("unreachable statement executed at compile time"))
        }
        StmtKind::EvalStatement { .. } => {
            let statements = crate::desugar::desugar_eval_statement(state, stmt, env)?;
            for s in statements {
                if let Some(term) = eval_statement(state, s, env, ctx)? {
                    return Ok(Some(term));
                }
            }
            Ok(None)
        }
        StmtKind::StaticAssert { condition, message } => {
            execute_static_assert(state, condition, &message, env)?;
            Ok(None)
        }
    }
}

fn collect_labels(
    state: &CompilerState,
    statements: &[StmtId],
    start: usize,
    env: EnvId,
    labels: &mut AHashMap<StrId, LabelInfo>,
) {
    for (i, &s) in statements.iter().enumerate().skip(start) {
        match &state.stmt(s).kind {
            StmtKind::Label(name) => {
                labels.insert(
                    *name,
                    LabelInfo {
                        env,
                        marker: state.eval_mark(),
                        position: i + 1,
                    },
                );
            }
            StmtKind::Binding { .. } => return,
            _ => {}
        }
    }
}

/// Executes a binding statement, returning the extended environment.
fn eval_binding(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
) -> CompileResult<EnvId> {
    let StmtKind::Binding { kind, args, values } = state.stmt(stmt).kind.clone() else {
        unreachable!("eval_binding on non-binding");
    };
    match kind {
        BindingKind::Var => {
            let mpv = crate::analyzer::safe_analyze_multi(state, &values, env)?;
            if mpv.len() != args.len() {
                return Err(state.eval_error("binding arity mismatch"));
            }
            let mut cells = MultiEValue::with_capacity(args.len());
            for pv in &mpv.0 {
                cells.push(state.eval_alloc(pv.ty)?);
            }
            let marker = state.eval_mark();
            eval_multi_into(state, &values, env, &cells)?;
            eval_destroy_and_pop(state, marker)?;
            let env2 = state.new_env(EnvParent::Env(env));
            for (arg, cell) in args.iter().zip(&cells) {
                state.add_local(env2, arg.name, Object::EValue(*cell));
            }
            Ok(env2)
        }
        BindingKind::Ref | BindingKind::Forward => {
            let mev = eval_forward_multi_as_ref(state, &values, env)?;
            if mev.len() != args.len() {
                return Err(state.eval_error("binding arity mismatch"));
            }
            let env2 = state.new_env(EnvParent::Env(env));
            for (arg, ev) in args.iter().zip(&mev) {
                let mut ev = *ev;
                if kind == BindingKind::Ref {
                    ev.forwarded_rvalue = false;
                }
                state.add_local(env2, arg.name, Object::EValue(ev));
            }
            Ok(env2)
        }
        BindingKind::Alias => {
            if args.len() != 1 || values.len() != 1 {
                return Err(
                    state.eval_error("alias bindings take exactly one name and value")
                );
            }
            let env2 = state.new_env(EnvParent::Env(env));
            state.add_local(env2, args[0].name, Object::Expr(values[0], env));
            Ok(env2)
        }
    }
}

//
// primitive operations
//

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Int(i128),
    Float(f64),
}

fn read_scalar(state: &CompilerState, ev: &EValue) -> CompileResult<Scalar> {
    match state.types.get(ev.ty).kind.clone() {
        TypeKind::Bool => Ok(Scalar::Int(i128::from(
            state.read_place(ev.place, 1)?[0] != 0,
        ))),
        TypeKind::Integer { bits, signed } => {
            let bytes = state.read_place(ev.place, usize::from(bits) / 8)?;
            Ok(Scalar::Int(read_int_bytes(&bytes, bits, signed)))
        }
        TypeKind::Float { bits: 32, .. } => {
            let bytes = state.read_place(ev.place, 4)?;
            Ok(Scalar::Float(f64::from(f32::from_le_bytes(
                bytes.try_into().expect("four bytes"),
            ))))
        }
        TypeKind::Float { .. } => {
            let bytes = state.read_place(ev.place, 8)?;
            Ok(Scalar::Float(f64::from_le_bytes(
                bytes.try_into().expect("eight bytes"),
            )))
        }
        TypeKind::Enum(_) => {
            let bytes = state.read_place(ev.place, 4)?;
            Ok(Scalar::Int(i128::from(i32::from_le_bytes(
                bytes.try_into().expect("four bytes"),
            ))))
        }
        _ => {
            let name = state.type_name(ev.ty);
            Err(state.type_mismatch("numeric operation", "a numeric value", &name))
        }
    }
}

fn write_scalar(
    state: &mut CompilerState,
    dest: &EValue,
    value: Scalar,
) -> CompileResult<()> {
    match state.types.get(dest.ty).kind.clone() {
        TypeKind::Bool => {
            let Scalar::Int(v) = value else {
                return Err(state.eval_error("expected an integer value"));
            };
            state.write_place(dest.place, &[u8::from(v != 0)])
        }
        TypeKind::Integer { bits, .. } => {
            let Scalar::Int(v) = value else {
                return Err(state.eval_error("expected an integer value"));
            };
            let mut bytes = vec![0u8; usize::from(bits) / 8];
            write_int_bytes(&mut bytes, bits, v);
            state.write_place(dest.place, &bytes)
        }
        TypeKind::Float { bits: 32, .. } => {
            let v = match value {
                Scalar::Float(f) => f,
                Scalar::Int(i) => i as f64,
            };
            state.write_place(dest.place, &(v as f32).to_le_bytes())
        }
        TypeKind::Float { .. } => {
            let v = match value {
                Scalar::Float(f) => f,
                Scalar::Int(i) => i as f64,
            };
            state.write_place(dest.place, &v.to_le_bytes())
        }
        TypeKind::Enum(_) => {
            let Scalar::Int(v) = value else {
                return Err(state.eval_error("expected an integer value"));
            };
            state.write_place(dest.place, &(v as i32).to_le_bytes())
        }
        _ => {
            let name = state.type_name(dest.ty);
            Err(state.type_mismatch("numeric operation", "a numeric destination", &name))
        }
    }
}

/// Truncates an integer to its destination width, mirroring the target's
/// two's-complement arithmetic.
fn wrap_to(state: &CompilerState, ty: TypeId, value: i128) -> i128 {
    if let TypeKind::Integer { bits, signed } = state.types.get(ty).kind {
        let mut bytes = [0u8; 16];
        write_int_bytes(&mut bytes, bits, value);
        read_int_bytes(&bytes, bits, signed)
    } else {
        value
    }
}

fn static_of_type(state: &CompilerState, ty: TypeId) -> Option<Object> {
    match &state.types.get(ty).kind {
        TypeKind::Static(obj) => Some((**obj).clone()),
        _ => None,
    }
}

fn arg_static_obj(
    state: &CompilerState,
    args: &MultiEValue,
    index: usize,
) -> CompileResult<Object> {
    let Some(ev) = args.get(index) else {
        return Err(state.eval_error("too few arguments to primitive operation"));
    };
    static_of_type(state, ev.ty).ok_or_else(|| {
        let name = state.type_name(args[index].ty);
        state.type_mismatch("primitive operation", "a static argument", &name)
    })
}

fn write_bool(state: &mut CompilerState, out: &[EValue], value: bool) -> CompileResult<()> {
    let dest = single_out(state, out)?;
    state.write_place(dest.place, &[u8::from(value)])
}

fn write_size(state: &mut CompilerState, out: &[EValue], value: u64) -> CompileResult<()> {
    let dest = single_out(state, out)?;
    state.write_place(dest.place, &value.to_le_bytes())
}

fn write_pointer_to(
    state: &mut CompilerState,
    out: &[EValue],
    target: &EValue,
) -> CompileResult<()> {
    let dest = single_out(state, out)?;
    write_reference(state, dest, target)
}

/// Identifier concat and slice: computed from the static argument types;
/// shared with the analyzer, which types the result.
pub fn eval_identifier_prim(
    state: &mut CompilerState,
    op: PrimOp,
    args: &crate::analyzer::MultiPValue,
) -> CompileResult<StrId> {
    let ident_at = |state: &CompilerState, i: usize| -> CompileResult<StrId> {
        let Some(pv) = args.0.get(i) else {
            return Err(state.eval_error("too few arguments to identifier operation"));
        };
        match static_of_type(state, pv.ty) {
            Some(Object::Ident(s)) => Ok(s),
            _ => {
                let name = state.type_name(pv.ty);
                Err(state.type_mismatch("identifier operation", "a static identifier", &name))
            }
        }
    };
    match op {
        PrimOp::IdentifierConcat => {
            let mut text = String::new();
            for i in 0..args.len() {
                let part = ident_at(state, i)?;
                text.push_str(state.interner.get(part));
            }
            Ok(state.intern(&text))
        }
        PrimOp::IdentifierSlice => {
            let ident = ident_at(state, 0)?;
            let from = static_size_arg(state, args, 1)?;
            let to = static_size_arg(state, args, 2)?;
            let text = state.interner.get(ident).to_owned();
            let from = from as usize;
            let to = (to as usize).min(text.len());
            if from > to || to > text.len() {
                return Err(state.eval_error("identifier slice out of range"));
            }
            let sliced = text[from..to].to_owned();
            Ok(state.intern(&sliced))
        }
        _ => unreachable!("not an identifier primitive"),
    }
}

fn static_size_arg(
    state: &CompilerState,
    args: &crate::analyzer::MultiPValue,
    index: usize,
) -> CompileResult<u64> {
    let Some(pv) = args.0.get(index) else {
        return Err(state.eval_error("too few arguments to primitive operation"));
    };
    match static_of_type(state, pv.ty) {
        Some(Object::Value(v)) => {
            let holder = &state.holders[v.index()];
            if let TypeKind::Integer { bits, signed } = state.types.get(holder.ty).kind {
                let value = read_int_bytes(&holder.bytes, bits, signed);
                if value >= 0 {
                    return Ok(u64::try_from(value).unwrap_or_default());
                }
            }
            Err(state.eval_error("expected a non-negative static integer"))
        }
        _ => Err(state.eval_error("expected a static integer")),
    }
}

/// Executes a primitive op over evaluated argument references.
pub fn eval_prim_op(
    state: &mut CompilerState,
    op: PrimOp,
    args: &MultiEValue,
    out: &[EValue],
) -> CompileResult<()> {
    match op {
        PrimOp::TypeP => {
            let is_type = matches!(arg_static_obj(state, args, 0), Ok(Object::Type(_)));
            write_bool(state, out, is_type)
        }
        PrimOp::TypeSize => {
            let obj = arg_static_obj(state, args, 0)?;
            let ty = crate::analyzer::obj_as_type(state, &obj)?;
            let size = state.type_size(ty)?;
            write_size(state, out, size)
        }
        PrimOp::TypeAlignment => {
            let obj = arg_static_obj(state, args, 0)?;
            let ty = crate::analyzer::obj_as_type(state, &obj)?;
            let align = state.type_alignment(ty)?;
            write_size(state, out, align)
        }
        PrimOp::CallDefinedP => {
            let callable = arg_static_obj(state, args, 0)?;
            let mut key = Vec::with_capacity(args.len().saturating_sub(1));
            for i in 1..args.len() {
                let obj = arg_static_obj(state, args, i)?;
                key.push(crate::analyzer::obj_as_type(state, &obj)?);
            }
            let tempness = vec![Tempness::Rvalue; key.len()];
            let defined =
                crate::analyzer::analyze_is_defined(state, &callable, &key, &tempness)?;
            write_bool(state, out, defined)
        }
        PrimOp::BoolNot => {
            let value = eval_to_bool(state, &args[0])?;
            write_bool(state, out, !value)
        }
        PrimOp::NumericEqualsP | PrimOp::NumericLesserP => {
            let a = read_scalar(state, &args[0])?;
            let b = read_scalar(state, &args[1])?;
            let result = match (a, b, op) {
                (Scalar::Int(x), Scalar::Int(y), PrimOp::NumericEqualsP) => x == y,
                (Scalar::Int(x), Scalar::Int(y), _) => x < y,
                (x, y, PrimOp::NumericEqualsP) => as_float(x) == as_float(y),
                (x, y, _) => as_float(x) < as_float(y),
            };
            write_bool(state, out, result)
        }
        PrimOp::NumericAdd
        | PrimOp::NumericSubtract
        | PrimOp::NumericMultiply
        | PrimOp::NumericDivide => {
            let a = read_scalar(state, &args[0])?;
            let b = read_scalar(state, &args[1])?;
            let dest = single_out(state, out)?;
            let value = match (a, b) {
                (Scalar::Int(x), Scalar::Int(y)) => match op {
                    PrimOp::NumericAdd => Scalar::Int(wrap_to(state, dest.ty, x + y)),
                    PrimOp::NumericSubtract => Scalar::Int(wrap_to(state, dest.ty, x - y)),
                    PrimOp::NumericMultiply => Scalar::Int(wrap_to(state, dest.ty, x * y)),
                    _ => {
                        if y == 0 {
                            return Err(
                                state.eval_error("division by zero in constant expression")
                            );
                        }
                        Scalar::Int(wrap_to(state, dest.ty, x / y))
                    }
                },
                (x, y) => {
                    let (x, y) = (as_float(x), as_float(y));
                    Scalar::Float(match op {
                        PrimOp::NumericAdd => x + y,
                        PrimOp::NumericSubtract => x - y,
                        PrimOp::NumericMultiply => x * y,
                        _ => x / y,
                    })
                }
            };
            let dest = *dest;
            write_scalar(state, &dest, value)
        }
        PrimOp::NumericNegate => {
            let a = read_scalar(state, &args[0])?;
            let dest = *single_out(state, out)?;
            let value = match a {
                Scalar::Int(x) => Scalar::Int(wrap_to(state, dest.ty, -x)),
                Scalar::Float(x) => Scalar::Float(-x),
            };
            write_scalar(state, &dest, value)
        }
        PrimOp::IntegerRemainder => {
            let Scalar::Int(x) = read_scalar(state, &args[0])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            let Scalar::Int(y) = read_scalar(state, &args[1])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            if y == 0 {
                return Err(state.eval_error("division by zero in constant expression"));
            }
            let dest = *single_out(state, out)?;
            let value = wrap_to(state, dest.ty, x % y);
            write_scalar(state, &dest, Scalar::Int(value))
        }
        PrimOp::IntegerShiftLeft
        | PrimOp::IntegerShiftRight
        | PrimOp::IntegerBitwiseAnd
        | PrimOp::IntegerBitwiseOr
        | PrimOp::IntegerBitwiseXor => {
            let Scalar::Int(x) = read_scalar(state, &args[0])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            let Scalar::Int(y) = read_scalar(state, &args[1])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            let dest = *single_out(state, out)?;
            let value = match op {
                PrimOp::IntegerShiftLeft => x.checked_shl(y as u32).unwrap_or(0),
                PrimOp::IntegerShiftRight => x.checked_shr(y as u32).unwrap_or(0),
                PrimOp::IntegerBitwiseAnd => x & y,
                PrimOp::IntegerBitwiseOr => x | y,
                _ => x ^ y,
            };
            let value = wrap_to(state, dest.ty, value);
            write_scalar(state, &dest, Scalar::Int(value))
        }
        PrimOp::IntegerBitwiseNot => {
            let Scalar::Int(x) = read_scalar(state, &args[0])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            let dest = *single_out(state, out)?;
            let value = wrap_to(state, dest.ty, !x);
            write_scalar(state, &dest, Scalar::Int(value))
        }
        PrimOp::NumericConvert => {
            let value = read_scalar(state, &args[1])?;
            let dest = *single_out(state, out)?;
            if let (Scalar::Int(v), TypeKind::Integer { bits, signed }) =
                (value, state.types.get(dest.ty).kind.clone())
            {
                // conversions between integer constants are range-checked
                let wrapped = {
                    let mut bytes = [0u8; 16];
                    write_int_bytes(&mut bytes, bits, v);
                    read_int_bytes(&bytes, bits, signed)
                };
                if wrapped != v {
                    let name = state.type_name(dest.ty);
                    return Err(state.eval_error(format!(
                        "constant {v} is out of range for {name}"
                    )));
                }
            }
            write_scalar(state, &dest, value)
        }
        PrimOp::AddressOf => {
            write_pointer_to(state, out, &args[0].clone())
        }
        PrimOp::PointerDereference => {
            let dest = single_out(state, out)?;
            let bytes = state.read_place(args[0].place, 8)?;
            state.write_place(dest.place, &bytes)
        }
        PrimOp::PointerEqualsP | PrimOp::PointerLesserP => {
            let a = u64::from_le_bytes(
                state.read_place(args[0].place, 8)?.try_into().expect("eight bytes"),
            );
            let b = u64::from_le_bytes(
                state.read_place(args[1].place, 8)?.try_into().expect("eight bytes"),
            );
            let result = if op == PrimOp::PointerEqualsP { a == b } else { a < b };
            write_bool(state, out, result)
        }
        PrimOp::PointerOffset => {
            let raw = u64::from_le_bytes(
                state.read_place(args[0].place, 8)?.try_into().expect("eight bytes"),
            );
            let place = decode_place(raw)
                .ok_or_else(|| state.eval_error("invalid compile-time pointer"))?;
            let TypeKind::Pointer(pointee) = state.types.get(args[0].ty).kind.clone() else {
                return Err(state.eval_error("pointer offset on a non-pointer"));
            };
            let Scalar::Int(delta) = read_scalar(state, &args[1])? else {
                return Err(state.eval_error("expected an integer offset"));
            };
            let size = state.type_size(pointee)?;
            let moved = place.offset_by(size.wrapping_mul(delta as u64));
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &encode_place(moved).to_le_bytes())
        }
        PrimOp::PointerToInt => {
            let raw = state.read_place(args[0].place, 8)?;
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &raw)
        }
        PrimOp::IntToPointer => {
            let Scalar::Int(v) = read_scalar(state, &args[1])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &(v as u64).to_le_bytes())
        }
        PrimOp::ArrayRef => {
            let (element, _) = match state.types.get(args[0].ty).kind.clone() {
                TypeKind::Array(e, n) | TypeKind::Vector(e, n) => (e, n),
                _ => {
                    let name = state.type_name(args[0].ty);
                    return Err(state.type_mismatch("array reference", "an array", &name));
                }
            };
            let Scalar::Int(index) = read_scalar(state, &args[1])? else {
                return Err(state.eval_error("expected an integer index"));
            };
            let size = state.type_size(element)?;
            let target = EValue {
                ty: element,
                place: args[0].place.offset_by(size.wrapping_mul(index as u64)),
                forwarded_rvalue: false,
            };
            write_pointer_to(state, out, &target)
        }
        PrimOp::TupleElementCount => {
            let obj = arg_static_obj(state, args, 0)?;
            let ty = crate::analyzer::obj_as_type(state, &obj)?;
            let TypeKind::Tuple(elements) = state.types.get(ty).kind.clone() else {
                let name = state.type_name(ty);
                return Err(state.type_mismatch("tuple element count", "a tuple type", &name));
            };
            write_size(state, out, elements.len() as u64)
        }
        PrimOp::TupleRef => {
            let TypeKind::Tuple(elements) = state.types.get(args[0].ty).kind.clone() else {
                let name = state.type_name(args[0].ty);
                return Err(state.type_mismatch("tuple reference", "a tuple", &name));
            };
            let index = tuple_index_arg(state, args, 1)?;
            let (offsets, _) = state.struct_layout(&elements)?;
            let Some(&element) = elements.get(index) else {
                return Err(state.eval_error(format!("tuple index {index} out of range")));
            };
            let target = EValue {
                ty: element,
                place: args[0].place.offset_by(offsets[index]),
                forwarded_rvalue: false,
            };
            write_pointer_to(state, out, &target)
        }
        PrimOp::TupleElements => {
            let TypeKind::Tuple(elements) = state.types.get(args[0].ty).kind.clone() else {
                let name = state.type_name(args[0].ty);
                return Err(state.type_mismatch("tuple elements", "a tuple", &name));
            };
            let (offsets, _) = state.struct_layout(&elements)?;
            if out.len() != elements.len() {
                return Err(state.eval_error("arity mismatch in tuple elements"));
            }
            for ((&ety, &offset), dest) in elements.iter().zip(&offsets).zip(out) {
                let target = EValue {
                    ty: ety,
                    place: args[0].place.offset_by(offset),
                    forwarded_rvalue: false,
                };
                write_reference(state, &dest.clone(), &target)?;
            }
            Ok(())
        }
        PrimOp::UnionMemberCount => {
            let obj = arg_static_obj(state, args, 0)?;
            let ty = crate::analyzer::obj_as_type(state, &obj)?;
            let TypeKind::Union(members) = state.types.get(ty).kind.clone() else {
                let name = state.type_name(ty);
                return Err(state.type_mismatch("union member count", "a union type", &name));
            };
            write_size(state, out, members.len() as u64)
        }
        PrimOp::RecordP => {
            let obj = arg_static_obj(state, args, 0)?;
            let is_record = match &obj {
                Object::Record(_) => true,
                Object::Type(t) => {
                    matches!(state.types.get(*t).kind, TypeKind::Record { .. })
                }
                _ => false,
            };
            write_bool(state, out, is_record)
        }
        PrimOp::RecordFieldCount => {
            let obj = arg_static_obj(state, args, 0)?;
            let ty = crate::analyzer::obj_as_type(state, &obj)?;
            let info = state.record_info(ty)?;
            write_size(state, out, info.field_names.len() as u64)
        }
        PrimOp::RecordFieldName => {
            // carried in the static result type
            let _ = single_out(state, out)?;
            Ok(())
        }
        PrimOp::RecordWithFieldP => {
            let obj = arg_static_obj(state, args, 0)?;
            let name = match arg_static_obj(state, args, 1)? {
                Object::Ident(s) => s,
                _ => return Err(state.eval_error("expected a static identifier")),
            };
            let has = match crate::analyzer::obj_as_type(state, &obj) {
                Ok(ty) if matches!(state.types.get(ty).kind, TypeKind::Record { .. }) => {
                    state.record_info(ty)?.field_names.contains(&name)
                }
                _ => false,
            };
            write_bool(state, out, has)
        }
        PrimOp::RecordFieldRef | PrimOp::RecordFieldRefByName => {
            let info = state.record_info(args[0].ty)?;
            let index = if op == PrimOp::RecordFieldRef {
                tuple_index_arg(state, args, 1)?
            } else {
                let Object::Ident(name) = arg_static_obj(state, args, 1)? else {
                    return Err(state.eval_error("expected a static identifier"));
                };
                match info.field_names.iter().position(|&f| f == name) {
                    Some(i) => i,
                    None => {
                        let rendered = state.interner.get(name).to_owned();
                        return Err(
                            state.eval_error(format!("no field named {rendered}"))
                        );
                    }
                }
            };
            let target = EValue {
                ty: info.field_types[index],
                place: args[0].place.offset_by(info.offsets[index]),
                forwarded_rvalue: false,
            };
            write_pointer_to(state, out, &target)
        }
        PrimOp::VariantP => {
            let obj = arg_static_obj(state, args, 0)?;
            let is_variant = match &obj {
                Object::Variant(_) => true,
                Object::Type(t) => {
                    matches!(state.types.get(*t).kind, TypeKind::Variant { .. })
                }
                _ => false,
            };
            write_bool(state, out, is_variant)
        }
        PrimOp::VariantMemberIndex => {
            let obj = arg_static_obj(state, args, 0)?;
            let vt = crate::analyzer::obj_as_type(state, &obj)?;
            let member_obj = arg_static_obj(state, args, 1)?;
            let member = crate::analyzer::obj_as_type(state, &member_obj)?;
            let info = state.variant_info(vt)?;
            let index = info
                .member_types
                .iter()
                .position(|&m| m == member)
                .ok_or_else(|| {
                    let name = state.type_name(member);
                    state.eval_error(format!("{name} is not a member of the variant"))
                })?;
            write_size(state, out, index as u64)
        }
        PrimOp::VariantMemberCount => {
            let obj = arg_static_obj(state, args, 0)?;
            let vt = crate::analyzer::obj_as_type(state, &obj)?;
            let info = state.variant_info(vt)?;
            write_size(state, out, info.member_types.len() as u64)
        }
        PrimOp::VariantTag => {
            let bytes = state.read_place(args[0].place, 4)?;
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &bytes)
        }
        PrimOp::VariantPayload => {
            let info = state.variant_info(args[0].ty)?;
            let index = tuple_index_arg(state, args, 1)?;
            let Some(&member) = info.member_types.get(index) else {
                return Err(state.eval_error(format!("variant member {index} out of range")));
            };
            let target = EValue {
                ty: member,
                place: args[0].place.offset_by(info.payload_offset),
                forwarded_rvalue: false,
            };
            write_pointer_to(state, out, &target)
        }
        PrimOp::EnumP => {
            let obj = arg_static_obj(state, args, 0)?;
            let is_enum = match &obj {
                Object::Enumeration(_) => true,
                Object::Type(t) => matches!(state.types.get(*t).kind, TypeKind::Enum(_)),
                _ => false,
            };
            write_bool(state, out, is_enum)
        }
        PrimOp::EnumMemberCount => {
            let obj = arg_static_obj(state, args, 0)?;
            let ty = crate::analyzer::obj_as_type(state, &obj)?;
            let TypeKind::Enum(decl) = state.types.get(ty).kind else {
                let name = state.type_name(ty);
                return Err(state.type_mismatch("enum member count", "an enum", &name));
            };
            write_size(state, out, state.enums[decl.index()].members.len() as u64)
        }
        PrimOp::EnumToInt => {
            let bytes = state.read_place(args[0].place, 4)?;
            let dest = single_out(state, out)?;
            state.write_place(dest.place, &bytes)
        }
        PrimOp::IntToEnum => {
            let Scalar::Int(v) = read_scalar(state, &args[1])? else {
                return Err(state.eval_error("expected an integer value"));
            };
            let dest = *single_out(state, out)?;
            write_scalar(state, &dest, Scalar::Int(v))
        }
        PrimOp::IdentifierP => {
            let is_ident = matches!(arg_static_obj(state, args, 0), Ok(Object::Ident(_)));
            write_bool(state, out, is_ident)
        }
        PrimOp::IdentifierSize => {
            let Object::Ident(s) = arg_static_obj(state, args, 0)? else {
                return Err(state.eval_error("expected a static identifier"));
            };
            let size = state.interner.get(s).len() as u64;
            write_size(state, out, size)
        }
        PrimOp::StaticName
        | PrimOp::ModuleName
        | PrimOp::StaticIntegers
        | PrimOp::IdentifierConcat
        | PrimOp::IdentifierSlice
        | PrimOp::EnumMemberName => {
            // results are statics computed during analysis
            Ok(())
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
    }
}

fn as_float(s: Scalar) -> f64 {
    match s {
        Scalar::Int(i) => i as f64,
        Scalar::Float(f) => f,
    }
}

/// Reads a static index argument (the index rides in a `Static` type).
fn tuple_index_arg(
    state: &CompilerState,
    args: &MultiEValue,
    index: usize,
) -> CompileResult<usize> {
    let obj = arg_static_obj(state, args, index)?;
    match obj {
        Object::Value(v) => {
            let holder = &state.holders[v.index()];
            if let TypeKind::Integer { bits, signed } = state.types.get(holder.ty).kind {
                let value = read_int_bytes(&holder.bytes, bits, signed);
                if value >= 0 {
                    return Ok(usize::try_from(value).unwrap_or(usize::MAX));
                }
            }
            Err(state.eval_error("expected a non-negative static index"))
        }
        _ => Err(state.eval_error("expected a static index")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

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

    fn eval_int(text: &str) -> i128 {
        let (mut state, expr, env) = program_with_expr(text);
        let value = evaluate_one_static(&mut state, expr, env)
            .unwrap_or_else(|d| panic!("evaluation failed: {d}"));
        let Object::Value(v) = value else {
            panic!("expected a value holder");
        };
        let holder = &state.holders[v.index()];
        let TypeKind::Integer { bits, signed } = state.types.get(holder.ty).kind else {
            panic!("expected an integer value");
        };
        read_int_bytes(&holder.bytes, bits, signed)
    }

    #[test]
    fn constant_arithmetic() {
        assert_eq!(eval_int("2 + 3"), 5);
        assert_eq!(eval_int("2 * 3 + 4"), 10);
        assert_eq!(eval_int("2 + 3 * 4"), 14);
        assert_eq!(eval_int("-7 % 3"), -1);
        assert_eq!(eval_int("10 / 4"), 2);
    }

    #[test]
    fn division_by_zero_is_an_eval_error() {
        let (mut state, expr, env) = program_with_expr("1 / 0");
        let err = evaluate_one_static(&mut state, expr, env).unwrap_err();
        assert_eq!(err.kind_name(), "Eval");
    }

    #[test]
    fn comparisons_and_connectives() {
        let (mut state, expr, env) = program_with_expr("1 < 2 and not (2 < 1)");
        let result = evaluate_bool(&mut state, expr, env).unwrap();
        assert!(result);
    }

    #[test]
    fn static_expressions_carry_objects() {
        let (mut state, expr, env) = program_with_expr("TypeSize(Int32)");
        let value = evaluate_one_static(&mut state, expr, env).unwrap();
        let Object::Value(v) = value else {
            panic!("expected a value holder");
        };
        let bytes = state.holders[v.index()].bytes.clone();
        assert_eq!(bytes.as_ref(), 4u64.to_le_bytes().as_slice());
    }

    #[test]
    fn place_encoding_round_trips() {
        let place = Place {
            root: PlaceRoot::Slot(11),
            offset: 24,
        };
        assert_eq!(decode_place(encode_place(place)), Some(place));
        let holder = Place {
            root: PlaceRoot::Holder(3),
            offset: 0,
        };
        assert_eq!(decode_place(encode_place(holder)), Some(holder));
        assert_eq!(decode_place(0), None);
    }
}
