//! Compile-time ("static") objects.
//!
//! An [`Object`] is anything the compile-time world can bind to a name or
//! pass through the unifier: types, identifiers, value holders, modules,
//! declarations, primitive ops, expressions captured with their home
//! environment, and the analyzer/evaluator value families.
//!
//! [`ObjectKey`] is the canonical hashable projection used wherever deep
//! object equality matters: invoke-table keys and `Static` type interning.
//! Value holders project to their type plus raw bytes, so two independently
//! computed constants compare equal.

use crate::analyzer::{MultiPValue, PValue};
use crate::ast::ExprList;
use crate::evaluator::EValue;
use crate::ids::{
    AliasId, EnumId, EnvId, ExprId, ExternalProcId, ExternalVarId, GlobalId, ModuleId, NewTypeId,
    ProcId, RecordId, TypeId, ValueId, VariantId,
};
use crate::intern::StrId;
use crate::pattern::{MultiPattern, Pattern};
use crate::primops::PrimOp;
use crate::state::CompilerState;

/// A typed compile-time byte buffer owned by the holder arena.
///
/// Holders live as long as anything can refer to them, i.e. the whole
/// compilation; the arena is the lifetime.
#[derive(Debug, Clone)]
pub struct ValueHolder {
    pub ty: TypeId,
    pub bytes: Box<[u8]>,
}

#[derive(Debug, Clone)]
pub enum Object {
    /// A static identifier (from `#name` or a string literal).
    Ident(StrId),
    /// An expression bound together with its home environment (aliases,
    /// call-by-name arguments).
    Expr(ExprId, EnvId),
    ExprList(ExprList, EnvId),
    Type(TypeId),
    Module(ModuleId),
    Record(RecordId),
    Variant(VariantId),
    Procedure(ProcId),
    Enumeration(EnumId),
    EnumMember { decl: EnumId, index: u32 },
    GlobalVar(GlobalId),
    GlobalAlias(AliasId),
    ExternalProc(ExternalProcId),
    ExternalVar(ExternalVarId),
    NewType(NewTypeId),
    PrimOp(PrimOp),
    /// A value holder: a compile-time constant.
    Value(ValueId),
    /// An ordered sequence of static objects (variadic bindings).
    MultiStatic(Vec<Object>),
    Pattern(Box<Pattern>),
    MultiPattern(Box<MultiPattern>),
    PValue(PValue),
    MultiPValue(MultiPValue),
    EValue(EValue),
    MultiEValue(Vec<EValue>),
}

/// Canonical hashable projection of a static object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Ident(StrId),
    Type(TypeId),
    Module(ModuleId),
    Record(RecordId),
    Variant(VariantId),
    Procedure(ProcId),
    Enumeration(EnumId),
    EnumMember(EnumId, u32),
    GlobalVar(GlobalId),
    GlobalAlias(AliasId),
    ExternalProc(ExternalProcId),
    ExternalVar(ExternalVarId),
    NewType(NewTypeId),
    PrimOp(PrimOp),
    /// Deep value equality: type handle plus the exact byte pattern.
    Value(TypeId, Box<[u8]>),
    Multi(Vec<ObjectKey>),
}

/// Projects a static object to its canonical key. Returns `None` for
/// objects with no static identity (patterns, analyzer/evaluator values,
/// env-bound expressions).
pub fn object_key(state: &CompilerState, obj: &Object) -> Option<ObjectKey> {
    Some(match obj {
        Object::Ident(s) => ObjectKey::Ident(*s),
        Object::Type(t) => ObjectKey::Type(*t),
        Object::Module(m) => ObjectKey::Module(*m),
        Object::Record(r) => ObjectKey::Record(*r),
        Object::Variant(v) => ObjectKey::Variant(*v),
        Object::Procedure(p) => ObjectKey::Procedure(*p),
        Object::Enumeration(e) => ObjectKey::Enumeration(*e),
        Object::EnumMember { decl, index } => ObjectKey::EnumMember(*decl, *index),
        Object::GlobalVar(g) => ObjectKey::GlobalVar(*g),
        Object::GlobalAlias(a) => ObjectKey::GlobalAlias(*a),
        Object::ExternalProc(p) => ObjectKey::ExternalProc(*p),
        Object::ExternalVar(v) => ObjectKey::ExternalVar(*v),
        Object::NewType(n) => ObjectKey::NewType(*n),
        Object::PrimOp(p) => ObjectKey::PrimOp(*p),
        Object::Value(v) => {
            let holder = &state.holders[v.index()];
            ObjectKey::Value(holder.ty, holder.bytes.clone())
        }
        Object::MultiStatic(items) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                keys.push(object_key(state, item)?);
            }
            ObjectKey::Multi(keys)
        }
        Object::Expr(..)
        | Object::ExprList(..)
        | Object::Pattern(_)
        | Object::MultiPattern(_)
        | Object::PValue(_)
        | Object::MultiPValue(_)
        | Object::EValue(_)
        | Object::MultiEValue(_) => return None,
    })
}

/// Deep equality of static objects.
pub fn object_eq(state: &CompilerState, a: &Object, b: &Object) -> bool {
    match (object_key(state, a), object_key(state, b)) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => false,
    }
}

/// Renders a static object the way diagnostics and `StaticName` display it.
pub fn print_object(state: &CompilerState, obj: &Object) -> String {
    match obj {
        Object::Ident(s) => state.interner.get(*s).to_owned(),
        Object::Type(t) => state.type_name(*t),
        Object::Module(m) => state.modules[m.index()].name.clone(),
        Object::Record(r) => state.interner.get(state.records[r.index()].name).to_owned(),
        Object::Variant(v) => state.interner.get(state.variants[v.index()].name).to_owned(),
        Object::Procedure(p) => state
            .interner
            .get(state.procedures[p.index()].name)
            .to_owned(),
        Object::Enumeration(e) => state.interner.get(state.enums[e.index()].name).to_owned(),
        Object::EnumMember { decl, index } => {
            let e = &state.enums[decl.index()];
            let member = e.members.get(*index as usize).copied();
            match member {
                Some(m) => format!(
                    "{}.{}",
                    state.interner.get(e.name),
                    state.interner.get(m)
                ),
                None => state.interner.get(e.name).to_owned(),
            }
        }
        Object::GlobalVar(g) => state
            .interner
            .get(state.global_vars[g.index()].name)
            .to_owned(),
        Object::GlobalAlias(a) => state
            .interner
            .get(state.global_aliases[a.index()].name)
            .to_owned(),
        Object::ExternalProc(p) => state
            .interner
            .get(state.external_procs[p.index()].name)
            .to_owned(),
        Object::ExternalVar(v) => state
            .interner
            .get(state.external_vars[v.index()].name)
            .to_owned(),
        Object::NewType(n) => state.interner.get(state.newtypes[n.index()].name).to_owned(),
        Object::PrimOp(p) => p.name().to_owned(),
        Object::Value(v) => state.print_value_holder(*v),
        Object::MultiStatic(items) => {
            let parts: Vec<String> = items.iter().map(|o| print_object(state, o)).collect();
            format!("({})", parts.join(", "))
        }
        Object::Expr(..) | Object::ExprList(..) => "<expression>".to_owned(),
        Object::Pattern(_) | Object::MultiPattern(_) => "<pattern>".to_owned(),
        Object::PValue(_) | Object::MultiPValue(_) => "<value>".to_owned(),
        Object::EValue(_) | Object::MultiEValue(_) => "<value>".to_owned(),
    }
}

/// The module a static object belongs to, for the `logMatchSymbols`
/// facility and the `ModuleName` primitive.
pub fn object_module(state: &CompilerState, obj: &Object) -> Option<ModuleId> {
    match obj {
        Object::Record(r) => Some(state.records[r.index()].module),
        Object::Variant(v) => Some(state.variants[v.index()].module),
        Object::Procedure(p) => Some(state.procedures[p.index()].module),
        Object::Enumeration(e) => Some(state.enums[e.index()].module),
        Object::GlobalVar(g) => Some(state.global_vars[g.index()].module),
        Object::GlobalAlias(a) => Some(state.global_aliases[a.index()].module),
        Object::ExternalProc(p) => Some(state.external_procs[p.index()].module),
        Object::ExternalVar(v) => Some(state.external_vars[v.index()].module),
        Object::NewType(n) => Some(state.newtypes[n.index()].module),
        Object::Module(m) => Some(*m),
        _ => None,
    }
}
