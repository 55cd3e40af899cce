//! Invoke tables: memoized overload resolution.
//!
//! An [`InvokeSet`] is keyed by `(callable, argument types)` and owns the
//! ordered candidate list plus every match already attempted. Within a
//! set, entries are refined by argument tempness through the two-level
//! tempness maps, so two tempness keys that refine to the same
//! formal-tempness pattern share one specialization. Entries grow
//! monotonically and are never removed or mutated once analyzed.

use ahash::AHashMap;

use crate::ast::{Code, Tempness};
use crate::error::{CompileResult, DiagnosticKind, MatchFailureNote};
use crate::ids::{EnvId, InvokeEntryId, InvokeSetId, OverloadId, TypeId};
use crate::intern::StrId;
use crate::matchinvoke::{MatchResult, MatchSuccess, is_universal_overload, match_invoke};
use crate::object::{Object, ObjectKey, object_key, object_module, print_object};
use crate::pattern::{MultiPattern, Pattern};
use crate::state::CompilerState;
use crate::types::TypeKind;

pub type InvokeSetKey = (ObjectKey, Vec<TypeId>);

/// Native construction entries: calls resolved without user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtorKind {
    /// Initialize a record of the given type from its field values.
    Record(TypeId),
    /// Wrap a member value into a variant at the given tag.
    Variant { ty: TypeId, tag: u32 },
    /// Wrap the base value of a newtype.
    NewType(TypeId),
}

#[derive(Debug)]
pub struct InvokeSet {
    pub callable: Object,
    pub args_key: Vec<TypeId>,
    pub interface: Option<OverloadId>,
    pub overloads: Vec<OverloadId>,
    /// Successful matches found so far, in candidate order.
    pub matches: Vec<MatchSuccess>,
    pub next_overload_index: usize,
    /// Failures accumulated while scanning candidates, for diagnostics.
    pub failures: Vec<(Option<OverloadId>, MatchResult)>,
    pub tempness_map: AHashMap<Vec<Tempness>, InvokeEntryId>,
    tempness_map2: AHashMap<Vec<Tempness>, InvokeEntryId>,
    pub should_log: bool,
    ambiguity_checked: bool,
}

#[derive(Debug)]
pub struct InvokeEntry {
    pub set: InvokeSetId,
    pub callable: Object,
    pub args_key: Vec<TypeId>,
    pub forwarded_rvalue_flags: Vec<bool>,
    pub analyzed: bool,
    pub analyzing: bool,
    /// The specialized code: a clone of the overload's code. Absent for
    /// native constructor entries.
    pub code: Option<Code>,
    pub env: EnvId,
    pub fixed_arg_names: Vec<StrId>,
    pub fixed_arg_types: Vec<TypeId>,
    pub var_arg_name: Option<StrId>,
    pub var_arg_types: Vec<TypeId>,
    pub call_by_name: bool,
    pub is_inline: bool,
    pub return_is_ref: Vec<bool>,
    pub return_types: Vec<TypeId>,
    pub ctor: Option<CtorKind>,
}

//
// candidate collection
//

/// The ordered overload list attached to a callable. Type callables see
/// the global type-targeted overload list; record and variant types also
/// see their declaration's overloads first.
pub fn callable_overloads(state: &CompilerState, callable: &Object) -> Vec<OverloadId> {
    match callable {
        Object::Procedure(p) => state.procedures[p.index()].overloads.clone(),
        Object::Record(r) => {
            let mut list = state.records[r.index()].overloads.clone();
            list.extend(state.type_overloads.iter().copied());
            list
        }
        Object::Variant(v) => {
            let mut list = state.variants[v.index()].overloads.clone();
            list.extend(state.type_overloads.iter().copied());
            list
        }
        Object::GlobalAlias(a) => state.global_aliases[a.index()].overloads.clone(),
        Object::Type(t) => {
            let mut list = match &state.types.get(*t).kind {
                TypeKind::Record { decl, .. } => state.records[decl.index()].overloads.clone(),
                TypeKind::Variant { decl, .. } => state.variants[decl.index()].overloads.clone(),
                _ => Vec::new(),
            };
            list.extend(state.type_overloads.iter().copied());
            list
        }
        _ => Vec::new(),
    }
}

fn callable_interface(state: &CompilerState, callable: &Object) -> Option<OverloadId> {
    match callable {
        Object::Procedure(p) => state.procedures[p.index()].interface,
        _ => None,
    }
}

fn should_log_callable(state: &CompilerState, callable: &Object) -> bool {
    if state.config.log_match_symbols.is_empty() {
        return false;
    }
    let Some(module) = object_module(state, callable) else {
        return false;
    };
    let module_name = state.modules[module.index()].name.clone();
    let symbol = print_object(state, callable);
    state
        .config
        .log_match_symbols
        .iter()
        .any(|(m, s)| *m == module_name && (s == "*" || *s == symbol))
}

//
// set lookup
//

pub fn lookup_invoke_set(
    state: &mut CompilerState,
    callable: &Object,
    args_key: &[TypeId],
) -> CompileResult<InvokeSetId> {
    let Some(key) = object_key(state, callable) else {
        let rendered = print_object(state, callable);
        return Err(state.type_mismatch("call target", "a callable object", &rendered));
    };
    let set_key = (key, args_key.to_vec());
    if let Some(&id) = state.invoke_set_table.get(&set_key) {
        return Ok(id);
    }
    let overloads = callable_overloads(state, callable);
    let interface = callable_interface(state, callable);
    let should_log = should_log_callable(state, callable);
    let id = InvokeSetId::new(state.invoke_sets.len());
    state.invoke_sets.push(InvokeSet {
        callable: callable.clone(),
        args_key: args_key.to_vec(),
        interface,
        overloads,
        matches: Vec::new(),
        next_overload_index: 0,
        failures: Vec::new(),
        tempness_map: AHashMap::new(),
        tempness_map2: AHashMap::new(),
        should_log,
        ambiguity_checked: false,
    });
    state.invoke_set_table.insert(set_key, id);
    Ok(id)
}

/// Streams the `index`-th successful match of the set, scanning further
/// candidates on demand and memoizing results.
fn get_match(
    state: &mut CompilerState,
    set: InvokeSetId,
    index: usize,
) -> CompileResult<Option<MatchSuccess>> {
    if let Some(found) = state.invoke_sets[set.index()].matches.get(index) {
        return Ok(Some(found.clone()));
    }
    debug_assert!(index == state.invoke_sets[set.index()].matches.len());
    loop {
        let (overload, callable, args_key) = {
            let s = &state.invoke_sets[set.index()];
            let Some(&overload) = s.overloads.get(s.next_overload_index) else {
                return Ok(None);
            };
            (overload, s.callable.clone(), s.args_key.clone())
        };
        state.invoke_sets[set.index()].next_overload_index += 1;
        let result = match_invoke(state, overload, &callable, &args_key)?;
        if state.invoke_sets[set.index()].should_log {
            log_match_attempt(state, set, overload, &result);
        }
        match result {
            MatchResult::Success(success) => {
                let success = *success;
                state.invoke_sets[set.index()].matches.push(success.clone());
                return Ok(Some(success));
            }
            failure => {
                state.invoke_sets[set.index()]
                    .failures
                    .push((Some(overload), failure));
            }
        }
    }
}

fn log_match_attempt(
    state: &CompilerState,
    set: InvokeSetId,
    overload: OverloadId,
    result: &MatchResult,
) {
    let s = &state.invoke_sets[set.index()];
    let callable = print_object(state, &s.callable);
    let args = s
        .args_key
        .iter()
        .map(|&t| state.type_name(t))
        .collect::<Vec<_>>()
        .join(", ");
    let target = state.expr_text(state.overloads[overload.index()].target);
    eprintln!(
        "[match] {callable}({args}) vs overload {target}: {}",
        result.describe(state)
    );
}

//
// tempness refinement
//

fn tempness_matches(actual: Tempness, formal: Tempness) -> bool {
    match actual {
        Tempness::Lvalue => matches!(
            formal,
            Tempness::DontCare | Tempness::Lvalue | Tempness::Forward
        ),
        Tempness::Rvalue => matches!(
            formal,
            Tempness::DontCare | Tempness::Rvalue | Tempness::Forward
        ),
        _ => false,
    }
}

fn tempness_key_item(formal: Tempness, actual: Tempness) -> Tempness {
    match formal {
        Tempness::Forward => actual,
        other => other,
    }
}

/// Refines a matched overload by tempness. Produces the canonical
/// tempness key and the forwarded-rvalue flags, or `None` when a formal's
/// tempness rejects the actual category.
fn match_tempness(
    state: &CompilerState,
    code: &Code,
    call_by_name: bool,
    args_tempness: &[Tempness],
) -> CompileResult<Option<(Vec<Tempness>, Vec<bool>)>> {
    let fixed = &code.formal_args;
    let mut key = Vec::with_capacity(args_tempness.len());
    let mut forwarded = Vec::with_capacity(args_tempness.len());
    for (i, &actual) in args_tempness.iter().enumerate() {
        let formal = if i < fixed.len() {
            &fixed[i]
        } else {
            code.var_arg.as_ref().expect("variadic arity checked")
        };
        if call_by_name && formal.tempness == Tempness::Forward {
            return Err(state.error_at(
                DiagnosticKind::TypeMismatch {
                    context: "call-by-name procedure".to_owned(),
                    expected: "non-forwarded arguments".to_owned(),
                    actual: "a forwarded argument".to_owned(),
                },
                formal.location,
            ));
        }
        if !tempness_matches(actual, formal.tempness) {
            return Ok(None);
        }
        key.push(tempness_key_item(formal.tempness, actual));
        forwarded.push(formal.tempness == Tempness::Forward && actual == Tempness::Rvalue);
    }
    Ok(Some((key, forwarded)))
}

//
// entry lookup
//

fn new_invoke_entry(
    state: &mut CompilerState,
    set: InvokeSetId,
    m: &MatchSuccess,
    forwarded: Vec<bool>,
) -> InvokeEntryId {
    let (callable, args_key) = {
        let s = &state.invoke_sets[set.index()];
        (s.callable.clone(), s.args_key.clone())
    };
    let template = state.overloads[m.overload.index()].code.clone();
    let code = crate::clone::clone_code(state, &template);
    let id = InvokeEntryId::new(state.invoke_entries.len());
    state.invoke_entries.push(InvokeEntry {
        set,
        callable,
        args_key,
        forwarded_rvalue_flags: forwarded,
        analyzed: false,
        analyzing: false,
        code: Some(code),
        env: m.env,
        fixed_arg_names: m.fixed_arg_names.clone(),
        fixed_arg_types: m.fixed_arg_types.clone(),
        var_arg_name: m.var_arg_name,
        var_arg_types: m.var_arg_types.clone(),
        call_by_name: m.call_by_name,
        is_inline: m.is_inline,
        return_is_ref: Vec::new(),
        return_types: Vec::new(),
        ctor: None,
    });
    id
}

/// The memoized entry for `(callable, argsKey, argsTempness)`, or `None`
/// with the set's failure list populated when nothing matches.
pub fn lookup_invoke_entry(
    state: &mut CompilerState,
    callable: &Object,
    args_key: &[TypeId],
    args_tempness: &[Tempness],
) -> CompileResult<Option<InvokeEntryId>> {
    let set = lookup_invoke_set(state, callable, args_key)?;
    if let Some(&entry) = state.invoke_sets[set.index()].tempness_map.get(args_tempness) {
        return Ok(Some(entry));
    }

    // an interface on the callable is matched first; its failure is a
    // hard, distinct error
    if let Some(interface) = state.invoke_sets[set.index()].interface {
        let result = match_invoke(state, interface, callable, args_key)?;
        if !matches!(result, MatchResult::Success(_)) {
            let rendered = print_object(state, callable);
            let note = MatchFailureNote {
                overload: state.expr_text(state.overloads[interface.index()].target),
                reason: result.describe(state),
                universal: false,
            };
            return Err(state.error(DiagnosticKind::Match {
                callable: rendered,
                failures: vec![note],
                interface_violation: true,
            }));
        }
    }

    let mut index = 0;
    let found = loop {
        let Some(m) = get_match(state, set, index)? else {
            break None;
        };
        let code = state.overloads[m.overload.index()].code.clone();
        match match_tempness(state, &code, m.call_by_name, args_tempness)? {
            Some((key, forwarded)) => break Some((m, key, forwarded)),
            None => index += 1,
        }
    };
    let Some((m, tempness_key, forwarded)) = found else {
        return try_native_ctor(state, set, callable, args_key, args_tempness);
    };

    check_ambiguity(state, set, &m)?;

    if let Some(&entry) = state.invoke_sets[set.index()].tempness_map2.get(&tempness_key) {
        state.invoke_sets[set.index()]
            .tempness_map
            .insert(args_tempness.to_vec(), entry);
        return Ok(Some(entry));
    }

    let entry = new_invoke_entry(state, set, &m, forwarded);
    state.invoke_sets[set.index()]
        .tempness_map2
        .insert(tempness_key, entry);
    state.invoke_sets[set.index()]
        .tempness_map
        .insert(args_tempness.to_vec(), entry);
    Ok(Some(entry))
}

/// The declared tempness pattern of an overload's formals; overloads that
/// differ here partition calls by value category rather than competing.
fn formal_tempness_signature(state: &CompilerState, overload: OverloadId) -> Vec<Tempness> {
    let code = &state.overloads[overload.index()].code;
    code.formal_args
        .iter()
        .chain(code.var_arg.iter())
        .map(|a| a.tempness)
        .collect()
}

/// Overload-order guarantee: the candidate list is sorted most-specific
/// first, so the first match wins; a second match at the *same*
/// specificity rank and with the *same* formal tempness pattern means
/// neither is strictly more specific, which is the ambiguity error.
/// Checked once per set.
fn check_ambiguity(
    state: &mut CompilerState,
    set: InvokeSetId,
    first: &MatchSuccess,
) -> CompileResult<()> {
    if state.invoke_sets[set.index()].ambiguity_checked {
        return Ok(());
    }
    state.invoke_sets[set.index()].ambiguity_checked = true;
    let rank = crate::loader::overload_specificity(state, first.overload);
    let tempness = formal_tempness_signature(state, first.overload);
    let (callable, args_key, candidates) = {
        let s = &state.invoke_sets[set.index()];
        (s.callable.clone(), s.args_key.clone(), s.overloads.clone())
    };
    let mut also_matching = Vec::new();
    for candidate in candidates {
        if candidate == first.overload {
            continue;
        }
        if crate::loader::overload_specificity(state, candidate) != rank {
            continue;
        }
        if formal_tempness_signature(state, candidate) != tempness {
            continue;
        }
        if matches!(
            match_invoke(state, candidate, &callable, &args_key)?,
            MatchResult::Success(_)
        ) {
            also_matching.push(candidate);
        }
    }
    if also_matching.is_empty() {
        return Ok(());
    }
    let rendered = print_object(state, &callable);
    let mut names = vec![state.expr_text(state.overloads[first.overload.index()].target)];
    for o in also_matching {
        names.push(state.expr_text(state.overloads[o.index()].target));
    }
    Err(state.error(DiagnosticKind::AmbiguousMatch {
        callable: rendered,
        candidates: names,
    }))
}

//
// native constructors
//

/// When no user overload matches a record, variant, or newtype callable,
/// construction is resolved natively: field patterns unify against the
/// argument types and the entry carries a `CtorKind` instead of code.
fn try_native_ctor(
    state: &mut CompilerState,
    set: InvokeSetId,
    callable: &Object,
    args_key: &[TypeId],
    args_tempness: &[Tempness],
) -> CompileResult<Option<InvokeEntryId>> {
    let ctor = match callable {
        Object::Record(decl) => record_ctor(state, *decl, None, args_key)?,
        Object::Variant(decl) => {
            let d = &state.variants[decl.index()];
            if d.params.is_empty() && d.var_param.is_none() {
                let ty = state.variant_type(*decl, Vec::new())?;
                variant_ctor(state, ty, args_key)?
            } else {
                None
            }
        }
        Object::Type(ty) => match state.types.get(*ty).kind.clone() {
            TypeKind::Record { decl, params } => {
                record_ctor(state, decl, Some((*ty, params)), args_key)?
            }
            TypeKind::Variant { .. } => variant_ctor(state, *ty, args_key)?,
            TypeKind::NewType(decl) => {
                let base = state.newtype_base(decl)?;
                if args_key == [base] {
                    Some((CtorKind::NewType(*ty), vec![base], *ty))
                } else {
                    None
                }
            }
            _ => None,
        },
        _ => None,
    };
    let Some((ctor, arg_types, result_ty)) = ctor else {
        // only constructible callables get a constructor note
        if matches!(
            callable,
            Object::Record(_) | Object::Variant(_) | Object::Type(_)
        ) {
            state.invoke_sets[set.index()]
                .failures
                .push((None, MatchResult::CallableError));
        }
        return Ok(None);
    };
    let env = state.new_env(crate::env::EnvParent::None);
    let (callable, args_key_owned) = {
        let s = &state.invoke_sets[set.index()];
        (s.callable.clone(), s.args_key.clone())
    };
    let id = InvokeEntryId::new(state.invoke_entries.len());
    state.invoke_entries.push(InvokeEntry {
        set,
        callable,
        args_key: args_key_owned,
        forwarded_rvalue_flags: vec![false; args_key.len()],
        analyzed: true,
        analyzing: false,
        code: None,
        env,
        fixed_arg_names: Vec::new(),
        fixed_arg_types: arg_types,
        var_arg_name: None,
        var_arg_types: Vec::new(),
        call_by_name: false,
        is_inline: false,
        return_is_ref: vec![false],
        return_types: vec![result_ty],
        ctor: Some(ctor),
    });
    state.invoke_sets[set.index()]
        .tempness_map
        .insert(args_tempness.to_vec(), id);
    Ok(Some(id))
}

type CtorMatch = Option<(CtorKind, Vec<TypeId>, TypeId)>;

fn record_ctor(
    state: &mut CompilerState,
    decl: crate::ids::RecordId,
    known: Option<(TypeId, Vec<Object>)>,
    args_key: &[TypeId],
) -> CompileResult<CtorMatch> {
    let ty = match known {
        Some((ty, _)) => ty,
        None => {
            let d = &state.records[decl.index()];
            if !d.params.is_empty() || d.var_param.is_some() {
                return deduce_record_ctor(state, decl, args_key);
            }
            state.record_type(decl, Vec::new())?
        }
    };
    let info = state.record_info(ty)?;
    if info.field_types == args_key {
        Ok(Some((CtorKind::Record(ty), info.field_types, ty)))
    } else {
        Ok(None)
    }
}

/// Parameterized record construction: fresh cells stand in for the decl
/// params, the declared field type patterns unify against the argument
/// types, and the record type is built from the deduced params.
fn deduce_record_ctor(
    state: &mut CompilerState,
    decl: crate::ids::RecordId,
    args_key: &[TypeId],
) -> CompileResult<CtorMatch> {
    use crate::decls::RecordBody;
    let (env, params, var_param, fields) = {
        let d = &state.records[decl.index()];
        let RecordBody::Fields(fields) = &d.body else {
            return Ok(None);
        };
        (d.env, d.params.clone(), d.var_param, fields.clone())
    };
    if fields.len() != args_key.len() {
        return Ok(None);
    }
    let pattern_env = state.new_env(crate::env::EnvParent::Env(env));
    let mut cells = Vec::with_capacity(params.len());
    for name in &params {
        let cell = state.new_cell();
        cells.push(cell);
        state.add_local(
            pattern_env,
            *name,
            Object::Pattern(Box::new(Pattern::Cell(cell))),
        );
    }
    let mut multi_cell = None;
    if let Some(name) = var_param {
        let cell = state.new_multi_cell();
        multi_cell = Some(cell);
        state.add_local(
            pattern_env,
            name,
            Object::MultiPattern(Box::new(MultiPattern::Cell(cell))),
        );
    }

    let all_cells: Vec<Option<crate::ids::CellId>> = cells.iter().copied().map(Some).collect();
    let all_multi = vec![multi_cell];
    let result = (|| -> CompileResult<CtorMatch> {
        for (field, &actual) in fields.iter().zip(args_key) {
            let pattern = crate::pattern::evaluate_one_pattern(state, field.ty, pattern_env)?;
            if !crate::pattern::unify_pattern_obj(state, &pattern, &Object::Type(actual))? {
                return Ok(None);
            }
        }
        let mut deduced = Vec::with_capacity(cells.len());
        for cell in &cells {
            match crate::pattern::deref_deep(state, &Pattern::Cell(*cell))? {
                Some(obj) => deduced.push(obj),
                None => return Ok(None),
            }
        }
        if let Some(cell) = multi_cell {
            match crate::pattern::deref_deep_multi(state, &MultiPattern::Cell(cell))? {
                Some(rest) => deduced.extend(rest),
                None => return Ok(None),
            }
        }
        let ty = state.record_type(decl, deduced)?;
        let info = state.record_info(ty)?;
        if info.field_types == args_key {
            Ok(Some((CtorKind::Record(ty), info.field_types, ty)))
        } else {
            Ok(None)
        }
    })();
    state.reset_cells(&all_cells, &all_multi);
    result
}

fn variant_ctor(
    state: &mut CompilerState,
    ty: TypeId,
    args_key: &[TypeId],
) -> CompileResult<CtorMatch> {
    if args_key.len() != 1 {
        return Ok(None);
    }
    let info = state.variant_info(ty)?;
    match info.member_types.iter().position(|&m| m == args_key[0]) {
        Some(tag) => Ok(Some((
            CtorKind::Variant {
                ty,
                tag: u32::try_from(tag).expect("variant tag overflow"),
            },
            vec![args_key[0]],
            ty,
        ))),
        None => Ok(None),
    }
}

/// Renders the set's accumulated failures as the terminal match
/// diagnostic.
pub fn match_failure_error(
    state: &CompilerState,
    set: InvokeSetId,
) -> Box<crate::error::Diagnostic> {
    let s = &state.invoke_sets[set.index()];
    let callable = print_object(state, &s.callable);
    let args = s
        .args_key
        .iter()
        .map(|&t| state.type_name(t))
        .collect::<Vec<_>>()
        .join(", ");
    let mut failures = Vec::new();
    for (overload, result) in &s.failures {
        let (name, universal) = match overload {
            Some(o) => (
                state.expr_text(state.overloads[o.index()].target),
                is_universal_overload(state, *o),
            ),
            None => ("<constructor>".to_owned(), false),
        };
        failures.push(MatchFailureNote {
            overload: name,
            reason: result.describe(state),
            universal,
        });
    }
    state.error(DiagnosticKind::Match {
        callable: format!("{callable}({args})"),
        failures,
        interface_violation: false,
    })
}
