//! Module loading and program assembly.
//!
//! The loader owns the search path and the dotted-name → module table.
//! Loading a module parses it, installs its symbol bindings, recursively
//! loads its imports (cycles are permitted for visibility), then runs
//! initialization: overload and instance registration, top-level `eval`
//! expansion, and static assertions, tracked per module through
//! `{Before, Running, Done}` states.
//!
//! Two modules are synthesized rather than loaded: `__primitives__`
//! (the primitive-op registry plus the primitive type names) and the
//! embedded `prelude`, which every other module star-imports implicitly.

use std::path::PathBuf;

use strum::IntoEnumIterator;

use crate::ast::{ExprKind, ExprList, Visibility};
use crate::decls::Documentation;
use crate::env::EnvParent;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{
    AliasId, EnumId, ExternalProcId, ExternalVarId, GlobalId, InstanceId, ModuleId, NewTypeId,
    OverloadId, ProcId, RecordId, VariantId,
};
use crate::intern::StrId;
use crate::module::{Import, InitState, Module, ModuleTree};
use crate::object::Object;
use crate::primops::PrimOp;
use crate::source::Location;
use crate::state::CompilerState;

pub const SOURCE_EXTENSION: &str = "clay";
pub const PRIMITIVES_MODULE: &str = "__primitives__";
pub const MAIN_MODULE: &str = "__main__";

const PRELUDE_SOURCE: &str = include_str!("prelude.clay");

/// One top-level item of a module, referencing the declaration arenas.
#[derive(Debug, Clone)]
pub enum TopLevelRef {
    Record(RecordId),
    Variant(VariantId),
    Instance(InstanceId),
    Overload(OverloadId),
    Procedure(ProcId),
    Enum(EnumId),
    GlobalVar(GlobalId),
    GlobalAlias(AliasId),
    ExternalProc(ExternalProcId),
    ExternalVar(ExternalVarId),
    NewType(NewTypeId),
    Eval { args: ExprList },
    StaticAssert {
        condition: crate::ids::ExprId,
        message: ExprList,
    },
    Documentation(Documentation),
}

impl CompilerState {
    /// Creates an empty module shell with its global environment.
    pub fn create_module(&mut self, name: &str, location: Option<Location>) -> ModuleId {
        let id = ModuleId::new(self.modules.len());
        let env = self.new_env(EnvParent::Module(id));
        self.modules.push(Module {
            name: name.to_owned(),
            imports: Vec::new(),
            top_level_llvm: None,
            items: Vec::new(),
            globals: indexmap::IndexMap::new(),
            public_globals: indexmap::IndexMap::new(),
            env,
            init_state: InitState::Before,
            default_integer_type: self.core.int32,
            default_float_type: self.core.float64,
            imported_module_names: ModuleTree::default(),
            attribute_build_flags: Vec::new(),
            location,
        });
        self.module_table.insert(name.to_owned(), id);
        id
    }

    pub fn loaded_module(&self, name: &str) -> Option<ModuleId> {
        self.module_table.get(name).copied()
    }
}

//
// search path resolution
//

fn module_file_for(state: &CompilerState, dotted: &str) -> Option<PathBuf> {
    let relative: PathBuf = dotted.split('.').collect();
    for base in &state.config.search_paths {
        let candidate = base.join(&relative).with_extension(SOURCE_EXTENSION);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn dotted_to_string(state: &CompilerState, dotted: &[StrId]) -> String {
    dotted
        .iter()
        .map(|&p| state.interner.get(p))
        .collect::<Vec<_>>()
        .join(".")
}

//
// program entry points
//

/// Loads a whole program rooted at a single source file, returning the
/// fully-initialized program module.
pub fn load_program(state: &mut CompilerState, file: &std::path::Path) -> CompileResult<ModuleId> {
    let text = std::fs::read(file).map_err(|e| {
        state.error(DiagnosticKind::Import {
            module: file.display().to_string(),
            searched: Vec::new(),
            cycle: vec![e.to_string()],
        })
    })?;
    load_program_source(state, &file.display().to_string(), text)
}

/// Loads a program from an in-memory buffer (tests, interactive use).
pub fn load_program_source(
    state: &mut CompilerState,
    name: &str,
    text: Vec<u8>,
) -> CompileResult<ModuleId> {
    ensure_builtin_modules(state)?;
    let source = state.sources.add(name.to_owned(), text);
    let module = state.create_module(MAIN_MODULE, None);
    implicit_prelude_import(state, module);
    crate::parser::parse_module_source(state, source, module)?;
    install_symbols(state, module)?;
    resolve_imports(state, module)?;
    initialize_module(state, module)?;
    Ok(module)
}

/// Loads a module by dotted name against the search path.
pub fn load_module(state: &mut CompilerState, dotted: &str) -> CompileResult<ModuleId> {
    if let Some(id) = state.loaded_module(dotted) {
        return Ok(id);
    }
    ensure_builtin_modules(state)?;
    if let Some(id) = state.loaded_module(dotted) {
        return Ok(id);
    }
    let Some(file) = module_file_for(state, dotted) else {
        let searched = state
            .config
            .search_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        return Err(state.error(DiagnosticKind::Import {
            module: dotted.to_owned(),
            searched,
            cycle: Vec::new(),
        }));
    };
    let text = std::fs::read(&file).map_err(|e| {
        state.error(DiagnosticKind::Import {
            module: dotted.to_owned(),
            searched: Vec::new(),
            cycle: vec![e.to_string()],
        })
    })?;
    let source = state.sources.add(file.display().to_string(), text);
    let module = state.create_module(dotted, None);
    implicit_prelude_import(state, module);
    crate::parser::parse_module_source(state, source, module)?;
    install_symbols(state, module)?;
    resolve_imports(state, module)?;
    initialize_module(state, module)?;
    Ok(module)
}

fn implicit_prelude_import(state: &mut CompilerState, module: ModuleId) {
    let prelude = state.intern(crate::desugar::PRELUDE_MODULE);
    state.modules[module.index()].imports.push(Import::Star {
        dotted: vec![prelude],
        visibility: Visibility::Private,
        module: None,
    });
}

//
// builtin modules
//

pub fn ensure_builtin_modules(state: &mut CompilerState) -> CompileResult<()> {
    if state.prelude_module.is_some() {
        return Ok(());
    }
    let primitives = build_primitives_module(state)?;
    state.primitives_module = Some(primitives);

    let source = state.sources.add(
        "<prelude>".to_owned(),
        PRELUDE_SOURCE.as_bytes().to_vec(),
    );
    let prelude = state.create_module(crate::desugar::PRELUDE_MODULE, None);
    state.prelude_module = Some(prelude);
    crate::parser::parse_module_source(state, source, prelude)?;
    install_symbols(state, prelude)?;
    resolve_imports(state, prelude)?;
    initialize_module(state, prelude)?;
    Ok(())
}

/// The `__primitives__` module: every primitive op under its surface name,
/// plus the primitive scalar type names.
fn build_primitives_module(state: &mut CompilerState) -> CompileResult<ModuleId> {
    let module = state.create_module(PRIMITIVES_MODULE, None);
    for op in PrimOp::iter() {
        let name = state.intern(op.name());
        state.add_global(module, name, Visibility::Public, Object::PrimOp(op), None)?;
    }
    let scalars: [(&str, crate::ids::TypeId); 13] = [
        ("Bool", state.core.bool_type),
        ("Int8", state.core.int8),
        ("Int16", state.core.int16),
        ("Int32", state.core.int32),
        ("Int64", state.core.int64),
        ("UInt8", state.core.uint8),
        ("UInt16", state.core.uint16),
        ("UInt32", state.core.uint32),
        ("UInt64", state.core.uint64),
        ("Float32", state.core.float32),
        ("Float64", state.core.float64),
        ("SizeT", state.core.size_type),
        ("PtrDiffT", state.core.ptrdiff_type),
    ];
    for (name, ty) in scalars {
        let name = state.intern(name);
        state.add_global(module, name, Visibility::Public, Object::Type(ty), None)?;
    }
    let imag32 = state.float_type(32, true);
    let imag64 = state.float_type(64, true);
    let complex32 = state.complex_type(32);
    let complex64 = state.complex_type(64);
    for (name, ty) in [
        ("Imag32", imag32),
        ("Imag64", imag64),
        ("Complex32", complex32),
        ("Complex64", complex64),
    ] {
        let name = state.intern(name);
        state.add_global(module, name, Visibility::Public, Object::Type(ty), None)?;
    }
    state.modules[module.index()].init_state = InitState::Done;
    Ok(module)
}

//
// symbol installation
//

/// Installs the module's own top-level bindings; needs no evaluation, so
/// it runs before imports resolve and cycles stay representable.
fn install_symbols(state: &mut CompilerState, module: ModuleId) -> CompileResult<()> {
    let items = state.modules[module.index()].items.clone();
    install_item_symbols(state, module, &items)
}

fn install_item_symbols(
    state: &mut CompilerState,
    module: ModuleId,
    items: &[TopLevelRef],
) -> CompileResult<()> {
    for item in items {
        match item {
            TopLevelRef::Record(id) => {
                let (name, visibility, location) = {
                    let d = &state.records[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::Record(*id), location)?;
            }
            TopLevelRef::Variant(id) => {
                let (name, visibility, location) = {
                    let d = &state.variants[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::Variant(*id), location)?;
            }
            TopLevelRef::Procedure(id) => {
                let (name, visibility, location) = {
                    let d = &state.procedures[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::Procedure(*id), location)?;
            }
            TopLevelRef::Enum(id) => {
                let (name, visibility, location, members) = {
                    let d = &state.enums[id.index()];
                    (d.name, d.visibility, d.location, d.members.clone())
                };
                state.add_global(module, name, visibility, Object::Enumeration(*id), location)?;
                for (index, member) in members.iter().enumerate() {
                    state.add_global(
                        module,
                        *member,
                        visibility,
                        Object::EnumMember {
                            decl: *id,
                            index: u32::try_from(index).expect("enum member overflow"),
                        },
                        location,
                    )?;
                }
            }
            TopLevelRef::GlobalVar(id) => {
                let (name, visibility, location) = {
                    let d = &state.global_vars[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::GlobalVar(*id), location)?;
            }
            TopLevelRef::GlobalAlias(id) => {
                let (name, visibility, location) = {
                    let d = &state.global_aliases[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::GlobalAlias(*id), location)?;
            }
            TopLevelRef::ExternalProc(id) => {
                let (name, visibility, location) = {
                    let d = &state.external_procs[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::ExternalProc(*id), location)?;
            }
            TopLevelRef::ExternalVar(id) => {
                let (name, visibility, location) = {
                    let d = &state.external_vars[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::ExternalVar(*id), location)?;
            }
            TopLevelRef::NewType(id) => {
                let (name, visibility, location) = {
                    let d = &state.newtypes[id.index()];
                    (d.name, d.visibility, d.location)
                };
                state.add_global(module, name, visibility, Object::NewType(*id), location)?;
            }
            TopLevelRef::Overload(_)
            | TopLevelRef::Instance(_)
            | TopLevelRef::Eval { .. }
            | TopLevelRef::StaticAssert { .. }
            | TopLevelRef::Documentation(_) => {}
        }
    }
    Ok(())
}

//
// import resolution
//

fn resolve_imports(state: &mut CompilerState, module: ModuleId) -> CompileResult<()> {
    let imports = state.modules[module.index()].imports.clone();
    let mut resolved = Vec::with_capacity(imports.len());
    for import in imports {
        let dotted_string = dotted_to_string(state, import.dotted());
        let loaded = load_module(state, &dotted_string)?;
        let resolved_import = match import {
            Import::Module {
                dotted,
                alias,
                visibility,
                ..
            } => {
                // record the dotted path (or the alias) in the module-name
                // tree consulted by field-ref desugaring
                let tree_path: Vec<StrId> = match alias {
                    Some(alias) => vec![alias],
                    None => dotted.clone(),
                };
                let m = &mut state.modules[module.index()];
                let mut node = &mut m.imported_module_names;
                for part in &tree_path {
                    node = node.children.entry(*part).or_default();
                }
                node.module = Some(loaded);
                if let Some(alias) = alias {
                    state.add_global(
                        module,
                        alias,
                        visibility,
                        Object::Module(loaded),
                        None,
                    )?;
                }
                Import::Module {
                    dotted,
                    alias,
                    visibility,
                    module: Some(loaded),
                }
            }
            Import::Star {
                dotted, visibility, ..
            } => Import::Star {
                dotted,
                visibility,
                module: Some(loaded),
            },
            Import::Members {
                dotted,
                members,
                visibility,
                ..
            } => {
                for (name, alias) in &members {
                    let Some(obj) = state.lookup_public(loaded, *name) else {
                        let rendered = state.interner.get(*name).to_owned();
                        return Err(state.error(DiagnosticKind::Lookup {
                            name: format!("{rendered} is not a public member of {dotted_string}"),
                        }));
                    };
                    state.add_global(module, alias.unwrap_or(*name), visibility, obj, None)?;
                }
                Import::Members {
                    dotted,
                    members,
                    visibility,
                    module: Some(loaded),
                }
            }
        };
        resolved.push(resolved_import);
    }
    state.modules[module.index()].imports = resolved;
    Ok(())
}

//
// initialization
//

/// Runs a module's initialization exactly once. Re-entering a module that
/// is already `Running` is benign for visibility; the work simply waits
/// for the outer call.
pub fn initialize_module(state: &mut CompilerState, module: ModuleId) -> CompileResult<()> {
    match state.modules[module.index()].init_state {
        InitState::Done | InitState::Running => return Ok(()),
        InitState::Before => {}
    }
    state.modules[module.index()].init_state = InitState::Running;

    let imports = state.modules[module.index()].imports.clone();
    for import in imports {
        if let Some(imported) = import.loaded() {
            initialize_module(state, imported)?;
        }
    }

    let items = state.modules[module.index()].items.clone();
    register_items(state, module, &items)?;
    run_init_items(state, module, &items)?;

    state.modules[module.index()].init_state = InitState::Done;
    Ok(())
}

/// First pass: attach overloads and variant instances to their targets.
fn register_items(
    state: &mut CompilerState,
    _module: ModuleId,
    items: &[TopLevelRef],
) -> CompileResult<()> {
    for item in items {
        match item {
            TopLevelRef::Overload(id) => register_overload(state, *id)?,
            TopLevelRef::Instance(id) => register_instance(state, *id)?,
            _ => {}
        }
    }
    Ok(())
}

/// Second pass, in source order: expand top-level `eval` and run static
/// assertions.
fn run_init_items(
    state: &mut CompilerState,
    module: ModuleId,
    items: &[TopLevelRef],
) -> CompileResult<()> {
    let env = state.modules[module.index()].env;
    for item in items {
        match item {
            TopLevelRef::Eval { args } => {
                let values = crate::evaluator::evaluate_multi_static(state, args, env)?;
                let mut text = String::new();
                for value in &values {
                    text.push_str(&crate::object::print_object(state, value));
                }
                let source = state.sources.add("<eval top level>".to_owned(), text.into_bytes());
                let new_items = crate::parser::parse_top_level_source(state, source, module)?;
                install_item_symbols(state, module, &new_items)?;
                register_items(state, module, &new_items)?;
                run_init_items(state, module, &new_items)?;
            }
            TopLevelRef::StaticAssert { condition, message } => {
                crate::evaluator::execute_static_assert(state, *condition, message, env)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// How constrained an overload's formal-arg patterns are: the count of
/// constructor positions (anything that is not a bare pattern variable),
/// with non-variadic signatures outranking variadic ones at equal
/// constraint. Candidates sort by this, descending, so a strictly-more-
/// specific overload is tried before a subset-general one regardless of
/// source order, and fully-universal (default) overloads land last.
pub fn overload_specificity(state: &CompilerState, overload: OverloadId) -> u32 {
    let decl = &state.overloads[overload.index()];
    let pattern_var_names: Vec<StrId> =
        decl.code.pattern_vars.iter().map(|v| v.name).collect();
    let mut score = 0u32;
    let mut args: Vec<&crate::ast::FormalArg> = decl.code.formal_args.iter().collect();
    if let Some(var_arg) = &decl.code.var_arg {
        args.push(var_arg);
    }
    for arg in args {
        if let Some(ty) = arg.ty {
            score += constructor_count(state, ty, &pattern_var_names);
        }
    }
    score * 2 + u32::from(decl.code.var_arg.is_none())
}

fn constructor_count(state: &CompilerState, expr: crate::ids::ExprId, vars: &[StrId]) -> u32 {
    match &state.expr(expr).kind {
        ExprKind::NameRef(name) => u32::from(!vars.contains(name)),
        ExprKind::Indexing { expr, args } => {
            let mut n = constructor_count(state, *expr, vars);
            for &a in args {
                n += constructor_count(state, a, vars);
            }
            n
        }
        ExprKind::Tuple(args) | ExprKind::Paren(args) => {
            let mut n = 1;
            for &a in args {
                n += constructor_count(state, a, vars);
            }
            n
        }
        ExprKind::Unpack(inner) => constructor_count(state, *inner, vars),
        ExprKind::FieldRef { expr, .. } => 1 + constructor_count(state, *expr, vars),
        _ => 1,
    }
}

/// Inserts an overload into a candidate list, keeping the list sorted by
/// specificity (descending) and stable among equals.
fn insert_by_specificity(
    state: &CompilerState,
    list: &mut Vec<OverloadId>,
    overload: OverloadId,
) {
    let score = overload_specificity(state, overload);
    let at = list
        .iter()
        .position(|&o| overload_specificity(state, o) < score)
        .unwrap_or(list.len());
    list.insert(at, overload);
}

fn register_overload(state: &mut CompilerState, overload: OverloadId) -> CompileResult<()> {
    let (target, env, location) = {
        let d = &state.overloads[overload.index()];
        (d.target, d.env, d.location)
    };
    state.push_location(location);
    let result = register_overload_target(state, overload, target, env);
    state.pop_location();
    result
}

fn register_overload_target(
    state: &mut CompilerState,
    overload: OverloadId,
    target: crate::ids::ExprId,
    env: crate::ids::EnvId,
) -> CompileResult<()> {
    // the target may be a generic pattern (`Pointer[T]`); registration only
    // needs the head object, so pattern heads are resolved structurally
    let head = overload_target_head(state, target, env)?;
    match head {
        Object::Procedure(p) => {
            let mut list = std::mem::take(&mut state.procedures[p.index()].overloads);
            insert_by_specificity(state, &mut list, overload);
            state.procedures[p.index()].overloads = list;
        }
        Object::Record(r) => {
            let mut list = std::mem::take(&mut state.records[r.index()].overloads);
            insert_by_specificity(state, &mut list, overload);
            state.records[r.index()].overloads = list;
        }
        Object::Variant(v) => {
            let mut list = std::mem::take(&mut state.variants[v.index()].overloads);
            insert_by_specificity(state, &mut list, overload);
            state.variants[v.index()].overloads = list;
        }
        Object::GlobalAlias(a) if state.global_aliases[a.index()].has_params() => {
            let mut list = std::mem::take(&mut state.global_aliases[a.index()].overloads);
            insert_by_specificity(state, &mut list, overload);
            state.global_aliases[a.index()].overloads = list;
        }
        Object::Type(_) | Object::PrimOp(_) => {
            let mut list = std::mem::take(&mut state.type_overloads);
            insert_by_specificity(state, &mut list, overload);
            state.type_overloads = list;
        }
        other => {
            let rendered = crate::object::print_object(state, &other);
            return Err(state.type_mismatch(
                "overload target",
                "a callable symbol",
                &rendered,
            ));
        }
    }
    Ok(())
}

/// The object an overload attaches to: the base of the target expression
/// with any indexing stripped.
fn overload_target_head(
    state: &mut CompilerState,
    target: crate::ids::ExprId,
    env: crate::ids::EnvId,
) -> CompileResult<Object> {
    let kind = state.expr(target).kind.clone();
    match kind {
        ExprKind::Indexing { expr, .. } => overload_target_head(state, expr, env),
        ExprKind::NameRef(name) => {
            let obj = state.safe_lookup_env(env, name)?;
            Ok(match obj {
                Object::GlobalAlias(a) if !state.global_aliases[a.index()].has_params() => {
                    let decl_expr = state.global_aliases[a.index()].expr;
                    let decl_env = state.global_aliases[a.index()].env;
                    overload_target_head(state, decl_expr, decl_env)?
                }
                other => other,
            })
        }
        ExprKind::FieldRef { .. } => {
            let module = state
                .env_module(env)
                .expect("overload target outside a module");
            let desugared = crate::desugar::desugar_field_ref(state, target, module)?;
            overload_target_head(state, desugared, env)
        }
        ExprKind::ForeignExpr { .. } => {
            let (inner, foreign_env) = crate::analyzer::resolve_foreign(state, target)?;
            overload_target_head(state, inner, foreign_env)
        }
        ExprKind::ObjectExpr(obj) => Ok(obj),
        _ => crate::evaluator::evaluate_one_static(state, target, env),
    }
}

/// Attaches an `instance` declaration to the variant it extends. The
/// member-index order is: the defining module's default members in source
/// order, then instances in registration order.
fn register_instance(state: &mut CompilerState, instance: InstanceId) -> CompileResult<()> {
    let (target, env, location) = {
        let d = &state.instances[instance.index()];
        (d.target, d.env, d.location)
    };
    state.push_location(location);
    let head = overload_target_head(state, target, env);
    state.pop_location();
    match head? {
        Object::Variant(v) => {
            state.variants[v.index()].instances.push(instance);
            Ok(())
        }
        Object::Type(t) => match state.types.get(t).kind.clone() {
            crate::types::TypeKind::Variant { decl, .. } => {
                state.variants[decl.index()].instances.push(instance);
                Ok(())
            }
            _ => {
                let name = state.type_name(t);
                Err(state.type_mismatch("instance target", "a variant", &name))
            }
        },
        other => {
            let rendered = crate::object::print_object(state, &other);
            Err(state.type_mismatch("instance target", "a variant", &rendered))
        }
    }
}
