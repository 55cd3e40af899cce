//! Top-level declarations.
//!
//! Parsed declaration records, stored in per-kind arenas on
//! `CompilerState`. Mutable analysis results (resolved types, instance
//! lists, pattern caches) live directly on the declaration entries; they are
//! written only from the single compilation thread.

use crate::ast::{Code, ExprList, PatternVar, Visibility};
use crate::ids::{EnvId, ExprId, GvarInstanceId, InstanceId, ModuleId, OverloadId, TypeId};
use crate::intern::StrId;
use crate::object::{Object, ObjectKey};
use crate::source::Location;

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: StrId,
    pub ty: ExprId,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub enum RecordBody {
    Fields(Vec<RecordField>),
    /// Computed bodies evaluate to `[name, Type]` pairs at compile time.
    Computed(ExprList),
}

#[derive(Debug)]
pub struct RecordDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub params: Vec<StrId>,
    pub var_param: Option<StrId>,
    pub body: RecordBody,
    /// User overloads targeting this record, most specific first.
    pub overloads: Vec<OverloadId>,
    pub env: EnvId,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct VariantDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub params: Vec<StrId>,
    pub var_param: Option<StrId>,
    /// `open` variants accept `instance` extensions from any module.
    pub open: bool,
    pub default_members: ExprList,
    /// Instance declarations in registration order; the order defines
    /// `VariantMemberIndex`.
    pub instances: Vec<InstanceId>,
    pub overloads: Vec<OverloadId>,
    pub env: EnvId,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct InstanceDecl {
    pub module: ModuleId,
    pub pattern_vars: Vec<PatternVar>,
    pub predicate: Option<ExprId>,
    pub target: ExprId,
    pub member: ExprId,
    pub env: EnvId,
    pub location: Option<Location>,
}

/// Pre-computed pattern state for `match_invoke`, built on first use.
#[derive(Debug, Clone, Default)]
pub enum OverloadPatterns {
    #[default]
    NotInitialized,
    Initializing,
    Ready(Box<ReadyPatterns>),
}

#[derive(Debug, Clone)]
pub struct ReadyPatterns {
    pub cells: Vec<Option<crate::ids::CellId>>,
    pub multi_cells: Vec<Option<crate::ids::MultiCellId>>,
    pub pattern_env: EnvId,
    pub callable_pattern: crate::pattern::Pattern,
    /// One entry per formal arg; `None` when the formal has no type.
    pub arg_patterns: Vec<Option<crate::pattern::Pattern>>,
    pub var_arg_pattern: Option<crate::pattern::MultiPattern>,
}

#[derive(Debug)]
pub struct OverloadDecl {
    pub module: ModuleId,
    pub target: ExprId,
    pub code: Code,
    pub call_by_name: bool,
    pub is_inline: bool,
    pub env: EnvId,
    pub patterns: OverloadPatterns,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct ProcedureDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    /// Candidates in resolution order: more-constrained formal-arg
    /// patterns first, fully-universal (default) overloads last.
    pub overloads: Vec<OverloadId>,
    /// When present, matched before any candidate; failure is an
    /// interface violation.
    pub interface: Option<OverloadId>,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct EnumDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub members: Vec<StrId>,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct GlobalVarDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub params: Vec<StrId>,
    pub var_param: Option<StrId>,
    pub expr: ExprId,
    pub env: EnvId,
    /// Instantiations keyed by their static parameters.
    pub instances: Vec<(Vec<ObjectKey>, GvarInstanceId)>,
    pub location: Option<Location>,
}

impl GlobalVarDecl {
    pub fn has_params(&self) -> bool {
        !self.params.is_empty() || self.var_param.is_some()
    }
}

#[derive(Debug)]
pub struct GvarInstance {
    pub gvar: crate::ids::GlobalId,
    pub params: Vec<Object>,
    pub analyzing: bool,
    pub expr: ExprId,
    pub env: EnvId,
    pub ty: Option<TypeId>,
}

#[derive(Debug)]
pub struct GlobalAliasDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub params: Vec<StrId>,
    pub var_param: Option<StrId>,
    pub expr: ExprId,
    pub env: EnvId,
    pub overloads: Vec<OverloadId>,
    pub location: Option<Location>,
}

impl GlobalAliasDecl {
    pub fn has_params(&self) -> bool {
        !self.params.is_empty() || self.var_param.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ExternalArg {
    pub name: StrId,
    pub ty: ExprId,
    pub resolved: Option<TypeId>,
}

/// Analysis results for an external procedure.
#[derive(Debug, Clone)]
pub struct ExternalProcInfo {
    pub arg_types: Vec<TypeId>,
    pub return_type: Option<TypeId>,
    /// The `ExternalCodePointer` type of the symbol.
    pub ptr_type: TypeId,
}

#[derive(Debug)]
pub struct ExternalProcDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub args: Vec<ExternalArg>,
    pub has_var_args: bool,
    pub return_type: Option<ExprId>,
    pub body: Option<crate::ids::StmtId>,
    pub attributes: ExprList,
    pub env: EnvId,
    pub info: Option<ExternalProcInfo>,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct ExternalVarDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub ty: ExprId,
    pub attributes: ExprList,
    pub env: EnvId,
    pub resolved: Option<TypeId>,
    pub location: Option<Location>,
}

#[derive(Debug)]
pub struct NewTypeDecl {
    pub module: ModuleId,
    pub name: StrId,
    pub visibility: Visibility,
    pub expr: ExprId,
    pub env: EnvId,
    pub base: Option<TypeId>,
    pub location: Option<Location>,
}

/// A documentation block attached at the top level.
#[derive(Debug, Clone)]
pub struct Documentation {
    pub properties: Vec<(String, String)>,
    pub text: String,
    pub location: Option<Location>,
}
