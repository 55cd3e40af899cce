//! The compilation context.
//!
//! One [`CompilerState`] owns every arena, intern table, cache, and the
//! invoke tables for a compilation, threaded explicitly through every core
//! entry point. The compiler is single-threaded and cooperative: nothing in
//! here is safe to touch re-entrantly from another thread, and nothing
//! needs to be.

use ahash::AHashMap;

use crate::ast::{Expr, ExprKind, ExprList, Stmt, StmtKind};
use crate::decls::{
    EnumDecl, ExternalProcDecl, ExternalVarDecl, GlobalAliasDecl, GlobalVarDecl, GvarInstance,
    InstanceDecl, NewTypeDecl, OverloadDecl, ProcedureDecl, RecordDecl, VariantDecl,
};
use crate::env::EnvData;
use crate::error::{CompileResult, ContextFrame, Diagnostic, DiagnosticKind};
use crate::evaluator::EvalStack;
use crate::ids::{ExprId, ModuleId, OverloadId, StmtId, TypeId, ValueId};
use crate::intern::{Interner, StrId};
use crate::invoke::{InvokeEntry, InvokeSet, InvokeSetKey};
use crate::module::Module;
use crate::object::ValueHolder;
use crate::pattern::{CellValue, MultiPattern};
use crate::source::{Location, SourceMap};
use crate::types::{CoreTypes, TypeTable, core_types};

/// Options the core consumes; populated by the driver.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub search_paths: Vec<std::path::PathBuf>,
    /// Include universally-quantified candidates in match-error reports.
    pub full_match_errors: bool,
    /// `module.symbol` / `module.*` globs that trigger overload-set dumps.
    pub log_match_symbols: Vec<(String, String)>,
}

/// Analyzer memo entry: expression analyses are cached per node.
pub type AnalysisCache = AHashMap<ExprId, crate::analyzer::MultiPValue>;

#[derive(Debug)]
pub struct CompilerState {
    pub sources: SourceMap,
    pub interner: Interner,
    pub config: Config,

    // AST arenas
    pub exprs: Vec<Expr>,
    pub stmts: Vec<Stmt>,

    // declarations
    pub records: Vec<RecordDecl>,
    pub variants: Vec<VariantDecl>,
    pub instances: Vec<InstanceDecl>,
    pub overloads: Vec<OverloadDecl>,
    pub procedures: Vec<ProcedureDecl>,
    pub enums: Vec<EnumDecl>,
    pub global_vars: Vec<GlobalVarDecl>,
    pub gvar_instances: Vec<GvarInstance>,
    pub global_aliases: Vec<GlobalAliasDecl>,
    pub external_procs: Vec<ExternalProcDecl>,
    pub external_vars: Vec<ExternalVarDecl>,
    pub newtypes: Vec<NewTypeDecl>,

    // modules and environments
    pub modules: Vec<Module>,
    pub module_table: AHashMap<String, ModuleId>,
    pub envs: Vec<EnvData>,
    pub prelude_module: Option<ModuleId>,
    pub primitives_module: Option<ModuleId>,

    // types and compile-time values
    pub types: TypeTable,
    pub core: CoreTypes,
    pub holders: Vec<ValueHolder>,

    // pattern cells
    pub cells: Vec<Option<CellValue>>,
    pub multi_cells: Vec<Option<MultiPattern>>,

    // invoke tables: they grow monotonically, entries are never removed
    pub invoke_sets: Vec<InvokeSet>,
    pub invoke_set_table: AHashMap<InvokeSetKey, crate::ids::InvokeSetId>,
    pub invoke_entries: Vec<InvokeEntry>,
    /// Overloads whose target is a type expression; candidates for every
    /// type callable.
    pub type_overloads: Vec<OverloadId>,

    // caches, all keyed by arena id so clones never share them
    pub analysis_cache: AnalysisCache,
    pub desugared_exprs: AHashMap<ExprId, ExprId>,
    pub desugared_stmts: AHashMap<StmtId, StmtId>,
    pub eval_expr_cache: AHashMap<ExprId, ExprList>,
    pub eval_stmt_cache: AHashMap<StmtId, Vec<StmtId>>,
    pub static_for_clones: AHashMap<StmtId, Vec<StmtId>>,
    pub lambda_converted: AHashMap<ExprId, ExprId>,
    /// Depth of the analysis-caching disabler; nonzero suppresses both
    /// reads and writes of `analysis_cache`.
    pub caching_disabled: u32,

    // evaluator
    pub eval_stack: EvalStack,

    // diagnostics
    pub context_stack: Vec<ContextFrame>,
    pub location_stack: Vec<Option<Location>>,
}

impl CompilerState {
    #[must_use]
    pub fn new() -> Self {
        let mut types = TypeTable::default();
        let core = core_types(&mut types);
        Self {
            sources: SourceMap::default(),
            interner: Interner::default(),
            config: Config::default(),
            exprs: Vec::new(),
            stmts: Vec::new(),
            records: Vec::new(),
            variants: Vec::new(),
            instances: Vec::new(),
            overloads: Vec::new(),
            procedures: Vec::new(),
            enums: Vec::new(),
            global_vars: Vec::new(),
            gvar_instances: Vec::new(),
            global_aliases: Vec::new(),
            external_procs: Vec::new(),
            external_vars: Vec::new(),
            newtypes: Vec::new(),
            modules: Vec::new(),
            module_table: AHashMap::new(),
            envs: Vec::new(),
            prelude_module: None,
            primitives_module: None,
            types,
            core,
            holders: Vec::new(),
            cells: Vec::new(),
            multi_cells: Vec::new(),
            invoke_sets: Vec::new(),
            invoke_set_table: AHashMap::new(),
            invoke_entries: Vec::new(),
            type_overloads: Vec::new(),
            analysis_cache: AHashMap::new(),
            desugared_exprs: AHashMap::new(),
            desugared_stmts: AHashMap::new(),
            eval_expr_cache: AHashMap::new(),
            eval_stmt_cache: AHashMap::new(),
            static_for_clones: AHashMap::new(),
            lambda_converted: AHashMap::new(),
            caching_disabled: 0,
            eval_stack: EvalStack::default(),
            context_stack: Vec::new(),
            location_stack: Vec::new(),
        }
    }

    //
    // AST arena access
    //

    pub fn add_expr(&mut self, kind: ExprKind, location: Option<Location>) -> ExprId {
        let id = ExprId::new(self.exprs.len());
        self.exprs.push(Expr {
            kind,
            location,
            end_location: location,
        });
        id
    }

    pub fn add_expr_spanning(
        &mut self,
        kind: ExprKind,
        location: Option<Location>,
        end_location: Option<Location>,
    ) -> ExprId {
        let id = ExprId::new(self.exprs.len());
        self.exprs.push(Expr {
            kind,
            location,
            end_location,
        });
        id
    }

    pub fn add_stmt(&mut self, kind: StmtKind, location: Option<Location>) -> StmtId {
        let id = StmtId::new(self.stmts.len());
        self.stmts.push(Stmt { kind, location });
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn expr_location(&self, id: ExprId) -> Option<Location> {
        self.exprs[id.index()].location
    }

    /// The original source text of an expression, for static-assert and
    /// match diagnostics. Generated expressions render as a placeholder.
    pub fn expr_text(&self, id: ExprId) -> String {
        let e = self.expr(id);
        match (e.location, e.end_location) {
            (Some(start), Some(end)) if end.offset > start.offset => self
                .sources
                .slice(start, end)
                .unwrap_or_else(|| "<generated expression>".to_owned()),
            _ => "<generated expression>".to_owned(),
        }
    }

    pub fn intern(&mut self, s: &str) -> StrId {
        self.interner.intern(s)
    }

    //
    // value holders
    //

    pub fn new_holder(&mut self, ty: TypeId, bytes: Box<[u8]>) -> ValueId {
        let id = ValueId::new(self.holders.len());
        self.holders.push(ValueHolder { ty, bytes });
        id
    }

    pub fn bool_holder(&mut self, value: bool) -> ValueId {
        let ty = self.core.bool_type;
        self.new_holder(ty, Box::new([u8::from(value)]))
    }

    pub fn int_holder(&mut self, value: i32) -> ValueId {
        let ty = self.core.int32;
        self.new_holder(ty, Box::new(value.to_le_bytes()))
    }

    pub fn size_holder(&mut self, value: u64) -> ValueId {
        let ty = self.core.size_type;
        self.new_holder(ty, Box::new(value.to_le_bytes()))
    }

    pub fn print_value_holder(&self, id: ValueId) -> String {
        let holder = &self.holders[id.index()];
        let bytes = &holder.bytes;
        match &self.types.get(holder.ty).kind {
            crate::types::TypeKind::Bool => {
                if bytes.first() == Some(&0) {
                    "false".to_owned()
                } else {
                    "true".to_owned()
                }
            }
            crate::types::TypeKind::Integer { bits, signed } => {
                let value = read_int_bytes(bytes, *bits, *signed);
                format!("{value}")
            }
            crate::types::TypeKind::Float { bits: 32, .. } => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&bytes[..4]);
                format!("{}", f32::from_le_bytes(b))
            }
            crate::types::TypeKind::Float { .. } => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                format!("{}", f64::from_le_bytes(b))
            }
            crate::types::TypeKind::Static(obj) => crate::object::print_object(self, obj),
            _ => format!("<{} value>", self.type_name(holder.ty)),
        }
    }

    //
    // diagnostics
    //

    /// Builds a diagnostic at the innermost active location, capturing the
    /// compile-context stack.
    pub fn error(&self, kind: DiagnosticKind) -> Box<Diagnostic> {
        let location = self
            .location_stack
            .iter()
            .rev()
            .find_map(|l| *l);
        self.error_at(kind, location)
    }

    pub fn error_at(&self, kind: DiagnosticKind, location: Option<Location>) -> Box<Diagnostic> {
        let mut diagnostic = Diagnostic::new(kind, location);
        diagnostic.context = self.context_stack.clone();
        diagnostic
    }

    pub fn eval_error(&self, message: impl Into<String>) -> Box<Diagnostic> {
        self.error(DiagnosticKind::Eval {
            message: message.into(),
        })
    }

    pub fn type_mismatch(
        &self,
        context: &str,
        expected: &str,
        actual: &str,
    ) -> Box<Diagnostic> {
        self.error(DiagnosticKind::TypeMismatch {
            context: context.to_owned(),
            expected: expected.to_owned(),
            actual: actual.to_owned(),
        })
    }

    pub fn push_location(&mut self, location: Option<Location>) {
        self.location_stack.push(location);
    }

    pub fn pop_location(&mut self) {
        self.location_stack.pop();
    }

    pub fn push_context(&mut self, description: String, location: Option<Location>) {
        self.context_stack.push(ContextFrame {
            description,
            location,
        });
    }

    pub fn pop_context(&mut self) {
        self.context_stack.pop();
    }
}

impl Default for CompilerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Little-endian scalar decode used by holder printing and the evaluator.
pub fn read_int_bytes(bytes: &[u8], bits: u8, signed: bool) -> i128 {
    let n = usize::from(bits) / 8;
    let mut raw = [0u8; 16];
    raw[..n].copy_from_slice(&bytes[..n]);
    if signed && n > 0 && bytes[n - 1] & 0x80 != 0 {
        for b in raw.iter_mut().skip(n) {
            *b = 0xff;
        }
    }
    i128::from_le_bytes(raw)
}

/// Little-endian scalar encode; the value is truncated to the width.
pub fn write_int_bytes(bytes: &mut [u8], bits: u8, value: i128) {
    let n = usize::from(bits) / 8;
    let raw = value.to_le_bytes();
    bytes[..n].copy_from_slice(&raw[..n]);
}
