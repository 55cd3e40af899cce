//! Modules and their symbol tables.
//!
//! A module owns a global environment, two symbol tables (all bindings and
//! the public subset), its import list, and the dotted-module-name tree the
//! field-ref desugar consults. Symbol tables are `IndexMap`s: insertion
//! order is observable through diagnostics and instance collection, so it
//! must be deterministic.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::ast::Visibility;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnvId, ModuleId, TypeId};
use crate::intern::StrId;
use crate::object::Object;
use crate::source::Location;
use crate::state::CompilerState;

#[derive(Debug, Clone)]
pub enum Import {
    /// `import a.b.c;` / `import a.b.c as d;`
    Module {
        dotted: Vec<StrId>,
        alias: Option<StrId>,
        visibility: Visibility,
        module: Option<ModuleId>,
    },
    /// `import a.b.*;`
    Star {
        dotted: Vec<StrId>,
        visibility: Visibility,
        module: Option<ModuleId>,
    },
    /// `import a.b.(x, y as z);`
    Members {
        dotted: Vec<StrId>,
        members: Vec<(StrId, Option<StrId>)>,
        visibility: Visibility,
        module: Option<ModuleId>,
    },
}

impl Import {
    pub fn dotted(&self) -> &[StrId] {
        match self {
            Self::Module { dotted, .. }
            | Self::Star { dotted, .. }
            | Self::Members { dotted, .. } => dotted,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self {
            Self::Module { visibility, .. }
            | Self::Star { visibility, .. }
            | Self::Members { visibility, .. } => *visibility,
        }
    }

    pub fn loaded(&self) -> Option<ModuleId> {
        match self {
            Self::Module { module, .. }
            | Self::Star { module, .. }
            | Self::Members { module, .. } => *module,
        }
    }
}

/// Node of the imported-module-name tree: `import a.b.c;` creates
/// `a -> b -> c`, with the loaded module hanging off the final node.
#[derive(Debug, Default)]
pub struct ModuleTree {
    pub children: AHashMap<StrId, ModuleTree>,
    pub module: Option<ModuleId>,
}

/// Initialization progress, used to detect circular initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Before,
    Running,
    Done,
}

#[derive(Debug)]
pub struct Module {
    /// Dotted name, e.g. `graphics.geometry`.
    pub name: String,
    pub imports: Vec<Import>,
    pub top_level_llvm: Option<StrId>,
    pub items: Vec<crate::loader::TopLevelRef>,
    /// Every binding declared in the module.
    pub globals: IndexMap<StrId, Object>,
    /// The public subset, visible to importers.
    pub public_globals: IndexMap<StrId, Object>,
    pub env: EnvId,
    pub init_state: InitState,
    pub default_integer_type: TypeId,
    pub default_float_type: TypeId,
    pub imported_module_names: ModuleTree,
    /// Build flags from the module declaration's attribute list.
    pub attribute_build_flags: Vec<String>,
    pub location: Option<Location>,
}

impl CompilerState {
    /// Installs a binding in a module's symbol tables; redefinition of a
    /// name within one module is an error unless both sides are the same
    /// overloadable symbol.
    pub fn add_global(
        &mut self,
        module: ModuleId,
        name: StrId,
        visibility: Visibility,
        value: Object,
        location: Option<Location>,
    ) -> CompileResult<()> {
        let m = &mut self.modules[module.index()];
        if m.globals.contains_key(&name) {
            let rendered = self.interner.get(name).to_owned();
            return Err(self.error_at(
                DiagnosticKind::Lookup {
                    name: format!("{rendered} is already defined"),
                },
                location,
            ));
        }
        m.globals.insert(name, value.clone());
        if visibility == Visibility::Public {
            m.public_globals.insert(name, value);
        }
        Ok(())
    }

    /// Looks a name up inside the module: own bindings first, then star
    /// imports' public tables. Distinct candidates from several star
    /// imports are an ambiguity error.
    pub fn lookup_module_symbol(
        &self,
        module: ModuleId,
        name: StrId,
    ) -> CompileResult<Option<Object>> {
        let m = &self.modules[module.index()];
        if let Some(obj) = m.globals.get(&name) {
            return Ok(Some(obj.clone()));
        }
        let mut found: Option<(ModuleId, Object)> = None;
        for import in &m.imports {
            let Import::Star {
                module: Some(imported),
                ..
            } = import
            else {
                continue;
            };
            if let Some(obj) = self.lookup_public(*imported, name) {
                match &found {
                    None => found = Some((*imported, obj)),
                    Some((_, existing)) => {
                        if !crate::object::object_eq(self, existing, &obj) {
                            let rendered = self.interner.get(name).to_owned();
                            return Err(self.error(DiagnosticKind::Lookup {
                                name: format!("{rendered} is ambiguous between imports"),
                            }));
                        }
                    }
                }
            }
        }
        Ok(found.map(|(_, obj)| obj))
    }

    /// A module's public view of a name: its own public bindings plus the
    /// public bindings of its `public import *` re-exports. Import cycles
    /// are permitted for visibility, so the walk tracks visited modules.
    pub fn lookup_public(&self, module: ModuleId, name: StrId) -> Option<Object> {
        let mut visited = Vec::new();
        self.lookup_public_inner(module, name, &mut visited)
    }

    fn lookup_public_inner(
        &self,
        module: ModuleId,
        name: StrId,
        visited: &mut Vec<ModuleId>,
    ) -> Option<Object> {
        if visited.contains(&module) {
            return None;
        }
        visited.push(module);
        let m = &self.modules[module.index()];
        if let Some(obj) = m.public_globals.get(&name) {
            return Some(obj.clone());
        }
        for import in &m.imports {
            let Import::Star {
                module: Some(imported),
                visibility: Visibility::Public,
                ..
            } = import
            else {
                continue;
            };
            if let Some(obj) = self.lookup_public_inner(*imported, name, visited) {
                return Some(obj);
            }
        }
        None
    }

    /// Resolves a dotted module path against the imported-module-name tree;
    /// used by the field-ref desugar to recognize `a.b.c.symbol`.
    pub fn lookup_module_tree(&self, module: ModuleId, path: &[StrId]) -> Option<ModuleId> {
        let mut node = &self.modules[module.index()].imported_module_names;
        for part in path {
            node = node.children.get(part)?;
        }
        node.module
    }
}
