//! Lexical environments.
//!
//! `Env = { parent: Env | Module, entries }`. Lookup walks parent links and
//! falls through to the owning module's symbol tables (own globals, then
//! imports). Environments are arena-allocated and never freed; overload
//! specializations and evaluator scopes create short chains that simply
//! stop being referenced.

use ahash::AHashMap;

use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnvId, ModuleId};
use crate::intern::StrId;
use crate::object::Object;
use crate::state::CompilerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvParent {
    Env(EnvId),
    Module(ModuleId),
    None,
}

#[derive(Debug)]
pub struct EnvData {
    pub parent: EnvParent,
    pub entries: AHashMap<StrId, Object>,
}

impl CompilerState {
    pub fn new_env(&mut self, parent: EnvParent) -> EnvId {
        let id = EnvId::new(self.envs.len());
        self.envs.push(EnvData {
            parent,
            entries: AHashMap::new(),
        });
        id
    }

    pub fn add_local(&mut self, env: EnvId, name: StrId, value: Object) {
        self.envs[env.index()].entries.insert(name, value);
    }

    /// The module an environment chain is rooted in, when any.
    pub fn env_module(&self, mut env: EnvId) -> Option<ModuleId> {
        loop {
            match self.envs[env.index()].parent {
                EnvParent::Env(parent) => env = parent,
                EnvParent::Module(m) => return Some(m),
                EnvParent::None => return None,
            }
        }
    }

    pub fn lookup_env(&self, mut env: EnvId, name: StrId) -> CompileResult<Option<Object>> {
        loop {
            if let Some(obj) = self.envs[env.index()].entries.get(&name) {
                return Ok(Some(obj.clone()));
            }
            match self.envs[env.index()].parent {
                EnvParent::Env(parent) => env = parent,
                EnvParent::Module(m) => return self.lookup_module_symbol(m, name),
                EnvParent::None => return Ok(None),
            }
        }
    }

    /// Lookup that fails with a `LookupError` when the name is unbound.
    pub fn safe_lookup_env(&self, env: EnvId, name: StrId) -> CompileResult<Object> {
        match self.lookup_env(env, name)? {
            Some(obj) => Ok(obj),
            None => {
                let rendered = self.interner.get(name).to_owned();
                Err(self.error(DiagnosticKind::Lookup { name: rendered }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_chain() {
        let mut state = CompilerState::new();
        let outer = state.new_env(EnvParent::None);
        let inner = state.new_env(EnvParent::Env(outer));
        let x = state.interner.intern("x");
        let y = state.interner.intern("y");
        let int32 = state.core.int32;
        state.add_local(outer, x, Object::Type(int32));
        state.add_local(inner, y, Object::Ident(y));
        assert!(matches!(
            state.lookup_env(inner, x).unwrap(),
            Some(Object::Type(_))
        ));
        assert!(matches!(
            state.lookup_env(inner, y).unwrap(),
            Some(Object::Ident(_))
        ));
        assert!(state.lookup_env(outer, y).unwrap().is_none());
        assert!(state.safe_lookup_env(outer, y).is_err());
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let mut state = CompilerState::new();
        let outer = state.new_env(EnvParent::None);
        let inner = state.new_env(EnvParent::Env(outer));
        let x = state.interner.intern("x");
        let int32 = state.core.int32;
        let bool_type = state.core.bool_type;
        state.add_local(outer, x, Object::Type(int32));
        state.add_local(inner, x, Object::Type(bool_type));
        match state.lookup_env(inner, x).unwrap() {
            Some(Object::Type(t)) => assert_eq!(t, bool_type),
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }
}
