//! Backend handoff.
//!
//! The core's output is a set of fully-resolved specializations; the code
//! emitter is an external collaborator behind the [`Backend`] trait and is
//! free to consume units in any order. A recording implementation backs
//! the test suite.

use crate::analyzer::{analyze_callable, with_call_context};
use crate::ast::Tempness;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{InvokeEntryId, ModuleId, TypeId};
use crate::object::{Object, print_object};
use crate::state::CompilerState;

/// Everything the emitter needs for one compiled symbol.
#[derive(Debug, Clone)]
pub struct SpecializationUnit {
    /// Rendered callable name, for symbol naming and logs.
    pub name: String,
    pub entry: InvokeEntryId,
    pub arg_types: Vec<TypeId>,
    /// Return descriptors: type plus by-ref flag.
    pub returns: Vec<(TypeId, bool)>,
    /// The embedded LLVM body, when the specialization has one instead of
    /// a parsed body.
    pub llvm_body: Option<String>,
}

pub trait Backend {
    fn emit(&mut self, state: &CompilerState, unit: &SpecializationUnit) -> CompileResult<()>;
}

/// Collects units without emitting anything; the test backend.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub units: Vec<SpecializationUnit>,
}

impl Backend for RecordingBackend {
    fn emit(&mut self, _state: &CompilerState, unit: &SpecializationUnit) -> CompileResult<()> {
        self.units.push(unit.clone());
        Ok(())
    }
}

/// Resolves and analyzes one callable and hands its specialization to the
/// backend.
pub fn compile_callable(
    state: &mut CompilerState,
    callable: &Object,
    args_key: &[TypeId],
    args_tempness: &[Tempness],
    backend: &mut dyn Backend,
) -> CompileResult<InvokeEntryId> {
    let entry = with_call_context(state, callable, args_key, |state| {
        let Some(entry) = analyze_callable(state, callable, args_key, args_tempness)? else {
            return Err(state.error(DiagnosticKind::Recursion {
                what: "entry-point analysis".to_owned(),
            }));
        };
        if !state.invoke_entries[entry.index()].analyzed
            && !state.invoke_entries[entry.index()].call_by_name
        {
            return Err(state.error(DiagnosticKind::Recursion {
                what: "entry-point analysis".to_owned(),
            }));
        }
        Ok(entry)
    })?;
    let unit = unit_for_entry(state, callable, entry);
    backend.emit(state, &unit)?;
    Ok(entry)
}

fn unit_for_entry(
    state: &CompilerState,
    callable: &Object,
    entry: InvokeEntryId,
) -> SpecializationUnit {
    let e = &state.invoke_entries[entry.index()];
    let llvm_body = e.code.as_ref().and_then(|code| match &code.body {
        crate::ast::CodeBody::Llvm(text) => Some(state.interner.get(*text).to_owned()),
        _ => None,
    });
    SpecializationUnit {
        name: print_object(state, callable),
        entry,
        arg_types: e.args_key.clone(),
        returns: e
            .return_types
            .iter()
            .zip(&e.return_is_ref)
            .map(|(&ty, &is_ref)| (ty, is_ref))
            .collect(),
        llvm_body,
    }
}

/// Compiles a program's entry point: the `main` procedure of the program
/// module, called with no arguments.
pub fn compile_program(
    state: &mut CompilerState,
    module: ModuleId,
    backend: &mut dyn Backend,
) -> CompileResult<InvokeEntryId> {
    let main = state.intern("main");
    let Some(callable) = state.modules[module.index()].globals.get(&main).cloned() else {
        return Err(state.error(DiagnosticKind::Lookup {
            name: "main".to_owned(),
        }));
    };
    compile_callable(state, &callable, &[], &[], backend)
}
