#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "boundary surfaces keep some currently-unused APIs")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors target arithmetic")]
#![expect(clippy::unnecessary_wraps, reason = "walk signatures stay uniform")]
#![expect(clippy::needless_pass_by_value, reason = "call APIs pass values consistently")]
#![expect(clippy::too_many_arguments, reason = "resolution plumbing carries wide state")]
#![expect(clippy::result_large_err, reason = "diagnostics are boxed at the type alias")]

mod ast;
mod backend;
mod clone;
mod decls;
mod desugar;
mod env;
mod error;
mod evaluator;
mod ids;
mod intern;
mod invoke;
mod lexer;
mod literals;
mod loader;
mod matchinvoke;
mod module;
mod object;
mod parser;
mod pattern;
mod primops;
mod source;
mod state;
mod token;
mod types;
mod analyzer;

pub use crate::{
    analyzer::{MultiPValue, PValue, StatementAnalysis},
    ast::Tempness,
    backend::{Backend, RecordingBackend, SpecializationUnit, compile_callable, compile_program},
    error::{CompileResult, ContextFrame, Diagnostic, DiagnosticKind, MatchFailureNote},
    ids::{InvokeEntryId, InvokeSetId, ModuleId, ProcId, TypeId},
    invoke::{lookup_invoke_entry, lookup_invoke_set},
    loader::{MAIN_MODULE, SOURCE_EXTENSION, load_program, load_program_source},
    object::Object,
    parser::{InteractiveItem, parse_interactive},
    primops::PrimOp,
    source::{Location, SourceId, SourceMap},
    state::{CompilerState, Config},
    types::TypeKind,
};
