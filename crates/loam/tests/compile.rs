//! Whole-pipeline tests: load a program from source, compile `main`, and
//! inspect the invoke tables and diagnostics the core produced.

use loam::{
    CompilerState, Object, RecordingBackend, Tempness, compile_program, load_program_source,
    lookup_invoke_entry,
};
use pretty_assertions::assert_eq;

fn compile(source: &str) -> (CompilerState, RecordingBackend) {
    let mut state = CompilerState::new();
    let module = load_program_source(&mut state, "test.clay", source.as_bytes().to_vec())
        .unwrap_or_else(|d| panic!("load failed: {d}"));
    let mut backend = RecordingBackend::default();
    compile_program(&mut state, module, &mut backend)
        .unwrap_or_else(|d| panic!("compile failed: {d}"));
    (state, backend)
}

fn compile_err(source: &str) -> loam::Diagnostic {
    let mut state = CompilerState::new();
    let result = load_program_source(&mut state, "test.clay", source.as_bytes().to_vec())
        .and_then(|module| {
            let mut backend = RecordingBackend::default();
            compile_program(&mut state, module, &mut backend)
        });
    match result {
        Ok(_) => panic!("expected a diagnostic"),
        Err(d) => *d,
    }
}

fn find_procedure(state: &CompilerState, name: &str) -> Object {
    for (i, p) in state.procedures.iter().enumerate() {
        if state.interner.get(p.name) == name {
            return Object::Procedure(loam::ProcId::new(i));
        }
    }
    panic!("no procedure named {name}");
}

#[test]
fn module_init_resolves_simple_overload() {
    let (state, _backend) = compile(
        "define greet;\n\
         overload greet(x:Int32) : Int32 { return x + 1; }\n\
         main() : Int32 {\n\
             return greet(3);\n\
         }\n",
    );
    let int32 = state.core.int32;
    let greet_sets: Vec<_> = state
        .invoke_sets
        .iter()
        .filter(|s| matches!(&s.callable, Object::Procedure(p) if state.interner.get(state.procedures[p.index()].name) == "greet"))
        .collect();
    assert_eq!(greet_sets.len(), 1);
    assert_eq!(greet_sets[0].args_key, vec![int32]);
    let entry = greet_sets[0]
        .tempness_map
        .values()
        .next()
        .copied()
        .expect("resolved entry");
    assert_eq!(state.invoke_entries[entry.index()].return_types, vec![int32]);
    assert_eq!(state.invoke_entries[entry.index()].return_is_ref, vec![false]);
}

#[test]
fn generic_specialization_keys_by_argument_type() {
    let (state, _backend) = compile(
        "define id;\n\
         overload id[T](x:T) = x;\n\
         main() {\n\
             var y = id(3.0f);\n\
             return;\n\
         }\n",
    );
    let float32 = state.core.float32;
    let id_sets: Vec<_> = state
        .invoke_sets
        .iter()
        .filter(|s| matches!(&s.callable, Object::Procedure(p) if state.interner.get(state.procedures[p.index()].name) == "id"))
        .collect();
    assert_eq!(id_sets.len(), 1);
    assert_eq!(id_sets[0].args_key, vec![float32]);
    let entry = id_sets[0]
        .tempness_map
        .values()
        .next()
        .copied()
        .expect("resolved entry");
    assert_eq!(
        state.invoke_entries[entry.index()].return_types,
        vec![float32]
    );
}

#[test]
fn variant_dispatch_expands_members() {
    let (state, _backend) = compile(
        "record Circle (r:Int32);\n\
         record Square (s:Int32);\n\
         variant Shape = Circle | Square;\n\
         define area;\n\
         overload area(c:Circle) : Int32 { return 1; }\n\
         overload area(s:Square) : Int32 { return 2; }\n\
         main() {\n\
             var v = Shape(Circle(3));\n\
             var a = area(*v);\n\
             return;\n\
         }\n",
    );
    let int32 = state.core.int32;
    let area_sets: Vec<_> = state
        .invoke_sets
        .iter()
        .filter(|s| matches!(&s.callable, Object::Procedure(p) if state.interner.get(state.procedures[p.index()].name) == "area"))
        .collect();
    // one sub-entry per variant member
    assert_eq!(area_sets.len(), 2);
    for set in &area_sets {
        let entry = set
            .tempness_map
            .values()
            .next()
            .copied()
            .expect("resolved entry");
        assert_eq!(state.invoke_entries[entry.index()].return_types, vec![int32]);
    }
}

#[test]
fn static_assert_succeeds_on_true_condition() {
    compile(
        "staticassert(TypeSize(Int32) == 4);\n\
         staticassert(TypeSize(Int32) == 4, #width);\n\
         main() { return; }\n",
    );
}

#[test]
fn static_assert_failure_reports_original_expression() {
    let diagnostic = compile_err(
        "staticassert(TypeSize(Int32) == 8);\n\
         main() { return; }\n",
    );
    match diagnostic.kind {
        loam::DiagnosticKind::StaticAssert { expression, .. } => {
            assert_eq!(expression, "TypeSize(Int32) == 8");
        }
        other => panic!("expected a static assertion failure, got {other:?}"),
    }
}

#[test]
fn predicate_failure_is_reported_per_overload() {
    let diagnostic = compile_err(
        "define onlyInts;\n\
         [T | Integer?(T)]\n\
         overload onlyInts(x:T) = x;\n\
         main() {\n\
             var y = onlyInts(2.5);\n\
             return;\n\
         }\n",
    );
    match diagnostic.kind {
        loam::DiagnosticKind::Match {
            failures,
            interface_violation,
            ..
        } => {
            assert!(!interface_violation);
            assert_eq!(failures.len(), 1);
            assert!(
                failures[0].reason.contains("predicate"),
                "unexpected reason: {}",
                failures[0].reason
            );
        }
        other => panic!("expected a match failure, got {other:?}"),
    }
}

#[test]
fn recursive_record_type_is_reported_once() {
    let diagnostic = compile_err(
        "record R (x:R);\n\
         staticassert(TypeSize(R) == 4);\n\
         main() { return; }\n",
    );
    match diagnostic.kind {
        loam::DiagnosticKind::Recursion { what } => {
            assert!(what.contains('R'), "unexpected cycle report: {what}");
        }
        other => panic!("expected a recursion diagnostic, got {other:?}"),
    }
}

#[test]
fn more_specific_overload_wins_regardless_of_source_order() {
    // generic first in the source; the constrained overload still wins
    compile(
        "define pick;\n\
         overload pick(x) = 2;\n\
         overload pick(x:Int32) = 1;\n\
         staticassert(pick(3) == 1);\n\
         main() { return; }\n",
    );
    // and the same with the declarations flipped
    compile(
        "define pick;\n\
         overload pick(x:Int32) = 1;\n\
         overload pick(x) = 2;\n\
         staticassert(pick(3) == 1);\n\
         main() { return; }\n",
    );
}

#[test]
fn invoke_entry_lookup_is_memoized() {
    let (mut state, _backend) = compile(
        "define greet;\n\
         overload greet(x:Int32) : Int32 { return x + 1; }\n\
         main() : Int32 { return greet(3); }\n",
    );
    let greet = find_procedure(&state, "greet");
    let int32 = state.core.int32;
    let first = lookup_invoke_entry(&mut state, &greet, &[int32], &[Tempness::Rvalue])
        .expect("lookup")
        .expect("entry");
    let second = lookup_invoke_entry(&mut state, &greet, &[int32], &[Tempness::Rvalue])
        .expect("lookup")
        .expect("entry");
    assert_eq!(first, second);
    // a different tempness key refining to the same formal pattern shares
    // the entry
    let third = lookup_invoke_entry(&mut state, &greet, &[int32], &[Tempness::Lvalue])
        .expect("lookup")
        .expect("entry");
    assert_eq!(first, third);
}

#[test]
fn compile_time_evaluation_through_static_for() {
    compile(
        "define total;\n\
         overload total() : Int32 {\n\
             var sum = 0;\n\
             ..for (i in 1, 2, 3) {\n\
                 sum = sum + i;\n\
             }\n\
             return sum;\n\
         }\n\
         staticassert(total() == 6);\n\
         main() { return; }\n",
    );
}

#[test]
fn goto_resolves_against_the_label_table() {
    compile(
        "define looped;\n\
         overload looped() : Int32 {\n\
             var n = 0;\n\
             again:\n\
             n = n + 1;\n\
             if (n < 3)\n\
                 goto again;\n\
             return n;\n\
         }\n\
         staticassert(looped() == 3);\n\
         main() { return; }\n",
    );
}

#[test]
fn update_assignment_and_while_evaluate() {
    compile(
        "define count;\n\
         overload count(n:Int32) : Int32 {\n\
             var i = 0;\n\
             var acc = 0;\n\
             while (i < n) {\n\
                 acc += 2;\n\
                 i += 1;\n\
             }\n\
             return acc;\n\
         }\n\
         staticassert(count(4) == 8);\n\
         main() { return; }\n",
    );
}

#[test]
fn variadic_overload_binds_tail_arguments() {
    compile(
        "define sum;\n\
         overload sum() : Int32 { return 0; }\n\
         [..Rest]\n\
         overload sum(x:Int32, ..rest:Rest) : Int32 {\n\
             return x + sum(..rest);\n\
         }\n\
         staticassert(sum(1, 2, 3, 4) == 10);\n\
         main() { return; }\n",
    );
}

#[test]
fn record_field_access_and_tuple_indexing() {
    compile(
        "record Point (x:Int32, y:Int32);\n\
         define shifted;\n\
         overload shifted(p:Point) : Int32 {\n\
             return p.x + p.y;\n\
         }\n\
         staticassert(shifted(Point(3, 4)) == 7);\n\
         staticassert([10, 20].1 == 20);\n\
         main() { return; }\n",
    );
}

#[test]
fn generic_record_constructor_deduces_parameters() {
    compile(
        "record BoxT[T] (value:T);\n\
         define unbox;\n\
         overload unbox[T](b:BoxT[T]) : T { return b.value; }\n\
         staticassert(unbox(BoxT(5)) == 5);\n\
         main() { return; }\n",
    );
}

#[test]
fn reflection_primitives_evaluate() {
    compile(
        "record Pair (first:Int32, second:Float64);\n\
         staticassert(Record?(Pair));\n\
         staticassert(RecordFieldCount(Pair) == 2);\n\
         staticassert(Type?(Int32));\n\
         staticassert(not Type?(3));\n\
         staticassert(Integer?(Int64));\n\
         staticassert(not Integer?(Float32));\n\
         staticassert(CallDefined?(main));\n\
         staticassert(IdentifierSize(#abcd) == 4);\n\
         staticassert(IdentifierSize(IdentifierConcat(#ab, #cd)) == 4);\n\
         main() { return; }\n",
    );
}

#[test]
fn variant_member_index_follows_declaration_then_instance_order() {
    compile(
        "record A (a:Int32);\n\
         record B (b:Int32);\n\
         record C (c:Int32);\n\
         variant V = A | B;\n\
         instance V (C);\n\
         staticassert(VariantMemberIndex(V, A) == 0);\n\
         staticassert(VariantMemberIndex(V, B) == 1);\n\
         staticassert(VariantMemberIndex(V, C) == 2);\n\
         staticassert(VariantMemberCount(V) == 3);\n\
         main() { return; }\n",
    );
}

#[test]
fn eval_top_level_defines_new_items() {
    compile(
        "eval \"define g; overload g(x:Int32) = x;\";\n\
         staticassert(g(7) == 7);\n\
         main() { return; }\n",
    );
}

#[test]
fn undefined_name_is_a_lookup_error() {
    let diagnostic = compile_err("main() { return missing(1); }\n");
    assert!(
        matches!(diagnostic.kind, loam::DiagnosticKind::Lookup { ref name } if name == "missing"),
        "unexpected diagnostic: {diagnostic:?}"
    );
}

#[test]
fn arity_mismatch_is_reported_against_candidates() {
    let diagnostic = compile_err(
        "define two;\n\
         overload two(a:Int32, b:Int32) = a;\n\
         main() {\n\
             var x = two(1);\n\
             return;\n\
         }\n",
    );
    match diagnostic.kind {
        loam::DiagnosticKind::Match { failures, .. } => {
            assert!(failures.iter().any(|f| f.reason.contains("number of arguments")));
        }
        other => panic!("expected a match failure, got {other:?}"),
    }
}

#[test]
fn backend_receives_main_specialization() {
    let (state, backend) = compile(
        "main() : Int32 { return 0; }\n",
    );
    assert_eq!(backend.units.len(), 1);
    assert_eq!(backend.units[0].name, "main");
    assert_eq!(backend.units[0].arg_types.len(), 0);
    assert_eq!(backend.units[0].returns, vec![(state.core.int32, false)]);
}
