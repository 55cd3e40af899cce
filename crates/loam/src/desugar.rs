//! Surface-form lowering.
//!
//! Pure AST→AST rewrites applied on demand and cached by node id: `for`
//! loops, `try`/`catch`, `switch`, field references, static indexing,
//! operator applications, update assignments, and the `eval` family.
//! Generated references to operator procedures are foreign expressions
//! homed in the prelude, so which names bind to primitives is the
//! prelude's decision, not the compiler's.

use smallvec::smallvec;

use crate::ast::{
    BindingKind, CaseBlock, CatchClause, ExprKind, ExprList, FormalArg, StmtKind, Tempness,
    VariadicOpKind,
};
use crate::error::CompileResult;
use crate::ids::{EnvId, ExprId, ModuleId, StmtId};
use crate::intern::StrId;
use crate::object::Object;
use crate::source::Location;
use crate::state::CompilerState;

pub const PRELUDE_MODULE: &str = "prelude";

/// A reference to a prelude operator, evaluated in the prelude's scope
/// regardless of where the desugared node ends up.
pub fn prelude_ref(state: &mut CompilerState, name: &str, location: Option<Location>) -> ExprId {
    let module_name = state.intern(PRELUDE_MODULE);
    let name = state.intern(name);
    let name_ref = state.add_expr(ExprKind::NameRef(name), location);
    state.add_expr(
        ExprKind::ForeignExpr {
            module_name: Some(module_name),
            env: None,
            expr: name_ref,
        },
        location,
    )
}

fn call(
    state: &mut CompilerState,
    callable: ExprId,
    args: ExprList,
    location: Option<Location>,
) -> ExprId {
    state.add_expr(ExprKind::Call { expr: callable, args }, location)
}

fn name_ref(state: &mut CompilerState, name: StrId, location: Option<Location>) -> ExprId {
    state.add_expr(ExprKind::NameRef(name), location)
}

//
// expressions
//

/// `'c'` → `charLiteral(<code>)` with an `i8` literal argument.
pub fn desugar_char_literal(
    state: &mut CompilerState,
    c: char,
    location: Option<Location>,
) -> ExprId {
    let callable = prelude_ref(state, "charLiteral", location);
    let code = state.intern(&format!("{}", c as u32 as i64));
    let suffix = state.intern("ss");
    let literal = state.add_expr(
        ExprKind::IntLiteral {
            value: code,
            suffix: Some(suffix),
        },
        location,
    );
    call(state, callable, smallvec![literal], location)
}

/// `x.name` → module member when `x` spells an imported dotted module
/// path, `fieldRef(x, #name)` otherwise.
pub fn desugar_field_ref(
    state: &mut CompilerState,
    expr: ExprId,
    module: ModuleId,
) -> CompileResult<ExprId> {
    if let Some(cached) = state.desugared_exprs.get(&expr) {
        return Ok(*cached);
    }
    let ExprKind::FieldRef { expr: base, name } = state.expr(expr).kind.clone() else {
        unreachable!("desugar_field_ref on non-field-ref");
    };
    let location = state.expr_location(expr);

    if let Some(path) = dotted_name_path(state, expr) {
        if let Some(found) = state.lookup_module_tree(module, &path) {
            let desugared = state.add_expr(ExprKind::ObjectExpr(Object::Module(found)), location);
            state.desugared_exprs.insert(expr, desugared);
            return Ok(desugared);
        }
    }

    // member access through an imported module path: `a.b.symbol`
    if let Some(path) = dotted_name_path(state, base) {
        if let Some(found) = state.lookup_module_tree(module, &path) {
            let Some(member) = state.lookup_public(found, name) else {
                let rendered = state.interner.get(name).to_owned();
                let module_name = state.modules[found.index()].name.clone();
                return Err(state.error_at(
                    crate::error::DiagnosticKind::Lookup {
                        name: format!("{rendered} is not a public member of {module_name}"),
                    },
                    location,
                ));
            };
            let desugared = state.add_expr(ExprKind::ObjectExpr(member), location);
            state.desugared_exprs.insert(expr, desugared);
            return Ok(desugared);
        }
    }

    let callable = prelude_ref(state, "fieldRef", location);
    let name_obj = state.add_expr(ExprKind::ObjectExpr(Object::Ident(name)), location);
    let desugared = call(state, callable, smallvec![base, name_obj], location);
    state.desugared_exprs.insert(expr, desugared);
    Ok(desugared)
}

/// Collects `a.b.c` into `[a, b, c]` when the head is a plain name.
fn dotted_name_path(state: &CompilerState, expr: ExprId) -> Option<Vec<StrId>> {
    let mut parts = Vec::new();
    let mut current = expr;
    loop {
        match &state.expr(current).kind {
            ExprKind::FieldRef { expr, name } => {
                parts.push(*name);
                current = *expr;
            }
            ExprKind::NameRef(name) => {
                parts.push(*name);
                parts.reverse();
                return Some(parts);
            }
            _ => return None,
        }
    }
}

/// `x.12` → `staticIndex(x, static 12)`.
pub fn desugar_static_indexing(state: &mut CompilerState, expr: ExprId) -> ExprId {
    if let Some(cached) = state.desugared_exprs.get(&expr) {
        return *cached;
    }
    let ExprKind::StaticIndexing { expr: base, index } = state.expr(expr).kind.clone() else {
        unreachable!("desugar_static_indexing on non-static-indexing");
    };
    let location = state.expr_location(expr);
    let callable = prelude_ref(state, "staticIndex", location);
    let holder = state.size_holder(index);
    let index_obj = state.add_expr(ExprKind::ObjectExpr(Object::Value(holder)), location);
    let index_static = state.add_expr(ExprKind::StaticExpr(index_obj), location);
    let desugared = call(state, callable, smallvec![base, index_static], location);
    state.desugared_exprs.insert(expr, desugared);
    desugared
}

fn variadic_op_callable(op: VariadicOpKind) -> &'static str {
    match op {
        VariadicOpKind::Dereference => "dereference",
        VariadicOpKind::AddressOf => "addressOf",
        VariadicOpKind::Not => "boolNot",
        VariadicOpKind::Prefix => "prefixOperator",
        VariadicOpKind::Infix => "infixOperator",
        VariadicOpKind::IfExpr => "ifExpression",
    }
}

/// Operator applications become calls to their prelude operator
/// procedures; the operator tokens already travel in the argument list as
/// static identifiers.
pub fn desugar_variadic_op(state: &mut CompilerState, expr: ExprId) -> ExprId {
    if let Some(cached) = state.desugared_exprs.get(&expr) {
        return *cached;
    }
    let ExprKind::VariadicOp { op, exprs } = state.expr(expr).kind.clone() else {
        unreachable!("desugar_variadic_op on non-variadic-op");
    };
    let location = state.expr_location(expr);
    let callable = prelude_ref(state, variadic_op_callable(op), location);
    let desugared = call(state, callable, exprs, location);
    state.desugared_exprs.insert(expr, desugared);
    desugared
}

//
// statements
//

/// ```text
/// for (<vars> in <expr>) <body>
/// ```
/// becomes
/// ```text
/// {
///     forward %expr = <expr>;
///     forward %iter = iterator(%expr);
///     while (var %value = nextValue(%iter); hasValue?(%value)) {
///         forward <vars> = getValue(%value);
///         <body>
///     }
/// }
/// ```
pub fn desugar_for_statement(state: &mut CompilerState, stmt: StmtId) -> StmtId {
    if let Some(cached) = state.desugared_stmts.get(&stmt) {
        return *cached;
    }
    let StmtKind::For {
        variables,
        expr,
        body,
    } = state.stmt(stmt).kind.clone()
    else {
        unreachable!("desugar_for_statement on non-for");
    };
    let location = state.stmt(stmt).location;
    let expr_var = state.intern("%expr");
    let iter_var = state.intern("%iter");
    let value_var = state.intern("%value");

    let expr_binding = binding(state, BindingKind::Forward, &[expr_var], expr, location);

    let iterator_callable = prelude_ref(state, "iterator", location);
    let expr_name = name_ref(state, expr_var, location);
    let iterator_call = call(state, iterator_callable, smallvec![expr_name], location);
    let iter_binding = binding(state, BindingKind::Forward, &[iter_var], iterator_call, location);

    let next_callable = prelude_ref(state, "nextValue", location);
    let iter_name = name_ref(state, iter_var, location);
    let next_call = call(state, next_callable, smallvec![iter_name], location);
    let value_binding = binding(state, BindingKind::Var, &[value_var], next_call, location);

    let has_callable = prelude_ref(state, "hasValue?", location);
    let value_name = name_ref(state, value_var, location);
    let has_call = call(state, has_callable, smallvec![value_name], location);

    let get_callable = prelude_ref(state, "getValue", location);
    let value_name2 = name_ref(state, value_var, location);
    let get_call = call(state, get_callable, smallvec![value_name2], location);
    let vars_binding = binding(state, BindingKind::Forward, &variables, get_call, location);

    let while_body = state.add_stmt(StmtKind::Block(vec![vars_binding, body]), location);
    let while_stmt = state.add_stmt(
        StmtKind::While {
            condition_statements: vec![value_binding],
            condition: has_call,
            body: while_body,
        },
        location,
    );
    let block = state.add_stmt(
        StmtKind::Block(vec![expr_binding, iter_binding, while_stmt]),
        location,
    );
    state.desugared_stmts.insert(stmt, block);
    block
}

fn binding(
    state: &mut CompilerState,
    kind: BindingKind,
    names: &[StrId],
    value: ExprId,
    location: Option<Location>,
) -> StmtId {
    let args = names
        .iter()
        .map(|&name| FormalArg {
            name,
            ty: None,
            tempness: Tempness::DontCare,
            as_type: None,
            location,
        })
        .collect();
    state.add_stmt(
        StmtKind::Binding {
            kind,
            args,
            values: smallvec![value],
        },
        location,
    )
}

/// Catch chains lower to an `activeException()` binding followed by
/// `exceptionIs?`/`exceptionAs` tests; when no catch-all exists, the chain
/// ends with `continueException(%exp)` and an unreachable marker.
pub fn desugar_catch_blocks(
    state: &mut CompilerState,
    catch_blocks: &[CatchClause],
) -> CompileResult<StmtId> {
    debug_assert!(!catch_blocks.is_empty());
    let location = catch_blocks[0].location;
    let exp_var = state.intern("%exp");

    let active_callable = prelude_ref(state, "activeException", location);
    let active_call = call(state, active_callable, ExprList::new(), location);
    let exp_binding = binding(state, BindingKind::Var, &[exp_var], active_call, location);

    // built back to front: the else chain grows from the tail
    let mut result: Option<StmtId> = None;
    let mut saw_catch_all = false;
    for clause in catch_blocks.iter().rev() {
        match clause.exception_type {
            Some(exception_type) => {
                let exp_name = name_ref(state, exp_var, clause.location);
                let is_callable = prelude_ref(state, "exceptionIs?", clause.location);
                let cond = call(
                    state,
                    is_callable,
                    smallvec![exception_type, exp_name],
                    clause.location,
                );

                let exp_name2 = name_ref(state, exp_var, clause.location);
                let as_callable = prelude_ref(state, "exceptionAs", clause.location);
                let getter = call(
                    state,
                    as_callable,
                    smallvec![exception_type, exp_name2],
                    clause.location,
                );
                let var_binding = binding(
                    state,
                    BindingKind::Var,
                    &[clause.exception_var],
                    getter,
                    clause.location,
                );
                let block = state.add_stmt(
                    StmtKind::Block(vec![var_binding, clause.body]),
                    clause.location,
                );
                let if_stmt = state.add_stmt(
                    StmtKind::If {
                        condition_statements: vec![],
                        condition: cond,
                        then_part: block,
                        else_part: result,
                    },
                    clause.location,
                );
                result = Some(if_stmt);
            }
            None => {
                if result.is_some() {
                    // a catch-all anywhere but last would shadow the rest;
                    // iterating in reverse, anything already built means
                    // clauses follow this one
                    return Err(state.error_at(
                        crate::error::DiagnosticKind::Parse {
                            expected: "catch-all as the final catch clause".to_owned(),
                            found: "catch clauses after a catch-all".to_owned(),
                        },
                        clause.location,
                    ));
                }
                let exp_name = name_ref(state, exp_var, clause.location);
                let as_any = prelude_ref(state, "exceptionAsAny", clause.location);
                let getter = call(state, as_any, smallvec![exp_name], clause.location);
                let var_binding = binding(
                    state,
                    BindingKind::Var,
                    &[clause.exception_var],
                    getter,
                    clause.location,
                );
                let block = state.add_stmt(
                    StmtKind::Block(vec![var_binding, clause.body]),
                    clause.location,
                );
                result = Some(block);
                saw_catch_all = true;
            }
        }
    }

    let mut chain = result.expect("at least one catch clause");
    if !saw_catch_all {
        // fall through to the next handler up the stack
        let exp_name = name_ref(state, exp_var, location);
        let continue_callable = prelude_ref(state, "continueException", location);
        let continue_call = call(state, continue_callable, smallvec![exp_name], location);
        let continue_stmt = state.add_stmt(StmtKind::ExprStatement(continue_call), location);
        let unreachable = state.add_stmt(StmtKind::Unreachable, location);
        let tail = state.add_stmt(StmtKind::Block(vec![continue_stmt, unreachable]), location);
        chain = attach_final_else(state, chain, tail);
    }

    Ok(state.add_stmt(StmtKind::Block(vec![exp_binding, chain]), location))
}

/// Walks the freshly-built if chain and hangs `tail` off its last else.
fn attach_final_else(state: &mut CompilerState, chain: StmtId, tail: StmtId) -> StmtId {
    let mut current = chain;
    loop {
        let StmtKind::If { else_part, .. } = &state.stmt(current).kind else {
            return chain;
        };
        match else_part {
            Some(next) => current = *next,
            None => {
                let StmtKind::If { else_part, .. } = &mut state.stmts[current.index()].kind else {
                    unreachable!()
                };
                *else_part = Some(tail);
                return chain;
            }
        }
    }
}

/// `switch` lowers to a `%match` binding and a chain of
/// `if (case?(%match, (labels...)))` tests.
pub fn desugar_switch(state: &mut CompilerState, stmt: StmtId) -> StmtId {
    if let Some(cached) = state.desugared_stmts.get(&stmt) {
        return *cached;
    }
    let StmtKind::Switch {
        expr_statements,
        expr,
        case_blocks,
        default_case,
    } = state.stmt(stmt).kind.clone()
    else {
        unreachable!("desugar_switch on non-switch");
    };
    let location = state.stmt(stmt).location;
    let match_var = state.intern("%match");
    let match_binding = binding(state, BindingKind::Forward, &[match_var], expr, location);

    let mut chain = default_case;
    for case_block in case_blocks.iter().rev() {
        let CaseBlock { labels, body, location } = case_block.clone();
        let case_callable = prelude_ref(state, "case?", location);
        let match_name = name_ref(state, match_var, location);
        let labels_paren = state.add_expr(ExprKind::Paren(labels), location);
        let cond = call(
            state,
            case_callable,
            smallvec![match_name, labels_paren],
            location,
        );
        let if_stmt = state.add_stmt(
            StmtKind::If {
                condition_statements: vec![],
                condition: cond,
                then_part: body,
                else_part: chain,
            },
            location,
        );
        chain = Some(if_stmt);
    }

    let mut statements = expr_statements;
    statements.push(match_binding);
    if let Some(chain) = chain {
        statements.push(chain);
    }
    let block = state.add_stmt(StmtKind::Block(statements), location);
    state.desugared_stmts.insert(stmt, block);
    block
}

/// `x <op>= y` → `updateAssign(x, #"<op>", y)`.
pub fn desugar_variadic_assignment(state: &mut CompilerState, stmt: StmtId) -> StmtId {
    if let Some(cached) = state.desugared_stmts.get(&stmt) {
        return *cached;
    }
    let StmtKind::VariadicAssignment { op, left, right } = state.stmt(stmt).kind.clone() else {
        unreachable!("desugar_variadic_assignment on non-update-assignment");
    };
    let location = state.stmt(stmt).location;
    let callable = prelude_ref(state, "updateAssign", location);
    let op_obj = state.add_expr(ExprKind::ObjectExpr(Object::Ident(op)), location);
    let update_call = call(state, callable, smallvec![left, op_obj, right], location);
    let desugared = state.add_stmt(StmtKind::ExprStatement(update_call), location);
    state.desugared_stmts.insert(stmt, desugared);
    desugared
}

//
// eval
//

/// Evaluates `eval` arguments to their static string spelling and re-parses
/// the text with the given parser entry point.
fn eval_to_source(
    state: &mut CompilerState,
    exprs: &[ExprId],
    env: EnvId,
    location: Option<Location>,
) -> CompileResult<crate::source::SourceId> {
    let values = crate::evaluator::evaluate_multi_static(state, exprs, env)?;
    let mut text = String::new();
    for value in &values {
        text.push_str(&crate::object::print_object(state, value));
    }
    let name = match location {
        Some(l) => format!("<eval {}>", state.sources.describe(l)),
        None => "<eval>".to_owned(),
    };
    Ok(state.sources.add(name, text.into_bytes()))
}

pub fn desugar_eval_expr(
    state: &mut CompilerState,
    expr: ExprId,
    env: EnvId,
) -> CompileResult<ExprList> {
    if let Some(cached) = state.eval_expr_cache.get(&expr) {
        return Ok(cached.clone());
    }
    let ExprKind::EvalExpr { args } = state.expr(expr).kind.clone() else {
        unreachable!("desugar_eval_expr on non-eval");
    };
    let location = state.expr_location(expr);
    let source = eval_to_source(state, &[args], env, location)?;
    let value = crate::parser::parse_expr_list_source(state, source)?;
    state.eval_expr_cache.insert(expr, value.clone());
    Ok(value)
}

pub fn desugar_eval_statement(
    state: &mut CompilerState,
    stmt: StmtId,
    env: EnvId,
) -> CompileResult<Vec<StmtId>> {
    if let Some(cached) = state.eval_stmt_cache.get(&stmt) {
        return Ok(cached.clone());
    }
    let StmtKind::EvalStatement { args } = state.stmt(stmt).kind.clone() else {
        unreachable!("desugar_eval_statement on non-eval");
    };
    let location = state.stmt(stmt).location;
    let source = eval_to_source(state, &args, env, location)?;
    let value = crate::parser::parse_statements_source(state, source)?;
    state.eval_stmt_cache.insert(stmt, value.clone());
    Ok(value)
}
