//! Structural deep copy of AST subtrees.
//!
//! Overload specialization installs a fresh copy of the overload's `Code`
//! into each invoke entry, so later mutations (desugar caches, analysis
//! memos, all keyed by node id) never touch the template. Locations and
//! flags are preserved; foreign expressions keep their captured environment
//! by reference, since the environment is the point of the node.

use crate::ast::{
    CaseBlock, CatchClause, Code, CodeBody, Expr, ExprKind, ExprList, FormalArg, LambdaExpr,
    ReturnSpec, Stmt, StmtKind,
};
use crate::ids::{ExprId, StmtId};
use crate::state::CompilerState;

pub fn clone_code(state: &mut CompilerState, code: &Code) -> Code {
    Code {
        pattern_vars: code.pattern_vars.clone(),
        predicate: code.predicate.map(|p| clone_expr(state, p)),
        formal_args: code
            .formal_args
            .iter()
            .map(|a| clone_formal_arg(state, a))
            .collect::<Vec<_>>(),
        var_arg: code.var_arg.as_ref().map(|a| clone_formal_arg(state, a)),
        return_specs: code
            .return_specs
            .iter()
            .map(|r| clone_return_spec(state, r))
            .collect::<Vec<_>>(),
        var_return_spec: code
            .var_return_spec
            .as_ref()
            .map(|r| clone_return_spec(state, r)),
        body: match &code.body {
            CodeBody::Statements(s) => CodeBody::Statements(clone_stmt(state, *s)),
            CodeBody::Llvm(text) => CodeBody::Llvm(*text),
            CodeBody::None => CodeBody::None,
        },
        location: code.location,
    }
}

fn clone_formal_arg(state: &mut CompilerState, arg: &FormalArg) -> FormalArg {
    FormalArg {
        name: arg.name,
        ty: arg.ty.map(|t| clone_expr(state, t)),
        tempness: arg.tempness,
        as_type: arg.as_type.map(|t| clone_expr(state, t)),
        location: arg.location,
    }
}

fn clone_return_spec(state: &mut CompilerState, spec: &ReturnSpec) -> ReturnSpec {
    ReturnSpec {
        ty: clone_expr(state, spec.ty),
        name: spec.name,
    }
}

pub fn clone_expr_list(state: &mut CompilerState, exprs: &ExprList) -> ExprList {
    exprs.iter().map(|&e| clone_expr(state, e)).collect()
}

pub fn clone_expr_opt(state: &mut CompilerState, expr: Option<ExprId>) -> Option<ExprId> {
    expr.map(|e| clone_expr(state, e))
}

pub fn clone_expr(state: &mut CompilerState, expr: ExprId) -> ExprId {
    let Expr {
        kind,
        location,
        end_location,
    } = state.expr(expr).clone();
    let kind = match kind {
        ExprKind::BoolLiteral(_)
        | ExprKind::IntLiteral { .. }
        | ExprKind::FloatLiteral { .. }
        | ExprKind::CharLiteral(_)
        | ExprKind::StringLiteral(_)
        | ExprKind::IdentifierLiteral(_)
        | ExprKind::FileExpr
        | ExprKind::LineExpr
        | ExprKind::ColumnExpr
        | ExprKind::NameRef(_)
        | ExprKind::ObjectExpr(_) => kind,
        ExprKind::Tuple(args) => ExprKind::Tuple(clone_expr_list(state, &args)),
        ExprKind::Paren(args) => ExprKind::Paren(clone_expr_list(state, &args)),
        ExprKind::Indexing { expr, args } => ExprKind::Indexing {
            expr: clone_expr(state, expr),
            args: clone_expr_list(state, &args),
        },
        ExprKind::Call { expr, args } => ExprKind::Call {
            expr: clone_expr(state, expr),
            args: clone_expr_list(state, &args),
        },
        ExprKind::FieldRef { expr, name } => ExprKind::FieldRef {
            expr: clone_expr(state, expr),
            name,
        },
        ExprKind::StaticIndexing { expr, index } => ExprKind::StaticIndexing {
            expr: clone_expr(state, expr),
            index,
        },
        ExprKind::VariadicOp { op, exprs } => ExprKind::VariadicOp {
            op,
            exprs: clone_expr_list(state, &exprs),
        },
        ExprKind::And { left, right } => ExprKind::And {
            left: clone_expr(state, left),
            right: clone_expr(state, right),
        },
        ExprKind::Or { left, right } => ExprKind::Or {
            left: clone_expr(state, left),
            right: clone_expr(state, right),
        },
        ExprKind::Lambda(lambda) => ExprKind::Lambda(Box::new(LambdaExpr {
            capture: lambda.capture,
            formal_args: lambda
                .formal_args
                .iter()
                .map(|a| clone_formal_arg(state, a))
                .collect(),
            var_arg: lambda.var_arg.as_ref().map(|a| clone_formal_arg(state, a)),
            body: clone_stmt(state, lambda.body),
        })),
        ExprKind::Unpack(inner) => ExprKind::Unpack(clone_expr(state, inner)),
        ExprKind::StaticExpr(inner) => ExprKind::StaticExpr(clone_expr(state, inner)),
        ExprKind::DispatchExpr(inner) => ExprKind::DispatchExpr(clone_expr(state, inner)),
        ExprKind::ForeignExpr {
            module_name,
            env,
            expr,
        } => ExprKind::ForeignExpr {
            module_name,
            env,
            expr: clone_expr(state, expr),
        },
        ExprKind::EvalExpr { args } => ExprKind::EvalExpr {
            args: clone_expr(state, args),
        },
    };
    state.add_expr_spanning(kind, location, end_location)
}

pub fn clone_stmt(state: &mut CompilerState, stmt: StmtId) -> StmtId {
    let Stmt { kind, location } = state.stmt(stmt).clone();
    let kind = match kind {
        StmtKind::Block(statements) => StmtKind::Block(
            statements
                .iter()
                .map(|&s| clone_stmt(state, s))
                .collect::<Vec<_>>(),
        ),
        StmtKind::Label(_)
        | StmtKind::Goto(_)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Unreachable => kind,
        StmtKind::Binding { kind, args, values } => StmtKind::Binding {
            kind,
            args: args
                .iter()
                .map(|a| clone_formal_arg(state, a))
                .collect::<Vec<_>>(),
            values: clone_expr_list(state, &values),
        },
        StmtKind::Assignment { left, right } => StmtKind::Assignment {
            left: clone_expr_list(state, &left),
            right: clone_expr_list(state, &right),
        },
        StmtKind::InitAssignment { left, right } => StmtKind::InitAssignment {
            left: clone_expr_list(state, &left),
            right: clone_expr_list(state, &right),
        },
        StmtKind::VariadicAssignment { op, left, right } => StmtKind::VariadicAssignment {
            op,
            left: clone_expr(state, left),
            right: clone_expr(state, right),
        },
        StmtKind::Return {
            kind,
            values,
            is_expr_return,
        } => StmtKind::Return {
            kind,
            values: clone_expr_list(state, &values),
            is_expr_return,
        },
        StmtKind::If {
            condition_statements,
            condition,
            then_part,
            else_part,
        } => StmtKind::If {
            condition_statements: condition_statements
                .iter()
                .map(|&s| clone_stmt(state, s))
                .collect(),
            condition: clone_expr(state, condition),
            then_part: clone_stmt(state, then_part),
            else_part: else_part.map(|s| clone_stmt(state, s)),
        },
        StmtKind::Switch {
            expr_statements,
            expr,
            case_blocks,
            default_case,
        } => StmtKind::Switch {
            expr_statements: expr_statements
                .iter()
                .map(|&s| clone_stmt(state, s))
                .collect(),
            expr: clone_expr(state, expr),
            case_blocks: case_blocks
                .iter()
                .map(|cb| CaseBlock {
                    labels: clone_expr_list(state, &cb.labels),
                    body: clone_stmt(state, cb.body),
                    location: cb.location,
                })
                .collect(),
            default_case: default_case.map(|s| clone_stmt(state, s)),
        },
        StmtKind::ExprStatement(expr) => StmtKind::ExprStatement(clone_expr(state, expr)),
        StmtKind::While {
            condition_statements,
            condition,
            body,
        } => StmtKind::While {
            condition_statements: condition_statements
                .iter()
                .map(|&s| clone_stmt(state, s))
                .collect(),
            condition: clone_expr(state, condition),
            body: clone_stmt(state, body),
        },
        StmtKind::For {
            variables,
            expr,
            body,
        } => StmtKind::For {
            variables,
            expr: clone_expr(state, expr),
            body: clone_stmt(state, body),
        },
        StmtKind::ForeignStatement { env, body } => StmtKind::ForeignStatement {
            env,
            body: clone_stmt(state, body),
        },
        StmtKind::Try {
            try_block,
            catch_blocks,
        } => StmtKind::Try {
            try_block: clone_stmt(state, try_block),
            catch_blocks: catch_blocks
                .iter()
                .map(|c| CatchClause {
                    exception_var: c.exception_var,
                    exception_type: c.exception_type.map(|t| clone_expr(state, t)),
                    body: clone_stmt(state, c.body),
                    location: c.location,
                })
                .collect(),
        },
        StmtKind::Throw { expr } => StmtKind::Throw {
            expr: expr.map(|e| clone_expr(state, e)),
        },
        StmtKind::StaticFor {
            variable,
            values,
            body,
        } => StmtKind::StaticFor {
            variable,
            values: clone_expr_list(state, &values),
            body: clone_stmt(state, body),
        },
        StmtKind::Finally(body) => StmtKind::Finally(clone_stmt(state, body)),
        StmtKind::OnError(body) => StmtKind::OnError(clone_stmt(state, body)),
        StmtKind::EvalStatement { args } => StmtKind::EvalStatement {
            args: clone_expr_list(state, &args),
        },
        StmtKind::StaticAssert { condition, message } => StmtKind::StaticAssert {
            condition: clone_expr(state, condition),
            message: clone_expr_list(state, &message),
        },
    };
    state.add_stmt(kind, location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{PatternVar, Tempness};

    #[test]
    fn clone_allocates_fresh_nodes() {
        let mut state = CompilerState::new();
        let x = state.intern("x");
        let name = state.add_expr(ExprKind::NameRef(x), None);
        let call = state.add_expr(
            ExprKind::Call {
                expr: name,
                args: ExprList::new(),
            },
            None,
        );
        let copy = clone_expr(&mut state, call);
        assert_ne!(copy, call);
        let ExprKind::Call { expr: copied_inner, .. } = state.expr(copy).kind.clone() else {
            panic!("clone changed node kind");
        };
        assert_ne!(copied_inner, name);
    }

    #[test]
    fn clone_disjointness_for_code() {
        let mut state = CompilerState::new();
        let t = state.intern("T");
        let x = state.intern("x");
        let type_ref = state.add_expr(ExprKind::NameRef(t), None);
        let body_expr = state.add_expr(ExprKind::NameRef(x), None);
        let body = state.add_stmt(StmtKind::ExprStatement(body_expr), None);
        let code = Code {
            pattern_vars: vec![PatternVar {
                is_multi: false,
                name: t,
                location: None,
            }],
            predicate: None,
            formal_args: vec![FormalArg {
                name: x,
                ty: Some(type_ref),
                tempness: Tempness::DontCare,
                as_type: None,
                location: None,
            }],
            var_arg: None,
            return_specs: vec![],
            var_return_spec: None,
            body: CodeBody::Statements(body),
            location: None,
        };
        let copy = clone_code(&mut state, &code);
        let copied_ty = copy.formal_args[0].ty.unwrap();
        assert_ne!(copied_ty, type_ref);

        // mutating a cache entry of the clone leaves the template alone
        state.desugared_exprs.insert(copied_ty, body_expr);
        assert!(!state.desugared_exprs.contains_key(&type_ref));

        // and mutating the cloned node itself does not touch the original
        state.exprs[copied_ty.index()].kind = ExprKind::BoolLiteral(true);
        assert!(matches!(state.expr(type_ref).kind, ExprKind::NameRef(_)));
    }
}
