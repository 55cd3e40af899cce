//! The abstract syntax tree.
//!
//! Nodes live in the expression and statement arenas on `CompilerState` and
//! reference children by id, so the deep-copy used for overload
//! specialization is a plain recursive re-allocation and per-node caches
//! (analysis memos, desugar results) can be side tables keyed by id, so
//! clones never observe their template's caches.

use smallvec::SmallVec;

use crate::ids::{EnvId, ExprId, StmtId};
use crate::intern::StrId;
use crate::object::Object;
use crate::source::Location;

/// An ordered list of expression nodes. Most lists are short (call
/// arguments, tuple elements), so they stay inline.
pub type ExprList = SmallVec<[ExprId; 4]>;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Option<Location>,
    pub end_location: Option<Location>,
}

/// Operator carriers produced by the parser. The operator tokens travel in
/// the expression list as static identifier objects; what each operator
/// means is the prelude's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariadicOpKind {
    Dereference,
    AddressOf,
    Not,
    Prefix,
    Infix,
    IfExpr,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    BoolLiteral(bool),
    IntLiteral {
        value: StrId,
        suffix: Option<StrId>,
    },
    FloatLiteral {
        value: StrId,
        suffix: Option<StrId>,
    },
    /// Desugars to a `charLiteral(<code>)` call on first touch.
    CharLiteral(char),
    StringLiteral(StrId),
    /// `#name`: a static identifier object.
    IdentifierLiteral(StrId),
    /// `__FILE__`, `__LINE__`, `__COLUMN__`
    FileExpr,
    LineExpr,
    ColumnExpr,
    NameRef(StrId),
    /// `[a, b, c]`
    Tuple(ExprList),
    /// `(a, b, c)`: groups without constructing.
    Paren(ExprList),
    /// `f[a, b]`
    Indexing { expr: ExprId, args: ExprList },
    /// `f(a, b)`
    Call { expr: ExprId, args: ExprList },
    /// `x.name`
    FieldRef { expr: ExprId, name: StrId },
    /// `x.12`
    StaticIndexing { expr: ExprId, index: u64 },
    VariadicOp {
        op: VariadicOpKind,
        exprs: ExprList,
    },
    And { left: ExprId, right: ExprId },
    Or { left: ExprId, right: ExprId },
    Lambda(Box<LambdaExpr>),
    /// `..expr`: splices a multi-value into the surrounding list.
    Unpack(ExprId),
    /// `#expr` applied to a non-identifier: lift to a static object.
    StaticExpr(ExprId),
    /// `*expr` in call position: variant dispatch.
    DispatchExpr(ExprId),
    /// An expression that travels with its home environment. `env` is
    /// resolved from `module` on first use when absent.
    ForeignExpr {
        module_name: Option<StrId>,
        env: Option<EnvId>,
        expr: ExprId,
    },
    /// An already-resolved compile-time object.
    ObjectExpr(Object),
    /// `eval expr`: compile-time string, re-parsed as an expression list
    /// and cached in a side table.
    EvalExpr { args: ExprId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaCapture {
    ByValue,
    ByRef,
    Stateless,
}

#[derive(Debug, Clone)]
pub struct LambdaExpr {
    pub capture: LambdaCapture,
    pub formal_args: Vec<FormalArg>,
    pub var_arg: Option<FormalArg>,
    pub body: StmtId,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Var,
    Ref,
    Alias,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Value,
    Ref,
    Forward,
}

#[derive(Debug, Clone)]
pub struct CaseBlock {
    pub labels: ExprList,
    pub body: StmtId,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub exception_var: StrId,
    /// Absent for a catch-all clause.
    pub exception_type: Option<ExprId>,
    pub body: StmtId,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Vec<StmtId>),
    Label(StrId),
    Binding {
        kind: BindingKind,
        args: Vec<FormalArg>,
        values: ExprList,
    },
    Assignment {
        left: ExprList,
        right: ExprList,
    },
    InitAssignment {
        left: ExprList,
        right: ExprList,
    },
    /// Update-assignments like `x += y`: the operator token rides along and
    /// the whole form desugars to an `updateAssign` operator call.
    VariadicAssignment {
        op: StrId,
        left: ExprId,
        right: ExprId,
    },
    Goto(StrId),
    Return {
        kind: ReturnKind,
        values: ExprList,
        /// True for the `= expr;` body sugar; return-spec checking reports
        /// these differently.
        is_expr_return: bool,
    },
    If {
        condition_statements: Vec<StmtId>,
        condition: ExprId,
        then_part: StmtId,
        else_part: Option<StmtId>,
    },
    Switch {
        expr_statements: Vec<StmtId>,
        expr: ExprId,
        case_blocks: Vec<CaseBlock>,
        default_case: Option<StmtId>,
    },
    ExprStatement(ExprId),
    While {
        condition_statements: Vec<StmtId>,
        condition: ExprId,
        body: StmtId,
    },
    Break,
    Continue,
    For {
        variables: Vec<StrId>,
        expr: ExprId,
        body: StmtId,
    },
    ForeignStatement {
        env: EnvId,
        body: StmtId,
    },
    Try {
        try_block: StmtId,
        catch_blocks: Vec<CatchClause>,
    },
    Throw {
        expr: Option<ExprId>,
    },
    /// Compile-time loop: the body is cloned once per value.
    StaticFor {
        variable: StrId,
        values: ExprList,
        body: StmtId,
    },
    Finally(StmtId),
    OnError(StmtId),
    Unreachable,
    EvalStatement {
        args: ExprList,
    },
    StaticAssert {
        condition: ExprId,
        message: ExprList,
    },
}

//
// Code
//

/// Argument-passing category demanded by a formal argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tempness {
    DontCare,
    Lvalue,
    Rvalue,
    Forward,
}

#[derive(Debug, Clone)]
pub struct FormalArg {
    pub name: StrId,
    /// Type pattern; absent means the argument matches any type.
    pub ty: Option<ExprId>,
    pub tempness: Tempness,
    /// `as`-conversion target type, when present.
    pub as_type: Option<ExprId>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct ReturnSpec {
    pub ty: ExprId,
    pub name: Option<StrId>,
}

/// A named unification slot declared by `[T, ..Ts]` on a `Code`. Multi
/// pattern vars bind sequences.
#[derive(Debug, Clone)]
pub struct PatternVar {
    pub is_multi: bool,
    pub name: StrId,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub enum CodeBody {
    Statements(StmtId),
    /// An embedded LLVM body handed to the backend verbatim.
    Llvm(StrId),
    /// External procedures and forward declarations carry no body.
    None,
}

/// A procedure/overload body bundle.
#[derive(Debug, Clone)]
pub struct Code {
    pub pattern_vars: Vec<PatternVar>,
    pub predicate: Option<ExprId>,
    pub formal_args: Vec<FormalArg>,
    pub var_arg: Option<FormalArg>,
    pub return_specs: Vec<ReturnSpec>,
    pub var_return_spec: Option<ReturnSpec>,
    pub body: CodeBody,
    pub location: Option<Location>,
}

impl Code {
    pub fn has_return_specs(&self) -> bool {
        !self.return_specs.is_empty() || self.var_return_spec.is_some()
    }

    pub fn has_body(&self) -> bool {
        !matches!(self.body, CodeBody::None)
    }

    pub fn is_llvm(&self) -> bool {
        matches!(self.body, CodeBody::Llvm(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConv {
    Default,
    StdCall,
    FastCall,
}
