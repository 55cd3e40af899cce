//! The parser: token stream to AST.
//!
//! Hand-written recursive descent. Operator expressions build `VariadicOp`
//! nodes that carry the operator tokens as static identifier objects;
//! precedence is resolved here conventionally (multiplicative over additive
//! over ordering over equality), nesting the carriers. Every node gets its
//! start/end locations attached.
//!
//! Entry points: whole module, standalone expression, expression list,
//! statement list, top-level-item list into an existing module (the `eval`
//! path), and one interactive item.

use smallvec::smallvec;

use crate::ast::{
    BindingKind, CaseBlock, CatchClause, Code, CodeBody, ExprKind, ExprList, FormalArg,
    LambdaCapture, LambdaExpr, PatternVar, ReturnKind, ReturnSpec, StmtKind, Tempness,
    VariadicOpKind, Visibility,
};
use crate::decls::{
    Documentation, EnumDecl, ExternalArg, ExternalProcDecl, ExternalVarDecl, GlobalAliasDecl,
    GlobalVarDecl, InstanceDecl, NewTypeDecl, OverloadDecl, OverloadPatterns, ProcedureDecl,
    RecordBody, RecordDecl, RecordField, VariantDecl,
};
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnvId, ExprId, ModuleId, StmtId};
use crate::intern::StrId;
use crate::loader::TopLevelRef;
use crate::module::Import;
use crate::object::Object;
use crate::source::{Location, SourceId};
use crate::state::CompilerState;
use crate::token::{Keyword, Symbol, Token, TokenKind};

/// One item from the interactive entry point.
#[derive(Debug)]
pub enum InteractiveItem {
    Expr(ExprId),
    Statements(Vec<StmtId>),
    TopLevel,
    Empty,
}

//
// entry points
//

/// Parses a whole source buffer as the body of `module`.
pub fn parse_module_source(
    state: &mut CompilerState,
    source: SourceId,
    module: ModuleId,
) -> CompileResult<()> {
    let data = state.sources.get(source).data.clone();
    let tokens = crate::lexer::tokenize(source, &data)?;
    let mut parser = Parser::new(state, tokens, module);
    parser.module_header()?;
    parser.imports()?;
    parser.top_level_items(None)?;
    Ok(())
}

/// Parses a standalone expression; trailing tokens are an error.
pub fn parse_expr_source(
    state: &mut CompilerState,
    source: SourceId,
    module: ModuleId,
) -> CompileResult<ExprId> {
    let data = state.sources.get(source).data.clone();
    let tokens = crate::lexer::tokenize(source, &data)?;
    let mut parser = Parser::new(state, tokens, module);
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses a comma-separated expression list (the `eval` expression path).
pub fn parse_expr_list_source(
    state: &mut CompilerState,
    source: SourceId,
) -> CompileResult<ExprList> {
    let data = state.sources.get(source).data.clone();
    let tokens = crate::lexer::tokenize(source, &data)?;
    let module = ModuleId::new(0);
    let mut parser = Parser::new(state, tokens, module);
    if parser.at_end() {
        return Ok(ExprList::new());
    }
    let exprs = parser.expr_list()?;
    parser.expect_end()?;
    Ok(exprs)
}

/// Parses a statement list (the `eval` statement path).
pub fn parse_statements_source(
    state: &mut CompilerState,
    source: SourceId,
) -> CompileResult<Vec<StmtId>> {
    let data = state.sources.get(source).data.clone();
    let tokens = crate::lexer::tokenize(source, &data)?;
    let module = ModuleId::new(0);
    let mut parser = Parser::new(state, tokens, module);
    let mut statements = Vec::new();
    while !parser.at_end() {
        statements.push(parser.statement()?);
    }
    Ok(statements)
}

/// Parses top-level items out of a buffer into an existing module (used by
/// compile-time `eval` at the top level). New items are appended starting
/// at the module's current end.
pub fn parse_top_level_source(
    state: &mut CompilerState,
    source: SourceId,
    module: ModuleId,
) -> CompileResult<Vec<TopLevelRef>> {
    let data = state.sources.get(source).data.clone();
    let tokens = crate::lexer::tokenize(source, &data)?;
    let start = state.modules[module.index()].items.len();
    let mut parser = Parser::new(state, tokens, module);
    parser.top_level_items(None)?;
    Ok(state.modules[module.index()].items[start..].to_vec())
}

/// Parses one interactive item: a top-level declaration, a statement
/// sequence, or a bare expression.
pub fn parse_interactive(
    state: &mut CompilerState,
    source: SourceId,
    module: ModuleId,
) -> CompileResult<InteractiveItem> {
    let data = state.sources.get(source).data.clone();
    let tokens = crate::lexer::tokenize(source, &data)?;
    if tokens.is_empty() {
        return Ok(InteractiveItem::Empty);
    }
    if starts_top_level(&tokens[0]) {
        let mut parser = Parser::new(state, tokens, module);
        parser.top_level_items(None)?;
        return Ok(InteractiveItem::TopLevel);
    }
    // try a bare expression first; fall back to statements
    let checkpoint = (state.exprs.len(), state.stmts.len());
    let parsed_expr = {
        let mut parser = Parser::new(state, tokens.clone(), module);
        match parser.expr() {
            Ok(expr) if parser.at_end() => Some(expr),
            _ => None,
        }
    };
    if let Some(expr) = parsed_expr {
        return Ok(InteractiveItem::Expr(expr));
    }
    state.exprs.truncate(checkpoint.0);
    state.stmts.truncate(checkpoint.1);
    let mut parser = Parser::new(state, tokens, module);
    let mut statements = Vec::new();
    while !parser.at_end() {
        statements.push(parser.statement()?);
    }
    Ok(InteractiveItem::Statements(statements))
}

fn starts_top_level(token: &Token) -> bool {
    matches!(
        token.kind,
        TokenKind::Keyword(
            Keyword::Public
                | Keyword::Private
                | Keyword::Import
                | Keyword::Record
                | Keyword::Variant
                | Keyword::Instance
                | Keyword::Define
                | Keyword::Overload
                | Keyword::External
                | Keyword::Enum
                | Keyword::Newtype
        ) | TokenKind::DocumentationStart
    )
}

//
// the parser proper
//

struct Parser<'a> {
    state: &'a mut CompilerState,
    tokens: Vec<Token>,
    pos: usize,
    module: ModuleId,
    /// Predicate parsed out of an inline `[T | pred]` bracket, consumed by
    /// the declaration that owns the bracket.
    pending_inline_predicate: Option<ExprId>,
}

impl<'a> Parser<'a> {
    fn new(state: &'a mut CompilerState, tokens: Vec<Token>, module: ModuleId) -> Self {
        Self {
            state,
            tokens,
            pos: 0,
            module,
            pending_inline_predicate: None,
        }
    }

    //
    // token access
    //

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn location(&self) -> Option<Location> {
        self.peek().map(|t| t.location)
    }

    fn previous_end(&self) -> Option<Location> {
        self.tokens.get(self.pos.wrapping_sub(1)).map(|t| Location {
            source: t.location.source,
            offset: t.end_offset,
        })
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_error<T>(&self, expected: &str) -> CompileResult<T> {
        let (found, location) = match self.peek() {
            Some(token) => (token.describe(), Some(token.location)),
            None => ("end of input".to_owned(), self.previous_end()),
        };
        Err(self.state.error_at(
            DiagnosticKind::Parse {
                expected: expected.to_owned(),
                found,
            },
            location,
        ))
    }

    fn expect_end(&self) -> CompileResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            self.parse_error("end of input")
        }
    }

    fn is_symbol(&self, symbol: Symbol) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Symbol(s), .. }) if *s == symbol)
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        if self.is_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol) -> CompileResult<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            self.parse_error(&format!("'{symbol}'"))
        }
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Keyword(k), .. }) if *k == keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> CompileResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.parse_error(&format!("'{keyword}'"))
        }
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::OpString(s), .. }) if s == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> CompileResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.parse_error(&format!("'{op}'"))
        }
    }

    fn identifier(&mut self) -> CompileResult<StrId> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => {
                let name = name.clone();
                self.pos += 1;
                Ok(self.state.intern(&name))
            }
            _ => self.parse_error("identifier"),
        }
    }

    fn finish_expr(&mut self, kind: ExprKind, start: Option<Location>) -> ExprId {
        self.state.add_expr_spanning(kind, start, self.previous_end())
    }

    //
    // expressions
    //

    fn expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        if self.is_keyword(Keyword::If) {
            // if-expression: if (c) a else b
            self.pos += 1;
            self.expect_symbol(Symbol::LParen)?;
            let condition = self.expr()?;
            self.expect_symbol(Symbol::RParen)?;
            let then_part = self.expr()?;
            self.expect_keyword(Keyword::Else)?;
            let else_part = self.expr()?;
            return Ok(self.finish_expr(
                ExprKind::VariadicOp {
                    op: VariadicOpKind::IfExpr,
                    exprs: smallvec![condition, then_part, else_part],
                },
                start,
            ));
        }
        self.or_expr()
    }

    fn or_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let mut left = self.and_expr()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.and_expr()?;
            left = self.finish_expr(ExprKind::Or { left, right }, start);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let mut left = self.not_expr()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.not_expr()?;
            left = self.finish_expr(ExprKind::And { left, right }, start);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        if self.eat_keyword(Keyword::Not) {
            let operand = self.not_expr()?;
            return Ok(self.finish_expr(
                ExprKind::VariadicOp {
                    op: VariadicOpKind::Not,
                    exprs: smallvec![operand],
                },
                start,
            ));
        }
        self.equality_expr()
    }

    fn operator_object(&mut self, op: &str, location: Option<Location>) -> ExprId {
        let id = self.state.intern(op);
        self.state
            .add_expr_spanning(ExprKind::ObjectExpr(Object::Ident(id)), location, location)
    }

    fn infix(&mut self, left: ExprId, op: &str, right: ExprId, start: Option<Location>) -> ExprId {
        let op_obj = self.operator_object(op, start);
        self.finish_expr(
            ExprKind::VariadicOp {
                op: VariadicOpKind::Infix,
                exprs: smallvec![left, op_obj, right],
            },
            start,
        )
    }

    fn equality_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let left = self.compare_expr()?;
        for op in ["==", "!="] {
            if self.eat_op(op) {
                let right = self.compare_expr()?;
                return Ok(self.infix(left, op, right, start));
            }
        }
        Ok(left)
    }

    fn compare_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let left = self.add_expr()?;
        for op in ["<=", ">=", "<", ">"] {
            if self.eat_op(op) {
                let right = self.add_expr()?;
                return Ok(self.infix(left, op, right, start));
            }
        }
        Ok(left)
    }

    fn add_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let mut left = self.mul_expr()?;
        loop {
            if self.eat_op("+") {
                let right = self.mul_expr()?;
                left = self.infix(left, "+", right, start);
            } else if self.eat_op("-") {
                let right = self.mul_expr()?;
                left = self.infix(left, "-", right, start);
            } else {
                return Ok(left);
            }
        }
    }

    fn mul_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let mut left = self.prefix_expr()?;
        loop {
            let op = ["*", "/", "%", "\\"]
                .into_iter()
                .find(|op| self.is_op(op));
            match op {
                Some(op) => {
                    self.pos += 1;
                    let right = self.prefix_expr()?;
                    left = self.infix(left, op, right, start);
                }
                None => return Ok(left),
            }
        }
    }

    fn prefix_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        if self.is_op("-") || self.is_op("+") {
            let negative = self.is_op("-");
            let op = if negative { "-" } else { "+" };
            self.pos += 1;
            // a sign directly on a numeric literal folds into the literal
            if let Some(lit) = self.signed_literal(negative, start)? {
                return Ok(lit);
            }
            let operand = self.prefix_expr()?;
            let op_obj = self.operator_object(op, start);
            return Ok(self.finish_expr(
                ExprKind::VariadicOp {
                    op: VariadicOpKind::Prefix,
                    exprs: smallvec![op_obj, operand],
                },
                start,
            ));
        }
        if self.eat_op("&") {
            let operand = self.prefix_expr()?;
            return Ok(self.finish_expr(
                ExprKind::VariadicOp {
                    op: VariadicOpKind::AddressOf,
                    exprs: smallvec![operand],
                },
                start,
            ));
        }
        if self.eat_op("*") {
            let operand = self.prefix_expr()?;
            return Ok(self.finish_expr(ExprKind::DispatchExpr(operand), start));
        }
        self.suffix_expr()
    }

    fn signed_literal(
        &mut self,
        negative: bool,
        start: Option<Location>,
    ) -> CompileResult<Option<ExprId>> {
        let (text, is_float) = match self.peek() {
            Some(Token {
                kind: TokenKind::IntLiteral(text),
                ..
            }) => (text.clone(), false),
            Some(Token {
                kind: TokenKind::FloatLiteral(text),
                ..
            }) => (text.clone(), true),
            _ => return Ok(None),
        };
        self.pos += 1;
        let signed = if negative {
            format!("-{text}")
        } else {
            text
        };
        let suffix = self.literal_suffix();
        let value = self.state.intern(&signed);
        let kind = if is_float {
            ExprKind::FloatLiteral { value, suffix }
        } else {
            ExprKind::IntLiteral { value, suffix }
        };
        Ok(Some(self.finish_expr(kind, start)))
    }

    /// A literal suffix is an identifier token glued directly to the
    /// numeric token, with no whitespace in between.
    fn literal_suffix(&mut self) -> Option<StrId> {
        let prev_end = self.tokens.get(self.pos.wrapping_sub(1))?.end_offset;
        match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                location,
                ..
            }) if location.offset == prev_end => {
                let name = name.clone();
                self.pos += 1;
                Some(self.state.intern(&name))
            }
            _ => None,
        }
    }

    fn suffix_expr(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let mut expr = self.atom()?;
        loop {
            if self.eat_symbol(Symbol::LParen) {
                let args = self.expr_list_until(Symbol::RParen)?;
                expr = self.finish_expr(ExprKind::Call { expr, args }, start);
            } else if self.eat_symbol(Symbol::LBracket) {
                let args = self.expr_list_until(Symbol::RBracket)?;
                expr = self.finish_expr(ExprKind::Indexing { expr, args }, start);
            } else if self.is_symbol(Symbol::Dot) {
                self.pos += 1;
                let name = self.identifier()?;
                expr = self.finish_expr(ExprKind::FieldRef { expr, name }, start);
            } else if let Some(Token {
                kind: TokenKind::StaticIndex(digits),
                ..
            }) = self.peek()
            {
                let digits = digits.clone();
                self.pos += 1;
                let index = parse_index(&digits).ok_or_else(|| {
                    self.state
                        .eval_error(format!("invalid static index: {digits}"))
                })?;
                expr = self.finish_expr(ExprKind::StaticIndexing { expr, index }, start);
            } else if self.eat_symbol(Symbol::Caret) {
                expr = self.finish_expr(
                    ExprKind::VariadicOp {
                        op: VariadicOpKind::Dereference,
                        exprs: smallvec![expr],
                    },
                    start,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn atom(&mut self) -> CompileResult<ExprId> {
        let start = self.location();
        let Some(token) = self.peek().cloned() else {
            return self.parse_error("expression");
        };
        match token.kind {
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                Ok(self.finish_expr(ExprKind::BoolLiteral(true), start))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                Ok(self.finish_expr(ExprKind::BoolLiteral(false), start))
            }
            TokenKind::Keyword(Keyword::File) => {
                self.pos += 1;
                Ok(self.finish_expr(ExprKind::FileExpr, start))
            }
            TokenKind::Keyword(Keyword::Line) => {
                self.pos += 1;
                Ok(self.finish_expr(ExprKind::LineExpr, start))
            }
            TokenKind::Keyword(Keyword::Column) => {
                self.pos += 1;
                Ok(self.finish_expr(ExprKind::ColumnExpr, start))
            }
            TokenKind::Keyword(Keyword::Eval) => {
                self.pos += 1;
                let args = self.expr()?;
                Ok(self.finish_expr(ExprKind::EvalExpr { args }, start))
            }
            TokenKind::IntLiteral(text) => {
                self.pos += 1;
                let suffix = self.literal_suffix();
                let value = self.state.intern(&text);
                Ok(self.finish_expr(ExprKind::IntLiteral { value, suffix }, start))
            }
            TokenKind::FloatLiteral(text) => {
                self.pos += 1;
                let suffix = self.literal_suffix();
                let value = self.state.intern(&text);
                Ok(self.finish_expr(ExprKind::FloatLiteral { value, suffix }, start))
            }
            TokenKind::CharLiteral(c) => {
                self.pos += 1;
                let expr = self.finish_expr(ExprKind::CharLiteral(c), start);
                // the constructor-call form is decided at parse time
                let desugared = crate::desugar::desugar_char_literal(self.state, c, start);
                self.state.desugared_exprs.insert(expr, desugared);
                Ok(expr)
            }
            TokenKind::StringLiteral(text) => {
                self.pos += 1;
                let value = self.state.intern(&text);
                Ok(self.finish_expr(ExprKind::StringLiteral(value), start))
            }
            TokenKind::Symbol(Symbol::Hash) => {
                self.pos += 1;
                match self.peek().cloned() {
                    Some(Token {
                        kind: TokenKind::Identifier(name),
                        ..
                    }) => {
                        self.pos += 1;
                        let id = self.state.intern(&name);
                        Ok(self.finish_expr(ExprKind::IdentifierLiteral(id), start))
                    }
                    Some(Token {
                        kind: TokenKind::StringLiteral(text),
                        ..
                    }) => {
                        self.pos += 1;
                        let id = self.state.intern(&text);
                        Ok(self.finish_expr(ExprKind::IdentifierLiteral(id), start))
                    }
                    _ => self.parse_error("identifier after '#'"),
                }
            }
            TokenKind::Identifier(name) => {
                // `x => body` single-argument lambda
                if matches!(
                    self.peek_at(1),
                    Some(Token { kind: TokenKind::OpString(op), .. }) if op == "=>"
                ) {
                    return self.lambda_from_names(vec![name], start);
                }
                self.pos += 1;
                let id = self.state.intern(&name);
                Ok(self.finish_expr(ExprKind::NameRef(id), start))
            }
            TokenKind::Symbol(Symbol::LParen) => {
                if let Some(names) = self.lambda_formals_lookahead() {
                    return self.lambda_from_names(names, start);
                }
                self.pos += 1;
                let args = self.expr_list_until(Symbol::RParen)?;
                Ok(self.finish_expr(ExprKind::Paren(args), start))
            }
            TokenKind::Symbol(Symbol::LBracket) => {
                self.pos += 1;
                let args = self.expr_list_until(Symbol::RBracket)?;
                Ok(self.finish_expr(ExprKind::Tuple(args), start))
            }
            TokenKind::Symbol(Symbol::DotDot) => {
                self.pos += 1;
                let inner = self.prefix_expr()?;
                Ok(self.finish_expr(ExprKind::Unpack(inner), start))
            }
            _ => self.parse_error("expression"),
        }
    }

    /// Detects `(a, b) =>` ahead; returns the formal names when the parens
    /// really open a lambda.
    fn lambda_formals_lookahead(&self) -> Option<Vec<String>> {
        let mut names = Vec::new();
        let mut i = self.pos + 1;
        loop {
            match &self.tokens.get(i)?.kind {
                TokenKind::Symbol(Symbol::RParen) if names.is_empty() => {
                    i += 1;
                    break;
                }
                TokenKind::Identifier(name) => {
                    names.push(name.clone());
                    i += 1;
                    match &self.tokens.get(i)?.kind {
                        TokenKind::Symbol(Symbol::Comma) => i += 1,
                        TokenKind::Symbol(Symbol::RParen) => {
                            i += 1;
                            break;
                        }
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }
        match &self.tokens.get(i)?.kind {
            TokenKind::OpString(op) if op == "=>" => Some(names),
            _ => None,
        }
    }

    fn lambda_from_names(
        &mut self,
        names: Vec<String>,
        start: Option<Location>,
    ) -> CompileResult<ExprId> {
        // consume the formals we looked ahead over
        if self.is_symbol(Symbol::LParen) {
            while !self.eat_op("=>") {
                self.pos += 1;
            }
        } else {
            self.pos += 1; // the single identifier
            self.expect_op("=>")?;
        }
        let body = if self.is_symbol(Symbol::LBrace) {
            self.block()?
        } else {
            let value = self.expr()?;
            let location = self.state.expr_location(value);
            self.state.add_stmt(
                StmtKind::Return {
                    kind: ReturnKind::Value,
                    values: smallvec![value],
                    is_expr_return: true,
                },
                location,
            )
        };
        let mut formal_args = Vec::with_capacity(names.len());
        for name in names {
            let name = self.state.intern(&name);
            formal_args.push(FormalArg {
                name,
                ty: None,
                tempness: Tempness::DontCare,
                as_type: None,
                location: start,
            });
        }
        Ok(self.finish_expr(
            ExprKind::Lambda(Box::new(LambdaExpr {
                capture: LambdaCapture::ByValue,
                formal_args,
                var_arg: None,
                body,
            })),
            start,
        ))
    }

    fn expr_list(&mut self) -> CompileResult<ExprList> {
        let mut exprs = ExprList::new();
        loop {
            exprs.push(self.expr()?);
            if !self.eat_symbol(Symbol::Comma) {
                return Ok(exprs);
            }
        }
    }

    fn expr_list_until(&mut self, close: Symbol) -> CompileResult<ExprList> {
        let mut exprs = ExprList::new();
        if self.eat_symbol(close) {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.expr()?);
            if self.eat_symbol(Symbol::Comma) {
                if self.eat_symbol(close) {
                    return Ok(exprs);
                }
                continue;
            }
            self.expect_symbol(close)?;
            return Ok(exprs);
        }
    }

    //
    // statements
    //

    fn block(&mut self) -> CompileResult<StmtId> {
        let start = self.location();
        self.expect_symbol(Symbol::LBrace)?;
        let mut statements = Vec::new();
        while !self.eat_symbol(Symbol::RBrace) {
            if self.at_end() {
                return self.parse_error("'}'");
            }
            statements.push(self.statement()?);
        }
        Ok(self.state.add_stmt(StmtKind::Block(statements), start))
    }

    fn statement(&mut self) -> CompileResult<StmtId> {
        let start = self.location();
        let Some(token) = self.peek().cloned() else {
            return self.parse_error("statement");
        };
        match &token.kind {
            TokenKind::Symbol(Symbol::LBrace) => self.block(),
            TokenKind::Symbol(Symbol::DotDot)
                if matches!(
                    self.peek_at(1),
                    Some(Token { kind: TokenKind::Keyword(Keyword::For), .. })
                ) =>
            {
                self.static_for()
            }
            TokenKind::Keyword(kw) => match kw {
                Keyword::Var | Keyword::Ref | Keyword::Alias | Keyword::Forward => {
                    let binding = self.binding_statement()?;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(binding)
                }
                Keyword::Goto => {
                    self.pos += 1;
                    let label = self.identifier()?;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(StmtKind::Goto(label), start))
                }
                Keyword::Return => {
                    self.pos += 1;
                    let kind = if self.eat_keyword(Keyword::Ref) {
                        ReturnKind::Ref
                    } else if self.eat_keyword(Keyword::Forward) {
                        ReturnKind::Forward
                    } else {
                        ReturnKind::Value
                    };
                    let values = if self.is_symbol(Symbol::Semicolon) {
                        ExprList::new()
                    } else {
                        self.expr_list()?
                    };
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(
                        StmtKind::Return {
                            kind,
                            values,
                            is_expr_return: false,
                        },
                        start,
                    ))
                }
                Keyword::If => {
                    self.pos += 1;
                    self.expect_symbol(Symbol::LParen)?;
                    let (condition_statements, condition) = self.condition_list()?;
                    self.expect_symbol(Symbol::RParen)?;
                    let then_part = self.statement()?;
                    let else_part = if self.eat_keyword(Keyword::Else) {
                        Some(self.statement()?)
                    } else {
                        None
                    };
                    Ok(self.state.add_stmt(
                        StmtKind::If {
                            condition_statements,
                            condition,
                            then_part,
                            else_part,
                        },
                        start,
                    ))
                }
                Keyword::While => {
                    self.pos += 1;
                    self.expect_symbol(Symbol::LParen)?;
                    let (condition_statements, condition) = self.condition_list()?;
                    self.expect_symbol(Symbol::RParen)?;
                    let body = self.statement()?;
                    Ok(self.state.add_stmt(
                        StmtKind::While {
                            condition_statements,
                            condition,
                            body,
                        },
                        start,
                    ))
                }
                Keyword::Switch => self.switch_statement(),
                Keyword::Break => {
                    self.pos += 1;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(StmtKind::Break, start))
                }
                Keyword::Continue => {
                    self.pos += 1;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(StmtKind::Continue, start))
                }
                Keyword::For => {
                    self.pos += 1;
                    self.expect_symbol(Symbol::LParen)?;
                    let mut variables = vec![self.identifier()?];
                    while self.eat_symbol(Symbol::Comma) {
                        variables.push(self.identifier()?);
                    }
                    self.expect_keyword(Keyword::In)?;
                    let expr = self.expr()?;
                    self.expect_symbol(Symbol::RParen)?;
                    let body = self.statement()?;
                    Ok(self.state.add_stmt(
                        StmtKind::For {
                            variables,
                            expr,
                            body,
                        },
                        start,
                    ))
                }
                Keyword::Try => {
                    self.pos += 1;
                    let try_block = self.block()?;
                    let mut catch_blocks = Vec::new();
                    while self.is_keyword(Keyword::Catch) {
                        let catch_start = self.location();
                        self.pos += 1;
                        self.expect_symbol(Symbol::LParen)?;
                        let exception_var = self.identifier()?;
                        let exception_type = if self.eat_symbol(Symbol::Colon) {
                            Some(self.expr()?)
                        } else {
                            None
                        };
                        self.expect_symbol(Symbol::RParen)?;
                        let body = self.block()?;
                        catch_blocks.push(CatchClause {
                            exception_var,
                            exception_type,
                            body,
                            location: catch_start,
                        });
                    }
                    if catch_blocks.is_empty() {
                        return self.parse_error("'catch'");
                    }
                    Ok(self.state.add_stmt(
                        StmtKind::Try {
                            try_block,
                            catch_blocks,
                        },
                        start,
                    ))
                }
                Keyword::Throw => {
                    self.pos += 1;
                    let expr = if self.is_symbol(Symbol::Semicolon) {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(StmtKind::Throw { expr }, start))
                }
                Keyword::Finally => {
                    self.pos += 1;
                    let body = self.statement()?;
                    Ok(self.state.add_stmt(StmtKind::Finally(body), start))
                }
                Keyword::Onerror => {
                    self.pos += 1;
                    let body = self.statement()?;
                    Ok(self.state.add_stmt(StmtKind::OnError(body), start))
                }
                Keyword::Unreachable => {
                    self.pos += 1;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(StmtKind::Unreachable, start))
                }
                Keyword::Eval => {
                    self.pos += 1;
                    let args = self.expr_list()?;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self.state.add_stmt(StmtKind::EvalStatement { args }, start))
                }
                Keyword::Staticassert => {
                    self.pos += 1;
                    let (condition, message) = self.static_assert_args()?;
                    self.expect_symbol(Symbol::Semicolon)?;
                    Ok(self
                        .state
                        .add_stmt(StmtKind::StaticAssert { condition, message }, start))
                }
                _ => self.expr_like_statement(start),
            },
            TokenKind::Identifier(_)
                if matches!(
                    self.peek_at(1),
                    Some(Token { kind: TokenKind::Symbol(Symbol::Colon), .. })
                ) =>
            {
                let name = self.identifier()?;
                self.pos += 1; // the colon
                Ok(self.state.add_stmt(StmtKind::Label(name), start))
            }
            _ => self.expr_like_statement(start),
        }
    }

    /// Assignment, init-assignment, update-assignment, or a bare
    /// expression statement.
    fn expr_like_statement(&mut self, start: Option<Location>) -> CompileResult<StmtId> {
        let left = self.expr_list()?;
        if self.eat_op("=") {
            let right = self.expr_list()?;
            self.expect_symbol(Symbol::Semicolon)?;
            return Ok(self
                .state
                .add_stmt(StmtKind::Assignment { left, right }, start));
        }
        if self.eat_op("<--") {
            let right = self.expr_list()?;
            self.expect_symbol(Symbol::Semicolon)?;
            return Ok(self
                .state
                .add_stmt(StmtKind::InitAssignment { left, right }, start));
        }
        if let Some(Token {
            kind: TokenKind::OpString(op),
            ..
        }) = self.peek()
        {
            if let Some(base) = op.strip_suffix('=') {
                if !base.is_empty() && !matches!(base, "=" | "<" | ">" | "!") {
                    let base = base.to_owned();
                    self.pos += 1;
                    if left.len() != 1 {
                        return self.parse_error("a single update-assignment target");
                    }
                    let right = self.expr()?;
                    self.expect_symbol(Symbol::Semicolon)?;
                    let op = self.state.intern(&base);
                    return Ok(self.state.add_stmt(
                        StmtKind::VariadicAssignment {
                            op,
                            left: left[0],
                            right,
                        },
                        start,
                    ));
                }
            }
        }
        self.expect_symbol(Symbol::Semicolon)?;
        if left.len() != 1 {
            return self.parse_error("a single expression statement");
        }
        Ok(self.state.add_stmt(StmtKind::ExprStatement(left[0]), start))
    }

    /// `var a, b = values` (no trailing semicolon; callers differ).
    fn binding_statement(&mut self) -> CompileResult<StmtId> {
        let start = self.location();
        let kind = if self.eat_keyword(Keyword::Var) {
            BindingKind::Var
        } else if self.eat_keyword(Keyword::Ref) {
            BindingKind::Ref
        } else if self.eat_keyword(Keyword::Alias) {
            BindingKind::Alias
        } else if self.eat_keyword(Keyword::Forward) {
            BindingKind::Forward
        } else {
            return self.parse_error("binding keyword");
        };
        let mut args = Vec::new();
        loop {
            let arg_start = self.location();
            let variadic = self.eat_symbol(Symbol::DotDot);
            let name = self.identifier()?;
            let ty = if self.eat_symbol(Symbol::Colon) {
                Some(self.expr()?)
            } else {
                None
            };
            let _ = variadic; // variadic bindings take the whole remainder
            args.push(FormalArg {
                name,
                ty,
                tempness: Tempness::DontCare,
                as_type: None,
                location: arg_start,
            });
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        self.expect_op("=")?;
        let values = self.expr_list()?;
        Ok(self.state.add_stmt(
            StmtKind::Binding {
                kind,
                args,
                values,
            },
            start,
        ))
    }

    /// Zero or more binding statements, then the condition expression.
    fn condition_list(&mut self) -> CompileResult<(Vec<StmtId>, ExprId)> {
        let mut statements = Vec::new();
        while matches!(
            self.peek(),
            Some(Token {
                kind: TokenKind::Keyword(
                    Keyword::Var | Keyword::Ref | Keyword::Alias | Keyword::Forward
                ),
                ..
            })
        ) {
            let binding = self.binding_statement()?;
            self.expect_symbol(Symbol::Semicolon)?;
            statements.push(binding);
        }
        let condition = self.expr()?;
        Ok((statements, condition))
    }

    fn switch_statement(&mut self) -> CompileResult<StmtId> {
        let start = self.location();
        self.expect_keyword(Keyword::Switch)?;
        self.expect_symbol(Symbol::LParen)?;
        let (expr_statements, expr) = self.condition_list()?;
        self.expect_symbol(Symbol::RParen)?;
        let mut case_blocks = Vec::new();
        let mut default_case = None;
        loop {
            if self.is_keyword(Keyword::Case) {
                let case_start = self.location();
                self.pos += 1;
                self.expect_symbol(Symbol::LParen)?;
                let labels = self.expr_list_until(Symbol::RParen)?;
                let body = self.block()?;
                case_blocks.push(CaseBlock {
                    labels,
                    body,
                    location: case_start,
                });
            } else if self.eat_keyword(Keyword::Default) {
                default_case = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        if case_blocks.is_empty() {
            return self.parse_error("'case'");
        }
        Ok(self.state.add_stmt(
            StmtKind::Switch {
                expr_statements,
                expr,
                case_blocks,
                default_case,
            },
            start,
        ))
    }

    fn static_for(&mut self) -> CompileResult<StmtId> {
        let start = self.location();
        self.expect_symbol(Symbol::DotDot)?;
        self.expect_keyword(Keyword::For)?;
        self.expect_symbol(Symbol::LParen)?;
        let variable = self.identifier()?;
        self.expect_keyword(Keyword::In)?;
        let values = self.expr_list_until(Symbol::RParen)?;
        let body = self.statement()?;
        Ok(self.state.add_stmt(
            StmtKind::StaticFor {
                variable,
                values,
                body,
            },
            start,
        ))
    }

    fn static_assert_args(&mut self) -> CompileResult<(ExprId, ExprList)> {
        self.expect_symbol(Symbol::LParen)?;
        let condition = self.expr()?;
        let mut message = ExprList::new();
        while self.eat_symbol(Symbol::Comma) {
            message.push(self.expr()?);
        }
        self.expect_symbol(Symbol::RParen)?;
        Ok((condition, message))
    }

    //
    // module header and imports
    //

    fn module_header(&mut self) -> CompileResult<()> {
        if !self.eat_keyword(Keyword::Module) {
            return Ok(());
        }
        let mut name = String::new();
        loop {
            let part = self.identifier()?;
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(self.state.interner.get(part));
            if !self.eat_symbol(Symbol::Dot) {
                break;
            }
        }
        let mut flags = Vec::new();
        if self.eat_symbol(Symbol::LParen) {
            let attrs = self.expr_list_until(Symbol::RParen)?;
            for attr in attrs {
                if let ExprKind::NameRef(n) = self.state.expr(attr).kind {
                    flags.push(self.state.interner.get(n).to_owned());
                }
            }
        }
        self.expect_symbol(Symbol::Semicolon)?;
        let core = self.state.core;
        let module = &mut self.state.modules[self.module.index()];
        // attribute flags may override the default numeric types
        for flag in &flags {
            match flag.as_str() {
                "Int64" => module.default_integer_type = core.int64,
                "Int32" => module.default_integer_type = core.int32,
                "Float32" => module.default_float_type = core.float32,
                "Float64" => module.default_float_type = core.float64,
                _ => {}
            }
        }
        module.name = name;
        module.attribute_build_flags = flags;
        Ok(())
    }

    fn imports(&mut self) -> CompileResult<()> {
        loop {
            let visibility = if matches!(
                (self.peek(), self.peek_at(1)),
                (
                    Some(Token { kind: TokenKind::Keyword(Keyword::Public), .. }),
                    Some(Token { kind: TokenKind::Keyword(Keyword::Import), .. })
                )
            ) {
                self.pos += 1;
                Visibility::Public
            } else if matches!(
                (self.peek(), self.peek_at(1)),
                (
                    Some(Token { kind: TokenKind::Keyword(Keyword::Private), .. }),
                    Some(Token { kind: TokenKind::Keyword(Keyword::Import), .. })
                )
            ) {
                self.pos += 1;
                Visibility::Private
            } else {
                Visibility::Private
            };
            if !self.eat_keyword(Keyword::Import) {
                return Ok(());
            }
            let import = self.one_import(visibility)?;
            self.state.modules[self.module.index()].imports.push(import);
        }
    }

    fn one_import(&mut self, visibility: Visibility) -> CompileResult<Import> {
        let mut dotted = vec![self.identifier()?];
        loop {
            if self.eat_symbol(Symbol::Dot) {
                if self.eat_symbol(Symbol::LParen) {
                    // import a.b.(x, y as z);
                    let mut members = Vec::new();
                    loop {
                        let name = self.identifier()?;
                        let alias = if self.eat_keyword(Keyword::As) {
                            Some(self.identifier()?)
                        } else {
                            None
                        };
                        members.push((name, alias));
                        if !self.eat_symbol(Symbol::Comma) {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RParen)?;
                    self.expect_symbol(Symbol::Semicolon)?;
                    return Ok(Import::Members {
                        dotted,
                        members,
                        visibility,
                        module: None,
                    });
                }
                if self.eat_op("*") {
                    self.expect_symbol(Symbol::Semicolon)?;
                    return Ok(Import::Star {
                        dotted,
                        visibility,
                        module: None,
                    });
                }
                dotted.push(self.identifier()?);
                continue;
            }
            break;
        }
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.identifier()?)
        } else {
            None
        };
        self.expect_symbol(Symbol::Semicolon)?;
        Ok(Import::Module {
            dotted,
            alias,
            visibility,
            module: None,
        })
    }

    //
    // top-level items
    //

    fn top_level_items(&mut self, _env: Option<EnvId>) -> CompileResult<()> {
        while !self.at_end() {
            self.top_level_item()?;
        }
        Ok(())
    }

    fn push_item(&mut self, item: TopLevelRef) {
        self.state.modules[self.module.index()].items.push(item);
    }

    fn top_level_item(&mut self) -> CompileResult<()> {
        let start = self.location();

        if let Some(Token {
            kind: TokenKind::DocumentationStart,
            ..
        }) = self.peek()
        {
            return self.documentation_item();
        }

        if let Some(Token {
            kind: TokenKind::LlvmBlock(text),
            ..
        }) = self.peek().cloned()
        {
            self.pos += 1;
            let text = self.state.intern(&text);
            self.state.modules[self.module.index()].top_level_llvm = Some(text);
            return Ok(());
        }

        let visibility = if self.eat_keyword(Keyword::Public) {
            Visibility::Public
        } else if self.eat_keyword(Keyword::Private) {
            Visibility::Private
        } else {
            Visibility::Public
        };

        // optional leading `[T, ..Ts | pred]` pattern-var list
        let mut pattern_vars = Vec::new();
        let mut predicate = None;
        if self.is_symbol(Symbol::LBracket) {
            let (vars, pred) = self.pattern_var_bracket()?;
            pattern_vars = vars;
            predicate = pred;
        }

        let call_by_name = self.eat_keyword(Keyword::Callbyname);
        let is_inline = self.eat_keyword(Keyword::Inline);

        let Some(token) = self.peek().cloned() else {
            return self.parse_error("top-level item");
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::Record) => {
                self.record_decl(visibility, pattern_vars, start)
            }
            TokenKind::Keyword(Keyword::Variant) => {
                self.variant_decl(visibility, pattern_vars, start)
            }
            TokenKind::Keyword(Keyword::Instance) => {
                self.instance_decl(pattern_vars, predicate, start)
            }
            TokenKind::Keyword(Keyword::Define) => self.define_decl(visibility, start),
            TokenKind::Keyword(Keyword::Overload) => self.overload_decl(
                pattern_vars,
                predicate,
                call_by_name,
                is_inline,
                start,
            ),
            TokenKind::Keyword(Keyword::Enum) => self.enum_decl(visibility, start),
            TokenKind::Keyword(Keyword::Var) => self.global_var_decl(visibility, start),
            TokenKind::Keyword(Keyword::Alias) => self.global_alias_decl(visibility, start),
            TokenKind::Keyword(Keyword::External) => self.external_decl(visibility, start),
            TokenKind::Keyword(Keyword::Newtype) => self.newtype_decl(visibility, start),
            TokenKind::Keyword(Keyword::Staticassert) => {
                self.pos += 1;
                let (condition, message) = self.static_assert_args()?;
                self.expect_symbol(Symbol::Semicolon)?;
                self.push_item(TopLevelRef::StaticAssert { condition, message });
                Ok(())
            }
            TokenKind::Keyword(Keyword::Eval) => {
                self.pos += 1;
                let args = self.expr_list()?;
                self.expect_symbol(Symbol::Semicolon)?;
                self.push_item(TopLevelRef::Eval { args });
                Ok(())
            }
            TokenKind::Identifier(_) => self.procedure_def_sugar(
                visibility,
                pattern_vars,
                predicate,
                call_by_name,
                is_inline,
                start,
            ),
            _ => self.parse_error("top-level item"),
        }
    }

    fn documentation_item(&mut self) -> CompileResult<()> {
        let start = self.location();
        self.pos += 1; // DocumentationStart
        let mut properties = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek().cloned() {
                Some(Token {
                    kind: TokenKind::DocumentationProperty(name),
                    ..
                }) => {
                    self.pos += 1;
                    let value = match self.peek() {
                        Some(Token {
                            kind: TokenKind::DocumentationText(t),
                            ..
                        }) => {
                            let t = t.clone();
                            self.pos += 1;
                            t
                        }
                        _ => String::new(),
                    };
                    properties.push((name, value));
                }
                Some(Token {
                    kind: TokenKind::DocumentationText(t),
                    ..
                }) => {
                    self.pos += 1;
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                }
                Some(Token {
                    kind: TokenKind::DocumentationEnd,
                    ..
                }) => {
                    self.pos += 1;
                    break;
                }
                _ => return self.parse_error("documentation"),
            }
        }
        self.push_item(TopLevelRef::Documentation(Documentation {
            properties,
            text,
            location: start,
        }));
        Ok(())
    }

    /// `[T, ..Ts | predicate]`
    fn pattern_var_bracket(&mut self) -> CompileResult<(Vec<PatternVar>, Option<ExprId>)> {
        self.expect_symbol(Symbol::LBracket)?;
        let mut vars = Vec::new();
        let mut predicate = None;
        if !self.is_symbol(Symbol::RBracket) && !self.is_op("|") {
            loop {
                let location = self.location();
                let is_multi = self.eat_symbol(Symbol::DotDot);
                let name = self.identifier()?;
                vars.push(PatternVar {
                    is_multi,
                    name,
                    location,
                });
                if !self.eat_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        if self.eat_op("|") {
            predicate = Some(self.expr()?);
        }
        self.expect_symbol(Symbol::RBracket)?;
        Ok((vars, predicate))
    }

    /// Optional inline pattern-var bracket after a callable name:
    /// `overload id[T](x:T)`. Only plain names qualify; anything else is a
    /// real indexing target.
    fn inline_pattern_vars(&mut self) -> CompileResult<Option<Vec<PatternVar>>> {
        if !self.is_symbol(Symbol::LBracket) {
            return Ok(None);
        }
        // lookahead: all elements must be `name` or `..name`
        let mut i = self.pos + 1;
        loop {
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Symbol(Symbol::DotDot)) => {
                    i += 1;
                    if !matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Identifier(_))) {
                        return Ok(None);
                    }
                    i += 1;
                }
                Some(TokenKind::Identifier(_)) => i += 1,
                Some(TokenKind::Symbol(Symbol::RBracket)) if i == self.pos + 1 => break,
                _ => return Ok(None),
            }
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Symbol(Symbol::Comma)) => i += 1,
                Some(TokenKind::Symbol(Symbol::RBracket)) => break,
                Some(TokenKind::OpString(op)) if op == "|" => break,
                _ => return Ok(None),
            }
        }
        let (vars, predicate) = self.pattern_var_bracket()?;
        debug_assert!(predicate.is_none() || !vars.is_empty());
        if let Some(p) = predicate {
            // stash the predicate by returning vars and letting the caller
            // read it back from the shared slot
            self.pending_inline_predicate = Some(p);
        }
        Ok(Some(vars))
    }

    //
    // declarations
    //

    fn record_decl(
        &mut self,
        visibility: Visibility,
        leading_vars: Vec<PatternVar>,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Record)?;
        let name = self.identifier()?;
        let (params, var_param) = self.decl_params(leading_vars)?;
        let body = if self.eat_op("=") {
            let computed = self.expr_list()?;
            self.expect_symbol(Symbol::Semicolon)?;
            RecordBody::Computed(computed)
        } else {
            self.expect_symbol(Symbol::LParen)?;
            let mut fields = Vec::new();
            if !self.eat_symbol(Symbol::RParen) {
                loop {
                    let location = self.location();
                    let field_name = self.identifier()?;
                    self.expect_symbol(Symbol::Colon)?;
                    let ty = self.expr()?;
                    fields.push(RecordField {
                        name: field_name,
                        ty,
                        location,
                    });
                    if self.eat_symbol(Symbol::Comma) {
                        if self.eat_symbol(Symbol::RParen) {
                            break;
                        }
                        continue;
                    }
                    self.expect_symbol(Symbol::RParen)?;
                    break;
                }
            }
            self.expect_symbol(Symbol::Semicolon)?;
            RecordBody::Fields(fields)
        };
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::RecordId::new(self.state.records.len());
        self.state.records.push(RecordDecl {
            module: self.module,
            name,
            visibility,
            params,
            var_param,
            body,
            overloads: Vec::new(),
            env,
            location: start,
        });
        self.push_item(TopLevelRef::Record(id));
        Ok(())
    }

    /// Parameters for records/variants/globals: either carried in from a
    /// leading pattern-var bracket or inline `Name[A, ..B]`.
    fn decl_params(
        &mut self,
        leading_vars: Vec<PatternVar>,
    ) -> CompileResult<(Vec<StrId>, Option<StrId>)> {
        let mut params = Vec::new();
        let mut var_param = None;
        if !leading_vars.is_empty() {
            for v in leading_vars {
                if v.is_multi {
                    var_param = Some(v.name);
                } else {
                    params.push(v.name);
                }
            }
            return Ok((params, var_param));
        }
        if self.eat_symbol(Symbol::LBracket) {
            loop {
                if self.eat_symbol(Symbol::DotDot) {
                    var_param = Some(self.identifier()?);
                } else {
                    params.push(self.identifier()?);
                }
                if !self.eat_symbol(Symbol::Comma) {
                    break;
                }
            }
            self.expect_symbol(Symbol::RBracket)?;
        }
        Ok((params, var_param))
    }

    fn variant_decl(
        &mut self,
        visibility: Visibility,
        leading_vars: Vec<PatternVar>,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Variant)?;
        let name = self.identifier()?;
        let (params, var_param) = self.decl_params(leading_vars)?;
        let mut default_members = ExprList::new();
        if self.eat_op("=") {
            loop {
                default_members.push(self.mul_expr()?);
                if !self.eat_op("|") {
                    break;
                }
            }
        }
        self.expect_symbol(Symbol::Semicolon)?;
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::VariantId::new(self.state.variants.len());
        self.state.variants.push(VariantDecl {
            module: self.module,
            name,
            visibility,
            params,
            var_param,
            open: true,
            default_members,
            instances: Vec::new(),
            overloads: Vec::new(),
            env,
            location: start,
        });
        self.push_item(TopLevelRef::Variant(id));
        Ok(())
    }

    fn instance_decl(
        &mut self,
        pattern_vars: Vec<PatternVar>,
        predicate: Option<ExprId>,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Instance)?;
        let target_start = self.location();
        let mut target = self.atom()?;
        // indexing and dotted suffixes only; the parens open the member list
        while self.is_symbol(Symbol::LBracket) || self.is_symbol(Symbol::Dot) {
            if self.eat_symbol(Symbol::LBracket) {
                let args = self.expr_list_until(Symbol::RBracket)?;
                target = self.finish_expr(ExprKind::Indexing { expr: target, args }, target_start);
            } else {
                self.pos += 1;
                let name = self.identifier()?;
                target = self.finish_expr(ExprKind::FieldRef { expr: target, name }, target_start);
            }
        }
        self.expect_symbol(Symbol::LParen)?;
        let members = self.expr_list_until(Symbol::RParen)?;
        self.expect_symbol(Symbol::Semicolon)?;
        let env = self.state.modules[self.module.index()].env;
        for member in members {
            let id = crate::ids::InstanceId::new(self.state.instances.len());
            self.state.instances.push(InstanceDecl {
                module: self.module,
                pattern_vars: pattern_vars.clone(),
                predicate,
                target,
                member,
                env,
                location: start,
            });
            self.push_item(TopLevelRef::Instance(id));
        }
        Ok(())
    }

    fn define_decl(
        &mut self,
        visibility: Visibility,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Define)?;
        let name = self.identifier()?;
        let mut interface = None;
        if self.is_symbol(Symbol::LParen) || self.is_symbol(Symbol::LBracket) {
            // interface signature: define f(args) : rets;
            let inline_vars = self.inline_pattern_vars()?.unwrap_or_default();
            let inline_predicate = self.pending_inline_predicate.take();
            let (formal_args, var_arg) = self.formal_arg_list()?;
            let (return_specs, var_return_spec) = self.return_specs()?;
            let code = Code {
                pattern_vars: inline_vars,
                predicate: inline_predicate,
                formal_args,
                var_arg,
                return_specs,
                var_return_spec,
                body: CodeBody::None,
                location: start,
            };
            let env = self.state.modules[self.module.index()].env;
            let target = self
                .state
                .add_expr(ExprKind::NameRef(name), start);
            let id = crate::ids::OverloadId::new(self.state.overloads.len());
            self.state.overloads.push(OverloadDecl {
                module: self.module,
                target,
                code,
                call_by_name: false,
                is_inline: false,
                env,
                patterns: OverloadPatterns::NotInitialized,
                location: start,
            });
            interface = Some(id);
        }
        self.expect_symbol(Symbol::Semicolon)?;
        let id = crate::ids::ProcId::new(self.state.procedures.len());
        self.state.procedures.push(ProcedureDecl {
            module: self.module,
            name,
            visibility,
            overloads: Vec::new(),
            interface,
            location: start,
        });
        self.push_item(TopLevelRef::Procedure(id));
        Ok(())
    }

    fn overload_decl(
        &mut self,
        mut pattern_vars: Vec<PatternVar>,
        mut predicate: Option<ExprId>,
        call_by_name: bool,
        is_inline: bool,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Overload)?;
        let target_start = self.location();
        let mut target = self.atom()?;
        // inline pattern vars: `overload id[T](x:T)`
        if pattern_vars.is_empty() {
            if let Some(vars) = self.inline_pattern_vars()? {
                pattern_vars = vars;
                if predicate.is_none() {
                    predicate = self.pending_inline_predicate.take();
                }
            }
        }
        // remaining suffixes (e.g. a genuinely indexed target) still apply
        while self.is_symbol(Symbol::LBracket) || self.is_symbol(Symbol::Dot) {
            if self.eat_symbol(Symbol::LBracket) {
                let args = self.expr_list_until(Symbol::RBracket)?;
                target = self.finish_expr(ExprKind::Indexing { expr: target, args }, target_start);
            } else {
                self.pos += 1;
                let name = self.identifier()?;
                target = self.finish_expr(ExprKind::FieldRef { expr: target, name }, target_start);
            }
        }
        let code = self.code_tail(pattern_vars, predicate, start)?;
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::OverloadId::new(self.state.overloads.len());
        self.state.overloads.push(OverloadDecl {
            module: self.module,
            target,
            code,
            call_by_name,
            is_inline,
            env,
            patterns: OverloadPatterns::NotInitialized,
            location: start,
        });
        self.push_item(TopLevelRef::Overload(id));
        Ok(())
    }

    /// `name[T](args) : rets body`: procedure definition sugar creating a
    /// procedure plus its single overload.
    fn procedure_def_sugar(
        &mut self,
        visibility: Visibility,
        mut pattern_vars: Vec<PatternVar>,
        mut predicate: Option<ExprId>,
        call_by_name: bool,
        is_inline: bool,
        start: Option<Location>,
    ) -> CompileResult<()> {
        let name = self.identifier()?;
        if pattern_vars.is_empty() {
            if let Some(vars) = self.inline_pattern_vars()? {
                pattern_vars = vars;
                if predicate.is_none() {
                    predicate = self.pending_inline_predicate.take();
                }
            }
        }
        if !self.is_symbol(Symbol::LParen) {
            return self.parse_error("'(' in procedure definition");
        }
        let code = self.code_tail(pattern_vars, predicate, start)?;
        let env = self.state.modules[self.module.index()].env;
        let proc_id = crate::ids::ProcId::new(self.state.procedures.len());
        self.state.procedures.push(ProcedureDecl {
            module: self.module,
            name,
            visibility,
            overloads: Vec::new(),
            interface: None,
            location: start,
        });
        let target = self.state.add_expr(ExprKind::NameRef(name), start);
        let overload_id = crate::ids::OverloadId::new(self.state.overloads.len());
        self.state.overloads.push(OverloadDecl {
            module: self.module,
            target,
            code,
            call_by_name,
            is_inline,
            env,
            patterns: OverloadPatterns::NotInitialized,
            location: start,
        });
        self.push_item(TopLevelRef::Procedure(proc_id));
        self.push_item(TopLevelRef::Overload(overload_id));
        Ok(())
    }

    /// Formal args, return specs, and body (`{ ... }`, `= expr;`, or an
    /// `__llvm__` block).
    fn code_tail(
        &mut self,
        pattern_vars: Vec<PatternVar>,
        predicate: Option<ExprId>,
        start: Option<Location>,
    ) -> CompileResult<Code> {
        let (formal_args, var_arg) = self.formal_arg_list()?;
        let (return_specs, var_return_spec) = self.return_specs()?;
        let body = if self.eat_op("=") {
            let value = self.expr()?;
            self.expect_symbol(Symbol::Semicolon)?;
            let location = self.state.expr_location(value);
            let ret = self.state.add_stmt(
                StmtKind::Return {
                    kind: ReturnKind::Value,
                    values: smallvec![value],
                    is_expr_return: true,
                },
                location,
            );
            CodeBody::Statements(self.state.add_stmt(StmtKind::Block(vec![ret]), location))
        } else if let Some(Token {
            kind: TokenKind::LlvmBlock(text),
            ..
        }) = self.peek().cloned()
        {
            self.pos += 1;
            let text = self.state.intern(&text);
            CodeBody::Llvm(text)
        } else if self.is_symbol(Symbol::LBrace) {
            CodeBody::Statements(self.block()?)
        } else {
            self.expect_symbol(Symbol::Semicolon)?;
            CodeBody::None
        };
        Ok(Code {
            pattern_vars,
            predicate,
            formal_args,
            var_arg,
            return_specs,
            var_return_spec,
            body,
            location: start,
        })
    }

    fn formal_arg_list(&mut self) -> CompileResult<(Vec<FormalArg>, Option<FormalArg>)> {
        self.expect_symbol(Symbol::LParen)?;
        let mut args = Vec::new();
        let mut var_arg = None;
        if self.eat_symbol(Symbol::RParen) {
            return Ok((args, var_arg));
        }
        loop {
            let location = self.location();
            let tempness = if self.eat_keyword(Keyword::Ref) {
                Tempness::Lvalue
            } else if self.eat_keyword(Keyword::Rvalue) {
                Tempness::Rvalue
            } else if self.eat_keyword(Keyword::Forward) {
                Tempness::Forward
            } else {
                Tempness::DontCare
            };
            let variadic = self.eat_symbol(Symbol::DotDot);
            let name = self.identifier()?;
            let ty = if self.eat_symbol(Symbol::Colon) {
                Some(self.mul_expr()?)
            } else {
                None
            };
            let as_type = if self.eat_keyword(Keyword::As) {
                Some(self.expr()?)
            } else {
                None
            };
            let arg = FormalArg {
                name,
                ty,
                tempness,
                as_type,
                location,
            };
            if variadic {
                if var_arg.is_some() {
                    return self.parse_error("at most one variadic argument");
                }
                var_arg = Some(arg);
            } else {
                if var_arg.is_some() {
                    return self.parse_error("no fixed arguments after the variadic argument");
                }
                args.push(arg);
            }
            if self.eat_symbol(Symbol::Comma) {
                continue;
            }
            self.expect_symbol(Symbol::RParen)?;
            return Ok((args, var_arg));
        }
    }

    /// Optional `: T1, name:T2, ..Ts` return specifications.
    fn return_specs(&mut self) -> CompileResult<(Vec<ReturnSpec>, Option<ReturnSpec>)> {
        let mut specs = Vec::new();
        let mut var_spec = None;
        if !self.eat_symbol(Symbol::Colon) {
            return Ok((specs, var_spec));
        }
        loop {
            let variadic = self.eat_symbol(Symbol::DotDot);
            // `name : Type` names the return value
            let name = if matches!(
                (self.peek(), self.peek_at(1)),
                (
                    Some(Token { kind: TokenKind::Identifier(_), .. }),
                    Some(Token { kind: TokenKind::Symbol(Symbol::Colon), .. })
                )
            ) {
                let n = self.identifier()?;
                self.pos += 1; // colon
                Some(n)
            } else {
                None
            };
            let ty = self.mul_expr()?;
            let spec = ReturnSpec { ty, name };
            if variadic {
                var_spec = Some(spec);
            } else {
                specs.push(spec);
            }
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        Ok((specs, var_spec))
    }

    fn enum_decl(&mut self, visibility: Visibility, start: Option<Location>) -> CompileResult<()> {
        self.expect_keyword(Keyword::Enum)?;
        let name = self.identifier()?;
        self.expect_symbol(Symbol::LParen)?;
        let mut members = Vec::new();
        loop {
            members.push(self.identifier()?);
            if self.eat_symbol(Symbol::Comma) {
                if self.eat_symbol(Symbol::RParen) {
                    break;
                }
                continue;
            }
            self.expect_symbol(Symbol::RParen)?;
            break;
        }
        self.expect_symbol(Symbol::Semicolon)?;
        let id = crate::ids::EnumId::new(self.state.enums.len());
        self.state.enums.push(EnumDecl {
            module: self.module,
            name,
            visibility,
            members,
            location: start,
        });
        self.push_item(TopLevelRef::Enum(id));
        Ok(())
    }

    fn global_var_decl(
        &mut self,
        visibility: Visibility,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Var)?;
        let name = self.identifier()?;
        let (params, var_param) = self.decl_params(Vec::new())?;
        self.expect_op("=")?;
        let expr = self.expr()?;
        self.expect_symbol(Symbol::Semicolon)?;
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::GlobalId::new(self.state.global_vars.len());
        self.state.global_vars.push(GlobalVarDecl {
            module: self.module,
            name,
            visibility,
            params,
            var_param,
            expr,
            env,
            instances: Vec::new(),
            location: start,
        });
        self.push_item(TopLevelRef::GlobalVar(id));
        Ok(())
    }

    fn global_alias_decl(
        &mut self,
        visibility: Visibility,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Alias)?;
        let name = self.identifier()?;
        let (params, var_param) = self.decl_params(Vec::new())?;
        self.expect_op("=")?;
        let expr = self.expr()?;
        self.expect_symbol(Symbol::Semicolon)?;
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::AliasId::new(self.state.global_aliases.len());
        self.state.global_aliases.push(GlobalAliasDecl {
            module: self.module,
            name,
            visibility,
            params,
            var_param,
            expr,
            env,
            overloads: Vec::new(),
            location: start,
        });
        self.push_item(TopLevelRef::GlobalAlias(id));
        Ok(())
    }

    fn external_decl(
        &mut self,
        visibility: Visibility,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::External)?;
        if self.eat_keyword(Keyword::Var) {
            let name = self.identifier()?;
            self.expect_symbol(Symbol::Colon)?;
            let ty = self.expr()?;
            self.expect_symbol(Symbol::Semicolon)?;
            let env = self.state.modules[self.module.index()].env;
            let id = crate::ids::ExternalVarId::new(self.state.external_vars.len());
            self.state.external_vars.push(ExternalVarDecl {
                module: self.module,
                name,
                visibility,
                ty,
                attributes: ExprList::new(),
                env,
                resolved: None,
                location: start,
            });
            self.push_item(TopLevelRef::ExternalVar(id));
            return Ok(());
        }
        // optional attribute list: external (stdcall) f(...)
        let mut attributes = ExprList::new();
        if self.is_symbol(Symbol::LParen)
            && matches!(
                self.peek_at(2),
                Some(Token { kind: TokenKind::Symbol(Symbol::RParen), .. })
            )
            && matches!(
                self.peek_at(3),
                Some(Token { kind: TokenKind::Identifier(_), .. })
            )
        {
            self.pos += 1;
            attributes = self.expr_list_until(Symbol::RParen)?;
        }
        let name = self.identifier()?;
        self.expect_symbol(Symbol::LParen)?;
        let mut args = Vec::new();
        let mut has_var_args = false;
        if !self.eat_symbol(Symbol::RParen) {
            loop {
                if self.eat_symbol(Symbol::DotDot) {
                    has_var_args = true;
                    self.expect_symbol(Symbol::RParen)?;
                    break;
                }
                let arg_name = self.identifier()?;
                self.expect_symbol(Symbol::Colon)?;
                let ty = self.expr()?;
                args.push(ExternalArg {
                    name: arg_name,
                    ty,
                    resolved: None,
                });
                if self.eat_symbol(Symbol::Comma) {
                    continue;
                }
                self.expect_symbol(Symbol::RParen)?;
                break;
            }
        }
        let return_type = if self.eat_symbol(Symbol::Colon) {
            Some(self.expr()?)
        } else {
            None
        };
        let body = if self.is_symbol(Symbol::LBrace) {
            Some(self.block()?)
        } else {
            self.expect_symbol(Symbol::Semicolon)?;
            None
        };
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::ExternalProcId::new(self.state.external_procs.len());
        self.state.external_procs.push(ExternalProcDecl {
            module: self.module,
            name,
            visibility,
            args,
            has_var_args,
            return_type,
            body,
            attributes,
            env,
            info: None,
            location: start,
        });
        self.push_item(TopLevelRef::ExternalProc(id));
        Ok(())
    }

    fn newtype_decl(
        &mut self,
        visibility: Visibility,
        start: Option<Location>,
    ) -> CompileResult<()> {
        self.expect_keyword(Keyword::Newtype)?;
        let name = self.identifier()?;
        self.expect_op("=")?;
        let expr = self.expr()?;
        self.expect_symbol(Symbol::Semicolon)?;
        let env = self.state.modules[self.module.index()].env;
        let id = crate::ids::NewTypeId::new(self.state.newtypes.len());
        self.state.newtypes.push(NewTypeDecl {
            module: self.module,
            name,
            visibility,
            expr,
            env,
            base: None,
            location: start,
        });
        self.push_item(TopLevelRef::NewType(id));
        Ok(())
    }
}

fn parse_index(digits: &str) -> Option<u64> {
    if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(&hex.replace('_', ""), 16).ok()
    } else {
        digits.replace('_', "").parse().ok()
    }
}
