//! Token definitions shared by the lexer and parser.

use strum::{Display, EnumString, IntoStaticStr};

use crate::source::Location;

/// Punctuation with dedicated meaning in the grammar.
///
/// Multi-character symbols are tried before their prefixes, so `..` never
/// lexes as two dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    DotDot,
    ColonColon,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Semicolon,
    Comma,
    Dot,
    Hash,
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = Symbol::ALL
            .iter()
            .find(|(_, sym)| sym == self)
            .map(|(s, _)| *s)
            .unwrap_or("");
        f.write_str(s)
    }
}

impl Symbol {
    /// All symbols in match order (longest first).
    pub const ALL: &'static [(&'static str, Symbol)] = &[
        ("..", Symbol::DotDot),
        ("::", Symbol::ColonColon),
        ("^", Symbol::Caret),
        ("(", Symbol::LParen),
        (")", Symbol::RParen),
        ("[", Symbol::LBracket),
        ("]", Symbol::RBracket),
        ("{", Symbol::LBrace),
        ("}", Symbol::RBrace),
        (":", Symbol::Colon),
        (";", Symbol::Semicolon),
        (",", Symbol::Comma),
        (".", Symbol::Dot),
        ("#", Symbol::Hash),
    ];
}

/// Reserved words. An identifier that spells one of these lexes as a
/// keyword token instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    Public,
    Private,
    Import,
    Module,
    As,
    Record,
    Variant,
    Instance,
    Define,
    Overload,
    External,
    Alias,
    Newtype,
    Rvalue,
    Ref,
    Forward,
    Inline,
    Callbyname,
    Enum,
    Var,
    And,
    Or,
    Not,
    If,
    Else,
    Goto,
    Return,
    While,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    For,
    In,
    True,
    False,
    Try,
    Catch,
    Throw,
    Finally,
    Onerror,
    Eval,
    Staticassert,
    Unreachable,
    #[strum(serialize = "__FILE__")]
    File,
    #[strum(serialize = "__LINE__")]
    Line,
    #[strum(serialize = "__COLUMN__")]
    Column,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Symbol(Symbol),
    Keyword(Keyword),
    /// Plain identifiers and operator identifiers like `(+)`.
    Identifier(String),
    /// A maximal run of operator characters.
    OpString(String),
    StringLiteral(String),
    CharLiteral(char),
    /// Raw literal text including any sign folded in by the parser.
    IntLiteral(String),
    FloatLiteral(String),
    /// The digits of a `.N` static index (decimal or `0x` hex).
    StaticIndex(String),
    /// The brace-delimited body of an `__llvm__ { ... }` block, braces
    /// included.
    LlvmBlock(String),
    DocumentationStart,
    /// An `@name` property tag inside a documentation block.
    DocumentationProperty(String),
    /// A run of free documentation text.
    DocumentationText(String),
    DocumentationEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
    /// Byte offset one past the token, used for literal-suffix adjacency.
    pub end_offset: u32,
}

impl Token {
    /// A short rendering for "found ..." parse errors.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Symbol(s) => format!("'{s}'"),
            TokenKind::Keyword(k) => format!("'{k}'"),
            TokenKind::Identifier(s) => format!("identifier '{s}'"),
            TokenKind::OpString(s) => format!("operator '{s}'"),
            TokenKind::StringLiteral(_) => "string literal".to_owned(),
            TokenKind::CharLiteral(_) => "char literal".to_owned(),
            TokenKind::IntLiteral(s) => format!("integer literal '{s}'"),
            TokenKind::FloatLiteral(s) => format!("float literal '{s}'"),
            TokenKind::StaticIndex(s) => format!("static index '.{s}'"),
            TokenKind::LlvmBlock(_) => "inline llvm block".to_owned(),
            TokenKind::DocumentationStart
            | TokenKind::DocumentationProperty(_)
            | TokenKind::DocumentationText(_)
            | TokenKind::DocumentationEnd => "documentation".to_owned(),
        }
    }
}
