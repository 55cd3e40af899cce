//! The lexer: byte stream to token stream.
//!
//! A backtracking scanner: each token class is attempted in a fixed order
//! and rolls the cursor back on failure. The scanner records the furthest
//! byte it ever looked at, so when no class matches, the diagnostic points
//! at the exact offset that killed the longest attempt.
//!
//! Whitespace and comment tokens are recognized and discarded here;
//! documentation comments (`///`, `/** */`) instead expand into the
//! start/property/text/end token quartet consumed by the parser.

use crate::error::{CompileResult, Diagnostic, DiagnosticKind};
use crate::source::{Location, SourceId};
use crate::token::{Keyword, Symbol, Token, TokenKind};

/// Tokenizes a whole buffer. Space and comments are dropped.
pub fn tokenize(source: SourceId, data: &[u8]) -> CompileResult<Vec<Token>> {
    tokenize_range(source, data, 0, data.len())
}

/// Tokenizes `data[offset..offset+length]`, attributing locations relative
/// to the whole buffer. Used by `eval` re-parsing and the interactive entry.
pub fn tokenize_range(
    source: SourceId,
    data: &[u8],
    offset: usize,
    length: usize,
) -> CompileResult<Vec<Token>> {
    let mut lexer = Lexer {
        data: &data[offset..offset + length],
        pos: 0,
        max_pos: 0,
        base: offset,
        source,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

const OP_CHARS: &[u8] = b"<>+-*/\\%=~|!&";

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\x0b')
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'?'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'?'
}

struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
    max_pos: usize,
    base: usize,
    source: SourceId,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn run(&mut self) -> CompileResult<()> {
        while self.pos < self.data.len() {
            let start = self.pos;
            if self.next_token()? {
                debug_assert!(self.pos > start, "lexer must consume input");
            } else {
                let location = Location::new(self.source, self.base + self.max_pos);
                let byte = self.data.get(self.max_pos).copied();
                let message = match byte {
                    Some(b) if b.is_ascii_graphic() => {
                        format!("invalid token at '{}'", char::from(b))
                    }
                    Some(b) => format!("invalid token at byte 0x{b:02x}"),
                    None => "unterminated token at end of input".to_owned(),
                };
                return Err(Diagnostic::new(
                    DiagnosticKind::Lex { message },
                    Some(location),
                ));
            }
        }
        Ok(())
    }

    /// Tries every token class at the current position; pushes zero or more
    /// tokens and returns whether anything matched.
    fn next_token(&mut self) -> CompileResult<bool> {
        let start = self.pos;
        if self.space() {
            return Ok(true);
        }
        self.restore(start);
        if self.documentation()? {
            return Ok(true);
        }
        self.restore(start);
        if self.line_comment() || {
            self.restore(start);
            self.block_comment()
        } {
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.static_index() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.op_identifier() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.llvm_block() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.symbol() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.op_string() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.keyword_or_identifier() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.char_literal() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.string_literal() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.float_literal() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        if let Some(kind) = self.int_literal() {
            self.push(kind, start);
            return Ok(true);
        }
        self.restore(start);
        Ok(false)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            location: Location::new(self.source, self.base + start),
            end_offset: u32::try_from(self.base + self.pos).unwrap_or(u32::MAX),
        });
    }

    fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn next(&mut self) -> Option<u8> {
        if self.pos >= self.data.len() {
            return None;
        }
        if self.pos >= self.max_pos {
            self.max_pos = self.pos;
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Some(b)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.next();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        for &b in s.as_bytes() {
            if !self.eat(b) {
                return false;
            }
        }
        true
    }

    // space and comments

    fn space(&mut self) -> bool {
        let mut any = false;
        while let Some(b) = self.peek() {
            if is_space(b) {
                self.next();
                any = true;
            } else {
                break;
            }
        }
        any
    }

    fn line_comment(&mut self) -> bool {
        if !self.eat_str("//") {
            return false;
        }
        while let Some(b) = self.peek() {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.next();
        }
        true
    }

    fn block_comment(&mut self) -> bool {
        if !self.eat_str("/*") {
            return false;
        }
        let mut last_was_star = false;
        while let Some(b) = self.next() {
            if last_was_star && b == b'/' {
                return true;
            }
            last_was_star = b == b'*';
        }
        // unterminated comment runs to end of input
        true
    }

    // documentation

    fn documentation(&mut self) -> CompileResult<bool> {
        let start = self.pos;
        if self.eat_str("///") {
            let text_start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'\n' || b == b'\r' {
                    break;
                }
                self.next();
            }
            let text = String::from_utf8_lossy(&self.data[text_start..self.pos]).into_owned();
            self.push(TokenKind::DocumentationStart, start);
            self.doc_body(&text, text_start);
            self.push(TokenKind::DocumentationEnd, self.pos);
            return Ok(true);
        }
        self.restore(start);
        if self.eat_str("/**") && self.peek() != Some(b'/') {
            let text_start = self.pos;
            let mut last_was_star = false;
            loop {
                match self.next() {
                    Some(b'/') if last_was_star => break,
                    Some(b) => last_was_star = b == b'*',
                    None => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lex {
                                message: "unterminated documentation block".to_owned(),
                            },
                            Some(Location::new(self.source, self.base + start)),
                        ));
                    }
                }
            }
            let text =
                String::from_utf8_lossy(&self.data[text_start..self.pos - 2]).into_owned();
            self.push(TokenKind::DocumentationStart, start);
            self.doc_body(&text, text_start);
            self.push(TokenKind::DocumentationEnd, self.pos);
            return Ok(true);
        }
        self.restore(start);
        Ok(false)
    }

    /// Splits documentation text into property tags and free text runs.
    fn doc_body(&mut self, text: &str, offset: usize) {
        let mut rest = text;
        let mut at = offset;
        loop {
            match rest.find('@') {
                None => {
                    if !rest.trim().is_empty() {
                        self.push(TokenKind::DocumentationText(rest.trim().to_owned()), at);
                    }
                    return;
                }
                Some(i) => {
                    let (before, after) = rest.split_at(i);
                    if !before.trim().is_empty() {
                        self.push(TokenKind::DocumentationText(before.trim().to_owned()), at);
                    }
                    let after = &after[1..];
                    let name_len = after
                        .bytes()
                        .take_while(|b| b.is_ascii_alphanumeric())
                        .count();
                    let (name, tail) = after.split_at(name_len);
                    self.push(
                        TokenKind::DocumentationProperty(name.to_owned()),
                        at + i,
                    );
                    at += i + 1 + name_len;
                    rest = tail;
                }
            }
        }
    }

    // identifiers and keywords

    fn keyword_or_identifier(&mut self) -> Option<TokenKind> {
        let b = self.next()?;
        if !is_ident_start(b) {
            return None;
        }
        let start = self.pos - 1;
        while let Some(b) = self.peek() {
            if is_ident_continue(b) {
                self.next();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.data[start..self.pos]).ok()?;
        if let Ok(kw) = text.parse::<Keyword>() {
            // keyword lookup is case-sensitive
            if <&'static str>::from(kw) == text {
                return Some(TokenKind::Keyword(kw));
            }
        }
        Some(TokenKind::Identifier(text.to_owned()))
    }

    // symbols and operators

    fn symbol(&mut self) -> Option<TokenKind> {
        let start = self.pos;
        for &(text, sym) in Symbol::ALL {
            self.restore(start);
            if self.eat_str(text) {
                return Some(TokenKind::Symbol(sym));
            }
        }
        None
    }

    fn op_chars(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if OP_CHARS.contains(&b) {
                self.next();
            } else {
                break;
            }
        }
        if self.pos == start {
            return None;
        }
        Some(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
    }

    fn op_string(&mut self) -> Option<TokenKind> {
        self.op_chars().map(TokenKind::OpString)
    }

    /// `(+)` lexes as the identifier `+`, letting operators be defined and
    /// passed by name.
    fn op_identifier(&mut self) -> Option<TokenKind> {
        if !self.eat(b'(') {
            return None;
        }
        let op = self.op_chars()?;
        if !self.eat(b')') {
            return None;
        }
        Some(TokenKind::Identifier(op))
    }

    // characters and strings

    fn hex_digit(&mut self) -> Option<u8> {
        match self.next()? {
            b @ b'0'..=b'9' => Some(b - b'0'),
            b @ b'a'..=b'f' => Some(b - b'a' + 10),
            b @ b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    fn escape_char(&mut self) -> Option<char> {
        if !self.eat(b'\\') {
            return None;
        }
        match self.next()? {
            b'n' => Some('\n'),
            b'r' => Some('\r'),
            b't' => Some('\t'),
            b'f' => Some('\x0c'),
            b'\\' => Some('\\'),
            b'\'' => Some('\''),
            b'"' => Some('"'),
            b'$' => Some('$'),
            b'0' => Some('\0'),
            b'x' => {
                let hi = self.hex_digit()?;
                let lo = self.hex_digit()?;
                Some(char::from(hi * 16 + lo))
            }
            _ => None,
        }
    }

    fn one_char(&mut self) -> Option<char> {
        let start = self.pos;
        if let Some(c) = self.escape_char() {
            return Some(c);
        }
        self.restore(start);
        let b = self.next()?;
        if b == b'\\' {
            return None;
        }
        Some(char::from(b))
    }

    fn char_literal(&mut self) -> Option<TokenKind> {
        if !self.eat(b'\'') {
            return None;
        }
        if self.peek() == Some(b'\'') {
            return None;
        }
        let c = self.one_char()?;
        if !self.eat(b'\'') {
            return None;
        }
        Some(TokenKind::CharLiteral(c))
    }

    fn string_literal(&mut self) -> Option<TokenKind> {
        let start = self.pos;
        if !self.eat(b'"') {
            return None;
        }
        if self.eat(b'"') && self.eat(b'"') {
            return self.triple_string();
        }
        self.restore(start + 1);
        let mut value = String::new();
        loop {
            if self.eat(b'"') {
                return Some(TokenKind::StringLiteral(value));
            }
            value.push(self.one_char()?);
        }
    }

    /// Triple-quoted strings run until `"""`; a fourth quote sticks with the
    /// body, so `""""` terminates with one literal quote included.
    fn triple_string(&mut self) -> Option<TokenKind> {
        let mut value = String::new();
        loop {
            let here = self.pos;
            if self.eat(b'"') && self.eat(b'"') && self.eat(b'"') {
                let after = self.pos;
                if self.eat(b'"') {
                    self.restore(after);
                } else {
                    return Some(TokenKind::StringLiteral(value));
                }
            }
            self.restore(here);
            value.push(self.one_char()?);
        }
    }

    // numbers

    fn decimal_digits(&mut self) {
        loop {
            self.eat(b'_');
            match self.peek() {
                Some(b) if b.is_ascii_digit() => {
                    self.next();
                }
                _ => break,
            }
        }
    }

    fn hex_digits(&mut self) {
        loop {
            self.eat(b'_');
            match self.peek() {
                Some(b) if b.is_ascii_hexdigit() => {
                    self.next();
                }
                _ => break,
            }
        }
    }

    fn hex_int(&mut self) -> bool {
        if !self.eat_str("0x") {
            return false;
        }
        match self.peek() {
            Some(b) if b.is_ascii_hexdigit() => {
                self.next();
                self.hex_digits();
                true
            }
            _ => false,
        }
    }

    fn decimal_int(&mut self) -> bool {
        match self.peek() {
            Some(b) if b.is_ascii_digit() => {
                self.next();
                self.decimal_digits();
                true
            }
            _ => false,
        }
    }

    fn int_literal(&mut self) -> Option<TokenKind> {
        let start = self.pos;
        if self.hex_int() || {
            self.restore(start);
            self.decimal_int()
        } {
            let text = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
            return Some(TokenKind::IntLiteral(text));
        }
        None
    }

    fn exponent_part(&mut self) -> bool {
        match self.peek() {
            Some(b'e' | b'E') => {
                self.next();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.next();
                }
                self.decimal_int()
            }
            _ => false,
        }
    }

    fn hex_exponent_part(&mut self) -> bool {
        match self.peek() {
            Some(b'p' | b'P') => {
                self.next();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.next();
                }
                self.decimal_int()
            }
            _ => false,
        }
    }

    fn float_literal(&mut self) -> Option<TokenKind> {
        let start = self.pos;
        if self.hex_int() {
            // hex floats require a binary exponent
            let after_int = self.pos;
            if self.eat(b'.') {
                self.hex_digits();
                if !self.hex_exponent_part() {
                    return None;
                }
            } else {
                self.restore(after_int);
                if !self.hex_exponent_part() {
                    return None;
                }
            }
            let text = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
            return Some(TokenKind::FloatLiteral(text));
        }
        self.restore(start);
        if !self.decimal_int() {
            return None;
        }
        let after_int = self.pos;
        if self.eat(b'.') {
            if !matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                // `x.y` field refs and `x.0` static indexes own the dot
                return None;
            }
            self.decimal_digits();
            let after_fraction = self.pos;
            if !self.exponent_part() {
                self.restore(after_fraction);
            }
        } else {
            self.restore(after_int);
            if !self.exponent_part() {
                return None;
            }
        }
        let text = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        Some(TokenKind::FloatLiteral(text))
    }

    // static index

    fn static_index(&mut self) -> Option<TokenKind> {
        if !self.eat(b'.') {
            return None;
        }
        let start = self.pos;
        if self.hex_int() || {
            self.restore(start);
            self.decimal_int()
        } {
            let text = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
            return Some(TokenKind::StaticIndex(text));
        }
        None
    }

    // inline llvm

    /// `__llvm__ { ... }` with brace nesting, `;` line comments, and string
    /// literals tracked so stray braces inside them don't end the block.
    fn llvm_block(&mut self) -> Option<TokenKind> {
        if !self.eat_str("__llvm__") {
            return None;
        }
        self.space();
        let body_start = self.pos;
        if !self.llvm_braces() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.data[body_start..self.pos]).into_owned();
        Some(TokenKind::LlvmBlock(text))
    }

    fn llvm_braces(&mut self) -> bool {
        if !self.eat(b'{') {
            return false;
        }
        loop {
            let start = self.pos;
            if !self.llvm_body_item() {
                self.restore(start);
                break;
            }
        }
        self.eat(b'}')
    }

    fn llvm_body_item(&mut self) -> bool {
        let start = self.pos;
        if self.eat(b';') {
            while let Some(b) = self.next() {
                if b == b'\n' {
                    break;
                }
            }
            return true;
        }
        self.restore(start);
        if self.llvm_braces() {
            return true;
        }
        self.restore(start);
        if self.eat(b'"') {
            loop {
                match self.next() {
                    Some(b'\\') => {
                        self.next();
                    }
                    Some(b'"') => return true,
                    Some(_) => {}
                    None => return false,
                }
            }
        }
        self.restore(start);
        matches!(self.next(), Some(b) if b != b'}')
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::SourceMap;

    fn lex(text: &str) -> Vec<TokenKind> {
        let mut sources = SourceMap::default();
        let id = sources.add("test.clay", text.as_bytes().to_vec());
        tokenize(id, text.as_bytes())
            .expect("lex failure")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            lex("define size?"),
            vec![
                TokenKind::Keyword(Keyword::Define),
                TokenKind::Identifier("size?".to_owned()),
            ]
        );
    }

    #[test]
    fn operator_identifier() {
        assert_eq!(lex("(+)"), vec![TokenKind::Identifier("+".to_owned())]);
        assert_eq!(
            lex("(==)"),
            vec![TokenKind::Identifier("==".to_owned())]
        );
    }

    #[test]
    fn op_strings_are_maximal() {
        assert_eq!(
            lex("a <= b"),
            vec![
                TokenKind::Identifier("a".to_owned()),
                TokenKind::OpString("<=".to_owned()),
                TokenKind::Identifier("b".to_owned()),
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            lex("12 0xff 1_000 3.5 2e10 0x1p4"),
            vec![
                TokenKind::IntLiteral("12".to_owned()),
                TokenKind::IntLiteral("0xff".to_owned()),
                TokenKind::IntLiteral("1_000".to_owned()),
                TokenKind::FloatLiteral("3.5".to_owned()),
                TokenKind::FloatLiteral("2e10".to_owned()),
                TokenKind::FloatLiteral("0x1p4".to_owned()),
            ]
        );
    }

    #[test]
    fn literal_suffix_is_adjacent_identifier() {
        let mut sources = SourceMap::default();
        let id = sources.add("t.clay", b"4u8".to_vec());
        let tokens = tokenize(id, b"4u8").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::IntLiteral("4".to_owned()));
        assert_eq!(tokens[0].end_offset, 1);
        assert_eq!(tokens[1].kind, TokenKind::Identifier("u8".to_owned()));
        assert_eq!(tokens[1].location.offset, 1);
    }

    #[test]
    fn static_index_token() {
        assert_eq!(
            lex("t.12"),
            vec![
                TokenKind::Identifier("t".to_owned()),
                TokenKind::StaticIndex("12".to_owned()),
            ]
        );
        // `..` is a symbol, not a static index
        assert_eq!(lex(".."), vec![TokenKind::Symbol(Symbol::DotDot)]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex(r#""a\n\x41\$""#),
            vec![TokenKind::StringLiteral("a\nA$".to_owned())]
        );
        assert_eq!(lex("'x'"), vec![TokenKind::CharLiteral('x')]);
        assert_eq!(lex(r"'\0'"), vec![TokenKind::CharLiteral('\0')]);
    }

    #[test]
    fn triple_quoted_string() {
        assert_eq!(
            lex("\"\"\"two\nlines\"\"\""),
            vec![TokenKind::StringLiteral("two\nlines".to_owned())]
        );
    }

    #[test]
    fn llvm_block_balances_braces() {
        let kinds = lex("__llvm__ { ret i32 0 ; has } in comment\n { \"}\" } }");
        assert_eq!(kinds.len(), 1);
        match &kinds[0] {
            TokenKind::LlvmBlock(body) => {
                assert!(body.starts_with('{') && body.ends_with('}'));
            }
            other => panic!("expected llvm block, got {other:?}"),
        }
    }

    #[test]
    fn comments_are_discarded() {
        assert_eq!(
            lex("a // trailing\n/* block */ b"),
            vec![
                TokenKind::Identifier("a".to_owned()),
                TokenKind::Identifier("b".to_owned()),
            ]
        );
    }

    #[test]
    fn documentation_tokens() {
        let kinds = lex("/// @section Intro some text\nvar");
        assert_eq!(kinds[0], TokenKind::DocumentationStart);
        assert_eq!(
            kinds[1],
            TokenKind::DocumentationProperty("section".to_owned())
        );
        assert_eq!(
            kinds[2],
            TokenKind::DocumentationText("Intro some text".to_owned())
        );
        assert_eq!(kinds[3], TokenKind::DocumentationEnd);
        assert_eq!(kinds[4], TokenKind::Keyword(Keyword::Var));
    }

    #[test]
    fn error_reports_exact_offset() {
        let mut sources = SourceMap::default();
        let id = sources.add("t.clay", b"abc $def".to_vec());
        let err = tokenize(id, b"abc $def").unwrap_err();
        assert_eq!(err.location.unwrap().offset, 4);
        assert_eq!(err.kind_name(), "Lex");
    }

    #[test]
    fn round_trip_is_whitespace_insensitive() {
        // re-serializing the token stream and lexing again yields the same
        // kinds, independent of the original spacing and comments
        let original = "record R (x:Int32); // c\nvar g = R(0x10);";
        let first = lex(original);
        let mut rendered = String::new();
        for kind in &first {
            match kind {
                TokenKind::Symbol(s) => rendered.push_str(&format!(" {s} ")),
                TokenKind::Keyword(k) => rendered.push_str(&format!(" {k} ")),
                TokenKind::Identifier(s) => rendered.push_str(&format!(" {s} ")),
                TokenKind::IntLiteral(s) => rendered.push_str(&format!(" {s} ")),
                other => panic!("unexpected token in fixture: {other:?}"),
            }
        }
        assert_eq!(lex(&rendered), first);
    }
}
