//! Lossless lexer and parser.
//!
//! The lexer assigns every source byte to exactly one token — whitespace,
//! newlines, and comments are ordinary tokens — so the parsed tree covers the
//! input bit for bit: `span(root) == len(source)`. The parser is a
//! recursive-descent front end with precedence climbing for expressions,
//! covering a practical subset of the surface syntax: literals, strings and
//! cmdstrings, all operator precedence classes, dotted operators, calls,
//! indexing, field access, array literals and generators, macro calls, and
//! the block keywords (`module`, `struct`, `function`, `if`, `for`, `while`,
//! `begin`, `let`, `return`).
//!
//! Anything outside the subset is lexed leniently into `Error` leaves; the
//! formatting engine refuses those downstream. String interpolation is kept
//! as literal text.

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::cst::{Head, Kind, Node, NodeFlags, Prec};

/// The input does not lex or parse.
#[derive(Debug, Clone, Error)]
#[error("{message} at byte {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, offset: usize) -> ParseError {
        ParseError {
            message: message.into(),
            offset,
        }
    }
}

/// Parse source text into a lossless tree rooted at a `TopLevel` node.
pub fn parse(source: &str) -> Result<Node, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut kids = Vec::new();
    loop {
        parser.eat_trivia(&mut kids);
        match parser.at() {
            None => break,
            Some(t) if t.kind == Kind::Semi => parser.bump_into(&mut kids),
            Some(_) => {
                let stmt = parser.parse_statement()?;
                kids.push(stmt);
            }
        }
    }
    Ok(Node::new(Kind::TopLevel.into(), kids))
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    flags: NodeFlags,
    start: usize,
    len: usize,
}

impl Token {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Operator spellings, matched longest first.
static OPERATORS: Lazy<Vec<(&'static str, Prec)>> = Lazy::new(|| {
    let mut ops = vec![
        ("===", Prec::Comparison),
        ("!==", Prec::Comparison),
        ("//=", Prec::Assignment),
        ("==", Prec::Comparison),
        ("!=", Prec::Comparison),
        ("<=", Prec::Comparison),
        (">=", Prec::Comparison),
        ("+=", Prec::Assignment),
        ("-=", Prec::Assignment),
        ("*=", Prec::Assignment),
        ("/=", Prec::Assignment),
        ("^=", Prec::Assignment),
        ("%=", Prec::Assignment),
        ("&&", Prec::LazyAnd),
        ("||", Prec::LazyOr),
        ("|>", Prec::Pipe),
        ("::", Prec::Decl),
        ("//", Prec::Rational),
        ("≤", Prec::Comparison),
        ("≥", Prec::Comparison),
        ("≠", Prec::Comparison),
        ("∈", Prec::Comparison),
        ("∉", Prec::Comparison),
        ("⊆", Prec::Comparison),
        ("=", Prec::Assignment),
        ("<", Prec::Comparison),
        (">", Prec::Comparison),
        (":", Prec::Colon),
        ("+", Prec::Plus),
        ("-", Prec::Plus),
        ("*", Prec::Times),
        ("/", Prec::Times),
        ("%", Prec::Times),
        ("^", Prec::Power),
    ];
    ops.sort_by_key(|(s, _)| std::cmp::Reverse(s.len()));
    ops
});

fn keyword_kind(ident: &str) -> Option<(Kind, NodeFlags)> {
    let kind = match ident {
        "module" => Kind::Module,
        "struct" => Kind::Struct,
        "function" => Kind::Function,
        "return" => Kind::Return,
        "if" => Kind::If,
        "elseif" => Kind::ElseIf,
        "else" => Kind::Else,
        "for" => Kind::For,
        "while" => Kind::While,
        "begin" => Kind::Begin,
        "let" => Kind::Let,
        "end" => Kind::End,
        "in" => return Some((Kind::In, NodeFlags::empty())),
        _ => return None,
    };
    Some((kind, NodeFlags::TRIVIA))
}

fn char_at(src: &str, i: usize) -> Option<char> {
    src.get(i..).and_then(|s| s.chars().next())
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn lex(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut i = 0;
    let len = src.len();

    while i < len {
        let start = i;
        let c = match char_at(src, i) {
            Some(c) => c,
            None => break,
        };

        // Whitespace runs; a run containing a newline is its own kind so
        // rules can treat line breaks specially.
        if matches!(c, ' ' | '\t' | '\r' | '\n') {
            let mut saw_newline = false;
            while let Some(c) = char_at(src, i) {
                match c {
                    '\n' => {
                        saw_newline = true;
                        i += 1;
                    }
                    ' ' | '\t' | '\r' => i += 1,
                    _ => break,
                }
            }
            let kind = if saw_newline {
                Kind::NewlineWs
            } else {
                Kind::Whitespace
            };
            push(&mut tokens, kind, NodeFlags::empty(), start, i);
            continue;
        }

        // Comments: `#` to end of line, `#= =#` nesting blocks.
        if c == '#' {
            if src[i..].starts_with("#=") {
                i += 2;
                let mut depth = 1;
                while depth > 0 {
                    if i >= len {
                        return Err(ParseError::new("unterminated block comment", start));
                    }
                    if src[i..].starts_with("#=") {
                        depth += 1;
                        i += 2;
                    } else if src[i..].starts_with("=#") {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += char_at(src, i).map_or(1, char::len_utf8);
                    }
                }
            } else {
                while let Some(c) = char_at(src, i) {
                    if c == '\n' {
                        break;
                    }
                    i += c.len_utf8();
                }
            }
            push(&mut tokens, Kind::Comment, NodeFlags::empty(), start, i);
            continue;
        }

        // Strings and cmdstrings. Interpolation stays literal text.
        if c == '"' || c == '`' {
            let (delim_kind, delim_str): (Kind, &str) = if c == '"' {
                if src[i..].starts_with("\"\"\"") {
                    (Kind::DQuote, "\"\"\"")
                } else {
                    (Kind::DQuote, "\"")
                }
            } else {
                (Kind::Backtick, "`")
            };
            i += delim_str.len();
            push(&mut tokens, delim_kind, NodeFlags::empty(), start, i);
            let text_start = i;
            loop {
                if i >= len {
                    return Err(ParseError::new("unterminated string literal", start));
                }
                if src[i..].starts_with('\\') && i + 1 < len {
                    i += 1;
                    i += char_at(src, i).map_or(1, char::len_utf8);
                    continue;
                }
                if src[i..].starts_with(delim_str) {
                    break;
                }
                i += char_at(src, i).map_or(1, char::len_utf8);
            }
            if i > text_start {
                push(&mut tokens, Kind::StrText, NodeFlags::empty(), text_start, i);
            }
            push(&mut tokens, delim_kind, NodeFlags::empty(), i, i + delim_str.len());
            i += delim_str.len();
            continue;
        }

        // Macro names: `@` glued to an identifier.
        if c == '@' {
            i += 1;
            if char_at(src, i).is_some_and(is_ident_start) {
                while let Some(c) = char_at(src, i) {
                    if !is_ident_continue(c) {
                        break;
                    }
                    i += c.len_utf8();
                }
                push(&mut tokens, Kind::MacroName, NodeFlags::empty(), start, i);
            } else {
                push(&mut tokens, Kind::Error, NodeFlags::empty(), start, i);
            }
            continue;
        }

        // Numbers.
        if c.is_ascii_digit()
            || (c == '.' && char_at(src, i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            i = lex_number(src, i, &mut tokens);
            continue;
        }

        // Identifiers and keywords. A trailing `!` belongs to the
        // identifier unless it starts `!=`.
        if is_ident_start(c) {
            while let Some(c) = char_at(src, i) {
                if is_ident_continue(c) {
                    i += c.len_utf8();
                } else if c == '!' && char_at(src, i + 1) != Some('=') {
                    i += 1;
                } else {
                    break;
                }
            }
            match keyword_kind(&src[start..i]) {
                Some((kind, flags)) => push(&mut tokens, kind, flags, start, i),
                None => push(&mut tokens, Kind::Identifier, NodeFlags::empty(), start, i),
            }
            continue;
        }

        // Punctuation.
        let punct = match c {
            ',' => Some(Kind::Comma),
            ';' => Some(Kind::Semi),
            '(' => Some(Kind::OpenParen),
            ')' => Some(Kind::CloseParen),
            '[' => Some(Kind::OpenBracket),
            ']' => Some(Kind::CloseBracket),
            _ => None,
        };
        if let Some(kind) = punct {
            i += 1;
            push(&mut tokens, kind, NodeFlags::empty(), start, i);
            continue;
        }

        // `.` before operator matching, so `.==` lexes as dot + operator.
        if c == '.' {
            i += 1;
            push(&mut tokens, Kind::Dot, NodeFlags::empty(), start, i);
            continue;
        }

        // Operators, longest spelling first.
        if let Some((text, prec)) = OPERATORS.iter().find(|(s, _)| src[i..].starts_with(s)) {
            i += text.len();
            push(&mut tokens, Kind::Op(*prec), NodeFlags::empty(), start, i);
            continue;
        }

        // Everything else is preserved as an error leaf; the engine rejects
        // it if formatting is attempted.
        i += c.len_utf8();
        push(&mut tokens, Kind::Error, NodeFlags::empty(), start, i);
    }

    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, kind: Kind, flags: NodeFlags, start: usize, end: usize) {
    tokens.push(Token {
        kind,
        flags,
        start,
        len: end - start,
    });
}

/// Lex one numeric literal starting at `start`; returns the end offset.
fn lex_number(src: &str, start: usize, tokens: &mut Vec<Token>) -> usize {
    let mut i = start;

    // Radix prefixes.
    if src[start..].starts_with("0x")
        && char_at(src, start + 2).is_some_and(|c| c.is_ascii_hexdigit())
    {
        i = start + 2;
        while char_at(src, i).is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
            i += 1;
        }
        push(tokens, Kind::HexInt, NodeFlags::empty(), start, i);
        return i;
    }
    if src[start..].starts_with("0o")
        && char_at(src, start + 2).is_some_and(|c| ('0'..='7').contains(&c))
    {
        i = start + 2;
        while char_at(src, i).is_some_and(|c| ('0'..='7').contains(&c) || c == '_') {
            i += 1;
        }
        push(tokens, Kind::OctInt, NodeFlags::empty(), start, i);
        return i;
    }
    if src[start..].starts_with("0b")
        && char_at(src, start + 2).is_some_and(|c| c == '0' || c == '1')
    {
        i = start + 2;
        while char_at(src, i).is_some_and(|c| c == '0' || c == '1' || c == '_') {
            i += 1;
        }
        push(tokens, Kind::BinInt, NodeFlags::empty(), start, i);
        return i;
    }

    let mut is_float = false;
    while char_at(src, i).is_some_and(|c| c.is_ascii_digit() || c == '_') {
        i += 1;
    }
    if char_at(src, i) == Some('.') {
        match char_at(src, i + 1) {
            Some(c) if c.is_ascii_digit() => {
                is_float = true;
                i += 1;
                while char_at(src, i).is_some_and(|c| c.is_ascii_digit() || c == '_') {
                    i += 1;
                }
            }
            // `1.x` is field access on a literal; leave the dot alone.
            Some(c) if is_ident_start(c) || c == '.' || c == '(' => {}
            _ => {
                // `1.` with nothing attached is a float.
                is_float = true;
                i += 1;
            }
        }
    }
    // Exponent, or a Float32 suffix after a fractional part.
    if let Some(e) = char_at(src, i) {
        if matches!(e, 'e' | 'E' | 'f') && (is_float || e != 'f') {
            let mut j = i + 1;
            if matches!(char_at(src, j), Some('+') | Some('-')) {
                j += 1;
            }
            if char_at(src, j).is_some_and(|c| c.is_ascii_digit()) {
                i = j;
                while char_at(src, i).is_some_and(|c| c.is_ascii_digit()) {
                    i += 1;
                }
                is_float = true;
            }
        }
    }
    let kind = if is_float { Kind::Float } else { Kind::Integer };
    push(tokens, kind, NodeFlags::empty(), start, i);
    i
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

struct PendingOp {
    prec: Prec,
    dotted: bool,
}

fn is_inline_trivia(kind: Kind) -> bool {
    matches!(kind, Kind::Whitespace | Kind::Comment)
}

fn is_any_trivia(kind: Kind) -> bool {
    matches!(kind, Kind::Whitespace | Kind::NewlineWs | Kind::Comment)
}

fn starts_expression(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Identifier
            | Kind::MacroName
            | Kind::Integer
            | Kind::HexInt
            | Kind::OctInt
            | Kind::BinInt
            | Kind::Float
            | Kind::DQuote
            | Kind::Backtick
            | Kind::OpenParen
            | Kind::OpenBracket
            | Kind::Op(Prec::Plus)
    )
}

impl Parser {
    fn at(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn at_kind(&self, kind: Kind) -> bool {
        self.at().map(|t| t.kind) == Some(kind)
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map_or(0, Token::end)
    }

    fn leaf(token: &Token) -> Node {
        Node::leaf(Head::new(token.kind, token.flags), token.len)
    }

    /// Push the current token as a leaf and advance.
    fn bump_into(&mut self, kids: &mut Vec<Node>) {
        let token = self.tokens[self.pos];
        kids.push(Self::leaf(&token));
        self.pos += 1;
    }

    fn eat_trivia(&mut self, kids: &mut Vec<Node>) {
        while self.at().is_some_and(|t| is_any_trivia(t.kind)) {
            self.bump_into(kids);
        }
    }

    fn eat_inline_trivia(&mut self, kids: &mut Vec<Node>) {
        while self.at().is_some_and(|t| is_inline_trivia(t.kind)) {
            self.bump_into(kids);
        }
    }

    /// Next token past inline trivia, without consuming anything.
    fn peek_skip_inline(&self) -> Option<&Token> {
        self.tokens[self.pos..]
            .iter()
            .find(|t| !is_inline_trivia(t.kind))
    }

    fn expect_into(
        &mut self,
        kids: &mut Vec<Node>,
        kind: Kind,
        what: &str,
    ) -> Result<(), ParseError> {
        match self.at() {
            Some(t) if t.kind == kind => {
                self.bump_into(kids);
                Ok(())
            }
            Some(t) => Err(ParseError::new(format!("expected {what}"), t.start)),
            None => Err(ParseError::new(
                format!("expected {what}, found end of input"),
                self.end_offset(),
            )),
        }
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let kind = match self.at() {
            Some(t) => t.kind,
            None => {
                return Err(ParseError::new(
                    "expected a statement, found end of input",
                    self.end_offset(),
                ))
            }
        };
        match kind {
            Kind::Module | Kind::Struct | Kind::Function | Kind::For | Kind::While => {
                self.parse_kw_construct(kind, true)
            }
            Kind::Begin => self.parse_kw_construct(Kind::Begin, false),
            Kind::Let => self.parse_let(),
            Kind::If => self.parse_if(),
            Kind::Return => self.parse_return(),
            _ => self.parse_expr(0),
        }
    }

    /// Shared shape of `module`/`struct`/`function`/`for`/`while`/`begin`:
    /// keyword, optional header expression, body block, `end`.
    fn parse_kw_construct(&mut self, kind: Kind, header: bool) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        if header {
            self.eat_inline_trivia(&mut kids);
            kids.push(self.parse_expr(0)?);
        }
        self.parse_block_into(&mut kids, &[Kind::End])?;
        self.expect_into(&mut kids, Kind::End, "`end`")?;
        Ok(Node::new(kind.into(), kids))
    }

    fn parse_let(&mut self) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        if self
            .peek_skip_inline()
            .is_some_and(|t| starts_expression(t.kind))
        {
            self.eat_inline_trivia(&mut kids);
            kids.push(self.parse_expr(0)?);
        }
        self.parse_block_into(&mut kids, &[Kind::End])?;
        self.expect_into(&mut kids, Kind::End, "`end`")?;
        Ok(Node::new(Kind::Let.into(), kids))
    }

    fn parse_return(&mut self) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        if self
            .peek_skip_inline()
            .is_some_and(|t| starts_expression(t.kind))
        {
            self.eat_inline_trivia(&mut kids);
            kids.push(self.parse_expr(0)?);
        }
        Ok(Node::new(Kind::Return.into(), kids))
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        self.eat_inline_trivia(&mut kids);
        kids.push(self.parse_expr(0)?);
        let stops = [Kind::ElseIf, Kind::Else, Kind::End];
        self.parse_block_into(&mut kids, &stops)?;
        loop {
            match self.at().map(|t| t.kind) {
                Some(Kind::ElseIf) => {
                    let mut clause = Vec::new();
                    self.bump_into(&mut clause);
                    self.eat_inline_trivia(&mut clause);
                    clause.push(self.parse_expr(0)?);
                    self.parse_block_into(&mut clause, &stops)?;
                    kids.push(Node::new(Kind::ElseIf.into(), clause));
                }
                Some(Kind::Else) => {
                    let mut clause = Vec::new();
                    self.bump_into(&mut clause);
                    self.parse_block_into(&mut clause, &[Kind::End])?;
                    kids.push(Node::new(Kind::Else.into(), clause));
                }
                Some(Kind::End) => {
                    self.bump_into(&mut kids);
                    break;
                }
                _ => {
                    return Err(ParseError::new(
                        "expected `elseif`, `else`, or `end`",
                        self.at().map_or(self.end_offset(), |t| t.start),
                    ))
                }
            }
        }
        Ok(Node::new(Kind::If.into(), kids))
    }

    /// Parse statements into a `Block` child until one of `stops` comes up.
    /// The block absorbs surrounding trivia; an empty block is omitted.
    fn parse_block_into(
        &mut self,
        parent: &mut Vec<Node>,
        stops: &[Kind],
    ) -> Result<(), ParseError> {
        let mut kids = Vec::new();
        loop {
            self.eat_trivia(&mut kids);
            match self.at() {
                None => {
                    return Err(ParseError::new(
                        "expected `end`, found end of input",
                        self.end_offset(),
                    ))
                }
                Some(t) if stops.contains(&t.kind) => break,
                Some(t) if t.kind == Kind::Semi => self.bump_into(&mut kids),
                Some(_) => {
                    let stmt = self.parse_statement()?;
                    kids.push(stmt);
                }
            }
        }
        if !kids.is_empty() {
            parent.push(Node::new(Kind::Block.into(), kids));
        }
        Ok(())
    }

    // -- expressions --------------------------------------------------------

    fn parse_expr(&mut self, min_level: u8) -> Result<Node, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_operator() {
            let level = op.prec.level();
            if level < min_level {
                break;
            }
            let mut kids = vec![lhs];
            self.eat_inline_trivia(&mut kids);
            kids.push(self.take_operator(&op));
            self.eat_inline_trivia(&mut kids);
            // Assignment and power associate to the right.
            let next_min = if matches!(op.prec, Prec::Assignment | Prec::Power) {
                level
            } else {
                level + 1
            };
            kids.push(self.parse_expr(next_min)?);
            lhs = if op.prec == Prec::Assignment && !op.dotted {
                Node::new(Kind::Op(Prec::Assignment).into(), kids)
            } else {
                Node::new(Head::new(Kind::Call, NodeFlags::INFIX), kids)
            };
        }
        Ok(lhs)
    }

    fn peek_operator(&self) -> Option<PendingOp> {
        let (idx, token) = self.tokens[self.pos..]
            .iter()
            .enumerate()
            .find(|(_, t)| !is_inline_trivia(t.kind))?;
        match token.kind {
            Kind::Op(prec) => Some(PendingOp {
                prec,
                dotted: false,
            }),
            Kind::In => Some(PendingOp {
                prec: Prec::Comparison,
                dotted: false,
            }),
            Kind::Dot => {
                // A dotted operator is a `.` glued to an operator token.
                let next = self.tokens.get(self.pos + idx + 1)?;
                if next.start == token.end() {
                    if let Kind::Op(prec) = next.kind {
                        return Some(PendingOp { prec, dotted: true });
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Consume the operator found by [`Parser::peek_operator`]. Dotted
    /// operators become a `.` composite over the dot and the operator.
    fn take_operator(&mut self, op: &PendingOp) -> Node {
        if op.dotted {
            let mut kids = Vec::new();
            self.bump_into(&mut kids);
            self.bump_into(&mut kids);
            Node::new(Kind::Dot.into(), kids)
        } else {
            let token = self.tokens[self.pos];
            self.pos += 1;
            Self::leaf(&token)
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        if self.at_kind(Kind::Op(Prec::Plus)) {
            let mut kids = Vec::new();
            self.bump_into(&mut kids);
            kids.push(self.parse_unary()?);
            return Ok(Node::new(Head::new(Kind::Call, NodeFlags::PREFIX), kids));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_primary()?;
        loop {
            match self.at().map(|t| t.kind) {
                // Calls and indexing bind only when glued to the callee.
                Some(Kind::OpenParen) => {
                    node = self.parse_call_like(node, Kind::Call, Kind::CloseParen)?;
                }
                Some(Kind::OpenBracket) => {
                    node = self.parse_call_like(node, Kind::Ref, Kind::CloseBracket)?;
                }
                Some(Kind::Dot)
                    if self.tokens.get(self.pos + 1).map(|t| t.kind)
                        == Some(Kind::Identifier) =>
                {
                    let mut kids = vec![node];
                    self.bump_into(&mut kids);
                    self.bump_into(&mut kids);
                    node = Node::new(Kind::Dot.into(), kids);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_call_like(
        &mut self,
        callee: Node,
        kind: Kind,
        close: Kind,
    ) -> Result<Node, ParseError> {
        let mut kids = vec![callee];
        self.bump_into(&mut kids);
        loop {
            self.eat_trivia(&mut kids);
            match self.at() {
                None => {
                    return Err(ParseError::new(
                        "unterminated argument list",
                        self.end_offset(),
                    ))
                }
                Some(t) if t.kind == close => {
                    self.bump_into(&mut kids);
                    break;
                }
                Some(t) if matches!(t.kind, Kind::Comma | Kind::Semi) => {
                    self.bump_into(&mut kids)
                }
                Some(_) => {
                    let arg = self.parse_expr(0)?;
                    kids.push(arg);
                }
            }
        }
        Ok(Node::new(kind.into(), kids))
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let token = match self.at() {
            Some(t) => *t,
            None => {
                return Err(ParseError::new(
                    "expected an expression, found end of input",
                    self.end_offset(),
                ))
            }
        };
        match token.kind {
            Kind::Identifier
            | Kind::Integer
            | Kind::HexInt
            | Kind::OctInt
            | Kind::BinInt
            | Kind::Float => {
                self.pos += 1;
                Ok(Self::leaf(&token))
            }
            Kind::DQuote => self.parse_string(Kind::Str, Kind::DQuote),
            Kind::Backtick => self.parse_string(Kind::CmdStr, Kind::Backtick),
            Kind::OpenParen => self.parse_parens(),
            Kind::OpenBracket => self.parse_vect(),
            Kind::MacroName => self.parse_macrocall(),
            _ => {
                // Outside the supported subset; keep the bytes, mark the
                // node, let the engine refuse it.
                self.pos += 1;
                Ok(Node::leaf(Kind::Error.into(), token.len))
            }
        }
    }

    fn parse_string(&mut self, kind: Kind, delim: Kind) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        if self.at_kind(Kind::StrText) {
            self.bump_into(&mut kids);
        }
        self.expect_into(&mut kids, delim, "closing string delimiter")?;
        Ok(Node::new(kind.into(), kids))
    }

    fn parse_parens(&mut self) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        self.eat_trivia(&mut kids);
        if self.at_kind(Kind::CloseParen) {
            self.bump_into(&mut kids);
            return Ok(Node::new(Kind::Tuple.into(), kids));
        }
        kids.push(self.parse_expr(0)?);
        self.eat_trivia(&mut kids);
        if !self.at_kind(Kind::Comma) {
            self.expect_into(&mut kids, Kind::CloseParen, "`)`")?;
            return Ok(Node::new(Kind::Parens.into(), kids));
        }
        while self.at_kind(Kind::Comma) {
            self.bump_into(&mut kids);
            self.eat_trivia(&mut kids);
            if self.at_kind(Kind::CloseParen) {
                break;
            }
            kids.push(self.parse_expr(0)?);
            self.eat_trivia(&mut kids);
        }
        self.expect_into(&mut kids, Kind::CloseParen, "`)`")?;
        Ok(Node::new(Kind::Tuple.into(), kids))
    }

    fn parse_vect(&mut self) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        self.eat_trivia(&mut kids);
        if self.at_kind(Kind::CloseBracket) {
            self.bump_into(&mut kids);
            return Ok(Node::new(Kind::Vect.into(), kids));
        }
        let first = self.parse_expr(0)?;
        let mut trivia = Vec::new();
        self.eat_inline_trivia(&mut trivia);
        if self.at_kind(Kind::For) {
            // Comprehension: the element expression, the keyword, and the
            // iteration form one generator child.
            let mut gen = vec![first];
            gen.append(&mut trivia);
            self.bump_into(&mut gen);
            self.eat_inline_trivia(&mut gen);
            gen.push(self.parse_expr(0)?);
            kids.push(Node::new(Kind::Generator.into(), gen));
            self.eat_trivia(&mut kids);
            self.expect_into(&mut kids, Kind::CloseBracket, "`]`")?;
            return Ok(Node::new(Kind::Vect.into(), kids));
        }
        kids.push(first);
        kids.append(&mut trivia);
        loop {
            self.eat_trivia(&mut kids);
            match self.at() {
                None => {
                    return Err(ParseError::new(
                        "unterminated array literal",
                        self.end_offset(),
                    ))
                }
                Some(t) if t.kind == Kind::CloseBracket => {
                    self.bump_into(&mut kids);
                    break;
                }
                Some(t) if matches!(t.kind, Kind::Comma | Kind::Semi) => {
                    self.bump_into(&mut kids)
                }
                Some(_) => {
                    let item = self.parse_expr(0)?;
                    kids.push(item);
                }
            }
        }
        Ok(Node::new(Kind::Vect.into(), kids))
    }

    fn parse_macrocall(&mut self) -> Result<Node, ParseError> {
        let mut kids = Vec::new();
        self.bump_into(&mut kids);
        while self
            .peek_skip_inline()
            .is_some_and(|t| starts_expression(t.kind))
        {
            self.eat_inline_trivia(&mut kids);
            kids.push(self.parse_expr(0)?);
        }
        Ok(Node::new(Kind::MacroCall.into(), kids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cst::{infix_op_call_op, is_assignment, is_infix_op_call, validate_spans};

    fn root(src: &str) -> Node {
        let tree = parse(src).unwrap();
        assert_eq!(tree.span(), src.len(), "tree must cover the input");
        assert!(validate_spans(&tree));
        tree
    }

    fn first_statement(src: &str) -> Node {
        let tree = root(src);
        tree.verified_kids()
            .iter()
            .find(|k| !k.is_trivia())
            .unwrap()
            .clone()
    }

    #[test]
    fn empty_input_parses_to_empty_toplevel() {
        let tree = root("");
        assert_eq!(tree.kind(), Kind::TopLevel);
        assert_eq!(tree.span(), 0);
        assert!(!tree.is_leaf());
    }

    #[test]
    fn every_byte_lands_in_a_leaf() {
        for src in [
            "x = 1 + 2\n",
            "  a  \n\n b #hi\n",
            "for i = 1:3\n    f(i)\nend\n",
            "if a < b\n  c()\nelseif d\n  e()\nelse\n  g()\nend\n",
            "s = \"hello $(name)\"\nc = `ls -l`\n",
            "v = [f(x) for x in xs]\n",
            "@test 1 + 1 == 2\n",
            "module M\nstruct P\nx::Int\nend\nend\n",
            "#= nested #= comment =# =#\n",
            "while a ≤ b\na += 1\nend\n",
        ] {
            root(src);
        }
    }

    #[test]
    fn infix_calls_carry_the_flag_and_the_operator() {
        let call = first_statement("a + b");
        assert!(is_infix_op_call(&call));
        let op = infix_op_call_op(&call).unwrap();
        assert_eq!(op.kind(), Kind::Op(Prec::Plus));
    }

    #[test]
    fn assignment_heads_its_own_node() {
        let assign = first_statement("a = 1");
        assert!(is_assignment(&assign));
        assert!(!is_infix_op_call(&assign));
    }

    #[test]
    fn for_header_with_equals_is_an_assignment() {
        let loop_node = first_statement("for i = 1:3\nend");
        assert_eq!(loop_node.kind(), Kind::For);
        let iteration = loop_node
            .verified_kids()
            .iter()
            .find(|k| !k.is_trivia())
            .unwrap();
        assert!(is_assignment(iteration));
    }

    #[test]
    fn for_header_with_in_is_an_infix_call() {
        let loop_node = first_statement("for i in 1:3\nend");
        let iteration = loop_node
            .verified_kids()
            .iter()
            .find(|k| !k.is_trivia())
            .unwrap();
        assert!(is_infix_op_call(iteration));
        assert_eq!(infix_op_call_op(iteration).unwrap().kind(), Kind::In);
    }

    #[test]
    fn dotted_comparison_builds_a_dot_composite() {
        let call = first_statement("a .== b");
        assert!(is_infix_op_call(&call));
        let op = infix_op_call_op(&call).unwrap();
        assert_eq!(op.kind(), Kind::Dot);
        assert!(!op.is_leaf());
    }

    #[test]
    fn field_access_chains_left() {
        let stmt = first_statement("env.out.print(\"hi\")");
        assert_eq!(stmt.kind(), Kind::Call);
        let callee = stmt.first_non_whitespace_child();
        assert_eq!(callee.kind(), Kind::Dot);
    }

    #[test]
    fn trailing_dot_float_still_lexes() {
        let assign = first_statement("x = 1.");
        assert_eq!(assign.verified_kids().last().unwrap().kind(), Kind::Float);
    }

    #[test]
    fn unknown_bytes_become_error_leaves() {
        let stmt = first_statement("$");
        assert_eq!(stmt.kind(), Kind::Error);
    }

    #[test]
    fn unterminated_string_is_a_parse_error() {
        let err = parse("x = \"oops").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }
}
