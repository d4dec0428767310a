//! Tolerant recursive-descent parser
//!
//! A statement that fails to parse is dropped and reported; parsing resumes at
//! the next line break or `;` at the same nesting depth. Errors inside a block
//! only cost the statement they occur in.

use crate::model::features::LineRange;
use crate::service::features::ast::{Declarator, Expr, ExprKind, Stmt, StmtKind, SwitchCase};
use crate::service::features::lexer::{Token, TokenKind, tokenize};

/// Parsed program plus everything that had to be skipped
#[derive(Debug, Clone, Default)]
pub struct ParsedProgram {
    pub body: Vec<Stmt>,
    pub diagnostics: Vec<String>,
}

pub fn parse_program(source: &str) -> ParsedProgram {
    let (tokens, lex_diagnostics) = tokenize(source);
    let mut parser = Parser {
        tokens,
        pos: 0,
        no_in: false,
        diagnostics: lex_diagnostics
            .into_iter()
            .map(|d| format!("Line {}: {}", d.line, d.message))
            .collect(),
    };
    let body = parser.parse_statements(|_| false, false);
    ParsedProgram {
        body,
        diagnostics: parser.diagnostics,
    }
}

#[derive(Debug)]
struct SyntaxError {
    line: usize,
    message: String,
}

type ParseResult<T> = Result<T, SyntaxError>;

const ASSIGNMENT_OPERATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

/// Keywords that cannot start an expression
const STATEMENT_KEYWORDS: &[&str] = &[
    "var", "let", "const", "if", "else", "for", "while", "do", "switch", "case", "default",
    "try", "catch", "finally", "return", "throw", "break", "continue", "class",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Inside a `for` head, where `in` ends the left-hand side
    no_in: bool,
    diagnostics: Vec<String>,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn at_punct(&self, punct: &str) -> bool {
        self.peek().is_punct(punct)
    }

    fn at_ident(&self, name: &str) -> bool {
        self.peek().is_ident(name)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> ParseResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{punct}'")))
        }
    }

    fn unexpected(&self, context: &str) -> SyntaxError {
        let token = self.peek();
        SyntaxError {
            line: token.line,
            message: format!("{context}, found {}", token.kind),
        }
    }

    fn last_line(&self) -> usize {
        match self.pos {
            0 => 1,
            pos => self.tokens[pos - 1].end_line,
        }
    }

    fn span_from(&self, start: usize) -> LineRange {
        LineRange::new(start, self.last_line().max(start))
    }

    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let token = self.peek();
        if token.is_punct("}") || token.kind == TokenKind::Eof || token.newline_before {
            return Ok(());
        }
        Err(self.unexpected("expected ';'"))
    }

    // Statements

    fn parse_statements(&mut self, stop: impl Fn(&Token) -> bool, nested: bool) -> Vec<Stmt> {
        let mut body = Vec::new();
        while !self.at_eof() && !stop(self.peek()) {
            if nested && self.at_punct("}") {
                break;
            }
            let start = self.pos;
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => {
                    self.diagnostics.push(format!("Line {}: {}", e.line, e.message));
                    self.recover(start);
                }
            }
        }
        body
    }

    /// Skip the rest of a broken statement
    fn recover(&mut self, start: usize) {
        self.pos = start;
        let mut depth = 0usize;
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Punct("{" | "(" | "[") => depth += 1,
                TokenKind::Punct("}" | ")" | "]") => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth > 0 {
                continue;
            }
            let next = self.peek();
            if token.is_punct(";")
                || token.is_punct("}")
                || next.newline_before
                || next.is_punct("}")
                || next.kind == TokenKind::Eof
            {
                return;
            }
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.peek().line;
        let kind = match self.peek().kind.clone() {
            TokenKind::Punct("{") => StmtKind::Block(self.parse_block()?),
            TokenKind::Punct(";") => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Ident(word) => match word.as_str() {
                "var" | "let" | "const" => {
                    let declarations = self.parse_declarations()?;
                    self.consume_semicolon()?;
                    StmtKind::Var(declarations)
                }
                "function" => self.parse_function_declaration()?,
                "if" => self.parse_if()?,
                "while" => {
                    self.advance();
                    let test = self.parse_paren_expression()?;
                    let body = Box::new(self.parse_statement()?);
                    StmtKind::While { test, body }
                }
                "do" => {
                    self.advance();
                    let body = Box::new(self.parse_statement()?);
                    if !self.at_ident("while") {
                        return Err(self.unexpected("expected 'while'"));
                    }
                    self.advance();
                    let test = self.parse_paren_expression()?;
                    self.eat_punct(";");
                    StmtKind::DoWhile { body, test }
                }
                "for" => self.parse_for()?,
                "switch" => self.parse_switch()?,
                "try" => self.parse_try()?,
                "return" => {
                    self.advance();
                    let token = self.peek();
                    let argument = if token.is_punct(";")
                        || token.is_punct("}")
                        || token.kind == TokenKind::Eof
                        || token.newline_before
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_semicolon()?;
                    StmtKind::Return(argument)
                }
                "throw" => {
                    self.advance();
                    let argument = self.parse_expression()?;
                    self.consume_semicolon()?;
                    StmtKind::Throw(argument)
                }
                "break" | "continue" => {
                    self.advance();
                    if matches!(self.peek().kind, TokenKind::Ident(_)) && !self.peek().newline_before
                    {
                        self.advance();
                    }
                    self.consume_semicolon()?;
                    if word == "break" {
                        StmtKind::Break
                    } else {
                        StmtKind::Continue
                    }
                }
                _ => self.parse_expression_statement()?,
            },
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<StmtKind> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(StmtKind::Expr(expr))
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect("{")?;
        let body = self.parse_statements(|_| false, true);
        self.expect("}")?;
        Ok(body)
    }

    fn parse_declarations(&mut self) -> ParseResult<Vec<Declarator>> {
        self.advance();
        let mut declarations = Vec::new();
        loop {
            let start = self.peek().line;
            let target = match self.peek().kind.clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    Expr {
                        kind: ExprKind::Ident(name),
                        span: LineRange::single(start),
                    }
                }
                TokenKind::Punct("[" | "{") => self.parse_primary()?,
                _ => return Err(self.unexpected("expected a variable name")),
            };
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarations.push(Declarator {
                target,
                init,
                span: self.span_from(start),
            });
            if !self.eat_punct(",") {
                return Ok(declarations);
            }
        }
    }

    fn parse_function_declaration(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.eat_punct("*");
        let name = match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            _ => return Err(self.unexpected("expected a function name")),
        };
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(StmtKind::Function { name, params, body })
    }

    fn parse_params(&mut self) -> ParseResult<Vec<String>> {
        self.expect("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            self.eat_punct("...");
            match self.peek().kind.clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    params.push(name);
                }
                TokenKind::Punct("[" | "{") => {
                    self.parse_primary()?;
                }
                _ => return Err(self.unexpected("expected a parameter name")),
            }
            if self.eat_punct("=") {
                self.parse_assignment()?;
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(params)
    }

    fn parse_paren_expression(&mut self) -> ParseResult<Expr> {
        self.expect("(")?;
        let expr = self.parse_expression()?;
        self.expect(")")?;
        Ok(expr)
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let test = self.parse_paren_expression()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.at_ident("else") {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect("(")?;

        let init_start = self.peek().line;
        self.no_in = true;
        let init = if self.at_punct(";") {
            Ok(None)
        } else if self.at_ident("var") || self.at_ident("let") || self.at_ident("const") {
            self.parse_declarations().map(|d| Some(StmtKind::Var(d)))
        } else {
            self.parse_expression().map(|e| Some(StmtKind::Expr(e)))
        };
        self.no_in = false;
        let init = init?.map(|kind| {
            Box::new(Stmt {
                kind,
                span: self.span_from(init_start),
            })
        });

        if let Some(left) = init.clone()
            && (self.at_ident("in") || self.at_ident("of"))
        {
            self.advance();
            let right = self.parse_expression()?;
            self.expect(")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(StmtKind::ForEach { left, right, body });
        }

        self.expect(";")?;
        let test = if self.at_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(";")?;
        let update = if self.at_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_switch(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let discriminant = self.parse_paren_expression()?;
        self.expect("{")?;
        let mut cases = Vec::new();
        while !self.at_punct("}") {
            let test = if self.at_ident("case") {
                self.advance();
                Some(self.parse_expression()?)
            } else if self.at_ident("default") {
                self.advance();
                None
            } else {
                return Err(self.unexpected("expected 'case' or 'default'"));
            };
            self.expect(":")?;
            let body =
                self.parse_statements(|t| t.is_ident("case") || t.is_ident("default"), true);
            cases.push(SwitchCase { test, body });
        }
        self.expect("}")?;
        Ok(StmtKind::Switch {
            discriminant,
            cases,
        })
    }

    fn parse_try(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let block = self.parse_block()?;
        let handler = if self.at_ident("catch") {
            self.advance();
            if self.at_punct("(") {
                self.parse_params()?;
            }
            Some(self.parse_block()?)
        } else {
            None
        };
        let finalizer = if self.at_ident("finally") {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(StmtKind::Try {
            block,
            handler,
            finalizer,
        })
    }

    // Expressions

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;
        let first = self.parse_assignment()?;
        if !self.at_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr {
            kind: ExprKind::Sequence(items),
            span: self.span_from(start),
        })
    }

    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;

        if self.at_ident("async")
            && !self.peek_at(1).newline_before
            && (self.peek_at(1).is_ident("function") || self.arrow_ahead(1))
        {
            self.advance();
        }
        if self.arrow_ahead(0) {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Punct(p) if ASSIGNMENT_OPERATORS.contains(p) => *p,
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span: self.span_from(start),
        })
    }

    /// An arrow function starts `offset` tokens ahead
    fn arrow_ahead(&self, offset: usize) -> bool {
        let first = self.peek_at(offset);
        if matches!(first.kind, TokenKind::Ident(_)) {
            return self.peek_at(offset + 1).is_punct("=>");
        }
        if !first.is_punct("(") {
            return false;
        }
        let mut depth = 0usize;
        let mut ahead = offset;
        loop {
            let token = self.peek_at(ahead);
            match token.kind {
                TokenKind::Eof => return false,
                TokenKind::Punct("(" | "[" | "{") => depth += 1,
                TokenKind::Punct(")" | "]" | "}") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return self.peek_at(ahead + 1).is_punct("=>");
                    }
                }
                _ => {}
            }
            ahead += 1;
        }
    }

    fn parse_arrow(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;
        let params = match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                vec![name]
            }
            _ => self.parse_params()?,
        };
        self.expect("=>")?;
        let body = if self.at_punct("{") {
            self.parse_block()?
        } else {
            let no_in = std::mem::replace(&mut self.no_in, false);
            let value = self.parse_assignment();
            self.no_in = no_in;
            let value = value?;
            let span = value.span;
            vec![Stmt {
                kind: StmtKind::Return(Some(value)),
                span,
            }]
        };
        Ok(Expr {
            kind: ExprKind::Function {
                name: None,
                params,
                body,
            },
            span: self.span_from(start),
        })
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let no_in = std::mem::replace(&mut self.no_in, false);
        let consequent = self.parse_assignment();
        self.no_in = no_in;
        let consequent = consequent?;
        self.expect(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span: self.span_from(start),
        })
    }

    fn binary_operator(&self) -> Option<(&'static str, u8)> {
        let op = match &self.peek().kind {
            TokenKind::Punct(p) => *p,
            TokenKind::Ident(word) if word == "instanceof" => "instanceof",
            TokenKind::Ident(word) if word == "in" && !self.no_in => "in",
            _ => return None,
        };
        let precedence = match op {
            "??" => 1,
            "||" => 2,
            "&&" => 3,
            "|" => 4,
            "^" => 5,
            "&" => 6,
            "==" | "!=" | "===" | "!==" => 7,
            "<" | ">" | "<=" | ">=" | "instanceof" | "in" => 8,
            "<<" | ">>" | ">>>" => 9,
            "+" | "-" => 10,
            "*" | "/" | "%" => 11,
            "**" => 12,
            _ => return None,
        };
        Some((op, precedence))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        let start = self.peek().line;
        let mut left = self.parse_unary()?;
        while let Some((op, precedence)) = self.binary_operator() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            // `**` is right-associative
            let next = if op == "**" { precedence } else { precedence + 1 };
            let right = self.parse_binary(next)?;
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span: self.span_from(start),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;
        let op = match &self.peek().kind {
            TokenKind::Punct(p @ ("!" | "-" | "+" | "~")) => Some(*p),
            TokenKind::Punct(p @ ("++" | "--")) => {
                let op = *p;
                self.advance();
                let arg = self.parse_unary()?;
                return Ok(Expr {
                    kind: ExprKind::Update {
                        op,
                        prefix: true,
                        arg: Box::new(arg),
                    },
                    span: self.span_from(start),
                });
            }
            TokenKind::Ident(word) => match word.as_str() {
                "typeof" => Some("typeof"),
                "void" => Some("void"),
                "delete" => Some("delete"),
                "await" => Some("await"),
                _ => None,
            },
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_postfix();
        };
        self.advance();
        let arg = self.parse_unary()?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                arg: Box::new(arg),
            },
            span: self.span_from(start),
        })
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;
        let expr = self.parse_call_member(true)?;
        let token = self.peek();
        if (token.is_punct("++") || token.is_punct("--")) && !token.newline_before {
            let op = if token.is_punct("++") { "++" } else { "--" };
            self.advance();
            return Ok(Expr {
                kind: ExprKind::Update {
                    op,
                    prefix: false,
                    arg: Box::new(expr),
                },
                span: self.span_from(start),
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self, allow_calls: bool) -> ParseResult<Expr> {
        let start = self.peek().line;
        let mut expr = if self.at_ident("new") {
            self.advance();
            let callee = self.parse_call_member(false)?;
            let args = if self.at_punct("(") {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            Expr {
                kind: ExprKind::New {
                    callee: Box::new(callee),
                    args,
                },
                span: self.span_from(start),
            }
        } else {
            self.parse_primary()?
        };

        loop {
            let kind = if self.eat_punct(".") || self.eat_punct("?.") {
                match self.peek().kind.clone() {
                    TokenKind::Ident(property) => {
                        self.advance();
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        }
                    }
                    TokenKind::Punct("[") => {
                        self.advance();
                        let index = self.parse_expression()?;
                        self.expect("]")?;
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        }
                    }
                    TokenKind::Punct("(") if allow_calls => ExprKind::Call {
                        callee: Box::new(expr),
                        args: self.parse_arguments()?,
                    },
                    _ => return Err(self.unexpected("expected a property name")),
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                self.expect("]")?;
                ExprKind::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                }
            } else if allow_calls && self.at_punct("(") {
                ExprKind::Call {
                    callee: Box::new(expr),
                    args: self.parse_arguments()?,
                }
            } else {
                break;
            };
            expr = Expr {
                kind,
                span: self.span_from(start),
            };
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect("(")?;
        let no_in = std::mem::replace(&mut self.no_in, false);
        let args = self.parse_list(")");
        self.no_in = no_in;
        args
    }

    /// Comma-separated assignment expressions up to `close`, spread allowed
    fn parse_list(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at_punct(close) {
            let start = self.peek().line;
            if self.eat_punct("...") {
                let arg = self.parse_assignment()?;
                items.push(Expr {
                    kind: ExprKind::Spread(Box::new(arg)),
                    span: self.span_from(start),
                });
            } else {
                items.push(self.parse_assignment()?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.peek().line;
        let kind = match self.peek().kind.clone() {
            TokenKind::Ident(word) => match word.as_str() {
                "function" => {
                    self.advance();
                    self.eat_punct("*");
                    let name = match self.peek().kind.clone() {
                        TokenKind::Ident(name) => {
                            self.advance();
                            Some(name)
                        }
                        _ => None,
                    };
                    let params = self.parse_params()?;
                    let body = self.parse_block()?;
                    ExprKind::Function { name, params, body }
                }
                "true" | "false" => {
                    self.advance();
                    ExprKind::Bool(word == "true")
                }
                "null" => {
                    self.advance();
                    ExprKind::Null
                }
                "this" => {
                    self.advance();
                    ExprKind::This
                }
                w if STATEMENT_KEYWORDS.contains(&w) => {
                    return Err(self.unexpected("expected an expression"));
                }
                _ => {
                    self.advance();
                    ExprKind::Ident(word)
                }
            },
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Template(body) => {
                self.advance();
                ExprKind::Template(body)
            }
            TokenKind::Regex(body) => {
                self.advance();
                ExprKind::Regex(body)
            }
            TokenKind::Punct("(") => {
                self.advance();
                let no_in = std::mem::replace(&mut self.no_in, false);
                let inner = self.parse_expression();
                self.no_in = no_in;
                let inner = inner?;
                self.expect(")")?;
                inner.kind
            }
            TokenKind::Punct("[") => {
                self.advance();
                ExprKind::Array(self.parse_array_elements()?)
            }
            TokenKind::Punct("{") => {
                self.advance();
                ExprKind::Object(self.parse_object_properties()?)
            }
            _ => return Err(self.unexpected("expected an expression")),
        };
        Ok(Expr {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_array_elements(&mut self) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            // Holes
            while self.eat_punct(",") {}
            if self.eat_punct("]") {
                return Ok(items);
            }
            let start = self.peek().line;
            if self.eat_punct("...") {
                let arg = self.parse_assignment()?;
                items.push(Expr {
                    kind: ExprKind::Spread(Box::new(arg)),
                    span: self.span_from(start),
                });
            } else {
                items.push(self.parse_assignment()?);
            }
            if !self.at_punct(",") {
                self.expect("]")?;
                return Ok(items);
            }
        }
    }

    fn parse_object_properties(&mut self) -> ParseResult<Vec<(String, Expr)>> {
        let mut properties = Vec::new();
        while !self.at_punct("}") {
            let start = self.peek().line;
            if self.eat_punct("...") {
                let arg = self.parse_assignment()?;
                properties.push((String::new(), arg));
            } else {
                let mut key = self.parse_property_key()?;
                // Accessors: `get name() {}`
                if (key == "get" || key == "set" || key == "async")
                    && !matches!(self.peek().kind, TokenKind::Punct(":" | "(" | "," | "}"))
                {
                    key = self.parse_property_key()?;
                }
                let value = if self.eat_punct(":") {
                    self.parse_assignment()?
                } else if self.at_punct("(") {
                    let params = self.parse_params()?;
                    let body = self.parse_block()?;
                    Expr {
                        kind: ExprKind::Function {
                            name: Some(key.clone()),
                            params,
                            body,
                        },
                        span: self.span_from(start),
                    }
                } else {
                    // Shorthand `{ x }` or `{ x = 1 }` in patterns
                    if self.eat_punct("=") {
                        self.parse_assignment()?;
                    }
                    Expr {
                        kind: ExprKind::Ident(key.clone()),
                        span: LineRange::single(start),
                    }
                };
                properties.push((key, value));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect("}")?;
        Ok(properties)
    }

    fn parse_property_key(&mut self) -> ParseResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) | TokenKind::Str(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(n.to_string())
            }
            TokenKind::Punct("[") => {
                self.advance();
                let key = self.parse_assignment()?;
                self.expect("]")?;
                Ok(key.to_string())
            }
            _ => Err(self.unexpected("expected a property name")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_expression(source: &str) -> Expr {
        let program = parse_program(source);
        assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
        match program.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("expected an expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = single_expression("a + b * c;");
        let ExprKind::Binary { op, right, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, "+");
        assert!(matches!(right.kind, ExprKind::Binary { op: "*", .. }));
    }

    #[test]
    fn test_member_assignment() {
        let expr = single_expression("alienGreen.y = alienGreen.y - 3;");
        let ExprKind::Assign { op, target, .. } = expr.kind else {
            panic!("expected assignment");
        };
        assert_eq!(op, "=");
        assert_eq!(target.as_member_of_ident(), Some(("alienGreen", "y")));
    }

    #[test]
    fn test_statement_spans() {
        let program = parse_program("var a = 1;\n\nfunction draw() {\n  a++;\n}\n");
        assert!(program.diagnostics.is_empty());
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.body[0].span, LineRange::single(1));
        assert_eq!(program.body[1].span, LineRange::new(3, 5));
    }

    #[test]
    fn test_automatic_semicolons() {
        let program = parse_program("var a = 1\nvar b = a\nb++\nreturn\n");
        assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
        assert_eq!(program.body.len(), 4);
        assert_eq!(program.body[3].kind, StmtKind::Return(None));
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse_program(
            "if (keyDown(\"up\")) {\n  y--;\n} else if (x > 3) {\n  y++;\n} else {\n  y = 0;\n}",
        );
        assert!(program.diagnostics.is_empty());
        let StmtKind::If { alternate, .. } = &program.body[0].kind else {
            panic!("expected if");
        };
        let Some(alternate) = alternate else {
            panic!("expected else branch");
        };
        assert!(matches!(alternate.kind, StmtKind::If { .. }));
        assert_eq!(alternate.span, LineRange::new(3, 7));
    }

    #[test]
    fn test_for_loops() {
        let program = parse_program(
            "for (var i = 0; i < 3; i++) { x(i); }\nfor (var k in obj) {}\nfor (const v of list) {}",
        );
        assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
        assert!(matches!(program.body[0].kind, StmtKind::For { .. }));
        assert!(matches!(program.body[1].kind, StmtKind::ForEach { .. }));
        assert!(matches!(program.body[2].kind, StmtKind::ForEach { .. }));
    }

    #[test]
    fn test_arrow_functions_and_objects() {
        let program = parse_program(
            "var f = (a, b) => a + b;\nvar g = x => { return x; };\nvar o = { a: 1, b() { return 2; }, c };",
        );
        assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_recovers_after_broken_statement() {
        let program = parse_program("var a = ;\nvar b = createSprite(1, 2);\n");
        assert_eq!(program.diagnostics.len(), 1);
        assert!(program.diagnostics[0].starts_with("Line 1:"));
        assert_eq!(program.body.len(), 1);
        assert_eq!(program.body[0].span, LineRange::single(2));
    }

    #[test]
    fn test_error_inside_function_keeps_function() {
        let program = parse_program("function draw() {\n  x = = 2;\n  rect(1, 2, 3, 4);\n}\n");
        assert_eq!(program.diagnostics.len(), 1);
        let StmtKind::Function { name, body, .. } = &program.body[0].kind else {
            panic!("expected function");
        };
        assert_eq!(name, "draw");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_switch_and_try() {
        let program = parse_program(
            "switch (x) {\n case 1: a(); break;\n default: b();\n}\ntry { c(); } catch (e) { d(); } finally { f(); }",
        );
        assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
        let StmtKind::Switch { cases, .. } = &program.body[0].kind else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].body.len(), 2);
    }

    #[test]
    fn test_new_and_chained_calls() {
        let expr = single_expression("new Group().add(sprite);");
        let ExprKind::Call { callee, args } = expr.kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(callee.kind, ExprKind::Member { .. }));
    }
}
