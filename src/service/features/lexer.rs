//! Tokenizer for the JavaScript subset students write in Game Lab
//!
//! Never fails: characters it cannot make sense of are skipped and
//! reported as diagnostics so the parser can still see the rest.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    /// Raw template body, substitutions included
    Template(String),
    Regex(String),
    Punct(&'static str),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::Number(n) => write!(f, "number {n}"),
            TokenKind::Str(_) => f.write_str("string"),
            TokenKind::Template(_) => f.write_str("template literal"),
            TokenKind::Regex(_) => f.write_str("regular expression"),
            TokenKind::Punct(p) => write!(f, "'{p}'"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based line of the first character
    pub line: usize,
    /// 1-based line of the last character
    pub end_line: usize,
    /// A line break separates this token from the previous one
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(p) if p == punct)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(n) if n == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexDiagnostic {
    pub line: usize,
    pub message: String,
}

/// Longest first so `>>>=` wins over `>>`
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".",
];

/// Keywords after which a `/` starts a regular expression
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
];

pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexDiagnostic>) {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    newline_pending: bool,
    tokens: Vec<Token>,
    diagnostics: Vec<LexDiagnostic>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            newline_pending: false,
            tokens: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn run(mut self) -> (Vec<Token>, Vec<LexDiagnostic>) {
        while let Some(c) = self.peek(0) {
            let start_line = self.line;
            match c {
                '\n' => {
                    self.bump();
                    self.newline_pending = true;
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment(),
                '/' if self.regex_allowed() => {
                    let body = self.read_regex();
                    self.push(TokenKind::Regex(body), start_line);
                }
                '"' | '\'' => {
                    let value = self.read_string(c);
                    self.push(TokenKind::Str(value), start_line);
                }
                '`' => {
                    let body = self.read_template();
                    self.push(TokenKind::Template(body), start_line);
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    let number = self.read_number();
                    self.push(TokenKind::Number(number), start_line);
                }
                c if is_ident_start(c) => {
                    let name = self.read_ident();
                    self.push(TokenKind::Ident(name), start_line);
                }
                _ => match self.read_punct() {
                    Some(punct) => self.push(TokenKind::Punct(punct), start_line),
                    None => {
                        self.diagnostics.push(LexDiagnostic {
                            line: start_line,
                            message: format!("unexpected character '{c}'"),
                        });
                        self.bump();
                    }
                },
            }
        }

        let line = self.line;
        self.push(TokenKind::Eof, line);
        (self.tokens, self.diagnostics)
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start_line: usize) {
        self.tokens.push(Token {
            kind,
            line: start_line,
            end_line: self.line,
            newline_before: std::mem::take(&mut self.newline_pending),
        });
    }

    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.kind) {
            None => true,
            Some(TokenKind::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
            Some(TokenKind::Ident(name)) => REGEX_PRECEDING_KEYWORDS.contains(&name.as_str()),
            Some(_) => false,
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) {
        let start_line = self.line;
        self.pos += 2;
        loop {
            match self.peek(0) {
                Some('*') if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    return;
                }
                Some('\n') => {
                    self.bump();
                    self.newline_pending = true;
                }
                Some(_) => {
                    self.bump();
                }
                None => {
                    self.diagnostics.push(LexDiagnostic {
                        line: start_line,
                        message: "unterminated comment".to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Reads up to the closing quote. An unterminated string ends at the line break.
    fn read_string(&mut self, quote: char) -> String {
        let start_line = self.line;
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek(0) {
                Some(c) if c == quote => {
                    self.bump();
                    return value;
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('\n') => {}
                        Some(other) => value.push(other),
                        None => break,
                    }
                }
                Some('\n') | None => break,
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
        self.diagnostics.push(LexDiagnostic {
            line: start_line,
            message: "unterminated string".to_string(),
        });
        value
    }

    fn read_template(&mut self) -> String {
        let start_line = self.line;
        self.bump();
        let mut body = String::new();
        let mut depth = 0usize;
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    body.push(c);
                    if let Some(next) = self.bump() {
                        body.push(next);
                    }
                }
                '`' if depth == 0 => return body,
                '$' if self.peek(0) == Some('{') => {
                    body.push(c);
                    depth += 1;
                }
                '}' if depth > 0 => {
                    body.push(c);
                    depth -= 1;
                }
                _ => body.push(c),
            }
        }
        self.diagnostics.push(LexDiagnostic {
            line: start_line,
            message: "unterminated template literal".to_string(),
        });
        body
    }

    fn read_regex(&mut self) -> String {
        let mut body = String::new();
        body.push('/');
        self.bump();
        let mut in_class = false;
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
            body.push(c);
            match c {
                '\\' => {
                    if let Some(next) = self.bump() {
                        body.push(next);
                    }
                }
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => {
                    while let Some(flag) = self.peek(0).filter(|f| f.is_ascii_alphabetic()) {
                        body.push(flag);
                        self.bump();
                    }
                    return body;
                }
                _ => {}
            }
        }
        body
    }

    fn read_number(&mut self) -> f64 {
        let mut text = String::new();
        if self.peek(0) == Some('0')
            && let Some(radix_char) = self.peek(1)
            && let Some(radix) = match radix_char {
                'x' | 'X' => Some(16),
                'b' | 'B' => Some(2),
                'o' | 'O' => Some(8),
                _ => None,
            }
        {
            self.pos += 2;
            while let Some(c) = self.peek(0).filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            }
            return i64::from_str_radix(&text, radix).map_or(f64::NAN, |n| n as f64);
        }

        while let Some(c) = self.peek(0) {
            let exponent_sign = (c == '+' || c == '-') && text.ends_with(['e', 'E']);
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                text.push(c);
                self.bump();
            } else if c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        text.parse().unwrap_or(f64::NAN)
    }

    fn read_ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek(0).filter(|c| is_ident_part(*c)) {
            name.push(c);
            self.bump();
        }
        name
    }

    fn read_punct(&mut self) -> Option<&'static str> {
        let punct = PUNCTUATORS.iter().find(|p| {
            p.chars()
                .enumerate()
                .all(|(i, expected)| self.peek(i) == Some(expected))
        })?;
        self.pos += punct.chars().count();
        Some(punct)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_statement() {
        assert_eq!(
            kinds("var x = createSprite(200, 100);"),
            vec![
                TokenKind::Ident("var".into()),
                TokenKind::Ident("x".into()),
                TokenKind::Punct("="),
                TokenKind::Ident("createSprite".into()),
                TokenKind::Punct("("),
                TokenKind::Number(200.0),
                TokenKind::Punct(","),
                TokenKind::Number(100.0),
                TokenKind::Punct(")"),
                TokenKind::Punct(";"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_skipped_and_lines_tracked() {
        let (tokens, diagnostics) = tokenize("// intro\nx /* a\nb */ = 1;\ny");
        assert!(diagnostics.is_empty());
        let x = &tokens[0];
        assert_eq!(x.line, 2);
        assert!(x.newline_before);
        let eq = &tokens[1];
        assert_eq!(eq.line, 3);
        assert!(eq.newline_before);
        let y = &tokens[4];
        assert_eq!(y.line, 4);
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "say \"hi\"""#)[..2],
            [TokenKind::Str("it's".into()), TokenKind::Str("say \"hi\"".into())]
        );
    }

    #[test]
    fn test_unterminated_string_reported() {
        let (tokens, diagnostics) = tokenize("text(\"oops, 10, 20);\nx = 1;");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 1);
        assert!(tokens.iter().any(|t| t.is_ident("x") && t.line == 2));
    }

    #[test]
    fn test_longest_punctuator_wins() {
        assert_eq!(
            kinds("a === b !== c >>>= d")[1..6],
            [
                TokenKind::Punct("==="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("!=="),
                TokenKind::Ident("c".into()),
                TokenKind::Punct(">>>="),
            ]
        );
    }

    #[test]
    fn test_regex_versus_division() {
        assert_eq!(kinds("a / b")[1], TokenKind::Punct("/"));
        assert_eq!(kinds("x = /ab+c/gi;")[2], TokenKind::Regex("/ab+c/gi".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("0.5 .25 1e3 0xff 1_000")[..5],
            [
                TokenKind::Number(0.5),
                TokenKind::Number(0.25),
                TokenKind::Number(1000.0),
                TokenKind::Number(255.0),
                TokenKind::Number(1000.0),
            ]
        );
    }

    #[test]
    fn test_template_literal() {
        let (tokens, _) = tokenize("`score: ${a + `${b}`}` + 1");
        assert_eq!(tokens[0].kind, TokenKind::Template("score: ${a + `${b}`}".into()));
        assert!(tokens[1].is_punct("+"));
    }
}
