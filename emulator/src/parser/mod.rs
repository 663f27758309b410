//! The MCL language front-end: lexer and recursive-descent parser.
//!
//! This is the thin collaborator in front of the code generator; everything
//! downstream works on the [`ast`] types it produces.

use thiserror::Error;

use crate::charset;
use crate::constants::Word;
use crate::parser::ast::Builtin;

pub mod ast;
mod grammar;

pub use grammar::parse_source;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident(String),
    Int(Word),
    /// Character literal, already encoded to its 6-bit code.
    Char(Word),

    Var,
    If,
    Else,
    While,
    For,
    Switch,
    Case,
    Default,
    Function,
    Return,
    Break,
    Continue,
    KwAnd,
    KwOr,
    KwXor,
    KwNot,
    Builtin(Builtin),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    At,
    Semicolon,
    Comma,
    Colon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Eof,
}

impl TokenKind {
    /// How the token reads in an error message.
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier {name:?}"),
            TokenKind::Int(value) => format!("literal {value}"),
            TokenKind::Char(code) => format!("character literal (code {code})"),
            TokenKind::Builtin(b) => format!("built-in {}", b.name()),
            TokenKind::Eof => String::from("end of input"),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match word {
        "var" => Var,
        "if" => If,
        "else" => Else,
        "while" => While,
        "for" => For,
        "switch" => Switch,
        "case" => Case,
        "default" => Default,
        "function" => Function,
        "return" => Return,
        "break" => Break,
        "continue" => Continue,
        "and" => KwAnd,
        "or" => KwOr,
        "xor" => KwXor,
        "not" => KwNot,
        "drawLine" => Builtin(ast::Builtin::DrawLine),
        "fillGrid" => Builtin(ast::Builtin::FillGrid),
        "clearGrid" => Builtin(ast::Builtin::ClearGrid),
        "loadSprite" => Builtin(ast::Builtin::LoadSprite),
        "drawSprite" => Builtin(ast::Builtin::DrawSprite),
        "loadText" => Builtin(ast::Builtin::LoadText),
        "drawText" => Builtin(ast::Builtin::DrawText),
        "scrollBuffer" => Builtin(ast::Builtin::ScrollBuffer),
        "setGPUBuffer" => Builtin(ast::Builtin::SetGpuBuffer),
        "getGPUBuffer" => Builtin(ast::Builtin::GetGpuBuffer),
        "malloc" => Builtin(ast::Builtin::Malloc),
        "free" => Builtin(ast::Builtin::Free),
        "readChar" => Builtin(ast::Builtin::ReadChar),
        _ => return None,
    })
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume the second character of a two-character operator if present.
    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        use TokenKind::*;

        let mut tokens = Vec::new();
        loop {
            // Skip whitespace and `//` comments.
            match self.chars.peek() {
                None => break,
                Some(c) if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                Some('/') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    if self.eat('/') {
                        while self.chars.peek().is_some_and(|&c| c != '\n') {
                            self.bump();
                        }
                        continue;
                    }
                    tokens.push(Token { kind: Slash, line, column });
                    continue;
                }
                Some(_) => {}
            }

            let (line, column) = (self.line, self.column);
            let c = self.bump().expect("peeked above");
            let kind = match c {
                'a'..='z' | 'A'..='Z' | '_' => {
                    let mut word = String::from(c);
                    while self
                        .chars
                        .peek()
                        .is_some_and(|&c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        word.push(self.bump().expect("peeked above"));
                    }
                    keyword(&word).unwrap_or(Ident(word))
                }
                '0'..='9' => {
                    let mut digits = String::from(c);
                    let hex = c == '0' && self.eat('x');
                    while self
                        .chars
                        .peek()
                        .is_some_and(|&c| c.is_ascii_alphanumeric())
                    {
                        digits.push(self.bump().expect("peeked above"));
                    }
                    let value = if hex {
                        Word::from_str_radix(&digits[1..], 16)
                    } else {
                        digits.parse()
                    };
                    Int(value.map_err(|_| self.error(format!("bad integer literal {digits:?}")))?)
                }
                '\'' => {
                    let c = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated character literal"))?;
                    if self.bump() != Some('\'') {
                        return Err(self.error("unterminated character literal"));
                    }
                    let code = charset::encode(c)
                        .map_err(|e| self.error(e.to_string()))?;
                    Char(code)
                }
                '+' => Plus,
                '-' => Minus,
                '*' => Star,
                '%' => Percent,
                '=' => {
                    if self.eat('=') {
                        Eq
                    } else {
                        Assign
                    }
                }
                '!' => {
                    if self.eat('=') {
                        Ne
                    } else {
                        Bang
                    }
                }
                '<' => {
                    if self.eat('=') {
                        Le
                    } else if self.eat('<') {
                        Shl
                    } else {
                        Lt
                    }
                }
                '>' => {
                    if self.eat('=') {
                        Ge
                    } else if self.eat('>') {
                        Shr
                    } else {
                        Gt
                    }
                }
                '&' => {
                    if self.eat('&') {
                        AndAnd
                    } else {
                        Amp
                    }
                }
                '|' => {
                    if self.eat('|') {
                        OrOr
                    } else {
                        Pipe
                    }
                }
                '^' => Caret,
                '~' => Tilde,
                '@' => At,
                ';' => Semicolon,
                ',' => Comma,
                ':' => Colon,
                '(' => LParen,
                ')' => RParen,
                '{' => LBrace,
                '}' => RBrace,
                '[' => LBracket,
                ']' => RBracket,
                other => return Err(self.error(format!("unexpected character {other:?}"))),
            };
            tokens.push(Token { kind, line, column });
        }

        tokens.push(Token {
            kind: Eof,
            line: self.line,
            column: self.column,
        });
        Ok(tokens)
    }
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_declaration_test() {
        use TokenKind::*;
        assert_eq!(
            kinds("var x: int = 0x2A;"),
            vec![
                Var,
                Ident("x".into()),
                Colon,
                Ident("int".into()),
                Assign,
                Int(42),
                Semicolon,
                Eof
            ]
        );
    }

    #[test]
    fn lex_operators_test() {
        use TokenKind::*;
        assert_eq!(
            kinds("<= >= == != << >> && || @ ~"),
            vec![Le, Ge, Eq, Ne, Shl, Shr, AndAnd, OrOr, At, Tilde, Eof]
        );
    }

    #[test]
    fn lex_char_literal_is_encoded_test() {
        assert_eq!(kinds("'H'"), vec![TokenKind::Char(7), TokenKind::Eof]);
        assert!(tokenize("' '").is_err());
    }

    #[test]
    fn lex_comments_and_positions_test() {
        let tokens = tokenize("// nothing\n  x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("x".into()));
        assert_eq!((tokens[0].line, tokens[0].column), (2, 3));
    }

    #[test]
    fn lex_builtin_keywords_test() {
        assert_eq!(
            kinds("drawLine")[0],
            TokenKind::Builtin(Builtin::DrawLine)
        );
        // Case matters: this is a plain identifier.
        assert_eq!(kinds("drawline")[0], TokenKind::Ident("drawline".into()));
    }

    #[test]
    fn lex_bad_literal_test() {
        assert!(tokenize("99999").is_err());
        assert!(tokenize("0xG").is_err());
    }
}
