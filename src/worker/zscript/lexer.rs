//! Hand-written lexer for zscript source text.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // -- Literals --
    Int(i64),
    Str(String),
    Ident(String),

    // -- Keywords --
    Function,
    Const,
    Let,
    Return,
    If,
    Else,
    For,
    Of,
    Throw,
    True,
    False,
    Null,

    // -- Punctuation --
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
    Arrow,

    // -- Operators --
    Assign,
    PlusAssign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

/// Lex source text into tokens; the last token is always `Eof`.
pub fn lex(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        tokens: Vec::new(),
    };
    lexer.scan_all()?;
    Ok(lexer.tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn scan_all(&mut self) -> Result<(), ScriptError> {
        loop {
            self.skip_whitespace_and_comments()?;
            if self.at_end() {
                self.emit(TokenKind::Eof);
                return Ok(());
            }
            self.scan_token()?;
        }
    }

    fn scan_token(&mut self) -> Result<(), ScriptError> {
        let ch = self.advance();
        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '-' => TokenKind::Minus,
            '+' => {
                if self.match_char('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '=' => {
                if self.match_char('>') {
                    TokenKind::Arrow
                } else if self.match_char('=') {
                    // `===` and `==` mean the same thing here.
                    self.match_char('=');
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.match_char('=');
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.match_char('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.match_char('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' if self.match_char('&') => TokenKind::AndAnd,
            '|' if self.match_char('|') => TokenKind::OrOr,
            '"' | '\'' => self.string(ch)?,
            c if c.is_ascii_digit() => self.number(c)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.identifier(c),
            other => return Err(self.error(format!("unexpected character {:?}", other))),
        };
        self.emit(kind);
        Ok(())
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), ScriptError> {
        while let Some(ch) = self.peek() {
            match ch {
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                '/' if self.peek_next() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '/' if self.peek_next() == Some('*') => {
                    let start_line = self.line;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            None => {
                                return Err(ScriptError::Syntax {
                                    line: start_line,
                                    message: "unterminated block comment".to_string(),
                                })
                            }
                            Some('*') if self.peek_next() == Some('/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(c) => {
                                if c == '\n' {
                                    self.line += 1;
                                }
                                self.pos += 1;
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ScriptError> {
        let mut text = String::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.error("unterminated string literal".to_string()));
            };
            self.pos += 1;
            match ch {
                c if c == quote => return Ok(TokenKind::Str(text)),
                '\n' => return Err(self.error("newline in string literal".to_string())),
                '\\' => text.push(self.escape()?),
                c => text.push(c),
            }
        }
    }

    fn escape(&mut self) -> Result<char, ScriptError> {
        let Some(ch) = self.peek() else {
            return Err(self.error("unterminated escape sequence".to_string()));
        };
        self.pos += 1;
        Ok(match ch {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'u' => {
                let digits: String = (0..4).filter_map(|_| {
                    let c = self.peek()?;
                    self.pos += 1;
                    Some(c)
                }).collect();
                u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format!("bad unicode escape \\u{}", digits)))?
            }
            other => other,
        })
    }

    fn number(&mut self, first: char) -> Result<TokenKind, ScriptError> {
        let mut text = first.to_string();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.pos += 1;
        }
        text.parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|_| self.error(format!("integer literal {} is out of range", text)))
    }

    fn identifier(&mut self, first: char) -> TokenKind {
        let mut name = first.to_string();
        while let Some(c) = self
            .peek()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        {
            name.push(c);
            self.pos += 1;
        }
        match name.as_str() {
            "function" => TokenKind::Function,
            "const" => TokenKind::Const,
            "let" | "var" => TokenKind::Let,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "of" => TokenKind::Of,
            "throw" => TokenKind::Throw,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" | "undefined" => TokenKind::Null,
            _ => TokenKind::Ident(name),
        }
    }

    fn emit(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn error(&self, message: String) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        ch
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn function_header() {
        assert_eq!(
            kinds("function Z1000(a, b) { return a + b; }"),
            vec![
                TokenKind::Function,
                TokenKind::Ident("Z1000".into()),
                TokenKind::LParen,
                TokenKind::Ident("a".into()),
                TokenKind::Comma,
                TokenKind::Ident("b".into()),
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::Return,
                TokenKind::Ident("a".into()),
                TokenKind::Plus,
                TokenKind::Ident("b".into()),
                TokenKind::Semicolon,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn operators_and_arrows() {
        assert_eq!(
            kinds("=> === !== <= >= && || += !"),
            vec![
                TokenKind::Arrow,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::PlusAssign,
                TokenKind::Bang,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\tb" "é""#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\tb".into()),
                TokenKind::Str("é".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_lines_counted() {
        let tokens = lex("// header\n/* block\n comment */ x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("x".into()));
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn errors_carry_line() {
        let err = lex("let a = 1;\nlet b = 'open").unwrap_err();
        assert_eq!(
            err.to_string(),
            "SyntaxError (line 2): unterminated string literal"
        );
        assert!(lex("a # b").is_err());
    }
}
